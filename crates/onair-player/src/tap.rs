//! ffmpeg-backed producer for a `SampleTap`.
//!
//! mpv does not hand decoded samples back over IPC, so the visualizer reads
//! the same URL through a second decoder: ffmpeg to mono s16le on stdout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::analysis::SampleTap;

const TAP_SAMPLE_RATE: u32 = 11_025;
const TAP_CHUNK_SAMPLES: usize = 512;
const RESTART_DELAY: Duration = Duration::from_secs(2);

/// Feed `tap` from `url` until the tap is closed or the task is aborted.
/// Decoder exits (stream hiccups) are retried after a short pause.
pub(crate) fn spawn_pcm_tap(ffmpeg: PathBuf, url: String, tap: SampleTap) -> AbortHandle {
    let task = tokio::spawn(async move {
        while !tap.is_closed() {
            if let Err(e) = run_ffmpeg(&ffmpeg, &url, &tap).await {
                debug!("sample tap: ffmpeg exited: {}", e);
            }
            if tap.is_closed() {
                break;
            }
            tokio::time::sleep(RESTART_DELAY).await;
        }
        debug!("sample tap: closed");
    });
    task.abort_handle()
}

async fn run_ffmpeg(ffmpeg: &Path, url: &str, tap: &SampleTap) -> anyhow::Result<()> {
    let rate = TAP_SAMPLE_RATE.to_string();
    let mut child = Command::new(ffmpeg)
        .args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-nostdin",
            "-fflags",
            "nobuffer",
            "-flags",
            "low_delay",
            "-probesize",
            "64k",
            "-analyzeduration",
            "200000",
            "-i",
            url,
            "-vn",
            "-ac",
            "1",
            "-ar",
            &rate,
            "-f",
            "s16le",
            "pipe:1",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("ffmpeg stdout not captured"))?;
    let mut buf = vec![0u8; TAP_CHUNK_SAMPLES * 2];
    let mut chunk: Vec<f32> = Vec::with_capacity(TAP_CHUNK_SAMPLES);
    // An odd byte count can split a sample across reads.
    let mut carry: Option<u8> = None;

    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 || tap.is_closed() {
            break;
        }
        let mut bytes = &buf[..n];
        if let Some(lo) = carry.take() {
            chunk.push(pcm_to_f32([lo, bytes[0]]));
            bytes = &bytes[1..];
        }
        let mut pairs = bytes.chunks_exact(2);
        for pair in &mut pairs {
            chunk.push(pcm_to_f32([pair[0], pair[1]]));
        }
        carry = pairs.remainder().first().copied();

        if chunk.len() >= TAP_CHUNK_SAMPLES {
            tap.push(&chunk);
            chunk.clear();
        }
    }

    let _ = child.kill().await;
    Ok(())
}

fn pcm_to_f32(bytes: [u8; 2]) -> f32 {
    f32::from(i16::from_le_bytes(bytes)) / 32768.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_to_f32() {
        assert_eq!(pcm_to_f32([0, 0]), 0.0);
        assert_eq!(pcm_to_f32([0x00, 0x80]), -1.0);
        assert!((pcm_to_f32([0xff, 0x7f]) - 1.0).abs() < 1e-4);
    }
}

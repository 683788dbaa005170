//! Visualizer analysis graph: sample tap → frequency analyser → level sink.
//!
//! The graph only reads decoded audio; it never changes what is heard.  The
//! analyser mirrors the usual browser analyser node defaults (64-point FFT,
//! Hann window, -100..-30 dB range, 0.8 smoothing) so the bars
//! look the same as the web widget they replace.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use onair_proto::protocol::LEVEL_BANDS;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// FFT window; yields `LEVEL_BANDS` frequency bins.
pub const FFT_SIZE: usize = LEVEL_BANDS * 2;

/// Recent samples kept by a tap.  A few windows is plenty since only the
/// newest `FFT_SIZE` are ever analysed.
const TAP_CAPACITY: usize = FFT_SIZE * 16;

const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;
const SMOOTHING: f32 = 0.8;

#[derive(Debug)]
struct TapShared {
    ring: Mutex<VecDeque<f32>>,
    closed: AtomicBool,
}

/// Source node: a bounded ring of the newest mono samples (-1.0..1.0).
///
/// The producer side is whatever decodes the stream for the handle; the
/// graph holds the consumer side.  Closing the tap tells the producer to
/// stop.
#[derive(Debug, Clone)]
pub struct SampleTap {
    shared: Arc<TapShared>,
}

impl Default for SampleTap {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleTap {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(TapShared {
                ring: Mutex::new(VecDeque::with_capacity(TAP_CAPACITY)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn push(&self, samples: &[f32]) {
        if self.is_closed() {
            return;
        }
        if let Ok(mut ring) = self.shared.ring.lock() {
            ring.extend(samples.iter().copied());
            let excess = ring.len().saturating_sub(TAP_CAPACITY);
            ring.drain(..excess);
        }
    }

    /// Copy the newest `out.len()` samples into `out`, left-padding with
    /// silence when fewer are available.
    fn latest(&self, out: &mut [f32]) {
        out.fill(0.0);
        if let Ok(ring) = self.shared.ring.lock() {
            let n = ring.len().min(out.len());
            let offset = out.len() - n;
            for (dst, src) in out[offset..].iter_mut().zip(ring.iter().skip(ring.len() - n)) {
                *dst = *src;
            }
        }
    }

    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        if let Ok(mut ring) = self.shared.ring.lock() {
            ring.clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

/// Frequency analyser node.
pub struct Analyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    smoothed: [f32; LEVEL_BANDS],
}

impl Default for Analyser {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyser {
    pub fn new() -> Self {
        let fft = FftPlanner::new().plan_fft_forward(FFT_SIZE);
        let window = (0..FFT_SIZE)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / FFT_SIZE as f32).cos()))
            .collect();
        Self {
            fft,
            window,
            input: vec![0.0; FFT_SIZE],
            scratch: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            smoothed: [0.0; LEVEL_BANDS],
        }
    }

    /// Analyse the newest window from `tap` and write normalised (0.0-1.0)
    /// band levels into `levels`.
    pub fn process(&mut self, tap: &SampleTap, levels: &mut [f32; LEVEL_BANDS]) {
        tap.latest(&mut self.input);
        for ((dst, sample), w) in self.scratch.iter_mut().zip(&self.input).zip(&self.window) {
            *dst = Complex::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        let norm = 1.0 / FFT_SIZE as f32;
        for (bin, level) in levels.iter_mut().enumerate() {
            let magnitude = self.scratch[bin].norm() * norm;
            let smoothed = SMOOTHING * self.smoothed[bin] + (1.0 - SMOOTHING) * magnitude;
            self.smoothed[bin] = smoothed;
            *level = db_to_level(smoothed);
        }
    }
}

fn db_to_level(magnitude: f32) -> f32 {
    if magnitude <= 0.0 {
        return 0.0;
    }
    let db = 20.0 * magnitude.log10();
    ((db - MIN_DB) / (MAX_DB - MIN_DB)).clamp(0.0, 1.0)
}

/// The three nodes wired together.  Owned by a playback session and always
/// closed before the handle it taps is released.
pub struct AnalysisGraph {
    source: SampleTap,
    analyser: Analyser,
    sink: [f32; LEVEL_BANDS],
}

impl AnalysisGraph {
    pub fn attach(source: SampleTap) -> Self {
        Self {
            source,
            analyser: Analyser::new(),
            sink: [0.0; LEVEL_BANDS],
        }
    }

    /// Pull one frame through the graph and return the sink contents.
    pub fn sample(&mut self) -> &[f32; LEVEL_BANDS] {
        self.analyser.process(&self.source, &mut self.sink);
        &self.sink
    }

    /// Detach from the source.  The producer sees the closed tap and stops.
    pub fn close(self) {
        self.source.close();
    }
}

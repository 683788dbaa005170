mod common;

use std::time::Duration;

use common::{fail_last, ready_last, run_until_retry, FakeBackend};
use onair_player::analysis::SampleTap;
use onair_player::{MediaErrorKind, PlayerEvent, PlayerState, PlayerUpdate, StreamPlayer};
use onair_proto::config::PlayerConfig;
use onair_proto::protocol::PlaybackStatus;

const A: &str = "https://stream.example/a.mp3";
const B: &str = "https://stream.example/b.aac";
const C: &str = "https://stream.example/c.ogg";

fn player(urls: &[&str]) -> (StreamPlayer<FakeBackend>, common::Probe) {
    let (backend, probe) = FakeBackend::new();
    let config = PlayerConfig::with_urls(urls.iter().copied());
    (StreamPlayer::new(backend, config), probe)
}

#[tokio::test(start_paused = true)]
async fn never_holds_two_handles_at_once() {
    let (mut player, probe) = player(&[A, B]);

    player.play();
    fail_last(&mut player, &probe, MediaErrorKind::Network);
    run_until_retry(&mut player).await;
    ready_last(&mut player, &probe);
    player.pause();
    player.play();
    player.refresh();
    player.refresh();
    fail_last(&mut player, &probe, MediaErrorKind::Decode);
    player.refresh();
    ready_last(&mut player, &probe);
    player.play();
    player.shutdown();

    assert_eq!(probe.max_live(), 1);
    assert_eq!(probe.overlaps(), 0);
}

#[tokio::test(start_paused = true)]
async fn refresh_and_shutdown_release_everything() {
    let tap = SampleTap::new();
    let (mut player, probe) = player(&[A, B]);
    probe.provide_tap(tap.clone());

    player.play();
    ready_last(&mut player, &probe);
    let diag = player.diagnostics();
    assert!(diag.live_handle.is_some());
    assert!(diag.has_graph);
    assert!(diag.frame_loop_running);

    // refresh while live: old resources go, a new session starts
    player.refresh();
    assert_eq!(player.state(), PlayerState::Connecting);
    assert!(tap.is_closed());
    assert!(!player.diagnostics().has_graph);
    assert!(!player.diagnostics().frame_loop_running);
    assert_eq!(probe.creates(), 2);
    assert_eq!(probe.releases(), 1);

    // a pending retry is also torn down
    fail_last(&mut player, &probe, MediaErrorKind::Network);
    assert!(player.diagnostics().retry_pending);

    player.shutdown();
    assert!(player.diagnostics().is_clear());
    assert_eq!(player.state(), PlayerState::Idle);
    assert_eq!(probe.creates(), probe.releases());

    // nothing fires later
    tokio::time::sleep(Duration::from_secs(10)).await;
    player.drain();
    assert_eq!(probe.creates(), 2);
    assert_eq!(player.state(), PlayerState::Idle);

    // repeated shutdown is harmless
    player.shutdown();
    assert_eq!(probe.creates(), probe.releases());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_player_releases_the_handle() {
    let (mut player, probe) = player(&[A]);
    player.play();
    ready_last(&mut player, &probe);
    assert_eq!(probe.releases(), 0);

    drop(player);
    assert_eq!(probe.creates(), 1);
    assert_eq!(probe.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn falls_back_through_urls_in_order() {
    let (mut player, probe) = player(&[A, B, C]);

    player.play();
    assert_eq!(player.url_cursor(), Some(0));
    fail_last(&mut player, &probe, MediaErrorKind::Network);
    assert_eq!(player.state(), PlayerState::Connecting);
    assert_eq!(player.url_cursor(), Some(1));

    run_until_retry(&mut player).await;
    fail_last(&mut player, &probe, MediaErrorKind::Decode);
    run_until_retry(&mut player).await;
    fail_last(&mut player, &probe, MediaErrorKind::UnsupportedSource);

    assert_eq!(probe.opened_urls(), vec![A, B, C]);
    assert_eq!(
        player.state(),
        PlayerState::Error(MediaErrorKind::UnsupportedSource)
    );
}

#[tokio::test(start_paused = true)]
async fn next_url_waits_one_second() {
    let (mut player, probe) = player(&[A, B]);
    player.play();
    fail_last(&mut player, &probe, MediaErrorKind::Network);

    let started = tokio::time::Instant::now();
    run_until_retry(&mut player).await;
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(1000), "waited {:?}", waited);
    assert!(waited < Duration::from_millis(3000), "waited {:?}", waited);
    assert_eq!(probe.opened_urls(), vec![A, B]);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_two_session_retries() {
    let (mut player, probe) = player(&[A, B]);
    player.play();

    for session in 0..3u32 {
        assert_eq!(player.retry_count(), session);
        fail_last(&mut player, &probe, MediaErrorKind::Network);
        run_until_retry(&mut player).await;
        fail_last(&mut player, &probe, MediaErrorKind::Network);
        assert_eq!(player.state(), PlayerState::Error(MediaErrorKind::Network));

        if session < 2 {
            // auto-retry pending: still presented as connecting
            let snap = player.snapshot();
            assert_eq!(snap.status_label, "Connecting…");
            assert!(snap.error_message.is_none());

            let started = tokio::time::Instant::now();
            run_until_retry(&mut player).await;
            assert!(started.elapsed() >= Duration::from_millis(3000));
        }
    }

    assert_eq!(probe.creates(), 6);
    assert_eq!(probe.opened_urls(), vec![A, B, A, B, A, B]);
    assert!(!player.diagnostics().retry_pending);

    let snap = player.snapshot();
    assert_eq!(snap.status, PlaybackStatus::Error);
    assert_eq!(snap.status_label, "Error");
    assert_eq!(
        snap.error_message.as_deref(),
        Some(MediaErrorKind::Network.message())
    );
    assert!(snap.shows_reconnect());

    // terminal: time passing changes nothing
    tokio::time::sleep(Duration::from_secs(60)).await;
    player.drain();
    assert_eq!(probe.creates(), 6);

    // a manual reconnect starts over with a fresh budget
    player.refresh();
    assert_eq!(player.state(), PlayerState::Connecting);
    assert_eq!(player.retry_count(), 0);
    assert_eq!(player.url_cursor(), Some(0));
}

#[tokio::test(start_paused = true)]
async fn volume_and_mute_are_idempotent() {
    let (mut player, probe) = player(&[A]);
    player.play();
    ready_last(&mut player, &probe);
    let original = player.effective_gain();

    player.set_volume(40);
    let once = player.effective_gain();
    player.set_volume(40);
    assert_eq!(player.effective_gain(), once);
    assert!((once - 0.4).abs() < f32::EPSILON);

    player.toggle_mute();
    assert_eq!(player.effective_gain(), 0.0);
    assert!(player.is_muted());
    player.toggle_mute();
    assert_eq!(player.effective_gain(), once);

    player.set_volume(150);
    assert_eq!(player.volume(), 100);
    player.set_volume(-5);
    assert_eq!(player.volume(), 0);
    player.set_volume(80);
    assert_eq!(player.effective_gain(), original);

    // the handle saw every change
    let gains = probe.state().gains.clone();
    assert_eq!(gains.last().copied(), Some(original));
    assert!(gains.contains(&0.0));
}

#[tokio::test(start_paused = true)]
async fn muted_player_opens_new_handles_silent() {
    let (mut player, probe) = player(&[A]);
    player.toggle_mute();
    player.play();
    assert_eq!(probe.state().gains.first().copied(), Some(0.0));
}

#[tokio::test(start_paused = true)]
async fn stale_ready_after_refresh_is_ignored() {
    let (mut player, probe) = player(&[A, B]);
    player.play();
    let old = probe.last_handle();

    player.refresh();
    let fresh = probe.last_handle();
    assert_ne!(old, fresh);

    probe.ready(old);
    probe.fail(old, MediaErrorKind::Network);
    player.drain();

    assert_eq!(player.state(), PlayerState::Connecting);
    assert_eq!(player.url_cursor(), Some(0));
    assert_eq!(player.diagnostics().live_handle, Some(fresh));
    assert!(!player.diagnostics().retry_pending);

    probe.ready(fresh);
    player.drain();
    assert_eq!(player.state(), PlayerState::Live);
}

#[tokio::test(start_paused = true)]
async fn first_url_fails_second_goes_live() {
    let (mut player, probe) = player(&[A, B]);
    player.play();
    fail_last(&mut player, &probe, MediaErrorKind::Network);
    run_until_retry(&mut player).await;
    ready_last(&mut player, &probe);

    assert_eq!(player.state(), PlayerState::Live);
    assert_eq!(player.url_cursor(), Some(1));
    assert_eq!(probe.max_live(), 1);
    assert_eq!(probe.creates(), 2);
    assert_eq!(probe.releases(), 1);

    let snap = player.snapshot();
    assert!(snap.is_playing);
    assert_eq!(snap.status_label, "Live");
    assert_eq!(snap.url_cursor, Some(1));
}

#[tokio::test(start_paused = true)]
async fn pause_then_play_resumes_same_handle() {
    let (mut player, probe) = player(&[A]);
    player.play();
    ready_last(&mut player, &probe);
    let handle = player.diagnostics().live_handle;

    player.pause();
    assert_eq!(player.state(), PlayerState::Paused);
    assert!(!player.diagnostics().frame_loop_running);
    assert_eq!(player.snapshot().status_label, "Paused");

    player.play();
    assert_eq!(player.state(), PlayerState::Live);
    assert_eq!(player.diagnostics().live_handle, handle);
    assert_eq!(probe.creates(), 1);
    assert_eq!(probe.state().pauses, 1);
    assert_eq!(probe.state().resumes, 1);
}

#[tokio::test(start_paused = true)]
async fn failure_while_paused_reconnects_on_play() {
    let (mut player, probe) = player(&[A]);
    player.play();
    ready_last(&mut player, &probe);
    player.pause();

    fail_last(&mut player, &probe, MediaErrorKind::Network);
    assert_eq!(player.state(), PlayerState::Paused);
    assert_eq!(player.diagnostics().live_handle, None);

    player.play();
    assert_eq!(player.state(), PlayerState::Connecting);
    assert_eq!(probe.creates(), 2);
}

#[tokio::test(start_paused = true)]
async fn refresh_while_connecting_starts_over() {
    let (mut player, probe) = player(&[A, B]);
    player.play();
    fail_last(&mut player, &probe, MediaErrorKind::Network);
    assert_eq!(player.url_cursor(), Some(1));
    assert!(player.diagnostics().retry_pending);

    player.refresh();
    assert_eq!(player.state(), PlayerState::Connecting);
    assert_eq!(player.url_cursor(), Some(0));
    assert!(!player.diagnostics().retry_pending);
    assert_eq!(probe.opened_urls(), vec![A, A]);

    // the cancelled 1 s retry never opens B
    tokio::time::sleep(Duration::from_secs(5)).await;
    player.drain();
    assert_eq!(probe.opened_urls(), vec![A, A]);
}

#[tokio::test(start_paused = true)]
async fn play_while_connecting_is_ignored() {
    let (mut player, probe) = player(&[A]);
    player.play();
    player.play();
    assert_eq!(probe.creates(), 1);
    assert!(player.snapshot().is_loading);
}

#[tokio::test(start_paused = true)]
async fn empty_url_list_is_a_terminal_error() {
    let (mut player, probe) = player(&[]);
    player.play();
    assert_eq!(
        player.state(),
        PlayerState::Error(MediaErrorKind::UnsupportedSource)
    );
    assert_eq!(probe.creates(), 0);
    assert!(!player.diagnostics().retry_pending);
    assert!(player.snapshot().error_message.is_some());
}

#[tokio::test(start_paused = true)]
async fn levels_are_broadcast_while_live() {
    let tap = SampleTap::new();
    let (mut player, probe) = player(&[A]);
    probe.provide_tap(tap.clone());
    let mut updates = player.subscribe();

    player.play();
    ready_last(&mut player, &probe);
    let tone: Vec<f32> = (0..256)
        .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 4.0 * i as f32 / 64.0).sin())
        .collect();
    tap.push(&tone);

    loop {
        let event = player.next_event().await.expect("player channel closed");
        let is_frame = matches!(event, PlayerEvent::Frame { .. });
        player.handle_event(event);
        if is_frame {
            break;
        }
    }

    let mut levels = None;
    while let Ok(update) = updates.try_recv() {
        if let PlayerUpdate::Levels(l) = update {
            levels = Some(l);
        }
    }
    let levels = levels.expect("no levels broadcast");
    assert_eq!(levels.len(), 32);
    assert!(levels.iter().any(|&l| l > 0.0));
    assert!(levels.iter().all(|&l| (0.0..=1.0).contains(&l)));

    // paused: levels drop to zero
    player.pause();
    assert!(player.snapshot().audio_levels.iter().all(|&l| l == 0.0));
}

#[tokio::test(start_paused = true)]
async fn runs_on_its_own_task_and_stops_on_shutdown() {
    let (player, probe) = player(&[A]);
    let handle = player.handle();
    let mut updates = player.subscribe();
    let task = tokio::spawn(player.run());

    assert!(handle.send(onair_player::PlayerCommand::TogglePlay));
    loop {
        match updates.recv().await {
            Ok(PlayerUpdate::Status(snap)) if snap.status == PlaybackStatus::Connecting => break,
            Ok(_) => continue,
            Err(e) => panic!("updates closed: {e}"),
        }
    }
    assert_eq!(probe.creates(), 1);

    handle.shutdown();
    task.await.expect("player task panicked");
    assert_eq!(probe.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn live_failure_falls_back_and_success_resets_retries() {
    let (mut player, probe) = player(&[A, B]);
    player.play();

    // exhaust the first session so a full-session retry runs
    fail_last(&mut player, &probe, MediaErrorKind::Network);
    run_until_retry(&mut player).await;
    fail_last(&mut player, &probe, MediaErrorKind::Network);
    run_until_retry(&mut player).await;
    assert_eq!(player.retry_count(), 1);
    assert_eq!(player.url_cursor(), Some(0));

    ready_last(&mut player, &probe);
    assert_eq!(player.state(), PlayerState::Live);
    assert_eq!(player.retry_count(), 0);

    // the live stream on A drops
    fail_last(&mut player, &probe, MediaErrorKind::Network);
    assert_eq!(player.state(), PlayerState::Connecting);
    assert_eq!(player.url_cursor(), Some(1));
    assert!(!player.diagnostics().frame_loop_running);
    assert_eq!(player.diagnostics().live_handle, None);

    run_until_retry(&mut player).await;
    ready_last(&mut player, &probe);
    assert_eq!(player.state(), PlayerState::Live);

    // and then B drops too: session over, automatic retry pending
    fail_last(&mut player, &probe, MediaErrorKind::Network);
    assert_eq!(player.state(), PlayerState::Error(MediaErrorKind::Network));
    assert!(player.diagnostics().retry_pending);
    assert!(!player.diagnostics().frame_loop_running);
    assert!(player.snapshot().is_loading);
    assert_eq!(probe.max_live(), 1);
}

#[tokio::test(start_paused = true)]
async fn resync_republishes_current_status() {
    let (mut player, probe) = player(&[A]);
    player.play();
    ready_last(&mut player, &probe);
    let mut updates = player.subscribe();

    player.handle().resync();
    player.drain();

    loop {
        match updates.try_recv() {
            Ok(PlayerUpdate::Status(snap)) => {
                assert_eq!(snap.status, PlaybackStatus::Live);
                break;
            }
            Ok(_) => continue,
            Err(e) => panic!("no status republished: {e}"),
        }
    }
    assert_eq!(probe.creates(), 1);
}

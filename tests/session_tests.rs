//! Session Controller Tests
//!
//! Playback policies, progress and export orchestration, driven through a
//! manually pulled output so timing is deterministic.

mod common;

use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use pretty_assertions::assert_eq;

use common::{Fixture, RATE};
use mixdown::session::Progress;
use mixdown::{
    AudioSegment, EngineConfig, ExportFormat, GraphState, MixError, PlaybackMode, PlaybackState,
    SessionController, SessionEvent,
};

const BLOCK: usize = 4410;

fn tick(ctrl: &mut SessionController, elapsed: f64) {
    let generation = ctrl.ticker_generation();
    ctrl.handle_event(SessionEvent::Tick {
        generation,
        elapsed,
    });
}

fn wait_for_export(ctrl: &mut SessionController) -> mixdown::Result<mixdown::RenderedMix> {
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        ctrl.wait_event(Duration::from_millis(50));
        if let Some(result) = ctrl.take_export_result() {
            return result;
        }
        assert!(Instant::now() < deadline, "export did not finish");
    }
}

// === Track list ===

#[test]
fn test_add_source_selects_and_loads() {
    let fx = Fixture::new();
    let a = fx.sine("a.wav", 1.0, 440.0, 0.5);
    let b = fx.sine("b.wav", 2.0, 220.0, 0.5);
    let (mut ctrl, _handle) = fx.headless();

    assert_eq!(ctrl.add_source(&a).unwrap(), 0);
    assert_eq!(ctrl.add_source(&b).unwrap(), 1);

    assert_eq!(ctrl.selected(), Some(1));
    assert_relative_eq!(ctrl.tracks()[1].total_duration(), 2.0, epsilon = 1e-3);
    assert_eq!(ctrl.graph().unit_count(), 2);
    assert_eq!(ctrl.graph().state(), GraphState::Loaded);
    assert!(ctrl.can_export());
}

#[test]
fn test_add_source_computes_waveform_when_enabled() {
    let fx = Fixture::new();
    let a = fx.sine("a.wav", 1.0, 440.0, 0.5);
    let mut config = fx.dry_config();
    config.waveform.compute_on_add = true;
    config.waveform.bins = 64;
    let (mut ctrl, _handle) = SessionController::headless(config);

    ctrl.add_source(&a).unwrap();
    assert_eq!(ctrl.tracks()[0].waveform().map(|w| w.len()), Some(64));
}

#[test]
fn test_selection_is_clamped() {
    let fx = Fixture::new();
    let a = fx.sine("a.wav", 2.0, 440.0, 0.5);
    let (mut ctrl, _handle) = fx.headless();
    ctrl.add_source(&a).unwrap();

    ctrl.update_selection(0, 1.5, -4.0).unwrap();
    let track = &ctrl.tracks()[0];
    assert_eq!(track.selection_start(), 0.0);
    assert_relative_eq!(track.selection_end(), 1.5);
    assert_eq!(ctrl.graph().segments()[0], *track);

    ctrl.update_selection(0, 10.0, 12.0).unwrap();
    assert_eq!(ctrl.tracks()[0].selected_length(), 0.0);
    assert!(!ctrl.can_export());
}

#[test]
fn test_remove_source_shifts_selection() {
    let fx = Fixture::new();
    let a = fx.sine("a.wav", 0.5, 440.0, 0.5);
    let (mut ctrl, _handle) = fx.headless();
    for _ in 0..3 {
        ctrl.add_source(&a).unwrap();
    }

    ctrl.remove_source(0).unwrap();
    assert_eq!(ctrl.selected(), Some(1));
    assert_eq!(ctrl.graph().unit_count(), 2);

    ctrl.remove_source(1).unwrap();
    ctrl.remove_source(0).unwrap();
    assert_eq!(ctrl.selected(), None);
    assert_eq!(ctrl.graph().state(), GraphState::Idle);
}

#[test]
fn test_request_source_arrives_on_pump() {
    let fx = Fixture::new();
    let a = fx.sine("a.wav", 1.0, 440.0, 0.5);
    let (mut ctrl, _handle) = fx.headless();

    ctrl.request_source(&a).unwrap();
    assert_eq!(ctrl.pending_loads(), 1);

    let deadline = Instant::now() + Duration::from_secs(10);
    while ctrl.tracks().is_empty() {
        ctrl.wait_event(Duration::from_millis(50));
        assert!(Instant::now() < deadline, "source never arrived");
    }
    assert_eq!(ctrl.pending_loads(), 0);
    assert_eq!(ctrl.graph().unit_count(), 1);
}

// === Simultaneous playback ===

#[test]
fn test_simultaneous_play_and_progress() {
    let fx = Fixture::new();
    let a = fx.dc("a.wav", 1.0, 0.1);
    let b = fx.dc("b.wav", 2.0, 0.2);
    let (mut ctrl, handle) = fx.headless();
    ctrl.add_source(&a).unwrap();
    ctrl.add_source(&b).unwrap();

    ctrl.toggle_play(0).unwrap();
    assert_eq!(ctrl.state(), PlaybackState::Playing { track: 0 });
    assert_eq!(ctrl.graph().state(), GraphState::Previewing);
    assert_relative_eq!(ctrl.progress().total, 2.0, epsilon = 1e-3);

    let block = handle.pull(BLOCK).unwrap();
    assert_relative_eq!(block.get(10, 0).unwrap(), 0.3, epsilon = 1e-5);

    tick(&mut ctrl, 1.0);
    assert_relative_eq!(ctrl.progress().elapsed, 1.0);
    assert!(ctrl.is_playing());

    tick(&mut ctrl, 2.5);
    assert_eq!(ctrl.state(), PlaybackState::Stopped);
    assert_eq!(ctrl.graph().state(), GraphState::Loaded);
}

#[test]
fn test_toggle_stops_and_cancels_ticks() {
    let fx = Fixture::new();
    let a = fx.dc("a.wav", 1.0, 0.1);
    let (mut ctrl, _handle) = fx.headless();
    ctrl.add_source(&a).unwrap();

    ctrl.toggle_play(0).unwrap();
    let generation = ctrl.ticker_generation();
    ctrl.toggle_play(0).unwrap();
    assert_eq!(ctrl.state(), PlaybackState::Stopped);

    ctrl.handle_event(SessionEvent::Tick {
        generation,
        elapsed: 0.5,
    });
    assert_eq!(ctrl.state(), PlaybackState::Stopped);
    assert_eq!(ctrl.progress().elapsed, 0.0);
    assert_ne!(ctrl.progress(), Progress::default());
}

#[test]
fn test_edit_while_playing_stops_preview() {
    let fx = Fixture::new();
    let a = fx.dc("a.wav", 1.0, 0.1);
    let (mut ctrl, _handle) = fx.headless();
    ctrl.add_source(&a).unwrap();
    ctrl.toggle_play(0).unwrap();

    ctrl.update_selection(0, 0.2, 0.4).unwrap();
    assert!(!ctrl.is_playing());
    assert_relative_eq!(ctrl.graph().segments()[0].selection_start(), 0.2);
}

// === Sequential playback ===

#[test]
fn test_sequential_playlist_walks_every_track() {
    let fx = Fixture::new();
    let levels = [0.1f32, 0.2, 0.3];
    let (mut ctrl, handle) = fx.headless();
    for (i, level) in levels.iter().enumerate() {
        let path = fx.dc(&format!("t{}.wav", i), 2.0, *level);
        ctrl.add_source(&path).unwrap();
    }
    ctrl.set_mode(PlaybackMode::Sequential);
    ctrl.toggle_play(0).unwrap();
    assert_relative_eq!(ctrl.progress().total, 6.0, epsilon = 1e-3);

    let mut transitions = Vec::new();
    let mut current = ctrl.state();
    let mut pulled = 0usize;
    while ctrl.is_playing() {
        let PlaybackState::Playing { track } = ctrl.state() else {
            unreachable!()
        };
        let block = handle.pull(BLOCK).unwrap();
        assert_relative_eq!(block.get(0, 0).unwrap(), levels[track], epsilon = 1e-5);
        pulled += BLOCK;
        ctrl.pump();
        tick(&mut ctrl, pulled as f64 / RATE as f64);

        if ctrl.state() != current {
            current = ctrl.state();
            transitions.push((pulled as f64 / RATE as f64, current));
        }
        assert!(pulled < 10 * RATE as usize, "playlist never finished");
    }

    assert_eq!(transitions.len(), 3);
    assert_relative_eq!(transitions[0].0, 2.0, epsilon = 1e-9);
    assert_eq!(transitions[0].1, PlaybackState::Playing { track: 1 });
    assert_relative_eq!(transitions[1].0, 4.0, epsilon = 1e-9);
    assert_eq!(transitions[1].1, PlaybackState::Playing { track: 2 });
    assert_relative_eq!(transitions[2].0, 6.0, epsilon = 1e-9);
    assert_eq!(transitions[2].1, PlaybackState::Stopped);

    // all tracks are back in the graph once the playlist ends
    assert_eq!(ctrl.graph().unit_count(), 3);
}

#[test]
fn test_sequential_progress_tracks_current_track() {
    let fx = Fixture::new();
    let (mut ctrl, handle) = fx.headless();
    for i in 0..2 {
        let path = fx.dc(&format!("t{}.wav", i), 1.0, 0.1);
        ctrl.add_source(&path).unwrap();
    }
    ctrl.set_mode(PlaybackMode::Sequential);
    ctrl.toggle_play(0).unwrap();

    for _ in 0..15 {
        handle.pull(BLOCK).unwrap();
        ctrl.pump();
    }
    tick(&mut ctrl, 1.5);

    let progress = ctrl.progress();
    assert_eq!(ctrl.state(), PlaybackState::Playing { track: 1 });
    assert_relative_eq!(progress.elapsed, 1.5);
    assert_relative_eq!(progress.track_elapsed, 0.5, epsilon = 1e-6);
    assert_relative_eq!(progress.total, 2.0, epsilon = 1e-3);
}

#[test]
fn test_sequential_skips_unreadable_and_empty_tracks() {
    let fx = Fixture::new();
    let (mut ctrl, handle) = fx.headless();
    let good = fx.dc("good.wav", 1.0, 0.1);
    let bad = fx.garbage("bad.wav");
    ctrl.add_source(&bad).unwrap();
    ctrl.add_source(&good).unwrap();
    ctrl.add_source(&good).unwrap();
    ctrl.update_selection(1, 0.5, 0.5).unwrap();

    ctrl.set_mode(PlaybackMode::Sequential);
    ctrl.toggle_play(0).unwrap();
    assert_eq!(ctrl.state(), PlaybackState::Playing { track: 2 });
    assert!(handle.pull(BLOCK).is_some());
}

#[test]
fn test_editing_sounding_track_keeps_playlist_position() {
    let fx = Fixture::new();
    let (mut ctrl, handle) = fx.headless();
    let levels = [0.1f32, 0.2, 0.3];
    for (i, level) in levels.iter().enumerate() {
        let path = fx.dc(&format!("t{}.wav", i), 1.0, *level);
        ctrl.add_source(&path).unwrap();
    }
    ctrl.set_mode(PlaybackMode::Sequential);
    ctrl.toggle_play(0).unwrap();

    for _ in 0..15 {
        handle.pull(BLOCK).unwrap();
        ctrl.pump();
    }
    tick(&mut ctrl, 1.5);
    assert_eq!(ctrl.state(), PlaybackState::Playing { track: 1 });

    ctrl.update_selection(1, 0.0, 0.5).unwrap();

    let progress = ctrl.progress();
    assert_eq!(ctrl.state(), PlaybackState::Playing { track: 1 });
    assert_relative_eq!(progress.total, 2.5, epsilon = 1e-3);
    assert_relative_eq!(progress.elapsed, 1.0, epsilon = 1e-6);
    assert_relative_eq!(progress.track_elapsed, 0.0);

    // ticks now count from the restart
    tick(&mut ctrl, 0.2);
    assert_relative_eq!(ctrl.progress().elapsed, 1.2, epsilon = 1e-6);

    for _ in 0..5 {
        let block = handle.pull(BLOCK).unwrap();
        assert_relative_eq!(block.get(0, 0).unwrap(), levels[1], epsilon = 1e-5);
        ctrl.pump();
    }
    assert_eq!(ctrl.state(), PlaybackState::Playing { track: 2 });
    let block = handle.pull(BLOCK).unwrap();
    assert_relative_eq!(block.get(0, 0).unwrap(), levels[2], epsilon = 1e-5);
    assert_relative_eq!(ctrl.progress().total, 2.5, epsilon = 1e-3);
}

#[test]
fn test_source_arriving_during_simultaneous_play_stops_preview() {
    let fx = Fixture::new();
    let a = fx.dc("a.wav", 1.0, 0.1);
    let b = fx.dc("b.wav", 1.0, 0.2);
    let (mut ctrl, handle) = fx.headless();
    ctrl.add_source(&a).unwrap();
    ctrl.toggle_play(0).unwrap();
    handle.pull(BLOCK).unwrap();

    ctrl.handle_event(SessionEvent::SourceLoaded {
        result: Ok(AudioSegment::new(&b, 1.0)),
    });

    assert_eq!(ctrl.state(), PlaybackState::Stopped);
    assert_eq!(ctrl.tracks().len(), 2);
    assert_eq!(ctrl.graph().unit_count(), 2);
    assert_eq!(ctrl.graph().state(), GraphState::Loaded);

    ctrl.toggle_play(0).unwrap();
    let block = handle.pull(BLOCK).unwrap();
    assert_relative_eq!(block.get(0, 0).unwrap(), 0.3, epsilon = 1e-5);
}

#[test]
fn test_source_arriving_during_playlist_stops_and_playlist_still_advances() {
    let fx = Fixture::new();
    let (mut ctrl, handle) = fx.headless();
    for i in 0..2 {
        let path = fx.dc(&format!("t{}.wav", i), 1.0, 0.1);
        ctrl.add_source(&path).unwrap();
    }
    let late = fx.dc("late.wav", 1.0, 0.3);
    ctrl.set_mode(PlaybackMode::Sequential);
    ctrl.toggle_play(0).unwrap();
    for _ in 0..5 {
        handle.pull(BLOCK).unwrap();
        ctrl.pump();
    }

    ctrl.handle_event(SessionEvent::SourceLoaded {
        result: Ok(AudioSegment::new(&late, 1.0)),
    });
    assert_eq!(ctrl.state(), PlaybackState::Stopped);
    assert_eq!(ctrl.graph().unit_count(), 3);

    ctrl.toggle_play(0).unwrap();
    assert_relative_eq!(ctrl.progress().total, 3.0, epsilon = 1e-3);
    for _ in 0..10 {
        handle.pull(BLOCK).unwrap();
        ctrl.pump();
    }
    assert_eq!(ctrl.state(), PlaybackState::Playing { track: 1 });
}

#[test]
fn test_set_mode_stops_playback() {
    let fx = Fixture::new();
    let a = fx.dc("a.wav", 1.0, 0.1);
    let (mut ctrl, _handle) = fx.headless();
    ctrl.add_source(&a).unwrap();
    ctrl.toggle_play(0).unwrap();

    ctrl.set_mode(PlaybackMode::Sequential);
    assert_eq!(ctrl.state(), PlaybackState::Stopped);
    assert_eq!(ctrl.mode(), PlaybackMode::Sequential);
}

// === Export ===

#[test]
fn test_export_on_worker() {
    let fx = Fixture::new();
    let a = fx.sine("a.wav", 1.0, 440.0, 0.4);
    let b = fx.sine("b.wav", 0.5, 660.0, 0.4);
    let (mut ctrl, _handle) = SessionController::headless(fx.config());
    ctrl.add_source(&a).unwrap();
    ctrl.add_source(&b).unwrap();

    ctrl.export_mix(ExportFormat::Uncompressed).unwrap();
    assert!(ctrl.is_exporting());
    assert!(matches!(
        ctrl.update_selection(0, 0.0, 0.5),
        Err(MixError::GraphBusy { .. })
    ));
    assert!(matches!(ctrl.toggle_play(0), Err(MixError::GraphBusy { .. })));

    let mix = wait_for_export(&mut ctrl).unwrap();
    assert!(mix.path.exists());
    assert_eq!(mix.frames, RATE as u64);
    assert!(!ctrl.is_exporting());
    assert_eq!(ctrl.graph().state(), GraphState::Loaded);
    assert_eq!(ctrl.export_format(), ExportFormat::Uncompressed);
}

#[test]
fn test_export_matches_blocking_render() {
    let fx = Fixture::new();
    let a = fx.sine("a.wav", 1.0, 440.0, 0.4);
    let b = fx.sine("b.wav", 1.0, 550.0, 0.4);
    let (mut ctrl, _handle) = SessionController::headless(fx.config());
    ctrl.add_source(&a).unwrap();
    ctrl.add_source(&b).unwrap();

    let inline = ctrl.export_mix_blocking(ExportFormat::Uncompressed).unwrap();
    ctrl.export_mix(ExportFormat::Uncompressed).unwrap();
    let worker = wait_for_export(&mut ctrl).unwrap();
    assert_eq!(inline.checksum, worker.checksum);
}

#[test]
fn test_export_of_empty_mix_fails_immediately() {
    let fx = Fixture::new();
    let a = fx.sine("a.wav", 1.0, 440.0, 0.4);
    let (mut ctrl, _handle) = fx.headless();
    ctrl.add_source(&a).unwrap();
    ctrl.update_selection(0, 0.5, 0.5).unwrap();

    let err = ctrl.export_mix(ExportFormat::Uncompressed).unwrap_err();
    assert!(matches!(err, MixError::EmptyMix { .. }));
    assert!(!ctrl.is_exporting());
    assert!(fx.rendered_files().is_empty());
}

#[test]
fn test_source_requested_during_export_is_added_after() {
    let fx = Fixture::new();
    let a = fx.sine("a.wav", 1.0, 440.0, 0.4);
    let (mut ctrl, _handle) = SessionController::headless(fx.config());
    ctrl.add_source(&a).unwrap();
    ctrl.add_source(&a).unwrap();

    ctrl.export_mix(ExportFormat::Uncompressed).unwrap();
    ctrl.request_source(&a).unwrap();
    wait_for_export(&mut ctrl).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while ctrl.tracks().len() < 3 {
        ctrl.wait_event(Duration::from_millis(50));
        assert!(Instant::now() < deadline, "source never arrived");
    }
    assert_eq!(ctrl.graph().unit_count(), 3);
}

// === Configuration ===

#[test]
fn test_config_round_trip() {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.session.default_mode = PlaybackMode::Sequential;
    config.session.default_export = ExportFormat::Uncompressed;
    config.effects.distortion.wet_dry_mix = 0.25;

    let path = fx.path("engine.json");
    config.save(&path).unwrap();
    let loaded = EngineConfig::load(&path).unwrap();
    assert_eq!(loaded.session, config.session);
    assert_eq!(loaded.effects, config.effects);

    let (ctrl, _handle) = SessionController::headless(loaded);
    assert_eq!(ctrl.mode(), PlaybackMode::Sequential);
    assert_eq!(ctrl.export_format(), ExportFormat::Uncompressed);
}

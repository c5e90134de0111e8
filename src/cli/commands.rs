//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};

use crate::cli::TrackArg;
use crate::config::EngineConfig;
use crate::engine::{probe_duration, ExportFormat, MixerGraph, OutputDevice};
use crate::error::Result;
use crate::session::{PlaybackMode, SessionController};
use crate::waveform::summarize_source;

/// Print the duration of each source.
pub fn probe(files: &[PathBuf]) -> Result<()> {
    for file in files {
        let duration = probe_duration(file);
        if duration > 0.0 {
            println!("{}\t{:.3}s", file.display(), duration);
        } else {
            println!("{}\tunreadable", file.display());
        }
    }
    Ok(())
}

/// Print a waveform summary as JSON.
pub fn waveform(config: &EngineConfig, file: &Path, bins: Option<usize>) -> Result<()> {
    let bins = bins.unwrap_or(config.waveform.bins).max(1);
    let summary = summarize_source(file, bins);
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

/// Add every track to the controller and apply its selection.
fn load_tracks(ctrl: &mut SessionController, tracks: &[TrackArg]) -> Result<()> {
    for track in tracks {
        let index = ctrl.add_source(&track.path)?;
        if ctrl.tracks()[index].total_duration() == 0.0 {
            warn!("{} is unreadable and will be silent", track.path.display());
        }
        if let Some((start, end)) = track.selection {
            ctrl.update_selection(index, start, end)?;
        }
    }
    Ok(())
}

/// Render tracks to a mix file.
pub fn render(
    mut config: EngineConfig,
    tracks: &[TrackArg],
    format: ExportFormat,
    out_dir: Option<&Path>,
) -> Result<()> {
    if let Some(dir) = out_dir {
        config.render.scratch_dir = Some(dir.to_path_buf());
    }
    config.waveform.compute_on_add = false;

    let (mut ctrl, _handle) = SessionController::headless(config);
    load_tracks(&mut ctrl, tracks)?;
    if !ctrl.can_export() {
        warn!("Mix has fewer than two tracks or an empty selection");
    }

    info!("Rendering {} tracks as {}", tracks.len(), format);
    let mix = ctrl.export_mix_blocking(format)?;

    println!("Rendered: {}", mix.path.display());
    println!("Duration: {:.3}s ({} frames)", mix.duration_secs, mix.frames);
    println!(
        "Render time: {:.3}s ({:.1}x realtime)",
        mix.render_time_secs, mix.realtime_factor
    );
    println!("SHA-256: {}", mix.checksum);
    Ok(())
}

#[cfg(feature = "cpal-output")]
fn output_device(_config: &EngineConfig) -> Box<dyn OutputDevice> {
    Box::new(crate::engine::CpalOutput::new())
}

#[cfg(not(feature = "cpal-output"))]
fn output_device(config: &EngineConfig) -> Box<dyn OutputDevice> {
    warn!("Built without an audio device; preview runs silently at real-time pace");
    Box::new(crate::engine::ClockedOutput::new(config.output.block_frames))
}

/// Preview tracks and block until playback ends.
pub fn play(mut config: EngineConfig, tracks: &[TrackArg], mode: PlaybackMode) -> Result<()> {
    config.waveform.compute_on_add = false;
    let output = output_device(&config);

    let mut ctrl = SessionController::new(config, output);
    load_tracks(&mut ctrl, tracks)?;
    ctrl.set_mode(mode);
    ctrl.toggle_play(0)?;

    let mut shown = None;
    while ctrl.is_playing() {
        ctrl.wait_event(Duration::from_millis(100));
        let progress = ctrl.progress();
        let second = progress.elapsed.floor() as u64;
        if shown != Some(second) {
            shown = Some(second);
            println!(
                "{:?} {:>7.2}s / {:.2}s",
                ctrl.state(),
                progress.elapsed,
                progress.total
            );
        }
    }
    println!("Done");
    Ok(())
}

/// Print the master effects chain.
pub fn chain(config: &EngineConfig) -> Result<()> {
    let (output, _handle) = crate::engine::ManualOutput::new();
    let graph = MixerGraph::new(config, Box::new(output));
    println!("{}", serde_json::to_string_pretty(&graph.describe_chain())?);
    Ok(())
}

//! Session controller
//!
//! The single owner of the track list and the mixer graph. Every mutation
//! goes through `&mut SessionController` on one thread; background work
//! (duration probes, waveform decoding, offline renders, the progress ticker)
//! reports back over a channel that [`SessionController::pump`] drains.
//!
//! Two exclusive playback policies:
//! - `Simultaneous`: every track plays from its selection start at once
//! - `Sequential`: tracks play one after another from a chosen index, each
//!   transition driven by the graph's unit-finished event

pub mod assets;
pub mod ticker;

use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::engine::{
    probe_duration, ExportFormat, ManualOutput, ManualOutputHandle, MixerGraph, OutputDevice,
    PlaybackEvent, RenderedMix,
};
use crate::error::{MixError, Result};
use crate::segment::AudioSegment;
use crate::waveform::summarize_source;

pub use assets::BundledAssets;
pub use ticker::ProgressTicker;

/// Playback policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    /// All tracks together from engine time zero
    #[default]
    Simultaneous,
    /// Tracks one after another in list order
    Sequential,
}

impl std::str::FromStr for PlaybackMode {
    type Err = MixError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "simultaneous" | "multitrack" | "multi" => Ok(PlaybackMode::Simultaneous),
            "sequential" | "playlist" => Ok(PlaybackMode::Sequential),
            other => Err(MixError::Config {
                reason: format!("unknown playback mode '{}'", other),
            }),
        }
    }
}

/// Controller playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    /// `track` is the selected track (simultaneous) or the one sounding
    /// (sequential)
    Playing { track: usize },
}

/// Elapsed time snapshot
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Progress {
    /// Seconds since playback started
    pub elapsed: f64,
    /// Seconds into the current track
    pub track_elapsed: f64,
    /// Seconds until playback ends
    pub total: f64,
}

/// Messages handed back to the controlling thread
#[derive(Debug)]
pub enum SessionEvent {
    /// A background probe finished
    SourceLoaded { result: Result<AudioSegment> },
    /// Progress ticker sample
    Tick { generation: u64, elapsed: f64 },
    /// An offline render finished on its worker
    RenderFinished { result: Result<RenderedMix> },
}

/// Probe a source and build its segment
fn build_segment(path: &Path, bins: usize, with_waveform: bool) -> AudioSegment {
    let duration = probe_duration(path);
    let mut segment = AudioSegment::new(path, duration);
    if with_waveform {
        segment.set_waveform(Some(summarize_source(path, bins)));
    }
    segment
}

/// Owner of the track list, the graph and playback policy
pub struct SessionController {
    config: EngineConfig,
    graph: MixerGraph,
    assets: BundledAssets,
    tracks: Vec<AudioSegment>,
    selected: Option<usize>,
    mode: PlaybackMode,
    state: PlaybackState,
    export_format: ExportFormat,

    ticker: Option<ProgressTicker>,
    ticker_generation: u64,
    elapsed: f64,
    /// Playlist time at which the current ticker started
    tick_base: f64,
    total: f64,
    /// Seconds of the playlist already played before the current track
    playlist_offset: f64,
    playlist_start: Option<usize>,

    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    pending_loads: usize,
    /// Sources that arrived while a render held the graph
    deferred: Vec<AudioSegment>,
    exporting: bool,
    export_result: Option<Result<RenderedMix>>,
}

impl SessionController {
    pub fn new(config: EngineConfig, output: Box<dyn OutputDevice>) -> Self {
        let (events_tx, events_rx) = channel();
        let graph = MixerGraph::new(&config, output);
        Self {
            mode: config.session.default_mode,
            export_format: config.session.default_export,
            config,
            graph,
            assets: BundledAssets::default(),
            tracks: Vec::new(),
            selected: None,
            state: PlaybackState::Stopped,
            ticker: None,
            ticker_generation: 0,
            elapsed: 0.0,
            tick_base: 0.0,
            total: 0.0,
            playlist_offset: 0.0,
            playlist_start: None,
            events_tx,
            events_rx,
            pending_loads: 0,
            deferred: Vec::new(),
            exporting: false,
            export_result: None,
        }
    }

    /// Controller on a manually driven output
    pub fn headless(config: EngineConfig) -> (Self, ManualOutputHandle) {
        let (output, handle) = ManualOutput::new();
        (Self::new(config, Box::new(output)), handle)
    }

    pub fn with_assets(mut self, assets: BundledAssets) -> Self {
        self.assets = assets;
        self
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &MixerGraph {
        &self.graph
    }

    pub fn tracks(&self) -> &[AudioSegment] {
        &self.tracks
    }

    pub fn track(&self, index: usize) -> Option<&AudioSegment> {
        self.tracks.get(index)
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, PlaybackState::Playing { .. })
    }

    pub fn is_exporting(&self) -> bool {
        self.exporting
    }

    pub fn export_format(&self) -> ExportFormat {
        self.export_format
    }

    pub fn set_export_format(&mut self, format: ExportFormat) {
        self.export_format = format;
    }

    pub fn pending_loads(&self) -> usize {
        self.pending_loads
    }

    /// Generation of the current progress ticker
    pub fn ticker_generation(&self) -> u64 {
        self.ticker_generation
    }

    pub fn progress(&self) -> Progress {
        let track_elapsed = match self.mode {
            PlaybackMode::Simultaneous => self.elapsed,
            PlaybackMode::Sequential => (self.elapsed - self.playlist_offset).max(0.0),
        };
        Progress {
            elapsed: self.elapsed,
            track_elapsed,
            total: self.total,
        }
    }

    /// At least two tracks and every selection non-empty
    pub fn can_export(&self) -> bool {
        self.tracks.len() >= 2 && self.tracks.iter().all(|t| t.selected_length() > 0.0)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.tracks.len() {
            return Err(MixError::InvalidTrackIndex {
                index,
                len: self.tracks.len(),
            });
        }
        Ok(())
    }

    fn check_not_exporting(&self) -> Result<()> {
        if self.exporting {
            return Err(MixError::GraphBusy {
                state: self.graph.state(),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Track list
    // ------------------------------------------------------------------------

    /// Probe and append a source, select it and reload the graph
    ///
    /// Unreadable sources are still appended (with zero duration) so the
    /// list mirrors what the user picked. Returns the new index.
    pub fn add_source(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        self.check_not_exporting()?;
        if self.is_playing() {
            self.stop();
        }
        let segment = build_segment(
            path.as_ref(),
            self.config.waveform.bins,
            self.config.waveform.compute_on_add,
        );
        self.push_segment(segment)
    }

    /// Probe a source on a background thread
    ///
    /// The segment is appended by [`pump`](Self::pump) when it arrives.
    pub fn request_source(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        if self.is_playing() {
            self.stop();
        }
        let path = path.into();
        let tx = self.events_tx.clone();
        let bins = self.config.waveform.bins;
        let with_waveform = self.config.waveform.compute_on_add;

        thread::Builder::new()
            .name("mixdown-probe".to_string())
            .spawn(move || {
                let segment = build_segment(&path, bins, with_waveform);
                let _ = tx.send(SessionEvent::SourceLoaded {
                    result: Ok(segment),
                });
            })?;
        self.pending_loads += 1;
        Ok(())
    }

    /// Append a bundled demo track
    pub fn add_bundled_demo(&mut self, name: &str, ext: &str) -> Result<usize> {
        let path = self.assets.resolve(name, ext).ok_or_else(|| {
            let missing = self.assets.root().join(format!("{}.{}", name, ext));
            MixError::unreadable(&missing, "bundled asset not found")
        })?;
        self.add_source(path)
    }

    fn push_segment(&mut self, segment: AudioSegment) -> Result<usize> {
        info!(
            "Added {} ({:.2}s)",
            segment.source().display(),
            segment.total_duration()
        );
        self.tracks.push(segment);
        let index = self.tracks.len() - 1;
        self.selected = Some(index);
        self.graph.load_tracks(&self.tracks)?;
        Ok(index)
    }

    /// Remove a track, stopping playback first
    pub fn remove_source(&mut self, index: usize) -> Result<AudioSegment> {
        self.check_index(index)?;
        self.check_not_exporting()?;
        self.stop();
        let removed = self.tracks.remove(index);
        self.selected = match self.selected {
            _ if self.tracks.is_empty() => None,
            Some(s) if s > index => Some(s - 1),
            Some(s) if s == index => Some(index.min(self.tracks.len() - 1)),
            other => other,
        };
        self.graph.load_tracks(&self.tracks)?;
        Ok(removed)
    }

    /// Clamp and store a new selection, then reconfigure per policy
    pub fn update_selection(&mut self, index: usize, start: f64, end: f64) -> Result<()> {
        self.check_index(index)?;
        self.check_not_exporting()?;
        let previous_length = self.tracks[index].selected_length();
        self.tracks[index].set_selection(start, end);
        debug!(
            "Track {} selection {:.3}..{:.3}",
            index,
            self.tracks[index].selection_start(),
            self.tracks[index].selection_end()
        );

        match (self.mode, self.state) {
            (PlaybackMode::Sequential, PlaybackState::Playing { track }) => {
                // the graph holds only the sounding track
                if track == index {
                    self.restart_track(index, previous_length)?;
                }
                Ok(())
            }
            _ => {
                // units are rebuilt, so a running preview ends here
                if self.is_playing() {
                    self.stop();
                }
                self.graph.load_tracks(&self.tracks)
            }
        }
    }

    pub fn select(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        self.selected = Some(index);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------------

    /// Stop if anything is playing; otherwise start per policy
    pub fn toggle_play(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        self.check_not_exporting()?;
        self.selected = Some(index);

        if self.is_playing() {
            self.stop();
            return Ok(());
        }

        match self.mode {
            PlaybackMode::Simultaneous => self.play_simultaneous(index),
            PlaybackMode::Sequential => self.play_sequential(index),
        }
    }

    fn play_simultaneous(&mut self, index: usize) -> Result<()> {
        self.cancel_ticker();
        self.elapsed = 0.0;
        self.tick_base = 0.0;
        self.playlist_offset = 0.0;
        self.graph.load_tracks(&self.tracks)?;
        self.total = self.graph.mix_length();
        if let Err(e) = self.graph.play_preview() {
            self.state = PlaybackState::Stopped;
            return Err(e);
        }
        self.state = PlaybackState::Playing { track: index };
        self.start_ticker()
    }

    fn play_sequential(&mut self, start: usize) -> Result<()> {
        self.cancel_ticker();
        self.graph.stop_preview();
        self.elapsed = 0.0;
        self.tick_base = 0.0;
        self.playlist_offset = 0.0;
        self.playlist_start = Some(start);
        self.total = self.tracks[start..]
            .iter()
            .map(AudioSegment::selected_length)
            .sum();
        self.start_track(start)?;
        if self.is_playing() {
            self.start_ticker()?;
        }
        Ok(())
    }

    /// Replay the sounding playlist track from its edited selection
    ///
    /// The playlist keeps its start and the time already played; only the
    /// total moves by the change in the track's length.
    fn restart_track(&mut self, track: usize, previous_length: f64) -> Result<()> {
        self.cancel_ticker();
        self.total += self.tracks[track].selected_length() - previous_length;
        self.elapsed = self.playlist_offset;
        self.tick_base = self.playlist_offset;
        self.start_track(track)?;
        if self.is_playing() {
            self.start_ticker()?;
        }
        Ok(())
    }

    /// Load and play the first playable track at or after `index`
    fn start_track(&mut self, mut index: usize) -> Result<()> {
        loop {
            let Some(segment) = self.tracks.get(index).cloned() else {
                info!("Playlist finished");
                self.stop();
                return Ok(());
            };
            if segment.selected_length() <= 0.0 {
                debug!("Skipping empty track {}", index);
                index += 1;
                continue;
            }
            self.graph.load_tracks(std::slice::from_ref(&segment))?;
            if self.graph.source(0).is_none() {
                warn!("Skipping unreadable track {}", index);
                self.total -= segment.selected_length();
                index += 1;
                continue;
            }
            if let Err(e) = self.graph.play_preview() {
                self.stop();
                return Err(e);
            }
            debug!("Playlist track {} at {:.3}s", index, self.playlist_offset);
            self.selected = Some(index);
            self.state = PlaybackState::Playing { track: index };
            return Ok(());
        }
    }

    /// Stop everything and cancel the ticker
    pub fn stop(&mut self) {
        self.cancel_ticker();
        self.graph.stop_preview();
        let was_sequential = self.playlist_start.take().is_some();
        self.state = PlaybackState::Stopped;
        if was_sequential {
            // the graph held a single track; restore the full list
            if let Err(e) = self.graph.load_tracks(&self.tracks) {
                warn!("Graph not restored after playlist: {}", e);
            }
        }
    }

    /// Switch policy, stopping playback first
    pub fn set_mode(&mut self, mode: PlaybackMode) {
        if mode == self.mode {
            return;
        }
        self.stop();
        self.mode = mode;
        info!("Playback mode {:?}", mode);
    }

    fn start_ticker(&mut self) -> Result<()> {
        self.cancel_ticker();
        self.ticker_generation += 1;
        let ticker = ProgressTicker::spawn(
            self.ticker_generation,
            Duration::from_millis(self.config.session.tick_interval_ms),
            (self.total - self.tick_base).max(0.0),
            self.events_tx.clone(),
        )?;
        self.ticker = Some(ticker);
        Ok(())
    }

    fn cancel_ticker(&mut self) {
        if let Some(mut ticker) = self.ticker.take() {
            ticker.cancel();
        }
    }

    // ------------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------------

    /// Start an offline render on a worker thread
    ///
    /// The result arrives as `SessionEvent::RenderFinished`; collect it with
    /// [`take_export_result`](Self::take_export_result) after pumping.
    pub fn export_mix(&mut self, format: ExportFormat) -> Result<()> {
        self.check_not_exporting()?;
        self.stop();
        self.export_format = format;

        let render = self.graph.begin_offline_render()?;
        let tx = self.events_tx.clone();
        let spawned = thread::Builder::new()
            .name("mixdown-render".to_string())
            .spawn(move || {
                let result = render.run(format);
                let _ = tx.send(SessionEvent::RenderFinished { result });
            });
        if let Err(e) = spawned {
            if let Err(restore) = self.graph.end_offline_render() {
                warn!("Live output not restored: {}", restore);
            }
            return Err(e.into());
        }
        self.exporting = true;
        self.export_result = None;
        Ok(())
    }

    /// Render inline on the calling thread
    pub fn export_mix_blocking(&mut self, format: ExportFormat) -> Result<RenderedMix> {
        self.check_not_exporting()?;
        self.stop();
        self.export_format = format;
        self.graph.render_to_file(format)
    }

    pub fn take_export_result(&mut self) -> Option<Result<RenderedMix>> {
        self.export_result.take()
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Apply everything that arrived from background threads and the graph
    ///
    /// Returns the number of events applied.
    pub fn pump(&mut self) -> usize {
        let events: Vec<SessionEvent> = self.events_rx.try_iter().collect();
        let mut applied = events.len();
        for event in events {
            self.handle_event(event);
        }
        for event in self.graph.poll_events() {
            self.handle_playback_event(event);
            applied += 1;
        }
        applied
    }

    /// Block up to `timeout` for one background event, then pump the rest
    pub fn wait_event(&mut self, timeout: Duration) -> usize {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.handle_event(event);
                1 + self.pump()
            }
            Err(_) => self.pump(),
        }
    }

    /// Apply one controller event
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Tick {
                generation,
                elapsed,
            } => {
                if generation != self.ticker_generation || !self.is_playing() {
                    return;
                }
                self.elapsed = self.tick_base + elapsed;
                if self.elapsed >= self.total {
                    debug!("Progress reached {:.3}s, stopping", self.total);
                    self.stop();
                    self.elapsed = self.total;
                }
            }
            SessionEvent::SourceLoaded { result } => {
                self.pending_loads = self.pending_loads.saturating_sub(1);
                match result {
                    Ok(segment) if self.exporting => self.deferred.push(segment),
                    Ok(segment) => {
                        // reloading tears down the sounding units
                        if self.is_playing() {
                            self.stop();
                        }
                        if let Err(e) = self.push_segment(segment) {
                            warn!("Source added but graph not reloaded: {}", e);
                        }
                    }
                    Err(e) => warn!("{}", e),
                }
            }
            SessionEvent::RenderFinished { result } => {
                if let Err(e) = self.graph.end_offline_render() {
                    warn!("Live output not restored: {}", e);
                }
                self.exporting = false;
                match &result {
                    Ok(mix) => info!("Export finished: {}", mix.path.display()),
                    Err(e) => warn!("Export failed: {}", e),
                }
                self.export_result = Some(result);
                for segment in std::mem::take(&mut self.deferred) {
                    if let Err(e) = self.push_segment(segment) {
                        warn!("Source added but graph not reloaded: {}", e);
                    }
                }
            }
        }
    }

    fn handle_playback_event(&mut self, event: PlaybackEvent) {
        let PlaybackEvent::UnitFinished { unit, .. } = event;
        let (PlaybackMode::Sequential, PlaybackState::Playing { track }) = (self.mode, self.state)
        else {
            return;
        };
        if unit != 0 {
            return;
        }
        self.playlist_offset += self.tracks[track].selected_length();
        debug!("Track {} finished at {:.3}s", track, self.playlist_offset);
        if let Err(e) = self.start_track(track + 1) {
            warn!("Playlist stopped: {}", e);
            self.stop();
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.cancel_ticker();
    }
}

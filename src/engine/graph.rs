//! Mixer graph
//!
//! Owns one playback unit per loaded segment, the master effects chain and
//! the live output. Units are rebuilt wholesale on every load and index
//! aligned with the segment list: a segment whose source cannot be decoded
//! keeps its slot with an unbound unit, so indices never shift.
//!
//! The live render core sits behind a mutex shared with the output device
//! thread. Offline renders build their own core, so a render never disturbs
//! (or is disturbed by) the live path and identical inputs always produce
//! identical files.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;
use log::{debug, info, warn};

use crate::config::{EngineConfig, RenderConfig};
use crate::dsp::{EffectChain, EffectsConfig};
use crate::engine::buffer::{AudioBuffer, GRAPH_CHANNELS, GRAPH_SAMPLE_RATE};
use crate::engine::decode::DecodedSource;
use crate::engine::io::{
    file_checksum, output_path, EncoderSettings, ExportFormat, MixWriter, RenderedMix,
};
use crate::engine::output::OutputDevice;
use crate::engine::transport::{GraphState, GraphTransport};
use crate::engine::unit::{secs_to_frames, PlaybackUnit, ScheduledSegment, UnitInfo};
use crate::error::{MixError, Result};
use crate::segment::AudioSegment;

/// Render core shared between the graph and the live output thread
pub type SharedCore = Arc<Mutex<RenderCore>>;

/// Lock the core, recovering from a poisoned lock
pub fn lock_core(core: &SharedCore) -> MutexGuard<'_, RenderCore> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Events raised by the render core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A unit played its scheduled segment to the end
    UnitFinished { unit: usize, generation: u64 },
}

// ============================================================================
// Render core
// ============================================================================

/// Units plus the master chain; produces blocks on demand
pub struct RenderCore {
    units: Vec<PlaybackUnit>,
    chain: EffectChain,
    mix: AudioBuffer,
    /// Frames produced since the core was built
    timeline: u64,
    generation: u64,
    events: Option<Sender<PlaybackEvent>>,
}

impl RenderCore {
    pub fn new(units: Vec<PlaybackUnit>, mut chain: EffectChain) -> Self {
        chain.prepare(GRAPH_SAMPLE_RATE);
        Self {
            units,
            chain,
            mix: AudioBuffer::stereo(0),
            timeline: 0,
            generation: 0,
            events: None,
        }
    }

    fn with_events(mut self, events: Sender<PlaybackEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Swap in a new unit set
    fn replace_units(&mut self, units: Vec<PlaybackUnit>, generation: u64) {
        self.units = units;
        self.generation = generation;
        self.chain.reset();
    }

    pub fn units(&self) -> &[PlaybackUnit] {
        &self.units
    }

    fn units_mut(&mut self) -> &mut [PlaybackUnit] {
        &mut self.units
    }

    pub fn timeline(&self) -> u64 {
        self.timeline
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True when any unit is scheduled or playing
    pub fn is_active(&self) -> bool {
        self.units.iter().any(PlaybackUnit::is_active)
    }

    pub fn stop_all(&mut self) {
        self.units.iter_mut().for_each(PlaybackUnit::stop);
    }

    /// Mix every unit into one block and run it through the chain
    pub fn render(&mut self, frames: usize) -> &AudioBuffer {
        self.mix.reset_to(frames);
        for unit in &mut self.units {
            if unit.mix_into(&mut self.mix, self.timeline) {
                if let Some(events) = &self.events {
                    let _ = events.send(PlaybackEvent::UnitFinished {
                        unit: unit.index(),
                        generation: self.generation,
                    });
                }
            }
        }
        self.chain.process(&mut self.mix);
        self.timeline += frames as u64;
        &self.mix
    }

    /// Render straight into an interleaved device buffer
    ///
    /// Mono devices get the average of both channels; extra channels are
    /// silent.
    pub fn fill_interleaved(&mut self, out: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }
        let frames = out.len() / channels;
        let block = self.render(frames);
        for (frame, chunk) in out.chunks_exact_mut(channels).enumerate() {
            let l = block.get(frame, 0).unwrap_or(0.0);
            let r = block.get(frame, 1).unwrap_or(0.0);
            if channels == 1 {
                chunk[0] = 0.5 * (l + r);
                continue;
            }
            chunk[0] = l;
            chunk[1] = r;
            chunk[2..].iter_mut().for_each(|s| *s = 0.0);
        }
    }
}

// ============================================================================
// Offline render
// ============================================================================

/// An offline render detached from the graph
///
/// Owns a fresh core with every bound unit scheduled at frame 0, so it can
/// run on any thread.
pub struct OfflineRender {
    core: RenderCore,
    mix_length: f64,
    total_frames: u64,
    block_frames: usize,
    scratch_dir: PathBuf,
    encoder: EncoderSettings,
}

impl OfflineRender {
    pub fn mix_length(&self) -> f64 {
        self.mix_length
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Render the whole mix to a fresh file in the scratch directory
    ///
    /// # Errors
    /// * `RenderFailure` - a block came back non-finite or runaway
    /// * `EncoderUnavailable`, `EncoderFailed`, `Io`, `Wav` - output errors
    ///
    /// No file remains on failure.
    pub fn run(mut self, format: ExportFormat) -> Result<RenderedMix> {
        fs::create_dir_all(&self.scratch_dir)?;
        let path = output_path(&self.scratch_dir, format);
        let started = Instant::now();
        info!(
            "Rendering {:.3}s mix to {} ({} frames)",
            self.mix_length,
            path.display(),
            self.total_frames
        );

        let mut writer = match MixWriter::create(&path, format, &self.encoder) {
            Ok(w) => w,
            Err(e) => {
                remove_partial(&path);
                return Err(e);
            }
        };

        let mut remaining = self.total_frames;
        let mut written: u64 = 0;
        while remaining > 0 {
            let frames = remaining.min(self.block_frames as u64) as usize;
            let block = self.core.render(frames);
            if !block.is_valid() {
                writer.abort();
                remove_partial(&path);
                return Err(MixError::RenderFailure {
                    reason: format!("engine produced invalid samples at frame {}", written),
                });
            }
            if let Err(e) = writer.write_block(block) {
                writer.abort();
                remove_partial(&path);
                return Err(e);
            }
            remaining -= frames as u64;
            written += frames as u64;
        }

        if let Err(e) = writer.finalize() {
            remove_partial(&path);
            return Err(e);
        }

        let checksum = match file_checksum(&path) {
            Ok(c) => c,
            Err(e) => {
                remove_partial(&path);
                return Err(e);
            }
        };

        let render_time_secs = started.elapsed().as_secs_f64();
        let duration_secs = written as f64 / GRAPH_SAMPLE_RATE as f64;
        let realtime_factor = if render_time_secs > 0.0 {
            duration_secs / render_time_secs
        } else {
            f64::INFINITY
        };
        info!(
            "Rendered {} ({:.2}s audio in {:.3}s, {:.1}x realtime)",
            path.display(),
            duration_secs,
            render_time_secs,
            realtime_factor
        );

        Ok(RenderedMix {
            path,
            format,
            frames: written,
            duration_secs,
            sample_rate: GRAPH_SAMPLE_RATE,
            channels: GRAPH_CHANNELS,
            checksum,
            render_time_secs,
            realtime_factor,
            rendered_at: Utc::now(),
        })
    }
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to remove partial render {}: {}", path.display(), e);
        }
    }
}

/// Restores the live path when an inline render ends, however it ends
struct RenderGuard<'a> {
    graph: &'a mut MixerGraph,
}

impl Drop for RenderGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.graph.end_offline_render() {
            warn!("Live output not restored after render: {}", e);
        }
    }
}

// ============================================================================
// Mixer graph
// ============================================================================

/// The mixer graph
pub struct MixerGraph {
    render_config: RenderConfig,
    effects: EffectsConfig,
    core: SharedCore,
    segments: Vec<AudioSegment>,
    /// One slot per segment; `None` when the source is unreadable
    sources: Vec<Option<Arc<DecodedSource>>>,
    cache: HashMap<PathBuf, Arc<DecodedSource>>,
    transport: GraphTransport,
    output: Box<dyn OutputDevice>,
    generation: u64,
    events: Receiver<PlaybackEvent>,
}

impl MixerGraph {
    pub fn new(config: &EngineConfig, output: Box<dyn OutputDevice>) -> Self {
        let (tx, rx) = channel();
        let core = RenderCore::new(Vec::new(), EffectChain::master(&config.effects)).with_events(tx);
        Self {
            render_config: config.render.clone(),
            effects: config.effects.clone(),
            core: Arc::new(Mutex::new(core)),
            segments: Vec::new(),
            sources: Vec::new(),
            cache: HashMap::new(),
            transport: GraphTransport::new(),
            output,
            generation: 0,
            events: rx,
        }
    }

    // ------------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------------

    /// Replace the whole graph with one unit per segment
    ///
    /// Unreadable sources are logged and leave their unit unbound; loading
    /// continues with the next segment.
    ///
    /// # Errors
    /// * `GraphBusy` - an offline render is in progress
    pub fn load_tracks(&mut self, segments: &[AudioSegment]) -> Result<()> {
        if self.transport.is_rendering() {
            return Err(MixError::GraphBusy {
                state: self.transport.state(),
            });
        }
        self.stop_preview();

        let sources: Vec<Option<Arc<DecodedSource>>> =
            segments.iter().map(|seg| self.resolve(seg.source())).collect();
        self.prune_cache(segments);

        self.generation += 1;
        let units: Vec<PlaybackUnit> = sources
            .iter()
            .enumerate()
            .map(|(i, src)| PlaybackUnit::new(i, src.clone()))
            .collect();
        lock_core(&self.core).replace_units(units, self.generation);

        self.segments = segments.to_vec();
        self.sources = sources;
        self.transport.on_load(self.segments.len())?;

        info!(
            "Loaded {} tracks ({} readable)",
            self.segments.len(),
            self.sources.iter().filter(|s| s.is_some()).count()
        );
        Ok(())
    }

    fn resolve(&mut self, path: &Path) -> Option<Arc<DecodedSource>> {
        if let Some(source) = self.cache.get(path) {
            return Some(Arc::clone(source));
        }
        match DecodedSource::open(path) {
            Ok(source) => {
                let source = Arc::new(source);
                self.cache.insert(path.to_path_buf(), Arc::clone(&source));
                Some(source)
            }
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    fn prune_cache(&mut self, segments: &[AudioSegment]) {
        self.cache
            .retain(|path, _| segments.iter().any(|s| s.source() == path.as_path()));
    }

    // ------------------------------------------------------------------------
    // Live preview
    // ------------------------------------------------------------------------

    /// Schedule every bound unit from its selection start and start output
    ///
    /// Anything already playing is stopped first.
    ///
    /// # Errors
    /// * `GraphBusy` - an offline render is in progress
    /// * `ConfigurationMismatch` - unit, source and segment counts differ
    /// * `OutputUnavailable` - the output device failed to start
    pub fn play_preview(&mut self) -> Result<()> {
        self.transport.check_preview()?;
        self.check_alignment()?;

        let mut scheduled = 0;
        {
            let mut core = lock_core(&self.core);
            core.stop_all();
            for (unit, (segment, source)) in core
                .units_mut()
                .iter_mut()
                .zip(self.segments.iter().zip(&self.sources))
            {
                let Some(source) = source else { continue };
                if segment.selected_length() <= 0.0 {
                    continue;
                }
                let rate = source.sample_rate();
                if unit.schedule(ScheduledSegment {
                    start_frame: secs_to_frames(segment.selection_start(), rate),
                    frame_count: secs_to_frames(segment.selected_length(), rate),
                    at: None,
                }) {
                    scheduled += 1;
                }
            }
        }
        debug!("Scheduled {} of {} units", scheduled, self.segments.len());

        if !self.output.is_running() {
            if let Err(e) = self.output.start(Arc::clone(&self.core)) {
                lock_core(&self.core).stop_all();
                return Err(e);
            }
        }
        self.transport.on_preview_start()
    }

    /// Stop every unit; idempotent and a no-op while rendering
    pub fn stop_preview(&mut self) {
        if self.transport.is_rendering() {
            return;
        }
        lock_core(&self.core).stop_all();
        self.transport.on_preview_stop();
    }

    fn check_alignment(&self) -> Result<()> {
        let units = lock_core(&self.core).units().len();
        if units != self.sources.len() || units != self.segments.len() {
            warn!(
                "Graph out of alignment: {} units, {} sources, {} segments",
                units,
                self.sources.len(),
                self.segments.len()
            );
            return Err(MixError::ConfigurationMismatch {
                units,
                sources: self.sources.len(),
                segments: self.segments.len(),
            });
        }
        Ok(())
    }

    /// Drain unit-finished events for the current unit set
    pub fn poll_events(&self) -> Vec<PlaybackEvent> {
        self.events
            .try_iter()
            .filter(|PlaybackEvent::UnitFinished { generation, .. }| {
                *generation == self.generation
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Offline render
    // ------------------------------------------------------------------------

    /// Longest selection among segments with a readable source
    pub fn mix_length(&self) -> f64 {
        self.segments
            .iter()
            .zip(&self.sources)
            .filter(|(_, src)| src.is_some())
            .map(|(seg, _)| seg.selected_length())
            .fold(0.0, f64::max)
    }

    /// Enter offline mode and detach a render
    ///
    /// Stops the preview and the live output; call
    /// [`end_offline_render`](Self::end_offline_render) when the render is
    /// done, whatever its outcome.
    ///
    /// # Errors
    /// * `GraphBusy` - a render is already in progress
    /// * `EmptyMix` - the longest readable selection is zero or under the minimum
    pub fn begin_offline_render(&mut self) -> Result<OfflineRender> {
        if self.transport.is_rendering() {
            return Err(MixError::GraphBusy {
                state: self.transport.state(),
            });
        }
        let mix_length = self.mix_length();
        let total_frames = secs_to_frames(mix_length, GRAPH_SAMPLE_RATE);
        // a zero-frame render is empty whatever the configured minimum
        if mix_length <= 0.0
            || total_frames == 0
            || mix_length < self.render_config.min_mix_length_secs
        {
            return Err(MixError::EmptyMix { mix_length });
        }

        self.stop_preview();
        let was_running = self.output.is_running();
        self.output.stop();
        self.transport.on_render_begin(was_running)?;

        let mut units: Vec<PlaybackUnit> = self
            .sources
            .iter()
            .enumerate()
            .map(|(i, src)| PlaybackUnit::new(i, src.clone()))
            .collect();
        for (unit, (segment, source)) in units
            .iter_mut()
            .zip(self.segments.iter().zip(&self.sources))
        {
            let Some(source) = source else { continue };
            let rate = source.sample_rate();
            unit.schedule(ScheduledSegment {
                start_frame: secs_to_frames(segment.selection_start(), rate),
                frame_count: secs_to_frames(segment.selected_length(), rate),
                at: Some(0),
            });
        }

        Ok(OfflineRender {
            core: RenderCore::new(units, EffectChain::master(&self.effects)),
            mix_length,
            total_frames,
            block_frames: self.render_config.block_frames.max(1),
            scratch_dir: self.render_config.scratch_dir(),
            encoder: self.render_config.encoder(),
        })
    }

    /// Leave offline mode, restarting the live output if it was running
    pub fn end_offline_render(&mut self) -> Result<()> {
        if self.transport.on_render_end(self.segments.len()) {
            self.output.start(Arc::clone(&self.core))?;
        }
        Ok(())
    }

    /// Render the mix to a file in the scratch directory
    ///
    /// # Errors
    /// * `EmptyMix` - returned before any file is created
    /// * `GraphBusy` - a render is already in progress
    /// * `RenderFailure` and output errors - the partial file is removed
    pub fn render_to_file(&mut self, format: ExportFormat) -> Result<RenderedMix> {
        let render = self.begin_offline_render()?;
        let _guard = RenderGuard { graph: self };
        render.run(format)
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    pub fn state(&self) -> GraphState {
        self.transport.state()
    }

    pub fn segments(&self) -> &[AudioSegment] {
        &self.segments
    }

    pub fn unit_count(&self) -> usize {
        lock_core(&self.core).units().len()
    }

    pub fn unit(&self, index: usize) -> Option<UnitInfo> {
        lock_core(&self.core).units().get(index).map(PlaybackUnit::info)
    }

    pub fn units(&self) -> Vec<UnitInfo> {
        lock_core(&self.core).units().iter().map(PlaybackUnit::info).collect()
    }

    /// Decoded source for a segment slot
    pub fn source(&self, index: usize) -> Option<&Arc<DecodedSource>> {
        self.sources.get(index).and_then(Option::as_ref)
    }

    pub fn cached_sources(&self) -> usize {
        self.cache.len()
    }

    /// Current unit set generation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_output_running(&self) -> bool {
        self.output.is_running()
    }

    /// Shared handle to the live core
    pub fn core(&self) -> SharedCore {
        Arc::clone(&self.core)
    }

    /// Effects chain description
    pub fn describe_chain(&self) -> serde_json::Value {
        EffectChain::master(&self.effects).to_json()
    }
}

impl Drop for MixerGraph {
    fn drop(&mut self) {
        self.output.stop();
    }
}

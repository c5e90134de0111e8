//! Mixdown - Multi-track Mixing and Offline Rendering
//!
//! Mixdown manages a set of trimmed audio sources, previews them through a
//! fixed master chain, and renders the mix to a file faster than real time.
//!
//! # Architecture
//!
//! - Segment model: one source plus its trim window
//! - Waveform summarizer: RMS bins for display
//! - Mixer graph: playback units, master chain, live and offline rendering
//! - Session controller: playback policy, progress and export orchestration

pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod segment;
pub mod session;
pub mod waveform;

pub use config::EngineConfig;
pub use engine::{ExportFormat, GraphState, MixerGraph, RenderedMix};
pub use error::{MixError, Result};
pub use segment::AudioSegment;
pub use session::{PlaybackMode, PlaybackState, SessionController, SessionEvent};
pub use waveform::WaveformSummary;

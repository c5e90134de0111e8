//! Audio Engine Module
//!
//! Core mixing engine including:
//! - Source decoding
//! - Playback units and the mixer graph
//! - Graph transport state machine
//! - Live output devices
//! - Mix file output

pub mod buffer;
pub mod decode;
pub mod graph;
pub mod io;
pub mod output;
pub mod transport;
pub mod unit;

pub use buffer::{
    calculate_peak, calculate_rms, db_to_linear, linear_to_db, AudioBuffer, GRAPH_CHANNELS,
    GRAPH_SAMPLE_RATE, RENDER_BLOCK_FRAMES,
};
pub use decode::{probe_duration, DecodedSource};
pub use graph::{lock_core, MixerGraph, OfflineRender, PlaybackEvent, RenderCore, SharedCore};
pub use io::{
    file_checksum, output_path, EncoderSettings, ExportFormat, MixWriter, RenderedMix,
    DEFAULT_AAC_BITRATE_KBPS,
};
#[cfg(feature = "cpal-output")]
pub use output::CpalOutput;
pub use output::{BlockSink, ClockedOutput, ManualOutput, ManualOutputHandle, OutputDevice};
pub use transport::{GraphState, GraphTransport};
pub use unit::{secs_to_frames, PlaybackUnit, ScheduledSegment, UnitInfo, UnitState};

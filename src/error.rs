//! Error handling for Mixdown
//!
//! Segment-level failures are recovered where they happen; graph and render
//! failures propagate to the caller as a `MixError`.

use thiserror::Error;

use crate::engine::GraphState;

/// Result type alias for Mixdown operations
pub type Result<T> = std::result::Result<T, MixError>;

/// Main error type for Mixdown operations
#[derive(Error, Debug)]
pub enum MixError {
    // Source Errors
    #[error("Source unreadable: {path} ({reason})")]
    SourceUnreadable { path: String, reason: String },

    // Graph Errors
    #[error("Configuration mismatch: {units} units, {sources} source slots, {segments} segments")]
    ConfigurationMismatch {
        units: usize,
        sources: usize,
        segments: usize,
    },

    #[error("Mix is empty: longest selection is {mix_length:.3}s")]
    EmptyMix { mix_length: f64 },

    #[error("Render failed: {reason}")]
    RenderFailure { reason: String },

    #[error("Mixer graph is busy ({state})")]
    GraphBusy { state: GraphState },

    #[error("Track index {index} out of range (0..{len})")]
    InvalidTrackIndex { index: usize, len: usize },

    // Output Errors
    #[error("Output device unavailable: {reason}")]
    OutputUnavailable { reason: String },

    #[error("Encoder '{encoder}' unavailable: {reason}")]
    EncoderUnavailable { encoder: String, reason: String },

    #[error("Encoder failed: {reason}")]
    EncoderFailed { reason: String },

    // Configuration Errors
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MixError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            MixError::SourceUnreadable { .. } => "SOURCE_UNREADABLE",
            MixError::ConfigurationMismatch { .. } => "CONFIGURATION_MISMATCH",
            MixError::EmptyMix { .. } => "EMPTY_MIX",
            MixError::RenderFailure { .. } => "RENDER_FAILURE",
            MixError::GraphBusy { .. } => "GRAPH_BUSY",
            MixError::InvalidTrackIndex { .. } => "INVALID_TRACK_INDEX",
            MixError::OutputUnavailable { .. } => "OUTPUT_UNAVAILABLE",
            MixError::EncoderUnavailable { .. } => "ENCODER_UNAVAILABLE",
            MixError::EncoderFailed { .. } => "ENCODER_FAILED",
            MixError::Config { .. } => "CONFIG_ERROR",
            MixError::Io(_) => "IO_ERROR",
            MixError::Wav(_) => "WAV_ERROR",
            MixError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors leave the engine usable; the caller can adjust
    /// input and retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MixError::SourceUnreadable { .. }
                | MixError::ConfigurationMismatch { .. }
                | MixError::EmptyMix { .. }
                | MixError::GraphBusy { .. }
                | MixError::InvalidTrackIndex { .. }
                | MixError::OutputUnavailable { .. }
        )
    }

    pub(crate) fn unreadable(path: &std::path::Path, reason: impl ToString) -> Self {
        MixError::SourceUnreadable {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

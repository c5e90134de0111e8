//! Segment model
//!
//! An `AudioSegment` is one source file plus its trim window. It is a plain
//! value: every mutation clamps into `[0, total_duration]` and reorders, so a
//! segment never holds an inverted or out-of-range selection.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::waveform::WaveformSummary;

/// One entry in the mix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSegment {
    source: PathBuf,
    total_duration: f64,
    selection_start: f64,
    selection_end: f64,
    #[serde(default)]
    waveform: Option<WaveformSummary>,
}

/// Clamp to `[0, max]`, mapping non-finite input to 0
fn clamp_secs(value: f64, max: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, max)
    } else {
        0.0
    }
}

impl AudioSegment {
    /// Create a segment selecting the full source
    ///
    /// Negative or non-finite durations are treated as 0.
    pub fn new(source: impl Into<PathBuf>, total_duration: f64) -> Self {
        let total_duration = if total_duration.is_finite() {
            total_duration.max(0.0)
        } else {
            0.0
        };
        Self {
            source: source.into(),
            total_duration,
            selection_start: 0.0,
            selection_end: total_duration,
            waveform: None,
        }
    }

    /// Set the selection, clamping both ends and reordering them
    ///
    /// # Example
    /// ```
    /// use mixdown::AudioSegment;
    /// let mut seg = AudioSegment::new("a.wav", 30.0);
    /// seg.set_selection(-5.0, 1000.0);
    /// assert_eq!(seg.selection_start(), 0.0);
    /// assert_eq!(seg.selection_end(), 30.0);
    /// ```
    pub fn set_selection(&mut self, start: f64, end: f64) -> &Self {
        let s = clamp_secs(start, self.total_duration);
        let e = clamp_secs(end, self.total_duration);
        self.selection_start = s.min(e);
        self.selection_end = s.max(e);
        self
    }

    /// Consuming form of [`set_selection`](Self::set_selection)
    pub fn with_selection(mut self, start: f64, end: f64) -> Self {
        self.set_selection(start, end);
        self
    }

    /// Attach a waveform summary
    pub fn with_waveform(mut self, waveform: WaveformSummary) -> Self {
        self.waveform = Some(waveform);
        self
    }

    pub fn set_waveform(&mut self, waveform: Option<WaveformSummary>) {
        self.waveform = waveform;
    }

    /// Length of the selection in seconds, never negative
    pub fn selected_length(&self) -> f64 {
        (self.selection_end - self.selection_start).max(0.0)
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    pub fn selection_start(&self) -> f64 {
        self.selection_start
    }

    pub fn selection_end(&self) -> f64 {
        self.selection_end
    }

    pub fn waveform(&self) -> Option<&WaveformSummary> {
        self.waveform.as_ref()
    }
}

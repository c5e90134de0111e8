//! Waveform summarizer
//!
//! Reduces a source to a small ordered sequence of amplitude bins for display.
//! Bins hold RMS rather than peak values, normalized to the loudest bin and
//! square-root compressed so quiet passages stay visible.

use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::engine::DecodedSource;

/// Default number of bins per summary
pub const DEFAULT_BINS: usize = 800;

/// Normalized amplitude envelope, every value in `[0, 1]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaveformSummary {
    bins: Vec<f32>,
}

impl WaveformSummary {
    pub fn from_bins(bins: Vec<f32>) -> Self {
        Self { bins }
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.bins
    }

    /// Iterate the bins; can be restarted any number of times
    pub fn iter(&self) -> std::slice::Iter<'_, f32> {
        self.bins.iter()
    }
}

impl<'a> IntoIterator for &'a WaveformSummary {
    type Item = &'a f32;
    type IntoIter = std::slice::Iter<'a, f32>;

    fn into_iter(self) -> Self::IntoIter {
        self.bins.iter()
    }
}

/// Summarize a mono sample stream into roughly `bins` RMS bins
///
/// `bin_size = max(1, frames / bins)`; the final bin may be partial.
pub fn summarize_mono(samples: &[f32], bins: usize) -> WaveformSummary {
    if samples.is_empty() || bins == 0 {
        return WaveformSummary::default();
    }

    let bin_size = (samples.len() / bins).max(1);
    let rms: Vec<f32> = samples
        .chunks(bin_size)
        .map(|chunk| {
            let sum_sq: f32 = chunk.iter().map(|s| s * s).sum();
            (sum_sq / chunk.len() as f32).sqrt()
        })
        .collect();

    let max = rms.iter().copied().fold(0.0f32, f32::max);
    if max > 0.0 {
        WaveformSummary::from_bins(rms.into_iter().map(|v| (v / max).sqrt()).collect())
    } else {
        WaveformSummary::from_bins(rms)
    }
}

/// Summarize an interleaved stream using its first channel
pub fn summarize(samples: &[f32], channels: usize, bins: usize) -> WaveformSummary {
    if channels <= 1 {
        return summarize_mono(samples, bins);
    }
    let first: Vec<f32> = samples.iter().step_by(channels).copied().collect();
    summarize_mono(&first, bins)
}

/// Summarize an already decoded source
pub fn summarize_decoded(source: &DecodedSource, bins: usize) -> WaveformSummary {
    let first: Vec<f32> = source.first_channel().collect();
    summarize_mono(&first, bins)
}

/// Decode a file and summarize it
///
/// Decode failures are logged and produce an empty summary.
pub fn summarize_source(path: &Path, bins: usize) -> WaveformSummary {
    match DecodedSource::open(path) {
        Ok(source) => summarize_decoded(&source, bins),
        Err(e) => {
            warn!("Waveform summary skipped: {}", e);
            WaveformSummary::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_silence_is_all_zero() {
        let summary = summarize_mono(&vec![0.0; 16000], 800);
        assert_eq!(summary.len(), 800);
        assert!(summary.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_constant_signal_normalizes_to_one() {
        let summary = summarize_mono(&vec![0.25; 8000], 800);
        assert_eq!(summary.len(), 800);
        for &v in &summary {
            assert_relative_eq!(v, 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_quiet_half_is_sqrt_compressed() {
        let mut samples = vec![0.8f32; 100];
        samples.extend(vec![0.2f32; 100]);
        let summary = summarize_mono(&samples, 2);
        assert_eq!(summary.len(), 2);
        assert_relative_eq!(summary.as_slice()[0], 1.0, epsilon = 1e-6);
        // rms ratio 0.25, compressed to 0.5
        assert_relative_eq!(summary.as_slice()[1], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_short_source_uses_unit_bins() {
        let summary = summarize_mono(&[0.1, -0.2, 0.4], 800);
        assert_eq!(summary.len(), 3);
        assert_relative_eq!(summary.as_slice()[2], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_values_stay_in_unit_range() {
        let samples: Vec<f32> = (0..44100)
            .map(|i| ((i as f32) * 0.01).sin() * (i as f32 / 44100.0))
            .collect();
        let summary = summarize_mono(&samples, 800);
        assert!(summary.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_interleaved_uses_first_channel() {
        // left loud, right silent
        let samples: Vec<f32> = (0..200).map(|i| if i % 2 == 0 { 0.5 } else { 0.0 }).collect();
        let summary = summarize(&samples, 2, 10);
        assert!(summary.iter().all(|&v| v > 0.99));
    }

    #[test]
    fn test_empty_input() {
        assert!(summarize_mono(&[], 800).is_empty());
        assert!(summarize_source(Path::new("/nonexistent.wav"), 800).is_empty());
    }

    #[test]
    fn test_iteration_is_restartable() {
        let summary = summarize_mono(&[0.1, 0.2, 0.3, 0.4], 2);
        let first: Vec<f32> = summary.iter().copied().collect();
        let second: Vec<f32> = summary.iter().copied().collect();
        assert_eq!(first, second);
    }
}

//! Audio Buffer Management
//!
//! Planar `f32` blocks passed between playback units, the effects chain and
//! the sinks. Everything inside the graph runs at 44.1 kHz stereo.

// ============================================================================
// Constants
// ============================================================================

/// Graph sample rate for preview and offline rendering
pub const GRAPH_SAMPLE_RATE: u32 = 44100;

/// Graph channel count
pub const GRAPH_CHANNELS: usize = 2;

/// Largest block pulled during offline rendering
pub const RENDER_BLOCK_FRAMES: usize = 4096;

/// Any sample beyond this magnitude means the chain has run away
pub const RUNAWAY_THRESHOLD: f32 = 1.0e4;

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// Returns `-inf` for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// RMS level of a buffer in dB, `-inf` for empty or silent buffers
pub fn calculate_rms(buffer: &AudioBuffer) -> f32 {
    let total = buffer.num_channels() * buffer.num_samples();
    if total == 0 {
        return f32::NEG_INFINITY;
    }
    let sum_squares: f64 = buffer
        .samples
        .iter()
        .flat_map(|channel| channel.iter())
        .map(|&s| (s as f64) * (s as f64))
        .sum();
    linear_to_db((sum_squares / total as f64).sqrt() as f32)
}

/// Peak level of a buffer in dB
pub fn calculate_peak(buffer: &AudioBuffer) -> f32 {
    linear_to_db(buffer.peak())
}

// ============================================================================
// AudioBuffer
// ============================================================================

/// Planar audio block
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Silent buffer with `num_samples` frames per channel
    pub fn new(num_channels: usize, num_samples: usize) -> Self {
        Self {
            samples: vec![vec![0.0; num_samples]; num_channels],
        }
    }

    /// Silent graph-format (stereo) buffer
    pub fn stereo(num_samples: usize) -> Self {
        Self::new(GRAPH_CHANNELS, num_samples)
    }

    /// Deinterleave samples into a planar buffer
    ///
    /// Trailing samples that do not fill a whole frame are dropped.
    pub fn from_interleaved(interleaved: &[f32], num_channels: usize) -> Self {
        if num_channels == 0 {
            return Self { samples: Vec::new() };
        }
        let frames = interleaved.len() / num_channels;
        let mut buffer = Self::new(num_channels, frames);
        for (frame, chunk) in interleaved.chunks_exact(num_channels).enumerate() {
            for (ch, &s) in chunk.iter().enumerate() {
                buffer.samples[ch][frame] = s;
            }
        }
        buffer
    }

    /// Interleave into a fresh vector
    pub fn to_interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.num_channels() * self.num_samples());
        self.write_interleaved(&mut out);
        out
    }

    /// Append the interleaved samples to `out`
    pub fn write_interleaved(&self, out: &mut Vec<f32>) {
        for frame in 0..self.num_samples() {
            for channel in &self.samples {
                out.push(channel[frame]);
            }
        }
    }

    pub fn num_channels(&self) -> usize {
        self.samples.len()
    }

    /// Frames per channel
    pub fn num_samples(&self) -> usize {
        self.samples.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.num_samples() == 0
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.samples[index]
    }

    /// Both channels of a stereo buffer mutably at once
    pub fn stereo_mut(&mut self) -> Option<(&mut [f32], &mut [f32])> {
        match self.samples.as_mut_slice() {
            [left, right, ..] => Some((left.as_mut_slice(), right.as_mut_slice())),
            _ => None,
        }
    }

    pub fn get(&self, frame: usize, channel: usize) -> Option<f32> {
        self.samples.get(channel).and_then(|c| c.get(frame)).copied()
    }

    pub fn set(&mut self, frame: usize, channel: usize, value: f32) {
        if let Some(s) = self.samples.get_mut(channel).and_then(|c| c.get_mut(frame)) {
            *s = value;
        }
    }

    /// Resize every channel to `num_samples` frames and zero it
    ///
    /// Does not reallocate when shrinking or staying within capacity.
    pub fn reset_to(&mut self, num_samples: usize) {
        for channel in &mut self.samples {
            channel.clear();
            channel.resize(num_samples, 0.0);
        }
    }

    /// Zero every sample
    pub fn clear(&mut self) {
        for channel in &mut self.samples {
            channel.iter_mut().for_each(|s| *s = 0.0);
        }
    }

    /// Multiply every sample by a linear gain
    pub fn apply_gain_linear(&mut self, gain: f32) {
        for channel in &mut self.samples {
            channel.iter_mut().for_each(|s| *s *= gain);
        }
    }

    /// Largest absolute sample value
    pub fn peak(&self) -> f32 {
        self.samples
            .iter()
            .flat_map(|channel| channel.iter())
            .map(|s| s.abs())
            .fold(0.0_f32, f32::max)
    }

    /// True when every sample is finite
    pub fn is_finite(&self) -> bool {
        self.samples
            .iter()
            .all(|channel| channel.iter().all(|s| s.is_finite()))
    }

    /// True when the block is finite and below the runaway threshold
    pub fn is_valid(&self) -> bool {
        self.samples
            .iter()
            .all(|channel| channel.iter().all(|s| s.is_finite() && s.abs() < RUNAWAY_THRESHOLD))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_db_conversion() {
        assert_relative_eq!(db_to_linear(0.0), 1.0);
        assert_relative_eq!(db_to_linear(-6.0), 0.501187, epsilon = 1e-5);
        assert_relative_eq!(linear_to_db(1.0), 0.0);
        assert_eq!(linear_to_db(0.0), f32::NEG_INFINITY);
    }

    #[test]
    fn test_interleave_round_trip() {
        let interleaved = vec![0.1, -0.1, 0.2, -0.2, 0.3, -0.3];
        let buffer = AudioBuffer::from_interleaved(&interleaved, 2);
        assert_eq!(buffer.num_samples(), 3);
        assert_eq!(buffer.channel(0), &[0.1, 0.2, 0.3]);
        assert_eq!(buffer.channel(1), &[-0.1, -0.2, -0.3]);
        assert_eq!(buffer.to_interleaved(), interleaved);
    }

    #[test]
    fn test_reset_to_zeroes_and_resizes() {
        let mut buffer = AudioBuffer::from_interleaved(&[1.0; 8], 2);
        buffer.reset_to(2);
        assert_eq!(buffer.num_samples(), 2);
        assert_eq!(buffer.peak(), 0.0);
    }

    #[test]
    fn test_validity() {
        let mut buffer = AudioBuffer::stereo(4);
        assert!(buffer.is_valid());
        buffer.set(1, 1, f32::NAN);
        assert!(!buffer.is_finite());
        assert!(!buffer.is_valid());

        let mut runaway = AudioBuffer::stereo(4);
        runaway.set(0, 0, 2.0e4);
        assert!(runaway.is_finite());
        assert!(!runaway.is_valid());
    }

    #[test]
    fn test_rms_of_full_scale_square() {
        let buffer = AudioBuffer::from_interleaved(&[1.0, -1.0, -1.0, 1.0], 2);
        assert_relative_eq!(calculate_rms(&buffer), 0.0, epsilon = 1e-6);
        assert_eq!(calculate_rms(&AudioBuffer::stereo(0)), f32::NEG_INFINITY);
    }
}

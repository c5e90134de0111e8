//! Shelving EQ
//!
//! Low- and high-shelf biquads from the Audio EQ Cookbook, one filter state
//! per channel. The master chain uses one of each.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::f64::consts::PI;

use crate::dsp::effect::{Effect, EffectParams};
use crate::engine::AudioBuffer;
use crate::impl_effect_common;

/// Shelf direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShelfType {
    /// Boost/cut below frequency
    LowShelf,
    /// Boost/cut above frequency
    HighShelf,
}

/// Shelf band settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShelfSettings {
    /// Corner frequency in Hz
    pub frequency: f32,
    /// Gain in dB
    pub gain_db: f32,
    /// Shelf slope expressed as Q
    pub q: f32,
}

impl ShelfSettings {
    pub fn new(frequency: f32, gain_db: f32, q: f32) -> Self {
        Self {
            frequency,
            gain_db,
            q,
        }
    }

    /// 120 Hz, +4 dB
    pub fn default_low() -> Self {
        Self::new(120.0, 4.0, std::f32::consts::FRAC_1_SQRT_2)
    }

    /// 8 kHz, +2 dB
    pub fn default_high() -> Self {
        Self::new(8000.0, 2.0, std::f32::consts::FRAC_1_SQRT_2)
    }
}

/// Biquad filter coefficients
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (a0 + a1*z^-1 + a2*z^-2)
/// Normalized: all coefficients divided by a0
#[derive(Debug, Clone, Copy, PartialEq)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoeffs {
    const UNITY: Self = Self {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// Reference: https://www.w3.org/2011/audio/audio-eq-cookbook.html
    fn shelf(shelf: ShelfType, sample_rate: f64, settings: &ShelfSettings) -> Self {
        if settings.gain_db.abs() < 0.01 {
            return Self::UNITY;
        }

        // Clamp frequency below Nyquist
        let freq = (settings.frequency as f64).clamp(20.0, sample_rate / 2.0 - 1.0);
        let q = (settings.q as f64).clamp(0.1, 10.0);

        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);
        let a = 10.0_f64.powf(settings.gain_db as f64 / 40.0);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let (b0, b1, b2, a0, a1, a2) = match shelf {
            ShelfType::LowShelf => (
                a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
            ),
            ShelfType::HighShelf => (
                a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
            ),
        };

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    fn is_unity(&self) -> bool {
        *self == Self::UNITY
    }

    /// Magnitude response at `freq` Hz
    fn magnitude_at(&self, freq: f64, sample_rate: f64) -> f64 {
        let w = 2.0 * PI * freq / sample_rate;
        let (c1, s1) = (w.cos(), -w.sin());
        let (c2, s2) = ((2.0 * w).cos(), -(2.0 * w).sin());
        let num_re = self.b0 + self.b1 * c1 + self.b2 * c2;
        let num_im = self.b1 * s1 + self.b2 * s2;
        let den_re = 1.0 + self.a1 * c1 + self.a2 * c2;
        let den_im = self.a1 * s1 + self.a2 * s2;
        ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im)).sqrt()
    }
}

/// Direct form I history for one channel
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input: f64, c: &BiquadCoeffs) -> f64 {
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

/// Single shelving filter
#[derive(Debug, Clone)]
pub struct ShelfEq {
    params: EffectParams,
    shelf: ShelfType,
    settings: ShelfSettings,
    sample_rate: u32,
    coeffs: BiquadCoeffs,
    states: [BiquadState; 2],
}

impl ShelfEq {
    pub fn new(shelf: ShelfType, settings: ShelfSettings) -> Self {
        let sample_rate = crate::engine::GRAPH_SAMPLE_RATE;
        Self {
            params: EffectParams::default(),
            shelf,
            settings,
            sample_rate,
            coeffs: BiquadCoeffs::shelf(shelf, sample_rate as f64, &settings),
            states: [BiquadState::default(); 2],
        }
    }

    pub fn low_shelf(settings: ShelfSettings) -> Self {
        Self::new(ShelfType::LowShelf, settings)
    }

    pub fn high_shelf(settings: ShelfSettings) -> Self {
        Self::new(ShelfType::HighShelf, settings)
    }

    pub fn shelf(&self) -> ShelfType {
        self.shelf
    }

    pub fn settings(&self) -> ShelfSettings {
        self.settings
    }

    /// Linear gain the filter applies at `freq` Hz
    pub fn response_at(&self, freq: f32) -> f32 {
        self.coeffs.magnitude_at(freq as f64, self.sample_rate as f64) as f32
    }
}

impl Effect for ShelfEq {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        if !self.params.enabled || self.coeffs.is_unity() {
            return;
        }
        let channels = buffer.num_channels().min(self.states.len());
        for ch in 0..channels {
            let state = &mut self.states[ch];
            for sample in buffer.channel_mut(ch).iter_mut() {
                *sample = state.process(*sample as f64, &self.coeffs) as f32;
            }
        }
    }

    fn prepare(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.coeffs = BiquadCoeffs::shelf(self.shelf, sample_rate as f64, &self.settings);
    }

    fn reset(&mut self) {
        self.states = [BiquadState::default(); 2];
    }

    fn get_params(&self) -> Value {
        json!({
            "shelf": self.shelf,
            "frequency": self.settings.frequency,
            "gain_db": self.settings.gain_db,
            "q": self.settings.q,
            "enabled": self.params.enabled,
        })
    }

    impl_effect_common!(ShelfEq, "shelf-eq", "Shelf EQ");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{db_to_linear, linear_to_db};
    use approx::assert_relative_eq;

    fn sine(freq: f32, frames: usize) -> AudioBuffer {
        let interleaved: Vec<f32> = (0..frames)
            .flat_map(|i| {
                let s = 0.25 * (2.0 * std::f32::consts::PI * freq * i as f32 / 44100.0).sin();
                [s, s]
            })
            .collect();
        AudioBuffer::from_interleaved(&interleaved, 2)
    }

    #[test]
    fn test_low_shelf_boosts_lows_only() {
        let eq = ShelfEq::low_shelf(ShelfSettings::default_low());
        assert_relative_eq!(linear_to_db(eq.response_at(20.0)), 4.0, epsilon = 0.2);
        assert_relative_eq!(linear_to_db(eq.response_at(5000.0)), 0.0, epsilon = 0.1);
    }

    #[test]
    fn test_high_shelf_boosts_highs_only() {
        let eq = ShelfEq::high_shelf(ShelfSettings::default_high());
        assert_relative_eq!(linear_to_db(eq.response_at(20000.0)), 2.0, epsilon = 0.3);
        assert_relative_eq!(linear_to_db(eq.response_at(100.0)), 0.0, epsilon = 0.1);
    }

    #[test]
    fn test_process_low_tone_gains_level() {
        let mut eq = ShelfEq::low_shelf(ShelfSettings::default_low());
        let mut buffer = sine(40.0, 44100);
        let before = buffer.channel(0)[22050..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        eq.process(&mut buffer);
        let after = buffer.channel(0)[22050..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(after / before > db_to_linear(3.0));
    }

    #[test]
    fn test_zero_gain_is_bypass() {
        let mut eq = ShelfEq::low_shelf(ShelfSettings::new(120.0, 0.0, 0.7));
        let mut buffer = sine(100.0, 512);
        let original = buffer.clone();
        eq.process(&mut buffer);
        assert_eq!(buffer, original);
    }

    #[test]
    fn test_reset_restores_determinism() {
        let mut eq = ShelfEq::high_shelf(ShelfSettings::default_high());
        let mut first = sine(9000.0, 1024);
        eq.process(&mut first);
        eq.reset();
        let mut second = sine(9000.0, 1024);
        eq.process(&mut second);
        assert_eq!(first, second);
    }
}

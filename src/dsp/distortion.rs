//! Distortion Effect
//!
//! Waveshaping distortion with a pre-gain stage and wet/dry mix.
//! The master chain uses the cubic preset at -12 dB pre-gain.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::dsp::effect::{Effect, EffectParams};
use crate::engine::{db_to_linear, AudioBuffer};
use crate::impl_effect_common;

// ============================================================================
// Constants
// ============================================================================

const MIN_PRE_GAIN_DB: f32 = -80.0;
const MAX_PRE_GAIN_DB: f32 = 20.0;

// ============================================================================
// Distortion Preset
// ============================================================================

/// Waveshaper presets
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistortionPreset {
    /// Cubic soft clipper, `1.5x - 0.5x³`
    #[default]
    MultiDistortedCubed,
    /// Quadratic soft clipper, `x(2 - |x|)`
    MultiDistortedSquared,
    /// `tanh`
    SoftSaturation,
    /// Clamp to [-1, 1]
    HardClip,
}

impl DistortionPreset {
    pub fn display_name(&self) -> &'static str {
        match self {
            DistortionPreset::MultiDistortedCubed => "Multi Distorted Cubed",
            DistortionPreset::MultiDistortedSquared => "Multi Distorted Squared",
            DistortionPreset::SoftSaturation => "Soft Saturation",
            DistortionPreset::HardClip => "Hard Clip",
        }
    }

    /// Parse a preset name
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace(['-', ' '], "_").as_str() {
            "multi_distorted_cubed" | "cubed" | "cubic" => Some(DistortionPreset::MultiDistortedCubed),
            "multi_distorted_squared" | "squared" => Some(DistortionPreset::MultiDistortedSquared),
            "soft_saturation" | "soft" | "tanh" => Some(DistortionPreset::SoftSaturation),
            "hard_clip" | "hardclip" => Some(DistortionPreset::HardClip),
            _ => None,
        }
    }

    #[inline]
    fn shape(self, x: f32) -> f32 {
        match self {
            DistortionPreset::MultiDistortedCubed => {
                let x = x.clamp(-1.0, 1.0);
                1.5 * x - 0.5 * x * x * x
            }
            DistortionPreset::MultiDistortedSquared => {
                let x = x.clamp(-1.0, 1.0);
                x * (2.0 - x.abs())
            }
            DistortionPreset::SoftSaturation => x.tanh(),
            DistortionPreset::HardClip => x.clamp(-1.0, 1.0),
        }
    }
}

/// Distortion stage settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistortionSettings {
    pub preset: DistortionPreset,
    /// Gain applied before the waveshaper
    pub pre_gain_db: f32,
    /// 0.0 = dry, 1.0 = wet
    pub wet_dry_mix: f32,
}

impl Default for DistortionSettings {
    fn default() -> Self {
        Self {
            preset: DistortionPreset::MultiDistortedCubed,
            pre_gain_db: -12.0,
            wet_dry_mix: 0.5,
        }
    }
}

// ============================================================================
// Distortion Effect
// ============================================================================

/// Waveshaping distortion
///
/// `out = dry * (1 - mix) + shape(dry * pre_gain) * mix`
#[derive(Debug, Clone)]
pub struct Distortion {
    params: EffectParams,
    preset: DistortionPreset,
    pre_gain_db: f32,
    pre_gain_linear: f32,
    mix: f32,
}

impl Distortion {
    pub fn new(settings: DistortionSettings) -> Self {
        let mut dist = Self {
            params: EffectParams::default(),
            preset: settings.preset,
            pre_gain_db: 0.0,
            pre_gain_linear: 1.0,
            mix: 1.0,
        };
        dist.set_pre_gain_db(settings.pre_gain_db);
        dist.set_mix(settings.wet_dry_mix);
        dist
    }

    pub fn set_pre_gain_db(&mut self, db: f32) {
        self.pre_gain_db = db.clamp(MIN_PRE_GAIN_DB, MAX_PRE_GAIN_DB);
        self.pre_gain_linear = db_to_linear(self.pre_gain_db);
    }

    pub fn set_mix(&mut self, mix: f32) {
        self.mix = if mix.is_finite() { mix.clamp(0.0, 1.0) } else { 1.0 };
    }

    pub fn preset(&self) -> DistortionPreset {
        self.preset
    }

    pub fn pre_gain_db(&self) -> f32 {
        self.pre_gain_db
    }

    pub fn mix(&self) -> f32 {
        self.mix
    }

    #[inline]
    fn process_sample(&self, dry: f32) -> f32 {
        let wet = self.preset.shape(dry * self.pre_gain_linear);
        dry * (1.0 - self.mix) + wet * self.mix
    }
}

impl Effect for Distortion {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        if !self.params.enabled {
            return;
        }
        for ch in 0..buffer.num_channels() {
            for sample in buffer.channel_mut(ch).iter_mut() {
                *sample = self.process_sample(*sample);
            }
        }
    }

    fn prepare(&mut self, _sample_rate: u32) {}

    // Stateless
    fn reset(&mut self) {}

    fn get_params(&self) -> Value {
        json!({
            "preset": self.preset,
            "pre_gain_db": self.pre_gain_db,
            "wet_dry_mix": self.mix,
            "enabled": self.params.enabled,
        })
    }

    impl_effect_common!(Distortion, "distortion", "Distortion");
}

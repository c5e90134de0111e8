//! Engine configuration
//!
//! Loaded from JSON. Every section falls back to its defaults, so a config
//! file only needs the keys it changes. `MIXDOWN_SCRATCH_DIR` and
//! `MIXDOWN_FFMPEG` override the matching render settings.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dsp::EffectsConfig;
use crate::engine::{EncoderSettings, ExportFormat, DEFAULT_AAC_BITRATE_KBPS, RENDER_BLOCK_FRAMES};
use crate::error::{MixError, Result};
use crate::session::PlaybackMode;
use crate::waveform::DEFAULT_BINS;

/// Environment variable overriding the render scratch directory
pub const ENV_SCRATCH_DIR: &str = "MIXDOWN_SCRATCH_DIR";

/// Environment variable overriding the ffmpeg binary
pub const ENV_FFMPEG: &str = "MIXDOWN_FFMPEG";

/// Offline render settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Largest block pulled per render step
    pub block_frames: usize,
    /// Shorter mixes are rejected as empty
    pub min_mix_length_secs: f64,
    /// Where rendered files land; defaults to `$TMPDIR/mixdown`
    pub scratch_dir: Option<PathBuf>,
    pub ffmpeg_path: PathBuf,
    pub aac_bitrate_kbps: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            block_frames: RENDER_BLOCK_FRAMES,
            min_mix_length_secs: 0.01,
            scratch_dir: None,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            aac_bitrate_kbps: DEFAULT_AAC_BITRATE_KBPS,
        }
    }
}

impl RenderConfig {
    /// Resolved scratch directory
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| env::temp_dir().join("mixdown"))
    }

    pub fn encoder(&self) -> EncoderSettings {
        EncoderSettings {
            ffmpeg_path: self.ffmpeg_path.clone(),
            aac_bitrate_kbps: self.aac_bitrate_kbps,
        }
    }
}

/// Waveform summary settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformConfig {
    pub bins: usize,
    /// Summarize every source as it is added
    pub compute_on_add: bool,
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            bins: DEFAULT_BINS,
            compute_on_add: true,
        }
    }
}

/// Session controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Progress ticker period
    pub tick_interval_ms: u64,
    pub default_mode: PlaybackMode,
    pub default_export: ExportFormat,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 33,
            default_mode: PlaybackMode::Simultaneous,
            default_export: ExportFormat::Compressed,
        }
    }
}

/// Live output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Frames per pull for the clocked output
    pub block_frames: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { block_frames: 512 }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub render: RenderConfig,
    pub effects: EffectsConfig,
    pub waveform: WaveformConfig,
    pub session: SessionConfig,
    pub output: OutputConfig,
}

impl EngineConfig {
    /// Load a JSON config file, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| MixError::Config {
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;
        let mut config: EngineConfig = serde_json::from_str(&content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, validated
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply `MIXDOWN_*` environment overrides
    pub fn apply_env(&mut self) {
        if let Ok(dir) = env::var(ENV_SCRATCH_DIR) {
            if !dir.is_empty() {
                self.render.scratch_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(ffmpeg) = env::var(ENV_FFMPEG) {
            if !ffmpeg.is_empty() {
                self.render.ffmpeg_path = PathBuf::from(ffmpeg);
            }
        }
    }

    /// Write the config as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |reason: &str| {
            Err(MixError::Config {
                reason: reason.to_string(),
            })
        };
        if self.render.block_frames == 0 {
            return fail("render.block_frames must be greater than 0");
        }
        if !self.render.min_mix_length_secs.is_finite() || self.render.min_mix_length_secs <= 0.0 {
            return fail("render.min_mix_length_secs must be greater than 0");
        }
        if !(32..=512).contains(&self.render.aac_bitrate_kbps) {
            return fail("render.aac_bitrate_kbps must be within 32..=512");
        }
        if self.waveform.bins == 0 {
            return fail("waveform.bins must be greater than 0");
        }
        if self.session.tick_interval_ms == 0 {
            return fail("session.tick_interval_ms must be greater than 0");
        }
        if self.output.block_frames == 0 {
            return fail("output.block_frames must be greater than 0");
        }
        let mix = self.effects.distortion.wet_dry_mix;
        if !(0.0..=1.0).contains(&mix) {
            return fail("effects.distortion.wet_dry_mix must be within 0..=1");
        }
        Ok(())
    }
}

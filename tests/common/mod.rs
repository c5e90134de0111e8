//! Shared fixtures for integration tests
//!
//! Sources are written with hound into a temporary directory.

#![allow(dead_code)]

use std::f32::consts::PI;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
use tempfile::TempDir;

use mixdown::{EngineConfig, SessionController};

pub const RATE: u32 = 44100;

/// Temporary directory holding sources and a scratch dir for renders
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn scratch(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    /// Engine config rendering into the scratch dir, with no live ticks
    pub fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.render.scratch_dir = Some(self.scratch());
        config.session.tick_interval_ms = 60_000;
        config.waveform.compute_on_add = false;
        config
    }

    /// Same as [`config`](Self::config) with the master chain bypassed
    pub fn dry_config(&self) -> EngineConfig {
        let mut config = self.config();
        config.effects.bypass = true;
        config
    }

    pub fn headless(&self) -> (SessionController, mixdown::engine::ManualOutputHandle) {
        SessionController::headless(self.dry_config())
    }

    /// Files left in the scratch dir
    pub fn rendered_files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.scratch()) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn sine(&self, name: &str, secs: f64, freq: f32, amplitude: f32) -> PathBuf {
        let path = self.path(name);
        write_sine(&path, secs, RATE, 2, freq, amplitude);
        path
    }

    /// Constant-valued mono source
    pub fn dc(&self, name: &str, secs: f64, value: f32) -> PathBuf {
        let path = self.path(name);
        let frames = (secs * RATE as f64).round() as usize;
        write_f32(&path, RATE, 1, &vec![value; frames]);
        path
    }

    pub fn silence(&self, name: &str, secs: f64) -> PathBuf {
        let path = self.path(name);
        let frames = (secs * RATE as f64).round() as usize;
        write_i16(&path, RATE, 2, &vec![0; frames * 2]);
        path
    }

    /// Float source with NaN samples after the first half second
    pub fn poisoned(&self, name: &str, secs: f64) -> PathBuf {
        let path = self.path(name);
        let frames = (secs * RATE as f64).round() as usize;
        let samples: Vec<f32> = (0..frames)
            .map(|i| if i < RATE as usize / 2 { 0.1 } else { f32::NAN })
            .collect();
        write_f32(&path, RATE, 1, &samples);
        path
    }

    pub fn garbage(&self, name: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, b"definitely not audio").unwrap();
        path
    }
}

pub fn write_sine(path: &Path, secs: f64, rate: u32, channels: u16, freq: f32, amplitude: f32) {
    let frames = (secs * rate as f64).round() as usize;
    let mut samples = Vec::with_capacity(frames * channels as usize);
    for i in 0..frames {
        let v = amplitude * (2.0 * PI * freq * i as f32 / rate as f32).sin();
        let v = (v * i16::MAX as f32) as i16;
        for _ in 0..channels {
            samples.push(v);
        }
    }
    write_i16(path, rate, channels, &samples);
}

pub fn write_i16(path: &Path, rate: u32, channels: u16, samples: &[i16]) {
    let spec = WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

pub fn write_f32(path: &Path, rate: u32, channels: u16, samples: &[f32]) {
    let spec = WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

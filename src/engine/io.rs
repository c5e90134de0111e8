//! Mix file output
//!
//! Writers for the two export formats. Uncompressed output is 16-bit PCM WAV
//! written with `hound`; compressed output streams the same 16-bit PCM into an
//! `ffmpeg` child process that encodes AAC into an MPEG-4 container.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use hound::{SampleFormat, WavSpec, WavWriter};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::engine::buffer::{AudioBuffer, GRAPH_CHANNELS, GRAPH_SAMPLE_RATE};
use crate::error::{MixError, Result};

/// Default AAC bitrate in kbps
pub const DEFAULT_AAC_BITRATE_KBPS: u32 = 192;

// ============================================================================
// Export Format
// ============================================================================

/// Output file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// AAC in an MPEG-4 container, 44.1 kHz stereo
    #[default]
    Compressed,
    /// 16-bit little-endian PCM WAV, 44.1 kHz stereo
    Uncompressed,
}

impl ExportFormat {
    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Compressed => "m4a",
            ExportFormat::Uncompressed => "wav",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ExportFormat::Compressed => "AAC (m4a)",
            ExportFormat::Uncompressed => "PCM WAV",
        }
    }

    pub fn sample_rate(&self) -> u32 {
        GRAPH_SAMPLE_RATE
    }

    pub fn channels(&self) -> usize {
        GRAPH_CHANNELS
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = MixError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "m4a" | "aac" | "compressed" => Ok(ExportFormat::Compressed),
            "wav" | "pcm" | "uncompressed" => Ok(ExportFormat::Uncompressed),
            other => Err(MixError::Config {
                reason: format!("unknown export format '{}' (expected m4a or wav)", other),
            }),
        }
    }
}

/// External encoder settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub ffmpeg_path: PathBuf,
    pub aac_bitrate_kbps: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            aac_bitrate_kbps: DEFAULT_AAC_BITRATE_KBPS,
        }
    }
}

impl EncoderSettings {
    /// Check if the AAC encoder can be launched
    pub fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// Fresh output path `mix_<uuid>.<ext>` inside `dir`
pub fn output_path(dir: &Path, format: ExportFormat) -> PathBuf {
    dir.join(format!("mix_{}.{}", Uuid::new_v4(), format.extension()))
}

/// Calculate SHA-256 checksum of a file
pub fn file_checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[inline]
fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

// ============================================================================
// Writers
// ============================================================================

/// Streaming writer for a rendered mix
pub enum MixWriter {
    Wav(WavWriter<BufWriter<File>>),
    Aac(AacPipe),
}

impl MixWriter {
    /// Create the output file and open the writer
    ///
    /// # Errors
    /// * `EncoderUnavailable` - compressed output without a launchable `ffmpeg`
    pub fn create(path: &Path, format: ExportFormat, encoder: &EncoderSettings) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        match format {
            ExportFormat::Uncompressed => {
                let spec = WavSpec {
                    channels: GRAPH_CHANNELS as u16,
                    sample_rate: GRAPH_SAMPLE_RATE,
                    bits_per_sample: 16,
                    sample_format: SampleFormat::Int,
                };
                Ok(MixWriter::Wav(WavWriter::create(path, spec)?))
            }
            ExportFormat::Compressed => Ok(MixWriter::Aac(AacPipe::spawn(path, encoder)?)),
        }
    }

    /// Append one block
    pub fn write_block(&mut self, block: &AudioBuffer) -> Result<()> {
        match self {
            MixWriter::Wav(writer) => {
                for frame in 0..block.num_samples() {
                    for ch in 0..GRAPH_CHANNELS {
                        writer.write_sample(to_i16(block.get(frame, ch).unwrap_or(0.0)))?;
                    }
                }
                Ok(())
            }
            MixWriter::Aac(pipe) => pipe.write_block(block),
        }
    }

    /// Flush and close the file
    pub fn finalize(self) -> Result<()> {
        match self {
            MixWriter::Wav(writer) => Ok(writer.finalize()?),
            MixWriter::Aac(pipe) => pipe.finish(),
        }
    }

    /// Give up on the file; the caller removes it
    pub fn abort(self) {
        if let MixWriter::Aac(pipe) = self {
            pipe.kill();
        }
    }
}

/// `ffmpeg` child process fed raw s16le PCM on stdin
pub struct AacPipe {
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    scratch: Vec<u8>,
}

impl AacPipe {
    fn spawn(path: &Path, encoder: &EncoderSettings) -> Result<Self> {
        let mut child = Command::new(&encoder.ffmpeg_path)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "s16le"])
            .arg("-ar")
            .arg(GRAPH_SAMPLE_RATE.to_string())
            .arg("-ac")
            .arg(GRAPH_CHANNELS.to_string())
            .args(["-i", "pipe:0"])
            .args(["-c:a", "aac"])
            .arg("-b:a")
            .arg(format!("{}k", encoder.aac_bitrate_kbps))
            .args(["-f", "mp4"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MixError::EncoderUnavailable {
                encoder: encoder.ffmpeg_path.display().to_string(),
                reason: e.to_string(),
            })?;

        let stdin = child.stdin.take().map(BufWriter::new);
        debug!("Spawned AAC encoder for {}", path.display());
        Ok(Self {
            child,
            stdin,
            scratch: Vec::new(),
        })
    }

    fn write_block(&mut self, block: &AudioBuffer) -> Result<()> {
        self.scratch.clear();
        for frame in 0..block.num_samples() {
            for ch in 0..GRAPH_CHANNELS {
                let s = to_i16(block.get(frame, ch).unwrap_or(0.0));
                self.scratch.extend_from_slice(&s.to_le_bytes());
            }
        }
        let stdin = self.stdin.as_mut().ok_or_else(|| MixError::EncoderFailed {
            reason: "encoder input already closed".to_string(),
        })?;
        stdin
            .write_all(&self.scratch)
            .map_err(|e| MixError::EncoderFailed {
                reason: format!("writing PCM to encoder: {}", e),
            })
    }

    fn finish(mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush().map_err(|e| MixError::EncoderFailed {
                reason: format!("flushing encoder input: {}", e),
            })?;
        }
        let output = self.child.wait_with_output()?;
        if !output.status.success() {
            return Err(MixError::EncoderFailed {
                reason: format!(
                    "ffmpeg exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }

    fn kill(mut self) {
        self.stdin.take();
        if let Err(e) = self.child.kill() {
            warn!("Failed to stop AAC encoder: {}", e);
        }
        let _ = self.child.wait();
    }
}

// ============================================================================
// Render result
// ============================================================================

/// A finished offline render
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedMix {
    pub path: PathBuf,
    pub format: ExportFormat,
    /// Frames written per channel
    pub frames: u64,
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub channels: usize,
    /// SHA-256 of the output file, lowercase hex
    pub checksum: String,
    /// Wall-clock seconds spent rendering
    pub render_time_secs: f64,
    /// Audio seconds rendered per wall-clock second
    pub realtime_factor: f64,
    pub rendered_at: DateTime<Utc>,
}

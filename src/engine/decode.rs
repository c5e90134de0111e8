//! Source decoding
//!
//! Every source is decoded once, up front, into an interleaved `f32` stream.
//! Playback units and the waveform summarizer read from that buffer; nothing
//! decodes on the audio thread.

use std::fs::File;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use crate::error::{MixError, Result};

/// A fully decoded audio source
#[derive(Debug, Clone)]
pub struct DecodedSource {
    path: PathBuf,
    sample_rate: u32,
    channels: usize,
    /// Interleaved samples
    samples: Vec<f32>,
}

impl DecodedSource {
    /// Decode an entire file
    ///
    /// # Errors
    /// * `SourceUnreadable` - the file cannot be opened, probed or decoded
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| MixError::unreadable(path, e))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| MixError::unreadable(path, e))?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| MixError::unreadable(path, "no default audio track"))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let mut decoder = get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| MixError::unreadable(path, e))?;

        let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
        let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);
        let mut sample_buf: Option<SampleBuffer<f32>> = None;
        let mut samples = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(MixError::unreadable(path, e)),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!("Skipping corrupt packet in {}: {}", path.display(), e);
                    continue;
                }
                Err(e) => return Err(MixError::unreadable(path, e)),
            };

            let spec = *decoded.spec();
            if channels == 0 {
                channels = spec.channels.count();
            }
            if sample_rate == 0 {
                sample_rate = spec.rate;
            }
            if spec.channels.count() != channels {
                warn!(
                    "Channel count changed mid-stream in {} ({} -> {}), skipping packet",
                    path.display(),
                    channels,
                    spec.channels.count()
                );
                continue;
            }

            let needs_alloc = sample_buf
                .as_ref()
                .map_or(true, |b| b.capacity() < decoded.capacity());
            if needs_alloc {
                sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
            }
            if let Some(buf) = sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
        }

        if sample_rate == 0 || channels == 0 {
            return Err(MixError::unreadable(path, "unknown sample rate or channel layout"));
        }

        debug!(
            "Decoded {}: {} frames, {} Hz, {} ch",
            path.display(),
            samples.len() / channels,
            sample_rate,
            channels
        );

        Ok(Self {
            path: path.to_path_buf(),
            sample_rate,
            channels,
            samples,
        })
    }

    /// Build a source from interleaved samples already in memory
    pub fn from_interleaved(
        path: impl Into<PathBuf>,
        samples: Vec<f32>,
        channels: usize,
        sample_rate: u32,
    ) -> Result<Self> {
        if channels == 0 || sample_rate == 0 || samples.len() % channels != 0 {
            return Err(MixError::SourceUnreadable {
                path: path.into().display().to_string(),
                reason: format!(
                    "{} samples cannot form frames of {} channels at {} Hz",
                    samples.len(),
                    channels,
                    sample_rate
                ),
            });
        }
        Ok(Self {
            path: path.into(),
            sample_rate,
            channels,
            samples,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// One frame mapped to stereo
    ///
    /// Mono is duplicated; anything wider contributes its first two channels.
    /// Out-of-range frames are silent.
    #[inline]
    pub fn stereo_frame(&self, frame: usize) -> (f32, f32) {
        let base = frame * self.channels;
        if base + self.channels > self.samples.len() {
            return (0.0, 0.0);
        }
        if self.channels == 1 {
            let s = self.samples[base];
            (s, s)
        } else {
            (self.samples[base], self.samples[base + 1])
        }
    }

    /// First channel of every frame
    pub fn first_channel(&self) -> impl Iterator<Item = f32> + '_ {
        self.samples.iter().step_by(self.channels).copied()
    }
}

/// Read the duration of a source in seconds
///
/// Uses the container's frame count when it is known and falls back to a full
/// decode otherwise. Unreadable sources report 0.
pub fn probe_duration(path: &Path) -> f64 {
    match probe_container_duration(path) {
        Some(secs) => secs,
        None => match DecodedSource::open(path) {
            Ok(source) => source.duration_secs(),
            Err(e) => {
                warn!("Duration probe failed: {}", e);
                0.0
            }
        },
    }
}

fn probe_container_duration(path: &Path) -> Option<f64> {
    let file = File::open(path).ok()?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .ok()?;
    let track = probed.format.default_track()?;
    let frames = track.codec_params.n_frames?;
    let rate = track.codec_params.sample_rate?;
    if rate == 0 {
        return None;
    }
    Some(frames as f64 / rate as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use tempfile::tempdir;

    fn write_wav(path: &Path, channels: u16, sample_rate: u32, frames: usize) {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            for ch in 0..channels {
                let v: i16 = if ch == 0 { 8000 } else { -8000 };
                let sample = if i % 2 == 0 { v } else { -v };
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_open_stereo_wav() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 2, 44100, 4410);

        let source = DecodedSource::open(&path).unwrap();
        assert_eq!(source.sample_rate(), 44100);
        assert_eq!(source.channels(), 2);
        assert_eq!(source.frames(), 4410);
        assert!((source.duration_secs() - 0.1).abs() < 1e-9);

        let (l, r) = source.stereo_frame(0);
        assert!(l > 0.2 && r < -0.2);
    }

    #[test]
    fn test_mono_duplicates_to_stereo() {
        let source = DecodedSource::from_interleaved("m.wav", vec![0.5, -0.25], 1, 8000).unwrap();
        assert_eq!(source.stereo_frame(0), (0.5, 0.5));
        assert_eq!(source.stereo_frame(1), (-0.25, -0.25));
        assert_eq!(source.stereo_frame(2), (0.0, 0.0));
    }

    #[test]
    fn test_open_missing_file_is_unreadable() {
        let err = DecodedSource::open(Path::new("/nonexistent/track.wav")).unwrap_err();
        assert_eq!(err.error_code(), "SOURCE_UNREADABLE");
    }

    #[test]
    fn test_open_garbage_is_unreadable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(DecodedSource::open(&path).is_err());
    }

    #[test]
    fn test_probe_duration() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("one_sec.wav");
        write_wav(&path, 1, 22050, 22050);
        assert!((probe_duration(&path) - 1.0).abs() < 1e-6);
        assert_eq!(probe_duration(Path::new("/nonexistent.wav")), 0.0);
    }

    #[test]
    fn test_from_interleaved_rejects_ragged_frames() {
        assert!(DecodedSource::from_interleaved("x", vec![0.0; 3], 2, 44100).is_err());
    }
}

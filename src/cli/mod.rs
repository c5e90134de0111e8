//! CLI Module
//!
//! Command-line interface for the Mixdown engine.

pub mod commands;

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand};

use crate::engine::ExportFormat;
use crate::error::MixError;
use crate::session::PlaybackMode;

/// Mixdown - multi-track mixing and offline rendering
#[derive(Parser, Debug)]
#[command(name = "mixdown")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON engine configuration
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the duration of each source
    #[command(name = "probe")]
    Probe {
        /// Audio files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print a waveform summary as JSON
    #[command(name = "waveform")]
    Waveform {
        /// Audio file
        file: PathBuf,

        /// Number of bins
        #[arg(short, long)]
        bins: Option<usize>,
    },

    /// Render tracks to a mix file
    #[command(name = "render")]
    Render {
        /// Tracks as PATH or PATH:START:END (seconds)
        #[arg(required = true)]
        tracks: Vec<TrackArg>,

        /// Output format (m4a or wav)
        #[arg(short, long, default_value = "m4a")]
        format: ExportFormat,

        /// Directory for the rendered file
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },

    /// Preview tracks through the output device
    #[command(name = "play")]
    Play {
        /// Tracks as PATH or PATH:START:END (seconds)
        #[arg(required = true)]
        tracks: Vec<TrackArg>,

        /// Playback mode (simultaneous or sequential)
        #[arg(short, long, default_value = "simultaneous")]
        mode: PlaybackMode,
    },

    /// Print the master effects chain
    #[command(name = "chain")]
    Chain,
}

/// A track on the command line: a path and an optional selection
#[derive(Debug, Clone, PartialEq)]
pub struct TrackArg {
    pub path: PathBuf,
    pub selection: Option<(f64, f64)>,
}

impl FromStr for TrackArg {
    type Err = MixError;

    /// `PATH:START:END` when both trailing fields parse as seconds,
    /// otherwise the whole string is the path
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(MixError::Config {
                reason: "empty track argument".to_string(),
            });
        }
        let mut parts = s.rsplitn(3, ':');
        if let (Some(end), Some(start), Some(path)) = (parts.next(), parts.next(), parts.next()) {
            if let (Ok(start), Ok(end)) = (start.parse::<f64>(), end.parse::<f64>()) {
                if !path.is_empty() {
                    return Ok(Self {
                        path: PathBuf::from(path),
                        selection: Some((start, end)),
                    });
                }
            }
        }
        Ok(Self {
            path: PathBuf::from(s),
            selection: None,
        })
    }
}

//! Bundled demo assets
//!
//! Demo tracks shipped next to the binary, looked up by name and extension.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the asset directory
pub const ENV_ASSETS_DIR: &str = "MIXDOWN_ASSETS_DIR";

/// A directory of bundled audio files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundledAssets {
    root: PathBuf,
}

impl Default for BundledAssets {
    fn default() -> Self {
        let root = env::var(ENV_ASSETS_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("assets"));
        Self { root }
    }
}

impl BundledAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `name.ext` when it exists
    pub fn resolve(&self, name: &str, ext: &str) -> Option<PathBuf> {
        let path = self.root.join(format!("{}.{}", name, ext));
        path.is_file().then_some(path)
    }

    /// Every file in the asset directory, sorted
    pub fn list(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        paths.sort();
        paths
    }
}

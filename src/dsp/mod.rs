//! DSP effects
//!
//! The master chain that every playback unit is summed into.

pub mod chain;
pub mod distortion;
pub mod effect;
pub mod eq;

pub use chain::{EffectChain, EffectsConfig};
pub use distortion::{Distortion, DistortionPreset, DistortionSettings};
pub use effect::{Effect, EffectParams};
pub use eq::{ShelfEq, ShelfSettings, ShelfType};

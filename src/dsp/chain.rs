//! Master effect chain
//!
//! Effects run in chain order (index 0 first). The master chain is fixed:
//! 1. Low shelf
//! 2. High shelf
//! 3. Distortion

use serde::{Deserialize, Serialize};

use super::{Distortion, DistortionSettings, Effect, ShelfEq, ShelfSettings};
use crate::engine::{AudioBuffer, GRAPH_SAMPLE_RATE};

/// Settings for the master chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    pub low_shelf: ShelfSettings,
    pub high_shelf: ShelfSettings,
    pub distortion: DistortionSettings,
    /// Skip the whole chain
    pub bypass: bool,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            low_shelf: ShelfSettings::default_low(),
            high_shelf: ShelfSettings::default_high(),
            distortion: DistortionSettings::default(),
            bypass: false,
        }
    }
}

/// Chain of effects for processing
#[derive(Clone)]
pub struct EffectChain {
    effects: Vec<Box<dyn Effect>>,
    sample_rate: u32,
    bypass: bool,
}

impl EffectChain {
    /// Create a new empty effect chain
    pub fn new() -> Self {
        Self {
            effects: Vec::new(),
            sample_rate: GRAPH_SAMPLE_RATE,
            bypass: false,
        }
    }

    /// Build the master chain: low shelf, high shelf, distortion
    pub fn master(config: &EffectsConfig) -> Self {
        let mut chain = Self::new();
        chain.push(Box::new(ShelfEq::low_shelf(config.low_shelf)));
        chain.push(Box::new(ShelfEq::high_shelf(config.high_shelf)));
        chain.push(Box::new(Distortion::new(config.distortion)));
        chain.bypass = config.bypass;
        chain
    }

    /// Prepare all effects for processing
    pub fn prepare(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        for effect in &mut self.effects {
            effect.prepare(sample_rate);
        }
    }

    /// Reset all effects
    pub fn reset(&mut self) {
        for effect in &mut self.effects {
            effect.reset();
        }
    }

    /// Append an effect to the end of the chain
    pub fn push(&mut self, mut effect: Box<dyn Effect>) {
        effect.prepare(self.sample_rate);
        self.effects.push(effect);
    }

    pub fn set_bypass(&mut self, bypass: bool) {
        self.bypass = bypass;
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    /// Process the entire chain
    pub fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.bypass {
            return;
        }
        for effect in &mut self.effects {
            effect.process(buffer);
        }
    }

    /// Get the number of effects in the chain
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// Check if the chain is empty
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Iterate over effects
    pub fn iter(&self) -> impl Iterator<Item = &dyn Effect> {
        self.effects.iter().map(|e| e.as_ref())
    }

    /// Describe the chain as JSON
    pub fn to_json(&self) -> serde_json::Value {
        let effects: Vec<serde_json::Value> = self
            .effects
            .iter()
            .map(|e| {
                serde_json::json!({
                    "type": e.effect_type(),
                    "params": e.get_params(),
                })
            })
            .collect();

        serde_json::json!({
            "effects": effects,
            "sample_rate": self.sample_rate,
            "bypass": self.bypass,
        })
    }
}

impl Default for EffectChain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EffectChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectChain")
            .field(
                "effects",
                &self.effects.iter().map(|e| e.effect_type()).collect::<Vec<_>>(),
            )
            .field("sample_rate", &self.sample_rate)
            .field("bypass", &self.bypass)
            .finish()
    }
}

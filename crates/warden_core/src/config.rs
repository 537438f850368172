//! # Configuration
//!
//! TOML-loadable settings for the manager and for each detection's stage
//! models. Stage bodies are code; configuration only selects and bounds
//! them.
//!
//! ```toml
//! [manager]
//! lifecycle_capacity = 4096
//! max_sequences_per_entity = 64
//! sweep_interval_ticks = 20
//!
//! [[detections]]
//! id = "speed"
//! name = "Speed"
//!
//! [[detections.models]]
//! kind = "penalty"
//! includes = ["warn", "kick"]
//! min = 1
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::{WardenError, WardenResult};
use crate::stage::{StageKind, StageModelArchetype};

/// Sequence manager settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Pending lifecycle events before start and chain events are shed.
    pub lifecycle_capacity: usize,
    /// Live sequences (running or awaiting cleanup) allowed per entity.
    pub max_sequences_per_entity: usize,
    /// Ticks between expiry sweeps driven by [`Warden::process`](crate::Warden::process).
    pub sweep_interval_ticks: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            lifecycle_capacity: 4096,
            max_sequences_per_entity: 64,
            sweep_interval_ticks: 20,
        }
    }
}

/// Selection rules for one stage model of a detection.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct StageModelConfig {
    /// Which model.
    pub kind: StageKind,
    /// Stage ids to run, in order. Empty runs every registered stage.
    #[serde(default)]
    pub includes: Vec<String>,
    /// Stage ids never to run.
    #[serde(default)]
    pub excludes: Vec<String>,
    /// Minimum number of stages that must be eligible.
    #[serde(default)]
    pub min: usize,
    /// Maximum number of stages run per pass.
    #[serde(default = "unbounded")]
    pub max: usize,
}

const fn unbounded() -> usize {
    usize::MAX
}

impl StageModelConfig {
    /// Every stage of `kind`, unbounded.
    #[must_use]
    pub const fn all(kind: StageKind) -> Self {
        Self {
            kind,
            includes: Vec::new(),
            excludes: Vec::new(),
            min: 0,
            max: usize::MAX,
        }
    }

    /// Builds the archetype these rules describe.
    #[must_use]
    pub fn archetype(&self) -> StageModelArchetype {
        StageModelArchetype::new(self.kind)
            .include(self.includes.iter().map(String::as_str))
            .exclude(self.excludes.iter().map(String::as_str))
            .bounds(self.min, self.max)
    }
}

/// One detection.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct DetectionConfig {
    /// Unique id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Model rules. Kinds without an entry run every registered stage.
    #[serde(default)]
    pub models: Vec<StageModelConfig>,
}

impl DetectionConfig {
    /// Rules for `kind`, defaulting to every stage.
    #[must_use]
    pub fn model(&self, kind: StageKind) -> StageModelConfig {
        self.models
            .iter()
            .find(|m| m.kind == kind)
            .cloned()
            .unwrap_or_else(|| StageModelConfig::all(kind))
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Manager settings.
    pub manager: ManagerConfig,
    /// Detections in registration order.
    pub detections: Vec<DetectionConfig>,
}

impl WardenConfig {
    /// Parses and validates TOML.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on syntax errors or failed validation.
    pub fn from_toml_str(source: &str) -> WardenResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| WardenError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> WardenResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| WardenError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Checks values serde cannot.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` for zero capacities or a model kind listed twice
    /// - `DuplicateId` for repeated detection ids
    /// - `InvertedStageBounds` for `min > max`
    pub fn validate(&self) -> WardenResult<()> {
        if self.manager.lifecycle_capacity == 0 {
            return Err(WardenError::InvalidConfig("manager.lifecycle_capacity must be positive".into()));
        }
        if self.manager.max_sequences_per_entity == 0 {
            return Err(WardenError::InvalidConfig(
                "manager.max_sequences_per_entity must be positive".into(),
            ));
        }

        let mut ids = HashSet::new();
        for detection in &self.detections {
            if !ids.insert(detection.id.as_str()) {
                return Err(WardenError::DuplicateId {
                    kind: "detection",
                    id: detection.id.clone(),
                });
            }
            let mut kinds = HashSet::new();
            for model in &detection.models {
                if !kinds.insert(model.kind) {
                    return Err(WardenError::InvalidConfig(format!(
                        "detection `{}` configures the {} model twice",
                        detection.id, model.kind
                    )));
                }
                if model.min > model.max {
                    return Err(WardenError::InvertedStageBounds {
                        model: format!("{}.{}", detection.id, model.kind),
                        min: model.min,
                        max: model.max,
                    });
                }
            }
        }
        Ok(())
    }

    /// Looks up a detection by id.
    #[must_use]
    pub fn detection(&self, id: &str) -> Option<&DetectionConfig> {
        self.detections.iter().find(|d| d.id == id)
    }
}

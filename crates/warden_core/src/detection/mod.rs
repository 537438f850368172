//! # Detections
//!
//! A detection bundles the checks, heuristics and penalties for one kind of
//! cheat, together with the resolved stage models that decide which of them
//! run. Building a detection resolves every model up front, so a bad model
//! (underfilled, inverted bounds) rejects the detection instead of failing at
//! judgement time.

mod pipeline;

pub use pipeline::{DetectionPipeline, Judgement};

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::DetectionConfig;
use crate::error::{WardenError, WardenResult};
use crate::sequence::SequenceBlueprint;
use crate::stage::{Check, ResolvedStageModel, Stage, StageCycle, StageKind, StageModel, StageModelArchetype};

/// Every stage a detection knows about, one model per kind.
#[derive(Clone, Debug)]
pub struct DetectionStages {
    checks: StageModel,
    heuristics: StageModel,
    penalties: StageModel,
}

impl Default for DetectionStages {
    fn default() -> Self {
        Self {
            checks: StageModel::new(StageKind::Check),
            heuristics: StageModel::new(StageKind::Heuristic),
            penalties: StageModel::new(StageKind::Penalty),
        }
    }
}

impl DetectionStages {
    /// Creates empty models.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stage into the model of its kind.
    ///
    /// # Errors
    ///
    /// `DuplicateId` if the model already has a stage with that id.
    pub fn register(&mut self, stage: impl Into<Stage>) -> WardenResult<()> {
        let stage = stage.into();
        match stage.kind() {
            StageKind::Check => self.checks.register(stage),
            StageKind::Heuristic => self.heuristics.register(stage),
            StageKind::Penalty => self.penalties.register(stage),
        }
    }

    /// Builder-style [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn with(mut self, stage: impl Into<Stage>) -> WardenResult<Self> {
        self.register(stage)?;
        Ok(self)
    }

    /// The model of `kind`.
    #[must_use]
    pub const fn model(&self, kind: StageKind) -> &StageModel {
        match kind {
            StageKind::Check => &self.checks,
            StageKind::Heuristic => &self.heuristics,
            StageKind::Penalty => &self.penalties,
        }
    }
}

/// A configured detection.
pub struct Detection {
    id: Arc<str>,
    name: Arc<str>,
    stages: DetectionStages,
    models: Arc<[ResolvedStageModel]>,
}

impl Detection {
    /// Builds a detection with the model rules of `config`.
    ///
    /// # Errors
    ///
    /// Any stage model resolution error, or `InvalidConfig` if a check's
    /// blueprint belongs to another detection.
    pub fn new(config: &DetectionConfig, stages: DetectionStages) -> WardenResult<Self> {
        let archetypes = StageKind::ALL.map(|kind| config.model(kind).archetype());
        Self::with_archetypes(&config.id, &config.name, stages, archetypes)
    }

    /// Builds a detection with explicit archetypes, one per kind. Kinds
    /// without an archetype run every registered stage.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_archetypes(
        id: &str,
        name: &str,
        stages: DetectionStages,
        archetypes: impl IntoIterator<Item = StageModelArchetype>,
    ) -> WardenResult<Self> {
        let archetypes: Vec<StageModelArchetype> = archetypes.into_iter().collect();

        for stage in stages.model(StageKind::Check).iter() {
            if let Some(check) = stage.as_check() {
                if check.blueprint().detection() != id {
                    return Err(WardenError::InvalidConfig(format!(
                        "check `{}` of detection `{}` owns blueprint `{}` of detection `{}`",
                        check.id(),
                        id,
                        check.blueprint().id(),
                        check.blueprint().detection()
                    )));
                }
            }
        }

        let mut models = Vec::with_capacity(StageKind::ALL.len());
        for kind in StageKind::ALL {
            let archetype = archetypes
                .iter()
                .find(|a| a.kind() == kind)
                .cloned()
                .unwrap_or_else(|| StageModelArchetype::new(kind));
            let resolved = archetype.resolve(stages.model(kind)).map_err(|e| {
                tracing::warn!("detection {} rejected: {}", id, e);
                e
            })?;
            models.push(resolved);
        }

        let name = if name.is_empty() { id } else { name };
        tracing::debug!(
            "built detection {} ({} checks, {} heuristics, {} penalties)",
            id,
            models[0].len(),
            models[1].len(),
            models[2].len()
        );
        Ok(Self {
            id: id.into(),
            name: name.into(),
            stages,
            models: models.into(),
        })
    }

    /// Detection id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every registered stage, selected or not.
    #[must_use]
    pub const fn stages(&self) -> &DetectionStages {
        &self.stages
    }

    /// The stages that run, per kind.
    #[must_use]
    pub fn models(&self) -> &[ResolvedStageModel] {
        &self.models
    }

    /// A fresh cycle over the resolved models.
    #[must_use]
    pub fn cycle(&self) -> StageCycle {
        StageCycle::new(Arc::clone(&self.models))
    }

    fn selected_checks(&self) -> impl Iterator<Item = &Arc<Check>> {
        self.models
            .iter()
            .filter(|m| m.kind() == StageKind::Check)
            .flat_map(ResolvedStageModel::stages)
            .filter_map(Stage::as_check)
    }

    /// Returns true if the check `id` is selected to run.
    #[must_use]
    pub fn runs_check(&self, id: &str) -> bool {
        self.selected_checks().any(|c| c.id() == id)
    }

    /// Blueprints of the selected checks.
    #[must_use]
    pub fn blueprints(&self) -> Vec<Arc<SequenceBlueprint>> {
        self.selected_checks().map(|c| Arc::clone(c.blueprint())).collect()
    }
}

impl fmt::Debug for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("models", &self.models)
            .finish_non_exhaustive()
    }
}

/// Detections keyed by id, in registration order.
#[derive(Debug, Default)]
pub struct DetectionRegistry {
    detections: RwLock<Vec<Arc<Detection>>>,
}

impl DetectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a detection.
    ///
    /// # Errors
    ///
    /// `DuplicateId` if the id is taken.
    pub fn register(&self, detection: Detection) -> WardenResult<Arc<Detection>> {
        let mut detections = self.detections.write();
        if detections.iter().any(|d| d.id() == detection.id()) {
            return Err(WardenError::DuplicateId {
                kind: "detection",
                id: detection.id().to_string(),
            });
        }
        let detection = Arc::new(detection);
        detections.push(Arc::clone(&detection));
        Ok(detection)
    }

    /// Removes a detection.
    pub fn unregister(&self, id: &str) -> Option<Arc<Detection>> {
        let mut detections = self.detections.write();
        let index = detections.iter().position(|d| d.id() == id)?;
        Some(detections.remove(index))
    }

    /// Looks up a detection.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Detection>> {
        self.detections.read().iter().find(|d| d.id() == id).cloned()
    }

    /// Looks up a detection that must exist.
    ///
    /// # Errors
    ///
    /// `NotFound` if no detection has that id.
    pub fn require(&self, id: &str) -> WardenResult<Arc<Detection>> {
        self.get(id).ok_or_else(|| WardenError::NotFound {
            kind: "detection",
            id: id.to_string(),
        })
    }

    /// Registered ids in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<Arc<str>> {
        self.detections.read().iter().map(|d| Arc::clone(&d.id)).collect()
    }

    /// Every detection in registration order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Detection>> {
        self.detections.read().clone()
    }

    /// Number of detections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.detections.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.detections.read().is_empty()
    }
}

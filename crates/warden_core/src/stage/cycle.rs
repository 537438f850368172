//! # Stage Cycle
//!
//! Cursor over the resolved models of a detection, model by model and stage
//! by stage. The cursor starts before the first stage.
//!
//! ```text
//!   [check: c1] [heuristic: h1 h2] [penalty: p1]
//!      next()→c1  →h1  →h2  →p1  →false (wrapped)  →c1 ...
//! ```
//!
//! `next()` returns `false` exactly once per pass: on the call that steps
//! past the last stage. The cursor is then back before the first stage, so
//! the following call starts the next pass. Empty models are skipped.

use std::sync::Arc;

use super::{ResolvedStageModel, Stage, StageKind};

/// Cursor over a detection's resolved stage models.
#[derive(Clone, Debug)]
pub struct StageCycle {
    models: Arc<[ResolvedStageModel]>,
    position: Option<(usize, usize)>,
}

impl StageCycle {
    /// Creates a cycle positioned before the first stage.
    #[must_use]
    pub fn new(models: impl Into<Arc<[ResolvedStageModel]>>) -> Self {
        Self {
            models: models.into(),
            position: None,
        }
    }

    /// Moves to the next stage. Returns false when the pass wrapped.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        self.position = self.successor();
        self.position.is_some()
    }

    /// Moves to the first stage of the next non-empty model. Returns false
    /// when no model is left, which also wraps the pass.
    pub fn next_model(&mut self) -> bool {
        let start = self.position.map_or(0, |(model, _)| model + 1);
        self.position = (start..self.models.len())
            .find(|&model| !self.models[model].is_empty())
            .map(|model| (model, 0));
        self.position.is_some()
    }

    /// Returns true if the next [`next`](Self::next) call lands on a stage.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.successor().is_some()
    }

    /// Moves back before the first stage.
    pub fn reset(&mut self) {
        self.position = None;
    }

    fn successor(&self) -> Option<(usize, usize)> {
        let (mut model, mut stage) = self.position.map_or((0, 0), |(m, s)| (m, s + 1));
        while model < self.models.len() {
            if stage < self.models[model].len() {
                return Some((model, stage));
            }
            model += 1;
            stage = 0;
        }
        None
    }

    /// Id of the current model.
    #[must_use]
    pub fn model_id(&self) -> Option<&'static str> {
        self.model().map(ResolvedStageModel::id)
    }

    /// The current model.
    #[must_use]
    pub fn model(&self) -> Option<&ResolvedStageModel> {
        self.position.map(|(model, _)| &self.models[model])
    }

    /// Kind of the current model.
    #[must_use]
    pub fn kind(&self) -> Option<StageKind> {
        self.model().map(ResolvedStageModel::kind)
    }

    /// Id of the current stage.
    #[must_use]
    pub fn stage_id(&self) -> Option<&str> {
        self.stage().map(Stage::id)
    }

    /// The current stage.
    #[must_use]
    pub fn stage(&self) -> Option<&Stage> {
        self.position
            .and_then(|(model, stage)| self.models[model].stages().get(stage))
    }

    /// Number of stages in the current model.
    #[must_use]
    pub fn size(&self) -> usize {
        self.model().map_or(0, ResolvedStageModel::len)
    }

    /// Kinds of every model, in traversal order.
    #[must_use]
    pub fn all(&self) -> Vec<StageKind> {
        self.models.iter().map(ResolvedStageModel::kind).collect()
    }

    /// Number of stages in the model of `kind`.
    #[must_use]
    pub fn size_for(&self, kind: StageKind) -> usize {
        self.models
            .iter()
            .filter(|m| m.kind() == kind)
            .map(ResolvedStageModel::len)
            .sum()
    }

    /// Number of stages in one pass.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.models.iter().map(ResolvedStageModel::len).sum()
    }
}

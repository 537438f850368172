//! # Stage Models
//!
//! A [`StageModel`] is the ordered, id-keyed set of stages of one kind a
//! detection knows about. A [`StageModelArchetype`] says which of them run:
//!
//! 1. Candidates are the `includes` in their listed order, or every stage in
//!    registration order when `includes` is empty.
//! 2. Anything in `excludes` is dropped, even if included.
//! 3. Every filter must accept what is left.
//! 4. Fewer than `min` survivors is a configuration error; more than `max`
//!    are cut to the first `max`.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{WardenError, WardenResult};

use super::{Stage, StageKind};

/// Extra eligibility rule applied after includes and excludes.
pub type StageFilter = Arc<dyn Fn(&Stage) -> bool + Send + Sync>;

/// Ordered, id-keyed stages of one kind.
#[derive(Clone, Debug)]
pub struct StageModel {
    kind: StageKind,
    stages: Vec<Stage>,
}

impl StageModel {
    /// Creates an empty model.
    #[must_use]
    pub const fn new(kind: StageKind) -> Self {
        Self {
            kind,
            stages: Vec::new(),
        }
    }

    /// Registers a stage at the end of the model.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the stage has another kind, `DuplicateId` if the
    /// id is taken.
    pub fn register(&mut self, stage: impl Into<Stage>) -> WardenResult<()> {
        let stage = stage.into();
        if stage.kind() != self.kind {
            return Err(WardenError::InvalidConfig(format!(
                "{} stage `{}` registered into {} model",
                stage.kind(),
                stage.id(),
                self.kind
            )));
        }
        if self.get(stage.id()).is_some() {
            return Err(WardenError::DuplicateId {
                kind: self.kind.name(),
                id: stage.id().to_string(),
            });
        }
        self.stages.push(stage);
        Ok(())
    }

    /// Removes a stage by id.
    pub fn unregister(&mut self, id: &str) -> Option<Stage> {
        let index = self.stages.iter().position(|s| s.id() == id)?;
        Some(self.stages.remove(index))
    }

    /// Looks up a stage by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id() == id)
    }

    /// Kind of every stage in this model.
    #[must_use]
    pub const fn kind(&self) -> StageKind {
        self.kind
    }

    /// Stages in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter()
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if no stage is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Selection rules for one model.
#[derive(Clone)]
pub struct StageModelArchetype {
    kind: StageKind,
    includes: Vec<Arc<str>>,
    excludes: HashSet<Arc<str>>,
    filters: Vec<StageFilter>,
    min: usize,
    max: usize,
}

impl StageModelArchetype {
    /// Selects every stage of `kind`, with no lower bound and no upper bound.
    #[must_use]
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            includes: Vec::new(),
            excludes: HashSet::new(),
            filters: Vec::new(),
            min: 0,
            max: usize::MAX,
        }
    }

    /// Restricts candidates to `ids`, in that order.
    #[must_use]
    pub fn include<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        self.includes.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Never selects `ids`.
    #[must_use]
    pub fn exclude<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        self.excludes.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Adds a filter every selected stage must pass.
    #[must_use]
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Stage) -> bool + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Sets the execution bounds.
    #[must_use]
    pub const fn bounds(mut self, min: usize, max: usize) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Model kind this archetype selects from.
    #[must_use]
    pub const fn kind(&self) -> StageKind {
        self.kind
    }

    /// Minimum number of stages that must run.
    #[must_use]
    pub const fn min(&self) -> usize {
        self.min
    }

    /// Maximum number of stages that may run.
    #[must_use]
    pub const fn max(&self) -> usize {
        self.max
    }

    /// Selects the stages of `model` that run in one pass.
    ///
    /// # Errors
    ///
    /// - `InvertedStageBounds` if `min > max`
    /// - `InvalidConfig` if `model` has another kind
    /// - `StageModelUnderfilled` if fewer than `min` stages are eligible
    pub fn resolve(&self, model: &StageModel) -> WardenResult<ResolvedStageModel> {
        if self.min > self.max {
            return Err(WardenError::InvertedStageBounds {
                model: self.kind.name().to_string(),
                min: self.min,
                max: self.max,
            });
        }
        if model.kind() != self.kind {
            return Err(WardenError::InvalidConfig(format!(
                "{} archetype resolved against {} model",
                self.kind,
                model.kind()
            )));
        }

        let candidates: Vec<&Stage> = if self.includes.is_empty() {
            model.iter().collect()
        } else {
            self.includes
                .iter()
                .filter_map(|id| {
                    let stage = model.get(id);
                    if stage.is_none() {
                        tracing::warn!("{} model has no stage `{}`, skipping include", self.kind, id);
                    }
                    stage
                })
                .collect()
        };

        let mut stages: Vec<Stage> = candidates
            .into_iter()
            .filter(|stage| !self.excludes.contains(stage.id()))
            .filter(|stage| self.filters.iter().all(|f| f(*stage)))
            .cloned()
            .collect();

        let eligible = stages.len();
        if eligible < self.min {
            return Err(WardenError::StageModelUnderfilled {
                model: self.kind.name().to_string(),
                eligible,
                min: self.min,
            });
        }
        stages.truncate(self.max);

        Ok(ResolvedStageModel {
            kind: self.kind,
            stages: stages.into(),
            eligible,
        })
    }
}

impl fmt::Debug for StageModelArchetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageModelArchetype")
            .field("kind", &self.kind)
            .field("includes", &self.includes)
            .field("excludes", &self.excludes)
            .field("filters", &self.filters.len())
            .field("min", &self.min)
            .field("max", &self.max)
            .finish()
    }
}

/// The stages of one model that run in a pass, in execution order.
#[derive(Clone, Debug)]
pub struct ResolvedStageModel {
    kind: StageKind,
    stages: Arc<[Stage]>,
    eligible: usize,
}

impl ResolvedStageModel {
    /// Model kind.
    #[must_use]
    pub const fn kind(&self) -> StageKind {
        self.kind
    }

    /// Model id.
    #[must_use]
    pub const fn id(&self) -> &'static str {
        self.kind.name()
    }

    /// Stages that run.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Number of stages that run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if nothing runs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stages that passed selection before `max` was applied.
    #[must_use]
    pub const fn eligible(&self) -> usize {
        self.eligible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Penalty;

    fn penalties(ids: &[&str]) -> StageModel {
        let mut model = StageModel::new(StageKind::Penalty);
        for id in ids {
            model.register(Penalty::new(*id, |_, _| true)).unwrap();
        }
        model
    }

    fn ids(resolved: &ResolvedStageModel) -> Vec<&str> {
        resolved.stages().iter().map(Stage::id).collect()
    }

    #[test]
    fn test_register_rejects_duplicates_and_wrong_kind() {
        let mut model = penalties(&["kick"]);
        assert!(matches!(
            model.register(Penalty::new("kick", |_, _| true)),
            Err(WardenError::DuplicateId { .. })
        ));
        let heuristic = crate::stage::Heuristic::new("h", |_, s| s);
        assert!(matches!(model.register(heuristic), Err(WardenError::InvalidConfig(_))));
        assert!(model.unregister("kick").is_some());
        assert!(model.is_empty());
    }

    #[test]
    fn test_excludes_beat_includes() {
        let model = penalties(&["warn", "kick", "ban"]);
        let archetype = StageModelArchetype::new(StageKind::Penalty)
            .include(["ban", "warn", "kick"])
            .exclude(["kick"]);
        let resolved = archetype.resolve(&model).unwrap();
        assert_eq!(ids(&resolved), vec!["ban", "warn"]);
    }

    #[test]
    fn test_filters_after_selection() {
        let model = penalties(&["warn", "kick", "ban"]);
        let archetype = StageModelArchetype::new(StageKind::Penalty).filter(|s| s.id() != "ban");
        assert_eq!(ids(&archetype.resolve(&model).unwrap()), vec!["warn", "kick"]);
    }

    #[test]
    fn test_bounds() {
        let model = penalties(&["warn", "kick", "ban"]);

        let capped = StageModelArchetype::new(StageKind::Penalty).bounds(1, 2).resolve(&model).unwrap();
        assert_eq!(ids(&capped), vec!["warn", "kick"]);
        assert_eq!(capped.eligible(), 3);

        let err = StageModelArchetype::new(StageKind::Penalty)
            .exclude(["warn", "kick"])
            .bounds(2, 3)
            .resolve(&model)
            .unwrap_err();
        assert_eq!(
            err,
            WardenError::StageModelUnderfilled {
                model: "penalty".into(),
                eligible: 1,
                min: 2
            }
        );

        let err = StageModelArchetype::new(StageKind::Penalty).bounds(3, 1).resolve(&model).unwrap_err();
        assert!(matches!(err, WardenError::InvertedStageBounds { min: 3, max: 1, .. }));
    }

    #[test]
    fn test_unknown_include_is_skipped() {
        let model = penalties(&["warn"]);
        let resolved = StageModelArchetype::new(StageKind::Penalty)
            .include(["missing", "warn"])
            .resolve(&model)
            .unwrap();
        assert_eq!(ids(&resolved), vec!["warn"]);
    }
}

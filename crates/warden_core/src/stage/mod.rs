//! # Stages
//!
//! What a detection does with a finished sequence's evidence, split into
//! three kinds that always run in the same order:
//!
//! | Kind        | Role                                              |
//! |-------------|---------------------------------------------------|
//! | `Check`     | Owns a sequence blueprint; its result is the input |
//! | `Heuristic` | Refines the summary                               |
//! | `Penalty`   | Decides whether the entity is punished            |
//!
//! Stages of one kind live in a [`StageModel`]; a detection resolves one
//! [`StageModelArchetype`] per model and walks the results with a
//! [`StageCycle`].

mod cycle;
mod model;

pub use cycle::StageCycle;
pub use model::{ResolvedStageModel, StageFilter, StageModel, StageModelArchetype};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entry::EntityEntry;
use crate::report::Summary;
use crate::sequence::SequenceBlueprint;

/// Built-in stage kinds, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// Sequence owners.
    Check,
    /// Summary refiners.
    Heuristic,
    /// Punishment predicates.
    Penalty,
}

impl StageKind {
    /// Every kind, in execution order.
    pub const ALL: [Self; 3] = [Self::Check, Self::Heuristic, Self::Penalty];

    /// Stable lowercase name, also used as the model id.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Heuristic => "heuristic",
            Self::Penalty => "penalty",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Owns the blueprint whose finished sequences feed the detection.
#[derive(Debug)]
pub struct Check {
    id: Arc<str>,
    blueprint: Arc<SequenceBlueprint>,
}

impl Check {
    /// Creates a check. The blueprint's check id should equal `id`.
    pub fn new(id: impl Into<Arc<str>>, blueprint: Arc<SequenceBlueprint>) -> Self {
        let id = id.into();
        if blueprint.check() != &*id {
            tracing::warn!("check {} owns blueprint {} declared for check {}", id, blueprint.id(), blueprint.check());
        }
        Self { id, blueprint }
    }

    /// Check id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The sequence blueprint.
    #[must_use]
    pub const fn blueprint(&self) -> &Arc<SequenceBlueprint> {
        &self.blueprint
    }
}

/// Heuristic body.
pub type HeuristicSupplier = Arc<dyn Fn(&EntityEntry, Summary) -> Summary + Send + Sync>;

/// Refines a summary, e.g. weighing reports against configured thresholds.
pub struct Heuristic {
    id: Arc<str>,
    supplier: HeuristicSupplier,
}

impl Heuristic {
    /// Creates a heuristic.
    pub fn new<F>(id: impl Into<Arc<str>>, supplier: F) -> Self
    where
        F: Fn(&EntityEntry, Summary) -> Summary + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            supplier: Arc::new(supplier),
        }
    }

    /// Heuristic id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs the heuristic.
    #[must_use]
    pub fn apply(&self, entry: &EntityEntry, summary: Summary) -> Summary {
        (self.supplier)(entry, summary)
    }
}

impl fmt::Debug for Heuristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heuristic").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Penalty predicate.
pub type PenaltyPredicate = Arc<dyn Fn(&EntityEntry, &Summary) -> bool + Send + Sync>;

/// Decides whether the summarized behavior is punished.
pub struct Penalty {
    id: Arc<str>,
    predicate: PenaltyPredicate,
}

impl Penalty {
    /// Creates a penalty.
    pub fn new<F>(id: impl Into<Arc<str>>, predicate: F) -> Self
    where
        F: Fn(&EntityEntry, &Summary) -> bool + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Penalty id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns true if the penalty applies.
    #[must_use]
    pub fn test(&self, entry: &EntityEntry, summary: &Summary) -> bool {
        (self.predicate)(entry, summary)
    }
}

impl fmt::Debug for Penalty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Penalty").field("id", &self.id).finish_non_exhaustive()
    }
}

/// A stage of any kind.
#[derive(Clone, Debug)]
pub enum Stage {
    /// A check.
    Check(Arc<Check>),
    /// A heuristic.
    Heuristic(Arc<Heuristic>),
    /// A penalty.
    Penalty(Arc<Penalty>),
}

impl Stage {
    /// Stage id, unique within its model.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Check(check) => check.id(),
            Self::Heuristic(heuristic) => heuristic.id(),
            Self::Penalty(penalty) => penalty.id(),
        }
    }

    /// Stage kind.
    #[must_use]
    pub const fn kind(&self) -> StageKind {
        match self {
            Self::Check(_) => StageKind::Check,
            Self::Heuristic(_) => StageKind::Heuristic,
            Self::Penalty(_) => StageKind::Penalty,
        }
    }

    /// The check, if this is one.
    #[must_use]
    pub fn as_check(&self) -> Option<&Arc<Check>> {
        match self {
            Self::Check(check) => Some(check),
            _ => None,
        }
    }

    /// The heuristic, if this is one.
    #[must_use]
    pub fn as_heuristic(&self) -> Option<&Arc<Heuristic>> {
        match self {
            Self::Heuristic(heuristic) => Some(heuristic),
            _ => None,
        }
    }

    /// The penalty, if this is one.
    #[must_use]
    pub fn as_penalty(&self) -> Option<&Arc<Penalty>> {
        match self {
            Self::Penalty(penalty) => Some(penalty),
            _ => None,
        }
    }
}

impl From<Check> for Stage {
    fn from(check: Check) -> Self {
        Self::Check(Arc::new(check))
    }
}

impl From<Heuristic> for Stage {
    fn from(heuristic: Heuristic) -> Self {
        Self::Heuristic(Arc::new(heuristic))
    }
}

impl From<Penalty> for Stage {
    fn from(penalty: Penalty) -> Self {
        Self::Penalty(Arc::new(penalty))
    }
}

//! # Sequence Blueprints
//!
//! A blueprint is the immutable template a check registers. Every time its
//! trigger event arrives for an entity with no running instance, the manager
//! stamps out a fresh [`Sequence`] from it.

use std::fmt;
use std::sync::Arc;

use crate::capture::Capture;
use crate::entry::EntityEntry;
use crate::error::{WardenError, WardenResult};
use crate::event::EventKind;
use crate::origin::Origin;

use super::action::Action;
use super::Sequence;

/// Immutable template of a sequence.
pub struct SequenceBlueprint {
    id: Arc<str>,
    detection: Arc<str>,
    check: Arc<str>,
    actions: Arc<[Action]>,
    captures: Vec<Arc<dyn Capture>>,
}

impl SequenceBlueprint {
    /// Creates a blueprint.
    ///
    /// # Errors
    ///
    /// `EmptyBlueprint` if `actions` is empty.
    pub fn new(
        id: impl Into<Arc<str>>,
        detection: impl Into<Arc<str>>,
        check: impl Into<Arc<str>>,
        actions: Vec<Action>,
    ) -> WardenResult<Self> {
        let id = id.into();
        if actions.is_empty() {
            return Err(WardenError::EmptyBlueprint(id.to_string()));
        }
        Ok(Self {
            id,
            detection: detection.into(),
            check: check.into(),
            actions: actions.into(),
            captures: Vec::new(),
        })
    }

    /// Attaches a capture.
    #[must_use]
    pub fn with_capture(mut self, capture: Arc<dyn Capture>) -> Self {
        self.captures.push(capture);
        self
    }

    /// Blueprint id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn id_arc(&self) -> Arc<str> {
        Arc::clone(&self.id)
    }

    /// Owning detection id.
    #[must_use]
    pub fn detection(&self) -> &str {
        &self.detection
    }

    /// Owning check id.
    #[must_use]
    pub fn check(&self) -> &str {
        &self.check
    }

    /// Event kind of the first action; arrival of this kind creates instances.
    #[must_use]
    pub fn trigger(&self) -> &EventKind {
        // Non-empty by construction.
        self.actions[0].event_kind()
    }

    /// Actions in order.
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Number of actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Always false: blueprints have at least one action.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub(crate) fn captures(&self) -> &[Arc<dyn Capture>] {
        &self.captures
    }

    /// Creates a RUNNING instance for `entry` caused by `origin` at tick `now`.
    #[must_use]
    pub fn create(self: &Arc<Self>, entry: EntityEntry, origin: &Origin, now: u64) -> Sequence {
        Sequence::new(Arc::clone(self), entry, origin, now)
    }
}

impl fmt::Debug for SequenceBlueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceBlueprint")
            .field("id", &self.id)
            .field("detection", &self.detection)
            .field("check", &self.check)
            .field("actions", &self.actions.len())
            .field("captures", &self.captures.iter().map(|c| c.id()).collect::<Vec<_>>())
            .finish()
    }
}

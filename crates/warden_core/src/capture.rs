//! # Captures
//!
//! Captures collect telemetry for one sequence while it runs: distance
//! travelled, packets seen, last ground contact. They write into a
//! [`CaptureContainer`] that conditions read from.
//!
//! A container is created when the sequence starts and dropped with it.
//!
//! Captures see two kinds of updates: every event the sequence consumes,
//! and the host's scheduled tick, which lets them sample telemetry between
//! events.

use std::any::Any;
use std::sync::Arc;

use crate::entry::EntityEntry;
use crate::error::{ConditionError, WardenResult};
use crate::event::Event;
use crate::value::{TypedKey, Value, ValueMap};

/// Per-sequence telemetry store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CaptureContainer {
    values: ValueMap,
}

impl CaptureContainer {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn put<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key, value);
    }

    /// Stores `value` under a typed key.
    pub fn put_typed<T: Any + Send + Sync>(&mut self, key: &TypedKey<T>, value: T) {
        self.values.insert(key.name(), value);
    }

    /// Stores `value` only if `key` is absent. Returns true if stored.
    pub fn put_once<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) -> bool {
        self.values.insert_once(key, value)
    }

    /// Typed-key variant of [`put_once`](Self::put_once).
    pub fn put_once_typed<T: Any + Send + Sync>(&mut self, key: &TypedKey<T>, value: T) -> bool {
        self.values.insert_once(key.name(), value)
    }

    /// Read-modify-write; `default` is used only when the key is absent.
    ///
    /// # Errors
    ///
    /// Type mismatch if the stored value has another type.
    pub fn transform<T, F>(&mut self, key: &str, default: T, f: F) -> WardenResult<()>
    where
        T: Any + Send + Sync + Clone,
        F: FnOnce(T) -> T,
    {
        self.values.transform(key, default, f)
    }

    /// Typed-key variant of [`transform`](Self::transform).
    ///
    /// # Errors
    ///
    /// Type mismatch if the stored value has another type.
    pub fn transform_typed<T, F>(&mut self, key: &TypedKey<T>, default: T, f: F) -> WardenResult<()>
    where
        T: Any + Send + Sync + Clone,
        F: FnOnce(T) -> T,
    {
        self.values.transform(key.name(), default, f)
    }

    /// Copies every entry of `other` whose key is absent here.
    ///
    /// Not commutative: on a key collision the value already in `self` is
    /// kept. Merging the same `other` twice changes nothing the second time.
    pub fn merge(&mut self, other: &CaptureContainer) -> &mut Self {
        self.values.merge(&other.values);
        self
    }

    /// Raw value under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Typed read by string key.
    ///
    /// # Errors
    ///
    /// Type mismatch if the stored value has another type.
    pub fn get_as<T: Any>(&self, key: &str) -> WardenResult<Option<&T>> {
        self.values.get_as::<T>(key)
    }

    /// Typed read by typed key.
    ///
    /// # Errors
    ///
    /// Type mismatch if the stored value has another type.
    pub fn get_typed<T: Any>(&self, key: &TypedKey<T>) -> WardenResult<Option<&T>> {
        self.values.get_as::<T>(key.name())
    }

    /// Stored keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys()
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A telemetry collector attached to a sequence blueprint.
pub trait Capture: Send + Sync {
    /// Stable id, used in logs.
    fn id(&self) -> &str;

    /// Called once when the sequence is created.
    fn start(&self, _entry: &EntityEntry, _container: &mut CaptureContainer) {}

    /// Called for every event the sequence consumes, before its conditions run.
    ///
    /// # Errors
    ///
    /// An error cancels the sequence.
    fn update(
        &self,
        entry: &EntityEntry,
        event: &Event,
        container: &mut CaptureContainer,
    ) -> Result<(), ConditionError>;

    /// Called on every scheduled tick while the sequence runs.
    ///
    /// # Errors
    ///
    /// An error cancels the sequence.
    fn tick(&self, _entry: &EntityEntry, _now: u64, _container: &mut CaptureContainer) -> Result<(), ConditionError> {
        Ok(())
    }

    /// Called once when the sequence terminates, whatever the outcome.
    fn stop(&self, _entry: &EntityEntry, _container: &mut CaptureContainer) {}
}

/// The captures of one running sequence plus the container they fill.
pub struct CaptureRegistry {
    entry: EntityEntry,
    captures: Vec<Arc<dyn Capture>>,
    container: CaptureContainer,
    stopped: bool,
}

impl CaptureRegistry {
    /// Creates the registry and starts every capture.
    #[must_use]
    pub fn start(entry: EntityEntry, captures: Vec<Arc<dyn Capture>>) -> Self {
        let mut container = CaptureContainer::new();
        for capture in &captures {
            capture.start(&entry, &mut container);
        }
        Self {
            entry,
            captures,
            container,
            stopped: false,
        }
    }

    /// Feeds `event` to every capture in registration order.
    ///
    /// # Errors
    ///
    /// The first capture error, tagged with the capture id.
    pub fn update(&mut self, event: &Event) -> Result<(), ConditionError> {
        for capture in &self.captures {
            capture
                .update(&self.entry, event, &mut self.container)
                .map_err(|e| ConditionError::Other(format!("capture `{}`: {e}", capture.id())))?;
        }
        Ok(())
    }

    /// Runs the scheduled tick of every capture in registration order.
    ///
    /// # Errors
    ///
    /// The first capture error, tagged with the capture id.
    pub fn tick(&mut self, now: u64) -> Result<(), ConditionError> {
        for capture in &self.captures {
            capture
                .tick(&self.entry, now, &mut self.container)
                .map_err(|e| ConditionError::Other(format!("capture `{}`: {e}", capture.id())))?;
        }
        Ok(())
    }

    /// Stops every capture. Idempotent.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        for capture in &self.captures {
            capture.stop(&self.entry, &mut self.container);
        }
    }

    /// Ids of the registered captures.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.captures.iter().map(|c| c.id())
    }

    /// The captured values.
    #[must_use]
    pub const fn container(&self) -> &CaptureContainer {
        &self.container
    }

    /// Mutable access for conditions that annotate captures.
    pub fn container_mut(&mut self) -> &mut CaptureContainer {
        &mut self.container
    }
}

impl std::fmt::Debug for CaptureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureRegistry")
            .field("entry", &self.entry)
            .field("captures", &self.ids().collect::<Vec<_>>())
            .field("container", &self.container)
            .finish()
    }
}

//! # Host Events
//!
//! Events are delivered by the host runtime, one [`SequenceManager::invoke`]
//! call per event. The core only needs three things from them: a kind to
//! route on, a timestamp in ticks, and an origin to extend. Everything else
//! is payload that detection content reads through typed keys.
//!
//! [`SequenceManager::invoke`]: crate::sequence::SequenceManager::invoke

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::WardenResult;
use crate::origin::{Origin, OriginValue};
use crate::value::{TypedKey, ValueMap};

/// Routing key of an event.
///
/// Built-in kinds are closed variants; content may add its own through
/// [`EventKind::Custom`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    /// Entity moved.
    Move,
    /// Entity changed view direction.
    Rotate,
    /// Entity interacted with a block or object.
    Interact,
    /// Entity attacked another entity.
    Attack,
    /// Content-defined kind.
    Custom(Arc<str>),
}

impl EventKind {
    /// Creates a content-defined kind.
    pub fn custom(name: impl Into<Arc<str>>) -> Self {
        Self::Custom(name.into())
    }

    /// Stable lowercase name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Move => "move",
            Self::Rotate => "rotate",
            Self::Interact => "interact",
            Self::Attack => "attack",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An event delivered by the host.
#[derive(Clone, Debug)]
pub struct Event {
    kind: EventKind,
    timestamp: u64,
    origin: Origin,
    data: ValueMap,
}

impl Event {
    /// Creates an event whose origin is the event itself.
    #[must_use]
    pub fn new(kind: EventKind, timestamp: u64) -> Self {
        let origin = Origin::source(OriginValue::Event {
            kind: kind.clone(),
            timestamp,
        });
        Self {
            kind,
            timestamp,
            origin,
            data: ValueMap::new(),
        }
    }

    /// Replaces the origin, e.g. with one built by the host's event bus.
    #[must_use]
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// Adds a payload value.
    #[must_use]
    pub fn with<T: Any + Send + Sync>(mut self, key: &TypedKey<T>, value: T) -> Self {
        self.data.insert(key.name(), value);
        self
    }

    /// Event kind.
    #[must_use]
    pub const fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Tick at which the event happened.
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Causal trace of the event.
    #[must_use]
    pub const fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Raw payload.
    #[must_use]
    pub const fn data(&self) -> &ValueMap {
        &self.data
    }

    /// Typed payload read.
    ///
    /// # Errors
    ///
    /// Type mismatch if the payload value has another type.
    pub fn get<T: Any>(&self, key: &TypedKey<T>) -> WardenResult<Option<&T>> {
        self.data.get_as::<T>(key.name())
    }
}

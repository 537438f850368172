//! # Sequence Context
//!
//! Control and bookkeeping values that live as long as one sequence: when it
//! started, which check owns it, how many steps failed. Domain telemetry
//! belongs in the [`CaptureContainer`](crate::capture::CaptureContainer).

use std::any::Any;
use std::sync::Arc;

use crate::error::WardenResult;
use crate::value::{TypedKey, Value, ValueMap};

/// Id of the sequence instance.
pub const SEQUENCE_ID: TypedKey<u64> = TypedKey::new("warden:sequence_id");
/// Id of the check that owns the sequence.
pub const CHECK_ID: TypedKey<Arc<str>> = TypedKey::new("warden:check_id");
/// Tick at which the sequence was created.
pub const CREATED_AT: TypedKey<u64> = TypedKey::new("warden:created_at");
/// Number of actions whose predicate failed.
pub const FAILED_STEPS: TypedKey<u32> = TypedKey::new("warden:failed_steps");

/// Typed key/value bag threaded through a sequence's lifetime.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SequenceContext {
    values: ValueMap,
}

impl SequenceContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, returning the previous raw value.
    pub fn set<T: Any + Send + Sync>(&mut self, key: &TypedKey<T>, value: T) -> Option<Value> {
        self.values.insert(key.name(), value)
    }

    /// Stores `value` only if absent. Returns true if stored.
    pub fn set_once<T: Any + Send + Sync>(&mut self, key: &TypedKey<T>, value: T) -> bool {
        self.values.insert_once(key.name(), value)
    }

    /// Read-modify-write; `default` is used only when the key is absent.
    ///
    /// # Errors
    ///
    /// Type mismatch if the stored value has another type.
    pub fn transform<T, F>(&mut self, key: &TypedKey<T>, default: T, f: F) -> WardenResult<()>
    where
        T: Any + Send + Sync + Clone,
        F: FnOnce(T) -> T,
    {
        self.values.transform(key.name(), default, f)
    }

    /// Typed read.
    ///
    /// # Errors
    ///
    /// Type mismatch if the stored value has another type.
    pub fn get<T: Any>(&self, key: &TypedKey<T>) -> WardenResult<Option<&T>> {
        self.values.get_as::<T>(key.name())
    }

    /// Removes a value.
    pub fn remove<T>(&mut self, key: &TypedKey<T>) -> Option<Value> {
        self.values.remove(key.name())
    }

    /// Copies entries from `other` that are absent here.
    pub fn inherit(&mut self, other: &SequenceContext) -> &mut Self {
        self.values.merge(&other.values);
        self
    }

    /// Stored keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys()
    }
}

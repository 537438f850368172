//! # Typed Value Maps
//!
//! The shared storage behind captures, sequence contexts, reports and event
//! payloads: a string-keyed map of type-erased, reference-counted values.
//!
//! Reads are typed. Asking for a value with the wrong type is a
//! [`WardenError::TypeMismatch`], never a silent default, so a bad condition
//! cannot quietly corrupt an evidence chain.

use std::any::{type_name, Any};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{WardenError, WardenResult};

/// A type-erased, immutable, cheaply cloneable value.
#[derive(Clone)]
pub struct Value {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Value {
    /// Wraps a value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
            type_name: type_name::<T>(),
        }
    }

    /// Name of the stored type, for diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns true if the stored value is a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Borrows the stored value as a `T`, if it is one.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Returns true if both handles point at the same stored value.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn expect<T: Any>(&self, key: &str) -> WardenResult<&T> {
        self.downcast_ref::<T>().ok_or_else(|| WardenError::TypeMismatch {
            key: key.to_owned(),
            stored: self.type_name,
            requested: type_name::<T>(),
        })
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value<{}>", self.type_name)
    }
}

/// A string key that carries the type of the value stored under it.
pub struct TypedKey<T> {
    name: Cow<'static, str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedKey<T> {
    /// Creates a key from a static name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            _marker: PhantomData,
        }
    }

    /// Creates a key from an owned name.
    #[must_use]
    pub fn owned(name: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            _marker: PhantomData,
        }
    }

    /// The key name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for TypedKey<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TypedKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedKey<{}>({})", type_name::<T>(), self.name)
    }
}

/// Ordered map from string keys to [`Value`]s.
///
/// Equality compares keys and value identity: two maps are equal when every
/// key points at the same stored value. Cloning a map or merging one map into
/// another shares values, so equality survives both.
#[derive(Clone, Debug, Default)]
pub struct ValueMap {
    entries: BTreeMap<String, Value>,
}

impl ValueMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if a value is stored under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Stores `value`, returning the previous value under `key`.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) -> Option<Value> {
        self.entries.insert(key.into(), Value::new(value))
    }

    /// Stores an already wrapped value.
    pub fn insert_value(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    /// Stores `value` only if `key` is absent. Returns true if it was stored.
    pub fn insert_once<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) -> bool {
        match self.entries.entry(key.into()) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(Value::new(value));
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    /// Returns the raw value under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Returns the value under `key` as a `T`.
    ///
    /// # Errors
    ///
    /// [`WardenError::TypeMismatch`] if a value is present with another type.
    pub fn get_as<T: Any>(&self, key: &str) -> WardenResult<Option<&T>> {
        self.entries.get(key).map(|v| v.expect::<T>(key)).transpose()
    }

    /// Read-modify-write of the value under `key`.
    ///
    /// `default` is used only when the key is absent, so a first write never
    /// fails. The transform is applied to the current value or the default.
    ///
    /// # Errors
    ///
    /// [`WardenError::TypeMismatch`] if a value is present with another type.
    pub fn transform<T, F>(&mut self, key: &str, default: T, f: F) -> WardenResult<()>
    where
        T: Any + Send + Sync + Clone,
        F: FnOnce(T) -> T,
    {
        let current = match self.entries.get(key) {
            Some(value) => value.expect::<T>(key)?.clone(),
            None => default,
        };
        self.entries.insert(key.to_owned(), Value::new(f(current)));
        Ok(())
    }

    /// Removes and returns the value under `key`.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Copies every entry of `other` whose key is absent here.
    ///
    /// Left-biased: on collision the entry already in `self` wins.
    pub fn merge(&mut self, other: &ValueMap) {
        for (key, value) in &other.entries {
            self.entries
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

impl PartialEq for ValueMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((ka, va), (kb, vb))| ka == kb && va.ptr_eq(vb))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_read_rejects_wrong_type() {
        let mut map = ValueMap::new();
        map.insert("speed", 4.5_f32);

        assert_eq!(map.get_as::<f32>("speed").unwrap(), Some(&4.5));
        assert_eq!(map.get_as::<f32>("missing").unwrap(), None);

        let err = map.get_as::<u32>("speed").unwrap_err();
        assert!(matches!(err, WardenError::TypeMismatch { stored: "f32", .. }));
    }

    #[test]
    fn test_transform_uses_default_once() {
        let mut map = ValueMap::new();
        map.transform("hits", 0_u32, |n| n + 1).unwrap();
        map.transform("hits", 100_u32, |n| n + 1).unwrap();
        assert_eq!(map.get_as::<u32>("hits").unwrap(), Some(&2));

        map.insert("label", String::from("x"));
        assert!(map.transform("label", 0_u32, |n| n).is_err());
    }

    #[test]
    fn test_insert_once() {
        let mut map = ValueMap::new();
        assert!(map.insert_once("k", 1_i32));
        assert!(!map.insert_once("k", 2_i32));
        assert_eq!(map.get_as::<i32>("k").unwrap(), Some(&1));
    }

    #[test]
    fn test_typed_key_name() {
        const KEY: TypedKey<f64> = TypedKey::new("velocity");
        assert_eq!(KEY.name(), "velocity");
        assert_eq!(TypedKey::<f64>::owned("velocity").name(), KEY.name());
    }
}

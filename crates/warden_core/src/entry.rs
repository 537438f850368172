//! # Entity Entries
//!
//! An [`EntityEntry`] is how the core refers to a player or other subject.
//! It never owns the entity: it carries an id plus a lookup capability
//! provided by the host, and the lookup is allowed to fail once the entity
//! has left the server.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Unique identifier of an entity on the host server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// Host-side entity lookup.
///
/// Implemented by the game runtime. Returning `None` means the entity is
/// gone; the core treats that as a normal outcome and cancels whatever
/// depended on it.
pub trait EntityResolver: Send + Sync {
    /// Resolves the entity behind `id`, if it still exists.
    fn resolve(&self, id: EntityId) -> Option<Arc<dyn Any + Send + Sync>>;
}

/// Resolver that considers every entity present but exposes no data.
///
/// Useful for offline tooling and tests that only care about ids.
#[derive(Clone, Copy, Debug, Default)]
pub struct DetachedResolver;

impl EntityResolver for DetachedResolver {
    fn resolve(&self, id: EntityId) -> Option<Arc<dyn Any + Send + Sync>> {
        Some(Arc::new(id))
    }
}

/// Possibly-failing handle to a game entity.
#[derive(Clone)]
pub struct EntityEntry {
    id: EntityId,
    resolver: Arc<dyn EntityResolver>,
}

impl EntityEntry {
    /// Creates an entry resolved through `resolver`.
    pub fn new(id: EntityId, resolver: Arc<dyn EntityResolver>) -> Self {
        Self { id, resolver }
    }

    /// Creates an entry backed by [`DetachedResolver`].
    #[must_use]
    pub fn detached(id: EntityId) -> Self {
        Self::new(id, Arc::new(DetachedResolver))
    }

    /// The entity id.
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    /// Returns true if the host can still resolve this entity.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.resolver.resolve(self.id).is_some()
    }

    /// Typed lookup of the entity.
    ///
    /// `None` if the entity is gone or is not an `E`.
    #[must_use]
    pub fn entity<E: Any + Send + Sync>(&self) -> Option<Arc<E>> {
        self.resolver
            .resolve(self.id)
            .and_then(|entity| entity.downcast::<E>().ok())
    }
}

impl PartialEq for EntityEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EntityEntry {}

impl Hash for EntityEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EntityEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityEntry").field(&self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use std::collections::HashMap;

    struct Player {
        name: &'static str,
    }

    #[derive(Default)]
    struct Roster {
        players: RwLock<HashMap<EntityId, Arc<Player>>>,
    }

    impl EntityResolver for Roster {
        fn resolve(&self, id: EntityId) -> Option<Arc<dyn Any + Send + Sync>> {
            self.players
                .read()
                .get(&id)
                .map(|p| Arc::clone(p) as Arc<dyn Any + Send + Sync>)
        }
    }

    #[test]
    fn test_entry_resolution_can_fail() {
        let roster = Arc::new(Roster::default());
        roster
            .players
            .write()
            .insert(EntityId(7), Arc::new(Player { name: "steve" }));

        let entry = EntityEntry::new(EntityId(7), roster.clone());
        assert!(entry.is_present());
        assert_eq!(entry.entity::<Player>().map(|p| p.name), Some("steve"));
        assert!(entry.entity::<String>().is_none());

        roster.players.write().remove(&EntityId(7));
        assert!(!entry.is_present());
        assert!(entry.entity::<Player>().is_none());
    }

    #[test]
    fn test_entry_identity_is_id() {
        assert_eq!(EntityEntry::detached(EntityId(1)), EntityEntry::detached(EntityId(1)));
        assert_ne!(EntityEntry::detached(EntityId(1)), EntityEntry::detached(EntityId(2)));
    }
}

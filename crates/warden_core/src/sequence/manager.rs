//! # Sequence Manager
//!
//! Owns every live sequence, grouped per entity, and routes host events to
//! them.
//!
//! ## Dispatch
//!
//! For one `(entity, event)`:
//!
//! 1. If the event kind is avoided for the entity, nothing happens.
//! 2. Running sequences whose current action matches the kind are applied,
//!    oldest first. The others only get their expiry checked.
//! 3. Unless the kind is closed for the entity, every blueprint triggered by
//!    the kind that had no running instance before step 2 gets a fresh
//!    instance, which is immediately applied.
//!
//! A dispatch filter selects blueprints. Blueprints it rejects are never
//! instantiated, and their running instances are left untouched.
//!
//! ## Ticks
//!
//! [`SequenceManager::tick`] runs the scheduled capture updates of every
//! running sequence, independent of host events.
//!
//! ## Locking
//!
//! The entity map sits behind a `RwLock`; each entity's state behind its
//! own `Mutex`. Dispatch for different entities runs in parallel, dispatch
//! for one entity is serialized.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::config::ManagerConfig;
use crate::entry::{EntityEntry, EntityId};
use crate::error::{WardenError, WardenResult};
use crate::event::{Event, EventKind};
use crate::lifecycle::{LifecycleBus, LifecycleEvent};

use super::{Sequence, SequenceBlueprint, SequenceState};

/// Handle returned by [`SequenceManager::avoid_observer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AvoidTicket(u64);

/// Handle returned by [`SequenceManager::close_for`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(Uuid);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block:{}", self.0)
    }
}

/// Read-only view of one live sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequenceSnapshot {
    /// Instance id.
    pub id: u64,
    /// Blueprint id.
    pub blueprint: Arc<str>,
    /// Current state.
    pub state: SequenceState,
    /// Index of the current action.
    pub cursor: usize,
    /// Trigger kind of the blueprint.
    pub trigger: EventKind,
}

/// Per-entity state.
#[derive(Default)]
struct EntitySequences {
    live: Vec<Sequence>,
    avoided: HashMap<EventKind, HashSet<AvoidTicket>>,
    closed: HashMap<EventKind, HashSet<BlockId>>,
}

impl EntitySequences {
    fn is_avoided(&self, kind: &EventKind) -> bool {
        self.avoided.contains_key(kind)
    }

    fn is_closed(&self, kind: &EventKind) -> bool {
        self.closed.contains_key(kind)
    }

    fn is_idle(&self) -> bool {
        self.live.is_empty() && self.avoided.is_empty() && self.closed.is_empty()
    }

    /// Cancels and removes every sequence triggered by `kind`.
    fn remove_triggered(&mut self, kind: &EventKind, bus: &LifecycleBus) -> usize {
        let before = self.live.len();
        self.live.retain_mut(|sequence| {
            if sequence.blueprint().trigger() != kind {
                return true;
            }
            sequence.cancel(bus);
            false
        });
        before - self.live.len()
    }

    /// Drops terminated sequences; with `force`, cancels and drops all.
    fn clean(&mut self, force: bool, bus: &LifecycleBus) -> usize {
        let before = self.live.len();
        if force {
            for sequence in &mut self.live {
                sequence.cancel(bus);
            }
            self.live.clear();
        } else {
            self.live.retain(Sequence::is_running);
        }
        before - self.live.len()
    }
}

type Slot = Arc<Mutex<EntitySequences>>;

/// Registry of blueprints and owner of every live sequence.
pub struct SequenceManager {
    config: ManagerConfig,
    blueprints: RwLock<Vec<Arc<SequenceBlueprint>>>,
    entities: RwLock<HashMap<EntityId, Slot>>,
    bus: LifecycleBus,
    next_ticket: AtomicU64,
}

impl SequenceManager {
    /// Creates an empty manager publishing on `bus`.
    #[must_use]
    pub fn new(config: ManagerConfig, bus: LifecycleBus) -> Self {
        Self {
            config,
            blueprints: RwLock::new(Vec::new()),
            entities: RwLock::new(HashMap::new()),
            bus,
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Registers a blueprint. Blueprints are instantiated in registration order.
    ///
    /// # Errors
    ///
    /// `DuplicateId` if a blueprint with the same id is registered.
    pub fn register(&self, blueprint: Arc<SequenceBlueprint>) -> WardenResult<()> {
        let mut blueprints = self.blueprints.write();
        if blueprints.iter().any(|b| b.id() == blueprint.id()) {
            return Err(WardenError::DuplicateId {
                kind: "blueprint",
                id: blueprint.id().to_string(),
            });
        }
        tracing::debug!("registered blueprint {} (trigger {})", blueprint.id(), blueprint.trigger());
        blueprints.push(blueprint);
        Ok(())
    }

    /// Unregisters a blueprint. Live instances keep running.
    pub fn unregister(&self, id: &str) -> bool {
        let mut blueprints = self.blueprints.write();
        let before = blueprints.len();
        blueprints.retain(|b| b.id() != id);
        blueprints.len() != before
    }

    /// Registered blueprints in registration order.
    #[must_use]
    pub fn blueprints(&self) -> Vec<Arc<SequenceBlueprint>> {
        self.blueprints.read().clone()
    }

    /// The bus lifecycle events are published on.
    #[must_use]
    pub const fn bus(&self) -> &LifecycleBus {
        &self.bus
    }

    /// Manager settings.
    #[must_use]
    pub const fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn slot(&self, id: EntityId) -> Slot {
        if let Some(slot) = self.entities.read().get(&id) {
            return Arc::clone(slot);
        }
        Arc::clone(self.entities.write().entry(id).or_default())
    }

    fn existing_slot(&self, id: EntityId) -> Option<Slot> {
        self.entities.read().get(&id).cloned()
    }

    /// Dispatches `event` for `entry`. Returns how many sequences consumed it.
    pub fn invoke(&self, entry: &EntityEntry, event: &Event) -> usize {
        self.invoke_for(entry, event, |_| true)
    }

    /// Like [`invoke`](Self::invoke), restricted to blueprints accepted by
    /// `filter`.
    pub fn invoke_for<F>(&self, entry: &EntityEntry, event: &Event, filter: F) -> usize
    where
        F: Fn(&SequenceBlueprint) -> bool,
    {
        let slot = self.slot(entry.id());
        let mut state = slot.lock();
        let kind = event.kind();

        if state.is_avoided(kind) {
            tracing::trace!("{} avoided for {}", kind, entry.id());
            return 0;
        }

        let already_running: HashSet<Arc<str>> = state
            .live
            .iter()
            .filter(|s| s.is_running())
            .map(|s| s.blueprint().id_arc())
            .collect();

        let mut consumed = 0;
        for sequence in &mut state.live {
            if !sequence.is_running() || !filter(&**sequence.blueprint()) {
                continue;
            }
            let current = sequence.current_action().is_some_and(|a| a.matches(kind));
            if !current {
                sequence.poll_expiry(event.timestamp(), &self.bus);
                continue;
            }
            match sequence.apply(event, &self.bus) {
                Ok(true) => consumed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("dispatch to sequence {} failed: {}", sequence.id(), e),
            }
        }

        if state.is_closed(kind) {
            return consumed;
        }

        let blueprints = self.blueprints.read().clone();
        for blueprint in blueprints.iter().filter(|b| b.trigger() == kind) {
            if already_running.contains(blueprint.id()) || !filter(&**blueprint) {
                continue;
            }
            if state.live.len() >= self.config.max_sequences_per_entity {
                state.live.retain(Sequence::is_running);
                if state.live.len() >= self.config.max_sequences_per_entity {
                    tracing::warn!(
                        "{} has {} live sequences, not starting {}",
                        entry.id(),
                        state.live.len(),
                        blueprint.id()
                    );
                    break;
                }
            }

            let mut sequence = blueprint.create(entry.clone(), event.origin(), event.timestamp());
            self.bus.publish(LifecycleEvent::SequenceStart {
                entry: entry.clone(),
                sequence: sequence.id(),
                blueprint: blueprint.id_arc(),
                summary: sequence.summary().clone(),
            });
            tracing::debug!("started sequence {} ({}) for {}", sequence.id(), blueprint.id(), entry.id());

            match sequence.apply(event, &self.bus) {
                Ok(true) => consumed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("dispatch to sequence {} failed: {}", sequence.id(), e),
            }
            state.live.push(sequence);
        }
        consumed
    }

    /// Suppresses dispatch and creation for `kind` on `entry` until every
    /// ticket is returned through [`unavoid_observer`](Self::unavoid_observer).
    pub fn avoid_observer(&self, entry: &EntityEntry, kind: EventKind) -> AvoidTicket {
        let ticket = AvoidTicket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        let slot = self.slot(entry.id());
        slot.lock().avoided.entry(kind).or_default().insert(ticket);
        ticket
    }

    /// Returns an avoid ticket. Returns false if it was not outstanding.
    pub fn unavoid_observer(&self, entry: &EntityEntry, kind: &EventKind, ticket: AvoidTicket) -> bool {
        let Some(slot) = self.existing_slot(entry.id()) else {
            return false;
        };
        let mut state = slot.lock();
        let Some(tickets) = state.avoided.get_mut(kind) else {
            return false;
        };
        let removed = tickets.remove(&ticket);
        if tickets.is_empty() {
            state.avoided.remove(kind);
        }
        removed
    }

    /// Returns true if `kind` is avoided for `entry`.
    #[must_use]
    pub fn is_avoided(&self, entry: &EntityEntry, kind: &EventKind) -> bool {
        self.existing_slot(entry.id()).is_some_and(|slot| slot.lock().is_avoided(kind))
    }

    /// Cancels and removes every sequence of `entry` triggered by `kind`.
    pub fn remove_for(&self, entry: &EntityEntry, kind: &EventKind) -> usize {
        self.existing_slot(entry.id())
            .map_or(0, |slot| slot.lock().remove_triggered(kind, &self.bus))
    }

    /// Blocks creation of sequences triggered by `kind` on `entry` until
    /// [`open_for`](Self::open_for) is called with the returned id. With
    /// `remove_existing`, live sequences triggered by `kind` are cancelled.
    pub fn close_for(&self, entry: &EntityEntry, kind: EventKind, remove_existing: bool) -> BlockId {
        let block = BlockId(Uuid::new_v4());
        let slot = self.slot(entry.id());
        let mut state = slot.lock();
        if remove_existing {
            let removed = state.remove_triggered(&kind, &self.bus);
            tracing::debug!("closed {} for {} ({} removed)", kind, entry.id(), removed);
        }
        state.closed.entry(kind).or_default().insert(block);
        block
    }

    /// Lifts one block. Returns false if `block` was not active.
    pub fn open_for(&self, block: BlockId, entry: &EntityEntry, kind: &EventKind) -> bool {
        let Some(slot) = self.existing_slot(entry.id()) else {
            return false;
        };
        let mut state = slot.lock();
        let Some(blocks) = state.closed.get_mut(kind) else {
            return false;
        };
        let removed = blocks.remove(&block);
        if blocks.is_empty() {
            state.closed.remove(kind);
        }
        removed
    }

    /// Returns true if creation for `kind` is blocked on `entry`.
    #[must_use]
    pub fn is_closed(&self, entry: &EntityEntry, kind: &EventKind) -> bool {
        self.existing_slot(entry.id()).is_some_and(|slot| slot.lock().is_closed(kind))
    }

    /// Drops terminated sequences of every entity, or with `force` cancels
    /// and drops all of them. Entities left with nothing are forgotten.
    /// Returns the number of sequences dropped.
    pub fn clean(&self, force: bool) -> usize {
        let slots: Vec<Slot> = self.entities.read().values().cloned().collect();
        let removed: usize = slots.iter().map(|slot| slot.lock().clean(force, &self.bus)).sum();
        drop(slots);
        self.forget_idle();
        removed
    }

    /// [`clean`](Self::clean) for one entity.
    pub fn clean_entry(&self, entry: &EntityEntry, force: bool) -> usize {
        let Some(slot) = self.existing_slot(entry.id()) else {
            return 0;
        };
        let removed = slot.lock().clean(force, &self.bus);
        drop(slot);
        self.forget_idle();
        removed
    }

    /// Expires timed-out sequences as of `now`, then drops terminated ones.
    /// Returns the number of sequences that expired.
    pub fn sweep(&self, now: u64) -> usize {
        let slots: Vec<Slot> = self.entities.read().values().cloned().collect();
        let mut expired = 0;
        for slot in &slots {
            let mut state = slot.lock();
            for sequence in &mut state.live {
                if sequence.poll_expiry(now, &self.bus) {
                    expired += 1;
                }
            }
        }
        drop(slots);
        let removed = self.clean(false);
        if expired > 0 || removed > 0 {
            tracing::debug!("sweep at {}: {} expired, {} removed", now, expired, removed);
        }
        expired
    }

    /// Runs the scheduled capture update of every running sequence whose
    /// blueprint `filter` accepts. Returns how many sequences were ticked.
    pub fn tick<F>(&self, now: u64, filter: F) -> usize
    where
        F: Fn(&SequenceBlueprint) -> bool,
    {
        let slots: Vec<Slot> = self.entities.read().values().cloned().collect();
        let mut ticked = 0;
        for slot in &slots {
            let mut state = slot.lock();
            for sequence in &mut state.live {
                if sequence.is_running() && filter(&**sequence.blueprint()) && sequence.tick(now, &self.bus) {
                    ticked += 1;
                }
            }
        }
        ticked
    }

    fn forget_idle(&self) {
        let mut entities = self.entities.write();
        // A slot cloned by another thread is in use; leave it for the next pass.
        entities.retain(|_, slot| Arc::strong_count(slot) > 1 || !slot.lock().is_idle());
    }

    /// Snapshots of `entry`'s live sequences, oldest first.
    #[must_use]
    pub fn snapshot(&self, entry: &EntityEntry) -> Vec<SequenceSnapshot> {
        self.existing_slot(entry.id()).map_or_else(Vec::new, |slot| {
            slot.lock()
                .live
                .iter()
                .map(|s| SequenceSnapshot {
                    id: s.id(),
                    blueprint: s.blueprint().id_arc(),
                    state: s.state(),
                    cursor: s.cursor(),
                    trigger: s.blueprint().trigger().clone(),
                })
                .collect()
        })
    }

    /// Number of running sequences of `entry`.
    #[must_use]
    pub fn running_count(&self, entry: &EntityEntry) -> usize {
        self.existing_slot(entry.id())
            .map_or(0, |slot| slot.lock().live.iter().filter(|s| s.is_running()).count())
    }

    /// Number of entities with any tracked state.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.read().len()
    }
}

impl fmt::Debug for SequenceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceManager")
            .field("config", &self.config)
            .field("blueprints", &self.blueprints.read().len())
            .field("entities", &self.entities.read().len())
            .finish_non_exhaustive()
    }
}

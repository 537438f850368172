//! # Lifecycle Events
//!
//! Observable lifecycle of sequences and detection chains, published on a
//! [`LifecycleBus`] for the judgement pipeline, logging and metrics.
//!
//! ## Guarantees
//!
//! - FINISHED and EXPIRED sequences publish exactly one `SequenceResult`
//!   followed by exactly one `SequenceStop`.
//! - CANCELLED sequences publish only a `SequenceStop`.
//!
//! Publishing never blocks the tick thread. Once `capacity` events are
//! pending, `SequenceStart` and `DetectionChain` events are shed and counted.
//! `SequenceResult` and `SequenceStop` are always delivered: each running
//! sequence publishes them at most once, and running sequences are capped
//! per entity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::entry::EntityEntry;
use crate::report::Summary;
use crate::sequence::SequenceState;
use crate::stage::StageKind;

/// Result carried by a `SequenceResult` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// Every action ran and every predicate held.
    Succeed,
    /// The sequence expired, or finished with at least one failed predicate.
    Fail,
}

/// Phase of a detection chain run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainPhase {
    /// The stage cycle is about to run.
    Start,
    /// The cycle moved on to another stage model.
    PhaseChange {
        /// Model being entered.
        to: StageKind,
    },
    /// The cycle completed its pass.
    End,
}

/// Event published by the core.
#[derive(Clone, Debug)]
pub enum LifecycleEvent {
    /// A sequence was created for an entity.
    SequenceStart {
        /// Subject entity.
        entry: EntityEntry,
        /// Sequence instance id.
        sequence: u64,
        /// Blueprint id.
        blueprint: Arc<str>,
        /// Initial summary.
        summary: Summary,
    },
    /// A sequence reached FINISHED or EXPIRED.
    SequenceResult {
        /// Succeed or fail.
        outcome: SequenceOutcome,
        /// Subject entity.
        entry: EntityEntry,
        /// Sequence instance id.
        sequence: u64,
        /// Final summary.
        summary: Summary,
    },
    /// A sequence stopped, for any reason.
    SequenceStop {
        /// Subject entity.
        entry: EntityEntry,
        /// Sequence instance id.
        sequence: u64,
        /// Terminal state.
        state: SequenceState,
        /// Summary at the time it stopped.
        summary: Summary,
    },
    /// A detection chain progressed.
    DetectionChain {
        /// Which phase.
        phase: ChainPhase,
        /// Subject entity.
        entry: EntityEntry,
        /// Summary at this phase.
        summary: Summary,
    },
}

impl LifecycleEvent {
    /// Sequence id for sequence events.
    #[must_use]
    pub const fn sequence(&self) -> Option<u64> {
        match self {
            Self::SequenceStart { sequence, .. }
            | Self::SequenceResult { sequence, .. }
            | Self::SequenceStop { sequence, .. } => Some(*sequence),
            Self::DetectionChain { .. } => None,
        }
    }

    /// Returns true for the events a sequence publishes when it terminates.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::SequenceResult { .. } | Self::SequenceStop { .. })
    }
}

/// Channel carrying [`LifecycleEvent`]s, shedding informational events
/// under pressure.
#[derive(Clone)]
pub struct LifecycleBus {
    sender: Sender<LifecycleEvent>,
    receiver: Receiver<LifecycleEvent>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl LifecycleBus {
    /// Creates a bus that sheds informational events once `capacity` events
    /// are pending.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            capacity,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publishes an event without blocking.
    pub fn publish(&self, event: LifecycleEvent) {
        if !event.is_terminal() && self.receiver.len() >= self.capacity {
            self.shed(&event);
            return;
        }
        // The bus owns a receiver, so the channel never disconnects.
        if let Err(e) = self.sender.send(event) {
            self.shed(&e.into_inner());
        }
    }

    fn shed(&self, event: &LifecycleEvent) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(
            "lifecycle bus over capacity, shed event for sequence {:?} ({} shed total)",
            event.sequence(),
            total
        );
    }

    /// Takes every pending event.
    #[must_use]
    pub fn drain(&self) -> Vec<LifecycleEvent> {
        self.receiver.try_iter().collect()
    }

    /// Number of pending events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Returns true if no events are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Informational events shed because the bus was over capacity.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// A receiver for another thread.
    #[must_use]
    pub fn receiver(&self) -> Receiver<LifecycleEvent> {
        self.receiver.clone()
    }
}

impl std::fmt::Debug for LifecycleBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleBus")
            .field("pending", &self.len())
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl Default for LifecycleBus {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntityId;
    use crate::origin::Origin;

    fn stop(sequence: u64) -> LifecycleEvent {
        LifecycleEvent::SequenceStop {
            entry: EntityEntry::detached(EntityId(1)),
            sequence,
            state: SequenceState::Cancelled,
            summary: Summary::new("d".into(), "c".into(), EntityId(1), Origin::default()),
        }
    }

    fn start(sequence: u64) -> LifecycleEvent {
        LifecycleEvent::SequenceStart {
            entry: EntityEntry::detached(EntityId(1)),
            sequence,
            blueprint: "b".into(),
            summary: Summary::new("d".into(), "c".into(), EntityId(1), Origin::default()),
        }
    }

    #[test]
    fn test_full_bus_sheds_only_informational_events() {
        let bus = LifecycleBus::new(2);
        bus.publish(start(1));
        bus.publish(stop(1));
        bus.publish(start(2));
        bus.publish(stop(2));
        bus.publish(stop(3));

        assert_eq!(bus.len(), 4);
        assert_eq!(bus.dropped(), 1);

        let events = bus.drain();
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 3);
        let ids: Vec<_> = events.iter().filter_map(LifecycleEvent::sequence).collect();
        assert_eq!(ids, vec![1, 1, 2, 3]);
        assert!(bus.is_empty());

        // Draining frees capacity again.
        bus.publish(start(4));
        assert_eq!(bus.dropped(), 1);
    }
}

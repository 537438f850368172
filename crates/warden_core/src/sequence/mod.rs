//! # Sequences
//!
//! A sequence is a running instance of a [`SequenceBlueprint`] for one
//! entity: a cursor over the blueprint's actions, the evidence gathered so
//! far, and the captures feeding it.
//!
//! ## State Machine
//!
//! ```text
//!            ┌──────────── last action fired ─────────▶ FINISHED
//!            │
//!  RUNNING ──┼──────────── current action timed out ──▶ EXPIRED
//!            │
//!            └──── entity gone / condition error / ───▶ CANCELLED
//!                  cancel_on_fail / external cancel
//! ```
//!
//! Terminal states are final. Every transition into one publishes its
//! lifecycle events exactly once.

mod action;
mod blueprint;
mod manager;

pub use action::{
    Action, ActionOutcome, ActionPredicate, Condition, ConditionInput, ConditionKind,
    ConditionSupplier,
};
pub use blueprint::SequenceBlueprint;
pub use manager::{AvoidTicket, BlockId, SequenceManager, SequenceSnapshot};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::capture::{CaptureContainer, CaptureRegistry};
use crate::context::{SequenceContext, CHECK_ID, CREATED_AT, FAILED_STEPS, SEQUENCE_ID};
use crate::entry::EntityEntry;
use crate::error::{WardenError, WardenResult};
use crate::event::Event;
use crate::lifecycle::{LifecycleBus, LifecycleEvent, SequenceOutcome};
use crate::origin::{Origin, OriginValue, CHECK, DETECTION, ENTITY, SEQUENCE};
use crate::report::Summary;

static NEXT_SEQUENCE_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SequenceState {
    /// Waiting for its current action.
    Running,
    /// Every action fired.
    Finished,
    /// Stopped early.
    Cancelled,
    /// The current action timed out.
    Expired,
}

impl SequenceState {
    /// Returns true for every state but `Running`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// A running instance of a blueprint for one entity.
#[derive(Debug)]
pub struct Sequence {
    id: u64,
    blueprint: Arc<SequenceBlueprint>,
    entry: EntityEntry,
    cursor: usize,
    state: SequenceState,
    summary: Summary,
    captures: CaptureRegistry,
    context: SequenceContext,
    created_at: u64,
    last_action_time: u64,
    failed_steps: u32,
}

impl Sequence {
    pub(crate) fn new(blueprint: Arc<SequenceBlueprint>, entry: EntityEntry, origin: &Origin, now: u64) -> Self {
        let id = NEXT_SEQUENCE_ID.fetch_add(1, Ordering::Relaxed);
        let detection: Arc<str> = blueprint.detection().into();
        let check: Arc<str> = blueprint.check().into();

        // Causes already on the host event keep their names; DETECTION is
        // the cause to read when OWNER may come from the host.
        let summary_origin = origin
            .extend()
            .owner(OriginValue::Detection(Arc::clone(&detection)))
            .named(DETECTION, OriginValue::Detection(Arc::clone(&detection)))
            .named(CHECK, OriginValue::Check(Arc::clone(&check)))
            .named(SEQUENCE, OriginValue::Sequence(id))
            .named(ENTITY, OriginValue::Entity(entry.id()))
            .build();
        let summary = Summary::new(detection, Arc::clone(&check), entry.id(), summary_origin);

        let mut context = SequenceContext::new();
        context.set(&SEQUENCE_ID, id);
        context.set(&CHECK_ID, check);
        context.set(&CREATED_AT, now);
        context.set(&FAILED_STEPS, 0);

        let captures = CaptureRegistry::start(entry.clone(), blueprint.captures().to_vec());

        Self {
            id,
            blueprint,
            entry,
            cursor: 0,
            state: SequenceState::Running,
            summary,
            captures,
            context,
            created_at: now,
            last_action_time: now,
            failed_steps: 0,
        }
    }

    /// Feeds one event to the sequence.
    ///
    /// Returns true if the current action fired and the cursor advanced.
    /// Events of the wrong kind, or arriving before the action's delay, are
    /// ignored. Terminal transitions publish their lifecycle events on `bus`.
    ///
    /// # Errors
    ///
    /// `SequenceNotRunning` if the sequence already terminated.
    pub fn apply(&mut self, event: &Event, bus: &LifecycleBus) -> WardenResult<bool> {
        if self.state.is_terminal() {
            return Err(WardenError::SequenceNotRunning {
                sequence: self.id,
                state: self.state,
            });
        }
        if !self.entry.is_present() {
            tracing::debug!("sequence {} cancelled: {} is gone", self.id, self.entry.id());
            self.terminate(SequenceState::Cancelled, bus);
            return Ok(false);
        }

        let now = event.timestamp();
        let blueprint = Arc::clone(&self.blueprint);
        let action = &blueprint.actions()[self.cursor];

        if action.is_expired(self.last_action_time, now) {
            self.terminate(SequenceState::Expired, bus);
            return Ok(false);
        }
        if !action.matches(event.kind()) || action.is_delayed(self.last_action_time, now) {
            return Ok(false);
        }

        if let Err(e) = self.captures.update(event) {
            tracing::warn!("sequence {} ({}) cancelled by capture: {}", self.id, blueprint.id(), e);
            self.terminate(SequenceState::Cancelled, bus);
            return Ok(false);
        }

        let mut input = ConditionInput {
            entry: &self.entry,
            event,
            captures: self.captures.container(),
            context: &mut self.context,
            last_action_time: self.last_action_time,
        };
        let outcome = match action.fire(&mut input, self.summary.clone()) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    "sequence {} ({}) cancelled at action {}: {}",
                    self.id,
                    blueprint.id(),
                    self.cursor,
                    e
                );
                self.terminate(SequenceState::Cancelled, bus);
                return Ok(false);
            }
        };
        self.summary = outcome.summary;

        if !outcome.passed {
            self.failed_steps += 1;
            self.context.set(&FAILED_STEPS, self.failed_steps);
            if action.cancels_on_fail() {
                self.terminate(SequenceState::Cancelled, bus);
                return Ok(false);
            }
        }

        self.cursor += 1;
        // An out-of-order event never moves the window start backwards.
        self.last_action_time = self.last_action_time.max(now);
        if self.cursor >= blueprint.len() {
            self.terminate(SequenceState::Finished, bus);
        }
        Ok(true)
    }

    /// Expires the sequence if its current action timed out by `now`.
    ///
    /// Returns true if this call expired it.
    pub fn poll_expiry(&mut self, now: u64, bus: &LifecycleBus) -> bool {
        let expired = self
            .current_action()
            .is_some_and(|action| action.is_expired(self.last_action_time, now));
        if expired {
            self.terminate(SequenceState::Expired, bus);
        }
        expired
    }

    /// Runs the scheduled update of every capture as of `now`.
    ///
    /// Returns true if the captures ran. A vanished entity or a capture
    /// error cancels the sequence.
    pub fn tick(&mut self, now: u64, bus: &LifecycleBus) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        if !self.entry.is_present() {
            tracing::debug!("sequence {} cancelled: {} is gone", self.id, self.entry.id());
            self.terminate(SequenceState::Cancelled, bus);
            return false;
        }
        if let Err(e) = self.captures.tick(now) {
            tracing::warn!("sequence {} ({}) cancelled by capture tick: {}", self.id, self.blueprint.id(), e);
            self.terminate(SequenceState::Cancelled, bus);
            return false;
        }
        true
    }

    /// Cancels a running sequence. Returns false if it already terminated.
    pub fn cancel(&mut self, bus: &LifecycleBus) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.terminate(SequenceState::Cancelled, bus);
        true
    }

    /// The single place a sequence leaves `Running`.
    fn terminate(&mut self, state: SequenceState, bus: &LifecycleBus) {
        debug_assert!(state.is_terminal());
        if self.state.is_terminal() {
            return;
        }
        self.state = state;
        self.captures.stop();

        let outcome = match state {
            SequenceState::Finished if self.failed_steps == 0 => Some(SequenceOutcome::Succeed),
            SequenceState::Finished | SequenceState::Expired => Some(SequenceOutcome::Fail),
            SequenceState::Cancelled | SequenceState::Running => None,
        };
        tracing::debug!(
            "sequence {} ({}) for {} -> {:?}",
            self.id,
            self.blueprint.id(),
            self.entry.id(),
            state
        );

        if let Some(outcome) = outcome {
            bus.publish(LifecycleEvent::SequenceResult {
                outcome,
                entry: self.entry.clone(),
                sequence: self.id,
                summary: self.summary.clone(),
            });
        }
        bus.publish(LifecycleEvent::SequenceStop {
            entry: self.entry.clone(),
            sequence: self.id,
            state,
            summary: self.summary.clone(),
        });
    }

    /// Instance id, unique per process.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SequenceState {
        self.state
    }

    /// Returns true while running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.state, SequenceState::Running)
    }

    /// Returns true once every action fired.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self.state, SequenceState::Finished)
    }

    /// Returns true if stopped early.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.state, SequenceState::Cancelled)
    }

    /// Returns true if an action timed out.
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        matches!(self.state, SequenceState::Expired)
    }

    /// The blueprint this instance was created from.
    #[must_use]
    pub fn blueprint(&self) -> &Arc<SequenceBlueprint> {
        &self.blueprint
    }

    /// Subject entity.
    #[must_use]
    pub const fn entry(&self) -> &EntityEntry {
        &self.entry
    }

    /// Index of the current action.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// The action waiting for its event, while running.
    #[must_use]
    pub fn current_action(&self) -> Option<&Action> {
        if self.state.is_terminal() {
            return None;
        }
        self.blueprint.actions().get(self.cursor)
    }

    /// Evidence gathered so far.
    #[must_use]
    pub const fn summary(&self) -> &Summary {
        &self.summary
    }

    /// Captured telemetry.
    #[must_use]
    pub const fn captures(&self) -> &CaptureContainer {
        self.captures.container()
    }

    /// Bookkeeping values. Conditions write them through
    /// [`ConditionInput::context`].
    #[must_use]
    pub const fn context(&self) -> &SequenceContext {
        &self.context
    }

    /// Tick at which the instance was created.
    #[must_use]
    pub const fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Tick at which the previous action fired, or the creation tick.
    #[must_use]
    pub const fn last_action_time(&self) -> u64 {
        self.last_action_time
    }

    /// Number of actions whose predicate did not hold.
    #[must_use]
    pub const fn failed_steps(&self) -> u32 {
        self.failed_steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntityId, EntityResolver};
    use crate::error::ConditionError;
    use crate::event::EventKind;
    use crate::capture::Capture;
    use crate::origin::OWNER;
    use crate::report::ReportKind;
    use crate::value::TypedKey;
    use std::any::Any;
    use std::sync::atomic::AtomicBool;

    const SAMPLES: TypedKey<u32> = TypedKey::new("samples");

    fn blueprint(actions: Vec<Action>) -> Arc<SequenceBlueprint> {
        Arc::new(SequenceBlueprint::new("speed.seq", "speed", "speed.horizontal", actions).unwrap())
    }

    fn start(blueprint: &Arc<SequenceBlueprint>) -> Sequence {
        blueprint.create(EntityEntry::detached(EntityId(7)), &Origin::default(), 0)
    }

    #[test]
    fn test_two_actions_finish() {
        let bp = blueprint(vec![
            Action::new(EventKind::Move).on_success(|input, mut summary| {
                let report = summary.report_for(input.event);
                summary.set("first", report);
                Ok(summary)
            }),
            Action::new(EventKind::Move).with_delay(5).with_expire(20),
        ]);
        let bus = LifecycleBus::new(16);
        let mut seq = start(&bp);

        assert!(seq.apply(&Event::new(EventKind::Move, 0), &bus).unwrap());
        assert_eq!(seq.cursor(), 1);
        assert!(seq.summary().contains(&ReportKind::from("first")));

        // Too early for the delay.
        assert!(!seq.apply(&Event::new(EventKind::Move, 3), &bus).unwrap());
        assert!(seq.apply(&Event::new(EventKind::Move, 6), &bus).unwrap());
        assert!(seq.is_finished());

        let events = bus.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            LifecycleEvent::SequenceResult {
                outcome: SequenceOutcome::Succeed,
                ..
            }
        ));
        assert!(matches!(
            events[1],
            LifecycleEvent::SequenceStop {
                state: SequenceState::Finished,
                ..
            }
        ));
    }

    #[test]
    fn test_expiry_wins_over_kind_filter() {
        let bp = blueprint(vec![
            Action::new(EventKind::Move),
            Action::new(EventKind::Move).with_expire(20),
        ]);
        let bus = LifecycleBus::new(16);
        let mut seq = start(&bp);
        seq.apply(&Event::new(EventKind::Move, 0), &bus).unwrap();

        assert!(!seq.apply(&Event::new(EventKind::Rotate, 25), &bus).unwrap());
        assert!(seq.is_expired());

        let events = bus.drain();
        assert!(matches!(
            events[0],
            LifecycleEvent::SequenceResult {
                outcome: SequenceOutcome::Fail,
                ..
            }
        ));
    }

    #[test]
    fn test_wrong_kind_is_ignored() {
        let bp = blueprint(vec![Action::new(EventKind::Move), Action::new(EventKind::Attack)]);
        let bus = LifecycleBus::new(16);
        let mut seq = start(&bp);
        seq.apply(&Event::new(EventKind::Move, 0), &bus).unwrap();

        assert!(!seq.apply(&Event::new(EventKind::Rotate, 1), &bus).unwrap());
        assert!(seq.is_running());
        assert_eq!(seq.cursor(), 1);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_terminated_sequence_rejects_events() {
        let bp = blueprint(vec![Action::new(EventKind::Move)]);
        let bus = LifecycleBus::new(16);
        let mut seq = start(&bp);
        seq.apply(&Event::new(EventKind::Move, 0), &bus).unwrap();
        assert!(seq.is_finished());
        let published = bus.drain().len();

        let err = seq.apply(&Event::new(EventKind::Move, 1), &bus).unwrap_err();
        assert!(matches!(err, WardenError::SequenceNotRunning { .. }));
        assert!(!seq.cancel(&bus));
        assert!(!seq.poll_expiry(1_000, &bus));
        assert_eq!(published, 2);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_failed_predicate_marks_fail() {
        let bp = blueprint(vec![Action::new(EventKind::Move).when(|_, _| false)]);
        let bus = LifecycleBus::new(16);
        let mut seq = start(&bp);
        assert!(seq.apply(&Event::new(EventKind::Move, 0), &bus).unwrap());
        assert!(seq.is_finished());
        assert_eq!(seq.failed_steps(), 1);
        assert_eq!(seq.context().get(&FAILED_STEPS).unwrap(), Some(&1));
        assert!(matches!(
            bus.drain()[0],
            LifecycleEvent::SequenceResult {
                outcome: SequenceOutcome::Fail,
                ..
            }
        ));
    }

    #[test]
    fn test_cancel_on_fail_publishes_only_stop() {
        let bp = blueprint(vec![
            Action::new(EventKind::Move).when(|_, _| false).cancel_on_fail(),
            Action::new(EventKind::Move),
        ]);
        let bus = LifecycleBus::new(16);
        let mut seq = start(&bp);
        assert!(!seq.apply(&Event::new(EventKind::Move, 0), &bus).unwrap());
        assert!(seq.is_cancelled());

        let events = bus.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            LifecycleEvent::SequenceStop {
                state: SequenceState::Cancelled,
                ..
            }
        ));
    }

    #[test]
    fn test_condition_error_cancels_and_keeps_summary() {
        let bp = blueprint(vec![
            Action::new(EventKind::Move).on_success(|input, mut summary| {
                let report = summary.report_for(input.event);
                summary.set("kept", report);
                Ok(summary)
            }),
            Action::new(EventKind::Move).on_normal(|_, _| Err(ConditionError::Other("bad packet".into()))),
        ]);
        let bus = LifecycleBus::new(16);
        let mut seq = start(&bp);
        seq.apply(&Event::new(EventKind::Move, 0), &bus).unwrap();
        seq.apply(&Event::new(EventKind::Move, 1), &bus).unwrap();

        assert!(seq.is_cancelled());
        assert!(seq.summary().contains(&ReportKind::from("kept")));
    }

    struct Vanishing(AtomicBool);

    impl EntityResolver for Vanishing {
        fn resolve(&self, _id: EntityId) -> Option<Arc<dyn Any + Send + Sync>> {
            if self.0.load(Ordering::Relaxed) {
                Some(Arc::new(()))
            } else {
                None
            }
        }
    }

    #[test]
    fn test_missing_entity_cancels() {
        let resolver = Arc::new(Vanishing(AtomicBool::new(true)));
        let entry = EntityEntry::new(EntityId(3), resolver.clone());
        let bp = blueprint(vec![Action::new(EventKind::Move), Action::new(EventKind::Move)]);
        let bus = LifecycleBus::new(16);
        let mut seq = bp.create(entry, &Origin::default(), 0);

        assert!(seq.apply(&Event::new(EventKind::Move, 0), &bus).unwrap());
        resolver.0.store(false, Ordering::Relaxed);
        assert!(!seq.apply(&Event::new(EventKind::Move, 1), &bus).unwrap());
        assert!(seq.is_cancelled());
    }

    #[test]
    fn test_poll_expiry() {
        let bp = blueprint(vec![Action::new(EventKind::Move).with_expire(10)]);
        let bus = LifecycleBus::new(16);
        let mut seq = start(&bp);

        assert!(!seq.poll_expiry(10, &bus));
        assert!(seq.poll_expiry(11, &bus));
        assert!(seq.is_expired());
        assert!(!seq.poll_expiry(12, &bus));
        assert_eq!(bus.drain().len(), 2);
    }

    #[test]
    fn test_summary_origin_names_sequence() {
        let bp = blueprint(vec![Action::new(EventKind::Move)]);
        let seq = start(&bp);
        let origin = seq.summary().origin();
        assert_eq!(origin.get(SEQUENCE), Some(&OriginValue::Sequence(seq.id())));
        assert_eq!(origin.get(ENTITY), Some(&OriginValue::Entity(EntityId(7))));
        assert_eq!(seq.context().get(&SEQUENCE_ID).unwrap(), Some(&seq.id()));
    }

    #[test]
    fn test_summary_origin_keeps_detection_under_host_owner() {
        let host = Origin::builder()
            .source(OriginValue::Entity(EntityId(7)))
            .owner(OriginValue::Text("anticheat-plugin".into()))
            .build();
        let bp = blueprint(vec![Action::new(EventKind::Move)]);
        let seq = bp.create(EntityEntry::detached(EntityId(7)), &host, 0);

        let origin = seq.summary().origin();
        assert_eq!(origin.get(OWNER), Some(&OriginValue::Text("anticheat-plugin".into())));
        assert_eq!(origin.get(DETECTION), Some(&OriginValue::Detection("speed".into())));
        assert_eq!(origin.get(CHECK), Some(&OriginValue::Check("speed.horizontal".into())));
    }

    #[test]
    fn test_context_carries_values_between_actions() {
        let bp = blueprint(vec![
            Action::new(EventKind::Move).on_normal(|input, summary| {
                input.context.set(&SAMPLES, 1);
                Ok(summary)
            }),
            Action::new(EventKind::Move)
                .on_normal(|input, summary| {
                    input.context.transform(&SAMPLES, 0, |n| n + 1)?;
                    Ok(summary)
                })
                .when(|input, _| input.context.get(&SAMPLES).ok().flatten() == Some(&2)),
        ]);
        let bus = LifecycleBus::new(16);
        let mut seq = start(&bp);

        assert!(seq.apply(&Event::new(EventKind::Move, 0), &bus).unwrap());
        assert_eq!(seq.context().get(&SAMPLES).unwrap(), Some(&1));
        assert!(seq.apply(&Event::new(EventKind::Move, 1), &bus).unwrap());
        assert!(seq.is_finished());
        assert_eq!(seq.failed_steps(), 0);
        assert_eq!(seq.context().get(&SAMPLES).unwrap(), Some(&2));
    }

    #[test]
    fn test_out_of_order_event_keeps_window_start() {
        let bp = blueprint(vec![
            Action::new(EventKind::Move),
            Action::new(EventKind::Move),
            Action::new(EventKind::Move).with_delay(5),
        ]);
        let bus = LifecycleBus::new(16);
        let mut seq = start(&bp);

        assert!(seq.apply(&Event::new(EventKind::Move, 10), &bus).unwrap());
        // A late packet stamped before the previous action.
        assert!(seq.apply(&Event::new(EventKind::Move, 4), &bus).unwrap());
        assert_eq!(seq.last_action_time(), 10);

        assert!(!seq.apply(&Event::new(EventKind::Move, 12), &bus).unwrap());
        assert!(seq.apply(&Event::new(EventKind::Move, 15), &bus).unwrap());
        assert!(seq.is_finished());
    }

    struct Sampler {
        fail_after: u64,
    }

    impl Capture for Sampler {
        fn id(&self) -> &str {
            "sampler"
        }

        fn update(&self, _entry: &EntityEntry, _event: &Event, _container: &mut CaptureContainer) -> Result<(), ConditionError> {
            Ok(())
        }

        fn tick(&self, _entry: &EntityEntry, now: u64, container: &mut CaptureContainer) -> Result<(), ConditionError> {
            if now > self.fail_after {
                return Err(ConditionError::Other("sensor lost".into()));
            }
            container.put("sampled_at", now);
            Ok(())
        }
    }

    #[test]
    fn test_tick_samples_and_cancels_on_capture_error() {
        let bp = Arc::new(
            SequenceBlueprint::new(
                "speed.seq",
                "speed",
                "speed.horizontal",
                vec![Action::new(EventKind::Move), Action::new(EventKind::Move)],
            )
            .unwrap()
            .with_capture(Arc::new(Sampler { fail_after: 5 })),
        );
        let bus = LifecycleBus::new(16);
        let mut seq = start(&bp);

        assert!(seq.tick(3, &bus));
        assert_eq!(seq.captures().get_as::<u64>("sampled_at").unwrap(), Some(&3));
        assert!(bus.is_empty());

        assert!(!seq.tick(6, &bus));
        assert!(seq.is_cancelled());
        assert!(!seq.tick(7, &bus));

        let events = bus.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            LifecycleEvent::SequenceStop {
                state: SequenceState::Cancelled,
                ..
            }
        ));
    }
}

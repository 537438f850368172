//! Integration tests for sequence dispatch through the manager.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use warden_core::{
    Action, Capture, CaptureContainer, ConditionError, ConditionInput, EntityEntry, EntityId, Event, EventKind, LifecycleBus, LifecycleEvent,
    ManagerConfig, Origin, ReportKind, SequenceBlueprint, SequenceManager, SequenceOutcome, SequenceState, Summary,
};

fn manager() -> SequenceManager {
    SequenceManager::new(ManagerConfig::default(), LifecycleBus::new(1024))
}

fn entry(id: u64) -> EntityEntry {
    EntityEntry::detached(EntityId(id))
}

fn set_report(kind: &'static str) -> impl Fn(&mut ConditionInput<'_>, Summary) -> Result<Summary, ConditionError> {
    move |input, mut summary| {
        let report = summary.report_for(input.event);
        summary.set(kind, report);
        Ok(summary)
    }
}

/// Action1 (delay 0, expire 20) sets R1, Action2 (delay 5, expire 0) sets R2.
fn r1_r2(id: &str) -> Arc<SequenceBlueprint> {
    Arc::new(
        SequenceBlueprint::new(
            id,
            "speed",
            "speed.horizontal",
            vec![
                Action::new(EventKind::Move).with_expire(20).on_success(set_report("R1")),
                Action::new(EventKind::Move).with_delay(5).on_success(set_report("R2")),
            ],
        )
        .unwrap(),
    )
}

fn stops(events: &[LifecycleEvent]) -> Vec<SequenceState> {
    events
        .iter()
        .filter_map(|e| match e {
            LifecycleEvent::SequenceStop { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}

fn results(events: &[LifecycleEvent]) -> Vec<(SequenceOutcome, Summary)> {
    events
        .iter()
        .filter_map(|e| match e {
            LifecycleEvent::SequenceResult { outcome, summary, .. } => Some((*outcome, summary.clone())),
            _ => None,
        })
        .collect()
}

#[test]
fn test_two_actions_finish_with_both_reports() {
    let manager = manager();
    manager.register(r1_r2("r1r2")).unwrap();
    let player = entry(1);

    assert_eq!(manager.invoke(&player, &Event::new(EventKind::Move, 0)), 1);
    assert_eq!(manager.invoke(&player, &Event::new(EventKind::Move, 6)), 1);

    let events = manager.bus().drain();
    assert!(matches!(events[0], LifecycleEvent::SequenceStart { .. }));
    assert_eq!(stops(&events), vec![SequenceState::Finished]);

    let results = results(&events);
    assert_eq!(results.len(), 1);
    let (outcome, summary) = &results[0];
    assert_eq!(*outcome, SequenceOutcome::Succeed);
    assert!(summary.contains(&ReportKind::from("R1")));
    assert!(summary.contains(&ReportKind::from("R2")));
    assert_eq!(summary.entity(), EntityId(1));
}

#[test]
fn test_unanswered_action_expires_with_empty_summary() {
    let blueprint = r1_r2("r1r2");
    let bus = LifecycleBus::new(16);
    let mut sequence = blueprint.create(entry(2), &Origin::default(), 0);

    // Action1 never saw a move; the next event of any kind expires it.
    assert!(!sequence.apply(&Event::new(EventKind::Rotate, 21), &bus).unwrap());
    assert_eq!(sequence.state(), SequenceState::Expired);
    assert!(sequence.summary().is_empty());

    let events = bus.drain();
    let results = results(&events);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, SequenceOutcome::Fail);
    assert!(results[0].1.is_empty());
    assert_eq!(stops(&events), vec![SequenceState::Expired]);
}

#[test]
fn test_early_event_is_not_consumed() {
    let manager = manager();
    manager.register(r1_r2("r1r2")).unwrap();
    let player = entry(3);

    manager.invoke(&player, &Event::new(EventKind::Move, 10));
    assert_eq!(manager.invoke(&player, &Event::new(EventKind::Move, 14)), 0);
    let snapshot = manager.snapshot(&player);
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].cursor, 1);
    assert_eq!(snapshot[0].state, SequenceState::Running);

    assert_eq!(manager.invoke(&player, &Event::new(EventKind::Move, 15)), 1);
    assert_eq!(manager.snapshot(&player)[0].state, SequenceState::Finished);
}

#[test]
fn test_terminated_sequence_is_frozen() {
    let blueprint = r1_r2("r1r2");
    let bus = LifecycleBus::new(16);
    let mut sequence = blueprint.create(entry(4), &Origin::default(), 0);
    sequence.apply(&Event::new(EventKind::Move, 0), &bus).unwrap();
    sequence.apply(&Event::new(EventKind::Move, 5), &bus).unwrap();
    assert!(sequence.is_finished());

    let before = sequence.summary().clone();
    for t in [6, 50, 500] {
        assert!(sequence.apply(&Event::new(EventKind::Move, t), &bus).is_err());
    }
    assert_eq!(sequence.state(), SequenceState::Finished);
    assert_eq!(sequence.summary().len(), before.len());
    assert_eq!(sequence.cursor(), 2);
}

#[test]
fn test_close_for_cancels_and_blocks_until_opened() {
    let manager = manager();
    manager.register(r1_r2("a")).unwrap();
    manager.register(r1_r2("b")).unwrap();
    let player = entry(5);

    manager.invoke(&player, &Event::new(EventKind::Move, 0));
    assert_eq!(manager.running_count(&player), 2);
    assert_eq!(manager.bus().drain().len(), 2);

    let block = manager.close_for(&player, EventKind::Move, true);
    assert_eq!(
        stops(&manager.bus().drain()),
        vec![SequenceState::Cancelled, SequenceState::Cancelled]
    );
    assert!(manager.snapshot(&player).is_empty());

    manager.invoke(&player, &Event::new(EventKind::Move, 1));
    assert!(manager.snapshot(&player).is_empty());
    assert!(manager.is_closed(&player, &EventKind::Move));

    assert!(manager.open_for(block, &player, &EventKind::Move));
    assert!(!manager.open_for(block, &player, &EventKind::Move));
    manager.invoke(&player, &Event::new(EventKind::Move, 2));
    assert_eq!(manager.running_count(&player), 2);
}

#[test]
fn test_close_without_removal_keeps_running_sequences() {
    let manager = manager();
    manager.register(r1_r2("a")).unwrap();
    let player = entry(6);

    manager.invoke(&player, &Event::new(EventKind::Move, 0));
    let _block = manager.close_for(&player, EventKind::Move, false);

    // The running instance still advances; no new one is created.
    assert_eq!(manager.invoke(&player, &Event::new(EventKind::Move, 5)), 1);
    manager.invoke(&player, &Event::new(EventKind::Move, 6));
    assert_eq!(manager.running_count(&player), 0);
}

#[test]
fn test_avoidance_is_reference_counted() {
    let manager = manager();
    manager.register(r1_r2("a")).unwrap();
    let player = entry(7);

    let first = manager.avoid_observer(&player, EventKind::Move);
    let second = manager.avoid_observer(&player, EventKind::Move);
    assert_ne!(first, second);

    assert_eq!(manager.invoke(&player, &Event::new(EventKind::Move, 0)), 0);
    assert!(manager.unavoid_observer(&player, &EventKind::Move, first));
    assert!(!manager.unavoid_observer(&player, &EventKind::Move, first));
    assert_eq!(manager.invoke(&player, &Event::new(EventKind::Move, 1)), 0);
    assert!(manager.snapshot(&player).is_empty());

    assert!(manager.unavoid_observer(&player, &EventKind::Move, second));
    assert!(!manager.is_avoided(&player, &EventKind::Move));
    assert_eq!(manager.invoke(&player, &Event::new(EventKind::Move, 2)), 1);
}

#[test]
fn test_failing_sequence_does_not_stop_others() {
    let manager = manager();
    let broken = SequenceBlueprint::new(
        "broken",
        "speed",
        "speed.broken",
        vec![Action::new(EventKind::Move).on_normal(|_, _| Err(ConditionError::MalformedInput("no velocity".into())))],
    )
    .unwrap();
    manager.register(Arc::new(broken)).unwrap();
    manager.register(r1_r2("healthy")).unwrap();
    let player = entry(8);

    assert_eq!(manager.invoke(&player, &Event::new(EventKind::Move, 0)), 1);
    let snapshot = manager.snapshot(&player);
    assert_eq!(snapshot[0].state, SequenceState::Cancelled);
    assert_eq!(snapshot[1].state, SequenceState::Running);
}

#[test]
fn test_remove_for_only_touches_trigger() {
    let manager = manager();
    manager.register(r1_r2("moves")).unwrap();
    let attacks = SequenceBlueprint::new(
        "attacks",
        "reach",
        "reach.distance",
        vec![Action::new(EventKind::Attack), Action::new(EventKind::Attack)],
    )
    .unwrap();
    manager.register(Arc::new(attacks)).unwrap();
    let player = entry(9);

    manager.invoke(&player, &Event::new(EventKind::Move, 0));
    manager.invoke(&player, &Event::new(EventKind::Attack, 0));
    assert_eq!(manager.remove_for(&player, &EventKind::Move), 1);

    let snapshot = manager.snapshot(&player);
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].trigger, EventKind::Attack);
}

#[test]
fn test_entities_are_driven_in_parallel() {
    let manager = Arc::new(manager());
    manager.register(r1_r2("r1r2")).unwrap();

    thread::scope(|scope| {
        for worker in 0..4_u64 {
            let manager = Arc::clone(&manager);
            scope.spawn(move || {
                for id in (worker * 100)..(worker * 100 + 50) {
                    let player = entry(id);
                    manager.invoke(&player, &Event::new(EventKind::Move, 0));
                    manager.invoke(&player, &Event::new(EventKind::Move, 5));
                }
                manager.clean(false);
            });
        }
    });

    let finished = manager
        .bus()
        .drain()
        .iter()
        .filter(|e| {
            matches!(
                e,
                LifecycleEvent::SequenceResult {
                    outcome: SequenceOutcome::Succeed,
                    ..
                }
            )
        })
        .count();
    assert_eq!(finished, 200);
    manager.clean(false);
    assert_eq!(manager.entity_count(), 0);
}

#[test]
fn test_every_result_survives_a_saturated_bus() {
    let config = ManagerConfig::default();
    let manager = SequenceManager::new(config.clone(), LifecycleBus::new(config.lifecycle_capacity));
    for i in 0..8 {
        let blueprint =
            SequenceBlueprint::new(format!("single.{i}"), "speed", "speed.single", vec![Action::new(EventKind::Move)])
                .unwrap();
        manager.register(Arc::new(blueprint)).unwrap();
    }

    for id in 0..1_000 {
        manager.invoke(&entry(id), &Event::new(EventKind::Move, 0));
    }

    let events = manager.bus().drain();
    let succeeded = results(&events)
        .iter()
        .filter(|(outcome, _)| *outcome == SequenceOutcome::Succeed)
        .count();
    assert_eq!(succeeded, 8_000);
    assert_eq!(stops(&events).len(), 8_000);

    // Only start events were shed.
    let started = events
        .iter()
        .filter(|e| matches!(e, LifecycleEvent::SequenceStart { .. }))
        .count();
    assert!(manager.bus().dropped() > 0);
    assert_eq!(started as u64 + manager.bus().dropped(), 8_000);
}

#[derive(Default)]
struct Calls {
    starts: AtomicUsize,
    ticks: AtomicUsize,
    stops: AtomicUsize,
}

struct Counting(Arc<Calls>);

impl Capture for Counting {
    fn id(&self) -> &str {
        "counting"
    }

    fn start(&self, _entry: &EntityEntry, _container: &mut CaptureContainer) {
        self.0.starts.fetch_add(1, Ordering::Relaxed);
    }

    fn update(&self, _entry: &EntityEntry, _event: &Event, _container: &mut CaptureContainer) -> Result<(), ConditionError> {
        Ok(())
    }

    fn tick(&self, _entry: &EntityEntry, now: u64, container: &mut CaptureContainer) -> Result<(), ConditionError> {
        self.0.ticks.fetch_add(1, Ordering::Relaxed);
        container.put("sampled_at", now);
        Ok(())
    }

    fn stop(&self, _entry: &EntityEntry, _container: &mut CaptureContainer) {
        self.0.stops.fetch_add(1, Ordering::Relaxed);
    }
}

fn counted(calls: &Arc<Calls>) -> Arc<SequenceBlueprint> {
    Arc::new(
        SequenceBlueprint::new(
            "counted",
            "speed",
            "speed.counted",
            vec![Action::new(EventKind::Move), Action::new(EventKind::Move).with_delay(5)],
        )
        .unwrap()
        .with_capture(Arc::new(Counting(Arc::clone(calls)))),
    )
}

#[test]
fn test_filtered_out_blueprint_is_never_instantiated() {
    let calls = Arc::new(Calls::default());
    let manager = manager();
    manager.register(counted(&calls)).unwrap();
    let player = entry(20);

    assert_eq!(manager.invoke_for(&player, &Event::new(EventKind::Move, 0), |_| false), 0);
    assert_eq!(calls.starts.load(Ordering::Relaxed), 0);
    assert_eq!(calls.stops.load(Ordering::Relaxed), 0);
    assert!(manager.snapshot(&player).is_empty());
    assert!(manager.bus().is_empty());

    assert_eq!(manager.invoke_for(&player, &Event::new(EventKind::Move, 1), |b| b.id() == "counted"), 1);
    assert_eq!(calls.starts.load(Ordering::Relaxed), 1);
}

#[test]
fn test_tick_drives_captures_of_running_sequences() {
    let calls = Arc::new(Calls::default());
    let manager = manager();
    manager.register(counted(&calls)).unwrap();
    let player = entry(21);

    manager.invoke(&player, &Event::new(EventKind::Move, 0));
    assert_eq!(manager.tick(2, |_| true), 1);
    assert_eq!(manager.tick(3, |b| b.id() != "counted"), 0);
    assert_eq!(calls.ticks.load(Ordering::Relaxed), 1);

    // Finishing stops the capture; later ticks skip the sequence.
    assert_eq!(manager.invoke(&player, &Event::new(EventKind::Move, 5)), 1);
    assert_eq!(calls.stops.load(Ordering::Relaxed), 1);
    assert_eq!(manager.tick(6, |_| true), 0);
    assert_eq!(calls.ticks.load(Ordering::Relaxed), 1);
}

#[test]
fn test_unmatched_event_expires_running_sequence() {
    let manager = manager();
    let blueprint = SequenceBlueprint::new(
        "timed",
        "speed",
        "speed.timed",
        vec![Action::new(EventKind::Move), Action::new(EventKind::Move).with_expire(10)],
    )
    .unwrap();
    manager.register(Arc::new(blueprint)).unwrap();
    let player = entry(22);

    assert_eq!(manager.invoke(&player, &Event::new(EventKind::Move, 0)), 1);
    // Inside the window the other kind is ignored.
    assert_eq!(manager.invoke(&player, &Event::new(EventKind::Rotate, 10)), 0);
    assert_eq!(manager.snapshot(&player)[0].state, SequenceState::Running);

    assert_eq!(manager.invoke(&player, &Event::new(EventKind::Rotate, 11)), 0);
    assert_eq!(manager.snapshot(&player)[0].state, SequenceState::Expired);

    let events = manager.bus().drain();
    let results = results(&events);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, SequenceOutcome::Fail);
    assert_eq!(stops(&events), vec![SequenceState::Expired]);
}

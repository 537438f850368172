//! # WARDEN Simulation
//!
//! Drives synthetic players through a configured WARDEN instance:
//! - honest players walk at normal speed
//! - a seeded fraction of players move several times faster
//! - one Move event per player per tick
//!
//! The horizontal speed detection samples two positions five ticks apart,
//! scores the velocity and applies penalties. The binary prints how many
//! cheaters and honest players were punished.
//!
//! Usage: `warden_sim [config.toml] [players] [ticks] [seed]`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use warden_core::{
    Action, Check, ConditionError, ConditionInput, DetectionStages, EntityEntry, EntityId, Event, EventKind,
    Heuristic, LifecycleEvent, Penalty, Report, ReportKind, SequenceBlueprint, SequenceState, Summary, TypedKey,
    Warden, WardenConfig, WardenResult,
};

// =============================================================================
// CONFIGURATION
// =============================================================================
const DEFAULT_PLAYERS: u64 = 200;
const DEFAULT_TICKS: u64 = 600;
const DEFAULT_SEED: u64 = 0x5EED;
const CHEATER_RATIO: f64 = 0.1;
const WALK_SPEED: f64 = 0.25; // Blocks/tick
const CHEAT_SPEED: f64 = 1.4; // Blocks/tick
const SAMPLE_DELAY: u64 = 5; // Ticks between position samples
const SAMPLE_EXPIRE: u64 = 20;
const WARN_VELOCITY: f64 = 0.6;
const KICK_VELOCITY: f64 = 1.0;

const POSITION: TypedKey<(f64, f64)> = TypedKey::new("position");
const TICK: TypedKey<u64> = TypedKey::new("tick");
const VELOCITY: TypedKey<f64> = TypedKey::new("velocity");

// =============================================================================
// SPEED DETECTION
// =============================================================================

fn sample(kind: &'static str) -> impl Fn(&mut ConditionInput<'_>, Summary) -> Result<Summary, ConditionError> {
    move |input, mut summary| {
        let position = input
            .event
            .get(&POSITION)?
            .copied()
            .ok_or_else(|| ConditionError::MalformedInput("move without position".into()))?;
        let report = summary
            .report_for(input.event)
            .with(&POSITION, position)
            .with(&TICK, input.event.timestamp());
        summary.set(kind, report);
        Ok(summary)
    }
}

fn read<T: Copy + 'static>(summary: &Summary, kind: &str, key: &TypedKey<T>) -> Option<T> {
    summary
        .view(&ReportKind::from(kind))
        .and_then(|report| report.get(key).ok().flatten().copied())
}

fn velocity(_: &EntityEntry, mut summary: Summary) -> Summary {
    let from = read(&summary, "origin", &POSITION).zip(read(&summary, "origin", &TICK));
    let to = read(&summary, "destination", &POSITION).zip(read(&summary, "destination", &TICK));
    if let (Some(((x0, z0), t0)), Some(((x1, z1), t1))) = (from, to) {
        let ticks = t1.saturating_sub(t0).max(1);
        #[allow(clippy::cast_precision_loss)]
        let velocity = (x1 - x0).hypot(z1 - z0) / ticks as f64;
        let report = Report::new(summary.origin().clone()).with(&VELOCITY, velocity);
        summary.set("velocity", report);
    }
    summary
}

fn faster_than(limit: f64) -> impl Fn(&EntityEntry, &Summary) -> bool + Send + Sync {
    move |_, summary| read(summary, "velocity", &VELOCITY).is_some_and(|v| v > limit)
}

fn speed_stages() -> WardenResult<DetectionStages> {
    let blueprint = SequenceBlueprint::new(
        "speed.horizontal.sample",
        "speed",
        "speed.horizontal",
        vec![
            Action::new(EventKind::Move).on_normal(sample("origin")),
            Action::new(EventKind::Move)
                .with_delay(SAMPLE_DELAY)
                .with_expire(SAMPLE_EXPIRE)
                .on_normal(sample("destination")),
        ],
    )?;

    DetectionStages::new()
        .with(Check::new("speed.horizontal", Arc::new(blueprint)))?
        .with(Heuristic::new("velocity", velocity))?
        .with(Penalty::new("warn", faster_than(WARN_VELOCITY)))?
        .with(Penalty::new("kick", faster_than(KICK_VELOCITY)))?
        .with(Penalty::new("ban", |_, _| true))
}

// =============================================================================
// SYNTHETIC PLAYERS
// =============================================================================

struct SimPlayer {
    entry: EntityEntry,
    position: (f64, f64),
    heading: f64,
    speed: f64,
    cheater: bool,
}

impl SimPlayer {
    fn spawn(id: u64, rng: &mut StdRng) -> Self {
        let cheater = rng.gen_bool(CHEATER_RATIO);
        Self {
            entry: EntityEntry::detached(EntityId(id)),
            position: (rng.gen_range(-100.0..100.0), rng.gen_range(-100.0..100.0)),
            heading: rng.gen_range(0.0..std::f64::consts::TAU),
            speed: if cheater { CHEAT_SPEED } else { WALK_SPEED },
            cheater,
        }
    }

    fn step(&mut self, tick: u64, rng: &mut StdRng) -> Event {
        self.heading += rng.gen_range(-0.2..0.2);
        self.position.0 += self.heading.cos() * self.speed;
        self.position.1 += self.heading.sin() * self.speed;
        Event::new(EventKind::Move, tick).with(&POSITION, self.position)
    }
}

#[derive(Default)]
struct Tally {
    started: usize,
    finished: usize,
    expired: usize,
    judged: usize,
    penalties: HashMap<Arc<str>, usize>,
}

fn start_warden(path: &str) -> WardenResult<Warden> {
    let warden = Warden::new(WardenConfig::from_file(path)?)?;
    let detection = warden.install("speed", speed_stages()?)?;
    tracing::info!("installed detection {} ({} stages per pass)", detection.name(), detection.cycle().total_size());
    Ok(warden)
}

fn arg_or<T: std::str::FromStr>(args: &[String], index: usize, default: T) -> T {
    args.get(index).and_then(|raw| raw.parse().ok()).unwrap_or(default)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| concat!(env!("CARGO_MANIFEST_DIR"), "/data/warden.toml").to_string());
    let player_count = arg_or(&args, 2, DEFAULT_PLAYERS);
    let ticks = arg_or(&args, 3, DEFAULT_TICKS);
    let seed = arg_or(&args, 4, DEFAULT_SEED);

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         WARDEN - SPEED DETECTION SIMULATION                      ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let warden = match start_warden(&config_path) {
        Ok(warden) => warden,
        Err(e) => {
            eprintln!("cannot start warden from {config_path}: {e}");
            std::process::exit(1);
        }
    };

    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Config:             {config_path}");
    println!("│ Players:            {player_count}");
    println!("│ Ticks:              {ticks}");
    println!("│ Seed:               {seed:#x}");
    println!("│ Cheater Ratio:      {:.0}%", CHEATER_RATIO * 100.0);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut players: Vec<SimPlayer> = (0..player_count).map(|id| SimPlayer::spawn(id, &mut rng)).collect();
    let cheaters: u64 = players.iter().map(|p| u64::from(p.cheater)).sum();

    let mut tally = Tally::default();
    let mut punished: HashMap<EntityId, bool> = HashMap::new();
    let start = Instant::now();

    for tick in 0..ticks {
        for player in &mut players {
            let event = player.step(tick, &mut rng);
            warden.invoke(&player.entry, &event);
        }

        let report = warden.process(tick);
        tally.expired += report.expired;
        for event in &report.events {
            match event {
                LifecycleEvent::SequenceStart { .. } => tally.started += 1,
                LifecycleEvent::SequenceStop {
                    state: SequenceState::Finished,
                    ..
                } => tally.finished += 1,
                _ => {}
            }
        }
        for judgement in report.judgements {
            tally.judged += 1;
            for penalty in &judgement.penalties {
                *tally.penalties.entry(Arc::clone(penalty)).or_default() += 1;
            }
            if judgement.is_punished() {
                let cheater = players
                    .iter()
                    .find(|p| p.entry.id() == judgement.entry.id())
                    .is_some_and(|p| p.cheater);
                punished.insert(judgement.entry.id(), cheater);
            }
        }

        if tick % warden.config().manager.sweep_interval_ticks.max(1) == 0 {
            warden.manager().clean(false);
        }
    }

    let elapsed = start.elapsed();
    let caught = punished.values().filter(|cheater| **cheater).count();
    let false_positives = punished.len() - caught;
    tracing::info!("simulation finished: {} judgements in {:?}", tally.judged, elapsed);

    println!("┌─ SEQUENCES ─────────────────────────────────────────────────────┐");
    println!("│ Started:            {}", tally.started);
    println!("│ Finished:           {}", tally.finished);
    println!("│ Expired (sweep):    {}", tally.expired);
    println!("│ Judged:             {}", tally.judged);
    println!("│ Bus Drops:          {}", warden.bus().dropped());
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    println!("┌─ PENALTIES ─────────────────────────────────────────────────────┐");
    let mut penalties: Vec<_> = tally.penalties.iter().collect();
    penalties.sort();
    for (id, count) in penalties {
        println!("│ {id:<20}{count}");
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    println!("┌─ VERDICT ───────────────────────────────────────────────────────┐");
    println!("│ Cheaters Caught:    {caught}/{cheaters}");
    println!("│ False Positives:    {false_positives}/{}", player_count - cheaters);
    println!("│ Real Time:          {:.2} ms", elapsed.as_secs_f64() * 1000.0);
    if false_positives == 0 {
        println!("│ Status:             ✓ NO HONEST PLAYER PUNISHED");
    } else {
        println!("│ Status:             ✗ HONEST PLAYERS PUNISHED");
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
}

//! # Detection Pipeline
//!
//! Takes the summary of a successful sequence through its detection's
//! stage cycle:
//!
//! ```text
//!   SequenceResult::Succeed
//!          │
//!          ▼
//!   Start ─▶ check ─▶ heuristic* ─▶ penalty* ─▶ End ─▶ Judgement
//!            confirm   refine        test
//! ```
//!
//! The check model must contain the summary's check, otherwise the run stops
//! before any heuristic and nothing is judged.

use std::sync::Arc;

use crate::entry::EntityEntry;
use crate::error::WardenResult;
use crate::lifecycle::{ChainPhase, LifecycleBus, LifecycleEvent, SequenceOutcome};
use crate::report::Summary;
use crate::stage::{Stage, StageKind};

use super::{Detection, DetectionRegistry};

/// Outcome of one pass of a detection's stage cycle.
#[derive(Clone, Debug)]
pub struct Judgement {
    /// Detection that judged.
    pub detection: Arc<str>,
    /// Judged entity.
    pub entry: EntityEntry,
    /// Summary after every heuristic.
    pub summary: Summary,
    /// Penalties whose predicate held, in execution order.
    pub penalties: Vec<Arc<str>>,
    /// Stages executed.
    pub stages_run: usize,
}

impl Judgement {
    /// Returns true if any penalty applies.
    #[must_use]
    pub fn is_punished(&self) -> bool {
        !self.penalties.is_empty()
    }
}

/// Runs summaries through detection stage cycles.
#[derive(Clone, Debug)]
pub struct DetectionPipeline {
    registry: Arc<DetectionRegistry>,
    bus: LifecycleBus,
}

impl DetectionPipeline {
    /// Creates a pipeline publishing chain events on `bus`.
    #[must_use]
    pub const fn new(registry: Arc<DetectionRegistry>, bus: LifecycleBus) -> Self {
        Self { registry, bus }
    }

    /// Judges successful sequence results; ignores every other event.
    pub fn consume(&self, event: &LifecycleEvent) -> Option<Judgement> {
        let LifecycleEvent::SequenceResult {
            outcome: SequenceOutcome::Succeed,
            entry,
            summary,
            ..
        } = event
        else {
            return None;
        };
        match self.judge(entry, summary.clone()) {
            Ok(judgement) => judgement,
            Err(e) => {
                tracing::warn!("cannot judge {} for {}: {}", summary.check(), entry.id(), e);
                None
            }
        }
    }

    /// Judges `summary` with the detection that owns it.
    ///
    /// # Errors
    ///
    /// `NotFound` if the detection is not registered.
    pub fn judge(&self, entry: &EntityEntry, summary: Summary) -> WardenResult<Option<Judgement>> {
        let detection = self.registry.require(summary.detection())?;
        Ok(self.run(&detection, entry, summary))
    }

    /// One pass of `detection`'s stage cycle over `summary`.
    pub fn run(&self, detection: &Detection, entry: &EntityEntry, mut summary: Summary) -> Option<Judgement> {
        self.publish(ChainPhase::Start, entry, &summary);

        let mut cycle = detection.cycle();
        let mut phase = None;
        let mut confirmed = false;
        let mut penalties = Vec::new();
        let mut stages_run = 0;

        while cycle.next() {
            let Some(stage) = cycle.stage() else {
                continue;
            };
            let kind = stage.kind();
            if phase != Some(kind) {
                if kind != StageKind::Check && !confirmed {
                    break;
                }
                phase = Some(kind);
                self.publish(ChainPhase::PhaseChange { to: kind }, entry, &summary);
            }
            stages_run += 1;

            match stage {
                Stage::Check(check) => confirmed |= check.id() == summary.check(),
                Stage::Heuristic(heuristic) => summary = heuristic.apply(entry, summary),
                Stage::Penalty(penalty) => {
                    if penalty.test(entry, &summary) {
                        tracing::info!(
                            "penalty {} applies to {} ({} / {})",
                            penalty.id(),
                            entry.id(),
                            detection.id(),
                            summary.check()
                        );
                        penalties.push(Arc::from(penalty.id()));
                    }
                }
            }
        }

        self.publish(ChainPhase::End, entry, &summary);

        if !confirmed {
            tracing::debug!(
                "detection {} does not run check {}, summary for {} dropped",
                detection.id(),
                summary.check(),
                entry.id()
            );
            return None;
        }
        Some(Judgement {
            detection: Arc::from(detection.id()),
            entry: entry.clone(),
            summary,
            penalties,
            stages_run,
        })
    }

    fn publish(&self, phase: ChainPhase, entry: &EntityEntry, summary: &Summary) {
        self.bus.publish(LifecycleEvent::DetectionChain {
            phase,
            entry: entry.clone(),
            summary: summary.clone(),
        });
    }

    /// The registry detections are looked up in.
    #[must_use]
    pub fn registry(&self) -> &Arc<DetectionRegistry> {
        &self.registry
    }
}

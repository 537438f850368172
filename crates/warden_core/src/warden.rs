//! # Warden
//!
//! The context object a host creates once at startup. It owns the lifecycle
//! bus, the detection registry, the sequence manager and the judgement
//! pipeline, and wires them together:
//!
//! ```text
//!   host events ──▶ invoke ──▶ SequenceManager ──▶ LifecycleBus
//!                                                       │
//!   host tick ───▶ process ──▶ tick + sweep + drain ◀───┘
//!                                  │
//!                                  ▼
//!                          DetectionPipeline ──▶ Judgements
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{DetectionConfig, WardenConfig};
use crate::detection::{Detection, DetectionPipeline, DetectionRegistry, DetectionStages, Judgement};
use crate::entry::EntityEntry;
use crate::error::WardenResult;
use crate::event::Event;
use crate::lifecycle::{LifecycleBus, LifecycleEvent};
use crate::sequence::SequenceManager;

/// What one [`Warden::process`] call did.
#[derive(Debug, Default)]
pub struct ProcessReport {
    /// Sequences whose captures ran their scheduled update.
    pub ticked: usize,
    /// Sequences expired by the sweep.
    pub expired: usize,
    /// Every lifecycle event drained from the bus, in publish order.
    pub events: Vec<LifecycleEvent>,
    /// Judgements of successful sequences.
    pub judgements: Vec<Judgement>,
}

/// Detection core context.
#[derive(Debug)]
pub struct Warden {
    config: WardenConfig,
    bus: LifecycleBus,
    registry: Arc<DetectionRegistry>,
    manager: SequenceManager,
    pipeline: DetectionPipeline,
    last_sweep: Mutex<Option<u64>>,
}

impl Warden {
    /// Creates a context from validated configuration.
    ///
    /// # Errors
    ///
    /// Any validation error of `config`.
    pub fn new(config: WardenConfig) -> WardenResult<Self> {
        config.validate()?;
        let bus = LifecycleBus::new(config.manager.lifecycle_capacity);
        let registry = Arc::new(DetectionRegistry::new());
        let manager = SequenceManager::new(config.manager.clone(), bus.clone());
        let pipeline = DetectionPipeline::new(Arc::clone(&registry), bus.clone());
        tracing::info!(
            "warden ready: {} configured detections, {} sequences per entity",
            config.detections.len(),
            config.manager.max_sequences_per_entity
        );
        Ok(Self {
            config,
            bus,
            registry,
            manager,
            pipeline,
            last_sweep: Mutex::new(None),
        })
    }

    /// Builds the detection `id` from `stages` using its configured model
    /// rules, or default rules if `id` is not configured.
    ///
    /// # Errors
    ///
    /// Any stage model resolution error.
    pub fn build_detection(&self, id: &str, stages: DetectionStages) -> WardenResult<Detection> {
        let config = self.config.detection(id).cloned().unwrap_or_else(|| DetectionConfig {
            id: id.to_string(),
            name: String::new(),
            models: Vec::new(),
        });
        Detection::new(&config, stages)
    }

    /// Registers a detection and the blueprints of its selected checks.
    ///
    /// # Errors
    ///
    /// `DuplicateId` for a taken detection or blueprint id. Nothing is
    /// registered in that case.
    pub fn register(&self, detection: Detection) -> WardenResult<Arc<Detection>> {
        let detection = self.registry.register(detection)?;
        let mut registered: Vec<String> = Vec::new();
        for blueprint in detection.blueprints() {
            if let Err(e) = self.manager.register(Arc::clone(&blueprint)) {
                for id in &registered {
                    self.manager.unregister(id);
                }
                self.registry.unregister(detection.id());
                return Err(e);
            }
            registered.push(blueprint.id().to_string());
        }
        tracing::info!("registered detection {} ({} blueprints)", detection.id(), registered.len());
        Ok(detection)
    }

    /// [`build_detection`](Self::build_detection) then [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// See both.
    pub fn install(&self, id: &str, stages: DetectionStages) -> WardenResult<Arc<Detection>> {
        self.register(self.build_detection(id, stages)?)
    }

    /// Removes a detection and its blueprints. Running sequences keep running
    /// until they terminate; their results are no longer judged.
    pub fn unregister(&self, id: &str) -> Option<Arc<Detection>> {
        let detection = self.registry.unregister(id)?;
        for blueprint in detection.blueprints() {
            self.manager.unregister(blueprint.id());
        }
        Some(detection)
    }

    /// Feeds a host event. Returns how many sequences consumed it.
    pub fn invoke(&self, entry: &EntityEntry, event: &Event) -> usize {
        self.manager.invoke(entry, event)
    }

    /// Ticks the captures of every running sequence, sweeps expired
    /// sequences when the sweep interval elapsed, then judges every
    /// successful result waiting on the bus.
    pub fn process(&self, now: u64) -> ProcessReport {
        let mut report = ProcessReport {
            ticked: self.manager.tick(now, |_| true),
            ..ProcessReport::default()
        };

        let due = {
            let mut last = self.last_sweep.lock();
            let due = last.map_or(true, |at| now.saturating_sub(at) >= self.config.manager.sweep_interval_ticks);
            if due {
                *last = Some(now);
            }
            due
        };
        if due {
            report.expired = self.manager.sweep(now);
        }

        loop {
            let batch = self.bus.drain();
            if batch.is_empty() {
                break;
            }
            for event in batch {
                if let Some(judgement) = self.pipeline.consume(&event) {
                    report.judgements.push(judgement);
                }
                report.events.push(event);
            }
        }
        report
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &WardenConfig {
        &self.config
    }

    /// The lifecycle bus.
    #[must_use]
    pub const fn bus(&self) -> &LifecycleBus {
        &self.bus
    }

    /// The detection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<DetectionRegistry> {
        &self.registry
    }

    /// The sequence manager.
    #[must_use]
    pub const fn manager(&self) -> &SequenceManager {
        &self.manager
    }

    /// The judgement pipeline.
    #[must_use]
    pub const fn pipeline(&self) -> &DetectionPipeline {
        &self.pipeline
    }
}

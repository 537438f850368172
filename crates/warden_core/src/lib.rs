//! # Warden Core
//!
//! Behavioral detection core for multiplayer game servers: per-entity
//! chains of timed, conditional steps that gather evidence about what an
//! entity does, and a stage pipeline that judges that evidence.
//!
//! ## Data Flow
//!
//! ```text
//!   Event ──▶ SequenceManager::invoke ──▶ Sequence::apply (current Action)
//!                                               │ captures, conditions
//!                                               ▼
//!                                            Summary
//!                                               │ SequenceResult::Succeed
//!                                               ▼
//!   DetectionPipeline: Check ──▶ Heuristic* ──▶ Penalty* ──▶ Judgement
//! ```
//!
//! ## Rules
//!
//! 1. **Nothing blocks** - expiry is lazy, and under pressure the bus sheds
//!    informational events while results always get through
//! 2. **One lock per entity** - different entities can be driven in parallel
//! 3. **Absence is not an error** - a vanished entity cancels its sequences
//!
//! ## Example
//!
//! ```rust,ignore
//! use warden_core::{Action, EventKind, SequenceBlueprint, Warden, WardenConfig};
//!
//! let warden = Warden::new(WardenConfig::default())?;
//! warden.install("speed", stages)?;
//! warden.invoke(&entry, &event);
//! for judgement in warden.process(now).judgements {
//!     // punish
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod capture;
pub mod config;
pub mod context;
pub mod detection;
pub mod entry;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod origin;
pub mod report;
pub mod sequence;
pub mod stage;
pub mod value;
pub mod warden;

pub use capture::{Capture, CaptureContainer, CaptureRegistry};
pub use config::{DetectionConfig, ManagerConfig, StageModelConfig, WardenConfig};
pub use context::SequenceContext;
pub use detection::{Detection, DetectionPipeline, DetectionRegistry, DetectionStages, Judgement};
pub use entry::{DetachedResolver, EntityEntry, EntityId, EntityResolver};
pub use error::{ConditionError, WardenError, WardenResult};
pub use event::{Event, EventKind};
pub use lifecycle::{ChainPhase, LifecycleBus, LifecycleEvent, SequenceOutcome};
pub use origin::{NamedOrigin, Origin, OriginBuilder, OriginValue};
pub use report::{Report, ReportKind, Summary};
pub use sequence::{
    Action, AvoidTicket, BlockId, Condition, ConditionInput, ConditionKind, Sequence, SequenceBlueprint,
    SequenceManager, SequenceSnapshot, SequenceState,
};
pub use stage::{
    Check, Heuristic, Penalty, ResolvedStageModel, Stage, StageCycle, StageKind, StageModel, StageModelArchetype,
};
pub use value::{TypedKey, Value, ValueMap};
pub use warden::{ProcessReport, Warden};

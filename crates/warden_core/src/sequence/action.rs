//! # Actions
//!
//! One timed step of a sequence.
//!
//! ```text
//!             previous action completed (last_action_time)
//!                    │
//!   ─────────────────┼──────────┬─────────────────────┬──────────▶ ticks
//!                    │  delay   │   may fire          │ expired
//!                    │ (ignored)│                     │
//!                    └──────────┴─────────────────────┘
//!                          0 = no wait          0 = never expires
//! ```
//!
//! When an action fires, its NORMAL conditions run first, then its
//! predicate decides between the SUCCESS and FAIL conditions.

use std::fmt;
use std::sync::Arc;

use crate::capture::CaptureContainer;
use crate::context::SequenceContext;
use crate::entry::EntityEntry;
use crate::error::ConditionError;
use crate::event::{Event, EventKind};
use crate::report::Summary;

/// Everything a condition may look at.
///
/// Borrowed for the duration of one call only. The sequence context is the
/// one value conditions may write; it outlives the action and is visible to
/// every later action of the same sequence.
pub struct ConditionInput<'a> {
    /// Subject entity.
    pub entry: &'a EntityEntry,
    /// The event being applied.
    pub event: &'a Event,
    /// Telemetry captured so far.
    pub captures: &'a CaptureContainer,
    /// Bookkeeping values of the sequence.
    pub context: &'a mut SequenceContext,
    /// Tick at which the previous action completed (or the sequence started).
    pub last_action_time: u64,
}

impl ConditionInput<'_> {
    /// Ticks since the previous action completed.
    #[must_use]
    pub fn elapsed(&self) -> u64 {
        self.event.timestamp().saturating_sub(self.last_action_time)
    }
}

/// Condition body: takes the summary, returns the updated summary.
pub type ConditionSupplier =
    Arc<dyn Fn(&mut ConditionInput<'_>, Summary) -> Result<Summary, ConditionError> + Send + Sync>;

/// Action predicate deciding between SUCCESS and FAIL conditions.
pub type ActionPredicate = Arc<dyn Fn(&ConditionInput<'_>, &Summary) -> bool + Send + Sync>;

/// When a condition runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConditionKind {
    /// On every event the action fires for.
    Normal,
    /// When the predicate holds.
    Success,
    /// When the predicate does not hold.
    Fail,
}

/// A condition tagged with when it runs.
#[derive(Clone)]
pub struct Condition {
    kind: ConditionKind,
    supplier: ConditionSupplier,
}

impl Condition {
    /// Wraps a condition body.
    pub fn new<F>(kind: ConditionKind, supplier: F) -> Self
    where
        F: Fn(&mut ConditionInput<'_>, Summary) -> Result<Summary, ConditionError> + Send + Sync + 'static,
    {
        Self {
            kind,
            supplier: Arc::new(supplier),
        }
    }

    /// When this condition runs.
    #[must_use]
    pub const fn kind(&self) -> ConditionKind {
        self.kind
    }

    fn apply(&self, input: &mut ConditionInput<'_>, summary: Summary) -> Result<Summary, ConditionError> {
        (self.supplier)(input, summary)
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition").field("kind", &self.kind).finish_non_exhaustive()
    }
}

/// What firing an action produced.
#[derive(Debug)]
pub struct ActionOutcome {
    /// Whether the predicate held.
    pub passed: bool,
    /// The summary after every condition ran.
    pub summary: Summary,
}

/// One timed step of a sequence. Immutable once handed to a blueprint.
#[derive(Clone)]
pub struct Action {
    event: EventKind,
    delay: u64,
    expire: u64,
    predicate: Option<ActionPredicate>,
    cancel_on_fail: bool,
    conditions: Vec<Condition>,
}

impl Action {
    /// Action that fires on events of `event` kind, with no delay, no expiry
    /// and a predicate that always holds.
    #[must_use]
    pub fn new(event: EventKind) -> Self {
        Self {
            event,
            delay: 0,
            expire: 0,
            predicate: None,
            cancel_on_fail: false,
            conditions: Vec::new(),
        }
    }

    /// Minimum ticks after the previous action before this one may fire.
    #[must_use]
    pub const fn with_delay(mut self, ticks: u64) -> Self {
        self.delay = ticks;
        self
    }

    /// Maximum ticks this action may stay current. `0` never expires.
    #[must_use]
    pub const fn with_expire(mut self, ticks: u64) -> Self {
        self.expire = ticks;
        self
    }

    /// Sets the predicate.
    #[must_use]
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ConditionInput<'_>, &Summary) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Cancel the sequence when the predicate does not hold.
    #[must_use]
    pub const fn cancel_on_fail(mut self) -> Self {
        self.cancel_on_fail = true;
        self
    }

    /// Adds a condition.
    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Adds a NORMAL condition.
    #[must_use]
    pub fn on_normal<F>(self, supplier: F) -> Self
    where
        F: Fn(&mut ConditionInput<'_>, Summary) -> Result<Summary, ConditionError> + Send + Sync + 'static,
    {
        self.condition(Condition::new(ConditionKind::Normal, supplier))
    }

    /// Adds a SUCCESS condition.
    #[must_use]
    pub fn on_success<F>(self, supplier: F) -> Self
    where
        F: Fn(&mut ConditionInput<'_>, Summary) -> Result<Summary, ConditionError> + Send + Sync + 'static,
    {
        self.condition(Condition::new(ConditionKind::Success, supplier))
    }

    /// Adds a FAIL condition.
    #[must_use]
    pub fn on_fail<F>(self, supplier: F) -> Self
    where
        F: Fn(&mut ConditionInput<'_>, Summary) -> Result<Summary, ConditionError> + Send + Sync + 'static,
    {
        self.condition(Condition::new(ConditionKind::Fail, supplier))
    }

    /// Event kind this action fires on.
    #[must_use]
    pub const fn event_kind(&self) -> &EventKind {
        &self.event
    }

    /// Delay in ticks.
    #[must_use]
    pub const fn delay(&self) -> u64 {
        self.delay
    }

    /// Expiry in ticks.
    #[must_use]
    pub const fn expire(&self) -> u64 {
        self.expire
    }

    /// Whether a failed predicate cancels the sequence.
    #[must_use]
    pub const fn cancels_on_fail(&self) -> bool {
        self.cancel_on_fail
    }

    /// Conditions in insertion order.
    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Returns true if this action fires on `kind`.
    #[must_use]
    pub fn matches(&self, kind: &EventKind) -> bool {
        &self.event == kind
    }

    /// Returns true if the action has been current for longer than `expire`.
    #[must_use]
    pub const fn is_expired(&self, last_action_time: u64, now: u64) -> bool {
        self.expire != 0 && now.saturating_sub(last_action_time) > self.expire
    }

    /// Returns true if `delay` has not yet elapsed.
    #[must_use]
    pub const fn is_delayed(&self, last_action_time: u64, now: u64) -> bool {
        self.delay != 0 && now.saturating_sub(last_action_time) < self.delay
    }

    /// Fires the action: NORMAL conditions, predicate, then SUCCESS or FAIL.
    ///
    /// # Errors
    ///
    /// The first condition error. The caller's summary is untouched in that case.
    pub fn fire(&self, input: &mut ConditionInput<'_>, summary: Summary) -> Result<ActionOutcome, ConditionError> {
        let mut summary = self.run(ConditionKind::Normal, input, summary)?;
        let passed = self.predicate.as_ref().map_or(true, |p| p(&*input, &summary));
        let branch = if passed {
            ConditionKind::Success
        } else {
            ConditionKind::Fail
        };
        summary = self.run(branch, input, summary)?;
        Ok(ActionOutcome { passed, summary })
    }

    fn run(
        &self,
        kind: ConditionKind,
        input: &mut ConditionInput<'_>,
        mut summary: Summary,
    ) -> Result<Summary, ConditionError> {
        for condition in self.conditions.iter().filter(|c| c.kind == kind) {
            summary = condition.apply(input, summary)?;
        }
        Ok(summary)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("event", &self.event)
            .field("delay", &self.delay)
            .field("expire", &self.expire)
            .field("has_predicate", &self.predicate.is_some())
            .field("cancel_on_fail", &self.cancel_on_fail)
            .field("conditions", &self.conditions)
            .finish()
    }
}

//! # Reports and Summaries
//!
//! A [`Report`] is one unit of evidence: a bag of properties plus the origin
//! that produced it. A [`Summary`] is everything one detection has gathered
//! about one entity in one sequence run, one report per [`ReportKind`].
//!
//! Reports are immutable once stored. [`Summary::set`] moves the report
//! behind an `Arc` and [`Summary::view`] only ever hands out shared
//! references to it.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::entry::EntityId;
use crate::error::WardenResult;
use crate::event::Event;
use crate::origin::Origin;
use crate::value::{TypedKey, Value, ValueMap};

/// Key under which a report is stored in a summary.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReportKind(Arc<str>);

impl ReportKind {
    /// Creates a report kind.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Kind name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ReportKind {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of evidence.
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    properties: ValueMap,
    origin: Origin,
}

impl Report {
    /// Creates an empty report with the given origin.
    #[must_use]
    pub fn new(origin: Origin) -> Self {
        Self {
            properties: ValueMap::new(),
            origin,
        }
    }

    /// Adds a property, builder style.
    #[must_use]
    pub fn with<T: Any + Send + Sync>(mut self, key: &TypedKey<T>, value: T) -> Self {
        self.put(key, value);
        self
    }

    /// Stores a property.
    pub fn put<T: Any + Send + Sync>(&mut self, key: &TypedKey<T>, value: T) {
        self.properties.insert(key.name(), value);
    }

    /// Typed property read.
    ///
    /// # Errors
    ///
    /// Type mismatch if the property has another type.
    pub fn get<T: Any>(&self, key: &TypedKey<T>) -> WardenResult<Option<&T>> {
        self.properties.get_as::<T>(key.name())
    }

    /// Raw property read.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Property keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.properties.keys()
    }

    /// Where this evidence came from.
    #[must_use]
    pub const fn origin(&self) -> &Origin {
        &self.origin
    }
}

/// Aggregated evidence of one detection run against one entity.
#[derive(Clone, Debug)]
pub struct Summary {
    detection: Arc<str>,
    check: Arc<str>,
    entity: EntityId,
    origin: Origin,
    reports: BTreeMap<ReportKind, Arc<Report>>,
}

impl Summary {
    /// Creates an empty summary.
    #[must_use]
    pub fn new(detection: Arc<str>, check: Arc<str>, entity: EntityId, origin: Origin) -> Self {
        Self {
            detection,
            check,
            entity,
            origin,
            reports: BTreeMap::new(),
        }
    }

    /// Starts a report for `event` whose origin extends the event's origin
    /// with this summary's owner, check and sequence causes.
    #[must_use]
    pub fn report_for(&self, event: &Event) -> Report {
        let mut builder = event.origin().extend();
        for cause in self.origin.iter() {
            builder = builder.named(cause.name.clone(), cause.value.clone());
        }
        Report::new(builder.build())
    }

    /// Stores `report` under `kind`, overwriting any previous report.
    pub fn set(&mut self, kind: impl Into<ReportKind>, report: Report) -> Option<Arc<Report>> {
        self.reports.insert(kind.into(), Arc::new(report))
    }

    /// Read-only view of the report stored under `kind`.
    #[must_use]
    pub fn view(&self, kind: &ReportKind) -> Option<Arc<Report>> {
        self.reports.get(kind).cloned()
    }

    /// Returns true if a report of `kind` is present.
    #[must_use]
    pub fn contains(&self, kind: &ReportKind) -> bool {
        self.reports.contains_key(kind)
    }

    /// Reports in kind order.
    pub fn iter(&self) -> impl Iterator<Item = (&ReportKind, &Arc<Report>)> {
        self.reports.iter()
    }

    /// Number of reports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    /// Returns true if no evidence was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Id of the detection that owns this summary.
    #[must_use]
    pub fn detection(&self) -> &str {
        &self.detection
    }

    /// Id of the check whose sequence produced this summary.
    #[must_use]
    pub fn check(&self) -> &str {
        &self.check
    }

    /// The subject entity.
    #[must_use]
    pub const fn entity(&self) -> EntityId {
        self.entity
    }

    /// Causal trace of this summary.
    #[must_use]
    pub const fn origin(&self) -> &Origin {
        &self.origin
    }
}

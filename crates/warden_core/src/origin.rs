//! # Origins
//!
//! An [`Origin`] is the causal trace attached to events, reports and
//! summaries: an ordered list of named causes, the first of which is the
//! source. Names are unique within one origin and compared
//! case-insensitively.
//!
//! Origins are only ever extended, never rebuilt from scratch, so the trace
//! that started at the host event is still there when a penalty reads the
//! final summary.

use std::fmt;
use std::sync::Arc;

use crate::entry::EntityId;
use crate::event::EventKind;

/// Name of the first cause in an origin.
pub const SOURCE: &str = "SOURCE";
/// Name of the owner. A sequence sets it to its detection unless the host
/// event already named an owner.
pub const OWNER: &str = "OWNER";
/// Name of the detection whose sequence produced a summary. Always set by
/// the sequence.
pub const DETECTION: &str = "DETECTION";
/// Name of the check that ran the sequence.
pub const CHECK: &str = "CHECK";
/// Name of the sequence instance.
pub const SEQUENCE: &str = "SEQUENCE";
/// Name of the subject entity.
pub const ENTITY: &str = "ENTITY";

/// A single cause.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OriginValue {
    /// A host event of the given kind at the given tick.
    Event {
        /// Event kind.
        kind: EventKind,
        /// Event timestamp.
        timestamp: u64,
    },
    /// An entity.
    Entity(EntityId),
    /// A detection, by id.
    Detection(Arc<str>),
    /// A check, by id.
    Check(Arc<str>),
    /// A sequence instance, by id.
    Sequence(u64),
    /// Free-form cause supplied by detection content.
    Text(Arc<str>),
}

impl fmt::Display for OriginValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event { kind, timestamp } => write!(f, "{kind}@{timestamp}"),
            Self::Entity(id) => write!(f, "{id}"),
            Self::Detection(id) => write!(f, "detection:{id}"),
            Self::Check(id) => write!(f, "check:{id}"),
            Self::Sequence(id) => write!(f, "sequence:{id}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// A named cause.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NamedOrigin {
    /// Cause name.
    pub name: Arc<str>,
    /// Cause value.
    pub value: OriginValue,
}

impl NamedOrigin {
    /// Creates a named cause.
    pub fn new(name: impl Into<Arc<str>>, value: OriginValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Ordered, named causal chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Origin {
    causes: Arc<[NamedOrigin]>,
}

impl Default for Origin {
    fn default() -> Self {
        Self {
            causes: Vec::new().into(),
        }
    }
}

impl Origin {
    /// Starts a new origin.
    #[must_use]
    pub fn builder() -> OriginBuilder {
        OriginBuilder::default()
    }

    /// Origin with a single `SOURCE` cause.
    #[must_use]
    pub fn source(value: OriginValue) -> Self {
        Self::builder().source(value).build()
    }

    /// Continues this origin: the builder starts with every cause already here.
    #[must_use]
    pub fn extend(&self) -> OriginBuilder {
        let mut builder = OriginBuilder::default();
        for cause in self.causes.iter() {
            builder = builder.named(cause.name.clone(), cause.value.clone());
        }
        builder
    }

    /// The first cause, if any.
    #[must_use]
    pub fn first(&self) -> Option<&NamedOrigin> {
        self.causes.first()
    }

    /// The last cause, if any.
    #[must_use]
    pub fn last(&self) -> Option<&NamedOrigin> {
        self.causes.last()
    }

    /// Value of the cause named `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OriginValue> {
        self.causes
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|c| &c.value)
    }

    /// Returns true if a cause with this name exists.
    #[must_use]
    pub fn contains_named(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns true if any cause has this value.
    #[must_use]
    pub fn contains(&self, value: &OriginValue) -> bool {
        self.causes.iter().any(|c| &c.value == value)
    }

    /// Number of causes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.causes.len()
    }

    /// Returns true if the origin has no causes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.causes.is_empty()
    }

    /// Causes in order.
    pub fn iter(&self) -> impl Iterator<Item = &NamedOrigin> {
        self.causes.iter()
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Origin[")?;
        for (i, cause) in self.causes.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", cause.name, cause.value)?;
        }
        f.write_str("]")
    }
}

/// Accumulates causes. The first cause added under a name wins.
#[derive(Clone, Debug, Default)]
pub struct OriginBuilder {
    causes: Vec<NamedOrigin>,
}

impl OriginBuilder {
    /// Adds the `SOURCE` cause.
    #[must_use]
    pub fn source(self, value: OriginValue) -> Self {
        self.named(SOURCE, value)
    }

    /// Adds the `OWNER` cause.
    #[must_use]
    pub fn owner(self, value: OriginValue) -> Self {
        self.named(OWNER, value)
    }

    /// Adds a named cause unless the name is already used.
    #[must_use]
    pub fn named(mut self, name: impl Into<Arc<str>>, value: OriginValue) -> Self {
        let name = name.into();
        if !self.causes.iter().any(|c| c.name.eq_ignore_ascii_case(&name)) {
            self.causes.push(NamedOrigin { name, value });
        }
        self
    }

    /// Finishes the origin.
    #[must_use]
    pub fn build(self) -> Origin {
        Origin {
            causes: self.causes.into(),
        }
    }
}

//! Mutation events emitted by the record gateway.

use std::fmt;

use reactant_foundation::{Record, RecordId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Kind of committed change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "lowercase"))]
pub enum MutationKind {
    /// A record was inserted.
    Create,
    /// A record's columns changed.
    Update,
    /// A record was removed.
    Delete,
}

impl MutationKind {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record of one committed storage mutation.
///
/// `record_name` is the table the row lives in, so events raised through a
/// filtered or merged view name the storage-owning node.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MutationEvent {
    /// Storage-owning entity or relation.
    pub record_name: String,
    /// Kind of change.
    pub kind: MutationKind,
    /// The row after the change (before it, for deletes).
    pub record: Record,
    /// The row before an update.
    pub old_record: Option<Record>,
    /// Interaction the change originated from.
    pub interaction_name: Option<String>,
    /// Derivation depth: 0 for caller mutations, N+1 for changes made while
    /// processing an event of generation N.
    pub generation: u32,
    /// Views over nested paths that held the row just before it was
    /// deleted. Their membership cannot be recomputed from the removed row.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Vec::is_empty"))]
    pub views: Vec<String>,
}

impl MutationEvent {
    fn new(record_name: impl Into<String>, kind: MutationKind, record: Record) -> Self {
        Self {
            record_name: record_name.into(),
            kind,
            record,
            old_record: None,
            interaction_name: None,
            generation: 0,
            views: Vec::new(),
        }
    }

    /// A create event.
    #[must_use]
    pub fn create(record_name: impl Into<String>, record: Record) -> Self {
        Self::new(record_name, MutationKind::Create, record)
    }

    /// An update event.
    #[must_use]
    pub fn update(record_name: impl Into<String>, old_record: Record, record: Record) -> Self {
        Self {
            old_record: Some(old_record),
            ..Self::new(record_name, MutationKind::Update, record)
        }
    }

    /// A delete event.
    #[must_use]
    pub fn delete(record_name: impl Into<String>, record: Record) -> Self {
        Self::new(record_name, MutationKind::Delete, record)
    }

    /// Sets the originating interaction.
    #[must_use]
    pub fn with_interaction(mut self, name: impl Into<String>) -> Self {
        self.interaction_name = Some(name.into());
        self
    }

    /// Sets the generation.
    #[must_use]
    pub fn with_generation(mut self, generation: u32) -> Self {
        self.generation = generation;
        self
    }

    /// Sets the nested-path views that held a deleted row.
    #[must_use]
    pub fn with_views(mut self, views: Vec<String>) -> Self {
        self.views = views;
        self
    }

    /// Id of the affected row.
    #[must_use]
    pub fn id(&self) -> Option<RecordId> {
        self.record.id()
    }

    /// Names of columns whose value differs between `old_record` and
    /// `record`. Empty for creates and deletes.
    #[must_use]
    pub fn changed_keys(&self) -> Vec<&str> {
        let Some(old) = &self.old_record else {
            return Vec::new();
        };
        let mut keys: Vec<&str> = self
            .record
            .iter()
            .filter(|(k, v)| old.get(k.as_str()) != Some(*v))
            .map(|(k, _)| k.as_str())
            .collect();
        keys.extend(
            old.keys()
                .filter(|k| !self.record.contains_key(k.as_str()))
                .map(String::as_str),
        );
        keys
    }
}

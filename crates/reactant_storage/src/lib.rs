//! Schema, storage adapter boundary, query planning and the record gateway
//! for Reactant.
//!
//! This crate provides:
//! - [`Schema`] - Arena of entities, relations and dictionaries
//! - [`StorageAdapter`] - Flat-table storage boundary, with [`MemoryStore`]
//! - [`QueryPlanner`] - Filtered/merged rewriting and hydration planning
//! - [`RecordStorage`] - Entity and relation level reads and writes
//! - [`MutationEvent`] - One event per committed change

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod event;
pub mod gateway;
pub mod query;
mod relation;
pub mod schema;
pub mod store;

pub use event::{MutationEvent, MutationKind};
pub use gateway::{LINK_KEY, RecordReader, RecordStorage};
pub use query::{
    AttributeField, AttributeQuery, Comparator, MatchAtom, MatchExp, Modifier, Order, PathTree,
    QueryPlan, QueryPlanner,
};
pub use schema::{
    Cardinality, DICTIONARY_ENTITY, Dictionary, Entity, EntityIdx, EntityKind,
    HARD_DELETION_PROPERTY, INTERACTION_ENTITY, KIND_COLUMN, NodeRef, OnViolation, Property,
    Relation, RelationEnd, RelationIdx, RelationKind, Schema,
};
pub use store::{MemoryStore, StorageAdapter, TableQuery};

//! Core types, values, boolean expressions and persistent collections for Reactant.
//!
//! This crate provides:
//! - [`Value`] - The core value type for all record data
//! - [`RecordId`] - Storage-assigned record identifiers
//! - [`Type`] - Type descriptors for property validation
//! - [`Error`] - Rich error types with context
//! - [`BoolExp`] - Immutable boolean expression trees with sync/async evaluation
//! - Persistent collections ([`LtVec`], [`LtMap`]) and the [`Record`] alias

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod boolexp;
pub mod collections;
pub mod error;
pub mod id;
pub mod types;
pub mod value;

pub use boolexp::{BoolExp, EvaluationError, Operator, RawBoolExp};
pub use collections::{LtMap, LtVec};
pub use error::{Error, ErrorContext, ErrorKind, Result, SemanticLimit};
pub use id::RecordId;
pub use types::Type;
pub use value::{Record, Value, record};

//! Error types for the Reactant system.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.
//! Condition failures are not errors: see [`crate::boolexp::EvaluationError`].

use std::fmt;

use thiserror::Error;

use crate::id::RecordId;
use crate::types::Type;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Reactant operations.
#[derive(Debug, Error)]
#[error("{kind}{}", render_context(.context))]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Pushes a frame onto the context stack, creating the context if needed.
    #[must_use]
    pub fn in_frame(mut self, frame: impl Into<String>) -> Self {
        let ctx = self.context.take().unwrap_or_default();
        self.context = Some(ctx.with_frame(frame));
        self
    }

    /// Creates a malformed boolean expression error.
    #[must_use]
    pub fn invalid_expression(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidExpression(message.into()))
    }

    /// Creates a schema construction error.
    #[must_use]
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidSchema(message.into()))
    }

    /// Creates an unknown entity/relation error.
    #[must_use]
    pub fn unknown_record(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownRecord(name.into()))
    }

    /// Creates an unknown property error.
    #[must_use]
    pub fn unknown_property(record: impl Into<String>, property: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownProperty {
            record: record.into(),
            property: property.into(),
        })
    }

    /// Creates a record not found error.
    #[must_use]
    pub fn record_not_found(record: impl Into<String>, id: RecordId) -> Self {
        Self::new(ErrorKind::RecordNotFound {
            record: record.into(),
            id,
        })
    }

    /// Creates an invalid payload error.
    #[must_use]
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidPayload(message.into()))
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(property: impl Into<String>, expected: Type, actual: Type) -> Self {
        Self::new(ErrorKind::TypeMismatch {
            property: property.into(),
            expected,
            actual,
        })
    }

    /// Creates a cardinality violation error.
    #[must_use]
    pub fn cardinality_violation(relation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CardinalityViolation {
            relation: relation.into(),
            message: message.into(),
        })
    }

    /// Creates a callback failure error.
    #[must_use]
    pub fn callback(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Callback {
            key: key.into(),
            message: message.into(),
        })
    }

    /// Creates an unbound callback error.
    #[must_use]
    pub fn unbound_callback(key: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnboundCallback(key.into()))
    }

    /// Creates an invalid state machine error.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState(message.into()))
    }

    /// Creates a storage adapter error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage(message.into()))
    }

    /// Creates a transaction error.
    #[must_use]
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction(message.into()))
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization(message.into()))
    }

    /// Creates a semantic limit exceeded error.
    #[must_use]
    pub fn limit_exceeded(limit: SemanticLimit) -> Self {
        Self::new(ErrorKind::LimitExceeded(limit))
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }
}

fn render_context(context: &Option<ErrorContext>) -> String {
    match context {
        Some(ctx) if ctx.source.is_some() || !ctx.stack.is_empty() => format!(" ({ctx})"),
        _ => String::new(),
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Malformed boolean expression input.
    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    /// Schema or descriptor failed construction-time validation.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// No entity, relation or dictionary with this name.
    #[error("unknown record: {0}")]
    UnknownRecord(String),

    /// Property not declared on the record.
    #[error("unknown property: {property} on {record}")]
    UnknownProperty {
        /// The entity or relation name.
        record: String,
        /// The property name that was not found.
        property: String,
    },

    /// Record id does not exist.
    #[error("record not found: {record} {id}")]
    RecordNotFound {
        /// The entity or relation name.
        record: String,
        /// The missing id.
        id: RecordId,
    },

    /// Caller supplied a payload the operation forbids.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Type mismatch while validating a payload.
    #[error("type mismatch on {property}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The property being written.
        property: String,
        /// The expected type.
        expected: Type,
        /// The actual type encountered.
        actual: Type,
    },

    /// Relation cardinality would be violated.
    #[error("cardinality violation on {relation}: {message}")]
    CardinalityViolation {
        /// The relation name.
        relation: String,
        /// What was violated.
        message: String,
    },

    /// A user callback failed.
    #[error("callback {key} failed: {message}")]
    Callback {
        /// Registry key of the callback.
        key: String,
        /// The failure message.
        message: String,
    },

    /// A callback was invoked before being bound to an implementation.
    #[error("callback not bound: {0}")]
    UnboundCallback(String),

    /// A state machine is inconsistent.
    #[error("invalid state machine: {0}")]
    InvalidState(String),

    /// Storage adapter failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Transaction misuse (commit without begin and similar).
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Semantic limit exceeded (kill switch triggered).
    #[error("limit exceeded: {0}")]
    LimitExceeded(SemanticLimit),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Semantic limits (kill switches) that can be exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticLimit {
    /// Derived events nested deeper than allowed.
    MaxCascadeDepth {
        /// The configured limit.
        limit: u32,
        /// The record whose event exceeded the limit.
        record: Option<String>,
    },
    /// Too many events processed in one dispatch.
    MaxEvents {
        /// The configured limit.
        limit: usize,
    },
}

impl fmt::Display for SemanticLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxCascadeDepth { limit, record } => {
                write!(f, "max cascade depth ({limit}) exceeded")?;
                if let Some(record) = record {
                    write!(f, " at {record}")?;
                }
                Ok(())
            }
            Self::MaxEvents { limit } => {
                write!(f, "max events per dispatch ({limit}) exceeded")
            }
        }
    }
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Record or computation name.
    pub source: Option<String>,
    /// Stack of computation frames that led to the error.
    pub stack: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Adds a stack frame.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote = false;
        if let Some(source) = &self.source {
            write!(f, "at {source}")?;
            wrote = true;
        }
        for frame in &self.stack {
            if wrote {
                write!(f, ", ")?;
            }
            write!(f, "in {frame}")?;
            wrote = true;
        }
        Ok(())
    }
}

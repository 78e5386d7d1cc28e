//! Integration tests for error rendering

use reactant_foundation::{Error, ErrorContext, ErrorKind, RecordId, SemanticLimit, Type};

#[test]
fn context_renders_source_and_frames() {
    let err = Error::type_mismatch("age", Type::Int, Type::String)
        .with_context(ErrorContext::new().with_source("User"))
        .in_frame("User.age")
        .in_frame("dispatch signup");
    let msg = err.to_string();
    assert!(msg.starts_with("type mismatch on age"));
    assert!(msg.contains("at User"));
    assert!(msg.contains("in User.age, in dispatch signup"));
}

#[test]
fn limit_messages() {
    let err = Error::limit_exceeded(SemanticLimit::MaxCascadeDepth {
        limit: 8,
        record: Some("Post".into()),
    });
    assert!(err.to_string().contains("max cascade depth (8) exceeded at Post"));
    assert!(matches!(err.kind, ErrorKind::LimitExceeded(SemanticLimit::MaxCascadeDepth { limit: 8, .. })));
}

#[test]
fn kinds_are_distinguishable() {
    let missing = Error::record_not_found("User", RecordId(3));
    assert!(matches!(missing.kind, ErrorKind::RecordNotFound { id: RecordId(3), .. }));
    let callback = Error::callback("score", "division by zero");
    assert!(callback.to_string().contains("callback score failed: division by zero"));
    assert!(matches!(Error::unbound_callback("x").kind, ErrorKind::UnboundCallback(_)));
}

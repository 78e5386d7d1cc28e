//! Integration tests for values, records and types

use std::cmp::Ordering;

use reactant_foundation::{Record, RecordId, Type, Value, record};

// =============================================================================
// Values
// =============================================================================

#[test]
fn truthiness() {
    assert!(!Value::Nil.is_truthy());
    assert!(!Value::Bool(false).is_truthy());
    assert!(Value::Int(0).is_truthy());
    assert!(Value::from("").is_truthy());
}

#[test]
fn numeric_coercion() {
    assert_eq!(Value::Int(3).as_number(), Some(3.0));
    assert_eq!(Value::Float(1.5).as_number(), Some(1.5));
    assert_eq!(Value::from("3").as_number(), None);
}

#[test]
fn record_ids_from_several_shapes() {
    assert_eq!(Value::Id(RecordId(7)).as_record_id(), Some(RecordId(7)));
    assert_eq!(Value::Int(7).as_record_id(), Some(RecordId(7)));
    assert_eq!(Value::Int(-1).as_record_id(), None);
    let nested = Value::Map(record([("id", Value::Id(RecordId(7)))]));
    assert_eq!(nested.as_record_id(), Some(RecordId(7)));
}

#[test]
fn nested_paths() {
    let user: Record = record([
        ("name", Value::from("ada")),
        ("profile", Value::Map(record([("city", Value::from("london"))]))),
    ]);
    assert_eq!(user.path("profile.city"), Some(&Value::from("london")));
    assert_eq!(user.path("profile.zip"), None);
    assert_eq!(user.path("name.first"), None);
    let value = Value::Map(user);
    assert_eq!(value.get_path(&["profile", "city"]), Some(&Value::from("london")));
}

#[test]
fn total_order_across_kinds() {
    let mut values = vec![
        Value::from("b"),
        Value::Float(1.5),
        Value::Nil,
        Value::Int(1),
        Value::Bool(true),
        Value::Int(2),
    ];
    values.sort_by(Value::total_cmp);
    assert_eq!(
        values,
        vec![
            Value::Nil,
            Value::Bool(true),
            Value::Int(1),
            Value::Float(1.5),
            Value::Int(2),
            Value::from("b"),
        ]
    );
    assert_eq!(Value::Int(2).total_cmp(&Value::Float(2.0)), Ordering::Equal);
}

// =============================================================================
// Types
// =============================================================================

#[test]
fn type_acceptance() {
    assert!(Type::Number.accepts(&Value::Int(1)));
    assert!(Type::Float.accepts(&Value::Int(1)));
    assert!(!Type::Int.accepts(&Value::Float(1.0)));
    assert!(Type::Timestamp.accepts(&Value::Int(1_700_000_000_000)));
    assert!(Type::option(Type::String).accepts(&Value::Nil));
    assert!(!Type::String.accepts(&Value::Nil));
    let ids = Type::list(Type::Id);
    assert!(ids.accepts(&Value::List([Value::Id(RecordId(1))].into_iter().collect())));
    assert!(!ids.accepts(&Value::List([Value::Int(1)].into_iter().collect())));
}

#[test]
fn type_display() {
    assert_eq!(Type::list(Type::option(Type::Int)).to_string(), "list<option<int>>");
}

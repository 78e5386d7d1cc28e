//! Integration tests for computation descriptors
//!
//! Tests the JSON shape of descriptors, rebinding after a load, and
//! construction-time validation.

use reactant_engine::{
    Aggregate, CallbackRegistry, Computation, ComputationSet, Direction, StateMachine, StateNode, StateTransfer,
    Target, Trigger,
};
use reactant_foundation::{ErrorKind, Type, Value};
use reactant_storage::{Cardinality, Entity, Property, Relation, Schema};
use serde_json::json;

fn schema() -> Schema {
    let mut schema = Schema::new();
    schema
        .add_entity(
            Entity::new("User")
                .with_property(Property::new("postCount", Type::Int))
                .with_property(Property::new("followerCount", Type::Int))
                .with_property(Property::new("status", Type::String)),
        )
        .unwrap();
    schema
        .add_entity(Entity::new("Post").with_property(Property::new("likes", Type::Int)))
        .unwrap();
    schema
        .add_relation(Relation::new("UserPost", "User", "posts", "Post", "author", Cardinality::OneToMany))
        .unwrap();
    schema
        .add_relation(Relation::new("Follows", "User", "follows", "User", "followers", Cardinality::ManyToMany))
        .unwrap();
    schema
}

fn registry() -> CallbackRegistry {
    let mut registry = CallbackRegistry::new();
    registry.register_match("liked", |post, _| {
        Ok(post.get("likes").and_then(Value::as_int).unwrap_or(0) > 0)
    });
    registry
}

// =============================================================================
// Shape
// =============================================================================

#[test]
fn computation_is_tagged_by_type() {
    let mut registry = CallbackRegistry::new();
    let liked = registry.register_match("liked", |_, _| Ok(true));
    let count = Computation::Count(Aggregate::over("UserPost").with_callback(liked));
    let json = serde_json::to_value(&count).unwrap();
    assert_eq!(json["type"], "Count");
    assert_eq!(json["public"]["record"], "UserPost");
    assert_eq!(json["public"]["callback"], "fn::liked");
}

#[test]
fn target_is_tagged_by_kind() {
    let json = serde_json::to_value(Target::property("User", "postCount")).unwrap();
    assert_eq!(json, json!({"kind": "property", "record": "User", "property": "postCount"}));
    let json = serde_json::to_value(Target::dictionary("total")).unwrap();
    assert_eq!(json, json!({"kind": "dictionary", "name": "total"}));
}

#[test]
fn loaded_descriptor_needs_binding() {
    let json = json!({
        "type": "Any",
        "public": {"record": "UserPost", "callback": "fn::liked"}
    });
    let computation: Computation = serde_json::from_value(json).unwrap();
    let mut set = ComputationSet::new();
    set.add(&schema(), Target::property("User", "postCount"), computation)
        .unwrap();

    let err = set.clone().bind(&CallbackRegistry::new()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnboundCallback(_)));
    set.bind(&registry()).unwrap();
}

#[test]
fn callback_without_tag_is_rejected() {
    let json = json!({
        "type": "Any",
        "public": {"record": "UserPost", "callback": "liked"}
    });
    assert!(serde_json::from_value::<Computation>(json).is_err());
}

#[test]
fn state_machine_round_trips() {
    let machine = StateMachine::new(StateNode::new("active"))
        .with_state(StateNode::new("banned"))
        .with_transfer(StateTransfer::new(Trigger::interaction("ban"), "active", "banned"));
    let computation = Computation::StateMachine(machine);
    let json = serde_json::to_string(&computation).unwrap();
    let back: Computation = serde_json::from_str(&json).unwrap();
    assert_eq!(back, computation);
    assert_eq!(back.kind_name(), "StateMachine");
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn aggregates_need_their_inputs() {
    let schema = schema();
    let mut set = ComputationSet::new();
    let err = set
        .add(&schema, Target::property("User", "postCount"), Computation::Summation(Aggregate::over("UserPost")))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidSchema(_)));
    let err = set
        .add(&schema, Target::property("User", "postCount"), Computation::Every(Aggregate::over("UserPost")))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidSchema(_)));
    assert!(set.is_empty());
}

#[test]
fn property_aggregates_run_over_touching_relations() {
    let schema = schema();
    let mut set = ComputationSet::new();
    let over_entity = set.add(
        &schema,
        Target::property("User", "postCount"),
        Computation::Count(Aggregate::over("Post")),
    );
    assert!(over_entity.is_err());
    let missing = set.add(&schema, Target::property("User", "nope"), Computation::Count(Aggregate::over("UserPost")));
    assert!(matches!(missing.unwrap_err().kind, ErrorKind::UnknownProperty { .. }));
}

#[test]
fn self_relations_need_a_direction() {
    let schema = schema();
    let mut set = ComputationSet::new();
    let ambiguous = set.add(
        &schema,
        Target::property("User", "followerCount"),
        Computation::Count(Aggregate::over("Follows")),
    );
    assert!(matches!(ambiguous.unwrap_err().kind, ErrorKind::InvalidSchema(_)));
    set.add(
        &schema,
        Target::property("User", "followerCount"),
        Computation::Count(Aggregate::over("Follows").with_direction(Direction::Target)),
    )
    .unwrap();
    assert_eq!(set.len(), 1);
}

#[test]
fn one_computation_per_target() {
    let schema = schema();
    let mut set = ComputationSet::new();
    set.add(&schema, Target::property("User", "postCount"), Computation::Count(Aggregate::over("UserPost")))
        .unwrap();
    let err = set
        .add(&schema, Target::property("User", "postCount"), Computation::Count(Aggregate::over("UserPost")))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidSchema(_)));
}

#[test]
fn machines_are_checked_on_add() {
    let schema = schema();
    let mut set = ComputationSet::new();
    let broken = StateMachine::new(StateNode::new("active"))
        .with_transfer(StateTransfer::new(Trigger::interaction("ban"), "active", "banned"));
    let err = set
        .add(&schema, Target::property("User", "status"), Computation::StateMachine(broken))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidState(_)));

    let machine = StateMachine::new(StateNode::new("active"));
    let err = set
        .add(&schema, Target::entity("User"), Computation::StateMachine(machine))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidSchema(_)));
}

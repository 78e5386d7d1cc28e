//! Integration tests for state machines
//!
//! Tests interaction-driven workflows, record-event triggers and machines
//! bound to relation properties.

use reactant_engine::{
    Callback, CallbackRegistry, Computation, ComputationSet, ComputeTargetFn, Scheduler, StateMachine, StateNode,
    StateTransfer, Target, TargetRef, Trigger, bound_state_column,
};
use reactant_foundation::{Record, RecordId, Type, Value, record};
use reactant_storage::{
    Cardinality, Entity, INTERACTION_ENTITY, MatchAtom, MemoryStore, MutationEvent, MutationKind, Property,
    RecordStorage, Relation, Schema,
};

type Storage = RecordStorage<MemoryStore>;

fn call(name: &str, payload: Record) -> MutationEvent {
    MutationEvent::create(
        INTERACTION_ENTITY,
        record([("interactionName", Value::from(name)), ("payload", Value::Map(payload))]),
    )
    .with_interaction(name)
}

fn by_payload(registry: &mut CallbackRegistry) -> Callback<ComputeTargetFn> {
    registry.register_compute_target("post", |event, _| {
        Ok(event
            .record
            .path("payload.post")
            .and_then(Value::as_record_id)
            .map(TargetRef::from)
            .into_iter()
            .collect())
    })
}

fn setup() -> (Storage, Scheduler) {
    let mut schema = Schema::new();
    schema
        .add_entity(Entity::new("User").with_property(Property::new("name", Type::String)))
        .unwrap();
    schema
        .add_entity(
            Entity::new("Post")
                .with_property(Property::new("title", Type::String))
                .with_property(Property::new("status", Type::String))
                .with_property(Property::new("flagged", Type::Bool).with_default(false))
                .with_property(Property::new("moderation", Type::String)),
        )
        .unwrap();
    schema
        .add_relation(
            Relation::new("Friendship", "User", "friends", "User", "friendOf", Cardinality::ManyToMany)
                .with_property(Property::new("status", Type::String)),
        )
        .unwrap();

    let mut registry = CallbackRegistry::new();
    let post = by_payload(&mut registry);
    let named = |registry: &mut CallbackRegistry, name: &'static str| {
        registry.register_compute_value(name, move |_, _, _| Ok(Value::from(name)))
    };

    let workflow = StateMachine::new(StateNode::new("draft").with_compute_value(named(&mut registry, "draft")))
        .with_state(StateNode::new("published").with_compute_value(named(&mut registry, "published")))
        .with_state(StateNode::new("archived").with_compute_value(named(&mut registry, "archived")))
        .with_transfer(
            StateTransfer::new(Trigger::interaction("publish"), "draft", "published").with_compute_target(post.clone()),
        )
        .with_transfer(
            StateTransfer::new(Trigger::interaction("unpublish"), "published", "draft")
                .with_compute_target(post.clone()),
        )
        .with_transfer(
            StateTransfer::new(Trigger::interaction("archive"), "published", "archived").with_compute_target(post),
        );

    let flagged = Trigger::on("Post", MutationKind::Update).with_pattern(MatchAtom::eq("flagged", true).exp());
    let moderation = StateMachine::new(StateNode::new("ok").with_compute_value(named(&mut registry, "ok")))
        .with_state(StateNode::new("review").with_compute_value(named(&mut registry, "review")))
        .with_transfer(StateTransfer::new(flagged, "ok", "review"));

    let link = registry.register_compute_target("link", |event, _| {
        let end = |key: &str| event.record.path(&format!("payload.{key}")).and_then(Value::as_record_id);
        Ok(match (end("from"), end("to")) {
            (Some(source), Some(target)) => vec![TargetRef::Link { source, target }],
            _ => Vec::new(),
        })
    });
    let friendship = StateMachine::new(StateNode::new("pending").with_compute_value(named(&mut registry, "pending")))
        .with_state(StateNode::new("accepted").with_compute_value(named(&mut registry, "accepted")))
        .with_transfer(
            StateTransfer::new(Trigger::interaction("accept"), "pending", "accepted").with_compute_target(link),
        );

    let mut set = ComputationSet::new();
    set.add(&schema, Target::property("Post", "status"), Computation::StateMachine(workflow))
        .unwrap();
    set.add(&schema, Target::property("Post", "moderation"), Computation::StateMachine(moderation))
        .unwrap();
    set.add(&schema, Target::property("Friendship", "status"), Computation::StateMachine(friendship))
        .unwrap();
    (RecordStorage::new(schema, MemoryStore::new()), Scheduler::new(set))
}

fn create(storage: &mut Storage, scheduler: &Scheduler, name: &str, payload: Record) -> RecordId {
    let mut events = Vec::new();
    let created = storage.create(name, payload, Some(&mut events)).unwrap();
    scheduler.process(storage, 0, events).unwrap();
    created.id().unwrap()
}

fn column(storage: &Storage, name: &str, id: RecordId, column: &str) -> Value {
    storage
        .row(name, id)
        .unwrap()
        .and_then(|row| row.get(column).cloned())
        .unwrap_or_default()
}

// =============================================================================
// Interaction Triggers
// =============================================================================

#[test]
fn workflow_follows_the_current_state_gate() {
    let (mut storage, scheduler) = setup();
    let post = create(&mut storage, &scheduler, "Post", Record::new());
    assert_eq!(column(&storage, "Post", post, "status"), Value::from("draft"));

    let target = || record([("post", Value::Id(post))]);
    let report = scheduler.process(&mut storage, 0, vec![call("archive", target())]).unwrap();
    assert!(report.transitions.is_empty());
    assert_eq!(column(&storage, "Post", post, "status"), Value::from("draft"));

    let report = scheduler.process(&mut storage, 0, vec![call("publish", target())]).unwrap();
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.transitions[0].to, "published");
    assert_eq!(column(&storage, "Post", post, "status"), Value::from("published"));

    scheduler.process(&mut storage, 0, vec![call("archive", target())]).unwrap();
    assert_eq!(column(&storage, "Post", post, "status"), Value::from("archived"));
    assert_eq!(
        column(&storage, "Post", post, &bound_state_column("status")),
        Value::from("archived")
    );
}

#[test]
fn derived_writes_inherit_the_interaction() {
    let (mut storage, scheduler) = setup();
    let post = create(&mut storage, &scheduler, "Post", Record::new());
    let report = scheduler
        .process(&mut storage, 0, vec![call("publish", record([("post", Value::Id(post))]))])
        .unwrap();
    let update = report
        .events
        .iter()
        .find(|e| e.record_name == "Post" && e.kind == MutationKind::Update)
        .unwrap();
    assert_eq!(update.interaction_name.as_deref(), Some("publish"));
    assert_eq!(update.generation, 1);
}

#[test]
fn machines_on_other_records_stay_put() {
    let (mut storage, scheduler) = setup();
    let first = create(&mut storage, &scheduler, "Post", Record::new());
    let second = create(&mut storage, &scheduler, "Post", Record::new());
    scheduler
        .process(&mut storage, 0, vec![call("publish", record([("post", Value::Id(first))]))])
        .unwrap();
    assert_eq!(column(&storage, "Post", first, "status"), Value::from("published"));
    assert_eq!(column(&storage, "Post", second, "status"), Value::from("draft"));
}

// =============================================================================
// Record Triggers
// =============================================================================

#[test]
fn record_update_pattern_drives_the_updated_record() {
    let (mut storage, scheduler) = setup();
    let post = create(&mut storage, &scheduler, "Post", Record::new());
    assert_eq!(column(&storage, "Post", post, "moderation"), Value::from("ok"));

    let mut events = Vec::new();
    storage
        .update("Post", &MatchAtom::id(post).exp(), record([("title", "edited")]), Some(&mut events))
        .unwrap();
    let report = scheduler.process(&mut storage, 0, events).unwrap();
    assert!(report.transitions.is_empty());

    let mut events = Vec::new();
    storage
        .update("Post", &MatchAtom::id(post).exp(), record([("flagged", true)]), Some(&mut events))
        .unwrap();
    let report = scheduler.process(&mut storage, 0, events).unwrap();
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(column(&storage, "Post", post, "moderation"), Value::from("review"));
}

#[test]
fn creating_a_matching_record_is_not_an_update() {
    let (mut storage, scheduler) = setup();
    let mut events = Vec::new();
    let post = storage
        .create("Post", record([("flagged", true)]), Some(&mut events))
        .unwrap()
        .id()
        .unwrap();
    let report = scheduler.process(&mut storage, 0, events).unwrap();
    assert!(report.transitions.is_empty());
    assert_eq!(column(&storage, "Post", post, "moderation"), Value::from("ok"));
    assert_eq!(
        column(&storage, "Post", post, &bound_state_column("moderation")),
        Value::from("ok")
    );
}

// =============================================================================
// Views Over Related Data
// =============================================================================

fn board_setup() -> (Storage, Scheduler) {
    let mut schema = Schema::new();
    schema
        .add_entity(Entity::new("User").with_property(Property::new("status", Type::String)))
        .unwrap();
    schema
        .add_entity(Entity::new("Board").with_property(Property::new("removed", Type::Int)))
        .unwrap();
    schema
        .add_entity(Entity::new("Post").with_property(Property::new("board", Type::Id)))
        .unwrap();
    schema
        .add_relation(Relation::new("UserPost", "User", "posts", "Post", "author", Cardinality::OneToMany))
        .unwrap();
    schema
        .add_entity(Entity::filtered(
            "ActivePost",
            "Post",
            MatchAtom::eq("author.status", "active").exp(),
        ))
        .unwrap();

    let mut registry = CallbackRegistry::new();
    let board = registry.register_compute_target("board", |event, _| {
        Ok(event
            .record
            .get("board")
            .and_then(Value::as_record_id)
            .map(TargetRef::from)
            .into_iter()
            .collect())
    });
    let zero = registry.register_compute_value("zero", |_, _, _| Ok(Value::Int(0)));
    let inc = registry.register_compute_value("inc", |last, _, _| Ok(Value::Int(last.as_int().unwrap_or(0) + 1)));
    let removed = Trigger::on("ActivePost", MutationKind::Delete);
    let counter = StateMachine::new(StateNode::new("idle").with_compute_value(zero))
        .with_state(StateNode::new("counting").with_compute_value(inc))
        .with_transfer(StateTransfer::new(removed.clone(), "idle", "counting").with_compute_target(board.clone()))
        .with_transfer(StateTransfer::new(removed, "counting", "counting").with_compute_target(board));

    let mut set = ComputationSet::new();
    set.add(&schema, Target::property("Board", "removed"), Computation::StateMachine(counter))
        .unwrap();
    (RecordStorage::new(schema, MemoryStore::new()), Scheduler::new(set))
}

fn remove(storage: &mut Storage, scheduler: &Scheduler, post: RecordId) -> Vec<MutationEvent> {
    let mut events = Vec::new();
    storage
        .delete("Post", &MatchAtom::id(post).exp(), Some(&mut events))
        .unwrap();
    scheduler.process(storage, 0, events.clone()).unwrap();
    events
}

#[test]
fn deletes_reach_views_filtering_on_related_records() {
    let (mut storage, scheduler) = board_setup();
    let board = create(&mut storage, &scheduler, "Board", Record::new());
    let ada = create(&mut storage, &scheduler, "User", record([("status", "active")]));
    let bob = create(&mut storage, &scheduler, "User", record([("status", "away")]));
    let on_board = |author| record([("board", Value::Id(board)), ("author", Value::Id(author))]);
    let by_ada = create(&mut storage, &scheduler, "Post", on_board(ada));
    let by_bob = create(&mut storage, &scheduler, "Post", on_board(bob));
    assert_eq!(column(&storage, "Board", board, "removed"), Value::Int(0));

    let events = remove(&mut storage, &scheduler, by_bob);
    let post_delete = events.iter().find(|e| e.record_name == "Post").unwrap();
    assert!(post_delete.views.is_empty());
    assert_eq!(column(&storage, "Board", board, "removed"), Value::Int(0));

    let events = remove(&mut storage, &scheduler, by_ada);
    let post_delete = events.iter().find(|e| e.record_name == "Post").unwrap();
    assert_eq!(post_delete.views, vec!["ActivePost".to_string()]);
    assert_eq!(column(&storage, "Board", board, "removed"), Value::Int(1));
    assert_eq!(
        column(&storage, "Board", board, &bound_state_column("removed")),
        Value::from("counting")
    );
}

// =============================================================================
// Relation Properties
// =============================================================================

#[test]
fn relation_records_carry_their_own_state() {
    let (mut storage, scheduler) = setup();
    let ada = create(&mut storage, &scheduler, "User", record([("name", "ada")]));
    let bob = create(&mut storage, &scheduler, "User", record([("name", "bob")]));
    let link = create(
        &mut storage,
        &scheduler,
        "Friendship",
        record([("source", Value::Id(ada)), ("target", Value::Id(bob))]),
    );
    assert_eq!(column(&storage, "Friendship", link, "status"), Value::from("pending"));

    let wrong_way = record([("from", Value::Id(bob)), ("to", Value::Id(ada))]);
    let report = scheduler.process(&mut storage, 0, vec![call("accept", wrong_way)]).unwrap();
    assert!(report.transitions.is_empty());

    let accept = record([("from", Value::Id(ada)), ("to", Value::Id(bob))]);
    scheduler.process(&mut storage, 0, vec![call("accept", accept)]).unwrap();
    assert_eq!(column(&storage, "Friendship", link, "status"), Value::from("accepted"));
}

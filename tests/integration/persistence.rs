//! Persistence across restarts
//!
//! Descriptors saved as JSON and storage saved as `MessagePack` bring an
//! application back in the state it was left in.

use std::path::PathBuf;

use reactant_engine::{
    Aggregate, Callback, CallbackRegistry, Computation, ComputationSet, ManualClock, StateMachine, StateNode,
    StateTransfer, Target, TargetRef, Trigger,
};
use reactant_foundation::{ErrorKind, RecordId, Type, Value, record};
use reactant_runtime::serialize::{
    computations_from_json, computations_to_json, from_bytes, interactions_from_json, interactions_to_json,
    load_from_file, save_to_file, to_bytes,
};
use reactant_runtime::{Condition, Controller, Interaction, InteractionArgs};
use reactant_storage::{AttributeQuery, Dictionary, Entity, MemoryStore, Property, RecordStorage, Schema};

type App = Controller<MemoryStore, ManualClock>;

fn schema() -> Schema {
    let mut schema = Schema::new();
    schema
        .add_entity(
            Entity::new("Api")
                .with_property(Property::new("name", Type::String))
                .with_property(Property::new("calls", Type::Int).with_default(0)),
        )
        .unwrap();
    schema.add_dictionary(Dictionary::new("apis", Type::Int)).unwrap();
    schema
}

fn registry() -> CallbackRegistry {
    let mut registry = CallbackRegistry::new();
    registry.register_compute_value("inc", |last, _, _| Ok(Value::Int(last.as_int().unwrap_or(0) + 1)));
    registry.register_compute_target("api", |event, _| {
        Ok(event
            .record
            .path("payload.api")
            .and_then(Value::as_record_id)
            .map(TargetRef::Id)
            .into_iter()
            .collect())
    });
    registry.register_condition("hasApi", |event, _| Ok(event.path("payload.api").is_some()));
    registry
}

fn computations(schema: &Schema, registry: &CallbackRegistry) -> ComputationSet {
    let inc = Callback::unbound("inc");
    let api = Callback::unbound("api");
    let trigger = Trigger::interaction("call");
    let machine = StateMachine::new(StateNode::new("idle"))
        .with_state(StateNode::new("busy").with_compute_value(inc))
        .with_transfer(StateTransfer::new(trigger.clone(), "idle", "busy").with_compute_target(api.clone()))
        .with_transfer(StateTransfer::new(trigger, "busy", "busy").with_compute_target(api));
    let mut set = ComputationSet::new();
    set.add(schema, Target::property("Api", "calls"), Computation::StateMachine(machine))
        .unwrap();
    set.add(schema, Target::dictionary("apis"), Computation::Count(Aggregate::over("Api")))
        .unwrap();
    set.bind(registry).unwrap();
    set
}

fn interactions(registry: &CallbackRegistry) -> Vec<Interaction> {
    let guard = Condition::new("hasApi", Callback::unbound("hasApi")).exp();
    let mut call = Interaction::new("call").with_conditions(guard);
    call.bind(registry).unwrap();
    vec![call]
}

fn assemble(storage: RecordStorage<MemoryStore>, set: ComputationSet, interactions: Vec<Interaction>) -> App {
    let mut app = Controller::new(storage, set, ManualClock::new(0));
    for interaction in interactions {
        app = app.with_interaction(interaction).unwrap();
    }
    app.setup().unwrap();
    app
}

fn fresh() -> App {
    let schema = schema();
    let registry = registry();
    let set = computations(&schema, &registry);
    assemble(RecordStorage::new(schema, MemoryStore::new()), set, interactions(&registry))
}

fn create_api(app: &mut App, name: &str) -> RecordId {
    app.create("Api", record([("name", name)])).unwrap().0.id().unwrap()
}

fn call(app: &mut App, api: RecordId) {
    let outcome = app
        .dispatch("call", InteractionArgs::new().with("api", api))
        .unwrap();
    assert!(outcome.is_committed());
}

fn calls(app: &App, api: RecordId) -> Value {
    app.storage()
        .find_by_id("Api", api, &AttributeQuery::all())
        .unwrap()
        .and_then(|r| r.get("calls").cloned())
        .unwrap_or_default()
}

fn temp_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("reactant-{}-{name}.msgpack", std::process::id()))
}

// =============================================================================
// Descriptors
// =============================================================================

#[test]
fn descriptors_survive_a_json_round_trip() {
    let original = fresh();
    let computations_json = computations_to_json(original.scheduler().computations()).unwrap();
    let interactions: Vec<Interaction> = original.interactions().cloned().collect();
    let interactions_json = interactions_to_json(&interactions).unwrap();

    let schema = schema();
    let registry = registry();
    let set = computations_from_json(&computations_json, &schema, &registry).unwrap();
    assert_eq!(&set, original.scheduler().computations());
    let loaded = interactions_from_json(&interactions_json, &registry).unwrap();

    let mut app = assemble(RecordStorage::new(schema, MemoryStore::new()), set, loaded);
    let api = create_api(&mut app, "search");
    call(&mut app, api);
    call(&mut app, api);
    assert_eq!(calls(&app, api), Value::Int(2));
    assert_eq!(app.storage().get_dictionary("apis").unwrap(), Value::Int(1));
}

#[test]
fn loading_without_the_callbacks_fails() {
    let original = fresh();
    let json = computations_to_json(original.scheduler().computations()).unwrap();
    let err = computations_from_json(&json, &schema(), &CallbackRegistry::new()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnboundCallback(_)));
}

// =============================================================================
// Snapshots
// =============================================================================

#[test]
fn snapshot_resumes_counting() {
    let mut app = fresh();
    let api = create_api(&mut app, "search");
    call(&mut app, api);

    let (_, store) = app.into_storage().into_parts();
    let bytes = to_bytes(&store).unwrap();
    let restored = from_bytes(&bytes).unwrap();

    let schema = schema();
    let registry = registry();
    let set = computations(&schema, &registry);
    let mut app = assemble(RecordStorage::new(schema, restored), set, interactions(&registry));
    assert_eq!(calls(&app, api), Value::Int(1));

    call(&mut app, api);
    assert_eq!(calls(&app, api), Value::Int(2));

    let other = create_api(&mut app, "upload");
    assert!(other > api);
    assert_eq!(app.storage().get_dictionary("apis").unwrap(), Value::Int(2));
}

#[test]
fn snapshot_file_round_trip() {
    let mut app = fresh();
    let api = create_api(&mut app, "search");
    call(&mut app, api);
    let path = temp_file("resume");

    let (_, store) = app.into_storage().into_parts();
    save_to_file(&store, &path).unwrap();
    let loaded = load_from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    let storage = RecordStorage::new(schema(), loaded);
    let row = storage.find_by_id("Api", api, &AttributeQuery::all()).unwrap().unwrap();
    assert_eq!(row.get("calls"), Some(&Value::Int(1)));
}

#[test]
fn missing_snapshot_is_a_storage_error() {
    let err = load_from_file(temp_file("missing")).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Storage(_)));
}

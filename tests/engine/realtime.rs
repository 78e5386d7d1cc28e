//! Integration tests for real-time values

use reactant_engine::{
    CallbackRegistry, Computation, ComputationSet, DICTIONARY_NEXT_RECOMPUTE, DataDep, RealTime, Scheduler, Target,
    next_recompute_column,
};
use reactant_foundation::{Record, RecordId, Type, Value, record};
use reactant_storage::{
    AttributeQuery, DICTIONARY_ENTITY, Dictionary, Entity, MatchAtom, MemoryStore, Property, RecordStorage, Schema,
};

type Storage = RecordStorage<MemoryStore>;

fn setup() -> (Storage, Scheduler) {
    let mut schema = Schema::new();
    schema
        .add_entity(
            Entity::new("Session")
                .with_property(Property::new("started", Type::Int).with_default(0))
                .with_property(Property::new("age", Type::Int)),
        )
        .unwrap();
    schema.add_dictionary(Dictionary::new("clock", Type::Int)).unwrap();

    let mut registry = CallbackRegistry::new();
    let age = registry.register_real_time("age", |now, session, _| {
        let started = session
            .and_then(|s| s.get("started"))
            .and_then(Value::as_int)
            .unwrap_or(0);
        Ok(Value::Int((now - started) / 1000))
    });
    let next_second = registry.register_next_recompute("nextSecond", |now, _, _| Ok(Some(now + 1000)));
    let clock = registry.register_real_time("clock", |now, _, _| Ok(Value::Int(now / 1000)));

    let mut set = ComputationSet::new();
    set.add(
        &schema,
        Target::property("Session", "age"),
        Computation::RealTime(
            RealTime::new(age)
                .with_next_recompute(next_second)
                .with_dep(DataDep::Own(vec!["started".into()])),
        ),
    )
    .unwrap();
    set.add(&schema, Target::dictionary("clock"), Computation::RealTime(RealTime::new(clock)))
        .unwrap();
    (RecordStorage::new(schema, MemoryStore::new()), Scheduler::new(set))
}

fn session(storage: &mut Storage, scheduler: &Scheduler, now: i64) -> RecordId {
    let mut events = Vec::new();
    let created = storage
        .create("Session", record([("started", Value::Int(now))]), Some(&mut events))
        .unwrap();
    scheduler.process(storage, now, events).unwrap();
    created.id().unwrap()
}

fn column(storage: &Storage, id: RecordId, column: &str) -> Value {
    storage
        .row("Session", id)
        .unwrap()
        .and_then(|row| row.get(column).cloned())
        .unwrap_or_default()
}

#[test]
fn computed_on_create_then_on_schedule() {
    let (mut storage, scheduler) = setup();
    let id = session(&mut storage, &scheduler, 0);
    assert_eq!(column(&storage, id, "age"), Value::Int(0));
    assert_eq!(column(&storage, id, &next_recompute_column("age")), Value::Int(1000));

    scheduler.refresh_real_time(&mut storage, 500).unwrap();
    assert_eq!(column(&storage, id, &next_recompute_column("age")), Value::Int(1000));

    scheduler.refresh_real_time(&mut storage, 2500).unwrap();
    assert_eq!(column(&storage, id, "age"), Value::Int(2));
    assert_eq!(column(&storage, id, &next_recompute_column("age")), Value::Int(3500));
}

#[test]
fn own_dependency_recomputes_early() {
    let (mut storage, scheduler) = setup();
    let id = session(&mut storage, &scheduler, 0);
    let mut events = Vec::new();
    storage
        .update("Session", &MatchAtom::id(id).exp(), record([("started", -5000)]), Some(&mut events))
        .unwrap();
    scheduler.process(&mut storage, 1000, events).unwrap();
    assert_eq!(column(&storage, id, "age"), Value::Int(6));
}

#[test]
fn unscheduled_dictionary_refreshes_every_time() {
    let (mut storage, scheduler) = setup();
    scheduler.refresh_real_time(&mut storage, 3000).unwrap();
    assert_eq!(storage.get_dictionary("clock").unwrap(), Value::Int(3));
    scheduler.refresh_real_time(&mut storage, 7000).unwrap();
    assert_eq!(storage.get_dictionary("clock").unwrap(), Value::Int(7));

    let row = storage
        .find_one(
            DICTIONARY_ENTITY,
            Some(&MatchAtom::eq("key", "clock").exp()),
            &AttributeQuery::fields([DICTIONARY_NEXT_RECOMPUTE]),
        )
        .unwrap()
        .unwrap_or_else(Record::new);
    assert_eq!(row.get(DICTIONARY_NEXT_RECOMPUTE).cloned().unwrap_or_default(), Value::Nil);
}

//! Integration tests for aggregate computations
//!
//! Tests the six folds over relation-linked records and over whole
//! entities, kept current as links and far records change.

use reactant_engine::{Aggregate, CallbackRegistry, Computation, ComputationSet, Scheduler, Target};
use reactant_foundation::{Record, RecordId, Type, Value, record};
use reactant_storage::{
    Cardinality, Dictionary, Entity, MatchAtom, MemoryStore, MutationEvent, Property, RecordStorage, Relation, Schema,
};

type Storage = RecordStorage<MemoryStore>;

fn shop() -> (Storage, Scheduler) {
    let mut schema = Schema::new();
    schema
        .add_entity(
            Entity::new("Order")
                .with_property(Property::new("lines", Type::Int))
                .with_property(Property::new("total", Type::Number))
                .with_property(Property::new("avgPrice", Type::Number))
                .with_property(Property::new("allShipped", Type::Bool))
                .with_property(Property::new("anyRush", Type::Bool)),
        )
        .unwrap();
    schema
        .add_entity(
            Entity::new("Item")
                .with_property(Property::new("price", Type::Int))
                .with_property(Property::new("shipped", Type::Bool).with_default(false))
                .with_property(Property::new("rush", Type::Bool).with_default(false)),
        )
        .unwrap();
    schema
        .add_relation(
            Relation::new("OrderItem", "Order", "items", "Item", "order", Cardinality::OneToMany)
                .with_property(Property::new("qty", Type::Int).with_default(1)),
        )
        .unwrap();
    schema
        .add_dictionary(Dictionary::new("itemCount", Type::Int).with_default(0))
        .unwrap();
    schema
        .add_dictionary(Dictionary::new("catalogValue", Type::Number).with_default(0))
        .unwrap();

    let mut registry = CallbackRegistry::new();
    let line = registry.register_weight("line", |item, _| {
        let qty = item.path("&.qty").and_then(Value::as_number).unwrap_or(0.0);
        let price = item.get("price").and_then(Value::as_number).unwrap_or(0.0);
        Ok((qty, price))
    });
    let shipped = registry.register_match("shipped", |item, _| {
        Ok(item.get("shipped").is_some_and(Value::is_truthy))
    });
    let rush = registry.register_match("rush", |item, _| Ok(item.get("rush").is_some_and(Value::is_truthy)));

    let mut set = ComputationSet::new();
    let over = || Aggregate::over("OrderItem");
    let computations = [
        (Target::property("Order", "lines"), Computation::Count(over())),
        (Target::property("Order", "total"), Computation::WeightedSummation(over().with_weight(line))),
        (Target::property("Order", "avgPrice"), Computation::Average(over().with_attribute("price"))),
        (
            Target::property("Order", "allShipped"),
            Computation::Every(over().with_callback(shipped).not_empty()),
        ),
        (Target::property("Order", "anyRush"), Computation::Any(over().with_callback(rush))),
        (Target::dictionary("itemCount"), Computation::Count(Aggregate::over("Item"))),
        (
            Target::dictionary("catalogValue"),
            Computation::Summation(Aggregate::over("Item").with_attribute("price")),
        ),
    ];
    for (target, computation) in computations {
        set.add(&schema, target, computation).unwrap();
    }
    (RecordStorage::new(schema, MemoryStore::new()), Scheduler::new(set))
}

fn run(storage: &mut Storage, scheduler: &Scheduler, write: impl FnOnce(&mut Storage, &mut Vec<MutationEvent>)) {
    let mut events = Vec::new();
    write(storage, &mut events);
    let report = scheduler.process(storage, 0, events).unwrap();
    assert!(report.is_clean());
}

fn order(storage: &mut Storage, scheduler: &Scheduler, items: &[(i64, i64)]) -> RecordId {
    let lines: Vec<Value> = items
        .iter()
        .map(|(price, qty)| {
            Value::Map(record([
                ("price", Value::Int(*price)),
                ("&", Value::Map(record([("qty", Value::Int(*qty))]))),
            ]))
        })
        .collect();
    let mut id = None;
    run(storage, scheduler, |s, events| {
        let created = s
            .create("Order", record([("items", Value::from(lines))]), Some(events))
            .unwrap();
        id = created.id();
    });
    id.unwrap()
}

fn get(storage: &Storage, id: RecordId, column: &str) -> Value {
    storage
        .row("Order", id)
        .unwrap()
        .and_then(|row| row.get(column).cloned())
        .unwrap_or_default()
}

fn item_of(storage: &Storage, order: RecordId, price: i64) -> RecordId {
    let exp = MatchAtom::eq("order.id", order).exp().and(MatchAtom::eq("price", price));
    storage
        .find_one("Item", Some(&exp), &reactant_storage::AttributeQuery::default())
        .unwrap()
        .and_then(|r| r.id())
        .unwrap()
}

// =============================================================================
// Property Aggregates
// =============================================================================

#[test]
fn folds_over_linked_records() {
    let (mut storage, scheduler) = shop();
    let id = order(&mut storage, &scheduler, &[(2, 3), (4, 1)]);
    assert_eq!(get(&storage, id, "lines"), Value::Int(2));
    assert_eq!(get(&storage, id, "total"), Value::Int(10));
    assert_eq!(get(&storage, id, "avgPrice"), Value::Int(3));
    assert_eq!(get(&storage, id, "allShipped"), Value::Bool(false));
    assert_eq!(get(&storage, id, "anyRush"), Value::Bool(false));
}

#[test]
fn empty_owner_gets_identity_values() {
    let (mut storage, scheduler) = shop();
    let id = order(&mut storage, &scheduler, &[]);
    assert_eq!(get(&storage, id, "lines"), Value::Int(0));
    assert_eq!(get(&storage, id, "total"), Value::Int(0));
    assert_eq!(get(&storage, id, "avgPrice"), Value::Int(0));
    // not_empty turns the vacuous truth off
    assert_eq!(get(&storage, id, "allShipped"), Value::Bool(false));
}

#[test]
fn far_record_updates_refold() {
    let (mut storage, scheduler) = shop();
    let id = order(&mut storage, &scheduler, &[(1, 1), (2, 1)]);
    assert_eq!(get(&storage, id, "avgPrice"), Value::Float(1.5));

    for price in [1, 2] {
        let item = item_of(&storage, id, price);
        run(&mut storage, &scheduler, |s, events| {
            s.update("Item", &MatchAtom::id(item).exp(), record([("shipped", true)]), Some(events))
                .unwrap();
        });
    }
    assert_eq!(get(&storage, id, "allShipped"), Value::Bool(true));

    let item = item_of(&storage, id, 1);
    run(&mut storage, &scheduler, |s, events| {
        s.update("Item", &MatchAtom::id(item).exp(), record([("rush", true)]), Some(events))
            .unwrap();
    });
    assert_eq!(get(&storage, id, "anyRush"), Value::Bool(true));
}

#[test]
fn link_attribute_updates_refold() {
    let (mut storage, scheduler) = shop();
    let id = order(&mut storage, &scheduler, &[(5, 1)]);
    assert_eq!(get(&storage, id, "total"), Value::Int(5));
    run(&mut storage, &scheduler, |s, events| {
        s.update_relation_by_name("OrderItem", &MatchAtom::eq("source", id).exp(), record([("qty", 4)]), Some(events))
            .unwrap();
    });
    assert_eq!(get(&storage, id, "total"), Value::Int(20));
}

#[test]
fn unlinking_shrinks_the_fold() {
    let (mut storage, scheduler) = shop();
    let id = order(&mut storage, &scheduler, &[(2, 1), (4, 1)]);
    let item = item_of(&storage, id, 4);
    run(&mut storage, &scheduler, |s, events| {
        s.remove_relation_by_name("OrderItem", &MatchAtom::eq("target", item).exp(), Some(events))
            .unwrap();
    });
    assert_eq!(get(&storage, id, "lines"), Value::Int(1));
    assert_eq!(get(&storage, id, "avgPrice"), Value::Int(2));
}

// =============================================================================
// Dictionary Aggregates
// =============================================================================

#[test]
fn dictionary_folds_whole_entity() {
    let (mut storage, scheduler) = shop();
    order(&mut storage, &scheduler, &[(2, 1), (4, 1)]);
    run(&mut storage, &scheduler, |s, events| {
        s.create("Item", record([("price", 10)]), Some(events)).unwrap();
    });
    assert_eq!(storage.get_dictionary("itemCount").unwrap(), Value::Int(3));
    assert_eq!(storage.get_dictionary("catalogValue").unwrap(), Value::Int(16));

    run(&mut storage, &scheduler, |s, events| {
        s.delete("Item", &MatchAtom::eq("price", 10).exp(), Some(events)).unwrap();
    });
    assert_eq!(storage.get_dictionary("itemCount").unwrap(), Value::Int(2));
    assert_eq!(storage.get_dictionary("catalogValue").unwrap(), Value::Int(6));
}

// =============================================================================
// Initialization
// =============================================================================

#[test]
fn initialize_catches_up_with_existing_rows() {
    let (mut storage, scheduler) = shop();
    let id = storage.create("Order", Record::new(), None).unwrap().id().unwrap();
    for price in [3, 5] {
        storage
            .create("Item", record([("price", Value::Int(price)), ("order", Value::Id(id))]), None)
            .unwrap();
    }
    assert_eq!(get(&storage, id, "lines"), Value::Nil);

    scheduler.initialize(&mut storage, 0).unwrap();
    assert_eq!(get(&storage, id, "lines"), Value::Int(2));
    assert_eq!(get(&storage, id, "avgPrice"), Value::Int(4));
    assert_eq!(storage.get_dictionary("itemCount").unwrap(), Value::Int(2));
}

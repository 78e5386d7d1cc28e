//! Integration tests for filtered and merged views

use proptest::prelude::*;
use reactant_foundation::{Record, RecordId, Type, Value, record};
use reactant_storage::{
    AttributeQuery, Comparator, Entity, MatchAtom, MatchExp, MemoryStore, Modifier, MutationKind, Property,
    RecordStorage, Schema,
};

fn storage() -> RecordStorage<MemoryStore> {
    let mut schema = Schema::new();
    schema
        .add_entity(
            Entity::new("User")
                .with_property(Property::required("name", Type::String))
                .with_property(Property::new("age", Type::Int).with_default(0))
                .with_property(Property::new("banned", Type::Bool).with_default(false)),
        )
        .unwrap();
    schema
        .add_entity(Entity::filtered(
            "Adult",
            "User",
            MatchAtom::new("age", Comparator::Ge, 18).exp(),
        ))
        .unwrap();
    schema
        .add_entity(Entity::filtered("ActiveAdult", "Adult", MatchAtom::eq("banned", false).exp()))
        .unwrap();
    schema
        .add_entity(Entity::new("Cat").with_property(Property::new("name", Type::String)))
        .unwrap();
    schema
        .add_entity(Entity::new("Dog").with_property(Property::new("name", Type::String)))
        .unwrap();
    schema.add_entity(Entity::merged("Pet", ["Cat", "Dog"]).unwrap()).unwrap();
    RecordStorage::new(schema, MemoryStore::new())
}

fn user(s: &mut RecordStorage<MemoryStore>, name: &str, age: i64) -> RecordId {
    s.create("User", record([("name", Value::from(name)), ("age", Value::Int(age))]), None)
        .unwrap()
        .id()
        .unwrap()
}

fn names(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.get("name").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

fn all(s: &RecordStorage<MemoryStore>, name: &str, filter: Option<&MatchExp>) -> Vec<Record> {
    s.find(name, filter, &AttributeQuery::all(), &Modifier::new()).unwrap()
}

// =============================================================================
// Filtered Entities
// =============================================================================

#[test]
fn view_sees_only_matching_rows() {
    let mut s = storage();
    user(&mut s, "ada", 36);
    user(&mut s, "bob", 12);
    assert_eq!(names(&all(&s, "Adult", None)), vec!["ada"]);
    assert_eq!(all(&s, "User", None).len(), 2);
}

#[test]
fn nested_views_conjoin_filters() {
    let mut s = storage();
    user(&mut s, "ada", 36);
    user(&mut s, "bob", 12);
    let cy = user(&mut s, "cy", 52);
    s.update("User", &MatchAtom::id(cy).exp(), record([("banned", Value::Bool(true))]), None)
        .unwrap();
    assert_eq!(names(&all(&s, "ActiveAdult", None)), vec!["ada"]);
    assert_eq!(names(&all(&s, "Adult", None)), vec!["ada", "cy"]);
}

#[test]
fn view_membership_follows_updates() {
    let mut s = storage();
    let bob = user(&mut s, "bob", 12);
    let row = s.find_by_id("User", bob, &AttributeQuery::all()).unwrap().unwrap();
    assert!(!s.record_belongs_to("Adult", &row).unwrap());

    s.update("User", &MatchAtom::id(bob).exp(), record([("age", Value::Int(18))]), None)
        .unwrap();
    assert!(s.record_belongs_to("Adult", &row).unwrap());
}

#[test]
fn view_events_name_the_storage_table() {
    let mut s = storage();
    user(&mut s, "ada", 36);
    let mut events = Vec::new();
    s.update(
        "Adult",
        &MatchAtom::eq("name", "ada").exp(),
        record([("age", Value::Int(37))]),
        Some(&mut events),
    )
    .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].record_name, "User");
    assert_eq!(events[0].kind, MutationKind::Update);
    assert_eq!(
        events[0].old_record.as_ref().and_then(|r| r.get("age")),
        Some(&Value::Int(36))
    );
}

#[test]
fn delete_through_view_spares_hidden_rows() {
    let mut s = storage();
    user(&mut s, "ada", 36);
    user(&mut s, "bob", 12);
    let deleted = s.delete("Adult", &MatchAtom::eq("name", "bob").exp(), None).unwrap();
    assert!(deleted.is_empty());
    assert_eq!(s.adapter().len("User"), 2);
}

// =============================================================================
// Merged Entities
// =============================================================================

#[test]
fn merged_entity_reads_every_input() {
    let mut s = storage();
    s.create("Cat", record([("name", Value::from("tom"))]), None).unwrap();
    s.create("Dog", record([("name", Value::from("rex"))]), None).unwrap();

    assert_eq!(names(&all(&s, "Pet", None)), vec!["tom", "rex"]);
    assert_eq!(names(&all(&s, "Cat", None)), vec!["tom"]);
    assert_eq!(names(&all(&s, "Dog", None)), vec!["rex"]);
    assert_eq!(s.adapter().len("Pet"), 2);
}

#[test]
fn merged_input_writes_stay_in_their_input() {
    let mut s = storage();
    s.create("Cat", record([("name", Value::from("tom"))]), None).unwrap();
    s.create("Dog", record([("name", Value::from("rex"))]), None).unwrap();

    let mut events = Vec::new();
    let everything = MatchAtom::new("name", Comparator::Ne, "").exp();
    let deleted = s.delete("Dog", &everything, Some(&mut events)).unwrap();
    assert_eq!(names(&deleted), vec!["rex"]);
    assert_eq!(events[0].record_name, "Pet");
    assert_eq!(names(&all(&s, "Pet", None)), vec!["tom"]);
}

// =============================================================================
// Transparency
// =============================================================================

fn caller_filter(threshold: i64, eq: bool) -> MatchExp {
    if eq {
        MatchAtom::eq("age", threshold).exp()
    } else {
        MatchAtom::new("age", Comparator::Lt, threshold).exp()
    }
}

proptest! {
    #[test]
    fn filtered_find_matches_conjoined_source_find(
        ages in prop::collection::vec(0i64..60, 0..20),
        threshold in 0i64..60,
        eq in any::<bool>(),
    ) {
        let mut s = storage();
        for (i, age) in ages.iter().enumerate() {
            user(&mut s, &format!("u{i}"), *age);
        }
        let caller = caller_filter(threshold, eq);
        let through_view = all(&s, "Adult", Some(&caller));
        let conjoined = MatchAtom::new("age", Comparator::Ge, 18).exp().and(caller);
        prop_assert_eq!(through_view, all(&s, "User", Some(&conjoined)));
    }

    #[test]
    fn filtered_update_touches_only_the_conjoined_subset(
        ages in prop::collection::vec(0i64..60, 0..20),
        threshold in 0i64..60,
    ) {
        let mut s = storage();
        for (i, age) in ages.iter().enumerate() {
            user(&mut s, &format!("u{i}"), *age);
        }
        let caller = caller_filter(threshold, false);
        let expected = ages.iter().filter(|&&age| age >= 18 && age < threshold).count();
        let updated = s
            .update("Adult", &caller, record([("banned", Value::Bool(true))]), None)
            .unwrap();
        prop_assert_eq!(updated.len(), expected);
        let banned = all(&s, "User", Some(&MatchAtom::eq("banned", true).exp()));
        prop_assert_eq!(banned.len(), expected);
    }

    #[test]
    fn filtered_delete_removes_only_the_conjoined_subset(
        ages in prop::collection::vec(0i64..60, 0..20),
        threshold in 0i64..60,
    ) {
        let mut s = storage();
        for (i, age) in ages.iter().enumerate() {
            user(&mut s, &format!("u{i}"), *age);
        }
        let caller = caller_filter(threshold, false);
        let expected = ages.iter().filter(|&&age| age >= 18 && age < threshold).count();
        let deleted = s.delete("Adult", &caller, None).unwrap();
        prop_assert_eq!(deleted.len(), expected);
        prop_assert_eq!(s.adapter().len("User"), ages.len() - expected);
    }
}

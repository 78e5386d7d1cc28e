//! A small social application
//!
//! Posts are created by a transform from an interaction, counted on their
//! author, and hard-deleted by a state machine. Authorship links carry a
//! deletion machine of their own.

use reactant_engine::{
    Aggregate, CallbackRegistry, Computation, ComputationSet, ManualClock, NON_DELETED, StateMachine, StateNode,
    StateTransfer, Target, TargetRef, Transform, TransformOutput, TransformSource, Trigger, bound_state_column,
};
use reactant_foundation::{Record, RecordId, Type, Value, record};
use reactant_runtime::{Condition, Controller, ControllerConfig, Interaction, InteractionArgs};
use reactant_storage::{
    AttributeQuery, Cardinality, Entity, HARD_DELETION_PROPERTY, MatchAtom, MemoryStore, Modifier, MutationKind,
    Property, RecordReader, RecordStorage, Relation, Schema,
};

type App = Controller<MemoryStore, ManualClock>;

fn app() -> App {
    let mut schema = Schema::new();
    schema
        .add_entity(
            Entity::new("User")
                .with_property(Property::required("name", Type::String))
                .with_property(Property::new("postCount", Type::Int)),
        )
        .unwrap();
    schema
        .add_entity(
            Entity::new("Post")
                .with_property(Property::new("title", Type::String))
                .with_property(Property::new("visibility", Type::String))
                .with_property(Property::hard_deletion()),
        )
        .unwrap();
    schema
        .add_relation(
            Relation::new("UserPost", "User", "posts", "Post", "author", Cardinality::OneToMany)
                .with_property(Property::hard_deletion()),
        )
        .unwrap();

    let mut registry = CallbackRegistry::new();
    let create_post = registry.register_transform("createPost", |event, _| {
        let title = event.record.path("payload.title").cloned().unwrap_or_default();
        let author = event.record.get("user").cloned().unwrap_or_default();
        let output = TransformOutput::new(record([("title", title), ("author", author)]));
        let private = event.record.path("payload.private").is_some_and(Value::is_truthy);
        Ok(Some(if private {
            output.with_initial_state("visibility", "private")
        } else {
            output
        }))
    });
    let post = registry.register_compute_target("post", |event, _| {
        Ok(event
            .record
            .path("payload.post")
            .and_then(Value::as_record_id)
            .map(TargetRef::Id)
            .into_iter()
            .collect())
    });
    let authorship = registry.register_compute_target("authorship", |event, _| {
        let source = event.record.get("user").and_then(Value::as_record_id);
        let target = event.record.path("payload.post").and_then(Value::as_record_id);
        Ok(match (source, target) {
            (Some(source), Some(target)) => vec![TargetRef::Link { source, target }],
            _ => Vec::new(),
        })
    });
    let is_author = registry.register_condition("isAuthor", |event, ctx| {
        let (Some(post), Some(user)) = (
            event.path("payload.post").and_then(Value::as_record_id),
            event.get("user").and_then(Value::as_record_id),
        ) else {
            return Ok(false);
        };
        let exp = MatchAtom::id(post).exp().and(MatchAtom::eq("author.id", user));
        Ok(ctx.storage.find_one("Post", Some(&exp), &AttributeQuery::default())?.is_some())
    });
    let shown = registry.register_compute_value("public", |_, _, _| Ok(Value::from("public")));
    let hidden = registry.register_compute_value("private", |_, _, _| Ok(Value::from("private")));

    let visibility = StateMachine::new(StateNode::new("public").with_compute_value(shown))
        .with_state(StateNode::new("private").with_compute_value(hidden))
        .with_transfer(
            StateTransfer::new(Trigger::interaction("hidePost"), "public", "private").with_compute_target(post.clone()),
        );

    let mut set = ComputationSet::new();
    set.add(
        &schema,
        Target::entity("Post"),
        Computation::Transform(Transform::new(
            TransformSource::Interaction(Some("createPost".into())),
            create_post,
        )),
    )
    .unwrap();
    set.add(&schema, Target::property("User", "postCount"), Computation::Count(Aggregate::over("UserPost")))
        .unwrap();
    set.add(&schema, Target::property("Post", "visibility"), Computation::StateMachine(visibility))
        .unwrap();
    set.add(
        &schema,
        Target::property("Post", HARD_DELETION_PROPERTY),
        Computation::StateMachine(StateMachine::hard_deletion(Trigger::interaction("deletePost"), Some(post))),
    )
    .unwrap();
    set.add(
        &schema,
        Target::property("UserPost", HARD_DELETION_PROPERTY),
        Computation::StateMachine(StateMachine::hard_deletion(
            Trigger::interaction("detachPost"),
            Some(authorship),
        )),
    )
    .unwrap();

    let mut controller = Controller::new(RecordStorage::new(schema, MemoryStore::new()), set, ManualClock::new(0))
        .with_config(ControllerConfig::default())
        .with_interaction(Interaction::new("createPost"))
        .unwrap()
        .with_interaction(Interaction::new("hidePost"))
        .unwrap()
        .with_interaction(Interaction::new("detachPost"))
        .unwrap()
        .with_interaction(
            Interaction::new("deletePost").with_conditions(Condition::new("isAuthor", is_author).exp()),
        )
        .unwrap();
    controller.setup().unwrap();
    controller
}

fn user(app: &mut App, name: &str) -> RecordId {
    app.create("User", record([("name", name)])).unwrap().0.id().unwrap()
}

fn publish(app: &mut App, author: RecordId, title: &str, private: bool) -> RecordId {
    let args = InteractionArgs::new()
        .with_user(author)
        .with("title", title)
        .with("private", private);
    let outcome = app.dispatch("createPost", args).unwrap();
    let report = outcome.report().unwrap();
    report
        .events
        .iter()
        .find(|e| e.record_name == "Post" && e.kind == MutationKind::Create)
        .and_then(|e| e.id())
        .unwrap()
}

fn post_count(app: &App, user: RecordId) -> Value {
    app.storage()
        .row("User", user)
        .unwrap()
        .and_then(|r| r.get("postCount").cloned())
        .unwrap_or_default()
}

fn links(app: &App) -> Vec<Record> {
    app.storage()
        .find("UserPost", None, &AttributeQuery::all(), &Modifier::new())
        .unwrap()
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn transform_creates_linked_posts() {
    let mut app = app();
    let ada = user(&mut app, "ada");
    assert_eq!(post_count(&app, ada), Value::Int(0));

    let post = publish(&mut app, ada, "hello", false);
    assert_eq!(post_count(&app, ada), Value::Int(1));
    assert_eq!(links(&app).len(), 1);
    assert_eq!(links(&app)[0].get("target"), Some(&Value::Id(post)));
}

#[test]
fn hard_deletion_cascades_to_links_and_counts() {
    let mut app = app();
    let ada = user(&mut app, "ada");
    let first = publish(&mut app, ada, "first", false);
    publish(&mut app, ada, "second", false);
    assert_eq!(post_count(&app, ada), Value::Int(2));

    let args = InteractionArgs::new().with_user(ada).with("post", first);
    let outcome = app.dispatch("deletePost", args).unwrap();
    let report = outcome.report().unwrap();
    let deletes: Vec<_> = report
        .events
        .iter()
        .filter(|e| e.kind == MutationKind::Delete)
        .map(|e| e.record_name.as_str())
        .collect();
    assert_eq!(deletes, vec!["UserPost", "Post"]);

    assert!(app.storage().row("Post", first).unwrap().is_none());
    assert_eq!(links(&app).len(), 1);
    assert_eq!(post_count(&app, ada), Value::Int(1));
}

#[test]
fn link_deletion_machine_removes_only_the_link() {
    let mut app = app();
    let ada = user(&mut app, "ada");
    let post = publish(&mut app, ada, "kept", false);
    let link = links(&app)[0].id().unwrap();
    let link_state = app
        .storage()
        .row("UserPost", link)
        .unwrap()
        .and_then(|r| r.get(bound_state_column(HARD_DELETION_PROPERTY).as_str()).cloned());
    assert_eq!(link_state, Some(Value::from(NON_DELETED)));

    let args = InteractionArgs::new().with_user(ada).with("post", post);
    let outcome = app.dispatch("detachPost", args).unwrap();
    let report = outcome.report().unwrap();
    let deletes: Vec<_> = report
        .events
        .iter()
        .filter(|e| e.kind == MutationKind::Delete)
        .map(|e| e.record_name.as_str())
        .collect();
    assert_eq!(deletes, vec!["UserPost"]);

    assert!(app.storage().row("UserPost", link).unwrap().is_none());
    assert!(app.storage().row("Post", post).unwrap().is_some());
    assert!(links(&app).is_empty());
    assert_eq!(post_count(&app, ada), Value::Int(0));

    let again = app
        .dispatch("detachPost", InteractionArgs::new().with_user(ada).with("post", post))
        .unwrap();
    assert!(again.report().unwrap().transitions.is_empty());
}

#[test]
fn only_the_author_may_delete() {
    let mut app = app();
    let ada = user(&mut app, "ada");
    let bob = user(&mut app, "bob");
    let post = publish(&mut app, ada, "mine", false);

    let args = InteractionArgs::new().with_user(bob).with("post", post);
    let outcome = app.dispatch("deletePost", args).unwrap();
    assert_eq!(outcome.rejection().unwrap().condition, "isAuthor");
    assert!(app.storage().row("Post", post).unwrap().is_some());
    assert_eq!(post_count(&app, ada), Value::Int(1));
}

// =============================================================================
// Initial States
// =============================================================================

#[test]
fn posts_start_public_unless_created_private() {
    let mut app = app();
    let ada = user(&mut app, "ada");
    let open = publish(&mut app, ada, "open", false);
    let secret = publish(&mut app, ada, "secret", true);

    let visibility = |app: &App, id: RecordId| {
        app.storage()
            .row("Post", id)
            .unwrap()
            .and_then(|r| r.get("visibility").cloned())
            .unwrap_or_default()
    };
    assert_eq!(visibility(&app, open), Value::from("public"));
    assert_eq!(visibility(&app, secret), Value::from("private"));

    let outcome = app
        .dispatch("hidePost", InteractionArgs::new().with("post", secret))
        .unwrap();
    assert!(outcome.report().unwrap().transitions.is_empty());
    app.dispatch("hidePost", InteractionArgs::new().with("post", open))
        .unwrap();
    assert_eq!(visibility(&app, open), Value::from("private"));
}

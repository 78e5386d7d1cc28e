//! Computation descriptors and the set that binds them to schema targets.
//!
//! Descriptors are plain data plus callback slots. They carry no execution
//! logic; the [`Scheduler`](crate::Scheduler) switches on the variant.

use std::fmt;

use reactant_foundation::{Error, Record, Result, Value};
use reactant_storage::{AttributeQuery, RelationEnd, Schema};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::callback::{Callback, CallbackRegistry, MatchFn, NextRecomputeFn, RealTimeFn, TransformFn, WeightFn};
use crate::state_machine::StateMachine;

// =============================================================================
// Aggregates
// =============================================================================

/// The owner's end of a relation, for relations whose both ends touch the
/// owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The owner is the relation's source.
    Source,
    /// The owner is the relation's target.
    Target,
}

/// Extra inputs of a computed value besides its related records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataDep {
    /// Columns of the owning record.
    Own(Vec<String>),
    /// A global dictionary value.
    Dictionary(String),
}

/// Which fold an aggregate applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateKind {
    /// Number of (matching) records.
    Count,
    /// Sum of an attribute.
    Summation,
    /// Mean of an attribute.
    Average,
    /// Sum of `weight * value`.
    WeightedSummation,
    /// Whether all records match.
    Every,
    /// Whether any record matches.
    Any,
}

/// Shared shape of the six aggregate descriptors.
///
/// For a property, `record` names a relation touching the owner and the
/// aggregate folds the far-end records, each carrying its link record under
/// the `&` key. For a dictionary, `record` names an entity or relation and the
/// aggregate folds all of its records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    /// Relation (property aggregates) or entity/relation (dictionary aggregates).
    pub record: String,
    /// Owner end, required when the relation connects the owner to itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    /// Dotted path of the summed attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    /// Projection of the records handed to callbacks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_query: Option<AttributeQuery>,
    /// Per-record predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<Callback<MatchFn>>,
    /// Per-record weight and value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<Callback<WeightFn>>,
    /// `Every` over an empty set is false instead of true.
    #[serde(default)]
    pub not_empty: bool,
    /// Extra dependencies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_deps: Vec<DataDep>,
}

impl Aggregate {
    /// Aggregates over `record`.
    #[must_use]
    pub fn over(record: impl Into<String>) -> Self {
        Self {
            record: record.into(),
            direction: None,
            attribute: None,
            attribute_query: None,
            callback: None,
            weight: None,
            not_empty: false,
            data_deps: Vec::new(),
        }
    }

    /// Builder method to set the owner end.
    #[must_use]
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Builder method to set the summed attribute.
    #[must_use]
    pub fn with_attribute(mut self, path: impl Into<String>) -> Self {
        self.attribute = Some(path.into());
        self
    }

    /// Builder method to set the projection handed to callbacks.
    #[must_use]
    pub fn with_attribute_query(mut self, query: AttributeQuery) -> Self {
        self.attribute_query = Some(query);
        self
    }

    /// Builder method to set the per-record predicate.
    #[must_use]
    pub fn with_callback(mut self, callback: Callback<MatchFn>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Builder method to set the weight callback.
    #[must_use]
    pub fn with_weight(mut self, weight: Callback<WeightFn>) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Builder method to make `Every` false on an empty set.
    #[must_use]
    pub fn not_empty(mut self) -> Self {
        self.not_empty = true;
        self
    }

    /// Builder method to add a dependency.
    #[must_use]
    pub fn with_dep(mut self, dep: DataDep) -> Self {
        self.data_deps.push(dep);
        self
    }

    /// Resolves the owner's end of [`Aggregate::record`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` if the relation does not touch `owner`, or
    /// touches it at both ends and no direction is set.
    pub fn end_for(&self, schema: &Schema, owner: &str) -> Result<RelationEnd> {
        if schema.relation(&self.record).is_none() {
            return Err(Error::invalid_schema(format!(
                "{} is not a relation; property aggregates run over relations",
                self.record
            )));
        }
        let mut ends: Vec<RelationEnd> = schema
            .relation_ends(owner)?
            .into_iter()
            .filter(|end| end.relation == self.record)
            .filter(|end| match self.direction {
                Some(Direction::Source) => end.is_source,
                Some(Direction::Target) => !end.is_source,
                None => true,
            })
            .collect();
        match ends.len() {
            0 => Err(Error::invalid_schema(format!("{} does not touch {owner}", self.record))),
            1 => Ok(ends.remove(0)),
            _ => Err(Error::invalid_schema(format!(
                "{} connects {owner} to itself; set a direction",
                self.record
            ))),
        }
    }

    fn validate(&self, kind: AggregateKind) -> Result<()> {
        let missing = match kind {
            AggregateKind::Summation | AggregateKind::Average if self.attribute.is_none() => Some("attribute"),
            AggregateKind::WeightedSummation if self.weight.is_none() => Some("weight"),
            AggregateKind::Every | AggregateKind::Any if self.callback.is_none() => Some("callback"),
            _ => None,
        };
        missing.map_or(Ok(()), |field| {
            Err(Error::invalid_schema(format!("{kind:?} over {} needs a {field}", self.record)))
        })
    }

    fn bind(&mut self, registry: &CallbackRegistry) -> Result<()> {
        registry.bind_opt(self.callback.as_mut())?;
        registry.bind_opt(self.weight.as_mut())
    }
}

// =============================================================================
// Transform and RealTime
// =============================================================================

/// Events a transform reacts to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransformSource {
    /// Creation of records of an entity or relation.
    Record(String),
    /// Dispatch of an interaction, optionally a specific one.
    Interaction(Option<String>),
}

/// Initial bound state for a record created by a transform, overriding the
/// machine's nominal initial state.
#[derive(Clone, Debug, PartialEq)]
pub struct InitialState {
    /// Machine-driven property.
    pub property: String,
    /// Starting state name.
    pub state: String,
    /// Starting value; when absent the state's value function runs.
    pub value: Option<Value>,
}

/// What a transform callback produces.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransformOutput {
    /// Create payload.
    pub record: Record,
    /// Initial-state overrides.
    pub initial_states: Vec<InitialState>,
}

impl TransformOutput {
    /// Output creating `record`.
    #[must_use]
    pub fn new(record: Record) -> Self {
        Self {
            record,
            initial_states: Vec::new(),
        }
    }

    /// Starts `property` in `state`.
    #[must_use]
    pub fn with_initial_state(mut self, property: impl Into<String>, state: impl Into<String>) -> Self {
        self.initial_states.push(InitialState {
            property: property.into(),
            state: state.into(),
            value: None,
        });
        self
    }

    /// Starts `property` in `state` with `value`.
    #[must_use]
    pub fn with_initial_value(
        mut self,
        property: impl Into<String>,
        state: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.initial_states.push(InitialState {
            property: property.into(),
            state: state.into(),
            value: Some(value.into()),
        });
        self
    }
}

/// Creates records from events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Source events.
    pub source: TransformSource,
    /// Event to record mapping.
    pub callback: Callback<TransformFn>,
}

impl Transform {
    /// Creates a transform.
    #[must_use]
    pub fn new(source: TransformSource, callback: Callback<TransformFn>) -> Self {
        Self { source, callback }
    }
}

/// A value that depends on the current time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealTime {
    /// Value function.
    pub callback: Callback<RealTimeFn>,
    /// When to recompute next; without it every refresh recomputes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_recompute: Option<Callback<NextRecomputeFn>>,
    /// Extra dependencies that trigger recomputation between refreshes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_deps: Vec<DataDep>,
}

impl RealTime {
    /// Creates a real-time computation.
    #[must_use]
    pub fn new(callback: Callback<RealTimeFn>) -> Self {
        Self {
            callback,
            next_recompute: None,
            data_deps: Vec::new(),
        }
    }

    /// Builder method to set the next-recompute callback.
    #[must_use]
    pub fn with_next_recompute(mut self, callback: Callback<NextRecomputeFn>) -> Self {
        self.next_recompute = Some(callback);
        self
    }

    /// Builder method to add a dependency.
    #[must_use]
    pub fn with_dep(mut self, dep: DataDep) -> Self {
        self.data_deps.push(dep);
        self
    }
}

// =============================================================================
// Computation
// =============================================================================

/// One computation strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "public")]
pub enum Computation {
    /// Number of related records.
    Count(Aggregate),
    /// Sum over related records.
    Summation(Aggregate),
    /// Mean over related records.
    Average(Aggregate),
    /// Weighted sum over related records.
    WeightedSummation(Aggregate),
    /// All related records match.
    Every(Aggregate),
    /// Some related record matches.
    Any(Aggregate),
    /// Record creation from events.
    Transform(Transform),
    /// Time-dependent value.
    RealTime(RealTime),
    /// Finite state machine.
    StateMachine(StateMachine),
}

impl Computation {
    /// Variant name, as serialized in `type`.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Count(_) => "Count",
            Self::Summation(_) => "Summation",
            Self::Average(_) => "Average",
            Self::WeightedSummation(_) => "WeightedSummation",
            Self::Every(_) => "Every",
            Self::Any(_) => "Any",
            Self::Transform(_) => "Transform",
            Self::RealTime(_) => "RealTime",
            Self::StateMachine(_) => "StateMachine",
        }
    }

    /// The aggregate fold and its descriptor, for aggregate variants.
    #[must_use]
    pub const fn aggregate(&self) -> Option<(AggregateKind, &Aggregate)> {
        match self {
            Self::Count(a) => Some((AggregateKind::Count, a)),
            Self::Summation(a) => Some((AggregateKind::Summation, a)),
            Self::Average(a) => Some((AggregateKind::Average, a)),
            Self::WeightedSummation(a) => Some((AggregateKind::WeightedSummation, a)),
            Self::Every(a) => Some((AggregateKind::Every, a)),
            Self::Any(a) => Some((AggregateKind::Any, a)),
            Self::Transform(_) | Self::RealTime(_) | Self::StateMachine(_) => None,
        }
    }

    fn aggregate_mut(&mut self) -> Option<&mut Aggregate> {
        match self {
            Self::Count(a)
            | Self::Summation(a)
            | Self::Average(a)
            | Self::WeightedSummation(a)
            | Self::Every(a)
            | Self::Any(a) => Some(a),
            Self::Transform(_) | Self::RealTime(_) | Self::StateMachine(_) => None,
        }
    }

    /// Attaches every callback slot to the registry's functions.
    ///
    /// # Errors
    ///
    /// Returns `UnboundCallback` for the first key the registry lacks.
    pub fn bind(&mut self, registry: &CallbackRegistry) -> Result<()> {
        if let Some(aggregate) = self.aggregate_mut() {
            return aggregate.bind(registry);
        }
        match self {
            Self::Transform(t) => registry.bind(&mut t.callback),
            Self::RealTime(r) => {
                registry.bind(&mut r.callback)?;
                registry.bind_opt(r.next_recompute.as_mut())
            }
            Self::StateMachine(m) => m.bind(registry),
            _ => Ok(()),
        }
    }

    fn validate(&self, schema: &Schema, target: &Target) -> Result<()> {
        let unsuitable = || Error::invalid_schema(format!("{} cannot compute {target}", self.kind_name()));
        match (self, target) {
            (Self::Transform(t), Target::Entity { .. } | Target::Relation { .. }) => match &t.source {
                TransformSource::Record(name) if schema.node(name).is_none() => Err(Error::unknown_record(name)),
                _ => Ok(()),
            },
            (Self::StateMachine(m), Target::Property { .. }) => m.validate(),
            (Self::RealTime(_), Target::Property { .. } | Target::Dictionary { .. }) => Ok(()),
            (_, Target::Property { record, .. }) => {
                let (kind, aggregate) = self.aggregate().ok_or_else(unsuitable)?;
                aggregate.validate(kind)?;
                aggregate.end_for(schema, record).map(|_| ())
            }
            (_, Target::Dictionary { .. }) => {
                let (kind, aggregate) = self.aggregate().ok_or_else(unsuitable)?;
                aggregate.validate(kind)?;
                if schema.node(&aggregate.record).is_none() {
                    return Err(Error::unknown_record(&aggregate.record));
                }
                Ok(())
            }
            _ => Err(unsuitable()),
        }
    }
}

// =============================================================================
// Targets and the computation set
// =============================================================================

/// What a computation produces.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Target {
    /// A property of every record of an entity or relation.
    Property {
        /// Owning entity or relation.
        record: String,
        /// Property name.
        property: String,
    },
    /// Records of an entity.
    Entity {
        /// Entity name.
        name: String,
    },
    /// Records of a relation.
    Relation {
        /// Relation name.
        name: String,
    },
    /// A global dictionary value.
    Dictionary {
        /// Dictionary name.
        name: String,
    },
}

impl Target {
    /// A property target.
    #[must_use]
    pub fn property(record: impl Into<String>, property: impl Into<String>) -> Self {
        Self::Property {
            record: record.into(),
            property: property.into(),
        }
    }

    /// An entity target.
    #[must_use]
    pub fn entity(name: impl Into<String>) -> Self {
        Self::Entity { name: name.into() }
    }

    /// A relation target.
    #[must_use]
    pub fn relation(name: impl Into<String>) -> Self {
        Self::Relation { name: name.into() }
    }

    /// A dictionary target.
    #[must_use]
    pub fn dictionary(name: impl Into<String>) -> Self {
        Self::Dictionary { name: name.into() }
    }

    fn check_exists(&self, schema: &Schema) -> Result<()> {
        match self {
            Self::Property { record, property } => schema
                .property(record, property)
                .map(|_| ())
                .ok_or_else(|| Error::unknown_property(record, property)),
            Self::Entity { name } => schema.entity(name).map(|_| ()).ok_or_else(|| Error::unknown_record(name)),
            Self::Relation { name } => schema.relation(name).map(|_| ()).ok_or_else(|| Error::unknown_record(name)),
            Self::Dictionary { name } => schema
                .dictionary(name)
                .map(|_| ())
                .ok_or_else(|| Error::unknown_record(name)),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property { record, property } => write!(f, "{record}.{property}"),
            Self::Entity { name } => write!(f, "entity {name}"),
            Self::Relation { name } => write!(f, "relation {name}"),
            Self::Dictionary { name } => write!(f, "dictionary {name}"),
        }
    }
}

/// A computation bound to its target.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundComputation {
    /// Instance identity.
    pub uuid: Uuid,
    /// Produced value or records.
    pub target: Target,
    /// Strategy.
    pub computation: Computation,
}

/// Every computation of an application, in registration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComputationSet {
    entries: Vec<BoundComputation>,
}

impl ComputationSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and adds a computation under a fresh uuid.
    ///
    /// # Errors
    ///
    /// Fails if the target is unknown or already computed, or the
    /// descriptor is malformed or unsuitable for the target.
    pub fn add(&mut self, schema: &Schema, target: Target, computation: Computation) -> Result<Uuid> {
        let uuid = Uuid::new_v4();
        self.add_with_uuid(schema, uuid, target, computation)?;
        Ok(uuid)
    }

    /// Validates and adds a computation with a known uuid.
    ///
    /// # Errors
    ///
    /// See [`ComputationSet::add`]; a duplicate uuid is also rejected.
    pub fn add_with_uuid(
        &mut self,
        schema: &Schema,
        uuid: Uuid,
        target: Target,
        computation: Computation,
    ) -> Result<()> {
        target.check_exists(schema)?;
        if self.get(&target).is_some() {
            return Err(Error::invalid_schema(format!("{target} already has a computation")));
        }
        if self.by_uuid(uuid).is_some() {
            return Err(Error::invalid_schema(format!("duplicate computation {uuid}")));
        }
        computation
            .validate(schema, &target)
            .map_err(|e| e.in_frame(target.to_string()))?;
        self.entries.push(BoundComputation {
            uuid,
            target,
            computation,
        });
        Ok(())
    }

    /// The computation producing `target`.
    #[must_use]
    pub fn get(&self, target: &Target) -> Option<&BoundComputation> {
        self.entries.iter().find(|b| &b.target == target)
    }

    /// The computation with this uuid.
    #[must_use]
    pub fn by_uuid(&self, uuid: Uuid) -> Option<&BoundComputation> {
        self.entries.iter().find(|b| b.uuid == uuid)
    }

    pub(crate) fn at(&self, index: usize) -> Option<&BoundComputation> {
        self.entries.get(index)
    }

    /// The state machine driving `record.property`, if any.
    #[must_use]
    pub fn state_machine(&self, record: &str, property: &str) -> Option<&StateMachine> {
        match &self.get(&Target::property(record, property))?.computation {
            Computation::StateMachine(machine) => Some(machine),
            _ => None,
        }
    }

    /// Iterates in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &BoundComputation> {
        self.entries.iter()
    }

    /// Number of computations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no computation is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binds every callback slot.
    ///
    /// # Errors
    ///
    /// Returns `UnboundCallback` for the first key the registry lacks.
    pub fn bind(&mut self, registry: &CallbackRegistry) -> Result<()> {
        for bound in &mut self.entries {
            let frame = bound.target.to_string();
            bound.computation.bind(registry).map_err(|e| e.in_frame(frame))?;
        }
        Ok(())
    }
}

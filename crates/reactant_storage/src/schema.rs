//! Schema definitions for entities, relations and dictionaries.
//!
//! The [`Schema`] is an arena: entities and relations live in vectors and
//! refer to each other by name, resolved to [`NodeRef`] indices on
//! registration. Relations may connect entities or other relations, and may
//! point back at their own source (self-referential trees).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use reactant_foundation::{Error, Result, Type, Value};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::query::{MatchAtom, MatchExp};

/// System entity recording dispatched interactions.
pub const INTERACTION_ENTITY: &str = "_Interaction_";
/// System entity storing dictionary values.
pub const DICTIONARY_ENTITY: &str = "_Dictionary_";
/// Hidden discriminator column written for merged nodes.
pub const KIND_COLUMN: &str = "__kind";
/// Name of the hard-deletion property.
pub const HARD_DELETION_PROPERTY: &str = "_isDeleted_";

/// Index of an entity in the schema arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityIdx(usize);

/// Index of a relation in the schema arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationIdx(usize);

/// Reference to a schema node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeRef {
    /// An entity.
    Entity(EntityIdx),
    /// A relation.
    Relation(RelationIdx),
}

// =============================================================================
// Properties
// =============================================================================

/// A named, typed column of an entity or relation.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Property {
    /// Property name.
    pub name: String,
    /// Element type.
    pub ty: Type,
    /// If true, the column holds a list of `ty`.
    pub collection: bool,
    /// Value written on create when the payload omits the property.
    pub default: Option<Value>,
    /// Whether create payloads must supply a non-nil value.
    pub required: bool,
}

impl Property {
    /// Creates an optional property.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            collection: false,
            default: None,
            required: false,
        }
    }

    /// Creates a required property.
    #[must_use]
    pub fn required(name: impl Into<String>, ty: Type) -> Self {
        Self {
            required: true,
            ..Self::new(name, ty)
        }
    }

    /// The boolean property whose state machine deletes its record.
    #[must_use]
    pub fn hard_deletion() -> Self {
        Self::new(HARD_DELETION_PROPERTY, Type::Bool)
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Marks the property as a list.
    #[must_use]
    pub fn collection(mut self) -> Self {
        self.collection = true;
        self
    }

    /// The type stored values must satisfy.
    #[must_use]
    pub fn value_type(&self) -> Type {
        if self.collection {
            Type::list(self.ty.clone())
        } else {
            self.ty.clone()
        }
    }

    /// Checks a value written to this property.
    ///
    /// # Errors
    ///
    /// Returns a type mismatch unless the value is nil (on an optional
    /// property) or accepted by [`value_type`](Self::value_type).
    pub fn validate(&self, value: &Value) -> Result<()> {
        if value.is_nil() && !self.required {
            return Ok(());
        }
        let expected = self.value_type();
        if expected.accepts(value) {
            Ok(())
        } else {
            Err(Error::type_mismatch(
                self.name.clone(),
                expected,
                value.value_type(),
            ))
        }
    }
}

fn check_property_name(owner: &str, name: &str, reserved: &[&str]) -> Result<()> {
    if name.is_empty() || name == "id" || name.starts_with("__") || reserved.contains(&name) {
        return Err(Error::invalid_schema(format!(
            "{owner}: property name {name:?} is reserved"
        )));
    }
    Ok(())
}

fn check_unique(owner: &str, properties: &[Property]) -> Result<()> {
    for (i, p) in properties.iter().enumerate() {
        if properties[..i].iter().any(|q| q.name == p.name) {
            return Err(Error::invalid_schema(format!(
                "{owner}: duplicate property {}",
                p.name
            )));
        }
    }
    Ok(())
}

/// Merges input property lists, requiring shared names to agree on type.
fn union_properties<'a>(
    owner: &str,
    inputs: impl IntoIterator<Item = &'a [Property]>,
) -> Result<Vec<Property>> {
    let mut out: Vec<Property> = Vec::new();
    for props in inputs {
        for p in props {
            match out.iter().find(|q| q.name == p.name) {
                Some(q) if q.value_type() != p.value_type() => {
                    return Err(Error::invalid_schema(format!(
                        "{owner}: inputs disagree on the type of {}",
                        p.name
                    )));
                }
                Some(_) => {}
                None => out.push(Property {
                    required: false,
                    ..p.clone()
                }),
            }
        }
    }
    Ok(out)
}

// =============================================================================
// Entities
// =============================================================================

/// How an entity's records are stored.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EntityKind {
    /// Owns its table.
    Base,
    /// A view of `source` restricted by `filter`; no storage of its own.
    Filtered {
        /// Source entity name.
        source: String,
        /// Membership predicate over source records.
        filter: MatchExp,
    },
    /// Owns the table shared by its inputs, which become filtered views.
    Merged {
        /// Input entity names.
        inputs: Vec<String>,
    },
}

/// An entity definition.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Entity {
    /// Unique name.
    pub name: String,
    /// Columns, in declaration order.
    pub properties: Vec<Property>,
    /// Storage kind.
    pub kind: EntityKind,
}

impl Entity {
    /// Creates a base entity.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            kind: EntityKind::Base,
        }
    }

    /// Creates a filtered view of `source`.
    #[must_use]
    pub fn filtered(name: impl Into<String>, source: impl Into<String>, filter: MatchExp) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            kind: EntityKind::Filtered {
                source: source.into(),
                filter,
            },
        }
    }

    /// Creates a merged entity over `inputs`.
    ///
    /// # Errors
    ///
    /// Returns an error if `inputs` is empty.
    pub fn merged<I, S>(name: impl Into<String>, inputs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let inputs: Vec<String> = inputs.into_iter().map(Into::into).collect();
        if inputs.is_empty() {
            return Err(Error::invalid_schema(format!(
                "merged entity {name} needs at least one input"
            )));
        }
        Ok(Self {
            name,
            properties: Vec::new(),
            kind: EntityKind::Merged { inputs },
        })
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Returns the property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }
}

// =============================================================================
// Relations
// =============================================================================

/// Cardinality constraint for relations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Cardinality {
    /// `1:1` - each source has at most one target and vice versa.
    #[cfg_attr(feature = "serde", serde(rename = "1:1"))]
    OneToOne,
    /// `1:n` - sources have many targets, each target has one source.
    #[cfg_attr(feature = "serde", serde(rename = "1:n"))]
    OneToMany,
    /// `n:1` - each source has one target, targets have many sources.
    #[cfg_attr(feature = "serde", serde(rename = "n:1"))]
    ManyToOne,
    /// `n:n` - no constraints.
    #[cfg_attr(feature = "serde", serde(rename = "n:n"))]
    ManyToMany,
}

impl Cardinality {
    /// True if a source may link many targets.
    #[must_use]
    pub const fn source_has_many(self) -> bool {
        matches!(self, Self::OneToMany | Self::ManyToMany)
    }

    /// True if a target may be linked from many sources.
    #[must_use]
    pub const fn target_has_many(self) -> bool {
        matches!(self, Self::ManyToOne | Self::ManyToMany)
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OneToOne => "1:1",
            Self::OneToMany => "1:n",
            Self::ManyToOne => "n:1",
            Self::ManyToMany => "n:n",
        })
    }
}

impl FromStr for Cardinality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1:1" => Ok(Self::OneToOne),
            "1:n" => Ok(Self::OneToMany),
            "n:1" => Ok(Self::ManyToOne),
            "n:n" => Ok(Self::ManyToMany),
            other => Err(Error::invalid_schema(format!("unknown cardinality: {other}"))),
        }
    }
}

/// What happens when linking would violate an x:1 end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OnViolation {
    /// Return an error.
    #[default]
    Error,
    /// Delete the existing link first.
    Replace,
}

/// How a relation's records are stored.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RelationKind {
    /// Owns its table.
    Base,
    /// A view of `base` restricted by `filter`.
    Filtered {
        /// Base relation name.
        base: String,
        /// Membership predicate over base relation records.
        filter: MatchExp,
    },
    /// Owns the table shared by its inputs, which become filtered views.
    Merged {
        /// Input relation names.
        inputs: Vec<String>,
    },
}

/// A relation definition.
///
/// Relation records carry `source` and `target` id columns plus their own
/// properties. On the endpoint records the relation appears as
/// `source_property` (on the source) and `target_property` (on the target).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Relation {
    /// Unique name.
    pub name: String,
    /// Source node name.
    pub source: String,
    /// Property name on the source side.
    pub source_property: String,
    /// Target node name.
    pub target: String,
    /// Property name on the target side.
    pub target_property: String,
    /// Cardinality.
    pub cardinality: Cardinality,
    /// Violation policy for x:1 ends.
    pub on_violation: OnViolation,
    /// Columns of the relation record.
    pub properties: Vec<Property>,
    /// Storage kind.
    pub kind: RelationKind,
}

impl Relation {
    /// Creates a base relation.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        source_property: impl Into<String>,
        target: impl Into<String>,
        target_property: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            source_property: source_property.into(),
            target: target.into(),
            target_property: target_property.into(),
            cardinality,
            on_violation: OnViolation::Error,
            properties: Vec::new(),
            kind: RelationKind::Base,
        }
    }

    /// Creates a filtered view of `base`.
    ///
    /// Source, target and cardinality are inherited from the base relation
    /// on registration.
    ///
    /// # Errors
    ///
    /// Returns an error if either property name is empty.
    pub fn filtered(
        name: impl Into<String>,
        base: impl Into<String>,
        source_property: impl Into<String>,
        target_property: impl Into<String>,
        filter: MatchExp,
    ) -> Result<Self> {
        let name = name.into();
        let source_property = source_property.into();
        let target_property = target_property.into();
        if source_property.is_empty() || target_property.is_empty() {
            return Err(Error::invalid_schema(format!(
                "filtered relation {name} needs source and target properties"
            )));
        }
        Ok(Self {
            name,
            source: String::new(),
            source_property,
            target: String::new(),
            target_property,
            cardinality: Cardinality::ManyToMany,
            on_violation: OnViolation::Error,
            properties: Vec::new(),
            kind: RelationKind::Filtered {
                base: base.into(),
                filter,
            },
        })
    }

    /// Creates a merged relation over `inputs`.
    ///
    /// All inputs must share source and target; that is checked on
    /// registration.
    ///
    /// # Errors
    ///
    /// Returns an error if `inputs` is empty.
    pub fn merged<I, S>(
        name: impl Into<String>,
        source_property: impl Into<String>,
        target_property: impl Into<String>,
        inputs: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let inputs: Vec<String> = inputs.into_iter().map(Into::into).collect();
        if inputs.is_empty() {
            return Err(Error::invalid_schema(format!(
                "merged relation {name} needs at least one input"
            )));
        }
        Ok(Self {
            name,
            source: String::new(),
            source_property: source_property.into(),
            target: String::new(),
            target_property: target_property.into(),
            cardinality: Cardinality::ManyToMany,
            on_violation: OnViolation::Error,
            properties: Vec::new(),
            kind: RelationKind::Merged { inputs },
        })
    }

    /// Sets the violation policy.
    #[must_use]
    pub fn with_on_violation(mut self, on_violation: OnViolation) -> Self {
        self.on_violation = on_violation;
        self
    }

    /// Adds a property to the relation record.
    #[must_use]
    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Returns the property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// True if the relation has a table of its own.
    #[must_use]
    pub fn owns_storage(&self) -> bool {
        !matches!(self.kind, RelationKind::Filtered { .. })
    }
}

// =============================================================================
// Dictionaries
// =============================================================================

/// A global named value.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Dictionary {
    /// Unique name.
    pub name: String,
    /// Value type.
    pub ty: Type,
    /// Value returned before anything is written.
    pub default: Option<Value>,
}

impl Dictionary {
    /// Creates a dictionary entry.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
        }
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

// =============================================================================
// Schema
// =============================================================================

/// One side of a relation, seen from a node that participates in it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationEnd {
    /// Relation name.
    pub relation: String,
    /// Property name on the near node.
    pub property: String,
    /// True if the near node is the relation's source.
    pub is_source: bool,
    /// Far node name.
    pub far: String,
    /// True if the near record may link many far records.
    pub to_many: bool,
}

/// The schema arena.
#[derive(Clone, Debug)]
pub struct Schema {
    entities: Vec<Entity>,
    relations: Vec<Relation>,
    dictionaries: Vec<Dictionary>,
    index: HashMap<String, NodeRef>,
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

impl Schema {
    /// Creates a schema holding the system entities.
    #[must_use]
    pub fn new() -> Self {
        let mut schema = Self {
            entities: Vec::new(),
            relations: Vec::new(),
            dictionaries: Vec::new(),
            index: HashMap::new(),
        };
        schema.push_entity(
            Entity::new(INTERACTION_ENTITY)
                .with_property(Property::required("interactionName", Type::String))
                .with_property(Property::new("user", Type::Any))
                .with_property(Property::new("payload", Type::Any)),
        );
        schema.push_entity(
            Entity::new(DICTIONARY_ENTITY)
                .with_property(Property::required("key", Type::String))
                .with_property(Property::new("value", Type::Any)),
        );
        schema
    }

    fn push_entity(&mut self, entity: Entity) -> EntityIdx {
        let idx = EntityIdx(self.entities.len());
        self.index.insert(entity.name.clone(), NodeRef::Entity(idx));
        self.entities.push(entity);
        idx
    }

    fn check_name_free(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_schema("empty name"));
        }
        if self.index.contains_key(name) || self.dictionary(name).is_some() {
            return Err(Error::invalid_schema(format!("duplicate name: {name}")));
        }
        Ok(())
    }

    /// Registers an entity.
    ///
    /// Filtered entities copy their source's properties. Merged entities
    /// take the union of their inputs' properties and turn each input into a
    /// view filtered on [`KIND_COLUMN`].
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate or reserved names, unknown sources or
    /// inputs, or inputs that are not base entities.
    pub fn add_entity(&mut self, mut entity: Entity) -> Result<EntityIdx> {
        self.check_name_free(&entity.name)?;
        for p in &entity.properties {
            check_property_name(&entity.name, &p.name, &[])?;
        }
        check_unique(&entity.name, &entity.properties)?;

        match &entity.kind {
            EntityKind::Base => {}
            EntityKind::Filtered { source, .. } => {
                let source = self
                    .entity(source)
                    .ok_or_else(|| Error::unknown_record(source.clone()))?;
                if entity.properties.is_empty() {
                    entity.properties = source.properties.clone();
                }
            }
            EntityKind::Merged { inputs } => {
                let mut input_props = Vec::new();
                for input in inputs {
                    let def = self
                        .entity(input)
                        .ok_or_else(|| Error::unknown_record(input.clone()))?;
                    if def.kind != EntityKind::Base {
                        return Err(Error::invalid_schema(format!(
                            "merged entity {}: input {input} is not a base entity",
                            entity.name
                        )));
                    }
                    input_props.push(def.properties.as_slice());
                }
                let mut props = union_properties(&entity.name, input_props)?;
                for p in &entity.properties {
                    if !props.iter().any(|q| q.name == p.name) {
                        props.push(p.clone());
                    }
                }
                entity.properties = props;
                let inputs = inputs.clone();
                for input in &inputs {
                    let filter = MatchAtom::eq(KIND_COLUMN, input.as_str()).exp();
                    if let Some(NodeRef::Entity(idx)) = self.index.get(input).copied() {
                        self.entities[idx.0].kind = EntityKind::Filtered {
                            source: entity.name.clone(),
                            filter,
                        };
                    }
                }
            }
        }

        Ok(self.push_entity(entity))
    }

    /// Registers a relation.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate or reserved names, unknown endpoints,
    /// a property name already used on an endpoint, or merged inputs that
    /// disagree on source or target.
    pub fn add_relation(&mut self, mut relation: Relation) -> Result<RelationIdx> {
        self.check_name_free(&relation.name)?;
        for p in &relation.properties {
            check_property_name(&relation.name, &p.name, &["source", "target"])?;
        }
        check_unique(&relation.name, &relation.properties)?;

        let mut convert_inputs = Vec::new();
        match &relation.kind {
            RelationKind::Base => {}
            RelationKind::Filtered { base, .. } => {
                let def = self
                    .relation(base)
                    .ok_or_else(|| Error::unknown_record(base.clone()))?;
                relation.source = def.source.clone();
                relation.target = def.target.clone();
                relation.cardinality = def.cardinality;
                relation.on_violation = def.on_violation;
                if relation.properties.is_empty() {
                    relation.properties = def.properties.clone();
                }
            }
            RelationKind::Merged { inputs } => {
                let mut endpoints: Option<(String, String)> = None;
                let mut input_props = Vec::new();
                for input in inputs {
                    let def = self
                        .relation(input)
                        .ok_or_else(|| Error::unknown_record(input.clone()))?;
                    if def.kind != RelationKind::Base {
                        return Err(Error::invalid_schema(format!(
                            "merged relation {}: input {input} is not a base relation",
                            relation.name
                        )));
                    }
                    let pair = (def.source.clone(), def.target.clone());
                    match &endpoints {
                        None => {
                            relation.cardinality = def.cardinality;
                            endpoints = Some(pair);
                        }
                        Some(first) if *first != pair => {
                            return Err(Error::invalid_schema(format!(
                                "merged relation {}: input {input} links {} -> {}, expected {} -> {}",
                                relation.name, pair.0, pair.1, first.0, first.1
                            )));
                        }
                        Some(_) => {}
                    }
                    input_props.push(def.properties.as_slice());
                }
                let mut props = union_properties(&relation.name, input_props)?;
                for p in &relation.properties {
                    if !props.iter().any(|q| q.name == p.name) {
                        props.push(p.clone());
                    }
                }
                relation.properties = props;
                if let Some((source, target)) = endpoints {
                    relation.source = source;
                    relation.target = target;
                }
                convert_inputs.clone_from(inputs);
            }
        }

        // unknown endpoints surface as UnknownRecord here
        self.check_end_free(&relation.source, &relation.source_property)?;
        self.check_end_free(&relation.target, &relation.target_property)?;
        if relation.source == relation.target && relation.source_property == relation.target_property {
            return Err(Error::invalid_schema(format!(
                "self relation {} needs distinct property names",
                relation.name
            )));
        }

        for input in &convert_inputs {
            let filter = MatchAtom::eq(KIND_COLUMN, input.as_str()).exp();
            if let Some(NodeRef::Relation(idx)) = self.index.get(input).copied() {
                self.relations[idx.0].kind = RelationKind::Filtered {
                    base: relation.name.clone(),
                    filter,
                };
            }
        }

        let idx = RelationIdx(self.relations.len());
        self.index.insert(relation.name.clone(), NodeRef::Relation(idx));
        self.relations.push(relation);
        Ok(idx)
    }

    fn check_end_free(&self, node: &str, property: &str) -> Result<()> {
        let reserved: &[&str] = if self.relation(node).is_some() {
            &["source", "target"]
        } else {
            &[]
        };
        check_property_name(node, property, reserved)?;
        let clash = self.properties(node)?.iter().any(|p| p.name == property)
            || self.relation_ends(node)?.iter().any(|e| e.property == property);
        if clash {
            return Err(Error::invalid_schema(format!(
                "{node} already has a property named {property}"
            )));
        }
        Ok(())
    }

    /// Registers a dictionary entry.
    ///
    /// # Errors
    ///
    /// Returns an error on a duplicate name or a default of the wrong type.
    pub fn add_dictionary(&mut self, dictionary: Dictionary) -> Result<()> {
        self.check_name_free(&dictionary.name)?;
        if let Some(default) = &dictionary.default {
            if !default.is_nil() && !dictionary.ty.accepts(default) {
                return Err(Error::type_mismatch(
                    dictionary.name.clone(),
                    dictionary.ty.clone(),
                    default.value_type(),
                ));
            }
        }
        self.dictionaries.push(dictionary);
        Ok(())
    }

    /// Looks up a node by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<NodeRef> {
        self.index.get(name).copied()
    }

    /// Returns the name of a node.
    #[must_use]
    pub fn node_name(&self, node: NodeRef) -> &str {
        match node {
            NodeRef::Entity(idx) => &self.entities[idx.0].name,
            NodeRef::Relation(idx) => &self.relations[idx.0].name,
        }
    }

    /// Returns an entity by name.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        match self.node(name)? {
            NodeRef::Entity(idx) => Some(&self.entities[idx.0]),
            NodeRef::Relation(_) => None,
        }
    }

    /// Returns a relation by name.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        match self.node(name)? {
            NodeRef::Relation(idx) => Some(&self.relations[idx.0]),
            NodeRef::Entity(_) => None,
        }
    }

    /// Returns a dictionary entry by name.
    #[must_use]
    pub fn dictionary(&self, name: &str) -> Option<&Dictionary> {
        self.dictionaries.iter().find(|d| d.name == name)
    }

    /// Returns the entity at an arena index.
    #[must_use]
    pub fn entity_at(&self, idx: EntityIdx) -> &Entity {
        &self.entities[idx.0]
    }

    /// Returns the relation at an arena index.
    #[must_use]
    pub fn relation_at(&self, idx: RelationIdx) -> &Relation {
        &self.relations[idx.0]
    }

    /// Iterates over entities in registration order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    /// Iterates over relations in registration order.
    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.iter()
    }

    /// Iterates over dictionary entries.
    pub fn dictionaries(&self) -> impl Iterator<Item = &Dictionary> {
        self.dictionaries.iter()
    }

    /// Returns the columns of an entity or relation.
    ///
    /// # Errors
    ///
    /// Returns an error if no entity or relation has this name.
    pub fn properties(&self, name: &str) -> Result<&[Property]> {
        match self.node(name) {
            Some(NodeRef::Entity(idx)) => Ok(&self.entities[idx.0].properties),
            Some(NodeRef::Relation(idx)) => Ok(&self.relations[idx.0].properties),
            None => Err(Error::unknown_record(name)),
        }
    }

    /// Returns a column of an entity or relation.
    #[must_use]
    pub fn property(&self, name: &str, property: &str) -> Option<&Property> {
        self.properties(name)
            .ok()?
            .iter()
            .find(|p| p.name == property)
    }

    /// Resolves a node to the table storing its records and the filter
    /// selecting them, outermost source filter first.
    ///
    /// # Errors
    ///
    /// Returns an error if no entity or relation has this name.
    pub fn resolve_storage(&self, name: &str) -> Result<(String, Option<MatchExp>)> {
        let (source, filter) = match self.node(name) {
            Some(NodeRef::Entity(idx)) => match &self.entities[idx.0].kind {
                EntityKind::Filtered { source, filter } => (source, filter),
                _ => return Ok((name.to_string(), None)),
            },
            Some(NodeRef::Relation(idx)) => match &self.relations[idx.0].kind {
                RelationKind::Filtered { base, filter } => (base, filter),
                _ => return Ok((name.to_string(), None)),
            },
            None => return Err(Error::unknown_record(name)),
        };
        let (table, outer) = self.resolve_storage(source)?;
        Ok((table, MatchExp::and_all([outer, Some(filter.clone())])))
    }

    /// Returns the relation ends attached to the records of `name`.
    ///
    /// Views share the ends of the table they read from.
    ///
    /// # Errors
    ///
    /// Returns an error if no entity or relation has this name.
    pub fn relation_ends(&self, name: &str) -> Result<Vec<RelationEnd>> {
        let (table, _) = self.resolve_storage(name)?;
        let mut ends = Vec::new();
        for relation in &self.relations {
            if self.resolve_storage(&relation.source)?.0 == table {
                ends.push(RelationEnd {
                    relation: relation.name.clone(),
                    property: relation.source_property.clone(),
                    is_source: true,
                    far: relation.target.clone(),
                    to_many: relation.cardinality.source_has_many(),
                });
            }
            if self.resolve_storage(&relation.target)?.0 == table {
                ends.push(RelationEnd {
                    relation: relation.name.clone(),
                    property: relation.target_property.clone(),
                    is_source: false,
                    far: relation.source.clone(),
                    to_many: relation.cardinality.target_has_many(),
                });
            }
        }
        Ok(ends)
    }

    /// Returns the relation end of `name` called `property`.
    ///
    /// # Errors
    ///
    /// Returns an error if no entity or relation has this name.
    pub fn relation_end(&self, name: &str, property: &str) -> Result<Option<RelationEnd>> {
        Ok(self
            .relation_ends(name)?
            .into_iter()
            .find(|e| e.property == property))
    }

    /// Returns the node reached from `node` through `segment`, if the
    /// segment names a relation property, or `source`/`target` on a
    /// relation record.
    ///
    /// # Errors
    ///
    /// Returns an error if no entity or relation has this name.
    pub fn far_node(&self, node: &str, segment: &str) -> Result<Option<String>> {
        if let Some(relation) = self.relation(node) {
            match segment {
                "source" => return Ok(Some(relation.source.clone())),
                "target" => return Ok(Some(relation.target.clone())),
                _ => {}
            }
        }
        Ok(self.relation_end(node, segment)?.map(|e| e.far))
    }

    /// Returns the names of the nodes stored in `table`, `table` included.
    #[must_use]
    pub fn views_of(&self, table: &str) -> Vec<String> {
        self.index
            .keys()
            .filter(|name| {
                self.resolve_storage(name)
                    .is_ok_and(|(root, _)| root == table)
            })
            .cloned()
            .collect()
    }
}

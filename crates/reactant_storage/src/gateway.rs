//! The record gateway.
//!
//! [`RecordStorage`] turns entity and relation level operations into flat
//! table calls on a [`StorageAdapter`]:
//!
//! - reads are planned by [`QueryPlanner`], pushed down when the predicate is
//!   flat, then hydrated along relation paths and matched in memory
//! - writes through a filtered view land in the view's table, seeded with the
//!   view's equality filter columns
//! - every committed change is reported as a [`MutationEvent`] to the
//!   optional event list the caller passes in

use reactant_foundation::{Error, ErrorContext, Operator, Record, RecordId, Result, Value};
use tracing::debug;

use crate::event::MutationEvent;
use crate::query::{
    AttributeQuery, Comparator, MatchAtom, MatchExp, Modifier, PathTree, QueryPlan, QueryPlanner,
};
use crate::schema::{DICTIONARY_ENTITY, RelationEnd, Schema};
use crate::store::{StorageAdapter, TableQuery};

/// Key under which a hydrated relation value carries its link record.
pub const LINK_KEY: &str = "&";

/// Read-only record access.
///
/// Object safe, so callbacks can receive `&dyn RecordReader` without knowing
/// the adapter type.
pub trait RecordReader {
    /// The schema records are read against.
    fn schema(&self) -> &Schema;

    /// Finds records of an entity or relation.
    ///
    /// # Errors
    ///
    /// Unknown names and adapter failures.
    fn find(
        &self,
        name: &str,
        match_exp: Option<&MatchExp>,
        attributes: &AttributeQuery,
        modifier: &Modifier,
    ) -> Result<Vec<Record>>;

    /// Finds the first matching record, if any.
    ///
    /// # Errors
    ///
    /// Unknown names and adapter failures.
    fn find_one(
        &self,
        name: &str,
        match_exp: Option<&MatchExp>,
        attributes: &AttributeQuery,
    ) -> Result<Option<Record>> {
        Ok(self
            .find(name, match_exp, attributes, &Modifier::new().with_limit(1))?
            .into_iter()
            .next())
    }

    /// Reads a dictionary value, falling back to its default.
    ///
    /// # Errors
    ///
    /// Unknown dictionary names and adapter failures.
    fn get_dictionary(&self, name: &str) -> Result<Value>;
}

/// Entity and relation level access to a [`StorageAdapter`].
#[derive(Debug)]
pub struct RecordStorage<A> {
    pub(crate) schema: Schema,
    pub(crate) adapter: A,
}

impl<A: Clone> Clone for RecordStorage<A> {
    fn clone(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            adapter: self.adapter.clone(),
        }
    }
}

/// Appends collected events to the caller's list, if any.
pub(crate) fn deliver(events: Option<&mut Vec<MutationEvent>>, sink: Vec<MutationEvent>) {
    if let Some(events) = events {
        events.extend(sink);
    }
}

/// `id in [..]`
pub(crate) fn ids_predicate(ids: &[RecordId]) -> MatchExp {
    MatchAtom::new(
        "id",
        Comparator::In,
        Value::List(ids.iter().map(|id| Value::Id(*id)).collect()),
    )
    .exp()
}

/// Equality atoms reachable from the root through `and` nodes only.
fn conjunctive_equalities(exp: &MatchExp) -> Vec<&MatchAtom> {
    let mut out = Vec::new();
    let mut pending = vec![exp];
    while let Some(node) = pending.pop() {
        if let Some(atom) = node.data() {
            if atom.comparator == Comparator::Eq && atom.is_flat() {
                out.push(atom);
            }
        } else if node.operator() == Some(Operator::And) {
            pending.extend(node.right());
            pending.extend(node.left());
        }
    }
    out
}

impl<A: StorageAdapter> RecordStorage<A> {
    /// Wraps an adapter.
    #[must_use]
    pub fn new(schema: Schema, adapter: A) -> Self {
        Self { schema, adapter }
    }

    /// The schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The adapter.
    #[must_use]
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Mutable access to the adapter.
    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    /// Splits the gateway into schema and adapter.
    #[must_use]
    pub fn into_parts(self) -> (Schema, A) {
        (self.schema, self.adapter)
    }

    /// Opens a transaction on the adapter.
    ///
    /// # Errors
    ///
    /// Adapter failures.
    pub fn begin(&mut self) -> Result<()> {
        self.adapter.begin()
    }

    /// Commits the innermost transaction.
    ///
    /// # Errors
    ///
    /// Adapter failures, or no open transaction.
    pub fn commit(&mut self) -> Result<()> {
        self.adapter.commit()
    }

    /// Rolls back the innermost transaction.
    ///
    /// # Errors
    ///
    /// Adapter failures, or no open transaction.
    pub fn rollback(&mut self) -> Result<()> {
        self.adapter.rollback()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Finds records of an entity or relation.
    ///
    /// Filtered names read their source table with the view filter placed
    /// before `match_exp`. Results follow id order unless the modifier sorts
    /// them.
    ///
    /// # Errors
    ///
    /// Unknown names and adapter failures.
    pub fn find(
        &self,
        name: &str,
        match_exp: Option<&MatchExp>,
        attributes: &AttributeQuery,
        modifier: &Modifier,
    ) -> Result<Vec<Record>> {
        let plan = QueryPlanner::plan(&self.schema, name, match_exp, attributes, modifier)?;
        let mut rows = self.run(&plan)?;
        plan.modifier.apply_by(&mut rows, |(_, hydrated)| hydrated);
        Ok(rows
            .iter()
            .map(|(raw, hydrated)| plan.attributes.project(&compose(raw, hydrated, &plan.projection)))
            .collect())
    }

    /// Finds the first matching record. A miss is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Unknown names and adapter failures.
    pub fn find_one(
        &self,
        name: &str,
        match_exp: Option<&MatchExp>,
        attributes: &AttributeQuery,
    ) -> Result<Option<Record>> {
        Ok(self
            .find(name, match_exp, attributes, &Modifier::new().with_limit(1))?
            .into_iter()
            .next())
    }

    /// Finds a record by id.
    ///
    /// # Errors
    ///
    /// Unknown names and adapter failures.
    pub fn find_by_id(&self, name: &str, id: RecordId, attributes: &AttributeQuery) -> Result<Option<Record>> {
        self.find_one(name, Some(&MatchAtom::id(id).exp()), attributes)
    }

    /// Returns the full stored row of a record, hidden columns included,
    /// if it is visible through `name`.
    ///
    /// # Errors
    ///
    /// Unknown names and adapter failures.
    pub fn row(&self, name: &str, id: RecordId) -> Result<Option<Record>> {
        Ok(self
            .select(name, Some(&MatchAtom::id(id).exp()), &PathTree::default())?
            .into_iter()
            .next())
    }

    /// True if `record` is currently visible through `name`, the membership
    /// test for filtered views.
    ///
    /// # Errors
    ///
    /// Unknown names and adapter failures.
    pub fn record_belongs_to(&self, name: &str, record: &Record) -> Result<bool> {
        match record.id() {
            Some(id) => Ok(self.row(name, id)?.is_some()),
            None => Ok(false),
        }
    }

    /// Runs a plan, returning `(raw, hydrated)` pairs that match.
    fn run(&self, plan: &QueryPlan) -> Result<Vec<(Record, Record)>> {
        let query = TableQuery {
            table: plan.table.clone(),
            predicate: plan.pushdown.clone(),
        };
        let mut out = Vec::new();
        for raw in self.adapter.execute(&query)? {
            let hydrated = self.hydrate(&plan.table, raw.clone(), &plan.hydrate)?;
            if plan.matches(&hydrated) {
                out.push((raw, hydrated));
            }
        }
        Ok(out)
    }

    /// Reads full rows through `name`, hydrating `extra` paths on top of the
    /// ones the predicate needs.
    pub(crate) fn select(&self, name: &str, predicate: Option<&MatchExp>, extra: &PathTree) -> Result<Vec<Record>> {
        let mut plan = QueryPlanner::plan(
            &self.schema,
            name,
            predicate,
            &AttributeQuery::default(),
            &Modifier::default(),
        )?;
        plan.hydrate.merge(extra);
        Ok(self
            .run(&plan)?
            .iter()
            .map(|(raw, hydrated)| compose(raw, hydrated, extra))
            .collect())
    }

    fn hydrate(&self, node: &str, mut row: Record, tree: &PathTree) -> Result<Record> {
        for (key, sub) in &tree.0 {
            let value = self.resolve_path(node, &row, key, sub)?;
            row.set(key.clone(), value);
        }
        Ok(row)
    }

    fn resolve_path(&self, node: &str, row: &Record, key: &str, sub: &PathTree) -> Result<Value> {
        if let Some(relation) = self.schema.relation(node) {
            let far = match key {
                "source" => Some(&relation.source),
                "target" => Some(&relation.target),
                _ => None,
            };
            if let Some(far) = far {
                let Some(id) = row.get(key).and_then(Value::as_record_id) else {
                    return Ok(Value::Nil);
                };
                return Ok(self
                    .select(far, Some(&MatchAtom::id(id).exp()), sub)?
                    .into_iter()
                    .next()
                    .map_or(Value::Nil, Value::Map));
            }
        }

        let Some(end) = self.schema.relation_end(node, key)? else {
            return Ok(row.get(key).cloned().unwrap_or_default());
        };
        let Some(id) = row.id() else {
            return Ok(Value::Nil);
        };
        let (near, far_column) = end_columns(&end);
        let links = self.select(&end.relation, Some(&MatchAtom::eq(near, id).exp()), &PathTree::default())?;
        let mut linked = Vec::new();
        for link in links {
            let Some(far_id) = link.get(far_column).and_then(Value::as_record_id) else {
                continue;
            };
            let far = self.select(&end.far, Some(&MatchAtom::id(far_id).exp()), sub)?;
            if let Some(far) = far.into_iter().next() {
                linked.push(Value::Map(far.insert(LINK_KEY, Value::Map(link))));
            }
        }
        Ok(if end.to_many {
            Value::List(linked.into_iter().collect())
        } else {
            linked.into_iter().next().unwrap_or_default()
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Creates a record.
    ///
    /// Entity payloads may name relation properties: each value is an id,
    /// a record with an `id` (linked), or a record without one (created,
    /// then linked). A record value may carry link attributes under `&`.
    /// Relation payloads need `source` and `target` ids and go through
    /// [`add_relation_by_name_by_id`](Self::add_relation_by_name_by_id).
    ///
    /// # Errors
    ///
    /// Unknown names or properties, type mismatches, missing required
    /// properties, cardinality violations and adapter failures.
    pub fn create(&mut self, name: &str, payload: Record, events: Option<&mut Vec<MutationEvent>>) -> Result<Record> {
        let mut sink = Vec::new();
        let created = self.create_in(name, payload, &mut sink)?;
        deliver(events, sink);
        Ok(created)
    }

    pub(crate) fn create_in(&mut self, name: &str, payload: Record, sink: &mut Vec<MutationEvent>) -> Result<Record> {
        if self.schema.relation(name).is_some() {
            let end = |key: &str| {
                payload
                    .get(key)
                    .and_then(Value::as_record_id)
                    .ok_or_else(|| Error::invalid_payload(format!("{name}: {key} id is required")))
            };
            let (source, target) = (end("source")?, end("target")?);
            let attributes = payload.remove("source").remove("target");
            return self.link_in(name, source, target, attributes, sink);
        }
        if self.schema.entity(name).is_none() {
            return Err(Error::unknown_record(name));
        }

        let (row, links) = self.prepare_row(name, &payload)?;
        let stored = self.insert_row(name, row, sink)?;
        if let Some(id) = stored.id() {
            self.apply_links(id, &links, sink)?;
        }
        Ok(stored)
    }

    /// Validates a create payload, seeds the view's equality filter columns
    /// and fills defaults. Returns the column row and the relation values to
    /// link afterwards.
    pub(crate) fn prepare_row(&self, name: &str, payload: &Record) -> Result<(Record, Vec<(RelationEnd, Value)>)> {
        let (mut row, links) = self.split_payload(name, payload)?;
        if let (_, Some(filter)) = self.schema.resolve_storage(name)? {
            for atom in conjunctive_equalities(&filter) {
                if !row.contains_key(atom.key.as_str()) {
                    row.set(atom.key.clone(), atom.value.clone());
                }
            }
        }
        for property in self.schema.properties(name)? {
            if row.contains_key(property.name.as_str()) {
                continue;
            }
            if let Some(default) = &property.default {
                row.set(property.name.clone(), default.clone());
            } else if property.required {
                return Err(Error::invalid_payload(format!(
                    "{name}.{} is required",
                    property.name
                )));
            }
        }
        Ok((row, links))
    }

    /// Inserts a prepared row into the table behind `name`.
    pub(crate) fn insert_row(&mut self, name: &str, row: Record, sink: &mut Vec<MutationEvent>) -> Result<Record> {
        let (table, _) = self.schema.resolve_storage(name)?;
        let stored = self.adapter.insert(&table, row)?;
        debug!(record = %name, table = %table, id = ?stored.id(), "created");
        sink.push(MutationEvent::create(table, stored.clone()));
        Ok(stored)
    }

    /// Separates columns from relation values and validates columns.
    ///
    /// Hidden `__` columns pass through unchecked.
    fn split_payload(&self, name: &str, payload: &Record) -> Result<(Record, Vec<(RelationEnd, Value)>)> {
        let ends = self.schema.relation_ends(name)?;
        let mut row = Record::new();
        let mut links = Vec::new();
        for (key, value) in payload.iter() {
            if key == "id" {
                return Err(Error::invalid_payload(format!("{name}: id is assigned by storage")));
            }
            if let Some(property) = self.schema.property(name, key) {
                property
                    .validate(value)
                    .map_err(|e| e.with_context(ErrorContext::new().with_source(name)))?;
                row.set(key.clone(), value.clone());
            } else if let Some(end) = ends.iter().find(|e| e.property == *key) {
                links.push((end.clone(), value.clone()));
            } else if key.starts_with("__") {
                row.set(key.clone(), value.clone());
            } else {
                return Err(Error::unknown_property(name, key.clone()));
            }
        }
        Ok((row, links))
    }

    /// Links `owner` along each relation end to the given values.
    pub(crate) fn apply_links(
        &mut self,
        owner: RecordId,
        links: &[(RelationEnd, Value)],
        sink: &mut Vec<MutationEvent>,
    ) -> Result<()> {
        for (end, value) in links {
            let items: Vec<Value> = match value {
                Value::Nil => Vec::new(),
                Value::List(items) => items.iter().cloned().collect(),
                other => vec![other.clone()],
            };
            if !end.to_many && items.len() > 1 {
                return Err(Error::cardinality_violation(
                    end.relation.clone(),
                    format!("{} takes a single record", end.property),
                ));
            }
            for item in items {
                let (far, attributes) = self.link_target(&end.far, item, sink)?;
                if end.is_source {
                    self.link_in(&end.relation, owner, far, attributes, sink)?;
                } else {
                    self.link_in(&end.relation, far, owner, attributes, sink)?;
                }
            }
        }
        Ok(())
    }

    fn link_target(&mut self, far: &str, item: Value, sink: &mut Vec<MutationEvent>) -> Result<(RecordId, Record)> {
        match item {
            Value::Map(map) => {
                let attributes = match map.get(LINK_KEY) {
                    Some(Value::Map(attributes)) => attributes.clone(),
                    _ => Record::new(),
                };
                let map = map.remove(LINK_KEY);
                if let Some(id) = map.id() {
                    return Ok((id, attributes));
                }
                let created = self.create_in(far, map, sink)?;
                let id = created
                    .id()
                    .ok_or_else(|| Error::internal(format!("{far}: stored row without id")))?;
                Ok((id, attributes))
            }
            other => other
                .as_record_id()
                .map(|id| (id, Record::new()))
                .ok_or_else(|| Error::invalid_payload(format!("cannot link {other} as {far}"))),
        }
    }

    /// Updates every record matching `match_exp`.
    ///
    /// Relation properties in the patch replace the record's links on that
    /// end. Only rows whose columns actually changed produce events.
    ///
    /// # Errors
    ///
    /// [`InvalidPayload`](reactant_foundation::ErrorKind::InvalidPayload)
    /// when patching `source`/`target` of a relation, plus the errors of
    /// [`create`](Self::create).
    pub fn update(
        &mut self,
        name: &str,
        match_exp: &MatchExp,
        patch: Record,
        events: Option<&mut Vec<MutationEvent>>,
    ) -> Result<Vec<Record>> {
        let mut sink = Vec::new();
        let updated = self.update_in(name, match_exp, &patch, &mut sink)?;
        deliver(events, sink);
        Ok(updated)
    }

    pub(crate) fn update_in(
        &mut self,
        name: &str,
        match_exp: &MatchExp,
        patch: &Record,
        sink: &mut Vec<MutationEvent>,
    ) -> Result<Vec<Record>> {
        if self.schema.relation(name).is_some()
            && (patch.contains_key("source") || patch.contains_key("target"))
        {
            return Err(Error::invalid_payload(format!(
                "{name}: source and target change only through link and unlink"
            )));
        }
        let (table, _) = self.schema.resolve_storage(name)?;
        let (columns, links) = self.split_payload(name, patch)?;
        let ids: Vec<RecordId> = self
            .select(name, Some(match_exp), &PathTree::default())?
            .iter()
            .filter_map(Record::id)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let by_ids = ids_predicate(&ids);

        if !columns.is_empty() {
            for (old, new) in self.adapter.update(&table, &by_ids, &columns)? {
                if old != new {
                    debug!(record = %name, id = ?new.id(), "updated");
                    sink.push(MutationEvent::update(table.clone(), old, new));
                }
            }
        }
        if !links.is_empty() {
            for id in &ids {
                for (end, _) in &links {
                    self.unlink_end(end, *id, sink)?;
                }
                self.apply_links(*id, &links, sink)?;
            }
        }
        self.adapter.execute(&TableQuery::all(table).with_predicate(by_ids))
    }

    fn unlink_end(&mut self, end: &RelationEnd, owner: RecordId, sink: &mut Vec<MutationEvent>) -> Result<()> {
        let (near, _) = end_columns(end);
        self.delete_in(&end.relation, &MatchAtom::eq(near, owner).exp(), sink)?;
        Ok(())
    }

    /// Deletes every record matching `match_exp`, and every relation record
    /// linking a deleted record, relation records first.
    ///
    /// # Errors
    ///
    /// Unknown names and adapter failures.
    pub fn delete(
        &mut self,
        name: &str,
        match_exp: &MatchExp,
        events: Option<&mut Vec<MutationEvent>>,
    ) -> Result<Vec<Record>> {
        let mut sink = Vec::new();
        let deleted = self.delete_in(name, match_exp, &mut sink)?;
        deliver(events, sink);
        Ok(deleted)
    }

    pub(crate) fn delete_in(
        &mut self,
        name: &str,
        match_exp: &MatchExp,
        sink: &mut Vec<MutationEvent>,
    ) -> Result<Vec<Record>> {
        let (table, _) = self.schema.resolve_storage(name)?;
        let ids: Vec<RecordId> = self
            .select(name, Some(match_exp), &PathTree::default())?
            .iter()
            .filter_map(Record::id)
            .collect();
        let mut deleted = Vec::new();
        for id in ids {
            deleted.extend(self.delete_by_id(&table, id, sink)?);
        }
        Ok(deleted)
    }

    /// Deletes one row of `table` after the relation records linking it.
    pub(crate) fn delete_by_id(
        &mut self,
        table: &str,
        id: RecordId,
        sink: &mut Vec<MutationEvent>,
    ) -> Result<Option<Record>> {
        let views = self.nested_views_holding(table, id)?;
        for end in self.schema.relation_ends(table)? {
            let owns_storage = self
                .schema
                .relation(&end.relation)
                .is_some_and(|r| r.owns_storage());
            if !owns_storage {
                continue;
            }
            let (near, _) = end_columns(&end);
            let query = TableQuery::all(end.relation.clone()).with_predicate(MatchAtom::eq(near, id).exp());
            for link in self.adapter.execute(&query)? {
                if let Some(link_id) = link.id() {
                    self.delete_by_id(&end.relation, link_id, sink)?;
                }
            }
        }
        let row = self
            .adapter
            .delete(table, &MatchAtom::id(id).exp())?
            .into_iter()
            .next();
        if let Some(row) = &row {
            debug!(table = %table, %id, "deleted");
            sink.push(MutationEvent::delete(table, row.clone()).with_views(views));
        }
        Ok(row)
    }

    /// Views of `table` filtering on related data that currently show row
    /// `id`. Must run while the row and its links still exist.
    fn nested_views_holding(&self, table: &str, id: RecordId) -> Result<Vec<String>> {
        let mut views = Vec::new();
        for name in self.schema.views_of(table) {
            let (_, filter) = self.schema.resolve_storage(&name)?;
            let Some(filter) = filter else {
                continue;
            };
            let nested = filter.atoms().iter().any(|atom| !atom.is_flat());
            if nested && self.row(&name, id)?.is_some() {
                views.push(name);
            }
        }
        Ok(views)
    }

    // =========================================================================
    // Dictionaries
    // =========================================================================

    /// Reads a dictionary value, falling back to its default, then nil.
    ///
    /// # Errors
    ///
    /// Unknown dictionary names and adapter failures.
    pub fn get_dictionary(&self, name: &str) -> Result<Value> {
        let def = self
            .schema
            .dictionary(name)
            .ok_or_else(|| Error::unknown_record(name))?;
        let row = self.dictionary_row(name)?;
        Ok(row
            .as_ref()
            .and_then(|r| r.get("value"))
            .cloned()
            .or_else(|| def.default.clone())
            .unwrap_or_default())
    }

    /// Writes a dictionary value.
    ///
    /// # Errors
    ///
    /// Unknown dictionary names, type mismatches and adapter failures.
    pub fn set_dictionary(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        events: Option<&mut Vec<MutationEvent>>,
    ) -> Result<()> {
        let mut sink = Vec::new();
        self.set_dictionary_in(name, value.into(), &mut sink)?;
        deliver(events, sink);
        Ok(())
    }

    pub(crate) fn set_dictionary_in(&mut self, name: &str, value: Value, sink: &mut Vec<MutationEvent>) -> Result<()> {
        let def = self
            .schema
            .dictionary(name)
            .ok_or_else(|| Error::unknown_record(name))?;
        if !value.is_nil() && !def.ty.accepts(&value) {
            return Err(Error::type_mismatch(name, def.ty.clone(), value.value_type()));
        }
        match self.dictionary_row(name)?.and_then(|r| r.id()) {
            Some(id) => {
                let patch = Record::new().insert("value", value);
                for (old, new) in self.adapter.update(DICTIONARY_ENTITY, &MatchAtom::id(id).exp(), &patch)? {
                    if old != new {
                        sink.push(MutationEvent::update(DICTIONARY_ENTITY, old, new));
                    }
                }
            }
            None => {
                let row = Record::new().insert("key", name).insert("value", value);
                self.insert_row(DICTIONARY_ENTITY, row, sink)?;
            }
        }
        Ok(())
    }

    fn dictionary_row(&self, name: &str) -> Result<Option<Record>> {
        let query = TableQuery::all(DICTIONARY_ENTITY).with_predicate(MatchAtom::eq("key", name).exp());
        Ok(self.adapter.execute(&query)?.into_iter().next())
    }
}

impl<A: StorageAdapter> RecordReader for RecordStorage<A> {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn find(
        &self,
        name: &str,
        match_exp: Option<&MatchExp>,
        attributes: &AttributeQuery,
        modifier: &Modifier,
    ) -> Result<Vec<Record>> {
        RecordStorage::find(self, name, match_exp, attributes, modifier)
    }

    fn get_dictionary(&self, name: &str) -> Result<Value> {
        RecordStorage::get_dictionary(self, name)
    }
}

/// `(near, far)` column names of a relation record, seen from `end`.
pub(crate) fn end_columns(end: &RelationEnd) -> (&'static str, &'static str) {
    if end.is_source {
        ("source", "target")
    } else {
        ("target", "source")
    }
}

/// The raw row with the `keep` relation paths taken from the hydrated one.
fn compose(raw: &Record, hydrated: &Record, keep: &PathTree) -> Record {
    let mut out = raw.clone();
    for key in keep.0.keys() {
        if let Some(value) = hydrated.get(key.as_str()) {
            out.set(key.clone(), value.clone());
        }
    }
    out
}

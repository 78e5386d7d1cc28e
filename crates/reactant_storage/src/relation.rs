//! Relation linking, unlinking and path traversal.

use std::collections::{HashMap, HashSet, VecDeque};

use reactant_foundation::{Error, Record, RecordId, Result, Value};
use tracing::debug;

use crate::event::MutationEvent;
use crate::gateway::{RecordStorage, deliver, end_columns};
use crate::query::{AttributeQuery, MatchAtom, MatchExp, Modifier, PathTree};
use crate::schema::OnViolation;
use crate::store::StorageAdapter;

impl<A: StorageAdapter> RecordStorage<A> {
    /// Links `source` to `target` through relation `name`.
    ///
    /// Linking an already linked pair returns the existing relation record.
    /// An x:1 end that is already taken is an error, or is unlinked first
    /// when the relation's policy is [`OnViolation::Replace`].
    ///
    /// # Errors
    ///
    /// Unknown relations, missing endpoint records, cardinality violations
    /// and invalid link attributes.
    pub fn add_relation_by_name_by_id(
        &mut self,
        name: &str,
        source: RecordId,
        target: RecordId,
        attributes: Record,
        events: Option<&mut Vec<MutationEvent>>,
    ) -> Result<Record> {
        let mut sink = Vec::new();
        let link = self.link_in(name, source, target, attributes, &mut sink)?;
        deliver(events, sink);
        Ok(link)
    }

    pub(crate) fn link_in(
        &mut self,
        name: &str,
        source: RecordId,
        target: RecordId,
        attributes: Record,
        sink: &mut Vec<MutationEvent>,
    ) -> Result<Record> {
        let relation = self
            .schema
            .relation(name)
            .ok_or_else(|| Error::unknown_record(name))?
            .clone();
        for (node, id) in [(&relation.source, source), (&relation.target, target)] {
            if self.row(node, id)?.is_none() {
                return Err(Error::record_not_found(node.clone(), id));
            }
        }

        let pair = MatchAtom::eq("source", source).exp().and(MatchAtom::eq("target", target));
        if let Some(existing) = self.links(name, &pair)?.into_iter().next() {
            return Ok(existing);
        }

        let mut replaced = Vec::new();
        let checks = [
            (!relation.cardinality.source_has_many(), "source", source, "target"),
            (!relation.cardinality.target_has_many(), "target", target, "source"),
        ];
        for (single, column, id, other) in checks {
            if !single {
                continue;
            }
            let taken = self.links(name, &MatchAtom::eq(column, id).exp())?;
            if taken.is_empty() {
                continue;
            }
            match relation.on_violation {
                OnViolation::Error => {
                    return Err(Error::cardinality_violation(
                        name,
                        format!("{column} {id} already has a {other}"),
                    ));
                }
                OnViolation::Replace => replaced.extend(taken.iter().filter_map(Record::id)),
            }
        }
        if !replaced.is_empty() {
            let (table, _) = self.schema.resolve_storage(name)?;
            for id in replaced {
                self.delete_by_id(&table, id, sink)?;
            }
        }

        let (row, links) = self.prepare_row(name, &attributes)?;
        let row = row
            .insert("source", Value::Id(source))
            .insert("target", Value::Id(target));
        let stored = self.insert_row(name, row, sink)?;
        debug!(relation = %name, %source, %target, "linked");
        if let Some(id) = stored.id() {
            self.apply_links(id, &links, sink)?;
        }
        Ok(stored)
    }

    fn links(&self, name: &str, predicate: &MatchExp) -> Result<Vec<Record>> {
        self.select(name, Some(predicate), &PathTree::default())
    }

    /// Unlinks every relation record of `name` matching `match_exp`.
    ///
    /// # Errors
    ///
    /// Unknown relations and adapter failures.
    pub fn remove_relation_by_name(
        &mut self,
        name: &str,
        match_exp: &MatchExp,
        events: Option<&mut Vec<MutationEvent>>,
    ) -> Result<Vec<Record>> {
        if self.schema.relation(name).is_none() {
            return Err(Error::unknown_record(name));
        }
        self.delete(name, match_exp, events)
    }

    /// Finds relation records of `name`.
    ///
    /// # Errors
    ///
    /// Unknown relations and adapter failures.
    pub fn find_relation_by_name(
        &self,
        name: &str,
        match_exp: Option<&MatchExp>,
        attributes: &AttributeQuery,
        modifier: &Modifier,
    ) -> Result<Vec<Record>> {
        if self.schema.relation(name).is_none() {
            return Err(Error::unknown_record(name));
        }
        self.find(name, match_exp, attributes, modifier)
    }

    /// Updates the attributes of relation records of `name`.
    ///
    /// # Errors
    ///
    /// Unknown relations, and an
    /// [`InvalidPayload`](reactant_foundation::ErrorKind::InvalidPayload)
    /// error if the patch names `source` or `target`.
    pub fn update_relation_by_name(
        &mut self,
        name: &str,
        match_exp: &MatchExp,
        patch: Record,
        events: Option<&mut Vec<MutationEvent>>,
    ) -> Result<Vec<Record>> {
        if self.schema.relation(name).is_none() {
            return Err(Error::unknown_record(name));
        }
        self.update(name, match_exp, patch, events)
    }

    /// Follows the self-referential relation property `property` of `name`
    /// from `from` until `to` is reached.
    ///
    /// Returns the records on the shortest path, both ends included, or
    /// `None` if `to` is unreachable within `max_depth` hops.
    ///
    /// # Errors
    ///
    /// Unknown names or properties, a property whose far end is another
    /// table, and adapter failures.
    pub fn find_path(
        &self,
        name: &str,
        property: &str,
        from: RecordId,
        to: RecordId,
        max_depth: Option<usize>,
    ) -> Result<Option<Vec<Record>>> {
        let end = self
            .schema
            .relation_end(name, property)?
            .ok_or_else(|| Error::unknown_property(name, property))?;
        let (table, _) = self.schema.resolve_storage(name)?;
        if self.schema.resolve_storage(&end.far)?.0 != table {
            return Err(Error::invalid_payload(format!(
                "{name}.{property} does not point back at {name}"
            )));
        }
        let (near, far) = end_columns(&end);

        let mut parent: HashMap<RecordId, RecordId> = HashMap::new();
        let mut seen: HashSet<RecordId> = HashSet::from([from]);
        let mut queue = VecDeque::from([(from, 0usize)]);
        let mut reached = from == to;
        while let Some((current, depth)) = queue.pop_front() {
            if reached || max_depth.is_some_and(|max| depth >= max) {
                break;
            }
            for link in self.links(&end.relation, &MatchAtom::eq(near, current).exp())? {
                let Some(next) = link.get(far).and_then(Value::as_record_id) else {
                    continue;
                };
                if !seen.insert(next) {
                    continue;
                }
                parent.insert(next, current);
                if next == to {
                    reached = true;
                    break;
                }
                queue.push_back((next, depth + 1));
            }
        }
        if !reached {
            return Ok(None);
        }

        let mut ids = vec![to];
        let mut cursor = to;
        while let Some(prev) = parent.get(&cursor) {
            ids.push(*prev);
            cursor = *prev;
        }
        ids.reverse();
        let mut path = Vec::with_capacity(ids.len());
        for id in ids {
            let row = self.row(name, id)?.ok_or_else(|| Error::record_not_found(name, id))?;
            path.push(row);
        }
        Ok(Some(path))
    }
}

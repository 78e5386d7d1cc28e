//! Aggregates and dirty tracking.
//!
//! An event marks cells dirty; each dirty cell is recomputed once after the
//! event's state transfers and written only if its value changed.

use std::collections::BTreeSet;

use reactant_foundation::{Error, Record, RecordId, Result, Value};
use reactant_storage::{
    AttributeQuery, DICTIONARY_ENTITY, LINK_KEY, MatchAtom, Modifier, MutationEvent, MutationKind, RecordStorage,
    StorageAdapter,
};
use tracing::trace;

use crate::callback::CallbackContext;
use crate::computation::{Aggregate, AggregateKind, BoundComputation, Computation, DataDep, Target};
use crate::scheduler::{Cell, Pass, Scheduler};

type Dirty = BTreeSet<(usize, Option<RecordId>)>;

/// Columns of a link row holding the near and far record ids.
fn end_columns(is_source: bool) -> (&'static str, &'static str) {
    if is_source { ("source", "target") } else { ("target", "source") }
}

/// True if `event` changed the value of dictionary `name`.
fn dictionary_changed(event: &MutationEvent, name: &str) -> bool {
    event.record_name == DICTIONARY_ENTITY
        && event.record.get("key").and_then(Value::as_str) == Some(name)
        && (event.kind != MutationKind::Update || event.changed_keys().contains(&"value"))
}

impl Scheduler {
    /// Marks and recomputes every aggregate and real-time cell `event`
    /// touches.
    pub(crate) fn run_dependents<A: StorageAdapter>(
        &self,
        pass: &mut Pass<'_, A>,
        event: &MutationEvent,
    ) -> Result<()> {
        let mut dirty = Dirty::new();
        for (index, bound) in self.computations.iter().enumerate() {
            mark(pass.storage, index, bound, event, &mut dirty)?;
        }
        if !dirty.is_empty() {
            trace!(cells = dirty.len(), "dirty cells");
        }
        for (index, owner) in dirty {
            self.recompute(pass, index, owner)?;
        }
        Ok(())
    }

    /// Recomputes one cell. Owners that no longer exist are skipped.
    pub(crate) fn recompute<A: StorageAdapter>(
        &self,
        pass: &mut Pass<'_, A>,
        index: usize,
        owner: Option<RecordId>,
    ) -> Result<()> {
        let Some(bound) = self.computations.at(index) else {
            return Ok(());
        };
        let cell = match (&bound.target, owner) {
            (Target::Property { record, property }, Some(id)) => {
                let Some(row) = pass.storage.row(record, id)? else {
                    trace!(record = %record, %id, "owner gone, cell skipped");
                    return Ok(());
                };
                Cell::Property {
                    record,
                    property,
                    id,
                    row,
                }
            }
            (Target::Dictionary { name }, _) => Cell::Dictionary { name },
            _ => return Ok(()),
        };
        match &bound.computation {
            Computation::RealTime(real_time) => self.recompute_real_time(pass, bound, real_time, &cell),
            computation => match computation.aggregate() {
                Some((kind, aggregate)) => self.recompute_aggregate(pass, bound, kind, aggregate, &cell),
                None => Ok(()),
            },
        }
    }

    fn recompute_aggregate<A: StorageAdapter>(
        &self,
        pass: &mut Pass<'_, A>,
        bound: &BoundComputation,
        kind: AggregateKind,
        aggregate: &Aggregate,
        cell: &Cell<'_>,
    ) -> Result<()> {
        let items = match cell {
            Cell::Property { record, id, .. } => related_records(pass.storage, aggregate, record, *id)?,
            Cell::Dictionary { .. } => pass.storage.find(
                &aggregate.record,
                None,
                &projection(aggregate),
                &Modifier::new(),
            )?,
        };
        let folded = {
            let ctx = pass.context();
            fold(kind, aggregate, &items, &ctx)
        };
        match folded {
            Ok(value) => self.write_cell(pass, cell, value, None),
            Err(error) => self.isolate(&mut pass.report, bound, cell.id(), error),
        }
    }

    /// Writes a cell's value, plus an optional hidden column, if changed.
    pub(crate) fn write_cell<A: StorageAdapter>(
        &self,
        pass: &mut Pass<'_, A>,
        cell: &Cell<'_>,
        value: Value,
        hidden: Option<(String, Value)>,
    ) -> Result<()> {
        match cell {
            Cell::Property {
                record,
                property,
                id,
                row,
            } => {
                let mut patch = Record::new();
                if row.get(*property) != Some(&value) {
                    patch.set(*property, value);
                }
                if let Some((column, v)) = hidden {
                    if row.get(column.as_str()) != Some(&v) {
                        patch.set(column, v);
                    }
                }
                if !patch.is_empty() {
                    trace!(record = %record, %id, property = *property, "cell written");
                    pass.storage
                        .update(record, &MatchAtom::id(*id).exp(), patch, Some(&mut pass.sink))?;
                }
            }
            Cell::Dictionary { name } => {
                if pass.storage.get_dictionary(name)? != value {
                    trace!(dictionary = %name, "cell written");
                    pass.storage.set_dictionary(name, value, Some(&mut pass.sink))?;
                }
                if let Some((column, v)) = hidden {
                    pass.storage.update(
                        DICTIONARY_ENTITY,
                        &MatchAtom::eq("key", *name).exp(),
                        Record::new().insert(column, v),
                        Some(&mut pass.sink),
                    )?;
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Dirty marking
// =============================================================================

fn mark<A: StorageAdapter>(
    storage: &RecordStorage<A>,
    index: usize,
    bound: &BoundComputation,
    event: &MutationEvent,
    dirty: &mut Dirty,
) -> Result<()> {
    let schema = storage.schema();
    match (&bound.computation, &bound.target) {
        (Computation::RealTime(real_time), Target::Property { record, .. }) => {
            let owner_table = schema.resolve_storage(record)?.0;
            if event.record_name == owner_table && event.kind == MutationKind::Create {
                dirty.insert((index, event.id()));
            }
            mark_deps(storage, index, record, &real_time.data_deps, event, dirty)
        }
        (Computation::RealTime(real_time), Target::Dictionary { .. }) => {
            if real_time
                .data_deps
                .iter()
                .any(|dep| matches!(dep, DataDep::Dictionary(name) if dictionary_changed(event, name)))
            {
                dirty.insert((index, None));
            }
            Ok(())
        }
        (computation, Target::Property { record, .. }) => {
            let Some((_, aggregate)) = computation.aggregate() else {
                return Ok(());
            };
            let end = aggregate.end_for(schema, record)?;
            let (near, far) = end_columns(end.is_source);
            let relation_table = schema.resolve_storage(&end.relation)?.0;
            let far_table = schema.resolve_storage(&end.far)?.0;
            let owner_table = schema.resolve_storage(record)?.0;

            if event.record_name == relation_table {
                for row in std::iter::once(&event.record).chain(event.old_record.as_ref()) {
                    if let Some(id) = row.get(near).and_then(Value::as_record_id) {
                        dirty.insert((index, Some(id)));
                    }
                }
            }
            if event.record_name == far_table && event.kind == MutationKind::Update {
                if let Some(id) = event.id() {
                    let links = storage.find(
                        &end.relation,
                        Some(&MatchAtom::eq(far, id).exp()),
                        &AttributeQuery::all(),
                        &Modifier::new(),
                    )?;
                    for link in links {
                        if let Some(owner) = link.get(near).and_then(Value::as_record_id) {
                            dirty.insert((index, Some(owner)));
                        }
                    }
                }
            }
            if event.record_name == owner_table && event.kind == MutationKind::Create {
                dirty.insert((index, event.id()));
            }
            mark_deps(storage, index, record, &aggregate.data_deps, event, dirty)
        }
        (computation, Target::Dictionary { .. }) => {
            let Some((_, aggregate)) = computation.aggregate() else {
                return Ok(());
            };
            let source_table = schema.resolve_storage(&aggregate.record)?.0;
            let by_dep = aggregate
                .data_deps
                .iter()
                .any(|dep| matches!(dep, DataDep::Dictionary(name) if dictionary_changed(event, name)));
            if event.record_name == source_table || by_dep {
                dirty.insert((index, None));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn mark_deps<A: StorageAdapter>(
    storage: &RecordStorage<A>,
    index: usize,
    owner: &str,
    deps: &[DataDep],
    event: &MutationEvent,
    dirty: &mut Dirty,
) -> Result<()> {
    let owner_table = storage.schema().resolve_storage(owner)?.0;
    for dep in deps {
        match dep {
            DataDep::Own(attributes) => {
                let touched = event.record_name == owner_table
                    && event.kind == MutationKind::Update
                    && event
                        .changed_keys()
                        .iter()
                        .any(|key| attributes.iter().any(|a| a == key));
                if touched {
                    dirty.insert((index, event.id()));
                }
            }
            DataDep::Dictionary(name) => {
                if dictionary_changed(event, name) {
                    let owners = storage.find(owner, None, &AttributeQuery::default(), &Modifier::new())?;
                    dirty.extend(owners.iter().map(|row| (index, row.id())));
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Folding
// =============================================================================

fn projection(aggregate: &Aggregate) -> AttributeQuery {
    aggregate
        .attribute_query
        .clone()
        .unwrap_or_else(AttributeQuery::all)
}

/// Far-end records of `owner` through the aggregate's relation, each with
/// its link record under `&`.
fn related_records<A: StorageAdapter>(
    storage: &RecordStorage<A>,
    aggregate: &Aggregate,
    owner: &str,
    id: RecordId,
) -> Result<Vec<Record>> {
    let end = aggregate.end_for(storage.schema(), owner)?;
    let nested = projection(aggregate).with_field(LINK_KEY);
    let query = AttributeQuery::default().with_nested(end.property.clone(), nested);
    let Some(row) = storage.find_by_id(owner, id, &query)? else {
        return Ok(Vec::new());
    };
    Ok(match row.get(end.property.as_str()) {
        Some(Value::List(items)) => items.iter().filter_map(Value::as_map).cloned().collect(),
        Some(Value::Map(item)) => vec![item.clone()],
        _ => Vec::new(),
    })
}

/// Integral results within the exact `f64` range come back as ints.
#[allow(clippy::cast_possible_truncation)]
fn number(x: f64) -> Value {
    if x.fract() == 0.0 && x.abs() < 9.0e15 {
        Value::Int(x as i64)
    } else {
        Value::Float(x)
    }
}

/// Sums the aggregated attribute. Int operands are added exactly; the first
/// float operand or an `i64` overflow widens the sum to float.
#[allow(clippy::cast_precision_loss)]
fn sum(aggregate: &Aggregate, items: &[Record]) -> Value {
    let mut exact = Some(0_i64);
    let mut total = 0.0;
    for item in items {
        let value = aggregate.attribute.as_deref().and_then(|path| item.path(path));
        total += value.and_then(Value::as_number).unwrap_or(0.0);
        exact = match (exact, value) {
            (Some(acc), Some(Value::Int(n))) => acc.checked_add(*n),
            (Some(acc), None | Some(Value::Nil)) => Some(acc),
            _ => None,
        };
    }
    exact.map_or_else(|| number(total), Value::Int)
}

/// Folds the related records of one cell.
///
/// # Errors
///
/// Callback failures, and `UnboundCallback` for unbound slots.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn fold(
    kind: AggregateKind,
    aggregate: &Aggregate,
    items: &[Record],
    ctx: &CallbackContext<'_>,
) -> Result<Value> {
    let matches = |item: &Record| -> Result<bool> {
        aggregate
            .callback
            .as_ref()
            .map_or(Ok(true), |callback| callback.get().and_then(|f| f(item, ctx)))
    };
    match kind {
        AggregateKind::Count => {
            let mut count = 0_i64;
            for item in items {
                if matches(item)? {
                    count += 1;
                }
            }
            Ok(Value::Int(count))
        }
        AggregateKind::Summation => Ok(sum(aggregate, items)),
        AggregateKind::Average => {
            if items.is_empty() {
                return Ok(Value::Int(0));
            }
            let count = items.len() as f64;
            Ok(match (sum(aggregate, items), i64::try_from(items.len())) {
                (Value::Int(total), Ok(n)) if total % n == 0 => Value::Int(total / n),
                (Value::Int(total), _) => number(total as f64 / count),
                (Value::Float(total), _) => number(total / count),
                (other, _) => other,
            })
        }
        AggregateKind::WeightedSummation => {
            let weight = aggregate
                .weight
                .as_ref()
                .ok_or_else(|| Error::internal("weighted summation without a weight callback"))?
                .get()?;
            let mut total = 0.0;
            for item in items {
                let (w, v) = weight(item, ctx)?;
                total += w * v;
            }
            Ok(number(total))
        }
        AggregateKind::Every => {
            if items.is_empty() {
                return Ok(Value::Bool(!aggregate.not_empty));
            }
            for item in items {
                if !matches(item)? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        AggregateKind::Any => {
            for item in items {
                if matches(item)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
    }
}

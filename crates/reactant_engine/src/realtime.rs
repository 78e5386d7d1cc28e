//! Time-dependent values.

use reactant_foundation::{Result, Value};
use reactant_storage::{AttributeQuery, DICTIONARY_ENTITY, MatchAtom, Modifier, RecordStorage, StorageAdapter};
use tracing::debug;

use crate::computation::{BoundComputation, Computation, RealTime, Target};
use crate::scheduler::{Cell, DispatchReport, Pass, Scheduler};

/// Hidden dictionary row column holding the next recompute time.
pub const DICTIONARY_NEXT_RECOMPUTE: &str = "__next_recompute";

/// Hidden column holding the next recompute time of `property`.
#[must_use]
pub fn next_recompute_column(property: &str) -> String {
    format!("__{property}_next_recompute")
}

fn is_due(next: Option<&Value>, now: i64) -> bool {
    next.and_then(Value::as_int).is_none_or(|at| at <= now)
}

impl Scheduler {
    pub(crate) fn recompute_real_time<A: StorageAdapter>(
        &self,
        pass: &mut Pass<'_, A>,
        bound: &BoundComputation,
        real_time: &RealTime,
        cell: &Cell<'_>,
    ) -> Result<()> {
        let computed = {
            let ctx = pass.context();
            real_time
                .callback
                .get()
                .and_then(|f| f(pass.now, cell.row(), &ctx))
                .and_then(|value| {
                    let next = match &real_time.next_recompute {
                        Some(callback) => callback.get().and_then(|f| f(pass.now, &value, &ctx))?,
                        None => None,
                    };
                    Ok((value, next))
                })
        };
        let (value, next) = match computed {
            Ok(pair) => pair,
            Err(error) => return self.isolate(&mut pass.report, bound, cell.id(), error),
        };
        let column = match cell {
            Cell::Property { property, .. } => next_recompute_column(property),
            Cell::Dictionary { .. } => DICTIONARY_NEXT_RECOMPUTE.to_string(),
        };
        self.write_cell(pass, cell, value, Some((column, next.map_or(Value::Nil, Value::Int))))
    }

    /// Recomputes every real-time cell that is due at `now`, then processes
    /// the resulting writes.
    ///
    /// A cell is due when it has no stored next-recompute time or that time
    /// has passed.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::process`].
    pub fn refresh_real_time<A: StorageAdapter>(
        &self,
        storage: &mut RecordStorage<A>,
        now: i64,
    ) -> Result<DispatchReport> {
        let mut pass = Pass::new(storage, now);
        for (index, bound) in self.computations.iter().enumerate() {
            if !matches!(bound.computation, Computation::RealTime(_)) {
                continue;
            }
            match &bound.target {
                Target::Property { record, property } => {
                    let column = next_recompute_column(property);
                    let rows = pass.storage.find(
                        record,
                        None,
                        &AttributeQuery::fields([column.clone()]),
                        &Modifier::new(),
                    )?;
                    for row in rows {
                        if is_due(row.get(column.as_str()), now) {
                            self.recompute(&mut pass, index, row.id())?;
                        }
                    }
                }
                Target::Dictionary { name } => {
                    let row = pass.storage.find_one(
                        DICTIONARY_ENTITY,
                        Some(&MatchAtom::eq("key", name.as_str()).exp()),
                        &AttributeQuery::fields([DICTIONARY_NEXT_RECOMPUTE]),
                    )?;
                    if is_due(row.as_ref().and_then(|r| r.get(DICTIONARY_NEXT_RECOMPUTE)), now) {
                        self.recompute(&mut pass, index, None)?;
                    }
                }
                Target::Entity { .. } | Target::Relation { .. } => {}
            }
        }
        debug!(now, writes = pass.sink.len(), "real-time refresh");
        self.settle(pass)
    }
}

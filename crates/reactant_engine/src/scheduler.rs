//! The reactive scheduler.
//!
//! Events are processed one at a time from a FIFO queue. For each event the
//! scheduler runs, in order:
//!
//! 1. transforms whose source matches the event,
//! 2. initial state assignment for created records,
//! 3. state transfers, gated on the persisted bound state,
//! 4. aggregates and real-time values the event made dirty.
//!
//! Every write made along the way is itself an event (one generation
//! deeper) and is queued behind the current one.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::convert::Infallible;

use reactant_foundation::{Error, Record, RecordId, Result, SemanticLimit, Value};
use reactant_storage::{AttributeQuery, MatchAtom, Modifier, MutationEvent, MutationKind, RecordStorage, StorageAdapter};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::callback::CallbackContext;
use crate::computation::{BoundComputation, Computation, ComputationSet, Target};
use crate::config::EngineConfig;
use crate::state_machine::{StateMachine, StateTransfer, TargetRef, bound_state_column};

// =============================================================================
// Report
// =============================================================================

/// A state transfer that was written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    /// Owning entity or relation.
    pub record: String,
    /// Target record.
    pub id: RecordId,
    /// Machine-driven property.
    pub property: String,
    /// State before.
    pub from: String,
    /// State after.
    pub to: String,
}

/// A cell skipped because one of its callbacks failed.
#[derive(Debug)]
pub struct CellFailure {
    /// Failing computation.
    pub computation: Uuid,
    /// Its target, rendered.
    pub target: String,
    /// Affected record, when known.
    pub id: Option<RecordId>,
    /// The callback error.
    pub error: Error,
}

/// Outcome of draining the event queue.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Every processed event, in processing order.
    pub events: Vec<MutationEvent>,
    /// Applied state transfers.
    pub transitions: Vec<Transition>,
    /// Isolated callback failures.
    pub failures: Vec<CellFailure>,
}

impl DispatchReport {
    /// True if no callback failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Appends another report.
    pub fn absorb(&mut self, other: DispatchReport) {
        self.events.extend(other.events);
        self.transitions.extend(other.transitions);
        self.failures.extend(other.failures);
    }
}

// =============================================================================
// Pass state
// =============================================================================

/// Mutable state of one scheduler run.
pub(crate) struct Pass<'s, A> {
    pub(crate) storage: &'s mut RecordStorage<A>,
    pub(crate) now: i64,
    pub(crate) sink: Vec<MutationEvent>,
    pub(crate) report: DispatchReport,
}

impl<'s, A: StorageAdapter> Pass<'s, A> {
    pub(crate) fn new(storage: &'s mut RecordStorage<A>, now: i64) -> Self {
        Self {
            storage,
            now,
            sink: Vec::new(),
            report: DispatchReport::default(),
        }
    }

    pub(crate) fn context(&self) -> CallbackContext<'_> {
        CallbackContext {
            storage: &*self.storage,
            now: self.now,
        }
    }
}

/// One computed value: a property of one record, or a dictionary.
pub(crate) enum Cell<'c> {
    Property {
        record: &'c str,
        property: &'c str,
        id: RecordId,
        row: Record,
    },
    Dictionary {
        name: &'c str,
    },
}

impl Cell<'_> {
    pub(crate) fn id(&self) -> Option<RecordId> {
        match self {
            Self::Property { id, .. } => Some(*id),
            Self::Dictionary { .. } => None,
        }
    }

    pub(crate) fn row(&self) -> Option<&Record> {
        match self {
            Self::Property { row, .. } => Some(row),
            Self::Dictionary { .. } => None,
        }
    }
}

/// A state machine bound to a property.
#[derive(Clone, Copy)]
struct MachineCell<'c> {
    index: usize,
    bound: &'c BoundComputation,
    machine: &'c StateMachine,
    record: &'c str,
    property: &'c str,
}

/// True if `event` concerns `node`: same storage table, and the record is
/// visible through the node's filter.
pub(crate) fn concerns<A: StorageAdapter>(
    storage: &RecordStorage<A>,
    node: &str,
    event: &MutationEvent,
) -> Result<bool> {
    let (table, filter) = storage.schema().resolve_storage(node)?;
    if table != event.record_name {
        return Ok(false);
    }
    let Some(filter) = filter else {
        return Ok(true);
    };
    if filter.atoms().iter().all(|atom| atom.is_flat()) {
        return Ok(filter
            .evaluate(|atom: &MatchAtom| Ok::<_, Infallible>(atom.matches(&event.record)))
            .is_ok());
    }
    if event.kind == MutationKind::Delete {
        return Ok(event.views.iter().any(|view| view == node));
    }
    storage.record_belongs_to(node, &event.record)
}

fn current_state<'r>(row: &'r Record, property: &str, machine: &'r StateMachine) -> &'r str {
    row.get(bound_state_column(property).as_str())
        .and_then(Value::as_str)
        .unwrap_or(&machine.initial)
}

// =============================================================================
// Scheduler
// =============================================================================

/// Drives every computation of a [`ComputationSet`] from mutation events.
#[derive(Debug, Default)]
pub struct Scheduler {
    pub(crate) config: EngineConfig,
    pub(crate) computations: ComputationSet,
}

impl Scheduler {
    /// Creates a scheduler with the default configuration.
    #[must_use]
    pub fn new(computations: ComputationSet) -> Self {
        Self {
            config: EngineConfig::default(),
            computations,
        }
    }

    /// Builder method to set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The driven computations.
    #[must_use]
    pub fn computations(&self) -> &ComputationSet {
        &self.computations
    }

    /// Processes `events` and everything they cause, to completion.
    ///
    /// The caller owns the transaction: on error, storage holds the partial
    /// writes of this run and must be rolled back.
    ///
    /// # Errors
    ///
    /// Storage failures, `LimitExceeded` when the cascade gets too deep or
    /// too long, and callback failures when they are not isolated.
    pub fn process<A: StorageAdapter>(
        &self,
        storage: &mut RecordStorage<A>,
        now: i64,
        events: Vec<MutationEvent>,
    ) -> Result<DispatchReport> {
        let mut pass = Pass::new(storage, now);
        let mut queue: VecDeque<MutationEvent> = events.into();
        while let Some(event) = queue.pop_front() {
            if pass.report.events.len() >= self.config.max_events_per_dispatch {
                return Err(Error::limit_exceeded(SemanticLimit::MaxEvents {
                    limit: self.config.max_events_per_dispatch,
                }));
            }
            if event.generation > self.config.max_cascade_depth {
                return Err(Error::limit_exceeded(SemanticLimit::MaxCascadeDepth {
                    limit: self.config.max_cascade_depth,
                    record: Some(event.record_name.clone()),
                }));
            }
            trace!(record = %event.record_name, kind = %event.kind, generation = event.generation, "event");

            self.run_transforms(&mut pass, &event)?;
            self.run_state_machines(&mut pass, &event)?;
            self.run_dependents(&mut pass, &event)?;

            for derived in std::mem::take(&mut pass.sink) {
                let mut derived = derived.with_generation(event.generation + 1);
                if derived.interaction_name.is_none() {
                    derived.interaction_name.clone_from(&event.interaction_name);
                }
                queue.push_back(derived);
            }
            pass.report.events.push(event);
        }
        Ok(pass.report)
    }

    /// Computes every aggregate and real-time value from current storage,
    /// then processes the resulting writes.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::process`].
    pub fn initialize<A: StorageAdapter>(&self, storage: &mut RecordStorage<A>, now: i64) -> Result<DispatchReport> {
        let mut pass = Pass::new(storage, now);
        for (index, bound) in self.computations.iter().enumerate() {
            let derived = bound.computation.aggregate().is_some()
                || matches!(bound.computation, Computation::RealTime(_));
            if !derived {
                continue;
            }
            match &bound.target {
                Target::Property { record, .. } => {
                    let owners = pass.storage.find(record, None, &AttributeQuery::default(), &Modifier::new())?;
                    for owner in owners {
                        self.recompute(&mut pass, index, owner.id())?;
                    }
                }
                Target::Dictionary { .. } => self.recompute(&mut pass, index, None)?,
                Target::Entity { .. } | Target::Relation { .. } => {}
            }
        }
        self.settle(pass)
    }

    /// Processes the writes a sweep left in `pass`.
    pub(crate) fn settle<A: StorageAdapter>(&self, pass: Pass<'_, A>) -> Result<DispatchReport> {
        let Pass {
            storage,
            now,
            sink,
            mut report,
        } = pass;
        let followup = self.process(storage, now, sink)?;
        report.absorb(followup);
        Ok(report)
    }

    /// Records a callback failure, or returns it when failures are not
    /// isolated.
    pub(crate) fn isolate(
        &self,
        report: &mut DispatchReport,
        bound: &BoundComputation,
        id: Option<RecordId>,
        error: Error,
    ) -> Result<()> {
        if !self.config.isolate_callback_failures {
            return Err(error.in_frame(bound.target.to_string()));
        }
        warn!(cell = %bound.target, id = ?id, error = %error, "callback failed, cell skipped");
        report.failures.push(CellFailure {
            computation: bound.uuid,
            target: bound.target.to_string(),
            id,
            error,
        });
        Ok(())
    }

    // =========================================================================
    // State machines
    // =========================================================================

    fn machines(&self) -> impl Iterator<Item = MachineCell<'_>> {
        self.computations
            .iter()
            .enumerate()
            .filter_map(|(index, bound)| match (&bound.computation, &bound.target) {
                (Computation::StateMachine(machine), Target::Property { record, property }) => Some(MachineCell {
                    index,
                    bound,
                    machine,
                    record,
                    property,
                }),
                _ => None,
            })
    }

    fn run_state_machines<A: StorageAdapter>(&self, pass: &mut Pass<'_, A>, event: &MutationEvent) -> Result<()> {
        if event.kind == MutationKind::Create {
            for cell in self.machines() {
                if concerns(pass.storage, cell.record, event)? {
                    self.assign_initial_state(pass, cell, event)?;
                }
            }
        }

        let mut candidates: Vec<(MachineCell<'_>, &StateTransfer, RecordId)> = Vec::new();
        for cell in self.machines() {
            for transfer in &cell.machine.transfers {
                if !transfer.trigger.matches_event(event) || !concerns(pass.storage, &transfer.trigger.record, event)? {
                    continue;
                }
                let targets = match &transfer.compute_target {
                    Some(callback) => {
                        let ctx = pass.context();
                        match callback.get().and_then(|f| f(event, &ctx)) {
                            Ok(targets) => targets,
                            Err(error) => {
                                self.isolate(&mut pass.report, cell.bound, None, error)?;
                                continue;
                            }
                        }
                    }
                    None if concerns(pass.storage, cell.record, event)? => {
                        event.id().map(TargetRef::Id).into_iter().collect()
                    }
                    None => Vec::new(),
                };
                debug!(
                    machine = %cell.bound.target,
                    current = %transfer.current,
                    next = %transfer.next,
                    targets = targets.len(),
                    "candidate transfer"
                );
                for target in &targets {
                    if let Some(id) = resolve_target(pass.storage, cell.record, target)? {
                        candidates.push((cell, transfer, id));
                    }
                }
            }
        }
        if candidates.is_empty() {
            return Ok(());
        }

        // Bound states are read once, before any transfer of this event writes.
        let mut snapshot: HashMap<(usize, RecordId), Option<Record>> = HashMap::new();
        for (cell, _, id) in &candidates {
            if let Entry::Vacant(slot) = snapshot.entry((cell.index, *id)) {
                slot.insert(pass.storage.row(cell.record, *id)?);
            }
        }

        let mut fired: HashSet<(usize, RecordId)> = HashSet::new();
        for (cell, transfer, id) in candidates {
            let key = (cell.index, id);
            if fired.contains(&key) {
                continue;
            }
            let Some(Some(row)) = snapshot.get(&key) else {
                warn!(record = %cell.record, %id, "transfer target does not exist, skipped");
                continue;
            };
            let current = current_state(row, cell.property, cell.machine);
            if current != transfer.current {
                debug!(
                    record = %cell.record,
                    %id,
                    current,
                    expected = %transfer.current,
                    "transfer skipped by current-state gate"
                );
                continue;
            }
            fired.insert(key);
            let row = row.clone();
            self.apply_transfer(pass, cell, transfer, id, &row, event)?;
        }
        Ok(())
    }

    fn assign_initial_state<A: StorageAdapter>(
        &self,
        pass: &mut Pass<'_, A>,
        cell: MachineCell<'_>,
        event: &MutationEvent,
    ) -> Result<()> {
        let Some(id) = event.id() else {
            return Ok(());
        };
        let column = bound_state_column(cell.property);
        let preset = event.record.get(column.as_str()).and_then(Value::as_str);
        let (state, has_value) = match preset {
            Some(name) => {
                let state = cell
                    .machine
                    .state(name)
                    .ok_or_else(|| Error::invalid_state(format!("{} has no state {name}", cell.bound.target)))?;
                let has_value = event.record.get(cell.property).is_some_and(|v| !v.is_nil());
                (state, has_value)
            }
            None => (cell.machine.initial_state()?, false),
        };

        let value = match (&state.compute_value, has_value) {
            (Some(callback), false) => {
                let ctx = pass.context();
                match callback.get().and_then(|f| f(&Value::Nil, event, &ctx)) {
                    Ok(value) => Some(value),
                    Err(error) => return self.isolate(&mut pass.report, cell.bound, Some(id), error),
                }
            }
            _ => None,
        };

        let mut patch = Record::new();
        if preset.is_none() {
            patch.set(column, state.name.as_str());
        }
        if let Some(value) = value {
            patch.set(cell.property, value);
        }
        if patch.is_empty() {
            return Ok(());
        }
        pass.storage
            .update(cell.record, &MatchAtom::id(id).exp(), patch, Some(&mut pass.sink))?;
        debug!(record = %cell.record, %id, property = cell.property, state = %state.name, "initial state assigned");
        Ok(())
    }

    fn apply_transfer<A: StorageAdapter>(
        &self,
        pass: &mut Pass<'_, A>,
        cell: MachineCell<'_>,
        transfer: &StateTransfer,
        id: RecordId,
        row: &Record,
        event: &MutationEvent,
    ) -> Result<()> {
        let next = cell
            .machine
            .state(&transfer.next)
            .ok_or_else(|| Error::invalid_state(format!("{} has no state {}", cell.bound.target, transfer.next)))?;
        let value = match &next.compute_value {
            Some(callback) => {
                let last = row.get(cell.property).cloned().unwrap_or_default();
                let ctx = pass.context();
                match callback.get().and_then(|f| f(&last, event, &ctx)) {
                    Ok(value) => Some(value),
                    Err(error) => return self.isolate(&mut pass.report, cell.bound, Some(id), error),
                }
            }
            None => None,
        };

        let by_id = MatchAtom::id(id).exp();
        let written = if StateMachine::deletes_on(cell.property, &next.name) {
            !pass.storage.delete(cell.record, &by_id, Some(&mut pass.sink))?.is_empty()
        } else {
            let mut patch = Record::new().insert(bound_state_column(cell.property), next.name.as_str());
            if let Some(value) = value {
                patch.set(cell.property, value);
            }
            !pass.storage.update(cell.record, &by_id, patch, Some(&mut pass.sink))?.is_empty()
        };
        if !written {
            warn!(record = %cell.record, %id, "transfer target vanished before the write, skipped");
            return Ok(());
        }
        debug!(
            record = %cell.record,
            %id,
            property = cell.property,
            from = %transfer.current,
            to = %next.name,
            "transfer applied"
        );
        pass.report.transitions.push(Transition {
            record: cell.record.to_string(),
            id,
            property: cell.property.to_string(),
            from: transfer.current.clone(),
            to: next.name.clone(),
        });
        Ok(())
    }
}

fn resolve_target<A: StorageAdapter>(
    storage: &RecordStorage<A>,
    record: &str,
    target: &TargetRef,
) -> Result<Option<RecordId>> {
    match target {
        TargetRef::Id(id) => Ok(Some(*id)),
        TargetRef::Link { source, target } => {
            let exp = MatchAtom::eq("source", *source)
                .exp()
                .and(MatchAtom::eq("target", *target).exp());
            Ok(storage
                .find_one(record, Some(&exp), &AttributeQuery::default())?
                .and_then(|r| r.id()))
        }
    }
}

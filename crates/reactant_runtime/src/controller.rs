//! The controller: the transactional entry point for every mutation.
//!
//! Each public mutating call runs in one storage transaction: the caller's
//! change, every change the scheduler derives from it, and the commit. Any
//! error rolls the whole transaction back, so computed values are visible
//! together with the records they describe or not at all.

use std::collections::HashMap;

use reactant_engine::{
    CallbackContext, CallbackRegistry, Clock, ComputationSet, DispatchReport, EngineConfig, Scheduler, SystemClock,
};
use reactant_foundation::{Error, Record, Result};
use reactant_storage::{
    AttributeQuery, DICTIONARY_ENTITY, INTERACTION_ENTITY, MatchAtom, MatchExp, MemoryStore, MutationEvent,
    RecordStorage, StorageAdapter,
};
use tracing::{debug, error, info};

use crate::interaction::{ConditionFailure, Interaction, InteractionArgs};

// =============================================================================
// Configuration
// =============================================================================

/// Controller settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Scheduler limits and failure policy.
    pub engine: EngineConfig,
    /// Persist dispatched interactions in the `_Interaction_` table. They are
    /// emitted as events either way.
    pub record_interactions: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            record_interactions: true,
        }
    }
}

impl ControllerConfig {
    /// Sets the engine configuration.
    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Sets whether interactions are persisted.
    #[must_use]
    pub fn with_record_interactions(mut self, record: bool) -> Self {
        self.record_interactions = record;
        self
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Result of a dispatch that did not fail.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Conditions held and everything was committed.
    Committed(DispatchReport),
    /// A condition did not hold; nothing was written.
    Rejected(ConditionFailure),
}

impl DispatchOutcome {
    /// True if the dispatch was committed.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    /// The report of a committed dispatch.
    #[must_use]
    pub fn report(&self) -> Option<&DispatchReport> {
        match self {
            Self::Committed(report) => Some(report),
            Self::Rejected(_) => None,
        }
    }

    /// The failure of a rejected dispatch.
    #[must_use]
    pub fn rejection(&self) -> Option<&ConditionFailure> {
        match self {
            Self::Committed(_) => None,
            Self::Rejected(failure) => Some(failure),
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Owns storage, the scheduler, the declared interactions and the clock.
pub struct Controller<A: StorageAdapter = MemoryStore, C: Clock = SystemClock> {
    storage: RecordStorage<A>,
    scheduler: Scheduler,
    interactions: HashMap<String, Interaction>,
    clock: C,
    record_interactions: bool,
}

impl<A: StorageAdapter, C: Clock> Controller<A, C> {
    /// Creates a controller with the default configuration.
    #[must_use]
    pub fn new(storage: RecordStorage<A>, computations: ComputationSet, clock: C) -> Self {
        let config = ControllerConfig::default();
        Self {
            storage,
            scheduler: Scheduler::new(computations).with_config(config.engine),
            interactions: HashMap::new(),
            clock,
            record_interactions: config.record_interactions,
        }
    }

    /// Builder method to set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.scheduler = std::mem::take(&mut self.scheduler).with_config(config.engine);
        self.record_interactions = config.record_interactions;
        self
    }

    /// Declares an interaction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` if the name is already declared.
    pub fn with_interaction(mut self, interaction: Interaction) -> Result<Self> {
        if self.interactions.contains_key(&interaction.name) {
            return Err(Error::invalid_schema(format!(
                "interaction {} declared twice",
                interaction.name
            )));
        }
        self.interactions.insert(interaction.name.clone(), interaction);
        Ok(self)
    }

    /// Binds the callbacks of every declared interaction.
    ///
    /// Computations are bound before they are handed to the controller.
    ///
    /// # Errors
    ///
    /// Returns `UnboundCallback` for a key the registry does not know.
    pub fn bind_interactions(&mut self, registry: &CallbackRegistry) -> Result<()> {
        for interaction in self.interactions.values_mut() {
            interaction.bind(registry)?;
        }
        Ok(())
    }

    /// The record gateway, for reads.
    #[must_use]
    pub fn storage(&self) -> &RecordStorage<A> {
        &self.storage
    }

    /// The scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The clock.
    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Looks up a declared interaction.
    #[must_use]
    pub fn interaction(&self, name: &str) -> Option<&Interaction> {
        self.interactions.get(name)
    }

    /// Declared interactions, in no particular order.
    pub fn interactions(&self) -> impl Iterator<Item = &Interaction> {
        self.interactions.values()
    }

    /// Releases the storage gateway.
    #[must_use]
    pub fn into_storage(self) -> RecordStorage<A> {
        self.storage
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Writes dictionary defaults that are not yet stored, then computes every
    /// aggregate and real-time value from current storage.
    ///
    /// # Errors
    ///
    /// Storage and scheduler failures; nothing is committed.
    pub fn setup(&mut self) -> Result<DispatchReport> {
        self.transact("setup", |storage, scheduler, now| {
            let defaults: Vec<_> = storage
                .schema()
                .dictionaries()
                .filter_map(|d| d.default.clone().map(|v| (d.name.clone(), v)))
                .collect();
            let mut events = Vec::new();
            for (name, value) in defaults {
                let stored = storage.find_one(
                    DICTIONARY_ENTITY,
                    Some(&MatchAtom::eq("key", name.as_str()).exp()),
                    &AttributeQuery::default(),
                )?;
                if stored.is_none() {
                    storage.set_dictionary(&name, value, Some(&mut events))?;
                }
            }
            let mut report = scheduler.process(storage, now, events)?;
            report.absorb(scheduler.initialize(storage, now)?);
            Ok(report)
        })
    }

    /// Dispatches an interaction.
    ///
    /// # Errors
    ///
    /// `UnknownRecord` for an undeclared interaction, a condition callback
    /// error, or any storage or scheduler failure. On error nothing is
    /// committed.
    pub fn dispatch(&mut self, name: &str, args: InteractionArgs) -> Result<DispatchOutcome> {
        let interaction = self
            .interactions
            .get(name)
            .ok_or_else(|| Error::unknown_record(format!("interaction {name}")))?;
        let event_record = interaction.event_record(&args);

        let ctx = CallbackContext {
            storage: &self.storage,
            now: self.clock.now(),
        };
        if let Some(failure) = interaction.check(&event_record, &ctx)? {
            debug!(interaction = name, condition = %failure.condition, "dispatch rejected");
            return Ok(DispatchOutcome::Rejected(failure));
        }

        let record_interactions = self.record_interactions;
        let report = self.transact(name, |storage, scheduler, now| {
            let events = if record_interactions {
                let mut events = Vec::new();
                storage.create(INTERACTION_ENTITY, event_record, Some(&mut events))?;
                events.into_iter().map(|e| e.with_interaction(name)).collect()
            } else {
                vec![MutationEvent::create(INTERACTION_ENTITY, event_record).with_interaction(name)]
            };
            scheduler.process(storage, now, events)
        })?;
        Ok(DispatchOutcome::Committed(report))
    }

    /// Creates a record and processes what follows from it.
    ///
    /// # Errors
    ///
    /// Storage and scheduler failures; nothing is committed.
    pub fn create(&mut self, name: &str, payload: Record) -> Result<(Record, DispatchReport)> {
        self.transact("create", |storage, scheduler, now| {
            let mut events = Vec::new();
            let created = storage.create(name, payload, Some(&mut events))?;
            let report = scheduler.process(storage, now, events)?;
            Ok((created, report))
        })
    }

    /// Patches the matching records and processes what follows from it.
    ///
    /// # Errors
    ///
    /// Storage and scheduler failures; nothing is committed.
    pub fn update(&mut self, name: &str, match_exp: &MatchExp, patch: Record) -> Result<(Vec<Record>, DispatchReport)> {
        self.transact("update", |storage, scheduler, now| {
            let mut events = Vec::new();
            let updated = storage.update(name, match_exp, patch, Some(&mut events))?;
            let report = scheduler.process(storage, now, events)?;
            Ok((updated, report))
        })
    }

    /// Deletes the matching records and processes what follows from it.
    ///
    /// # Errors
    ///
    /// Storage and scheduler failures; nothing is committed.
    pub fn delete(&mut self, name: &str, match_exp: &MatchExp) -> Result<(Vec<Record>, DispatchReport)> {
        self.transact("delete", |storage, scheduler, now| {
            let mut events = Vec::new();
            let deleted = storage.delete(name, match_exp, Some(&mut events))?;
            let report = scheduler.process(storage, now, events)?;
            Ok((deleted, report))
        })
    }

    /// Recomputes real-time values that are due.
    ///
    /// # Errors
    ///
    /// Storage and scheduler failures; nothing is committed.
    pub fn refresh(&mut self) -> Result<DispatchReport> {
        self.transact("refresh", |storage, scheduler, now| scheduler.refresh_real_time(storage, now))
    }

    fn transact<T, F>(&mut self, operation: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut RecordStorage<A>, &Scheduler, i64) -> Result<T>,
        T: Reported,
    {
        let now = self.clock.now();
        self.storage.begin()?;
        match f(&mut self.storage, &self.scheduler, now) {
            Ok(out) => {
                self.storage.commit()?;
                let report = out.report();
                info!(
                    operation,
                    events = report.events.len(),
                    transitions = report.transitions.len(),
                    failures = report.failures.len(),
                    "committed"
                );
                Ok(out)
            }
            Err(err) => {
                error!(operation, error = %err, "rolled back");
                if let Err(rollback) = self.storage.rollback() {
                    error!(operation, error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

/// Values that carry the report of the work they caused.
trait Reported {
    fn report(&self) -> &DispatchReport;
}

impl Reported for DispatchReport {
    fn report(&self) -> &DispatchReport {
        self
    }
}

impl<T> Reported for (T, DispatchReport) {
    fn report(&self) -> &DispatchReport {
        &self.1
    }
}

//! Record creation from events.

use reactant_foundation::{Error, Record, Result};
use reactant_storage::{INTERACTION_ENTITY, MutationEvent, MutationKind, RecordStorage, StorageAdapter};
use tracing::{debug, trace};

use crate::computation::{Computation, Target, TransformOutput, TransformSource};
use crate::scheduler::{Pass, Scheduler, concerns};
use crate::state_machine::bound_state_column;

fn source_matches<A: StorageAdapter>(
    storage: &RecordStorage<A>,
    source: &TransformSource,
    event: &MutationEvent,
) -> Result<bool> {
    if event.kind != MutationKind::Create {
        return Ok(false);
    }
    match source {
        TransformSource::Record(name) => concerns(storage, name, event),
        TransformSource::Interaction(name) => Ok(event.record_name == INTERACTION_ENTITY
            && name
                .as_deref()
                .is_none_or(|n| event.interaction_name.as_deref() == Some(n))),
    }
}

impl Scheduler {
    pub(crate) fn run_transforms<A: StorageAdapter>(
        &self,
        pass: &mut Pass<'_, A>,
        event: &MutationEvent,
    ) -> Result<()> {
        for bound in self.computations.iter() {
            let (Computation::Transform(transform), Target::Entity { name } | Target::Relation { name }) =
                (&bound.computation, &bound.target)
            else {
                continue;
            };
            if !source_matches(pass.storage, &transform.source, event)? {
                continue;
            }
            let produced = {
                let ctx = pass.context();
                transform.callback.get().and_then(|f| f(event, &ctx))
            };
            let output = match produced {
                Ok(Some(output)) => output,
                Ok(None) => {
                    trace!(record = %name, "transform produced nothing");
                    continue;
                }
                Err(error) => {
                    self.isolate(&mut pass.report, bound, event.id(), error)?;
                    continue;
                }
            };
            let payload = self.creation_payload(name, output)?;
            let created = pass.storage.create(name, payload, Some(&mut pass.sink))?;
            debug!(record = %name, id = ?created.id(), source = %event.record_name, "transform created record");
        }
        Ok(())
    }

    /// Folds initial-state overrides into the create payload as bound-state
    /// columns, which initial state assignment then respects.
    fn creation_payload(&self, name: &str, output: TransformOutput) -> Result<Record> {
        let mut payload = output.record;
        for initial in output.initial_states {
            let machine = self
                .computations
                .state_machine(name, &initial.property)
                .ok_or_else(|| {
                    Error::invalid_state(format!("{name}.{} is not driven by a state machine", initial.property))
                })?;
            if machine.state(&initial.state).is_none() {
                return Err(Error::invalid_state(format!(
                    "{name}.{} has no state {}",
                    initial.property, initial.state
                )));
            }
            payload.set(bound_state_column(&initial.property), initial.state);
            if let Some(value) = initial.value {
                payload.set(initial.property, value);
            }
        }
        Ok(payload)
    }
}

//! State machine descriptors.
//!
//! A machine is bound to one property. For every owning record the engine
//! persists the name of the state in effect (the bound state) in a hidden
//! column next to the value itself; see [`bound_state_column`].

use reactant_foundation::{Error, RecordId, Result};
use reactant_storage::{HARD_DELETION_PROPERTY, INTERACTION_ENTITY, MatchAtom, MatchExp, MutationEvent, MutationKind};
use serde::{Deserialize, Serialize};

use crate::callback::{Callback, CallbackRegistry, ComputeTargetFn, ComputeValueFn};

/// Live state of a hard-deletion machine.
pub const NON_DELETED: &str = "NON_DELETED";

/// Terminal state of a hard-deletion machine; entering it deletes the row.
pub const DELETED: &str = "DELETED";

/// Hidden column holding the bound state of `property`.
#[must_use]
pub fn bound_state_column(property: &str) -> String {
    format!("__{property}_bound_state")
}

/// A record a transfer applies to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetRef {
    /// A record by id.
    Id(RecordId),
    /// The relation record linking `source` to `target`.
    Link {
        /// Source end id.
        source: RecordId,
        /// Target end id.
        target: RecordId,
    },
}

impl From<RecordId> for TargetRef {
    fn from(id: RecordId) -> Self {
        Self::Id(id)
    }
}

/// Event pattern activating a transfer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Entity or relation the event must concern.
    pub record: String,
    /// Kind of mutation.
    pub kind: MutationKind,
    /// Originating interaction, if the trigger is restricted to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction: Option<String>,
    /// Extra predicate over the event record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<MatchExp>,
}

impl Trigger {
    /// Matches mutations of `kind` on `record`.
    #[must_use]
    pub fn on(record: impl Into<String>, kind: MutationKind) -> Self {
        Self {
            record: record.into(),
            kind,
            interaction: None,
            pattern: None,
        }
    }

    /// Matches dispatches of the named interaction.
    #[must_use]
    pub fn interaction(name: impl Into<String>) -> Self {
        Self::on(INTERACTION_ENTITY, MutationKind::Create).with_interaction(name)
    }

    /// Restricts the trigger to events originating from `name`.
    #[must_use]
    pub fn with_interaction(mut self, name: impl Into<String>) -> Self {
        self.interaction = Some(name.into());
        self
    }

    /// Adds a predicate over the event record.
    #[must_use]
    pub fn with_pattern(mut self, pattern: MatchExp) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Checks kind, interaction and pattern. Whether the event concerns
    /// [`Trigger::record`] is decided by the scheduler, which knows the
    /// schema.
    #[must_use]
    pub fn matches_event(&self, event: &MutationEvent) -> bool {
        if event.kind != self.kind {
            return false;
        }
        if let Some(name) = &self.interaction {
            if event.interaction_name.as_deref() != Some(name.as_str()) {
                return false;
            }
        }
        self.pattern.as_ref().is_none_or(|pattern| {
            pattern
                .evaluate(|atom: &MatchAtom| Ok::<_, std::convert::Infallible>(atom.matches(&event.record)))
                .is_ok()
        })
    }
}

/// A named state with an optional value function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateNode {
    /// Unique state name.
    pub name: String,
    /// Value on entering the state; without it the value is unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_value: Option<Callback<ComputeValueFn>>,
}

impl StateNode {
    /// A state that keeps the current value.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compute_value: None,
        }
    }

    /// Sets the value function.
    #[must_use]
    pub fn with_compute_value(mut self, callback: Callback<ComputeValueFn>) -> Self {
        self.compute_value = Some(callback);
        self
    }
}

/// An edge of the machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransfer {
    /// Activating event pattern.
    pub trigger: Trigger,
    /// State the target must be in.
    pub current: String,
    /// State entered.
    pub next: String,
    /// Target resolution; defaults to the event record itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_target: Option<Callback<ComputeTargetFn>>,
}

impl StateTransfer {
    /// Creates a transfer.
    #[must_use]
    pub fn new(trigger: Trigger, current: impl Into<String>, next: impl Into<String>) -> Self {
        Self {
            trigger,
            current: current.into(),
            next: next.into(),
            compute_target: None,
        }
    }

    /// Sets the target resolution callback.
    #[must_use]
    pub fn with_compute_target(mut self, callback: Callback<ComputeTargetFn>) -> Self {
        self.compute_target = Some(callback);
        self
    }
}

/// A finite automaton driving one property.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMachine {
    /// States, unique by name.
    pub states: Vec<StateNode>,
    /// Transfers in declaration order.
    pub transfers: Vec<StateTransfer>,
    /// Name of the state assigned on creation.
    pub initial: String,
}

impl StateMachine {
    /// A machine whose only state is `initial`.
    #[must_use]
    pub fn new(initial: StateNode) -> Self {
        Self {
            initial: initial.name.clone(),
            states: vec![initial],
            transfers: Vec::new(),
        }
    }

    /// Adds a state.
    #[must_use]
    pub fn with_state(mut self, state: StateNode) -> Self {
        self.states.push(state);
        self
    }

    /// Adds a transfer.
    #[must_use]
    pub fn with_transfer(mut self, transfer: StateTransfer) -> Self {
        self.transfers.push(transfer);
        self
    }

    /// The `{NON_DELETED, DELETED}` machine of a hard-deletion property.
    /// Entering `DELETED` physically deletes the record.
    #[must_use]
    pub fn hard_deletion(trigger: Trigger, compute_target: Option<Callback<ComputeTargetFn>>) -> Self {
        let mut transfer = StateTransfer::new(trigger, NON_DELETED, DELETED);
        transfer.compute_target = compute_target;
        Self::new(StateNode::new(NON_DELETED))
            .with_state(StateNode::new(DELETED))
            .with_transfer(transfer)
    }

    /// Looks up a state.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<&StateNode> {
        self.states.iter().find(|s| s.name == name)
    }

    /// The initial state.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the initial state is not declared.
    pub fn initial_state(&self) -> Result<&StateNode> {
        self.state(&self.initial)
            .ok_or_else(|| Error::invalid_state(format!("initial state {} is not declared", self.initial)))
    }

    /// True if this machine drives a hard-deletion property.
    #[must_use]
    pub fn deletes_on(property: &str, next: &str) -> bool {
        property == HARD_DELETION_PROPERTY && next == DELETED
    }

    /// Checks that state names are unique and every transfer connects
    /// declared states.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        for (i, state) in self.states.iter().enumerate() {
            if self.states[..i].iter().any(|s| s.name == state.name) {
                return Err(Error::invalid_state(format!("duplicate state {}", state.name)));
            }
        }
        self.initial_state()?;
        for transfer in &self.transfers {
            for name in [&transfer.current, &transfer.next] {
                if self.state(name).is_none() {
                    return Err(Error::invalid_state(format!(
                        "transfer {} -> {} names undeclared state {name}",
                        transfer.current, transfer.next
                    )));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn bind(&mut self, registry: &CallbackRegistry) -> Result<()> {
        for state in &mut self.states {
            registry.bind_opt(state.compute_value.as_mut())?;
        }
        for transfer in &mut self.transfers {
            registry.bind_opt(transfer.compute_target.as_mut())?;
        }
        Ok(())
    }
}

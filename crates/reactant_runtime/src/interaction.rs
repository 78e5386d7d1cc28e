//! Named interactions and their guard conditions.
//!
//! An interaction is the entry point for user intent. Dispatching one builds
//! an `_Interaction_` event record `{interactionName, user, payload}`, checks
//! the interaction's conditions against it and, if they hold, hands the event
//! to the scheduler.

use std::fmt;

use reactant_engine::{Callback, CallbackContext, CallbackRegistry, ConditionFn};
use reactant_foundation::{BoolExp, Error, EvaluationError, Record, Result, Value, record};
use serde::{Deserialize, Serialize};

/// A named guard evaluated against the interaction event record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Name reported when the condition fails.
    pub name: String,
    /// The check.
    pub callback: Callback<ConditionFn>,
}

impl Condition {
    /// Creates a condition.
    #[must_use]
    pub fn new(name: impl Into<String>, callback: Callback<ConditionFn>) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }

    /// Wraps the condition as a one-atom expression.
    #[must_use]
    pub fn exp(self) -> BoolExp<Self> {
        BoolExp::atom(self)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Arguments of one dispatch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InteractionArgs {
    /// Acting user, if any.
    pub user: Value,
    /// Interaction payload.
    pub payload: Record,
}

impl InteractionArgs {
    /// Empty arguments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the acting user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<Value>) -> Self {
        self.user = user.into();
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Record) -> Self {
        self.payload = payload;
        self
    }

    /// Sets one payload attribute.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.set(key.into(), value.into());
        self
    }
}

/// A named interaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    /// Unique name, carried by every event the dispatch causes.
    pub name: String,
    /// Guard; `None` always passes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<BoolExp<Condition>>,
}

impl Interaction {
    /// Creates an unguarded interaction.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            conditions: None,
        }
    }

    /// Sets the guard.
    #[must_use]
    pub fn with_conditions(mut self, conditions: BoolExp<Condition>) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Builds the event record of a dispatch.
    #[must_use]
    pub fn event_record(&self, args: &InteractionArgs) -> Record {
        record([
            ("interactionName", Value::from(self.name.as_str())),
            ("user", args.user.clone()),
            ("payload", Value::Map(args.payload.clone())),
        ])
    }

    /// Evaluates the guard against an event record.
    ///
    /// A condition returning `false` is a rejection, not an error.
    ///
    /// # Errors
    ///
    /// Returns the callback's error when a condition fails to evaluate.
    pub fn check(&self, event: &Record, ctx: &CallbackContext<'_>) -> Result<Option<ConditionFailure>> {
        let Some(conditions) = &self.conditions else {
            return Ok(None);
        };
        match conditions.evaluate(|condition: &Condition| condition.callback.get().and_then(|f| f(event, ctx))) {
            Ok(()) => Ok(None),
            Err(failure) => ConditionFailure::from_evaluation(&self.name, failure).map(Some),
        }
    }

    /// Binds every condition callback.
    ///
    /// # Errors
    ///
    /// Returns `UnboundCallback` for a key the registry does not know.
    pub fn bind(&mut self, registry: &CallbackRegistry) -> Result<()> {
        let Some(conditions) = &self.conditions else {
            return Ok(());
        };
        let bound = conditions.try_map(|condition| {
            let mut condition = condition.clone();
            registry.bind(&mut condition.callback)?;
            Ok::<_, Error>(BoolExp::atom(condition))
        });
        self.conditions = Some(bound.map_err(|e| e.in_frame(format!("interaction {}", self.name)))?);
        Ok(())
    }
}

/// Why a dispatch was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConditionFailure {
    /// Rejected interaction.
    pub interaction: String,
    /// Condition that decided the rejection.
    pub condition: String,
    /// Whether the condition was required to be false.
    pub inverse: bool,
    /// Rendered ancestor expressions of the failing condition, root first.
    pub stack: Vec<String>,
}

impl ConditionFailure {
    fn from_evaluation(interaction: &str, failure: EvaluationError<Condition, Error>) -> Result<Self> {
        if let Some(error) = failure.error {
            return Err(error.in_frame(format!("condition {} of {interaction}", failure.data.name)));
        }
        Ok(Self {
            interaction: interaction.to_string(),
            condition: failure.data.name,
            inverse: failure.inverse,
            stack: failure.stack.iter().map(render).collect(),
        })
    }
}

impl fmt::Display for ConditionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inverse {
            write!(f, "{} rejected: not {} held", self.interaction, self.condition)
        } else {
            write!(f, "{} rejected: {} failed", self.interaction, self.condition)
        }
    }
}

fn render(exp: &BoolExp<Condition>) -> String {
    match (exp.data(), exp.operator(), exp.left(), exp.right()) {
        (Some(condition), ..) => condition.name.clone(),
        (None, Some(op), Some(left), None) => format!("{op} {}", render(left)),
        (None, Some(op), Some(left), Some(right)) => format!("({} {op} {})", render(left), render(right)),
        _ => String::new(),
    }
}

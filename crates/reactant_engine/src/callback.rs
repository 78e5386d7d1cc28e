//! Callback keys and the registry that binds them to compiled functions.
//!
//! Descriptors never persist executable code. A callback field holds a
//! stable string key and, once bound against a [`CallbackRegistry`], the
//! function registered under that key. Serialized, a callback is the tagged
//! string `"fn::<key>"`; deserialized, it comes back unbound until rebound.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use reactant_foundation::{Error, Record, Result, Value};
use reactant_storage::{MutationEvent, RecordReader};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::computation::TransformOutput;
use crate::state_machine::TargetRef;

/// Tag prefix of a serialized callback.
pub const CALLBACK_TAG: &str = "fn::";

/// Read-only view handed to every callback.
#[derive(Clone, Copy)]
pub struct CallbackContext<'a> {
    /// Committed-so-far storage of the running dispatch.
    pub storage: &'a dyn RecordReader,
    /// Current time in milliseconds.
    pub now: i64,
}

impl fmt::Debug for CallbackContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackContext").field("now", &self.now).finish_non_exhaustive()
    }
}

// =============================================================================
// Callback signatures
// =============================================================================

/// Per-record predicate of `Count`, `Every` and `Any`.
pub type MatchFn = dyn Fn(&Record, &CallbackContext<'_>) -> Result<bool> + Send + Sync;

/// Per-record `(weight, value)` of `WeightedSummation`.
pub type WeightFn = dyn Fn(&Record, &CallbackContext<'_>) -> Result<(f64, f64)> + Send + Sync;

/// Maps a source event to at most one record to create.
pub type TransformFn = dyn Fn(&MutationEvent, &CallbackContext<'_>) -> Result<Option<TransformOutput>> + Send + Sync;

/// Resolves the records a state transfer applies to.
pub type ComputeTargetFn = dyn Fn(&MutationEvent, &CallbackContext<'_>) -> Result<Vec<TargetRef>> + Send + Sync;

/// Computes a state's value from the previous value and the event.
pub type ComputeValueFn = dyn Fn(&Value, &MutationEvent, &CallbackContext<'_>) -> Result<Value> + Send + Sync;

/// Computes a time-dependent value; the record is `None` for dictionaries.
pub type RealTimeFn = dyn Fn(i64, Option<&Record>, &CallbackContext<'_>) -> Result<Value> + Send + Sync;

/// Returns when a time-dependent value must next be recomputed.
pub type NextRecomputeFn = dyn Fn(i64, &Value, &CallbackContext<'_>) -> Result<Option<i64>> + Send + Sync;

/// Interaction guard evaluated against the interaction arguments.
pub type ConditionFn = dyn Fn(&Record, &CallbackContext<'_>) -> Result<bool> + Send + Sync;

// =============================================================================
// Callback
// =============================================================================

/// A keyed callback slot.
pub struct Callback<F: ?Sized> {
    key: String,
    func: Option<Arc<F>>,
}

impl<F: ?Sized> Callback<F> {
    /// A callback known only by key.
    #[must_use]
    pub fn unbound(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            func: None,
        }
    }

    /// A callback bound to `func`.
    #[must_use]
    pub fn bound(key: impl Into<String>, func: Arc<F>) -> Self {
        Self {
            key: key.into(),
            func: Some(func),
        }
    }

    /// Lookup key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True once a function is attached.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.func.is_some()
    }

    /// The bound function.
    ///
    /// # Errors
    ///
    /// Returns `UnboundCallback` if no function is attached.
    pub fn get(&self) -> Result<&F> {
        self.func
            .as_deref()
            .ok_or_else(|| Error::unbound_callback(&self.key))
    }
}

impl<F: ?Sized> Clone for Callback<F> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            func: self.func.clone(),
        }
    }
}

impl<F: ?Sized> fmt::Debug for Callback<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("key", &self.key)
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl<F: ?Sized> PartialEq for Callback<F> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<F: ?Sized> Serialize for Callback<F> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{CALLBACK_TAG}{}", self.key))
    }
}

struct CallbackVisitor<F: ?Sized>(PhantomData<fn() -> Box<F>>);

impl<F: ?Sized> Visitor<'_> for CallbackVisitor<F> {
    type Value = Callback<F>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a string of the form \"{CALLBACK_TAG}<key>\"")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
        match v.strip_prefix(CALLBACK_TAG) {
            Some(key) if !key.is_empty() => Ok(Callback::unbound(key)),
            _ => Err(E::invalid_value(de::Unexpected::Str(v), &self)),
        }
    }
}

impl<'de, F: ?Sized> Deserialize<'de> for Callback<F> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_str(CallbackVisitor(PhantomData))
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Maps `(signature, key)` to a compiled function.
///
/// The same key may be registered once per signature. Registries are plain
/// values, built per application or per test.
#[derive(Default)]
pub struct CallbackRegistry {
    entries: HashMap<(TypeId, String), Box<dyn Any + Send + Sync>>,
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.entries.keys().map(|(_, k)| k.as_str()).collect();
        keys.sort_unstable();
        f.debug_struct("CallbackRegistry").field("keys", &keys).finish()
    }
}

impl CallbackRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers `func` under `key` and returns a bound callback.
    pub fn insert<F>(&mut self, key: &str, func: Arc<F>) -> Callback<F>
    where
        F: ?Sized + Send + Sync + 'static,
    {
        self.entries
            .insert((TypeId::of::<F>(), key.to_string()), Box::new(Arc::clone(&func)));
        Callback::bound(key, func)
    }

    /// The function registered under `key` for signature `F`.
    #[must_use]
    pub fn lookup<F>(&self, key: &str) -> Option<Arc<F>>
    where
        F: ?Sized + Send + Sync + 'static,
    {
        self.entries
            .get(&(TypeId::of::<F>(), key.to_string()))?
            .downcast_ref::<Arc<F>>()
            .cloned()
    }

    /// Attaches the registered function to `callback`.
    ///
    /// # Errors
    ///
    /// Returns `UnboundCallback` if the key is not registered for `F`.
    pub fn bind<F>(&self, callback: &mut Callback<F>) -> Result<()>
    where
        F: ?Sized + Send + Sync + 'static,
    {
        let func = self
            .lookup::<F>(&callback.key)
            .ok_or_else(|| Error::unbound_callback(&callback.key))?;
        callback.func = Some(func);
        Ok(())
    }

    /// Binds an optional callback.
    ///
    /// # Errors
    ///
    /// See [`CallbackRegistry::bind`].
    pub fn bind_opt<F>(&self, callback: Option<&mut Callback<F>>) -> Result<()>
    where
        F: ?Sized + Send + Sync + 'static,
    {
        callback.map_or(Ok(()), |cb| self.bind(cb))
    }

    /// Registers a [`MatchFn`].
    pub fn register_match<G>(&mut self, key: &str, func: G) -> Callback<MatchFn>
    where
        G: Fn(&Record, &CallbackContext<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        let func: Arc<MatchFn> = Arc::new(func);
        self.insert(key, func)
    }

    /// Registers a [`WeightFn`].
    pub fn register_weight<G>(&mut self, key: &str, func: G) -> Callback<WeightFn>
    where
        G: Fn(&Record, &CallbackContext<'_>) -> Result<(f64, f64)> + Send + Sync + 'static,
    {
        let func: Arc<WeightFn> = Arc::new(func);
        self.insert(key, func)
    }

    /// Registers a [`TransformFn`].
    pub fn register_transform<G>(&mut self, key: &str, func: G) -> Callback<TransformFn>
    where
        G: Fn(&MutationEvent, &CallbackContext<'_>) -> Result<Option<TransformOutput>> + Send + Sync + 'static,
    {
        let func: Arc<TransformFn> = Arc::new(func);
        self.insert(key, func)
    }

    /// Registers a [`ComputeTargetFn`].
    pub fn register_compute_target<G>(&mut self, key: &str, func: G) -> Callback<ComputeTargetFn>
    where
        G: Fn(&MutationEvent, &CallbackContext<'_>) -> Result<Vec<TargetRef>> + Send + Sync + 'static,
    {
        let func: Arc<ComputeTargetFn> = Arc::new(func);
        self.insert(key, func)
    }

    /// Registers a [`ComputeValueFn`].
    pub fn register_compute_value<G>(&mut self, key: &str, func: G) -> Callback<ComputeValueFn>
    where
        G: Fn(&Value, &MutationEvent, &CallbackContext<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        let func: Arc<ComputeValueFn> = Arc::new(func);
        self.insert(key, func)
    }

    /// Registers a [`RealTimeFn`].
    pub fn register_real_time<G>(&mut self, key: &str, func: G) -> Callback<RealTimeFn>
    where
        G: Fn(i64, Option<&Record>, &CallbackContext<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        let func: Arc<RealTimeFn> = Arc::new(func);
        self.insert(key, func)
    }

    /// Registers a [`NextRecomputeFn`].
    pub fn register_next_recompute<G>(&mut self, key: &str, func: G) -> Callback<NextRecomputeFn>
    where
        G: Fn(i64, &Value, &CallbackContext<'_>) -> Result<Option<i64>> + Send + Sync + 'static,
    {
        let func: Arc<NextRecomputeFn> = Arc::new(func);
        self.insert(key, func)
    }

    /// Registers a [`ConditionFn`].
    pub fn register_condition<G>(&mut self, key: &str, func: G) -> Callback<ConditionFn>
    where
        G: Fn(&Record, &CallbackContext<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        let func: Arc<ConditionFn> = Arc::new(func);
        self.insert(key, func)
    }
}

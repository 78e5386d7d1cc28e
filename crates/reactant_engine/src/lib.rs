//! Computation descriptors, callbacks and the reactive scheduler for Reactant.
//!
//! This crate provides:
//! - [`Computation`] - Count, Summation, Average, WeightedSummation, Every,
//!   Any, Transform, RealTime and StateMachine descriptors
//! - [`ComputationSet`] - Descriptors bound to schema targets
//! - [`CallbackRegistry`] - Stable keys mapped to compiled callbacks
//! - [`Scheduler`] - Event-driven recomputation with exactly one state
//!   transfer per target and machine per event
//! - [`EngineConfig`] - Cascade limits and failure policy

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod aggregate;
pub mod callback;
pub mod computation;
pub mod config;
pub mod realtime;
pub mod scheduler;
pub mod state_machine;
mod transform;

pub use callback::{
    CALLBACK_TAG, Callback, CallbackContext, CallbackRegistry, ComputeTargetFn, ComputeValueFn, ConditionFn, MatchFn,
    NextRecomputeFn, RealTimeFn, TransformFn, WeightFn,
};
pub use computation::{
    Aggregate, AggregateKind, BoundComputation, Computation, ComputationSet, DataDep, Direction, InitialState,
    RealTime, Target, Transform, TransformOutput, TransformSource,
};
pub use config::{Clock, EngineConfig, ManualClock, SystemClock};
pub use realtime::{DICTIONARY_NEXT_RECOMPUTE, next_recompute_column};
pub use scheduler::{CellFailure, DispatchReport, Scheduler, Transition};
pub use state_machine::{
    DELETED, NON_DELETED, StateMachine, StateNode, StateTransfer, TargetRef, Trigger, bound_state_column,
};

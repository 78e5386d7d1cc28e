//! Interaction dispatch, transactions and serialization for Reactant.
//!
//! This crate provides:
//! - [`Controller`] - Transactional entry point running every mutation
//!   through the scheduler
//! - [`Interaction`] - Named user intents guarded by [`Condition`] expressions
//! - [`serialize`] - JSON descriptor documents and `MessagePack` store snapshots

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod controller;
pub mod interaction;
pub mod serialize;

pub use controller::{Controller, ControllerConfig, DispatchOutcome};
pub use interaction::{Condition, ConditionFailure, Interaction, InteractionArgs};

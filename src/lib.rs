//! Reactant - Reactive data-computation engine
//!
//! This crate re-exports all layers of the Reactant system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 3: reactant_runtime    - Controller, interactions, serialization
//! Layer 2: reactant_engine     - Computation descriptors, callbacks, scheduler
//! Layer 1: reactant_storage    - Schema, query planning, record gateway, events
//! Layer 0: reactant_foundation - Core types (Value, RecordId, Error, BoolExp)
//! ```

pub use reactant_engine as engine;
pub use reactant_foundation as foundation;
pub use reactant_runtime as runtime;
pub use reactant_storage as storage;

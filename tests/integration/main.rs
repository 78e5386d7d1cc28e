//! Cross-layer integration tests for Reactant
//!
//! Tests that drive applications end to end through the controller.

mod persistence;
mod social;

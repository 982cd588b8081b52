//! Domain layer - Store contract and child object model
//!
//! This module defines the port the reconciliation engine drives, following
//! hexagonal architecture principles: adapters live in [`crate::store`].

pub mod ports;

pub use ports::*;

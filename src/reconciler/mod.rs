//! Reconciliation
//!
//! - [`engine`]: the create/update/delete convergence pass
//! - [`ownership`]: controller owner references on children
//! - [`merge`]: folding desired objects into observed ones

pub mod engine;
pub mod merge;
pub mod ownership;

pub use engine::{KindReport, KindSummary, PassReport, Reconciler};

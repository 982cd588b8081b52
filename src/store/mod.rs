//! Resource store implementations
//!
//! - [`KubeStore`]: the Kubernetes API server
//! - [`MemoryStore`]: an in-process store used by tests and benchmarks

pub mod kubernetes;
pub mod memory;

pub use kubernetes::KubeStore;
pub use memory::{Fault, MemoryStore};

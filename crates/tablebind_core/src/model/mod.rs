//! Mapping model: static descriptors and live resource instances.
//!
//! # Responsibility
//! - Describe entity kinds declaratively, without reflection.
//! - Track per-instance values, dirty columns, and persisted state.
//!
//! # Invariants
//! - Descriptors are shared read-only through `Arc`.
//! - Instances are created and mutated only through a repository.

pub mod descriptor;
pub mod resource;

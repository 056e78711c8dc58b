//! Repository layer over the adapter.
//!
//! # Responsibility
//! - Register resource descriptors and keep them consistent.
//! - Expose CRUD, query and migration operations in blocking and
//!   queued forms.
//!
//! # Invariants
//! - Writes validate the instance before any statement is queued.
//! - Store failures surface as semantic errors (`NotFound`,
//!   `ConstraintViolation`) with the failing operation as context.

pub mod repository;
pub mod result_set;

pub use repository::Repository;
pub use result_set::{ResultIter, ResultSet};

//! API resource aggregate model.
//!
//! # Responsibility
//! - Define the persisted aggregate (resource root plus child collections).
//! - Define the desired-state payload accepted by reconciliation.
//!
//! # Invariants
//! - Id `0` means "not yet persisted"; stored ids are assigned by SQLite.
//! - Child rows belong to exactly one resource (or one scope for scope claims).

pub mod resource;
pub mod validation;

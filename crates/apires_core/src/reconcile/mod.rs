//! Resource reconciliation engine.
//!
//! # Responsibility
//! - Diff desired child collections against stored ones.
//! - Merge desired fields onto stored rows.
//! - Allocate ids for inserted rows.
//! - Apply the whole plan atomically.
//!
//! # Invariants
//! - Nothing in this module checks ownership; callers gate first.

pub mod diff;
pub mod error;
pub mod identity;
pub mod merge;
pub mod orchestrator;

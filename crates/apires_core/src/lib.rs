//! Core domain logic for API resource management.
//! This crate is the single source of truth for resource invariants and
//! the reconciliation engine that enforces them.

pub mod config;
pub mod db;
pub mod gate;
pub mod logging;
pub mod model;
pub mod reconcile;
pub mod repo;
pub mod service;

pub use config::{ConfigError, CoreConfig};
pub use gate::{GateError, OwnershipGate, PrincipalId, SqliteOwnershipGate, StaticOwnershipGate};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use model::resource::{
    ApiResource, DesiredResource, ResourceClaim, ResourceId, ResourceScope, ResourceSecret, RowId,
    ScopeClaim,
};
pub use model::validation::{FieldIssue, IdPolicy, ResourceValidationError};
pub use reconcile::error::{
    ChildCollection, ErrorKind, ReconcileError, ReconcileResult, StorageFault,
};
pub use reconcile::orchestrator::{CollectionReport, ReconcileReport, Reconciler};
pub use repo::resource_repo::{
    RepoError, RepoResult, ResourceListQuery, ResourceOrder, ResourcePage, ResourceRepository,
    SqliteResourceRepository,
};
pub use service::resource_service::ResourceService;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

//! Ownership gate.
//!
//! # Responsibility
//! - Answer "does resource X belong to principal P" before any resource
//!   operation runs.
//!
//! # Invariants
//! - The acting principal is always an explicit parameter; nothing here reads
//!   ambient caller state.
//! - A `false` answer is reported to callers as not-found so that foreign
//!   resources are indistinguishable from missing ones.

use crate::model::resource::ResourceId;
use rusqlite::Connection;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Identity of the caller acting on resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrincipalId(String);

impl PrincipalId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PrincipalId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Gate lookup failed; the answer is unknown.
#[derive(Debug)]
pub struct GateError(Box<dyn Error + Send + Sync>);

impl GateError {
    pub fn new(cause: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self(cause.into())
    }
}

impl Display for GateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ownership lookup failed: {}", self.0)
    }
}

impl Error for GateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.0.as_ref())
    }
}

pub trait OwnershipGate {
    fn is_owned_by(
        &self,
        resource_id: ResourceId,
        principal: &PrincipalId,
    ) -> Result<bool, GateError>;
}

/// Gate backed by the `resource_owners` table.
pub struct SqliteOwnershipGate<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteOwnershipGate<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl OwnershipGate for SqliteOwnershipGate<'_> {
    fn is_owned_by(
        &self,
        resource_id: ResourceId,
        principal: &PrincipalId,
    ) -> Result<bool, GateError> {
        let exists: i64 = self
            .conn
            .query_row(
                "SELECT EXISTS(
                    SELECT 1
                    FROM resource_owners
                    WHERE resource_id = ?1
                      AND principal_id = ?2
                );",
                rusqlite::params![resource_id, principal.as_str()],
                |row| row.get(0),
            )
            .map_err(GateError::new)?;
        Ok(exists == 1)
    }
}

/// Fixed in-memory ownership set, for callers that resolve ownership
/// outside this store.
#[derive(Debug, Clone, Default)]
pub struct StaticOwnershipGate {
    grants: HashSet<(ResourceId, PrincipalId)>,
}

impl StaticOwnershipGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, resource_id: ResourceId, principal: PrincipalId) -> Self {
        self.grants.insert((resource_id, principal));
        self
    }
}

impl OwnershipGate for StaticOwnershipGate {
    fn is_owned_by(
        &self,
        resource_id: ResourceId,
        principal: &PrincipalId,
    ) -> Result<bool, GateError> {
        Ok(self.grants.contains(&(resource_id, principal.clone())))
    }
}

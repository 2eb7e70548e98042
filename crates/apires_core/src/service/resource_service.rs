//! API resource use-case service.
//!
//! # Responsibility
//! - Provide the entry points callers use to manage resources on behalf of
//!   a principal.
//! - Validate reconcile input, then consult the ownership gate, then delegate
//!   to the repository. Create is validated by the repository write itself.
//!
//! # Invariants
//! - Validation failures never open a transaction.
//! - Resources the principal does not own are reported as not found.

use crate::gate::{OwnershipGate, PrincipalId};
use crate::model::resource::{ApiResource, DesiredResource, ResourceId};
use crate::model::validation::IdPolicy;
use crate::reconcile::error::{ReconcileError, ReconcileResult};
use crate::reconcile::orchestrator::ReconcileReport;
use crate::repo::resource_repo::{ResourceListQuery, ResourcePage, ResourceRepository};
use log::{info, warn};

/// Use-case service wrapper for resource operations.
pub struct ResourceService<R: ResourceRepository, G: OwnershipGate> {
    repo: R,
    gate: G,
}

impl<R: ResourceRepository, G: OwnershipGate> ResourceService<R, G> {
    pub fn new(repo: R, gate: G) -> Self {
        Self { repo, gate }
    }

    /// Creates a resource owned by `principal`. Desired children must not
    /// carry ids; the repository rejects them before opening its transaction.
    pub fn create(
        &self,
        principal: &PrincipalId,
        desired: &DesiredResource,
    ) -> ReconcileResult<ResourceId> {
        Ok(self.repo.create_resource(principal, desired)?)
    }

    /// Loads one owned resource with every child collection.
    pub fn get(&self, principal: &PrincipalId, id: ResourceId) -> ReconcileResult<ApiResource> {
        self.authorize("get", principal, id)?;
        self.repo
            .get_resource(id)?
            .ok_or(ReconcileError::NotFound(id))
    }

    pub fn delete(&self, principal: &PrincipalId, id: ResourceId) -> ReconcileResult<()> {
        self.authorize("delete", principal, id)?;
        Ok(self.repo.delete_resource(id)?)
    }

    /// Lists resources owned by `principal`.
    pub fn list(
        &self,
        principal: &PrincipalId,
        query: &ResourceListQuery,
    ) -> ReconcileResult<ResourcePage> {
        Ok(self.repo.list_resources(principal, query)?)
    }

    /// Converges resource `id` to `desired` and returns its id.
    pub fn reconcile(
        &self,
        principal: &PrincipalId,
        id: ResourceId,
        desired: &DesiredResource,
    ) -> ReconcileResult<ResourceId> {
        self.reconcile_with_report(principal, id, desired)
            .map(|report| report.resource_id)
    }

    /// Same as [`Self::reconcile`], returning per-collection row counts.
    pub fn reconcile_with_report(
        &self,
        principal: &PrincipalId,
        id: ResourceId,
        desired: &DesiredResource,
    ) -> ReconcileResult<ReconcileReport> {
        self.validate_reconcile(desired)?;
        self.authorize("reconcile", principal, id)?;
        self.repo.reconcile_resource(id, desired)
    }

    fn validate_reconcile(&self, desired: &DesiredResource) -> ReconcileResult<()> {
        desired.validate(IdPolicy::AllowExisting).map_err(|err| {
            warn!(
                "event=reconcile module=service status=rejected error_code=validation_failed issues={}",
                err.issues.len()
            );
            ReconcileError::from(err)
        })
    }

    fn authorize(
        &self,
        operation: &'static str,
        principal: &PrincipalId,
        id: ResourceId,
    ) -> ReconcileResult<()> {
        if self.gate.is_owned_by(id, principal)? {
            return Ok(());
        }
        info!(
            "event={operation} module=service status=denied resource_id={id} error_code=not_found"
        );
        Err(ReconcileError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::ResourceService;
    use crate::db::open_db_in_memory;
    use crate::gate::{PrincipalId, StaticOwnershipGate};
    use crate::model::resource::{DesiredResource, ResourceClaim};
    use crate::reconcile::error::ErrorKind;
    use crate::repo::resource_repo::{ResourceRepository, SqliteResourceRepository};

    #[test]
    fn validation_runs_before_the_gate() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteResourceRepository::try_new(&conn).unwrap();
        let service = ResourceService::new(repo, StaticOwnershipGate::new());

        let err = service
            .reconcile(&PrincipalId::new("alice"), 99, &DesiredResource::named(""))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    }

    #[test]
    fn create_rejects_invalid_state_without_writing() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteResourceRepository::try_new(&conn).unwrap();
        let service = ResourceService::new(repo, StaticOwnershipGate::new());

        let mut claim = ResourceClaim::new("email");
        claim.id = 3;
        let mut desired = DesiredResource::named("orders");
        desired.claims = Some(vec![claim]);

        let err = service
            .create(&PrincipalId::new("alice"), &desired)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM api_resources;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn unowned_resource_is_not_found_and_untouched() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteResourceRepository::try_new(&conn).unwrap();
        let owner = PrincipalId::new("alice");
        let id = repo
            .create_resource(&owner, &DesiredResource::named("orders"))
            .unwrap();

        let gate = StaticOwnershipGate::new().grant(id, owner);
        let service = ResourceService::new(repo, gate);

        let mut desired = DesiredResource::named("hijacked");
        desired.claims = Some(vec![ResourceClaim::new("email")]);
        let err = service
            .reconcile(&PrincipalId::new("mallory"), id, &desired)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let stored = service.get(&PrincipalId::new("alice"), id).unwrap();
        assert_eq!(stored.name, "orders");
        assert!(stored.claims.is_empty());
    }
}

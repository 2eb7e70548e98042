//! Reconciliation orchestrator.
//!
//! # Responsibility
//! - Converge one stored resource aggregate onto a desired state inside a
//!   single IMMEDIATE transaction.
//!
//! # Invariants
//! - Root update first, then the snapshot is read through the same
//!   transaction.
//! - Kinds run in order claims, secrets, scopes; within a kind deletes run
//!   before updates, updates before inserts.
//! - An absent or empty desired collection leaves that kind untouched.
//! - Nested scope claims are replaced wholesale for every surviving scope.
//! - Renamed scopes are parked under a placeholder name before any scope
//!   update, so swapped names never trip `UNIQUE(resource_id, name)`.
//! - Any failure drops the transaction, which rolls everything back.

use crate::model::resource::{DesiredResource, ResourceId, ResourceScope, RowId, ScopeClaim};
use crate::reconcile::diff::{diff_collection, ChildRow};
use crate::reconcile::error::{ChildCollection, ReconcileError, ReconcileResult};
use crate::reconcile::identity::{IdentityAllocator, RowIdAllocator};
use crate::reconcile::merge::{
    claim_plan, resource_plan, scope_claim_plan, scope_plan, secret_plan, MergePlan,
};
use crate::repo::resource_repo::load_aggregate;
use log::{info, warn};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use std::time::Instant;

const PARKED_SCOPE_NAME_PREFIX: &str = "\u{0}renaming:";

/// Row counts for one child collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectionReport {
    pub deleted: usize,
    pub updated: usize,
    /// Matched rows whose merged fields equal the stored ones.
    pub unchanged: usize,
    pub inserted: usize,
}

impl CollectionReport {
    pub fn has_changes(&self) -> bool {
        self.deleted + self.updated + self.inserted > 0
    }
}

/// Outcome of one successful reconciliation.
///
/// A `None` collection entry means the desired state did not request that
/// kind, so it was left as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub resource_id: ResourceId,
    pub claims: Option<CollectionReport>,
    pub secrets: Option<CollectionReport>,
    pub scopes: Option<CollectionReport>,
    /// Nested scope claims written by full replacement.
    pub scope_claims_written: usize,
}

impl ReconcileReport {
    fn new(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            ..Self::default()
        }
    }

    /// Whether any child row was deleted, updated or inserted.
    pub fn has_child_changes(&self) -> bool {
        [self.claims, self.secrets, self.scopes]
            .iter()
            .flatten()
            .any(CollectionReport::has_changes)
            || self.scope_claims_written > 0
    }

    fn totals(&self) -> CollectionReport {
        [self.claims, self.secrets, self.scopes]
            .iter()
            .flatten()
            .fold(CollectionReport::default(), |acc, next| CollectionReport {
                deleted: acc.deleted + next.deleted,
                updated: acc.updated + next.updated,
                unchanged: acc.unchanged + next.unchanged,
                inserted: acc.inserted + next.inserted,
            })
    }
}

/// Drives one reconciliation per call against a borrowed connection.
pub struct Reconciler<'conn, A = RowIdAllocator> {
    conn: &'conn Connection,
    allocator: A,
}

impl<'conn> Reconciler<'conn, RowIdAllocator> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self::with_allocator(conn, RowIdAllocator)
    }
}

impl<'conn, A: IdentityAllocator> Reconciler<'conn, A> {
    pub fn with_allocator(conn: &'conn Connection, allocator: A) -> Self {
        Self { conn, allocator }
    }

    /// Converges resource `resource_id` to `desired`.
    ///
    /// The caller is expected to have validated `desired` and checked
    /// ownership. On error nothing is persisted.
    pub fn reconcile(
        &self,
        resource_id: ResourceId,
        desired: &DesiredResource,
    ) -> ReconcileResult<ReconcileReport> {
        let started_at = Instant::now();
        info!("event=reconcile module=reconcile status=start resource_id={resource_id}");

        match self.reconcile_in_transaction(resource_id, desired) {
            Ok(report) => {
                let totals = report.totals();
                info!(
                    "event=reconcile module=reconcile status=ok resource_id={resource_id} duration_ms={} deleted={} updated={} unchanged={} inserted={} scope_claims_written={}",
                    started_at.elapsed().as_millis(),
                    totals.deleted,
                    totals.updated,
                    totals.unchanged,
                    totals.inserted,
                    report.scope_claims_written
                );
                Ok(report)
            }
            Err(err) => {
                warn!(
                    "event=reconcile module=reconcile status=error resource_id={resource_id} duration_ms={} error_code={} rolled_back=true",
                    started_at.elapsed().as_millis(),
                    err.kind().as_str()
                );
                Err(err)
            }
        }
    }

    fn reconcile_in_transaction(
        &self,
        resource_id: ResourceId,
        desired: &DesiredResource,
    ) -> ReconcileResult<ReconcileReport> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        if resource_plan(desired).apply_update(&tx, resource_id)? == 0 {
            return Err(ReconcileError::NotFound(resource_id));
        }
        let snapshot =
            load_aggregate(&tx, resource_id)?.ok_or(ReconcileError::NotFound(resource_id))?;

        let mut report = ReconcileReport::new(resource_id);
        if let Some(claims) = desired.requested_claims() {
            report.claims = Some(self.reconcile_flat(
                &tx,
                ChildCollection::Claims,
                resource_id,
                &snapshot.claims,
                claims,
                |claim| claim_plan(claim, resource_id),
            )?);
        }
        if let Some(secrets) = desired.requested_secrets() {
            report.secrets = Some(self.reconcile_flat(
                &tx,
                ChildCollection::Secrets,
                resource_id,
                &snapshot.secrets,
                secrets,
                |secret| secret_plan(secret, resource_id),
            )?);
        }
        if let Some(scopes) = desired.requested_scopes() {
            let (scope_report, written) =
                self.reconcile_scopes(&tx, resource_id, &snapshot.scopes, scopes)?;
            report.scopes = Some(scope_report);
            report.scope_claims_written = written;
        }

        tx.commit()?;
        Ok(report)
    }

    /// Claims and secrets: rows without nested children.
    fn reconcile_flat<T, F>(
        &self,
        conn: &Connection,
        collection: ChildCollection,
        resource_id: ResourceId,
        persisted: &[T],
        desired: &[T],
        plan_for: F,
    ) -> ReconcileResult<CollectionReport>
    where
        T: ChildRow,
        F: Fn(&T) -> MergePlan,
    {
        let diff = diff_collection(persisted, desired);
        let updates = diff
            .pair_updates(persisted)
            .map_err(|id| ReconcileError::ReferenceError { collection, id })?;
        let mut report = CollectionReport::default();

        let delete_sql = format!(
            "DELETE FROM {} WHERE id = ?1 AND resource_id = ?2;",
            collection.table()
        );
        for id in &diff.to_delete {
            conn.execute(&delete_sql, params![id, resource_id])?;
            report.deleted += 1;
        }

        for (row, current) in updates {
            let plan = plan_for(row);
            if plan.differs_from(&plan_for(current)) {
                plan.apply_update(conn, row.row_id())?;
                report.updated += 1;
            } else {
                report.unchanged += 1;
            }
        }

        for &row in &diff.to_insert {
            self.allocator.allocate_id(conn, &plan_for(row))?;
            report.inserted += 1;
        }

        Ok(report)
    }

    fn reconcile_scopes(
        &self,
        conn: &Connection,
        resource_id: ResourceId,
        persisted: &[ResourceScope],
        desired: &[ResourceScope],
    ) -> ReconcileResult<(CollectionReport, usize)> {
        let diff = diff_collection(persisted, desired);
        let updates = diff
            .pair_updates(persisted)
            .map_err(|id| ReconcileError::ReferenceError {
                collection: ChildCollection::Scopes,
                id,
            })?;
        let mut report = CollectionReport::default();
        let mut claims_written = 0;

        for id in &diff.to_delete {
            conn.execute("DELETE FROM api_scope_claims WHERE scope_id = ?1;", [id])?;
            conn.execute(
                "DELETE FROM api_scopes WHERE id = ?1 AND resource_id = ?2;",
                params![id, resource_id],
            )?;
            report.deleted += 1;
        }

        for (scope, current) in &updates {
            if scope.name != current.name {
                conn.execute(
                    "UPDATE api_scopes SET name = ?1 WHERE id = ?2 AND resource_id = ?3;",
                    params![parked_scope_name(scope.id), scope.id, resource_id],
                )?;
            }
        }

        for (scope, current) in updates {
            let plan = scope_plan(scope, resource_id);
            if plan.differs_from(&scope_plan(current, resource_id)) {
                plan.apply_update(conn, scope.id)?;
                report.updated += 1;
            } else {
                report.unchanged += 1;
            }
            claims_written +=
                replace_scope_claims(conn, &self.allocator, scope.id, &scope.claims)?;
        }

        for &scope in &diff.to_insert {
            insert_scope(conn, &self.allocator, resource_id, scope)?;
            claims_written += scope.claims.len();
            report.inserted += 1;
        }

        Ok((report, claims_written))
    }
}

/// Inserts a scope row followed by its nested claims; returns the scope id.
pub(crate) fn insert_scope<A: IdentityAllocator>(
    conn: &Connection,
    allocator: &A,
    resource_id: ResourceId,
    scope: &ResourceScope,
) -> rusqlite::Result<RowId> {
    let scope_id = allocator.allocate_id(conn, &scope_plan(scope, resource_id))?;
    for claim in &scope.claims {
        allocator.allocate_id(conn, &scope_claim_plan(claim, scope_id))?;
    }
    Ok(scope_id)
}

fn replace_scope_claims<A: IdentityAllocator>(
    conn: &Connection,
    allocator: &A,
    scope_id: RowId,
    claims: &[ScopeClaim],
) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM api_scope_claims WHERE scope_id = ?1;", [scope_id])?;
    for claim in claims {
        allocator.allocate_id(conn, &scope_claim_plan(claim, scope_id))?;
    }
    Ok(claims.len())
}

fn parked_scope_name(scope_id: RowId) -> String {
    format!("{PARKED_SCOPE_NAME_PREFIX}{scope_id}")
}

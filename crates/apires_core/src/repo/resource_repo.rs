//! API resource repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Create, load, list and delete resource aggregates.
//! - Load the aggregate snapshot that reconciliation diffs against.
//! - Hand desired-state writes to the reconciliation engine.
//!
//! # Invariants
//! - Create writes the root, its children and the owner grant in one
//!   transaction.
//! - Child rows are always read in id order, scope claims grouped per scope.
//! - Read paths reject invalid persisted flags instead of masking them.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::gate::PrincipalId;
use crate::model::resource::{
    ApiResource, DesiredResource, ResourceClaim, ResourceId, ResourceScope, ResourceSecret, RowId,
    ScopeClaim,
};
use crate::model::validation::{IdPolicy, ResourceValidationError};
use crate::reconcile::error::ReconcileResult;
use crate::reconcile::identity::{IdentityAllocator, RowIdAllocator};
use crate::reconcile::merge::{claim_plan, resource_plan, secret_plan};
use crate::reconcile::orchestrator::{insert_scope, ReconcileReport, Reconciler};
use log::info;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use serde::Serialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

const RESOURCE_COLUMNS_SQL: &str = "r.id AS id,
    r.name AS name,
    r.display_name AS display_name,
    r.description AS description,
    r.enabled AS enabled,
    r.created_at AS created_at,
    r.updated_at AS updated_at";

const LIST_DEFAULT_TAKE: u32 = 10;
const LIST_TAKE_MAX: u32 = 100;

const REQUIRED_TABLES: &[&str] = &[
    "api_resources",
    "api_claims",
    "api_secrets",
    "api_scopes",
    "api_scope_claims",
    "resource_owners",
];

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for resource persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(ResourceValidationError),
    Db(DbError),
    NotFound(ResourceId),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "api resource not found: {id}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "resource repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "resource repository requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted resource data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ResourceValidationError> for RepoError {
    fn from(value: ResourceValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Sortable list columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceOrder {
    #[default]
    Id,
    Name,
    CreatedAt,
    UpdatedAt,
}

impl ResourceOrder {
    /// Parses a caller-supplied sort key; unknown keys are rejected.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "id" => Some(Self::Id),
            "name" => Some(Self::Name),
            "created_at" | "created" => Some(Self::CreatedAt),
            "updated_at" | "updated" => Some(Self::UpdatedAt),
            _ => None,
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::Id => "r.id",
            Self::Name => "r.name",
            Self::CreatedAt => "r.created_at",
            Self::UpdatedAt => "r.updated_at",
        }
    }
}

/// Query options for listing a principal's resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceListQuery {
    /// Exact name match.
    pub name: Option<String>,
    pub order_by: ResourceOrder,
    pub descending: bool,
    pub skip: u32,
    /// Defaults to 10 and clamps to 100.
    pub take: Option<u32>,
    /// Load scopes (with their claims) into list items.
    pub expand_scopes: bool,
    /// Load resource claims into list items.
    pub expand_claims: bool,
}

/// One page of list results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourcePage {
    pub items: Vec<ApiResource>,
    /// Matching rows before paging.
    pub total: u64,
    pub skip: u32,
    /// Effective normalized page size.
    pub take: u32,
}

/// Repository interface for resource aggregates.
pub trait ResourceRepository {
    /// Creates a resource with its initial children and grants it to `owner`.
    fn create_resource(
        &self,
        owner: &PrincipalId,
        desired: &DesiredResource,
    ) -> RepoResult<ResourceId>;
    /// Loads the full aggregate.
    fn get_resource(&self, id: ResourceId) -> RepoResult<Option<ApiResource>>;
    /// Deletes a resource; children and grants cascade.
    fn delete_resource(&self, id: ResourceId) -> RepoResult<()>;
    /// Lists resources granted to `owner`.
    fn list_resources(
        &self,
        owner: &PrincipalId,
        query: &ResourceListQuery,
    ) -> RepoResult<ResourcePage>;
    /// Converges stored state of `id` to `desired` in one transaction.
    fn reconcile_resource(
        &self,
        id: ResourceId,
        desired: &DesiredResource,
    ) -> ReconcileResult<ReconcileReport>;
}

/// SQLite-backed resource repository.
pub struct SqliteResourceRepository<'conn, A = RowIdAllocator> {
    conn: &'conn Connection,
    allocator: A,
}

impl<'conn> SqliteResourceRepository<'conn, RowIdAllocator> {
    /// Creates a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        Self::try_with_allocator(conn, RowIdAllocator)
    }
}

impl<'conn, A: IdentityAllocator + Clone> SqliteResourceRepository<'conn, A> {
    /// Creates a repository that assigns ids through `allocator`.
    pub fn try_with_allocator(conn: &'conn Connection, allocator: A) -> RepoResult<Self> {
        ensure_resource_connection_ready(conn)?;
        Ok(Self { conn, allocator })
    }
}

impl<A: IdentityAllocator + Clone> ResourceRepository for SqliteResourceRepository<'_, A> {
    fn create_resource(
        &self,
        owner: &PrincipalId,
        desired: &DesiredResource,
    ) -> RepoResult<ResourceId> {
        desired.validate(IdPolicy::UnsetOnly)?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let resource_id = self.allocator.allocate_id(&tx, &resource_plan(desired))?;
        tx.execute(
            "INSERT INTO resource_owners (resource_id, principal_id) VALUES (?1, ?2);",
            params![resource_id, owner.as_str()],
        )?;

        for claim in desired.requested_claims().unwrap_or_default() {
            self.allocator
                .allocate_id(&tx, &claim_plan(claim, resource_id))?;
        }
        for secret in desired.requested_secrets().unwrap_or_default() {
            self.allocator
                .allocate_id(&tx, &secret_plan(secret, resource_id))?;
        }
        for scope in desired.requested_scopes().unwrap_or_default() {
            insert_scope(&tx, &self.allocator, resource_id, scope)?;
        }

        tx.commit()?;
        info!("event=resource_create module=repo status=ok resource_id={resource_id}");
        Ok(resource_id)
    }

    fn get_resource(&self, id: ResourceId) -> RepoResult<Option<ApiResource>> {
        load_aggregate(self.conn, id)
    }

    fn delete_resource(&self, id: ResourceId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM api_resources WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        info!("event=resource_delete module=repo status=ok resource_id={id}");
        Ok(())
    }

    fn list_resources(
        &self,
        owner: &PrincipalId,
        query: &ResourceListQuery,
    ) -> RepoResult<ResourcePage> {
        let take = normalize_list_take(query.take);
        let mut filter_sql = String::from(
            " FROM api_resources r
              INNER JOIN resource_owners o ON o.resource_id = r.id
              WHERE o.principal_id = ?",
        );
        let mut bind_values: Vec<Value> = vec![Value::Text(owner.as_str().to_string())];

        if let Some(name) = query.name.as_ref() {
            filter_sql.push_str(" AND r.name = ?");
            bind_values.push(Value::Text(name.clone()));
        }

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*){filter_sql};"),
            params_from_iter(bind_values.iter()),
            |row| row.get(0),
        )?;

        let mut page = ResourcePage {
            items: Vec::new(),
            total: u64::try_from(total).unwrap_or_default(),
            skip: query.skip,
            take,
        };
        if total == 0 {
            return Ok(page);
        }

        let direction = if query.descending { "DESC" } else { "ASC" };
        let sql = format!(
            "SELECT {RESOURCE_COLUMNS_SQL}{filter_sql}
             ORDER BY {} {direction}, r.id ASC
             LIMIT ? OFFSET ?;",
            query.order_by.column()
        );
        bind_values.push(Value::Integer(i64::from(take)));
        bind_values.push(Value::Integer(i64::from(query.skip)));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        while let Some(row) = rows.next()? {
            let mut resource = parse_resource_row(row)?;
            if query.expand_claims {
                resource.claims = load_claims(self.conn, resource.id)?;
            }
            if query.expand_scopes {
                resource.scopes = load_scopes(self.conn, resource.id)?;
            }
            page.items.push(resource);
        }

        Ok(page)
    }

    fn reconcile_resource(
        &self,
        id: ResourceId,
        desired: &DesiredResource,
    ) -> ReconcileResult<ReconcileReport> {
        Reconciler::with_allocator(self.conn, self.allocator.clone()).reconcile(id, desired)
    }
}

/// Normalizes list page size according to the list contract.
pub fn normalize_list_take(take: Option<u32>) -> u32 {
    match take {
        None | Some(0) => LIST_DEFAULT_TAKE,
        Some(value) if value > LIST_TAKE_MAX => LIST_TAKE_MAX,
        Some(value) => value,
    }
}

/// Loads root plus every child collection, or `None` when the root is absent.
///
/// Works on a plain connection or inside an open transaction.
pub fn load_aggregate(conn: &Connection, id: ResourceId) -> RepoResult<Option<ApiResource>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RESOURCE_COLUMNS_SQL}
         FROM api_resources r
         WHERE r.id = ?1;"
    ))?;
    let mut rows = stmt.query([id])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };

    let mut resource = parse_resource_row(row)?;
    resource.claims = load_claims(conn, id)?;
    resource.secrets = load_secrets(conn, id)?;
    resource.scopes = load_scopes(conn, id)?;
    Ok(Some(resource))
}

fn load_claims(conn: &Connection, resource_id: ResourceId) -> RepoResult<Vec<ResourceClaim>> {
    let mut stmt = conn.prepare(
        "SELECT id, resource_id, claim_type
         FROM api_claims
         WHERE resource_id = ?1
         ORDER BY id ASC;",
    )?;
    let mut rows = stmt.query([resource_id])?;
    let mut claims = Vec::new();
    while let Some(row) = rows.next()? {
        claims.push(ResourceClaim {
            id: row.get("id")?,
            resource_id: row.get("resource_id")?,
            claim_type: row.get("claim_type")?,
        });
    }
    Ok(claims)
}

fn load_secrets(conn: &Connection, resource_id: ResourceId) -> RepoResult<Vec<ResourceSecret>> {
    let mut stmt = conn.prepare(
        "SELECT id, resource_id, description, expiration, secret_type, value
         FROM api_secrets
         WHERE resource_id = ?1
         ORDER BY id ASC;",
    )?;
    let mut rows = stmt.query([resource_id])?;
    let mut secrets = Vec::new();
    while let Some(row) = rows.next()? {
        let id: RowId = row.get("id")?;
        let value: Option<String> = row.get("value")?;
        let value = value.ok_or_else(|| {
            RepoError::InvalidData(format!("api_secrets.value is null for secret {id}"))
        })?;
        secrets.push(ResourceSecret {
            id,
            resource_id: row.get("resource_id")?,
            description: row.get("description")?,
            expiration: row.get("expiration")?,
            secret_type: row.get("secret_type")?,
            value,
        });
    }
    Ok(secrets)
}

fn load_scopes(conn: &Connection, resource_id: ResourceId) -> RepoResult<Vec<ResourceScope>> {
    let mut claims_by_scope = load_scope_claims(conn, resource_id)?;
    let mut stmt = conn.prepare(
        "SELECT
            id,
            resource_id,
            name,
            display_name,
            description,
            emphasize,
            required,
            show_in_discovery_document
         FROM api_scopes
         WHERE resource_id = ?1
         ORDER BY id ASC;",
    )?;
    let mut rows = stmt.query([resource_id])?;
    let mut scopes = Vec::new();
    while let Some(row) = rows.next()? {
        let id: RowId = row.get("id")?;
        scopes.push(ResourceScope {
            id,
            resource_id: row.get("resource_id")?,
            name: row.get("name")?,
            display_name: row.get("display_name")?,
            description: row.get("description")?,
            emphasize: parse_flag(row.get("emphasize")?, "api_scopes.emphasize")?,
            required: parse_flag(row.get("required")?, "api_scopes.required")?,
            show_in_discovery_document: parse_flag(
                row.get("show_in_discovery_document")?,
                "api_scopes.show_in_discovery_document",
            )?,
            claims: claims_by_scope.remove(&id).unwrap_or_default(),
        });
    }
    Ok(scopes)
}

fn load_scope_claims(
    conn: &Connection,
    resource_id: ResourceId,
) -> RepoResult<HashMap<RowId, Vec<ScopeClaim>>> {
    let mut stmt = conn.prepare(
        "SELECT sc.id AS id, sc.scope_id AS scope_id, sc.claim_type AS claim_type
         FROM api_scope_claims sc
         INNER JOIN api_scopes s ON s.id = sc.scope_id
         WHERE s.resource_id = ?1
         ORDER BY sc.scope_id ASC, sc.id ASC;",
    )?;
    let mut rows = stmt.query([resource_id])?;
    let mut grouped: HashMap<RowId, Vec<ScopeClaim>> = HashMap::new();
    while let Some(row) = rows.next()? {
        let claim = ScopeClaim {
            id: row.get("id")?,
            scope_id: row.get("scope_id")?,
            claim_type: row.get("claim_type")?,
        };
        grouped.entry(claim.scope_id).or_default().push(claim);
    }
    Ok(grouped)
}

fn parse_resource_row(row: &Row<'_>) -> RepoResult<ApiResource> {
    Ok(ApiResource {
        id: row.get("id")?,
        name: row.get("name")?,
        display_name: row.get("display_name")?,
        description: row.get("description")?,
        enabled: parse_flag(row.get("enabled")?, "api_resources.enabled")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        claims: Vec::new(),
        secrets: Vec::new(),
        scopes: Vec::new(),
    })
}

fn parse_flag(value: i64, column: &'static str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid flag value `{other}` in {column}"
        ))),
    }
}

fn ensure_resource_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in REQUIRED_TABLES {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }

    Ok(())
}

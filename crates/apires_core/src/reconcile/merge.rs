//! Field merger.
//!
//! Turns one desired row into an ordered list of `(column, value)` pairs
//! using "presence wins, else clear": a non-blank text or `Some` value
//! replaces the stored value, a blank text or `None` stores `NULL`. Updates
//! therefore overwrite every targeted column; callers resend the complete
//! field set.
//!
//! # Invariants
//! - Table and column names are compile-time constants; values are always
//!   bound parameters.
//! - Merging a persisted row yields exactly its stored values, which is what
//!   [`MergePlan::differs_from`] relies on.

use crate::model::resource::{
    DesiredResource, ResourceClaim, ResourceId, ResourceScope, ResourceSecret, RowId, ScopeClaim,
};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

const TOUCH_SQL: &str = "(strftime('%s', 'now') * 1000)";

/// Structured description of one row write.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    table: &'static str,
    owner: Option<(&'static str, RowId)>,
    columns: Vec<(&'static str, Value)>,
    touch: Option<&'static str>,
}

impl MergePlan {
    /// Starts a plan for a row owned by `owner_id` through `owner_column`.
    pub fn owned(table: &'static str, owner_column: &'static str, owner_id: RowId) -> Self {
        Self {
            table,
            owner: Some((owner_column, owner_id)),
            columns: Vec::new(),
            touch: None,
        }
    }

    /// Starts a plan for a root row.
    pub fn root(table: &'static str) -> Self {
        Self {
            table,
            owner: None,
            columns: Vec::new(),
            touch: None,
        }
    }

    /// Required text: always written as given.
    pub fn text(mut self, column: &'static str, value: &str) -> Self {
        self.columns.push((column, Value::Text(value.to_string())));
        self
    }

    /// Optional text: non-blank replaces, blank or missing clears.
    pub fn text_or_clear(mut self, column: &'static str, value: Option<&str>) -> Self {
        let value = match value {
            Some(text) if !text.trim().is_empty() => Value::Text(text.to_string()),
            _ => Value::Null,
        };
        self.columns.push((column, value));
        self
    }

    /// Optional integer: present replaces, missing clears.
    pub fn integer_or_clear(mut self, column: &'static str, value: Option<i64>) -> Self {
        self.columns
            .push((column, value.map_or(Value::Null, Value::Integer)));
        self
    }

    pub fn flag(mut self, column: &'static str, value: bool) -> Self {
        self.columns.push((column, Value::Integer(i64::from(value))));
        self
    }

    /// Stamps `column` with the current epoch ms on update.
    pub fn touching(mut self, column: &'static str) -> Self {
        self.touch = Some(column);
        self
    }

    /// Returns whether any targeted column would change relative to `current`.
    pub fn differs_from(&self, current: &MergePlan) -> bool {
        self.columns != current.columns
    }

    /// Writes the planned columns onto row `id`. Returns affected row count,
    /// which is `0` when the row does not exist under the planned owner.
    pub fn apply_update(&self, conn: &Connection, id: RowId) -> rusqlite::Result<usize> {
        let mut assignments: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(index, (column, _))| format!("{column} = ?{}", index + 1))
            .collect();
        if let Some(touch) = self.touch {
            assignments.push(format!("{touch} = {TOUCH_SQL}"));
        }

        let mut bind_values: Vec<Value> = self
            .columns
            .iter()
            .map(|(_, value)| value.clone())
            .collect();
        bind_values.push(Value::Integer(id));
        let mut sql = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            self.table,
            assignments.join(", "),
            bind_values.len()
        );
        if let Some((owner_column, owner_id)) = self.owner {
            bind_values.push(Value::Integer(owner_id));
            sql.push_str(&format!(" AND {owner_column} = ?{}", bind_values.len()));
        }
        sql.push(';');

        conn.execute(&sql, params_from_iter(bind_values))
    }

    /// Inserts the planned row, owner column first. The new id is read by
    /// the identity allocator.
    pub fn apply_insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        let mut names: Vec<&str> = Vec::with_capacity(self.columns.len() + 1);
        let mut bind_values: Vec<Value> = Vec::with_capacity(self.columns.len() + 1);
        if let Some((owner_column, owner_id)) = self.owner {
            names.push(owner_column);
            bind_values.push(Value::Integer(owner_id));
        }
        for (column, value) in &self.columns {
            names.push(*column);
            bind_values.push(value.clone());
        }
        let placeholders: Vec<String> = (1..=bind_values.len())
            .map(|index| format!("?{index}"))
            .collect();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({});",
            self.table,
            names.join(", "),
            placeholders.join(", ")
        );
        conn.execute(&sql, params_from_iter(bind_values))
    }
}

/// Root fields of the resource record.
pub fn resource_plan(desired: &DesiredResource) -> MergePlan {
    MergePlan::root("api_resources")
        .text("name", &desired.name)
        .text_or_clear("display_name", desired.display_name.as_deref())
        .text_or_clear("description", desired.description.as_deref())
        .flag("enabled", desired.enabled)
        .touching("updated_at")
}

pub fn claim_plan(claim: &ResourceClaim, resource_id: ResourceId) -> MergePlan {
    MergePlan::owned("api_claims", "resource_id", resource_id).text("claim_type", &claim.claim_type)
}

pub fn secret_plan(secret: &ResourceSecret, resource_id: ResourceId) -> MergePlan {
    MergePlan::owned("api_secrets", "resource_id", resource_id)
        .text_or_clear("description", secret.description.as_deref())
        .integer_or_clear("expiration", secret.expiration)
        .text_or_clear("secret_type", secret.secret_type.as_deref())
        .text_or_clear("value", Some(secret.value.as_str()))
}

/// Scope row only; nested claims are replaced separately.
pub fn scope_plan(scope: &ResourceScope, resource_id: ResourceId) -> MergePlan {
    MergePlan::owned("api_scopes", "resource_id", resource_id)
        .text("name", &scope.name)
        .text_or_clear("display_name", scope.display_name.as_deref())
        .text_or_clear("description", scope.description.as_deref())
        .flag("emphasize", scope.emphasize)
        .flag("required", scope.required)
        .flag("show_in_discovery_document", scope.show_in_discovery_document)
}

pub fn scope_claim_plan(claim: &ScopeClaim, scope_id: RowId) -> MergePlan {
    MergePlan::owned("api_scope_claims", "scope_id", scope_id).text("claim_type", &claim.claim_type)
}

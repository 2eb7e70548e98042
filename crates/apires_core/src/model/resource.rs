//! Resource aggregate records.
//!
//! # Responsibility
//! - Model the `api_resources` root and its claim, secret and scope children.
//! - Keep one serde shape for persisted reads and desired-state writes.
//!
//! # Invariants
//! - Ids are `0` until SQLite assigns them and never change afterwards.
//! - Owner ids (`resource_id`, `scope_id`) on desired items are ignored; the
//!   engine always writes the owner it is reconciling.

use serde::{Deserialize, Serialize};

/// Store-assigned identifier of an API resource.
pub type ResourceId = i64;

/// Store-assigned identifier of any child row.
pub type RowId = i64;

/// Marker id for rows that have not been persisted yet.
pub const UNSET_ID: RowId = 0;

/// Claim type requested by tokens issued for the resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceClaim {
    #[serde(default)]
    pub id: RowId,
    #[serde(default)]
    pub resource_id: ResourceId,
    /// Serialized as `type` to match the external schema naming.
    #[serde(rename = "type")]
    pub claim_type: String,
}

impl ResourceClaim {
    /// Creates an unsaved claim row.
    pub fn new(claim_type: impl Into<String>) -> Self {
        Self {
            id: UNSET_ID,
            resource_id: UNSET_ID,
            claim_type: claim_type.into(),
        }
    }
}

/// Shared secret used by the resource to authenticate introspection calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSecret {
    #[serde(default)]
    pub id: RowId,
    #[serde(default)]
    pub resource_id: ResourceId,
    #[serde(default)]
    pub description: Option<String>,
    /// Unix epoch milliseconds.
    #[serde(default)]
    pub expiration: Option<i64>,
    #[serde(default, rename = "type")]
    pub secret_type: Option<String>,
    /// Serialized form of the secret (usually a hash).
    pub value: String,
}

impl ResourceSecret {
    /// Creates an unsaved secret with only a value set.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            id: UNSET_ID,
            resource_id: UNSET_ID,
            description: None,
            expiration: None,
            secret_type: None,
            value: value.into(),
        }
    }
}

/// Claim type attached to one scope rather than to the resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeClaim {
    #[serde(default)]
    pub id: RowId,
    #[serde(default)]
    pub scope_id: RowId,
    #[serde(rename = "type")]
    pub claim_type: String,
}

impl ScopeClaim {
    /// Creates an unsaved scope claim row.
    pub fn new(claim_type: impl Into<String>) -> Self {
        Self {
            id: UNSET_ID,
            scope_id: UNSET_ID,
            claim_type: claim_type.into(),
        }
    }
}

/// Permission scope exposed by the resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceScope {
    #[serde(default)]
    pub id: RowId,
    #[serde(default)]
    pub resource_id: ResourceId,
    /// Unique within the owning resource.
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub emphasize: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_true")]
    pub show_in_discovery_document: bool,
    /// Always fully replaced on update, never diffed.
    #[serde(default)]
    pub claims: Vec<ScopeClaim>,
}

impl ResourceScope {
    /// Creates an unsaved scope with default flags and no claims.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: UNSET_ID,
            resource_id: UNSET_ID,
            name: name.into(),
            display_name: None,
            description: None,
            emphasize: false,
            required: false,
            show_in_discovery_document: true,
            claims: Vec::new(),
        }
    }

    /// Returns the nested claim types in stored order.
    pub fn claim_types(&self) -> Vec<&str> {
        self.claims
            .iter()
            .map(|claim| claim.claim_type.as_str())
            .collect()
    }
}

/// Fully loaded aggregate as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResource {
    pub id: ResourceId,
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub enabled: bool,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
    /// Epoch ms timestamp of the last root write.
    pub updated_at: i64,
    pub claims: Vec<ResourceClaim>,
    pub secrets: Vec<ResourceSecret>,
    pub scopes: Vec<ResourceScope>,
}

impl ApiResource {
    /// Converts the persisted aggregate into a desired state that reproduces
    /// it exactly, ids included.
    pub fn to_desired(&self) -> DesiredResource {
        DesiredResource {
            name: self.name.clone(),
            display_name: self.display_name.clone(),
            description: self.description.clone(),
            enabled: self.enabled,
            claims: Some(self.claims.clone()),
            secrets: Some(self.secrets.clone()),
            scopes: Some(self.scopes.clone()),
        }
    }
}

/// Desired state submitted by a caller.
///
/// Root fields are always written. A collection that is `None` or empty is
/// left untouched; a non-empty collection becomes the complete new contents.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DesiredResource {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<Vec<ResourceClaim>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<Vec<ResourceSecret>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<ResourceScope>>,
}

impl DesiredResource {
    /// Creates an enabled desired state with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            ..Self::default()
        }
    }

    /// Claims requested for reconciliation, or `None` when untouched.
    pub fn requested_claims(&self) -> Option<&[ResourceClaim]> {
        non_empty(self.claims.as_deref())
    }

    /// Secrets requested for reconciliation, or `None` when untouched.
    pub fn requested_secrets(&self) -> Option<&[ResourceSecret]> {
        non_empty(self.secrets.as_deref())
    }

    /// Scopes requested for reconciliation, or `None` when untouched.
    pub fn requested_scopes(&self) -> Option<&[ResourceScope]> {
        non_empty(self.scopes.as_deref())
    }
}

fn non_empty<T>(items: Option<&[T]>) -> Option<&[T]> {
    items.filter(|items| !items.is_empty())
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::{DesiredResource, ResourceScope};

    #[test]
    fn empty_collections_count_as_untouched() {
        let mut desired = DesiredResource::named("orders");
        desired.secrets = Some(Vec::new());
        assert!(desired.requested_secrets().is_none());
        assert!(desired.requested_claims().is_none());
    }

    #[test]
    fn desired_payload_uses_external_field_names() {
        let desired: DesiredResource = serde_json::from_str(
            r#"{
                "name": "orders",
                "claims": [{ "type": "email" }],
                "secrets": [{ "id": 4, "value": "hash", "type": "SharedSecret" }],
                "scopes": [{ "name": "orders.read", "claims": [{ "type": "role" }] }]
            }"#,
        )
        .unwrap();

        assert!(desired.enabled);
        assert_eq!(desired.requested_claims().unwrap()[0].claim_type, "email");
        let secret = &desired.requested_secrets().unwrap()[0];
        assert_eq!(secret.id, 4);
        assert_eq!(secret.secret_type.as_deref(), Some("SharedSecret"));
        let scope = &desired.requested_scopes().unwrap()[0];
        assert!(scope.show_in_discovery_document);
        assert_eq!(scope.claim_types(), vec!["role"]);
    }

    #[test]
    fn new_scope_defaults_match_storage_defaults() {
        let scope = ResourceScope::new("orders.write");
        assert_eq!(scope.id, 0);
        assert!(!scope.emphasize);
        assert!(!scope.required);
        assert!(scope.show_in_discovery_document);
    }
}

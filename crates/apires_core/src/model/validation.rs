//! Structural validation of desired resource state.
//!
//! Runs before any transaction opens. Collects every issue instead of
//! stopping at the first one, so callers can report them per field.

use crate::model::resource::{DesiredResource, RowId, UNSET_ID};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

const MAX_NAME_CHARS: usize = 200;
const MAX_DESCRIPTION_CHARS: usize = 1000;
const MAX_CLAIM_TYPE_CHARS: usize = 200;
const MAX_SECRET_TYPE_CHARS: usize = 250;
const MAX_SECRET_VALUE_CHARS: usize = 4000;

/// One failed rule, addressed by a field path such as `scopes[1].name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

impl FieldIssue {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Display for FieldIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation failure carrying every issue found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceValidationError {
    pub issues: Vec<FieldIssue>,
}

impl ResourceValidationError {
    /// Returns whether any issue targets `field` exactly.
    pub fn has_issue_for(&self, field: &str) -> bool {
        self.issues.iter().any(|issue| issue.field == field)
    }
}

impl Display for ResourceValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "invalid resource: {joined}")
    }
}

impl Error for ResourceValidationError {}

/// Whether desired ids may reference persisted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPolicy {
    /// Creation: every child must be new.
    UnsetOnly,
    /// Reconciliation: non-zero ids address persisted rows.
    AllowExisting,
}

impl DesiredResource {
    /// Validates required fields, lengths and id shape.
    pub fn validate(&self, policy: IdPolicy) -> Result<(), ResourceValidationError> {
        let mut issues = Vec::new();

        require_text(&mut issues, "name", &self.name, MAX_NAME_CHARS);
        optional_text(
            &mut issues,
            "display_name",
            self.display_name.as_deref(),
            MAX_NAME_CHARS,
        );
        optional_text(
            &mut issues,
            "description",
            self.description.as_deref(),
            MAX_DESCRIPTION_CHARS,
        );

        if let Some(claims) = self.requested_claims() {
            check_ids(&mut issues, "claims", claims.iter().map(|c| c.id), policy);
            for (index, claim) in claims.iter().enumerate() {
                require_text(
                    &mut issues,
                    &format!("claims[{index}].type"),
                    &claim.claim_type,
                    MAX_CLAIM_TYPE_CHARS,
                );
            }
        }

        if let Some(secrets) = self.requested_secrets() {
            check_ids(&mut issues, "secrets", secrets.iter().map(|s| s.id), policy);
            for (index, secret) in secrets.iter().enumerate() {
                require_text(
                    &mut issues,
                    &format!("secrets[{index}].value"),
                    &secret.value,
                    MAX_SECRET_VALUE_CHARS,
                );
                optional_text(
                    &mut issues,
                    &format!("secrets[{index}].description"),
                    secret.description.as_deref(),
                    MAX_DESCRIPTION_CHARS,
                );
                optional_text(
                    &mut issues,
                    &format!("secrets[{index}].type"),
                    secret.secret_type.as_deref(),
                    MAX_SECRET_TYPE_CHARS,
                );
            }
        }

        if let Some(scopes) = self.requested_scopes() {
            check_ids(&mut issues, "scopes", scopes.iter().map(|s| s.id), policy);
            for (index, scope) in scopes.iter().enumerate() {
                require_text(
                    &mut issues,
                    &format!("scopes[{index}].name"),
                    &scope.name,
                    MAX_NAME_CHARS,
                );
                optional_text(
                    &mut issues,
                    &format!("scopes[{index}].display_name"),
                    scope.display_name.as_deref(),
                    MAX_NAME_CHARS,
                );
                optional_text(
                    &mut issues,
                    &format!("scopes[{index}].description"),
                    scope.description.as_deref(),
                    MAX_DESCRIPTION_CHARS,
                );
                for (claim_index, claim) in scope.claims.iter().enumerate() {
                    require_text(
                        &mut issues,
                        &format!("scopes[{index}].claims[{claim_index}].type"),
                        &claim.claim_type,
                        MAX_CLAIM_TYPE_CHARS,
                    );
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ResourceValidationError { issues })
        }
    }
}

fn require_text(issues: &mut Vec<FieldIssue>, field: &str, value: &str, max_chars: usize) {
    if value.trim().is_empty() {
        issues.push(FieldIssue::new(field, "is required"));
    } else if value.chars().count() > max_chars {
        issues.push(FieldIssue::new(
            field,
            format!("must be at most {max_chars} characters"),
        ));
    }
}

fn optional_text(issues: &mut Vec<FieldIssue>, field: &str, value: Option<&str>, max_chars: usize) {
    if let Some(value) = value {
        if value.chars().count() > max_chars {
            issues.push(FieldIssue::new(
                field,
                format!("must be at most {max_chars} characters"),
            ));
        }
    }
}

fn check_ids(
    issues: &mut Vec<FieldIssue>,
    collection: &str,
    ids: impl Iterator<Item = RowId>,
    policy: IdPolicy,
) {
    let mut seen = HashSet::new();
    for (index, id) in ids.enumerate() {
        let field = format!("{collection}[{index}].id");
        if id < UNSET_ID {
            issues.push(FieldIssue::new(field, "must not be negative"));
        } else if id != UNSET_ID && policy == IdPolicy::UnsetOnly {
            issues.push(FieldIssue::new(field, "must be unset when creating"));
        } else if id != UNSET_ID && !seen.insert(id) {
            issues.push(FieldIssue::new(field, format!("duplicates id {id}")));
        }
    }
}

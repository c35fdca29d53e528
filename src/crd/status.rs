//! # Catalog Status
//!
//! Status types for tracking unpack and serving state.

use serde::{Deserialize, Serialize};

/// Condition type reporting unpack/serve progress
pub const TYPE_UNPACKED: &str = "Unpacked";
/// Condition type reporting deletion progress
pub const TYPE_DELETE: &str = "Delete";

// Condition reasons. These strings are part of the public status contract.
pub const REASON_UNPACK_PENDING: &str = "UnpackPending";
pub const REASON_UNPACKING: &str = "Unpacking";
pub const REASON_UNPACK_SUCCESSFUL: &str = "UnpackSuccessful";
pub const REASON_UNPACK_FAILED: &str = "UnpackFailed";
pub const REASON_STORAGE_FAILED: &str = "StorageFailed";
pub const REASON_STORAGE_DELETE_FAILED: &str = "StorageDeleteFailed";

/// Status of the Catalog resource
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStatus {
    /// Coarse lifecycle phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<CatalogPhase>,
    /// Conditions keyed by type
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// URL at which the unpacked content is served; only set while phase is Unpacked
    #[serde(rename = "contentURL", default, skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
    /// Digest-pinned source the current content was unpacked from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_source: Option<crate::crd::CatalogSource>,
    /// Generation of the spec this status was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum CatalogPhase {
    Pending,
    Unpacking,
    Unpacked,
    Failing,
    Deleting,
}

impl CatalogPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogPhase::Pending => "Pending",
            CatalogPhase::Unpacking => "Unpacking",
            CatalogPhase::Unpacked => "Unpacked",
            CatalogPhase::Failing => "Failing",
            CatalogPhase::Deleting => "Deleting",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,
    /// Machine-readable reason code
    pub reason: String,
    /// Human-readable detail
    #[serde(default)]
    pub message: String,
    /// Last time the status flipped (RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    pub fn new(
        r#type: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            r#type: r#type.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
            observed_generation: None,
        }
    }
}

impl CatalogStatus {
    /// Insert or replace the condition with the same type.
    ///
    /// `lastTransitionTime` is carried over from the existing entry unless the
    /// status value changed.
    pub fn set_condition(&mut self, mut condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time.clone();
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }

    #[must_use]
    pub fn condition(&self, r#type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }
}

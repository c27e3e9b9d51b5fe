//! Shared types for managed resource CRDs
//!
//! Every managed kind carries the same status machinery: `Ready` and
//! `Synced` conditions, a deletion policy, optional management policies,
//! and cross-reference declarations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition kinds used by the reconciliation core
pub mod condition {
    /// The external resource is available for use
    pub const READY: &str = "Ready";
    /// The controller is successfully syncing the record with the cloud
    pub const SYNCED: &str = "Synced";
}

/// Fixed condition reason strings
pub mod reason {
    /// External create is in flight
    pub const CREATING: &str = "Creating";
    /// External delete is in flight
    pub const DELETING: &str = "Deleting";
    /// The external resource is observed and usable
    pub const AVAILABLE: &str = "Available";
    /// The external resource exists but is not usable yet
    pub const UNAVAILABLE: &str = "Unavailable";
    /// The last reconciliation completed without error
    pub const RECONCILE_SUCCESS: &str = "ReconcileSuccess";
    /// The last reconciliation failed transiently
    pub const RECONCILE_ERROR: &str = "ReconcileError";
    /// A cloud gateway client could not be obtained
    pub const CANNOT_CONNECT: &str = "CannotConnect";
    /// The external resource could not be observed
    pub const CANNOT_OBSERVE: &str = "CannotObserve";
    /// The external resource could not be created
    pub const CANNOT_CREATE: &str = "CannotCreate";
    /// The external resource could not be updated
    pub const CANNOT_UPDATE: &str = "CannotUpdate";
    /// The external resource could not be deleted
    pub const CANNOT_DELETE: &str = "CannotDelete";
    /// The cloud rejected the declared parameters
    pub const INVALID_PARAMETER: &str = "InvalidParameter";
    /// A cross-reference declaration could not be resolved
    pub const REFERENCE_ERROR: &str = "ReferenceError";
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (Ready, Synced)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// `Ready=False(Creating)` - external create in flight
    pub fn creating() -> Self {
        Self::new(
            condition::READY,
            ConditionStatus::False,
            reason::CREATING,
            "external resource is being created",
        )
    }

    /// `Ready=False(Deleting)` - external delete in flight
    pub fn deleting() -> Self {
        Self::new(
            condition::READY,
            ConditionStatus::False,
            reason::DELETING,
            "external resource is being deleted",
        )
    }

    /// `Ready=True(Available)` - steady state
    pub fn available() -> Self {
        Self::new(
            condition::READY,
            ConditionStatus::True,
            reason::AVAILABLE,
            "external resource is available",
        )
    }

    /// `Ready=False(Unavailable)` - exists but not usable yet
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            condition::READY,
            ConditionStatus::False,
            reason::UNAVAILABLE,
            message,
        )
    }

    /// `Synced=True(ReconcileSuccess)`
    pub fn synced() -> Self {
        Self::new(
            condition::SYNCED,
            ConditionStatus::True,
            reason::RECONCILE_SUCCESS,
            "record is synced with the external resource",
        )
    }

    /// `Synced=False(reason)` - transient operation failure
    pub fn unsynced(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(condition::SYNCED, ConditionStatus::False, reason, message)
    }

    /// True if both conditions agree on type, status and reason. The
    /// message and timestamp are free to differ.
    pub fn equivalent(&self, other: &Condition) -> bool {
        self.type_ == other.type_ && self.status == other.status && self.reason == other.reason
    }
}

/// Upsert a condition into a condition list.
///
/// Replaces any existing condition of the same type. When the new condition
/// is equivalent to the existing one, the original `lastTransitionTime` is
/// kept so steady-state ticks do not churn the status.
pub fn set_condition(conditions: &mut Vec<Condition>, mut new: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == new.type_) {
        if existing.equivalent(&new) {
            new.last_transition_time = existing.last_transition_time;
        }
        *existing = new;
    } else {
        conditions.push(new);
    }
}

/// Find a condition by type
pub fn get_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Governs whether the external resource is destroyed when the record is
/// removed
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Destroy the external resource on record deletion
    #[default]
    Delete,
    /// Leave the external resource in place; only drop the record
    Orphan,
}

/// A single loop action a record may permit
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
pub enum ManagementPolicy {
    /// Observe the external resource
    Observe,
    /// Create the external resource when absent
    Create,
    /// Update the external resource on drift
    Update,
    /// Delete the external resource on record deletion
    Delete,
    /// Fill null desired fields from cloud-side defaults
    LateInitialize,
}

/// Declarative subset of loop actions permitted for a record.
///
/// An empty list means "all actions permitted" - records written before the
/// capability existed keep full management.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(transparent)]
pub struct ManagementPolicies(pub Vec<ManagementPolicy>);

impl ManagementPolicies {
    /// Policies permitting every action
    pub fn full() -> Self {
        Self(Vec::new())
    }

    /// True when the given action is permitted
    pub fn allows(&self, policy: ManagementPolicy) -> bool {
        self.0.is_empty() || self.0.contains(&policy)
    }

    /// True for the default "all actions" policy set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A symbolic pointer to another record by name
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Reference {
    /// Name of the referenced record
    pub name: String,
}

/// A symbolic pointer to another record by label selector
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Selector {
    /// Labels the referenced record must carry
    #[serde(rename = "matchLabels", default)]
    pub match_labels: BTreeMap<String, String>,
}

/// Where to write a record's connection details
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SecretRef {
    /// Secret name
    pub name: String,
    /// Secret namespace; the controller's fallback namespace applies when
    /// unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

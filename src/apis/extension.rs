//! Shared shape of every extension resource.
//!
//! The driver owns the annotations and the spec, the external controller owns
//! the status. The annotations below are the whole control channel between the
//! two: the operation annotation says what the controller should do next, the
//! timestamp annotation lets it tell a fresh request from a replayed one.
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::{apimachinery::pkg::runtime::RawExtension, NamespaceResourceScope};
use kube::{Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::fmt::{self, Debug};

pub const OPERATION_ANNOTATION: &str = "extensions.tembo.io/operation";
pub const TIMESTAMP_ANNOTATION: &str = "extensions.tembo.io/timestamp";
pub const DELETION_CONFIRMATION_ANNOTATION: &str = "confirmation.extensions.tembo.io/deletion";

/// Values of the operation annotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Reconcile,
    Migrate,
    Restore,
    WaitForState,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Reconcile => "reconcile",
            Operation::Migrate => "migrate",
            Operation::Restore => "restore",
            Operation::WaitForState => "wait-for-state",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "reconcile" => Some(Operation::Reconcile),
            "migrate" => Some(Operation::Migrate),
            "restore" => Some(Operation::Restore),
            "wait-for-state" => Some(Operation::WaitForState),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn format_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Merge patch setting the operation annotation and refreshing the timestamp.
///
/// Operation and timestamp always travel together so the external controller
/// never sees a new operation under an old timestamp.
pub fn operation_patch(operation: Operation, now: DateTime<Utc>) -> serde_json::Value {
    json!({
        "metadata": {
            "annotations": {
                OPERATION_ANNOTATION: operation.as_str(),
                TIMESTAMP_ANNOTATION: format_timestamp(now),
            }
        }
    })
}

/// Merge patch marking an object as intentionally deleted.
pub fn deletion_confirmation_patch(now: DateTime<Utc>) -> serde_json::Value {
    json!({
        "metadata": {
            "annotations": {
                DELETION_CONFIRMATION_ANNOTATION: "true",
                TIMESTAMP_ANNOTATION: format_timestamp(now),
            }
        }
    })
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum LastOperationType {
    Create,
    Reconcile,
    Delete,
    Migrate,
    Restore,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum LastOperationState {
    Processing,
    Succeeded,
    Error,
    Failed,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    #[serde(rename = "type")]
    pub type_: LastOperationType,
    pub state: LastOperationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codes: Vec<String>,
    // set by the external controller when it first reported this error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_observed_at: Option<DateTime<Utc>>,
}

/// Status fields every extension kind shares.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DefaultStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<RawExtension>,
    /// Opaque controller state, seeded from a snapshot during restore.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<RawExtension>,
}

/// Spec fields every extension kind shares.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DefaultSpec {
    /// Provider type, used by the external controllers to pick up the objects they own.
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<RawExtension>,
}

/// Implemented by every extension custom resource the driver manages.
pub trait Extension:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    type Spec: Clone + Debug + Serialize + Send + Sync;

    fn from_spec(name: &str, spec: Self::Spec) -> Self;

    fn extension_spec(&self) -> &Self::Spec;

    fn default_spec(&self) -> &DefaultSpec;

    fn default_status(&self) -> Option<&DefaultStatus>;

    /// Key compared against the desired key-set when pruning stale objects.
    fn stale_key(&self) -> String {
        self.name_any()
    }

    fn operation(&self) -> Option<Operation> {
        self.annotations()
            .get(OPERATION_ANNOTATION)
            .and_then(|value| Operation::parse(value))
    }

    fn is_terminating(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }
}

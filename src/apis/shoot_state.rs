//! Snapshot of extension state carried over when a shoot's control plane moves
//! to another host cluster. Only the lookup the restore protocol needs lives
//! here, writing the snapshot is the job of whoever performs the migration.
use k8s_openapi::apimachinery::pkg::runtime::RawExtension;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    kind = "ShootState",
    group = "extensions.tembo.io",
    version = "v1alpha1",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ShootStateSpec {
    #[serde(default)]
    pub extensions: Vec<ExtensionResourceState>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionResourceState {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<RawExtension>,
}

impl ExtensionResourceState {
    fn matches(&self, kind: &str, name: &str, purpose: Option<&str>) -> bool {
        self.kind == kind
            && self.name.as_deref() == Some(name)
            && match purpose {
                Some(purpose) => self.purpose.as_deref() == Some(purpose),
                // kinds without a purpose discriminator ignore whatever was persisted
                None => true,
            }
    }
}

impl ShootState {
    /// The persisted state for the extension identified by kind, name and purpose.
    pub fn find_extension_state(
        &self,
        kind: &str,
        name: &str,
        purpose: Option<&str>,
    ) -> Option<&ExtensionResourceState> {
        self.spec
            .extensions
            .iter()
            .find(|entry| entry.matches(kind, name, purpose))
    }
}

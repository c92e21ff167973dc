use crate::apis::extension::{DefaultSpec, DefaultStatus, Extension};
use k8s_openapi::{api::core::v1::SecretReference, apimachinery::pkg::runtime::RawExtension};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    #[default]
    Normal,
    Exposure,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Normal => "normal",
            Purpose::Exposure => "exposure",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    kind = "ControlPlane",
    group = "extensions.tembo.io",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "ControlPlaneStatus", shortname = "cp")]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneSpec {
    #[serde(flatten)]
    pub default_spec: DefaultSpec,
    pub region: String,
    pub secret_ref: SecretReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<Purpose>,
    /// Copied from the infrastructure status so the control plane hooks do not have to look it up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_provider_status: Option<RawExtension>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneStatus {
    #[serde(flatten)]
    pub default_status: DefaultStatus,
}

impl Extension for ControlPlane {
    type Spec = ControlPlaneSpec;

    fn from_spec(name: &str, spec: ControlPlaneSpec) -> Self {
        ControlPlane::new(name, spec)
    }

    fn extension_spec(&self) -> &ControlPlaneSpec {
        &self.spec
    }

    fn default_spec(&self) -> &DefaultSpec {
        &self.spec.default_spec
    }

    fn default_status(&self) -> Option<&DefaultStatus> {
        self.status.as_ref().map(|s| &s.default_status)
    }
}

use crate::apis::extension::{DefaultSpec, DefaultStatus, Extension};
use k8s_openapi::api::core::v1::SecretReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cloud infrastructure (networks, security groups, keys) a shoot's workers run in
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    kind = "Infrastructure",
    group = "extensions.tembo.io",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "InfrastructureStatus", shortname = "infra")]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureSpec {
    #[serde(flatten)]
    pub default_spec: DefaultSpec,
    pub region: String,
    pub secret_ref: SecretReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_key: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureStatus {
    #[serde(flatten)]
    pub default_status: DefaultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes_cidr: Option<String>,
}

impl Extension for Infrastructure {
    type Spec = InfrastructureSpec;

    fn from_spec(name: &str, spec: InfrastructureSpec) -> Self {
        Infrastructure::new(name, spec)
    }

    fn extension_spec(&self) -> &InfrastructureSpec {
        &self.spec
    }

    fn default_spec(&self) -> &DefaultSpec {
        &self.spec.default_spec
    }

    fn default_status(&self) -> Option<&DefaultStatus> {
        self.status.as_ref().map(|s| &s.default_status)
    }
}

use crate::apis::extension::{DefaultSpec, DefaultStatus, Extension};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BINARY_PATH: &str = "/var/bin/containerruntimes";

/// Installs one container runtime on the nodes of one worker pool
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    kind = "ContainerRuntime",
    group = "extensions.tembo.io",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "ContainerRuntimeStatus", shortname = "cr")]
#[serde(rename_all = "camelCase")]
pub struct ContainerRuntimeSpec {
    #[serde(flatten)]
    pub default_spec: DefaultSpec,
    pub binary_path: String,
    pub worker_pool: WorkerPoolReference,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPoolReference {
    pub name: String,
    pub selector: LabelSelector,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRuntimeStatus {
    #[serde(flatten)]
    pub default_status: DefaultStatus,
}

/// `<type>-<workerPoolName>`, the name and the stale key of a container runtime object
pub fn container_runtime_key(runtime_type: &str, worker_pool: &str) -> String {
    format!("{runtime_type}-{worker_pool}")
}

impl Extension for ContainerRuntime {
    type Spec = ContainerRuntimeSpec;

    fn from_spec(name: &str, spec: ContainerRuntimeSpec) -> Self {
        ContainerRuntime::new(name, spec)
    }

    fn extension_spec(&self) -> &ContainerRuntimeSpec {
        &self.spec
    }

    fn default_spec(&self) -> &DefaultSpec {
        &self.spec.default_spec
    }

    fn default_status(&self) -> Option<&DefaultStatus> {
        self.status.as_ref().map(|s| &s.default_status)
    }

    // computed from the spec, not the name
    fn stale_key(&self) -> String {
        container_runtime_key(&self.spec.default_spec.type_, &self.spec.worker_pool.name)
    }
}

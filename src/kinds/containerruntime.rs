//! Container runtimes are installed per worker pool, one object per pool and
//! runtime type.
use crate::{
    apis::{
        containerruntime::{
            container_runtime_key, ContainerRuntime, ContainerRuntimeSpec, WorkerPoolReference,
            DEFAULT_BINARY_PATH,
        },
        extension::{DefaultSpec, Extension},
    },
    driver::ExtensionKind,
};
use k8s_openapi::apimachinery::pkg::{apis::meta::v1::LabelSelector, runtime::RawExtension};
use std::collections::{BTreeMap, BTreeSet};

pub const WORKER_POOL_LABEL: &str = "worker.tembo.io/pool";

#[derive(Clone, Debug, Default)]
pub struct WorkerPool {
    pub name: String,
    /// Runtime types to install on the pool's nodes, e.g. `gvisor`.
    pub container_runtimes: Vec<String>,
    /// Node labels of the pool, in addition to the pool label.
    pub labels: BTreeMap<String, String>,
}

/// Container runtime configuration of a shoot.
#[derive(Clone, Debug)]
pub struct ContainerRuntimeValues {
    pub worker_pools: Vec<WorkerPool>,
    pub binary_path: String,
}

impl Default for ContainerRuntimeValues {
    fn default() -> Self {
        Self {
            worker_pools: vec![],
            binary_path: DEFAULT_BINARY_PATH.to_string(),
        }
    }
}

impl ContainerRuntimeValues {
    pub fn new(worker_pools: Vec<WorkerPool>) -> Self {
        Self {
            worker_pools,
            ..Self::default()
        }
    }

    /// One descriptor per pool and runtime type.
    pub fn descriptors(&self) -> Vec<ContainerRuntimeDescriptor> {
        self.worker_pools
            .iter()
            .flat_map(|pool| {
                pool.container_runtimes
                    .iter()
                    .map(move |runtime_type| ContainerRuntimeDescriptor {
                        runtime_type: runtime_type.clone(),
                        worker_pool: pool.clone(),
                        binary_path: self.binary_path.clone(),
                    })
            })
            .collect()
    }

    /// Keys of every container runtime object the configuration asks for.
    pub fn wanted_keys(&self) -> BTreeSet<String> {
        self.descriptors().iter().map(ExtensionKind::key).collect()
    }
}

#[derive(Clone, Debug)]
pub struct ContainerRuntimeDescriptor {
    pub runtime_type: String,
    pub worker_pool: WorkerPool,
    pub binary_path: String,
}

impl ExtensionKind for ContainerRuntimeDescriptor {
    type Object = ContainerRuntime;
    type Output = Option<RawExtension>;

    fn name(&self) -> String {
        container_runtime_key(&self.runtime_type, &self.worker_pool.name)
    }

    fn spec(&self) -> ContainerRuntimeSpec {
        let mut match_labels = self.worker_pool.labels.clone();
        match_labels.insert(WORKER_POOL_LABEL.to_string(), self.worker_pool.name.clone());
        ContainerRuntimeSpec {
            default_spec: DefaultSpec {
                type_: self.runtime_type.clone(),
                provider_config: None,
            },
            binary_path: self.binary_path.clone(),
            worker_pool: WorkerPoolReference {
                name: self.worker_pool.name.clone(),
                selector: LabelSelector {
                    match_labels: Some(match_labels),
                    ..LabelSelector::default()
                },
            },
        }
    }

    fn extract(&self, obj: &ContainerRuntime) -> Option<RawExtension> {
        obj.default_status().and_then(|s| s.provider_status.clone())
    }
}

//! Access to the object store the extension resources live in.
//!
//! The driver only needs create, get, merge patch (object and status), delete
//! and list. Conflicts and transport failures are returned as they come, retrying
//! them is up to whoever drives the reconcile.
use crate::{apis::extension::Extension, errors::DriverError, Result};
use async_trait::async_trait;
use kube::{
    api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    Client, ResourceExt,
};
use serde_json::Value;
use std::marker::PhantomData;
use tracing::{debug, instrument};

#[async_trait]
pub trait ExtensionStore<K: Extension>: Send + Sync {
    fn namespace(&self) -> &str;

    /// `Ok(None)` when the object does not exist.
    async fn get(&self, name: &str) -> Result<Option<K>>;

    async fn create(&self, obj: &K) -> Result<K>;

    /// JSON merge patch against the object.
    async fn patch(&self, name: &str, patch: &Value) -> Result<K>;

    /// JSON merge patch against the status subresource.
    async fn patch_status(&self, name: &str, patch: &Value) -> Result<K>;

    /// `DriverError::NotFound` when the object does not exist.
    async fn delete(&self, name: &str) -> Result<()>;

    async fn list(&self, label_selector: Option<&str>) -> Result<Vec<K>>;
}

pub(crate) fn not_found<K: Extension>(namespace: &str, name: &str) -> DriverError {
    DriverError::NotFound {
        kind: K::kind(&()).to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

/// Decode an object read through the erased API into the kind the caller expects.
///
/// This is the one place the type of a fetched object is checked at runtime.
pub fn decode<K: Extension>(obj: DynamicObject) -> Result<K> {
    if let Some(types) = &obj.types {
        let expected_kind = K::kind(&());
        let expected_api_version = K::api_version(&());
        if types.kind != expected_kind || types.api_version != expected_api_version {
            return Err(DriverError::TypeMismatch {
                expected: format!("{expected_api_version}/{expected_kind}"),
                actual: format!("{}/{}", types.api_version, types.kind),
            });
        }
    }
    let value = serde_json::to_value(&obj)?;
    Ok(serde_json::from_value(value)?)
}

/// `ExtensionStore` backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore<K: Extension> {
    api: Api<K>,
    dynamic: Api<DynamicObject>,
    namespace: String,
    _kind: PhantomData<K>,
}

impl<K: Extension> KubeStore<K> {
    pub fn namespaced(client: Client, namespace: &str) -> Self {
        let resource = ApiResource::erase::<K>(&());
        Self {
            api: Api::namespaced(client.clone(), namespace),
            dynamic: Api::namespaced_with(client, namespace, &resource),
            namespace: namespace.to_string(),
            _kind: PhantomData,
        }
    }

    fn map_err(&self, name: &str, err: kube::Error) -> DriverError {
        if is_not_found(&err) {
            not_found::<K>(&self.namespace, name)
        } else {
            DriverError::KubeError(err)
        }
    }
}

#[async_trait]
impl<K: Extension> ExtensionStore<K> for KubeStore<K> {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    #[instrument(skip(self), fields(kind = %K::kind(&()), namespace = %self.namespace))]
    async fn get(&self, name: &str) -> Result<Option<K>> {
        match self.dynamic.get_opt(name).await? {
            Some(obj) => Ok(Some(decode(obj)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, obj), fields(kind = %K::kind(&()), namespace = %self.namespace, name = %obj.name_any()))]
    async fn create(&self, obj: &K) -> Result<K> {
        debug!("Creating {} {}/{}", K::kind(&()), self.namespace, obj.name_any());
        Ok(self.api.create(&PostParams::default(), obj).await?)
    }

    #[instrument(skip(self, patch), fields(kind = %K::kind(&()), namespace = %self.namespace))]
    async fn patch(&self, name: &str, patch: &Value) -> Result<K> {
        debug!("Patching {} {}/{}: {}", K::kind(&()), self.namespace, name, patch);
        self.api
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| self.map_err(name, e))
    }

    #[instrument(skip(self, patch), fields(kind = %K::kind(&()), namespace = %self.namespace))]
    async fn patch_status(&self, name: &str, patch: &Value) -> Result<K> {
        debug!("Patching status of {} {}/{}", K::kind(&()), self.namespace, name);
        self.api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| self.map_err(name, e))
    }

    #[instrument(skip(self), fields(kind = %K::kind(&()), namespace = %self.namespace))]
    async fn delete(&self, name: &str) -> Result<()> {
        debug!("Deleting {} {}/{}", K::kind(&()), self.namespace, name);
        self.api
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| self.map_err(name, e))
    }

    #[instrument(skip(self), fields(kind = %K::kind(&()), namespace = %self.namespace))]
    async fn list(&self, label_selector: Option<&str>) -> Result<Vec<K>> {
        let mut lp = ListParams::default();
        if let Some(selector) = label_selector {
            lp = lp.labels(selector);
        }
        let list = self.dynamic.list(&lp).await?;
        let kind = K::kind(&()).to_string();
        let api_version = K::api_version(&()).to_string();
        list.items
            .into_iter()
            .map(|mut obj| {
                // items of a list carry no type information of their own
                if obj.types.is_none() {
                    obj.types = Some(kube::core::TypeMeta {
                        api_version: api_version.clone(),
                        kind: kind.clone(),
                    });
                }
                decode(obj)
            })
            .collect()
    }
}

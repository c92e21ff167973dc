//! Helper methods only available for tests
use crate::{
    apis::extension::{
        DefaultStatus, Extension, LastOperation, LastOperationState, LastOperationType,
        OPERATION_ANNOTATION,
    },
    errors::DriverError,
    store::{not_found, ExtensionStore},
    Result,
};
use assert_json_diff::assert_json_include;
use async_trait::async_trait;
use chrono::Utc;
use http::{Request, Response};
use kube::{client::Body, error::ErrorResponse, Client, ResourceExt};
use serde_json::{json, Value};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::task::JoinHandle;

/// Calls observed by the `FakeStore`, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreOp {
    Get(String),
    Create { name: String, operation: Option<String> },
    Patch { name: String, patch: Value },
    PatchStatus { name: String, patch: Value },
    Delete(String),
    List,
}

impl StoreOp {
    pub fn is_write(&self) -> bool {
        !matches!(self, StoreOp::Get(_) | StoreOp::List)
    }
}

type Controller<K> = Box<dyn Fn(&mut K) + Send + Sync>;

struct Inner<K> {
    objects: BTreeMap<String, K>,
    ops: Vec<StoreOp>,
    failures: Vec<(&'static str, String)>,
    controller: Option<Controller<K>>,
    get_delay: Option<Duration>,
    resource_version: u64,
}

/// In-memory object store standing in for the API server.
///
/// Objects carrying finalizers are only marked as terminating on delete, the
/// way the API server behaves. An optional controller closure runs against an
/// object every time it is read, standing in for the external controller.
pub struct FakeStore<K: Extension> {
    namespace: String,
    inner: Mutex<Inner<K>>,
}

impl<K: Extension> FakeStore<K> {
    pub fn new(namespace: &str) -> Arc<Self> {
        Arc::new(Self {
            namespace: namespace.to_string(),
            inner: Mutex::new(Inner {
                objects: BTreeMap::new(),
                ops: vec![],
                failures: vec![],
                controller: None,
                get_delay: None,
                resource_version: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K>> {
        self.inner.lock().expect("fake store lock")
    }

    pub fn with_controller(self: Arc<Self>, controller: impl Fn(&mut K) + Send + Sync + 'static) -> Arc<Self> {
        self.lock().controller = Some(Box::new(controller));
        self
    }

    /// Store an object directly, without recording an operation.
    pub fn insert(&self, mut obj: K) {
        let mut inner = self.lock();
        inner.resource_version += 1;
        obj.meta_mut().namespace = Some(self.namespace.clone());
        obj.meta_mut().resource_version = Some(inner.resource_version.to_string());
        let generation = obj.meta().generation.or(Some(1));
        obj.meta_mut().generation = generation;
        inner.objects.insert(obj.name_any(), obj);
    }

    pub fn object(&self, name: &str) -> Option<K> {
        self.lock().objects.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.lock().ops.clone()
    }

    pub fn writes(&self) -> Vec<StoreOp> {
        self.ops().into_iter().filter(StoreOp::is_write).collect()
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    /// Make every `op` ("get", "create", "patch", "patch_status", "delete") on `name` fail.
    pub fn fail(&self, op: &'static str, name: &str) {
        self.lock().failures.push((op, name.to_string()));
    }

    /// Make every following `get` take `delay` before it answers.
    pub fn delay_gets(&self, delay: Duration) {
        self.lock().get_delay = Some(delay);
    }

    pub fn heal(&self) {
        self.lock().failures.clear();
    }

    /// Apply `f` to a stored object, the way the external controller would.
    pub fn update(&self, name: &str, f: impl FnOnce(&mut K)) {
        if let Some(obj) = self.lock().objects.get_mut(name) {
            f(obj);
        }
    }

    pub fn set_status(&self, name: &str, status: DefaultStatus) {
        let mut inner = self.lock();
        if let Some(obj) = inner.objects.get_mut(name) {
            *obj = merged(obj, &json!({ "status": status })).expect("status merges");
        }
    }

    fn check_failure(inner: &Inner<K>, op: &'static str, name: &str) -> Result<()> {
        if inner.failures.iter().any(|(o, n)| *o == op && n == name) {
            return Err(DriverError::KubeError(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: format!("injected {op} failure for {name}"),
                reason: "InternalError".to_string(),
                code: 500,
            })));
        }
        Ok(())
    }
}

/// What the external controller does once it has converged an object.
pub fn complete<K: Extension>(obj: &mut K) {
    complete_with(obj, LastOperationType::Reconcile, LastOperationState::Succeeded);
}

pub fn complete_with<K: Extension>(obj: &mut K, type_: LastOperationType, state: LastOperationState) {
    let generation = obj.meta().generation;
    obj.annotations_mut().remove(OPERATION_ANNOTATION);
    let status = DefaultStatus {
        observed_generation: generation,
        last_operation: Some(LastOperation {
            type_,
            state,
            description: None,
            progress: Some(100),
            last_update_time: Some(Utc::now()),
        }),
        ..DefaultStatus::default()
    };
    let mut status = serde_json::to_value(status).expect("status serializes");
    status["lastError"] = Value::Null;
    *obj = merged(obj, &json!({ "status": status })).expect("status merges");
}

fn merged<K: Extension>(obj: &K, patch: &Value) -> Result<K> {
    let mut value = serde_json::to_value(obj)?;
    merge(&mut value, patch);
    Ok(serde_json::from_value(value)?)
}

// RFC 7386
fn merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = json!({});
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[async_trait]
impl<K: Extension> ExtensionStore<K> for FakeStore<K> {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, name: &str) -> Result<Option<K>> {
        let delay = self.lock().get_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.lock();
        inner.ops.push(StoreOp::Get(name.to_string()));
        Self::check_failure(&inner, "get", name)?;
        let Inner {
            objects, controller, ..
        } = &mut *inner;
        let Some(obj) = objects.get_mut(name) else {
            return Ok(None);
        };
        if let Some(controller) = controller {
            controller(obj);
        }
        Ok(Some(obj.clone()))
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let name = obj.name_any();
        let mut inner = self.lock();
        inner.ops.push(StoreOp::Create {
            name: name.clone(),
            operation: obj.annotations().get(OPERATION_ANNOTATION).cloned(),
        });
        Self::check_failure(&inner, "create", &name)?;
        if inner.objects.contains_key(&name) {
            return Err(DriverError::KubeError(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: format!("{name} already exists"),
                reason: "AlreadyExists".to_string(),
                code: 409,
            })));
        }
        inner.resource_version += 1;
        let mut created = obj.clone();
        created.meta_mut().namespace = Some(self.namespace.clone());
        created.meta_mut().generation = Some(1);
        created.meta_mut().resource_version = Some(inner.resource_version.to_string());
        inner.objects.insert(name, created.clone());
        Ok(created)
    }

    async fn patch(&self, name: &str, patch: &Value) -> Result<K> {
        let mut inner = self.lock();
        inner.ops.push(StoreOp::Patch {
            name: name.to_string(),
            patch: patch.clone(),
        });
        Self::check_failure(&inner, "patch", name)?;
        inner.resource_version += 1;
        let resource_version = inner.resource_version.to_string();
        let Some(obj) = inner.objects.get_mut(name) else {
            return Err(not_found::<K>(&self.namespace, name));
        };
        // status is a subresource, a patch on the object cannot change it
        let mut patch = patch.clone();
        if let Value::Object(fields) = &mut patch {
            fields.remove("status");
        }
        let mut updated: K = merged(obj, &patch)?;
        if serde_json::to_value(updated.extension_spec())? != serde_json::to_value(obj.extension_spec())? {
            updated.meta_mut().generation = Some(obj.meta().generation.unwrap_or(0) + 1);
        }
        updated.meta_mut().resource_version = Some(resource_version);
        *obj = updated.clone();
        Ok(updated)
    }

    async fn patch_status(&self, name: &str, patch: &Value) -> Result<K> {
        let mut inner = self.lock();
        inner.ops.push(StoreOp::PatchStatus {
            name: name.to_string(),
            patch: patch.clone(),
        });
        Self::check_failure(&inner, "patch_status", name)?;
        inner.resource_version += 1;
        let resource_version = inner.resource_version.to_string();
        let Some(obj) = inner.objects.get_mut(name) else {
            return Err(not_found::<K>(&self.namespace, name));
        };
        let status_only = json!({ "status": patch.get("status").cloned().unwrap_or(Value::Null) });
        let mut updated: K = merged(obj, &status_only)?;
        updated.meta_mut().resource_version = Some(resource_version);
        *obj = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.ops.push(StoreOp::Delete(name.to_string()));
        Self::check_failure(&inner, "delete", name)?;
        let Some(obj) = inner.objects.get_mut(name) else {
            return Err(not_found::<K>(&self.namespace, name));
        };
        if obj.finalizers().is_empty() {
            inner.objects.remove(name);
        } else if obj.meta().deletion_timestamp.is_none() {
            obj.meta_mut().deletion_timestamp = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(Utc::now()));
        }
        Ok(())
    }

    async fn list(&self, _label_selector: Option<&str>) -> Result<Vec<K>> {
        let mut inner = self.lock();
        inner.ops.push(StoreOp::List);
        Ok(inner.objects.values().cloned().collect())
    }
}

type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

/// Answers requests a `KubeStore` sends to a mocked API server.
pub struct ApiServerVerifier(ApiServerHandle);

pub async fn timeout_after_1s(handle: JoinHandle<()>) {
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("timeout on mock apiserver")
        .expect("scenario succeeded")
}

impl ApiServerVerifier {
    /// A kube client wired to a verifier, with `testns` as default namespace.
    pub fn new() -> (Client, Self) {
        let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        (Client::new(mock_service, "testns"), Self(handle))
    }

    /// Expect a GET on `path` and answer it the way the API server answers for a missing object.
    pub fn run_not_found(mut self, path: &str) -> JoinHandle<()> {
        let path = path.to_string();
        tokio::spawn(async move {
            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::GET);
            assert_eq!(request.uri().path(), path);
            let status = json!({
                "kind": "Status",
                "apiVersion": "v1",
                "metadata": {},
                "status": "Failure",
                "message": "not found",
                "reason": "NotFound",
                "code": 404
            });
            send.send_response(
                Response::builder()
                    .status(404)
                    .body(Body::from(serde_json::to_vec(&status).unwrap()))
                    .unwrap(),
            );
        })
    }

    /// Expect a LIST on `path` with `query` in its query string and answer with `items`.
    ///
    /// Items are sent without `apiVersion` and `kind`, the way the API server lists them.
    pub fn run_list<K: Extension>(mut self, path: &str, query: &str, items: Vec<K>) -> JoinHandle<()> {
        let path = path.to_string();
        let query = query.to_string();
        tokio::spawn(async move {
            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::GET);
            assert_eq!(request.uri().path(), path);
            let sent = request.uri().query().unwrap_or_default();
            assert!(sent.contains(&query), "query {sent:?} lacks {query:?}");
            let items: Vec<Value> = items
                .iter()
                .map(|item| {
                    let mut item = serde_json::to_value(item).unwrap();
                    if let Some(item) = item.as_object_mut() {
                        item.remove("apiVersion");
                        item.remove("kind");
                    }
                    item
                })
                .collect();
            let list = json!({
                "apiVersion": K::api_version(&()),
                "kind": format!("{}List", K::kind(&())),
                "metadata": {},
                "items": items
            });
            send.send_response(
                Response::builder()
                    .body(Body::from(serde_json::to_vec(&list).unwrap()))
                    .unwrap(),
            );
        })
    }

    /// Expect a JSON merge patch on `path` whose body includes `expected`, and answer with `response`.
    pub fn run_merge_patch<K: Extension>(mut self, path: &str, expected: Value, response: K) -> JoinHandle<()> {
        let path = path.to_string();
        tokio::spawn(async move {
            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::PATCH);
            assert_eq!(request.uri().path(), path);
            assert_eq!(
                request
                    .headers()
                    .get(http::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok()),
                Some("application/merge-patch+json")
            );
            let req_body = request.into_body().collect_bytes().await.unwrap();
            let runtime_patch: Value = serde_json::from_slice(&req_body).expect("valid patch from store");
            assert_json_include!(actual: runtime_patch, expected: expected);
            let response = serde_json::to_vec(&response).unwrap();
            send.send_response(Response::builder().body(Body::from(response)).unwrap());
        })
    }
}

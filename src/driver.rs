//! Single-resource driver.
//!
//! One `Driver` manages one extension object, identified by a kind descriptor.
//! The descriptor says how the object is named, what its spec should be and
//! what the caller wants out of its status once it is ready. Everything else
//! (annotations, polling, migrate and restore) is the same for every kind.
//!
//! A `Driver` keeps the output of its last successful `wait` and is not meant
//! to be shared: callers must not run operations on the same instance
//! concurrently.
use crate::{
    apis::{
        extension::{
            format_timestamp, operation_patch, Extension, Operation, OPERATION_ANNOTATION,
            TIMESTAMP_ANNOTATION,
        },
        shoot_state::ShootState,
    },
    clock::Clock,
    config::WaitParams,
    errors::DriverError,
    metrics::Metrics,
    stale,
    store::ExtensionStore,
    wait, Result,
};
use kube::{Resource, ResourceExt};
use serde_json::{json, Map, Value};
use std::{fmt::Debug, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Describes one extension object: its name, desired spec and the status it reports back.
pub trait ExtensionKind: Send + Sync {
    type Object: Extension;
    type Output: Clone + Debug + Send + Sync;

    /// Derived from configuration only, so repeated deploys hit the same object.
    fn name(&self) -> String;

    fn purpose(&self) -> Option<&str> {
        None
    }

    /// Key matched against the stale key of listed objects when pruning.
    fn key(&self) -> String {
        self.name()
    }

    fn spec(&self) -> <Self::Object as Extension>::Spec;

    fn extract(&self, obj: &Self::Object) -> Self::Output;
}

pub struct Driver<D: ExtensionKind> {
    descriptor: D,
    store: Arc<dyn ExtensionStore<D::Object>>,
    clock: Arc<dyn Clock>,
    params: WaitParams,
    metrics: Option<Metrics>,
    output: Option<D::Output>,
}

fn kind<D: ExtensionKind>() -> String {
    D::Object::kind(&()).to_string()
}

/// Merge patch turning `current` into `desired`, with explicit nulls for removed fields.
pub(crate) fn merge_patch_diff(current: &Value, desired: &Value) -> Value {
    match (current, desired) {
        (Value::Object(current), Value::Object(desired)) => {
            let mut patch = Map::new();
            for (key, value) in desired {
                match current.get(key) {
                    Some(old) if old == value => {}
                    Some(old) => {
                        patch.insert(key.clone(), merge_patch_diff(old, value));
                    }
                    None => {
                        patch.insert(key.clone(), value.clone());
                    }
                }
            }
            for key in current.keys() {
                if !desired.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            Value::Object(patch)
        }
        _ => desired.clone(),
    }
}

impl<D: ExtensionKind> Driver<D> {
    pub fn new(
        descriptor: D,
        store: Arc<dyn ExtensionStore<D::Object>>,
        clock: Arc<dyn Clock>,
        params: WaitParams,
    ) -> Self {
        Self {
            descriptor,
            store,
            clock,
            params,
            metrics: None,
            output: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn descriptor(&self) -> &D {
        &self.descriptor
    }

    pub fn name(&self) -> String {
        self.descriptor.name()
    }

    /// Status extracted by the last successful `wait`.
    pub fn output(&self) -> Option<&D::Output> {
        self.output.as_ref()
    }

    fn record<T>(&self, operation: &str, res: &Result<T>) {
        if let Some(metrics) = &self.metrics {
            metrics.record(&kind::<D>(), operation, res.as_ref().map(|_| ()));
        }
    }

    fn desired(&self, name: &str, operation: Operation) -> D::Object {
        let mut obj = D::Object::from_spec(name, self.descriptor.spec());
        obj.meta_mut().namespace = Some(self.store.namespace().to_string());
        let annotations = obj.annotations_mut();
        annotations.insert(OPERATION_ANNOTATION.to_string(), operation.as_str().to_string());
        annotations.insert(
            TIMESTAMP_ANNOTATION.to_string(),
            format_timestamp(self.clock.now()),
        );
        obj
    }

    /// Create the object, or bring the spec of the existing one up to date, and ask for a reconcile.
    #[instrument(skip(self), fields(kind = %kind::<D>(), name = %self.name(), namespace = %self.store.namespace()))]
    pub async fn deploy(&self) -> Result<D::Object> {
        let res = self.deploy_inner().await;
        self.record("deploy", &res);
        res
    }

    async fn deploy_inner(&self) -> Result<D::Object> {
        let name = self.name();
        match self.store.get(&name).await? {
            None => {
                info!("Creating {} {}/{}", kind::<D>(), self.store.namespace(), name);
                self.store.create(&self.desired(&name, Operation::Reconcile)).await
            }
            Some(current) => {
                let current_spec = serde_json::to_value(current.extension_spec())?;
                let desired_spec = serde_json::to_value(self.descriptor.spec())?;
                let mut patch = operation_patch(Operation::Reconcile, self.clock.now());
                let spec_patch = merge_patch_diff(&current_spec, &desired_spec);
                if spec_patch.as_object().is_some_and(|p| !p.is_empty()) {
                    debug!("Updating spec of {} {}: {}", kind::<D>(), name, spec_patch);
                    patch["spec"] = spec_patch;
                }
                self.store.patch(&name, &patch).await
            }
        }
    }

    /// Confirm and delete the object. A missing object is not an error.
    #[instrument(skip(self), fields(kind = %kind::<D>(), name = %self.name(), namespace = %self.store.namespace()))]
    pub async fn destroy(&self) -> Result<()> {
        let res = stale::delete_by_name(self.store.as_ref(), self.clock.as_ref(), &self.name()).await;
        self.record("destroy", &res);
        res
    }

    /// Wait for the object to become ready and keep what `extract` takes from it.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.output = None;
        let _measure = self.metrics.as_ref().map(|m| m.measure_wait(&kind::<D>(), "wait"));
        let res = wait::wait_until_ready(
            self.store.as_ref(),
            self.clock.as_ref(),
            &self.name(),
            &self.params,
            cancel,
        )
        .await;
        self.record("wait", &res);
        let ready = res?;
        self.output = Some(self.descriptor.extract(&ready));
        Ok(())
    }

    pub async fn wait_cleanup(&self, cancel: &CancellationToken) -> Result<()> {
        let _measure = self
            .metrics
            .as_ref()
            .map(|m| m.measure_wait(&kind::<D>(), "wait_cleanup"));
        let res = wait::wait_until_deleted(
            self.store.as_ref(),
            self.clock.as_ref(),
            &self.name(),
            &self.params,
            cancel,
        )
        .await;
        self.record("wait_cleanup", &res);
        res
    }

    /// Hand the object over for migration. A missing object is not an error.
    #[instrument(skip(self), fields(kind = %kind::<D>(), name = %self.name(), namespace = %self.store.namespace()))]
    pub async fn migrate(&self) -> Result<()> {
        let name = self.name();
        let res = match self
            .store
            .patch(&name, &operation_patch(Operation::Migrate, self.clock.now()))
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!("{} {} does not exist, nothing to migrate", kind::<D>(), name);
                Ok(())
            }
            Err(err) => Err(err),
        };
        self.record("migrate", &res);
        res
    }

    pub async fn wait_migrate(&self, cancel: &CancellationToken) -> Result<()> {
        let _measure = self
            .metrics
            .as_ref()
            .map(|m| m.measure_wait(&kind::<D>(), "wait_migrate"));
        let res = wait::wait_until_migrated(
            self.store.as_ref(),
            self.clock.as_ref(),
            &self.name(),
            &self.params,
            cancel,
        )
        .await;
        self.record("wait_migrate", &res);
        res
    }

    /// Recreate the object from a snapshot and hand it back to its controller.
    ///
    /// A missing object is created in `wait-for-state`, seeded with its state
    /// from `shoot_state` and then flipped to `restore`. An object left in
    /// `wait-for-state` by an interrupted restore continues from the seeding
    /// step, and one already in `restore` is left alone.
    ///
    /// The flip is a plain merge patch on the annotations and is not
    /// conditioned on the version the seeding step produced, so a controller
    /// writing annotations in between would be overwritten.
    #[instrument(skip(self, shoot_state), fields(kind = %kind::<D>(), name = %self.name(), namespace = %self.store.namespace()))]
    pub async fn restore(&self, shoot_state: &ShootState) -> Result<()> {
        let res = self.restore_inner(shoot_state).await;
        self.record("restore", &res);
        res
    }

    async fn restore_inner(&self, shoot_state: &ShootState) -> Result<()> {
        let name = self.name();
        let needs_state = match self.store.get(&name).await? {
            None => {
                info!("Creating {} {} to restore it", kind::<D>(), name);
                self.store
                    .create(&self.desired(&name, Operation::WaitForState))
                    .await?;
                true
            }
            Some(obj) => match obj.operation() {
                Some(Operation::Restore) => {
                    debug!("{} {} is already being restored", kind::<D>(), name);
                    return Ok(());
                }
                Some(Operation::WaitForState) => true,
                _ => false,
            },
        };

        if needs_state {
            let kind_name = kind::<D>();
            match shoot_state
                .find_extension_state(&kind_name, &name, self.descriptor.purpose())
                .and_then(|entry| entry.state.as_ref())
            {
                Some(state) => {
                    self.store
                        .patch_status(&name, &json!({ "status": { "state": state } }))
                        .await?;
                }
                None => debug!("No persisted state for {} {}", kind_name, name),
            }
        }

        self.store
            .patch(&name, &operation_patch(Operation::Restore, self.clock.now()))
            .await?;
        Ok(())
    }

    /// Output of the last `wait`, or an error naming what is missing.
    pub fn require_output(&self) -> Result<&D::Output> {
        self.output
            .as_ref()
            .ok_or_else(|| DriverError::MissingField(format!("status of {} {}", kind::<D>(), self.name())))
    }
}

//! Multi-resource driver.
//!
//! Deploy, wait and restore fan out over one `Driver` per configured unit.
//! Migrate, destroy and their waits work on whatever objects of the kind exist
//! in the namespace, found with a single list call.
use crate::{
    apis::{
        extension::{operation_patch, Extension, Operation},
        shoot_state::ShootState,
    },
    clock::Clock,
    config::WaitParams,
    driver::{Driver, ExtensionKind},
    flow::{self, Task},
    metrics::Metrics,
    stale,
    store::ExtensionStore,
    wait, Result,
};
use futures::FutureExt;
use kube::{Resource, ResourceExt};
use std::{collections::BTreeSet, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

pub struct MultiDriver<D: ExtensionKind> {
    drivers: Vec<Driver<D>>,
    store: Arc<dyn ExtensionStore<D::Object>>,
    clock: Arc<dyn Clock>,
    params: WaitParams,
    metrics: Option<Metrics>,
}

fn kind<D: ExtensionKind>() -> String {
    D::Object::kind(&()).to_string()
}

impl<D: ExtensionKind> MultiDriver<D> {
    pub fn new(
        descriptors: Vec<D>,
        store: Arc<dyn ExtensionStore<D::Object>>,
        clock: Arc<dyn Clock>,
        params: WaitParams,
    ) -> Self {
        let drivers = descriptors
            .into_iter()
            .map(|descriptor| Driver::new(descriptor, store.clone(), clock.clone(), params))
            .collect();
        Self {
            drivers,
            store,
            clock,
            params,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.drivers = self
            .drivers
            .into_iter()
            .map(|driver| driver.with_metrics(metrics.clone()))
            .collect();
        self.metrics = Some(metrics);
        self
    }

    pub fn drivers(&self) -> &[Driver<D>] {
        &self.drivers
    }

    /// Keys of the configured units, recomputed on every call.
    pub fn wanted_keys(&self) -> BTreeSet<String> {
        self.drivers.iter().map(|d| d.descriptor().key()).collect()
    }

    fn record(&self, operation: &str, res: &Result<()>) {
        if let Some(metrics) = &self.metrics {
            metrics.record(&kind::<D>(), operation, res.as_ref().copied());
        }
    }

    /// Deploy every unit. A failing unit does not stop the others.
    #[instrument(skip(self, cancel), fields(kind = %kind::<D>(), namespace = %self.store.namespace()))]
    pub async fn deploy(&self, cancel: &CancellationToken) -> Result<()> {
        let tasks: Vec<Task<'_>> = self
            .drivers
            .iter()
            .map(|driver| {
                Task::new(driver.name(), move |_| {
                    async move { driver.deploy().await.map(|_| ()) }.boxed()
                })
            })
            .collect();
        flow::run_best_effort(tasks, cancel).await
    }

    /// Wait for every unit. The first failure cancels the other waits.
    #[instrument(skip(self, cancel), fields(kind = %kind::<D>(), namespace = %self.store.namespace()))]
    pub async fn wait(&mut self, cancel: &CancellationToken) -> Result<()> {
        let tasks: Vec<Task<'_>> = self
            .drivers
            .iter_mut()
            .map(|driver| {
                let key = driver.name();
                Task::new(key, move |token| async move { driver.wait(&token).await }.boxed())
            })
            .collect();
        flow::run_exit_on_first_error(tasks, cancel).await
    }

    /// Restore every unit from `shoot_state`. A failing unit does not stop the others.
    #[instrument(skip(self, shoot_state, cancel), fields(kind = %kind::<D>(), namespace = %self.store.namespace()))]
    pub async fn restore(&self, shoot_state: &ShootState, cancel: &CancellationToken) -> Result<()> {
        let tasks: Vec<Task<'_>> = self
            .drivers
            .iter()
            .map(|driver| {
                Task::new(driver.name(), move |_| {
                    async move { driver.restore(shoot_state).await }.boxed()
                })
            })
            .collect();
        flow::run_best_effort(tasks, cancel).await
    }

    async fn names(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .list(None)
            .await?
            .iter()
            .map(ResourceExt::name_any)
            .collect())
    }

    /// Hand every existing object of the kind over for migration.
    #[instrument(skip(self, cancel), fields(kind = %kind::<D>(), namespace = %self.store.namespace()))]
    pub async fn migrate(&self, cancel: &CancellationToken) -> Result<()> {
        let res = self.migrate_inner(cancel).await;
        self.record("migrate", &res);
        res
    }

    async fn migrate_inner(&self, cancel: &CancellationToken) -> Result<()> {
        let store = self.store.as_ref();
        let clock = self.clock.as_ref();
        let objects = store.list(None).await?;
        let tasks: Vec<Task<'_>> = objects
            .iter()
            .filter(|obj| {
                if obj.is_terminating() {
                    debug!("{} {} is terminating, not migrating it", kind::<D>(), obj.name_any());
                }
                !obj.is_terminating()
            })
            .map(|obj| {
                let name = obj.name_any();
                Task::new(name.clone(), move |_| {
                    async move {
                        match store
                            .patch(&name, &operation_patch(Operation::Migrate, clock.now()))
                            .await
                        {
                            Err(err) if !err.is_not_found() => Err(err),
                            _ => Ok(()),
                        }
                    }
                    .boxed()
                })
            })
            .collect();
        flow::run_best_effort(tasks, cancel).await
    }

    /// Wait until every existing object of the kind acknowledged its migration.
    pub async fn wait_migrate(&self, cancel: &CancellationToken) -> Result<()> {
        let res = self.wait_all("wait_migrate", cancel).await;
        self.record("wait_migrate", &res);
        res
    }

    /// Delete every object of the kind, configured or not.
    #[instrument(skip(self), fields(kind = %kind::<D>(), namespace = %self.store.namespace()))]
    pub async fn destroy(&self) -> Result<()> {
        let res =
            stale::delete_stale_resources(self.store.as_ref(), self.clock.as_ref(), &BTreeSet::new())
                .await;
        self.record("destroy", &res);
        res
    }

    /// Wait until every object of the kind is gone.
    pub async fn wait_cleanup(&self, cancel: &CancellationToken) -> Result<()> {
        let res = self.wait_all("wait_cleanup", cancel).await;
        self.record("wait_cleanup", &res);
        res
    }

    /// Delete the objects that no configured unit asks for anymore.
    pub async fn delete_stale_resources(&self) -> Result<()> {
        let wanted = self.wanted_keys();
        info!("Pruning {} objects not in {:?}", kind::<D>(), wanted);
        let res = stale::delete_stale_resources(self.store.as_ref(), self.clock.as_ref(), &wanted).await;
        self.record("delete_stale", &res);
        res
    }

    async fn wait_all(&self, operation: &str, cancel: &CancellationToken) -> Result<()> {
        let store = self.store.as_ref();
        let clock = self.clock.as_ref();
        let params = &self.params;
        let _measure = self
            .metrics
            .as_ref()
            .map(|m| m.measure_wait(&kind::<D>(), operation));
        let cleanup = operation == "wait_cleanup";
        let tasks: Vec<Task<'_>> = self
            .names()
            .await?
            .into_iter()
            .map(|name| {
                Task::new(name.clone(), move |token| {
                    async move {
                        if cleanup {
                            wait::wait_until_deleted(store, clock, &name, params, &token).await
                        } else {
                            wait::wait_until_migrated(store, clock, &name, params, &token).await
                        }
                    }
                    .boxed()
                })
            })
            .collect();
        flow::run_exit_on_first_error(tasks, cancel).await
    }
}

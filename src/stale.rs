//! Pruning of extension objects that no longer match any configured unit.
use crate::{
    apis::extension::{deletion_confirmation_patch, Extension},
    clock::Clock,
    store::ExtensionStore,
    Result,
};
use kube::ResourceExt;
use std::collections::BTreeSet;
use tracing::{debug, info, instrument, warn};

/// Mark `name` as intentionally deleted, then delete it.
///
/// A missing object is not an error. Objects already terminating are not
/// re-annotated but the delete is issued again.
pub async fn delete_confirmed<K: Extension>(
    store: &dyn ExtensionStore<K>,
    clock: &dyn Clock,
    obj: &K,
) -> Result<()> {
    let name = obj.name_any();
    if obj.is_terminating() {
        debug!("{} {} is already terminating", K::kind(&()), name);
    } else {
        match store.patch(&name, &deletion_confirmation_patch(clock.now())).await {
            Err(err) if err.is_not_found() => return Ok(()),
            res => {
                res?;
            }
        }
    }
    match store.delete(&name).await {
        Err(err) if err.is_not_found() => Ok(()),
        res => res,
    }
}

/// Delete by name, fetching the object first so a missing one is a no-op.
pub async fn delete_by_name<K: Extension>(
    store: &dyn ExtensionStore<K>,
    clock: &dyn Clock,
    name: &str,
) -> Result<()> {
    match store.get(name).await? {
        Some(obj) => delete_confirmed(store, clock, &obj).await,
        None => {
            debug!("{} {} is already gone", K::kind(&()), name);
            Ok(())
        }
    }
}

/// Delete every object whose stale key is not in `wanted`.
///
/// All deletions are attempted, the first failure is returned.
#[instrument(skip(store, clock, wanted), fields(kind = %K::kind(&()), namespace = %store.namespace()))]
pub async fn delete_stale_resources<K: Extension>(
    store: &dyn ExtensionStore<K>,
    clock: &dyn Clock,
    wanted: &BTreeSet<String>,
) -> Result<()> {
    let mut first_err = None;
    for obj in store.list(None).await? {
        let key = obj.stale_key();
        if wanted.contains(&key) {
            continue;
        }
        info!("Deleting stale {} {} (key {})", K::kind(&()), obj.name_any(), key);
        if let Err(err) = delete_confirmed(store, clock, &obj).await {
            warn!("Failed to delete stale {} {}: {}", K::kind(&()), obj.name_any(), err);
            first_err.get_or_insert(err);
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        apis::{
            containerruntime::{container_runtime_key, ContainerRuntime, ContainerRuntimeSpec},
            extension::DELETION_CONFIRMATION_ANNOTATION,
        },
        clock::SystemClock,
        fixtures::{FakeStore, StoreOp},
    };

    fn runtime(runtime_type: &str, pool: &str) -> ContainerRuntime {
        let mut spec = ContainerRuntimeSpec::default();
        spec.default_spec.type_ = runtime_type.to_string();
        spec.worker_pool.name = pool.to_string();
        ContainerRuntime::new(&container_runtime_key(runtime_type, pool), spec)
    }

    fn store() -> std::sync::Arc<FakeStore<ContainerRuntime>> {
        let store = FakeStore::new("shoot--dev--a");
        for runtime_type in ["a", "b", "c"] {
            store.insert(runtime(runtime_type, "w1"));
        }
        store
    }

    #[tokio::test]
    async fn test_deletes_exactly_the_unwanted_keys() {
        let store = store();
        let wanted = BTreeSet::from(["b-w1".to_string()]);
        delete_stale_resources(store.as_ref(), &SystemClock, &wanted)
            .await
            .expect("pruned");
        assert_eq!(store.names(), vec!["b-w1".to_string()]);

        let mut deleted: Vec<_> = store
            .writes()
            .into_iter()
            .filter_map(|op| match op {
                StoreOp::Delete(name) => Some(name),
                _ => None,
            })
            .collect();
        deleted.sort();
        assert_eq!(deleted, vec!["a-w1".to_string(), "c-w1".to_string()]);
    }

    #[tokio::test]
    async fn test_confirmation_is_written_before_delete() {
        let store = store();
        delete_stale_resources(store.as_ref(), &SystemClock, &BTreeSet::new())
            .await
            .expect("everything deleted");
        let writes = store.writes();
        assert_eq!(writes.len(), 6);
        for pair in writes.chunks(2) {
            match (&pair[0], &pair[1]) {
                (StoreOp::Patch { name, patch }, StoreOp::Delete(deleted)) => {
                    assert_eq!(name, deleted);
                    assert_eq!(
                        patch["metadata"]["annotations"][DELETION_CONFIRMATION_ANNOTATION],
                        "true"
                    );
                }
                other => panic!("expected confirmation then delete, got {other:?}"),
            }
        }
        assert!(store.names().is_empty());
    }

    #[tokio::test]
    async fn test_one_stuck_object_does_not_block_the_rest() {
        let store = store();
        store.fail("delete", "a-w1");
        let err = delete_stale_resources(store.as_ref(), &SystemClock, &BTreeSet::new())
            .await
            .expect_err("a-w1 cannot be deleted");
        assert_eq!(err.metric_label(), "kube");
        assert_eq!(store.names(), vec!["a-w1".to_string()]);
    }

    #[tokio::test]
    async fn test_terminating_objects_are_deleted_again_without_confirmation() {
        let store = store();
        store.update("a-w1", |cr| cr.finalizers_mut().push("extensions.tembo.io/runtime".to_string()));
        store.delete("a-w1").await.expect("marked for deletion");
        store.clear_ops();

        let wanted = BTreeSet::from(["b-w1".to_string(), "c-w1".to_string()]);
        delete_stale_resources(store.as_ref(), &SystemClock, &wanted)
            .await
            .expect("pruned");
        assert_eq!(store.writes(), vec![StoreOp::Delete("a-w1".to_string())]);
        assert!(store.object("a-w1").is_some_and(|cr| cr.is_terminating()));
    }

    #[tokio::test]
    async fn test_delete_by_name_ignores_missing_objects() {
        let store = FakeStore::<ContainerRuntime>::new("shoot--dev--a");
        delete_by_name(store.as_ref(), &SystemClock, "gvisor-w1")
            .await
            .expect("nothing to delete");
        assert!(store.writes().is_empty());
    }
}

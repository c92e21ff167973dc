//! Poll engine.
//!
//! Every wait fetches the object, classifies it and then decides whether it is
//! done, has failed, or should be fetched again after `interval`. Cancellation is
//! checked on every wake-up and also interrupts an in-flight fetch.
use crate::{
    apis::extension::Extension,
    clock::Clock,
    config::WaitParams,
    errors::DriverError,
    status::{classify, ExtensionState},
    store::{not_found, ExtensionStore},
    Result,
};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Floor for the poll interval, a zero interval would hammer the API server.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

// far enough away to never fire, close enough to not overflow `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// What a wait does with the state it just observed.
pub enum Step<T> {
    Done(T),
    Fail(DriverError),
    Continue,
}

/// First time the poll engine saw the error the controller currently reports.
///
/// Keyed by the error description, so a different error restarts the clock and
/// a cleared error forgets it.
#[derive(Default)]
struct FirstSeen(Option<(String, DateTime<Utc>)>);

impl FirstSeen {
    fn observe(&mut self, description: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        match &self.0 {
            Some((seen, at)) if seen == description => *at,
            _ => {
                self.0 = Some((description.to_string(), now));
                now
            }
        }
    }

    fn reset(&mut self) {
        self.0 = None;
    }
}

fn describe<K: Extension>(state: &ExtensionState, obj: Option<&K>) -> String {
    match obj {
        Some(obj) if obj.is_terminating() => format!("{state} (terminating)"),
        _ => state.to_string(),
    }
}

fn cancelled<K: Extension>(name: &str) -> DriverError {
    DriverError::Cancelled {
        kind: K::kind(&()).to_string(),
        name: name.to_string(),
    }
}

fn timed_out<K: Extension>(
    name: &str,
    params: &WaitParams,
    last_observed: String,
    last_error: Option<DriverError>,
) -> DriverError {
    warn!(
        "Timed out after {:?} waiting for {} {}, last observed: {}",
        params.timeout,
        K::kind(&()),
        name,
        last_observed
    );
    DriverError::Timeout {
        kind: K::kind(&()).to_string(),
        name: name.to_string(),
        timeout: params.timeout,
        last_observed,
        last_error: last_error
            .filter(|e| matches!(e, DriverError::RetryableReconcile { .. }))
            .map(Box::new),
    }
}

pub(crate) fn reconcile_error<K: Extension>(name: &str, state: &ExtensionState) -> Option<DriverError> {
    let kind = K::kind(&()).to_string();
    let name = name.to_string();
    match state {
        ExtensionState::RetryableError(Some(err)) => Some(DriverError::RetryableReconcile {
            kind,
            name,
            description: err.description.clone(),
            codes: err.codes.clone(),
        }),
        ExtensionState::SevereError(err) => Some(DriverError::SevereReconcile {
            kind,
            name,
            description: err.description.clone(),
            codes: err.codes.clone(),
        }),
        ExtensionState::MigrationFailed(err) => Some(DriverError::MigrationFailed {
            kind,
            name,
            description: err
                .as_ref()
                .map(|e| e.description.clone())
                .unwrap_or_else(|| "no error reported".to_string()),
        }),
        _ => None,
    }
}

/// Poll `name` until `step` is done with it, fails, or `params.timeout` runs out.
///
/// The deadline also bounds a fetch that is still in flight. In that case the
/// timeout reports the state seen by the previous poll.
pub async fn wait_until<K, T>(
    store: &dyn ExtensionStore<K>,
    clock: &dyn Clock,
    name: &str,
    params: &WaitParams,
    cancel: &CancellationToken,
    mut step: impl FnMut(&ExtensionState, Option<K>) -> Step<T>,
) -> Result<T>
where
    K: Extension,
{
    let start = Instant::now();
    let deadline = start
        .checked_add(params.timeout)
        .unwrap_or_else(|| start + FAR_FUTURE);
    let interval = params.interval.max(MIN_POLL_INTERVAL);
    let mut first_seen = FirstSeen::default();
    let mut last_observed = "not yet observed".to_string();
    let mut last_error = None;
    loop {
        if cancel.is_cancelled() {
            return Err(cancelled::<K>(name));
        }
        let obj = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled::<K>(name)),
            res = store.get(name) => res?,
            _ = tokio::time::sleep_until(deadline) => {
                return Err(timed_out::<K>(name, params, last_observed, last_error));
            }
        };

        let now = clock.now();
        let mut state = classify(obj.as_ref(), now, params.severe_threshold, None);
        if let ExtensionState::RetryableError(Some(err)) = &state {
            let seen = first_seen.observe(&err.description, now);
            state = classify(obj.as_ref(), now, params.severe_threshold, Some(seen));
        } else if !matches!(state, ExtensionState::SevereError(_)) {
            first_seen.reset();
        }
        last_observed = describe(&state, obj.as_ref());
        last_error = reconcile_error::<K>(name, &state);
        debug!("{} {} is {}", K::kind(&()), name, last_observed);

        match step(&state, obj) {
            Step::Done(done) => return Ok(done),
            Step::Fail(err) => return Err(err),
            Step::Continue => {}
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out::<K>(name, params, last_observed, last_error));
        }
        let pause = interval.min(deadline - now);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled::<K>(name)),
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

/// Wait for the external controller to converge `name`, returning the ready object.
#[instrument(skip(store, clock, params, cancel), fields(kind = %K::kind(&()), namespace = %store.namespace()))]
pub async fn wait_until_ready<K: Extension>(
    store: &dyn ExtensionStore<K>,
    clock: &dyn Clock,
    name: &str,
    params: &WaitParams,
    cancel: &CancellationToken,
) -> Result<K> {
    let namespace = store.namespace().to_string();
    wait_until(store, clock, name, params, cancel, |state, obj| match (state, obj) {
        (ExtensionState::Ready, Some(obj)) => {
            info!("{} {}/{} is ready", K::kind(&()), namespace, name);
            Step::Done(obj)
        }
        (ExtensionState::Absent, _) | (_, None) => Step::Fail(not_found::<K>(&namespace, name)),
        (ExtensionState::SevereError(_), _) => match reconcile_error::<K>(name, state) {
            Some(err) => {
                warn!("Giving up on {} {}/{}: {}", K::kind(&()), namespace, name, err);
                Step::Fail(err)
            }
            None => Step::Continue,
        },
        _ => Step::Continue,
    })
    .await
}

/// Wait until `name` is gone from the store. An absent object is success.
#[instrument(skip(store, clock, params, cancel), fields(kind = %K::kind(&()), namespace = %store.namespace()))]
pub async fn wait_until_deleted<K: Extension>(
    store: &dyn ExtensionStore<K>,
    clock: &dyn Clock,
    name: &str,
    params: &WaitParams,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut reported_terminating = false;
    wait_until(store, clock, name, params, cancel, |state, obj| match obj {
        None => Step::Done(()),
        Some(obj) => {
            if obj.is_terminating() && !reported_terminating {
                info!(
                    "{} {} is terminating, waiting for its finalizers ({})",
                    K::kind(&()),
                    name,
                    state
                );
                reported_terminating = true;
            }
            Step::Continue
        }
    })
    .await
}

/// Wait for the external controller to acknowledge a migration of `name`.
///
/// An absent object counts as migrated.
#[instrument(skip(store, clock, params, cancel), fields(kind = %K::kind(&()), namespace = %store.namespace()))]
pub async fn wait_until_migrated<K: Extension>(
    store: &dyn ExtensionStore<K>,
    clock: &dyn Clock,
    name: &str,
    params: &WaitParams,
    cancel: &CancellationToken,
) -> Result<()> {
    wait_until(store, clock, name, params, cancel, |state, _| match state {
        ExtensionState::MigrationSucceeded | ExtensionState::Absent => Step::Done(()),
        ExtensionState::MigrationFailed(_) => match reconcile_error::<K>(name, state) {
            Some(err) => Step::Fail(err),
            None => Step::Continue,
        },
        _ => Step::Continue,
    })
    .await
}

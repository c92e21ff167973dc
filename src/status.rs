use crate::apis::extension::{
    Extension, LastError, LastOperation, LastOperationState, LastOperationType, Operation,
};
use chrono::{DateTime, Utc};
use kube::Resource;
use std::{fmt, time::Duration};

/// What a freshly fetched extension object says about its external controller.
#[derive(Clone, Debug, PartialEq)]
pub enum ExtensionState {
    /// The object does not exist.
    Absent,
    Ready,
    Processing,
    /// The controller reported an error recently, or has not picked up the object yet (`None`).
    RetryableError(Option<LastError>),
    /// The controller has been reporting the same error for longer than the severe threshold.
    SevereError(LastError),
    MigrationSucceeded,
    MigrationFailed(Option<LastError>),
}

impl fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionState::Absent => f.write_str("absent"),
            ExtensionState::Ready => f.write_str("ready"),
            ExtensionState::Processing => f.write_str("processing"),
            ExtensionState::RetryableError(None) => f.write_str("not yet picked up"),
            ExtensionState::RetryableError(Some(err)) => write!(f, "error: {}", err.description),
            ExtensionState::SevereError(err) => write!(f, "severe error: {}", err.description),
            ExtensionState::MigrationSucceeded => f.write_str("migration succeeded"),
            ExtensionState::MigrationFailed(None) => f.write_str("migration failed"),
            ExtensionState::MigrationFailed(Some(err)) => {
                write!(f, "migration failed: {}", err.description)
            }
        }
    }
}

/// Classify an object fetched from the store.
///
/// `error_first_seen` is the time the caller first observed the current error
/// itself. It is only consulted when the controller did not record when the
/// error first appeared, and it must never be derived from the timestamp
/// annotation, which is refreshed on every write.
pub fn classify<K: Extension>(
    obj: Option<&K>,
    now: DateTime<Utc>,
    severe_threshold: Duration,
    error_first_seen: Option<DateTime<Utc>>,
) -> ExtensionState {
    let Some(obj) = obj else {
        return ExtensionState::Absent;
    };
    let status = obj.default_status();
    let last_operation = status.and_then(|s| s.last_operation.as_ref());
    let last_error = status.and_then(|s| s.last_error.as_ref());

    if let Some(op) = last_operation {
        if op.type_ == LastOperationType::Migrate {
            return match op.state {
                LastOperationState::Succeeded => ExtensionState::MigrationSucceeded,
                LastOperationState::Error | LastOperationState::Failed => {
                    ExtensionState::MigrationFailed(last_error.cloned())
                }
                LastOperationState::Processing => ExtensionState::Processing,
            };
        }
    }

    if let Some(err) = last_error {
        return escalate(err.clone(), now, severe_threshold, error_first_seen);
    }

    let Some(op) = last_operation else {
        // freshly created, the controller has not written anything yet
        return ExtensionState::RetryableError(None);
    };

    match op.state {
        LastOperationState::Processing => ExtensionState::Processing,
        LastOperationState::Error => escalate(
            error_from_operation(op),
            now,
            severe_threshold,
            error_first_seen,
        ),
        LastOperationState::Failed => ExtensionState::SevereError(error_from_operation(op)),
        LastOperationState::Succeeded if is_pending(obj) => ExtensionState::Processing,
        LastOperationState::Succeeded => ExtensionState::Ready,
    }
}

fn escalate(
    err: LastError,
    now: DateTime<Utc>,
    severe_threshold: Duration,
    error_first_seen: Option<DateTime<Utc>>,
) -> ExtensionState {
    let first_observed = err.first_observed_at.or(error_first_seen).unwrap_or(now);
    let elapsed = (now - first_observed).to_std().unwrap_or_default();
    if elapsed > severe_threshold {
        ExtensionState::SevereError(err)
    } else {
        ExtensionState::RetryableError(Some(err))
    }
}

fn error_from_operation(op: &LastOperation) -> LastError {
    LastError {
        description: op
            .description
            .clone()
            .unwrap_or_else(|| format!("last {:?} operation ended in {:?}", op.type_, op.state)),
        codes: vec![],
        first_observed_at: None,
    }
}

// A succeeded last operation only counts once the controller has seen the latest
// spec and has consumed the operation annotation we wrote.
fn is_pending<K: Extension>(obj: &K) -> bool {
    let generation = obj.meta().generation;
    let observed = obj.default_status().and_then(|s| s.observed_generation);
    if let (Some(generation), Some(observed)) = (generation, observed) {
        if observed < generation {
            return true;
        }
    }
    matches!(
        obj.operation(),
        Some(Operation::Reconcile | Operation::Restore | Operation::WaitForState)
    )
}

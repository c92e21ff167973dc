use std::{fmt, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    /// the object does not exist in the store
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// the external controller reported an error that has not yet persisted past the severe threshold
    #[error("{kind} {name} reported a retryable error: {description}")]
    RetryableReconcile {
        kind: String,
        name: String,
        description: String,
        codes: Vec<String>,
    },

    /// the external controller kept reporting the same error for longer than the severe threshold
    #[error("{kind} {name} reported a severe error: {description}")]
    SevereReconcile {
        kind: String,
        name: String,
        description: String,
        codes: Vec<String>,
    },

    /// `last_error` holds the retryable error the controller was reporting when time ran out
    #[error("timed out after {timeout:?} waiting for {kind} {name}, last observed: {last_observed}")]
    Timeout {
        kind: String,
        name: String,
        timeout: Duration,
        last_observed: String,
        #[source]
        last_error: Option<Box<DriverError>>,
    },

    #[error("waiting for {kind} {name} was cancelled")]
    Cancelled { kind: String, name: String },

    #[error("migration of {kind} {name} failed: {description}")]
    MigrationFailed {
        kind: String,
        name: String,
        description: String,
    },

    /// a fetched object did not decode into the kind the caller asked for
    #[error("expected {expected} but the store returned {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("{0} is not set")]
    MissingField(String),

    #[error("{0}")]
    Aggregate(ErrorList),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl DriverError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            DriverError::NotFound { .. } => "not_found",
            DriverError::RetryableReconcile { .. } => "retryable_reconcile",
            DriverError::SevereReconcile { .. } => "severe_reconcile",
            DriverError::Timeout { .. } => "timeout",
            DriverError::Cancelled { .. } => "cancelled",
            DriverError::MigrationFailed { .. } => "migration_failed",
            DriverError::TypeMismatch { .. } => "type_mismatch",
            DriverError::MissingField(_) => "missing_field",
            DriverError::Aggregate(_) => "aggregate",
            DriverError::KubeError(_) => "kube",
            DriverError::SerializationError(_) => "serialization",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::NotFound { .. })
    }

    pub fn is_severe(&self) -> bool {
        matches!(self, DriverError::SevereReconcile { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DriverError::Cancelled { .. })
    }
}

/// Errors collected from a fan-out, each tagged with the key of the unit that produced it.
#[derive(Debug, Default)]
pub struct ErrorList(pub Vec<(String, DriverError)>);

impl ErrorList {
    pub fn push(&mut self, key: impl Into<String>, err: DriverError) {
        self.0.push((key.into(), err));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(key, _)| key.as_str())
    }

    pub fn get(&self, key: &str) -> Option<&DriverError> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, err)| err)
    }

    pub fn into_result(self) -> Result<(), DriverError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DriverError::Aggregate(self))
        }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.0.len())?;
        for (key, err) in &self.0 {
            write!(f, " [{key}: {err}]")?;
        }
        Ok(())
    }
}

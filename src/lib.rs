//! Client side of the extension resource protocol.
//!
//! Extension resources are custom objects reconciled by out-of-process
//! controllers. This crate writes their desired state, waits for those
//! controllers to converge, migrates them away from a host cluster and
//! restores them on another one, and prunes the ones no longer configured.
pub mod apis;

pub mod clock;
pub mod config;
pub mod driver;
pub mod errors;
pub mod flow;
pub mod kinds;
pub mod multi;
pub mod stale;
pub mod status;
pub mod store;
pub mod wait;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;
pub use metrics::{Metrics, WaitMeasurer};

#[cfg(test)]
pub mod fixtures;

pub use driver::{Driver, ExtensionKind};
pub use errors::DriverError;
pub use multi::MultiDriver;
pub use store::{ExtensionStore, KubeStore};

pub type Result<T, E = DriverError> = std::result::Result<T, E>;

//! Kind descriptors for the extension resources the driver manages.
pub mod containerruntime;
pub mod controlplane;
pub mod infrastructure;

pub use containerruntime::{ContainerRuntimeDescriptor, ContainerRuntimeValues, WorkerPool};
pub use controlplane::ControlPlaneValues;
pub use infrastructure::{InfrastructureOutput, InfrastructureValues};

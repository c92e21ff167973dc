pub mod containerruntime;
pub mod controlplane;
pub mod extension;
pub mod infrastructure;
pub mod shoot_state;

/// Runtime plumbing shared by the registry and the consoles:
/// - Port change notification bus
/// - Pooled worker spawning
pub mod bus;
pub mod task_manager;

pub use bus::{Bus, PortsEvent};
pub use task_manager::spawn_pooled;

pub mod connection;
pub mod port_status;
pub mod presentation;
pub mod registry;

pub use connection::{Connection, DataListener, LineListener};
pub use port_status::PortStatus;
pub use presentation::{presentation, StatusPresentation};
pub use registry::{PollerHandle, PortRegistry, PortSnapshot, RegistryConfig};

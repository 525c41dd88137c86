//! Physical port access contract.
//!
//! A [`Driver`] enumerates ports and hands out [`DriverPort`] handles. Data
//! and line-state changes arrive on driver-owned threads through a
//! [`PortListener`]; implementations must not assume the listener is cheap
//! to block on, and listeners must not block the driver.

mod loopback;

pub use loopback::{LoopbackDriver, LoopbackPort};

use std::sync::Arc;

use crate::protocol::{error::DriverError, profile::Profile};

/// Callbacks invoked by an open port. Every method defaults to a no-op.
pub trait PortListener: Send + Sync {
    fn on_data_received(&self, _data: &[u8]) {}
    fn on_cts_changed(&self, _level: bool) {}
    fn on_dsr_changed(&self, _level: bool) {}
}

/// A handle to one named port. Owned exclusively by a connection while open.
pub trait DriverPort: Send {
    fn system_name(&self) -> &str;

    /// Human-readable name, best effort.
    fn descriptive_name(&self) -> Option<String>;

    /// Apply line parameters and control line levels, then open the port.
    fn connect(
        &mut self,
        profile: &Profile,
        listener: Arc<dyn PortListener>,
        rts: bool,
        dtr: bool,
    ) -> Result<(), DriverError>;

    fn disconnect(&mut self) -> Result<(), DriverError>;

    fn write(&mut self, data: &[u8]) -> Result<usize, DriverError>;

    fn set_rts(&mut self, level: bool) -> Result<(), DriverError>;
    fn set_dtr(&mut self, level: bool) -> Result<(), DriverError>;

    fn cts(&mut self) -> Result<bool, DriverError>;
    fn dsr(&mut self) -> Result<bool, DriverError>;
}

pub trait Driver: Send + Sync {
    /// Names of the ports currently present, in no particular order.
    fn scan_available_ports(&self) -> Result<Vec<String>, DriverError>;

    fn create_port(&self, name: &str) -> Result<Box<dyn DriverPort>, DriverError>;

    fn descriptive_name(&self, name: &str) -> Option<String> {
        self.create_port(name)
            .ok()
            .and_then(|port| port.descriptive_name())
    }
}

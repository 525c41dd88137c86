use std::sync::{
    atomic::{AtomicBool, AtomicU8, Ordering},
    Arc, Weak,
};

use parking_lot::{Mutex, RwLock};

use super::{registry::PortRegistry, PortStatus};
use crate::{
    core::bus::Bus,
    protocol::{
        driver::{Driver, DriverPort, PortListener},
        error::{DriverError, MonitorError},
        profile::Profile,
    },
};

pub type DataListener = Arc<dyn Fn(&[u8]) + Send + Sync>;
pub type LineListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Single-slot listener table handed to the driver on connect.
///
/// The slots are re-read on every callback, so registering a new listener
/// takes effect immediately, even on an open port.
#[derive(Default)]
struct ListenerSlots {
    data: RwLock<Option<DataListener>>,
    cts: RwLock<Option<LineListener>>,
    dsr: RwLock<Option<LineListener>>,
}

impl PortListener for ListenerSlots {
    fn on_data_received(&self, data: &[u8]) {
        let listener = self.data.read().clone();
        if let Some(listener) = listener {
            listener(data);
        }
    }

    fn on_cts_changed(&self, level: bool) {
        let listener = self.cts.read().clone();
        if let Some(listener) = listener {
            listener(level);
        }
    }

    fn on_dsr_changed(&self, level: bool) {
        let listener = self.dsr.read().clone();
        if let Some(listener) = listener {
            listener(level);
        }
    }
}

/// The state machine bound to one port name.
///
/// Instances are created by [`PortRegistry::new_connection`]. Every method
/// takes `&self` so that pooled workers, the poll thread and the UI can share
/// one `Arc<Connection>`.
pub struct Connection {
    port_name: String,
    driver: Arc<dyn Driver>,
    bus: Arc<Bus>,
    registry: Weak<PortRegistry>,

    status: AtomicU8,
    handle: Mutex<Option<Box<dyn DriverPort>>>,
    listeners: Arc<ListenerSlots>,

    rts: AtomicBool,
    dtr: AtomicBool,
    local_echo: AtomicBool,
    disposed: AtomicBool,
}

impl Connection {
    pub(super) fn new(
        port_name: &str,
        driver: Arc<dyn Driver>,
        bus: Arc<Bus>,
        registry: Weak<PortRegistry>,
    ) -> Self {
        Self {
            port_name: port_name.to_string(),
            driver,
            bus,
            registry,
            status: AtomicU8::new(PortStatus::Disconnected.into()),
            handle: Mutex::new(None),
            listeners: Arc::new(ListenerSlots::default()),
            rts: AtomicBool::new(true),
            dtr: AtomicBool::new(true),
            local_echo: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn status(&self) -> PortStatus {
        PortStatus::try_from(self.status.load(Ordering::Acquire))
            .unwrap_or(PortStatus::UnavailableDisconnected)
    }

    /// Overwrite the status without notifying. Used by the registry during
    /// reconciliation and by drivers that report a busy port.
    pub fn set_status(&self, status: PortStatus) {
        self.status.store(status.into(), Ordering::Release);
    }

    /// Swap `from` for `to` only if the status still is `from`. Returns
    /// whether the swap happened.
    pub fn set_status_if(&self, from: PortStatus, to: PortStatus) -> bool {
        self.status
            .compare_exchange(from.into(), to.into(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn transition(&self, status: PortStatus) {
        self.set_status(status);
        log::debug!("{}: status -> {status}", self.port_name);
        self.bus.publish();
    }

    pub fn is_open(&self) -> bool {
        self.handle.lock().is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn set_data_listener(&self, listener: Option<DataListener>) {
        *self.listeners.data.write() = listener;
    }

    pub fn set_cts_listener(&self, listener: Option<LineListener>) {
        *self.listeners.cts.write() = listener;
    }

    pub fn set_dsr_listener(&self, listener: Option<LineListener>) {
        *self.listeners.dsr.write() = listener;
    }

    pub fn local_echo(&self) -> bool {
        self.local_echo.load(Ordering::Acquire)
    }

    pub fn set_local_echo(&self, enabled: bool) {
        self.local_echo.store(enabled, Ordering::Release);
    }

    /// Open the port with `profile`.
    ///
    /// Cached RTS/DTR levels and the listener table are handed to the driver
    /// before the physical open. On failure the half-open handle is closed
    /// and the connection ends up in `UnavailableDisconnected`.
    pub fn connect(&self, profile: &Profile) -> Result<(), MonitorError> {
        if self.is_disposed() {
            log::debug!("{}: connect ignored, connection disposed", self.port_name);
            return Ok(());
        }

        self.set_status(PortStatus::Connecting);
        self.set_local_echo(profile.local_echo);

        let mut port = match self.driver.create_port(&self.port_name) {
            Ok(port) => port,
            Err(cause) => return Err(self.fail_open(cause)),
        };
        self.bus.publish();

        let listener: Arc<dyn PortListener> = self.listeners.clone();
        if let Err(cause) = port.connect(
            profile,
            listener,
            self.rts.load(Ordering::Acquire),
            self.dtr.load(Ordering::Acquire),
        ) {
            if let Err(err) = port.disconnect() {
                log::debug!("{}: cleanup after failed open: {err}", self.port_name);
            }
            return Err(self.fail_open(cause));
        }

        let mut handle = self.handle.lock();
        if self.is_disposed() {
            drop(handle);
            if let Err(err) = port.disconnect() {
                log::debug!("{}: closing handle opened after dispose: {err}", self.port_name);
            }
            self.transition(PortStatus::Disconnected);
            log::info!("{}: connection disposed while opening", self.port_name);
            return Ok(());
        }
        if let Some(mut stale) = handle.replace(port) {
            if let Err(err) = stale.disconnect() {
                log::warn!("{}: failed to close replaced handle: {err}", self.port_name);
            }
        }
        self.transition(PortStatus::Connected);
        log::info!(
            "{}: connected at {} baud",
            self.port_name,
            profile.baud_rate
        );
        Ok(())
    }

    fn fail_open(&self, cause: DriverError) -> MonitorError {
        let err = MonitorError::OpenFailure {
            port: self.port_name.clone(),
            cause,
        };
        log::warn!("{err}");
        self.transition(PortStatus::UnavailableDisconnected);
        err
    }

    /// Close the handle if one is open. The handle reference is always
    /// cleared and the status always updated, even when the driver fails.
    pub fn close(&self, port_still_available: bool) -> Result<(), MonitorError> {
        let mut handle = self.handle.lock();
        let result = match handle.take() {
            Some(mut port) => port.disconnect(),
            None => Ok(()),
        };
        self.transition(if port_still_available {
            PortStatus::Disconnected
        } else {
            PortStatus::UnavailableDisconnected
        });
        drop(handle);

        result.map_err(|cause| MonitorError::CloseFailure {
            port: self.port_name.clone(),
            cause,
        })
    }

    pub fn close_silently(&self, port_still_available: bool) {
        if let Err(err) = self.close(port_still_available) {
            log::warn!("{err}");
        }
    }

    /// Close, drop out of the registry and schedule a rescan. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.close_silently(true);
        if let Some(registry) = self.registry.upgrade() {
            registry.forget(self);
            registry.rescan_async();
        }
        log::debug!("{}: disposed", self.port_name);
    }

    /// Best-effort write. Returns the number of bytes the driver accepted.
    ///
    /// With local echo on, the data listener receives `data` whatever the
    /// outcome of the physical write.
    pub fn write(&self, data: &[u8]) -> usize {
        let written = {
            let mut handle = self.handle.lock();
            match handle.as_mut() {
                Some(port) => match port.write(data) {
                    Ok(n) => n,
                    Err(cause) => {
                        let err = MonitorError::WriteFailure {
                            port: self.port_name.clone(),
                            cause,
                        };
                        log::warn!("{err}");
                        0
                    }
                },
                None => 0,
            }
        };
        if self.local_echo() {
            self.listeners.on_data_received(data);
        }
        written
    }

    pub fn rts(&self) -> bool {
        self.rts.load(Ordering::Acquire)
    }

    pub fn dtr(&self) -> bool {
        self.dtr.load(Ordering::Acquire)
    }

    pub fn set_rts(&self, level: bool) -> Result<(), MonitorError> {
        self.rts.store(level, Ordering::Release);
        let mut handle = self.handle.lock();
        match handle.as_mut() {
            Some(port) => port
                .set_rts(level)
                .map_err(|cause| self.control_line_failure(cause)),
            None => Ok(()),
        }
    }

    pub fn set_dtr(&self, level: bool) -> Result<(), MonitorError> {
        self.dtr.store(level, Ordering::Release);
        let mut handle = self.handle.lock();
        match handle.as_mut() {
            Some(port) => port
                .set_dtr(level)
                .map_err(|cause| self.control_line_failure(cause)),
            None => Ok(()),
        }
    }

    fn control_line_failure(&self, cause: DriverError) -> MonitorError {
        MonitorError::ControlLineFailure {
            port: self.port_name.clone(),
            cause,
        }
    }

    /// `false` when closed or when the driver cannot answer.
    pub fn cts(&self) -> bool {
        let mut handle = self.handle.lock();
        let Some(port) = handle.as_mut() else {
            return false;
        };
        port.cts().unwrap_or_else(|cause| {
            log::info!("{}", self.control_line_failure(cause));
            false
        })
    }

    pub fn dsr(&self) -> bool {
        let mut handle = self.handle.lock();
        let Some(port) = handle.as_mut() else {
            return false;
        };
        port.dsr().unwrap_or_else(|cause| {
            log::info!("{}", self.control_line_failure(cause));
            false
        })
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("port_name", &self.port_name)
            .field("status", &self.status())
            .field("rts", &self.rts())
            .field("dtr", &self.dtr())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

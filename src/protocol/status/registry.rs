use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    thread::JoinHandle,
    time::Duration,
};

use flume::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::{connection::Connection, PortStatus};
use crate::{
    core::{
        bus::{Bus, PortsEvent},
        task_manager::spawn_pooled,
    },
    protocol::driver::Driver,
    utils::ports::sort_port_names,
};

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    pub scan_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            scan_interval: DEFAULT_SCAN_INTERVAL,
        }
    }
}

/// One row of a port listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortSnapshot {
    pub port_name: String,
    pub status: PortStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptive_name: Option<String>,
}

/// Process-wide table of known ports and their connections.
///
/// Construct one per process with [`PortRegistry::new`] and pass the `Arc`
/// to whoever needs it.
pub struct PortRegistry {
    driver: Arc<dyn Driver>,
    bus: Arc<Bus>,
    port_names: RwLock<Vec<String>>,
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    scan_lock: Mutex<()>,
    self_ref: Weak<PortRegistry>,
}

impl PortRegistry {
    pub fn new(driver: Arc<dyn Driver>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            driver,
            bus: Arc::new(Bus::new()),
            port_names: RwLock::new(Vec::new()),
            connections: RwLock::new(HashMap::new()),
            scan_lock: Mutex::new(()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn subscribe(&self) -> Receiver<PortsEvent> {
        self.bus.subscribe()
    }

    /// Ordered, deduplicated driver listing. A driver failure reads as "no ports".
    pub fn scan(&self) -> Vec<String> {
        match self.driver.scan_available_ports() {
            Ok(names) => sort_port_names(names),
            Err(err) => {
                log::warn!("Failed to scan ports: {err}");
                Vec::new()
            }
        }
    }

    /// Run one scan cycle and reconcile connection status against it.
    ///
    /// Cycles never overlap. Subscribers are notified once per cycle whether
    /// or not anything changed.
    pub fn rescan(&self) {
        let _cycle = self.scan_lock.lock();
        let fresh = self.scan();
        let previous = self.port_names.read().clone();

        for name in previous.iter().filter(|name| !fresh.contains(name)) {
            log::info!("port {name} disappeared");
            if let Some(conn) = self.connection(name) {
                conn.close_silently(false);
            }
        }

        for name in &fresh {
            if !previous.contains(name) {
                log::debug!("port {name} appeared");
            }
            if let Some(conn) = self.connection(name) {
                conn.set_status_if(PortStatus::UnavailableDisconnected, PortStatus::Disconnected);
            }
        }

        *self.port_names.write() = fresh;
        self.bus.publish();
    }

    /// Queue a rescan on a pooled worker.
    pub fn rescan_async(&self) {
        if let Some(registry) = self.self_ref.upgrade() {
            spawn_pooled("rescan", move || registry.rescan());
        }
    }

    /// Start the periodic poll thread. The first scan runs immediately.
    pub fn start_polling(self: &Arc<Self>, config: RegistryConfig) -> std::io::Result<PollerHandle> {
        let (stop_tx, stop_rx) = flume::bounded::<()>(1);
        let registry = Arc::downgrade(self);
        let interval = config.scan_interval;
        let thread = std::thread::Builder::new()
            .name("serimon-port-poll".to_string())
            .spawn(move || {
                log::debug!("port poller started, interval {interval:?}");
                loop {
                    match registry.upgrade() {
                        Some(registry) => registry.rescan(),
                        None => break,
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("port poller stopped");
            })?;
        Ok(PollerHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    pub fn port_names(&self) -> Vec<String> {
        self.port_names.read().clone()
    }

    pub fn is_listed(&self, name: &str) -> bool {
        self.port_names.read().iter().any(|n| n == name)
    }

    pub fn port_status(&self, name: &str) -> PortStatus {
        let connection = self.connection(name);
        if !self.is_listed(name) {
            return match connection {
                Some(_) => PortStatus::UnavailableDisconnected,
                None => PortStatus::Unavailable,
            };
        }
        connection.map_or(PortStatus::Ready, |conn| conn.status())
    }

    pub fn port_descriptive_name(&self, name: &str) -> Option<String> {
        self.driver.descriptive_name(name)
    }

    pub fn connection(&self, name: &str) -> Option<Arc<Connection>> {
        self.connections.read().get(name).cloned()
    }

    /// Install a fresh connection for `name`, disposing any existing one first.
    pub fn new_connection(&self, name: &str) -> Arc<Connection> {
        let existing = self.connection(name);
        if let Some(existing) = existing {
            log::info!("replacing existing connection on {name}");
            existing.dispose();
        }

        let conn = Arc::new(Connection::new(
            name,
            self.driver.clone(),
            self.bus.clone(),
            self.self_ref.clone(),
        ));
        let replaced = self
            .connections
            .write()
            .insert(name.to_string(), conn.clone());
        if let Some(replaced) = replaced {
            replaced.dispose();
        }
        conn
    }

    /// Drop `conn` from the table if the table still points at it.
    pub(super) fn forget(&self, conn: &Connection) {
        let mut connections = self.connections.write();
        let current = connections
            .get(conn.port_name())
            .is_some_and(|entry| std::ptr::eq(Arc::as_ptr(entry), conn));
        if current {
            connections.remove(conn.port_name());
        }
    }

    /// Listed ports plus ports that only survive through a connection.
    pub fn snapshot(&self) -> Vec<PortSnapshot> {
        let mut names = self.port_names();
        for name in self.connections.read().keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        sort_port_names(names)
            .into_iter()
            .map(|port_name| PortSnapshot {
                status: self.port_status(&port_name),
                descriptive_name: self.port_descriptive_name(&port_name),
                port_name,
            })
            .collect()
    }
}

/// Owner of the poll thread. Stops and joins on drop.
pub struct PollerHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.try_send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("port poller panicked");
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{driver::LoopbackDriver, profile::Profile};

    fn registry(ports: &[&str]) -> (LoopbackDriver, Arc<PortRegistry>) {
        let driver = LoopbackDriver::new(ports);
        let registry = PortRegistry::new(Arc::new(driver.clone()));
        (driver, registry)
    }

    #[test]
    fn status_table_covers_every_case() {
        let (driver, registry) = registry(&["COM1", "COM2"]);
        registry.rescan();
        assert_eq!(registry.port_status("COM1"), PortStatus::Ready);
        assert_eq!(registry.port_status("COM9"), PortStatus::Unavailable);

        let conn = registry.new_connection("COM1");
        assert_eq!(registry.port_status("COM1"), PortStatus::Disconnected);
        conn.connect(&Profile::for_port("COM1")).unwrap();
        assert_eq!(registry.port_status("COM1"), PortStatus::Connected);

        driver.set_ports(&["COM2"]);
        registry.rescan();
        assert_eq!(registry.port_status("COM1"), PortStatus::UnavailableDisconnected);
    }

    #[test]
    fn scan_failure_reads_as_empty() {
        let (driver, registry) = registry(&["COM1"]);
        driver.fail_scan(true);
        assert!(registry.scan().is_empty());
        registry.rescan();
        assert!(registry.port_names().is_empty());
    }

    #[test]
    fn every_cycle_notifies() {
        let (_driver, registry) = registry(&["COM1"]);
        let events = registry.subscribe();
        registry.rescan();
        registry.rescan();
        assert_eq!(events.drain().count(), 2);
    }

    #[test]
    fn names_are_ordered() {
        let (_driver, registry) = registry(&["COM10", "COM2", "COM"]);
        registry.rescan();
        assert_eq!(registry.port_names(), vec!["COM", "COM2", "COM10"]);
    }

    #[test]
    fn poller_scans_and_stops() {
        let (_driver, registry) = registry(&["COM1"]);
        let events = registry.subscribe();
        let poller = registry
            .start_polling(RegistryConfig {
                scan_interval: Duration::from_millis(10),
            })
            .unwrap();
        assert_eq!(
            events.recv_timeout(Duration::from_secs(2)),
            Ok(PortsEvent::Changed)
        );
        poller.stop();
        assert_eq!(registry.port_names(), vec!["COM1"]);
    }

    #[test]
    fn snapshot_keeps_vanished_connections() {
        let (driver, registry) = registry(&["COM1", "COM2"]);
        registry.rescan();
        let _conn = registry.new_connection("COM2");
        driver.set_ports(&["COM1"]);
        registry.rescan();

        let snapshot = registry.snapshot();
        let names: Vec<_> = snapshot.iter().map(|p| p.port_name.as_str()).collect();
        assert_eq!(names, vec!["COM1", "COM2"]);
        assert_eq!(snapshot[1].status, PortStatus::UnavailableDisconnected);
        assert_eq!(snapshot[1].descriptive_name, None);
    }

    #[test]
    fn rescan_does_not_clobber_a_connect_in_flight() {
        let (_driver, registry) = registry(&["COM1"]);
        registry.rescan();
        let conn = registry.new_connection("COM1");
        conn.set_status(PortStatus::Connecting);
        registry.rescan();
        assert_eq!(conn.status(), PortStatus::Connecting);
    }
}

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::Mutex;

use super::{Driver, DriverPort, PortListener};
use crate::protocol::{error::DriverError, profile::Profile};

struct OpenLine {
    listener: Arc<dyn PortListener>,
    rts: bool,
    dtr: bool,
    cts: bool,
    dsr: bool,
}

#[derive(Default)]
struct LoopbackState {
    ports: Vec<String>,
    open: HashMap<String, OpenLine>,
    written: HashMap<String, Vec<u8>>,
    fail_scan: bool,
    fail_open: HashSet<String>,
    fail_writes: bool,
    fail_control_lines: bool,
    echo: bool,
    /// CTS/DSR levels a port reports from the moment it opens.
    initial_lines: HashMap<String, (bool, bool)>,
    opened: usize,
    closed: usize,
}

/// In-memory driver with scriptable port list and failure injection.
///
/// Clones share state, so a test can keep one copy to drive the ports while
/// the registry owns another.
#[derive(Clone, Default)]
pub struct LoopbackDriver {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackDriver {
    pub fn new<S: AsRef<str>>(ports: &[S]) -> Self {
        let driver = Self::default();
        driver.set_ports(ports);
        driver
    }

    pub fn set_ports<S: AsRef<str>>(&self, ports: &[S]) {
        self.state.lock().ports = ports.iter().map(|p| p.as_ref().to_string()).collect();
    }

    /// Written bytes come back as received data.
    pub fn set_echo(&self, echo: bool) {
        self.state.lock().echo = echo;
    }

    /// Have `port` open with CTS and DSR already at these levels, without
    /// firing a change callback.
    pub fn hold_input_lines(&self, port: &str, cts: bool, dsr: bool) {
        self.state
            .lock()
            .initial_lines
            .insert(port.to_string(), (cts, dsr));
    }

    pub fn fail_scan(&self, fail: bool) {
        self.state.lock().fail_scan = fail;
    }

    pub fn fail_open(&self, port: &str, fail: bool) {
        let mut state = self.state.lock();
        if fail {
            state.fail_open.insert(port.to_string());
        } else {
            state.fail_open.remove(port);
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    pub fn fail_control_lines(&self, fail: bool) {
        self.state.lock().fail_control_lines = fail;
    }

    pub fn is_open(&self, port: &str) -> bool {
        self.state.lock().open.contains_key(port)
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opened
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closed
    }

    /// Everything successfully written to `port` so far.
    pub fn written(&self, port: &str) -> Vec<u8> {
        self.state
            .lock()
            .written
            .get(port)
            .cloned()
            .unwrap_or_default()
    }

    /// Levels last applied to RTS and DTR on an open port.
    pub fn control_lines(&self, port: &str) -> Option<(bool, bool)> {
        self.state
            .lock()
            .open
            .get(port)
            .map(|line| (line.rts, line.dtr))
    }

    /// Deliver bytes as if the device had sent them. Returns `false` when
    /// the port is not open.
    pub fn inject(&self, port: &str, data: &[u8]) -> bool {
        let listener = self
            .state
            .lock()
            .open
            .get(port)
            .map(|line| line.listener.clone());
        match listener {
            Some(listener) => {
                listener.on_data_received(data);
                true
            }
            None => false,
        }
    }

    pub fn set_cts(&self, port: &str, level: bool) -> bool {
        let listener = {
            let mut state = self.state.lock();
            state.open.get_mut(port).map(|line| {
                line.cts = level;
                line.listener.clone()
            })
        };
        match listener {
            Some(listener) => {
                listener.on_cts_changed(level);
                true
            }
            None => false,
        }
    }

    pub fn set_dsr(&self, port: &str, level: bool) -> bool {
        let listener = {
            let mut state = self.state.lock();
            state.open.get_mut(port).map(|line| {
                line.dsr = level;
                line.listener.clone()
            })
        };
        match listener {
            Some(listener) => {
                listener.on_dsr_changed(level);
                true
            }
            None => false,
        }
    }
}

impl Driver for LoopbackDriver {
    fn scan_available_ports(&self) -> Result<Vec<String>, DriverError> {
        let state = self.state.lock();
        if state.fail_scan {
            return Err(DriverError::new("enumeration failed"));
        }
        Ok(state.ports.clone())
    }

    fn create_port(&self, name: &str) -> Result<Box<dyn DriverPort>, DriverError> {
        Ok(Box::new(LoopbackPort {
            name: name.to_string(),
            state: self.state.clone(),
            connected: false,
        }))
    }

    fn descriptive_name(&self, name: &str) -> Option<String> {
        let state = self.state.lock();
        state
            .ports
            .iter()
            .any(|p| p == name)
            .then(|| format!("Loopback ({name})"))
    }
}

pub struct LoopbackPort {
    name: String,
    state: Arc<Mutex<LoopbackState>>,
    connected: bool,
}

impl LoopbackPort {
    fn line_check(&self, state: &LoopbackState) -> Result<(), DriverError> {
        if !self.connected {
            return Err(DriverError::new("port is not open"));
        }
        if state.fail_control_lines {
            return Err(DriverError::new("control line request rejected"));
        }
        Ok(())
    }
}

impl DriverPort for LoopbackPort {
    fn system_name(&self) -> &str {
        &self.name
    }

    fn descriptive_name(&self) -> Option<String> {
        Some(format!("Loopback ({})", self.name))
    }

    fn connect(
        &mut self,
        profile: &Profile,
        listener: Arc<dyn PortListener>,
        rts: bool,
        dtr: bool,
    ) -> Result<(), DriverError> {
        profile
            .validate()
            .map_err(|err| DriverError::new(err.to_string()))?;
        let mut state = self.state.lock();
        if !state.ports.iter().any(|p| p == &self.name) {
            return Err(DriverError::new("no such device"));
        }
        if state.fail_open.contains(&self.name) {
            return Err(DriverError::new("access denied"));
        }
        if state.open.contains_key(&self.name) {
            return Err(DriverError::new("port is busy"));
        }
        let (cts, dsr) = state
            .initial_lines
            .get(&self.name)
            .copied()
            .unwrap_or_default();
        state.open.insert(
            self.name.clone(),
            OpenLine {
                listener,
                rts,
                dtr,
                cts,
                dsr,
            },
        );
        state.opened += 1;
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), DriverError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        let mut state = self.state.lock();
        if state.open.remove(&self.name).is_some() {
            state.closed += 1;
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, DriverError> {
        let listener = {
            let mut state = self.state.lock();
            if !self.connected {
                return Err(DriverError::new("port is not open"));
            }
            if state.fail_writes {
                return Err(DriverError::new("write timed out"));
            }
            state
                .written
                .entry(self.name.clone())
                .or_default()
                .extend_from_slice(data);
            if state.echo {
                state.open.get(&self.name).map(|line| line.listener.clone())
            } else {
                None
            }
        };
        if let Some(listener) = listener {
            listener.on_data_received(data);
        }
        Ok(data.len())
    }

    fn set_rts(&mut self, level: bool) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        self.line_check(&state)?;
        if let Some(line) = state.open.get_mut(&self.name) {
            line.rts = level;
        }
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        self.line_check(&state)?;
        if let Some(line) = state.open.get_mut(&self.name) {
            line.dtr = level;
        }
        Ok(())
    }

    fn cts(&mut self) -> Result<bool, DriverError> {
        let state = self.state.lock();
        self.line_check(&state)?;
        Ok(state.open.get(&self.name).is_some_and(|line| line.cts))
    }

    fn dsr(&mut self) -> Result<bool, DriverError> {
        let state = self.state.lock();
        self.line_check(&state)?;
        Ok(state.open.get(&self.name).is_some_and(|line| line.dsr))
    }
}

impl Drop for LoopbackPort {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<u8>>);

    impl PortListener for Collect {
        fn on_data_received(&self, data: &[u8]) {
            self.0.lock().extend_from_slice(data);
        }
    }

    #[test]
    fn echo_and_exclusive_open() {
        let driver = LoopbackDriver::new(&["COM1"]);
        driver.set_echo(true);
        let sink = Arc::new(Collect::default());
        let profile = Profile::for_port("COM1");

        let mut first = driver.create_port("COM1").unwrap();
        first.connect(&profile, sink.clone(), true, true).unwrap();
        assert_eq!(first.write(b"hi").unwrap(), 2);
        assert_eq!(sink.0.lock().as_slice(), b"hi");

        let mut second = driver.create_port("COM1").unwrap();
        assert!(second.connect(&profile, sink.clone(), true, true).is_err());

        drop(first);
        assert!(!driver.is_open("COM1"));
        assert!(second.connect(&profile, sink, false, true).is_ok());
        assert_eq!(driver.control_lines("COM1"), Some((false, true)));
    }

    #[test]
    fn unknown_port_cannot_open() {
        let driver = LoopbackDriver::new(&["COM1"]);
        let mut port = driver.create_port("COM7").unwrap();
        let err = port
            .connect(
                &Profile::for_port("COM7"),
                Arc::new(Collect::default()),
                true,
                true,
            )
            .unwrap_err();
        assert_eq!(err.message(), "no such device");
    }
}

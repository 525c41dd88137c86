//! `serialport`-backed driver used outside of tests.

use std::{
    io::{Read, Write},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use flume::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use serialport::{SerialPort, SerialPortInfo, SerialPortType};

use crate::protocol::{
    driver::{Driver, DriverPort, PortListener},
    error::DriverError,
    profile::Profile,
};

type SharedSerial = Arc<Mutex<Box<dyn SerialPort>>>;

const READ_TIMEOUT: Duration = Duration::from_millis(20);
const READ_CHUNK: usize = 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct SerialportDriver;

impl SerialportDriver {
    pub fn new() -> Self {
        Self
    }
}

/// `"CP2102 USB to UART (Silicon Labs)"` style label for a listed port.
pub fn describe_port(info: &SerialPortInfo) -> Option<String> {
    match &info.port_type {
        SerialPortType::UsbPort(usb) => {
            let product = usb.product.clone();
            let manufacturer = usb.manufacturer.clone();
            match (product, manufacturer) {
                (Some(product), Some(manufacturer)) => Some(format!("{product} ({manufacturer})")),
                (Some(product), None) => Some(product),
                (None, Some(manufacturer)) => Some(format!(
                    "{manufacturer} [{:04x}:{:04x}]",
                    usb.vid, usb.pid
                )),
                (None, None) => Some(format!("USB serial [{:04x}:{:04x}]", usb.vid, usb.pid)),
            }
        }
        SerialPortType::PciPort => Some("PCI serial port".to_string()),
        SerialPortType::BluetoothPort => Some("Bluetooth serial port".to_string()),
        SerialPortType::Unknown => None,
    }
}

fn lookup(name: &str) -> Option<SerialPortInfo> {
    serialport::available_ports()
        .ok()?
        .into_iter()
        .find(|info| info.port_name == name)
}

impl Driver for SerialportDriver {
    fn scan_available_ports(&self) -> Result<Vec<String>, DriverError> {
        Ok(serialport::available_ports()?
            .into_iter()
            .map(|info| info.port_name)
            .collect())
    }

    fn create_port(&self, name: &str) -> Result<Box<dyn DriverPort>, DriverError> {
        Ok(Box::new(SerialportPort {
            name: name.to_string(),
            serial: None,
            reader: None,
        }))
    }

    fn descriptive_name(&self, name: &str) -> Option<String> {
        lookup(name).and_then(|info| describe_port(&info))
    }
}

struct ReaderHandle {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

pub struct SerialportPort {
    name: String,
    serial: Option<SharedSerial>,
    reader: Option<ReaderHandle>,
}

impl SerialportPort {
    fn serial(&self) -> Result<&SharedSerial, DriverError> {
        self.serial
            .as_ref()
            .ok_or_else(|| DriverError::new("port is not open"))
    }
}

impl DriverPort for SerialportPort {
    fn system_name(&self) -> &str {
        &self.name
    }

    fn descriptive_name(&self) -> Option<String> {
        lookup(&self.name).and_then(|info| describe_port(&info))
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
        let builder = serialport::new(self.name.clone(), profile.baud_rate).timeout(READ_TIMEOUT);
        let builder = profile
            .apply_builder(builder)
            .map_err(|err| DriverError::new(err.to_string()))?;
        let mut handle = builder.open()?;
        handle.write_request_to_send(rts)?;
        handle.write_data_terminal_ready(dtr)?;

        let serial: SharedSerial = Arc::new(Mutex::new(handle));
        let (stop_tx, stop_rx) = flume::bounded(1);
        let serial_clone = Arc::clone(&serial);
        let name = self.name.clone();
        let thread = thread::Builder::new()
            .name(format!("serimon-read-{}", self.name))
            .spawn(move || run_loop(serial_clone, name, listener, stop_rx))?;

        self.serial = Some(serial);
        self.reader = Some(ReaderHandle {
            stop: stop_tx,
            thread,
        });
        log::debug!("{}: opened", self.name);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), DriverError> {
        if let Some(reader) = self.reader.take() {
            let _ = reader.stop.try_send(());
            if reader.thread.join().is_err() {
                log::error!("{}: reader thread panicked", self.name);
            }
        }
        if let Some(serial) = self.serial.take() {
            serial.lock().flush()?;
            log::debug!("{}: closed", self.name);
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, DriverError> {
        let mut serial = self.serial()?.lock();
        serial.write_all(data)?;
        serial.flush()?;
        Ok(data.len())
    }

    fn set_rts(&mut self, level: bool) -> Result<(), DriverError> {
        Ok(self.serial()?.lock().write_request_to_send(level)?)
    }

    fn set_dtr(&mut self, level: bool) -> Result<(), DriverError> {
        Ok(self.serial()?.lock().write_data_terminal_ready(level)?)
    }

    fn cts(&mut self) -> Result<bool, DriverError> {
        Ok(self.serial()?.lock().read_clear_to_send()?)
    }

    fn dsr(&mut self) -> Result<bool, DriverError> {
        Ok(self.serial()?.lock().read_data_set_ready()?)
    }
}

impl Drop for SerialportPort {
    fn drop(&mut self) {
        if let Err(err) = self.disconnect() {
            log::debug!("{}: close on drop failed: {err}", self.name);
        }
    }
}

/// Reader loop: forwards incoming bytes and reports CTS/DSR edges.
///
/// Exits on request or when the device stops answering (unplugged).
fn run_loop(
    serial: SharedSerial,
    port_name: String,
    listener: Arc<dyn PortListener>,
    stop_rx: Receiver<()>,
) {
    let mut buf = [0u8; READ_CHUNK];
    let mut cts: Option<bool> = None;
    let mut dsr: Option<bool> = None;
    loop {
        match stop_rx.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Disconnected) => return,
        }

        let (read, lines) = {
            let mut g = serial.lock();
            let read = g.read(&mut buf);
            let lines = (g.read_clear_to_send(), g.read_data_set_ready());
            (read, lines)
        };

        match read {
            Ok(n) if n > 0 => listener.on_data_received(&buf[..n]),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                log::warn!("{port_name}: read error, stopping reader: {e}");
                return;
            }
        }

        if let Ok(level) = lines.0 {
            if cts.is_some_and(|prev| prev != level) {
                listener.on_cts_changed(level);
            }
            cts = Some(level);
        }
        if let Ok(level) = lines.1 {
            if dsr.is_some_and(|prev| prev != level) {
                listener.on_dsr_changed(level);
            }
            dsr = Some(level);
        }

        thread::sleep(Duration::from_millis(2));
    }
}

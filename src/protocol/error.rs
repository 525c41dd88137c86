use derive_more::{Display, Error};

/// Failure reported by a driver implementation.
///
/// Drivers only describe *what* went wrong; the connection layer wraps it
/// with the operation and port name before anything reaches the user.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("{message}")]
pub struct DriverError {
    message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serialport::Error> for DriverError {
    fn from(err: serialport::Error) -> Self {
        Self::new(err.description)
    }
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Per-connection failures. None of them is fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum MonitorError {
    /// The port is not part of the current scan.
    #[display("Serial port {port} not found")]
    PortUnavailable { port: String },
    /// Parameter rejection or physical open failure.
    #[display("Failed to connect to port {port}: {cause}")]
    OpenFailure { port: String, cause: DriverError },
    /// Writes are best effort; this variant is only ever logged.
    #[display("Failed to write to port {port}: {cause}")]
    WriteFailure { port: String, cause: DriverError },
    /// RTS/DTR update or CTS/DSR query failure.
    #[display("Failed to modify port {port}: {cause}")]
    ControlLineFailure { port: String, cause: DriverError },
    #[display("Failed to close port {port}: {cause}")]
    CloseFailure { port: String, cause: DriverError },
}

impl MonitorError {
    /// Name of the port the failure is scoped to.
    pub fn port(&self) -> &str {
        match self {
            Self::PortUnavailable { port }
            | Self::OpenFailure { port, .. }
            | Self::WriteFailure { port, .. }
            | Self::ControlLineFailure { port, .. }
            | Self::CloseFailure { port, .. } => port,
        }
    }
}

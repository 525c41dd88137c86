use flume::{Receiver, Sender};
use parking_lot::Mutex;

/// Messages published by the port registry to anyone watching port state.
///
/// The payload is intentionally empty: subscribers re-query whatever they
/// need (status, CTS/DSR, descriptive name) from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortsEvent {
    /// A scan cycle finished or a connection changed status.
    Changed,
}

/// Observer list owned by the registry.
///
/// Each subscriber gets its own unbounded `flume` channel. Senders whose
/// receiver has been dropped are pruned on the next publish.
#[derive(Debug, Default)]
pub struct Bus {
    subscribers: Mutex<Vec<Sender<PortsEvent>>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and return its receiving side.
    pub fn subscribe(&self) -> Receiver<PortsEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Fan a `Changed` signal out to every live subscriber.
    pub fn publish(&self) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(PortsEvent::Changed).is_ok());
        log::trace!("bus: published to {} subscriber(s)", subscribers.len());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use anyhow::{Context, Result};
use flume::{Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::{
    hex_view::HexView,
    line_normalizer::LineNormalizer,
    stream_buffer::{resolve_encoding, StreamBuffer},
    terminal::Terminal,
};
use crate::{
    core::task_manager::spawn_pooled,
    protocol::{
        error::MonitorError,
        profile::{NewLine, Profile},
        status::{Connection, LineListener, PortRegistry, PortStatus},
    },
};

/// Pending CTS/DSR changes kept for the consumer before new ones are dropped.
pub const LINE_EVENT_QUEUE: usize = 64;
/// Received chunks waiting for the hex view before new ones are dropped.
pub const HEX_CHUNK_QUEUE: usize = 1024;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConsoleView {
    #[default]
    Text,
    Hex,
}

impl ConsoleView {
    pub fn toggled(self) -> Self {
        match self {
            ConsoleView::Text => ConsoleView::Hex,
            ConsoleView::Hex => ConsoleView::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent {
    Cts(bool),
    Dsr(bool),
}

/// Modem input lines as last reported by the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineState {
    pub cts: bool,
    pub dsr: bool,
}

impl LineState {
    fn apply(&mut self, event: LineEvent) {
        match event {
            LineEvent::Cts(level) => self.cts = level,
            LineEvent::Dsr(level) => self.dsr = level,
        }
    }
}

/// Receives each rendered hex fragment while the hex view is active.
pub type HexSink = Box<dyn Fn(&str) + Send + Sync>;
/// Called on the consumer thread after every CTS/DSR change.
pub type LineStateHook = Box<dyn Fn(LineState) + Send + Sync>;

struct HexPane {
    view: Mutex<HexView>,
    sink: RwLock<Option<HexSink>>,
    shown: RwLock<ConsoleView>,
}

impl HexPane {
    fn render(&self, data: &[u8]) {
        let fragment = self.view.lock().output(data);
        if *self.shown.read() == ConsoleView::Hex {
            if let Some(sink) = self.sink.read().as_ref() {
                sink(&fragment);
            }
        }
    }
}

struct Consumer<T: Terminal> {
    buffer: Arc<StreamBuffer>,
    text: Arc<Mutex<LineNormalizer<T>>>,
    hex: Arc<HexPane>,
    chunks: Receiver<Vec<u8>>,
    events: Receiver<LineEvent>,
    line_state: Arc<Mutex<LineState>>,
    hook: Arc<RwLock<Option<LineStateHook>>>,
}

impl<T: Terminal> Consumer<T> {
    fn run(self) {
        let mut decoded = String::new();
        loop {
            decoded.clear();
            let read = self.buffer.read_chars(&mut decoded);
            // Chunks are queued before their bytes reach the buffer, so the
            // hex view is never behind the text view.
            self.drain_queues();
            if read > 0 {
                self.text.lock().process(&decoded);
            } else if self.buffer.is_closed() {
                break;
            }
        }
        self.drain_queues();
        log::debug!("console consumer stopped");
    }

    fn drain_queues(&self) {
        for chunk in self.chunks.try_iter() {
            self.hex.render(&chunk);
        }
        self.drain_line_events();
    }

    fn drain_line_events(&self) {
        for event in self.events.try_iter() {
            let state = {
                let mut state = self.line_state.lock();
                state.apply(event);
                *state
            };
            log::debug!("line state changed: {event:?}");
            if let Some(hook) = self.hook.read().as_ref() {
                hook(state);
            }
        }
    }
}

/// Runs on the driver's callback thread: queue and return.
fn feed(chunks: &Sender<Vec<u8>>, buffer: &StreamBuffer, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    if let Err(TrySendError::Full(dropped)) = chunks.try_send(data.to_vec()) {
        log::debug!("hex queue full, dropped {} byte(s)", dropped.len());
    }
    buffer.write(data);
    // Bytes held back for a partial character, or discarded while paused,
    // do not end the consumer's read on their own.
    buffer.wake_readers();
}

fn line_listener(
    events: Sender<LineEvent>,
    buffer: Arc<StreamBuffer>,
    event: fn(bool) -> LineEvent,
) -> LineListener {
    Arc::new(move |level| match events.try_send(event(level)) {
        Ok(()) => buffer.wake_readers(),
        Err(TrySendError::Full(dropped)) => {
            log::debug!("line event queue full, dropped {dropped:?}")
        }
        Err(TrySendError::Disconnected(_)) => {}
    })
}

/// A connection paired with a text view and a hex view of its traffic.
///
/// Driver callbacks only queue: bytes go into a [`StreamBuffer`] and a chunk
/// queue, CTS/DSR changes into an event queue. A dedicated consumer thread
/// decodes the text view, renders the hex view and calls the hex sink, so
/// both views stay populated whichever one is displayed.
pub struct DuplexConsole<T: Terminal + Send + 'static> {
    registry: Arc<PortRegistry>,
    connection: Arc<Connection>,
    profile: RwLock<Profile>,
    buffer: Arc<StreamBuffer>,
    text: Arc<Mutex<LineNormalizer<T>>>,
    hex: Arc<HexPane>,
    chunk_tx: Sender<Vec<u8>>,
    loading: AtomicBool,
    line_state: Arc<Mutex<LineState>>,
    line_events: Receiver<LineEvent>,
    line_hook: Arc<RwLock<Option<LineStateHook>>>,
    error_tx: Sender<String>,
    error_rx: Receiver<String>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Terminal + Send + 'static> DuplexConsole<T> {
    /// Create the connection for `profile.port_name` (pre-empting any
    /// existing one) and start the text consumer. The port is not opened.
    pub fn open(
        registry: &Arc<PortRegistry>,
        profile: Profile,
        terminal: T,
        capacity: usize,
    ) -> Result<Arc<Self>> {
        let connection = registry.new_connection(&profile.port_name);
        let buffer = Arc::new(StreamBuffer::new(
            capacity,
            resolve_encoding(&profile.encoding),
        ));

        let mut normalizer = LineNormalizer::new(terminal, profile.new_line);
        normalizer
            .terminal_mut()
            .set_auto_new_line(profile.new_line == NewLine::CrLf);
        let text = Arc::new(Mutex::new(normalizer));

        let line_state = Arc::new(Mutex::new(LineState::default()));
        let line_hook: Arc<RwLock<Option<LineStateHook>>> = Arc::new(RwLock::new(None));
        let (event_tx, event_rx) = flume::bounded(LINE_EVENT_QUEUE);
        let (chunk_tx, chunk_rx) = flume::bounded(HEX_CHUNK_QUEUE);
        let hex = Arc::new(HexPane {
            view: Mutex::new(HexView::new()),
            sink: RwLock::new(None),
            shown: RwLock::new(ConsoleView::default()),
        });

        let consumer = Consumer {
            buffer: buffer.clone(),
            text: text.clone(),
            hex: hex.clone(),
            chunks: chunk_rx,
            events: event_rx.clone(),
            line_state: line_state.clone(),
            hook: line_hook.clone(),
        };
        let thread = std::thread::Builder::new()
            .name(format!("serimon-console-{}", profile.port_name))
            .spawn(move || consumer.run());
        let thread = match thread {
            Ok(thread) => thread,
            Err(err) => {
                connection.dispose();
                return Err(err).context("Failed to start console consumer thread");
            }
        };

        connection.set_cts_listener(Some(line_listener(
            event_tx.clone(),
            buffer.clone(),
            LineEvent::Cts,
        )));
        connection.set_dsr_listener(Some(line_listener(
            event_tx,
            buffer.clone(),
            LineEvent::Dsr,
        )));
        connection.set_local_echo(profile.local_echo);
        {
            let chunk_tx = chunk_tx.clone();
            let buffer = buffer.clone();
            connection.set_data_listener(Some(Arc::new(move |data: &[u8]| {
                feed(&chunk_tx, &buffer, data)
            })));
        }

        let (error_tx, error_rx) = flume::unbounded();
        let console = Arc::new(Self {
            registry: registry.clone(),
            connection,
            profile: RwLock::new(profile),
            buffer,
            text,
            hex,
            chunk_tx,
            loading: AtomicBool::new(false),
            line_state,
            line_events: event_rx,
            line_hook,
            error_tx,
            error_rx,
            consumer: Mutex::new(Some(thread)),
        });
        log::debug!("{}: console attached", console.connection.port_name());
        Ok(console)
    }

    /// Queue one received chunk for both views. Never blocks on rendering.
    pub fn append(&self, data: &[u8]) {
        feed(&self.chunk_tx, &self.buffer, data);
    }

    /// Open (`true`) or close (`false`) the port on a pooled worker.
    /// Failures arrive on [`errors`](Self::errors).
    pub fn connect(self: &Arc<Self>, do_connect: bool) {
        self.loading.store(true, Ordering::Release);
        let console = self.clone();
        spawn_pooled("connect", move || {
            console.report(console.perform_connect(do_connect));
            console.loading.store(false, Ordering::Release);
        });
    }

    /// Close and reopen with the current profile on a pooled worker.
    pub fn reconnect(self: &Arc<Self>) {
        self.loading.store(true, Ordering::Release);
        let console = self.clone();
        spawn_pooled("reconnect", move || {
            console.report(console.perform_connect(false));
            console.report(console.perform_connect(true));
            console.loading.store(false, Ordering::Release);
        });
    }

    /// Synchronous body of [`connect`](Self::connect).
    ///
    /// Connecting first closes whatever is open, then rebinds the text
    /// pipeline to the profile's encoding and newline convention.
    pub fn perform_connect(&self, do_connect: bool) -> Result<(), MonitorError> {
        let port = self.connection.port_name().to_string();
        let available = self.registry.is_listed(&port);
        if !do_connect {
            let closed = self.connection.close(available);
            self.sample_line_state();
            return closed;
        }

        self.connection.close_silently(available);
        self.sample_line_state();
        if !self.connection.status().can_connect() {
            return Err(MonitorError::PortUnavailable { port });
        }
        let profile = self.profile.read().clone();
        self.rebind(&profile);
        self.connection.connect(&profile)?;
        self.sample_line_state();
        Ok(())
    }

    /// Read CTS/DSR from the port (both low when closed), discarding changes
    /// still queued from before.
    fn sample_line_state(&self) {
        for stale in self.line_events.try_iter() {
            log::trace!("discarding queued {stale:?}");
        }
        let sampled = LineState {
            cts: self.connection.cts(),
            dsr: self.connection.dsr(),
        };
        *self.line_state.lock() = sampled;
    }

    fn rebind(&self, profile: &Profile) {
        self.buffer.reset(resolve_encoding(&profile.encoding));
        {
            let mut text = self.text.lock();
            text.set_new_line(profile.new_line);
            text.terminal_mut()
                .set_auto_new_line(profile.new_line == NewLine::CrLf);
        }
        self.connection.set_local_echo(profile.local_echo);
    }

    fn report(&self, result: Result<(), MonitorError>) {
        if let Err(err) = result {
            log::debug!("reporting: {err}");
            let _ = self.error_tx.send(err.to_string());
        }
    }

    /// Composed messages of failed connect/close attempts.
    pub fn errors(&self) -> Receiver<String> {
        self.error_rx.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Encode `text` with the active charset and write it.
    pub fn send_text(&self, text: &str) -> usize {
        let encoding = self.buffer.encoding();
        let (bytes, _, unmappable) = encoding.encode(text);
        if unmappable {
            log::debug!(
                "{}: characters not representable in {} were replaced",
                self.connection.port_name(),
                encoding.name()
            );
        }
        self.connection.write(&bytes)
    }

    /// [`send_text`](Self::send_text) with the profile's newline appended.
    pub fn send_line(&self, line: &str) -> usize {
        let new_line = self.profile.read().new_line;
        self.send_text(&format!("{line}{}", new_line.sequence()))
    }

    pub fn send_bytes(&self, data: &[u8]) -> usize {
        self.connection.write(data)
    }

    /// Set RTS; a failure is also reported on [`errors`](Self::errors).
    pub fn set_rts(&self, level: bool) -> Result<(), MonitorError> {
        let result = self.connection.set_rts(level);
        self.report(result.clone());
        result
    }

    /// Set DTR; a failure is also reported on [`errors`](Self::errors).
    pub fn set_dtr(&self, level: bool) -> Result<(), MonitorError> {
        let result = self.connection.set_dtr(level);
        self.report(result.clone());
        result
    }

    pub fn set_paused(&self, paused: bool) {
        self.buffer.set_paused(paused);
        log::debug!(
            "{}: output {}",
            self.connection.port_name(),
            if paused { "paused" } else { "resumed" }
        );
    }

    pub fn is_paused(&self) -> bool {
        self.buffer.is_paused()
    }

    /// Wipe both views.
    pub fn clear(&self) {
        self.text.lock().terminal_mut().clear();
        self.hex.view.lock().clear();
    }

    pub fn set_timestamped(&self, timestamped: bool) {
        self.text.lock().set_timestamped(timestamped);
    }

    pub fn is_timestamped(&self) -> bool {
        self.text.lock().is_timestamped()
    }

    pub fn view(&self) -> ConsoleView {
        *self.hex.shown.read()
    }

    pub fn set_view(&self, view: ConsoleView) {
        *self.hex.shown.write() = view;
    }

    /// The sink runs on the consumer thread.
    pub fn set_hex_sink(&self, sink: Option<HexSink>) {
        *self.hex.sink.write() = sink;
    }

    pub fn set_line_state_hook(&self, hook: Option<LineStateHook>) {
        *self.line_hook.write() = hook;
    }

    /// Levels sampled at connect, then updated by each change the driver
    /// reports. Both low while closed.
    pub fn line_state(&self) -> LineState {
        *self.line_state.lock()
    }

    pub fn with_text<R>(&self, f: impl FnOnce(&LineNormalizer<T>) -> R) -> R {
        f(&self.text.lock())
    }

    pub fn hex_text(&self) -> String {
        self.hex.view.lock().rendered().to_string()
    }

    pub fn profile(&self) -> Profile {
        self.profile.read().clone()
    }

    /// Replace the profile used by the next connect. The port stays the one
    /// this console was opened for.
    pub fn set_profile(&self, mut profile: Profile) {
        if profile.port_name != self.connection.port_name() {
            log::warn!(
                "profile for {} ignored its port name, console is bound to {}",
                profile.port_name,
                self.connection.port_name()
            );
            profile.port_name = self.connection.port_name().to_string();
        }
        *self.profile.write() = profile;
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn status(&self) -> PortStatus {
        self.connection.status()
    }

    /// Stop the consumer and dispose the connection on a pooled worker.
    pub fn dispose(&self) {
        self.buffer.close();
        if let Some(thread) = self.consumer.lock().take() {
            if thread.thread().id() != std::thread::current().id() && thread.join().is_err() {
                log::warn!("{}: console consumer panicked", self.connection.port_name());
            }
        }
        let connection = self.connection.clone();
        spawn_pooled("dispose", move || connection.dispose());
    }
}

impl<T: Terminal + Send + 'static> Drop for DuplexConsole<T> {
    fn drop(&mut self) {
        self.buffer.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        console::terminal::ScreenBuffer,
        protocol::driver::LoopbackDriver,
    };
    use std::{thread, time::Duration};

    fn setup() -> (LoopbackDriver, Arc<PortRegistry>) {
        let driver = LoopbackDriver::new(&["COM1"]);
        let registry = PortRegistry::new(Arc::new(driver.clone()));
        registry.rescan();
        (driver, registry)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..300 {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn text_of(console: &DuplexConsole<ScreenBuffer>) -> String {
        console.with_text(|n| n.terminal().text())
    }

    #[test]
    fn received_bytes_reach_both_views() {
        let (driver, registry) = setup();
        let console =
            DuplexConsole::open(&registry, Profile::for_port("COM1"), ScreenBuffer::default(), 1024)
                .unwrap();
        console.perform_connect(true).unwrap();
        assert_eq!(console.status(), PortStatus::Connected);

        assert!(driver.inject("COM1", b"hi\r\nthere"));
        assert!(wait_until(|| text_of(&console) == "hi\nthere"));
        assert!(console.hex_text().starts_with("68 69 0d 0a "));
        console.dispose();
    }

    #[test]
    fn local_echo_survives_failed_writes() {
        let (driver, registry) = setup();
        let mut profile = Profile::for_port("COM1");
        profile.local_echo = true;
        let console =
            DuplexConsole::open(&registry, profile, ScreenBuffer::default(), 1024).unwrap();
        console.perform_connect(true).unwrap();

        driver.fail_writes(true);
        assert_eq!(console.send_line("ping"), 0);
        assert!(wait_until(|| text_of(&console) == "ping"));
        assert_eq!(console.status(), PortStatus::Connected);
        console.dispose();
    }

    #[test]
    fn pause_drops_text_but_not_hex() {
        let (driver, registry) = setup();
        let console =
            DuplexConsole::open(&registry, Profile::for_port("COM1"), ScreenBuffer::default(), 1024)
                .unwrap();
        console.perform_connect(true).unwrap();

        console.set_paused(true);
        driver.inject("COM1", b"x");
        assert!(wait_until(|| console.hex_text().starts_with("78 ")));
        assert_eq!(text_of(&console), "");

        console.set_paused(false);
        driver.inject("COM1", b"y");
        assert!(wait_until(|| text_of(&console) == "y"));
        console.dispose();
    }

    #[test]
    fn line_changes_are_recorded_by_the_consumer() {
        let (driver, registry) = setup();
        let console =
            DuplexConsole::open(&registry, Profile::for_port("COM1"), ScreenBuffer::default(), 1024)
                .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            console.set_line_state_hook(Some(Box::new(move |state| seen.lock().push(state))));
        }
        console.perform_connect(true).unwrap();

        assert!(driver.set_cts("COM1", true));
        assert!(wait_until(|| console.line_state().cts));
        assert!(driver.set_dsr("COM1", true));
        assert!(wait_until(|| console.line_state().dsr));
        assert_eq!(
            seen.lock().last(),
            Some(&LineState {
                cts: true,
                dsr: true
            })
        );
        console.dispose();
    }

    #[test]
    fn unlisted_port_is_reported_unavailable() {
        let (_driver, registry) = setup();
        let console =
            DuplexConsole::open(&registry, Profile::for_port("COM9"), ScreenBuffer::default(), 1024)
                .unwrap();
        let err = console.perform_connect(true).unwrap_err();
        assert_eq!(err.to_string(), "Serial port COM9 not found");
        assert_eq!(console.status(), PortStatus::UnavailableDisconnected);

        console.connect(true);
        let reported = console.errors().recv_timeout(Duration::from_secs(3)).unwrap();
        assert_eq!(reported, "Serial port COM9 not found");
        assert!(wait_until(|| !console.is_loading()));
        console.dispose();
    }

    #[test]
    fn hex_sink_only_sees_fragments_while_hex_is_shown() {
        let (driver, registry) = setup();
        let console =
            DuplexConsole::open(&registry, Profile::for_port("COM1"), ScreenBuffer::default(), 1024)
                .unwrap();
        let fragments = Arc::new(Mutex::new(String::new()));
        {
            let fragments = fragments.clone();
            console.set_hex_sink(Some(Box::new(move |f| fragments.lock().push_str(f))));
        }
        console.perform_connect(true).unwrap();

        driver.inject("COM1", &[0x01]);
        assert!(wait_until(|| console.hex_text() == "01 "));
        console.set_view(ConsoleView::Hex);
        driver.inject("COM1", &[0x02]);
        assert!(wait_until(|| console.hex_text() == "01 02 "));
        assert_eq!(fragments.lock().as_str(), "02 ");
        console.dispose();
    }

    #[test]
    fn slow_hex_sink_does_not_hold_up_the_driver() {
        let (driver, registry) = setup();
        let console =
            DuplexConsole::open(&registry, Profile::for_port("COM1"), ScreenBuffer::default(), 1024)
                .unwrap();
        console.set_hex_sink(Some(Box::new(|_| thread::sleep(Duration::from_millis(500)))));
        console.set_view(ConsoleView::Hex);
        console.perform_connect(true).unwrap();

        let started = std::time::Instant::now();
        assert!(driver.inject("COM1", b"x"));
        assert!(driver.inject("COM1", b"y"));
        assert!(started.elapsed() < Duration::from_millis(100));

        assert!(wait_until(|| console.hex_text() == "78 79 "));
        console.dispose();
    }

    #[test]
    fn input_lines_are_sampled_at_connect() {
        let (driver, registry) = setup();
        driver.hold_input_lines("COM1", true, false);
        let console =
            DuplexConsole::open(&registry, Profile::for_port("COM1"), ScreenBuffer::default(), 1024)
                .unwrap();
        console.perform_connect(true).unwrap();
        assert_eq!(
            console.line_state(),
            LineState {
                cts: true,
                dsr: false
            }
        );

        console.perform_connect(false).unwrap();
        assert_eq!(console.line_state(), LineState::default());

        driver.hold_input_lines("COM1", false, true);
        console.perform_connect(true).unwrap();
        assert_eq!(
            console.line_state(),
            LineState {
                cts: false,
                dsr: true
            }
        );
        console.dispose();
    }

    #[test]
    fn control_line_failures_reach_the_error_channel() {
        let (driver, registry) = setup();
        let console =
            DuplexConsole::open(&registry, Profile::for_port("COM1"), ScreenBuffer::default(), 1024)
                .unwrap();
        console.perform_connect(true).unwrap();
        driver.fail_control_lines(true);

        assert!(console.set_rts(false).is_err());
        let reported = console.errors().recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(reported.starts_with("Failed to modify port COM1"), "{reported}");
        assert!(!console.connection().rts());
        console.dispose();
    }

    #[test]
    fn reconnect_rebinds_the_encoding() {
        let (driver, registry) = setup();
        let console =
            DuplexConsole::open(&registry, Profile::for_port("COM1"), ScreenBuffer::default(), 1024)
                .unwrap();
        console.perform_connect(true).unwrap();

        let mut profile = console.profile();
        profile.encoding = "UTF-8".to_string();
        console.set_profile(profile);
        console.reconnect();
        assert!(wait_until(|| !console.is_loading()
            && console.status() == PortStatus::Connected
            && console.connection().is_open()));

        driver.inject("COM1", "é".as_bytes());
        assert!(wait_until(|| text_of(&console) == "é"));
        console.dispose();
    }
}

use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Context, Result};
use clap::ArgMatches;
use flume::{Receiver, Sender};

use super::config::MonitorConfig;
use crate::{
    console::{
        history::{default_history_file_name, save_history},
        ConsoleView, DuplexConsole, ScreenBuffer, StreamTerminal, Tee,
    },
    core::task_manager::spawn_blocking_task,
    protocol::{
        driver::Driver,
        status::{presentation, PortRegistry, PortStatus},
        tty::SerialportDriver,
    },
};

/// Lines starting with this character are session commands, see [`SessionCommand`].
pub const COMMAND_PREFIX: char = '~';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Line(String),
    Eof,
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Quit,
    View(ConsoleView),
    Pause(bool),
    Clear,
    ToggleTimestamps,
    Rts(bool),
    Dtr(bool),
    Connect,
    Disconnect,
    Reconnect,
    Status,
}

/// What a stdin line means to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Send(String),
    Command(SessionCommand),
    Unknown(String),
}

fn parse_level(arg: Option<&str>) -> Option<bool> {
    match arg? {
        "1" | "on" | "high" => Some(true),
        "0" | "off" | "low" => Some(false),
        _ => None,
    }
}

/// `~~text` sends `~text`; any other `~word` is a command.
pub fn parse_input(line: &str) -> Input {
    let Some(rest) = line.strip_prefix(COMMAND_PREFIX) else {
        return Input::Send(line.to_string());
    };
    if rest.starts_with(COMMAND_PREFIX) {
        return Input::Send(rest.to_string());
    }

    let mut words = rest.split_whitespace();
    let command = match (words.next(), words.next()) {
        (Some("quit" | "q"), None) => Some(SessionCommand::Quit),
        (Some("hex"), None) => Some(SessionCommand::View(ConsoleView::Hex)),
        (Some("text"), None) => Some(SessionCommand::View(ConsoleView::Text)),
        (Some("pause"), None) => Some(SessionCommand::Pause(true)),
        (Some("resume"), None) => Some(SessionCommand::Pause(false)),
        (Some("clear"), None) => Some(SessionCommand::Clear),
        (Some("ts" | "timestamps"), None) => Some(SessionCommand::ToggleTimestamps),
        (Some("rts"), level) => parse_level(level).map(SessionCommand::Rts),
        (Some("dtr"), level) => parse_level(level).map(SessionCommand::Dtr),
        (Some("connect"), None) => Some(SessionCommand::Connect),
        (Some("disconnect"), None) => Some(SessionCommand::Disconnect),
        (Some("reconnect"), None) => Some(SessionCommand::Reconnect),
        (Some("status"), None) => Some(SessionCommand::Status),
        _ => None,
    };
    match command {
        Some(command) if words.next().is_none() => Input::Command(command),
        _ => Input::Unknown(line.to_string()),
    }
}

/// Stdout that swallows writes while the text view is hidden.
struct GatedStdout {
    enabled: Arc<AtomicBool>,
}

impl Write for GatedStdout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.enabled.load(Ordering::Acquire) {
            io::stdout().write(buf)
        } else {
            Ok(buf.len())
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}

#[derive(Debug, Clone, Copy)]
enum ControlLine {
    Rts,
    Dtr,
}

type SessionTerminal = Tee<ScreenBuffer, StreamTerminal<GatedStdout>>;

struct Session {
    console: Arc<DuplexConsole<SessionTerminal>>,
    text_gate: Arc<AtomicBool>,
}

impl Session {
    fn set_view(&self, view: ConsoleView) {
        self.console.set_view(view);
        self.text_gate
            .store(view == ConsoleView::Text, Ordering::Release);
    }

    fn print_status(&self) {
        let connection = self.console.connection();
        let shown = presentation(connection.status());
        eprintln!(
            "[{}] {} {}  rts={} dtr={} cts={} dsr={}",
            connection.port_name(),
            shown.glyph,
            shown.label,
            connection.rts() as u8,
            connection.dtr() as u8,
            connection.cts() as u8,
            connection.dsr() as u8,
        );
    }

    /// Write `text` plus the newline on a blocking worker.
    async fn send(&self, text: String) {
        let console = self.console.clone();
        if let Err(err) = spawn_blocking_task(move || console.send_line(&text)).await {
            log::warn!("send task failed: {err}");
        }
    }

    /// Push a control line level on a blocking worker. Failures arrive on
    /// the console's error channel.
    async fn set_control_line(&self, line: ControlLine, level: bool) {
        let console = self.console.clone();
        let pushed = spawn_blocking_task(move || match line {
            ControlLine::Rts => console.set_rts(level),
            ControlLine::Dtr => console.set_dtr(level),
        })
        .await;
        if let Err(err) = pushed {
            log::warn!("control line task failed: {err}");
        }
    }

    /// Returns `false` when the session should end.
    async fn handle(&self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Quit => return false,
            SessionCommand::View(view) => self.set_view(view),
            SessionCommand::Pause(paused) => self.console.set_paused(paused),
            SessionCommand::Clear => self.console.clear(),
            SessionCommand::ToggleTimestamps => self
                .console
                .set_timestamped(!self.console.is_timestamped()),
            SessionCommand::Rts(level) => self.set_control_line(ControlLine::Rts, level).await,
            SessionCommand::Dtr(level) => self.set_control_line(ControlLine::Dtr, level).await,
            SessionCommand::Connect => self.console.connect(true),
            SessionCommand::Disconnect => self.console.connect(false),
            SessionCommand::Reconnect => self.console.reconnect(),
            SessionCommand::Status => self.print_status(),
        }
        true
    }

    fn save_history(&self, path: &std::path::Path) -> Result<()> {
        let mut lines = self
            .console
            .with_text(|text| text.terminal().primary.lines());
        while lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }
        save_history(path, &lines)
    }
}

/// Entry point of `serimon --port ...`.
pub async fn run(matches: &ArgMatches) -> Result<()> {
    let config = super::monitor_config(matches)?;
    let history = matches.get_one::<String>("save-history").map(|path| {
        if path.is_empty() {
            PathBuf::from(default_history_file_name(&config.profile))
        } else {
            PathBuf::from(path)
        }
    });

    let (input_tx, input_rx) = flume::unbounded();
    {
        let input_tx = input_tx.clone();
        ctrlc::set_handler(move || {
            let _ = input_tx.send(SessionEvent::Interrupt);
        })
        .context("Failed to install Ctrl+C handler")?;
    }
    spawn_stdin_reader(input_tx)?;

    run_session(Arc::new(SerialportDriver::new()), config, history, input_rx).await
}

fn spawn_stdin_reader(input: Sender<SessionEvent>) -> Result<()> {
    std::thread::Builder::new()
        .name("serimon-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if input.send(SessionEvent::Line(line)).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        log::warn!("stdin read failed: {err}");
                        break;
                    }
                }
            }
            let _ = input.send(SessionEvent::Eof);
        })
        .context("Failed to start stdin reader")?;
    Ok(())
}

/// Monitor one port until `input` yields EOF, an interrupt or `~quit`.
pub async fn run_session(
    driver: Arc<dyn Driver>,
    config: MonitorConfig,
    history: Option<PathBuf>,
    input: Receiver<SessionEvent>,
) -> Result<()> {
    let registry = PortRegistry::new(driver);
    registry.rescan();
    let poller = registry
        .start_polling(config.registry_config())
        .context("Failed to start port poller")?;
    let ports = registry.subscribe();

    let text_gate = Arc::new(AtomicBool::new(config.view == ConsoleView::Text));
    let terminal = Tee::new(
        ScreenBuffer::default(),
        StreamTerminal::new(GatedStdout {
            enabled: text_gate.clone(),
        }),
    );
    let console = DuplexConsole::open(
        &registry,
        config.profile.clone(),
        terminal,
        config.buffer_capacity,
    )?;
    console.set_timestamped(config.timestamps);
    console.set_hex_sink(Some(Box::new(|fragment: &str| {
        let mut out = io::stdout().lock();
        let _ = out.write_all(fragment.as_bytes()).and_then(|_| out.flush());
    })));
    let session = Session { console, text_gate };
    session.set_view(config.view);

    eprintln!(
        "serimon: monitoring {} ({}), type {COMMAND_PREFIX}quit to exit",
        config.profile.port_name,
        config.profile.default_name()
    );
    let connecting = session.console.clone();
    let opened = spawn_blocking_task(move || connecting.perform_connect(true))
        .await
        .map_err(|err| anyhow!("connect task failed: {err}"))?;
    if let Err(err) = opened {
        eprintln!("{err}");
    }

    let errors = session.console.errors();
    let mut last_status = session.console.status();
    loop {
        tokio::select! {
            event = input.recv_async() => match event {
                Ok(SessionEvent::Line(line)) => match parse_input(&line) {
                    Input::Send(text) => session.send(text).await,
                    Input::Command(command) => {
                        if !session.handle(command).await {
                            break;
                        }
                    }
                    Input::Unknown(line) => eprintln!("unknown command: {line}"),
                },
                Ok(SessionEvent::Eof) | Ok(SessionEvent::Interrupt) | Err(_) => break,
            },
            message = errors.recv_async() => {
                if let Ok(message) = message {
                    eprintln!("{message}");
                }
            }
            changed = ports.recv_async() => {
                if changed.is_err() {
                    continue;
                }
                let status = session.console.status();
                if status != last_status {
                    last_status = status;
                    session.print_status();
                    if status == PortStatus::UnavailableDisconnected {
                        log::info!("{} went away", config.profile.port_name);
                    }
                }
            }
        }
    }

    if let Some(path) = &history {
        match session.save_history(path) {
            Ok(()) => eprintln!("history saved to {}", path.display()),
            Err(err) => eprintln!("{err:#}"),
        }
    }
    session.console.connection().close_silently(true);
    session.console.dispose();
    poller.stop();
    Ok(())
}

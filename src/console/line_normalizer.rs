use super::terminal::Terminal;
use crate::protocol::profile::NewLine;

/// chrono pattern for `[HH:MM:SS.mmm] `.
pub const TIMESTAMP_FORMAT: &str = "[%H:%M:%S%.3f] ";
pub const TIMESTAMP_WIDTH: usize = "[00:00:00.000] ".len();

pub type Clock = Box<dyn Fn() -> String + Send>;

fn local_clock() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    Ground,
    Esc,
    Csi,
}

/// Applies a newline convention and optional per-line timestamps to a
/// decoded character stream, writing the result into a [`Terminal`].
pub struct LineNormalizer<T: Terminal> {
    terminal: T,
    new_line: NewLine,
    timestamped: bool,
    last_char_cr: bool,
    escape: Escape,
    clock: Clock,
}

impl<T: Terminal> LineNormalizer<T> {
    pub fn new(terminal: T, new_line: NewLine) -> Self {
        Self {
            terminal,
            new_line,
            timestamped: false,
            last_char_cr: false,
            escape: Escape::Ground,
            clock: Box::new(local_clock),
        }
    }

    /// Replace the timestamp source. Stamps should be `TIMESTAMP_WIDTH` wide.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn new_line(&self) -> NewLine {
        self.new_line
    }

    pub fn set_new_line(&mut self, new_line: NewLine) {
        self.new_line = new_line;
    }

    pub fn is_timestamped(&self) -> bool {
        self.timestamped
    }

    pub fn set_timestamped(&mut self, timestamped: bool) {
        self.timestamped = timestamped;
    }

    pub fn terminal(&self) -> &T {
        &self.terminal
    }

    pub fn terminal_mut(&mut self) -> &mut T {
        &mut self.terminal
    }

    pub fn process(&mut self, text: &str) {
        for ch in text.chars() {
            self.process_char(ch);
        }
    }

    pub fn process_char(&mut self, ch: char) {
        match self.escape {
            Escape::Esc => {
                self.escape = if ch == '[' { Escape::Csi } else { Escape::Ground };
                return;
            }
            Escape::Csi => {
                if ('\u{40}'..='\u{7e}').contains(&ch) {
                    self.escape = Escape::Ground;
                }
                return;
            }
            Escape::Ground => {}
        }

        self.maybe_insert_timestamp(ch);
        match ch {
            '\r' => {
                self.terminal.carriage_return();
                if self.new_line == NewLine::Cr {
                    self.terminal.new_line();
                } else if self.timestamped {
                    // keep the stamp, overwrite only what follows it
                    self.terminal.cursor_forward(TIMESTAMP_WIDTH);
                }
            }
            '\n' => {
                if self.new_line == NewLine::Lf || self.timestamped {
                    self.terminal.carriage_return();
                }
                self.terminal.new_line();
            }
            '\x1b' => self.escape = Escape::Esc,
            '\t' => self.terminal.write_characters("\t"),
            c if c.is_control() => {}
            c => {
                let mut utf8 = [0u8; 4];
                self.terminal.write_characters(c.encode_utf8(&mut utf8));
            }
        }
        self.last_char_cr = ch == '\r';
    }

    fn maybe_insert_timestamp(&mut self, next: char) {
        if !self.timestamped || self.terminal.cursor_x() != 0 {
            return;
        }
        if self.last_char_cr && next == '\n' && self.new_line == NewLine::CrLf {
            return;
        }
        let stamp = (self.clock)();
        self.terminal.write_characters(&stamp);
    }
}

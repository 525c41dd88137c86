use std::{collections::VecDeque, io::Write};

/// Minimal cursor-addressed output surface driven by the line normalizer.
///
/// Columns are zero-based.
pub trait Terminal {
    fn cursor_x(&self) -> usize;
    fn carriage_return(&mut self);
    fn new_line(&mut self);
    fn cursor_forward(&mut self, columns: usize);
    fn write_characters(&mut self, text: &str);
    fn clear(&mut self);

    /// When on, a line feed also returns the cursor to column 0.
    fn set_auto_new_line(&mut self, _enabled: bool) {}
}

pub const DEFAULT_HISTORY_LINES: usize = 5000;

/// In-memory screen with overwrite-at-cursor semantics and bounded history.
#[derive(Debug, Clone)]
pub struct ScreenBuffer {
    lines: VecDeque<Vec<char>>,
    row: usize,
    col: usize,
    max_lines: usize,
    auto_new_line: bool,
}

impl Default for ScreenBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LINES)
    }
}

impl ScreenBuffer {
    pub fn new(max_lines: usize) -> Self {
        let mut lines = VecDeque::new();
        lines.push_back(Vec::new());
        Self {
            lines,
            row: 0,
            col: 0,
            max_lines: max_lines.max(1),
            auto_new_line: false,
        }
    }

    pub fn cursor_y(&self) -> usize {
        self.row
    }

    /// All retained lines, oldest first, without trailing padding.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .iter()
            .map(|line| line.iter().collect::<String>().trim_end().to_string())
            .collect()
    }

    /// Retained text with `\n` between lines and the trailing empty line dropped.
    pub fn text(&self) -> String {
        let mut lines = self.lines();
        if lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines.join("\n")
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }
}

impl Terminal for ScreenBuffer {
    fn cursor_x(&self) -> usize {
        self.col
    }

    fn carriage_return(&mut self) {
        self.col = 0;
    }

    fn new_line(&mut self) {
        self.row += 1;
        if self.row == self.lines.len() {
            self.lines.push_back(Vec::new());
        }
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
            self.row = self.row.saturating_sub(1);
        }
        if self.auto_new_line {
            self.col = 0;
        }
    }

    fn cursor_forward(&mut self, columns: usize) {
        self.col += columns;
    }

    fn write_characters(&mut self, text: &str) {
        let line = &mut self.lines[self.row];
        for ch in text.chars() {
            if self.col > line.len() {
                line.resize(self.col, ' ');
            }
            if self.col == line.len() {
                line.push(ch);
            } else {
                line[self.col] = ch;
            }
            self.col += 1;
        }
    }

    fn clear(&mut self) {
        self.lines.clear();
        self.lines.push_back(Vec::new());
        self.row = 0;
        self.col = 0;
    }

    fn set_auto_new_line(&mut self, enabled: bool) {
        self.auto_new_line = enabled;
    }
}

/// Streams terminal operations to a byte sink as plain text and ANSI cursor moves.
pub struct StreamTerminal<W: Write> {
    out: W,
    col: usize,
    auto_new_line: bool,
}

impl<W: Write> StreamTerminal<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            col: 0,
            auto_new_line: false,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, bytes: &[u8]) {
        if let Err(err) = self.out.write_all(bytes).and_then(|_| self.out.flush()) {
            log::debug!("terminal output failed: {err}");
        }
    }
}

impl<W: Write> Terminal for StreamTerminal<W> {
    fn cursor_x(&self) -> usize {
        self.col
    }

    fn carriage_return(&mut self) {
        self.col = 0;
        self.emit(b"\r");
    }

    fn new_line(&mut self) {
        if self.auto_new_line {
            self.col = 0;
            self.emit(b"\r\n");
        } else {
            self.emit(b"\n");
        }
    }

    fn cursor_forward(&mut self, columns: usize) {
        if columns > 0 {
            self.col += columns;
            self.emit(format!("\x1b[{columns}C").as_bytes());
        }
    }

    fn write_characters(&mut self, text: &str) {
        self.col += text.chars().count();
        self.emit(text.as_bytes());
    }

    fn clear(&mut self) {
        self.col = 0;
        self.emit(b"\x1b[2J\x1b[H");
    }

    fn set_auto_new_line(&mut self, enabled: bool) {
        self.auto_new_line = enabled;
    }
}

/// Drives two terminals in lockstep. The cursor column is read from `primary`.
pub struct Tee<A: Terminal, B: Terminal> {
    pub primary: A,
    pub mirror: B,
}

impl<A: Terminal, B: Terminal> Tee<A, B> {
    pub fn new(primary: A, mirror: B) -> Self {
        Self { primary, mirror }
    }
}

impl<A: Terminal, B: Terminal> Terminal for Tee<A, B> {
    fn cursor_x(&self) -> usize {
        self.primary.cursor_x()
    }

    fn carriage_return(&mut self) {
        self.primary.carriage_return();
        self.mirror.carriage_return();
    }

    fn new_line(&mut self) {
        self.primary.new_line();
        self.mirror.new_line();
    }

    fn cursor_forward(&mut self, columns: usize) {
        self.primary.cursor_forward(columns);
        self.mirror.cursor_forward(columns);
    }

    fn write_characters(&mut self, text: &str) {
        self.primary.write_characters(text);
        self.mirror.write_characters(text);
    }

    fn clear(&mut self) {
        self.primary.clear();
        self.mirror.clear();
    }

    fn set_auto_new_line(&mut self, enabled: bool) {
        self.primary.set_auto_new_line(enabled);
        self.mirror.set_auto_new_line(enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_overwrite_at_the_cursor() {
        let mut screen = ScreenBuffer::default();
        screen.write_characters("hello");
        screen.carriage_return();
        screen.write_characters("J");
        assert_eq!(screen.text(), "Jello");

        screen.cursor_forward(7);
        screen.write_characters("!");
        assert_eq!(screen.text(), "Jello   !");
    }

    #[test]
    fn history_is_bounded() {
        let mut screen = ScreenBuffer::new(3);
        for word in ["a", "b", "c", "d"] {
            screen.write_characters(word);
            screen.carriage_return();
            screen.new_line();
        }
        assert_eq!(screen.lines(), vec!["c", "d", ""]);
        assert_eq!(screen.cursor_y(), 2);
    }

    #[test]
    fn auto_new_line_returns_the_cursor() {
        let mut screen = ScreenBuffer::default();
        screen.set_auto_new_line(true);
        screen.write_characters("ab");
        screen.new_line();
        assert_eq!(screen.cursor_x(), 0);
    }

    #[test]
    fn stream_terminal_emits_ansi_moves() {
        let mut term = StreamTerminal::new(Vec::new());
        term.write_characters("ab");
        term.carriage_return();
        term.cursor_forward(3);
        term.new_line();
        assert_eq!(term.into_inner(), b"ab\r\x1b[3C\n".to_vec());
    }

    #[test]
    fn tee_keeps_screen_and_stream_in_step() {
        let mut tee = Tee::new(ScreenBuffer::default(), StreamTerminal::new(Vec::new()));
        tee.set_auto_new_line(true);
        tee.write_characters("ok");
        tee.new_line();
        assert_eq!(tee.cursor_x(), 0);
        assert_eq!(tee.primary.text(), "ok");
        assert_eq!(tee.mirror.get_ref().as_slice(), b"ok\r\n");
    }
}

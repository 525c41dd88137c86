pub const LINE_LENGTH: usize = 32;
pub const GROUP_LENGTH: usize = 8;

/// Rendered text kept before the oldest lines are dropped.
const MAX_RENDERED: usize = 4 * 1024 * 1024;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

fn printable(byte: u8) -> char {
    if (0x20..=0x7e).contains(&byte) {
        byte as char
    } else {
        '.'
    }
}

/// Hex dump renderer.
///
/// Every byte is rendered as soon as it arrives; the printable sidebar of a
/// line is appended once the line holds `LINE_LENGTH` bytes.
#[derive(Debug, Default, Clone)]
pub struct HexView {
    rendered: String,
    line: Vec<u8>,
}

impl HexView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render `chunk`, append it to the view and return the new fragment.
    pub fn output(&mut self, chunk: &[u8]) -> String {
        let mut fragment = String::with_capacity(chunk.len() * 3 + 8);
        for &byte in chunk {
            fragment.push(HEX_DIGITS[(byte >> 4) as usize] as char);
            fragment.push(HEX_DIGITS[(byte & 0x0f) as usize] as char);
            fragment.push(' ');
            self.line.push(byte);

            if self.line.len() == LINE_LENGTH {
                self.wrap_line(&mut fragment);
            } else if self.line.len() % GROUP_LENGTH == 0 {
                fragment.push(' ');
            }
        }
        self.rendered.push_str(&fragment);
        self.trim();
        fragment
    }

    fn wrap_line(&mut self, fragment: &mut String) {
        fragment.push_str(" |  ");
        fragment.extend(self.line.iter().copied().map(printable));
        fragment.push('\n');
        self.line.clear();
    }

    fn trim(&mut self) {
        if self.rendered.len() <= MAX_RENDERED {
            return;
        }
        let excess = self.rendered.len() - MAX_RENDERED;
        let cut = match self.rendered[excess..].find('\n') {
            Some(pos) => excess + pos + 1,
            None => excess,
        };
        self.rendered.drain(..cut);
    }

    /// Bytes of the current, not yet completed line.
    pub fn pending(&self) -> &[u8] {
        &self.line
    }

    pub fn rendered(&self) -> &str {
        &self.rendered
    }

    /// Forget everything, including a held partial line.
    pub fn clear(&mut self) {
        self.rendered.clear();
        self.line.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forty_bytes_make_one_line_and_a_pending_tail() {
        let mut view = HexView::new();
        let data: Vec<u8> = (0x30..0x58).collect();
        assert_eq!(data.len(), 40);
        view.output(&data);

        let rendered = view.rendered();
        let (first, tail) = rendered.split_once('\n').unwrap();
        let (hex, sidebar) = first.split_once(" |  ").unwrap();

        let groups: Vec<&str> = hex.trim_end().split("  ").collect();
        assert_eq!(groups.len(), 4);
        for group in &groups {
            assert_eq!(group.split(' ').count(), GROUP_LENGTH);
        }
        assert_eq!(sidebar.len(), LINE_LENGTH);
        assert_eq!(sidebar, "0123456789:;<=>?@ABCDEFGHIJKLMNO");

        assert_eq!(view.pending(), &data[32..]);
        assert_eq!(tail, "50 51 52 53 54 55 56 57  ");
    }

    #[test]
    fn sidebar_masks_unprintable_bytes() {
        let mut view = HexView::new();
        let mut data = vec![0x41u8; LINE_LENGTH];
        data[0] = 0x00;
        data[1] = 0x7f;
        data[2] = 0x7e;
        let fragment = view.output(&data);
        assert!(fragment.ends_with(" |  ..~AAAAAAAAAAAAAAAAAAAAAAAAAAAAA\n"));
    }

    #[test]
    fn lines_split_across_chunks() {
        let mut view = HexView::new();
        view.output(&[0xab; 20]);
        assert!(!view.rendered().contains('|'));
        view.output(&[0xcd; 12]);
        assert!(view.rendered().ends_with('\n'));
        assert!(view.pending().is_empty());
    }

    #[test]
    fn clear_drops_partial_line() {
        let mut view = HexView::new();
        view.output(&[1, 2, 3]);
        view.clear();
        assert!(view.pending().is_empty());
        assert!(view.rendered().is_empty());

        view.output(&[0x41; LINE_LENGTH]);
        let sidebar = view.rendered().split(" |  ").nth(1).unwrap();
        assert_eq!(sidebar.trim_end().len(), LINE_LENGTH);
    }
}

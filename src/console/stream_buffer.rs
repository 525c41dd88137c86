use std::collections::VecDeque;

use encoding_rs::{CoderResult, Decoder, Encoding};
use parking_lot::{Condvar, Mutex};

pub const DEFAULT_CAPACITY: usize = 100_000;

/// What `US-ASCII` maps to under the WHATWG label table.
pub fn fallback_encoding() -> &'static Encoding {
    encoding_rs::WINDOWS_1252
}

/// Resolve a charset label, falling back to US-ASCII for unknown labels.
pub fn resolve_encoding(label: &str) -> &'static Encoding {
    match Encoding::for_label(label.trim().as_bytes()) {
        Some(encoding) => encoding,
        None => {
            log::warn!("unknown character encoding '{label}', falling back to US-ASCII");
            fallback_encoding()
        }
    }
}

struct State {
    bytes: VecDeque<u8>,
    capacity: usize,
    paused: bool,
    closed: bool,
    /// Bumped by `reset` so that blocked readers give up.
    epoch: u64,
    /// Set by `wake_readers`, consumed by the next reader that finds no data.
    woken: bool,
    encoding: &'static Encoding,
    decoder: Decoder,
}

/// Bounded byte queue between a driver callback and a blocking consumer.
///
/// Writers never block: whatever does not fit is dropped. Readers block until
/// at least one byte is queued, the buffer is reset, or it is closed.
pub struct StreamBuffer {
    state: Mutex<State>,
    ready: Condvar,
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, fallback_encoding())
    }
}

impl StreamBuffer {
    pub fn new(capacity: usize, encoding: &'static Encoding) -> Self {
        Self {
            state: Mutex::new(State {
                bytes: VecDeque::with_capacity(capacity),
                capacity,
                paused: false,
                closed: false,
                epoch: 0,
                woken: false,
                encoding,
                decoder: encoding.new_decoder_without_bom_handling(),
            }),
            ready: Condvar::new(),
        }
    }

    /// Queue as much of `chunk` as fits and return how many bytes were kept.
    pub fn write(&self, chunk: &[u8]) -> usize {
        let mut state = self.state.lock();
        if state.paused || state.closed {
            return 0;
        }
        let space = state.capacity - state.bytes.len();
        let accepted = chunk.len().min(space);
        if accepted < chunk.len() {
            log::trace!(
                "stream buffer full, dropped {} byte(s)",
                chunk.len() - accepted
            );
        }
        if accepted > 0 {
            state.bytes.extend(&chunk[..accepted]);
            self.ready.notify_one();
        }
        accepted
    }

    /// Block for one byte. `None` when woken by `reset` or `close`.
    pub fn read_byte(&self) -> Option<u8> {
        let mut state = self.state.lock();
        let epoch = state.epoch;
        loop {
            if let Some(byte) = state.bytes.pop_front() {
                return Some(byte);
            }
            if state.closed || state.epoch != epoch {
                return None;
            }
            if std::mem::take(&mut state.woken) {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Block until at least one byte is available, then copy up to
    /// `buf.len()` bytes. Returns 0 when woken by `reset` or `close`.
    pub fn read_into(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let mut state = self.state.lock();
        let epoch = state.epoch;
        loop {
            if !state.bytes.is_empty() {
                let n = buf.len().min(state.bytes.len());
                for (slot, byte) in buf.iter_mut().zip(state.bytes.drain(..n)) {
                    *slot = byte;
                }
                return n;
            }
            if state.closed || state.epoch != epoch || std::mem::take(&mut state.woken) {
                return 0;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Block until at least one character can be decoded and append the
    /// decoded text to `out`.
    ///
    /// Incomplete multi-byte sequences stay in the decoder until the rest
    /// arrives. Returns the number of bytes appended to `out`, 0 when woken
    /// by `reset` or `close`.
    pub fn read_chars(&self, out: &mut String) -> usize {
        let mut state = self.state.lock();
        let epoch = state.epoch;
        loop {
            if !state.bytes.is_empty() {
                let input: Vec<u8> = state.bytes.drain(..).collect();
                let before = out.len();
                decode_into(&mut state.decoder, &input, out);
                if out.len() > before {
                    return out.len() - before;
                }
                continue;
            }
            if state.closed || state.epoch != epoch || std::mem::take(&mut state.woken) {
                return 0;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Drop queued bytes and bind a fresh decoder for `encoding`.
    pub fn reset(&self, encoding: &'static Encoding) {
        let mut state = self.state.lock();
        state.bytes.clear();
        state.encoding = encoding;
        state.decoder = encoding.new_decoder_without_bom_handling();
        state.epoch = state.epoch.wrapping_add(1);
        self.ready.notify_all();
        log::debug!("stream buffer reset, decoding as {}", encoding.name());
    }

    /// Make the next reader that finds no data return empty-handed, so a
    /// consumer blocked in a read gets a chance to handle other work.
    pub fn wake_readers(&self) {
        let mut state = self.state.lock();
        state.woken = true;
        self.ready.notify_all();
    }

    /// Wake every reader for good. Later writes are discarded.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.lock().paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.state.lock().encoding
    }

    pub fn len(&self) -> usize {
        self.state.lock().bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn available_space(&self) -> usize {
        let state = self.state.lock();
        state.capacity - state.bytes.len()
    }
}

fn decode_into(decoder: &mut Decoder, mut input: &[u8], out: &mut String) {
    loop {
        let needed = decoder
            .max_utf8_buffer_length(input.len())
            .unwrap_or(input.len() * 3 + 16);
        out.reserve(needed);
        let (result, read, _replaced) = decoder.decode_to_string(input, out, false);
        input = &input[read..];
        match result {
            CoderResult::InputEmpty => return,
            CoderResult::OutputFull => continue,
        }
    }
}

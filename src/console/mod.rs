//! Live rendering of a connection's traffic.
//!
//! Bytes received from the driver are queued in a [`StreamBuffer`], decoded
//! and normalized into a [`Terminal`] by a consumer thread, and in parallel
//! rendered as a hex dump. [`DuplexConsole`] owns both views.
pub mod duplex;
pub mod hex_view;
pub mod history;
pub mod line_normalizer;
pub mod stream_buffer;
pub mod terminal;

pub use duplex::{ConsoleView, DuplexConsole, HexSink, LineEvent, LineState, LineStateHook};
pub use hex_view::HexView;
pub use line_normalizer::LineNormalizer;
pub use stream_buffer::{resolve_encoding, StreamBuffer};
pub use terminal::{ScreenBuffer, StreamTerminal, Tee, Terminal};

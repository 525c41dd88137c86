//! serimon — serial port monitor core
//!
//! This crate discovers serial ports, manages the lifecycle of a connection
//! to one of them, and renders the live byte stream both as normalized text
//! and as a hex dump. The `serimon` binary wraps it in a small line-oriented
//! CLI; the library is usable on its own by any front end that supplies a
//! [`console::Terminal`].
//!
//! Start with [`protocol::status::PortRegistry`], install a connection with
//! [`console::DuplexConsole::open`], and call `connect(true)`.

#[doc(hidden)]
pub mod boot;
#[doc(hidden)]
pub mod cli;
pub mod console;
pub mod core;
pub mod protocol;
pub mod utils;

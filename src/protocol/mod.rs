pub mod driver;
pub mod error;
pub mod profile;
pub mod status;
pub mod tty;

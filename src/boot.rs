use chrono::Local;
use log::LevelFilter;
use std::io::{self, Write};

use env_logger::{Builder, Target};

/// Environment variable naming a file that receives the debug log.
pub const LOG_FILE_ENV: &str = "SERIMON_LOG_FILE";

/// Logger setup shared by every entry point.
///
/// With `SERIMON_LOG_FILE` set, records go to that file at debug level;
/// otherwise the default `env_logger` (stderr, `RUST_LOG`) is used so the
/// monitor's own stdout stays clean.
pub fn init_common() {
    match std::env::var(LOG_FILE_ENV).ok().filter(|p| !p.is_empty()) {
        Some(path) => {
            if let Err(err) = init_file_logger(&path) {
                eprintln!("Failed to initialize file logger at '{path}': {err}");
                env_logger::init();
            }
        }
        None => env_logger::init(),
    }
}

fn init_file_logger(path: &str) -> io::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} {} [{}] - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(file)))
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .init();

    log::info!("File logger initialized at {path}");

    Ok(())
}

pub mod actions;
pub mod config;
pub mod monitor;

use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgMatches, Command};

use crate::{
    console::ConsoleView,
    protocol::profile::{NewLine, Parity, StopBits},
};
use config::MonitorConfig;

/// Build the command line definition.
pub fn build_command() -> Command {
    Command::new("serimon")
        .about("Serial port monitor")
        .arg(
            Arg::new("list-ports")
                .long("list-ports")
                .short('l')
                .help("List all available serial ports and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Output one-shot results in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .help("Serial port to monitor")
                .value_name("PORT"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Load the session configuration from a JSON file; flags override it")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("baud-rate")
                .long("baud-rate")
                .short('b')
                .help("Serial port baud rate (default 115200)")
                .value_name("BAUD")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("data-bits")
                .long("data-bits")
                .help("Character size")
                .value_name("BITS")
                .value_parser(clap::value_parser!(u8).range(5..=8)),
        )
        .arg(
            Arg::new("stop-bits")
                .long("stop-bits")
                .help("Stop bits: 1, 1.5 or 2")
                .value_name("STOP")
                .value_parser(["1", "1.5", "2"]),
        )
        .arg(
            Arg::new("parity")
                .long("parity")
                .help("Parity: none, odd or even")
                .value_name("PARITY")
                .value_parser(["none", "odd", "even"]),
        )
        .arg(
            Arg::new("newline")
                .long("newline")
                .help("Line terminator for rendering and sending: CR, LF or CRLF")
                .value_name("NEWLINE")
                .value_parser(["CR", "LF", "CRLF", "cr", "lf", "crlf"]),
        )
        .arg(
            Arg::new("encoding")
                .long("encoding")
                .short('e')
                .help("Character encoding label, e.g. UTF-8 or US-ASCII")
                .value_name("CHARSET"),
        )
        .arg(
            Arg::new("local-echo")
                .long("local-echo")
                .help("Show sent data in the console")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("timestamps")
                .long("timestamps")
                .short('t')
                .help("Prefix every received line with the local time")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("hex")
                .long("hex")
                .short('x')
                .help("Start in the hex view")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("save-history")
                .long("save-history")
                .help("Write the text history to FILE on exit (default name: <profile>.log)")
                .value_name("FILE")
                .num_args(0..=1)
                .default_missing_value(""),
        )
        .arg(
            Arg::new("poll-interval-ms")
                .long("poll-interval-ms")
                .help("Port scan interval in milliseconds (default 500)")
                .value_name("MS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    build_command().get_matches()
}

/// Merge the optional config file with command line overrides.
pub fn monitor_config(matches: &ArgMatches) -> Result<MonitorConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => MonitorConfig::from_file(path)?,
        None => MonitorConfig::default(),
    };

    if let Some(port) = matches.get_one::<String>("port") {
        config.profile.port_name = port.clone();
    }
    if let Some(&baud) = matches.get_one::<u32>("baud-rate") {
        config.profile.baud_rate = baud;
    }
    if let Some(&bits) = matches.get_one::<u8>("data-bits") {
        config.profile.data_bits = bits;
    }
    if let Some(stop) = matches.get_one::<String>("stop-bits") {
        config.profile.stop_bits = stop
            .parse::<StopBits>()
            .with_context(|| format!("Invalid stop bits '{stop}'"))?;
    }
    if let Some(parity) = matches.get_one::<String>("parity") {
        config.profile.parity = parity
            .parse::<Parity>()
            .with_context(|| format!("Invalid parity '{parity}'"))?;
    }
    if let Some(new_line) = matches.get_one::<String>("newline") {
        config.profile.new_line = new_line
            .parse::<NewLine>()
            .with_context(|| format!("Invalid newline '{new_line}'"))?;
    }
    if let Some(encoding) = matches.get_one::<String>("encoding") {
        config.profile.encoding = encoding.clone();
    }
    if matches.get_flag("local-echo") {
        config.profile.local_echo = true;
    }
    if matches.get_flag("timestamps") {
        config.timestamps = true;
    }
    if matches.get_flag("hex") {
        config.view = ConsoleView::Hex;
    }
    if let Some(&interval) = matches.get_one::<u64>("poll-interval-ms") {
        config.poll_interval_ms = interval;
    }

    if config.profile.port_name.is_empty() {
        return Err(anyhow!("No port given, use --port or a config file"));
    }
    config.profile.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(args: &[&str]) -> ArgMatches {
        build_command()
            .try_get_matches_from(std::iter::once("serimon").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn flags_build_a_profile() {
        let config = monitor_config(&matches(&[
            "--port",
            "COM5",
            "--baud-rate",
            "9600",
            "--data-bits",
            "7",
            "--parity",
            "even",
            "--stop-bits",
            "2",
            "--newline",
            "lf",
            "--timestamps",
            "--hex",
        ]))
        .unwrap();
        assert_eq!(config.profile.default_name(), "COM5-9600-7E2");
        assert_eq!(config.profile.new_line, NewLine::Lf);
        assert!(config.timestamps);
        assert_eq!(config.view, ConsoleView::Hex);
    }

    #[test]
    fn port_is_required_for_a_session() {
        assert!(monitor_config(&matches(&[])).is_err());
    }

    #[test]
    fn out_of_range_values_are_rejected_by_the_parser() {
        let result = build_command().try_get_matches_from(["serimon", "--data-bits", "9"]);
        assert!(result.is_err());
        let result = build_command().try_get_matches_from(["serimon", "--baud-rate", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn save_history_accepts_an_optional_path() {
        let m = matches(&["--port", "COM1", "--save-history"]);
        assert_eq!(m.get_one::<String>("save-history").map(String::as_str), Some(""));
        let m = matches(&["--port", "COM1", "--save-history", "out.log"]);
        assert_eq!(
            m.get_one::<String>("save-history").map(String::as_str),
            Some("out.log")
        );
    }
}

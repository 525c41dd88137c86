use std::{fmt::Write as _, sync::Arc};

use clap::ArgMatches;

use crate::protocol::{
    driver::Driver,
    status::{presentation, PortRegistry, PortSnapshot},
    tty::SerialportDriver,
};

/// Plain text table of a port listing, one port per line.
pub fn render_port_table(ports: &[PortSnapshot]) -> String {
    if ports.is_empty() {
        return "No serial ports found\n".to_string();
    }
    let width = ports.iter().map(|p| p.port_name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for port in ports {
        let shown = presentation(port.status);
        let _ = write!(
            out,
            "{glyph} {name:<width$}  {label:<14}",
            glyph = shown.glyph,
            name = port.port_name,
            label = shown.label,
        );
        if let Some(description) = &port.descriptive_name {
            let _ = write!(out, "  {description}");
        }
        out.push('\n');
    }
    out
}

/// Scan once through `driver` and print the result.
pub fn list_ports(driver: Arc<dyn Driver>, want_json: bool) {
    let registry = PortRegistry::new(driver);
    registry.rescan();
    let ports = registry.snapshot();

    if want_json {
        match serde_json::to_string_pretty(&ports) {
            Ok(s) => println!("{s}"),
            Err(err) => {
                log::warn!("failed to serialize port list: {err}");
                for port in &ports {
                    println!("{}", port.port_name);
                }
            }
        }
    } else {
        print!("{}", render_port_table(&ports));
    }
}

/// Run actions that finish without opening a session. Returns `true` when
/// one ran and the process should exit.
pub async fn run_one_shot_actions(matches: &ArgMatches) -> bool {
    if matches.get_flag("list-ports") {
        let want_json = matches.get_flag("json");
        let listing = crate::core::task_manager::spawn_blocking_task(move || {
            list_ports(Arc::new(SerialportDriver::new()), want_json)
        });
        if let Err(err) = listing.await {
            eprintln!("Error while listing ports: {err}");
        }
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{driver::LoopbackDriver, status::PortStatus};

    #[test]
    fn table_lists_every_port_with_its_status() {
        let driver = LoopbackDriver::new(&["COM10", "COM2"]);
        let registry = PortRegistry::new(Arc::new(driver));
        registry.rescan();
        let ports = registry.snapshot();
        assert_eq!(ports[0].status, PortStatus::Ready);

        let table = render_port_table(&ports);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("COM2 "));
        assert!(lines[0].ends_with("Loopback (COM2)"));
        assert!(lines[1].contains("COM10"));
    }

    #[test]
    fn empty_listing_says_so() {
        assert_eq!(render_port_table(&[]), "No serial ports found\n");
    }

    #[test]
    fn snapshot_serializes_status_names() {
        let registry = PortRegistry::new(Arc::new(LoopbackDriver::new(&["COM1"])));
        registry.rescan();
        let json = serde_json::to_string(&registry.snapshot()).unwrap();
        assert_eq!(
            json,
            r#"[{"port_name":"COM1","status":"READY","descriptive_name":"Loopback (COM1)"}]"#
        );
    }
}

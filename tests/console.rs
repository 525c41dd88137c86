use std::{sync::Arc, thread, time::Duration};

use regex::Regex;
use serimon::{
    console::{ConsoleView, DuplexConsole, ScreenBuffer},
    protocol::{
        driver::LoopbackDriver,
        profile::{NewLine, Profile},
        status::{PortRegistry, PortStatus},
    },
};

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn open(profile: Profile) -> (LoopbackDriver, Arc<DuplexConsole<ScreenBuffer>>) {
    let driver = LoopbackDriver::new(&[profile.port_name.as_str()]);
    let registry = PortRegistry::new(Arc::new(driver.clone()));
    registry.rescan();
    let console = DuplexConsole::open(&registry, profile, ScreenBuffer::default(), 4096).unwrap();
    (driver, console)
}

fn lines(console: &DuplexConsole<ScreenBuffer>) -> Vec<String> {
    console.with_text(|text| text.terminal().lines())
}

#[test]
fn timestamped_lines_carry_one_stamp_each() {
    let (driver, console) = open(Profile::for_port("/dev/ttyUSB0"));
    console.set_timestamped(true);
    console.perform_connect(true).unwrap();

    driver.inject("/dev/ttyUSB0", b"A\r\n");
    driver.inject("/dev/ttyUSB0", b"B\r\n");
    assert!(wait_until(|| lines(&console).len() == 3));

    let stamped = Regex::new(r"^\[\d{2}:\d{2}:\d{2}\.\d{3}\] [AB]$").unwrap();
    let lines = lines(&console);
    assert!(stamped.is_match(&lines[0]), "{lines:?}");
    assert!(stamped.is_match(&lines[1]), "{lines:?}");
    assert_eq!(lines[2], "");
    console.dispose();
}

#[test]
fn both_views_fill_whichever_is_shown() {
    let (driver, console) = open(Profile::for_port("COM1"));
    console.perform_connect(true).unwrap();
    console.set_view(ConsoleView::Hex);

    let payload: Vec<u8> = (b'a'..=b'z').cycle().take(40).collect();
    driver.inject("COM1", &payload);

    let expected_text: String = payload.iter().map(|&b| b as char).collect();
    assert!(wait_until(|| lines(&console)[0] == expected_text));
    let hex = console.hex_text();
    let (first, _) = hex.split_once('\n').unwrap();
    assert!(first.ends_with(" |  abcdefghijklmnopqrstuvwxyzabcdef"));
    console.dispose();
}

#[test]
fn lf_profile_and_clear() {
    let mut profile = Profile::for_port("COM1");
    profile.new_line = NewLine::Lf;
    let (driver, console) = open(profile);
    console.perform_connect(true).unwrap();

    driver.inject("COM1", b"one\ntwo\n");
    assert!(wait_until(|| lines(&console) == vec!["one", "two", ""]));

    console.clear();
    assert_eq!(lines(&console), vec![""]);
    assert!(console.hex_text().is_empty());
    console.dispose();
}

#[test]
fn paused_input_is_not_replayed() {
    let driver = LoopbackDriver::new(&["COM1"]);
    let registry = PortRegistry::new(Arc::new(driver.clone()));
    registry.rescan();
    let console = DuplexConsole::open(
        &registry,
        Profile::for_port("COM1"),
        ScreenBuffer::default(),
        8,
    )
    .unwrap();
    console.perform_connect(true).unwrap();
    console.set_paused(true);
    driver.inject("COM1", b"ignored");
    console.set_paused(false);
    driver.inject("COM1", b"0123");
    assert!(wait_until(|| lines(&console)[0] == "0123"));
    console.dispose();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_and_disconnect_run_in_the_background() {
    let (driver, console) = open(Profile::for_port("COM1"));
    console.connect(true);
    assert!(wait_until(|| !console.is_loading() && console.status() == PortStatus::Connected));
    assert!(driver.is_open("COM1"));

    console.connect(false);
    assert!(wait_until(|| !console.is_loading() && console.status() == PortStatus::Disconnected));
    assert!(!driver.is_open("COM1"));

    driver.fail_open("COM1", true);
    console.connect(true);
    let message = tokio_test::assert_ok!(console.errors().recv_async().await);
    assert!(message.starts_with("Failed to connect to port COM1: "), "{message}");
    assert_eq!(console.status(), PortStatus::UnavailableDisconnected);
    console.dispose();
}

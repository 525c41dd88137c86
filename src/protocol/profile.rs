use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Baud rates offered to the operator by default.
pub const STANDARD_BAUDS: &[u32] = &[
    300, 600, 1200, 2400, 4800, 9600, 19200, 28800, 38400, 57600, 76800, 115200, 128000, 230400,
    256000, 460800, 576000, 921600, 1024000,
];

/// Supported character sizes, most common first.
pub const SERIAL_BITS: &[u8] = &[8, 7, 6, 5];

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Parity {
    #[strum(serialize = "none")]
    None,
    #[strum(serialize = "odd")]
    Odd,
    #[strum(serialize = "even")]
    Even,
}

impl Parity {
    /// Single upper-case letter used in profile names (`8N1`, `7E1`, ...).
    pub fn short_name(self) -> char {
        match self {
            Self::None => 'N',
            Self::Odd => 'O',
            Self::Even => 'E',
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, EnumString,
)]
pub enum StopBits {
    #[serde(rename = "1")]
    #[strum(serialize = "1")]
    One,
    #[serde(rename = "1.5")]
    #[strum(serialize = "1.5")]
    OnePointFive,
    #[serde(rename = "2")]
    #[strum(serialize = "2")]
    Two,
}

/// Line terminator convention used both for rendering and for outgoing text.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(ascii_case_insensitive)]
pub enum NewLine {
    #[strum(serialize = "CR")]
    Cr,
    #[strum(serialize = "LF")]
    Lf,
    #[strum(serialize = "CRLF")]
    CrLf,
}

impl NewLine {
    pub fn sequence(self) -> &'static str {
        match self {
            Self::Cr => "\r",
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }
}

/// Line parameters and presentation options used to open and render a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub new_line: NewLine,
    pub encoding: String,
    pub local_echo: bool,
    pub show_hardware_controls: bool,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            data_bits: 8,
            stop_bits: StopBits::One,
            parity: Parity::None,
            new_line: NewLine::CrLf,
            encoding: "US-ASCII".to_string(),
            local_echo: false,
            show_hardware_controls: false,
        }
    }
}

impl Profile {
    /// Default profile bound to a port.
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Human-facing name, e.g. `COM3-115200` or `COM3-9600-7E2`.
    pub fn default_name(&self) -> String {
        if self.data_bits != 8 || self.stop_bits != StopBits::One || self.parity != Parity::None {
            format!(
                "{}-{}-{}{}{}",
                self.port_name,
                self.baud_rate,
                self.data_bits,
                self.parity.short_name(),
                self.stop_bits
            )
        } else {
            format!("{}-{}", self.port_name, self.baud_rate)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(anyhow!("baud rate must be positive"));
        }
        if !SERIAL_BITS.contains(&self.data_bits) {
            return Err(anyhow!(
                "data bits must be one of 5, 6, 7, 8 (got {})",
                self.data_bits
            ));
        }
        if self.encoding.trim().is_empty() {
            return Err(anyhow!("character encoding must not be empty"));
        }
        Ok(())
    }

    /// Apply line parameters to a `serialport` builder.
    ///
    /// 1.5 stop bits cannot be expressed through `serialport` and is rejected
    /// here so the caller can surface it as a parameter failure.
    pub fn apply_builder(
        &self,
        b: serialport::SerialPortBuilder,
    ) -> Result<serialport::SerialPortBuilder> {
        let b = b.data_bits(match self.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            8 => serialport::DataBits::Eight,
            other => return Err(anyhow!("unsupported data bits: {other}")),
        });
        let b = b.stop_bits(match self.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
            StopBits::OnePointFive => return Err(anyhow!("1.5 stop bits are not supported")),
        });
        let b = b.parity(match self.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        });
        Ok(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn default_name_mentions_framing_only_when_not_8n1() {
        let mut profile = Profile::for_port("COM3");
        assert_eq!(profile.default_name(), "COM3-115200");

        profile.baud_rate = 9600;
        profile.data_bits = 7;
        profile.parity = Parity::Even;
        profile.stop_bits = StopBits::Two;
        assert_eq!(profile.default_name(), "COM3-9600-7E2");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut profile = Profile::for_port("COM1");
        assert!(profile.validate().is_ok());
        profile.data_bits = 9;
        assert!(profile.validate().is_err());
        profile.data_bits = 8;
        profile.baud_rate = 0;
        assert!(profile.validate().is_err());
    }

    #[test]
    fn enums_parse_from_cli_strings() {
        assert_eq!(NewLine::from_str("crlf").unwrap(), NewLine::CrLf);
        assert_eq!(StopBits::from_str("1.5").unwrap(), StopBits::OnePointFive);
        assert_eq!(Parity::from_str("EVEN").unwrap(), Parity::Even);
    }

    #[test]
    fn profile_json_uses_readable_values() {
        let json = serde_json::to_string(&Profile::for_port("COM1")).unwrap();
        assert!(json.contains("\"new_line\":\"CRLF\""));
        assert!(json.contains("\"stop_bits\":\"1\""));
        let parsed: Profile = serde_json::from_str(r#"{"port_name":"COM9","baud_rate":9600}"#).unwrap();
        assert_eq!(parsed.port_name, "COM9");
        assert_eq!(parsed.new_line, NewLine::CrLf);
    }
}

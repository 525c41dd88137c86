use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

/// Lifecycle state of a port as seen by the monitor.
///
/// Plain data only. Labels and glyphs live in [`super::presentation`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    IntoPrimitive,
    TryFromPrimitive,
    EnumIter,
    Display,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PortStatus {
    /// Not listed and no connection object.
    Unavailable,
    /// A connection exists but its port is gone, or its last open failed.
    UnavailableDisconnected,
    /// Reserved for a driver-reported busy signal. Never produced here.
    Busy,
    Connecting,
    Disconnected,
    /// Listed, no connection object yet.
    Ready,
    Connected,
}

impl PortStatus {
    /// Status that can start a fresh connect attempt.
    pub fn can_connect(self) -> bool {
        matches!(self, Self::Ready | Self::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn repr_round_trips_through_u8() {
        for status in PortStatus::iter() {
            let raw: u8 = status.into();
            assert_eq!(PortStatus::try_from(raw).unwrap(), status);
        }
        assert!(PortStatus::try_from(200u8).is_err());
    }

    #[test]
    fn display_matches_wire_names() {
        assert_eq!(
            PortStatus::UnavailableDisconnected.to_string(),
            "UNAVAILABLE_DISCONNECTED"
        );
        assert_eq!(
            serde_json::to_string(&PortStatus::Ready).unwrap(),
            "\"READY\""
        );
    }
}

use super::PortStatus;

/// How a status is shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPresentation {
    pub label: &'static str,
    pub glyph: char,
    /// Whether the UI should render the port as usable.
    pub valid: bool,
}

pub fn presentation(status: PortStatus) -> StatusPresentation {
    match status {
        PortStatus::Unavailable => StatusPresentation {
            label: "Unavailable",
            glyph: '✗',
            valid: false,
        },
        PortStatus::UnavailableDisconnected => StatusPresentation {
            label: "Unavailable (disconnected)",
            glyph: '✗',
            valid: false,
        },
        PortStatus::Busy => StatusPresentation {
            label: "Busy",
            glyph: '✗',
            valid: false,
        },
        PortStatus::Connecting => StatusPresentation {
            label: "Connecting",
            glyph: '…',
            valid: false,
        },
        PortStatus::Disconnected => StatusPresentation {
            label: "Disconnected",
            glyph: '○',
            valid: true,
        },
        PortStatus::Ready => StatusPresentation {
            label: "Ready",
            glyph: '·',
            valid: true,
        },
        PortStatus::Connected => StatusPresentation {
            label: "Connected",
            glyph: '●',
            valid: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn every_status_has_a_label() {
        for status in PortStatus::iter() {
            assert!(!presentation(status).label.is_empty());
        }
        assert!(!presentation(PortStatus::Busy).valid);
        assert!(presentation(PortStatus::Connected).valid);
    }
}

//! Error taxonomy for the protocol and terminal layers
//!
//! Every variant except `InvalidSize` and `Disconnected` is recoverable: the
//! owning state machine moves to its error state, the session reports the
//! problem once per connection and carries on with the next byte.

use thiserror::Error;

use super::telnet::TelnetState;
use super::term::EscapeState;

/// Coarse classification of a [`TermError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown telnet option or malformed IAC framing
    Protocol,
    /// Unknown escape, CSI, DEC or OSC sequence
    Escape,
    /// Non-numeric parameter or wrong parameter count
    Parameter,
    /// Cursor or access position outside the grid
    Bounds,
    /// Session lifecycle misuse (size, disconnected feed)
    Session,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TermError {
    #[error("unexpected byte {byte} in telnet state {state:?}")]
    Protocol { state: TelnetState, byte: u8 },

    #[error("unexpected byte {byte:#04x} in escape state {state:?}")]
    Escape { state: EscapeState, byte: u8 },

    #[error("{command}: unsupported value {value}")]
    Unsupported { command: &'static str, value: u32 },

    #[error("{command}: {reason}")]
    Parameter { command: &'static str, reason: String },

    #[error("position ({x}, {y}) is outside the {width}x{height} grid")]
    Bounds {
        x: i32,
        y: i32,
        width: u16,
        height: u16,
    },

    #[error("grid size {width}x{height} must be within 1..=254 in both directions")]
    InvalidSize { width: u16, height: u16 },

    #[error("session is disconnected")]
    Disconnected,
}

impl TermError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TermError::Protocol { .. } => ErrorKind::Protocol,
            TermError::Escape { .. } | TermError::Unsupported { .. } => ErrorKind::Escape,
            TermError::Parameter { .. } => ErrorKind::Parameter,
            TermError::Bounds { .. } => ErrorKind::Bounds,
            TermError::InvalidSize { .. } | TermError::Disconnected => ErrorKind::Session,
        }
    }

    pub(crate) fn parameter(command: &'static str, reason: impl Into<String>) -> Self {
        TermError::Parameter {
            command,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let err = TermError::Unsupported {
            command: "SGR",
            value: 99,
        };
        assert_eq!(err.kind(), ErrorKind::Escape);
        assert_eq!(TermError::parameter("CUP", "expected 0 or 2 parameters").kind(), ErrorKind::Parameter);
        assert_eq!(TermError::Disconnected.kind(), ErrorKind::Session);
    }

    #[test]
    fn test_display_messages() {
        let err = TermError::Bounds {
            x: 80,
            y: 3,
            width: 80,
            height: 24,
        };
        assert_eq!(err.to_string(), "position (80, 3) is outside the 80x24 grid");

        let err = TermError::parameter("CUP", "expected 0 or 2 parameters, got 1");
        assert_eq!(err.to_string(), "CUP: expected 0 or 2 parameters, got 1");
    }
}

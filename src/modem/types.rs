use std::fmt::{Display, Formatter};
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModemError {
    #[error("Serial port {port} is unavailable: {source}")]
    PortUnavailable {
        port: String,
        #[source]
        source: tokio_serial::Error
    },

    #[error("Serial write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("Serial I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("No modem found on {0}")]
    NoModemFound(String),

    #[error("Modem {0:?} could not enter voice mode")]
    UnsupportedModem(String),

    #[error("Serial port has been closed")]
    Closed
}

/// The outcome of a single AT command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResponse {
    pub ok: bool,

    /// Raw lines read before the terminal response (or before giving up).
    pub lines: Vec<Vec<u8>>
}
impl CommandResponse {
    pub fn success(lines: Vec<Vec<u8>>) -> Self {
        Self { ok: true, lines }
    }

    pub fn failure(lines: Vec<Vec<u8>>) -> Self {
        Self { ok: false, lines }
    }

    /// True if any preceding line contains the given marker.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| decode_line(line).contains(needle))
    }
}

/// Why a record or keypress loop stopped reading voice data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfData,
    LocalOffHook,
    BusyTone,
    DialTone,
    Silence,
    Ring,
    MaxDuration
}
impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::EndOfData => write!(f, "<DLE><ETX> received"),
            StopReason::LocalOffHook => write!(f, "local phone off hook"),
            StopReason::BusyTone => write!(f, "busy tone"),
            StopReason::DialTone => write!(f, "dial tone"),
            StopReason::Silence => write!(f, "silence detected"),
            StopReason::Ring => write!(f, "ring detected"),
            StopReason::MaxDuration => write!(f, "time limit reached")
        }
    }
}

/// Decodes a raw modem line for comparison: invalid UTF-8 is dropped, then
/// surrounding whitespace and DLE shielding are stripped.
pub fn decode_line(line: &[u8]) -> String {
    String::from_utf8_lossy(line)
        .replace(char::REPLACEMENT_CHARACTER, "")
        .trim_matches(|c: char| c == ' ' || c == '\t' || c == '\r' || c == '\n' || c == '\u{10}')
        .to_string()
}

//! Serial link
//!
//! The `SerialLink` trait is the contract between the console core and the
//! serial transport: open a port with explicit line settings, send text,
//! close. Incoming data and status changes are not polled for; they are
//! delivered asynchronously as `LinkEvent`s through a callback handed to
//! the implementation, from its own I/O thread.
//!
//! `SerialPortLink` (in `port`) is the implementation over `mio_serial`.

mod iobuf;
mod port;

pub use port::SerialPortLink;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Baud rates offered by the console.
pub const STANDARD_RATES: [u32; 10] = [
    300, 600, 1200, 2400, 9600, 14400, 19200, 38400, 57600, 115200,
];

/// Data bit counts offered by the console.
pub const DATA_BITS: [u8; 4] = [5, 6, 7, 8];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
    Mark,
    Space,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopBits {
    None,
    #[default]
    One,
    OnePointFive,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Handshake {
    #[default]
    None,
    RequestToSend,
    RequestToSendXOnXOff,
    XOnXOff,
}

/// Text appended to every command sent over the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LineEnding {
    #[default]
    Nothing,
    CR,
    LF,
    CRLF,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Nothing => "",
            LineEnding::CR => "\r",
            LineEnding::LF => "\n",
            LineEnding::CRLF => "\r\n",
        }
    }

    /// Parses `none`, `cr`, `lf` or `crlf`, case-insensitively.
    pub fn from_name(name: &str) -> Option<LineEnding> {
        match name.to_ascii_lowercase().as_str() {
            "none" | "nothing" => Some(LineEnding::Nothing),
            "cr" => Some(LineEnding::CR),
            "lf" => Some(LineEnding::LF),
            "crlf" => Some(LineEnding::CRLF),
            _ => None,
        }
    }
}

/// Everything needed to open a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSettings {
    pub port: String,
    pub rate: u32,
    pub parity: Parity,
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub handshake: Handshake,
}

impl Default for PortSettings {
    fn default() -> Self {
        PortSettings {
            port: String::new(),
            rate: 9600,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: StopBits::One,
            handshake: Handshake::None,
        }
    }
}

impl fmt::Display for PortSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:?} {} {:?} {:?}",
            self.port, self.rate, self.parity, self.data_bits, self.stop_bits, self.handshake
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Open(String),
    Closed,
    Error(String),
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Open(port) => write!(f, "Open {}", port),
            ConnectionStatus::Closed => write!(f, "Closed"),
            ConnectionStatus::Error(reason) => write!(f, "Error: {}", reason),
        }
    }
}

/// Notification raised by a link from its I/O thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Text received, in arrival order, at arbitrary boundaries.
    Data(String),
    StatusChanged(ConnectionStatus),
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("port {port} unavailable: {reason}")]
    PortUnavailable { port: String, reason: String },
    #[error("unsupported setting: {0}")]
    Unsupported(String),
    #[error("link is not open")]
    NotOpen,
    #[error("send queue is full")]
    Busy,
    #[error(transparent)]
    IO(#[from] io::Error),
}

/// Contract of a serial transport.
pub trait SerialLink {
    /// Opens the port, closing any previous session first.
    fn open(&mut self, settings: &PortSettings) -> Result<(), LinkError>;

    /// Queues `text` for transmission without blocking.
    fn send(&self, text: &str) -> Result<(), LinkError>;

    /// Closes the port. Queued but unsent data is discarded.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

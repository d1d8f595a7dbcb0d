//! Serial link abstraction.
//!
//! The locator and the ingestion loop only see [`PortOpener`] and
//! [`SerialLink`]; [`system::SystemPorts`] is the `serialport`-backed
//! implementation used by the service.

pub mod locator;
pub mod system;

use std::{fmt, io, path::Path};

pub use locator::{LocateError, Located, LocatorSettings, PortLocator};
pub use system::SystemPorts;

/// Flow-control settings tried on every candidate, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowSetting {
    Hardware,
    None,
}

impl FlowSetting {
    pub const PROBE_ORDER: [FlowSetting; 2] = [FlowSetting::Hardware, FlowSetting::None];
}

impl fmt::Display for FlowSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlowSetting::Hardware => "hardware",
            FlowSetting::None => "none",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortAccess {
    Missing,
    Denied(String),
    Usable,
}

/// An open, line-oriented serial connection.
pub trait SerialLink: Send {
    /// Whether input is waiting. Never blocks.
    fn bytes_available(&mut self) -> io::Result<bool>;

    /// Read through the next `\n` (inclusive). An empty result means the
    /// device reported end of stream. A line that does not complete within
    /// the port's read timeout yields `ErrorKind::TimedOut`.
    fn read_line(&mut self) -> io::Result<Vec<u8>>;
}

pub trait PortOpener {
    fn access(&self, path: &Path) -> PortAccess;

    fn open(&self, path: &Path, flow: FlowSetting) -> io::Result<Box<dyn SerialLink>>;
}

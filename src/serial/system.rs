use std::{
    io::{self, BufRead, BufReader},
    path::Path,
    time::Duration,
};

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use super::{FlowSetting, PortAccess, PortOpener, SerialLink};

/// Opens real device nodes through the `serialport` crate.
#[derive(Debug, Clone)]
pub struct SystemPorts {
    baud_rate: u32,
    read_timeout: Duration,
}

impl SystemPorts {
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            read_timeout: Duration::from_secs(1),
        }
    }
}

impl PortOpener for SystemPorts {
    fn access(&self, path: &Path) -> PortAccess {
        match std::fs::metadata(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => PortAccess::Missing,
            Err(e) => PortAccess::Denied(e.to_string()),
            Ok(_) => read_write_access(path),
        }
    }

    fn open(&self, path: &Path, flow: FlowSetting) -> io::Result<Box<dyn SerialLink>> {
        let flow_control = match flow {
            FlowSetting::Hardware => FlowControl::Hardware,
            FlowSetting::None => FlowControl::None,
        };

        let port = serialport::new(path.to_string_lossy(), self.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(flow_control)
            .timeout(self.read_timeout)
            .open()?;

        Ok(Box::new(SystemLink {
            reader: BufReader::new(port),
        }))
    }
}

/// Asks the kernel whether this process may both read and write `path`.
#[cfg(unix)]
fn read_write_access(path: &Path) -> PortAccess {
    use rustix::fs::{access, Access};

    match access(path, Access::READ_OK | Access::WRITE_OK) {
        Ok(()) => PortAccess::Usable,
        Err(e) => PortAccess::Denied(format!("no read/write access: {e}")),
    }
}

#[cfg(not(unix))]
fn read_write_access(path: &Path) -> PortAccess {
    match std::fs::metadata(path) {
        Ok(meta) if meta.permissions().readonly() => PortAccess::Denied("device node is read-only".into()),
        Ok(_) => PortAccess::Usable,
        Err(e) => PortAccess::Denied(e.to_string()),
    }
}

struct SystemLink {
    reader: BufReader<Box<dyn SerialPort>>,
}

impl SerialLink for SystemLink {
    fn bytes_available(&mut self) -> io::Result<bool> {
        if !self.reader.buffer().is_empty() {
            return Ok(true);
        }
        Ok(self.reader.get_ref().bytes_to_read()? > 0)
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        self.reader.read_until(b'\n', &mut line)?;
        Ok(line)
    }
}

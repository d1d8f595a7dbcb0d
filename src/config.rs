use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};

const DEFAULT_SERIAL_PORTS: &str = "/dev/serial0,/dev/ttyAMA0,/dev/ttyAMA10,/dev/ttyACM0,/dev/ttyUSB0";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    /// Device paths tried in order by the port locator.
    /// Format: `"/dev/ttyACM0,/dev/ttyUSB0"`.
    pub serial_ports: Vec<PathBuf>,
    pub baud_rate: u32,
    /// Input checks (one second apart) before a freshly opened port is given up.
    pub probe_attempts: u32,
    pub poll_interval: Duration,
    /// Wait between locator passes while no port answers.
    pub relocate_delay: Duration,
    /// Reject lines with invalid UTF-8 instead of decoding them lossily.
    pub strict_utf8: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: optional("DATABASE_URL", "sqlite://data/sensor_data.db"),
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: parsed("SERVER_PORT", "5000", "a valid port number")?,
            serial_ports: parse_port_list(&optional("SERIAL_PORTS", DEFAULT_SERIAL_PORTS))?,
            baud_rate: parsed("SERIAL_BAUD_RATE", "115200", "a positive integer")?,
            probe_attempts: parsed("SERIAL_PROBE_ATTEMPTS", "3", "a positive integer")?,
            poll_interval: Duration::from_millis(parsed(
                "SERIAL_POLL_INTERVAL_MS",
                "100",
                "a number of milliseconds",
            )?),
            relocate_delay: Duration::from_secs(parsed(
                "SERIAL_RELOCATE_DELAY_SECS",
                "5",
                "a number of seconds",
            )?),
            strict_utf8: parsed("SERIAL_STRICT_UTF8", "false", "true or false")?,
        })
    }
}

/// Parse `"/dev/a,/dev/b"` into an ordered list of paths.
///
/// Errors if the list ends up empty: with no candidates the locator could
/// never connect.
fn parse_port_list(raw: &str) -> Result<Vec<PathBuf>> {
    let ports: Vec<PathBuf> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect();
    anyhow::ensure!(!ports.is_empty(), "SERIAL_PORTS must name at least one device path");
    Ok(ports)
}

fn parsed<T>(key: &str, default: &str, expected: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    optional(key, default)
        .trim()
        .parse()
        .with_context(|| format!("{key} must be {expected}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

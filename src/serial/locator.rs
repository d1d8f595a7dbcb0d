use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::{FlowSetting, PortAccess, PortOpener, SerialLink};
use crate::frame::decode_line;

#[derive(Debug, Error)]
pub enum LocateError {
    #[error("no working serial port found (tried {tried:?})")]
    NoWorkingPort { tried: Vec<PathBuf> },
    #[error("port search cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct LocatorSettings {
    pub candidates: Vec<PathBuf>,
    /// Input checks per opened configuration before giving up on it.
    pub probe_attempts: u32,
    pub probe_interval: Duration,
    pub strict_utf8: bool,
}

/// A verified-live port. `first_line` is the line that proved it.
pub struct Located {
    pub path: PathBuf,
    pub flow: FlowSetting,
    pub link: Box<dyn SerialLink>,
    pub first_line: String,
}

pub struct PortLocator<O> {
    opener: O,
    settings: LocatorSettings,
}

impl<O: PortOpener> PortLocator<O> {
    pub fn new(opener: O, settings: LocatorSettings) -> Self {
        Self { opener, settings }
    }

    /// Walks every candidate × flow setting once. `stop` is checked before
    /// each attempt so shutdown does not wait out a full scan.
    pub fn locate(&self, stop: &AtomicBool) -> Result<Located, LocateError> {
        info!(candidates = self.settings.candidates.len(), "Searching for serial port");

        for path in &self.settings.candidates {
            match self.opener.access(path) {
                PortAccess::Missing => {
                    debug!(path = %path.display(), "Port does not exist; skipping");
                    continue;
                }
                PortAccess::Denied(reason) => {
                    warn!(path = %path.display(), reason = %reason, "No read/write access to port; skipping");
                    continue;
                }
                PortAccess::Usable => {}
            }

            for flow in FlowSetting::PROBE_ORDER {
                if stop.load(Ordering::SeqCst) {
                    return Err(LocateError::Cancelled);
                }

                let mut link = match self.opener.open(path, flow) {
                    Ok(link) => link,
                    Err(e) => {
                        warn!(path = %path.display(), flow = %flow, error = %e, "Failed to open port");
                        continue;
                    }
                };
                debug!(path = %path.display(), flow = %flow, "Port opened; probing for data");

                match self.probe(link.as_mut(), path, flow) {
                    Some(first_line) => {
                        info!(path = %path.display(), flow = %flow, "Serial port verified");
                        return Ok(Located {
                            path: path.clone(),
                            flow,
                            link,
                            first_line,
                        });
                    }
                    None => {
                        debug!(path = %path.display(), flow = %flow, "No data within probe window; closing");
                    }
                }
            }
        }

        Err(LocateError::NoWorkingPort {
            tried: self.settings.candidates.clone(),
        })
    }

    fn probe(&self, link: &mut dyn SerialLink, path: &Path, flow: FlowSetting) -> Option<String> {
        for attempt in 1..=self.settings.probe_attempts {
            match link.bytes_available() {
                Ok(true) => match link.read_line() {
                    Ok(raw) => match decode_line(&raw, self.settings.strict_utf8) {
                        Ok(line) if !line.trim().is_empty() => return Some(line),
                        Ok(_) => debug!(path = %path.display(), attempt, "Empty line during probe"),
                        Err(e) => debug!(path = %path.display(), attempt, error = %e, "Undecodable line during probe"),
                    },
                    Err(e) => {
                        warn!(path = %path.display(), flow = %flow, error = %e, "Read failed during probe");
                        return None;
                    }
                },
                Ok(false) => debug!(path = %path.display(), attempt, "No data yet"),
                Err(e) => {
                    warn!(path = %path.display(), flow = %flow, error = %e, "Port check failed during probe");
                    return None;
                }
            }
            if attempt < self.settings.probe_attempts {
                thread::sleep(self.settings.probe_interval);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::serial::testing::{FakeOpener, ScriptedLink, Step};

    fn settings(candidates: &[&str]) -> LocatorSettings {
        LocatorSettings {
            candidates: candidates.iter().map(PathBuf::from).collect(),
            probe_attempts: 3,
            probe_interval: Duration::ZERO,
            strict_utf8: false,
        }
    }

    fn live() -> ScriptedLink {
        ScriptedLink::new(vec![Step::Line(r#"<{"temperature":21.5}*AB>"#)])
    }

    #[test]
    fn skips_missing_and_denied_paths() {
        let opener = FakeOpener::new()
            .with_access("/dev/serial0", PortAccess::Missing)
            .with_access("/dev/ttyAMA0", PortAccess::Denied("permission denied".into()))
            .with_link("/dev/ttyACM0", FlowSetting::Hardware, live());
        let locator = PortLocator::new(opener, settings(&["/dev/serial0", "/dev/ttyAMA0", "/dev/ttyACM0"]));

        let found = locator.locate(&AtomicBool::new(false)).unwrap();
        assert_eq!(found.path, PathBuf::from("/dev/ttyACM0"));
        assert_eq!(found.first_line, r#"<{"temperature":21.5}*AB>"#);
        assert_eq!(
            locator.opener.opened(),
            vec![(PathBuf::from("/dev/ttyACM0"), FlowSetting::Hardware)]
        );
    }

    #[test]
    fn falls_back_to_no_flow_control_when_hardware_is_silent() {
        let opener = FakeOpener::new()
            .with_link("/dev/ttyUSB0", FlowSetting::Hardware, ScriptedLink::new(vec![Step::Idle, Step::Idle, Step::Idle]))
            .with_link("/dev/ttyUSB0", FlowSetting::None, live());
        let locator = PortLocator::new(opener, settings(&["/dev/ttyUSB0"]));

        let found = locator.locate(&AtomicBool::new(false)).unwrap();
        assert_eq!(found.flow, FlowSetting::None);
        assert_eq!(locator.opener.opened().len(), 2);
    }

    #[test]
    fn data_arriving_on_last_probe_attempt_still_verifies() {
        let opener = FakeOpener::new().with_link(
            "/dev/ttyACM0",
            FlowSetting::Hardware,
            ScriptedLink::new(vec![Step::Idle, Step::Idle, Step::Line("{}")]),
        );
        let locator = PortLocator::new(opener, settings(&["/dev/ttyACM0"]));

        assert!(locator.locate(&AtomicBool::new(false)).is_ok());
    }

    #[test]
    fn empty_lines_do_not_verify_a_port() {
        let opener = FakeOpener::new()
            .with_link("/dev/ttyACM0", FlowSetting::Hardware, ScriptedLink::new(vec![Step::Line(""), Step::Line("  ")]))
            .with_link("/dev/ttyACM0", FlowSetting::None, ScriptedLink::new(vec![Step::Line("\r")]));
        let locator = PortLocator::new(opener, settings(&["/dev/ttyACM0"]));

        assert!(matches!(
            locator.locate(&AtomicBool::new(false)),
            Err(LocateError::NoWorkingPort { .. })
        ));
    }

    #[test]
    fn open_failure_moves_to_next_configuration() {
        let opener = FakeOpener::new()
            .with_open_error("/dev/ttyAMA10", FlowSetting::Hardware, io::ErrorKind::PermissionDenied)
            .with_link("/dev/ttyAMA10", FlowSetting::None, live());
        let locator = PortLocator::new(opener, settings(&["/dev/ttyAMA10"]));

        let found = locator.locate(&AtomicBool::new(false)).unwrap();
        assert_eq!(found.flow, FlowSetting::None);
    }

    #[test]
    fn read_error_abandons_configuration() {
        let opener = FakeOpener::new()
            .with_link(
                "/dev/ttyACM0",
                FlowSetting::Hardware,
                ScriptedLink::new(vec![Step::Fail(io::ErrorKind::BrokenPipe), Step::Line("{}")]),
            )
            .with_link("/dev/ttyUSB0", FlowSetting::Hardware, live());
        let locator = PortLocator::new(opener, settings(&["/dev/ttyACM0", "/dev/ttyUSB0"]));

        let found = locator.locate(&AtomicBool::new(false)).unwrap();
        assert_eq!(found.path, PathBuf::from("/dev/ttyUSB0"));
    }

    #[test]
    fn exhausting_every_candidate_reports_no_working_port() {
        let locator = PortLocator::new(FakeOpener::new(), settings(&["/dev/ttyACM0", "/dev/ttyUSB0"]));

        match locator.locate(&AtomicBool::new(false)) {
            Err(LocateError::NoWorkingPort { tried }) => assert_eq!(tried.len(), 2),
            other => panic!("expected NoWorkingPort, got {:?}", other.err()),
        }
        // Both flow settings were attempted on both paths.
        assert_eq!(locator.opener.opened().len(), 4);
    }

    #[test]
    fn raised_stop_flag_cancels_search() {
        let locator = PortLocator::new(FakeOpener::new(), settings(&["/dev/ttyACM0"]));
        assert!(matches!(
            locator.locate(&AtomicBool::new(true)),
            Err(LocateError::Cancelled)
        ));
    }
}

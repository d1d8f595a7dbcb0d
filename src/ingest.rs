//! Background ingestion: serial link → frame parser → reading store.
//!
//! Runs on its own OS thread for the life of the process. The thread owns the
//! serial handle outright; the rest of the service only sees
//! [`LinkStatus`].

use std::{
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::{
    frame::{decode_line, parse_frame, Payload},
    link_status::LinkStatus,
    serial::{PortLocator, PortOpener, SerialLink},
    store::ReadingStore,
};

/// Where parsed frames go.
pub trait FrameSink {
    fn deliver(&self, payload: &Payload, at: DateTime<Utc>) -> anyhow::Result<()>;
}

/// Writes frames through the async [`ReadingStore`], blocking the ingestion
/// thread on the service runtime.
pub struct StoreSink {
    store: ReadingStore,
    runtime: Handle,
}

impl StoreSink {
    pub fn new(store: ReadingStore, runtime: Handle) -> Self {
        Self { store, runtime }
    }
}

impl FrameSink for StoreSink {
    fn deliver(&self, payload: &Payload, at: DateTime<Utc>) -> anyhow::Result<()> {
        let summary = self.runtime.block_on(self.store.record_frame(payload, at))?;
        debug!(
            inserted = summary.inserted,
            unknown = ?summary.unknown_types,
            rejected = ?summary.rejected_values,
            failed = summary.failed_inserts,
            "Frame stored"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Sleep between polls that find no input.
    pub poll_interval: Duration,
    /// Back-off after a locator pass finds nothing.
    pub relocate_delay: Duration,
    pub strict_utf8: bool,
}

enum Link {
    Disconnected,
    Connected {
        path: PathBuf,
        link: Box<dyn SerialLink>,
    },
}

pub struct Ingestor<O, S> {
    locator: PortLocator<O>,
    sink: S,
    status: LinkStatus,
    settings: IngestSettings,
    stop: Arc<AtomicBool>,
}

impl<O, S> Ingestor<O, S>
where
    O: PortOpener + Send + 'static,
    S: FrameSink + Send + 'static,
{
    pub fn new(
        locator: PortLocator<O>,
        sink: S,
        status: LinkStatus,
        settings: IngestSettings,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            locator,
            sink,
            status,
            settings,
            stop,
        }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("serial-ingest".into())
            .spawn(move || self.run())
    }

    /// Runs until the stop flag is raised. The serial handle is dropped, and
    /// so closed, on the way out.
    pub fn run(self) {
        info!("Ingestion loop started");
        let mut link = Link::Disconnected;
        while !self.stop.load(Ordering::SeqCst) {
            link = self.step(link);
        }
        drop(link);
        self.status.mark_disconnected();
        info!("Ingestion loop stopped");
    }

    fn step(&self, link: Link) -> Link {
        match link {
            Link::Disconnected => match self.locator.locate(&self.stop) {
                Ok(found) => {
                    info!(path = %found.path.display(), flow = %found.flow, "Serial link connected");
                    self.status.mark_connected(found.path.clone());
                    self.handle_line(&found.first_line);
                    Link::Connected {
                        path: found.path,
                        link: found.link,
                    }
                }
                Err(e) => {
                    if !self.stop.load(Ordering::SeqCst) {
                        error!(
                            error = %e,
                            retry_in_secs = self.settings.relocate_delay.as_secs(),
                            "Serial port unavailable; check the device is connected, powered and readable"
                        );
                        self.pause(self.settings.relocate_delay);
                    }
                    Link::Disconnected
                }
            },
            Link::Connected { path, mut link } => match self.poll(link.as_mut()) {
                Ok(()) => Link::Connected { path, link },
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Serial link lost; searching again");
                    self.status.mark_disconnected();
                    Link::Disconnected
                }
            },
        }
    }

    /// One poll of a live link. `Err` means the link is gone.
    fn poll(&self, link: &mut dyn SerialLink) -> io::Result<()> {
        if !link.bytes_available()? {
            thread::sleep(self.settings.poll_interval);
            return Ok(());
        }

        match link.read_line() {
            Ok(raw) if raw.is_empty() => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "serial device closed the stream",
            )),
            Ok(raw) => {
                match decode_line(&raw, self.settings.strict_utf8) {
                    Ok(line) => self.handle_line(&line),
                    Err(e) => {
                        warn!(error = %e, "Dropping serial line");
                        self.status.record_rejected();
                    }
                }
                Ok(())
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {
                debug!(error = %e, "Incomplete line before timeout; discarded");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn handle_line(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }

        match parse_frame(line) {
            Ok(payload) => {
                let now = Utc::now();
                match self.sink.deliver(&payload, now) {
                    Ok(()) => self.status.record_stored(now),
                    Err(e) => error!(error = %e, line = %line, "Failed to store frame"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Dropping serial frame");
                self.status.record_rejected();
            }
        }
    }

    /// Sleeps for `total`, waking early if the stop flag is raised.
    fn pause(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.stop.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(100)));
        }
    }
}

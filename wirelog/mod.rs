//! WireLog: raw traffic recorder every transport can tee into.
//!
//! Each record is a header line `"<RX|TX> <peer>\n"` followed by the raw
//! bytes and a trailing newline. Records go to a file per direction, one
//! shared file (`same`), or an in-memory buffer (`buffify`).
//!
//! Recording never fails: when a sink could not be opened the write is
//! silently dropped. Only [`WireLog::reopen`] reports success.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WireLogConfig {
    /// Directory for log files; `None` means buffer mode only.
    pub path: Option<PathBuf>,
    pub rx: bool,
    pub tx: bool,
    /// Interleave both directions into one destination.
    pub same: bool,
    /// Record to memory instead of files.
    pub buffify: bool,
}

impl Default for WireLogConfig {
    fn default() -> Self {
        WireLogConfig {
            path: None,
            rx: true,
            tx: true,
            same: false,
            buffify: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
}

impl Direction {
    fn tag(self) -> &'static str {
        match self {
            Direction::Rx => "RX",
            Direction::Tx => "TX",
        }
    }
}

enum Sink {
    File { file: File, path: PathBuf },
    Buffer(Vec<u8>),
}

impl Sink {
    fn record(&mut self, direction: Direction, peer: &dyn Display, data: &[u8]) {
        let header = format!("{} {}\n", direction.tag(), peer);
        match self {
            Sink::File { file, .. } => {
                let _ = file
                    .write_all(header.as_bytes())
                    .and_then(|_| file.write_all(data))
                    .and_then(|_| file.write_all(b"\n"));
            }
            Sink::Buffer(buf) => {
                buf.extend_from_slice(header.as_bytes());
                buf.extend_from_slice(data);
                buf.push(b'\n');
            }
        }
    }

    fn contents(&self) -> Vec<u8> {
        match self {
            Sink::File { path, .. } => fs::read(path).unwrap_or_default(),
            Sink::Buffer(buf) => buf.clone(),
        }
    }

    fn path(&self) -> Option<&Path> {
        match self {
            Sink::File { path, .. } => Some(path),
            Sink::Buffer(_) => None,
        }
    }
}

struct Inner {
    config: WireLogConfig,
    rx: Option<Sink>,
    // Unused in `same` mode; both directions go to `rx`
    tx: Option<Sink>,
}

impl Inner {
    fn sink_for(&mut self, direction: Direction) -> Option<&mut Sink> {
        match direction {
            Direction::Rx if self.config.rx => self.rx.as_mut(),
            Direction::Tx if self.config.tx => {
                if self.config.same {
                    self.rx.as_mut()
                } else {
                    self.tx.as_mut()
                }
            }
            _ => None,
        }
    }

    fn reader_for(&self, direction: Direction) -> Option<&Sink> {
        match direction {
            Direction::Rx => self.rx.as_ref(),
            Direction::Tx if self.config.same => self.rx.as_ref(),
            Direction::Tx => self.tx.as_ref(),
        }
    }
}

/// Shared handle to one recorder. Clones write into the same sinks.
#[derive(Clone)]
pub struct WireLog {
    inner: Arc<Mutex<Inner>>,
}

impl WireLog {
    /// Create a closed recorder; call [`reopen`](Self::reopen) to start recording.
    pub fn new(config: WireLogConfig) -> Self {
        WireLog {
            inner: Arc::new(Mutex::new(Inner { config, rx: None, tx: None })),
        }
    }

    /// In-memory recorder for both directions, already open.
    pub fn buffered(same: bool) -> Self {
        let wlog = WireLog::new(WireLogConfig {
            same,
            buffify: true,
            ..WireLogConfig::default()
        });
        wlog.reopen("", "");
        wlog
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while recording must not disable the transports sharing us
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> WireLogConfig {
        self.lock().config.clone()
    }

    /// Close any open sinks and open fresh ones.
    ///
    /// File names are `{prefix}_{midfix}_{rx|tx|rxtx}_{utc timestamp}.txt`.
    /// Returns false when a file sink was requested but could not be opened.
    pub fn reopen(&self, prefix: &str, midfix: &str) -> bool {
        let mut inner = self.lock();
        inner.rx = None;
        inner.tx = None;

        let config = inner.config.clone();
        if !config.rx && !config.tx {
            return true;
        }

        if config.buffify {
            if config.same {
                inner.rx = Some(Sink::Buffer(Vec::new()));
            } else {
                if config.rx {
                    inner.rx = Some(Sink::Buffer(Vec::new()));
                }
                if config.tx {
                    inner.tx = Some(Sink::Buffer(Vec::new()));
                }
            }
            return true;
        }

        let dir = match config.path.as_deref() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => {
                warn!("wirelog has no path and buffify is off; nothing recorded");
                return false;
            }
        };

        if let Err(e) = fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), error = %e, "wirelog could not create directory");
            return false;
        }

        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%6f").to_string();
        let open = |tag: &str| -> Option<Sink> {
            let path = dir.join(format!("{}_{}_{}_{}.txt", prefix, midfix, tag, stamp));
            match OpenOptions::new().create(true).write(true).truncate(true).open(&path) {
                Ok(file) => Some(Sink::File { file, path }),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "wirelog could not open file");
                    None
                }
            }
        };

        if config.same {
            inner.rx = open("rxtx");
            return inner.rx.is_some();
        }

        let mut ok = true;
        if config.rx {
            inner.rx = open("rx");
            ok &= inner.rx.is_some();
        }
        if config.tx {
            inner.tx = open("tx");
            ok &= inner.tx.is_some();
        }
        ok
    }

    pub fn close(&self) {
        let mut inner = self.lock();
        inner.rx = None;
        inner.tx = None;
    }

    pub fn write_rx(&self, peer: &dyn Display, data: &[u8]) {
        self.write(Direction::Rx, peer, data);
    }

    pub fn write_tx(&self, peer: &dyn Display, data: &[u8]) {
        self.write(Direction::Tx, peer, data);
    }

    pub fn write(&self, direction: Direction, peer: &dyn Display, data: &[u8]) {
        if let Some(sink) = self.lock().sink_for(direction) {
            sink.record(direction, peer, data);
        }
    }

    /// Everything recorded so far for the receive direction.
    pub fn get_rx(&self) -> Vec<u8> {
        self.lock()
            .reader_for(Direction::Rx)
            .map(Sink::contents)
            .unwrap_or_default()
    }

    /// Everything recorded so far for the transmit direction.
    pub fn get_tx(&self) -> Vec<u8> {
        self.lock()
            .reader_for(Direction::Tx)
            .map(Sink::contents)
            .unwrap_or_default()
    }

    /// File paths of the open sinks (rx, tx); identical in `same` mode.
    pub fn paths(&self) -> (Option<PathBuf>, Option<PathBuf>) {
        let inner = self.lock();
        let rx = inner.reader_for(Direction::Rx).and_then(Sink::path).map(Path::to_path_buf);
        let tx = inner.reader_for(Direction::Tx).and_then(Sink::path).map(Path::to_path_buf);
        (rx, tx)
    }
}

impl std::fmt::Debug for WireLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireLog").field("config", &self.config()).finish()
    }
}

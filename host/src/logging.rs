/// Diagnostic logging to an append-only file.
///
/// stdout belongs to the framing protocol, so the subscriber never writes
/// there. Each event opens the log file in append mode, writes, and drops
/// the handle. If the file cannot be opened the event is discarded.
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "downloads.log";

const DEFAULT_FILTER: &str = "info";

/// `MakeWriter` that hands out a fresh append handle per event.
#[derive(Debug, Clone)]
pub struct AppendLog {
    path: PathBuf,
}

impl AppendLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Destination for one event.
pub enum LogSink {
    File(File),
    Discard,
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LogSink::File(file) => file.write(buf),
            LogSink::Discard => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogSink::File(file) => file.flush(),
            LogSink::Discard => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for AppendLog {
    type Writer = LogSink;

    fn make_writer(&'a self) -> Self::Writer {
        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(file) => LogSink::File(file),
            Err(_) => LogSink::Discard,
        }
    }
}

/// Install the global subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init(log_dir: &Path) {
    // Missing directory just means events get discarded.
    let _ = std::fs::create_dir_all(log_dir);

    let filter = EnvFilter::try_from_env("STREAMGRAB_LOG")
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(AppendLog::new(log_dir.join(LOG_FILE_NAME)))
        .with_timer(ChronoLocal::rfc_3339())
        .with_ansi(false)
        .with_target(false)
        .try_init();
}

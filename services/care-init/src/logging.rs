//! Logging initialization.
//!
//! Logs go to stderr so child stdout stays untouched. An optional init log
//! file keeps a capped JSON copy for post-mortem inspection.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use clap::ValueEnum;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Stderr log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Init log file that silently drops output past `cap` bytes.
///
/// Shared by every event, so the file and its byte count sit behind one lock.
struct CappedFile {
    inner: Mutex<(File, usize)>,
    cap: usize,
}

impl CappedFile {
    fn create(path: &Path, cap: usize) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            inner: Mutex::new((File::create(path)?, 0)),
            cap,
        })
    }
}

impl Write for &CappedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (file, used) = &mut *guard;
        let room = self.cap.saturating_sub(*used).min(buf.len());
        if room > 0 {
            file.write_all(&buf[..room])?;
            *used += room;
        }
        // Past the cap, bytes are dropped but still reported as written.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).0.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for &'static CappedFile {
    type Writer = &'static CappedFile;

    fn make_writer(&'a self) -> Self::Writer {
        *self
    }
}

/// Maximum init log size (1 MB).
const MAX_LOG_BYTES: usize = 1024 * 1024;

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
pub fn init(format: LogFormat, log_file: Option<&Path>) -> anyhow::Result<()> {
    let stderr_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_filter(filter())
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(io::stderr)
            .with_filter(filter())
            .boxed(),
    };

    let file_layer = match log_file {
        Some(path) => {
            // Leaked: the subscriber needs it for the life of the process.
            let file: &'static CappedFile =
                Box::leak(Box::new(CappedFile::create(path, MAX_LOG_BYTES)?));
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(file)
                    .with_filter(filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}

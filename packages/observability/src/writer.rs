//! Central log file writer and subscriber installation.
//!
//! Every process appends to the same JSONL file. Each write is flushed
//! immediately so lines from different processes interleave whole.

use crate::json_layer::JsonLayer;
use crate::LogConfig;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| {
        home.join(".channel-source")
            .join("logs")
            .join("channel.jsonl")
    })
}

/// Append-only writer shared by every clone.
#[derive(Clone)]
pub struct CentralLogWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl CentralLogWriter {
    /// Open `path` for appending, creating parent directories as needed.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }
}

impl Write for CentralLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let written = guard.write(buf)?;
        guard.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

/// [`MakeWriter`] handing out clones of one [`CentralLogWriter`].
#[derive(Clone)]
pub struct WriterFactory {
    writer: CentralLogWriter,
}

impl WriterFactory {
    pub fn new(writer: CentralLogWriter) -> Self {
        Self { writer }
    }
}

impl<'a> MakeWriter<'a> for WriterFactory {
    type Writer = CentralLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer.clone()
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the JSONL file layer plus the optional stderr layer.
pub(crate) fn init_subscriber(config: &LogConfig) {
    let log_path = config.log_path.clone().or_else(default_log_path);
    let (writer, open_error) = match log_path.as_deref().map(CentralLogWriter::open) {
        Some(Ok(writer)) => (Some(writer), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let json_layer = writer.map(|writer| {
        JsonLayer::new(config.service_name.clone(), WriterFactory::new(writer))
            .with_filter(env_filter(&config.default_level))
    });

    // Without a file, stderr is the only place logs can go.
    let stderr_layer = (config.also_stderr || json_layer.is_none()).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    let installed = tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();
    if !installed {
        return;
    }

    match (&log_path, open_error) {
        (Some(path), None) => tracing::info!(
            service = %config.service_name,
            log_path = %path.display(),
            "observability initialized"
        ),
        (Some(path), Some(e)) => tracing::warn!(
            log_path = %path.display(),
            error = %e,
            "Could not open log file, logging to stderr only"
        ),
        (None, _) => tracing::warn!("No home directory, logging to stderr only"),
    }
}

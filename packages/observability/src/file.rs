//! JSONL file output.
//!
//! Every event is appended as one line and flushed immediately, so the file
//! can be followed while the pipeline runs.

use crate::json_layer::JsonLayer;
use crate::{env_filter, InitError, LogConfig};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Append-only file writer shared by every event.
#[derive(Clone)]
pub struct FileLogWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl FileLogWriter {
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }
}

impl io::Write for FileLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let written = guard.write(buf)?;
        // Lines must reach the file before the next event.
        guard.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

/// `MakeWriter` handing out clones of one [`FileLogWriter`].
#[derive(Clone)]
pub struct WriterFactory {
    writer: FileLogWriter,
}

impl WriterFactory {
    pub fn new(writer: FileLogWriter) -> Self {
        Self { writer }
    }
}

impl<'a> MakeWriter<'a> for WriterFactory {
    type Writer = FileLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer.clone()
    }
}

/// Install a subscriber writing JSONL to `log_path`.
pub(crate) fn init_file_subscriber(config: &LogConfig, log_path: &Path) -> Result<(), InitError> {
    let writer = FileLogWriter::new(log_path).map_err(|source| InitError::OpenLogFile {
        path: log_path.to_path_buf(),
        source,
    })?;

    let json_layer = JsonLayer::new(config.service_name.clone(), WriterFactory::new(writer));

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    tracing_subscriber::registry()
        .with(json_layer.with_filter(env_filter(&config.default_level)))
        .with(stderr_layer)
        .try_init()
        .map_err(|_| InitError::AlreadyInitialized)?;

    tracing::info!(log_path = %log_path.display(), "logging initialized");
    Ok(())
}

use crate::error::{Error, Result};
use chrono::{SecondsFormat, Utc};
use futures_lite::io::{AsyncBufReadExt, AsyncRead, BufReader};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Tag written in front of every log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    /// Line read from the child's standard output
    Stdout,
    /// Line read from the child's standard error
    Stderr,
    /// Lifecycle event
    Info,
    /// Launch failure or abnormal exit
    Error,
}

impl fmt::Display for LogTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            LogTag::Stdout => "STDOUT",
            LogTag::Stderr => "STDERR",
            LogTag::Info => "INFO",
            LogTag::Error => "ERROR",
        };
        f.write_str(tag)
    }
}

/// Append-only log file for one server.
///
/// Cloning is cheap; all clones append to the same file. A sink whose file
/// could not be opened silently drops lines so that a broken log directory
/// never prevents a server from running.
#[derive(Debug, Clone)]
pub struct LogSink {
    path: PathBuf,
    file: Option<Arc<Mutex<File>>>,
}

impl LogSink {
    /// Open (or create) `<logs_dir>/<name>.log` in append mode
    pub fn open(logs_dir: &Path, name: &str) -> Result<Self> {
        let path = logs_dir.join(format!("{}.log", name));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                Error::LogSink(format!("Failed to open {}: {}", path.display(), e))
            })?;

        Ok(Self {
            path,
            file: Some(Arc::new(Mutex::new(file))),
        })
    }

    /// Open the sink, falling back to a sink that discards everything
    pub fn open_or_discard(logs_dir: &Path, name: &str) -> Self {
        Self::open(logs_dir, name).unwrap_or_else(|e| {
            tracing::warn!(server = %name, error = %e, "Server output will not be logged");
            Self {
                path: logs_dir.join(format!("{}.log", name)),
                file: None,
            }
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one tagged line
    pub fn write_line(&self, tag: LogTag, line: &str) {
        let Some(file) = &self.file else {
            return;
        };
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let Ok(mut file) = file.lock() else {
            return;
        };
        if let Err(e) = writeln!(file, "[{}] [{}] {}", timestamp, tag, line) {
            tracing::debug!(path = %self.path.display(), error = %e, "Failed to write log line");
        }
    }

    /// Copy every line of `reader` into the sink until EOF.
    ///
    /// Lines are split on raw bytes; invalid UTF-8 is written lossily and
    /// never ends the copy, so the child's pipe stays drained.
    pub(crate) fn forward<R>(&self, reader: R, tag: LogTag)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let sink = self.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        sink.write_line(tag, line.trim_end_matches(['\n', '\r']));
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::debug!(path = %sink.path.display(), error = %e, "Output stream closed");
                        break;
                    }
                }
            }
        });
    }
}

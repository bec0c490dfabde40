//! Per-test statistics log
//!
//! Messaging clients emit statistics as opaque JSON. Each test gets a sink
//! writing one JSON line per blob to `stats_<test>_<instance>.json` in the
//! configured directory. The file is created on first write, so tests that
//! never emit statistics leave nothing behind.

use crate::error::HarnessResult;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Lazily created JSON-lines statistics file
#[derive(Debug)]
pub struct StatsSink {
    test: String,
    instance: u64,
    path: Option<PathBuf>,
    file: Mutex<Option<BufWriter<File>>>,
}

impl StatsSink {
    /// Sink writing under `dir`; `None` discards everything
    pub fn new(dir: Option<&Path>, test: &str, instance: u64) -> Self {
        StatsSink {
            test: test.to_string(),
            instance,
            path: dir.map(|d| d.join(format!("stats_{}_{}.json", test, instance))),
            file: Mutex::new(None),
        }
    }

    /// Target file, if statistics are kept
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// True once the file exists
    pub fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    /// Append one statistics blob
    ///
    /// Blobs that are not valid JSON are stored as strings.
    pub fn write(&self, stats: &str) -> HarnessResult<()> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };

        let mut file = self.file.lock();
        if file.is_none() {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let f = OpenOptions::new().create(true).append(true).open(path)?;
            info!(
                target: "streamcheck::scheduler",
                "{}: Stats written to file {}",
                self.test,
                path.display()
            );
            *file = Some(BufWriter::new(f));
        }

        let stats: Value =
            serde_json::from_str(stats).unwrap_or_else(|_| Value::String(stats.to_string()));
        let line = json!({
            "test": self.test,
            "instance": self.instance,
            "stats": stats,
        });

        if let Some(writer) = file.as_mut() {
            writeln!(writer, "{}", line)?;
            writer.flush()?;
        }
        Ok(())
    }
}

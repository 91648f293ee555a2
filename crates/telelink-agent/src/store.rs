//! Delivered telemetry appended to a JSON-lines file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use telelink::{Record, TelemetryStore};
use tracing::warn;

pub struct JsonlStore {
    path: PathBuf,
    file: Mutex<BufWriter<File>>,
}

impl JsonlStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening telemetry store {}", path.display()))?;
        Ok(JsonlStore {
            path: path.to_path_buf(),
            file: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl TelemetryStore for JsonlStore {
    fn save(&self, record: &Record) -> bool {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let result = serde_json::to_writer(&mut *file, record)
            .map_err(std::io::Error::from)
            .and_then(|()| file.write_all(b"\n"))
            .and_then(|()| file.flush());
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "telemetry store write failed");
                false
            }
        }
    }
}

//! Deferred records carried across restarts in a JSON-lines file.
//!
//! Written at shutdown, read and removed at start.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use telelink::PendingItem;
use tracing::{info, warn};

/// Read and delete the spill file. A missing file is an empty backlog;
/// unreadable lines are skipped.
pub fn take(path: &Path) -> anyhow::Result<Vec<PendingItem>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("opening spill file {}", path.display())),
    };
    let mut items = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PendingItem>(&line) {
            Ok(item) => items.push(item),
            Err(e) => warn!(line = n + 1, error = %e, "skipping bad spill entry"),
        }
    }
    std::fs::remove_file(path).with_context(|| format!("removing {}", path.display()))?;
    info!(items = items.len(), path = %path.display(), "loaded deferred backlog");
    Ok(items)
}

/// Write `items` to the spill file, replacing it. Nothing is written for an
/// empty backlog.
pub fn save(path: &Path, items: &[PendingItem]) -> anyhow::Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("creating spill file {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for item in items {
        serde_json::to_writer(&mut out, item)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    info!(items = items.len(), path = %path.display(), "deferred backlog spilled");
    Ok(())
}

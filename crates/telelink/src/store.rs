//! Sink for delivered telemetry.
//!
//! The session forwards every delivered record, annotated with its sequence,
//! delivery status and the quality score at send time. A store that refuses
//! a record is logged and otherwise ignored.

use std::sync::Mutex;

use crate::codec::Record;

pub trait TelemetryStore: Send + Sync {
    /// Persist one record. `false` means it was not stored.
    fn save(&self, record: &Record) -> bool;
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetryStore for MemoryStore {
    fn save(&self, record: &Record) -> bool {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        true
    }
}

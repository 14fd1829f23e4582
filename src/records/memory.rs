//! In-memory record source, optionally seeded from a JSON fixture file.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{ConfigError, RecordError};
use crate::phone::CanonicalPhone;
use crate::records::{Record, RecordSource, find_by_phone};

/// Serves a fixed set of records without any network access.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordSource {
    records: Vec<Record>,
}

impl InMemoryRecordSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Load records from a JSON array in the same shape the record service returns.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let fixture_err = |reason: String| ConfigError::Fixtures {
            path: path.display().to_string(),
            reason,
        };

        let raw = std::fs::read_to_string(path).map_err(|e| fixture_err(e.to_string()))?;
        let records: Vec<Record> =
            serde_json::from_str(&raw).map_err(|e| fixture_err(e.to_string()))?;

        tracing::info!(
            "Loaded {} fixture record(s) from {}",
            records.len(),
            path.display()
        );
        Ok(Self::new(records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordSource for InMemoryRecordSource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch(&self, phone: &CanonicalPhone) -> Result<Option<Record>, RecordError> {
        Ok(find_by_phone(self.records.clone(), phone))
    }

    async fn list_all(&self) -> Result<Vec<Record>, RecordError> {
        Ok(self.records.clone())
    }
}

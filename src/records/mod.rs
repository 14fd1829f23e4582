//! Pharmacy records and the external record service.
//!
//! All lookups flow through [`RecordCache`], which owns the TTL entries,
//! coalesces concurrent fetches for the same phone, and retries transient
//! upstream failures through [`RetryPolicy`].

mod cache;
mod http;
mod memory;
mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RecordError;
use crate::phone::CanonicalPhone;

pub use cache::{CacheSettings, RecordCache};
pub use http::HttpRecordClient;
pub use memory::InMemoryRecordSource;
pub use retry::RetryPolicy;

/// A prescription line on a pharmacy record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prescription {
    pub drug: String,
    pub count: u32,
}

/// A pharmacy as known to the record service. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    pub city: String,
    pub state: String,
    #[serde(default)]
    pub prescriptions: Vec<Prescription>,
}

impl Record {
    /// Canonical form of this record's phone, if it has any digits.
    pub fn canonical_phone(&self) -> Option<CanonicalPhone> {
        CanonicalPhone::parse(&self.phone).ok()
    }

    /// Find a prescription by drug name, ignoring case.
    pub fn prescription(&self, drug: &str) -> Option<&Prescription> {
        self.prescriptions
            .iter()
            .find(|p| p.drug.eq_ignore_ascii_case(drug.trim()))
    }
}

/// Result of a successful lookup: a shared record or an explicit miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(Arc<Record>),
    NotFound,
}

impl Lookup {
    pub fn record(&self) -> Option<&Arc<Record>> {
        match self {
            Lookup::Found(record) => Some(record),
            Lookup::NotFound => None,
        }
    }
}

/// The external record service consumed by the cache.
///
/// Implementations report each failed attempt as a [`RecordError`]; the
/// cache decides whether to retry via [`RecordError::is_transient`].
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Source name for logs.
    fn name(&self) -> &str;

    /// Look up the record whose canonical phone equals `phone`.
    async fn fetch(&self, phone: &CanonicalPhone) -> Result<Option<Record>, RecordError>;

    /// Fetch every record.
    async fn list_all(&self) -> Result<Vec<Record>, RecordError>;
}

/// Pick the record matching a canonical phone out of a full listing.
pub(crate) fn find_by_phone(records: Vec<Record>, phone: &CanonicalPhone) -> Option<Record> {
    records
        .into_iter()
        .find(|r| r.canonical_phone().as_ref() == Some(phone))
}

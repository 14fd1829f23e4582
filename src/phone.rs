//! Phone number canonicalization.
//!
//! Every lookup key in the record cache is a [`CanonicalPhone`]. The
//! canonical form keeps digits only and drops the US country code from
//! 11-digit numbers, so `"+1-555-123-4567"`, `"(555) 123-4567"` and
//! `"5551234567"` all map to the same key.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A phone number in its single canonical textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalPhone(String);

impl CanonicalPhone {
    /// Canonicalize a raw phone string.
    ///
    /// Fails when the input contains no digits at all.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

        if digits.is_empty() {
            return Err(ProtocolError::InvalidPhone(raw.trim().to_string()));
        }

        if digits.len() == 11 && digits.starts_with('1') {
            digits.remove(0);
        }

        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalPhone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalPhone {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

//! Collection draft: the fields gathered so far for a new pharmacy.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::phone::CanonicalPhone;
use crate::records::Prescription;

/// A collectable pharmacy field.
///
/// Ordering is the order fields are reported and prompted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Phone,
    Name,
    City,
    State,
    Email,
}

impl Field {
    /// Fields that must be collected before registration completes, in prompt order.
    pub const REQUIRED: [Field; 4] = [Field::Name, Field::City, Field::State, Field::Email];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Phone => "phone",
            Field::Name => "name",
            Field::City => "city",
            Field::State => "state",
            Field::Email => "email",
        }
    }

    /// How the agent asks for this field.
    pub fn prompt(&self) -> &'static str {
        match self {
            Field::Phone => "What phone number should we use for the pharmacy?",
            Field::Name => "What is the name of your pharmacy?",
            Field::City => "Which city is the pharmacy located in?",
            Field::State => "Which state is the pharmacy in?",
            Field::Email => "What email address can we use to reach the pharmacy?",
        }
    }

    /// Check and normalize a raw value for this field.
    pub fn validate(&self, raw: &str) -> Result<String, ValidationError> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(ValidationError::Empty { field: *self });
        }
        match self {
            Field::Email => validate_email(value).map(str::to_string),
            _ => Ok(value.to_string()),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accept an email with a non-empty local part, one `@`, and a non-empty
/// domain containing at least one `.`.
pub fn validate_email(raw: &str) -> Result<&str, ValidationError> {
    let email = raw.trim();
    let invalid = || ValidationError::InvalidEmail {
        value: email.to_string(),
    };

    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') || !domain.contains('.') {
        return Err(invalid());
    }
    Ok(email)
}

/// Registration data handed back when collection completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PharmacyData {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub city: String,
    pub state: String,
    pub prescriptions: Vec<Prescription>,
}

/// In-progress set of collected fields. Owned by one collection agent.
#[derive(Debug, Clone)]
pub struct CollectionDraft {
    values: BTreeMap<Field, String>,
    prescriptions: Vec<String>,
}

impl CollectionDraft {
    /// Start a draft with the caller's phone already filled in.
    pub fn new(phone: &CanonicalPhone) -> Self {
        let mut values = BTreeMap::new();
        values.insert(Field::Phone, phone.to_string());
        Self {
            values,
            prescriptions: Vec::new(),
        }
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    /// Validate and store a value, overwriting any previous one.
    pub fn set(&mut self, field: Field, raw: &str) -> Result<(), ValidationError> {
        let value = field.validate(raw)?;
        self.values.insert(field, value);
        Ok(())
    }

    /// Append prescriptions, skipping blanks and names already listed.
    pub fn add_prescriptions<I, S>(&mut self, drugs: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for drug in drugs {
            let drug = drug.as_ref().trim();
            if drug.is_empty()
                || self
                    .prescriptions
                    .iter()
                    .any(|existing| existing.eq_ignore_ascii_case(drug))
            {
                continue;
            }
            self.prescriptions.push(drug.to_string());
        }
    }

    pub fn prescriptions(&self) -> &[String] {
        &self.prescriptions
    }

    /// Fields collected so far, in report order.
    pub fn collected(&self) -> Vec<Field> {
        self.values
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(f, _)| *f)
            .collect()
    }

    /// Required fields still missing, in prompt order.
    pub fn remaining(&self) -> Vec<Field> {
        Field::REQUIRED
            .into_iter()
            .filter(|f| self.get(*f).is_none_or(str::is_empty))
            .collect()
    }

    pub fn next_missing(&self) -> Option<Field> {
        self.remaining().into_iter().next()
    }

    /// Every required field present and the email valid.
    pub fn is_complete(&self) -> bool {
        self.remaining().is_empty()
            && self
                .get(Field::Email)
                .is_some_and(|e| validate_email(e).is_ok())
    }

    /// Snapshot of the draft as registration data, once complete.
    pub fn to_pharmacy_data(&self) -> Option<PharmacyData> {
        if !self.is_complete() {
            return None;
        }
        let value = |f: Field| self.get(f).unwrap_or_default().to_string();
        Some(PharmacyData {
            name: value(Field::Name),
            phone: value(Field::Phone),
            email: value(Field::Email),
            city: value(Field::City),
            state: value(Field::State),
            prescriptions: self
                .prescriptions
                .iter()
                .map(|drug| Prescription {
                    drug: drug.clone(),
                    count: 0,
                })
                .collect(),
        })
    }
}

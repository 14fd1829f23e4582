//! Informational agent: answers questions about one known pharmacy.
//!
//! Replies are built only from the bound [`Record`]; anything the record
//! doesn't hold is reported as missing rather than guessed.

use std::sync::Arc;

use crate::agent::memory::{ConversationWindow, Topic};
use crate::records::Record;

/// Words that follow "how many" without naming what is being counted.
const COUNT_FILLERS: &[&str] = &[
    "units", "unit", "of", "do", "does", "did", "you", "they", "we", "i", "the", "your", "their",
    "have", "has", "are", "is", "there", "left", "in", "on", "stock", "boxes", "bottles", "pills",
    "doses", "packs", "currently", "still", "got", "any", "those", "them", "it", "that", "this",
];

const PRESCRIPTION_WORDS: &[&str] = &[
    "prescription",
    "prescriptions",
    "drug",
    "drugs",
    "medication",
    "medications",
    "meds",
    "inventory",
];

const SUMMARY_WORDS: &[&str] = &[
    "everything",
    "summary",
    "overview",
    "details",
    "information",
    "info",
    "about",
    "profile",
];

const FOLLOW_UP_WORDS: &[&str] = &["it", "that", "those", "them", "again", "same"];

const THANKS_WORDS: &[&str] = &["thanks", "thank", "thx", "cheers"];

const GREETING_WORDS: &[&str] = &["hi", "hello", "hey", "morning", "afternoon", "evening"];

/// A single record field that can be asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detail {
    Name,
    Phone,
    Email,
    City,
    State,
    Location,
}

impl Detail {
    fn as_str(&self) -> &'static str {
        match self {
            Detail::Name => "name",
            Detail::Phone => "phone",
            Detail::Email => "email",
            Detail::City => "city",
            Detail::State => "state",
            Detail::Location => "location",
        }
    }

    fn from_topic(topic: &str) -> Option<Self> {
        [
            Detail::Name,
            Detail::Phone,
            Detail::Email,
            Detail::City,
            Detail::State,
            Detail::Location,
        ]
        .into_iter()
        .find(|d| d.as_str() == topic)
    }
}

/// What a message is asking.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Query {
    /// Count of a drug present on the record (record spelling).
    DrugCount(String),
    /// Count of something that is not on the record (caller spelling).
    MissingDrug(String),
    Prescriptions,
    Detail(Detail),
    Summary,
    Thanks,
    General,
}

/// Bound to one record for the life of the session.
#[derive(Debug)]
pub struct InfoAgent {
    record: Arc<Record>,
    history: ConversationWindow,
}

impl InfoAgent {
    pub fn new(record: Arc<Record>, history_window: usize) -> Self {
        tracing::info!(pharmacy = %record.name, "Initialized info agent");
        Self {
            record,
            history: ConversationWindow::new(history_window),
        }
    }

    pub fn record(&self) -> &Arc<Record> {
        &self.record
    }

    pub fn history(&self) -> &ConversationWindow {
        &self.history
    }

    pub fn greeting(&self) -> String {
        format!(
            "Hello! I can help you with information about {}. What would you like to know?",
            self.record.name
        )
    }

    /// Answer a message and record the exchange.
    pub fn handle(&mut self, text: &str) -> String {
        let query = self.classify(text);
        tracing::debug!(?query, "Classified info query");

        let reply = self.answer(&query);
        let topic = match &query {
            Query::DrugCount(drug) => Some(Topic::Drug(drug.clone())),
            Query::Prescriptions => Some(Topic::Prescriptions),
            Query::Detail(detail) => Some(Topic::Detail(detail.as_str().to_string())),
            Query::Summary => Some(Topic::Summary),
            Query::MissingDrug(_) | Query::Thanks | Query::General => None,
        };
        self.history.push(text, reply.clone(), topic);
        reply
    }

    fn classify(&self, text: &str) -> Query {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .collect();
        let has = |set: &[&str]| words.iter().any(|w| set.contains(w));

        if let Some(p) = self
            .record
            .prescriptions
            .iter()
            .find(|p| contains_phrase(&lower, &p.drug.to_lowercase()))
        {
            return Query::DrugCount(p.drug.clone());
        }

        if has(PRESCRIPTION_WORDS) {
            return Query::Prescriptions;
        }

        let counting = lower.contains("how many")
            || lower.contains("how much")
            || has(&["count", "quantity", "stock"]);
        if counting {
            if let Some(subject) = count_subject(&words) {
                return Query::MissingDrug(capitalize(subject));
            }
            return match self.history.last_drug() {
                Some(drug) => Query::DrugCount(drug.to_string()),
                None => Query::Prescriptions,
            };
        }

        if let Some(detail) = detail_for(&words) {
            return Query::Detail(detail);
        }

        if has(SUMMARY_WORDS) || lower.contains("tell me") {
            return Query::Summary;
        }

        let follow_up = lower.starts_with("and ")
            || lower.contains("what about")
            || lower.contains("how about")
            || has(FOLLOW_UP_WORDS);
        if follow_up {
            match self.history.last_topic() {
                Some(Topic::Drug(drug)) => return Query::DrugCount(drug.clone()),
                Some(Topic::Prescriptions) => return Query::Prescriptions,
                Some(Topic::Summary) => return Query::Summary,
                Some(Topic::Detail(topic)) => {
                    if let Some(detail) = Detail::from_topic(topic) {
                        return Query::Detail(detail);
                    }
                }
                Some(Topic::Collected(_)) | None => {}
            }
        }

        if has(THANKS_WORDS) {
            return Query::Thanks;
        }

        Query::General
    }

    fn answer(&self, query: &Query) -> String {
        let r = &self.record;
        match query {
            Query::DrugCount(drug) => match r.prescription(drug) {
                Some(p) => format!("{} has {} {} on record.", r.name, p.count, p.drug),
                None => self.missing_drug(drug),
            },
            Query::MissingDrug(drug) => self.missing_drug(drug),
            Query::Prescriptions => {
                if r.prescriptions.is_empty() {
                    return format!("{} has no prescriptions on record.", r.name);
                }
                let lines: Vec<String> = r
                    .prescriptions
                    .iter()
                    .enumerate()
                    .map(|(i, p)| format!("{}. {} - Quantity: {}", i + 1, p.drug, p.count))
                    .collect();
                format!(
                    "{} has {} prescription(s) on record:\n{}",
                    r.name,
                    r.prescriptions.len(),
                    lines.join("\n")
                )
            }
            Query::Detail(detail) => match detail {
                Detail::Name => format!("This pharmacy is {}.", r.name),
                Detail::Phone => format!("{}'s phone number is {}.", r.name, r.phone),
                Detail::Email => match &r.email {
                    Some(email) => format!("{}'s email address is {}.", r.name, email),
                    None => format!("I don't have an email address on file for {}.", r.name),
                },
                Detail::City => format!("{} is located in {}.", r.name, r.city),
                Detail::State => format!("{} is in {}.", r.name, r.state),
                Detail::Location => format!("{} is located in {}, {}.", r.name, r.city, r.state),
            },
            Query::Summary => {
                let mut lines = vec![
                    format!("Pharmacy: {}", r.name),
                    format!("Phone: {}", r.phone),
                ];
                if let Some(email) = &r.email {
                    lines.push(format!("Email: {}", email));
                }
                lines.push(format!("Location: {}, {}", r.city, r.state));
                lines.push(format!("Total Prescriptions: {}", r.prescriptions.len()));
                lines.join("\n")
            }
            Query::Thanks => format!(
                "You're welcome! Let me know if there's anything else about {} I can help with.",
                r.name
            ),
            Query::General => format!(
                "I can help with information about {}: its contact details, location, and \
                 prescriptions on record. What would you like to know?",
                r.name
            ),
        }
    }

    fn missing_drug(&self, drug: &str) -> String {
        let r = &self.record;
        if r.prescriptions.is_empty() {
            return format!(
                "I don't see {} on record for {}. It has no prescriptions on record.",
                drug, r.name
            );
        }
        let known: Vec<&str> = r.prescriptions.iter().map(|p| p.drug.as_str()).collect();
        format!(
            "I don't see {} on record for {}. Prescriptions on record: {}.",
            drug,
            r.name,
            known.join(", ")
        )
    }
}

/// First word after "how many"/"how much" that names a subject.
fn count_subject<'a>(words: &[&'a str]) -> Option<&'a str> {
    let start = words
        .windows(2)
        .position(|w| w[0] == "how" && (w[1] == "many" || w[1] == "much"))?
        + 2;
    words[start..]
        .iter()
        .copied()
        .find(|w| !COUNT_FILLERS.contains(w) && !GREETING_WORDS.contains(w))
}

fn detail_for(words: &[&str]) -> Option<Detail> {
    let has = |set: &[&str]| words.iter().any(|w| set.contains(w));
    if has(&["email", "e", "mail"]) {
        Some(Detail::Email)
    } else if has(&["phone", "number", "telephone", "call"]) {
        Some(Detail::Phone)
    } else if has(&["where", "located", "location", "address"]) {
        Some(Detail::Location)
    } else if has(&["city", "town"]) {
        Some(Detail::City)
    } else if has(&["state"]) {
        Some(Detail::State)
    } else if has(&["name", "called"]) {
        Some(Detail::Name)
    } else {
        None
    }
}

/// Whether `needle` occurs in `haystack` on word boundaries.
fn contains_phrase(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

//! Field extraction for the collection agent.
//!
//! Extractors only find candidate values. Validation happens when the
//! collection agent applies them to its draft.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::agent::draft::Field;
use crate::error::ExtractionError;

/// Candidate values pulled out of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub fields: Vec<(Field, String)>,
    pub prescriptions: Vec<String>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.prescriptions.is_empty()
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.fields
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| v.as_str())
    }

    /// Add a value unless the field was already found in this message.
    pub fn insert(&mut self, field: Field, value: impl Into<String>) {
        let value = value.into();
        let value = value.trim();
        if value.is_empty() || self.get(field).is_some() {
            return;
        }
        self.fields.push((field, value.to_string()));
    }
}

/// Pulls pharmacy fields out of free text.
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    /// Extractor name for logs.
    fn name(&self) -> &str;

    /// Extract any fields present in `text`. `remaining` lists the
    /// required fields not yet collected, first one being the field the
    /// caller was last asked for.
    async fn extract(&self, text: &str, remaining: &[Field]) -> Result<Extraction, ExtractionError>;
}

/// Deterministic pattern-based extractor.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleExtractor;

impl RuleExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous extraction, shared with the LLM fallback path.
    pub fn extract_now(&self, text: &str, remaining: &[Field]) -> Extraction {
        let mut out = Extraction::default();
        let text = text.trim();
        if text.is_empty() {
            return out;
        }

        if let Some(email) = email_token(text) {
            out.insert(Field::Email, email);
        } else if let Some(c) = explicit_email_re().captures(text) {
            out.insert(Field::Email, strip_punctuation(&c[1]));
        }

        if let Some(c) = explicit_name_re().captures(text) {
            out.insert(Field::Name, clip_clause(&c[1]));
        } else if let Some(c) = name_cue_re().captures(text) {
            out.insert(Field::Name, trim_connectors(&c[1]));
        }

        if let Some(c) = explicit_city_re().captures(text) {
            out.insert(Field::City, clip_clause(&c[1]));
        }
        if let Some(c) = explicit_state_re().captures(text) {
            out.insert(Field::State, clip_clause(&c[1]));
        }

        for c in location_re().captures_iter(text) {
            if let Some(state) = match_state(&c[2]) {
                out.insert(Field::City, &c[1]);
                out.insert(Field::State, state);
                break;
            }
        }
        if out.get(Field::City).is_none()
            && let Some(c) = city_only_re().captures(text)
        {
            out.insert(Field::City, &c[1]);
        }

        if let Some(c) = prescriptions_re().captures(text) {
            out.prescriptions = split_list(&c[1]);
        }

        if out.is_empty() {
            bare_answer(text, remaining, &mut out);
        }

        out
    }
}

#[async_trait]
impl FieldExtractor for RuleExtractor {
    fn name(&self) -> &str {
        "rules"
    }

    async fn extract(&self, text: &str, remaining: &[Field]) -> Result<Extraction, ExtractionError> {
        Ok(self.extract_now(text, remaining))
    }
}

/// A short reply with no cues, taken as the answer to the pending prompt.
fn bare_answer(text: &str, remaining: &[Field], out: &mut Extraction) {
    if text.ends_with('?') || text.split_whitespace().count() > 6 {
        return;
    }
    let lower = text.to_lowercase();
    let first_word = lower
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or_default();
    if NON_ANSWERS.contains(&first_word) {
        return;
    }

    if let Some((city, state)) = text.split_once(',')
        && let Some(state) = match_state(state)
        && remaining.contains(&Field::City)
    {
        out.insert(Field::City, strip_punctuation(city));
        out.insert(Field::State, state);
        return;
    }

    match remaining.first() {
        Some(Field::Email) | None => {}
        Some(Field::State) => {
            if let Some(state) = match_state(text) {
                out.insert(Field::State, state);
            } else {
                out.insert(Field::State, strip_punctuation(text));
            }
        }
        Some(field) => out.insert(*field, strip_punctuation(text)),
    }
}

const NON_ANSWERS: &[&str] = &[
    "hi", "hello", "hey", "thanks", "thank", "ok", "okay", "yes", "no", "sure", "help", "what",
    "why", "how", "who", "um", "uh", "hmm", "sorry",
];

const STATES: &[(&str, &str)] = &[
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("DC", "District of Columbia"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
];

/// Recognize a US state at the start of `raw`, as a code or a name.
/// Returns the text as written.
fn match_state(raw: &str) -> Option<String> {
    let words: Vec<&str> = raw
        .split(|c: char| c.is_whitespace() || c == ',' || c == '.')
        .filter(|w| !w.is_empty())
        .collect();
    let first = *words.first()?;

    if first.len() == 2
        && first.chars().all(|c| c.is_ascii_uppercase())
        && STATES.iter().any(|(code, _)| *code == first)
    {
        return Some(first.to_string());
    }

    // Longest name first so "New York" wins over a lone "New".
    for take in (1..=words.len().min(3)).rev() {
        let candidate = words[..take].join(" ");
        if STATES
            .iter()
            .any(|(_, name)| name.eq_ignore_ascii_case(&candidate))
        {
            return Some(candidate);
        }
    }
    None
}

fn email_token(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(strip_punctuation)
        .find(|token| token.contains('@'))
        .map(str::to_string)
}

fn strip_punctuation(raw: &str) -> &str {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | '(' | ')' | '<' | '>' | '"' | '\''))
}

/// Cut a free-form value at the next clause boundary.
fn clip_clause(raw: &str) -> &str {
    let lower = raw.to_ascii_lowercase();
    let end = [" and ", " but ", " in ", " with "]
        .iter()
        .filter_map(|sep| lower.find(sep))
        .min()
        .unwrap_or(raw.len());
    strip_punctuation(&raw[..end])
}

fn trim_connectors(raw: &str) -> &str {
    let mut value = strip_punctuation(raw);
    loop {
        let trimmed = ["and", "of", "&"]
            .iter()
            .find_map(|w| value.strip_suffix(w).filter(|rest| rest.ends_with(' ')));
        match trimmed {
            Some(rest) => value = rest.trim_end(),
            None => return value,
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .flat_map(|part| part.split(" and "))
        .map(|item| {
            let item = strip_punctuation(item);
            item.strip_prefix("and ").unwrap_or(item).trim()
        })
        .filter(|item| !item.is_empty() && item.len() <= 40)
        .map(str::to_string)
        .collect()
}

fn explicit_email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\be-?mail(?:\s+address)?\s*(?:is|:)\s*(\S+)").expect("static regex")
    })
}

fn explicit_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:pharmacy\s+name|name)\s*(?:is|:)\s*([^,.;\n]+)").expect("static regex")
    })
}

fn name_cue_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(?i:we're|we are|this is|calling from|our pharmacy is|it's called|we're called)\s+([A-Z][\w'&.-]*(?:\s+(?:[A-Z][\w'&.-]*|&|and|of))*)",
        )
        .expect("static regex")
    })
}

fn explicit_city_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bcity\s*(?:is|:)\s*([^,.;\n]+)").expect("static regex"))
}

fn explicit_state_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bstate\s*(?:is|:)\s*([^,.;\n]+)").expect("static regex"))
}

fn location_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?i:in|at|from)\s+([A-Z][\w.'-]*(?:\s+[A-Z][\w.'-]*)*),\s*([A-Za-z][\w ]*)")
            .expect("static regex")
    })
}

fn city_only_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?i:located in|based in|we're in|we are in)\s+([A-Z][\w.'-]*(?:\s+[A-Z][\w.'-]*)*)")
            .expect("static regex")
    })
}

fn prescriptions_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:we\s+(?:stock|carry|dispense)|(?:prescriptions?|medications?)\s*(?:are|include|:))\s+([^.;\n]+)",
        )
        .expect("static regex")
    })
}

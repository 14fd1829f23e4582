//! Bounded conversation history for a session.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// What an exchange was about, so follow-ups can refer back to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    /// A specific drug on the record.
    Drug(String),
    /// A single record field such as email or city.
    Detail(String),
    /// The full prescription list.
    Prescriptions,
    /// The whole record.
    Summary,
    /// Registration fields that were collected.
    Collected(Vec<String>),
}

/// One user message and the agent's reply.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub user: String,
    pub reply: String,
    pub topic: Option<Topic>,
    pub at: DateTime<Utc>,
}

/// Sliding window over the most recent exchanges.
#[derive(Debug, Clone)]
pub struct ConversationWindow {
    exchanges: VecDeque<Exchange>,
    max_exchanges: usize,
}

impl ConversationWindow {
    /// Create a window keeping at most `max_exchanges` (minimum 1).
    pub fn new(max_exchanges: usize) -> Self {
        let max_exchanges = max_exchanges.max(1);
        Self {
            exchanges: VecDeque::with_capacity(max_exchanges),
            max_exchanges,
        }
    }

    /// Record an exchange, dropping the oldest beyond the window.
    pub fn push(&mut self, user: impl Into<String>, reply: impl Into<String>, topic: Option<Topic>) {
        self.exchanges.push_back(Exchange {
            user: user.into(),
            reply: reply.into(),
            topic,
            at: Utc::now(),
        });
        while self.exchanges.len() > self.max_exchanges {
            self.exchanges.pop_front();
        }
    }

    /// Most recent topic, newest first.
    pub fn last_topic(&self) -> Option<&Topic> {
        self.exchanges.iter().rev().find_map(|e| e.topic.as_ref())
    }

    /// Most recently discussed drug.
    pub fn last_drug(&self) -> Option<&str> {
        self.exchanges.iter().rev().find_map(|e| match &e.topic {
            Some(Topic::Drug(drug)) => Some(drug.as_str()),
            _ => None,
        })
    }

    pub fn exchanges(&self) -> impl Iterator<Item = &Exchange> {
        self.exchanges.iter()
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_exchanges
    }

    pub fn clear(&mut self) {
        self.exchanges.clear();
    }
}

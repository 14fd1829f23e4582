//! Collection agent: registers a pharmacy the record service doesn't know.

use std::sync::Arc;

use crate::agent::AgentEvent;
use crate::agent::draft::{CollectionDraft, Field};
use crate::agent::extractor::FieldExtractor;
use crate::agent::memory::{ConversationWindow, Topic};
use crate::error::{ProtocolError, ValidationError};
use crate::phone::CanonicalPhone;

/// Drives a [`CollectionDraft`] to completion, one message at a time.
pub struct CollectionAgent {
    phone: CanonicalPhone,
    draft: CollectionDraft,
    extractor: Arc<dyn FieldExtractor>,
    history: ConversationWindow,
    complete: bool,
}

impl CollectionAgent {
    pub fn new(
        phone: CanonicalPhone,
        extractor: Arc<dyn FieldExtractor>,
        history_window: usize,
    ) -> Self {
        tracing::info!(phone = %phone, extractor = extractor.name(), "Initialized collection agent");
        Self {
            draft: CollectionDraft::new(&phone),
            phone,
            extractor,
            history: ConversationWindow::new(history_window),
            complete: false,
        }
    }

    pub fn draft(&self) -> &CollectionDraft {
        &self.draft
    }

    pub fn history(&self) -> &ConversationWindow {
        &self.history
    }

    /// Whether registration finished. A complete agent accepts no messages.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn greeting(&self) -> String {
        let prompt = self
            .draft
            .next_missing()
            .map(|f| f.prompt())
            .unwrap_or_default();
        format!(
            "Hello! I don't see a pharmacy registered for {} yet, so let's get you set up. {}",
            self.phone, prompt
        )
    }

    /// Apply whatever fields `text` carries and report progress.
    pub async fn handle(&mut self, text: &str) -> Result<Vec<AgentEvent>, ProtocolError> {
        if self.complete {
            return Err(ProtocolError::CollectionComplete);
        }

        let remaining = self.draft.remaining();
        let extraction = match self.extractor.extract(text, &remaining).await {
            Ok(extraction) => extraction,
            Err(e) => {
                tracing::warn!(extractor = self.extractor.name(), "Field extraction failed: {}", e);
                let reply = format!(
                    "Sorry, I had trouble processing that. {}",
                    self.next_prompt()
                );
                self.history.push(text, reply.clone(), None);
                return Ok(vec![AgentEvent::Response { content: reply }]);
            }
        };

        if extraction.is_empty() {
            let reply = format!(
                "I didn't catch any registration details there. {}",
                self.next_prompt()
            );
            self.history.push(text, reply.clone(), None);
            return Ok(vec![AgentEvent::Response { content: reply }]);
        }

        let mut accepted: Vec<(Field, String)> = Vec::new();
        let mut rejected: Vec<ValidationError> = Vec::new();
        for (field, value) in &extraction.fields {
            match self.draft.set(*field, value) {
                Ok(()) => {
                    let stored = self.draft.get(*field).unwrap_or_default().to_string();
                    accepted.push((*field, stored));
                }
                Err(e) => {
                    tracing::debug!(field = %field, "Rejected field value: {}", e);
                    rejected.push(e);
                }
            }
        }
        let before = self.draft.prescriptions().len();
        self.draft.add_prescriptions(&extraction.prescriptions);
        let added = &self.draft.prescriptions()[before..];

        let mut parts = Vec::new();
        if !accepted.is_empty() {
            let items: Vec<String> = accepted
                .iter()
                .map(|(field, value)| format!("{} {}", field, value))
                .collect();
            parts.push(format!("Got it: {}.", items.join(", ")));
        }
        if !added.is_empty() {
            parts.push(format!("Noted prescriptions: {}.", added.join(", ")));
        }
        for e in &rejected {
            parts.push(format!("{}.", e.to_string().trim_end_matches('.')));
        }

        let fields_remaining = self.draft.remaining();
        if fields_remaining.is_empty() {
            parts.push("That's everything I need.".to_string());
        } else {
            parts.push(self.next_prompt().to_string());
        }
        let content = parts.join(" ");

        let topic = Topic::Collected(
            accepted
                .iter()
                .map(|(field, _)| field.as_str().to_string())
                .collect(),
        );
        self.history.push(text, content.clone(), Some(topic));

        let mut events = vec![AgentEvent::Progress {
            content,
            fields_collected: self.draft.collected(),
            fields_remaining,
        }];

        if let Some(pharmacy_data) = self.draft.to_pharmacy_data() {
            self.complete = true;
            tracing::info!(phone = %self.phone, name = %pharmacy_data.name, "Pharmacy registration complete");
            events.push(AgentEvent::Complete {
                content: format!(
                    "Thank you! {} in {}, {} is now registered. We'll reach you at {}.",
                    pharmacy_data.name, pharmacy_data.city, pharmacy_data.state, pharmacy_data.email
                ),
                pharmacy_data,
            });
        }

        Ok(events)
    }

    fn next_prompt(&self) -> &'static str {
        self.draft
            .next_missing()
            .map(|f| f.prompt())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for CollectionAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionAgent")
            .field("phone", &self.phone)
            .field("draft", &self.draft)
            .field("extractor", &self.extractor.name())
            .field("complete", &self.complete)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::agent::extractor::{Extraction, RuleExtractor};
    use crate::error::ExtractionError;

    fn agent() -> CollectionAgent {
        CollectionAgent::new(
            CanonicalPhone::parse("+1-555-000-0000").unwrap(),
            Arc::new(RuleExtractor::new()),
            10,
        )
    }

    struct BrokenExtractor;

    #[async_trait]
    impl FieldExtractor for BrokenExtractor {
        fn name(&self) -> &str {
            "broken"
        }

        async fn extract(&self, _: &str, _: &[Field]) -> Result<Extraction, ExtractionError> {
            Err(ExtractionError::RequestFailed {
                provider: "broken".to_string(),
                reason: "down".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_bulk_message_completes() {
        let mut agent = agent();
        let events = agent
            .handle("We're Sunrise Pharmacy in Austin, TX, contact sunrise@example.com")
            .await
            .unwrap();

        assert_eq!(events.len(), 2);
        match &events[0] {
            AgentEvent::Progress {
                fields_collected,
                fields_remaining,
                ..
            } => {
                assert_eq!(
                    fields_collected,
                    &vec![Field::Phone, Field::Name, Field::City, Field::State, Field::Email]
                );
                assert!(fields_remaining.is_empty());
            }
            other => panic!("expected progress, got {other:?}"),
        }
        match &events[1] {
            AgentEvent::Complete { pharmacy_data, .. } => {
                assert_eq!(pharmacy_data.name, "Sunrise Pharmacy");
                assert_eq!(pharmacy_data.city, "Austin");
                assert_eq!(pharmacy_data.state, "TX");
                assert_eq!(pharmacy_data.email, "sunrise@example.com");
                assert_eq!(pharmacy_data.phone, "5550000000");
            }
            other => panic!("expected complete, got {other:?}"),
        }
        assert!(agent.is_complete());
    }

    #[tokio::test]
    async fn test_inert_after_completion() {
        let mut agent = agent();
        agent
            .handle("We're Sunrise Pharmacy in Austin, TX, contact sunrise@example.com")
            .await
            .unwrap();
        assert_eq!(
            agent.handle("one more thing").await.unwrap_err(),
            ProtocolError::CollectionComplete
        );
    }

    #[tokio::test]
    async fn test_bad_email_stays_remaining() {
        let mut agent = agent();
        let events = agent.handle("Email: sunrise.example.com").await.unwrap();
        match &events[..] {
            [AgentEvent::Progress {
                content,
                fields_remaining,
                ..
            }] => {
                assert!(fields_remaining.contains(&Field::Email));
                assert!(content.contains("valid email"), "{content}");
            }
            other => panic!("unexpected events {other:?}"),
        }
        assert!(!agent.is_complete());
    }

    #[tokio::test]
    async fn test_nothing_extracted_prompts_next_field() {
        let mut agent = agent();
        let events = agent.handle("hello there").await.unwrap();
        assert_eq!(
            events,
            vec![AgentEvent::Response {
                content: format!(
                    "I didn't catch any registration details there. {}",
                    Field::Name.prompt()
                )
            }]
        );
        assert_eq!(agent.draft().remaining(), Field::REQUIRED.to_vec());
    }

    #[tokio::test]
    async fn test_sequential_answers_and_overwrite() {
        let mut agent = agent();
        agent.handle("Sunrise").await.unwrap();
        agent.handle("Name is Sunrise Pharmacy").await.unwrap();
        assert_eq!(agent.draft().get(Field::Name), Some("Sunrise Pharmacy"));

        agent.handle("Austin").await.unwrap();
        agent.handle("Texas").await.unwrap();
        let events = agent.handle("sunrise@example.com").await.unwrap();

        assert!(matches!(events.last(), Some(AgentEvent::Complete { .. })));
        assert_eq!(agent.draft().get(Field::State), Some("Texas"));
    }

    #[tokio::test]
    async fn test_prescriptions_never_block_completion() {
        let mut agent = agent();
        let events = agent.handle("We stock Lisinopril and Metformin").await.unwrap();
        match &events[..] {
            [AgentEvent::Progress {
                fields_remaining, ..
            }] => assert_eq!(fields_remaining, &Field::REQUIRED.to_vec()),
            other => panic!("unexpected events {other:?}"),
        }

        let events = agent
            .handle("We're Sunrise Pharmacy in Austin, TX, contact sunrise@example.com")
            .await
            .unwrap();
        match events.last() {
            Some(AgentEvent::Complete { pharmacy_data, .. }) => {
                let drugs: Vec<&str> = pharmacy_data
                    .prescriptions
                    .iter()
                    .map(|p| p.drug.as_str())
                    .collect();
                assert_eq!(drugs, vec!["Lisinopril", "Metformin"]);
                assert!(pharmacy_data.prescriptions.iter().all(|p| p.count == 0));
            }
            other => panic!("expected complete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_extractor_failure_is_soft() {
        let mut agent = CollectionAgent::new(
            CanonicalPhone::parse("5550000000").unwrap(),
            Arc::new(BrokenExtractor),
            10,
        );
        let events = agent.handle("We're Sunrise Pharmacy").await.unwrap();
        assert!(matches!(&events[..], [AgentEvent::Response { .. }]));
        assert_eq!(agent.history().len(), 1);
    }

    #[test]
    fn test_greeting_names_phone_and_first_field() {
        let greeting = agent().greeting();
        assert!(greeting.contains("5550000000"));
        assert!(greeting.contains(Field::Name.prompt()));
    }
}

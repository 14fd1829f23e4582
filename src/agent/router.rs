//! Picks the agent for a session from the caller's phone.

use std::sync::Arc;

use crate::agent::{Agent, CollectionAgent, FieldExtractor, InfoAgent};
use crate::error::RouteError;
use crate::phone::CanonicalPhone;
use crate::records::{Lookup, RecordCache};

/// Resolves a phone to an informational or collection agent.
#[derive(Clone)]
pub struct AgentRouter {
    cache: RecordCache,
    extractor: Arc<dyn FieldExtractor>,
    history_window: usize,
}

impl AgentRouter {
    pub fn new(
        cache: RecordCache,
        extractor: Arc<dyn FieldExtractor>,
        history_window: usize,
    ) -> Self {
        Self {
            cache,
            extractor,
            history_window,
        }
    }

    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }

    /// Canonicalize `phone`, look it up, and build the matching agent.
    ///
    /// A known record yields [`Agent::Info`]; a miss yields
    /// [`Agent::Collection`] with the phone pre-filled.
    pub async fn resolve(&self, phone: &str) -> Result<Agent, RouteError> {
        let key = CanonicalPhone::parse(phone)?;
        self.resolve_key(&key).await
    }

    /// [`resolve`](Self::resolve) for an already canonical phone.
    pub async fn resolve_key(&self, key: &CanonicalPhone) -> Result<Agent, RouteError> {
        let agent = match self.cache.get_or_fetch(key).await? {
            Lookup::Found(record) => Agent::Info(InfoAgent::new(record, self.history_window)),
            Lookup::NotFound => Agent::Collection(CollectionAgent::new(
                key.clone(),
                Arc::clone(&self.extractor),
                self.history_window,
            )),
        };

        tracing::info!(phone = %key, agent = %agent.kind(), "Routed session");
        Ok(agent)
    }
}

impl std::fmt::Debug for AgentRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRouter")
            .field("extractor", &self.extractor.name())
            .field("history_window", &self.history_window)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::agent::{AgentKind, RuleExtractor};
    use crate::error::{CacheError, ProtocolError};
    use crate::records::{
        CacheSettings, InMemoryRecordSource, Prescription, Record, RetryPolicy,
    };

    fn router() -> AgentRouter {
        let source = InMemoryRecordSource::new(vec![Record {
            id: 1,
            name: "HealthFirst Pharmacy".to_string(),
            phone: "+1-555-123-4567".to_string(),
            email: None,
            city: "New York".to_string(),
            state: "NY".to_string(),
            prescriptions: vec![Prescription {
                drug: "Lisinopril".to_string(),
                count: 42,
            }],
        }]);
        let cache = RecordCache::new(
            Arc::new(source),
            CacheSettings {
                ttl: Duration::from_secs(60),
                retry: RetryPolicy::new(1, Duration::from_millis(1), Duration::from_secs(1)),
            },
        );
        AgentRouter::new(cache, Arc::new(RuleExtractor::new()), 10)
    }

    #[tokio::test]
    async fn test_known_phone_gets_info_agent() {
        let router = router();
        for raw in ["+1-555-123-4567", "(555) 123-4567", "15551234567"] {
            let agent = router.resolve(raw).await.unwrap();
            assert_eq!(agent.kind(), AgentKind::Info, "{raw}");
        }
    }

    #[tokio::test]
    async fn test_unknown_phone_gets_collection_agent_with_phone() {
        let agent = router().resolve("+1-555-000-0000").await.unwrap();
        match agent {
            Agent::Collection(agent) => {
                assert_eq!(agent.draft().get(crate::agent::Field::Phone), Some("5550000000"));
            }
            other => panic!("expected collection agent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_phone() {
        let err = router().resolve("not a phone").await.unwrap_err();
        assert!(matches!(
            err,
            RouteError::Protocol(ProtocolError::InvalidPhone(_))
        ));
    }

    #[tokio::test]
    async fn test_upstream_failure_surfaces() {
        let cache = RecordCache::new(
            Arc::new(crate::records::HttpRecordClient::new(&crate::config::RecordApiConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                timeout: Duration::from_millis(200),
                retry_count: 1,
                retry_delay: Duration::from_millis(1),
                fixtures_path: None,
            })),
            CacheSettings {
                ttl: Duration::from_secs(60),
                retry: RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(200)),
            },
        );
        let router = AgentRouter::new(cache, Arc::new(RuleExtractor::new()), 10);
        let err = router.resolve("5551234567").await.unwrap_err();
        assert!(matches!(
            err,
            RouteError::Upstream(CacheError::Upstream { .. })
        ));
    }
}

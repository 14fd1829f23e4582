//! Wiring: builds the shared components from [`Config`] and runs the
//! gateway until shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent::{
    AgentRouter, FieldExtractor, LlmExtractor, RuleExtractor, SessionRegistry, spawn_reaper,
};
use crate::channels::web::{GatewayServer, GatewayState};
use crate::config::Config;
use crate::error::{ChannelError, Error};
use crate::records::{HttpRecordClient, InMemoryRecordSource, RecordCache, RecordSource};

/// Process-wide components shared by every session.
pub struct App {
    pub config: Config,
    pub cache: RecordCache,
    pub router: AgentRouter,
    pub registry: Arc<SessionRegistry>,
}

impl App {
    /// Build from config, choosing the fixture file or the HTTP record
    /// service as the source.
    pub fn from_config(config: Config) -> Result<Self, Error> {
        let source: Arc<dyn RecordSource> = match &config.records.fixtures_path {
            Some(path) => {
                let source = InMemoryRecordSource::from_json_file(path)?;
                tracing::info!(
                    "Serving {} record(s) from fixtures at {}",
                    source.len(),
                    path.display()
                );
                Arc::new(source)
            }
            None => {
                tracing::info!("Using record service at {}", config.records.base_url);
                Arc::new(HttpRecordClient::new(&config.records))
            }
        };
        Ok(Self::with_source(config, source))
    }

    /// Build around an explicit record source.
    pub fn with_source(config: Config, source: Arc<dyn RecordSource>) -> Self {
        let cache = RecordCache::new(source, config.cache_settings());

        let extractor: Arc<dyn FieldExtractor> = match &config.extractor.api_key {
            Some(_) => match LlmExtractor::new(&config.extractor) {
                Ok(llm) => {
                    tracing::info!("Using LLM field extraction ({})", config.extractor.model);
                    Arc::new(llm)
                }
                Err(e) => {
                    tracing::warn!("LLM extractor unavailable, using rules: {}", e);
                    Arc::new(RuleExtractor::new())
                }
            },
            None => Arc::new(RuleExtractor::new()),
        };

        let router = AgentRouter::new(cache.clone(), extractor, config.session.history_window);

        Self {
            config,
            cache,
            router,
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    pub fn gateway_state(&self) -> Arc<GatewayState> {
        Arc::new(GatewayState::new(
            Arc::clone(&self.registry),
            self.router.clone(),
            self.config.environment,
        ))
    }

    /// Serve the gateway and the idle reaper until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let addr = resolve_addr(&self.config.server.host, self.config.server.port).await?;

        let reaper_stop = CancellationToken::new();
        let reaper = spawn_reaper(
            Arc::clone(&self.registry),
            self.config.session.reap_interval,
            self.config.session.idle_threshold,
            reaper_stop.clone(),
        );

        let mut server = GatewayServer::new(addr, self.gateway_state());
        if let Err(e) = server.start().await {
            reaper_stop.cancel();
            return Err(e.into());
        }

        shutdown.await;
        tracing::info!("Shutdown requested");

        server.shutdown().await;
        reaper_stop.cancel();
        let _ = reaper.await;
        self.cache.shutdown().await;

        tracing::info!("Shutdown complete");
        Ok(())
    }
}

async fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr, ChannelError> {
    let startup_failed = |reason: String| ChannelError::StartupFailed {
        name: "gateway".to_string(),
        reason,
    };
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| startup_failed(format!("Cannot resolve {}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| startup_failed(format!("No address for {}:{}", host, port)))
}

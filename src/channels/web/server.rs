//! Gateway listener lifecycle.
//!
//! Shutdown order matters: open sessions are closed first so their
//! WebSocket tasks finish, then the listener stops accepting and drains
//! in-flight HTTP requests for at most [`DRAIN_TIMEOUT`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::channels::web::{self, GatewayState};
use crate::error::ChannelError;

/// How long shutdown waits for the server task before aborting it.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Serves the gateway routes for one [`GatewayState`].
pub struct GatewayServer {
    addr: SocketAddr,
    state: Arc<GatewayState>,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl GatewayServer {
    pub fn new(addr: SocketAddr, state: Arc<GatewayState>) -> Self {
        Self {
            addr,
            state,
            local_addr: None,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind and spawn the server. Returns the bound address, which
    /// differs from the configured one for port 0.
    pub async fn start(&mut self) -> Result<SocketAddr, ChannelError> {
        if let Some(addr) = self.local_addr {
            return Ok(addr);
        }

        let startup_failed = |reason: String| ChannelError::StartupFailed {
            name: "gateway".to_string(),
            reason,
        };

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| startup_failed(format!("Failed to bind to {}: {}", self.addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| startup_failed(format!("Failed to read bound address: {}", e)))?;

        tracing::info!(
            environment = %self.state.environment,
            "Gateway listening on {}",
            local_addr
        );

        let app = web::routes(Arc::clone(&self.state));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                tracing::error!("Gateway server error: {}", e);
            }
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.handle = Some(handle);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Close every open session, then stop the listener. Returns how many
    /// sessions were closed.
    pub async fn shutdown(&mut self) -> usize {
        let closed = self.state.registry.close_all().await;
        if closed > 0 {
            tracing::info!("Closed {} open session(s)", closed);
        }

        if let Some(tx) = self.shutdown_tx.take() {
            tracing::info!("Gateway shutting down");
            let _ = tx.send(());
        }
        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await.is_err() {
                tracing::warn!("Gateway did not drain within {:?}; aborting", DRAIN_TIMEOUT);
                handle.abort();
            }
        }
        self.local_addr = None;
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentRouter, RuleExtractor, SessionRegistry};
    use crate::config::Environment;
    use crate::records::{CacheSettings, InMemoryRecordSource, RecordCache};

    fn state() -> Arc<GatewayState> {
        let cache = RecordCache::new(
            Arc::new(InMemoryRecordSource::new(Vec::new())),
            CacheSettings::default(),
        );
        let router = AgentRouter::new(cache, Arc::new(RuleExtractor::new()), 10);
        Arc::new(GatewayState::new(
            Arc::new(SessionRegistry::new()),
            router,
            Environment::Development,
        ))
    }

    fn any_port() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_start_reports_bound_port() {
        let mut server = GatewayServer::new(any_port(), state());
        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr(), Some(addr));
        // Starting twice is a no-op.
        assert_eq!(server.start().await.unwrap(), addr);
        server.shutdown().await;
        assert_eq!(server.local_addr(), None);
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_sessions() {
        let state = state();
        let (_, session) = state.registry.open().await;
        let cancel = session.lock().await.cancel_token();

        let mut server = GatewayServer::new(any_port(), Arc::clone(&state));
        server.start().await.unwrap();
        assert_eq!(server.shutdown().await, 1);

        assert!(state.registry.is_empty().await);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_startup_error() {
        let mut first = GatewayServer::new(any_port(), state());
        let addr = first.start().await.unwrap();

        let mut second = GatewayServer::new(addr, state());
        let err = second.start().await.unwrap_err();
        assert!(matches!(err, ChannelError::StartupFailed { .. }));

        first.shutdown().await;
    }
}

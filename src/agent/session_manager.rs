//! Registry of live sessions.
//!
//! Sessions are individually locked; the registry lock is only held to
//! add, find, or remove entries, so dispatch on one session never waits on
//! another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::agent::session::Session;

/// Owns every open session.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new session in CONNECTING with a fresh id.
    pub async fn open(&self) -> (Uuid, Arc<Mutex<Session>>) {
        let mut sessions = self.sessions.write().await;
        let mut session = Session::new();
        // v4 collisions are not a practical concern, but ids must be unique.
        while sessions.contains_key(&session.id) {
            session.id = Uuid::new_v4();
        }
        let id = session.id;
        let session = Arc::new(Mutex::new(session));
        sessions.insert(id, Arc::clone(&session));
        tracing::debug!(session_id = %id, "Opened session");
        (id, session)
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(&id).map(Arc::clone)
    }

    /// Remove a session and mark it CLOSED. Returns false if it was
    /// already gone (for example, reaped).
    pub async fn close(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&id);
        match removed {
            Some(session) => {
                session.lock().await.finish_close();
                tracing::debug!(session_id = %id, "Closed session");
                true
            }
            None => false,
        }
    }

    /// Close sessions idle for longer than `max_idle`.
    ///
    /// Sessions currently dispatching a message are skipped. Returns the
    /// number of sessions reaped.
    pub async fn reap_idle(&self, max_idle: Duration) -> usize {
        let Some(cutoff) = chrono::TimeDelta::from_std(max_idle)
            .ok()
            .and_then(|idle| chrono::Utc::now().checked_sub_signed(idle))
        else {
            return 0;
        };

        let stale: Vec<Uuid> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter_map(|(id, session)| {
                    // Contended means someone is using it right now.
                    let sess = session.try_lock().ok()?;
                    (sess.last_active_at < cutoff).then_some(*id)
                })
                .collect()
        };

        if stale.is_empty() {
            return 0;
        }

        let mut count = 0;
        {
            let mut sessions = self.sessions.write().await;
            for id in &stale {
                let Some(session) = sessions.get(id) else {
                    continue;
                };
                let Ok(mut sess) = session.try_lock() else {
                    continue;
                };
                if sess.last_active_at >= cutoff {
                    continue;
                }
                sess.begin_close();
                drop(sess);
                sessions.remove(id);
                count += 1;
            }
        }

        if count > 0 {
            tracing::info!(
                "Reaped {} idle session(s) (idle > {}s)",
                count,
                max_idle.as_secs()
            );
        }

        count
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Begin closing every session. Used on shutdown.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<_> = self.sessions.write().await.drain().collect();
        for (_, session) in &drained {
            session.lock().await.begin_close();
        }
        drained.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

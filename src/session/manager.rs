//! Session manager: per-client sessions keyed by their protocol session id

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Session;
use crate::config::ConfigLoader;
use crate::logging::LogControl;
use crate::registry::FunctionRegistry;

/// Id of the session used by requests that carry no session header
pub const DEFAULT_SESSION_ID: &str = "default";

/// Idle time after which a client session is closed, unless configured
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

struct Entry {
    session: Arc<Session>,
    last_used: Mutex<Instant>,
}

impl Entry {
    fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            last_used: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// A request handler still holds the session
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.session) > 1
    }
}

pub struct SessionManager {
    registry: Arc<FunctionRegistry>,
    loader: Arc<ConfigLoader>,
    log: LogControl,
    default: Arc<Session>,
    sessions: RwLock<HashMap<String, Entry>>,
    idle_timeout: Option<Duration>,
}

impl SessionManager {
    pub fn new(registry: Arc<FunctionRegistry>, loader: ConfigLoader, log: LogControl) -> Self {
        let loader = Arc::new(loader);
        let default = Arc::new(Session::new(
            DEFAULT_SESSION_ID,
            registry.clone(),
            loader.clone(),
            log.clone(),
        ));
        Self {
            registry,
            loader,
            log,
            default,
            sessions: RwLock::new(HashMap::new()),
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }

    /// Close client sessions unused for `timeout`; `None` keeps them until deleted
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// Session shared by header-less requests
    pub fn default_session(&self) -> Arc<Session> {
        self.default.clone()
    }

    /// Open a new session with a fresh id
    pub async fn create(&self) -> Arc<Session> {
        let id = Uuid::new_v4().simple().to_string();
        let session = Arc::new(Session::new(
            id.clone(),
            self.registry.clone(),
            self.loader.clone(),
            self.log.clone(),
        ));
        self.sessions
            .write()
            .await
            .insert(id.clone(), Entry::new(session.clone()));
        info!("Opened session {}", id);
        session
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        if id == DEFAULT_SESSION_ID {
            return Some(self.default.clone());
        }
        let sessions = self.sessions.read().await;
        let entry = sessions.get(id)?;
        entry.touch();
        Some(entry.session.clone())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Close a session, cleaning what it tracked; `false` if it did not exist
    pub async fn close(&self, id: &str) -> bool {
        let Some(Entry { session, .. }) = self.sessions.write().await.remove(id) else {
            return false;
        };
        if let Err(e) = session.teardown().await {
            warn!("Teardown of session {} failed: {}", id, e);
        }
        info!("Closed session {}", id);
        true
    }

    /// Close client sessions idle for at least `max_idle`, returning how many closed.
    ///
    /// Sessions held by an in-flight request count as used. The default
    /// session is never evicted.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let expired: Vec<(String, Arc<Session>)> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, entry)| {
                    if entry.in_use() {
                        entry.touch();
                        return false;
                    }
                    entry.idle_for() >= max_idle
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|entry| (id, entry.session)))
                .collect()
        };

        for (id, session) in &expired {
            if let Err(e) = session.teardown().await {
                warn!("Teardown of idle session {} failed: {}", id, e);
            }
            info!("Closed session {} after {:?} idle", id, max_idle);
        }
        expired.len()
    }

    /// Periodically evict idle sessions; `None` when no idle timeout is set
    pub fn spawn_idle_sweeper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let max_idle = self.idle_timeout?;
        let period = (max_idle / 4).max(Duration::from_secs(1));
        let manager = Arc::downgrade(self);
        debug!("Sweeping sessions idle for {:?} every {:?}", max_idle, period);
        Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.tick().await;
            loop {
                ticks.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let closed = manager.evict_idle(max_idle).await;
                if closed > 0 {
                    debug!("Evicted {} idle sessions", closed);
                }
            }
        }))
    }

    /// Tear down every session, the default one included
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, entry)| entry.session)
            .chain(std::iter::once(self.default.clone()))
            .collect();
        debug!("Tearing down {} sessions", sessions.len());
        for session in sessions {
            if let Err(e) = session.teardown().await {
                warn!("Teardown of session {} failed: {}", session.id(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging;

    fn manager() -> SessionManager {
        SessionManager::new(
            Arc::new(FunctionRegistry::with_builtins()),
            ConfigLoader::explicit_only(),
            logging::detached(),
        )
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let manager = manager();
        let a = manager.create().await;
        let b = manager.create().await;
        assert_ne!(a.id(), b.id());
        assert_eq!(manager.len().await, 2);

        let found = manager.get(a.id()).await.unwrap();
        assert!(Arc::ptr_eq(&found, &a));
        assert!(manager.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_default_session_always_resolves() {
        let manager = manager();
        let default = manager.get(DEFAULT_SESSION_ID).await.unwrap();
        assert_eq!(default.id(), DEFAULT_SESSION_ID);
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_idle_sessions_are_evicted() {
        let manager = manager();
        let idle = manager.create().await;
        let idle_id = idle.id().to_string();
        drop(idle);
        tokio::time::sleep(Duration::from_millis(60)).await;
        let fresh = manager.create().await;
        let fresh_id = fresh.id().to_string();
        drop(fresh);

        assert_eq!(manager.evict_idle(Duration::from_millis(50)).await, 1);
        assert!(manager.get(&idle_id).await.is_none());
        assert!(manager.get(&fresh_id).await.is_some());
        assert!(manager.get(DEFAULT_SESSION_ID).await.is_some());
    }

    #[tokio::test]
    async fn test_session_in_use_is_kept() {
        let manager = manager();
        let held = manager.create().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.evict_idle(Duration::ZERO).await, 0);
        assert_eq!(manager.len().await, 1);

        let id = held.id().to_string();
        drop(held);
        assert_eq!(manager.evict_idle(Duration::ZERO).await, 1);
        assert!(manager.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_sweeper_closes_idle_sessions() {
        let manager = Arc::new(manager().with_idle_timeout(Some(Duration::from_millis(100))));
        let id = manager.create().await.id().to_string();
        let sweeper = manager.spawn_idle_sweeper().unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(manager.get(&id).await.is_none());
        sweeper.abort();
    }

    #[test]
    fn test_zero_idle_timeout_disables_sweeper() {
        let manager = manager().with_idle_timeout(Some(Duration::ZERO));
        assert!(manager.idle_timeout().is_none());
    }

    #[tokio::test]
    async fn test_close_removes_session() {
        let manager = manager();
        let session = manager.create().await;
        assert!(manager.close(session.id()).await);
        assert!(!manager.close(session.id()).await);
        assert!(manager.get(session.id()).await.is_none());
    }
}

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::time::Instant;

use super::provider::{SessionError, SessionStore};
use crate::vault::FieldMap;

/// How long a session stays readable after it is issued
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
struct Entry {
    issued_at: Instant,
    fields: FieldMap,
}

impl Entry {
    fn live(&self, ttl: Duration) -> bool {
        self.issued_at.elapsed() < ttl
    }
}

/// In-memory session store
///
/// Sessions expire `ttl` after they are created. Expired entries are dropped
/// whenever a new session is created.
#[derive(Debug, Clone)]
pub struct MemorySessionStore {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
    ttl: Duration,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemorySessionStoreError {
    #[error("memory session store error: {0}")]
    Internal(String),
}

fn lock_error<E: std::fmt::Display>(e: E) -> SessionError<MemorySessionStoreError> {
    SessionError::Provider(MemorySessionStoreError::Internal(format!(
        "failed to acquire lock: {}",
        e
    )))
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Sessions held, expired or not
    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    type Error = MemorySessionStoreError;

    async fn create(&self, token: &str) -> Result<(), SessionError<Self::Error>> {
        let mut inner = self.inner.write().map_err(lock_error)?;
        let before = inner.len();
        inner.retain(|_, entry| entry.live(self.ttl));
        if inner.len() < before {
            tracing::debug!("pruned {} expired session(s)", before - inner.len());
        }
        inner.entry(token.to_string()).or_insert_with(|| Entry {
            issued_at: Instant::now(),
            fields: FieldMap::new(),
        });
        Ok(())
    }

    async fn merge(&self, token: &str, fields: FieldMap) -> Result<(), SessionError<Self::Error>> {
        let mut inner = self.inner.write().map_err(lock_error)?;
        let entry = inner
            .get_mut(token)
            .filter(|entry| entry.live(self.ttl))
            .ok_or(SessionError::UnknownToken)?;
        entry.fields.extend(fields);
        Ok(())
    }

    async fn load(&self, token: &str) -> Result<Option<FieldMap>, SessionError<Self::Error>> {
        let mut inner = self.inner.write().map_err(lock_error)?;
        if inner.get(token).is_some_and(|entry| !entry.live(self.ttl)) {
            inner.remove(token);
            return Ok(None);
        }
        Ok(inner.get(token).map(|entry| entry.fields.clone()))
    }

    async fn remove(&self, token: &str) -> Result<bool, SessionError<Self::Error>> {
        let mut inner = self.inner.write().map_err(lock_error)?;
        Ok(inner
            .remove(token)
            .is_some_and(|entry| entry.live(self.ttl)))
    }
}

//! Session correlation at the relying party
//!
//! A ticket is issued when the relying party hands out its authorization
//! request. It pairs a secret session key, which only the browser receives,
//! with a callback token derived from it. The callback token travels through
//! the user's wallet and the custodian; the callback arrives later on a
//! different connection and records the decrypted fields under it. The
//! browser polls with the session key, so whoever sees the callback URL cannot
//! read the fields. Polling before delivery is normal and returns nothing, not
//! an error.

mod memory;
mod provider;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

pub use memory::{MemorySessionStore, MemorySessionStoreError, DEFAULT_SESSION_TTL};
pub use provider::{SessionError, SessionStore};

use crate::vault::FieldMap;

/// Size of a session key and of a callback token in bytes (hex encoded on the wire)
pub const TOKEN_SIZE: usize = 16;

const TOKEN_CONTEXT: &str = "predauth 2024 session callback token";

/// A freshly opened session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket {
    /// Secret the browser polls with
    pub session: String,
    /// Public handle embedded in the callback URL
    pub token: String,
}

/// The callback token bound to a session key
pub fn callback_token(session: &str) -> String {
    let mut hasher = blake3::Hasher::new_derive_key(TOKEN_CONTEXT);
    hasher.update(session.as_bytes());
    hex::encode(&hasher.finalize().as_bytes()[..TOKEN_SIZE])
}

/// Maps opaque tokens to fields delivered by callback
#[derive(Debug, Clone)]
pub struct SessionCorrelator<S> {
    store: S,
    updates: Arc<watch::Sender<u64>>,
}

impl<S: SessionStore + Default> Default for SessionCorrelator<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

impl<S: SessionStore> SessionCorrelator<S> {
    pub fn new(store: S) -> Self {
        let (updates, _) = watch::channel(0);
        Self {
            store,
            updates: Arc::new(updates),
        }
    }

    /// Issue a fresh unpredictable session, registered as pending
    pub async fn issue(&self) -> Result<SessionTicket, SessionError<S::Error>> {
        let mut bytes = [0u8; TOKEN_SIZE];
        getrandom::getrandom(&mut bytes).expect("failed to generate random bytes");
        let session = hex::encode(bytes);
        let token = callback_token(&session);
        self.store.create(&token).await?;
        tracing::debug!("issued session ticket");
        Ok(SessionTicket { session, token })
    }

    /// Merge delivered fields into a token's record
    ///
    /// Rejects tokens that were never issued.
    pub async fn record(
        &self,
        token: &str,
        fields: FieldMap,
    ) -> Result<(), SessionError<S::Error>> {
        let count = fields.len();
        self.store.merge(token, fields).await?;
        self.updates.send_modify(|version| *version = version.wrapping_add(1));
        tracing::info!("recorded {} field(s) for a session", count);
        Ok(())
    }

    /// Whatever has been recorded so far; `None` means "not yet delivered"
    pub async fn fetch(&self, token: &str) -> Result<Option<FieldMap>, SessionError<S::Error>> {
        Ok(self
            .store
            .load(token)
            .await?
            .filter(|fields| !fields.is_empty()))
    }

    /// True iff any fields have been recorded for `token`
    pub async fn status(&self, token: &str) -> Result<bool, SessionError<S::Error>> {
        Ok(self.fetch(token).await?.is_some())
    }

    /// End a session; later fetches see nothing and later deliveries are rejected
    pub async fn revoke(&self, token: &str) -> Result<bool, SessionError<S::Error>> {
        self.store.remove(token).await
    }

    /// Long-poll until something is recorded for `token`, or `timeout` passes
    ///
    /// Returns `None` on timeout, like a poll before delivery.
    pub async fn wait_for(
        &self,
        token: &str,
        timeout: Duration,
    ) -> Result<Option<FieldMap>, SessionError<S::Error>> {
        let deadline = tokio::time::Instant::now() + timeout;
        // subscribe before the first read so no record can slip in between
        let mut updates = self.updates.subscribe();
        loop {
            if let Some(fields) = self.fetch(token).await? {
                return Ok(Some(fields));
            }
            match tokio::time::timeout_at(deadline, updates.changed()).await {
                Ok(Ok(())) => continue,
                _ => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_issue_record_fetch() {
        let correlator = SessionCorrelator::new(MemorySessionStore::new());
        let ticket = correlator.issue().await.unwrap();
        assert_eq!(ticket.session.len(), TOKEN_SIZE * 2);
        assert_eq!(ticket.token.len(), TOKEN_SIZE * 2);
        let token = ticket.token;

        assert_eq!(correlator.fetch(&token).await.unwrap(), None);
        assert!(!correlator.status(&token).await.unwrap());

        correlator
            .record(&token, fields(&[("city", "Beijing")]))
            .await
            .unwrap();
        correlator
            .record(&token, fields(&[("name", "Alice")]))
            .await
            .unwrap();

        assert_eq!(
            correlator.fetch(&token).await.unwrap(),
            Some(fields(&[("city", "Beijing"), ("name", "Alice")]))
        );
        assert!(correlator.status(&token).await.unwrap());
    }

    #[tokio::test]
    async fn test_tokens_are_isolated() {
        let correlator = SessionCorrelator::new(MemorySessionStore::new());
        let first = correlator.issue().await.unwrap().token;
        let second = correlator.issue().await.unwrap().token;
        assert_ne!(first, second);

        correlator
            .record(&second, fields(&[("city", "Beijing")]))
            .await
            .unwrap();
        assert_eq!(correlator.fetch(&first).await.unwrap(), None);
        assert!(correlator.fetch(&second).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unsolicited_record_is_rejected() {
        let correlator = SessionCorrelator::new(MemorySessionStore::new());
        let err = correlator
            .record("never-issued", fields(&[("a", "b")]))
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::UnknownToken);
        assert_eq!(correlator.fetch("never-issued").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_revoke() {
        let correlator = SessionCorrelator::new(MemorySessionStore::new());
        let token = correlator.issue().await.unwrap().token;
        correlator
            .record(&token, fields(&[("a", "b")]))
            .await
            .unwrap();

        assert!(correlator.revoke(&token).await.unwrap());
        assert!(!correlator.revoke(&token).await.unwrap());
        assert_eq!(correlator.fetch(&token).await.unwrap(), None);
        assert!(correlator.record(&token, fields(&[("a", "b")])).await.is_err());
    }

    #[tokio::test]
    async fn test_wait_for_delivery() {
        let correlator = SessionCorrelator::new(MemorySessionStore::new());
        let token = correlator.issue().await.unwrap().token;

        let waiter = {
            let correlator = correlator.clone();
            let token = token.clone();
            tokio::spawn(async move {
                correlator
                    .wait_for(&token, Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        correlator
            .record(&token, fields(&[("city", "Beijing")]))
            .await
            .unwrap();

        assert_eq!(
            waiter.await.unwrap(),
            Some(fields(&[("city", "Beijing")]))
        );
    }

    #[tokio::test]
    async fn test_wait_for_times_out_empty() {
        let correlator = SessionCorrelator::new(MemorySessionStore::new());
        let token = correlator.issue().await.unwrap().token;

        let result = correlator
            .wait_for(&token, Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_token_is_bound_to_session() {
        let correlator = SessionCorrelator::new(MemorySessionStore::new());
        let ticket = correlator.issue().await.unwrap();

        assert_ne!(ticket.session, ticket.token);
        assert_eq!(callback_token(&ticket.session), ticket.token);
        // the session key is not registered under its own name
        correlator
            .record(&ticket.token, fields(&[("a", "b")]))
            .await
            .unwrap();
        assert_eq!(correlator.fetch(&ticket.session).await.unwrap(), None);
    }
}

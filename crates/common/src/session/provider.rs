use std::fmt::{Debug, Display};

use async_trait::async_trait;

use crate::vault::FieldMap;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError<T> {
    #[error("unhandled session provider error: {0}")]
    Provider(#[from] T),
    /// The token was never issued, or its session has ended
    #[error("unknown session token")]
    UnknownToken,
}

/// Relying-party storage of `token -> fields`
#[async_trait]
pub trait SessionStore: Send + Sync + Debug + Clone + 'static {
    type Error: Display + Debug + Send + Sync + 'static;

    /// Register a token as pending, with nothing recorded yet
    async fn create(&self, token: &str) -> Result<(), SessionError<Self::Error>>;

    /// Merge fields into a pending or delivered token
    ///
    /// Should fail with `SessionError::UnknownToken` if the token was never created.
    async fn merge(&self, token: &str, fields: FieldMap) -> Result<(), SessionError<Self::Error>>;

    /// What has been recorded for `token`; `None` if the token is unknown
    async fn load(&self, token: &str) -> Result<Option<FieldMap>, SessionError<Self::Error>>;

    /// Forget a token. Returns whether it existed.
    async fn remove(&self, token: &str) -> Result<bool, SessionError<Self::Error>>;
}

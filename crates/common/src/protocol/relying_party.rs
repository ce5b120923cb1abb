use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::{DisclosureState, ProtocolError};
use crate::crypto::{GroupKeypair, GroupPublicKey};
use crate::delivery::{Deliverer, DeliveryError};
use crate::request::AppInfo;
use crate::session::{callback_token, SessionCorrelator, SessionStore};
use crate::vault::{self, EncryptedVault, FieldMap};

const CALLBACK_SEGMENT: &str = "decrypt";

/// Session token embedded in a `<base>/decrypt/<token>` callback
pub fn token_from_callback(callback: &Url) -> Option<String> {
    let mut segments = callback.path_segments()?.rev().filter(|s| !s.is_empty());
    let token = segments.next()?;
    match segments.next() {
        Some(CALLBACK_SEGMENT) => Some(token.to_string()),
        _ => None,
    }
}

/// The application that asks for fields and receives them by callback
#[derive(Debug, Clone)]
pub struct RelyingParty<S> {
    keypair: GroupKeypair,
    requested: Vec<String>,
    callback_base: Url,
    sessions: SessionCorrelator<S>,
}

impl<S: SessionStore> RelyingParty<S> {
    pub fn new(keypair: GroupKeypair, requested: Vec<String>, callback_base: Url, store: S) -> Self {
        Self {
            keypair,
            requested,
            callback_base,
            sessions: SessionCorrelator::new(store),
        }
    }

    pub fn public_key(&self) -> &GroupPublicKey {
        self.keypair.public()
    }

    pub fn requested(&self) -> &[String] {
        &self.requested
    }

    pub fn sessions(&self) -> &SessionCorrelator<S> {
        &self.sessions
    }

    fn callback_for(&self, token: &str) -> Result<Url, ProtocolError> {
        let mut callback = self.callback_base.clone();
        callback
            .path_segments_mut()
            .map_err(|_| {
                ProtocolError::InvalidRequest(format!(
                    "callback base {} cannot carry a path",
                    self.callback_base
                ))
            })?
            .pop_if_empty()
            .push(CALLBACK_SEGMENT)
            .push(token);
        Ok(callback)
    }

    /// Open a session and describe what we want from the user
    ///
    /// The returned `session` key is the only way to read what gets delivered;
    /// the callback carries a token derived from it.
    pub async fn app_info(&self) -> Result<AppInfo, ProtocolError> {
        let ticket = self.sessions.issue().await?;
        let callback = self.callback_for(&ticket.token)?;
        tracing::info!(
            "APP [{}]: new session asks for {:?}",
            DisclosureState::Requested,
            self.requested
        );
        Ok(AppInfo {
            pk: *self.keypair.public(),
            data: self.requested.clone(),
            callback,
            session: ticket.session,
        })
    }

    /// Decrypt a delivered bundle and record its fields under the callback `token`
    ///
    /// All or nothing: if any tag fails to decrypt, nothing is recorded.
    pub async fn consume(
        &self,
        token: &str,
        bundle: &EncryptedVault,
    ) -> Result<FieldMap, ProtocolError> {
        tracing::info!(
            "APP [{}]: {} tag(s) delivered",
            DisclosureState::Delivered,
            bundle.len()
        );

        let mut merged = FieldMap::new();
        for (tag, unit) in bundle {
            let fields = vault::decrypt(self.keypair.secret(), unit).map_err(|e| {
                tracing::warn!("APP: delivered tag {} did not decrypt", tag);
                ProtocolError::from(e)
            })?;
            merged.extend(fields);
        }

        self.sessions.record(token, merged.clone()).await?;
        tracing::info!(
            "APP [{}]: recorded {} field(s)",
            DisclosureState::Consumed,
            merged.len()
        );
        Ok(merged)
    }

    /// Fields recorded for `session`, if delivery has happened
    pub async fn data(&self, session: &str) -> Result<Option<FieldMap>, ProtocolError> {
        Ok(self.sessions.fetch(&callback_token(session)).await?)
    }

    /// Like [`RelyingParty::data`], but waits up to `timeout` for delivery
    pub async fn wait(
        &self,
        session: &str,
        timeout: Duration,
    ) -> Result<Option<FieldMap>, ProtocolError> {
        Ok(self
            .sessions
            .wait_for(&callback_token(session), timeout)
            .await?)
    }

    pub async fn status(&self, session: &str) -> Result<bool, ProtocolError> {
        Ok(self.sessions.status(&callback_token(session)).await?)
    }

    /// What this side can observe of a session
    pub async fn state(&self, session: &str) -> Result<DisclosureState, ProtocolError> {
        Ok(if self.status(session).await? {
            DisclosureState::Consumed
        } else {
            DisclosureState::Requested
        })
    }

    /// End a session. Returns whether it was still open.
    pub async fn logout(&self, session: &str) -> Result<bool, ProtocolError> {
        Ok(self.sessions.revoke(&callback_token(session)).await?)
    }
}

/// In-process delivery, for a relying party that shares a process with the
/// custodian
#[async_trait]
impl<S: SessionStore> Deliverer for RelyingParty<S> {
    async fn deliver(&self, callback: &Url, bundle: &EncryptedVault) -> Result<(), DeliveryError> {
        let token = token_from_callback(callback)
            .ok_or_else(|| DeliveryError::Permanent("no session token in callback".into()))?;
        match self.consume(&token, bundle).await {
            Ok(_) => Ok(()),
            Err(e @ (ProtocolError::DecryptionFailed | ProtocolError::NotFound(_))) => {
                Err(DeliveryError::Permanent(e.to_string()))
            }
            Err(e) => Err(DeliveryError::Transient(e.to_string())),
        }
    }
}

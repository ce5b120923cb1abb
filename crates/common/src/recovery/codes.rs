use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::RecoveryError;

/// Default lifetime of a one-time code
pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(600);

const CODE_DIGITS: u32 = 6;
const CODE_SPACE: u32 = 10u32.pow(CODE_DIGITS);
// largest multiple of CODE_SPACE that fits in a u32
const CODE_REJECT_ABOVE: u32 = u32::MAX - (u32::MAX % CODE_SPACE);

/// Delivers a one-time code over its contact channel
#[async_trait]
pub trait Notifier: Send + Sync + Debug + 'static {
    async fn send_code(&self, id: &str, contact: &str, code: &str) -> Result<(), RecoveryError>;
}

/// Notifier that writes codes to the log
///
/// Stands in for an email gateway on development deployments.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send_code(&self, id: &str, contact: &str, code: &str) -> Result<(), RecoveryError> {
        tracing::info!("RECOVERY: one-time code for {} via {}: {}", id, contact, code);
        Ok(())
    }
}

/// Failed redemptions a contact absorbs before it is locked out
pub const MAX_CODE_MISSES: u32 = 5;

#[derive(Debug, Clone)]
struct IssuedCode {
    contact: String,
    code: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Misses {
    count: u32,
    last: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Pending {
    codes: Vec<IssuedCode>,
    misses: HashMap<String, Misses>,
}

impl Pending {
    fn prune(&mut self, now: DateTime<Utc>, lockout: chrono::Duration) {
        self.codes.retain(|c| c.expires_at > now);
        self.misses.retain(|_, m| m.count < MAX_CODE_MISSES || m.last + lockout > now);
    }

    fn locked(&self, contact: &str) -> bool {
        self.misses
            .get(contact)
            .is_some_and(|m| m.count >= MAX_CODE_MISSES)
    }

    fn is_empty(&self) -> bool {
        self.codes.is_empty() && self.misses.is_empty()
    }
}

/// Outstanding one-time codes, per identity
///
/// Every failed redemption counts a miss against each contact whose code was
/// not presented. A contact that reaches [`MAX_CODE_MISSES`] loses its
/// outstanding codes and cannot be sent a new one for a code lifetime.
#[derive(Debug)]
pub struct CodeBook {
    ttl: chrono::Duration,
    pending: Mutex<HashMap<String, Pending>>,
}

impl Default for CodeBook {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_TTL)
    }
}

fn random_code() -> String {
    loop {
        let mut bytes = [0u8; 4];
        getrandom::getrandom(&mut bytes).expect("failed to generate random bytes");
        let candidate = u32::from_be_bytes(bytes);
        // rejection sampling keeps every code equally likely
        if candidate < CODE_REJECT_ABOVE {
            return format!("{:0width$}", candidate % CODE_SPACE, width = CODE_DIGITS as usize);
        }
    }
}

impl CodeBook {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365)),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh code for `contact`, unless the contact is locked out
    pub fn issue(&self, id: &str, contact: &str) -> Result<String, RecoveryError> {
        let now = Utc::now();
        let mut pending = self.pending.lock();
        let entry = pending.entry(id.to_string()).or_default();
        entry.prune(now, self.ttl);
        if entry.locked(contact) {
            return Err(RecoveryError::Unauthorized("contact locked after repeated misses"));
        }

        let code = random_code();
        entry.codes.push(IssuedCode {
            contact: contact.to_string(),
            code: code.clone(),
            expires_at: now + self.ttl,
        });
        Ok(code)
    }

    /// Redeem `codes` if they unlock at least `threshold` distinct contacts
    ///
    /// At most `max_codes` distinct codes are accepted per attempt. All or
    /// nothing: below the threshold no code is consumed but every contact
    /// whose code was not presented counts a miss. On success every matching
    /// code is consumed and the unlocked contacts are returned.
    pub fn redeem(
        &self,
        id: &str,
        codes: &[String],
        max_codes: usize,
        threshold: usize,
    ) -> Result<BTreeSet<String>, RecoveryError> {
        if codes.is_empty() {
            return Err(RecoveryError::InvalidCodes("no codes presented".into()));
        }
        if codes.len() > max_codes {
            return Err(RecoveryError::InvalidCodes(format!(
                "{} codes presented for {} contact(s)",
                codes.len(),
                max_codes
            )));
        }
        let presented: HashSet<&str> = codes.iter().map(String::as_str).collect();
        if presented.len() != codes.len() {
            return Err(RecoveryError::InvalidCodes("duplicate codes presented".into()));
        }

        let now = Utc::now();
        let mut pending = self.pending.lock();
        let entry = pending
            .get_mut(id)
            .ok_or(RecoveryError::Unauthorized("no outstanding codes"))?;
        entry.prune(now, self.ttl);

        let unlocked: BTreeSet<String> = entry
            .codes
            .iter()
            .filter(|c| presented.contains(c.code.as_str()))
            .map(|c| c.contact.clone())
            .collect();

        if unlocked.is_empty() || unlocked.len() < threshold {
            let missed: BTreeSet<String> = entry
                .codes
                .iter()
                .filter(|c| !unlocked.contains(&c.contact))
                .map(|c| c.contact.clone())
                .collect();
            for contact in missed {
                let misses = entry.misses.entry(contact.clone()).or_insert(Misses {
                    count: 0,
                    last: now,
                });
                misses.count += 1;
                misses.last = now;
                if misses.count >= MAX_CODE_MISSES {
                    tracing::warn!("RECOVERY: locked out {} for {} after repeated misses", contact, id);
                    entry.codes.retain(|c| c.contact != contact);
                }
            }
            if entry.is_empty() {
                pending.remove(id);
            }
            return Err(RecoveryError::Unauthorized("recovery quorum not reached"));
        }

        entry.codes.retain(|c| !presented.contains(c.code.as_str()));
        for contact in &unlocked {
            entry.misses.remove(contact);
        }
        if entry.is_empty() {
            pending.remove(id);
        }
        Ok(unlocked)
    }
}

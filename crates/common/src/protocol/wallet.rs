use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{ProtocolError, Registration, TaggedReKey};
use crate::crypto::{pre, GroupKeypair, GroupPublicKey, Secret, SecretKey};
use crate::envelope::Envelope;
use crate::recovery::{BackupPayload, RecoveryShare};
use crate::request::{GetRequest, SetRequest};
use crate::vault::{self, EncryptedVault, FieldMap};

/// Tag that receives fields nobody assigned a tag to
pub const DEFAULT_TAG: &str = "default";

/// A field value and the tag it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub value: String,
    pub tag: String,
}

#[derive(Debug, Clone)]
struct TagKeys {
    keypair: GroupKeypair,
    /// Data key of the last ciphertext we produced for this tag
    data_key: Option<Secret>,
}

impl TagKeys {
    fn generate() -> Self {
        Self {
            keypair: GroupKeypair::generate(),
            data_key: None,
        }
    }
}

/// The user's side of the protocol
///
/// Every field lives in exactly one tag; moving a field to another tag
/// removes it from the first, and the next upload re-seals both.
#[derive(Debug, Clone)]
pub struct Wallet {
    id: String,
    identity: SecretKey,
    tags: BTreeMap<String, TagKeys>,
    fields: BTreeMap<String, Field>,
    /// Tags that lost a field since they were last sealed
    stale: BTreeSet<String>,
}

impl Wallet {
    /// A wallet with a fresh identity key
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_identity(id, SecretKey::generate())
    }

    pub fn with_identity(id: impl Into<String>, identity: SecretKey) -> Self {
        Self {
            id: id.into(),
            identity,
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            stale: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn identity(&self) -> &SecretKey {
        &self.identity
    }

    /// Import an existing keypair for `tag`, replacing any local one
    pub fn add_tag(&mut self, tag: impl Into<String>, keypair: GroupKeypair) {
        self.tags.insert(
            tag.into(),
            TagKeys {
                keypair,
                data_key: None,
            },
        );
    }

    pub fn tag_key(&self, tag: &str) -> Option<&GroupKeypair> {
        self.tags.get(tag).map(|keys| &keys.keypair)
    }

    /// Registration envelope, signed by the identity key it carries
    pub fn registration(&self) -> Result<Envelope<Registration>, ProtocolError> {
        Ok(Envelope::seal(
            &self.identity,
            Registration {
                public_key: self.identity.public(),
            },
        )?)
    }

    /// Set a field, creating the tag's keypair on first use
    pub fn set_field(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        tag: impl Into<String>,
    ) {
        let tag = tag.into();
        self.tags.entry(tag.clone()).or_insert_with(TagKeys::generate);
        let previous = self.fields.insert(
            key.into(),
            Field {
                value: value.into(),
                tag: tag.clone(),
            },
        );
        if let Some(previous) = previous.filter(|previous| previous.tag != tag) {
            self.stale.insert(previous.tag);
        }
    }

    pub fn fields(&self) -> &BTreeMap<String, Field> {
        &self.fields
    }

    /// Fields grouped by tag
    pub fn grouped(&self) -> BTreeMap<String, FieldMap> {
        let mut grouped: BTreeMap<String, FieldMap> = BTreeMap::new();
        for (key, field) in &self.fields {
            grouped
                .entry(field.tag.clone())
                .or_default()
                .insert(key.clone(), field.value.clone());
        }
        grouped
    }

    /// Data key of the last upload of `tag`
    pub fn data_key(&self, tag: &str) -> Result<Option<&Secret>, ProtocolError> {
        self.tags
            .get(tag)
            .map(|keys| keys.data_key.as_ref())
            .ok_or_else(|| ProtocolError::UnknownTag(tag.to_string()))
    }

    /// Seal `tags` plus every stale tag, which may come out empty
    fn seal(&mut self, tags: &BTreeSet<String>) -> Result<EncryptedVault, ProtocolError> {
        let mut grouped = self.grouped();
        let mut sealed = EncryptedVault::new();
        let targets: BTreeSet<String> = tags.union(&self.stale).cloned().collect();
        for tag in &targets {
            let fields = grouped.remove(tag).unwrap_or_default();
            let keys = self
                .tags
                .entry(tag.clone())
                .or_insert_with(TagKeys::generate);
            let (unit, data_key) = vault::encrypt(keys.keypair.public(), &fields)?;
            keys.data_key = Some(data_key);
            sealed.insert(tag.clone(), unit);
        }
        self.stale.clear();
        Ok(sealed)
    }

    /// Self-encrypt every tag that holds fields or lost one, ready for `set_data`
    pub fn upload(&mut self) -> Result<Envelope<EncryptedVault>, ProtocolError> {
        let tags: BTreeSet<String> = self.fields.values().map(|f| f.tag.clone()).collect();
        let sealed = self.seal(&tags)?;
        tracing::debug!("WALLET: sealed {} tag(s) for upload", sealed.len());
        Ok(Envelope::seal(&self.identity, sealed)?)
    }

    /// Re-encryption keys for the tags a get request touches
    ///
    /// A tag is touched when the request names it or one of its fields.
    /// Tags without a local keypair are left out, so the relying party only
    /// receives what this wallet can actually disclose.
    pub fn authorize_get(&self, request: &GetRequest) -> Result<Envelope<TaggedReKey>, ProtocolError> {
        let mut wanted = BTreeSet::new();
        for name in &request.data {
            if let Some(field) = self.fields.get(name) {
                wanted.insert(field.tag.clone());
            } else if self.fields.values().any(|f| &f.tag == name) {
                wanted.insert(name.clone());
            } else {
                tracing::debug!("WALLET: {} asked for {}, which we do not hold", request.id, name);
            }
        }

        let mut keys = TaggedReKey::new();
        for tag in wanted {
            let Some(local) = self.tags.get(&tag) else {
                continue;
            };
            keys.insert(tag, pre::re_key(local.keypair.secret(), &request.pk));
        }

        tracing::info!(
            "WALLET: authorizing {} tag(s) for {}",
            keys.len(),
            request.id
        );
        Ok(Envelope::seal(&self.identity, keys)?)
    }

    /// Merge offered fields and re-seal the touched tags
    ///
    /// Known fields stay in their tag, new ones go to [`DEFAULT_TAG`].
    pub fn authorize_set(
        &mut self,
        request: &SetRequest,
    ) -> Result<Envelope<EncryptedVault>, ProtocolError> {
        let mut touched = BTreeSet::new();
        for (key, value) in &request.data {
            let tag = self
                .fields
                .get(key)
                .map(|field| field.tag.clone())
                .unwrap_or_else(|| DEFAULT_TAG.to_string());
            self.set_field(key.clone(), value.clone(), tag.clone());
            touched.insert(tag);
        }

        let sealed = self.seal(&touched)?;
        tracing::info!(
            "WALLET: {} wrote {} field(s) into {} tag(s)",
            request.id,
            request.data.len(),
            sealed.len()
        );
        Ok(Envelope::seal(&self.identity, sealed)?)
    }

    /// Restore the field view from the custodian's copy
    ///
    /// Tags we hold no keypair for are skipped. Returns the number of fields
    /// loaded.
    pub fn load(&mut self, stored: &EncryptedVault) -> Result<usize, ProtocolError> {
        let mut loaded = 0;
        for (tag, unit) in stored {
            let Some(keys) = self.tags.get(tag) else {
                tracing::warn!("WALLET: no local key for stored tag {}, skipping", tag);
                continue;
            };
            let fields = vault::decrypt(keys.keypair.secret(), unit)?;
            loaded += fields.len();
            for (key, value) in fields {
                self.fields.insert(
                    key,
                    Field {
                        value,
                        tag: tag.clone(),
                    },
                );
            }
        }
        Ok(loaded)
    }

    /// Recovery shares for every local tag, addressed to a recovery agent
    pub fn backup(
        &self,
        agent: &GroupPublicKey,
        contact: &str,
    ) -> Result<Envelope<BackupPayload>, ProtocolError> {
        let shares: BackupPayload = self
            .tags
            .iter()
            .map(|(tag, keys)| {
                (
                    tag.clone(),
                    RecoveryShare {
                        rk: pre::re_key(keys.keypair.secret(), agent),
                        contact: contact.to_string(),
                        agent: *agent,
                    },
                )
            })
            .collect();
        Ok(Envelope::seal(&self.identity, shares)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::envelope::ReplayGuard;
    use url::Url;

    fn get_request(pk: GroupPublicKey, data: &[&str]) -> GetRequest {
        GetRequest {
            id: "app1".into(),
            pk,
            callback: Url::parse("http://127.0.0.1:4001/decrypt/tok123").unwrap(),
            redirect: Url::parse("http://127.0.0.1:4001/").unwrap(),
            data: data.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_fields_partition_tags() {
        let mut wallet = Wallet::new("alice");
        wallet.set_field("city", "Beijing", "city");
        wallet.set_field("name", "Alice", "profile");
        wallet.set_field("city", "Shanghai", "profile");

        let grouped = wallet.grouped();
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped["profile"]["city"], "Shanghai");
        assert_eq!(grouped["profile"]["name"], "Alice");
    }

    #[test]
    fn test_upload_records_data_keys() {
        let mut wallet = Wallet::new("alice");
        wallet.set_field("city", "Beijing", "city");
        assert_eq!(wallet.data_key("city").unwrap(), None);
        assert!(matches!(
            wallet.data_key("avatar"),
            Err(ProtocolError::UnknownTag(_))
        ));

        let envelope = wallet.upload().unwrap();
        let sealed = envelope
            .open(&wallet.identity().public(), &ReplayGuard::default(), "alice")
            .unwrap();
        let data_key = wallet.data_key("city").unwrap().unwrap();
        assert_eq!(
            vault::open(data_key, &sealed["city"]).unwrap(),
            FieldMap::from([("city".to_string(), "Beijing".to_string())])
        );
    }

    #[test]
    fn test_authorize_get_is_partial() {
        let mut wallet = Wallet::new("alice");
        wallet.set_field("city", "Beijing", "address");
        wallet.set_field("name", "Alice", "profile");
        let app = GroupKeypair::generate();

        let envelope = wallet
            .authorize_get(&get_request(*app.public(), &["city", "avatar"]))
            .unwrap();
        let keys: Vec<&String> = envelope.payload.keys().collect();
        assert_eq!(keys, vec!["address"]);

        // naming the tag works as well as naming one of its fields
        let envelope = wallet
            .authorize_get(&get_request(*app.public(), &["profile"]))
            .unwrap();
        assert!(envelope.payload.contains_key("profile"));
    }

    #[test]
    fn test_authorize_set_merges_into_tags() {
        let mut wallet = Wallet::new("alice");
        wallet.set_field("city", "Beijing", "address");
        wallet.upload().unwrap();

        let request = SetRequest {
            id: "app1".into(),
            pk: *GroupKeypair::generate().public(),
            callback: Url::parse("http://a/cb").unwrap(),
            redirect: Url::parse("http://a/").unwrap(),
            data: FieldMap::from([
                ("city".to_string(), "Shanghai".to_string()),
                ("bio".to_string(), "hi".to_string()),
            ]),
        };
        let envelope = wallet.authorize_set(&request).unwrap();
        let tags: Vec<&String> = envelope.payload.keys().collect();
        assert_eq!(tags, vec!["address", DEFAULT_TAG]);

        let address = wallet.tag_key("address").unwrap();
        assert_eq!(
            vault::decrypt(address.secret(), &envelope.payload["address"]).unwrap()["city"],
            "Shanghai"
        );
        assert_eq!(wallet.fields()["bio"].tag, DEFAULT_TAG);
    }

    #[test]
    fn test_load_restores_fields() {
        let mut wallet = Wallet::new("alice");
        wallet.set_field("city", "Beijing", "city");
        let stored = wallet.upload().unwrap().payload;

        let mut restored = Wallet::with_identity("alice", wallet.identity().clone());
        restored.add_tag("city", wallet.tag_key("city").unwrap().clone());
        assert_eq!(restored.load(&stored).unwrap(), 1);
        assert_eq!(restored.fields(), wallet.fields());

        // without the tag key nothing is loaded
        let mut stranger = Wallet::new("alice");
        assert_eq!(stranger.load(&stored).unwrap(), 0);
    }

    #[test]
    fn test_moved_field_leaves_old_tag() {
        let mut wallet = Wallet::new("alice");
        wallet.set_field("city", "Beijing", "city");
        wallet.set_field("name", "Alice", "profile");
        wallet.upload().unwrap();

        wallet.set_field("city", "Beijing", "profile");
        let sealed = wallet.upload().unwrap().payload;
        let tags: Vec<&String> = sealed.keys().collect();
        assert_eq!(tags, vec!["city", "profile"]);

        // the old tag is overwritten with a unit that no longer holds the field
        let city = wallet.tag_key("city").unwrap();
        assert!(vault::decrypt(city.secret(), &sealed["city"])
            .unwrap()
            .is_empty());

        // once re-sealed it is no longer uploaded
        let sealed = wallet.upload().unwrap().payload;
        assert_eq!(sealed.keys().collect::<Vec<_>>(), vec!["profile"]);
    }
}

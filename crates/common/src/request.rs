use serde::{Deserialize, Serialize};
use url::Url;

use crate::crypto::GroupPublicKey;
use crate::vault::FieldMap;

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("invalid authorization request: {0}")]
    Invalid(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What a relying party asks of a user, presented out of band
///
/// Unsigned on its own: its authenticity is established by the user's signed
/// submission to the custodian that follows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthorizationRequest {
    Get(GetRequest),
    Set(SetRequest),
}

/// Disclose the named fields to `pk`, delivered to `callback`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRequest {
    /// Relying party identifier, shown to the user
    pub id: String,
    /// Relying party group public key
    pub pk: GroupPublicKey,
    /// Back-channel URL with the session token embedded
    pub callback: Url,
    /// Where the user's browser goes once the submission succeeded
    pub redirect: Url,
    /// Requested field names
    pub data: Vec<String>,
}

/// Write the offered fields into the user's vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRequest {
    pub id: String,
    pub pk: GroupPublicKey,
    pub callback: Url,
    pub redirect: Url,
    pub data: FieldMap,
}

impl AuthorizationRequest {
    /// Parse and validate a request descriptor at the boundary
    pub fn parse(json: &str) -> Result<Self, RequestError> {
        let request: Self = serde_json::from_str(json)?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        let (id, callback, redirect, empty) = match self {
            AuthorizationRequest::Get(r) => (&r.id, &r.callback, &r.redirect, r.data.is_empty()),
            AuthorizationRequest::Set(r) => (&r.id, &r.callback, &r.redirect, r.data.is_empty()),
        };
        if id.trim().is_empty() {
            return Err(RequestError::Invalid("empty relying party id".into()));
        }
        for url in [callback, redirect] {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(RequestError::Invalid(format!(
                    "unsupported url scheme: {}",
                    url.scheme()
                )));
            }
        }
        if empty {
            return Err(RequestError::Invalid("no data requested".into()));
        }
        Ok(())
    }

    pub fn redirect(&self) -> &Url {
        match self {
            AuthorizationRequest::Get(r) => &r.redirect,
            AuthorizationRequest::Set(r) => &r.redirect,
        }
    }
}

/// Relying party descriptor served at `/appInfo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub pk: GroupPublicKey,
    pub data: Vec<String>,
    pub callback: Url,
    /// Secret session key the browser presents when polling. The callback
    /// only carries a token derived from it.
    pub session: String,
}

impl AppInfo {
    /// Turn the descriptor into a get request for the user's wallet
    pub fn into_request(self, id: impl Into<String>, redirect: Url) -> AuthorizationRequest {
        AuthorizationRequest::Get(GetRequest {
            id: id.into(),
            pk: self.pk,
            callback: self.callback,
            redirect,
            data: self.data,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::GroupKeypair;

    #[test]
    fn test_parse_get() {
        let pk = GroupKeypair::generate().public().to_hex();
        let json = format!(
            r#"{{"type":"get","id":"app1","pk":"{}","callback":"http://127.0.0.1:4001/decrypt/tok123","redirect":"http://127.0.0.1:4000/","data":["city"]}}"#,
            pk
        );
        match AuthorizationRequest::parse(&json).unwrap() {
            AuthorizationRequest::Get(get) => {
                assert_eq!(get.id, "app1");
                assert_eq!(get.data, vec!["city".to_string()]);
                assert_eq!(get.callback.path(), "/decrypt/tok123");
            }
            other => panic!("expected get request, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_set() {
        let pk = GroupKeypair::generate().public().to_hex();
        let json = format!(
            r#"{{"type":"set","id":"app1","pk":"{}","callback":"http://a/cb","redirect":"https://a/","data":{{"bio":"hi"}}}}"#,
            pk
        );
        let request = AuthorizationRequest::parse(&json).unwrap();
        assert!(matches!(request, AuthorizationRequest::Set(ref set) if set.data["bio"] == "hi"));
        assert_eq!(request.redirect().as_str(), "https://a/");
    }

    #[test]
    fn test_rejects_bad_requests() {
        let pk = GroupKeypair::generate().public().to_hex();
        let unknown_type = format!(
            r#"{{"type":"delete","id":"a","pk":"{}","callback":"http://a","redirect":"http://a","data":[]}}"#,
            pk
        );
        assert!(AuthorizationRequest::parse(&unknown_type).is_err());

        let bad_pk = r#"{"type":"get","id":"a","pk":"1234","callback":"http://a","redirect":"http://a","data":["x"]}"#;
        assert!(AuthorizationRequest::parse(bad_pk).is_err());

        let bad_scheme = format!(
            r#"{{"type":"get","id":"a","pk":"{}","callback":"ftp://a","redirect":"http://a","data":["x"]}}"#,
            pk
        );
        assert!(matches!(
            AuthorizationRequest::parse(&bad_scheme),
            Err(RequestError::Invalid(_))
        ));

        let empty = format!(
            r#"{{"type":"get","id":"a","pk":"{}","callback":"http://a","redirect":"http://a","data":[]}}"#,
            pk
        );
        assert!(AuthorizationRequest::parse(&empty).is_err());
    }
}

//! Presence announcements
//!
//! Clients announce themselves on the online subject either with a small
//! JSON object (`{"name": ..., "iss": ...}`) or with a signed three-segment
//! token whose `name` and `iss` claims carry the same information.

use crate::errors::{AccessError, Result};
use chat_access_crypto::GenericClaims;
use chat_access_registry::Registry;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Field holding the announcing identity in structured payloads
pub const ISSUER_FIELD: &str = "iss";
/// Field holding the announced name
pub const NAME_FIELD: &str = "name";

/// Name and identity extracted from an announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceAnnouncement {
    pub name: String,
    pub issuer_public_key: String,
}

/// The two accepted wire shapes
#[derive(Debug, Clone, PartialEq)]
pub enum PresencePayload {
    Structured(Map<String, Value>),
    Token(String),
}

impl PresencePayload {
    /// Recognize the wire shape of `payload`
    pub fn classify(payload: &[u8]) -> Result<Self> {
        if payload.starts_with(b"{") {
            let object: Map<String, Value> = serde_json::from_slice(payload)
                .map_err(|err| AccessError::MalformedPresence(err.to_string()))?;
            return Ok(PresencePayload::Structured(object));
        }

        if payload.split(|byte| *byte == b'.').count() == 3 {
            let token = std::str::from_utf8(payload)
                .map_err(|err| AccessError::MalformedPresence(err.to_string()))?;
            return Ok(PresencePayload::Token(token.to_string()));
        }

        Err(AccessError::UnexpectedPayload)
    }

    /// Extract the announcement
    pub fn decode(self) -> Result<PresenceAnnouncement> {
        let (name, issuer_public_key) = match self {
            PresencePayload::Structured(object) => (
                text_field(&object, NAME_FIELD)?,
                text_field(&object, ISSUER_FIELD)?,
            ),
            PresencePayload::Token(token) => {
                let claims = GenericClaims::decode(&token)
                    .and_then(|claims| {
                        claims.check_expiry()?;
                        Ok(claims)
                    })
                    .map_err(|err| AccessError::MalformedPresence(err.to_string()))?;
                (claims.name, claims.iss)
            }
        };

        if name.is_empty() || issuer_public_key.is_empty() {
            return Err(AccessError::UnexpectedEmpty);
        }

        Ok(PresenceAnnouncement {
            name,
            issuer_public_key,
        })
    }
}

fn text_field(object: &Map<String, Value>, field: &str) -> Result<String> {
    match object.get(field) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(AccessError::MalformedPresence(format!(
            "field {field:?} is not text"
        ))),
        None => Err(AccessError::MalformedPresence(format!(
            "missing field {field:?}"
        ))),
    }
}

/// Applies presence announcements to the registry
#[derive(Debug)]
pub struct PresenceRecorder {
    registry: Arc<Registry>,
}

impl PresenceRecorder {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Parse `payload` and overwrite the announced name's key.
    /// Nothing is written unless the whole payload is valid.
    pub fn record(&self, payload: &[u8]) -> Result<PresenceAnnouncement> {
        let announcement = PresencePayload::classify(payload)?.decode()?;
        self.registry
            .overwrite(&announcement.name, &announcement.issuer_public_key);
        debug!(
            "Presence {} -> {}",
            announcement.name, announcement.issuer_public_key
        );
        Ok(announcement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_access_crypto::{KeyPair, KeyRole};

    fn recorder() -> (PresenceRecorder, Arc<Registry>) {
        let registry = Arc::new(Registry::new());
        (PresenceRecorder::new(registry.clone()), registry)
    }

    #[test]
    fn test_structured_announcement_updates_registry() {
        let (recorder, registry) = recorder();
        let announcement = recorder
            .record(br#"{"name":"bob","iss":"PUBKEY123"}"#)
            .unwrap();

        assert_eq!(announcement.name, "bob");
        assert_eq!(registry.lookup("bob"), Some("PUBKEY123".to_string()));
    }

    #[test]
    fn test_token_announcement_updates_registry() {
        let (recorder, registry) = recorder();
        let user = KeyPair::generate(KeyRole::User);
        let mut claims = GenericClaims::new(user.public_key());
        claims.name = "carol".into();
        let token = claims.encode(&user).unwrap();

        recorder.record(token.as_bytes()).unwrap();
        assert_eq!(registry.lookup("carol"), Some(user.public_key()));
    }

    #[test]
    fn test_unexpected_shape_rejected_without_mutation() {
        let (recorder, registry) = recorder();
        assert!(matches!(
            recorder.record(b"hello there"),
            Err(AccessError::UnexpectedPayload)
        ));
        assert!(matches!(
            recorder.record(b"a.b"),
            Err(AccessError::UnexpectedPayload)
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_structured_fields_must_be_text() {
        let (recorder, registry) = recorder();
        assert!(matches!(
            recorder.record(br#"{"name":"bob","iss":42}"#),
            Err(AccessError::MalformedPresence(_))
        ));
        assert!(matches!(
            recorder.record(br#"{"name":"bob"}"#),
            Err(AccessError::MalformedPresence(_))
        ));
        assert!(matches!(
            recorder.record(b"{not json"),
            Err(AccessError::MalformedPresence(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_empty_fields_rejected() {
        let (recorder, registry) = recorder();
        assert!(matches!(
            recorder.record(br#"{"name":"","iss":"PUBKEY123"}"#),
            Err(AccessError::UnexpectedEmpty)
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_forged_token_rejected() {
        let (recorder, registry) = recorder();
        assert!(matches!(
            recorder.record(b"aaa.bbb.ccc"),
            Err(AccessError::MalformedPresence(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_classify_picks_variant() {
        assert!(matches!(
            PresencePayload::classify(br#"{"name":"x","iss":"y"}"#),
            Ok(PresencePayload::Structured(_))
        ));
        assert!(matches!(
            PresencePayload::classify(b"x.y.z"),
            Ok(PresencePayload::Token(_))
        ));
    }
}

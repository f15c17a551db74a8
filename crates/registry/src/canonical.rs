//! Name canonicalization for provisioning requests
//!
//! Demo names are the first word of the request, lower-cased and capped at
//! [`MAX_NAME_LEN`] characters.

use crate::errors::{RegistryError, Result};
use crate::types::CanonicalName;

/// Maximum length of a canonical name, in characters.
pub const MAX_NAME_LEN: usize = 8;

/// Turn a raw request payload into a canonical name.
///
/// The payload is decoded as UTF-8 (invalid sequences are replaced), lower
/// cased and split on whitespace. Only the first token is kept, so a payload
/// that starts with whitespace has an empty first token and is rejected.
pub fn canonicalize(raw: &[u8]) -> Result<CanonicalName> {
    if raw.is_empty() {
        return Err(RegistryError::EmptyName);
    }

    let text = String::from_utf8_lossy(raw).to_lowercase();
    let first = text.split(char::is_whitespace).next().unwrap_or_default();
    if first.is_empty() {
        return Err(RegistryError::EmptyName);
    }

    let name: String = first.chars().take(MAX_NAME_LEN).collect();
    Ok(CanonicalName::new_unchecked(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn keeps_first_word_lower_cased() {
        assert_eq!(canonicalize(b"Alice Smith").unwrap().as_str(), "alice");
        assert_eq!(canonicalize(b"BOB").unwrap().as_str(), "bob");
    }

    #[test]
    fn truncates_long_names() {
        assert_eq!(
            canonicalize(b"thisisaverylongname").unwrap().as_str(),
            "thisisav"
        );
    }

    #[test]
    fn rejects_empty_payloads() {
        assert_eq!(canonicalize(b""), Err(RegistryError::EmptyName));
        assert_eq!(canonicalize(b" alice"), Err(RegistryError::EmptyName));
        assert_eq!(canonicalize(b"\t"), Err(RegistryError::EmptyName));
    }

    #[test]
    fn splits_on_any_whitespace() {
        assert_eq!(canonicalize(b"carol\nsmith").unwrap().as_str(), "carol");
        assert_eq!(canonicalize(b"dave\tx").unwrap().as_str(), "dave");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let name = canonicalize("ÉÉÉÉÉÉÉÉÉÉ".as_bytes()).unwrap();
        assert_eq!(name.as_str(), "éééééééé");
    }

    proptest! {
        #[test]
        fn canonical_names_are_bounded_and_normalized(raw in prop::collection::vec(any::<u8>(), 0..64)) {
            if let Ok(name) = canonicalize(&raw) {
                let name = name.as_str();
                prop_assert!(!name.is_empty());
                prop_assert!(name.chars().count() <= MAX_NAME_LEN);
                prop_assert!(!name.chars().any(char::is_whitespace));
                prop_assert_eq!(name.to_lowercase(), name.to_string());
            }
        }

        #[test]
        fn canonicalization_is_deterministic(raw in ".{0,32}") {
            prop_assert_eq!(canonicalize(raw.as_bytes()), canonicalize(raw.as_bytes()));
        }
    }
}

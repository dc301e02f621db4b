//! Public and time-bounded URLs for stored blobs.
//!
//! Signed URLs carry `expires` (unix seconds) and `signature`, the URL-safe
//! base64 of SHA-256 over `secret \n name \n expires`.

use crate::services::blob_store::{BlobResult, BlobStoreError};
use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct UrlSigner {
    base_url: Option<String>,
    secret: Option<String>,
}

impl UrlSigner {
    pub fn new(base_url: Option<String>, secret: Option<String>) -> Self {
        Self {
            base_url: base_url
                .map(|b| b.trim_end_matches('/').to_string())
                .filter(|b| !b.is_empty()),
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn url(&self, name: &str) -> String {
        match &self.base_url {
            Some(base) => format!("{}/{}", base, name),
            None => String::new(),
        }
    }

    pub fn signed_url(&self, name: &str, ttl: Duration) -> BlobResult<String> {
        let (Some(base), Some(secret)) = (&self.base_url, &self.secret) else {
            return Err(BlobStoreError::Unsupported("signed urls"));
        };
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires = Utc::now().timestamp().saturating_add(ttl_secs);
        Ok(format!(
            "{}/{}?expires={}&signature={}",
            base,
            name,
            expires,
            sign(secret, name, expires)
        ))
    }

    /// True when `signature` was issued for `name` and has not expired.
    pub fn verify(&self, name: &str, expires: i64, signature: &str) -> bool {
        match &self.secret {
            Some(secret) => {
                let Ok(given) = general_purpose::URL_SAFE_NO_PAD.decode(signature) else {
                    return false;
                };
                let expected = digest(secret, name, expires);
                expires >= Utc::now().timestamp() && constant_time_eq(&expected, &given)
            }
            None => false,
        }
    }
}

fn sign(secret: &str, name: &str, expires: i64) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(digest(secret, name, expires))
}

fn digest(secret: &str, name: &str, expires: i64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b"\n");
    hasher.update(name.as_bytes());
    hasher.update(b"\n");
    hasher.update(expires.to_string().as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Compares every byte regardless of where the inputs first differ.
fn constant_time_eq(expected: &[u8; 32], given: &[u8]) -> bool {
    given.len() == expected.len()
        && expected
            .iter()
            .zip(given)
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_param<'a>(url: &'a str, key: &str) -> &'a str {
        url.split(['?', '&'])
            .find_map(|pair| pair.strip_prefix(&format!("{key}=")))
            .unwrap()
    }

    #[test]
    fn url_is_empty_without_base() {
        let signer = UrlSigner::default();
        assert_eq!(signer.url("uploads/a/b.txt"), "");
        assert!(matches!(
            signer.signed_url("uploads/a/b.txt", Duration::from_secs(60)),
            Err(BlobStoreError::Unsupported(_))
        ));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let signer = UrlSigner::new(Some("https://cdn.example.com/".into()), None);
        assert_eq!(
            signer.url("uploads/a/b.txt"),
            "https://cdn.example.com/uploads/a/b.txt"
        );
    }

    #[test]
    fn signed_url_verifies_only_for_its_name() {
        let signer = UrlSigner::new(
            Some("https://cdn.example.com".into()),
            Some("s3cret".into()),
        );
        let url = signer
            .signed_url("uploads/a/b.txt", Duration::from_secs(300))
            .unwrap();
        assert!(url.starts_with("https://cdn.example.com/uploads/a/b.txt?expires="));

        let expires: i64 = query_param(&url, "expires").parse().unwrap();
        let signature = query_param(&url, "signature");
        assert!(signer.verify("uploads/a/b.txt", expires, signature));
        assert!(!signer.verify("uploads/a/c.txt", expires, signature));
        assert!(!signer.verify("uploads/a/b.txt", expires + 1, signature));
    }

    #[test]
    fn tampered_or_malformed_signatures_are_rejected() {
        let signer = UrlSigner::new(Some("https://x".into()), Some("k".into()));
        let expires = Utc::now().timestamp() + 60;
        let signature = sign("k", "n", expires);
        assert!(signer.verify("n", expires, &signature));

        let mut tampered = signature.clone().into_bytes();
        tampered[0] = if tampered[0] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(!signer.verify("n", expires, &tampered));

        assert!(!signer.verify("n", expires, &signature[..signature.len() - 2]));
        assert!(!signer.verify("n", expires, "not base64!"));
        assert!(!signer.verify("n", expires, ""));
    }

    #[test]
    fn constant_time_eq_needs_equal_length_and_bytes() {
        let a = [7u8; 32];
        assert!(constant_time_eq(&a, &a));
        assert!(!constant_time_eq(&a, &a[..31]));
        let mut b = a;
        b[31] = 8;
        assert!(!constant_time_eq(&a, &b));
    }

    #[test]
    fn expired_signature_is_rejected() {
        let signer = UrlSigner::new(Some("https://x".into()), Some("k".into()));
        let past = Utc::now().timestamp() - 10;
        let signature = sign("k", "n", past);
        assert!(!signer.verify("n", past, &signature));
    }
}

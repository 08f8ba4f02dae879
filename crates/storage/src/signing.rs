//! Time-limited signed URLs for streaming stored media from the CDN.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const EXPIRES_PARAM: &str = "Expires";
const KEY_PAIR_PARAM: &str = "Key-Pair-Id";
const SIGNATURE_PARAM: &str = "Signature";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SigningError {
    #[error("invalid CDN base url: {0}")]
    InvalidBaseUrl(String),

    #[error("signing secret cannot be empty")]
    EmptySecret,

    #[error("malformed signed url: {0}")]
    Malformed(&'static str),

    #[error("signature does not match")]
    BadSignature,

    #[error("signed url expired")]
    Expired,
}

/// Produces URLs granting read access to one blob key until `expires_at`.
pub trait UrlSigner: Send + Sync {
    /// Sign `key` for access until `expires_at`.
    ///
    /// # Errors
    ///
    /// Returns `SigningError` if the URL cannot be built.
    fn sign(&self, key: &str, expires_at: DateTime<Utc>) -> Result<String, SigningError>;
}

/// Signs `<base>/<key>?Expires=..&Key-Pair-Id=..&Signature=..` with
/// HMAC-SHA256 over `"<resource>\n<expires>"`.
#[derive(Clone)]
pub struct HmacUrlSigner {
    base: Url,
    key_pair_id: String,
    secret: Vec<u8>,
}

impl std::fmt::Debug for HmacUrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacUrlSigner")
            .field("base", &self.base.as_str())
            .field("key_pair_id", &self.key_pair_id)
            .finish_non_exhaustive()
    }
}

impl HmacUrlSigner {
    /// # Errors
    ///
    /// Returns `SigningError` if `base_url` is not an absolute http(s) URL or
    /// `secret` is empty.
    pub fn new(
        base_url: &str,
        key_pair_id: impl Into<String>,
        secret: impl AsRef<[u8]>,
    ) -> Result<Self, SigningError> {
        let base = Url::parse(base_url).map_err(|e| SigningError::InvalidBaseUrl(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(SigningError::InvalidBaseUrl(base_url.to_owned()));
        }
        let secret = secret.as_ref().to_vec();
        if secret.is_empty() {
            return Err(SigningError::EmptySecret);
        }
        Ok(Self {
            base,
            key_pair_id: key_pair_id.into(),
            secret,
        })
    }

    fn resource_url(&self, key: &str) -> Result<Url, SigningError> {
        let mut url = self.base.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|()| SigningError::InvalidBaseUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(key.split('/'));
        Ok(url)
    }

    fn mac(&self, resource: &str, expires: i64) -> Result<HmacSha256, SigningError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| SigningError::EmptySecret)?;
        mac.update(resource.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    /// Check a URL produced by `sign`.
    ///
    /// # Errors
    ///
    /// Returns `SigningError::BadSignature` if any signed part was altered and
    /// `SigningError::Expired` once `now` reaches the expiry.
    pub fn verify(&self, signed_url: &str, now: DateTime<Utc>) -> Result<(), SigningError> {
        let url = Url::parse(signed_url).map_err(|_| SigningError::Malformed("not a url"))?;

        let mut expires = None;
        let mut key_pair = None;
        let mut signature = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                EXPIRES_PARAM => expires = Some(value.into_owned()),
                KEY_PAIR_PARAM => key_pair = Some(value.into_owned()),
                SIGNATURE_PARAM => signature = Some(value.into_owned()),
                _ => return Err(SigningError::Malformed("unexpected query parameter")),
            }
        }
        let expires: i64 = expires
            .ok_or(SigningError::Malformed("missing Expires"))?
            .parse()
            .map_err(|_| SigningError::Malformed("Expires is not a unix timestamp"))?;
        if key_pair.as_deref() != Some(self.key_pair_id.as_str()) {
            return Err(SigningError::BadSignature);
        }
        let signature = hex::decode(signature.ok_or(SigningError::Malformed("missing Signature"))?)
            .map_err(|_| SigningError::Malformed("Signature is not hex"))?;

        let mut resource = url.clone();
        resource.set_query(None);
        self.mac(resource.as_str(), expires)?
            .verify_slice(&signature)
            .map_err(|_| SigningError::BadSignature)?;

        if now.timestamp() >= expires {
            return Err(SigningError::Expired);
        }
        Ok(())
    }
}

impl UrlSigner for HmacUrlSigner {
    fn sign(&self, key: &str, expires_at: DateTime<Utc>) -> Result<String, SigningError> {
        let mut url = self.resource_url(key)?;
        let expires = expires_at.timestamp();
        let signature = hex::encode(self.mac(url.as_str(), expires)?.finalize().into_bytes());
        url.query_pairs_mut()
            .append_pair(EXPIRES_PARAM, &expires.to_string())
            .append_pair(KEY_PAIR_PARAM, &self.key_pair_id)
            .append_pair(SIGNATURE_PARAM, &signature);
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use course_core::time::fixed_now;

    fn signer() -> HmacUrlSigner {
        HmacUrlSigner::new("https://cdn.example.com/", "K2JCJMDEHXQW5F", "s3cr3t").unwrap()
    }

    #[test]
    fn signed_url_has_expected_shape() {
        let expires = fixed_now() + Duration::seconds(3600);
        let url = signer()
            .sign("videos/1/abc/master.m3u8", expires)
            .unwrap();
        let expected_prefix = format!(
            "https://cdn.example.com/videos/1/abc/master.m3u8\
             ?Expires={}&Key-Pair-Id=K2JCJMDEHXQW5F&Signature=",
            expires.timestamp()
        );
        assert!(url.starts_with(&expected_prefix), "{url}");
    }

    #[test]
    fn verify_accepts_until_expiry() {
        let s = signer();
        let expires = fixed_now() + Duration::seconds(60);
        let url = s.sign("videos/1/abc/master.m3u8", expires).unwrap();

        assert_eq!(s.verify(&url, fixed_now()), Ok(()));
        assert_eq!(s.verify(&url, expires), Err(SigningError::Expired));
    }

    #[test]
    fn verify_rejects_tampering() {
        let s = signer();
        let expires = fixed_now() + Duration::seconds(60);
        let url = s.sign("videos/1/abc/master.m3u8", expires).unwrap();

        let other_resource = url.replace("/abc/", "/xyz/");
        assert_eq!(
            s.verify(&other_resource, fixed_now()),
            Err(SigningError::BadSignature)
        );

        let later = (expires + Duration::seconds(3600)).timestamp().to_string();
        let extended = url.replace(&expires.timestamp().to_string(), &later);
        assert_eq!(
            s.verify(&extended, fixed_now()),
            Err(SigningError::BadSignature)
        );

        let other =
            HmacUrlSigner::new("https://cdn.example.com", "K2JCJMDEHXQW5F", "other").unwrap();
        assert_eq!(other.verify(&url, fixed_now()), Err(SigningError::BadSignature));
    }

    #[test]
    fn keys_with_spaces_are_encoded() {
        let url = signer()
            .sign("course-content/1/my notes.pdf", fixed_now())
            .unwrap();
        assert!(url.starts_with("https://cdn.example.com/course-content/1/my%20notes.pdf?"));
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(matches!(
            HmacUrlSigner::new("not a url", "k", "s"),
            Err(SigningError::InvalidBaseUrl(_))
        ));
        assert!(matches!(
            HmacUrlSigner::new("ftp://cdn.example.com", "k", "s"),
            Err(SigningError::InvalidBaseUrl(_))
        ));
        assert_eq!(
            HmacUrlSigner::new("https://cdn.example.com", "k", "").unwrap_err(),
            SigningError::EmptySecret
        );
    }
}

//! Guest session credentials carried as a header pair.
//!
//! A guest client is identified by `X-Session-Id` (a UUID) plus
//! `X-Session-Secret` (an opaque random string minted alongside the id).
//! Both headers must be present and well formed for the credentials to be
//! considered at all; a half-supplied pair is treated as absent credentials
//! rather than an authentication failure, since anonymous browsing is legal.

use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use uuid::Uuid;

pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const SESSION_SECRET_HEADER: &str = "x-session-secret";

/// The header-pair credentials presented by a guest client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestCredentials {
    pub session_id: Uuid,
    pub secret: String,
}

impl GuestCredentials {
    /// Extracts credentials from request headers. Returns `None` when the
    /// pair is absent or malformed.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let session_id = headers
            .get(SESSION_ID_HEADER)?
            .to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s).ok())?;
        let secret = headers.get(SESSION_SECRET_HEADER)?.to_str().ok()?;
        if secret.is_empty() {
            return None;
        }
        Some(Self {
            session_id,
            secret: secret.to_string(),
        })
    }
}

/// Mints a fresh session secret: 32 bytes of CSPRNG output, base64url
/// without padding.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_well_formed_pair() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        headers.insert(SESSION_SECRET_HEADER, HeaderValue::from_static("s3cr3t"));

        let creds = GuestCredentials::from_headers(&headers).unwrap();
        assert_eq!(creds.session_id, id);
        assert_eq!(creds.secret, "s3cr3t");
    }

    #[test]
    fn half_supplied_pair_is_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(
            SESSION_ID_HEADER,
            HeaderValue::from_str(&Uuid::new_v4().to_string()).unwrap(),
        );
        assert!(GuestCredentials::from_headers(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(SESSION_SECRET_HEADER, HeaderValue::from_static("s3cr3t"));
        assert!(GuestCredentials::from_headers(&headers).is_none());
    }

    #[test]
    fn malformed_session_id_is_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        headers.insert(SESSION_SECRET_HEADER, HeaderValue::from_static("s3cr3t"));
        assert!(GuestCredentials::from_headers(&headers).is_none());
    }

    #[test]
    fn generated_secrets_are_unique_and_url_safe() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);
        assert!(a.len() >= 40);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}

/// Signed cookies
///
/// Session and sign-in state live entirely in cookies. A sealed value is the
/// base64url JSON payload, a `.`, and the hex HMAC-SHA256 of the encoded payload.
use crate::context::AppConfig;
use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use garden_store::SessionContext;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::Sha256;
use tower_cookies::cookie::SameSite;
use tower_cookies::{Cookie, Cookies};

// Type alias for HMAC-SHA256
type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "tgf_session";

// ============================================================================
// Sealing
// ============================================================================

fn mac_for(secret: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes()).context("Failed to create HMAC")
}

/// Serialize and sign `value` for storage in a cookie.
pub fn seal<T: Serialize>(value: &T, secret: &str) -> Result<String> {
    let json = serde_json::to_vec(value).context("Failed to serialize cookie payload")?;
    let payload = URL_SAFE_NO_PAD.encode(json);

    let mut mac = mac_for(secret)?;
    mac.update(payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", payload, signature))
}

/// Verify the signature of a sealed value and decode its payload.
pub fn open<T: DeserializeOwned>(sealed: &str, secret: &str) -> Result<T> {
    let (payload, signature) = sealed
        .split_once('.')
        .ok_or_else(|| anyhow::anyhow!("Invalid cookie format"))?;

    let signature = hex::decode(signature).context("Invalid cookie signature")?;
    let mut mac = mac_for(secret)?;
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| anyhow::anyhow!("Invalid cookie signature"))?;

    let json = URL_SAFE_NO_PAD
        .decode(payload)
        .context("Failed to decode cookie payload")?;
    serde_json::from_slice(&json).context("Failed to parse cookie payload")
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Identity provider subject
    pub user_id: String,
    pub email: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    /// Unix epoch seconds
    pub expires_at: i64,
}

impl SessionClaims {
    pub fn new(
        user_id: impl Into<String>,
        email: impl Into<String>,
        max_age_seconds: i64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            name: None,
            avatar_url: None,
            expires_at: Utc::now().timestamp() + max_age_seconds,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.expires_at
    }

    pub fn scope(&self) -> SessionContext {
        SessionContext::new(self.user_id.clone(), self.email.clone())
    }
}

/// Decode and validate a session cookie value.
pub fn verify_session(cookie_value: &str, secret: &str) -> Result<SessionClaims> {
    let claims: SessionClaims = open(cookie_value, secret)?;
    if claims.is_expired() {
        anyhow::bail!("Session has expired");
    }
    Ok(claims)
}

fn build_cookie(name: &'static str, value: String, max_age_seconds: i64, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, value);
    cookie.set_http_only(true);
    cookie.set_secure(secure);
    // Lax so the cookie survives the top-level redirect back from the provider
    cookie.set_same_site(SameSite::Lax);
    cookie.set_path("/");
    cookie.set_max_age(tower_cookies::cookie::time::Duration::seconds(max_age_seconds));
    cookie
}

pub fn set_signed_cookie<T: Serialize>(
    cookies: &Cookies,
    name: &'static str,
    value: &T,
    max_age_seconds: i64,
    config: &AppConfig,
) -> Result<()> {
    let sealed = seal(value, &config.session_secret)?;
    cookies.add(build_cookie(name, sealed, max_age_seconds, config.cookie_secure));
    Ok(())
}

pub fn clear_cookie(cookies: &Cookies, name: &'static str) {
    let mut cookie = Cookie::new(name, "");
    cookie.set_path("/");
    cookies.remove(cookie);
}

pub fn set_session_cookie(cookies: &Cookies, claims: &SessionClaims, config: &AppConfig) -> Result<()> {
    set_signed_cookie(
        cookies,
        SESSION_COOKIE,
        claims,
        config.session_max_age_seconds,
        config,
    )
}

/// The session of the current request, if there is a valid one.
pub fn current_session(cookies: &Cookies, config: &AppConfig) -> Option<SessionClaims> {
    let cookie = cookies.get(SESSION_COOKIE)?;
    match verify_session(cookie.value(), &config.session_secret) {
        Ok(claims) => Some(claims),
        Err(e) => {
            tracing::debug!("rejecting session cookie: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key";

    #[test]
    fn test_sealed_session_verifies() {
        let claims = SessionClaims::new("sub-123", "ada@example.com", 3600);
        let sealed = seal(&claims, SECRET).unwrap();

        assert_eq!(verify_session(&sealed, SECRET).unwrap(), claims);
        assert!(verify_session(&sealed, "wrong-secret").is_err());
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let claims = SessionClaims::new("sub-123", "ada@example.com", 3600);
        let sealed = seal(&claims, SECRET).unwrap();
        let (_, signature) = sealed.split_once('.').unwrap();

        let forged = SessionClaims::new("sub-999", "mallory@example.com", 3600);
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());

        assert!(verify_session(&format!("{forged_payload}.{signature}"), SECRET).is_err());
        assert!(verify_session("no-separator", SECRET).is_err());
    }

    #[test]
    fn test_expired_session_is_rejected() {
        let claims = SessionClaims::new("sub-123", "ada@example.com", -5);
        let sealed = seal(&claims, SECRET).unwrap();

        let err = verify_session(&sealed, SECRET).unwrap_err();
        assert_eq!(err.to_string(), "Session has expired");
    }

    #[test]
    fn test_claims_scope() {
        let claims = SessionClaims::new("sub-123", "ada@example.com", 60);
        let scope = claims.scope();
        assert_eq!(scope.owner_id.as_str(), "sub-123");
        assert_eq!(scope.email, "ada@example.com");
    }
}

use super::session::{SESSION_COOKIE, clear_cookie, set_signed_cookie};
use super::{absolute_url, found, login_error_url};
use crate::context::{Ctx, IdpConfig};
use anyhow::{Context, Result};
use axum::{
    Json,
    extract::{Query, State},
    response::Response,
};
use chrono::Utc;
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, CsrfToken, IssuerUrl, Nonce, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, Scope,
    core::{CoreAuthenticationFlow, CoreClient, CoreIdTokenClaims, CoreProviderMetadata},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_cookies::Cookies;
use url::Url;

pub const AUTH_STATE_COOKIE: &str = "tgf_auth_state";

/// How long a started sign-in may take before the callback is refused.
pub const AUTH_STATE_TTL_SECONDS: i64 = 600;

// ============================================================================
// Authentication State
// ============================================================================

/// Sign-in state carried in a signed cookie between `/auth/login` and the callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    pub csrf_token: String,
    /// Nonce for ID token validation
    pub nonce: String,
    /// PKCE code verifier (must match the challenge sent to the provider)
    pub code_verifier: String,
    /// Unix epoch seconds
    pub expires_at: i64,
}

impl AuthState {
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.expires_at
    }

    /// The provider must echo back the CSRF token we sent.
    pub fn validate(&self, returned_state: &str) -> Result<()> {
        if self.is_expired() {
            anyhow::bail!("Sign-in attempt has expired, please try again");
        }
        if self.csrf_token != returned_state {
            anyhow::bail!("Sign-in state mismatch");
        }
        Ok(())
    }
}

// ============================================================================
// Identity Provider
// ============================================================================

/// Identity vouched for by a verified ID token.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedIdentity {
    pub subject: String,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

async fn discover(
    idp: &IdpConfig,
    http: &reqwest::Client,
) -> Result<CoreProviderMetadata> {
    let issuer_url = IssuerUrl::new(idp.issuer_url.clone()).context("Invalid issuer URL")?;
    CoreProviderMetadata::discover_async(issuer_url, http)
        .await
        .context("Failed to discover provider metadata")
}

/// Authorization code flow URL with PKCE, nonce and CSRF state.
pub async fn build_authorize_url(idp: &IdpConfig, http: &reqwest::Client) -> Result<(Url, AuthState)> {
    let provider_metadata = discover(idp, http).await?;

    let client = CoreClient::from_provider_metadata(
        provider_metadata,
        ClientId::new(idp.client_id.clone()),
        Some(ClientSecret::new(idp.client_secret.clone())),
    )
    .set_redirect_uri(RedirectUrl::new(idp.redirect_url.clone()).context("Invalid redirect URL")?);

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
    let scopes: Vec<Scope> = idp.scopes.iter().cloned().map(Scope::new).collect();

    let (auth_url, csrf_token, nonce) = client
        .authorize_url(
            CoreAuthenticationFlow::AuthorizationCode,
            CsrfToken::new_random,
            Nonce::new_random,
        )
        .add_scopes(scopes)
        .set_pkce_challenge(pkce_challenge)
        .url();

    let state = AuthState {
        csrf_token: csrf_token.secret().clone(),
        nonce: nonce.secret().clone(),
        code_verifier: pkce_verifier.secret().clone(),
        expires_at: Utc::now().timestamp() + AUTH_STATE_TTL_SECONDS,
    };

    Ok((auth_url, state))
}

/// Exchange the authorization code and verify the returned ID token.
pub async fn exchange_code(
    idp: &IdpConfig,
    http: &reqwest::Client,
    code: &str,
    state: &AuthState,
) -> Result<VerifiedIdentity> {
    let provider_metadata = discover(idp, http).await?;

    let client = CoreClient::from_provider_metadata(
        provider_metadata,
        ClientId::new(idp.client_id.clone()),
        Some(ClientSecret::new(idp.client_secret.clone())),
    )
    .set_redirect_uri(RedirectUrl::new(idp.redirect_url.clone()).context("Invalid redirect URL")?);

    let token_response = client
        .exchange_code(AuthorizationCode::new(code.to_string()))
        .context("Failed to create code exchange request")?
        .set_pkce_verifier(PkceCodeVerifier::new(state.code_verifier.clone()))
        .request_async(http)
        .await
        .context("Failed to exchange authorization code")?;

    let id_token = token_response
        .extra_fields()
        .id_token()
        .ok_or_else(|| anyhow::anyhow!("Identity provider did not return an ID token"))?;

    let claims = id_token
        .claims(&client.id_token_verifier(), &Nonce::new(state.nonce.clone()))
        .context("Failed to verify ID token")?;

    identity_from_claims(claims)
}

fn identity_from_claims(claims: &CoreIdTokenClaims) -> Result<VerifiedIdentity> {
    let email = claims
        .email()
        .map(|e| e.as_str().to_string())
        .ok_or_else(|| anyhow::anyhow!("Identity provider did not return an email"))?;

    Ok(VerifiedIdentity {
        subject: claims.subject().as_str().to_string(),
        email,
        name: claims
            .name()
            .and_then(|n| n.get(None))
            .map(|n| n.as_str().to_string()),
        picture: claims
            .picture()
            .and_then(|p| p.get(None))
            .map(|p| p.as_str().to_string()),
    })
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    pub error: Option<String>,
}

/// `GET /login`
pub async fn login_page(State(ctx): State<Ctx>, Query(query): Query<LoginQuery>) -> Json<Value> {
    Json(json!({
        "message": "Sign in to continue",
        "error": query.error,
        "login_url": absolute_url(&ctx.config.app_url, "/auth/login"),
    }))
}

/// `GET /auth/login`: redirect to the identity provider.
pub async fn start_login(State(ctx): State<Ctx>, cookies: Cookies) -> Response {
    let app_url = &ctx.config.app_url;
    let Some(idp) = ctx.config.idp.as_ref() else {
        return found(&login_error_url(app_url, "Identity provider is not configured"));
    };

    let result = async {
        let (auth_url, state) = build_authorize_url(idp, &ctx.http).await?;
        set_signed_cookie(
            &cookies,
            AUTH_STATE_COOKIE,
            &state,
            AUTH_STATE_TTL_SECONDS,
            &ctx.config,
        )?;
        anyhow::Ok(auth_url)
    }
    .await;

    match result {
        Ok(auth_url) => {
            tracing::info!("redirecting to identity provider");
            found(auth_url.as_str())
        }
        Err(e) => {
            tracing::error!("failed to start sign-in: {:#}", e);
            found(&login_error_url(app_url, &e.to_string()))
        }
    }
}

/// `POST /auth/signout`
pub async fn sign_out(State(ctx): State<Ctx>, cookies: Cookies) -> Response {
    clear_cookie(&cookies, SESSION_COOKIE);
    tracing::info!("signed out");
    found(&absolute_url(&ctx.config.app_url, "/login"))
}

/// `GET /api/auth-diagnostics`: which settings are present, never their values.
pub async fn auth_diagnostics(State(ctx): State<Ctx>) -> Json<Value> {
    let config = &ctx.config;
    let idp = config.idp.as_ref();

    Json(json!({
        "profile": config.profile,
        "app_url": config.app_url.as_str(),
        "store_backend": format!("{:?}", config.store_backend).to_lowercase(),
        "allow_list": ctx.allow_list.describe(),
        "session_secret_configured": !config.session_secret.is_empty(),
        "cookie_secure": config.cookie_secure,
        "idp": {
            "configured": idp.is_some(),
            "issuer_url": idp.map(|i| i.issuer_url.as_str()),
            "redirect_url": idp.map(|i| i.redirect_url.as_str()),
            "client_id_configured": idp.is_some_and(|i| !i.client_id.is_empty()),
            "client_secret_configured": idp.is_some_and(|i| !i.client_secret.is_empty()),
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::{open, seal};

    fn state(expires_in: i64) -> AuthState {
        AuthState {
            csrf_token: CsrfToken::new_random().secret().clone(),
            nonce: Nonce::new_random().secret().clone(),
            code_verifier: PkceCodeChallenge::new_random_sha256().1.secret().clone(),
            expires_at: Utc::now().timestamp() + expires_in,
        }
    }

    #[test]
    fn test_random_generators_are_unique() {
        let a = state(60);
        let b = state(60);
        assert_ne!(a.csrf_token, b.csrf_token);
        assert_ne!(a.nonce, b.nonce);
        assert!(a.code_verifier.len() >= 43);
    }

    #[test]
    fn test_state_validation() {
        let fresh = state(60);
        assert!(fresh.validate(&fresh.csrf_token).is_ok());
        assert_eq!(
            fresh.validate("forged").unwrap_err().to_string(),
            "Sign-in state mismatch"
        );

        let stale = state(-60);
        assert!(stale.validate(&stale.csrf_token).is_err());
    }

    #[test]
    fn test_state_survives_cookie_sealing() {
        let original = state(60);
        let sealed = seal(&original, "secret").unwrap();
        let opened: AuthState = open(&sealed, "secret").unwrap();
        assert_eq!(opened, original);
    }
}

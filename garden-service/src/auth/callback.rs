/// OAuth callback handler
///
/// Turns the provider's redirect into either a session or a `/login?error=` redirect.
use super::authn::{AUTH_STATE_COOKIE, AuthState, VerifiedIdentity, exchange_code};
use super::session::{SessionClaims, clear_cookie, open, set_session_cookie};
use super::{absolute_url, found, login_error_url};
use crate::context::Ctx;
use crate::error::DASHBOARD_PATH;
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    response::Response,
};
use serde::Deserialize;
use tower_cookies::Cookies;

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// What the callback should do with the provider's parameters.
#[derive(Debug, PartialEq, Eq)]
pub enum CallbackStep {
    /// The provider reported an error; the message to show on the login page.
    ProviderError(String),
    Exchange { code: String, state: String },
    MissingCode,
}

impl CallbackQuery {
    pub fn step(self) -> CallbackStep {
        if let Some(error) = self.error {
            return CallbackStep::ProviderError(self.error_description.unwrap_or(error));
        }
        match self.code {
            Some(code) => CallbackStep::Exchange {
                code,
                state: self.state.unwrap_or_default(),
            },
            None => CallbackStep::MissingCode,
        }
    }
}

pub fn access_denied_message(email: &str) -> String {
    format!("Access denied: {} is not on the allow-list", email)
}

/// `GET /auth/callback`
pub async fn auth_callback(
    State(ctx): State<Ctx>,
    cookies: Cookies,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let app_url = &ctx.config.app_url;

    match query.step() {
        CallbackStep::ProviderError(message) => {
            tracing::warn!("identity provider returned an error: {}", message);
            found(&login_error_url(app_url, &message))
        }
        CallbackStep::MissingCode => found(&login_error_url(app_url, "No authorization code received")),
        CallbackStep::Exchange { code, state } => {
            let result = complete_sign_in(&ctx, &cookies, &code, &state).await;
            clear_cookie(&cookies, AUTH_STATE_COOKIE);

            match result {
                Ok(claims) => {
                    tracing::info!(user_id = %claims.user_id, "signed in");
                    found(&absolute_url(app_url, DASHBOARD_PATH))
                }
                Err(e) => {
                    tracing::warn!("sign-in failed: {:#}", e);
                    found(&login_error_url(app_url, &e.to_string()))
                }
            }
        }
    }
}

async fn complete_sign_in(
    ctx: &Ctx,
    cookies: &Cookies,
    code: &str,
    returned_state: &str,
) -> Result<SessionClaims> {
    let idp = ctx
        .config
        .idp
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Identity provider is not configured"))?;

    let auth_state: AuthState = cookies
        .get(AUTH_STATE_COOKIE)
        .ok_or_else(|| anyhow::anyhow!("Sign-in state is missing, please try again"))
        .and_then(|cookie| open(cookie.value(), &ctx.config.session_secret))
        .context("Sign-in state could not be verified")?;
    auth_state.validate(returned_state)?;

    let identity = exchange_code(idp, &ctx.http, code, &auth_state).await?;

    authorize(ctx, identity).await.and_then(|claims| {
        set_session_cookie(cookies, &claims, &ctx.config)?;
        Ok(claims)
    })
}

/// Allow-list gate between a verified identity and a session.
pub async fn authorize(ctx: &Ctx, identity: VerifiedIdentity) -> Result<SessionClaims> {
    if !ctx.allow_list.is_allowed(&identity.email).await? {
        anyhow::bail!(access_denied_message(&identity.email));
    }

    let mut claims = SessionClaims::new(
        identity.subject,
        identity.email,
        ctx.config.session_max_age_seconds,
    );
    claims.name = identity.name;
    claims.avatar_url = identity.picture;
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AppConfig;

    fn query(pairs: &[(&str, &str)]) -> CallbackQuery {
        let mut q = CallbackQuery::default();
        for (k, v) in pairs {
            let v = Some(v.to_string());
            match *k {
                "code" => q.code = v,
                "state" => q.state = v,
                "error" => q.error = v,
                "error_description" => q.error_description = v,
                _ => unreachable!(),
            }
        }
        q
    }

    #[test]
    fn test_error_takes_precedence() {
        assert_eq!(
            query(&[("error", "access_denied"), ("code", "abc")]).step(),
            CallbackStep::ProviderError("access_denied".to_string())
        );
        assert_eq!(
            query(&[("error", "access_denied"), ("error_description", "User cancelled")]).step(),
            CallbackStep::ProviderError("User cancelled".to_string())
        );
    }

    #[test]
    fn test_code_and_missing_code() {
        assert_eq!(
            query(&[("code", "abc"), ("state", "xyz")]).step(),
            CallbackStep::Exchange {
                code: "abc".to_string(),
                state: "xyz".to_string(),
            }
        );
        assert_eq!(query(&[]).step(), CallbackStep::MissingCode);
    }

    fn ctx_allowing(emails: &str) -> Ctx {
        let config = AppConfig::from_lookup(|key| match key {
            "ALLOWED_EMAILS" => Some(emails.to_string()),
            "SESSION_SECRET" => Some("secret".to_string()),
            _ => None,
        })
        .unwrap();
        Ctx::in_memory(config).unwrap()
    }

    fn identity(email: &str) -> VerifiedIdentity {
        VerifiedIdentity {
            subject: "sub-1".to_string(),
            email: email.to_string(),
            name: Some("Ada".to_string()),
            picture: None,
        }
    }

    #[tokio::test]
    async fn test_allow_listed_identity_gets_claims() {
        let ctx = ctx_allowing("ada@example.com");
        let claims = authorize(&ctx, identity("Ada@example.com")).await.unwrap();

        assert_eq!(claims.user_id, "sub-1");
        assert_eq!(claims.name.as_deref(), Some("Ada"));
        assert!(!claims.is_expired());
    }

    #[tokio::test]
    async fn test_unlisted_identity_is_denied() {
        let ctx = ctx_allowing("ada@example.com");
        let err = authorize(&ctx, identity("mallory@example.com")).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "Access denied: mallory@example.com is not on the allow-list"
        );
    }
}

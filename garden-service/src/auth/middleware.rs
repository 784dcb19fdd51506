use super::session::current_session;
use super::{absolute_url, found};
use crate::context::Ctx;
use crate::error::AppError;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_cookies::Cookies;
use url::Url;

pub const CALLBACK_PATH: &str = "/auth/callback";

/// Protected routes get the caller's `SessionContext` (and `SessionClaims`) as
/// request extensions. Without a valid session, API routes answer 401 and page
/// routes redirect to `/login`.
pub async fn require_session(
    State(ctx): State<Ctx>,
    cookies: Cookies,
    mut request: Request,
    next: Next,
) -> Response {
    match current_session(&cookies, &ctx.config) {
        Some(claims) => {
            request.extensions_mut().insert(claims.scope());
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        None if request.uri().path().starts_with("/api/") => {
            AppError::Unauthorized("Sign in required".to_string()).into_response()
        }
        None => found(&absolute_url(&ctx.config.app_url, "/login")),
    }
}

/// Where a callback that landed on a `localhost` host should go instead, when the
/// canonical URL names another host.
pub fn canonical_redirect(app_url: &Url, host: Option<&str>, path: &str, query: Option<&str>) -> Option<String> {
    if path != CALLBACK_PATH {
        return None;
    }

    let host = host?;
    let hostname = host.rsplit_once(':').map_or(host, |(name, _port)| name);
    if hostname != "localhost" || app_url.host_str() == Some("localhost") {
        return None;
    }

    let mut target = app_url.join(path).ok()?;
    target.set_query(query);
    Some(target.into())
}

pub async fn canonical_host(State(ctx): State<Ctx>, request: Request, next: Next) -> Response {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok());

    match canonical_redirect(
        &ctx.config.app_url,
        host,
        request.uri().path(),
        request.uri().query(),
    ) {
        Some(target) => {
            tracing::info!("redirecting callback to canonical host: {}", target);
            found(&target)
        }
        None => next.run(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prod() -> Url {
        Url::parse("https://garden.example.com").unwrap()
    }

    #[test]
    fn test_localhost_callback_moves_to_app_url() {
        assert_eq!(
            canonical_redirect(&prod(), Some("localhost:3000"), CALLBACK_PATH, Some("code=abc&state=x")),
            Some("https://garden.example.com/auth/callback?code=abc&state=x".to_string())
        );
        assert_eq!(
            canonical_redirect(&prod(), Some("localhost"), CALLBACK_PATH, None),
            Some("https://garden.example.com/auth/callback".to_string())
        );
    }

    #[test]
    fn test_no_redirect_otherwise() {
        // already on the canonical host
        assert_eq!(
            canonical_redirect(&prod(), Some("garden.example.com"), CALLBACK_PATH, None),
            None
        );
        // other paths are left alone
        assert_eq!(canonical_redirect(&prod(), Some("localhost:3000"), "/dashboard", None), None);
        // local development
        let local = Url::parse("http://localhost:3000").unwrap();
        assert_eq!(canonical_redirect(&local, Some("localhost:3000"), CALLBACK_PATH, None), None);
        assert_eq!(canonical_redirect(&prod(), None, CALLBACK_PATH, None), None);
    }
}

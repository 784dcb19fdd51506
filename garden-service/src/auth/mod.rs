pub mod allow_list;
pub mod authn;
pub mod callback;
pub mod middleware;
pub mod session;

pub use allow_list::AllowList;
pub use middleware::{canonical_host, require_session};
pub use session::SessionClaims;

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use url::Url;

/// 302 with a `Location` header.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// `path` resolved against the canonical application URL.
pub fn absolute_url(app_url: &Url, path: &str) -> String {
    app_url
        .join(path)
        .map(String::from)
        .unwrap_or_else(|_| path.to_string())
}

/// `/login?error=<message>` on the canonical application URL.
pub fn login_error_url(app_url: &Url, message: &str) -> String {
    match app_url.join("/login") {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("error", message);
            url.into()
        }
        Err(_) => "/login".to_string(),
    }
}

use crate::auth::{self, authn, callback};
use crate::context::Ctx;
use crate::pages::{events, handlers};
use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_cookies::CookieManagerLayer;

/// Create all routes for the application
pub fn create_routes<S: Send + Sync>(ctx: Ctx) -> Router<S> {
    // Create protected routes that require a session
    let protected_routes = Router::new()
        .route("/dashboard", get(handlers::dashboard))
        .route("/page/{id}", get(handlers::page_view))
        .route(
            "/api/pages",
            get(handlers::list_pages).post(handlers::create_page),
        )
        .route("/api/pages/changes", get(events::page_changes))
        .route(
            "/api/pages/{id}",
            get(handlers::get_page)
                .patch(handlers::update_page)
                .delete(handlers::delete_page),
        )
        .route(
            "/api/pages/{id}/editor",
            post(handlers::mount_editor)
                .patch(handlers::edit_in_editor)
                .get(handlers::editor_status)
                .delete(handlers::unmount_editor),
        )
        .route_layer(middleware::from_fn_with_state(
            ctx.clone(),
            auth::require_session,
        ));

    // Create public routes that don't require a session
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
        .route("/login", get(authn::login_page))
        .route("/auth/login", get(authn::start_login))
        .route("/auth/callback", get(callback::auth_callback))
        .route("/auth/signout", post(authn::sign_out))
        .route("/api/auth-diagnostics", get(authn::auth_diagnostics));

    // Merge all routes
    public_routes
        .merge(protected_routes)
        .layer(middleware::from_fn_with_state(ctx.clone(), auth::canonical_host))
        .layer(CookieManagerLayer::new())
        .with_state(ctx)
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    tracing::debug!("Health check endpoint called");
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// Root endpoint
async fn root() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "message": "Textual Garden Forge",
            "dashboard": "/dashboard",
            "login": "/login",
        })),
    )
}

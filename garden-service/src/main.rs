use garden_service::context::Ctx;
use garden_service::listener;
use garden_service::pages::PageBackend;
use garden_service::routes::create_routes;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,garden_service=debug")),
        )
        .init();

    let ctx = Ctx::new().await?;
    ctx.editors.spawn_sweeper();

    if let PageBackend::Postgres(store) = ctx.pages.as_ref() {
        listener::spawn_relay(store.clone());
    }

    let addr = ctx.config.bind_addr.clone();
    let app = create_routes::<()>(ctx).layer(TraceLayer::new_for_http());

    tracing::info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

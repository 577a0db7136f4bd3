use anyhow::Result;
use axum::serve;
use holderscope_core::{config::AppConfig, runtime::HolderscopeRuntime};
use server::{handlers::AppState, router};
use std::{net::SocketAddr, sync::Arc};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the logging system based on the configuration.
fn init_logging(config: &AppConfig) {
    let filter = std::env::var("RUST_LOG").map_or_else(
        |_| {
            EnvFilter::new(format!(
                "warn,holderscope_core={level},server={level}",
                level = config.logging.level
            ))
        },
        EnvFilter::new,
    );

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        // "pretty" and any other format default to pretty logging
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(false),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config);

    let bind_address = config.server.bind_address.clone();
    let bind_port = config.server.bind_port;

    let runtime = Arc::new(HolderscopeRuntime::builder().with_config(config).build()?);
    runtime.start().await;

    let state = Arc::new(AppState { populator: runtime.populator(), metrics: runtime.metrics() });
    let app = router::build_router(state);

    let addr: SocketAddr = format!("{bind_address}:{bind_port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "holderscope server listening");

    // The ctrl-c waiter broadcasts shutdown; the server drains in-flight
    // requests and exits once the broadcast arrives.
    let waiter = Arc::clone(&runtime);
    tokio::spawn(async move { waiter.wait_for_shutdown().await });

    let mut shutdown_rx = runtime.shutdown_signal();
    serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;

    info!("server stopped");
    Ok(())
}

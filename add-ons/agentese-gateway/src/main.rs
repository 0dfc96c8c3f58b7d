//! Axum gateway: the HTTP/SSE/WS projection of the AGENTESE fabric.
//!
//! Boots a resolver over the built-in node set (plus the grow kernel for the
//! autopoietic surface) and serves the discovery/invocation routes under
//! `/agentese`. Config comes from `AGENTESE_*` environment variables.

mod app;

use agentese_core::{FabricConfig, Logos};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,agentese=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = FabricConfig::from_env();
    let logos = Logos::new(config);
    let kernel = match agentese_nodes::bootstrap(&logos) {
        Ok(kernel) => kernel,
        Err(err) => {
            eprintln!("bootstrap failed: {err}");
            std::process::exit(1);
        }
    };
    info!(
        target: "agentese::gateway",
        nursery = kernel.nursery_handles().len(),
        nodes = logos.registry().handles().len(),
        "fabric bootstrapped"
    );

    let router = app::build_router(logos).layer(CorsLayer::permissive());

    let addr = std::env::var("AGENTESE_ADDR").unwrap_or_else(|_| "127.0.0.1:8787".to_string());
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("cannot bind {addr}: {err}");
            std::process::exit(1);
        }
    };
    info!(target: "agentese::gateway", %addr, "gateway listening");
    if let Err(err) = axum::serve(listener, router).await {
        eprintln!("gateway stopped: {err}");
        std::process::exit(1);
    }
}

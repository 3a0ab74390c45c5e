/**
 * xfchat Server Entry Point
 *
 * Loads configuration, wires the chat core and serves HTTP until Ctrl-C.
 * Background tasks are stopped after the listener has drained so queued
 * read-state writes reach the mirror.
 */

#[cfg(feature = "ssr")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    tracing::info!("[Server] Tracing initialized (RUST_LOG={})", env_filter);

    let config = xfchat::backend::server::load_config()?;
    let port = config.bind_port;

    let (app, tasks) = xfchat::backend::server::create_app(config).await;

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("[Server] Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("[Server] Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("[Server] Shutdown signal received");
        })
        .await?;

    tasks.shutdown().await;

    Ok(())
}

#[cfg(not(feature = "ssr"))]
fn main() {
    eprintln!("Server requires the 'ssr' feature to be enabled.");
    eprintln!("Run with: cargo run --bin xfchat-server --features ssr");
    std::process::exit(1);
}

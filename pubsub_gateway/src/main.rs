#![warn(clippy::all, rust_2018_idioms)]

use std::sync::Arc;

use clap::Parser;
use pubsub_gateway::{error::FatalError, router, Args};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), FatalError> {
    env_logger::init(); // Log to stderr (if you run with `RUST_LOG=info`).

    let args = Args::parse();
    let backend = Arc::new(args.backend().await?);

    let listener = TcpListener::bind(&args.bind).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(backend.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    backend.shutdown().await;
    log::info!("Stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("Could not listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    log::info!("Shutting down");
}

mod client;
mod config;
mod context;
mod coordination;
mod game;
mod id_alloc;
mod invitation;
mod player;
mod registry;
mod session_driver;
mod transport;

use std::sync::Arc;

use clap::Parser;
use config::Args;
use context::ServerContext;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
/// Parses the command line, brings up tracing, binds the listening socket and
/// runs the accept loop until a `SIGHUP` asks for a graceful drain.
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();

    let args = Args::parse();
    let ctx = Arc::new(ServerContext::new(args.max_clients));

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", args.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, port = args.port, "failed to bind listening socket");
            std::process::exit(1);
        }
    };
    tracing::info!(port = args.port, max_clients = args.max_clients, "listening");

    let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
        Ok(sig) => sig,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGHUP handler");
            std::process::exit(1);
        }
    };

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                tracing::debug!(%peer, "accepted connection");
                tokio::spawn(serve_connection(ctx.clone(), stream));
            }
            _ = sighup.recv() => {
                tracing::info!("SIGHUP received, shutting down gracefully");
                ctx.registry.shutdown_all().await;
                ctx.registry.wait_for_empty().await;
                tracing::info!("all sessions drained, exiting");
                std::process::exit(0);
            }
        }
    }
}

/// Registers one accepted connection and, if admitted, drives it to
/// completion. Connections refused by the registry are closed without
/// sending any packet.
async fn serve_connection(ctx: Arc<ServerContext>, stream: tokio::net::TcpStream) {
    let _ = stream.set_nodelay(true);
    let shutdown: Box<dyn transport::ReadShutdown> = Box::new(transport::TcpReadShutdown::new(&stream));
    let (read_half, write_half) = stream.into_split();
    let session = client::ClientSession::new(write_half, shutdown);

    if !ctx.registry.register(session.clone()).await {
        tracing::debug!("registration refused, closing connection");
        return;
    }
    session_driver::run(ctx, session, read_half).await;
}

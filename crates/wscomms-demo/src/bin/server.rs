//! # wscomms-server
//!
//! Demo server: serves one route, broadcasts a greeting to every connected
//! client on an interval and logs what clients send back.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use wscomms::{Receiver, RouteManager, Sender, ServerEndpoint};
use wscomms_demo::{greet, init_logging, load_settings, log_inbound};

/// wscomms demo server.
#[derive(Parser, Debug)]
#[command(name = "wscomms-server", about = "wscomms demo server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Route the greetings travel on.
    #[arg(long, default_value = "/test_route")]
    route: String,

    /// Milliseconds between greetings.
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Settings file (defaults to `~/.wscomms/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Expose Prometheus metrics at `/metrics`.
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let mut settings = load_settings(args.config.as_deref())?;
    init_logging(&settings.logging);

    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    let mut server = ServerEndpoint::with_settings(settings.server);
    if args.metrics {
        let handle =
            wscomms::metrics::install_recorder().context("Failed to install metrics recorder")?;
        server = server.with_metrics(handle);
    }

    let receiver = Receiver::with_queue(&settings.queue);
    let sender = Sender::new("default_sender");
    server
        .add_route_handler(
            &args.route,
            RouteManager::new(receiver.clone(), sender.clone()),
        )
        .context("Failed to register route")?;

    let interval = Duration::from_millis(args.interval_ms.max(1));
    server.add_background_task("greeter", move |ctx| async move {
        let _ = greet(ctx, sender, "Hello from server".to_string(), interval).await;
    });
    server.add_background_task("reader", move |ctx| log_inbound(ctx, receiver));

    server.run().await.context("Server failed")?;
    Ok(())
}

//! # wscomms-client
//!
//! Demo client: connects to a `wscomms-server`, greets it on an interval and
//! logs the server's greetings. Reconnects if the server goes away.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use wscomms::{ClientEndpoint, Receiver, RouteManager, Sender};
use wscomms_demo::{greet, init_logging, load_settings, log_inbound};

/// wscomms demo client.
#[derive(Parser, Debug)]
#[command(name = "wscomms-client", about = "wscomms demo client")]
struct Cli {
    /// Server host (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides settings).
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
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let mut settings = load_settings(args.config.as_deref())?;
    init_logging(&settings.logging);

    if let Some(host) = args.host {
        settings.client.host = host;
    }
    if let Some(port) = args.port {
        settings.client.port = port;
    }

    let mut client = ClientEndpoint::with_settings(settings.client);
    let receiver = Receiver::with_queue(&settings.queue);
    let sender = Sender::new("default_sender");
    client
        .add_route_handler(
            &args.route,
            RouteManager::new(receiver.clone(), sender.clone()),
        )
        .context("Failed to register route")?;

    let interval = Duration::from_millis(args.interval_ms.max(1));
    client.add_background_task("greeter", move |ctx| async move {
        let _ = greet(ctx, sender, "Hello from client".to_string(), interval).await;
    });
    client.add_background_task("reader", move |ctx| log_inbound(ctx, receiver));

    client.run().await.context("Client failed")?;
    Ok(())
}

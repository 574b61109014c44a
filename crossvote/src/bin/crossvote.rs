use std::path::PathBuf;

use alloy::signers::local::PrivateKeySigner;
use anyhow::Result;
use clap::Parser;
use crossvote::{
    cfg::read_config,
    node::{Node, connect_clients},
    notify::{Notifier, ToastEvent, ToastKind},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn parse_signer(s: &str) -> Result<PrivateKeySigner, String> {
    s.parse().map_err(|err| format!("invalid private key: {err}"))
}

#[derive(Parser, Debug)]
struct Args {
    /// Private key of the viewer/signer account, hex encoded.
    #[arg(value_parser = parse_signer)]
    secret_key: PrivateKeySigner,
    #[clap(long, short, default_value = "config.toml")]
    config_file: PathBuf,
    #[clap(long, default_value = "false")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_line_number(true)
        .with_ansi(false);
    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    let config = read_config(&args.config_file)?;
    let viewer = args.secret_key.address();

    let clients = connect_clients(&config, args.secret_key).await?;
    let notifier = Notifier::new(config.toast_ttl);

    let node = Node::start(clients, &config, notifier.clone());
    node.sync().set_viewer(Some(viewer));

    // Surface toasts in the log; a UI would render a tray instead.
    let mut feed = notifier.subscribe();
    let toast_logger = tokio::spawn(async move {
        while let Some(event) = feed.next().await {
            if let ToastEvent::Posted(toast) = event {
                let kind = match toast.kind {
                    ToastKind::Success => "success",
                    ToastKind::Error => "error",
                    ToastKind::Info => "info",
                };
                info!(id = toast.id, kind, title = %toast.title, body = %toast.body, "toast");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    toast_logger.abort();
    node.shutdown().await;

    Ok(())
}

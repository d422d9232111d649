use clap::Parser;
use log::{error, info};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::conf::{Cli, Command, Config};
use crate::server::NodeDns;

mod conf;
mod error;
mod feed;
mod handler;
mod host_table;
mod interface;
mod k8s_api;
mod refresh;
mod resolv_conf;
mod server;
mod upstream;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Some(Command::InitialConfig { out }) = &cli.command {
        let toml = Config::default().to_toml()?;
        match out {
            Some(path) => {
                std::fs::write(path, toml)?;
                info!("Written initial config to {}", path.display());
            }
            None => print!("{toml}"),
        }
        return Ok(());
    }

    let conf = Config::load(&cli)?;
    let dns = NodeDns::new(&conf)?;
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match wait_for_signal().await {
                Ok(()) => shutdown.cancel(),
                Err(e) => error!("installing signal handlers failed: {e}"),
            }
        }
    });

    info!("Starting DNS server on {}", dns.listen_addr());
    dns.run(shutdown).await
}

async fn wait_for_signal() -> std::io::Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = term.recv() => {}
    }
    info!("shutdown signal received");
    Ok(())
}

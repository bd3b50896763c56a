use anyhow::Context;

use lfsr_tunnel::logging::{self, LogLevel};
use lfsr_tunnel::{TunnelAcceptor, TunnelConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(LogLevel::Info);

    let path = std::env::args()
        .nth(1)
        .context("usage: lfsr-tunnel <config.toml>")?;
    let config = TunnelConfig::from_file(&path)
        .with_context(|| format!("loading configuration from {path}"))?;
    tracing::info!(?config, "starting tunnel");

    let acceptor = TunnelAcceptor::bind(config).await?;
    tracing::info!(addr = %acceptor.local_addr()?, "tunnel ready");

    acceptor
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "cannot listen for ctrl-c; shutting down");
            }
        })
        .await?;
    Ok(())
}

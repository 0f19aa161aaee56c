use anyhow::Context;
use ns_cluster::{ClientConfig, RewardClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ClientConfig::from_lookup(|key| std::env::var(key).ok())
        .context("reading worker settings from the environment")?;
    let client = RewardClient::new(config)?;
    let served = client.run().await?;
    tracing::info!(served, "worker finished");
    Ok(())
}

//! VNS Node binary

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vns_node::{VnsConfig, VnsNode};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vns_node=info,vns_registry=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting VNS Node");

    let config = VnsConfig::from_env()?;

    // Create and run node
    let node = VnsNode::new(config)?;
    node.run().await?;

    Ok(())
}

use envconfig::Envconfig;
use oprc_batch::{HealthServer, config::HealthConfig, init_tracing};
use tracing::{error, info};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    let cfg = HealthConfig::init_from_env()?;
    info!(?cfg, "Starting health server");

    let server = HealthServer::start(cfg).await?;
    if let Err(e) = server.wait().await {
        error!(error = %e, "health server terminated");
        return Err(e.into());
    }
    Ok(())
}

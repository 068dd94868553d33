use anyhow::Result;
use clap::Parser;
use santiment_seeds::{UpdateArgs, update};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = UpdateArgs::parse();
    update::execute(&args).await
}

use caching_proxy::config::{AppConfig, Cli};
use clap::Parser;
use std::str::FromStr;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 設定の読み込み
    let app_config = AppConfig::load(&cli)?;

    // ロギングの初期化
    let filter = EnvFilter::from_str(&app_config.log.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting caching proxy...");
    info!("Configuration loaded: {:?}", app_config);

    caching_proxy::run_server(app_config).await?;

    Ok(())
}

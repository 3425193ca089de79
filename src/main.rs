use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use media_static::{
    IngestConfig,
    routes::{self, AppState},
};

const DEFAULT_LOG_FILTER: &str = "media_static=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = IngestConfig::from_env()?;
    tokio::fs::create_dir_all(&config.media_root)
        .await
        .with_context(|| format!("create media root {}", config.media_root.display()))?;
    tokio::fs::create_dir_all(&config.staging_dir)
        .await
        .with_context(|| format!("create staging dir {}", config.staging_dir.display()))?;

    let router = routes::router(AppState::new(&config), &config);
    let bind_address = format!("0.0.0.0:{}", config.port);
    let tcp_listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("bind {bind_address}"))?;

    tracing::info!(
        address = %bind_address,
        media_root = %config.media_root.display(),
        public_base_url = %config.public_base_url,
        max_upload_bytes = config.max_upload_bytes,
        max_concurrent_uploads = config.max_concurrent_uploads,
        "media upload server started"
    );

    axum::serve(tcp_listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;
    Ok(())
}

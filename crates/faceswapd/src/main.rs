use anyhow::{Context, Result};
use faceswap_artifacts::{ArtifactStore, Sweeper};
use faceswap_core::{FaceTransform, OnnxFaceTransform};
use faceswap_tokens::TokenStore;
use faceswapd::{router, spawn_engine, AppState, Config, EngineOptions};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(bind = %config.bind_addr, "faceswapd starting");

    if config.uses_default_admin_key() {
        tracing::warn!("FACESWAP_ADMIN_API_KEY not set; using the built-in default admin key");
    }

    // Load every worker's models up front (fail-fast)
    let paths = config.model_paths();
    let mut transforms: Vec<Box<dyn FaceTransform>> = Vec::with_capacity(config.engine_workers);
    for _ in 0..config.engine_workers {
        let transform = OnnxFaceTransform::load(&paths)
            .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
        transforms.push(Box::new(transform));
    }
    let engine = spawn_engine(
        transforms,
        EngineOptions {
            jpeg_quality: config.jpeg_quality,
            debug_overlay: config.debug_artifacts,
        },
    )?;
    tracing::info!(workers = config.engine_workers, "inference engine ready");

    let tokens = TokenStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening token store {}", config.db_path.display()))?;
    let artifacts = Arc::new(ArtifactStore::open(config.artifact_config()).await?);
    let sweeper = Sweeper::spawn(Arc::clone(&artifacts), config.sweep_interval());

    let state = AppState {
        tokens,
        artifacts,
        engine,
        admin_key: Arc::from(config.admin_key.as_str()),
    };
    let app = router(state, config.max_upload_bytes());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, base_url = %config.base_url, "faceswapd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("faceswapd shutting down");
    sweeper.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for Ctrl-C; shutting down");
    }
}

use faceswap_artifacts::ArtifactConfig;
use faceswap_core::ModelPaths;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Built-in admin key. Anyone who has read the docs knows it.
pub const DEFAULT_ADMIN_KEY: &str = "admin-secret-key";

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// HTTP listen address (default: 0.0.0.0:8000).
    pub bind_addr: String,
    /// Path to the SQLite token database.
    pub db_path: PathBuf,
    /// Credential for the `/token` endpoints.
    #[serde(skip_serializing)]
    pub admin_key: String,
    /// Staging area for uploaded images.
    pub tmp_dir: PathBuf,
    /// Output area for results; debug images go to its `debug/` subdirectory.
    pub output_dir: PathBuf,
    /// Hours a result stays retrievable.
    pub retention_hours: u64,
    /// Seconds between retention sweeps.
    pub sweep_interval_secs: u64,
    /// Public base of the links handed to clients.
    pub base_url: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Number of inference threads. Each loads its own copy of the models.
    pub engine_workers: usize,
    /// Request body limit for uploads, in megabytes.
    pub max_upload_mb: usize,
    /// Whether to publish a face-box overlay of each target into the debug area.
    pub debug_artifacts: bool,
    /// JPEG quality of the composite (1-100).
    pub jpeg_quality: u8,
}

impl Config {
    /// Load configuration from `FACESWAP_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACESWAP_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| faceswap_core::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("faceswap");

        let db_path = std::env::var("FACESWAP_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("tokens.db"));

        Self {
            bind_addr: env_string("FACESWAP_BIND_ADDR", "0.0.0.0:8000"),
            db_path,
            admin_key: env_string("FACESWAP_ADMIN_API_KEY", DEFAULT_ADMIN_KEY),
            tmp_dir: PathBuf::from(env_string("FACESWAP_TMP_DIR", "tmp")),
            output_dir: PathBuf::from(env_string("FACESWAP_OUTPUT_DIR", "output")),
            retention_hours: env_u64("FACESWAP_IMAGE_RETENTION_HOURS", 24),
            sweep_interval_secs: env_u64("FACESWAP_SWEEP_INTERVAL_SECS", 3600).max(1),
            base_url: env_string("FACESWAP_BASE_URL", "http://localhost:8000"),
            model_dir,
            engine_workers: env_usize("FACESWAP_ENGINE_WORKERS", 1).max(1),
            max_upload_mb: env_usize("FACESWAP_MAX_UPLOAD_MB", 20).max(1),
            debug_artifacts: std::env::var("FACESWAP_DEBUG_ARTIFACTS")
                .map(|v| v == "1")
                .unwrap_or(false),
            jpeg_quality: env_u64("FACESWAP_JPEG_QUALITY", 90).clamp(1, 100) as u8,
        }
    }

    pub fn uses_default_admin_key(&self) -> bool {
        self.admin_key == DEFAULT_ADMIN_KEY
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }

    pub fn artifact_config(&self) -> ArtifactConfig {
        ArtifactConfig {
            staging_dir: self.tmp_dir.clone(),
            output_dir: self.output_dir.clone(),
            retention: self.retention(),
            base_url: self.base_url.clone(),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

//! One face swap request, from uploaded bytes to a published link.

use crate::engine::{EngineError, EngineHandle};
use chrono::{DateTime, Utc};
use faceswap_artifacts::{ArtifactError, ArtifactStore, Published};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwapError {
    #[error("No faces detected in one or both images")]
    NoFaceDetected,
    #[error("Failed to load images: {0}")]
    DecodeFailure(String),
    #[error("{0}")]
    Transform(String),
    #[error("{0}")]
    Artifact(#[from] ArtifactError),
    #[error("{0}")]
    Engine(String),
}

impl From<EngineError> for SwapError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NoFaceDetected => SwapError::NoFaceDetected,
            EngineError::DecodeFailure(msg) => SwapError::DecodeFailure(msg),
            EngineError::Transform(e) => SwapError::Transform(e.to_string()),
            other => SwapError::Engine(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SwapOutcome {
    pub image_url: String,
    pub expires_at: DateTime<Utc>,
    /// Debug overlay, when the engine produced one.
    pub debug: Option<Published>,
}

/// Swap the first face of `source` onto every face of `target` and publish the result.
///
/// Every staged file is released before returning, on success and on every
/// error path; if the future is dropped instead, the handles clean up on drop.
pub async fn transform(
    artifacts: &ArtifactStore,
    engine: &EngineHandle,
    source: &[u8],
    target: &[u8],
) -> Result<SwapOutcome, SwapError> {
    let source_handle = artifacts.stage(source).await?;
    let target_handle = match artifacts.stage(target).await {
        Ok(handle) => handle,
        Err(e) => {
            artifacts.release(&source_handle).await;
            return Err(e.into());
        }
    };

    let swapped = engine.swap(source_handle.path(), target_handle.path()).await;
    artifacts.release(&source_handle).await;
    artifacts.release(&target_handle).await;
    let output = swapped?;

    let published = publish_staged(artifacts, &output.composite, "jpg", false).await?;
    let debug = match &output.overlay {
        Some(png) => match publish_staged(artifacts, png, "png", true).await {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!(error = %e, "debug overlay not published");
                None
            }
        },
        None => None,
    };

    let debug_url = debug.as_ref().map(|p| &p.url);
    tracing::info!(
        file = %published.file_name,
        faces = output.faces_swapped,
        expires_at = %published.expires_at,
        debug_url = ?debug_url,
        "face swap complete"
    );

    Ok(SwapOutcome {
        image_url: published.url,
        expires_at: published.expires_at,
        debug,
    })
}

/// Stage `bytes`, copy them into a servable area, release the staged copy.
async fn publish_staged(
    artifacts: &ArtifactStore,
    bytes: &[u8],
    extension: &str,
    debug: bool,
) -> Result<Published, ArtifactError> {
    let staged = artifacts.stage_as(bytes, extension).await?;
    let published = if debug {
        artifacts.publish_debug(staged.path()).await
    } else {
        artifacts.publish(staged.path()).await
    };
    artifacts.release(&staged).await;
    published
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{spawn_engine, EngineOptions};
    use faceswap_artifacts::{Area, ArtifactConfig};
    use faceswap_core::{FaceBox, FaceDescriptor, FaceTransform, TransformError};
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;
    use std::time::Duration;

    struct CenterFace;

    impl FaceTransform for CenterFace {
        fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceDescriptor>, TransformError> {
            if image.width() < 4 {
                return Ok(Vec::new());
            }
            Ok(vec![FaceDescriptor {
                bbox: FaceBox { x: 0.0, y: 0.0, width: 2.0, height: 2.0 },
                score: 1.0,
                landmarks: [(1.0, 1.0); 5],
                embedding: None,
            }])
        }

        fn swap(
            &mut self,
            target: &RgbImage,
            _: &FaceDescriptor,
            _: &FaceDescriptor,
        ) -> Result<RgbImage, TransformError> {
            Ok(target.clone())
        }
    }

    fn png(size: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbImage::new(size, size)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    async fn setup(dir: &tempfile::TempDir, debug_overlay: bool) -> (ArtifactStore, EngineHandle) {
        let store = ArtifactStore::open(ArtifactConfig {
            staging_dir: dir.path().join("tmp"),
            output_dir: dir.path().join("output"),
            retention: Duration::from_secs(3600),
            base_url: "http://svc".into(),
        })
        .await
        .unwrap();
        let engine = spawn_engine(
            vec![Box::new(CenterFace) as Box<dyn FaceTransform>],
            EngineOptions { jpeg_quality: 80, debug_overlay },
        )
        .unwrap();
        (store, engine)
    }

    fn files_in(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().is_file())
            .count()
    }

    #[tokio::test]
    async fn success_publishes_and_cleans_staging() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = setup(&dir, false).await;

        let outcome = transform(&store, &engine, &png(8), &png(8)).await.unwrap();
        assert!(outcome.image_url.starts_with("http://svc/images/"));
        assert!(outcome.image_url.ends_with(".jpg"));
        assert!(outcome.debug.is_none());
        assert_eq!(files_in(store.dir(Area::Staging)), 0);
        assert_eq!(files_in(store.dir(Area::Output)), 1);
    }

    #[tokio::test]
    async fn debug_overlay_is_published() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = setup(&dir, true).await;

        let outcome = transform(&store, &engine, &png(8), &png(8)).await.unwrap();
        let debug = outcome.debug.unwrap();
        assert!(debug.url.starts_with("http://svc/images/debug/"));
        assert_eq!(files_in(store.dir(Area::Debug)), 1);
    }

    #[tokio::test]
    async fn failures_leave_no_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = setup(&dir, false).await;

        let err = transform(&store, &engine, &png(2), &png(8)).await.unwrap_err();
        assert!(matches!(err, SwapError::NoFaceDetected));

        let err = transform(&store, &engine, b"junk", &png(8)).await.unwrap_err();
        assert!(matches!(err, SwapError::DecodeFailure(_)));

        assert_eq!(files_in(store.dir(Area::Staging)), 0);
        assert_eq!(files_in(store.dir(Area::Output)), 0);
    }
}

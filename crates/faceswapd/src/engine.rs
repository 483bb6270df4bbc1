use faceswap_core::{draw_faces, FaceTransform, TransformError};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, ImageReader, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to load images: {0}")]
    DecodeFailure(String),
    #[error("No faces detected in one or both images")]
    NoFaceDetected,
    #[error("{0}")]
    Transform(#[from] TransformError),
    #[error("failed to encode result: {0}")]
    Encode(#[from] image::ImageError),
    #[error("failed to start engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Per-request knobs fixed at startup.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub jpeg_quality: u8,
    /// Also render the target's detected faces as a PNG overlay.
    pub debug_overlay: bool,
}

/// Encoded outputs of one swap.
pub struct SwapOutput {
    /// JPEG composite.
    pub composite: Vec<u8>,
    /// PNG of the target with its detected faces outlined, when enabled.
    pub overlay: Option<Vec<u8>>,
    pub faces_swapped: usize,
}

/// Messages sent from request handlers to the engine threads.
enum EngineRequest {
    Swap {
        source: PathBuf,
        target: PathBuf,
        reply: oneshot::Sender<Result<SwapOutput, EngineError>>,
    },
}

/// Clone-safe handle to the engine threads.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode both files, swap the first source face onto every target face,
    /// and encode the result.
    pub async fn swap(&self, source: &Path, target: &Path) -> Result<SwapOutput, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Swap {
                source: source.to_path_buf(),
                target: target.to_path_buf(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn `transforms.len()` engine threads, one per transform.
///
/// Models are loaded by the caller before this point, so a missing model
/// fails startup instead of the first request. Workers share one bounded
/// queue; a full queue makes callers wait.
pub fn spawn_engine(
    transforms: Vec<Box<dyn FaceTransform>>,
    options: EngineOptions,
) -> Result<EngineHandle, EngineError> {
    let (tx, rx) = mpsc::channel::<EngineRequest>(transforms.len().max(1) * 4);
    let rx = Arc::new(Mutex::new(rx));

    for (index, mut transform) in transforms.into_iter().enumerate() {
        let rx = Arc::clone(&rx);
        std::thread::Builder::new()
            .name(format!("faceswap-engine-{index}"))
            .spawn(move || {
                tracing::info!(worker = index, "engine thread started");
                while let Some(req) = next_request(&rx) {
                    match req {
                        EngineRequest::Swap { source, target, reply } => {
                            let result = run_swap(transform.as_mut(), &source, &target, options);
                            if let Err(e) = &result {
                                tracing::debug!(worker = index, error = %e, "swap failed");
                            }
                            let _ = reply.send(result);
                        }
                    }
                }
                tracing::info!(worker = index, "engine thread exiting");
            })?;
    }

    Ok(EngineHandle { tx })
}

/// Block until a request arrives. `None` once every handle is gone.
fn next_request(rx: &Mutex<mpsc::Receiver<EngineRequest>>) -> Option<EngineRequest> {
    let mut guard = match rx.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.blocking_recv()
}

fn run_swap(
    transform: &mut dyn FaceTransform,
    source: &Path,
    target: &Path,
    options: EngineOptions,
) -> Result<SwapOutput, EngineError> {
    let source_image = decode(source)?;
    let target_image = decode(target)?;

    let source_faces = transform.detect_faces(&source_image)?;
    let target_faces = transform.detect_faces(&target_image)?;
    tracing::debug!(
        source_faces = source_faces.len(),
        target_faces = target_faces.len(),
        "swap: faces detected"
    );

    let Some(source_face) = source_faces.first() else {
        return Err(EngineError::NoFaceDetected);
    };
    if target_faces.is_empty() {
        return Err(EngineError::NoFaceDetected);
    }

    let mut result = target_image.clone();
    for face in &target_faces {
        result = transform.swap(&result, face, source_face)?;
    }

    let mut composite = Vec::new();
    JpegEncoder::new_with_quality(&mut composite, options.jpeg_quality).encode_image(&result)?;

    let overlay = if options.debug_overlay {
        let mut png = Vec::new();
        draw_faces(&target_image, &target_faces).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Some(png)
    } else {
        None
    };

    Ok(SwapOutput {
        composite,
        overlay,
        faces_swapped: target_faces.len(),
    })
}

/// Decode by content, not by file extension.
fn decode(path: &Path) -> Result<RgbImage, EngineError> {
    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| EngineError::DecodeFailure(e.to_string()))?;
    let image = reader
        .decode()
        .map_err(|e| EngineError::DecodeFailure(e.to_string()))?;
    Ok(image.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use faceswap_core::{FaceBox, FaceDescriptor};
    use image::Rgb;

    /// One face per image unless the image is pure black; swapping paints the box white.
    struct BoxFaces;

    impl FaceTransform for BoxFaces {
        fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceDescriptor>, TransformError> {
            if image.pixels().all(|p| p.0 == [0, 0, 0]) {
                return Ok(Vec::new());
            }
            Ok(vec![FaceDescriptor {
                bbox: FaceBox { x: 1.0, y: 1.0, width: 2.0, height: 2.0 },
                score: 0.9,
                landmarks: [(2.0, 2.0); 5],
                embedding: None,
            }])
        }

        fn swap(
            &mut self,
            target: &RgbImage,
            face: &FaceDescriptor,
            _source: &FaceDescriptor,
        ) -> Result<RgbImage, TransformError> {
            let mut out = target.clone();
            let b = face.bbox;
            for y in b.y as u32..(b.y + b.height) as u32 {
                for x in b.x as u32..(b.x + b.width) as u32 {
                    out.put_pixel(x, y, Rgb([255, 255, 255]));
                }
            }
            Ok(out)
        }
    }

    fn write_png(dir: &Path, name: &str, color: [u8; 3]) -> PathBuf {
        let path = dir.join(name);
        // No extension on purpose: format comes from the content.
        let mut bytes = Vec::new();
        RgbImage::from_pixel(8, 8, Rgb(color))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn options(debug_overlay: bool) -> EngineOptions {
        EngineOptions { jpeg_quality: 90, debug_overlay }
    }

    #[test]
    fn swap_produces_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_png(dir.path(), "source.bin", [200, 10, 10]);
        let target = write_png(dir.path(), "target.bin", [10, 10, 200]);

        let out = run_swap(&mut BoxFaces, &source, &target, options(false)).unwrap();
        assert_eq!(out.faces_swapped, 1);
        assert!(out.overlay.is_none());
        let decoded = image::load_from_memory(&out.composite).unwrap();
        assert_eq!(image::guess_format(&out.composite).unwrap(), ImageFormat::Jpeg);
        assert_eq!(decoded.width(), 8);
    }

    #[test]
    fn overlay_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_png(dir.path(), "s", [200, 10, 10]);
        let target = write_png(dir.path(), "t", [10, 10, 200]);

        let out = run_swap(&mut BoxFaces, &source, &target, options(true)).unwrap();
        let overlay = out.overlay.unwrap();
        assert_eq!(image::guess_format(&overlay).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn no_face_in_either_image() {
        let dir = tempfile::tempdir().unwrap();
        let face = write_png(dir.path(), "face", [200, 10, 10]);
        let blank = write_png(dir.path(), "blank", [0, 0, 0]);

        assert!(matches!(
            run_swap(&mut BoxFaces, &blank, &face, options(false)),
            Err(EngineError::NoFaceDetected)
        ));
        assert!(matches!(
            run_swap(&mut BoxFaces, &face, &blank, options(false)),
            Err(EngineError::NoFaceDetected)
        ));
    }

    #[test]
    fn garbage_is_a_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let face = write_png(dir.path(), "face", [200, 10, 10]);
        let junk = dir.path().join("junk");
        std::fs::write(&junk, b"definitely not an image").unwrap();

        let err = run_swap(&mut BoxFaces, &junk, &face, options(false)).err().unwrap();
        assert!(matches!(err, EngineError::DecodeFailure(_)));
    }

    #[tokio::test]
    async fn handle_round_trip_through_threads() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_png(dir.path(), "s", [200, 10, 10]);
        let target = write_png(dir.path(), "t", [10, 10, 200]);

        let transforms: Vec<Box<dyn FaceTransform>> = vec![Box::new(BoxFaces), Box::new(BoxFaces)];
        let engine = spawn_engine(transforms, options(false)).unwrap();

        let (a, b) = tokio::join!(engine.swap(&source, &target), engine.swap(&source, &target));
        assert_eq!(a.unwrap().faces_swapped, 1);
        assert_eq!(b.unwrap().faces_swapped, 1);
    }
}

//! faceswap-artifacts — lifecycle of the image files a request produces.
//!
//! Inbound images are written to a staging area and released when the
//! request ends. Results are copied into an output area and served by file
//! name until a periodic sweep deletes everything older than the retention
//! window. Safety under concurrency rests on unique file names, not locks.

pub mod store;
pub mod sweeper;

pub use store::{
    ArtifactConfig, ArtifactId, ArtifactStore, Area, Published, StagingHandle, SweepReport,
};
pub use sweeper::{Sweeper, SweeperHandle};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArtifactError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

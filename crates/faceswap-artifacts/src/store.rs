use crate::ArtifactError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Attempts at finding an unused file name before giving up.
const MAX_NAME_ATTEMPTS: usize = 8;
const DEBUG_SUBDIR: &str = "debug";

/// Storage areas under management.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    /// Short-lived request inputs. Never servable.
    Staging,
    /// Results handed out to clients.
    Output,
    /// Diagnostic images, served under a separate route.
    Debug,
}

impl Area {
    pub fn as_str(&self) -> &'static str {
        match self {
            Area::Staging => "staging",
            Area::Output => "output",
            Area::Debug => "debug",
        }
    }
}

/// Unique artifact identifier; the file stem of every managed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactConfig {
    pub staging_dir: PathBuf,
    /// Output area; the debug area lives in its `debug/` subdirectory.
    pub output_dir: PathBuf,
    pub retention: Duration,
    /// Public address retrieval URLs are built from, e.g. `http://localhost:8000`.
    pub base_url: String,
}

/// A staged input file, owned by the request that created it.
///
/// Release it with [`ArtifactStore::release`]. A handle dropped without
/// being released (a cancelled request) removes its file synchronously.
#[derive(Debug)]
pub struct StagingHandle {
    id: ArtifactId,
    path: PathBuf,
    released: AtomicBool,
}

impl StagingHandle {
    pub fn id(&self) -> ArtifactId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingHandle {
    fn drop(&mut self) {
        if self.released.load(Ordering::Acquire) {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(id = %self.id, "unreleased staging file removed on drop"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(id = %self.id, error = %e, "failed to remove staging file on drop"),
        }
    }
}

/// A result copied into a servable area.
#[derive(Debug, Clone)]
pub struct Published {
    pub id: ArtifactId,
    pub file_name: String,
    pub url: String,
    pub path: PathBuf,
    pub expires_at: DateTime<Utc>,
}

/// Files deleted by one sweep, per area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub staging_deleted: usize,
    pub output_deleted: usize,
    pub debug_deleted: usize,
    /// Files that were due but could not be inspected or removed.
    pub failures: usize,
}

impl SweepReport {
    pub fn total_deleted(&self) -> usize {
        self.staging_deleted + self.output_deleted + self.debug_deleted
    }
}

/// Owner of the staging, output and debug directories.
#[derive(Debug)]
pub struct ArtifactStore {
    staging_dir: PathBuf,
    output_dir: PathBuf,
    debug_dir: PathBuf,
    retention: Duration,
    base_url: String,
}

impl ArtifactStore {
    /// Create the storage directories if needed.
    pub async fn open(config: ArtifactConfig) -> Result<Self, ArtifactError> {
        let debug_dir = config.output_dir.join(DEBUG_SUBDIR);
        for dir in [&config.staging_dir, &config.output_dir, &debug_dir] {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| ArtifactError::io("create", dir, e))?;
        }

        tracing::info!(
            staging = %config.staging_dir.display(),
            output = %config.output_dir.display(),
            retention_secs = config.retention.as_secs(),
            "artifact store ready"
        );

        Ok(Self {
            staging_dir: config.staging_dir,
            output_dir: config.output_dir,
            debug_dir,
            retention: config.retention,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn dir(&self, area: Area) -> &Path {
        match area {
            Area::Staging => &self.staging_dir,
            Area::Output => &self.output_dir,
            Area::Debug => &self.debug_dir,
        }
    }

    /// Write `bytes` verbatim to a fresh staging file.
    pub async fn stage(&self, bytes: &[u8]) -> Result<StagingHandle, ArtifactError> {
        self.stage_as(bytes, "bin").await
    }

    /// Like [`stage`](Self::stage), with a chosen file extension.
    pub async fn stage_as(&self, bytes: &[u8], extension: &str) -> Result<StagingHandle, ArtifactError> {
        let (id, path, mut file) = self.create_unique(Area::Staging, extension).await?;
        let written = async {
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await;

        // From here on the handle owns the file, so a failed write cleans up on drop.
        let handle = StagingHandle {
            id,
            path,
            released: AtomicBool::new(false),
        };
        written.map_err(|e| ArtifactError::io("write", &handle.path, e))?;

        tracing::debug!(id = %id, bytes = bytes.len(), "staged");
        Ok(handle)
    }

    /// Delete a staging file. Idempotent and infallible.
    ///
    /// Returns `true` if this call removed the file, `false` if it was
    /// already gone (released earlier, or swept).
    pub async fn release(&self, handle: &StagingHandle) -> bool {
        let removed = match fs::remove_file(&handle.path).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                tracing::warn!(id = %handle.id, error = %e, "failed to release staging file");
                return false;
            }
        };
        handle.released.store(true, Ordering::Release);
        removed
    }

    /// Copy `source` into the output area under a new id.
    ///
    /// The source file is left untouched. The artifact expires one retention
    /// window from now.
    pub async fn publish(&self, source: &Path) -> Result<Published, ArtifactError> {
        self.publish_into(source, Area::Output).await
    }

    /// Copy `source` into the debug area under a new id.
    pub async fn publish_debug(&self, source: &Path) -> Result<Published, ArtifactError> {
        self.publish_into(source, Area::Debug).await
    }

    async fn publish_into(&self, source: &Path, area: Area) -> Result<Published, ArtifactError> {
        let extension = source
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("bin");

        let mut input = fs::File::open(source)
            .await
            .map_err(|e| ArtifactError::io("open", source, e))?;
        let (id, path, mut output) = self.create_unique(area, extension).await?;

        let copied = async {
            tokio::io::copy(&mut input, &mut output).await?;
            output.flush().await
        }
        .await;
        if let Err(e) = copied {
            let _ = fs::remove_file(&path).await;
            return Err(ArtifactError::io("copy", &path, e));
        }

        let file_name = file_name_of(&path);
        let url = match area {
            Area::Debug => format!("{}/images/debug/{}", self.base_url, file_name),
            _ => format!("{}/images/{}", self.base_url, file_name),
        };
        let expires_at = expiry_after(Utc::now(), self.retention);

        tracing::info!(id = %id, area = area.as_str(), %expires_at, "published");
        Ok(Published {
            id,
            file_name,
            url,
            path,
            expires_at,
        })
    }

    /// Resolve a servable file name to its path.
    ///
    /// Only bare file names in the output or debug area resolve; staging is
    /// never addressable. Expiry is not checked here: a file stays servable
    /// until the sweep removes it.
    pub async fn retrieve(&self, name: &str, area: Area) -> Result<PathBuf, ArtifactError> {
        if area == Area::Staging || !is_plain_file_name(name) {
            return Err(ArtifactError::NotFound(name.to_string()));
        }

        let path = self.dir(area).join(name);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(ArtifactError::NotFound(name.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ArtifactError::NotFound(name.to_string())),
            Err(e) => Err(ArtifactError::io("stat", &path, e)),
        }
    }

    /// Delete every file older than the retention window, in all areas.
    pub async fn sweep(&self) -> Result<SweepReport, ArtifactError> {
        self.sweep_at(SystemTime::now()).await
    }

    /// [`sweep`](Self::sweep) with an explicit notion of "now".
    ///
    /// A file is deleted when `now - mtime` is strictly greater than the
    /// retention window. Files that vanish mid-sweep are skipped; per-file
    /// failures are counted, never fatal. Only failing to list a directory
    /// aborts the sweep.
    pub async fn sweep_at(&self, now: SystemTime) -> Result<SweepReport, ArtifactError> {
        let mut report = SweepReport::default();
        for area in [Area::Staging, Area::Output, Area::Debug] {
            let (deleted, failures) = self.sweep_dir(area, now).await?;
            report.failures += failures;
            match area {
                Area::Staging => report.staging_deleted = deleted,
                Area::Output => report.output_deleted = deleted,
                Area::Debug => report.debug_deleted = deleted,
            }
        }
        Ok(report)
    }

    async fn sweep_dir(&self, area: Area, now: SystemTime) -> Result<(usize, usize), ArtifactError> {
        let dir = self.dir(area);
        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| ArtifactError::io("list", dir, e))?;

        let mut deleted = 0;
        let mut failures = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(ArtifactError::io("list", dir, e)),
            };
            let path = entry.path();

            let modified = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta.modified(),
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => Err(e),
            };
            let modified = match modified {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "sweep: cannot read mtime");
                    failures += 1;
                    continue;
                }
            };

            // mtime in the future counts as brand new
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= self.retention {
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "sweep: delete failed");
                    failures += 1;
                }
            }
        }

        tracing::debug!(area = area.as_str(), deleted, failures, "sweep: area done");
        Ok((deleted, failures))
    }

    /// Create a new, empty file with a never-used name in `area`.
    async fn create_unique(
        &self,
        area: Area,
        extension: &str,
    ) -> Result<(ArtifactId, PathBuf, fs::File), ArtifactError> {
        let dir = self.dir(area);
        let mut last_err = None;
        for _ in 0..MAX_NAME_ATTEMPTS {
            let id = ArtifactId::generate();
            let path = dir.join(format!("{id}.{extension}"));
            match fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => return Ok((id, path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => last_err = Some(e),
                Err(e) => return Err(ArtifactError::io("create", &path, e)),
            }
        }
        Err(ArtifactError::io(
            "create",
            dir,
            last_err.unwrap_or_else(|| ErrorKind::AlreadyExists.into()),
        ))
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// A name that cannot escape its directory.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

fn expiry_after(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(retention)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

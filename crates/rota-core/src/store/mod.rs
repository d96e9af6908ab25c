//! Snapshot store over a shared folder.
//!
//! Snapshots are immutable whole-database files. A save never overwrites:
//! it writes a fresh collision-free filename, so concurrent writers can
//! only ever add versions. Each file is two lines of JSON: the metadata
//! block, then the row payload, so listings can read metadata without
//! parsing rows.

mod filename;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncBufReadExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{FileVersionInfo, RowSet, Snapshot, SnapshotMeta, SNAPSHOT_FORMAT};

/// Store for the shared folder holding every saved snapshot
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Store over the given shared folder.
    ///
    /// The folder does not need to exist yet; the first write creates it.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The shared folder this store reads and writes
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a new snapshot of `rows` and return its version info.
    ///
    /// The payload goes to a scratch name first and is renamed into place,
    /// so other sessions never see a half-written snapshot.
    pub async fn write(
        &self,
        rows: &RowSet,
        saved_by: &str,
        session_started_at: i64,
    ) -> Result<FileVersionInfo> {
        let saved_at = crate::util::unix_timestamp_ms();
        let meta = SnapshotMeta::new(saved_at, saved_by, session_started_at);
        let mut payload = serde_json::to_string(&meta)?;
        payload.push('\n');
        payload.push_str(&serde_json::to_string(rows)?);
        payload.push('\n');

        fs::create_dir_all(&self.dir).await?;
        let name = filename::snapshot_filename(saved_at);
        let temp_path = self.dir.join(filename::temp_filename());
        fs::write(&temp_path, payload.as_bytes()).await?;
        if let Err(error) = fs::rename(&temp_path, self.dir.join(&name)).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(error.into());
        }

        let size_bytes = fs::metadata(self.dir.join(&name)).await?.len();
        debug!(filename = %name, size_bytes, "snapshot written");
        Ok(FileVersionInfo {
            filename: name,
            saved_at,
            saved_by: saved_by.to_string(),
            session_started_at,
            size_bytes,
        })
    }

    /// List every readable snapshot, newest first.
    ///
    /// Files that do not follow the snapshot naming convention are ignored;
    /// files that do but cannot be parsed are skipped with a warning, never
    /// an error, so one corrupt file cannot hide the rest of the history.
    pub async fn list_versions(&self) -> Result<Vec<FileVersionInfo>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !filename::is_snapshot_filename(&name) {
                continue;
            }
            match self.read_meta(&name).await {
                Ok(meta) => {
                    let size_bytes = entry.metadata().await.map_or(0, |metadata| metadata.len());
                    versions.push(FileVersionInfo {
                        filename: name,
                        saved_at: meta.saved_at,
                        saved_by: meta.saved_by,
                        session_started_at: meta.session_started_at,
                        size_bytes,
                    });
                }
                Err(error) => warn!(filename = %name, %error, "skipping unreadable snapshot"),
            }
        }

        versions.sort_by(|a, b| {
            (b.saved_at, b.filename.as_str()).cmp(&(a.saved_at, a.filename.as_str()))
        });
        Ok(versions)
    }

    /// The newest readable snapshot, if the folder has any
    pub async fn latest(&self) -> Result<Option<FileVersionInfo>> {
        Ok(self.list_versions().await?.into_iter().next())
    }

    /// Read only the metadata block of a snapshot (first line of the file)
    pub async fn read_meta(&self, name: &str) -> Result<SnapshotMeta> {
        let file = match fs::File::open(self.dir.join(name)).await {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(Error::SnapshotNotFound(name.to_string()))
            }
            Err(error) => return Err(error.into()),
        };
        let mut reader = tokio::io::BufReader::new(file);
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        let meta: SnapshotMeta =
            serde_json::from_str(line.trim_end()).map_err(|error| Error::parse(name, error))?;
        if meta.format != SNAPSHOT_FORMAT {
            return Err(Error::parse(
                name,
                format!("unsupported snapshot format {}", meta.format),
            ));
        }
        Ok(meta)
    }

    /// Version info for one snapshot file by name
    pub async fn version_info(&self, name: &str) -> Result<FileVersionInfo> {
        let meta = self.read_meta(name).await?;
        let size_bytes = fs::metadata(self.dir.join(name)).await?.len();
        Ok(FileVersionInfo {
            filename: name.to_string(),
            saved_at: meta.saved_at,
            saved_by: meta.saved_by,
            session_started_at: meta.session_started_at,
            size_bytes,
        })
    }

    /// Read a full snapshot, metadata and rows
    pub async fn read(&self, name: &str) -> Result<Snapshot> {
        let content = match fs::read_to_string(self.dir.join(name)).await {
            Ok(content) => content,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(Error::SnapshotNotFound(name.to_string()))
            }
            Err(error) => return Err(error.into()),
        };
        let (meta_line, body) = content
            .split_once('\n')
            .ok_or_else(|| Error::parse(name, "missing row payload"))?;
        let meta: SnapshotMeta =
            serde_json::from_str(meta_line).map_err(|error| Error::parse(name, error))?;
        if meta.format != SNAPSHOT_FORMAT {
            return Err(Error::parse(
                name,
                format!("unsupported snapshot format {}", meta.format),
            ));
        }
        let rows: RowSet =
            serde_json::from_str(body.trim_end()).map_err(|error| Error::parse(name, error))?;
        Ok(Snapshot { meta, rows })
    }
}

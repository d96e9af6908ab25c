//! Editing session over a shared snapshot folder.
//!
//! A session owns one working copy of the whole database plus a base
//! pointer: the snapshot every comparison runs against. Saving and
//! polling both re-list the folder, merge forward edits automatically,
//! and park a pending merge whenever two copies diverged from the base
//! in incompatible ways. The shared folder has no locks; safety comes
//! from collision-free filenames plus detection before every write.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::merge::{
    apply_resolutions, detect_conflicts, Candidate, ResolutionSet, ResolvedConflicts,
};
use crate::models::{
    ConflictKey, FileVersionInfo, MergeConflict, Resolution, Row, RowSet, SyncId, Value,
};
use crate::registry::TableRegistry;
use crate::store::SnapshotStore;
use crate::util;

/// Result of a remote check against the shared folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// No snapshot newer than the current base exists
    UpToDate,
    /// Newer snapshots merged cleanly; the base pointer advanced without
    /// writing anything
    FastForwarded {
        /// The snapshot that became the new base
        new_base: FileVersionInfo,
    },
    /// Divergent changes were parked as a pending merge awaiting
    /// resolution; the working copy is untouched
    ConflictsFound {
        /// Number of rows needing a decision
        count: usize,
    },
}

/// Result of a save attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The merged working copy was persisted as a new snapshot
    Saved(FileVersionInfo),
    /// The pre-write check found divergent changes; nothing was written
    /// and a pending merge was parked
    ConflictsDetected(usize),
}

/// The snapshot all comparisons currently run against
#[derive(Debug, Clone)]
struct BaseVersion {
    info: FileVersionInfo,
    rows: RowSet,
}

/// A detected merge waiting for the user's resolutions.
///
/// Candidates are captured at detection time, so the decisions the user
/// makes apply to exactly the copies they were shown.
#[derive(Debug)]
struct PendingMerge {
    /// Newest snapshot visible when detection ran; if the folder has
    /// moved past it by apply time, the pending merge is stale
    latest_seen: FileVersionInfo,
    candidates: Vec<Candidate>,
    resolutions: ResolutionSet,
}

#[derive(Debug)]
pub(crate) struct SessionState {
    base: Option<BaseVersion>,
    working: RowSet,
    pending: Option<PendingMerge>,
}

/// Snapshot listing plus the readable bodies newer than the base
struct RemoteState {
    versions: Vec<FileVersionInfo>,
    newer: Vec<(FileVersionInfo, RowSet)>,
}

/// One actor's editing session, shareable across tasks
#[derive(Clone)]
pub struct SyncSession {
    state: Arc<Mutex<SessionState>>,
    store: SnapshotStore,
    registry: TableRegistry,
    config: SessionConfig,
    session_started_at: i64,
}

impl SyncSession {
    /// Open a session over the shared folder, loading the newest readable
    /// snapshot as the initial base and working copy.
    ///
    /// An empty or missing folder opens an empty session; the first save
    /// creates both. Fails if the configured actor is blank.
    pub async fn open(
        store: SnapshotStore,
        registry: TableRegistry,
        mut config: SessionConfig,
    ) -> Result<Self> {
        config.actor = util::normalize_actor(&config.actor)
            .ok_or_else(|| Error::InvalidInput("actor must not be empty".to_string()))?;
        let session_started_at = util::unix_timestamp_ms();

        let mut base = None;
        for version in store.list_versions().await? {
            match store.read(&version.filename).await {
                Ok(snapshot) => {
                    base = Some(BaseVersion {
                        info: version,
                        rows: snapshot.rows,
                    });
                    break;
                }
                Err(error) => {
                    warn!(filename = %version.filename, %error, "skipping unreadable snapshot");
                }
            }
        }
        match &base {
            Some(version) => info!(
                actor = %config.actor,
                base = %version.info.filename,
                "session opened at the latest snapshot"
            ),
            None => info!(actor = %config.actor, "session opened over an empty folder"),
        }

        let working = base.as_ref().map_or_else(RowSet::default, |base| base.rows.clone());
        Ok(Self {
            state: Arc::new(Mutex::new(SessionState {
                base,
                working,
                pending: None,
            })),
            store,
            registry,
            config,
            session_started_at,
        })
    }

    /// Actor label stamped on this session's modifications
    #[must_use]
    pub fn actor(&self) -> &str {
        &self.config.actor
    }

    /// The session configuration
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The snapshot store this session reads and writes
    #[must_use]
    pub const fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// When this session began (Unix ms)
    #[must_use]
    pub const fn session_started_at(&self) -> i64 {
        self.session_started_at
    }

    /// A copy of the current working row set
    pub async fn working_rows(&self) -> RowSet {
        self.state.lock().await.working.clone()
    }

    /// The snapshot the session currently compares against, if any
    pub async fn base_version(&self) -> Option<FileVersionInfo> {
        self.state.lock().await.base.as_ref().map(|base| base.info.clone())
    }

    /// Whether a detected merge is waiting for resolutions
    pub async fn has_pending(&self) -> bool {
        self.state.lock().await.pending.is_some()
    }

    /// The conflicts of the pending merge, empty when there is none
    pub async fn pending_conflicts(&self) -> Vec<MergeConflict> {
        self.state
            .lock()
            .await
            .pending
            .as_ref()
            .map_or_else(Vec::new, |pending| pending.resolutions.conflicts().to_vec())
    }

    /// How many pending conflicts still lack a resolution
    pub async fn pending_unresolved(&self) -> usize {
        self.state
            .lock()
            .await
            .pending
            .as_ref()
            .map_or(0, |pending| pending.resolutions.unresolved_count())
    }

    /// Insert a new row into the working copy and return its identity
    pub async fn insert_row(&self, table: &str, fields: BTreeMap<String, Value>) -> SyncId {
        let mut state = self.state.lock().await;
        let row = Row::new(fields, self.config.actor.clone(), util::unix_timestamp_ms());
        let id = row.id;
        state.working.upsert(table, row);
        id
    }

    /// Replace a row's domain fields, stamping this session's provenance
    pub async fn update_row(
        &self,
        table: &str,
        id: SyncId,
        fields: BTreeMap<String, Value>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let row = state
            .working
            .get_mut(table, id)
            .ok_or_else(|| Error::RowNotFound(format!("{table}:{id}")))?;
        row.set_fields(fields);
        row.touch(self.config.actor.clone(), util::unix_timestamp_ms());
        Ok(())
    }

    /// Soft-delete a row; the tombstone stays visible to future merges
    pub async fn delete_row(&self, table: &str, id: SyncId) -> Result<()> {
        let mut state = self.state.lock().await;
        let row = state
            .working
            .get_mut(table, id)
            .ok_or_else(|| Error::RowNotFound(format!("{table}:{id}")))?;
        row.mark_deleted(self.config.actor.clone(), util::unix_timestamp_ms());
        Ok(())
    }

    /// Look for snapshots newer than the base and merge them.
    ///
    /// Clean merges fast-forward the working copy and base pointer in
    /// memory without writing; divergent changes are parked as a pending
    /// merge instead and the working copy stays untouched. While a
    /// pending merge exists this reports it and does not re-detect.
    pub async fn check_remote(&self) -> Result<SyncStatus> {
        let mut state = self.state.lock().await;
        if let Some(pending) = &state.pending {
            return Ok(SyncStatus::ConflictsFound {
                count: pending.resolutions.len(),
            });
        }
        self.check_locked(&mut state).await
    }

    /// Non-blocking variant of [`check_remote`](Self::check_remote) for
    /// the background poller: returns `None` when the session is busy
    /// with another operation, so overlapping ticks are dropped.
    pub async fn try_check_remote(&self) -> Result<Option<SyncStatus>> {
        let Ok(mut state) = self.state.try_lock() else {
            return Ok(None);
        };
        if let Some(pending) = &state.pending {
            return Ok(Some(SyncStatus::ConflictsFound {
                count: pending.resolutions.len(),
            }));
        }
        self.check_locked(&mut state).await.map(Some)
    }

    /// Persist the working copy as a new snapshot.
    ///
    /// The folder is re-listed and conflict detection re-runs immediately
    /// before the write, so a save never silently overwrites a snapshot
    /// another actor landed after the last poll. On conflicts nothing is
    /// written and the merge is parked. On a write error the working copy
    /// keeps the merged rows but the base pointer does not move, so the
    /// next save retries against the same base.
    pub async fn save(&self) -> Result<SaveOutcome> {
        let mut state = self.state.lock().await;
        self.save_locked(&mut state).await
    }

    /// Record one resolution for a pending conflict
    pub async fn resolve(&self, key: &ConflictKey, resolution: Resolution) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(pending) = state.pending.as_mut() else {
            return Err(Error::InvalidInput("no pending merge".to_string()));
        };
        pending.resolutions.resolve(key, resolution)
    }

    /// Resolve every pending conflict back to the base version
    pub async fn keep_all_base(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(pending) = state.pending.as_mut() else {
            return Err(Error::InvalidInput("no pending merge".to_string()));
        };
        pending.resolutions.keep_all_base();
        Ok(())
    }

    /// Resolve every pending conflict to `actor`'s version where that
    /// actor is a modifier, and to base elsewhere
    pub async fn keep_all_from(&self, actor: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(pending) = state.pending.as_mut() else {
            return Err(Error::InvalidInput("no pending merge".to_string()));
        };
        pending.resolutions.keep_all_from(actor);
        Ok(())
    }

    /// Apply the fully resolved pending merge and persist the result.
    ///
    /// Fails with [`Error::IncompleteResolution`] while any conflict lacks
    /// a choice, leaving the pending merge intact. Fails with
    /// [`Error::StaleBase`] if the folder moved past the snapshot the
    /// conflicts were detected against; the stale merge is discarded and
    /// detection re-runs so the caller can collect fresh resolutions.
    pub async fn apply_pending(&self) -> Result<FileVersionInfo> {
        let mut state = self.state.lock().await;
        let Some(pending) = state.pending.take() else {
            return Err(Error::InvalidInput("no pending merge to apply".to_string()));
        };

        let versions = match self.store.list_versions().await {
            Ok(versions) => versions,
            Err(error) => {
                state.pending = Some(pending);
                return Err(error);
            }
        };
        let latest = versions.first();
        if latest.map(|info| info.filename.as_str())
            != Some(pending.latest_seen.filename.as_str())
        {
            let expected = pending.latest_seen.filename.clone();
            let found = latest.map_or_else(|| "none".to_string(), |info| info.filename.clone());
            warn!(%expected, %found, "folder changed during resolution, re-detecting");
            if let Err(error) = self.check_locked(&mut state).await {
                warn!(%error, "re-detection after a stale merge failed");
            }
            return Err(Error::StaleBase { expected, found });
        }

        let resolved = match pending.resolutions.clone().into_resolved() {
            Ok(resolved) => resolved,
            Err(error) => {
                state.pending = Some(pending);
                return Err(error);
            }
        };

        let now = util::unix_timestamp_ms();
        let empty = RowSet::new();
        let base_rows = state.base.as_ref().map_or(&empty, |base| &base.rows);
        let mut merged =
            apply_resolutions(base_rows, &pending.candidates, &resolved, &self.config.actor, now);
        let pruned = merged.prune_tombstones(self.prune_cutoff(&versions, now));
        if pruned > 0 {
            debug!(pruned, "compacted aged tombstones");
        }

        state.working = merged.clone();
        let info = match self
            .store
            .write(&merged, &self.config.actor, self.session_started_at)
            .await
        {
            Ok(info) => info,
            Err(error) => {
                state.pending = Some(pending);
                return Err(error);
            }
        };
        state.base = Some(BaseVersion {
            info: info.clone(),
            rows: merged,
        });
        info!(filename = %info.filename, resolved = resolved.len(), "merge applied and saved");
        Ok(info)
    }

    /// Discard the pending merge without touching the working copy.
    ///
    /// Returns whether there was one to discard.
    pub async fn cancel_pending(&self) -> bool {
        let mut state = self.state.lock().await;
        let had = state.pending.take().is_some();
        if had {
            debug!("pending merge discarded");
        }
        had
    }

    /// Replace the working copy with a historical snapshot and reset the
    /// base pointer to it.
    ///
    /// Destructive: unsaved local edits and any pending merge are gone.
    /// Callers confirm with the user before invoking; the session itself
    /// performs the replacement unconditionally.
    pub async fn restore(&self, filename: &str) -> Result<FileVersionInfo> {
        let mut state = self.state.lock().await;
        let snapshot = self.store.read(filename).await?;
        let info = self.store.version_info(filename).await?;
        state.working = snapshot.rows.clone();
        state.base = Some(BaseVersion {
            info: info.clone(),
            rows: snapshot.rows,
        });
        state.pending = None;
        info!(%filename, "restored historical snapshot");
        Ok(info)
    }

    /// Fresh detection against the folder; assumes no pending merge.
    async fn check_locked(&self, state: &mut SessionState) -> Result<SyncStatus> {
        let remote = self.fetch_remote(state.base.as_ref()).await?;
        let mut newer = remote.newer;
        if newer.is_empty() {
            return Ok(SyncStatus::UpToDate);
        }

        let candidates = self.build_candidates(&state.working, &newer);
        let empty = RowSet::new();
        let base_rows = state.base.as_ref().map_or(&empty, |base| &base.rows);
        let conflicts = detect_conflicts(base_rows, &candidates, &self.registry);

        if conflicts.is_empty() {
            let merged = apply_resolutions(
                base_rows,
                &candidates,
                &ResolvedConflicts::default(),
                &self.config.actor,
                util::unix_timestamp_ms(),
            );
            let (info, rows) = newer.swap_remove(0);
            state.working = merged;
            state.base = Some(BaseVersion {
                info: info.clone(),
                rows,
            });
            info!(filename = %info.filename, "fast-forwarded to the latest snapshot");
            return Ok(SyncStatus::FastForwarded { new_base: info });
        }

        let count = conflicts.len();
        state.pending = Some(PendingMerge {
            latest_seen: remote.versions[0].clone(),
            candidates,
            resolutions: ResolutionSet::new(conflicts),
        });
        info!(count, "divergent snapshots need resolution");
        Ok(SyncStatus::ConflictsFound { count })
    }

    /// Merge-and-write path shared by [`save`](Self::save).
    async fn save_locked(&self, state: &mut SessionState) -> Result<SaveOutcome> {
        if state.pending.is_some() {
            return Err(Error::InvalidInput(
                "a pending merge must be applied or cancelled before saving".to_string(),
            ));
        }

        let remote = self.fetch_remote(state.base.as_ref()).await?;
        let now = util::unix_timestamp_ms();
        let empty = RowSet::new();
        let base_rows = state.base.as_ref().map_or(&empty, |base| &base.rows);

        let mut merged = if remote.newer.is_empty() {
            state.working.clone()
        } else {
            let candidates = self.build_candidates(&state.working, &remote.newer);
            let conflicts = detect_conflicts(base_rows, &candidates, &self.registry);
            if !conflicts.is_empty() {
                let count = conflicts.len();
                state.pending = Some(PendingMerge {
                    latest_seen: remote.versions[0].clone(),
                    candidates,
                    resolutions: ResolutionSet::new(conflicts),
                });
                warn!(count, "save blocked by merge conflicts");
                return Ok(SaveOutcome::ConflictsDetected(count));
            }
            apply_resolutions(
                base_rows,
                &candidates,
                &ResolvedConflicts::default(),
                &self.config.actor,
                now,
            )
        };

        let pruned = merged.prune_tombstones(self.prune_cutoff(&remote.versions, now));
        if pruned > 0 {
            debug!(pruned, "compacted aged tombstones");
        }

        // The working copy keeps the merged rows even if the write below
        // fails; only the base pointer is tied to a successful write.
        state.working = merged.clone();
        let info = self
            .store
            .write(&merged, &self.config.actor, self.session_started_at)
            .await?;
        state.base = Some(BaseVersion {
            info: info.clone(),
            rows: merged,
        });
        info!(filename = %info.filename, "snapshot saved");
        Ok(SaveOutcome::Saved(info))
    }

    /// List the folder and read every snapshot newer than the base.
    ///
    /// Unreadable files are skipped with a warning; they stay out of the
    /// comparison rather than failing it.
    async fn fetch_remote(&self, base: Option<&BaseVersion>) -> Result<RemoteState> {
        let versions = self.store.list_versions().await?;
        let mut newer = Vec::new();
        for version in &versions {
            let past_base = base.is_none_or(|base| version.is_newer_than(&base.info));
            if !past_base {
                continue;
            }
            match self.store.read(&version.filename).await {
                Ok(snapshot) => newer.push((version.clone(), snapshot.rows)),
                Err(error) => {
                    warn!(filename = %version.filename, %error, "skipping unreadable snapshot");
                }
            }
        }
        Ok(RemoteState { versions, newer })
    }

    /// Candidate list for detection: the working copy first, then every
    /// newer snapshot in newest-first order
    fn build_candidates(
        &self,
        working: &RowSet,
        newer: &[(FileVersionInfo, RowSet)],
    ) -> Vec<Candidate> {
        let mut candidates = Vec::with_capacity(newer.len() + 1);
        candidates.push(Candidate::new(self.config.actor.clone(), working.clone()));
        for (version, rows) in newer {
            candidates.push(Candidate::new(version.saved_by.clone(), rows.clone()));
        }
        candidates
    }

    /// Tombstone compaction cutoff: a tombstone may be dropped only once
    /// it is older than the retention window and older than every session
    /// start recorded on a visible snapshot, so no live comparison can
    /// still need it.
    fn prune_cutoff(&self, versions: &[FileVersionInfo], now: i64) -> i64 {
        let oldest_session = versions
            .iter()
            .map(|version| version.session_started_at)
            .fold(self.session_started_at, i64::min);
        oldest_session.min(now - self.config.tombstone_retention_ms())
    }

    #[cfg(test)]
    pub(crate) fn raw_state(&self) -> &Arc<Mutex<SessionState>> {
        &self.state
    }
}

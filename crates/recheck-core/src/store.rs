//! Artifact store
//!
//! Maps artifact ids to files and owns the backup set:
//! - Directory scan with glob filtering and marker exclusion
//! - Atomic overwrite (temp file + rename in the same directory)
//! - Write-once backups, mirrored to disk so a crash between
//!   regeneration and rollback keeps the originals recoverable
//!
//! A persisted `.bak` is only trusted for artifacts backed up since the
//! last [`ArtifactStore::begin_run`]; copies left by earlier runs are
//! never restored.

use crate::error::StoreError;
use crate::types::{Artifact, ArtifactId};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Suffixes of files the scan never treats as artifacts
pub const MARKER_SUFFIXES: &[&str] = &[".bak", ".regen", ".tmp", ".orig"];

/// Filesystem-backed artifact store
#[derive(Debug)]
pub struct ArtifactStore {
    /// Persisted backup location
    backup_dir: PathBuf,
    /// Backup set keyed by artifact path
    backups: DashMap<PathBuf, String>,
    /// Paths whose `.bak` was written during the current run
    persisted: DashSet<PathBuf>,
}

impl ArtifactStore {
    /// Create store persisting backups under `backup_dir`
    #[must_use]
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            backups: DashMap::new(),
            persisted: DashSet::new(),
        }
    }

    /// Forget every backup taken by a previous run
    pub fn begin_run(&self) {
        self.backups.clear();
        self.persisted.clear();
    }

    /// Scan `directory` for files whose name matches `pattern`
    ///
    /// Returned artifacts are sorted by filename. Subdirectories and
    /// marker-suffixed files are skipped.
    ///
    /// # Errors
    /// - `StoreError::InvalidPattern` if `pattern` is not a valid glob
    /// - `StoreError::Scan` if the directory cannot be read
    pub fn list(&self, directory: &Path, pattern: &str) -> Result<Vec<Artifact>, StoreError> {
        let matcher = glob::Pattern::new(pattern).map_err(|e| StoreError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        let scan_err = |source| StoreError::Scan {
            path: directory.to_path_buf(),
            source,
        };

        let mut artifacts = Vec::new();
        for entry in std::fs::read_dir(directory).map_err(scan_err)? {
            let entry = entry.map_err(scan_err)?;
            if !entry.file_type().map_err(scan_err)?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_marker(&name) || !matcher.matches(&name) {
                continue;
            }
            artifacts.push(Artifact::new(entry.path()));
        }

        artifacts.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        tracing::debug!(
            dir = %directory.display(),
            pattern,
            count = artifacts.len(),
            "scanned artifacts"
        );
        Ok(artifacts)
    }

    /// Read current content
    pub fn read(&self, artifact: &Artifact) -> Result<String, StoreError> {
        std::fs::read_to_string(&artifact.path).map_err(|e| StoreError::read(&artifact.path, e))
    }

    /// Overwrite content atomically
    pub fn write(&self, artifact: &Artifact, content: &str) -> Result<(), StoreError> {
        atomic_write(&artifact.path, content)
    }

    /// Capture current content once
    ///
    /// Later calls for the same artifact are no-ops. The captured content
    /// is also written to `<backup_dir>/<filename>.bak`; a failure there is
    /// logged and the in-memory copy still guarantees rollback.
    ///
    /// # Returns
    /// `true` if this call created the backup
    pub fn backup(&self, artifact: &Artifact) -> Result<bool, StoreError> {
        if self.backups.contains_key(&artifact.path) {
            return Ok(false);
        }

        // read outside the shard lock
        let content = self.read(artifact)?;
        match self.backups.entry(artifact.path.clone()) {
            Entry::Occupied(_) => return Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(content.clone());
            }
        }

        let persisted = self.backup_path(artifact);
        match std::fs::create_dir_all(&self.backup_dir)
            .and_then(|()| std::fs::write(&persisted, &content))
        {
            Ok(()) => {
                self.persisted.insert(artifact.path.clone());
            }
            Err(e) => tracing::warn!(
                artifact = %artifact.id,
                path = %persisted.display(),
                error = %e,
                "could not persist backup; keeping in-memory copy"
            ),
        }
        Ok(true)
    }

    /// Whether a backup exists for this artifact
    #[must_use]
    pub fn has_backup(&self, artifact: &Artifact) -> bool {
        self.backups.contains_key(&artifact.path)
    }

    /// Backed-up content, if any
    #[must_use]
    pub fn backup_content(&self, artifact: &Artifact) -> Option<String> {
        self.backups.get(&artifact.path).map(|c| c.value().clone())
    }

    /// Write the backed-up content back
    ///
    /// Falls back to the persisted `.bak` file when the in-memory entry is
    /// gone, provided that file was written during this run. Missing
    /// backups are logged, not fatal.
    ///
    /// # Returns
    /// `true` if content was restored
    pub fn restore(&self, artifact: &Artifact) -> Result<bool, StoreError> {
        let content = match self.backup_content(artifact) {
            Some(content) => Some(content),
            None if self.persisted.contains(&artifact.path) => {
                std::fs::read_to_string(self.backup_path(artifact)).ok()
            }
            None => None,
        };
        let Some(content) = content else {
            tracing::warn!(artifact = %artifact.id, "no backup to restore");
            return Ok(false);
        };
        self.write(artifact, &content)?;
        tracing::info!(artifact = %artifact.id, "restored original content");
        Ok(true)
    }

    /// Ids with a backup in the current run
    #[must_use]
    pub fn backed_up(&self) -> Vec<ArtifactId> {
        let mut ids: Vec<ArtifactId> = self
            .backups
            .iter()
            .map(|e| ArtifactId::from_path(e.key()))
            .collect();
        ids.sort();
        ids
    }

    /// Drop the in-memory backup set at run end
    ///
    /// Persisted copies from this run stay restorable until the next
    /// [`ArtifactStore::begin_run`].
    pub fn discard_backups(&self) {
        self.backups.clear();
    }

    /// Persisted backup location for an artifact
    #[must_use]
    pub fn backup_path(&self, artifact: &Artifact) -> PathBuf {
        self.backup_dir.join(format!("{}.bak", artifact.file_name()))
    }
}

fn is_marker(name: &str) -> bool {
    MARKER_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

fn atomic_write(path: &Path, content: &str) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| StoreError::write(path, e))?;
    tmp.write_all(content.as_bytes())
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| StoreError::write(path, e))?;
    tmp.persist(path)
        .map_err(|e| StoreError::write(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    #[test]
    fn list_sorts_and_filters() {
        let dir = fixture(&[
            ("Block_003.lean", "c"),
            ("Block_001.lean", "a"),
            ("Block_002.lean.bak", "old"),
            ("Block_004.lean.regen", "marker"),
            ("notes.txt", "x"),
        ]);
        std::fs::create_dir(dir.path().join("sub.lean")).unwrap();

        let store = ArtifactStore::new(dir.path().join("backups"));
        let artifacts = store.list(dir.path(), "*.lean").unwrap();
        let ids: Vec<&str> = artifacts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["Block_001", "Block_003"]);
    }

    #[test]
    fn list_missing_dir_is_scan_error() {
        let store = ArtifactStore::new("/nonexistent/backups");
        let err = store
            .list(Path::new("/nonexistent/recheck-artifacts"), "*.lean")
            .unwrap_err();
        assert!(matches!(err, StoreError::Scan { .. }));
    }

    #[test]
    fn read_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("backups"));
        let artifact = Artifact::new(dir.path().join("Missing.lean"));
        assert!(matches!(store.read(&artifact), Err(StoreError::Read { .. })));
    }

    #[test]
    fn write_replaces_content() {
        let dir = fixture(&[("A.lean", "old")]);
        let store = ArtifactStore::new(dir.path().join("backups"));
        let artifact = Artifact::new(dir.path().join("A.lean"));

        store.write(&artifact, "new").unwrap();
        assert_eq!(store.read(&artifact).unwrap(), "new");
        // no temp files left behind
        assert_eq!(store.list(dir.path(), "*").unwrap().len(), 1);
    }

    #[test]
    fn backup_is_write_once() {
        let dir = fixture(&[("A.lean", "original")]);
        let store = ArtifactStore::new(dir.path().join("backups"));
        let artifact = Artifact::new(dir.path().join("A.lean"));

        assert!(store.backup(&artifact).unwrap());
        store.write(&artifact, "regenerated").unwrap();
        assert!(!store.backup(&artifact).unwrap());

        assert_eq!(store.backup_content(&artifact).as_deref(), Some("original"));
        let persisted = std::fs::read_to_string(store.backup_path(&artifact)).unwrap();
        assert_eq!(persisted, "original");
    }

    #[test]
    fn restore_is_content_exact() {
        let dir = fixture(&[("A.lean", "import Mathlib\n\ntheorem a : 1 = 1 := rfl\n")]);
        let store = ArtifactStore::new(dir.path().join("backups"));
        let artifact = Artifact::new(dir.path().join("A.lean"));

        store.backup(&artifact).unwrap();
        store.write(&artifact, "garbage").unwrap();
        assert!(store.restore(&artifact).unwrap());
        assert_eq!(
            store.read(&artifact).unwrap(),
            "import Mathlib\n\ntheorem a : 1 = 1 := rfl\n"
        );
    }

    #[test]
    fn restore_without_backup_is_noop() {
        let dir = fixture(&[("A.lean", "current")]);
        let store = ArtifactStore::new(dir.path().join("backups"));
        let artifact = Artifact::new(dir.path().join("A.lean"));

        assert!(!store.restore(&artifact).unwrap());
        assert_eq!(store.read(&artifact).unwrap(), "current");
    }

    #[test]
    fn restore_falls_back_to_persisted_copy() {
        let dir = fixture(&[("A.lean", "original")]);
        let store = ArtifactStore::new(dir.path().join("backups"));
        let artifact = Artifact::new(dir.path().join("A.lean"));

        store.backup(&artifact).unwrap();
        store.write(&artifact, "regenerated").unwrap();
        store.discard_backups();

        assert!(store.restore(&artifact).unwrap());
        assert_eq!(store.read(&artifact).unwrap(), "original");
    }

    #[test]
    fn stale_persisted_copy_is_never_restored() {
        let dir = fixture(&[("A.lean", "verified")]);
        let backups = dir.path().join("backups");
        std::fs::create_dir(&backups).unwrap();
        std::fs::write(backups.join("A.lean.bak"), "from an older run").unwrap();

        let store = ArtifactStore::new(&backups);
        let artifact = Artifact::new(dir.path().join("A.lean"));
        store.write(&artifact, "broken rebuild").unwrap();

        assert!(!store.restore(&artifact).unwrap());
        assert_eq!(store.read(&artifact).unwrap(), "broken rebuild");
    }

    #[test]
    fn begin_run_forgets_previous_backups() {
        let dir = fixture(&[("A.lean", "first")]);
        let store = ArtifactStore::new(dir.path().join("backups"));
        let artifact = Artifact::new(dir.path().join("A.lean"));

        store.backup(&artifact).unwrap();
        store.discard_backups();
        store.begin_run();

        store.write(&artifact, "second").unwrap();
        assert!(!store.restore(&artifact).unwrap());
        assert_eq!(store.read(&artifact).unwrap(), "second");

        // a fresh backup in the new run captures the current content
        assert!(store.backup(&artifact).unwrap());
        assert_eq!(store.backup_content(&artifact).as_deref(), Some("second"));
    }
}

//! Durable run storage.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::run::{Run, RunId, RunStatus};

const CLAIM_WAIT_ATTEMPTS: u32 = 200;
const CLAIM_WAIT_INTERVAL: std::time::Duration = std::time::Duration::from_millis(10);

/// Result of [`RunStore::create_run`].
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    /// The run was persisted by this call.
    Created,
    /// A run with the same id already existed; it is returned unchanged.
    Existing(Run),
}

/// Durable run storage.
///
/// `create_run` is first-writer-wins: creating an id that already exists
/// is not an error. `save_run` replaces the whole record atomically.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, run: &Run) -> Result<CreateOutcome, StoreError>;

    async fn load_run(&self, id: &RunId) -> Result<Option<Run>, StoreError>;

    async fn save_run(&self, run: &Run) -> Result<(), StoreError>;

    async fn list_runs_by_status(&self, statuses: &[RunStatus]) -> Result<Vec<Run>, StoreError>;
}

/// In-memory run store for tests and ephemeral deployments.
pub struct MemoryRunStore {
    runs: RwLock<HashMap<RunId, Run>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create_run(&self, run: &Run) -> Result<CreateOutcome, StoreError> {
        let mut runs = self.runs.write().await;
        if let Some(existing) = runs.get(&run.id) {
            return Ok(CreateOutcome::Existing(existing.clone()));
        }
        runs.insert(run.id.clone(), run.clone());
        Ok(CreateOutcome::Created)
    }

    async fn load_run(&self, id: &RunId) -> Result<Option<Run>, StoreError> {
        let runs = self.runs.read().await;
        Ok(runs.get(id).cloned())
    }

    async fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        if !runs.contains_key(&run.id) {
            return Err(StoreError::NotFound(run.id.clone()));
        }
        runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn list_runs_by_status(&self, statuses: &[RunStatus]) -> Result<Vec<Run>, StoreError> {
        let runs = self.runs.read().await;
        let mut matching: Vec<Run> = runs
            .values()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        Ok(matching)
    }
}

/// File system based run store.
///
/// Runs are stored as individual JSON files organized by status:
/// ```text
/// {storage_path}/
/// └── runs/
///     ├── index/          one hard link per run id to its first record
///     ├── running/
///     │   └── {id}.json
///     ├── waiting/
///     ├── succeeded/
///     ├── failed/
///     └── fatal/
/// ```
/// Records are written to a per-writer temporary file and renamed into
/// place. `create_run` claims the id by hard-linking the staged record into
/// `index/`; only the writer whose link succeeds publishes.
pub struct FileRunStore {
    storage_path: PathBuf,
}

impl FileRunStore {
    /// Create a file store rooted at `storage_path`, creating directories.
    pub async fn new(storage_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let storage_path = storage_path.into();
        let store = Self { storage_path };

        let mut dirs = vec![store.index_dir()];
        dirs.extend(RunStatus::ALL.iter().map(|s| store.status_dir(*s)));
        for dir in dirs {
            fs::create_dir_all(&dir).await.map_err(|e| {
                StoreError::Backend(format!("Failed to create {:?}: {}", dir, e))
            })?;
        }

        debug!("FileRunStore initialized at {:?}", store.storage_path);
        Ok(store)
    }

    fn runs_dir(&self) -> PathBuf {
        self.storage_path.join("runs")
    }

    fn index_dir(&self) -> PathBuf {
        self.runs_dir().join("index")
    }

    fn status_dir(&self, status: RunStatus) -> PathBuf {
        self.runs_dir().join(status.as_str().to_ascii_lowercase())
    }

    fn run_path(&self, id: &RunId, status: RunStatus) -> PathBuf {
        self.status_dir(status).join(format!("{}.json", file_stem(id)))
    }

    fn marker_path(&self, id: &RunId) -> PathBuf {
        self.index_dir().join(file_stem(id))
    }

    /// Every status directory currently holding a file for `id`.
    async fn locate(&self, id: &RunId) -> Vec<(PathBuf, RunStatus)> {
        let mut found = Vec::new();
        for status in RunStatus::ALL {
            let path = self.run_path(id, status);
            if fs::try_exists(&path).await.unwrap_or(false) {
                found.push((path, status));
            }
        }
        found
    }

    /// Write `run` to a temporary file private to this writer.
    async fn stage(&self, run: &Run) -> Result<PathBuf, StoreError> {
        let tmp = self.status_dir(run.status).join(format!(
            "{}.{}.tmp",
            file_stem(&run.id),
            Uuid::new_v4().simple()
        ));

        let content = serde_json::to_string_pretty(run)
            .map_err(|e| StoreError::Backend(format!("Failed to serialize run: {}", e)))?;

        fs::write(&tmp, content)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to write run file: {}", e)))?;
        Ok(tmp)
    }

    async fn publish(&self, staged: &Path, run: &Run) -> Result<PathBuf, StoreError> {
        let path = self.run_path(&run.id, run.status);
        if let Err(e) = fs::rename(staged, &path).await {
            fs::remove_file(staged).await.ok();
            return Err(StoreError::Backend(format!(
                "Failed to move run file into place: {}",
                e
            )));
        }
        Ok(path)
    }

    async fn write_atomic(&self, run: &Run) -> Result<PathBuf, StoreError> {
        let staged = self.stage(run).await?;
        self.publish(&staged, run).await
    }

    /// Wait for the writer holding the index marker to publish its record.
    ///
    /// The marker is a hard link to the creator's staged record, so a
    /// creator that died between claim and publish can be finished from it.
    async fn await_claimed(&self, id: &RunId) -> Result<Run, StoreError> {
        for _ in 0..CLAIM_WAIT_ATTEMPTS {
            if let Some(existing) = self.load_run(id).await? {
                return Ok(existing);
            }
            tokio::time::sleep(CLAIM_WAIT_INTERVAL).await;
        }

        let claimed = Self::read_run(&self.marker_path(id)).await?;
        if let Some(existing) = self.load_run(id).await? {
            return Ok(existing);
        }
        warn!("Run '{}' has an index marker but no record; restoring it", id);
        self.write_atomic(&claimed).await?;
        Ok(claimed)
    }

    async fn read_run(path: &Path) -> Result<Run, StoreError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to read run file: {}", e)))?;
        serde_json::from_str(&content)
            .map_err(|e| StoreError::Backend(format!("Failed to deserialize run: {}", e)))
    }

    /// Like [`read_run`](Self::read_run), but a file moved away by a
    /// concurrent save is `None`.
    async fn read_run_if_present(path: &Path) -> Result<Option<Run>, StoreError> {
        match fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| StoreError::Backend(format!("Failed to deserialize run: {}", e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Backend(format!("Failed to read run file: {}", e))),
        }
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn create_run(&self, run: &Run) -> Result<CreateOutcome, StoreError> {
        let staged = self.stage(run).await?;

        match fs::hard_link(&staged, self.marker_path(&run.id)).await {
            Ok(()) => {
                let path = self.publish(&staged, run).await?;
                debug!("Created run '{}' at {:?}", run.id, path);
                Ok(CreateOutcome::Created)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                fs::remove_file(&staged).await.ok();
                let existing = self.await_claimed(&run.id).await?;
                Ok(CreateOutcome::Existing(existing))
            }
            Err(e) => {
                fs::remove_file(&staged).await.ok();
                Err(StoreError::Backend(format!("Failed to claim run id: {}", e)))
            }
        }
    }

    async fn load_run(&self, id: &RunId) -> Result<Option<Run>, StoreError> {
        // A crash between rename and cleanup can leave two files; the most
        // recently updated one wins.
        let mut newest: Option<Run> = None;
        for (path, _) in self.locate(id).await {
            let Some(run) = Self::read_run_if_present(&path).await? else {
                continue;
            };
            if newest.as_ref().is_none_or(|n| run.updated_at >= n.updated_at) {
                newest = Some(run);
            }
        }
        Ok(newest)
    }

    async fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        let existing = self.locate(&run.id).await;
        if existing.is_empty() {
            return Err(StoreError::NotFound(run.id.clone()));
        }

        let path = self.write_atomic(run).await?;

        for (old_path, old_status) in existing {
            if old_status != run.status {
                fs::remove_file(&old_path).await.ok();
            }
        }

        debug!("Saved run '{}' to {:?}", run.id, path);
        Ok(())
    }

    async fn list_runs_by_status(&self, statuses: &[RunStatus]) -> Result<Vec<Run>, StoreError> {
        let mut runs = Vec::new();

        for status in statuses {
            let dir = self.status_dir(*status);
            let mut entries = fs::read_dir(&dir).await.map_err(|e| {
                StoreError::Backend(format!("Failed to read {:?}: {}", dir, e))
            })?;

            while let Some(entry) = entries.next_entry().await.map_err(|e| {
                StoreError::Backend(format!("Failed to read directory entry: {}", e))
            })? {
                let path = entry.path();
                if path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }

                match Self::read_run(&path).await {
                    Ok(run) => {
                        // Skip stale copies left behind by an interrupted move.
                        match self.load_run(&run.id).await? {
                            Some(current) if current.status == *status => runs.push(current),
                            _ => {}
                        }
                    }
                    Err(e) => warn!("Skipping unreadable run file {:?}: {}", path, e),
                }
            }
        }

        runs.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        debug!("Listed {} runs", runs.len());
        Ok(runs)
    }
}

/// File-name-safe encoding of a run id.
fn file_stem(id: &RunId) -> String {
    let mut stem = String::with_capacity(id.as_str().len());
    for byte in id.as_str().bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    stem
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

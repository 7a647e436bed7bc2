use crate::checksum::{compare_checksums, descriptor_url, HashAlgorithm};
use crate::cmr::{GranuleRef, GranuleSearch};
use crate::download::{self, local_path, DEFAULT_MODE};
use crate::error::{Result, SyncError};
use crate::query::GranuleQuery;
use crate::session::{Session, SessionBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Searching,
    SerialSync,
    ParallelSync,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Searching => "searching",
            Self::SerialSync => "serial sync",
            Self::ParallelSync => "parallel sync",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SyncStatus {
    /// The local copy already matches the remote checksum
    Skipped,
    Downloaded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub granule: GranuleRef,
    pub local_path: PathBuf,
    pub status: SyncStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub results: Vec<SyncResult>,
}

impl SyncReport {
    fn count(self: &Self, predicate: impl Fn(&SyncStatus) -> bool) -> usize {
        self.results.iter().filter(|r| predicate(&r.status)).count()
    }

    pub fn downloaded(self: &Self) -> usize {
        self.count(|s| *s == SyncStatus::Downloaded)
    }

    pub fn skipped(self: &Self) -> usize {
        self.count(|s| *s == SyncStatus::Skipped)
    }

    pub fn failed(self: &Self) -> usize {
        self.count(|s| matches!(s, SyncStatus::Failed(_)))
    }

    pub fn extend(&mut self, other: SyncReport) {
        self.results.extend(other.results);
    }

    pub fn summary(self: &Self) -> String {
        format!(
            "{} granules: {} downloaded, {} already valid, {} failed",
            self.results.len(),
            self.downloaded(),
            self.skipped(),
            self.failed()
        )
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).map_err(|e| SyncError::io(&path, e))?;
        serde_json::from_str(&content).map_err(|e| SyncError::parse("sync report", e))
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| SyncError::parse("sync report", e))?;
        fs::write(&path, content).map_err(|e| SyncError::io(&path, e))
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub directory: PathBuf,
    /// Number of parallel workers; 0 syncs serially
    pub processes: usize,
    pub mode: u32,
    pub algorithm: HashAlgorithm,
}

impl SyncOptions {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            processes: 0,
            mode: DEFAULT_MODE,
            algorithm: HashAlgorithm::default(),
        }
    }
}

fn enter(phase: Phase) {
    debug!(%phase, "Sync phase");
}

/// Search for the granules matching `query` and bring each one up to date locally.
/// Search failures abort the sync; per-granule failures are recorded in the report.
pub async fn sync_product(
    search: &impl GranuleSearch,
    sessions: &SessionBuilder,
    query: &GranuleQuery,
    options: &SyncOptions,
) -> Result<SyncReport> {
    enter(Phase::Idle);
    let session = sessions.build()?;

    enter(Phase::Searching);
    info!(product = %query.product, "Querying NASA CMR for available granules");
    let granules = search.search(&session, query).await?;

    if granules.is_empty() {
        enter(Phase::Done);
        return Ok(SyncReport::default());
    }

    let results = if options.processes == 0 {
        enter(Phase::SerialSync);
        sync_serial(&session, granules, options).await
    } else {
        enter(Phase::ParallelSync);
        sync_parallel(sessions, granules, options).await?
    };

    enter(Phase::Done);
    Ok(SyncReport { results })
}

async fn sync_serial(
    session: &Session,
    granules: Vec<GranuleRef>,
    options: &SyncOptions,
) -> Vec<SyncResult> {
    let mut results = Vec::with_capacity(granules.len());
    for granule in granules {
        results.push(sync_granule(session, granule, options, 0).await);
    }
    results
}

/// Run one task per granule, at most `options.processes` at a time. Each
/// running unit borrows a session from a pool holding one per worker, and
/// results are returned in discovery order once every unit has finished.
async fn sync_parallel(
    sessions: &SessionBuilder,
    granules: Vec<GranuleRef>,
    options: &SyncOptions,
) -> Result<Vec<SyncResult>> {
    let workers = options.processes.min(granules.len()).max(1);
    info!("Syncing in parallel with {workers} workers");

    let pool = (0..workers)
        .map(|worker| -> Result<(usize, Session)> { Ok((worker, sessions.build()?)) })
        .collect::<Result<Vec<_>>>()?;
    let pool = Arc::new(Mutex::new(pool));
    let permits = Arc::new(Semaphore::new(workers));
    let options = Arc::new(options.clone());

    let mut set = JoinSet::new();
    for (index, granule) in granules.iter().cloned().enumerate() {
        let pool = Arc::clone(&pool);
        let permits = Arc::clone(&permits);
        let options = Arc::clone(&options);
        let sessions = sessions.clone();

        set.spawn(async move {
            let _permit = permits.acquire_owned().await;
            // A session lost with a panicked unit is rebuilt on demand
            let checkout = pool.lock().await.pop();
            let (worker, session) = match checkout {
                Some(checkout) => checkout,
                None => match sessions.build() {
                    Ok(session) => (workers + index, session),
                    Err(e) => return (index, failed(granule, &options.directory, e.trace())),
                },
            };
            let result = sync_granule(&session, granule, &options, worker).await;
            pool.lock().await.push((worker, session));
            (index, result)
        });
    }

    Ok(join_units(&mut set, granules, &options.directory).await)
}

/// Collect per-unit results back into discovery order. A unit whose task
/// panicked is reported as failed; every other unit keeps its own result.
async fn join_units(
    set: &mut JoinSet<(usize, SyncResult)>,
    granules: Vec<GranuleRef>,
    directory: &Path,
) -> Vec<SyncResult> {
    let mut slots: Vec<Option<SyncResult>> = vec![None; granules.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => error!(error = %e, "Sync task terminated abnormally"),
        }
    }

    slots
        .into_iter()
        .zip(granules)
        .map(|(slot, granule)| {
            slot.unwrap_or_else(|| {
                failed(granule, directory, "task terminated before completing".to_string())
            })
        })
        .collect()
}

fn failed(granule: GranuleRef, directory: &Path, reason: String) -> SyncResult {
    let local_path =
        local_path(directory, &granule.url).unwrap_or_else(|_| directory.join(&granule.name));
    SyncResult {
        granule,
        local_path,
        status: SyncStatus::Failed(reason),
    }
}

/// Verify, and if needed download, a single granule. Never fails: errors are
/// captured in the returned status.
pub async fn sync_granule(
    session: &Session,
    granule: GranuleRef,
    options: &SyncOptions,
    worker: usize,
) -> SyncResult {
    let local = match local_path(&options.directory, &granule.url) {
        Ok(local) => local,
        Err(e) => {
            error!(worker, granule = %granule.name, error = %e.trace(), "Unable to map granule to a local path");
            return failed(granule, &options.directory, e.trace());
        }
    };

    let valid = match compare_checksums(session, &descriptor_url(&granule.url), &local, options.algorithm).await {
        Ok(valid) => valid,
        Err(e) => {
            warn!(worker, granule = %granule.name, error = %e.trace(), "Unable to verify local copy, downloading");
            false
        }
    };

    if valid {
        debug!(worker, path = %local.display(), "Local copy is valid");
        return SyncResult {
            granule,
            local_path: local,
            status: SyncStatus::Skipped,
        };
    }

    let status = match download::from_remote(session, &granule.url, &local, options.mode).await {
        Ok(_) => {
            info!(worker, granule = %granule.name, "Downloaded");
            SyncStatus::Downloaded
        }
        Err(e) => {
            error!(
                worker,
                pid = std::process::id(),
                granule = %granule.name,
                error = %e.trace(),
                "Transfer failed"
            );
            SyncStatus::Failed(e.trace())
        }
    };

    SyncResult {
        granule,
        local_path: local,
        status,
    }
}

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::error::{PrestarterError, PrestarterResult};

pub const LOCK_FILE_NAME: &str = ".install.lock";
const LOCK_STALE_SECS: i64 = 60 * 10;
const LOCK_HEARTBEAT: Duration = Duration::from_secs(60);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);
const LOCK_LOG_EVERY: u32 = 20;

#[derive(Debug, Serialize, Deserialize)]
struct LockPayload {
    pid: u32,
    timestamp: i64,
    #[serde(default)]
    nonce: String,
}

/// Inter-process install lock for one root. Held while the guard lives.
#[derive(Debug)]
pub struct InstallLock {
    path: PathBuf,
    heartbeat: Duration,
}

impl InstallLock {
    pub fn for_root(root: &Path) -> Self {
        Self {
            path: root.join(LOCK_FILE_NAME),
            heartbeat: LOCK_HEARTBEAT,
        }
    }

    /// How often a held lock rewrites its timestamp.
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait until the lock file can be created, clearing it when its holder
    /// is gone. Without a way to check the holder, a lock whose timestamp has
    /// not moved for `LOCK_STALE_SECS` counts as abandoned.
    pub async fn acquire(&self, cancel: &CancellationToken) -> PrestarterResult<InstallLockGuard> {
        let mut attempts = 0_u32;
        loop {
            if cancel.is_cancelled() {
                return Err(PrestarterError::Cancelled);
            }
            attempts += 1;
            match tokio::fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&self.path)
                .await
            {
                Ok(mut file) => {
                    let holder = Holder {
                        path: self.path.clone(),
                        pid: std::process::id(),
                        nonce: Uuid::new_v4().to_string(),
                    };
                    if let Err(err) = write_lock_payload(&mut file, &holder).await {
                        let _ = tokio::fs::remove_file(&self.path).await;
                        return Err(err);
                    }
                    debug!("Acquired install lock {:?}", self.path);
                    return Ok(InstallLockGuard::start(holder, self.heartbeat));
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    cleanup_stale_lock(&self.path).await;
                    if attempts % LOCK_LOG_EVERY == 0 {
                        info!("Waiting for install lock at {:?}", self.path);
                    }
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(PrestarterError::Cancelled),
                        _ = tokio::time::sleep(LOCK_POLL_INTERVAL) => {}
                    }
                }
                Err(source) => return Err(PrestarterError::io(&self.path, source)),
            }
        }
    }
}

/// The payload is on disk before the lock counts as held.
async fn write_lock_payload(file: &mut tokio::fs::File, holder: &Holder) -> PrestarterResult<()> {
    let bytes = serde_json::to_vec(&holder.payload())?;
    file.write_all(&bytes)
        .await
        .map_err(|source| PrestarterError::io(&holder.path, source))?;
    file.flush()
        .await
        .map_err(|source| PrestarterError::io(&holder.path, source))?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HolderState {
    Alive,
    Dead,
    #[cfg_attr(target_os = "linux", allow(dead_code))]
    Unknown,
}

#[cfg(target_os = "linux")]
fn holder_state(pid: u32) -> HolderState {
    if Path::new(&format!("/proc/{pid}")).exists() {
        HolderState::Alive
    } else {
        HolderState::Dead
    }
}

#[cfg(not(target_os = "linux"))]
fn holder_state(_pid: u32) -> HolderState {
    HolderState::Unknown
}

/// A live holder keeps its lock however long it runs.
fn lock_is_stale(payload: &LockPayload, state: HolderState, now: i64) -> bool {
    match state {
        HolderState::Alive => false,
        HolderState::Dead => true,
        HolderState::Unknown => now.saturating_sub(payload.timestamp) > LOCK_STALE_SECS,
    }
}

async fn cleanup_stale_lock(lock_path: &Path) {
    let Ok(content) = tokio::fs::read_to_string(lock_path).await else {
        return;
    };
    let Ok(payload) = serde_json::from_str::<LockPayload>(&content) else {
        // A holder may still be writing its payload. Only an old torn file
        // is abandoned.
        let stale_after = Duration::from_secs(LOCK_STALE_SECS as u64);
        if lock_file_age(lock_path).await.is_some_and(|age| age > stale_after) {
            warn!("Removing unreadable install lock {:?}", lock_path);
            let _ = tokio::fs::remove_file(lock_path).await;
        }
        return;
    };

    let state = holder_state(payload.pid);
    if lock_is_stale(&payload, state, Utc::now().timestamp()) {
        warn!(
            "Removing stale install lock {:?} (pid {}, holder {:?})",
            lock_path, payload.pid, state
        );
        let _ = tokio::fs::remove_file(lock_path).await;
    }
}

async fn lock_file_age(lock_path: &Path) -> Option<Duration> {
    let modified = tokio::fs::metadata(lock_path).await.ok()?.modified().ok()?;
    modified.elapsed().ok()
}

/// Identity written into the lock file by the process that created it.
#[derive(Debug)]
struct Holder {
    path: PathBuf,
    pid: u32,
    nonce: String,
}

impl Holder {
    fn payload(&self) -> LockPayload {
        LockPayload {
            pid: self.pid,
            timestamp: Utc::now().timestamp(),
            nonce: self.nonce.clone(),
        }
    }

    fn owns_file(&self) -> std::io::Result<bool> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        };
        Ok(serde_json::from_str::<LockPayload>(&content)
            .map(|payload| payload.pid == self.pid && payload.nonce == self.nonce)
            .unwrap_or(false))
    }

    /// Rewrite the timestamp if the lock is still ours.
    fn refresh(&self) -> std::io::Result<bool> {
        if !self.owns_file()? {
            return Ok(false);
        }
        let bytes = serde_json::to_vec(&self.payload()).map_err(std::io::Error::other)?;
        let temp = self.path.with_extension(format!("{}.tmp", Uuid::new_v4()));
        std::fs::write(&temp, bytes)?;
        if let Err(err) = std::fs::rename(&temp, &self.path) {
            let _ = std::fs::remove_file(&temp);
            return Err(err);
        }
        Ok(true)
    }

    fn release(&self) {
        match self.owns_file() {
            Ok(true) => {
                if let Err(source) = std::fs::remove_file(&self.path) {
                    warn!("Failed to remove lock {:?}: {}", self.path, source);
                }
            }
            Ok(false) => warn!("Install lock {:?} no longer belongs to us, leaving it", self.path),
            Err(source) => warn!("Failed to read lock {:?}: {}", self.path, source),
        }
    }
}

/// Keeps the lock fresh while held and removes it on drop, but only while the
/// file still carries this guard's pid and nonce.
#[derive(Debug)]
pub struct InstallLockGuard {
    holder: Arc<Mutex<Option<Holder>>>,
    heartbeat: CancellationToken,
}

impl InstallLockGuard {
    fn start(holder: Holder, interval: Duration) -> Self {
        let guard = Self {
            holder: Arc::new(Mutex::new(Some(holder))),
            heartbeat: CancellationToken::new(),
        };
        tokio::spawn(heartbeat(guard.holder.clone(), guard.heartbeat.clone(), interval));
        guard
    }
}

async fn heartbeat(holder: Arc<Mutex<Option<Holder>>>, stop: CancellationToken, interval: Duration) {
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        let slot = holder.clone();
        let refreshed = tokio::task::spawn_blocking(move || {
            let slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(holder) => holder.refresh(),
                None => Ok(false),
            }
        })
        .await;

        match refreshed {
            Ok(Ok(true)) => debug!("Refreshed install lock"),
            Ok(Ok(false)) => return,
            Ok(Err(err)) => warn!("Failed to refresh install lock: {}", err),
            Err(err) => {
                warn!("Install lock heartbeat stopped: {}", err);
                return;
            }
        }
    }
}

impl Drop for InstallLockGuard {
    fn drop(&mut self) {
        self.heartbeat.cancel();
        let mut slot = self.holder.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(holder) = slot.take() {
            holder.release();
        }
    }
}

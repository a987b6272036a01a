//! Node core: the state machine and its replication log under one lock
//!
//! Every write on a node, client or replicated, goes through the write lock
//! here, so log order is lock acquisition order. Reads take the read lock
//! and always see a state that matches a log prefix.
//!
//! Disk I/O runs on the blocking pool. A caller that goes away never
//! cancels an append half way.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tokio::sync::Notify;

use crate::observability::{Event, Logger};
use crate::recovery::{LogReplayer, Recovered, RecoveryManager};
use crate::replication::{classify, ReceiveResult};
use crate::state::{AccountRef, ChatError, ChatState, Operation, Outcome};
use crate::wal::{LogEntry, ReplicationLog, StateSnapshot};

#[derive(Debug, Error)]
pub enum CoreError {
    /// Operation rejected by the state machine; nothing was logged
    #[error(transparent)]
    Rejected(#[from] ChatError),

    /// Local log could not be written; state was reloaded from disk
    #[error("local persistence failed: {0}")]
    Persistence(String),

    /// Lock poisoned, blocking task lost, or state could not be reloaded
    #[error("node core unavailable: {0}")]
    Unavailable(String),

    /// Writes for this epoch are no longer accepted; nothing was logged
    #[error("epoch {0} no longer accepts writes")]
    Fenced(u64),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Why applying a replicated batch stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyStop {
    Gap { expected: u64, received: u64 },
    Conflict { sequence: u64 },
    Divergence { sequence: u64, reason: String },
    Persistence(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub duplicates: usize,
    pub last_sequence: u64,
    pub last_epoch: u64,
    pub stopped: Option<ApplyStop>,
}

/// State plus log. Not thread-safe by itself; see [`NodeCore`].
pub struct ChatCore {
    state: ChatState,
    log: ReplicationLog,
    log_dir: PathBuf,
    compact_after: usize,
    /// Set when state could not be rebuilt after a failed write
    broken: Option<String>,
}

impl ChatCore {
    pub fn new(recovered: Recovered, log_dir: &Path, compact_after: usize) -> Self {
        Self {
            state: recovered.state,
            log: recovered.log,
            log_dir: log_dir.to_path_buf(),
            compact_after: compact_after.max(1),
            broken: None,
        }
    }

    /// `Unavailable` once state can no longer be trusted to match the log.
    pub fn check_available(&self) -> CoreResult<()> {
        match &self.broken {
            Some(reason) => Err(CoreError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn log(&self) -> &ReplicationLog {
        &self.log
    }

    pub fn last_sequence(&self) -> u64 {
        self.log.last_sequence()
    }

    pub fn last_epoch(&self) -> u64 {
        self.log.last_epoch()
    }

    /// Full state as of the newest entry.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::new(
            self.log.last_sequence(),
            self.log.last_epoch(),
            self.state.clone(),
        )
    }

    /// Master write path: validate, apply, then make the entry durable.
    ///
    /// `read` runs against the new state while the lock is still held.
    pub fn submit<R>(
        &mut self,
        epoch: u64,
        op: Operation,
        read: impl FnOnce(&ChatState, &Outcome) -> R,
    ) -> CoreResult<(LogEntry, R)> {
        self.check_available()?;
        self.state.validate(&op)?;
        let outcome = self.state.apply(&op)?;

        match self.log.append(epoch, op, outcome) {
            Ok(entry) => {
                Logger::trace(
                    Event::LogAppend,
                    &[
                        ("sequence", &entry.sequence.to_string()),
                        ("epoch", &epoch.to_string()),
                        ("op", entry.operation.kind()),
                    ],
                );
                let result = read(&self.state, &entry.outcome);
                self.maybe_compact();
                Ok((entry, result))
            }
            Err(e) => {
                Logger::error(
                    Event::LogAppendFailed,
                    &[("code", e.code().code()), ("error", e.message())],
                );
                // The state already reflects the lost entry.
                self.reload();
                Err(CoreError::Persistence(e.to_string()))
            }
        }
    }

    /// [`submit`](Self::submit) on behalf of a logged-in account.
    ///
    /// Rejected with `NotLoggedIn` if the account was deleted since the
    /// session was bound to it.
    pub fn submit_as<R>(
        &mut self,
        epoch: u64,
        account: &AccountRef,
        op: Operation,
        read: impl FnOnce(&ChatState, &Outcome) -> R,
    ) -> CoreResult<(LogEntry, R)> {
        self.check_available()?;
        if !self.state.resolves(account) {
            return Err(ChatError::NotLoggedIn.into());
        }
        self.submit(epoch, op, read)
    }

    /// Replica write path for a batch streamed from the Master.
    pub fn apply_replicated(&mut self, entries: &[LogEntry]) -> ApplyReport {
        let mut report = ApplyReport::default();
        if let Some(reason) = &self.broken {
            report.stopped = Some(ApplyStop::Persistence(reason.clone()));
            report.last_sequence = self.log.last_sequence();
            report.last_epoch = self.log.last_epoch();
            return report;
        }

        for entry in entries {
            match classify(&self.log, entry) {
                ReceiveResult::Duplicate => {
                    report.duplicates += 1;
                    continue;
                }
                ReceiveResult::GapDetected { expected, received } => {
                    report.stopped = Some(ApplyStop::Gap { expected, received });
                    break;
                }
                ReceiveResult::Conflict { sequence } => {
                    report.stopped = Some(ApplyStop::Conflict { sequence });
                    break;
                }
                ReceiveResult::Accepted => {}
            }

            if let Err(e) = LogReplayer::apply_entry(&mut self.state, entry) {
                self.reload();
                report.stopped = Some(ApplyStop::Divergence {
                    sequence: entry.sequence,
                    reason: e.message().to_string(),
                });
                break;
            }

            if let Err(e) = self.log.append_entry(entry.clone()) {
                Logger::error(
                    Event::LogAppendFailed,
                    &[
                        ("sequence", &entry.sequence.to_string()),
                        ("code", e.code().code()),
                        ("error", e.message()),
                    ],
                );
                self.reload();
                report.stopped = Some(ApplyStop::Persistence(e.to_string()));
                break;
            }

            report.applied += 1;
            self.maybe_compact();
        }

        report.last_sequence = self.log.last_sequence();
        report.last_epoch = self.log.last_epoch();
        report
    }

    /// Replace local history with a snapshot from another node.
    pub fn install_snapshot(&mut self, snapshot: StateSnapshot) -> CoreResult<()> {
        self.check_available()?;
        if let Err(e) = self.log.install_snapshot(&snapshot) {
            self.reload();
            return Err(CoreError::Persistence(e.to_string()));
        }
        Logger::info(
            Event::SnapshotInstalled,
            &[
                ("last_sequence", &snapshot.last_sequence.to_string()),
                ("last_epoch", &snapshot.last_epoch.to_string()),
            ],
        );
        self.state = snapshot.state;
        Ok(())
    }

    fn maybe_compact(&mut self) {
        if self.log.retained_len() < self.compact_after {
            return;
        }
        let snapshot = self.snapshot();
        match self.log.compact(&snapshot) {
            Ok(()) => Logger::info(
                Event::SnapshotCreated,
                &[("last_sequence", &snapshot.last_sequence.to_string())],
            ),
            // Entries are still durable; compaction is retried on the next append.
            Err(e) => Logger::warn(
                Event::SnapshotCreated,
                &[("code", e.code().code()), ("error", e.message())],
            ),
        }
    }

    /// Rebuild state and log from disk after a failed write. If that fails
    /// too, the core refuses all further reads and writes.
    fn reload(&mut self) {
        match RecoveryManager::new(&self.log_dir).recover() {
            Ok(recovered) => {
                self.state = recovered.state;
                self.log = recovered.log;
            }
            Err(e) => {
                Logger::fatal(
                    Event::RecoveryFailed,
                    &[("code", e.code().code()), ("error", e.message())],
                );
                self.broken = Some(format!("state reload failed: {}", e));
            }
        }
    }
}

/// Shared, lock-guarded [`ChatCore`] plus wakeups for the replication driver.
///
/// Client writes are fenced by epoch: the driver records the epoch this node
/// is Master of, and a write carrying any other epoch is refused under the
/// write lock. Zero means no epoch is writable.
pub struct NodeCore {
    inner: RwLock<ChatCore>,
    write_epoch: AtomicU64,
    appended: Notify,
    failed: Notify,
}

impl NodeCore {
    pub fn new(core: ChatCore) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(core),
            write_epoch: AtomicU64::new(0),
            appended: Notify::new(),
            failed: Notify::new(),
        })
    }

    pub fn read(&self) -> CoreResult<RwLockReadGuard<'_, ChatCore>> {
        let guard = self
            .inner
            .read()
            .map_err(|_| CoreError::Unavailable("state lock poisoned".into()))?;
        guard.check_available()?;
        Ok(guard)
    }

    fn write(&self) -> CoreResult<RwLockWriteGuard<'_, ChatCore>> {
        let guard = self
            .inner
            .write()
            .map_err(|_| CoreError::Unavailable("state lock poisoned".into()))?;
        guard.check_available()?;
        Ok(guard)
    }

    /// Epoch whose client writes are admitted, if any.
    pub fn write_epoch(&self) -> Option<u64> {
        match self.write_epoch.load(Ordering::SeqCst) {
            0 => None,
            epoch => Some(epoch),
        }
    }

    pub fn set_write_epoch(&self, epoch: Option<u64>) {
        self.write_epoch.store(epoch.unwrap_or(0), Ordering::SeqCst);
    }

    fn admit(&self, epoch: u64) -> CoreResult<()> {
        if self.write_epoch() == Some(epoch) {
            Ok(())
        } else {
            Err(CoreError::Fenced(epoch))
        }
    }

    /// Append a client operation. Wakes the driver on success, and on a
    /// persistence failure so the node can give up mastership.
    pub async fn submit<R, F>(self: &Arc<Self>, epoch: u64, op: Operation, read: F) -> CoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&ChatState, &Outcome) -> R + Send + 'static,
    {
        self.submit_inner(epoch, None, op, read).await
    }

    /// [`submit`](Self::submit) for a session bound to `account`.
    pub async fn submit_as<R, F>(
        self: &Arc<Self>,
        epoch: u64,
        account: AccountRef,
        op: Operation,
        read: F,
    ) -> CoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&ChatState, &Outcome) -> R + Send + 'static,
    {
        self.submit_inner(epoch, Some(account), op, read).await
    }

    async fn submit_inner<R, F>(
        self: &Arc<Self>,
        epoch: u64,
        account: Option<AccountRef>,
        op: Operation,
        read: F,
    ) -> CoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&ChatState, &Outcome) -> R + Send + 'static,
    {
        let core = Arc::clone(self);
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = core.write()?;
            core.admit(epoch)?;
            let result = match &account {
                Some(account) => guard.submit_as(epoch, account, op, read),
                None => guard.submit(epoch, op, read),
            };
            result.map(|(_, r)| r)
        })
        .await
        .map_err(|e| CoreError::Unavailable(e.to_string()))?;

        match &result {
            Ok(_) => self.appended.notify_one(),
            Err(CoreError::Persistence(_)) | Err(CoreError::Unavailable(_)) => {
                self.failed.notify_one()
            }
            Err(_) => {}
        }
        result
    }

    pub async fn apply_replicated(self: &Arc<Self>, entries: Vec<LogEntry>) -> CoreResult<ApplyReport> {
        let core = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let report = core.write()?.apply_replicated(&entries);
            Ok(report)
        })
        .await
        .map_err(|e| CoreError::Unavailable(e.to_string()))?
    }

    pub async fn install_snapshot(self: &Arc<Self>, snapshot: StateSnapshot) -> CoreResult<()> {
        let core = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let result = core.write()?.install_snapshot(snapshot);
            result
        })
        .await
        .map_err(|e| CoreError::Unavailable(e.to_string()))?
    }

    /// (last_sequence, last_epoch)
    pub fn position(&self) -> CoreResult<(u64, u64)> {
        let core = self.read()?;
        Ok((core.last_sequence(), core.last_epoch()))
    }

    pub fn snapshot(&self) -> CoreResult<StateSnapshot> {
        Ok(self.read()?.snapshot())
    }

    /// Entries after `after`, or `None` if that position is not served from
    /// the log (compacted away, or `after_epoch` does not match).
    pub fn entries_after(
        &self,
        after: u64,
        after_epoch: u64,
        limit: usize,
    ) -> CoreResult<Option<Vec<LogEntry>>> {
        let core = self.read()?;
        if after > core.last_sequence() || core.log().epoch_at(after) != Some(after_epoch) {
            return Ok(None);
        }
        Ok(core.log().entries_after(after, limit).ok())
    }

    /// Resolves after the next successful client append.
    pub async fn appended(&self) {
        self.appended.notified().await
    }

    /// Resolves after the next local persistence failure.
    pub async fn failed(&self) {
        self.failed.notified().await
    }
}

//! Replication driver
//!
//! One task per node owns the role manager and the replica cursors. It
//! reacts to four things:
//!
//! - the heartbeat timer: detect failures, send heartbeats, retry streaming
//! - peer messages: follow Masters, apply entries, answer backfills
//! - local appends: push new entries to replicas
//! - local persistence failures: give up mastership
//!
//! Everyone else sees the role through the published `RoleView`.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use super::core::{ApplyStop, NodeCore};
use crate::cluster::NodeId;
use crate::observability::{Event, Logger};
use crate::replication::{PeerMessage, ReplicaCursors, SyncDecision, TransportHandle};
use crate::role::{
    DurableMarker, EpochMarker, PeerReport, Role, RoleChange, RoleManager, RoleTimings, RoleView,
};
use crate::shutdown::ShutdownSignal;
use crate::state::Operation;
use crate::wal::{LogEntry, StateSnapshot, WalErrorCode};

/// Replication position of one peer as seen from this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerStatus {
    pub node_id: NodeId,
    pub reachable: bool,
    pub role: Option<Role>,
    pub last_sequence: Option<u64>,
    /// Acknowledged cursor, tracked while this node is Master
    pub acked: Option<u64>,
}

/// Served by the admin endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    #[serde(flatten)]
    pub view: RoleView,
    pub last_sequence: u64,
    pub last_epoch: u64,
    pub peers: Vec<PeerStatus>,
}

struct CatchUp {
    pending: BTreeSet<NodeId>,
    deadline: Instant,
}

pub struct Driver {
    node_id: NodeId,
    node_dir: PathBuf,
    roles: RoleManager,
    timings: RoleTimings,
    cursors: ReplicaCursors,
    peers: Vec<NodeId>,
    core: Arc<NodeCore>,
    transport: TransportHandle,
    incoming: mpsc::Receiver<PeerMessage>,
    view_tx: watch::Sender<RoleView>,
    status_tx: watch::Sender<NodeStatus>,
    persisted_epoch: u64,
    catch_up: Option<CatchUp>,
    last_backfill_request: Option<Instant>,
    batch: usize,
}

impl Driver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        roles: RoleManager,
        timings: RoleTimings,
        node_dir: PathBuf,
        core: Arc<NodeCore>,
        transport: TransportHandle,
        incoming: mpsc::Receiver<PeerMessage>,
        view_tx: watch::Sender<RoleView>,
        batch: usize,
    ) -> (Self, watch::Receiver<NodeStatus>) {
        let peers = transport.peer_ids();
        let (last_sequence, last_epoch) = core.position().unwrap_or((0, 0));
        let (status_tx, status_rx) = watch::channel(NodeStatus {
            view: roles.view(),
            last_sequence,
            last_epoch,
            peers: Vec::new(),
        });

        let driver = Self {
            node_id: roles.node_id(),
            node_dir,
            persisted_epoch: roles.epoch(),
            roles,
            timings,
            cursors: ReplicaCursors::new(peers.iter().copied()),
            peers,
            core,
            transport,
            incoming,
            view_tx,
            status_tx,
            catch_up: None,
            last_backfill_request: None,
            batch: batch.max(1),
        };
        driver.fence_writes();
        (driver, status_rx)
    }

    pub async fn run(mut self, mut shutdown: ShutdownSignal) {
        let mut ticker = tokio::time::interval(self.timings.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => self.on_tick().await,
                message = self.incoming.recv() => match message {
                    Some(message) => self.on_message(message).await,
                    None => break,
                },
                _ = self.core.appended() => self.stream_to_replicas(),
                _ = self.core.failed() => self.on_local_failure(),
            }
            self.publish_view();
        }

        self.roles.stop();
        self.publish_view();
        self.publish_status();
    }

    // =========================================================================
    // TIMER
    // =========================================================================

    async fn on_tick(&mut self) {
        let now = Instant::now();
        if let Some(change) = self.roles.tick(now) {
            self.on_role_change(change, now).await;
        }

        self.send_heartbeats();

        if self.roles.role() == Role::Master {
            let catch_up_done = self
                .catch_up
                .as_ref()
                .map(|c| c.pending.is_empty() || now >= c.deadline)
                .unwrap_or(false);
            if catch_up_done {
                self.finish_catch_up().await;
            }
            self.stream_to_replicas();
        }

        self.publish_status();
    }

    fn send_heartbeats(&self) {
        let Ok((last_sequence, last_epoch)) = self.core.position() else {
            return;
        };
        self.transport.broadcast(&PeerMessage::Heartbeat {
            from: self.node_id,
            role: self.roles.role(),
            current_master: self.roles.master(),
            epoch: self.roles.epoch(),
            last_sequence,
            last_epoch,
        });
    }

    // =========================================================================
    // PEER MESSAGES
    // =========================================================================

    async fn on_message(&mut self, message: PeerMessage) {
        let now = Instant::now();
        let from = message.from();
        if from == self.node_id || !self.peers.contains(&from) {
            return;
        }
        self.roles.observe_contact(from, now);

        match message {
            PeerMessage::Heartbeat {
                role,
                current_master,
                epoch,
                last_sequence,
                last_epoch,
                ..
            } => {
                let report = PeerReport {
                    role,
                    current_master,
                    epoch,
                    last_sequence,
                    last_epoch,
                };
                if let Some(change) = self.roles.observe_heartbeat(from, report, now) {
                    self.on_role_change(change, now).await;
                }
                if self.roles.view().accepts_writes() {
                    self.sync_replica(from, last_sequence, last_epoch);
                }
            }
            PeerMessage::Entries { epoch, entries, .. } => {
                if let Some(change) = self.roles.observe_master_claim(from, epoch, now) {
                    self.on_role_change(change, now).await;
                }
                if self.is_following(from, epoch) {
                    self.apply_from_master(from, entries, now).await;
                }
            }
            PeerMessage::Ack { sequence, .. } => {
                if self.roles.role() == Role::Master {
                    if let Err(e) = self.cursors.on_ack(from, sequence) {
                        Logger::trace(
                            Event::PeerFrameRejected,
                            &[("peer_id", &from.to_string()), ("error", &e.to_string())],
                        );
                    }
                }
            }
            PeerMessage::BackfillRequest {
                after_sequence,
                after_epoch,
                ..
            } => self.serve_backfill(from, after_sequence, after_epoch),
            PeerMessage::BackfillResponse { entries, .. } => {
                if self.is_catching_up_from(from) {
                    self.catch_up_entries(from, entries).await;
                } else if self.is_following(from, self.roles.epoch()) {
                    self.apply_from_master(from, entries, now).await;
                }
            }
            PeerMessage::Snapshot {
                epoch, snapshot, ..
            } => {
                if self.is_catching_up_from(from) {
                    self.catch_up_snapshot(from, snapshot).await;
                } else if self.is_following(from, epoch) {
                    self.install_from_master(from, snapshot).await;
                }
            }
        }
    }

    fn is_following(&self, master: NodeId, epoch: u64) -> bool {
        self.roles.role() == Role::Replica
            && self.roles.master() == Some(master)
            && self.roles.epoch() == epoch
    }

    fn is_catching_up_from(&self, peer: NodeId) -> bool {
        self.roles.role() == Role::Master
            && self
                .catch_up
                .as_ref()
                .map(|c| c.pending.contains(&peer))
                .unwrap_or(false)
    }

    // =========================================================================
    // REPLICA SIDE
    // =========================================================================

    async fn apply_from_master(&mut self, master: NodeId, entries: Vec<LogEntry>, now: Instant) {
        if entries.is_empty() {
            return;
        }
        let report = match self.core.apply_replicated(entries).await {
            Ok(report) => report,
            Err(e) => {
                Logger::error(Event::LogAppendFailed, &[("error", &e.to_string())]);
                return;
            }
        };

        if report.applied > 0 || report.duplicates > 0 {
            let _ = self.transport.send(
                master,
                PeerMessage::Ack {
                    from: self.node_id,
                    sequence: report.last_sequence,
                },
            );
        }

        let node = self.node_id.to_string();
        match report.stopped {
            None => {}
            Some(ApplyStop::Gap { expected, received }) => {
                Logger::info(
                    Event::ReplicaGap,
                    &[
                        ("node_id", &node),
                        ("expected", &expected.to_string()),
                        ("received", &received.to_string()),
                    ],
                );
                self.request_backfill(master, now);
            }
            Some(ApplyStop::Conflict { sequence }) => {
                Logger::warn(
                    Event::ReplicaDivergence,
                    &[("node_id", &node), ("sequence", &sequence.to_string())],
                );
                self.request_backfill(master, now);
            }
            Some(ApplyStop::Divergence { sequence, reason }) => {
                Logger::error(
                    Event::ReplicaDivergence,
                    &[
                        ("node_id", &node),
                        ("sequence", &sequence.to_string()),
                        ("reason", &reason),
                    ],
                );
                self.request_backfill(master, now);
            }
            Some(ApplyStop::Persistence(error)) => {
                Logger::error(
                    Event::LogAppendFailed,
                    &[("node_id", &node), ("error", &error)],
                );
            }
        }
    }

    /// Ask `peer` for everything after our last entry. At most once per
    /// heartbeat interval.
    fn request_backfill(&mut self, peer: NodeId, now: Instant) {
        if let Some(at) = self.last_backfill_request {
            if now.duration_since(at) < self.timings.heartbeat_interval {
                return;
            }
        }
        self.send_backfill_request(peer);
        self.last_backfill_request = Some(now);
    }

    fn send_backfill_request(&self, peer: NodeId) {
        let Ok((after_sequence, after_epoch)) = self.core.position() else {
            return;
        };
        Logger::info(
            Event::BackfillRequested,
            &[
                ("node_id", &self.node_id.to_string()),
                ("peer_id", &peer.to_string()),
                ("after_sequence", &after_sequence.to_string()),
            ],
        );
        let _ = self.transport.send(
            peer,
            PeerMessage::BackfillRequest {
                from: self.node_id,
                after_sequence,
                after_epoch,
            },
        );
    }

    async fn install_from_master(&mut self, master: NodeId, snapshot: StateSnapshot) {
        match self.core.install_snapshot(snapshot).await {
            Ok(()) => {
                if let Ok((sequence, _)) = self.core.position() {
                    let _ = self.transport.send(
                        master,
                        PeerMessage::Ack {
                            from: self.node_id,
                            sequence,
                        },
                    );
                }
                // Report the new position right away.
                self.send_heartbeats();
            }
            Err(e) => Logger::error(Event::SnapshotInstalled, &[("error", &e.to_string())]),
        }
    }

    // =========================================================================
    // SERVING PEERS
    // =========================================================================

    /// Answer a backfill request from any node.
    ///
    /// A requester at or past our position gets an empty response. A
    /// position we cannot serve from the log gets the full snapshot.
    fn serve_backfill(&mut self, peer: NodeId, after_sequence: u64, after_epoch: u64) {
        let Ok((last_sequence, last_epoch)) = self.core.position() else {
            return;
        };

        if (after_epoch, after_sequence) >= (last_epoch, last_sequence) {
            let _ = self.transport.send(
                peer,
                PeerMessage::BackfillResponse {
                    from: self.node_id,
                    entries: Vec::new(),
                },
            );
            return;
        }

        match self.core.entries_after(after_sequence, after_epoch, self.batch) {
            Ok(Some(entries)) => {
                Logger::trace(
                    Event::BackfillServed,
                    &[
                        ("peer_id", &peer.to_string()),
                        ("after_sequence", &after_sequence.to_string()),
                        ("count", &entries.len().to_string()),
                    ],
                );
                let _ = self.transport.send(
                    peer,
                    PeerMessage::BackfillResponse {
                        from: self.node_id,
                        entries,
                    },
                );
            }
            Ok(None) => self.send_snapshot(peer),
            Err(e) => Logger::error(Event::BackfillServed, &[("error", &e.to_string())]),
        }
    }

    fn send_snapshot(&mut self, peer: NodeId) {
        let snapshot = match self.core.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                Logger::error(Event::SnapshotSent, &[("error", &e.to_string())]);
                return;
            }
        };
        Logger::info(
            Event::SnapshotSent,
            &[
                ("node_id", &self.node_id.to_string()),
                ("peer_id", &peer.to_string()),
                ("last_sequence", &snapshot.last_sequence.to_string()),
            ],
        );
        let sent = self.transport.send(
            peer,
            PeerMessage::Snapshot {
                from: self.node_id,
                epoch: self.roles.epoch(),
                snapshot,
            },
        );
        if sent.is_ok() && self.roles.role() == Role::Master {
            self.cursors.mark_snapshot_sent(peer);
        }
    }

    // =========================================================================
    // MASTER SIDE
    // =========================================================================

    fn sync_replica(&mut self, peer: NodeId, last_sequence: u64, last_epoch: u64) {
        let decision = match self.core.read() {
            Ok(core) => self
                .cursors
                .on_heartbeat(peer, last_sequence, last_epoch, core.log()),
            Err(_) => return,
        };
        match decision {
            SyncDecision::Stream => self.stream_to(peer),
            SyncDecision::Snapshot => self.send_snapshot(peer),
            SyncDecision::Wait => {}
        }
    }

    fn stream_to_replicas(&mut self) {
        if !self.roles.view().accepts_writes() {
            return;
        }
        for peer in self.peers.clone() {
            self.stream_to(peer);
        }
    }

    /// Send the next batch after the peer's cursor.
    fn stream_to(&mut self, peer: NodeId) {
        let batch = {
            let Ok(core) = self.core.read() else {
                return;
            };
            let Some(after) = self.cursors.next_after(peer, core.last_sequence()) else {
                return;
            };
            core.log().entries_after(after, self.batch)
        };

        match batch {
            Ok(entries) => {
                let Some(through) = entries.last().map(|e| e.sequence) else {
                    return;
                };
                let sent = self.transport.send(
                    peer,
                    PeerMessage::Entries {
                        from: self.node_id,
                        epoch: self.roles.epoch(),
                        entries,
                    },
                );
                if sent.is_ok() {
                    self.cursors.mark_sent(peer, through);
                }
            }
            Err(e) if e.code() == WalErrorCode::NotRetained => self.send_snapshot(peer),
            Err(e) => Logger::error(Event::BackfillServed, &[("error", &e.to_string())]),
        }
    }

    // =========================================================================
    // PROMOTION
    // =========================================================================

    async fn on_role_change(&mut self, change: RoleChange, now: Instant) {
        self.fence_writes();
        let view = self.roles.view();
        Logger::info(
            Event::RoleTransition,
            &[
                ("node_id", &self.node_id.to_string()),
                ("role", view.role.as_str()),
                ("epoch", &view.epoch.to_string()),
                (
                    "master_id",
                    &view.master_id.map(|m| m.to_string()).unwrap_or_default(),
                ),
            ],
        );

        match change {
            RoleChange::Candidacy => {
                Logger::warn(
                    Event::MasterTimeout,
                    &[("node_id", &self.node_id.to_string())],
                );
            }
            RoleChange::Promoted { epoch } => {
                Logger::info(
                    Event::EpochAdvanced,
                    &[
                        ("node_id", &self.node_id.to_string()),
                        ("epoch", &epoch.to_string()),
                    ],
                );
                if !self.persist_epoch(epoch, self.node_id).await {
                    if self.roles.relinquish(now).is_some() {
                        self.stepped_down();
                    }
                    return;
                }
                self.start_catch_up(now).await;
            }
            RoleChange::Following { master, epoch } => {
                self.catch_up = None;
                self.cursors.reset();
                if epoch >= self.persisted_epoch {
                    self.persist_epoch(epoch, master).await;
                }
            }
            RoleChange::SteppedDown => self.stepped_down(),
        }
        self.publish_view();
    }

    fn stepped_down(&mut self) {
        self.fence_writes();
        self.catch_up = None;
        self.cursors.reset();
    }

    async fn persist_epoch(&mut self, epoch: u64, master: NodeId) -> bool {
        let node_dir = self.node_dir.clone();
        let marker = EpochMarker {
            epoch,
            master_id: Some(master),
        };
        let result =
            tokio::task::spawn_blocking(move || DurableMarker::new(&node_dir).write_atomic(&marker))
                .await;

        match result {
            Ok(Ok(())) => {
                self.persisted_epoch = epoch;
                true
            }
            Ok(Err(e)) => {
                Logger::error(
                    Event::EpochAdvanced,
                    &[("code", e.kind.code()), ("error", &e.message)],
                );
                false
            }
            Err(e) => {
                Logger::error(Event::EpochAdvanced, &[("error", &e.to_string())]);
                false
            }
        }
    }

    /// Pull whatever reachable peers have beyond our log before taking writes.
    async fn start_catch_up(&mut self, now: Instant) {
        self.cursors.reset();
        let pending: BTreeSet<NodeId> = self.roles.reachable_peers(now).into_iter().collect();
        Logger::info(
            Event::CatchUpStart,
            &[
                ("node_id", &self.node_id.to_string()),
                ("peers", &pending.len().to_string()),
            ],
        );

        for peer in &pending {
            self.send_backfill_request(*peer);
        }
        let empty = pending.is_empty();
        self.catch_up = Some(CatchUp {
            pending,
            deadline: now + self.timings.failure_timeout,
        });
        if empty {
            self.finish_catch_up().await;
        }
    }

    async fn catch_up_entries(&mut self, peer: NodeId, entries: Vec<LogEntry>) {
        let full_batch = entries.len() >= self.batch;
        if !entries.is_empty() {
            match self.core.apply_replicated(entries).await {
                Ok(report) if report.stopped.is_none() && full_batch => {
                    // More where that came from.
                    self.send_backfill_request(peer);
                    return;
                }
                Ok(_) => {}
                Err(e) => Logger::error(Event::LogAppendFailed, &[("error", &e.to_string())]),
            }
        }
        self.catch_up_peer_done(peer).await;
    }

    async fn catch_up_snapshot(&mut self, peer: NodeId, snapshot: StateSnapshot) {
        let Ok((last_sequence, last_epoch)) = self.core.position() else {
            return;
        };
        if (snapshot.last_epoch, snapshot.last_sequence) > (last_epoch, last_sequence) {
            match self.core.install_snapshot(snapshot).await {
                Ok(()) => {
                    // Others may still hold entries past the snapshot.
                    let others: Vec<NodeId> = self
                        .catch_up
                        .as_ref()
                        .map(|c| c.pending.iter().copied().filter(|p| *p != peer).collect())
                        .unwrap_or_default();
                    for other in others {
                        self.send_backfill_request(other);
                    }
                }
                Err(e) => Logger::error(Event::SnapshotInstalled, &[("error", &e.to_string())]),
            }
        }
        self.catch_up_peer_done(peer).await;
    }

    async fn catch_up_peer_done(&mut self, peer: NodeId) {
        let done = match self.catch_up.as_mut() {
            Some(catch_up) => {
                catch_up.pending.remove(&peer);
                catch_up.pending.is_empty()
            }
            None => false,
        };
        if done {
            self.finish_catch_up().await;
        }
    }

    /// Open the new epoch with ResetPresence and start taking writes.
    async fn finish_catch_up(&mut self) {
        if self.catch_up.take().is_none() || self.roles.role() != Role::Master {
            return;
        }

        let epoch = self.roles.epoch();
        match self
            .core
            .submit(epoch, Operation::ResetPresence, |_, _| ())
            .await
        {
            Ok(()) => {
                self.roles.mark_ready();
                let last_sequence = self.core.position().map(|(s, _)| s).unwrap_or(0);
                Logger::info(
                    Event::CatchUpComplete,
                    &[
                        ("node_id", &self.node_id.to_string()),
                        ("epoch", &epoch.to_string()),
                        ("last_sequence", &last_sequence.to_string()),
                    ],
                );
                self.publish_view();
            }
            Err(e) => {
                Logger::error(Event::LogAppendFailed, &[("error", &e.to_string())]);
                self.on_local_failure();
            }
        }
    }

    fn on_local_failure(&mut self) {
        let now = Instant::now();
        if self.roles.relinquish(now).is_some() {
            Logger::error(
                Event::RoleTransition,
                &[
                    ("node_id", &self.node_id.to_string()),
                    ("role", Role::Replica.as_str()),
                    ("reason", "local persistence failure"),
                ],
            );
            self.stepped_down();
            self.publish_view();
        }
    }

    // =========================================================================
    // PUBLICATION
    // =========================================================================

    /// Admit client writes only for the epoch this node is Master of.
    /// Runs before any view change becomes visible to the gateway.
    fn fence_writes(&self) {
        let view = self.roles.view();
        let epoch = (view.role == Role::Master).then_some(view.epoch);
        self.core.set_write_epoch(epoch);
    }

    fn publish_view(&self) {
        self.fence_writes();
        let view = self.roles.view();
        self.view_tx.send_if_modified(|current| {
            if current.version == view.version && *current == view {
                return false;
            }
            *current = view;
            true
        });
    }

    fn publish_status(&self) {
        let now = Instant::now();
        let reachable = self.roles.reachable_peers(now);
        let is_master = self.roles.role() == Role::Master;
        let (last_sequence, last_epoch) = self.core.position().unwrap_or((0, 0));

        let peers = self
            .peers
            .iter()
            .map(|id| {
                let report = self.roles.peer_report(*id);
                PeerStatus {
                    node_id: *id,
                    reachable: reachable.contains(id),
                    role: report.map(|r| r.role),
                    last_sequence: report.map(|r| r.last_sequence),
                    acked: if is_master {
                        self.cursors.get(*id).map(|c| c.acked)
                    } else {
                        None
                    },
                }
            })
            .collect();

        self.status_tx.send_replace(NodeStatus {
            view: self.roles.view(),
            last_sequence,
            last_epoch,
            peers,
        });
    }
}

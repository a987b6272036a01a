//! Role manager and failure detector
//!
//! Owns the node's role, the epoch it follows and the id of the current
//! Master. All mutation goes through the transition methods below; everyone
//! else reads the published `RoleView`.
//!
//! Time is passed in, never read, so the detector is fully deterministic
//! under test.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::state::Role;
use crate::cluster::NodeId;

/// What a peer last told us about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerReport {
    pub role: Role,
    pub current_master: Option<NodeId>,
    pub epoch: u64,
    pub last_sequence: u64,
    pub last_epoch: u64,
}

#[derive(Debug, Clone, Copy)]
struct PeerLiveness {
    last_seen: Option<Instant>,
    report: Option<PeerReport>,
}

/// Versioned snapshot of the role state, published to the gateway and the
/// replication channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleView {
    /// Bumped on every transition
    pub version: u64,
    pub node_id: NodeId,
    pub role: Role,
    pub master_id: Option<NodeId>,
    pub epoch: u64,
    /// Master has finished catching up and may accept writes
    pub ready: bool,
}

impl RoleView {
    pub fn accepts_writes(&self) -> bool {
        self.role == Role::Master && self.ready
    }
}

/// Transition the driver must act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleChange {
    /// Master timed out; now a Candidate
    Candidacy,
    /// This node is now Master of `epoch`; it must persist the epoch and
    /// catch up before marking itself ready
    Promoted { epoch: u64 },
    /// Now following `master` in `epoch`
    Following { master: NodeId, epoch: u64 },
    /// Gave up mastership after a local failure
    SteppedDown,
}

#[derive(Debug, Clone, Copy)]
pub struct RoleTimings {
    pub heartbeat_interval: Duration,
    /// Silence from the Master that starts candidacy
    pub failure_timeout: Duration,
}

impl RoleTimings {
    /// How long a Candidate announces itself before promoting.
    pub fn candidacy_wait(&self) -> Duration {
        self.heartbeat_interval * 2
    }
}

/// Initial role at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRole {
    Master,
    Replica,
}

pub struct RoleManager {
    node_id: NodeId,
    timings: RoleTimings,
    role: Role,
    epoch: u64,
    master: Option<NodeId>,
    ready: bool,
    version: u64,
    last_master_contact: Instant,
    candidate_since: Option<Instant>,
    peers: BTreeMap<NodeId, PeerLiveness>,
}

impl RoleManager {
    pub fn new(
        node_id: NodeId,
        peers: &[NodeId],
        timings: RoleTimings,
        start: StartRole,
        epoch: u64,
        master: Option<NodeId>,
        now: Instant,
    ) -> Self {
        let (role, master, ready) = match start {
            StartRole::Master => (Role::Master, Some(node_id), true),
            StartRole::Replica => (Role::Replica, master.filter(|m| *m != node_id), false),
        };

        let peers = peers
            .iter()
            .filter(|id| **id != node_id)
            .map(|id| {
                (
                    *id,
                    PeerLiveness {
                        last_seen: None,
                        report: None,
                    },
                )
            })
            .collect();

        Self {
            node_id,
            timings,
            role,
            epoch,
            master,
            ready,
            version: 1,
            last_master_contact: now,
            candidate_since: None,
            peers,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn master(&self) -> Option<NodeId> {
        self.master
    }

    pub fn view(&self) -> RoleView {
        RoleView {
            version: self.version,
            node_id: self.node_id,
            role: self.role,
            master_id: self.master,
            epoch: self.epoch,
            ready: self.ready,
        }
    }

    pub fn peer_report(&self, peer: NodeId) -> Option<PeerReport> {
        self.peers.get(&peer).and_then(|p| p.report)
    }

    /// Peers heard from within the failure timeout, in id order.
    pub fn reachable_peers(&self, now: Instant) -> Vec<NodeId> {
        self.peers
            .iter()
            .filter(|(_, p)| {
                p.last_seen
                    .map(|seen| now.duration_since(seen) < self.timings.failure_timeout)
                    .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Any message from a peer proves it is alive.
    pub fn observe_contact(&mut self, from: NodeId, now: Instant) {
        if let Some(peer) = self.peers.get_mut(&from) {
            peer.last_seen = Some(now);
        }
    }

    pub fn observe_heartbeat(
        &mut self,
        from: NodeId,
        report: PeerReport,
        now: Instant,
    ) -> Option<RoleChange> {
        match self.peers.get_mut(&from) {
            Some(peer) => {
                peer.last_seen = Some(now);
                peer.report = Some(report);
            }
            None => return None,
        }

        if report.role == Role::Master {
            self.observe_master_claim(from, report.epoch, now)
        } else {
            None
        }
    }

    /// A Master claim: heartbeat from a Master or a batch of entries.
    ///
    /// Higher epoch wins. Within one epoch the lower node id wins, so two
    /// nodes can never keep claiming the same epoch.
    pub fn observe_master_claim(
        &mut self,
        from: NodeId,
        epoch: u64,
        now: Instant,
    ) -> Option<RoleChange> {
        if self.role == Role::Stopped || from == self.node_id || !self.peers.contains_key(&from) {
            return None;
        }
        self.observe_contact(from, now);

        if epoch < self.epoch {
            return None;
        }
        if epoch == self.epoch {
            if let Some(current) = self.master {
                if current != from && current < from {
                    return None;
                }
            }
        }

        let changed = self.role != Role::Replica || self.master != Some(from) || self.epoch != epoch;

        self.role = self.role.follow().ok()?;
        self.master = Some(from);
        self.epoch = epoch;
        self.ready = false;
        self.candidate_since = None;
        self.last_master_contact = now;

        if changed {
            self.version += 1;
            Some(RoleChange::Following {
                master: from,
                epoch,
            })
        } else {
            None
        }
    }

    /// Evaluate timeouts.
    pub fn tick(&mut self, now: Instant) -> Option<RoleChange> {
        match self.role {
            Role::Replica => {
                if now.duration_since(self.last_master_contact) < self.timings.failure_timeout {
                    return None;
                }
                self.role = self.role.start_candidacy().ok()?;
                self.master = None;
                self.candidate_since = Some(now);
                self.version += 1;
                Some(RoleChange::Candidacy)
            }
            Role::Candidate => {
                let since = self.candidate_since.unwrap_or(now);
                if now.duration_since(since) < self.timings.candidacy_wait() {
                    return None;
                }

                let reachable = self.reachable_peers(now);
                let lower_candidate = reachable.iter().any(|id| {
                    *id < self.node_id
                        && self
                            .peer_report(*id)
                            .map(|r| r.role == Role::Candidate)
                            .unwrap_or(false)
                });
                if lower_candidate {
                    return None;
                }

                // Promoted epochs start at 2 so they never collide with the
                // configured Master's first epoch.
                let highest_seen = reachable
                    .iter()
                    .filter_map(|id| self.peer_report(*id))
                    .map(|r| r.epoch)
                    .fold(self.epoch, u64::max);
                let epoch = highest_seen.max(1) + 1;

                self.role = self.role.promote().ok()?;
                self.master = Some(self.node_id);
                self.epoch = epoch;
                self.ready = false;
                self.candidate_since = None;
                self.version += 1;
                Some(RoleChange::Promoted { epoch })
            }
            Role::Master | Role::Stopped => None,
        }
    }

    /// Master finished catching up.
    pub fn mark_ready(&mut self) {
        if self.role == Role::Master && !self.ready {
            self.ready = true;
            self.version += 1;
        }
    }

    /// Give up mastership after a local failure. The cluster re-elects
    /// through the normal timeout path.
    pub fn relinquish(&mut self, now: Instant) -> Option<RoleChange> {
        if self.role != Role::Master {
            return None;
        }
        self.role = self.role.follow().ok()?;
        self.master = None;
        self.ready = false;
        self.last_master_contact = now;
        self.version += 1;
        Some(RoleChange::SteppedDown)
    }

    pub fn stop(&mut self) {
        if self.role != Role::Stopped {
            self.role = self.role.stop();
            self.ready = false;
            self.version += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(100);

    fn timings() -> RoleTimings {
        RoleTimings {
            heartbeat_interval: INTERVAL,
            failure_timeout: INTERVAL * 3,
        }
    }

    fn replica(node_id: NodeId, now: Instant) -> RoleManager {
        RoleManager::new(node_id, &[1, 2, 3], timings(), StartRole::Replica, 1, Some(1), now)
    }

    fn report(role: Role, epoch: u64) -> PeerReport {
        PeerReport {
            role,
            current_master: None,
            epoch,
            last_sequence: 0,
            last_epoch: 0,
        }
    }

    #[test]
    fn test_master_start() {
        let now = Instant::now();
        let m = RoleManager::new(1, &[1, 2, 3], timings(), StartRole::Master, 1, None, now);
        let view = m.view();
        assert_eq!(view.role, Role::Master);
        assert_eq!(view.master_id, Some(1));
        assert!(view.accepts_writes());
    }

    #[test]
    fn test_heartbeats_keep_replica_following() {
        let t0 = Instant::now();
        let mut m = replica(2, t0);
        for i in 1..10 {
            let now = t0 + INTERVAL * i;
            m.observe_heartbeat(1, report(Role::Master, 1), now);
            assert_eq!(m.tick(now), None);
        }
        assert_eq!(m.role(), Role::Replica);
    }

    #[test]
    fn test_missed_heartbeats_start_candidacy() {
        let t0 = Instant::now();
        let mut m = replica(2, t0);
        assert_eq!(m.tick(t0 + INTERVAL * 2), None);
        assert_eq!(m.tick(t0 + INTERVAL * 3), Some(RoleChange::Candidacy));
        assert_eq!(m.role(), Role::Candidate);
        assert_eq!(m.master(), None);
    }

    #[test]
    fn test_lowest_candidate_promotes_after_wait() {
        let t0 = Instant::now();
        let mut m2 = replica(2, t0);
        let timeout = t0 + INTERVAL * 3;
        m2.tick(timeout);
        m2.observe_heartbeat(3, report(Role::Candidate, 1), timeout);

        assert_eq!(m2.tick(timeout + INTERVAL), None);
        let change = m2.tick(timeout + INTERVAL * 2);
        assert_eq!(change, Some(RoleChange::Promoted { epoch: 2 }));
        assert_eq!(m2.role(), Role::Master);
        assert!(!m2.view().accepts_writes());

        m2.mark_ready();
        assert!(m2.view().accepts_writes());
    }

    #[test]
    fn test_higher_candidate_defers_to_lower() {
        let t0 = Instant::now();
        let mut m3 = replica(3, t0);
        let timeout = t0 + INTERVAL * 3;
        m3.tick(timeout);

        for i in 0..5 {
            let now = timeout + INTERVAL * i;
            m3.observe_heartbeat(2, report(Role::Candidate, 1), now);
            assert_eq!(m3.tick(now), None);
        }
        assert_eq!(m3.role(), Role::Candidate);

        // Node 2 promotes and claims epoch 2
        let now = timeout + INTERVAL * 6;
        let change = m3.observe_heartbeat(2, report(Role::Master, 2), now);
        assert_eq!(change, Some(RoleChange::Following { master: 2, epoch: 2 }));
        assert_eq!(m3.role(), Role::Replica);
    }

    #[test]
    fn test_dead_lower_candidate_is_ignored_after_timeout() {
        let t0 = Instant::now();
        let mut m3 = replica(3, t0);
        let timeout = t0 + INTERVAL * 3;
        m3.tick(timeout);
        m3.observe_heartbeat(2, report(Role::Candidate, 1), timeout);

        // Node 2 goes silent as well
        let later = timeout + INTERVAL * 4;
        assert_eq!(m3.tick(later), Some(RoleChange::Promoted { epoch: 2 }));
    }

    #[test]
    fn test_promoted_epoch_exceeds_any_seen() {
        let t0 = Instant::now();
        let mut m2 = replica(2, t0);
        m2.observe_heartbeat(3, report(Role::Replica, 5), t0);
        let timeout = t0 + INTERVAL * 3;
        m2.tick(timeout);
        m2.observe_heartbeat(3, report(Role::Candidate, 5), timeout);
        assert_eq!(
            m2.tick(timeout + INTERVAL * 2),
            Some(RoleChange::Promoted { epoch: 6 })
        );
    }

    #[test]
    fn test_stale_master_claim_ignored() {
        let t0 = Instant::now();
        let mut m = RoleManager::new(2, &[1, 2, 3], timings(), StartRole::Replica, 4, Some(3), t0);
        assert_eq!(m.observe_heartbeat(1, report(Role::Master, 3), t0), None);
        assert_eq!(m.master(), Some(3));
    }

    #[test]
    fn test_master_steps_down_for_higher_epoch() {
        let t0 = Instant::now();
        let mut m = RoleManager::new(1, &[1, 2, 3], timings(), StartRole::Master, 1, None, t0);
        let change = m.observe_heartbeat(2, report(Role::Master, 2), t0);
        assert_eq!(change, Some(RoleChange::Following { master: 2, epoch: 2 }));
        assert_eq!(m.role(), Role::Replica);
    }

    #[test]
    fn test_equal_epoch_conflict_resolved_by_id() {
        let t0 = Instant::now();
        let mut m1 = RoleManager::new(1, &[1, 2, 3], timings(), StartRole::Master, 2, None, t0);
        assert_eq!(m1.observe_heartbeat(2, report(Role::Master, 2), t0), None);
        assert_eq!(m1.role(), Role::Master);

        let mut m2 = RoleManager::new(2, &[1, 2, 3], timings(), StartRole::Master, 2, None, t0);
        assert!(m2.observe_heartbeat(1, report(Role::Master, 2), t0).is_some());
        assert_eq!(m2.role(), Role::Replica);
    }

    #[test]
    fn test_relinquish_then_reelect() {
        let t0 = Instant::now();
        let mut m = RoleManager::new(1, &[1, 2, 3], timings(), StartRole::Master, 1, None, t0);
        assert_eq!(m.relinquish(t0), Some(RoleChange::SteppedDown));
        assert_eq!(m.role(), Role::Replica);
        assert_eq!(m.tick(t0 + INTERVAL * 3), Some(RoleChange::Candidacy));
    }

    #[test]
    fn test_version_bumps_on_transition() {
        let t0 = Instant::now();
        let mut m = replica(2, t0);
        let before = m.view().version;
        m.tick(t0 + INTERVAL * 3);
        assert!(m.view().version > before);
    }

    #[test]
    fn test_stopped_ignores_everything() {
        let t0 = Instant::now();
        let mut m = replica(2, t0);
        m.stop();
        assert_eq!(m.observe_heartbeat(1, report(Role::Master, 9), t0), None);
        assert_eq!(m.tick(t0 + INTERVAL * 10), None);
        assert_eq!(m.role(), Role::Stopped);
    }
}

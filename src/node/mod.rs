//! Node assembly
//!
//! Wires one cluster member together and runs it:
//!
//! 1. Recover state from the local log and snapshot
//! 2. Decide the start role from the durable epoch marker
//! 3. Bind the client, peer and admin listeners
//! 4. Spawn the replication driver
//!
//! A node that restarts with any history always comes back as a Replica and
//! rejoins whichever Master the cluster has.

mod admin;
mod core;
mod driver;
mod errors;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use self::admin::{admin_routes, AdminServer, AdminState, HealthResponse};
pub use self::core::{ApplyReport, ApplyStop, ChatCore, CoreError, CoreResult, NodeCore};
pub use self::driver::{Driver, NodeStatus, PeerStatus};
pub use self::errors::{NodeError, NodeResult};

use crate::cluster::{ClusterConfig, ClusterView, NodeId};
use crate::gateway::{ClientServer, Gateway, JsonCodec};
use crate::observability::{Event, Logger};
use crate::recovery::{Recovered, RecoveryManager};
use crate::replication::{PeerAddress, Transport, TransportConfig};
use crate::role::{
    DurableMarker, EpochMarker, RoleManager, RoleTimings, RoleView, StartRole,
};
use crate::shutdown::{shutdown_channel, ShutdownTrigger};

/// Running node.
pub struct NodeHandle {
    node_id: NodeId,
    client_addr: SocketAddr,
    admin_addr: SocketAddr,
    peer_addr: SocketAddr,
    core: Arc<NodeCore>,
    roles: watch::Receiver<RoleView>,
    status: watch::Receiver<NodeStatus>,
    trigger: ShutdownTrigger,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn admin_addr(&self) -> SocketAddr {
        self.admin_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn core(&self) -> &Arc<NodeCore> {
        &self.core
    }

    pub fn role_view(&self) -> RoleView {
        self.roles.borrow().clone()
    }

    pub fn roles(&self) -> watch::Receiver<RoleView> {
        self.roles.clone()
    }

    pub fn status(&self) -> NodeStatus {
        self.status.borrow().clone()
    }

    /// Stop every task and wait for them to exit.
    pub async fn shutdown(self) {
        self.trigger.trigger();
        for task in self.tasks {
            let _ = task.await;
        }
        Logger::info(
            Event::NodeShutdown,
            &[("node_id", &self.node_id.to_string())],
        );
    }
}

pub struct Node;

impl Node {
    pub async fn start(config: &ClusterConfig, node_id: NodeId) -> NodeResult<NodeHandle> {
        let view = ClusterView::new(config, node_id).ok_or(NodeError::UnknownNode(node_id))?;
        let local = view
            .local()
            .cloned()
            .ok_or(NodeError::UnknownNode(node_id))?;
        let node = node_id.to_string();
        Logger::info(Event::NodeStart, &[("node_id", &node)]);

        let node_dir = config.node_dir(node_id);
        std::fs::create_dir_all(&node_dir).map_err(|source| NodeError::DataDir {
            path: node_dir.clone(),
            source,
        })?;

        let recovered = recover(&node, &node_dir)?;

        let marker = DurableMarker::new(&node_dir);
        let previous = marker.read()?;
        let (start, epoch, master) = start_role(config, node_id, &recovered, previous);
        if start == StartRole::Master {
            marker.write_atomic(&EpochMarker {
                epoch,
                master_id: Some(node_id),
            })?;
        }

        let core = NodeCore::new(ChatCore::new(
            recovered,
            &node_dir,
            config.compact_after_entries,
        ));

        let timings = RoleTimings {
            heartbeat_interval: config.heartbeat_interval(),
            failure_timeout: config.failure_timeout(),
        };
        let peer_ids = view.peer_ids();
        let roles = RoleManager::new(
            node_id,
            &peer_ids,
            timings,
            start,
            epoch,
            master,
            Instant::now(),
        );
        let (view_tx, view_rx) = watch::channel(roles.view());

        // Bind everything before spawning anything.
        let view = Arc::new(view);
        let gateway = Arc::new(Gateway::new(
            Arc::clone(&core),
            view_rx.clone(),
            Arc::clone(&view),
            config.password_policy(),
            config.message_order,
        ));
        let client_bind = local.client_addr();
        let client = ClientServer::bind(node_id, &client_bind, gateway, Arc::new(JsonCodec))
            .await
            .map_err(|source| NodeError::Bind {
                addr: client_bind.clone(),
                source,
            })?;
        let client_addr = client.local_addr().map_err(|source| NodeError::Bind {
            addr: client_bind,
            source,
        })?;

        let (trigger, signal) = shutdown_channel();

        let (transport, incoming) = Transport::new(TransportConfig {
            node_id,
            listen_addr: local.peer_addr(),
            peers: view
                .peers()
                .map(|peer| PeerAddress {
                    node_id: peer.node_id,
                    addr: peer.peer_addr(),
                })
                .collect(),
        });
        let (transport, mut tasks) = transport.start(signal.clone()).await?;
        let peer_addr = transport.local_addr();

        let (driver, status_rx) = Driver::new(
            roles,
            timings,
            node_dir,
            Arc::clone(&core),
            transport,
            incoming,
            view_tx,
            config.backfill_batch,
        );

        let admin_bind = local.admin_addr();
        let admin = match AdminServer::bind(&admin_bind, status_rx.clone()).await {
            Ok(admin) => admin,
            Err(source) => {
                trigger.trigger();
                return Err(NodeError::Bind {
                    addr: admin_bind,
                    source,
                });
            }
        };
        let admin_addr = match admin.local_addr() {
            Ok(addr) => addr,
            Err(source) => {
                trigger.trigger();
                return Err(NodeError::Bind {
                    addr: admin_bind,
                    source,
                });
            }
        };

        tasks.push(tokio::spawn(driver.run(signal.clone())));
        tasks.push(tokio::spawn(client.run(signal.clone())));
        tasks.push(tokio::spawn(admin.run(signal)));

        let role_view = view_rx.borrow().clone();
        Logger::info(
            Event::NodeServing,
            &[
                ("node_id", &node),
                ("role", role_view.role.as_str()),
                ("epoch", &role_view.epoch.to_string()),
                ("client_addr", &client_addr.to_string()),
                ("peer_addr", &peer_addr.to_string()),
                ("admin_addr", &admin_addr.to_string()),
            ],
        );

        Ok(NodeHandle {
            node_id,
            client_addr,
            admin_addr,
            peer_addr,
            core,
            roles: view_rx,
            status: status_rx,
            trigger,
            tasks,
        })
    }
}

fn recover(node: &str, node_dir: &std::path::Path) -> NodeResult<Recovered> {
    Logger::info(
        Event::RecoveryStart,
        &[("node_id", node), ("dir", &node_dir.display().to_string())],
    );

    match RecoveryManager::new(node_dir).recover() {
        Ok(recovered) => {
            if recovered.truncated_tail {
                Logger::warn(Event::LogTornTail, &[("node_id", node)]);
            }
            Logger::info(
                Event::RecoveryComplete,
                &[
                    ("node_id", node),
                    (
                        "entries_replayed",
                        &recovered.stats.entries_replayed.to_string(),
                    ),
                    ("last_sequence", &recovered.log.last_sequence().to_string()),
                    ("last_epoch", &recovered.log.last_epoch().to_string()),
                ],
            );
            Ok(recovered)
        }
        Err(e) => {
            Logger::fatal(
                Event::RecoveryFailed,
                &[("node_id", node), ("error", &e.to_string())],
            );
            Err(e.into())
        }
    }
}

/// Start role, epoch and expected Master.
///
/// - any durable history: Replica of the Master recorded in the marker
/// - fresh configured Master: Master of epoch 1
/// - fresh other node: Replica of the configured Master, epoch 0
fn start_role(
    config: &ClusterConfig,
    node_id: NodeId,
    recovered: &Recovered,
    marker: Option<EpochMarker>,
) -> (StartRole, u64, Option<NodeId>) {
    if recovered.has_prior_state() || marker.is_some() {
        let epoch = marker
            .map(|m| m.epoch)
            .unwrap_or(0)
            .max(recovered.log.last_epoch());
        let master = marker.and_then(|m| m.master_id);
        return (StartRole::Replica, epoch, master);
    }

    if node_id == config.initial_master {
        (StartRole::Master, 1, Some(node_id))
    } else {
        (StartRole::Replica, 0, Some(config.initial_master))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Operation;
    use tempfile::TempDir;

    fn recovered(dir: &std::path::Path) -> Recovered {
        RecoveryManager::new(dir).recover().unwrap()
    }

    #[test]
    fn test_fresh_initial_master_starts_as_master() {
        let temp = TempDir::new().unwrap();
        let config = ClusterConfig::sample(temp.path());
        let r = recovered(temp.path());
        assert_eq!(
            start_role(&config, 1, &r, None),
            (StartRole::Master, 1, Some(1))
        );
    }

    #[test]
    fn test_fresh_replica_follows_initial_master() {
        let temp = TempDir::new().unwrap();
        let config = ClusterConfig::sample(temp.path());
        let r = recovered(temp.path());
        assert_eq!(
            start_role(&config, 3, &r, None),
            (StartRole::Replica, 0, Some(1))
        );
    }

    #[test]
    fn test_restarted_master_rejoins_as_replica() {
        let temp = TempDir::new().unwrap();
        let config = ClusterConfig::sample(temp.path());
        let r = recovered(temp.path());
        let marker = EpochMarker {
            epoch: 3,
            master_id: Some(1),
        };
        assert_eq!(
            start_role(&config, 1, &r, Some(marker)),
            (StartRole::Replica, 3, Some(1))
        );
    }

    #[test]
    fn test_history_without_marker_is_replica() {
        let temp = TempDir::new().unwrap();
        let config = ClusterConfig::sample(temp.path());
        {
            let mut log = crate::wal::ReplicationLog::open(temp.path()).unwrap().log;
            let mut state = crate::state::ChatState::new();
            let op = Operation::CreateAccount {
                username: "alice".into(),
                password_hash: "h".into(),
            };
            let outcome = state.apply(&op).unwrap();
            log.append(2, op, outcome).unwrap();
        }
        let r = recovered(temp.path());
        assert_eq!(start_role(&config, 1, &r, None), (StartRole::Replica, 2, None));
    }
}

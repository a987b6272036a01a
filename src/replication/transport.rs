//! TCP transport between nodes
//!
//! Every node dials one outbound connection per peer and only writes to it.
//! Inbound connections are only read. A reply therefore travels on the
//! replier's own outbound link.
//!
//! Outbound links connect lazily and reconnect with exponential backoff.
//! Any frame received from a peer cuts that peer's backoff short, so a
//! restarted node hears from the cluster within one heartbeat. Messages
//! that cannot be delivered are dropped; the heartbeat-driven cursors
//! resend whatever a replica is missing.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use super::codec::{read_frame, write_frame};
use super::message::PeerMessage;
use crate::cluster::NodeId;
use crate::observability::{Event, Logger};
use crate::shutdown::ShutdownSignal;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const INITIAL_BACKOFF_MS: u64 = 50;
const MAX_BACKOFF_MS: u64 = 2_000;
const MAX_PENDING_MESSAGES: usize = 1024;
const INCOMING_CAPACITY: usize = 4096;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind to {addr}: {source}")]
    BindFailed { addr: String, source: io::Error },

    #[error("failed to connect to node {node_id} at {addr}: {source}")]
    ConnectFailed {
        node_id: NodeId,
        addr: String,
        source: io::Error,
    },

    #[error("unknown peer: {0}")]
    UnknownPeer(NodeId),

    #[error("send queue full for peer {0}")]
    QueueFull(NodeId),

    #[error("transport is shut down")]
    Shutdown,
}

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Clone)]
pub struct PeerAddress {
    pub node_id: NodeId,
    pub addr: String,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub node_id: NodeId,
    pub listen_addr: String,
    pub peers: Vec<PeerAddress>,
}

/// Cheap, cloneable handle for sending to peers.
#[derive(Clone)]
pub struct TransportHandle {
    node_id: NodeId,
    local_addr: SocketAddr,
    peers: Arc<HashMap<NodeId, mpsc::Sender<PeerMessage>>>,
}

impl TransportHandle {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Address the peer listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.peers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Queue a message for one peer. Never blocks.
    pub fn send(&self, to: NodeId, message: PeerMessage) -> TransportResult<()> {
        let sender = self.peers.get(&to).ok_or(TransportError::UnknownPeer(to))?;
        sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull(to),
            mpsc::error::TrySendError::Closed(_) => TransportError::Shutdown,
        })
    }

    /// Queue a message for every peer; undeliverable copies are dropped.
    pub fn broadcast(&self, message: &PeerMessage) {
        for id in self.peers.keys() {
            let _ = self.send(*id, message.clone());
        }
    }
}

pub struct Transport {
    config: TransportConfig,
    incoming_tx: mpsc::Sender<PeerMessage>,
}

impl Transport {
    /// Returns the transport and the stream of messages received from peers.
    pub fn new(config: TransportConfig) -> (Self, mpsc::Receiver<PeerMessage>) {
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_CAPACITY);
        (
            Self {
                config,
                incoming_tx,
            },
            incoming_rx,
        )
    }

    /// Bind the peer listener and spawn the accept and sender loops.
    pub async fn start(
        self,
        shutdown: ShutdownSignal,
    ) -> TransportResult<(TransportHandle, Vec<JoinHandle<()>>)> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|e| TransportError::BindFailed {
                addr: self.config.listen_addr.clone(),
                source: e,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::BindFailed {
                addr: self.config.listen_addr.clone(),
                source: e,
            })?;

        let node_id = self.config.node_id;
        let peer_list: Vec<PeerAddress> = self
            .config
            .peers
            .into_iter()
            .filter(|p| p.node_id != node_id)
            .collect();
        let wake: Arc<HashMap<NodeId, Arc<Notify>>> = Arc::new(
            peer_list
                .iter()
                .map(|p| (p.node_id, Arc::new(Notify::new())))
                .collect(),
        );

        let mut tasks = Vec::with_capacity(peer_list.len() + 1);
        tasks.push(tokio::spawn(accept_loop(
            node_id,
            listener,
            self.incoming_tx,
            Arc::clone(&wake),
            shutdown.clone(),
        )));

        let mut peers = HashMap::new();
        for peer in peer_list {
            let (tx, rx) = mpsc::channel(MAX_PENDING_MESSAGES);
            peers.insert(peer.node_id, tx);
            let woken = wake
                .get(&peer.node_id)
                .cloned()
                .unwrap_or_else(|| Arc::new(Notify::new()));
            tasks.push(tokio::spawn(sender_loop(
                node_id,
                peer,
                rx,
                woken,
                shutdown.clone(),
            )));
        }

        Ok((
            TransportHandle {
                node_id,
                local_addr,
                peers: Arc::new(peers),
            },
            tasks,
        ))
    }
}

async fn accept_loop(
    node_id: NodeId,
    listener: TcpListener,
    incoming_tx: mpsc::Sender<PeerMessage>,
    wake: Arc<HashMap<NodeId, Arc<Notify>>>,
    mut shutdown: ShutdownSignal,
) {
    let node = node_id.to_string();
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    let _ = stream.set_nodelay(true);
                    tokio::spawn(receive_loop(
                        node_id,
                        stream,
                        remote,
                        incoming_tx.clone(),
                        Arc::clone(&wake),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    Logger::warn(
                        Event::PeerDisconnected,
                        &[("node_id", &node), ("error", &e.to_string())],
                    );
                }
            },
        }
    }
}

async fn receive_loop(
    node_id: NodeId,
    mut stream: TcpStream,
    remote: SocketAddr,
    incoming_tx: mpsc::Sender<PeerMessage>,
    wake: Arc<HashMap<NodeId, Arc<Notify>>>,
    mut shutdown: ShutdownSignal,
) {
    let node = node_id.to_string();
    let remote = remote.to_string();
    loop {
        let frame = tokio::select! {
            _ = shutdown.wait() => return,
            frame = read_frame(&mut stream) => frame,
        };

        match frame {
            Ok(Some(Ok(message))) => {
                if let Some(peer) = wake.get(&message.from()) {
                    peer.notify_one();
                }
                if incoming_tx.send(message).await.is_err() {
                    return;
                }
            }
            Ok(Some(Err(e))) => {
                // Framing is lost after a bad frame; drop the connection.
                Logger::warn(
                    Event::PeerFrameRejected,
                    &[
                        ("node_id", &node),
                        ("remote", &remote),
                        ("code", e.code()),
                        ("error", &e.message),
                    ],
                );
                return;
            }
            Ok(None) => return,
            Err(e) => {
                Logger::trace(
                    Event::PeerDisconnected,
                    &[("node_id", &node), ("remote", &remote), ("error", &e.to_string())],
                );
                return;
            }
        }
    }
}

async fn sender_loop(
    node_id: NodeId,
    peer: PeerAddress,
    mut rx: mpsc::Receiver<PeerMessage>,
    woken: Arc<Notify>,
    mut shutdown: ShutdownSignal,
) {
    let node = node_id.to_string();
    let peer_id = peer.node_id.to_string();
    let mut stream: Option<TcpStream> = None;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        let message = tokio::select! {
            _ = shutdown.wait() => return,
            message = rx.recv() => match message {
                Some(message) => message,
                None => return,
            },
        };

        if stream.is_none() {
            match connect(peer.node_id, &peer.addr).await {
                Ok(s) => {
                    stream = Some(s);
                    backoff_ms = INITIAL_BACKOFF_MS;
                    Logger::info(
                        Event::PeerConnected,
                        &[("node_id", &node), ("peer_id", &peer_id), ("addr", &peer.addr)],
                    );
                }
                Err(e) => {
                    Logger::trace(
                        Event::PeerDisconnected,
                        &[("node_id", &node), ("peer_id", &peer_id), ("error", &e.to_string())],
                    );
                    tokio::select! {
                        _ = shutdown.wait() => return,
                        _ = woken.notified() => {
                            backoff_ms = INITIAL_BACKOFF_MS;
                            continue;
                        }
                        _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
                    }
                    backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
                    continue;
                }
            }
        }

        if let Some(s) = stream.as_mut() {
            if let Err(e) = write_frame(s, &message).await {
                Logger::warn(
                    Event::PeerDisconnected,
                    &[
                        ("node_id", &node),
                        ("peer_id", &peer_id),
                        ("message", message.kind()),
                        ("error", &e.to_string()),
                    ],
                );
                stream = None;
            }
        }
    }
}

async fn connect(node_id: NodeId, addr: &str) -> TransportResult<TcpStream> {
    let failed = |source: io::Error| TransportError::ConnectFailed {
        node_id,
        addr: addr.to_string(),
        source,
    };

    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true).map_err(failed)?;
            Ok(stream)
        }
        Ok(Err(e)) => Err(failed(e)),
        Err(_) => Err(failed(io::Error::new(
            io::ErrorKind::TimedOut,
            "connection timed out",
        ))),
    }
}

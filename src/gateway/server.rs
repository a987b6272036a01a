//! Client listener
//!
//! One task per connection. Frames are newline-delimited; the codec turns
//! each line into a `Request` and each `Reply` back into a line. A frame
//! longer than [`MAX_REQUEST_LEN`] gets a `Malformed` reply and the
//! connection is closed.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};

use super::codec::{WireCodec, MAX_REQUEST_LEN};
use super::errors::GatewayError;
use super::handler::Gateway;
use super::request::Reply;
use super::session::Session;
use crate::cluster::NodeId;
use crate::observability::{Event, Logger};
use crate::shutdown::ShutdownSignal;

pub struct ClientServer {
    node_id: NodeId,
    listener: TcpListener,
    gateway: Arc<Gateway>,
    codec: Arc<dyn WireCodec>,
}

impl ClientServer {
    pub async fn bind(
        node_id: NodeId,
        addr: &str,
        gateway: Arc<Gateway>,
        codec: Arc<dyn WireCodec>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            node_id,
            listener,
            gateway,
            codec,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, mut shutdown: ShutdownSignal) {
        let node = self.node_id.to_string();
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let gateway = Arc::clone(&self.gateway);
                        let codec = Arc::clone(&self.codec);
                        tokio::spawn(serve_connection(
                            self.node_id,
                            stream,
                            remote,
                            gateway,
                            codec,
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => Logger::warn(
                        Event::ClientRejected,
                        &[("node_id", &node), ("error", &e.to_string())],
                    ),
                },
            }
        }
    }
}

async fn serve_connection(
    node_id: NodeId,
    stream: TcpStream,
    remote: SocketAddr,
    gateway: Arc<Gateway>,
    codec: Arc<dyn WireCodec>,
    mut shutdown: ShutdownSignal,
) {
    let node = node_id.to_string();
    let remote_str = remote.to_string();
    let mut session = Session::new(Some(remote));
    let session_id = session.id.to_string();
    Logger::info(
        Event::ClientConnected,
        &[("node_id", &node), ("remote", &remote_str), ("session", &session_id)],
    );

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        // One byte over the limit tells a full frame from an oversized one.
        let mut bounded = (&mut reader).take((MAX_REQUEST_LEN + 1) as u64);
        let read = tokio::select! {
            _ = shutdown.wait() => break,
            read = bounded.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let terminated = buf.last() == Some(&b'\n');
        if terminated {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        } else if buf.len() > MAX_REQUEST_LEN {
            Logger::warn(
                Event::ClientRejected,
                &[
                    ("session", &session_id),
                    ("error", "request too large"),
                ],
            );
            let err = GatewayError::Malformed(format!(
                "request exceeds {} bytes",
                MAX_REQUEST_LEN
            ));
            let _ = write_reply(&mut writer, codec.as_ref(), &Reply::failure(&err)).await;
            break;
        }
        if buf.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let reply = match codec.decode(&buf) {
            Ok(request) => {
                Logger::trace(
                    Event::ClientRequest,
                    &[("session", &session_id), ("request", request.kind())],
                );
                gateway.handle(&mut session, request).await
            }
            Err(e) => Reply::failure(&e),
        };
        if !reply.success {
            Logger::trace(
                Event::ClientRejected,
                &[
                    ("session", &session_id),
                    ("error", reply.error.as_deref().unwrap_or("")),
                ],
            );
        }

        if write_reply(&mut writer, codec.as_ref(), &reply).await.is_err() {
            break;
        }
    }

    gateway.disconnect(&mut session).await;
    Logger::info(
        Event::ClientDisconnected,
        &[("node_id", &node), ("remote", &remote_str), ("session", &session_id)],
    );
}

async fn write_reply(
    writer: &mut OwnedWriteHalf,
    codec: &dyn WireCodec,
    reply: &Reply,
) -> std::io::Result<()> {
    let mut frame = codec.encode(reply);
    frame.push(b'\n');
    writer.write_all(&frame).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterConfig, ClusterView};
    use crate::gateway::JsonCodec;
    use crate::node::{ChatCore, NodeCore};
    use crate::recovery::RecoveryManager;
    use crate::role::{Role, RoleView};
    use crate::shutdown::shutdown_channel;
    use crate::state::{MessageOrder, PasswordPolicy};
    use serde_json::Value;
    use tempfile::TempDir;
    use tokio::sync::watch;

    async fn serve(temp: &TempDir) -> (SocketAddr, crate::shutdown::ShutdownTrigger) {
        let recovered = RecoveryManager::new(temp.path()).recover().unwrap();
        let core = NodeCore::new(ChatCore::new(recovered, temp.path(), 1000));
        core.set_write_epoch(Some(1));
        let (_tx, rx) = watch::channel(RoleView {
            version: 1,
            node_id: 1,
            role: Role::Master,
            master_id: Some(1),
            epoch: 1,
            ready: true,
        });
        let cluster = ClusterView::new(&ClusterConfig::sample("./data"), 1).unwrap();
        let gateway = Arc::new(Gateway::new(
            core,
            rx,
            Arc::new(cluster),
            PasswordPolicy::default(),
            MessageOrder::OldestFirst,
        ));

        let server = ClientServer::bind(1, "127.0.0.1:0", gateway, Arc::new(JsonCodec))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (trigger, signal) = shutdown_channel();
        tokio::spawn(server.run(signal));
        (addr, trigger)
    }

    #[tokio::test]
    async fn test_serves_newline_delimited_requests() {
        let temp = TempDir::new().unwrap();
        let (addr, trigger) = serve(&temp).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        write
            .write_all(b"\n{\"command\":\"list_accounts\",\"pattern\":\"\"}\r\n")
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["success"], true);

        trigger.trigger();
    }

    #[tokio::test]
    async fn test_oversized_request_closes_connection() {
        let temp = TempDir::new().unwrap();
        let (addr, trigger) = serve(&temp).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        // No newline, one byte over the limit.
        write.write_all(&vec![b'a'; MAX_REQUEST_LEN + 1]).await.unwrap();

        let reply: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["success"], false);
        assert_eq!(reply["error"], "Malformed");
        assert!(lines.next_line().await.unwrap().is_none());

        trigger.trigger();
    }
}

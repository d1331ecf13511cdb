use async_trait::async_trait;
use log::{debug, error, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep, timeout};

use crate::core::TransportConfig;
use crate::core::protocol::{Message, Payload, Reply, Request};
use crate::network::Transport;
use crate::utils::{P2PError, Result};

/// Server side of the RPC surface. The directory and the peer node each
/// implement this for the operations they answer.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> Result<Reply>;
}

/// Blocking-style request/reply client. One connection per call.
#[derive(Clone, Debug)]
pub struct RpcClient {
    config: TransportConfig,
}

impl RpcClient {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Send `request` to `addr` and wait for the matching reply.
    ///
    /// Only transport trouble comes back as `Err`; negative in-band answers
    /// (`found: false`, `exists: false`) are ordinary replies. An `Error` reply
    /// is decoded back into the `P2PError` the remote handler produced.
    pub async fn call(&self, addr: &str, request: Request) -> Result<Reply> {
        let operation = request.operation();
        let mut stream = Transport::connect(addr, self.config.connect_timeout()).await?;
        let message = Message::request(request);
        let request_id = message.id;

        let response: Message = timeout(self.config.request_timeout(), async {
            Transport::send_message(&mut stream, &message).await?;
            Transport::receive_message(&mut stream, self.config.max_message_size).await
        })
        .await
        .map_err(|_| P2PError::Timeout(format!("{} to {}", operation, addr)))??;

        if response.id != request_id {
            return Err(P2PError::InvalidResponse(format!(
                "{} to {}: reply id {} does not match request {}",
                operation, addr, response.id, request_id
            )));
        }

        debug!("{} to {} completed", operation, addr);
        match response.payload {
            Payload::Reply(Reply::Error(err)) => Err(P2PError::from_reply(err)),
            Payload::Reply(reply) => Ok(reply),
            Payload::Request(_) => Err(P2PError::InvalidResponse(format!(
                "{} to {}: got a request instead of a reply",
                operation, addr
            ))),
        }
    }
}

/// Handle to a running accept loop. Dropping it stops accepting.
pub struct ServerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct RpcServer {
    listener: TcpListener,
    max_message_size: usize,
}

impl RpcServer {
    pub async fn bind(addr: &str, config: &TransportConfig) -> Result<Self> {
        let listener = Transport::listen(addr).await?;
        Ok(Self {
            listener,
            max_message_size: config.max_message_size,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Start accepting. Every connection is served on its own task, so
    /// handlers only contend on the state locks they take.
    pub fn spawn<H: RpcHandler>(self, handler: Arc<H>) -> Result<ServerHandle> {
        let local_addr = self.local_addr()?;
        let max_message_size = self.max_message_size;
        let listener = self.listener;

        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("New connection from: {}", addr);
                        let handler = handler.clone();

                        tokio::spawn(async move {
                            if let Err(e) =
                                Self::handle_connection(stream, handler, max_message_size).await
                            {
                                warn!("Connection from {} failed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(ServerHandle { local_addr, task })
    }

    async fn handle_connection<H: RpcHandler>(
        mut stream: TcpStream,
        handler: Arc<H>,
        max_message_size: usize,
    ) -> Result<()> {
        loop {
            let message: Message =
                match Transport::receive_message(&mut stream, max_message_size).await {
                    Ok(message) => message,
                    // Clean close between requests; covers liveness probes too.
                    Err(P2PError::IoError(_)) => return Ok(()),
                    Err(e) => return Err(e),
                };

            let request = match message.payload {
                Payload::Request(request) => request,
                Payload::Reply(reply) => {
                    warn!("Ignoring unsolicited {} reply", reply.kind());
                    continue;
                }
            };

            let operation = request.operation();
            let reply = match handler.handle(request).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("{} failed: {}", operation, e);
                    Reply::Error(e.to_reply())
                }
            };

            Transport::send_message(&mut stream, &Message::reply_to(message.id, reply)).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PeerId;
    use crate::core::protocol::{ConnectReply, ConnectRequest, ListFilesRequest};

    struct Echo;

    #[async_trait]
    impl RpcHandler for Echo {
        async fn handle(&self, request: Request) -> Result<Reply> {
            match request {
                Request::Connect(req) if req.address == "full" => {
                    Err(P2PError::CapacityExceeded("no room".to_string()))
                }
                Request::Connect(_) => Ok(Reply::Connect(ConnectReply {
                    peer_id: PeerId(42),
                    accepted: true,
                })),
                other => Err(P2PError::UnsupportedOperation(other.operation().to_string())),
            }
        }
    }

    async fn start_echo() -> ServerHandle {
        let config = TransportConfig::default();
        let server = RpcServer::bind("127.0.0.1:0", &config).await.unwrap();
        server.spawn(Arc::new(Echo)).unwrap()
    }

    #[tokio::test]
    async fn test_call_returns_typed_reply() {
        let server = start_echo().await;
        let client = RpcClient::new(TransportConfig::default());

        let reply = client
            .call(
                &server.local_addr().to_string(),
                Request::Connect(ConnectRequest {
                    address: "127.0.0.1:9".to_string(),
                }),
            )
            .await
            .unwrap();

        assert_eq!(
            reply,
            Reply::Connect(ConnectReply {
                peer_id: PeerId(42),
                accepted: true
            })
        );
    }

    #[tokio::test]
    async fn test_handler_errors_cross_the_wire() {
        let server = start_echo().await;
        let client = RpcClient::new(TransportConfig::default());
        let addr = server.local_addr().to_string();

        let err = client
            .call(
                &addr,
                Request::Connect(ConnectRequest {
                    address: "full".to_string(),
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, P2PError::CapacityExceeded(_)));

        let err = client
            .call(&addr, Request::ListFiles(ListFilesRequest { peer_id: None }))
            .await
            .unwrap_err();
        assert!(matches!(err, P2PError::UnsupportedOperation(op) if op == "Peer.ListFilesReply"));
    }

    #[tokio::test]
    async fn test_unreachable_target_is_recoverable() {
        let server = start_echo().await;
        let addr = server.local_addr().to_string();
        server.shutdown();
        drop(server);
        sleep(Duration::from_millis(50)).await;

        let client = RpcClient::new(TransportConfig {
            connect_timeout_ms: 500,
            ..TransportConfig::default()
        });
        let err = client
            .call(&addr, Request::ListFiles(ListFilesRequest { peer_id: None }))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}

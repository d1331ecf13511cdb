use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::DirectoryConfig;
use crate::core::peer::{PeerId, PeerInfo, PeerRegistry};
use crate::core::protocol::{
    ConnectReply, ConnectRequest, ListFilesReply, ListFilesRequest, RegisterFileReply,
    RegisterFileRequest, Reply, Request, SearchFileReply, SearchFileRequest,
};
use crate::network::{ProbeOutcome, RpcClient, RpcHandler, RpcServer, ServerHandle, probe};
use crate::utils::{P2PError, Result};

/// Everything the directory knows. One lock covers all of it.
#[derive(Debug)]
pub struct DirectoryState {
    pub registry: PeerRegistry,
}

/// The rendezvous authority: admits peers, tracks who owns which file,
/// answers searches, and probes peers on the operator's behalf.
pub struct DirectoryService {
    config: DirectoryConfig,
    state: Mutex<DirectoryState>,
    client: RpcClient,
}

impl DirectoryService {
    pub fn new(config: DirectoryConfig) -> Self {
        let registry = PeerRegistry::new(config.max_peers, config.max_files_per_peer);
        let client = RpcClient::new(config.transport.clone());

        Self {
            config,
            state: Mutex::new(DirectoryState { registry }),
            client,
        }
    }

    /// Bind the configured address and start answering peers.
    pub async fn start(config: DirectoryConfig) -> Result<(Arc<Self>, ServerHandle)> {
        let server = RpcServer::bind(&config.listen_addr, &config.transport).await?;
        let service = Arc::new(Self::new(config));
        let handle = server.spawn(service.clone())?;

        info!("Directory service started on {}", handle.local_addr());
        Ok((service, handle))
    }

    pub async fn connect(&self, request: ConnectRequest) -> Result<ConnectReply> {
        let mut state = self.state.lock().await;
        let peer_id = state.registry.admit(request.address.clone())?;

        info!("Connected to Peer {} at {}", peer_id, request.address);
        Ok(ConnectReply {
            peer_id,
            accepted: true,
        })
    }

    pub async fn register_file(&self, request: RegisterFileRequest) -> Result<RegisterFileReply> {
        let mut state = self.state.lock().await;
        let accepted = state
            .registry
            .add_file(request.peer_id, &request.file_name)?;

        if accepted {
            info!("Registered {} from Peer {}", request.file_name, request.peer_id);
        } else {
            warn!(
                "Peer {} tried to register {} but is not connected",
                request.peer_id, request.file_name
            );
        }

        Ok(RegisterFileReply {
            file_name: request.file_name,
            received: true,
            accepted,
        })
    }

    pub async fn search_file(&self, request: SearchFileRequest) -> Result<SearchFileReply> {
        let state = self.state.lock().await;
        info!(
            "Peer {} requested a search for file {}",
            request.peer_id, request.file_name
        );

        let owners = state.registry.owners_of(&request.file_name);
        if owners.is_empty() {
            info!(
                "Cannot find a Peer containing file {} for Peer {}",
                request.file_name, request.peer_id
            );
        } else {
            info!(
                "Found file {} for Peer {} on {} owner(s)",
                request.file_name,
                request.peer_id,
                owners.len()
            );
        }

        Ok(SearchFileReply {
            file_name: request.file_name,
            found: !owners.is_empty(),
            owners,
        })
    }

    /// Probe a peer's listening address. The lock is only held long enough to
    /// look the address up.
    pub async fn ping_peer(&self, peer_id: PeerId) -> Result<ProbeOutcome> {
        let address = self.address_of(peer_id).await?;
        info!("Pinging Peer {} at {}", peer_id, address);

        let outcome = probe(
            &address,
            self.config.ping_attempts,
            self.config.transport.connect_timeout(),
            self.config.ping_retry_delay(),
        )
        .await;

        if outcome.is_live() {
            info!(
                "Peer {} live ({}/{} connection success)",
                peer_id, outcome.successes, outcome.attempts
            );
        } else {
            warn!("Peer {} not live", peer_id);
        }
        Ok(outcome)
    }

    /// Ask a peer for its file list. `Ok(None)` when the peer does not answer
    /// the liveness probe.
    pub async fn list_files(&self, peer_id: PeerId) -> Result<Option<Vec<String>>> {
        info!("Discovering files in Peer {}", peer_id);
        if !self.ping_peer(peer_id).await?.is_live() {
            return Ok(None);
        }

        let address = self.address_of(peer_id).await?;
        let reply = self
            .client
            .call(
                &address,
                Request::ListFiles(ListFilesRequest { peer_id: None }),
            )
            .await?;

        match reply {
            Reply::ListFiles(ListFilesReply {
                file_names,
                accepted: true,
                ..
            }) => Ok(Some(file_names)),
            Reply::ListFiles(_) => {
                warn!("Peer {} refused to list its files", peer_id);
                Ok(None)
            }
            other => Err(P2PError::InvalidResponse(format!(
                "expected ListFiles reply, got {}",
                other.kind()
            ))),
        }
    }

    pub async fn list_peers(&self) -> Vec<PeerInfo> {
        self.state.lock().await.registry.connected()
    }

    pub async fn connected_count(&self) -> usize {
        self.state.lock().await.registry.connected_count()
    }

    async fn address_of(&self, peer_id: PeerId) -> Result<String> {
        let state = self.state.lock().await;
        state
            .registry
            .get(peer_id)
            .map(|record| record.address.clone())
            .ok_or(P2PError::PeerNotFound(peer_id))
    }
}

#[async_trait]
impl RpcHandler for DirectoryService {
    async fn handle(&self, request: Request) -> Result<Reply> {
        match request {
            Request::Connect(req) => self.connect(req).await.map(Reply::Connect),
            Request::RegisterFile(req) => self.register_file(req).await.map(Reply::RegisterFile),
            Request::SearchFile(req) => self.search_file(req).await.map(Reply::SearchFile),
            other => Err(P2PError::UnsupportedOperation(other.operation().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::sleep;

    fn service(max_peers: usize) -> DirectoryService {
        DirectoryService::new(DirectoryConfig {
            max_peers,
            ping_retry_delay_ms: 0,
            ..DirectoryConfig::default()
        })
    }

    async fn connect(dir: &DirectoryService, address: &str) -> Result<PeerId> {
        dir.connect(ConnectRequest {
            address: address.to_string(),
        })
        .await
        .map(|reply| reply.peer_id)
    }

    async fn register(dir: &DirectoryService, peer_id: PeerId, name: &str) -> bool {
        dir.register_file(RegisterFileRequest {
            peer_id,
            file_name: name.to_string(),
        })
        .await
        .unwrap()
        .accepted
    }

    async fn search(dir: &DirectoryService, name: &str) -> SearchFileReply {
        dir.search_file(SearchFileRequest {
            peer_id: PeerId(0),
            file_name: name.to_string(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_connect_assigns_ids_in_call_order() {
        let dir = service(10);
        for expected in 0..10 {
            let id = connect(&dir, &format!("127.0.0.1:{}", 7000 + expected))
                .await
                .unwrap();
            assert_eq!(id, PeerId(expected));
        }
        assert_eq!(dir.connected_count().await, 10);
    }

    #[tokio::test]
    async fn test_connect_beyond_capacity_fails() {
        let dir = service(3);
        for i in 0..3 {
            connect(&dir, &format!("peer-{}", i)).await.unwrap();
        }

        let err = connect(&dir, "peer-3").await.unwrap_err();
        assert!(matches!(err, P2PError::CapacityExceeded(_)));

        let peers = dir.list_peers().await;
        assert_eq!(peers.len(), 3);
        assert_eq!(peers[2].id, PeerId(2));
        assert_eq!(peers[2].address, "peer-2");
    }

    #[tokio::test]
    async fn test_search_unregistered_file() {
        let dir = service(4);
        let id = connect(&dir, "a").await.unwrap();
        register(&dir, id, "other.txt").await;

        let reply = search(&dir, "missing.txt").await;
        assert!(!reply.found);
        assert!(reply.owners.is_empty());
        assert_eq!(reply.file_name, "missing.txt");
    }

    #[tokio::test]
    async fn test_search_returns_every_owner() {
        let dir = service(4);
        let i = connect(&dir, "addr-i").await.unwrap();
        let j = connect(&dir, "addr-j").await.unwrap();
        assert!(register(&dir, j, "a.txt").await);
        assert!(register(&dir, i, "a.txt").await);

        let reply = search(&dir, "a.txt").await;
        assert!(reply.found);
        let owners: Vec<(PeerId, String)> = reply
            .owners
            .into_iter()
            .map(|o| (o.id, o.address))
            .collect();
        assert_eq!(
            owners,
            vec![(i, "addr-i".to_string()), (j, "addr-j".to_string())]
        );
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_listed_twice() {
        let dir = service(4);
        let id = connect(&dir, "a").await.unwrap();
        register(&dir, id, "dup.txt").await;
        register(&dir, id, "dup.txt").await;

        let reply = search(&dir, "dup.txt").await;
        assert_eq!(reply.owners.len(), 2);
        assert!(reply.owners.iter().all(|o| o.id == id));
    }

    #[tokio::test]
    async fn test_register_for_unknown_peer_is_not_accepted() {
        let dir = service(4);
        let reply = dir
            .register_file(RegisterFileRequest {
                peer_id: PeerId(9),
                file_name: "a.txt".to_string(),
            })
            .await
            .unwrap();
        assert!(reply.received);
        assert!(!reply.accepted);
    }

    #[tokio::test]
    async fn test_list_peers_is_stable_without_connects() {
        let dir = service(4);
        connect(&dir, "a").await.unwrap();
        connect(&dir, "b").await.unwrap();
        register(&dir, PeerId(0), "x").await;

        let first = dir.list_peers().await;
        let second = dir.list_peers().await;
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn test_ping_unknown_peer() {
        let dir = service(4);
        assert!(matches!(
            dir.ping_peer(PeerId(0)).await,
            Err(P2PError::PeerNotFound(PeerId(0)))
        ));
    }

    #[tokio::test]
    async fn test_ping_without_listener_is_not_live() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let dir = service(4);
        let id = connect(&dir, &addr).await.unwrap();
        let outcome = dir.ping_peer(id).await.unwrap();
        assert!(!outcome.is_live());
        assert_eq!(outcome.attempts, 3);

        // ListFiles is abandoned when the ping fails.
        assert_eq!(dir.list_files(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ping_survives_early_failed_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        // The listener comes up well after the first attempt and well before
        // the second.
        let dir = DirectoryService::new(DirectoryConfig {
            ping_retry_delay_ms: 1_000,
            ..DirectoryConfig::default()
        });
        let id = connect(&dir, &addr.to_string()).await.unwrap();

        let late = tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            let listener = TcpListener::bind(addr).await.unwrap();
            sleep(Duration::from_secs(10)).await;
            drop(listener);
        });

        let outcome = dir.ping_peer(id).await.unwrap();
        assert!(outcome.is_live());
        assert!(outcome.successes < outcome.attempts);
        late.abort();
    }

    #[tokio::test]
    async fn test_rejects_peer_operations() {
        let dir = service(4);
        let err = dir
            .handle(Request::ListFiles(ListFilesRequest { peer_id: None }))
            .await
            .unwrap_err();
        assert!(matches!(err, P2PError::UnsupportedOperation(_)));
    }
}

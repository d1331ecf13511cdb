use async_trait::async_trait;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::PeerConfig;
use crate::core::peer::{PeerId, PeerInfo, PeerRegistry};
use crate::core::protocol::{
    AcceptConnectReply, AcceptConnectRequest, ConnectRequest, ListFilesReply, ListFilesRequest,
    RegisterFileRequest, Reply, Request, SearchFileReply, SearchFileRequest, ServeFileReply,
    ServeFileRequest,
};
use crate::network::{RpcClient, RpcHandler, RpcServer, ServerHandle};
use crate::storage::FileStore;
use crate::utils::{P2PError, Result};

/// A file this peer can serve, and the directory its bytes live in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFileEntry {
    pub name: String,
    pub location: PathBuf,
}

/// Everything a peer mutates. Inbound handlers and outbound operations all go
/// through the same lock.
#[derive(Debug)]
pub struct PeerLocalState {
    pub peer_id: Option<PeerId>,
    pub files: Vec<LocalFileEntry>,
    pub known_peers: PeerRegistry,
    max_files: usize,
}

impl PeerLocalState {
    fn new(max_files: usize, max_known_peers: usize) -> Self {
        Self {
            peer_id: None,
            files: Vec::new(),
            known_peers: PeerRegistry::new(max_known_peers, 0),
            max_files,
        }
    }

    fn identity(&self) -> Result<PeerId> {
        self.peer_id.ok_or(P2PError::NotConnected)
    }

    fn find_file(&self, name: &str) -> Option<&LocalFileEntry> {
        self.files.iter().find(|entry| entry.name == name)
    }

    fn ensure_room(&self) -> Result<()> {
        if self.files.len() >= self.max_files {
            return Err(P2PError::CapacityExceeded(format!(
                "local file table is full ({} files)",
                self.max_files
            )));
        }
        Ok(())
    }

    fn add_file(&mut self, name: &str, location: &Path) -> Result<()> {
        self.ensure_room()?;
        self.files.push(LocalFileEntry {
            name: name.to_string(),
            location: location.to_path_buf(),
        });
        Ok(())
    }
}

/// Chooses which owner to fetch from, given the owners in the order the
/// directory returned them. `None` cancels the fetch.
#[async_trait]
pub trait OwnerSelector: Send {
    async fn select(&mut self, file_name: &str, owners: &[PeerInfo]) -> Option<usize>;
}

#[async_trait]
impl<F> OwnerSelector for F
where
    F: FnMut(&str, &[PeerInfo]) -> Option<usize> + Send,
{
    async fn select(&mut self, file_name: &str, owners: &[PeerInfo]) -> Option<usize> {
        (self)(file_name, owners)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The directory knows no owner.
    NotFound,
    /// The selector declined to pick an owner.
    Cancelled,
    /// The chosen owner answered that it does not have the file.
    Missing { owner: PeerId },
    /// Bytes were saved locally. `registered` is false when the directory
    /// could not be told about the new replica.
    Fetched {
        owner: PeerId,
        path: PathBuf,
        registered: bool,
    },
}

/// A peer: serves its files to others and fetches files from owners found
/// through the directory.
pub struct PeerNode {
    config: PeerConfig,
    address: String,
    store: FileStore,
    client: RpcClient,
    state: Mutex<PeerLocalState>,
}

impl PeerNode {
    pub fn new(config: PeerConfig, address: String) -> Self {
        let store = FileStore::new(config.storage_dir.clone());
        let client = RpcClient::new(config.transport.clone());
        let state = PeerLocalState::new(config.max_local_files, config.max_known_peers);

        Self {
            config,
            address,
            store,
            client,
            state: Mutex::new(state),
        }
    }

    /// Prepare the storage directory, bind the listener and start serving.
    /// The advertised address defaults to whatever the listener bound to.
    pub async fn start(config: PeerConfig) -> Result<(Arc<Self>, ServerHandle)> {
        let server = RpcServer::bind(&config.listen_addr, &config.transport).await?;
        let address = match &config.advertise_addr {
            Some(addr) => addr.clone(),
            None => server.local_addr()?.to_string(),
        };

        let node = Arc::new(Self::new(config, address));
        node.store.init().await?;
        let handle = server.spawn(node.clone())?;

        info!("Peer node listening on {}", node.address);
        Ok((node, handle))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn storage_dir(&self) -> &Path {
        self.store.storage_dir()
    }

    pub async fn peer_id(&self) -> Option<PeerId> {
        self.state.lock().await.peer_id
    }

    pub async fn local_files(&self) -> Vec<LocalFileEntry> {
        self.state.lock().await.files.clone()
    }

    pub async fn known_peers(&self) -> Vec<PeerInfo> {
        self.state.lock().await.known_peers.connected()
    }

    // ---- outbound ----

    /// Announce our listening address and take the identity the directory assigns.
    pub async fn connect_to_directory(&self) -> Result<PeerId> {
        let reply = self
            .client
            .call(
                &self.config.directory_addr,
                Request::Connect(ConnectRequest {
                    address: self.address.clone(),
                }),
            )
            .await?;

        let Reply::Connect(reply) = reply else {
            return Err(unexpected("Connect", &reply));
        };
        if !reply.accepted {
            return Err(P2PError::ConnectionFailed(
                "directory refused the connection".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        if let Some(previous) = state.peer_id {
            warn!("Reconnecting to the directory, dropping identity {}", previous);
        }
        state.peer_id = Some(reply.peer_id);
        info!("Connected to directory, PeerID: {}", reply.peer_id);
        Ok(reply.peer_id)
    }

    /// Share `file_name`, whose bytes live in `location`. The local entry is
    /// added first and kept even if the directory call then fails. A file too
    /// large to fit in one reply frame is refused up front.
    pub async fn register_file(&self, file_name: &str, location: &Path) -> Result<bool> {
        self.check_servable(location, file_name).await?;

        let peer_id = {
            let mut state = self.state.lock().await;
            let peer_id = state.identity()?;
            state.add_file(file_name, location)?;
            peer_id
        };

        self.announce(peer_id, file_name).await
    }

    /// Ask the directory who owns `file_name`.
    pub async fn search(&self, file_name: &str) -> Result<SearchFileReply> {
        let peer_id = self.state.lock().await.identity()?;
        self.search_file(peer_id, file_name).await
    }

    /// Find owners, let `selector` pick one, fetch the file from it and
    /// register ourselves as a new owner.
    ///
    /// The peer lock is held for the whole sequence, so no inbound request can
    /// observe the file table mid-update. While fetching, this peer does not
    /// serve anyone else.
    pub async fn search_and_fetch<S: OwnerSelector>(
        &self,
        file_name: &str,
        selector: &mut S,
    ) -> Result<FetchOutcome> {
        let mut state = self.state.lock().await;
        let peer_id = state.identity()?;

        let reply = self.search_file(peer_id, file_name).await?;
        if !reply.found {
            info!("File {} not found", file_name);
            return Ok(FetchOutcome::NotFound);
        }

        let Some(choice) = selector.select(file_name, &reply.owners).await else {
            info!("Fetch of {} cancelled", file_name);
            return Ok(FetchOutcome::Cancelled);
        };
        let owner = reply.owners.get(choice).cloned().ok_or_else(|| {
            P2PError::InvalidSelection(format!(
                "{} is not one of the {} owners",
                choice,
                reply.owners.len()
            ))
        })?;
        // An identity from an earlier connect still points at our own address.
        if owner.id == peer_id || owner.address == self.address {
            return Err(P2PError::InvalidSelection(format!(
                "peer {} at {} is this peer",
                owner.id, owner.address
            )));
        }
        state.ensure_room()?;

        self.connect_peer(&mut state, peer_id, &owner).await?;

        let Some(path) = self
            .transfer(peer_id, &owner.address, &reply.file_name)
            .await?
        else {
            return Ok(FetchOutcome::Missing { owner: owner.id });
        };

        // Replication step: the file is ours now, so we become an owner too.
        state.add_file(&reply.file_name, self.store.storage_dir())?;
        let registered = self
            .announce(peer_id, &reply.file_name)
            .await
            .unwrap_or(false);

        Ok(FetchOutcome::Fetched {
            owner: owner.id,
            path,
            registered,
        })
    }

    /// Fetch `file_name` straight from the peer at `owner_addr` and add it to
    /// the local table. `Ok(false)` when the owner does not have it.
    pub async fn request_file(&self, owner_addr: &str, file_name: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let peer_id = state.identity()?;
        state.ensure_room()?;

        match self.transfer(peer_id, owner_addr, file_name).await? {
            Some(_) => {
                state.add_file(file_name, self.store.storage_dir())?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn check_servable(&self, location: &Path, file_name: &str) -> Result<()> {
        let limit = self.config.transport.max_file_size();
        match FileStore::size(location, file_name).await {
            Some(size) if size > limit => Err(P2PError::StorageError(format!(
                "file too large to share: {} is {} bytes, limit is {}",
                file_name, size, limit
            ))),
            _ => Ok(()),
        }
    }

    async fn search_file(&self, peer_id: PeerId, file_name: &str) -> Result<SearchFileReply> {
        let reply = self
            .client
            .call(
                &self.config.directory_addr,
                Request::SearchFile(SearchFileRequest {
                    peer_id,
                    file_name: file_name.to_string(),
                }),
            )
            .await?;

        match reply {
            Reply::SearchFile(reply) => Ok(reply),
            other => Err(unexpected("SearchFile", &other)),
        }
    }

    /// Directory leg of a registration. Failures leave the local entry in
    /// place, so they are logged as a divergence.
    async fn announce(&self, peer_id: PeerId, file_name: &str) -> Result<bool> {
        let result = self
            .client
            .call(
                &self.config.directory_addr,
                Request::RegisterFile(RegisterFileRequest {
                    peer_id,
                    file_name: file_name.to_string(),
                }),
            )
            .await
            .and_then(|reply| match reply {
                Reply::RegisterFile(reply) => Ok(reply.accepted),
                other => Err(unexpected("RegisterFile", &other)),
            });

        match &result {
            Ok(true) => info!("Registered file {}", file_name),
            Ok(false) => warn!(
                "Directory did not accept {} from Peer {}; it is registered locally only",
                file_name, peer_id
            ),
            Err(e) => warn!(
                "Registering {} with the directory failed ({}); it is registered locally only",
                file_name, e
            ),
        }
        result
    }

    async fn connect_peer(
        &self,
        state: &mut PeerLocalState,
        peer_id: PeerId,
        owner: &PeerInfo,
    ) -> Result<()> {
        let reply = self
            .client
            .call(
                &owner.address,
                Request::AcceptConnect(AcceptConnectRequest {
                    peer_id,
                    address: self.address.clone(),
                }),
            )
            .await?;

        let Reply::AcceptConnect(reply) = reply else {
            return Err(unexpected("AcceptConnect", &reply));
        };
        if !reply.accepted {
            return Err(P2PError::ConnectionFailed(format!(
                "connection refused by Peer {}",
                owner.id
            )));
        }
        if let Some(remote) = reply.peer_id.filter(|remote| *remote != owner.id) {
            warn!(
                "Peer at {} identifies as {} but the directory lists {}",
                owner.address, remote, owner.id
            );
        }

        state.known_peers.remember(owner.id, owner.address.clone())?;
        info!("Connected to Peer {}", owner.id);
        Ok(())
    }

    /// Pull the bytes and write them to storage. `None` when the owner reports
    /// the file missing; nothing is written in that case.
    async fn transfer(
        &self,
        peer_id: PeerId,
        owner_addr: &str,
        file_name: &str,
    ) -> Result<Option<PathBuf>> {
        FileStore::validate_name(file_name)?;

        let reply = self
            .client
            .call(
                owner_addr,
                Request::ServeFile(ServeFileRequest {
                    peer_id,
                    file_name: file_name.to_string(),
                }),
            )
            .await?;

        let Reply::ServeFile(reply) = reply else {
            return Err(unexpected("ServeFile", &reply));
        };
        if !reply.exists {
            info!(
                "Did not receive {} from {}: {}",
                file_name,
                owner_addr,
                reply.error_message.as_deref().unwrap_or("the file does not exist")
            );
            return Ok(None);
        }

        info!("Received {} from {}", reply.file_name, owner_addr);
        let path = self.store.save(file_name, &reply.contents).await?;
        Ok(Some(path))
    }

    // ---- inbound ----

    pub async fn accept_connect(&self, request: AcceptConnectRequest) -> Result<AcceptConnectReply> {
        info!("Received connect request from Peer {}", request.peer_id);
        let mut state = self.state.lock().await;
        state
            .known_peers
            .remember(request.peer_id, request.address)?;

        info!("Accepted connection from Peer {}", request.peer_id);
        Ok(AcceptConnectReply {
            peer_id: state.peer_id,
            accepted: true,
        })
    }

    /// Serve a file's bytes. The read happens under the peer lock. A read
    /// failure is a `StorageError`, never an empty success.
    pub async fn serve_file(&self, request: ServeFileRequest) -> Result<ServeFileReply> {
        let state = self.state.lock().await;

        let Some(entry) = state.find_file(&request.file_name) else {
            info!(
                "Peer {} requested {}, but the file does not exist",
                request.peer_id, request.file_name
            );
            return Ok(ServeFileReply {
                peer_id: request.peer_id,
                exists: false,
                file_name: request.file_name,
                contents: Vec::new(),
                error_message: Some("File not found on this peer".to_string()),
            });
        };

        self.check_servable(&entry.location, &entry.name)
            .await
            .inspect_err(|e| error!("Error serving {}: {}", request.file_name, e))?;
        let contents = FileStore::read(&entry.location, &entry.name)
            .await
            .inspect_err(|e| error!("Error serving {}: {}", request.file_name, e))?;

        info!("Served file {} to Peer {}", request.file_name, request.peer_id);
        Ok(ServeFileReply {
            peer_id: request.peer_id,
            exists: true,
            file_name: request.file_name,
            contents,
            error_message: None,
        })
    }

    pub async fn list_files_reply(&self, _request: ListFilesRequest) -> Result<ListFilesReply> {
        let state = self.state.lock().await;
        let file_names: Vec<String> = state.files.iter().map(|f| f.name.clone()).collect();

        Ok(ListFilesReply {
            count: file_names.len(),
            file_names,
            peer_id: state.peer_id,
            accepted: true,
        })
    }
}

#[async_trait]
impl RpcHandler for PeerNode {
    async fn handle(&self, request: Request) -> Result<Reply> {
        match request {
            Request::AcceptConnect(req) => self.accept_connect(req).await.map(Reply::AcceptConnect),
            Request::ServeFile(req) => self.serve_file(req).await.map(Reply::ServeFile),
            Request::ListFiles(req) => self.list_files_reply(req).await.map(Reply::ListFiles),
            other => Err(P2PError::UnsupportedOperation(other.operation().to_string())),
        }
    }
}

fn unexpected(expected: &str, got: &Reply) -> P2PError {
    P2PError::InvalidResponse(format!("expected {} reply, got {}", expected, got.kind()))
}

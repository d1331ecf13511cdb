use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::{P2PError, Result};

/// Identity handed out by the directory at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A known remote peer: where to reach it and which files it is believed to host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub id: PeerId,
    pub address: String,
    pub files: Vec<String>,
    pub connected: bool,
}

/// Identity and address only, as shown to an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub address: String,
}

impl PeerRecord {
    pub fn new(id: PeerId, address: String) -> Self {
        Self {
            id,
            address,
            files: Vec::new(),
            connected: true,
        }
    }

    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id,
            address: self.address.clone(),
        }
    }
}

/// Bounded, ordered table of peer records.
///
/// The directory uses it as the authoritative registry, where an identity is the
/// record's position of assignment. Each peer keeps its own instance as a cache
/// of the remote peers it has exchanged connects with.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    records: Vec<PeerRecord>,
    max_peers: usize,
    max_files_per_peer: usize,
}

impl PeerRegistry {
    pub fn new(max_peers: usize, max_files_per_peer: usize) -> Self {
        Self {
            records: Vec::new(),
            max_peers,
            max_files_per_peer,
        }
    }

    /// Admit a new peer under the next identity. Identities are never reused.
    pub fn admit(&mut self, address: String) -> Result<PeerId> {
        if self.records.len() >= self.max_peers {
            return Err(P2PError::CapacityExceeded(format!(
                "peer registry is full ({} peers)",
                self.max_peers
            )));
        }

        let id = PeerId(self.records.len() as u64);
        self.records.push(PeerRecord::new(id, address));
        info!("Admitted peer {} ({} total)", id, self.records.len());
        Ok(id)
    }

    /// Record a peer whose identity was assigned elsewhere. A repeat updates the
    /// stored address instead of adding a second record.
    pub fn remember(&mut self, id: PeerId, address: String) -> Result<()> {
        if let Some(record) = self.records.iter_mut().find(|r| r.id == id) {
            if record.address != address {
                debug!("Peer {} moved from {} to {}", id, record.address, address);
                record.address = address;
            }
            record.connected = true;
            return Ok(());
        }

        if self.records.len() >= self.max_peers {
            return Err(P2PError::CapacityExceeded(format!(
                "known-peer list is full ({} peers)",
                self.max_peers
            )));
        }

        self.records.push(PeerRecord::new(id, address));
        debug!("Remembered peer {} ({} known)", id, self.records.len());
        Ok(())
    }

    /// Append a file to a peer's list. `Ok(false)` when the identity is unknown.
    /// Duplicate names are kept.
    pub fn add_file(&mut self, id: PeerId, file_name: &str) -> Result<bool> {
        let max_files = self.max_files_per_peer;
        let Some(record) = self.records.iter_mut().find(|r| r.id == id) else {
            return Ok(false);
        };

        if record.files.len() >= max_files {
            return Err(P2PError::CapacityExceeded(format!(
                "file list of peer {} is full ({} files)",
                id, max_files
            )));
        }

        record.files.push(file_name.to_string());
        Ok(true)
    }

    /// Every (owner, address) holding `file_name`, ascending identity then list
    /// position. An owner appears once per matching entry.
    pub fn owners_of(&self, file_name: &str) -> Vec<PeerInfo> {
        self.records
            .iter()
            .flat_map(|record| {
                record
                    .files
                    .iter()
                    .filter(move |f| f.as_str() == file_name)
                    .map(move |_| record.info())
            })
            .collect()
    }

    pub fn get(&self, id: PeerId) -> Option<&PeerRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn connected(&self) -> Vec<PeerInfo> {
        self.records
            .iter()
            .filter(|r| r.connected)
            .map(PeerRecord::info)
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.records.iter().filter(|r| r.connected).count()
    }
}

//! Mini Rendezvous File Sharing Library
//!
//! Peers publish the files they host to a central directory, look up owners
//! through it, and fetch bytes directly from each other. A peer that fetches a
//! file registers itself as a new owner, so popular files spread across the swarm.

pub mod console;
pub mod core;
pub mod network;
pub mod storage;
pub mod utils;

// Re-export main types
pub use core::{DirectoryConfig, DirectoryService, FetchOutcome, PeerConfig, PeerId, PeerNode};
pub use network::{RpcClient, ServerHandle};
pub use storage::FileStore;
pub use utils::error::{P2PError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod config;
pub mod directory;
pub mod node;
pub mod peer;
pub mod protocol;

pub use config::{DirectoryConfig, PeerConfig, TransportConfig, load_toml};
pub use directory::{DirectoryService, DirectoryState};
pub use node::{FetchOutcome, LocalFileEntry, OwnerSelector, PeerLocalState, PeerNode};
pub use peer::{PeerId, PeerInfo, PeerRecord, PeerRegistry};
pub use protocol::{Message, Payload, Reply, Request};

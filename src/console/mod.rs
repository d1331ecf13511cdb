//! Operator shells for the directory and peer processes.
//!
//! Both read one command per line and print results for a human; the work
//! itself is done by `DirectoryService` and `PeerNode`.

pub mod directory;
pub mod peer;

pub use directory::{DirectoryCommand, run_directory_console};
pub use peer::{PeerCommand, run_peer_console};

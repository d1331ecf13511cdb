use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{P2PError, Result};

pub const DEFAULT_DIRECTORY_ADDR: &str = "127.0.0.1:1337";
pub const DEFAULT_CAPACITY: usize = 100;

/// Frame bytes reserved for the envelope and reply fields around file contents.
const FRAME_OVERHEAD: usize = 4096;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub max_message_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: 10_000,
            max_message_size: 10_000_000,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Largest file that fits in a single ServeFile reply. Contents are
    /// hex-encoded, so every byte takes two in the frame.
    pub fn max_file_size(&self) -> u64 {
        (self.max_message_size.saturating_sub(FRAME_OVERHEAD) / 2) as u64
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub listen_addr: String,
    pub max_peers: usize,
    pub max_files_per_peer: usize,
    pub ping_attempts: u32,
    pub ping_retry_delay_ms: u64,
    pub transport: TransportConfig,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:1337".to_string(),
            max_peers: DEFAULT_CAPACITY,
            max_files_per_peer: DEFAULT_CAPACITY,
            ping_attempts: 3,
            ping_retry_delay_ms: 100,
            transport: TransportConfig::default(),
        }
    }
}

impl DirectoryConfig {
    pub fn ping_retry_delay(&self) -> Duration {
        Duration::from_millis(self.ping_retry_delay_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub listen_addr: String,
    /// Address other processes should dial. Falls back to the bound address.
    pub advertise_addr: Option<String>,
    pub directory_addr: String,
    pub storage_dir: PathBuf,
    pub max_local_files: usize,
    pub max_known_peers: usize,
    pub transport: TransportConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7001".to_string(),
            advertise_addr: None,
            directory_addr: DEFAULT_DIRECTORY_ADDR.to_string(),
            storage_dir: PathBuf::from("./shared"),
            max_local_files: DEFAULT_CAPACITY,
            max_known_peers: DEFAULT_CAPACITY,
            transport: TransportConfig::default(),
        }
    }
}

/// Read a TOML config file. Keys left out keep their defaults.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        P2PError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
    })?;
    Ok(toml::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_peers = 5\n[transport]\nconnect_timeout_ms = 250").unwrap();

        let config: DirectoryConfig = load_toml(file.path()).unwrap();
        assert_eq!(config.max_peers, 5);
        assert_eq!(config.max_files_per_peer, DEFAULT_CAPACITY);
        assert_eq!(config.ping_attempts, 3);
        assert_eq!(config.transport.connect_timeout(), Duration::from_millis(250));
        assert_eq!(config.transport.max_message_size, 10_000_000);
    }

    #[test]
    fn test_max_file_size_leaves_room_for_hex() {
        let transport = TransportConfig::default();
        assert_eq!(transport.max_file_size(), 4_997_952);
        assert!(transport.max_file_size() * 2 < transport.max_message_size as u64);

        let tiny = TransportConfig {
            max_message_size: 100,
            ..TransportConfig::default()
        };
        assert_eq!(tiny.max_file_size(), 0);
    }

    #[test]
    fn test_bad_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_local_files = \"many\"").unwrap();

        let err = load_toml::<PeerConfig>(file.path()).unwrap_err();
        assert!(matches!(err, P2PError::ConfigError(_)));

        let missing = load_toml::<PeerConfig>(Path::new("/nonexistent/peer.toml"));
        assert!(matches!(missing, Err(P2PError::ConfigError(_))));
    }
}

// Daemon configuration read from environment variables
//
// NODELINK_DAEMON_ADDR: listen address (default: 127.0.0.1:52000)
// NODELINK_DAEMON_STORAGE: directory holding stored files (default: storage)
// NODELINK_DAEMON_ID: sender id stamped on outgoing frames (default: 0)
// NODELINK_DAEMON_MAX_FILE_SIZE: largest upload accepted, in bytes (default: 1 GiB)
use std::env;
use std::path::PathBuf;

use nodelink_core::DEFAULT_PORT;

const DEFAULT_STORAGE_DIR: &str = "storage";
const DEFAULT_MAX_FILE_SIZE: u64 = 1 << 30;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub address: String,
    pub storage_dir: PathBuf,
    pub node_id: u64,
    pub max_file_size: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            address: format!("127.0.0.1:{}", DEFAULT_PORT),
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            node_id: 0,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        let defaults = DaemonConfig::default();

        DaemonConfig {
            address: env_string("NODELINK_DAEMON_ADDR").unwrap_or(defaults.address),
            storage_dir: env_string("NODELINK_DAEMON_STORAGE")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            node_id: env_u64("NODELINK_DAEMON_ID").unwrap_or(defaults.node_id),
            max_file_size: env_u64("NODELINK_DAEMON_MAX_FILE_SIZE")
                .unwrap_or(defaults.max_file_size),
        }
    }

    /// Config for a throwaway node on an ephemeral local port.
    pub fn ephemeral(storage_dir: impl Into<PathBuf>) -> Self {
        DaemonConfig {
            address: "127.0.0.1:0".to_string(),
            storage_dir: storage_dir.into(),
            ..DaemonConfig::default()
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

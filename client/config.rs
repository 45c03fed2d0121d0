// Client configuration read from environment variables
//
// NODELINK_CONNECT_TIMEOUT_MS: dial timeout, 0 = wait for the OS (default: 10000)
// NODELINK_READ_TIMEOUT_MS: per-read deadline inside an operation (default: 30000)
// NODELINK_WRITE_TIMEOUT_MS: per-write deadline (default: 30000)
// NODELINK_DOWNLOAD_DIR: where requested files land by default (default: downloads)
// NODELINK_MAX_FILE_SIZE: largest file sent or accepted, in bytes (default: 1 GiB)
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use nodelink_transport::TcpOptions;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_DOWNLOAD_DIR: &str = "downloads";
const DEFAULT_MAX_FILE_SIZE: u64 = 1 << 30;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub download_dir: PathBuf,
    pub max_file_size: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connect_timeout: Some(Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS)),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let defaults = ClientConfig::default();

        let connect_timeout = match env_u64("NODELINK_CONNECT_TIMEOUT_MS") {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.connect_timeout,
        };

        ClientConfig {
            connect_timeout,
            read_timeout: env_u64("NODELINK_READ_TIMEOUT_MS")
                .filter(|&ms| ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.read_timeout),
            write_timeout: env_u64("NODELINK_WRITE_TIMEOUT_MS")
                .filter(|&ms| ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.write_timeout),
            download_dir: env::var("NODELINK_DOWNLOAD_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            max_file_size: env_u64("NODELINK_MAX_FILE_SIZE").unwrap_or(defaults.max_file_size),
        }
    }

    pub fn tcp_options(&self) -> TcpOptions {
        TcpOptions {
            connect_timeout: self.connect_timeout,
            write_timeout: Some(self.write_timeout),
            keepalive: true,
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

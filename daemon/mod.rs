// daemon: reference node that stores uploads and serves downloads
pub mod config;
pub mod error;
pub mod storage;
pub mod server;

pub use config::DaemonConfig;
pub use error::DaemonError;
pub use storage::Storage;
pub use server::{NodeServer, ServerEvent};

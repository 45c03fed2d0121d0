// client: node client library - connection lifecycle, file transfers, command surface
pub mod config;
pub mod error;
pub mod outcome;
pub mod connection;
pub mod transfer;
pub mod commands;

pub use config::ClientConfig;
pub use error::{ClientError, ErrorClass};
pub use outcome::{CommandResult, Status};
pub use connection::{CancelHandle, Connection, ConnectionState, Exchange};
pub use transfer::{download, upload, Progress, ProgressSink, TransferReport};
pub use commands::{Command, Session};

// Re-export protocol types used in the public API
pub use nodelink_core::*;

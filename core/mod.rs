// Core module: frame codec and payload types (NO I/O dependencies)
pub mod error;
pub mod types;
pub mod protocol;
pub mod payload;

pub use error::*;
pub use types::*;
pub use protocol::*;
pub use payload::*;

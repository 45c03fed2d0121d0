// Transport module: stream communication and frame I/O
pub mod traits;
pub mod tcp;
pub mod framing;

pub use traits::*;
pub use tcp::*;
pub use framing::*;

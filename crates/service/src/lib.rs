//! Address bookkeeping, buffer pooling, rewrite rules, and the
//! bidirectional forwarder that together proxy a single client
//! connection to its cluster-private upstream.

pub mod address;
pub mod buffer;
pub mod forwarder;
pub mod ports;
pub mod rewrite;

pub use address::{AddressMap, HostAddress};
pub use buffer::BufferPool;
pub use ports::PortCounter;
pub use rewrite::RewriteSet;

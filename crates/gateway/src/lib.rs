//! Gateway transport: QUIC termination, session handshake, and link
//! adapters feeding the connection pool.

pub mod inprocess;
pub mod server;
pub mod session;

/// In-process link pair for tests and single-process wiring.
pub use inprocess::{InProcessHandle, InProcessLink, in_process_pair};
/// QUIC server and uplink handler callback type.
pub use server::{GatewayServer, UplinkHandler};
/// Wire frame envelope and QUIC-backed link.
pub use session::{GatewayFrame, QuicLink};

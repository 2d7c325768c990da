//! Gateway connection pool: one live link per connected gateway, uplink
//! fan-out to subscribers, and bounded-wait downlink routing.

pub mod link;
pub mod pool;

/// Capability contract implemented by gateway transports.
pub use link::GatewayLink;
/// Connection pool / message router.
pub use pool::Pool;

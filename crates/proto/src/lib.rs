//! Shared protocol types for the gateway server, connection pool, and CLI.
//!
//! This crate defines serializable uplink/downlink frame structures,
//! gateway identifiers, and strongly-typed error enums shared across the
//! workspace.

pub mod error;
pub mod frame;
pub mod ids;

/// Re-export of all protocol error types.
pub use error::*;
/// Re-export of uplink/downlink frame types.
pub use frame::{Downlink, DownlinkMessage, GatewayStatus, Uplink, UplinkMessage};
/// Re-export of gateway identity types.
pub use ids::GatewayId;

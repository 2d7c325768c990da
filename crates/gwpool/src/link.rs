//! Capability contract for one live gateway transport session.

use async_trait::async_trait;
use proto::{Downlink, LinkError, Uplink};

/// Trait for one gateway's bidirectional transport session (QUIC, in-process, etc.)
///
/// The pool holds a non-owning reference to the link while it is the
/// current one for its gateway; closing the underlying transport stays
/// the responsibility of whoever created the link.
#[async_trait]
pub trait GatewayLink: Send + Sync {
    /// Receive the next inbound frame.
    ///
    /// Blocks until a frame arrives or the link terminates. Safe to call
    /// in a loop; once it returns an error the link is dead.
    async fn recv(&self) -> Result<Uplink, LinkError>;

    /// Attempt to write one outbound frame on this link.
    ///
    /// Returns promptly with [`LinkError::Refused`] when the transport
    /// rejects the frame. Never retries internally; retry policy belongs
    /// to the caller.
    async fn send(&self, frame: Downlink) -> Result<(), LinkError>;

    /// Resolves when the underlying transport is gone.
    ///
    /// Used to unblock a pump that is parked in [`GatewayLink::recv`].
    /// Links without such a signal keep this default, which never
    /// resolves; `recv`'s error return is then the sole failure signal.
    async fn closed(&self) {
        std::future::pending::<()>().await
    }
}

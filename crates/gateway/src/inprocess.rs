//! In-process gateway link for tests and single-process wiring.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use gwpool::GatewayLink;
use proto::{Downlink, LinkError, Uplink};
use tokio::sync::{Mutex, mpsc};

/// Channel-backed link: what a simulated gateway feeds in comes out of
/// `recv`, and accepted downlinks land on the driver's queue
pub struct InProcessLink {
    uplinks: Mutex<mpsc::Receiver<Uplink>>,
    downlinks: mpsc::Sender<Downlink>,
    accept_downlinks: AtomicBool,
}

/// Driver side of an in-process link: pushes uplinks, drains downlinks.
/// Dropping it terminates the link's `recv`.
pub struct InProcessHandle {
    uplinks: mpsc::Sender<Uplink>,
    downlinks: mpsc::Receiver<Downlink>,
}

/// Creates a connected link/driver pair with bounded queues.
pub fn in_process_pair(buffer: usize) -> (InProcessLink, InProcessHandle) {
    let (uplink_tx, uplink_rx) = mpsc::channel(buffer);
    let (downlink_tx, downlink_rx) = mpsc::channel(buffer);
    let link = InProcessLink {
        uplinks: Mutex::new(uplink_rx),
        downlinks: downlink_tx,
        accept_downlinks: AtomicBool::new(true),
    };
    let handle = InProcessHandle {
        uplinks: uplink_tx,
        downlinks: downlink_rx,
    };
    (link, handle)
}

impl InProcessLink {
    /// Toggle whether downlinks are accepted or refused.
    pub fn set_accept_downlinks(&self, accept: bool) {
        self.accept_downlinks.store(accept, Ordering::SeqCst);
    }
}

#[async_trait]
impl GatewayLink for InProcessLink {
    async fn recv(&self) -> Result<Uplink, LinkError> {
        let mut uplinks = self.uplinks.lock().await;
        match uplinks.recv().await {
            Some(frame) => Ok(frame),
            None => Err(LinkError::Closed("uplink stream ended".to_string())),
        }
    }

    async fn send(&self, frame: Downlink) -> Result<(), LinkError> {
        if !self.accept_downlinks.load(Ordering::SeqCst) {
            return Err(LinkError::Refused("downlink refused".to_string()));
        }
        self.downlinks.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                LinkError::Refused("downlink buffer full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                LinkError::Closed("downlink stream ended".to_string())
            }
        })
    }
}

impl InProcessHandle {
    /// Feed one uplink frame into the link.
    pub async fn push(&self, frame: Uplink) -> Result<(), LinkError> {
        self.uplinks
            .send(frame)
            .await
            .map_err(|_| LinkError::Closed("link is gone".to_string()))
    }

    /// Receive the next downlink accepted by the link.
    pub async fn next_downlink(&mut self) -> Option<Downlink> {
        self.downlinks.recv().await
    }
}

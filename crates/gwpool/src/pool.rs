//! Connection pool holding the current link for every connected gateway.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use proto::{Downlink, GatewayId, LinkError, PoolError, Uplink};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::link::GatewayLink;

/// Capacity of each per-gateway uplink channel.
const UPLINK_BUFFER: usize = 32;

/// Per-gateway record: the current link, the subscriber channel, and the
/// generation counter that retires stale pumps after a hand-off.
struct Registration {
    link: Option<Arc<dyn GatewayLink>>,
    uplinks: mpsc::Sender<Uplink>,
    generation: u64,
}

/// Routes frames between gateway links and their subscribers
///
/// One registration exists per gateway identity. [`Pool::subscribe`]
/// installs or replaces the gateway's live link and pumps its inbound
/// frames onto the subscriber channel; [`Pool::send`] delivers an
/// outbound frame to whichever link is current, without ever waiting
/// longer than the configured timeout.
pub struct Pool {
    registrations: Arc<DashMap<GatewayId, Registration>>,
    default_timeout: Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Pool {
    /// Creates an empty pool. `default_timeout` bounds [`Pool::send`]
    /// when no per-call timeout is given.
    pub fn new(default_timeout: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            registrations: Arc::new(DashMap::new()),
            default_timeout,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Register `link` as the current link for `id` and start pumping its
    /// inbound frames to the gateway's subscriber channel.
    ///
    /// Returns `Some(receiver)` when this call creates the subscription
    /// (first subscribe for the gateway, or the previous subscriber went
    /// away). A hand-off re-attaches the new link to the existing channel
    /// and returns `None`: the existing consumer keeps its receiver and
    /// frames from the new link start arriving on it. The pump of a
    /// superseded link stops forwarding as soon as it observes the newer
    /// generation, even if its link has not failed yet.
    pub fn subscribe(
        &self,
        id: GatewayId,
        link: Arc<dyn GatewayLink>,
    ) -> Option<mpsc::Receiver<Uplink>> {
        if *self.shutdown_rx.borrow() {
            warn!(gateway = %id, "subscribe on a pool that is shut down");
            return None;
        }

        let mut receiver = None;
        let (generation, uplinks) = {
            let mut entry = self.registrations.entry(id.clone()).or_insert_with(|| {
                let (tx, rx) = mpsc::channel(UPLINK_BUFFER);
                receiver = Some(rx);
                Registration {
                    link: None,
                    uplinks: tx,
                    generation: 0,
                }
            });
            if receiver.is_none() && entry.uplinks.is_closed() {
                let (tx, rx) = mpsc::channel(UPLINK_BUFFER);
                entry.uplinks = tx;
                receiver = Some(rx);
            }
            entry.generation += 1;
            entry.link = Some(Arc::clone(&link));
            (entry.generation, entry.uplinks.clone())
        };

        info!(gateway = %id, generation, "gateway link registered");

        tokio::spawn(run_pump(
            Arc::clone(&self.registrations),
            id,
            link,
            generation,
            uplinks,
            self.shutdown_rx.clone(),
        ));

        receiver
    }

    /// Deliver `frame` to the gateway's current link, bounded by the
    /// pool's default timeout.
    pub async fn send(&self, id: &GatewayId, frame: Downlink) -> Result<(), PoolError> {
        self.send_with_timeout(id, frame, self.default_timeout).await
    }

    /// Deliver `frame` to the gateway's current link, bounded by `timeout`.
    ///
    /// Fails immediately with [`PoolError::NoRoute`] when no live link is
    /// registered. Makes exactly one delivery attempt: no retry, and no
    /// re-resolution to a newer link mid-call.
    pub async fn send_with_timeout(
        &self,
        id: &GatewayId,
        frame: Downlink,
        timeout: Duration,
    ) -> Result<(), PoolError> {
        let link = match self.registrations.get(id) {
            Some(registration) => match &registration.link {
                Some(link) => Arc::clone(link),
                None => return Err(PoolError::NoRoute),
            },
            None => return Err(PoolError::NoRoute),
        };

        debug!(gateway = %id, correlation = %frame.correlation_id, "sending downlink");
        match tokio::time::timeout(timeout, link.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(LinkError::Refused(reason))) => Err(PoolError::DeliveryRefused(reason)),
            Ok(Err(err)) => Err(PoolError::DeliveryRefused(err.to_string())),
            Err(_) => {
                warn!(gateway = %id, ?timeout, "downlink delivery timed out");
                Err(PoolError::DeliveryTimedOut)
            }
        }
    }

    /// Whether a live link is currently registered for `id`.
    pub fn has_route(&self, id: &GatewayId) -> bool {
        self.registrations
            .get(id)
            .map(|registration| registration.link.is_some())
            .unwrap_or(false)
    }

    /// Number of gateways with a registration (live link or not).
    pub fn gateway_count(&self) -> usize {
        self.registrations.len()
    }

    /// Stop all pumps and drop every subscription channel.
    ///
    /// Subscriber streams terminate once their pumps have exited; calls
    /// to [`Pool::subscribe`] after shutdown are rejected.
    pub fn shutdown(&self) {
        info!("gateway pool shutting down");
        let _ = self.shutdown_tx.send(true);
        self.registrations.clear();
    }
}

/// Forwards frames from `link` to the subscriber channel until the link
/// fails, the pump is superseded, or the pool shuts down.
async fn run_pump(
    registrations: Arc<DashMap<GatewayId, Registration>>,
    id: GatewayId,
    link: Arc<dyn GatewayLink>,
    generation: u64,
    uplinks: mpsc::Sender<Uplink>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(gateway = %id, generation, "uplink pump started");
    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => {
                debug!(gateway = %id, generation, "uplink pump stopped by pool shutdown");
                return;
            }
            _ = link.closed() => {
                info!(gateway = %id, generation, "gateway link cancelled");
                clear_link_if_current(&registrations, &id, generation);
                return;
            }
            received = link.recv() => match received {
                Ok(frame) => frame,
                Err(err) => {
                    info!(gateway = %id, generation, error = %err, "gateway link terminated");
                    clear_link_if_current(&registrations, &id, generation);
                    return;
                }
            },
        };

        // A newer subscribe may have replaced this pump while recv was
        // parked; a stale pump must not forward anything.
        if current_generation(&registrations, &id) != Some(generation) {
            debug!(gateway = %id, generation, "uplink pump superseded, dropping frame");
            return;
        }

        if frame.status_only() {
            debug!(gateway = %id, "gateway status received");
        } else {
            debug!(gateway = %id, messages = frame.message_count(), "uplink received");
        }

        if uplinks.send(frame).await.is_err() {
            warn!(gateway = %id, generation, "uplink subscriber gone, stopping pump");
            clear_link_if_current(&registrations, &id, generation);
            return;
        }
    }
}

/// Clears the registration's current link, but only when `generation` is
/// still the current one; a newer link must not be knocked out by the
/// failure of the pump it replaced.
fn clear_link_if_current(
    registrations: &DashMap<GatewayId, Registration>,
    id: &GatewayId,
    generation: u64,
) {
    if let Some(mut registration) = registrations.get_mut(id)
        && registration.generation == generation
    {
        registration.link = None;
    }
}

fn current_generation(
    registrations: &DashMap<GatewayId, Registration>,
    id: &GatewayId,
) -> Option<u64> {
    registrations.get(id).map(|registration| registration.generation)
}

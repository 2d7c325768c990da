//! End-to-end pool scenarios: subscribe/hand-off/send against mock links.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use gwpool::{GatewayLink, Pool};
use proto::{
    Downlink, DownlinkMessage, GatewayId, GatewayStatus, LinkError, PoolError, Uplink,
    UplinkMessage,
};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Duration, timeout};

/// Mock transport link: queued uplink frames, togglable downlink accept,
/// and an optional artificial downlink delay.
struct MockLink {
    uplinks: Mutex<mpsc::UnboundedReceiver<Uplink>>,
    accept_downlinks: AtomicBool,
    downlink_delay: Option<Duration>,
    sent: Mutex<Vec<Downlink>>,
}

/// Test-side handle feeding uplinks into a [`MockLink`]. Dropping it
/// makes the link's `recv` fail, simulating a disconnect.
struct MockDriver {
    uplinks: mpsc::UnboundedSender<Uplink>,
}

impl MockLink {
    fn new() -> (Arc<Self>, MockDriver) {
        Self::with_delay(None)
    }

    fn with_delay(downlink_delay: Option<Duration>) -> (Arc<Self>, MockDriver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = Arc::new(Self {
            uplinks: Mutex::new(rx),
            accept_downlinks: AtomicBool::new(true),
            downlink_delay,
            sent: Mutex::new(Vec::new()),
        });
        (link, MockDriver { uplinks: tx })
    }

    fn set_accept_downlinks(&self, accept: bool) {
        self.accept_downlinks.store(accept, Ordering::SeqCst);
    }

    async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

impl MockDriver {
    /// Queues a frame; a frame pushed after the link died is silently
    /// lost, as it would be on a real transport.
    fn push(&self, frame: Uplink) {
        let _ = self.uplinks.send(frame);
    }
}

#[async_trait]
impl GatewayLink for MockLink {
    async fn recv(&self) -> Result<Uplink, LinkError> {
        let mut uplinks = self.uplinks.lock().await;
        match uplinks.recv().await {
            Some(frame) => Ok(frame),
            None => Err(LinkError::Closed("uplink stream ended".to_string())),
        }
    }

    async fn send(&self, frame: Downlink) -> Result<(), LinkError> {
        if let Some(delay) = self.downlink_delay {
            tokio::time::sleep(delay).await;
        }
        if !self.accept_downlinks.load(Ordering::SeqCst) {
            return Err(LinkError::Refused("downlink refused".to_string()));
        }
        self.sent.lock().await.push(frame);
        Ok(())
    }
}

fn uplink(payload: &[u8]) -> Uplink {
    Uplink::messages(vec![UplinkMessage::new(payload)])
}

fn downlink() -> Downlink {
    Downlink::new(DownlinkMessage::new(b"join-accept".as_slice()))
}

#[tokio::test]
async fn hand_off_drops_frames_buffered_on_the_old_link() {
    let pool = Pool::new(Duration::from_millis(100));
    let id = GatewayId::from("gw-1");

    let (link_a, driver_a) = MockLink::new();
    let mut stream = pool.subscribe(id.clone(), link_a).expect("receiver");

    let (link_b, driver_b) = MockLink::new();
    assert!(pool.subscribe(id.clone(), link_b).is_none());

    // These reach link A only after it has been superseded; none of them
    // may be forwarded.
    driver_a.push(uplink(b"stale-1"));
    driver_a.push(uplink(b"stale-2"));
    driver_a.push(uplink(b"stale-3"));
    driver_b.push(uplink(b"fresh"));

    let frame = timeout(Duration::from_secs(1), stream.recv())
        .await
        .expect("frame from the new link should arrive")
        .expect("stream should stay open");
    assert_eq!(frame.messages[0].payload, b"fresh");

    let idle = timeout(Duration::from_millis(150), stream.recv()).await;
    assert!(idle.is_err(), "stale frames must not reach the subscriber");
}

#[tokio::test]
async fn hand_off_keeps_downlinks_flowing_to_the_new_link() {
    let pool = Pool::new(Duration::from_millis(100));
    let id = GatewayId::from("gw-1");

    let (link_a, _driver_a) = MockLink::new();
    let _stream = pool.subscribe(id.clone(), link_a.clone());

    let (link_b, _driver_b) = MockLink::new();
    pool.subscribe(id.clone(), link_b.clone());

    pool.send(&id, downlink()).await.expect("send after hand-off");
    assert_eq!(link_a.sent_count().await, 0);
    assert_eq!(link_b.sent_count().await, 1);
}

#[tokio::test]
async fn a_blocked_gateway_does_not_delay_other_gateways() {
    let pool = Arc::new(Pool::new(Duration::from_millis(50)));
    let slow = GatewayId::from("gw-slow");
    let fast = GatewayId::from("gw-fast");

    let (slow_link, _slow_driver) = MockLink::with_delay(Some(Duration::from_secs(5)));
    let (fast_link, _fast_driver) = MockLink::new();
    pool.subscribe(slow.clone(), slow_link);
    pool.subscribe(fast.clone(), fast_link);

    let blocked = {
        let pool = Arc::clone(&pool);
        let slow = slow.clone();
        tokio::spawn(async move { pool.send(&slow, downlink()).await })
    };

    let started = Instant::now();
    pool.send(&fast, downlink())
        .await
        .expect("fast gateway accepts");
    assert!(
        started.elapsed() < Duration::from_millis(200),
        "send to an independent gateway took {:?}",
        started.elapsed()
    );

    let slow_result = blocked.await.expect("send task");
    assert!(matches!(slow_result, Err(PoolError::DeliveryTimedOut)));
}

#[tokio::test]
async fn refusal_timeout_and_no_route_are_distinct() {
    let pool = Pool::new(Duration::from_millis(50));

    let refusing = GatewayId::from("gw-refusing");
    let (refusing_link, _driver_a) = MockLink::new();
    refusing_link.set_accept_downlinks(false);
    pool.subscribe(refusing.clone(), refusing_link);

    let blocked = GatewayId::from("gw-blocked");
    let (blocked_link, _driver_b) = MockLink::with_delay(Some(Duration::from_secs(5)));
    pool.subscribe(blocked.clone(), blocked_link);

    let refused = pool.send(&refusing, downlink()).await;
    let timed_out = pool.send(&blocked, downlink()).await;
    let no_route = pool.send(&GatewayId::from("gw-absent"), downlink()).await;

    assert!(matches!(refused, Err(PoolError::DeliveryRefused(_))));
    assert!(matches!(timed_out, Err(PoolError::DeliveryTimedOut)));
    assert!(matches!(no_route, Err(PoolError::NoRoute)));
}

#[tokio::test]
async fn status_then_silence_yields_exactly_one_frame() {
    let pool = Pool::new(Duration::from_millis(100));
    let id = GatewayId::from("gw-1");

    let (link, driver) = MockLink::new();
    let mut stream = pool.subscribe(id, link).expect("receiver");

    driver.push(Uplink::status(GatewayStatus::now()));

    let frame = timeout(Duration::from_secs(1), stream.recv())
        .await
        .expect("status should be forwarded")
        .expect("stream should stay open");
    assert!(frame.status_only());
    assert_eq!(frame.message_count(), 0);

    let idle = timeout(Duration::from_millis(150), stream.recv()).await;
    assert!(idle.is_err(), "link is silent, nothing further may arrive");
}

#[tokio::test]
async fn disconnect_after_successful_send_leaves_no_route() {
    let pool = Pool::new(Duration::from_millis(100));
    let id = GatewayId::from("gw-1");

    let (link, driver) = MockLink::new();
    let _stream = pool.subscribe(id.clone(), link.clone());

    pool.send(&id, downlink()).await.expect("link accepts");
    assert_eq!(link.sent_count().await, 1);

    drop(driver);
    timeout(Duration::from_secs(1), async {
        while pool.has_route(&id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("route should be cleared after the link dies");

    let err = pool
        .send(&id, downlink())
        .await
        .expect_err("send after disconnect must fail");
    assert!(matches!(err, PoolError::NoRoute));
}

#[tokio::test]
async fn reconnect_after_failure_reuses_the_subscription() {
    let pool = Pool::new(Duration::from_millis(100));
    let id = GatewayId::from("gw-1");

    let (link_a, driver_a) = MockLink::new();
    let mut stream = pool.subscribe(id.clone(), link_a).expect("receiver");

    driver_a.push(uplink(b"before"));
    let frame = timeout(Duration::from_secs(1), stream.recv())
        .await
        .expect("first uplink")
        .expect("stream open");
    assert_eq!(frame.messages[0].payload, b"before");

    // Gateway drops and reconnects with a new link.
    drop(driver_a);
    timeout(Duration::from_secs(1), async {
        while pool.has_route(&id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("route cleared");

    let (link_b, driver_b) = MockLink::new();
    assert!(
        pool.subscribe(id.clone(), link_b).is_none(),
        "the logical subscription survives the reconnect"
    );
    assert!(pool.has_route(&id));

    driver_b.push(uplink(b"after"));
    let frame = timeout(Duration::from_secs(1), stream.recv())
        .await
        .expect("uplink from the new link")
        .expect("stream open");
    assert_eq!(frame.messages[0].payload, b"after");
}

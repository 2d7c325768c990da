//! Per-connection gateway session: handshake, wire codec, QUIC link.

use std::sync::Arc;

use async_trait::async_trait;
use gwpool::{GatewayLink, Pool};
use proto::{Downlink, GatewayError, GatewayId, LinkError, Uplink};
use quinn::{Connection, RecvStream, SendStream};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::server::UplinkHandler;

const MAX_FRAME_LEN: usize = 1_048_576;

/// Wire envelope for frames sent by a gateway to the server
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayFrame {
    /// Connection handshake: the gateway identifies itself.
    Hello { gateway_id: GatewayId },
    /// Uplink traffic.
    Uplink(Uplink),
}

/// One gateway's QUIC connection as a pool link
///
/// Uplinks arrive on the receive half of the session's persistent bi
/// stream; downlinks are written to the send half. The connection itself
/// stays owned by the session task.
pub struct QuicLink {
    conn: Connection,
    recv: Mutex<RecvStream>,
    send: Mutex<SendStream>,
}

impl QuicLink {
    /// Wraps an established connection and its session stream halves.
    pub fn new(conn: Connection, send: SendStream, recv: RecvStream) -> Self {
        Self {
            conn,
            recv: Mutex::new(recv),
            send: Mutex::new(send),
        }
    }
}

#[async_trait]
impl GatewayLink for QuicLink {
    async fn recv(&self) -> Result<Uplink, LinkError> {
        let mut stream = self.recv.lock().await;
        match read_frame::<GatewayFrame>(&mut stream).await {
            Ok(GatewayFrame::Uplink(frame)) => Ok(frame),
            Ok(GatewayFrame::Hello { gateway_id }) => Err(LinkError::Protocol(format!(
                "unexpected hello from {gateway_id}"
            ))),
            Err(GatewayError::FrameTooLarge(len)) => {
                Err(LinkError::Protocol(format!("frame too large: {len} bytes")))
            }
            Err(err) => Err(LinkError::Closed(err.to_string())),
        }
    }

    async fn send(&self, frame: Downlink) -> Result<(), LinkError> {
        let mut stream = self.send.lock().await;
        write_frame(&mut stream, &frame)
            .await
            .map_err(|err| LinkError::Closed(err.to_string()))
    }

    async fn closed(&self) {
        self.conn.closed().await;
    }
}

/// Run one gateway session: handshake, register the link with the pool,
/// forward the subscription to `handler`, and hold until the connection
/// ends.
pub async fn run_session(
    conn: Connection,
    pool: Arc<Pool>,
    handler: UplinkHandler,
) -> Result<(), GatewayError> {
    let remote = conn.remote_address();
    let (send, mut recv) = conn
        .accept_bi()
        .await
        .map_err(|e| GatewayError::Connection(e.to_string()))?;

    let frame: GatewayFrame = read_frame(&mut recv).await?;
    let GatewayFrame::Hello { gateway_id } = frame else {
        return Err(GatewayError::Handshake(
            "gateway did not identify itself".to_string(),
        ));
    };
    info!(gateway = %gateway_id, %remote, "gateway session started");

    let link = Arc::new(QuicLink::new(conn.clone(), send, recv));
    if let Some(mut uplinks) = pool.subscribe(gateway_id.clone(), link) {
        let handler = Arc::clone(&handler);
        let id = gateway_id.clone();
        tokio::spawn(async move {
            while let Some(frame) = uplinks.recv().await {
                handler(id.clone(), frame).await;
            }
            debug!(gateway = %id, "uplink subscription ended");
        });
    }

    conn.closed().await;
    info!(gateway = %gateway_id, %remote, "gateway session closed");
    Ok(())
}

/// Reads one length-prefixed JSON frame from the stream.
pub(crate) async fn read_frame<T: DeserializeOwned>(
    recv: &mut RecvStream,
) -> Result<T, GatewayError> {
    let mut len_buf = [0u8; 4];
    recv.read_exact(&mut len_buf)
        .await
        .map_err(|e| GatewayError::Connection(e.to_string()))?;
    let len = parse_frame_len(len_buf);
    ensure_frame_len(len)?;

    let mut buf = vec![0u8; len];
    recv.read_exact(&mut buf)
        .await
        .map_err(|e| GatewayError::Connection(e.to_string()))?;

    decode_frame(&buf)
}

/// Writes one length-prefixed JSON frame to the stream.
pub(crate) async fn write_frame<T: Serialize>(
    send: &mut SendStream,
    frame: &T,
) -> Result<(), GatewayError> {
    let bytes = serde_json::to_vec(frame)
        .map_err(|e| GatewayError::Connection(format!("Serialize error: {e}")))?;
    ensure_frame_len(bytes.len())?;

    send.write_all(&(bytes.len() as u32).to_be_bytes())
        .await
        .map_err(|e| GatewayError::Connection(e.to_string()))?;
    send.write_all(&bytes)
        .await
        .map_err(|e| GatewayError::Connection(e.to_string()))?;
    Ok(())
}

/// Parses a big-endian 4-byte frame length prefix.
fn parse_frame_len(len_buf: [u8; 4]) -> usize {
    u32::from_be_bytes(len_buf) as usize
}

/// Validates a payload size against the maximum frame size.
fn ensure_frame_len(len: usize) -> Result<(), GatewayError> {
    if len > MAX_FRAME_LEN {
        return Err(GatewayError::FrameTooLarge(len));
    }
    Ok(())
}

/// Deserializes a JSON payload into a frame.
fn decode_frame<T: DeserializeOwned>(buf: &[u8]) -> Result<T, GatewayError> {
    serde_json::from_slice(buf)
        .map_err(|e| GatewayError::Connection(format!("Deserialize error: {e}")))
}

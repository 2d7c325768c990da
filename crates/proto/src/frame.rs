use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound frame from a gateway: a status report, uplink messages, or both
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Uplink {
    /// Gateway status report, if this frame carries one.
    pub status: Option<GatewayStatus>,
    /// Uplink messages relayed by the gateway.
    pub messages: Vec<UplinkMessage>,
}

impl Uplink {
    /// Creates an uplink frame carrying only a status report.
    pub fn status(status: GatewayStatus) -> Self {
        Self {
            status: Some(status),
            messages: Vec::new(),
        }
    }

    /// Creates an uplink frame carrying device messages.
    pub fn messages(messages: Vec<UplinkMessage>) -> Self {
        Self {
            status: None,
            messages,
        }
    }

    /// Whether this frame is a status-only heartbeat with no device traffic.
    pub fn status_only(&self) -> bool {
        self.status.is_some() && self.messages.is_empty()
    }

    /// Number of device messages in this frame.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// Periodic status report from a gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStatus {
    /// Time at which the gateway produced the report.
    pub time: DateTime<Utc>,
    /// Free-form gateway metrics (rx/tx counters, versions, ...).
    pub metrics: Option<serde_json::Value>,
}

impl GatewayStatus {
    /// Creates a status report stamped with the current time.
    pub fn now() -> Self {
        Self {
            time: Utc::now(),
            metrics: None,
        }
    }
}

/// One device message relayed upward by a gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UplinkMessage {
    /// Raw PHY payload as received over the air.
    pub payload: Vec<u8>,
    /// Time at which the gateway received the message.
    pub received_at: DateTime<Utc>,
}

impl UplinkMessage {
    /// Creates an uplink message stamped with the current time.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

/// Outbound frame from the network to a gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Downlink {
    /// Correlation id carried through logs on both sides of the link.
    pub correlation_id: Uuid,
    /// The message to transmit.
    pub message: DownlinkMessage,
}

impl Downlink {
    /// Creates a downlink frame with a fresh correlation id.
    pub fn new(message: DownlinkMessage) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            message,
        }
    }
}

/// One device message to be transmitted by a gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownlinkMessage {
    /// Raw PHY payload to transmit.
    pub payload: Vec<u8>,
}

impl DownlinkMessage {
    /// Creates a downlink message from a raw payload.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

use thiserror::Error;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading/validation error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Gateway transport/runtime error.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Connection pool routing error.
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Gateway link failure.
    #[error("Link error: {0}")]
    Link(#[from] LinkError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

/// Gateway transport errors
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network/connection-level failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// TLS setup/handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// QUIC endpoint setup failure.
    #[error("Endpoint error: {0}")]
    Endpoint(String),

    /// The gateway failed to identify itself on connect.
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// A wire frame exceeded the size limit.
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),
}

/// Routing errors returned by the gateway connection pool
#[derive(Debug, Error)]
pub enum PoolError {
    /// No live link is registered for the target gateway.
    #[error("No route to gateway")]
    NoRoute,

    /// The gateway link explicitly rejected the frame.
    #[error("Downlink refused: {0}")]
    DeliveryRefused(String),

    /// The gateway link neither accepted nor rejected within the bound.
    #[error("Downlink delivery timed out")]
    DeliveryTimedOut,
}

/// Failures reported by a gateway link
#[derive(Debug, Error)]
pub enum LinkError {
    /// The remote end or transport closed the link.
    #[error("Link closed: {0}")]
    Closed(String),

    /// The transport rejected the frame (backpressure or policy).
    #[error("Frame refused: {0}")]
    Refused(String),

    /// The peer violated the wire protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_config_error_variant() {
        let err = ConfigError::InvalidValue {
            field: "listen".to_string(),
            reason: "not a socket address".to_string(),
        };
        assert!(err.to_string().contains("Invalid value for listen"));
    }

    #[test]
    fn wraps_gateway_error_into_top_level_error() {
        let err: Error = GatewayError::Connection("closed".to_string()).into();
        assert!(err.to_string().contains("Gateway error"));
    }

    #[test]
    fn wraps_pool_and_link_errors() {
        let pool_err: Error = PoolError::NoRoute.into();
        assert!(pool_err.to_string().contains("Pool error"));

        let link_err: Error = LinkError::Closed("reset by peer".to_string()).into();
        assert!(link_err.to_string().contains("Link error"));
    }

    #[test]
    fn pool_error_variants_are_distinguishable() {
        let refused = PoolError::DeliveryRefused("duty cycle".to_string());
        let timed_out = PoolError::DeliveryTimedOut;
        let no_route = PoolError::NoRoute;

        assert!(refused.to_string().contains("refused"));
        assert!(timed_out.to_string().contains("timed out"));
        assert!(no_route.to_string().contains("No route"));
    }
}

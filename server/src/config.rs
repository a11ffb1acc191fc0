//! Startup configuration for the chat server

use shared::{FrameCodec, FrameError, HEADER_LENGTH};
use std::time::Duration;

/// Server settings, filled from command-line flags by the binary
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listener to
    pub host: String,
    /// Port to listen on (0 picks an ephemeral port)
    pub port: u16,
    /// Width of the ASCII length header in bytes
    pub header_width: usize,
    /// Largest payload accepted from a client (default: whatever the header can express)
    pub max_payload: Option<usize>,
    /// Broadcasts buffered per connection before the peer is dropped
    pub outbound_queue: usize,
    /// How long a new connection may take to send its username
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1234,
            header_width: HEADER_LENGTH,
            max_payload: None,
            outbound_queue: 64,
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn codec(&self) -> Result<FrameCodec, FrameError> {
        FrameCodec::new(self.header_width, self.max_payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr(), "127.0.0.1:1234");
        assert_eq!(config.header_width, 10);
        assert_eq!(config.codec().unwrap(), FrameCodec::default());
        assert_eq!(config.codec().unwrap().limit(), 9_999_999_999);
    }

    #[test]
    fn test_invalid_header_width() {
        let config = ServerConfig {
            header_width: 0,
            ..ServerConfig::default()
        };

        assert!(config.codec().is_err());
    }
}

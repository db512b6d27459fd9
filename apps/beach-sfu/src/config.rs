use url::Url;

use crate::negotiation::rtc::RtcPeerConfig;

pub const DEFAULT_ADDRESS: &str = "localhost:7001";
pub const DEFAULT_SID: &str = "1819cd84-f0be-498f-bc49-19f1f7d2f585";
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";
pub const SIGNALING_PATH: &str = "/ws";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid signaling address {address:?}: {source}")]
    InvalidAddress {
        address: String,
        source: url::ParseError,
    },
}

/// Publisher configuration, usually filled in from the command line.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the SFU, or a full `ws://` / `wss://` URL.
    pub address: String,
    pub sid: String,
    pub ice_servers: Vec<String>,
    /// How many times a failed negotiation is retried with a fresh peer.
    pub max_retries: u32,
}

impl ClientConfig {
    pub fn signaling_url(&self) -> Result<Url, ConfigError> {
        let address = self.address.trim();
        let explicit = address.starts_with("ws://") || address.starts_with("wss://");
        let raw = if explicit {
            address.to_string()
        } else {
            // Normalize localhost to IPv4 to avoid IPv6 (::1) preference on macOS
            let host = if address == "localhost" || address.starts_with("localhost:") {
                address.replacen("localhost", "127.0.0.1", 1)
            } else {
                address.to_string()
            };
            format!("ws://{host}{SIGNALING_PATH}")
        };
        let mut url = Url::parse(&raw).map_err(|source| ConfigError::InvalidAddress {
            address: self.address.clone(),
            source,
        })?;
        if explicit && url.path() == "/" {
            url.set_path(SIGNALING_PATH);
        }
        Ok(url)
    }

    pub fn rtc_peer_config(&self) -> RtcPeerConfig {
        RtcPeerConfig {
            ice_servers: self.ice_servers.clone(),
            ..RtcPeerConfig::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            sid: DEFAULT_SID.to_string(),
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            max_retries: 3,
        }
    }
}

//! Structured session description as handed over by the signaling side.
//!
//! Only the fields the gateway consults are modelled; the text form is parsed
//! elsewhere.

use serde::{Deserialize, Serialize};

use crate::Ssrc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default)]
    pub ip: Option<String>,
    /// 4 or 6.
    #[serde(default)]
    pub version: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescription {
    pub port: u16,
    pub protocol: String,
    /// `a=setup:` value, `active` or `passive` for TCP media.
    #[serde(default)]
    pub setup: Option<String>,
    /// GB28181 `y=` line.
    #[serde(default)]
    pub ssrc: Option<Ssrc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(default)]
    pub origin: Origin,
    #[serde(default)]
    pub connection: Option<Connection>,
    #[serde(default)]
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    /// Connection address, falling back to the origin address.
    pub fn host(&self) -> &str {
        self.connection
            .as_ref()
            .and_then(|c| c.ip.as_deref())
            .filter(|ip| !ip.is_empty())
            .unwrap_or(&self.origin.address)
    }
}

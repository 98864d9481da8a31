use crate::codec::MAX_FRAME_LENGTH;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// TCP and UDP listen address for RTP; RTCP uses the next port.
    pub listen: String,
    /// Base url publishers push to, the ssrc is appended as stream key.
    pub rtmp_server: String,
    /// Control and monitor http address.
    pub http: String,
    pub max_frame_length: usize,
    pub idle_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9200".to_owned(),
            rtmp_server: "rtmp://127.0.0.1:1935/live".to_owned(),
            http: "[::]:3000".to_owned(),
            max_frame_length: MAX_FRAME_LENGTH,
            idle_timeout_secs: 30,
        }
    }
}

impl GatewayConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: GatewayConfig = toml::from_str(text)?;
        Ok(config)
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length.clamp(1, MAX_FRAME_LENGTH)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config = GatewayConfig::from_toml("rtmp_server = \"rtmp://10.0.0.5/gb\"\n").unwrap();
        assert_eq!(config.rtmp_server, "rtmp://10.0.0.5/gb");
        assert_eq!(config.listen, "0.0.0.0:9200");
        assert_eq!(config.max_frame_length(), MAX_FRAME_LENGTH);
    }

    #[test]
    fn lower_frame_limit_is_optional() {
        let config = GatewayConfig::from_toml("max_frame_length = 16384\n").unwrap();
        assert_eq!(config.max_frame_length(), 16384);
    }

    #[test]
    fn limits_are_clamped() {
        let config = GatewayConfig::from_toml("max_frame_length = 1000000\nidle_timeout_secs = 0\n")
            .unwrap();
        assert_eq!(config.max_frame_length(), MAX_FRAME_LENGTH);
        assert_eq!(config.idle_timeout(), Duration::from_secs(1));
    }
}

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Id of the script block that holds user code inside the frame.
    pub user_code_id: String,
    /// Wait before capturing the canvas after a popup-open update.
    pub capture_delay_ms: u64,
    /// Frame rate requested from the canvas stream.
    pub capture_frame_rate: u32,
    /// Frames per second for the native run loop.
    pub sketch_frame_rate: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            user_code_id: "sketch-user-code".to_string(),
            capture_delay_ms: 100,
            capture_frame_rate: 30,
            sketch_frame_rate: 60,
        }
    }
}

impl HostConfig {
    pub fn capture_delay(&self) -> Duration {
        Duration::from_millis(self.capture_delay_ms)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        Self::from_json(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = HostConfig::from_json(r#"{"capture_delay_ms": 250}"#).unwrap();
        assert_eq!(config.capture_delay(), Duration::from_millis(250));
        assert_eq!(config.user_code_id, "sketch-user-code");
        assert_eq!(config.capture_frame_rate, 30);
    }

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(HostConfig::from_json("").unwrap(), HostConfig::default());
        assert!(HostConfig::from_json("[1]").is_err());
    }
}

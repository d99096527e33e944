//! Network configuration for a mesh node.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shortest allowed delay between upstream reconnect attempts.
pub const MIN_RECONNECT_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration for the socket bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Mesh server address. Unless `client_only` is set the node listens
    /// here, and every node dials it as its upstream.
    pub server: String,

    /// Do not listen; only hold the upstream connection.
    pub client_only: bool,

    /// Advisory node name included in NODE reports.
    pub name: Option<String>,

    /// Delay between upstream reconnect attempts, in milliseconds on disk.
    /// Clamped to [`MIN_RECONNECT_INTERVAL`] by [`normalized`](Self::normalized).
    #[serde(with = "duration_serde")]
    pub reconnect_interval: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:5000".to_string(),
            client_only: false,
            name: None,
            reconnect_interval: Duration::from_secs(3),
        }
    }
}

impl NetworkConfig {
    /// Clamp values that would make the node misbehave.
    pub fn normalized(mut self) -> Self {
        if self.reconnect_interval < MIN_RECONNECT_INTERVAL {
            tracing::warn!(
                "reconnect_interval {:?} is below {:?}, using the minimum",
                self.reconnect_interval,
                MIN_RECONNECT_INTERVAL
            );
            self.reconnect_interval = MIN_RECONNECT_INTERVAL;
        }
        self
    }

    /// Save the config to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create directory: {e}"))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {e}"))?;
        std::fs::write(path, json).map_err(|e| format!("Failed to write config file: {e}"))
    }

    /// Load config from a JSON file, or return defaults if the file is missing.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str::<NetworkConfig>(&data) {
                    Ok(config) => return config.normalized(),
                    Err(e) => {
                        tracing::warn!("Corrupt config file, using defaults: {e}");
                    }
                },
                Err(e) => {
                    tracing::warn!("Cannot read config file, using defaults: {e}");
                }
            }
        }
        Self::default()
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(dur.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

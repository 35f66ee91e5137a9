//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use fpsim_core::SingleFlight;

use crate::engine::EngineConfig;
use crate::error::{DaemonError, Result};

/// Kind of sensor being simulated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Rear,
    UnderDisplayUltrasonic,
    UnderDisplayOptical,
    PowerButton,
    HomeButton,
}

impl SensorType {
    /// Whether the sensor sits under the display and takes pointer events
    pub fn is_under_display(self) -> bool {
        matches!(
            self,
            Self::UnderDisplayUltrasonic | Self::UnderDisplayOptical
        )
    }
}

/// Biometric strength class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorStrength {
    Convenience,
    Weak,
    Strong,
}

/// Static description of the simulated sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Id clients must use to open a session
    pub sensor_id: i32,
    pub sensor_type: SensorType,
    pub strength: SensorStrength,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            sensor_id: 5,
            sensor_type: SensorType::UnderDisplayOptical,
            strength: SensorStrength::Strong,
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Unix socket path for IPC
    pub ipc_socket_path: PathBuf,

    /// Simulated sensor
    #[serde(default)]
    pub sensor: SensorConfig,

    /// Simulated engine behavior
    #[serde(default)]
    pub engine: EngineConfig,

    /// Reaction to overlapping requests within a session
    #[serde(default)]
    pub single_flight: SingleFlight,

    /// Name of the worker thread running session operations
    #[serde(default = "DaemonConfig::default_worker_name")]
    pub worker_name: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            ipc_socket_path: Self::default_ipc_path(),
            sensor: SensorConfig::default(),
            engine: EngineConfig::default(),
            single_flight: SingleFlight::default(),
            worker_name: Self::default_worker_name(),
        }
    }
}

impl DaemonConfig {
    /// Default IPC path
    pub fn default_ipc_path() -> PathBuf {
        // Use XDG_RUNTIME_DIR if available, fallback to /tmp
        std::env::var_os("XDG_RUNTIME_DIR")
            .map(|dir| PathBuf::from(dir).join("fpsim.sock"))
            .unwrap_or_else(|| PathBuf::from("/tmp/fpsim.sock"))
    }

    fn default_worker_name() -> String {
        "fpsim-worker".to_string()
    }

    /// Config file location: `FPSIM_CONFIG`, else `daemon.json` under the
    /// platform config directory
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os("FPSIM_CONFIG") {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("fpsim")
            .join("daemon.json")
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, writing the defaults there first if it is absent
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.save(path)?;
        tracing::info!("Created default config at {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create directories if they don't exist
    pub fn ensure_directories(&self) -> Result<()> {
        if let Some(parent) = self.ipc_socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sensor.sensor_id < 0 {
            return Err(DaemonError::Config(format!(
                "sensor id must be non-negative, got {}",
                self.sensor.sensor_id
            )));
        }
        if self.engine.max_enrollments == 0 {
            return Err(DaemonError::Config(
                "max_enrollments must be at least 1".to_string(),
            ));
        }
        if self.worker_name.is_empty() {
            return Err(DaemonError::Config("worker_name is empty".to_string()));
        }
        self.engine.lockout.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.json");

        let mut config = DaemonConfig::default();
        config.ipc_socket_path = dir.path().join("fpsim.sock");
        config.single_flight = SingleFlight::Relaxed;
        config.engine.enrollment_hit = Some(2);
        config.save(&path).unwrap();

        let loaded = DaemonConfig::load(&path).unwrap();
        assert_eq!(loaded.ipc_socket_path, config.ipc_socket_path);
        assert_eq!(loaded.single_flight, SingleFlight::Relaxed);
        assert_eq!(loaded.engine, config.engine);
        assert_eq!(loaded.sensor, config.sensor);
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("daemon.json");

        let created = DaemonConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.single_flight, SingleFlight::Strict);

        let reloaded = DaemonConfig::load_or_create(&path).unwrap();
        assert_eq!(reloaded.worker_name, created.worker_name);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.json");
        std::fs::write(&path, r#"{"ipc_socket_path": "/tmp/x.sock"}"#).unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.sensor, SensorConfig::default());
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.worker_name, "fpsim-worker");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.json");

        let mut config = DaemonConfig::default();
        config.sensor.sensor_id = -1;
        config.save(&path).unwrap();

        assert!(matches!(
            DaemonConfig::load(&path),
            Err(DaemonError::Config(_))
        ));
    }
}

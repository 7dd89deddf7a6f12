//! Channel configuration
//!
//! Typed settings shared by every channel handle. Built in code or loaded
//! from YAML; the core never reads environment variables.
//!
//! # Example
//!
//! ```yaml
//! # permission bits for newly created segments
//! mode: 0o660
//! poll_quantum_ms: 1
//! open_wait_ms: 500
//! probe_interval_ms: 1000
//! reader_timeout_ms: 2000
//! protocol: current
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{MediaRingError, MediaRingResult};

/// Item protocol major version stamped into a channel head.
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVersion {
    /// Fixed sub-header, offsets recomputed from lengths.
    Legacy = 1,
    /// Sub-header stores offsets; optional trailing layout blob.
    #[default]
    Current = 2,
}

impl ProtocolVersion {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(ProtocolVersion::Legacy),
            2 => Some(ProtocolVersion::Current),
            _ => None,
        }
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Settings for one channel handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Permission bits for segments this handle creates.
    pub mode: u32,
    /// Sleep between attempts of a polling call.
    pub poll_quantum_ms: u64,
    /// How long a reader waits for the writer to stamp the version.
    pub open_wait_ms: u64,
    /// Minimum interval between OS existence probes in `sendable`.
    pub probe_interval_ms: u64,
    /// Reader heartbeat age still counted as "has readers".
    pub reader_timeout_ms: u64,
    /// Item protocol the writer stamps on creation.
    pub protocol: ProtocolVersion,
    /// Extra user bytes reserved after the channel head.
    pub fixed_user_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            mode: 0o666,
            poll_quantum_ms: 1,
            open_wait_ms: 1000,
            probe_interval_ms: 1000,
            reader_timeout_ms: 1000,
            protocol: ProtocolVersion::Current,
            fixed_user_size: 0,
        }
    }
}

impl ChannelConfig {
    /// Parse from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> MediaRingResult<Self> {
        let config: ChannelConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file.
    pub fn from_file(path: &Path) -> MediaRingResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml(&self) -> MediaRingResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> MediaRingResult<()> {
        if self.mode & !0o777 != 0 {
            return Err(MediaRingError::config(format!(
                "mode {:o} has bits outside 0o777",
                self.mode
            )));
        }
        if self.poll_quantum_ms == 0 {
            return Err(MediaRingError::config("poll_quantum_ms must be > 0"));
        }
        if self.probe_interval_ms == 0 {
            return Err(MediaRingError::config("probe_interval_ms must be > 0"));
        }
        Ok(())
    }

    pub fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_open_wait(mut self, wait: Duration) -> Self {
        self.open_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval_ms = interval.as_millis().max(1) as u64;
        self
    }

    #[inline]
    pub fn poll_quantum(&self) -> Duration {
        Duration::from_millis(self.poll_quantum_ms)
    }

    #[inline]
    pub fn open_wait(&self) -> Duration {
        Duration::from_millis(self.open_wait_ms)
    }

    #[inline]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    #[inline]
    pub fn reader_timeout(&self) -> Duration {
        Duration::from_millis(self.reader_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let config = ChannelConfig::default();
        config.validate().unwrap();
        assert_eq!(config.poll_quantum(), Duration::from_millis(1));
        assert_eq!(config.protocol, ProtocolVersion::Current);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = ChannelConfig::from_yaml_str("open_wait_ms: 50\nprotocol: legacy\n").unwrap();
        assert_eq!(config.open_wait_ms, 50);
        assert_eq!(config.protocol, ProtocolVersion::Legacy);
        assert_eq!(config.mode, 0o666);
    }

    #[test]
    fn rejects_zero_quantum() {
        let err = ChannelConfig::from_yaml_str("poll_quantum_ms: 0").unwrap_err();
        assert!(matches!(err, MediaRingError::Config(_)));
    }

    #[test]
    fn rejects_mode_outside_permission_bits() {
        let config = ChannelConfig {
            mode: 0o4777,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "reader_timeout_ms: 250").unwrap();
        let config = ChannelConfig::from_file(file.path()).unwrap();
        assert_eq!(config.reader_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn yaml_roundtrip() {
        let config = ChannelConfig::default().with_protocol(ProtocolVersion::Legacy);
        let text = config.to_yaml().unwrap();
        assert_eq!(ChannelConfig::from_yaml_str(&text).unwrap(), config);
    }

    #[test]
    fn protocol_numbers() {
        assert_eq!(ProtocolVersion::from_u32(1), Some(ProtocolVersion::Legacy));
        assert_eq!(ProtocolVersion::from_u32(2), Some(ProtocolVersion::Current));
        assert_eq!(ProtocolVersion::from_u32(0), None);
    }
}

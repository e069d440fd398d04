//! # Error Types Module
//!
//! Centralized error handling for hrm-notify.
//!
//! ## Error Types
//! - `DecodeError`: a notification payload shorter than its flags declare
//! - `MonitorError`: discovery, connection and subscription failures
//! - `ConfigError`: configuration file I/O and parsing errors
//!
//! A `DecodeError` only discards the offending notification. A `MonitorError`
//! ends the connection attempt; the caller decides whether to try again.

use std::fmt;

/// Errors produced while decoding a Heart Rate Measurement payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload is shorter than the fields declared by its flags byte
    MalformedPayload { required: usize, actual: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::MalformedPayload { required, actual } => {
                write!(
                    f,
                    "Malformed heart rate payload: flags require {} bytes, got {}",
                    required, actual
                )
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors that can occur while establishing or running a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    /// Bluetooth manager initialization failed
    ManagerInit(String),
    /// No Bluetooth adapter at the configured index
    NoAdapter,
    /// Scan could not be started or stopped
    Scan(String),
    /// No device advertises the Heart Rate Service
    DeviceNotFound,
    /// Failed to connect to the device or discover its services
    Connection { device: String, reason: String },
    /// Heart Rate Measurement notifications could not be enabled
    SubscriptionFailed { device: String, reason: String },
    /// Failed to create Tokio runtime
    RuntimeCreation(String),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::ManagerInit(msg) => {
                write!(f, "Failed to initialize Bluetooth manager: {}", msg)
            }
            MonitorError::NoAdapter => {
                write!(f, "No Bluetooth adapter found. Please ensure Bluetooth is enabled.")
            }
            MonitorError::Scan(msg) => {
                write!(f, "Scan operation failed: {}", msg)
            }
            MonitorError::DeviceNotFound => {
                write!(f, "Cannot find heart rate monitor")
            }
            MonitorError::Connection { device, reason } => {
                write!(f, "Failed to connect to device {}: {}", device, reason)
            }
            MonitorError::SubscriptionFailed { device, reason } => {
                write!(
                    f,
                    "Cannot enable heart rate notifications on {}: {}",
                    device, reason
                )
            }
            MonitorError::RuntimeCreation(msg) => {
                write!(f, "Failed to create async runtime: {}", msg)
            }
        }
    }
}

impl std::error::Error for MonitorError {}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::MalformedPayload { required: 3, actual: 2 };
        let msg = err.to_string();
        assert!(msg.contains("3 bytes"));
        assert!(msg.contains("got 2"));
    }

    #[test]
    fn test_monitor_errors_are_distinguishable() {
        let not_found = MonitorError::DeviceNotFound;
        let sub = MonitorError::SubscriptionFailed {
            device: "Polar H10".to_string(),
            reason: "write failed".to_string(),
        };
        assert_ne!(not_found, sub);
        assert!(not_found.to_string().contains("heart rate monitor"));
        assert!(sub.to_string().contains("Polar H10"));
    }

    #[test]
    fn test_no_adapter_display() {
        let err = MonitorError::NoAdapter;
        assert!(err.to_string().contains("Bluetooth"));
    }

    #[test]
    fn test_config_parse_error_from_file() {
        use crate::config::Config;
        use std::error::Error;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "adapter_index = -1").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed(_)));
        assert!(err.to_string().starts_with("Failed to parse config file"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_config_error_chain() {
        use std::error::Error;
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ConfigError::ReadFailed(io_err);
        assert!(err.source().is_some());
    }
}

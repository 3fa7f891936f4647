//! Unified error handling for the TMU stack
//!
//! One error type shared by the thermal engine, the daemon and the client.
//! Built on thiserror so every variant carries a readable Display impl.

use std::io;
use std::path::PathBuf;

/// Result type alias using TmuError
pub type Result<T> = std::result::Result<T, TmuError>;

/// Unified error type for all TMU operations
#[derive(thiserror::Error, Debug)]
pub enum TmuError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("File too large: {path} ({size} bytes, max {max_size} bytes)")]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        max_size: u64,
    },

    // ============================================================================
    // Register Window Errors
    // ============================================================================
    #[error("Failed to map register window at {address:#x}: {reason}")]
    Mapping {
        address: u64,
        reason: String,
    },

    #[error("Register offset {offset:#x} outside window of {size:#x} bytes")]
    RegisterOutOfRange {
        offset: u32,
        size: u32,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Device Lifecycle Errors
    // ============================================================================
    #[error("Device not ready: {0}")]
    NotReady(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Thermal zone not bound: {0}")]
    ZoneNotBound(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    // ============================================================================
    // Daemon and IPC Errors
    // ============================================================================
    #[error("Daemon not available")]
    DaemonNotAvailable,

    #[error("Daemon connection failed: {0}")]
    DaemonConnection(String),

    #[error("Daemon request failed: {0}")]
    DaemonRequest(String),

    #[error("IPC protocol error: {0}")]
    IpcProtocol(String),

    #[error("Message too large: {size} bytes (max {max_size} bytes)")]
    MessageTooLarge {
        size: usize,
        max_size: usize,
    },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl TmuError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a field-level configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a daemon error from a string
    pub fn daemon(msg: impl Into<String>) -> Self {
        Self::DaemonRequest(msg.into())
    }

    /// True for errors raised while validating or applying configuration
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::InvalidConfig { .. } | Self::JsonParse(_)
        )
    }
}

impl From<String> for TmuError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

impl From<&str> for TmuError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}

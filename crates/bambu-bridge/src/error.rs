//! Error types for the telemetry bridge.

use thiserror::Error;

/// Errors from bridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration is incomplete or out of range.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Network or TLS failure while connecting to the telemetry channel.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// The printer rejected the access code.
    #[error("authentication rejected (code {0})")]
    AuthRejected(u8),

    /// MQTT client error.
    #[error("MQTT error: {0}")]
    Mqtt(String),

    /// Payload is not a status report.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Color is not a 6 or 8 digit hex string.
    #[error("invalid color: {0:?}")]
    InvalidColor(String),

    /// Model image retrieval failed.
    #[error("asset fetch failed: {0}")]
    AssetFetch(#[from] AssetError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the model image fetch.
#[derive(Error, Debug)]
pub enum AssetError {
    /// The transfer endpoint could not be reached or the transfer broke off.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Login was refused.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Downloaded bytes are not a zip container.
    #[error("downloaded file is not an archive")]
    NotAFileArchive,

    /// The archive has no entry with the expected name.
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// The extracted image could not be stored.
    #[error("write failed: {0}")]
    WriteFailed(#[source] std::io::Error),
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

//! WolfMesh Error Types

use thiserror::Error;

/// Result type alias for WolfMesh operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfMesh error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    // Directory errors
    #[error("Could not reach directory at {address}: {reason}")]
    Transport { address: String, reason: String },

    #[error("Could not decode peer list from {address}: {reason}")]
    Decode { address: String, reason: String },

    // Collaborator errors
    #[error("WireGuard control error on {interface}: {reason}")]
    ControlPlane { interface: String, reason: String },

    #[error("Link error on {interface}: {reason}")]
    Link { interface: String, reason: String },

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors a reconciliation attempt absorbs before the next cycle
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::Decode { .. } | Error::ControlPlane { .. }
        )
    }

    /// Check if the collaborator reported the interface as absent
    pub fn is_device_not_found(&self) -> bool {
        matches!(self, Error::DeviceNotFound(_))
    }
}

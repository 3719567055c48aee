//! Error types for the proxy
//!
//! [`BridgeError`] covers the failures the bridge itself reports while wiring
//! the two links together. Link failures are boxed unchanged as the error
//! source so callers can downcast to the concrete link error.

use thiserror::Error;

/// Boxed link error carried as a source
pub type LinkError = Box<dyn std::error::Error + Send + Sync>;

/// Failures reported by the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no usb serial devices detected")]
    NoDeviceFound,

    #[error("multiple usb serial devices detected, choose one with --port: {}", .0.join(", "))]
    AmbiguousDevice(Vec<String>),

    #[error("failed to connect to device: {0}")]
    DeviceConnection(#[source] LinkError),

    #[error("failed to connect to broker: {0}")]
    BrokerConnection(#[source] LinkError),

    #[error("device link lost: {0}")]
    DeviceLost(String),
}

impl BridgeError {
    /// Wrap a device link error
    pub fn device<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        Self::DeviceConnection(Box::new(err))
    }

    /// Wrap a broker link error
    pub fn broker<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        Self::BrokerConnection(Box::new(err))
    }

    /// Underlying link error, if this failure came from a link
    pub fn link_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            BridgeError::DeviceConnection(e) | BridgeError::BrokerConnection(e) => Some(e.as_ref()),
            BridgeError::NoDeviceFound
            | BridgeError::AmbiguousDevice(_)
            | BridgeError::DeviceLost(_) => None,
        }
    }
}

/// Top-level error returned by the proxy binary
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Strip credentials from a broker URL before it is logged
pub fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

//! Serial device link to a Meshtastic node
//!
//! - [`framing`] - stream framing codec
//! - [`ports`] - USB serial port discovery
//! - [`link`] - the [`SerialDeviceLink`] itself: reader thread, dispatcher and heartbeat

pub mod framing;
pub mod link;
pub mod ports;

pub use framing::{encode_frame, Chunk, FrameDecoder, FrameError};
pub use link::{SerialDeviceLink, SerialSettings};

use thiserror::Error;

/// Serial link errors
#[derive(Debug, Error)]
pub enum SerialError {
    #[error("failed to open serial port {port}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("serial I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode ToRadio: {0}")]
    Encode(#[from] prost::EncodeError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("serial link is not connected")]
    NotConnected,
    #[error("serial link lost: {0}")]
    Lost(String),
    #[error("serial link is already connected to {0}")]
    AlreadyConnected(String),
}

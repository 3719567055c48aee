//! Wire types and envelopes shared by the device and broker sides
//!
//! - [`mesh`] - Meshtastic protobuf messages exchanged with the radio
//! - [`envelope`] - the proxy's own envelope types
//! - [`topics`] - broker topic layout and channel bindings

pub mod envelope;
pub mod mesh;
pub mod topics;

pub use envelope::*;
pub use topics::*;

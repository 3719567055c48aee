//! Testing utilities and mock implementations
//!
//! Mock device and broker links let the bridge be exercised without a radio
//! on a serial port or a running MQTT broker.

pub mod mocks;

pub use mocks::*;

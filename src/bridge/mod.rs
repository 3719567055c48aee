//! The bidirectional message bridge
//!
//! - [`translator`] - pure envelope mapping between the two domains
//! - [`forwarding`] - per-message forwarding in each direction
//! - [`connection`] - the bridge's view of each link's state
//! - [`lifecycle`] - [`Bridge`]: port selection, connect, subscribe, shutdown
//!
//! ```text
//! DeviceLink --MqttProxy--> DeviceToBroker --to_broker--> BrokerLink::publish
//! BrokerLink --filter-----> BrokerToDevice --to_device--> DeviceLink::send
//! ```

pub mod connection;
pub mod forwarding;
pub mod lifecycle;
pub mod translator;

pub use connection::{LinkEvent, LinkState, LinkTracker};
pub use forwarding::{
    forward_broker_to_device, forward_device_to_broker, BrokerToDevice, DeviceToBroker,
    ForwardOutcome,
};
pub use lifecycle::{choose_single_port, Bridge};
pub use translator::{EnvelopeSummary, EnvelopeTranslator};

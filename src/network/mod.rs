//! Network communication layer.
//!
//! Messages are encoded with bincode and framed with a 4-byte big-endian
//! length prefix. Delivery is abstracted behind [`SupplyTransport`].

pub mod rpc;
mod transport;

pub use rpc::{DemandMessage, DeploymentInfo, Message, PartitionFlag, SupplyMessage};
pub use transport::{ChannelTransport, Delivery, SupplyTransport};

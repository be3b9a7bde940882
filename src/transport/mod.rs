pub mod chirpstack;
pub mod common;
pub mod helium;
pub mod mqtt;

pub use common::{Downlink, DownlinkSender, NetworkServer, Uplink};

//! sems2mqtt bridges GoodWe SEMS wallboxes into MQTT
//!
//! The SEMS portal is polled for wallbox telemetry which is published to an
//! MQTT broker with Home Assistant discovery, charge commands flow back
//! over command topics.

pub mod db;
pub mod models;
pub mod api;
pub mod mqtt;
pub mod config;
pub mod sems;

// Re-export common types for easier access
pub use models::{ChargeMode, DeviceProtocol, WallboxReading, WallboxStatus};
pub use db::DeviceManager;
pub use mqtt::{CALLBACKS, MeteringData};
pub use api::ApiManager;
pub use config::CONFIG;
pub use sems::SemsManager;

pub fn get_unix_ts() -> u64 {
    return std::time::SystemTime::now().duration_since(std::time::SystemTime::UNIX_EPOCH).unwrap().as_secs();
}

pub fn get_id(protocol: String, meter_name: &String) -> String {
    return format!("{}-{}-{:?}", protocol, meter_name, get_unix_ts());
}

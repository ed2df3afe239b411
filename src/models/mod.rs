use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/* Status codes as the portal reports them */
const STATUS_CODE_CHARGING: &str = "EVDetail_Status_Title_Charging";
const STATUS_CODE_WAITING: &str = "EVDetail_Status_Title_Waiting";
const STATUS_CODE_OFFLINE: &str = "EVDetail_Status_Title_Offline";

/// Represents the charging state of a wallbox
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WallboxStatus {
    Charging,
    Standby,
    Offline,
    Unknown,
}

impl WallboxStatus {
    pub fn from_vendor_code(code: &str) -> Self {
        match code {
            STATUS_CODE_CHARGING => WallboxStatus::Charging,
            STATUS_CODE_WAITING => WallboxStatus::Standby,
            STATUS_CODE_OFFLINE => WallboxStatus::Offline,
            _ => WallboxStatus::Unknown,
        }
    }

    pub fn to_string(&self) -> String {
        match self {
            WallboxStatus::Charging => "Charging".to_string(),
            WallboxStatus::Standby => "Standby".to_string(),
            WallboxStatus::Offline => "Offline".to_string(),
            WallboxStatus::Unknown => "Unknown".to_string(),
        }
    }
}

/// Configured charge mode of the wallbox
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChargeMode {
    Fast,
    PvPriority,
    PvAndBattery,
}

impl ChargeMode {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ChargeMode::Fast),
            1 => Some(ChargeMode::PvPriority),
            2 => Some(ChargeMode::PvAndBattery),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            ChargeMode::Fast => 0,
            ChargeMode::PvPriority => 1,
            ChargeMode::PvAndBattery => 2,
        }
    }

    pub fn label(&self) -> String {
        match self {
            ChargeMode::Fast => "Fast".to_string(),
            ChargeMode::PvPriority => "PV priority".to_string(),
            ChargeMode::PvAndBattery => "PV & battery".to_string(),
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Fast" => Some(ChargeMode::Fast),
            "PV priority" => Some(ChargeMode::PvPriority),
            "PV & battery" => Some(ChargeMode::PvAndBattery),
            _ => None,
        }
    }

    pub fn all_labels() -> Vec<String> {
        return vec![
            ChargeMode::Fast.label(),
            ChargeMode::PvPriority.label(),
            ChargeMode::PvAndBattery.label(),
        ];
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceProtocol {
    Unknown,
    Sems,
}

impl DeviceProtocol {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SEMS" => Some(DeviceProtocol::Sems),
            _ => Some(DeviceProtocol::Unknown),
        }
    }

    pub fn to_string(&self) -> String {
        match self {
            DeviceProtocol::Sems => "SEMS".to_string(),
            DeviceProtocol::Unknown => "Unknown".to_string(),
        }
    }
}

/// One complete wallbox reading as fetched from the portal.
/// Replaced wholesale on each successful poll, one reading per serial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WallboxReading {
    /// Serial number of the wallbox
    pub sn: String,
    pub model: String,
    pub firmware: String,
    pub status: WallboxStatus,
    /// Instantaneous charge power in kW, never negative
    pub power: f64,
    /// Cumulative charge energy in kWh
    pub charge_energy: f64,
    pub charge_mode: Option<ChargeMode>,
    /// Maximum charge power the hardware allows in kW
    pub max_charge_power: f64,
    /// Currently configured charge power setpoint in kW
    pub set_charge_power: f64,
    pub fetched_at: DateTime<Utc>,
}

impl WallboxReading {
    pub fn is_charging(&self) -> bool {
        return self.status == WallboxStatus::Charging || self.power > 0.0;
    }

    /// Flatten the reading into the key/value map we publish as device state
    pub fn to_metered_values(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut values = serde_json::Map::new();
        values.insert("status".to_string(), serde_json::Value::String(self.status.to_string()));
        values.insert("power".to_string(), serde_json::json!(self.power));
        values.insert("charge_energy".to_string(), serde_json::json!(self.charge_energy));
        values.insert("charging".to_string(), serde_json::Value::String(
            if self.is_charging() { "ON".to_string() } else { "OFF".to_string() }));
        if let Some(mode) = self.charge_mode {
            values.insert("charge_mode".to_string(), serde_json::Value::String(mode.label()));
        }
        values.insert("set_charge_power".to_string(), serde_json::json!(self.set_charge_power));
        values.insert("max_charge_power".to_string(), serde_json::json!(self.max_charge_power));
        values.insert("model".to_string(), serde_json::Value::String(self.model.clone()));
        values.insert("firmware".to_string(), serde_json::Value::String(self.firmware.clone()));
        return values;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_vendor_code() {
        assert_eq!(WallboxStatus::from_vendor_code("EVDetail_Status_Title_Charging"), WallboxStatus::Charging);
        assert_eq!(WallboxStatus::from_vendor_code("EVDetail_Status_Title_Waiting"), WallboxStatus::Standby);
        assert_eq!(WallboxStatus::from_vendor_code("EVDetail_Status_Title_Offline"), WallboxStatus::Offline);
        assert_eq!(WallboxStatus::from_vendor_code("something else"), WallboxStatus::Unknown);
    }

    #[test]
    fn test_charge_mode_roundtrip() {
        for code in 0..3 {
            let mode = ChargeMode::from_code(code).unwrap();
            assert_eq!(mode.code(), code);
            assert_eq!(ChargeMode::from_label(&mode.label()), Some(mode));
        }
        assert_eq!(ChargeMode::from_code(3), None);
        assert_eq!(ChargeMode::from_label("Turbo"), None);
    }

    #[test]
    fn test_metered_values_charging_flag() {
        let reading = WallboxReading {
            sn: "sn1".to_string(),
            model: "HCA".to_string(),
            firmware: "1.0".to_string(),
            status: WallboxStatus::Standby,
            power: 7.2,
            charge_energy: 123.4,
            charge_mode: Some(ChargeMode::PvPriority),
            max_charge_power: 11.0,
            set_charge_power: 7.2,
            fetched_at: Utc::now(),
        };

        /* Standby but power flowing still counts as charging */
        let values = reading.to_metered_values();
        assert_eq!(values.get("charging").unwrap(), "ON");
        assert_eq!(values.get("charge_mode").unwrap(), "PV priority");
        assert_eq!(values.get("status").unwrap(), "Standby");
    }
}

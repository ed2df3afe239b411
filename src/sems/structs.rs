use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ChargeMode, WallboxReading, WallboxStatus};

#[derive(Serialize)]
pub struct LoginRequest {
    pub account: String,
    pub pwd: String,
}

#[derive(Deserialize, Debug)]
pub struct LoginResponse {
    #[serde(default, rename = "hasError")]
    pub has_error: bool,
    pub code: Option<i64>,
    pub msg: Option<String>,
    pub data: Option<Value>,
    pub api: Option<Value>,
}

/// Generic portal envelope, status and command calls all come back like this
#[derive(Deserialize, Debug)]
pub struct ApiEnvelope {
    pub code: Option<i64>,
    pub msg: Option<String>,
    pub data: Option<Value>,
}

impl ApiEnvelope {
    pub fn message(&self) -> String {
        return self.msg.clone().unwrap_or_default();
    }

    pub fn is_authorization_expired(&self) -> bool {
        return self.data.is_none()
            && self.message().to_lowercase().contains("authorization has expired");
    }
}

#[derive(Serialize)]
pub struct StatusRequest {
    pub sn: String,
}

#[derive(Serialize)]
pub struct ChargingRequest {
    pub sn: String,
    /* the portal wants the status as a string, not a number */
    pub status: String,
}

#[derive(Serialize)]
pub struct SetChargeModeRequest {
    pub sn: String,
    #[serde(rename = "type")]
    pub mode: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_power: Option<f64>,
}

/// Raw wallbox status payload with the portal's field names
#[derive(Deserialize, Debug, Clone)]
pub struct WallboxData {
    pub sn: String,
    #[serde(default)]
    pub model: String,
    /* the portal really spells it like that */
    #[serde(default, rename = "fireware")]
    pub firmware: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub power: Value,
    #[serde(default, rename = "chargeEnergy")]
    pub charge_energy: Value,
    #[serde(default, rename = "chargeMode")]
    pub charge_mode: Option<i64>,
    #[serde(default)]
    pub max_charge_power: Value,
    #[serde(default)]
    pub set_charge_power: Value,
}

/// The portal mixes numbers and number-strings for the same field,
/// depending on endpoint version and firmware
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

impl WallboxData {
    pub fn from_value(data: Value) -> Result<Self, serde_json::Error> {
        return serde_json::from_value(data);
    }

    pub fn to_reading(&self) -> WallboxReading {
        let power = value_as_f64(&self.power).unwrap_or(0.0);
        let charge_energy = value_as_f64(&self.charge_energy).unwrap_or_else(|| {
            debug!("Unable to parse chargeEnergy {:?} for {}, falling back to 0", self.charge_energy, self.sn);
            0.0
        });

        return WallboxReading {
            sn: self.sn.clone(),
            model: self.model.clone(),
            firmware: self.firmware.clone(),
            status: WallboxStatus::from_vendor_code(&self.status),
            power: power.max(0.0),
            charge_energy,
            charge_mode: self.charge_mode.and_then(ChargeMode::from_code),
            max_charge_power: value_as_f64(&self.max_charge_power).unwrap_or(0.0),
            set_charge_power: value_as_f64(&self.set_charge_power).unwrap_or(0.0),
            fetched_at: Utc::now(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_as_f64() {
        assert_eq!(value_as_f64(&json!(7.4)), Some(7.4));
        assert_eq!(value_as_f64(&json!("7.4")), Some(7.4));
        assert_eq!(value_as_f64(&json!(" 11 ")), Some(11.0));
        assert_eq!(value_as_f64(&json!(null)), None);
        assert_eq!(value_as_f64(&json!("n/a")), None);
    }

    #[test]
    fn test_wallbox_data_to_reading() {
        let data = WallboxData::from_value(json!({
            "sn": "5010KET1234W0001",
            "model": "HCA-11kW",
            "fireware": "03.100",
            "status": "EVDetail_Status_Title_Charging",
            "power": "7.36",
            "chargeEnergy": "184.2",
            "chargeMode": 1,
            "max_charge_power": 11,
            "set_charge_power": 7.4
        })).unwrap();

        let reading = data.to_reading();
        assert_eq!(reading.sn, "5010KET1234W0001");
        assert_eq!(reading.firmware, "03.100");
        assert_eq!(reading.status, WallboxStatus::Charging);
        assert_eq!(reading.power, 7.36);
        assert_eq!(reading.charge_energy, 184.2);
        assert_eq!(reading.charge_mode, Some(ChargeMode::PvPriority));
        assert_eq!(reading.set_charge_power, 7.4);
    }

    #[test]
    fn test_negative_power_is_clamped() {
        let data = WallboxData::from_value(json!({
            "sn": "sn1",
            "status": "EVDetail_Status_Title_Waiting",
            "power": -0.02
        })).unwrap();

        let reading = data.to_reading();
        assert_eq!(reading.power, 0.0);
        assert_eq!(reading.charge_energy, 0.0);
        assert_eq!(reading.charge_mode, None);
    }

    #[test]
    fn test_charging_request_status_is_string() {
        let req = ChargingRequest { sn: "sn1".to_string(), status: "1".to_string() };
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(body, json!({"sn": "sn1", "status": "1"}));
    }

    #[test]
    fn test_set_charge_mode_request_skips_missing_power() {
        let req = SetChargeModeRequest { sn: "sn1".to_string(), mode: 2, charge_power: None };
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(body, json!({"sn": "sn1", "type": 2}));

        let req = SetChargeModeRequest { sn: "sn1".to_string(), mode: 0, charge_power: Some(7.4) };
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(body, json!({"sn": "sn1", "type": 0, "charge_power": 7.4}));
    }

    #[test]
    fn test_authorization_expired_detection() {
        let envelope = ApiEnvelope {
            code: Some(100002),
            msg: Some("The authorization has expired, please log in again".to_string()),
            data: None,
        };
        assert!(envelope.is_authorization_expired());

        let envelope = ApiEnvelope {
            code: Some(0),
            msg: Some("success".to_string()),
            data: Some(json!({})),
        };
        assert!(!envelope.is_authorization_expired());
    }
}

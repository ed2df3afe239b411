use serde::{Deserialize, Serialize};



#[derive(Serialize)]
pub struct HaDevice {
    pub ids: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
}
#[derive(Serialize)]
pub struct HaOrigin {
    pub name: String,
    pub sw_version: String,
    pub support_url: String,
}

fn is_none_str(value: &String) -> bool {
    if value.is_empty() || value == "NONE" {
        return true;
    }
    return false;
}

#[derive(Serialize, PartialEq, Deserialize, Clone, Default)]
pub enum HAPlatform {
    #[default]
    Sensor,
    Switch,
    Select,
    Number,
}

impl HAPlatform {
    pub fn to_string(&self) -> String {
        match self {
            HAPlatform::Sensor => "sensor".to_string(),
            HAPlatform::Switch => "switch".to_string(),
            HAPlatform::Select => "select".to_string(),
            HAPlatform::Number => "number".to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct HaComponent {
    pub p: String,
    pub name: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub device_class: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub unit_of_measurement: String,
    pub value_template: String,
    pub unique_id: String,
    pub object_id: String,
    pub via_device: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub state_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<String>,
}

impl HaComponent {
    pub fn new(platform: HAPlatform, device: String, dclass: String, uof: String, proto: String, name: String, state_class: String) -> Self {

        let safe_name= name.clone().replace(" ", "_");

        return HaComponent {
            p: platform.to_string(),
            name: name.clone(),
            device_class: dclass,
            unit_of_measurement: uof,
            value_template: format!("{{{{ value_json.{name} }}}}"),
            unique_id: format!("s2m_{proto}_{device}_{safe_name}").to_lowercase(),
            object_id: format!("{device}_{safe_name}").to_lowercase(),
            state_class: state_class,
            command_topic: None,
            options: None,
            min: None,
            max: None,
            step: None,
            payload_on: None,
            payload_off: None,
            via_device: "s2m_management".to_string(),
         }
    }

    pub fn new_energy(device: String, uof: String, proto: String, name: String, json_key: String) -> Self {
        let safe_name= name.clone().replace(" ", "_");
        return HaComponent {
            p: "sensor".to_string(),
            name: name,
            device_class: "energy".to_string(),
            unit_of_measurement: uof,
            value_template: format!("{{{{ value_json.{json_key} }}}}"),
            unique_id: format!("s2m_{proto}_{device}_{safe_name}").to_lowercase(),
            object_id: format!("{device}_{safe_name}").to_lowercase(),
            state_class: "total_increasing".to_string(),
            command_topic: None,
            options: None,
            min: None,
            max: None,
            step: None,
            payload_on: None,
            payload_off: None,
            via_device: "s2m_management".to_string(),
         }
    }

    pub fn new_switch(device: String, proto: String, name: String, json_key: String, command_topic: String) -> Self {
        let safe_name= name.clone().replace(" ", "_");
        return HaComponent {
            p: HAPlatform::Switch.to_string(),
            name: name,
            device_class: "switch".to_string(),
            unit_of_measurement: "NONE".to_string(),
            value_template: format!("{{{{ value_json.{json_key} }}}}"),
            unique_id: format!("s2m_{proto}_{device}_{safe_name}").to_lowercase(),
            object_id: format!("{device}_{safe_name}").to_lowercase(),
            state_class: "NONE".to_string(),
            command_topic: Some(command_topic),
            options: None,
            min: None,
            max: None,
            step: None,
            payload_on: Some("ON".to_string()),
            payload_off: Some("OFF".to_string()),
            via_device: "s2m_management".to_string(),
         }
    }

    pub fn new_select(device: String, proto: String, name: String, json_key: String, command_topic: String, options: Vec<String>) -> Self {
        let safe_name= name.clone().replace(" ", "_");
        return HaComponent {
            p: HAPlatform::Select.to_string(),
            name: name,
            device_class: "NONE".to_string(),
            unit_of_measurement: "NONE".to_string(),
            value_template: format!("{{{{ value_json.{json_key} }}}}"),
            unique_id: format!("s2m_{proto}_{device}_{safe_name}").to_lowercase(),
            object_id: format!("{device}_{safe_name}").to_lowercase(),
            state_class: "NONE".to_string(),
            command_topic: Some(command_topic),
            options: Some(options),
            min: None,
            max: None,
            step: None,
            payload_on: None,
            payload_off: None,
            via_device: "s2m_management".to_string(),
         }
    }

    pub fn new_number(device: String, proto: String, name: String, json_key: String, command_topic: String, min: f64, max: f64, step: f64, uof: String) -> Self {
        let safe_name= name.clone().replace(" ", "_");
        return HaComponent {
            p: HAPlatform::Number.to_string(),
            name: name,
            device_class: "power".to_string(),
            unit_of_measurement: uof,
            value_template: format!("{{{{ value_json.{json_key} }}}}"),
            unique_id: format!("s2m_{proto}_{device}_{safe_name}").to_lowercase(),
            object_id: format!("{device}_{safe_name}").to_lowercase(),
            state_class: "NONE".to_string(),
            command_topic: Some(command_topic),
            options: None,
            min: Some(min),
            max: Some(max),
            step: Some(step),
            payload_on: None,
            payload_off: None,
            via_device: "s2m_management".to_string(),
         }
    }
}

#[derive(Serialize)]
pub struct HaDiscover {
    pub dev: HaDevice,
    pub o: HaOrigin,
    pub cmps: serde_json::Map<String, serde_json::Value>,
    pub state_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_topic: Option<String>,
    pub qos: u32,
    #[serde(skip_serializing)]
    pub discover_topic: String,
}

impl HaDiscover {
    pub fn new(name: String, manu: String, model: String, proto: String) -> Self {
        return HaDiscover {
            discover_topic: format!("homeassistant/device/s2m_{}-{}/config", proto.clone(), name.clone()),
            dev: HaDevice {
                ids: format!("s2m_{}_{}", proto.clone(), name.clone()),
                name: name.clone(),
                manufacturer: manu,
                model: model,
                sw_version: None,
            },
            o: HaOrigin {
                name: "sems2mqtt".to_string(),
                sw_version: "0.1.0".to_string(),
                support_url: "https://github.com/sems2mqtt/sems2mqtt".to_string()
            },
            cmps: serde_json::Map::new(),
            state_topic: format!("sems2mqtt/devs/{}/{}", proto, name),
            availability_topic: None,
            qos: 2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_component_skips_empty_fields() {
        let cmp = HaComponent::new(
            HAPlatform::Sensor,
            "garage".to_string(),
            "NONE".to_string(),
            "NONE".to_string(),
            "Sems".to_string(),
            "status".to_string(),
            "NONE".to_string(),
        );

        let json = serde_json::to_value(cmp).unwrap();
        assert_eq!(json.get("p").unwrap(), "sensor");
        assert_eq!(json.get("unique_id").unwrap(), "s2m_sems_garage_status");
        assert_eq!(json.get("value_template").unwrap(), "{{ value_json.status }}");
        assert!(json.get("device_class").is_none());
        assert!(json.get("unit_of_measurement").is_none());
        assert!(json.get("command_topic").is_none());
    }

    #[test]
    fn test_switch_component_carries_command_topic() {
        let cmp = HaComponent::new_switch(
            "garage".to_string(),
            "Sems".to_string(),
            "charging".to_string(),
            "charging".to_string(),
            "sems2mqtt/garage/charge/set".to_string(),
        );

        let json = serde_json::to_value(cmp).unwrap();
        assert_eq!(json.get("p").unwrap(), "switch");
        assert_eq!(json.get("command_topic").unwrap(), "sems2mqtt/garage/charge/set");
        assert_eq!(json.get("payload_on").unwrap(), "ON");
        assert_eq!(json.get("payload_off").unwrap(), "OFF");
    }

    #[test]
    fn test_select_component_lists_options() {
        let cmp = HaComponent::new_select(
            "garage".to_string(),
            "Sems".to_string(),
            "charge_mode".to_string(),
            "charge_mode".to_string(),
            "sems2mqtt/garage/mode/set".to_string(),
            vec!["Fast".to_string(), "PV priority".to_string(), "PV & battery".to_string()],
        );

        let json = serde_json::to_value(cmp).unwrap();
        assert_eq!(json.get("p").unwrap(), "select");
        let options = json.get("options").unwrap().as_array().unwrap();
        assert_eq!(options.len(), 3);
        assert_eq!(options[0], "Fast");
    }

    #[test]
    fn test_number_component_limits() {
        let cmp = HaComponent::new_number(
            "garage".to_string(),
            "Sems".to_string(),
            "set_charge_power".to_string(),
            "set_charge_power".to_string(),
            "sems2mqtt/garage/charge_power/set".to_string(),
            4.2,
            11.0,
            0.1,
            "kW".to_string(),
        );

        let json = serde_json::to_value(cmp).unwrap();
        assert_eq!(json.get("p").unwrap(), "number");
        assert_eq!(json.get("min").unwrap(), 4.2);
        assert_eq!(json.get("max").unwrap(), 11.0);
        assert_eq!(json.get("step").unwrap(), 0.1);
        assert_eq!(json.get("unit_of_measurement").unwrap(), "kW");
    }

    #[test]
    fn test_discover_topics() {
        let mut disc = HaDiscover::new("garage".to_string(), "GoodWe".to_string(), "HCA-11kW".to_string(), "Sems".to_string());
        disc.availability_topic = Some("sems2mqtt/devs/Sems/garage/availability".to_string());

        assert_eq!(disc.discover_topic, "homeassistant/device/s2m_Sems-garage/config");
        assert_eq!(disc.state_topic, "sems2mqtt/devs/Sems/garage");

        let json = serde_json::to_value(&disc).unwrap();
        assert_eq!(json.get("availability_topic").unwrap(), "sems2mqtt/devs/Sems/garage/availability");
        assert!(json.get("discover_topic").is_none());
    }
}

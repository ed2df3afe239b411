use lazy_static::lazy_static;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_yml;
use utoipa::ToSchema;
use std::error::Error;
use std::fs::{self, File};
use std::io::prelude::*;
use std::sync::RwLock;

fn httpd_enabled_default() -> bool { return true }
fn httpd_port_default() -> u16 { return 8250 }

#[derive(Deserialize, Serialize, Clone)]
pub struct HttpdConfig {
    #[serde(default="httpd_enabled_default")]
    pub enabled: bool,
    #[serde(default="httpd_port_default")]
    pub port: u16
}

fn mqtt_client_name_default() -> String { return "sems2mqtt".to_string() }

#[derive(Deserialize, Serialize, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub ha_enabled: bool,
    #[serde(default="mqtt_client_name_default")]
    pub client_name: String,
}

fn sems_scan_interval_default() -> u64 { return 60 }
fn sems_enabled_default() -> bool { return true }

/* The portal rate limits aggressive clients, don't allow polling faster than this */
pub const SEMS_MIN_SCAN_INTERVAL: u64 = 10;

#[derive(Deserialize, Serialize, Clone, ToSchema)]
pub struct SemsConfig {
    pub name: String,
    pub account: String,
    pub password: String,
    /// Wallbox serial number as shown in the SEMS portal
    pub serial: String,
    #[serde(default="sems_scan_interval_default")]
    pub scan_interval: u64,
    #[serde(default="sems_enabled_default")]
    pub enabled: bool,
}

impl SemsConfig {
    pub fn effective_scan_interval(&self) -> u64 {
        if self.scan_interval < SEMS_MIN_SCAN_INTERVAL {
            return SEMS_MIN_SCAN_INTERVAL;
        }
        return self.scan_interval;
    }
}

#[derive(Deserialize, Serialize, Clone, PartialEq)]
pub enum ConfigOperation {
    ADD,
    DELETE,
    CHANGE
}

#[derive(Deserialize, Serialize, Clone)]
pub struct ConfigChange {
    pub operation: ConfigOperation,
    pub base: String, /* This is like mqtt, sems and so on */
}
#[derive(Clone)]
pub struct Callbacks {
    sender: tokio::sync::broadcast::Sender<ConfigChange>,
}

fn httpd_default() -> HttpdConfig { return  HttpdConfig{ enabled: httpd_enabled_default(), port: httpd_port_default() }}
fn sems_default() -> Vec<SemsConfig> { return Vec::new(); }

#[derive(Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default="httpd_default")]
    pub httpd: HttpdConfig,
    pub mqtt: MqttConfig,
    #[serde(default="sems_default")]
    pub sems: Vec<SemsConfig>,
}

pub struct ConfigHolder {
    pub config: Config,
    pub callbacks: Callbacks,
    pub dirty: bool,
    pub lock: RwLock<bool>,
    pub base_path: String,
}

pub enum ConfigBases {
    Httpd(HttpdConfig),
    Mqtt(MqttConfig),
    Sems(Vec<SemsConfig>),
}

impl ConfigHolder {
    pub fn load() -> Self {

        let mut bpath = "config/".to_string();
        /* Check for the two paths of the config file */
        let mut file = File::open("config/s2m.yaml");
        if file.is_err() {
            file = Ok(File::open("s2m.yaml").expect("Unable to read the config on config/s2m.yaml or s2m.yaml"));
            bpath = "".to_string();
        }

        let mut file = file.unwrap();

        let mut contents = String::new();
        file.read_to_string(&mut contents).expect("Unable to read config file");
        let c: Config =  serde_yml::from_str(&contents).expect("Unable to parse config file");
        let (s, _) = tokio::sync::broadcast::channel(100);
        return ConfigHolder {
            config: c,
            callbacks: Callbacks { sender: s },
            dirty: false,
            lock: RwLock::new(true),
            base_path: bpath,
        }
    }

    pub fn save(&mut self) {
        /* No need to write config if it's not dirty */
        if !self.dirty {
            debug!("Who ever called me, the config is not dirty");
            return;
        }

        let config_path = format!("{}s2m.yaml", self.base_path);
        let backup_path = format!("{}backup.yaml", self.base_path);

        if fs::copy(config_path.clone(), backup_path).is_err() {
            error!("Backing up config failed, not replacing it");
        } else {
            let x = serde_yml::to_string(&self.config).unwrap();
            match fs::write(config_path, x.as_bytes()) {
                Ok(_) => { info!("New Config written"); self.dirty = false; }
                Err(e) => { error!("Error writing config {e:?}"); }
            }
        }
    }

    pub fn get_change_receiver(&self) -> tokio::sync::broadcast::Receiver<ConfigChange> {
        return self.callbacks.sender.subscribe();
    }

    pub fn is_dirty(&self) -> bool {
        return self.dirty;
    }

    pub fn update_config(&mut self, operation: ConfigOperation, new_data: ConfigBases) {
        let base: &str ;

        match new_data {
            ConfigBases::Httpd(httpd_config) => {
                self.config.httpd = httpd_config;
                base = "httpd";
            },
            ConfigBases::Mqtt(mqtt_config) => {
                self.config.mqtt = mqtt_config;
                base = "mqtt";
            },
            ConfigBases::Sems(sems_configs) => {
                self.config.sems = sems_configs;
                base = "sems";
            },
        }

        self.dirty = true;

        let _ = self.callbacks.sender.send(ConfigChange { operation: operation, base: base.to_string()});
    }

    pub fn get_copy(&self, base: &str) -> Result<ConfigBases, Box<dyn Error>> {
        /* Lock against modifications during copy */
        let _lock = self.lock.read().unwrap();

        match base {
            "httpd" => { return Ok(ConfigBases::Httpd(self.config.httpd.clone())) },
            "mqtt" => { return Ok(ConfigBases::Mqtt(self.config.mqtt.clone())) },
            "sems" => { return Ok(ConfigBases::Sems(self.config.sems.clone())) },
            _ => { Err("Type not known")? }
        }
    }

    pub fn get_complete_config(&self) -> Config {
        return self.config.clone();
    }
}

lazy_static! {
    pub static ref CONFIG: RwLock<ConfigHolder> = RwLock::new(ConfigHolder::load());
}

#[macro_export]
macro_rules! get_config_or_panic {
    ($base: expr, $pat: path) => {
        {
            let c = CONFIG.read().unwrap().get_copy($base).unwrap();
            if let $pat(a) = c { // #1
                a
            } else {
                panic!(
                    "mismatch variant when cast to {}",
                    stringify!($pat)); // #2
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_interval_minimum_enforced() {
        let conf = SemsConfig {
            name: "garage".to_string(),
            account: "user@example.com".to_string(),
            password: "secret".to_string(),
            serial: "5010KET1234W0001".to_string(),
            scan_interval: 2,
            enabled: true,
        };
        assert_eq!(conf.effective_scan_interval(), SEMS_MIN_SCAN_INTERVAL);
    }

    #[test]
    fn test_scan_interval_passthrough() {
        let conf = SemsConfig {
            name: "garage".to_string(),
            account: "user@example.com".to_string(),
            password: "secret".to_string(),
            serial: "5010KET1234W0001".to_string(),
            scan_interval: 120,
            enabled: true,
        };
        assert_eq!(conf.effective_scan_interval(), 120);
    }

    #[test]
    fn test_sems_config_defaults_from_yaml() {
        let yaml = "name: garage\naccount: user@example.com\npassword: secret\nserial: 5010KET1234W0001\n";
        let conf: SemsConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(conf.scan_interval, 60);
        assert!(conf.enabled);
    }
}

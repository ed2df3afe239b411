use std::time::{Duration, Instant};
use log::{debug, error, info, warn};
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::{ConfigBases, ConfigChange, ConfigOperation, SemsConfig};
use crate::models::{ChargeMode, DeviceProtocol, WallboxReading};
use crate::mqtt::ha_interface::{HaComponent, HaDiscover, HAPlatform};
use crate::mqtt::{publish_protocol_count, PublishData, SubscribeData, Transmission};
use crate::sems::client::{ChargeControl, SemsClient};
use crate::{get_config_or_panic, get_id, get_unix_ts, MeteringData, CONFIG};

pub mod client;
pub mod structs;

/* After a start command the portal keeps reporting Waiting/power=0 for a
   while, hold the optimistic state that long (seconds) */
pub const GRACE_ON_SECONDS: u64 = 130;
pub const GRACE_OFF_SECONDS: u64 = 130;

/* Above this setpoint (kW) the wallbox only delivers in fast mode */
pub const FAST_MODE_POWER_THRESHOLD: f64 = 4.2;

/* Hardware limits of the charge power slider */
pub const CHARGE_POWER_MIN: f64 = 4.2;
pub const CHARGE_POWER_MAX: f64 = 11.0;
pub const CHARGE_POWER_STEP: f64 = 0.1;

/* How fast we re-poll after a command went out */
const COMMAND_REFRESH_DELAY: Duration = Duration::from_secs(2);

pub struct SemsManager {
    sender: Sender<Transmission>,
    config_change: tokio::sync::broadcast::Receiver<ConfigChange>,
    threads: Vec<JoinHandle<()>>,
    config: Vec<SemsConfig>,
}

/// Decide which charging state we report: the server state, unless a recent
/// command says otherwise and the grace window is still open. The second
/// return value tells the caller to drop the stored command because the
/// server caught up.
pub fn reconcile_charging(api_is_on: bool, target: Option<bool>, elapsed_secs: Option<u64>) -> (bool, bool) {
    match (target, elapsed_secs) {
        (Some(true), Some(elapsed)) if elapsed < GRACE_ON_SECONDS && !api_is_on => {
            return (true, false);
        }
        (Some(false), Some(elapsed)) if elapsed < GRACE_OFF_SECONDS && api_is_on => {
            return (false, false);
        }
        (Some(wanted), _) if wanted == api_is_on => {
            /* Server agrees with the last command, grace no longer needed */
            return (api_is_on, true);
        }
        _ => {
            return (api_is_on, false);
        }
    }
}

impl SemsManager {
    pub fn new(sender: Sender<Transmission>) -> Self {
        let config: Vec<SemsConfig> = get_config_or_panic!("sems", ConfigBases::Sems);

        return SemsManager {
            sender,
            config_change: CONFIG.read().unwrap().get_change_receiver(),
            threads: Vec::new(),
            config,
        };
    }

    pub async fn start_thread(&mut self) -> ! {
        /* There may be no config to start with, so sleep until there is  */
        if self.config.len() == 0 {
            info!("No SEMS wallboxes found, waiting for a config change to wake me up");
            loop {
                let change = self.config_change.recv().await.unwrap();
                if change.operation != ConfigOperation::ADD || change.base != "sems" {
                    continue;
                }

                /* we need to read the config now as this change is about our part of the code */
                break;
            }
        }

        info!("Started SEMS configuration");
        loop {
            let mut device_count = 0;
            self.config = get_config_or_panic!("sems", ConfigBases::Sems);

            for conf in self.config.iter() {
                if !conf.enabled {
                    info!("SEMS wallbox {} is disabled", conf.name);
                    continue;
                }

                device_count += 1;

                let conf = conf.clone();
                let sender = self.sender.clone();
                let handle = tokio::spawn(async move {
                    run_wallbox(conf, sender).await;
                });

                self.threads.push(handle);
            }

            publish_protocol_count(&self.sender, "sems", device_count).await;

            info!("All {device_count} SEMS wallboxes setup, waiting for config changes");

            loop {
                let change = self.config_change.recv().await.unwrap();
                if change.base == "sems" {
                    break;
                }
            }

            /* We are waken up because some of our config changed so stop the threads and start over */
            info!("SEMS is stopping threads");
            for thread in self.threads.iter() {
                thread.abort();
            }

            self.threads.clear();
        }
    }
}

async fn run_wallbox(conf: SemsConfig, sender: Sender<Transmission>) {
    info!("[{}] Starting wallbox polling for sn {}", conf.name, conf.serial);

    let mut client = match SemsClient::new(conf.account.clone(), conf.password.clone()) {
        Ok(client) => client,
        Err(e) => {
            error!("[{}] Unable to build the portal client: {e}", conf.name);
            return;
        }
    };

    /* Command topics, the MQTT thread prefixes them with sems2mqtt/ */
    let (charge_tx, mut charge_rx) = tokio::sync::mpsc::channel(10);
    let _ = sender.send(Transmission::Subscribe(SubscribeData {
        topic: format!("{}/charge/set", conf.name),
        sender: charge_tx,
    })).await;

    let (mode_tx, mut mode_rx) = tokio::sync::mpsc::channel(10);
    let _ = sender.send(Transmission::Subscribe(SubscribeData {
        topic: format!("{}/mode/set", conf.name),
        sender: mode_tx,
    })).await;

    let (power_tx, mut power_rx) = tokio::sync::mpsc::channel(10);
    let _ = sender.send(Transmission::Subscribe(SubscribeData {
        topic: format!("{}/charge_power/set", conf.name),
        sender: power_tx,
    })).await;

    let scan_interval = Duration::from_secs(conf.effective_scan_interval());
    let mut delay = Duration::from_secs(0); /* poll right away on startup */

    let mut last_reading: Option<WallboxReading> = None;
    let mut discovered = false;
    let mut last_command_target: Option<bool> = None;
    let mut last_command_at: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = sleep(delay) => {
                match client.get_data(&conf.serial).await {
                    Ok(data) => {
                        let reading = data.to_reading();

                        if !discovered {
                            register_discovery(&conf, &reading, &sender).await;
                            discovered = true;
                        }

                        let elapsed = last_command_at.map(|t| t.elapsed().as_secs());
                        let (charging_on, clear) = reconcile_charging(reading.is_charging(), last_command_target, elapsed);
                        if clear {
                            last_command_target = None;
                            last_command_at = None;
                        }
                        if charging_on != reading.is_charging() {
                            debug!("[{}] Holding optimistic charging={charging_on} against server state", conf.name);
                        }

                        publish_reading(&conf, &reading, charging_on, &sender).await;
                        publish_availability(&conf, true, &sender).await;
                        last_reading = Some(reading);
                    }
                    Err(e) => {
                        error!("[{}] Update failed: {e}", conf.name);
                        publish_availability(&conf, false, &sender).await;
                    }
                }
                delay = scan_interval;
            },
            Some(payload) = charge_rx.recv() => {
                let turn_on = payload.trim().eq_ignore_ascii_case("ON");
                info!("[{}] Charging switched to {}", conf.name, if turn_on { "On" } else { "Off" });

                last_command_target = Some(turn_on);
                last_command_at = Some(Instant::now());

                /* optimistic UI first, the portal is slow to catch up */
                if let Some(reading) = last_reading.as_ref() {
                    publish_reading(&conf, reading, turn_on, &sender).await;
                }

                let control = if turn_on { ChargeControl::Start } else { ChargeControl::Stop };
                if let Err(e) = client.change_status(&conf.serial, control).await {
                    error!("[{}] Power control command failed: {e}", conf.name);
                }

                delay = COMMAND_REFRESH_DELAY;
            },
            Some(payload) = mode_rx.recv() => {
                match ChargeMode::from_label(payload.trim()) {
                    Some(mode) => {
                        info!("[{}] Setting charge mode to {}", conf.name, mode.label());

                        let power = last_reading.as_ref().map(|r| r.set_charge_power);

                        if let Some(reading) = last_reading.as_mut() {
                            reading.charge_mode = Some(mode);
                            let charging_on = reading.is_charging();
                            let reading = reading.clone();
                            publish_reading(&conf, &reading, charging_on, &sender).await;
                        }

                        if let Err(e) = client.set_charge_mode(&conf.serial, mode.code(), power).await {
                            error!("[{}] SetChargeMode command failed: {e}", conf.name);
                        }
                    }
                    None => {
                        warn!("[{}] Unknown charge mode option {payload}", conf.name);
                    }
                }
                delay = COMMAND_REFRESH_DELAY;
            },
            Some(payload) = power_rx.recv() => {
                match payload.trim().parse::<f64>() {
                    Ok(value) => {
                        let active_mode = last_reading.as_ref()
                            .and_then(|r| r.charge_mode)
                            .map(|m| m.code())
                            .unwrap_or(0);
                        let mode = pick_mode_for_power(value, active_mode);
                        info!("[{}] Setting charge power to {value} kW (mode {mode})", conf.name);

                        if let Some(reading) = last_reading.as_mut() {
                            reading.set_charge_power = value;
                            let charging_on = reading.is_charging();
                            let reading = reading.clone();
                            publish_reading(&conf, &reading, charging_on, &sender).await;
                        }

                        if let Err(e) = client.set_charge_mode(&conf.serial, mode, Some(value)).await {
                            error!("[{}] SetChargeMode command failed: {e}", conf.name);
                        }
                    }
                    Err(_) => {
                        warn!("[{}] Ignoring charge power command with bad payload {payload}", conf.name);
                    }
                }
                delay = COMMAND_REFRESH_DELAY;
            },
        }
    }
}

/// Setpoints above the PV limit only work in fast mode, otherwise keep
/// whatever mode is active
pub fn pick_mode_for_power(value: f64, active_mode: i64) -> i64 {
    if value > FAST_MODE_POWER_THRESHOLD {
        return ChargeMode::Fast.code();
    }
    return active_mode;
}

fn availability_topic(conf: &SemsConfig) -> String {
    return format!("sems2mqtt/devs/{:?}/{}/availability", DeviceProtocol::Sems, conf.name);
}

async fn publish_availability(conf: &SemsConfig, online: bool, sender: &Sender<Transmission>) {
    let publish = PublishData {
        topic: availability_topic(conf),
        payload: if online { "online".to_string() } else { "offline".to_string() },
        qos: 1,
        retain: true,
    };
    let _ = sender.send(Transmission::Publish(publish)).await;
}

async fn publish_reading(conf: &SemsConfig, reading: &WallboxReading, charging_on: bool, sender: &Sender<Transmission>) {
    let mut meter_data = match MeteringData::new() {
        Ok(data) => data,
        Err(_) => { return; }
    };

    meter_data.meter_name = conf.name.clone();
    meter_data.protocol = DeviceProtocol::Sems;
    meter_data.id = get_id("sems".to_string(), &conf.name);
    meter_data.transmission_time = get_unix_ts();
    meter_data.metered_time = meter_data.transmission_time;
    meter_data.metered_values = reading.to_metered_values();

    /* the published charging flag honours the optimistic grace window */
    meter_data.metered_values.insert("charging".to_string(), serde_json::Value::String(
        if charging_on { "ON".to_string() } else { "OFF".to_string() }));

    let _ = sender.send(Transmission::Metering(meter_data)).await;
}

async fn register_discovery(conf: &SemsConfig, reading: &WallboxReading, sender: &Sender<Transmission>) {
    let mqtt_config = get_config_or_panic!("mqtt", ConfigBases::Mqtt);
    if !mqtt_config.ha_enabled {
        debug!("[{}] Home Assistant discovery is disabled", conf.name);
        return;
    }

    let proto = format!("{:?}", DeviceProtocol::Sems);
    let mut discover = HaDiscover::new(conf.name.clone(), "GoodWe".to_string(), reading.model.clone(), proto.clone());
    discover.availability_topic = Some(availability_topic(conf));
    discover.dev.sw_version = Some(reading.firmware.clone());

    let status = HaComponent::new(
        HAPlatform::Sensor,
        conf.name.clone(),
        "NONE".to_string(),
        "NONE".to_string(),
        proto.clone(),
        "status".to_string(),
        "NONE".to_string(),
    );
    discover.cmps.insert("status".to_string(), serde_json::to_value(status).unwrap());

    let power = HaComponent::new(
        HAPlatform::Sensor,
        conf.name.clone(),
        "power".to_string(),
        "kW".to_string(),
        proto.clone(),
        "power".to_string(),
        "measurement".to_string(),
    );
    discover.cmps.insert("power".to_string(), serde_json::to_value(power).unwrap());

    let energy = HaComponent::new_energy(
        conf.name.clone(),
        "kWh".to_string(),
        proto.clone(),
        "charge_energy".to_string(),
        "charge_energy".to_string(),
    );
    discover.cmps.insert("charge_energy".to_string(), serde_json::to_value(energy).unwrap());

    let charging = HaComponent::new_switch(
        conf.name.clone(),
        proto.clone(),
        "charging".to_string(),
        "charging".to_string(),
        format!("sems2mqtt/{}/charge/set", conf.name),
    );
    discover.cmps.insert("charging".to_string(), serde_json::to_value(charging).unwrap());

    let mode = HaComponent::new_select(
        conf.name.clone(),
        proto.clone(),
        "charge_mode".to_string(),
        "charge_mode".to_string(),
        format!("sems2mqtt/{}/mode/set", conf.name),
        ChargeMode::all_labels(),
    );
    discover.cmps.insert("charge_mode".to_string(), serde_json::to_value(mode).unwrap());

    let charge_power = HaComponent::new_number(
        conf.name.clone(),
        proto.clone(),
        "set_charge_power".to_string(),
        "set_charge_power".to_string(),
        format!("sems2mqtt/{}/charge_power/set", conf.name),
        CHARGE_POWER_MIN,
        CHARGE_POWER_MAX,
        CHARGE_POWER_STEP,
        "kW".to_string(),
    );
    discover.cmps.insert("set_charge_power".to_string(), serde_json::to_value(charge_power).unwrap());

    info!("[{}] Registering wallbox {} with Home Assistant", conf.name, reading.sn);
    let _ = sender.send(Transmission::AutoDiscovery(discover)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_holds_on_within_grace() {
        /* Command said ON, server still reports off, window open */
        let (is_on, clear) = reconcile_charging(false, Some(true), Some(10));
        assert!(is_on);
        assert!(!clear);
    }

    #[test]
    fn test_reconcile_holds_off_within_grace() {
        let (is_on, clear) = reconcile_charging(true, Some(false), Some(10));
        assert!(!is_on);
        assert!(!clear);
    }

    #[test]
    fn test_reconcile_clears_when_server_catches_up() {
        let (is_on, clear) = reconcile_charging(true, Some(true), Some(10));
        assert!(is_on);
        assert!(clear);
    }

    #[test]
    fn test_reconcile_server_wins_after_grace() {
        let (is_on, clear) = reconcile_charging(false, Some(true), Some(GRACE_ON_SECONDS + 1));
        assert!(!is_on);
        assert!(!clear);
    }

    #[test]
    fn test_reconcile_without_command() {
        let (is_on, clear) = reconcile_charging(true, None, None);
        assert!(is_on);
        assert!(!clear);

        let (is_on, _) = reconcile_charging(false, None, None);
        assert!(!is_on);
    }

    #[test]
    fn test_pick_mode_for_power() {
        /* above the PV limit we always force fast mode */
        assert_eq!(pick_mode_for_power(7.4, 1), 0);
        assert_eq!(pick_mode_for_power(4.2, 1), 1);
        assert_eq!(pick_mode_for_power(4.0, 2), 2);
    }
}

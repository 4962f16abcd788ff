//! MQTT publishing, Home Assistant discovery and inbound command handling
//! (§4.7).

use crate::config::{LoggingConfig, MqttConfig};
use crate::error::EhsError;
use crate::repository::{PlatformOpts, PointDef, Repository};
use crate::value::Value;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::{json, Value as Json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const DEVICE_ID: &str = "samsung_ehssentinel";
const DEVICE_NAME: &str = "Samsung EHS Sentinel";
const CAMEL_CASE_PREFIXES: [&str; 4] = ["ENUM_", "LVAR_", "NASA_", "VAR_"];

/// The `"device"` object every per-entity discovery payload carries, and the
/// payload for the standalone top-level device-reset publish on controller
/// birth (§4.7).
fn device_metadata() -> Json {
    json!({
        "identifiers": [DEVICE_ID],
        "name": DEVICE_NAME,
        "manufacturer": "Samsung",
        "model": "EHS",
    })
}

/// A command decoded from an inbound `{prefix}/entity/{point}/set` message.
#[derive(Debug, Clone)]
pub struct WriteCommand {
    pub point: String,
    pub text_value: String,
}

/// Strip EHS-internal prefixes and optionally camelCase the remainder.
fn normalize_name(name: &str, camel_case: bool) -> String {
    if !camel_case {
        return name.to_string();
    }
    let mut stripped = name;
    for prefix in CAMEL_CASE_PREFIXES {
        if let Some(rest) = stripped.strip_prefix(prefix) {
            stripped = rest;
            break;
        }
    }
    let mut parts = stripped.split('_');
    let mut out = parts.next().unwrap_or_default().to_lowercase();
    for part in parts {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.push_str(&chars.as_str().to_lowercase());
        }
    }
    out
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn platform_for(def: &PointDef) -> &'static str {
    match def.hass_opts.as_ref().and_then(|h| h.default_platform.as_deref()) {
        Some("switch") => "switch",
        Some("number") => "number",
        Some("select") => "select",
        Some("binary_sensor") => "binary_sensor",
        _ => {
            if let Some(map) = &def.enum_map {
                let all_on_off = map.values().all(|v| {
                    let lower = v.to_lowercase();
                    lower == "on" || lower == "off"
                });
                if all_on_off {
                    return "binary_sensor";
                }
            }
            "sensor"
        }
    }
}

/// Thin wrapper over [`AsyncClient`] plus the adapter-local state described
/// in §4.7: known-devices list, discovery bookkeeping, topic layout.
pub struct MqttAdapter {
    client: AsyncClient,
    repository: Arc<Repository>,
    topic_prefix: String,
    discovery_root: String,
    use_camel_case: bool,
    allow_control: bool,
    logging: LoggingConfig,
    known_devices: Vec<String>,
}

impl MqttAdapter {
    pub fn connect(
        config: &MqttConfig,
        repository: Arc<Repository>,
        allow_control: bool,
        logging: LoggingConfig,
    ) -> (Self, rumqttc::EventLoop) {
        let mut opts = MqttOptions::new(&config.client_id, &config.broker_url, config.broker_port);
        opts.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            opts.set_credentials(user, password);
        }
        let (client, eventloop) = AsyncClient::new(opts, 64);
        (
            Self {
                client,
                repository,
                topic_prefix: config.topic_prefix.trim_matches('/').to_string(),
                discovery_root: config.discovery_root.clone(),
                use_camel_case: config.use_camel_case_topic_names,
                allow_control,
                logging,
                known_devices: Vec::new(),
            },
            eventloop,
        )
    }

    fn device_config_topic(&self) -> String {
        format!("{}/device/{DEVICE_ID}/config", self.discovery_root)
    }

    /// Republish a reset top-level device config so Home Assistant re-creates
    /// the device entry, then clear the retained known-devices mirror so
    /// entities re-announce themselves as traffic resumes.
    async fn republish_device_reset(&mut self) -> Result<(), EhsError> {
        self.client
            .publish(
                self.device_config_topic(),
                QoS::ExactlyOnce,
                true,
                device_metadata().to_string(),
            )
            .await?;
        self.clear_known_devices().await
    }

    fn known_devices_topic(&self) -> String {
        format!("{}/known/devices", self.topic_prefix)
    }

    pub async fn subscribe_startup_topics(&self) -> Result<(), EhsError> {
        self.client
            .subscribe(self.known_devices_topic(), QoS::AtLeastOnce)
            .await?;
        self.client
            .subscribe(format!("{}/status", self.discovery_root), QoS::AtLeastOnce)
            .await?;
        if self.allow_control {
            self.client
                .subscribe(format!("{}/entity/+/set", self.topic_prefix), QoS::AtLeastOnce)
                .await?;
        }
        Ok(())
    }

    async fn publish_known_devices(&self) -> Result<(), EhsError> {
        let payload = self.known_devices.join(",");
        self.client
            .publish(self.known_devices_topic(), QoS::AtLeastOnce, true, payload)
            .await?;
        Ok(())
    }

    /// Clear the retained known-devices mirror. Used directly by
    /// `--clean-known-devices`; controller-birth reset calls it through
    /// [`Self::republish_device_reset`] instead, alongside the device config.
    pub async fn clear_known_devices(&mut self) -> Result<(), EhsError> {
        self.known_devices.clear();
        self.client
            .publish(self.known_devices_topic(), QoS::AtLeastOnce, true, " ")
            .await?;
        Ok(())
    }

    fn state_topic(&self, def: &PointDef, platform: &str, normalized: &str) -> String {
        format!(
            "{}/{}/{}_{}/state",
            self.discovery_root,
            platform,
            DEVICE_ID,
            normalized.to_lowercase()
        )
    }

    fn flat_topic(&self, normalized: &str) -> String {
        format!("{}/{}", self.topic_prefix, normalized)
    }

    async fn publish_discovery(&mut self, raw_name: &str, def: &PointDef) -> Result<(), EhsError> {
        let platform = platform_for(def);
        let normalized = normalize_name(raw_name, self.use_camel_case);
        let state_topic = self.state_topic(def, platform, &normalized);
        let object_id = format!("{DEVICE_ID}_{}", normalized.to_lowercase());

        let mut entity: serde_json::Map<String, Json> = serde_json::Map::new();
        entity.insert("name".into(), json!(normalized));
        entity.insert("object_id".into(), json!(object_id));
        entity.insert("unique_id".into(), json!(object_id));
        entity.insert("state_topic".into(), json!(state_topic));
        entity.insert("device".into(), device_metadata());

        if let Some(hass) = &def.hass_opts {
            if let Some(unit) = &hass.unit {
                entity.insert("unit_of_measurement".into(), json!(unit));
            }
            if let Some(device_class) = &hass.device_class {
                entity.insert("device_class".into(), json!(device_class));
            }
            if let Some(state_class) = &hass.state_class {
                entity.insert("state_class".into(), json!(state_class));
            }
            if hass.writable && self.allow_control {
                entity.insert(
                    "command_topic".into(),
                    json!(format!("{}/entity/{}/set", self.topic_prefix, raw_name)),
                );
            }
            if let Some(PlatformOpts {
                options,
                min,
                max,
                step,
                payload_on,
                payload_off,
                ..
            }) = &hass.platform
            {
                if let Some(options) = options {
                    entity.insert("options".into(), json!(options));
                }
                if let Some(min) = min {
                    entity.insert("min".into(), json!(min));
                }
                if let Some(max) = max {
                    entity.insert("max".into(), json!(max));
                }
                if let Some(step) = step {
                    entity.insert("step".into(), json!(step));
                }
                if let Some(on) = payload_on {
                    entity.insert("payload_on".into(), json!(on));
                }
                if let Some(off) = payload_off {
                    entity.insert("payload_off".into(), json!(off));
                }
            }
        } else if platform == "binary_sensor" {
            entity.insert("payload_on".into(), json!("ON"));
            entity.insert("payload_off".into(), json!("OFF"));
        }

        let config_topic = format!(
            "{}/{}/{}_{}/config",
            self.discovery_root,
            platform,
            DEVICE_ID,
            raw_name.to_lowercase()
        );
        self.client
            .publish(
                config_topic,
                QoS::ExactlyOnce,
                true,
                Json::Object(entity).to_string(),
            )
            .await?;

        self.known_devices.push(raw_name.to_string());
        self.publish_known_devices().await?;
        crate::log_at!(
            self.logging.device_added_level(),
            point = raw_name,
            platform,
            "published discovery config"
        );
        Ok(())
    }

    /// Normalize, select topic, round and publish one decoded value.
    pub async fn publish_value(&mut self, raw_name: &str, value: &Value) -> Result<(), EhsError> {
        let Some(def) = self.repository.by_name(raw_name).cloned() else {
            warn!(point = raw_name, "publish requested for point outside repository");
            return Ok(());
        };

        if !self.discovery_root.is_empty() && !self.known_devices.contains(&raw_name.to_string()) {
            self.publish_discovery(raw_name, &def).await?;
        }

        let normalized = normalize_name(raw_name, self.use_camel_case);
        let topic = if !self.discovery_root.is_empty() {
            let platform = platform_for(&def);
            self.state_topic(&def, platform, &normalized)
        } else {
            self.flat_topic(&normalized)
        };

        let payload = match value {
            Value::Numeric(n) if n.fract() != 0.0 => round2(*n).to_string(),
            Value::Numeric(n) => n.to_string(),
            Value::Text(s) => s.clone(),
        };

        debug!(topic, payload, "publishing state");
        self.client
            .publish(topic, QoS::ExactlyOnce, false, payload)
            .await?;
        Ok(())
    }

    /// Process one MQTT event. Returns a decoded write command when the
    /// event is an inbound `.../entity/{point}/set` message, `None`
    /// otherwise. A birth message on the controller status topic clears
    /// known-devices so entities are re-announced as traffic resumes.
    pub async fn handle_event(&mut self, event: Event) -> Result<Option<WriteCommand>, EhsError> {
        let Event::Incoming(Packet::Publish(publish)) = event else {
            return Ok(None);
        };
        let topic = publish.topic.clone();
        let payload = String::from_utf8_lossy(&publish.payload).to_string();

        if topic == format!("{}/status", self.discovery_root) {
            if payload == "online" {
                info!("controller birth message received, resetting device config");
                self.republish_device_reset().await?;
            }
            return Ok(None);
        }

        if topic == self.known_devices_topic() {
            self.known_devices = payload.split(',').map(str::to_string).filter(|s| !s.is_empty()).collect();
            return Ok(None);
        }

        let prefix = format!("{}/entity/", self.topic_prefix);
        if let Some(rest) = topic.strip_prefix(&prefix) {
            if let Some(point) = rest.strip_suffix("/set") {
                if !self.allow_control {
                    warn!(point, "inbound command ignored, control disabled");
                    return Ok(None);
                }
                return Ok(Some(WriteCommand {
                    point: point.to_string(),
                    text_value: payload,
                }));
            }
        }
        Ok(None)
    }
}

/// Drives the MQTT event loop and the publish-event channel concurrently,
/// forwarding inbound commands to `command_tx`.
pub async fn run(
    mut adapter: MqttAdapter,
    mut eventloop: rumqttc::EventLoop,
    mut publish_rx: mpsc::Receiver<crate::processor::PublishEvent>,
    command_tx: mpsc::Sender<WriteCommand>,
) {
    adapter
        .subscribe_startup_topics()
        .await
        .unwrap_or_else(|err| warn!(%err, "failed to subscribe to startup topics"));

    loop {
        tokio::select! {
            event = eventloop.poll() => {
                match event {
                    Ok(event) => match adapter.handle_event(event).await {
                        Ok(Some(command)) => {
                            if command_tx.send(command).await.is_err() {
                                warn!("producer command channel closed");
                            }
                        }
                        Ok(None) => {}
                        Err(err) => warn!(%err, "failed to handle mqtt event"),
                    },
                    Err(err) => {
                        warn!(%err, "mqtt connection error, reconnecting in 5s");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
            event = publish_rx.recv() => {
                match event {
                    Some(event) => {
                        if let Err(err) = adapter.publish_value(&event.point, &event.value).await {
                            warn!(%err, point = %event.point, "failed to publish value");
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_camel_case_and_strips_prefixes() {
        assert_eq!(normalize_name("NASA_OUTDOOR_TEMP", true), "outdoorTemp");
        assert_eq!(normalize_name("VAR_COMP_SPEED", true), "compSpeed");
        assert_eq!(normalize_name("FOO_BAR", false), "FOO_BAR");
    }

    #[test]
    fn rounds_fractional_values_to_two_decimals() {
        assert_eq!(round2(30.12345), 30.12);
        assert_eq!(round2(1.0), 1.0);
    }

    #[test]
    fn device_metadata_carries_stable_identifiers() {
        let device = device_metadata();
        assert_eq!(device["identifiers"][0], json!(DEVICE_ID));
        assert_eq!(device["name"], json!(DEVICE_NAME));
    }
}

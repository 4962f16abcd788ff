//! Per-message decode, derived-metric computation, publish, protocol log.

use crate::config::LoggingConfig;
use crate::constants::{ADDR_COP, ADDR_HEAT_OUTPUT, ADDR_TOTAL_COP};
use crate::packet::{NasaMessage, NasaPacket};
use crate::repository::Repository;
use crate::store::ValueStore;
use crate::value::{self, Value};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

/// Canonical point names the derived-metric table reads from.
///
/// These are the repository's own point names for the underlying
/// measurements; sites wire their `nasaRepository.yml` entries to these
/// identifiers so the processor can find them by name in the value store.
mod derived_inputs {
    pub const OUTDOOR_RETURN_TEMP: &str = "outdoor_return_temp";
    pub const OUTDOOR_SUPPLY_TEMP: &str = "outdoor_supply_temp";
    pub const FLOW_SENSOR_CALC: &str = "flow_sensor_calc";
    pub const TOTAL_WATTMETER: &str = "total_wattmeter";
    pub const ACCUMULATED_WATTMETER: &str = "accumulated_wattmeter";
    pub const ACCUMULATED_GENERATED_POWER: &str = "accumulated_generated_power";
}

/// A value the processor has decoded and wants published, either sampled
/// straight off the bus or computed as a derived metric.
#[derive(Debug, Clone)]
pub struct PublishEvent {
    pub point: String,
    pub value: Value,
}

/// Appends one CSV line per processed message when a protocol log path is
/// configured (§6 "Protocol log").
pub struct ProtocolLog {
    file: Mutex<Option<tokio::fs::File>>,
}

impl ProtocolLog {
    pub fn disabled() -> Arc<Self> {
        Arc::new(Self {
            file: Mutex::new(None),
        })
    }

    pub async fn open(path: &std::path::Path) -> std::io::Result<Arc<Self>> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Arc::new(Self {
            file: Mutex::new(Some(file)),
        }))
    }

    async fn append(&self, address: u16, message_type: &str, point: &str, value: &Value) {
        let mut guard = self.file.lock().await;
        if let Some(file) = guard.as_mut() {
            let line = format!("{address:#06x},{message_type},{point},{value}\n");
            if let Err(err) = file.write_all(line.as_bytes()).await {
                warn!(%err, "failed to append to protocol log");
            }
        }
    }
}

/// Applies per-point decoding and derived-metric rules to incoming packets,
/// then forwards resulting values to the MQTT side over `publish_tx`.
pub struct MessageProcessor {
    repository: Arc<Repository>,
    store: ValueStore,
    publish_tx: mpsc::Sender<PublishEvent>,
    protocol_log: Arc<ProtocolLog>,
    logging: LoggingConfig,
    unknown_point_count: u64,
}

impl MessageProcessor {
    pub fn new(
        repository: Arc<Repository>,
        publish_tx: mpsc::Sender<PublishEvent>,
        protocol_log: Arc<ProtocolLog>,
        logging: LoggingConfig,
    ) -> Self {
        Self {
            repository,
            store: ValueStore::new(),
            publish_tx,
            protocol_log,
            logging,
            unknown_point_count: 0,
        }
    }

    /// Source filter (§4.3): packets not from Indoor/Outdoor are dropped,
    /// except the known benign WiFiKit → self-broadcast notification case.
    fn accept_source(&self, packet: &NasaPacket) -> bool {
        use crate::constants::{AddressClass, DataType};
        match packet.source.class {
            AddressClass::Indoor | AddressClass::Outdoor => true,
            AddressClass::WiFiKit if packet.data_type == DataType::Notification => {
                crate::log_at!(
                    self.logging.packet_not_from_indoor_outdoor_level(),
                    "dropping benign WiFiKit self-broadcast notification"
                );
                false
            }
            other => {
                crate::log_at!(
                    self.logging.packet_not_from_indoor_outdoor_level(),
                    source = ?other,
                    "packet not from Indoor/Outdoor, discarding"
                );
                false
            }
        }
    }

    /// Process every message in one parsed packet, in wire order.
    pub async fn process_packet(&mut self, packet: &NasaPacket) {
        if !self.accept_source(packet) {
            return;
        }
        for message in &packet.messages {
            self.process_message(message).await;
        }
    }

    async fn process_message(&mut self, message: &NasaMessage) {
        let Some(def) = self.repository.by_address(message.address) else {
            self.unknown_point_count += 1;
            crate::log_at!(
                self.logging.message_not_found_level(),
                address = format!("{:#06x}", message.address),
                count = self.unknown_point_count,
                "message not found in repository"
            );
            return;
        };
        let name = def.name.clone();
        let value = value::forward(def, message.message_type, &message.payload);
        crate::log_at!(
            self.logging.proccessed_message_level(),
            point = %name,
            %value,
            "processed message"
        );

        self.protocol_log
            .append(message.address, def_type_label(def), &name, &value)
            .await;

        self.publish(&name, value.clone()).await;
        self.store.set(&name, value);
        self.evaluate_derived_metrics(&name).await;
    }

    /// Feed an already-decoded value through the same publish/store/derive
    /// path a wire message would take. Used by the inbound-command write's
    /// follow-up read today, and by tests that want to drive the derived
    /// metric table without constructing wire bytes.
    pub async fn ingest_value(&mut self, name: &str, value: Value) {
        self.publish(name, value.clone()).await;
        self.store.set(name, value);
        self.evaluate_derived_metrics(name).await;
    }

    async fn publish(&self, point: &str, value: Value) {
        if self
            .publish_tx
            .send(PublishEvent {
                point: point.to_string(),
                value,
            })
            .await
            .is_err()
        {
            warn!("publish channel closed, dropping value for {point}");
        }
    }

    /// Re-enter a synthetic value through the same store/publish path a
    /// sampled value would take. Synthetic addresses never trigger further
    /// derivations beyond the explicit chain below, which prevents runaway
    /// recursion.
    async fn publish_synthetic(&mut self, name: &str, value: f64) {
        info!(point = %name, %value, "derived metric");
        self.store.set(name, Value::Numeric(value));
        self.publish(name, Value::Numeric(value)).await;
    }

    async fn evaluate_derived_metrics(&mut self, updated: &str) {
        use derived_inputs::*;

        // HEAT_OUTPUT may be freshly (re-)derived by the block just below,
        // in the same call that's already past the point where `updated`
        // would otherwise have named it. Track that explicitly so the COP
        // check that follows sees it, matching the S6 chain where temps and
        // flow arrive after total_wattmeter is already known.
        let mut heat_output_updated = updated == "HEAT_OUTPUT";

        if matches!(
            updated,
            OUTDOOR_RETURN_TEMP | OUTDOOR_SUPPLY_TEMP | FLOW_SENSOR_CALC
        ) {
            if let (Some(tw1), Some(tw2), Some(flow)) = (
                self.store.get_f64(OUTDOOR_RETURN_TEMP),
                self.store.get_f64(OUTDOOR_SUPPLY_TEMP),
                self.store.get_f64(FLOW_SENSOR_CALC),
            ) {
                let heat_output = round4((tw2 - tw1).abs() * (flow / 60.0) * 4190.0);
                if heat_output > 0.0 && heat_output < 15000.0 {
                    self.publish_synthetic("HEAT_OUTPUT", heat_output).await;
                    heat_output_updated = true;
                }
            }
        }

        if heat_output_updated || updated == TOTAL_WATTMETER {
            if let (Some(heat_output), Some(wattmeter)) = (
                self.store.get_f64("HEAT_OUTPUT"),
                self.store.get_f64(TOTAL_WATTMETER),
            ) {
                if wattmeter > 0.0 {
                    let cop = round3(heat_output / (wattmeter * 1000.0));
                    if cop > 0.0 && cop < 20.0 {
                        self.publish_synthetic("COP", cop).await;
                    }
                }
            }
        }

        if matches!(
            updated,
            ACCUMULATED_WATTMETER | ACCUMULATED_GENERATED_POWER
        ) {
            if let (Some(accumulated), Some(generated)) = (
                self.store.get_f64(ACCUMULATED_WATTMETER),
                self.store.get_f64(ACCUMULATED_GENERATED_POWER),
            ) {
                if accumulated > 0.0 {
                    let total_cop = round3(generated / accumulated);
                    if total_cop > 0.0 && total_cop < 20.0 {
                        self.publish_synthetic("TOTAL_COP", total_cop).await;
                    }
                }
            }
        }

        // Synthetic addresses never re-enter this function: HEAT_OUTPUT,
        // COP and TOTAL_COP are not read back as triggers for themselves or
        // for each other beyond the explicit chain above.
        let _ = (ADDR_HEAT_OUTPUT, ADDR_COP, ADDR_TOTAL_COP);
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn round4(v: f64) -> f64 {
    (v * 10000.0).round() / 10000.0
}

fn def_type_label(def: &crate::repository::PointDef) -> &'static str {
    match def.point_type {
        crate::constants::PointType::Enum => "ENUM",
        crate::constants::PointType::Var => "VAR",
        crate::constants::PointType::LVar => "LVAR",
        crate::constants::PointType::Str => "STR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PointType;
    use crate::repository::PointDef;

    fn temp_point(name: &str, address: u16) -> PointDef {
        PointDef {
            name: name.to_string(),
            address,
            point_type: PointType::Var,
            signed: true,
            unit: Some("°C".to_string()),
            arithmetic: "value/10".to_string(),
            reverse_arithmetic: "value*10".to_string(),
            enum_map: None,
            hass_opts: None,
        }
    }

    fn wattmeter_point(name: &str, address: u16) -> PointDef {
        PointDef {
            name: name.to_string(),
            address,
            point_type: PointType::LVar,
            signed: false,
            unit: Some("kW".to_string()),
            arithmetic: "value/100".to_string(),
            reverse_arithmetic: "value*100".to_string(),
            enum_map: None,
            hass_opts: None,
        }
    }

    fn build_repo() -> Arc<Repository> {
        let mut repo = Repository::default();
        for (name, addr, builder) in [
            ("outdoor_return_temp", 0x1001u16, temp_point as fn(&str, u16) -> PointDef),
            ("outdoor_supply_temp", 0x1002, temp_point),
            ("flow_sensor_calc", 0x1003, temp_point),
            ("total_wattmeter", 0x1004, wattmeter_point),
        ] {
            let def = builder(name, addr);
            repo.insert_for_test(addr, def);
        }
        Arc::new(repo)
    }

    #[tokio::test]
    async fn heat_output_and_cop_chain_per_s6() {
        let repo = build_repo();
        let (tx, mut rx) = mpsc::channel(64);
        let mut processor = MessageProcessor::new(repo, tx, ProtocolLog::disabled(), LoggingConfig::default());

        processor.store.set("outdoor_return_temp", Value::Numeric(30.0));
        processor.store.set("outdoor_supply_temp", Value::Numeric(35.0));
        processor.store.set("flow_sensor_calc", Value::Numeric(18.0));
        processor.store.set("total_wattmeter", Value::Numeric(1.5));
        processor.evaluate_derived_metrics("flow_sensor_calc").await;

        let heat_output = processor.store.get_f64("HEAT_OUTPUT").unwrap();
        assert!((heat_output - 6285.0).abs() < 0.001);
        let cop = processor.store.get_f64("COP").unwrap();
        assert!((cop - 4.190).abs() < 0.001);

        drop(processor);
        let mut seen = vec![];
        while let Ok(event) = rx.try_recv() {
            seen.push(event.point);
        }
        assert!(seen.contains(&"HEAT_OUTPUT".to_string()));
        assert!(seen.contains(&"COP".to_string()));
    }

    #[tokio::test]
    async fn heat_output_above_threshold_is_not_published() {
        let repo = build_repo();
        let (tx, mut rx) = mpsc::channel(64);
        let mut processor = MessageProcessor::new(repo, tx, ProtocolLog::disabled(), LoggingConfig::default());

        processor.store.set("outdoor_return_temp", Value::Numeric(0.0));
        processor.store.set("outdoor_supply_temp", Value::Numeric(500.0));
        processor.store.set("flow_sensor_calc", Value::Numeric(600.0));
        processor.evaluate_derived_metrics("flow_sensor_calc").await;

        assert!(processor.store.get_f64("HEAT_OUTPUT").is_none());
        drop(processor);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cop_recomputes_when_heat_output_is_derived_after_wattmeter() {
        let repo = build_repo();
        let (tx, _rx) = mpsc::channel(64);
        let mut processor = MessageProcessor::new(repo, tx, ProtocolLog::disabled(), LoggingConfig::default());

        // total_wattmeter arrives first, so the trigger that later derives
        // HEAT_OUTPUT is "flow_sensor_calc", never "total_wattmeter" itself.
        processor.store.set("total_wattmeter", Value::Numeric(1.5));
        processor.evaluate_derived_metrics("total_wattmeter").await;
        assert!(processor.store.get_f64("COP").is_none());

        processor.store.set("outdoor_return_temp", Value::Numeric(30.0));
        processor.store.set("outdoor_supply_temp", Value::Numeric(35.0));
        processor.store.set("flow_sensor_calc", Value::Numeric(18.0));
        processor.evaluate_derived_metrics("flow_sensor_calc").await;

        let cop = processor.store.get_f64("COP").unwrap();
        assert!((cop - 4.190).abs() < 0.001);
    }
}

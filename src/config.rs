//! Top-level configuration file (YAML), matching §6's external interface.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Emit a tracing event at a level chosen at runtime, for the call sites
/// whose level comes from the config file's `logging:` section rather than
/// being fixed at compile time.
#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            tracing::Level::ERROR => tracing::error!($($arg)+),
            tracing::Level::WARN => tracing::warn!($($arg)+),
            tracing::Level::INFO => tracing::info!($($arg)+),
            tracing::Level::DEBUG => tracing::debug!($($arg)+),
            tracing::Level::TRACE => tracing::trace!($($arg)+),
        }
    };
}

fn parse_level(value: &Option<String>, default: tracing::Level) -> tracing::Level {
    value
        .as_deref()
        .and_then(|s| s.parse::<tracing::Level>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(rename = "broker-url")]
    pub broker_url: String,
    #[serde(rename = "broker-port")]
    pub broker_port: u16,
    #[serde(rename = "client-id")]
    pub client_id: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(rename = "topicPrefix")]
    pub topic_prefix: String,
    #[serde(rename = "homeAssistantAutoDiscoverTopic")]
    pub discovery_root: String,
    #[serde(default, rename = "useCamelCaseTopicNames")]
    pub use_camel_case_topic_names: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(rename = "nasaRepositoryFile")]
    pub nasa_repository_file: PathBuf,
    #[serde(default, rename = "protocolFile")]
    pub protocol_file: Option<PathBuf>,
    #[serde(default, rename = "allowControl")]
    pub allow_control: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    pub device: PathBuf,
    pub baudrate: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TcpConfig {
    pub ip: String,
    pub port: u16,
}

/// One entry in `polling.fetch_interval`: a named schedule over a group.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchInterval {
    pub name: String,
    #[serde(default = "default_true")]
    pub enable: bool,
    pub schedule: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollingConfig {
    #[serde(default)]
    pub fetch_interval: Vec<FetchInterval>,
    #[serde(default)]
    pub groups: std::collections::HashMap<String, Vec<String>>,
}

/// Which NASA bus source class to present as when issuing poll reads (§9
/// open question: the bus's tolerance for JIGTester vs WiFiKit as a poll
/// source is site-dependent, so it's exposed here rather than guessed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollSourceClass {
    JigTester,
    WiFiKit,
}

impl Default for PollSourceClass {
    fn default() -> Self {
        PollSourceClass::JigTester
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default, rename = "messageNotFound")]
    pub message_not_found: Option<String>,
    #[serde(default, rename = "invalidPacket")]
    pub invalid_packet: Option<String>,
    #[serde(default, rename = "deviceAdded")]
    pub device_added: Option<String>,
    #[serde(default, rename = "packetNotFromIndoorOutdoor")]
    pub packet_not_from_indoor_outdoor: Option<String>,
    #[serde(default, rename = "proccessedMessage")]
    pub proccessed_message: Option<String>,
    #[serde(default, rename = "pollerMessage")]
    pub poller_message: Option<String>,
    #[serde(default, rename = "controlMessage")]
    pub control_message: Option<String>,
}

impl LoggingConfig {
    /// §4.3 "message not found in repository" (default: current behavior).
    pub fn message_not_found_level(&self) -> tracing::Level {
        parse_level(&self.message_not_found, tracing::Level::DEBUG)
    }

    /// §4.8 "dropping unparseable packet".
    pub fn invalid_packet_level(&self) -> tracing::Level {
        parse_level(&self.invalid_packet, tracing::Level::WARN)
    }

    /// §4.7 "published discovery config".
    pub fn device_added_level(&self) -> tracing::Level {
        parse_level(&self.device_added, tracing::Level::INFO)
    }

    /// §4.3 "packet not from Indoor/Outdoor, discarding".
    pub fn packet_not_from_indoor_outdoor_level(&self) -> tracing::Level {
        parse_level(&self.packet_not_from_indoor_outdoor, tracing::Level::INFO)
    }

    /// §4.3 "processed message".
    pub fn proccessed_message_level(&self) -> tracing::Level {
        parse_level(&self.proccessed_message, tracing::Level::INFO)
    }

    /// §4.5 "polling group".
    pub fn poller_message_level(&self) -> tracing::Level {
        parse_level(&self.poller_message, tracing::Level::INFO)
    }

    /// §4.4 "sending write request".
    pub fn control_message_level(&self) -> tracing::Level {
        parse_level(&self.control_message, tracing::Level::DEBUG)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    pub mqtt: MqttConfig,
    pub general: GeneralConfig,
    #[serde(default)]
    pub serial: Option<SerialConfig>,
    #[serde(default)]
    pub tcp: Option<TcpConfig>,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub poll_source_class: PollSourceClass,
}

/// Which bus transport this config selects: exactly one of serial or TCP.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    Serial(SerialConfig),
    Tcp(TcpConfig),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub general: GeneralConfig,
    pub transport: TransportConfig,
    pub polling: PollingConfig,
    pub logging: LoggingConfig,
    pub poll_source_class: PollSourceClass,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml {
            path: path.display().to_string(),
            source,
        })?;

        let transport = match (raw.serial, raw.tcp) {
            (Some(serial), None) => TransportConfig::Serial(serial),
            (None, Some(tcp)) => TransportConfig::Tcp(tcp),
            (Some(_), Some(_)) => {
                return Err(ConfigError::AmbiguousTransport("both serial and tcp given"))
            }
            (None, None) => {
                return Err(ConfigError::AmbiguousTransport(
                    "neither serial nor tcp given",
                ))
            }
        };

        Ok(Config {
            mqtt: raw.mqtt,
            general: raw.general,
            transport,
            polling: raw.polling,
            logging: raw.logging,
            poll_source_class: raw.poll_source_class,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
mqtt:
  broker-url: localhost
  broker-port: 1883
  client-id: ehs-sentinel
  topicPrefix: ehs
  homeAssistantAutoDiscoverTopic: homeassistant
general:
  nasaRepositoryFile: nasaRepository.yml
  allowControl: true
"#;

    #[test]
    fn rejects_when_no_transport_given() {
        let err = Config::parse(BASE, Path::new("c.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::AmbiguousTransport(_)));
    }

    #[test]
    fn rejects_when_both_transports_given() {
        let text = format!(
            "{BASE}\nserial:\n  device: /dev/ttyUSB0\n  baudrate: 9600\ntcp:\n  ip: 10.0.0.5\n  port: 502\n"
        );
        let err = Config::parse(&text, Path::new("c.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::AmbiguousTransport(_)));
    }

    #[test]
    fn accepts_serial_only() {
        let text = format!("{BASE}\nserial:\n  device: /dev/ttyUSB0\n  baudrate: 9600\n");
        let cfg = Config::parse(&text, Path::new("c.yaml")).unwrap();
        assert!(matches!(cfg.transport, TransportConfig::Serial(_)));
        assert_eq!(cfg.poll_source_class, PollSourceClass::JigTester);
        assert!(cfg.general.allow_control, "allowControl: true must deserialize");
    }

    #[test]
    fn logging_section_uses_documented_camel_case_keys() {
        let text = format!(
            "{BASE}\nserial:\n  device: /dev/ttyUSB0\n  baudrate: 9600\nlogging:\n  messageNotFound: warn\n  controlMessage: error\n"
        );
        let cfg = Config::parse(&text, Path::new("c.yaml")).unwrap();
        assert_eq!(cfg.logging.message_not_found_level(), tracing::Level::WARN);
        assert_eq!(cfg.logging.control_message_level(), tracing::Level::ERROR);
        // Unset knobs keep their documented default level.
        assert_eq!(cfg.logging.poller_message_level(), tracing::Level::INFO);
    }
}

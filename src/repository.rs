//! Immutable in-memory catalog: address → point definition.

use crate::constants::PointType;
use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Home Assistant discovery hints carried on a point definition.
#[derive(Debug, Clone, Deserialize)]
pub struct HassOpts {
    #[serde(default)]
    pub writable: bool,
    #[serde(default)]
    pub default_platform: Option<String>,
    #[serde(default)]
    pub platform: Option<PlatformOpts>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub device_class: Option<String>,
    #[serde(default)]
    pub state_class: Option<String>,
}

/// Platform-specific discovery fields (select options, number bounds, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformOpts {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub step: Option<f64>,
    #[serde(default)]
    pub payload_on: Option<String>,
    #[serde(default)]
    pub payload_off: Option<String>,
}

/// Raw shape of a repository file entry, as it appears in YAML.
#[derive(Debug, Clone, Deserialize)]
struct RawPoint {
    address: String,
    #[serde(rename = "type")]
    point_type: String,
    #[serde(default)]
    signed: bool,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    arithmetic: String,
    #[serde(default, rename = "reverse-arithmetic")]
    reverse_arithmetic: Option<String>,
    #[serde(default)]
    #[serde(rename = "enum")]
    enum_map: Option<HashMap<i64, String>>,
    #[serde(default)]
    hass_opts: Option<HassOpts>,
}

/// A single addressed point: its wire address, semantic type, decoding
/// rules and discovery hints.
#[derive(Debug, Clone)]
pub struct PointDef {
    pub name: String,
    pub address: u16,
    pub point_type: PointType,
    pub signed: bool,
    pub unit: Option<String>,
    pub arithmetic: String,
    pub reverse_arithmetic: String,
    pub enum_map: Option<HashMap<i64, String>>,
    pub hass_opts: Option<HassOpts>,
}

impl PointDef {
    /// Reverse-lookup an enum label back to its raw integer key.
    pub fn enum_reverse_lookup(&self, label: &str) -> Option<i64> {
        self.enum_map
            .as_ref()?
            .iter()
            .find(|(_, v)| v.as_str() == label)
            .map(|(k, _)| *k)
    }
}

/// Process-wide, load-once catalog of every known point, indexed both by
/// stable name and by wire address (I1: address ↔ point def is a bijection).
#[derive(Debug, Default)]
pub struct Repository {
    by_address: HashMap<u16, PointDef>,
    by_name: HashMap<String, u16>,
}

impl Repository {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: HashMap<String, RawPoint> =
            serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml {
                path: path.display().to_string(),
                source,
            })?;

        let mut repo = Repository::default();
        for (name, point) in raw {
            let address_str = point.address.trim_start_matches("0x").trim_start_matches("0X");
            let address = u16::from_str_radix(address_str, 16)
                .map_err(|_| ConfigError::InvalidAddress(point.address.clone()))?;
            let point_type = point
                .point_type
                .parse::<PointType>()
                .map_err(|_| ConfigError::InvalidPointType(point.point_type.clone()))?;

            let def = PointDef {
                name: name.clone(),
                address,
                point_type,
                signed: point.signed,
                unit: point.unit,
                arithmetic: point.arithmetic,
                reverse_arithmetic: point.reverse_arithmetic.unwrap_or_default(),
                enum_map: point.enum_map,
                hass_opts: point.hass_opts,
            };
            repo.by_name.insert(name, address);
            repo.by_address.insert(address, def);
        }
        Ok(repo)
    }

    pub fn by_address(&self, address: u16) -> Option<&PointDef> {
        self.by_address.get(&address)
    }

    pub fn by_name(&self, name: &str) -> Option<&PointDef> {
        let address = *self.by_name.get(name)?;
        self.by_address.get(&address)
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    /// Insert or replace a single point definition. Mainly useful for
    /// building a repository programmatically in tests, without a YAML
    /// file on disk.
    pub fn insert_for_test(&mut self, address: u16, def: PointDef) {
        self.by_name.insert(def.name.clone(), address);
        self.by_address.insert(address, def);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
COMP_TEMP:
  address: "0x4247"
  type: VAR
  signed: true
  unit: "°C"
  arithmetic: "value / 10"
DHW_POWER:
  address: "0x4001"
  type: ENUM
  signed: false
  arithmetic: ""
  enum:
    0: "OFF"
    1: "ON"
  hass_opts:
    writable: true
    default_platform: switch
TARGET_TEMP:
  address: "0x4260"
  type: VAR
  signed: true
  unit: "°C"
  arithmetic: "value / 10"
  reverse-arithmetic: "value * 10"
"#;

    #[test]
    fn parses_points_by_address_and_name() {
        let repo = Repository::parse(SAMPLE, Path::new("sample.yaml")).unwrap();
        assert_eq!(repo.len(), 3);
        let comp = repo.by_address(0x4247).unwrap();
        assert_eq!(comp.name, "COMP_TEMP");
        assert_eq!(comp.point_type, PointType::Var);
        let dhw = repo.by_name("DHW_POWER").unwrap();
        assert_eq!(dhw.address, 0x4001);
        assert_eq!(dhw.enum_reverse_lookup("ON"), Some(1));
    }

    #[test]
    fn reverse_arithmetic_key_is_hyphenated_in_yaml() {
        let repo = Repository::parse(SAMPLE, Path::new("sample.yaml")).unwrap();
        let target = repo.by_name("TARGET_TEMP").unwrap();
        assert_eq!(target.reverse_arithmetic, "value * 10");
    }

    #[test]
    fn rejects_bad_address() {
        let bad = "X:\n  address: \"zz\"\n  type: VAR\n  arithmetic: \"\"\n";
        let err = Repository::parse(bad, Path::new("bad.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress(_)));
    }
}

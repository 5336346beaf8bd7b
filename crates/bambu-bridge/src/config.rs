//! Session configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BridgeError, Result};
use crate::format::Vocabulary;

/// Smallest accepted polling interval in seconds.
pub const MIN_INTERVAL_SECS: u64 = 5;
/// Largest accepted polling interval in seconds.
pub const MAX_INTERVAL_SECS: u64 = 3600;

/// Sink names that mean "not bound".
const PLACEHOLDER_NAMES: [&str; 2] = ["[No source]", "[No picture source]"];

/// Connection and display settings for one bridge session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Printer host name or IP address.
    pub host: String,
    /// MQTT over TLS port.
    pub mqtt_port: u16,
    /// Implicit FTPS port.
    pub ftp_port: u16,
    /// Login name for both channels.
    pub user: String,
    /// Access code (from the printer's LAN mode settings).
    pub access_code: String,
    /// Printer serial number.
    pub serial: String,
    /// Poll interval in seconds.
    pub interval_secs: u64,
    /// Directory holding plate images and receiving model previews.
    pub image_root: Option<PathBuf>,
    /// Build plate selection, e.g. "Bambu Cool Plate".
    pub plate: Option<String>,
    /// Upper bound for one model image download.
    pub asset_timeout_secs: u64,
    /// Upper bound for a connect or reconnect handshake.
    pub connect_timeout_secs: u64,
    /// Display sink names per field.
    pub sinks: SinkBindings,
    /// Display strings.
    pub vocabulary: Vocabulary,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            mqtt_port: 8883,
            ftp_port: 990,
            user: "bblp".into(),
            access_code: String::new(),
            serial: String::new(),
            interval_secs: MIN_INTERVAL_SECS,
            image_root: None,
            plate: None,
            asset_timeout_secs: 30,
            connect_timeout_secs: 10,
            sinks: SinkBindings::default(),
            vocabulary: Vocabulary::default(),
        }
    }
}

impl SessionConfig {
    /// Create a configuration with the required connection fields set.
    pub fn new(host: impl Into<String>, access_code: impl Into<String>, serial: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            access_code: access_code.into(),
            serial: serial.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration from TOML.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| BridgeError::ConfigInvalid(e.to_string()))
    }

    /// Check that a session can be started with this configuration.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.host.trim().is_empty() {
            missing.push("host");
        }
        if self.access_code.is_empty() {
            missing.push("access_code");
        }
        if self.serial.trim().is_empty() {
            missing.push("serial");
        }
        if !missing.is_empty() {
            return Err(BridgeError::ConfigInvalid(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&self.interval_secs) {
            return Err(BridgeError::ConfigInvalid(format!(
                "interval must be between {MIN_INTERVAL_SECS} and {MAX_INTERVAL_SECS} seconds, got {}",
                self.interval_secs
            )));
        }

        if !self.sinks.any_bound() {
            return Err(BridgeError::ConfigInvalid("no output sink configured".into()));
        }

        Ok(())
    }

    /// Poll interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Topic carrying the printer's status reports.
    pub fn report_topic(&self) -> String {
        format!("device/{}/report", self.serial)
    }

    /// Local file of the selected build plate image, if any.
    pub fn plate_image(&self) -> Option<PathBuf> {
        let root = self.image_root.as_ref()?;
        let file = plate_image_file(self.plate.as_deref()?)?;
        Some(root.join(file))
    }
}

/// Image file shown for a build plate selection.
pub fn plate_image_file(selection: &str) -> Option<&'static str> {
    match selection {
        "Bambu Cool Plate" => Some("BambuCoolPlate.png"),
        "Bambu Engineering Plate" => Some("BambuEngineeringPlate.png"),
        "Bambu High Temperature Plate (PEI)" => Some("BambuSmoothPEIPlateHighTempPlate.png"),
        "Bambu Dual-Sided Smooth PEI Plate" => Some("BambuSmoothPEIPlateHighTempPlate.png"),
        "Bambu Textured PEI Plate" => Some("BambuTexturedPEIPlate.png"),
        _ => None,
    }
}

/// Logical display fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkField {
    /// Nozzle diameter and material.
    NozzleType,
    /// Nozzle temperature and target.
    NozzleTemp,
    /// Bed temperature and target.
    BedTemp,
    /// Chamber temperature.
    ChamberTemp,
    /// Remaining print time.
    RemainingTime,
    /// Current and total layer.
    Layer,
    /// Filament type.
    Filament,
    /// Filament color.
    FilamentColor,
    /// Completion percentage.
    PercentFinish,
    /// Rendered model preview.
    Model,
    /// Build plate picture.
    Plate,
}

impl SinkField {
    /// All fields.
    pub const ALL: [SinkField; 11] = [
        SinkField::NozzleType,
        SinkField::NozzleTemp,
        SinkField::BedTemp,
        SinkField::ChamberTemp,
        SinkField::RemainingTime,
        SinkField::Layer,
        SinkField::Filament,
        SinkField::FilamentColor,
        SinkField::PercentFinish,
        SinkField::Model,
        SinkField::Plate,
    ];

    /// Fields that receive plain text.
    pub const TEXT: [SinkField; 8] = [
        SinkField::NozzleType,
        SinkField::NozzleTemp,
        SinkField::BedTemp,
        SinkField::ChamberTemp,
        SinkField::RemainingTime,
        SinkField::Layer,
        SinkField::PercentFinish,
        SinkField::Filament,
    ];
}

/// Sink name bound to each display field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SinkBindings {
    /// Nozzle diameter and material.
    pub nozzle_type: Option<String>,
    /// Nozzle temperature.
    pub nozzle_temp: Option<String>,
    /// Bed temperature.
    pub bed_temp: Option<String>,
    /// Chamber temperature.
    pub chamber_temp: Option<String>,
    /// Remaining print time.
    pub remaining_time: Option<String>,
    /// Layer progress.
    pub layer: Option<String>,
    /// Filament type.
    pub filament: Option<String>,
    /// Filament color.
    pub filament_color: Option<String>,
    /// Completion percentage.
    pub percent_finish: Option<String>,
    /// Model preview image.
    pub model: Option<String>,
    /// Build plate image.
    pub plate: Option<String>,
}

impl SinkBindings {
    /// Bind a field to a sink name.
    pub fn with(mut self, field: SinkField, name: impl Into<String>) -> Self {
        *self.slot_mut(field) = Some(name.into());
        self
    }

    /// Sink name for a field, skipping empty and placeholder names.
    pub fn target(&self, field: SinkField) -> Option<&str> {
        let name = self.slot(field).as_deref()?;
        if name.is_empty() || PLACEHOLDER_NAMES.contains(&name) {
            return None;
        }
        Some(name)
    }

    /// Whether any field is bound to a real sink.
    pub fn any_bound(&self) -> bool {
        SinkField::ALL.iter().any(|&field| self.target(field).is_some())
    }

    fn slot(&self, field: SinkField) -> &Option<String> {
        match field {
            SinkField::NozzleType => &self.nozzle_type,
            SinkField::NozzleTemp => &self.nozzle_temp,
            SinkField::BedTemp => &self.bed_temp,
            SinkField::ChamberTemp => &self.chamber_temp,
            SinkField::RemainingTime => &self.remaining_time,
            SinkField::Layer => &self.layer,
            SinkField::Filament => &self.filament,
            SinkField::FilamentColor => &self.filament_color,
            SinkField::PercentFinish => &self.percent_finish,
            SinkField::Model => &self.model,
            SinkField::Plate => &self.plate,
        }
    }

    fn slot_mut(&mut self, field: SinkField) -> &mut Option<String> {
        match field {
            SinkField::NozzleType => &mut self.nozzle_type,
            SinkField::NozzleTemp => &mut self.nozzle_temp,
            SinkField::BedTemp => &mut self.bed_temp,
            SinkField::ChamberTemp => &mut self.chamber_temp,
            SinkField::RemainingTime => &mut self.remaining_time,
            SinkField::Layer => &mut self.layer,
            SinkField::Filament => &mut self.filament,
            SinkField::FilamentColor => &mut self.filament_color,
            SinkField::PercentFinish => &mut self.percent_finish,
            SinkField::Model => &mut self.model,
            SinkField::Plate => &mut self.plate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> SessionConfig {
        let mut config = SessionConfig::new("192.168.1.50", "12345678", "01S00A000000000");
        config.sinks = SinkBindings::default().with(SinkField::Layer, "Layer Text");
        config
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.mqtt_port, 8883);
        assert_eq!(config.ftp_port, 990);
        assert_eq!(config.user, "bblp");
        assert_eq!(config.interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let mut config = valid_config();
        config.serial.clear();
        match config.validate() {
            Err(BridgeError::ConfigInvalid(msg)) => assert!(msg.contains("serial")),
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_interval_out_of_range() {
        let mut config = valid_config();
        config.interval_secs = 1;
        assert!(matches!(config.validate(), Err(BridgeError::ConfigInvalid(_))));
        config.interval_secs = 3601;
        assert!(matches!(config.validate(), Err(BridgeError::ConfigInvalid(_))));
    }

    #[test]
    fn test_validate_requires_a_sink() {
        let mut config = valid_config();
        config.sinks = SinkBindings::default()
            .with(SinkField::Layer, "[No source]")
            .with(SinkField::Plate, "");
        assert!(matches!(config.validate(), Err(BridgeError::ConfigInvalid(_))));
    }

    #[test]
    fn test_placeholder_targets_are_unbound() {
        let sinks = SinkBindings::default()
            .with(SinkField::Model, "[No source]")
            .with(SinkField::Plate, "[No picture source]")
            .with(SinkField::Layer, "Layer");
        assert_eq!(sinks.target(SinkField::Model), None);
        assert_eq!(sinks.target(SinkField::Plate), None);
        assert_eq!(sinks.target(SinkField::Layer), Some("Layer"));
        assert_eq!(sinks.target(SinkField::BedTemp), None);
    }

    #[test]
    fn test_report_topic() {
        assert_eq!(valid_config().report_topic(), "device/01S00A000000000/report");
    }

    #[test]
    fn test_plate_image() {
        assert_eq!(plate_image_file("Bambu Cool Plate"), Some("BambuCoolPlate.png"));
        assert_eq!(
            plate_image_file("Bambu Dual-Sided Smooth PEI Plate"),
            Some("BambuSmoothPEIPlateHighTempPlate.png")
        );
        assert_eq!(plate_image_file("bambu cool plate"), None);

        let mut config = valid_config();
        config.plate = Some("Bambu Textured PEI Plate".into());
        assert_eq!(config.plate_image(), None);
        config.image_root = Some(PathBuf::from("/srv/overlay"));
        assert_eq!(
            config.plate_image(),
            Some(PathBuf::from("/srv/overlay/BambuTexturedPEIPlate.png"))
        );
    }

    #[test]
    fn test_from_toml() {
        let config = SessionConfig::from_toml_str(
            r#"
            host = "10.0.0.7"
            access_code = "abcd1234"
            serial = "00M00A2B012345"
            interval_secs = 10
            image_root = "/srv/overlay"
            plate = "Bambu Cool Plate"

            [sinks]
            layer = "Layer Text"
            model = "Model Image"

            [vocabulary]
            minute = "minute"
            minutes = "minutes"
            "#,
        )
        .unwrap();

        assert_eq!(config.host, "10.0.0.7");
        assert_eq!(config.mqtt_port, 8883);
        assert_eq!(config.interval_secs, 10);
        assert_eq!(config.sinks.target(SinkField::Model), Some("Model Image"));
        assert_eq!(config.vocabulary.minutes, "minutes");
        assert_eq!(config.vocabulary.hour, "Stunde");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_rejects_bad_types() {
        let result = SessionConfig::from_toml_str("interval_secs = \"often\"");
        assert!(matches!(result, Err(BridgeError::ConfigInvalid(_))));
    }
}

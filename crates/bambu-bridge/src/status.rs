//! Printer status decoding.

use serde::Serialize;
use serde_json::Value;

use crate::asset::AssetFetchRequest;
use crate::config::SinkField;
use crate::error::{BridgeError, Result};
use crate::format::{format_duration, format_number, nozzle_label, parse_minutes, Vocabulary};
use crate::tray::{self, text_field, TrayAttributes};

/// Display-relevant values of one status report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Current print task identifier.
    pub job_id: String,
    /// Raw nozzle material code.
    pub nozzle_type: String,
    /// Nozzle diameter as reported (e.g. "0.4").
    pub nozzle_diameter: String,
    /// Nozzle temperature (°C).
    pub nozzle_temp: f64,
    /// Target nozzle temperature.
    pub nozzle_target: f64,
    /// Bed temperature (°C).
    pub bed_temp: f64,
    /// Target bed temperature.
    pub bed_target: f64,
    /// Chamber temperature (°C).
    pub chamber_temp: f64,
    /// Remaining time in minutes, `None` if unparsable.
    pub remaining_min: Option<i64>,
    /// Current layer number.
    pub layer_current: i64,
    /// Total layer count.
    pub layer_total: i64,
    /// Print progress (0-100).
    pub progress_percent: f64,
    /// Active filament tray.
    pub tray: TrayAttributes,
}

impl StatusSnapshot {
    /// Build a snapshot from the `print` node of a report.
    ///
    /// Missing fields take their defaults: zero for numbers, empty for text.
    pub fn from_print(print: &Value) -> Self {
        Self {
            job_id: text_field(print, "task_id").unwrap_or_default(),
            nozzle_type: text_field(print, "nozzle_type").unwrap_or_default(),
            nozzle_diameter: text_field(print, "nozzle_diameter").unwrap_or_default(),
            nozzle_temp: number(print, "nozzle_temper"),
            nozzle_target: number(print, "nozzle_target_temper"),
            bed_temp: number(print, "bed_temper"),
            bed_target: number(print, "bed_target_temper"),
            chamber_temp: number(print, "chamber_temper"),
            remaining_min: print.get("mc_remaining_time").map_or(Some(0), parse_minutes),
            layer_current: integer(print, "layer_num"),
            layer_total: integer(print, "total_layer_num"),
            progress_percent: number(print, "mc_percent"),
            tray: tray::resolve(print),
        }
    }

    /// Display text for a text field; `None` for image and color fields.
    pub fn text(&self, field: SinkField, vocab: &Vocabulary) -> Option<String> {
        let text = match field {
            SinkField::NozzleType => nozzle_label(&self.nozzle_diameter, &self.nozzle_type, vocab),
            SinkField::NozzleTemp => format!(
                "{}°C / {}°C",
                format_number(self.nozzle_temp),
                format_number(self.nozzle_target)
            ),
            SinkField::BedTemp => format!(
                "{}°C / {}°C",
                format_number(self.bed_temp),
                format_number(self.bed_target)
            ),
            SinkField::ChamberTemp => format!("{}°C", format_number(self.chamber_temp)),
            SinkField::RemainingTime => format_duration(self.remaining_min, vocab),
            SinkField::Layer => format!("{}  /  {}", self.layer_current, self.layer_total),
            SinkField::PercentFinish => format!("{}%", format_number(self.progress_percent)),
            SinkField::Filament => self.tray.tray_type.clone(),
            SinkField::FilamentColor | SinkField::Model | SinkField::Plate => return None,
        };
        Some(text)
    }
}

fn number(node: &Value, key: &str) -> f64 {
    node.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn integer(node: &Value, key: &str) -> i64 {
    node.get(key)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or(0)
}

/// Result of decoding one report.
#[derive(Debug, Clone)]
pub struct DecodedStatus {
    /// Values to publish.
    pub snapshot: StatusSnapshot,
    /// Model image to fetch, set once per job change.
    pub fetch: Option<AssetFetchRequest>,
}

/// Decodes status reports and tracks job changes.
#[derive(Debug, Default)]
pub struct StatusDecoder {
    last_job_id: String,
    fetch_enabled: bool,
}

impl StatusDecoder {
    /// Create a decoder. Fetch requests are only emitted when `fetch_enabled`.
    pub fn new(fetch_enabled: bool) -> Self {
        Self {
            last_job_id: String::new(),
            fetch_enabled,
        }
    }

    /// Job identifier of the last decoded report.
    pub fn last_job_id(&self) -> &str {
        &self.last_job_id
    }

    /// Decode a raw MQTT payload.
    pub fn decode(&mut self, payload: &[u8]) -> Result<DecodedStatus> {
        let document: Value = serde_json::from_slice(payload)
            .map_err(|e| BridgeError::MalformedPayload(e.to_string()))?;

        let print = document
            .get("print")
            .filter(|node| node.is_object())
            .ok_or_else(|| BridgeError::MalformedPayload("missing print object".into()))?;

        let snapshot = StatusSnapshot::from_print(print);

        let mut fetch = None;
        if snapshot.job_id != self.last_job_id {
            self.last_job_id = snapshot.job_id.clone();
            if self.fetch_enabled {
                fetch = AssetFetchRequest::from_print(print);
            }
        }

        Ok(DecodedStatus { snapshot, fetch })
    }
}

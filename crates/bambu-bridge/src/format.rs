//! Display formatting for decoded status values.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{BridgeError, Result};

/// Localized words used in display strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    /// Label for hardened steel nozzles.
    pub hardened_steel: String,
    /// Label for stainless steel nozzles.
    pub stainless_steel: String,
    /// Label for unknown nozzle materials.
    pub unspecified: String,
    /// "minute"
    pub minute: String,
    /// "minutes"
    pub minutes: String,
    /// "hour"
    pub hour: String,
    /// "hours"
    pub hours: String,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            hardened_steel: "gehärteter Stahl".into(),
            stainless_steel: "Edelstahl".into(),
            unspecified: "nicht definiert".into(),
            minute: "Minute".into(),
            minutes: "Minuten".into(),
            hour: "Stunde".into(),
            hours: "Stunden".into(),
        }
    }
}

/// Parse a remaining-time value in minutes.
///
/// Accepts integers, floats (floored) and numeric strings. Returns `None`
/// for anything else.
pub fn parse_minutes(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Format a duration as `"{H} {hours} {M} {minutes}"`.
///
/// The hour segment is dropped when zero. Missing or negative input renders
/// as zero minutes.
pub fn format_duration(minutes: Option<i64>, vocab: &Vocabulary) -> String {
    let total = match minutes {
        Some(m) if m >= 0 => m,
        _ => return format!("0 {}", vocab.minutes),
    };

    let hours = total / 60;
    let minutes = total % 60;

    let mut text = String::new();
    if hours > 0 {
        let word = if hours == 1 { &vocab.hour } else { &vocab.hours };
        text.push_str(&format!("{hours} {word} "));
    }
    let word = if minutes == 1 { &vocab.minute } else { &vocab.minutes };
    text.push_str(&format!("{minutes} {word}"));
    text
}

/// Nozzle material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NozzleMaterial {
    /// `hardened_steel`
    HardenedSteel,
    /// `stainless_steel`
    StainlessSteel,
    /// Anything else.
    Unspecified,
}

impl NozzleMaterial {
    /// Classify a raw nozzle type code.
    pub fn classify(code: &str) -> Self {
        match code {
            "hardened_steel" => Self::HardenedSteel,
            "stainless_steel" => Self::StainlessSteel,
            _ => Self::Unspecified,
        }
    }

    /// Localized label.
    pub fn label<'a>(&self, vocab: &'a Vocabulary) -> &'a str {
        match self {
            Self::HardenedSteel => &vocab.hardened_steel,
            Self::StainlessSteel => &vocab.stainless_steel,
            Self::Unspecified => &vocab.unspecified,
        }
    }
}

/// Nozzle description such as `"0.4 Edelstahl"`.
pub fn nozzle_label(diameter: &str, code: &str, vocab: &Vocabulary) -> String {
    format!("{} {}", diameter, NozzleMaterial::classify(code).label(vocab))
}

/// Reorder a tray color into the channel order the color sink expects.
///
/// `RRGGBBAA` becomes `RRBBGGAA`; six-digit `RRGGBB` becomes `RRBBGG`.
pub fn reorder_color(hex: &str) -> Result<u32> {
    if !(hex.len() == 6 || hex.len() == 8) || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(BridgeError::InvalidColor(hex.to_string()));
    }

    let reordered = format!("{}{}{}{}", &hex[0..2], &hex[4..6], &hex[2..4], &hex[6..]);
    u32::from_str_radix(&reordered, 16).map_err(|_| BridgeError::InvalidColor(hex.to_string()))
}

/// Render a number without a trailing `.0` for integral values.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

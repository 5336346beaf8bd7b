//! Active filament tray resolution.

use serde::Serialize;
use serde_json::Value;

/// Tray index the printer reports when feeding from the external spool.
pub const EXTERNAL_SPOOL_TRAY: i64 = 254;

const DEFAULT_COLOR: &str = "FFFFFF";

/// Filament attributes of the tray currently in use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrayAttributes {
    /// Filament type (e.g. "PLA").
    pub tray_type: String,
    /// Filament color as hex (`RRGGBBAA`).
    pub tray_color: String,
}

impl Default for TrayAttributes {
    fn default() -> Self {
        Self {
            tray_type: String::new(),
            tray_color: DEFAULT_COLOR.into(),
        }
    }
}

impl TrayAttributes {
    fn from_node(node: &Value) -> Self {
        let defaults = Self::default();
        Self {
            tray_type: text_field(node, "tray_type").unwrap_or(defaults.tray_type),
            tray_color: text_field(node, "tray_color").unwrap_or(defaults.tray_color),
        }
    }
}

/// Read a field that may be encoded either as a string or a number.
pub(crate) fn text_field(node: &Value, key: &str) -> Option<String> {
    match node.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Resolve the active tray from a `print` status node.
///
/// The external spool takes precedence over the AMS. Only the first AMS unit
/// is searched.
pub fn resolve(print: &Value) -> TrayAttributes {
    let Some(ams) = print.get("ams") else {
        return TrayAttributes::default();
    };

    let Some(tray_now) = text_field(ams, "tray_now") else {
        return TrayAttributes::default();
    };
    let index: i64 = match tray_now.trim().parse() {
        Ok(index) if index >= 0 => index,
        _ => return TrayAttributes::default(),
    };

    if index == EXTERNAL_SPOOL_TRAY {
        return print
            .get("vt_tray")
            .map(TrayAttributes::from_node)
            .unwrap_or_default();
    }

    let first_unit_trays = ams
        .get("ams")
        .and_then(Value::as_array)
        .and_then(|units| units.first())
        .and_then(|unit| unit.get("tray"))
        .and_then(Value::as_array);

    let Some(trays) = first_unit_trays else {
        return TrayAttributes::default();
    };

    trays
        .iter()
        .find(|tray| text_field(tray, "id").as_deref() == Some(tray_now.as_str()))
        .map(TrayAttributes::from_node)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ams_print(tray_now: &str) -> Value {
        json!({
            "ams": {
                "tray_now": tray_now,
                "ams": [{
                    "id": "0",
                    "tray": [
                        { "id": "0", "tray_type": "PLA", "tray_color": "FF0000FF" },
                        { "id": "1", "tray_type": "PETG", "tray_color": "00FF00FF" }
                    ]
                }]
            },
            "vt_tray": { "id": "254", "tray_type": "TPU", "tray_color": "0000FFFF" }
        })
    }

    #[test]
    fn test_resolve_ams_tray() {
        let tray = resolve(&ams_print("1"));
        assert_eq!(tray.tray_type, "PETG");
        assert_eq!(tray.tray_color, "00FF00FF");
    }

    #[test]
    fn test_external_spool_short_circuits_ams() {
        let tray = resolve(&ams_print("254"));
        assert_eq!(tray.tray_type, "TPU");
        assert_eq!(tray.tray_color, "0000FFFF");
    }

    #[test]
    fn test_external_spool_without_node() {
        let print = json!({ "ams": { "tray_now": "254", "ams": [] } });
        assert_eq!(resolve(&print), TrayAttributes::default());
    }

    #[test]
    fn test_negative_index_yields_default() {
        assert_eq!(resolve(&ams_print("-1")), TrayAttributes::default());
        assert_eq!(resolve(&ams_print("-7")), TrayAttributes::default());
    }

    #[test]
    fn test_unknown_index_yields_default() {
        assert_eq!(resolve(&ams_print("3")), TrayAttributes::default());
        assert_eq!(resolve(&ams_print("255")), TrayAttributes::default());
    }

    #[test]
    fn test_missing_or_unparsable_inputs() {
        assert_eq!(resolve(&json!({})), TrayAttributes::default());
        assert_eq!(resolve(&ams_print("")), TrayAttributes::default());
        assert_eq!(
            resolve(&json!({ "ams": { "tray_now": "0" } })),
            TrayAttributes::default()
        );
    }

    #[test]
    fn test_numeric_tray_index() {
        let mut print = ams_print("0");
        print["ams"]["tray_now"] = json!(0);
        assert_eq!(resolve(&print).tray_type, "PLA");
    }

    #[test]
    fn test_only_first_unit_is_searched() {
        let print = json!({
            "ams": {
                "tray_now": "2",
                "ams": [
                    { "id": "0", "tray": [{ "id": "0", "tray_type": "PLA" }] },
                    { "id": "1", "tray": [{ "id": "2", "tray_type": "ABS" }] }
                ]
            }
        });
        assert_eq!(resolve(&print), TrayAttributes::default());
    }

    #[test]
    fn test_missing_fields_in_found_tray() {
        let print = json!({
            "ams": { "tray_now": "0", "ams": [{ "tray": [{ "id": "0" }] }] }
        });
        assert_eq!(resolve(&print), TrayAttributes::default());
    }
}

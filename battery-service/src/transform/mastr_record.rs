//! Registry record -> `BatteryUnit`.
//!
//! Field rules:
//! - `EinheitMastrNummer` -> `unit_id`: required, non-empty.
//! - `EinheitName`, `AnlagenbetreiberName`, `NetzbetreiberNamen`: default "".
//! - `BetriebsStatusName`, else `BetriebsStatusId` -> `status`: required.
//! - `Bruttoleistung`, `NutzbareSpeicherkapazitaet`: required, finite, >= 0.
//!   JSON numbers and numeric strings (decimal comma and thousands
//!   separators allowed, see `value_to_f64`) both parse.
//! - `Batterietechnologie`: code table lookup, free text kept, else "Unbekannt".
//! - `Bundesland`: known state name, else `None`.
//! - `Breitengrad` / `Laengengrad`: `None` when missing or out of range.
//! - `InbetriebnahmeDatum`, `GeplantesInbetriebnahmeDatum`: `/Date(ms)/` or
//!   `YYYY-MM-DD...`, else `None`.

use battery_client::domain::{
    battery_unit::{iso_date, valid_latitude, valid_longitude},
    BatteryUnit, Bundesland, UnitStatus, UNKNOWN_LABEL,
};
use serde_json::{Map, Value};
use time::{Date, OffsetDateTime};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("missing required field '{0}'")]
    Missing(&'static str),
    #[error("field '{field}' has invalid value {value}")]
    Invalid { field: &'static str, value: String },
}

/// Battery chemistry codes used by the registry's `Batterietechnologie` field.
pub fn battery_technology_name(code: i64) -> Option<&'static str> {
    match code {
        727 => Some("Lithium-Batterie"),
        728 => Some("Blei-Batterie"),
        729 => Some("Redox-Flow-Batterie"),
        730 => Some("Hochtemperaturbatterie"),
        731 => Some("Nickel-Cadmium- / Nickel-Metallhydridbatterie"),
        732 => Some("Sonstige Batterie"),
        _ => None,
    }
}

/// Technology names that count as battery chemistries.
pub fn is_battery_technology(name: &str) -> bool {
    (727..=732)
        .filter_map(battery_technology_name)
        .any(|known| known == name)
}

pub fn parse_record(raw: &Value) -> Result<BatteryUnit, RecordError> {
    let obj = raw.as_object().ok_or(RecordError::NotAnObject)?;

    let unit_id = text(obj, "EinheitMastrNummer").ok_or(RecordError::Missing("EinheitMastrNummer"))?;

    Ok(BatteryUnit {
        unit_id,
        name: text(obj, "EinheitName").unwrap_or_default(),
        owner: text(obj, "AnlagenbetreiberName").unwrap_or_default(),
        status: status(obj)?,
        power_kw: required_quantity(obj, "Bruttoleistung")?,
        capacity_kwh: required_quantity(obj, "NutzbareSpeicherkapazitaet")?,
        technology: technology(obj),
        bundesland: text(obj, "Bundesland").and_then(|s| Bundesland::from_name(&s)),
        latitude: number(obj, "Breitengrad").filter(|v| valid_latitude(*v)),
        longitude: number(obj, "Laengengrad").filter(|v| valid_longitude(*v)),
        commissioning_date: obj.get("InbetriebnahmeDatum").and_then(parse_date),
        planned_commissioning_date: obj.get("GeplantesInbetriebnahmeDatum").and_then(parse_date),
        network_operator: text(obj, "NetzbetreiberNamen").unwrap_or_default(),
        municipality: text(obj, "Gemeinde"),
    })
}

/// Trimmed, non-empty string value. Numbers are rendered as text.
fn text(obj: &Map<String, Value>, field: &str) -> Option<String> {
    match obj.get(field)? {
        Value::String(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(obj: &Map<String, Value>, field: &str) -> Option<f64> {
    obj.get(field).and_then(value_to_f64)
}

/// Numbers, or numeric strings in English or German notation.
///
/// With both separators present the later one is the decimal mark
/// (`"1.234,5"` and `"1,234.5"` are 1234.5). A lone `,` is a decimal comma.
/// A lone `.` is always a decimal point, so a grouped integer like `"12.000"`
/// reads as 12; the registry sends quantities as JSON numbers, which this
/// ambiguity never touches.
pub fn value_to_f64(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => parse_localized(s.trim())?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn parse_localized(s: &str) -> Option<f64> {
    let normalized = match (s.rfind(','), s.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => s.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => s.replace(',', ""),
        (Some(_), None) => s.replace(',', "."),
        _ => s.to_string(),
    };
    normalized.parse().ok()
}

fn required_quantity(obj: &Map<String, Value>, field: &'static str) -> Result<f64, RecordError> {
    let raw = obj
        .get(field)
        .filter(|v| !v.is_null())
        .ok_or(RecordError::Missing(field))?;
    match value_to_f64(raw) {
        Some(v) if v >= 0.0 => Ok(v),
        _ => Err(RecordError::Invalid {
            field,
            value: raw.to_string(),
        }),
    }
}

fn status(obj: &Map<String, Value>) -> Result<UnitStatus, RecordError> {
    if let Some(s) = text(obj, "BetriebsStatusName").and_then(|n| UnitStatus::from_registry_name(&n)) {
        return Ok(s);
    }
    if let Some(s) = obj
        .get("BetriebsStatusId")
        .and_then(value_to_f64)
        .and_then(|c| UnitStatus::from_registry_code(c as i64))
    {
        return Ok(s);
    }

    match obj.get("BetriebsStatusName").or_else(|| obj.get("BetriebsStatusId")) {
        Some(v) if !v.is_null() => Err(RecordError::Invalid {
            field: "BetriebsStatusName",
            value: v.to_string(),
        }),
        _ => Err(RecordError::Missing("BetriebsStatusName")),
    }
}

fn technology(obj: &Map<String, Value>) -> String {
    match obj.get("Batterietechnologie") {
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(battery_technology_name)
            .unwrap_or(UNKNOWN_LABEL)
            .to_string(),
        Some(Value::String(s)) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(code) => battery_technology_name(code).unwrap_or(UNKNOWN_LABEL).to_string(),
                Err(_) if !s.is_empty() => s.to_string(),
                Err(_) => UNKNOWN_LABEL.to_string(),
            }
        }
        _ => UNKNOWN_LABEL.to_string(),
    }
}

/// Accepts the registry's `/Date(1672531200000)/` form or an ISO date prefix.
pub fn parse_date(v: &Value) -> Option<Date> {
    let s = v.as_str()?.trim();

    if let Some(inner) = s.strip_prefix("/Date(").and_then(|r| r.strip_suffix(")/")) {
        if inner.is_empty() {
            return None;
        }
        // Offsets like "/Date(1672531200000+0100)/" carry the UTC instant in the millis part.
        let millis_end = inner
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '+' || *c == '-')
            .map_or(inner.len(), |(i, _)| i);
        let millis: i64 = inner[..millis_end].parse().ok()?;
        let ts = OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()?;
        return Some(ts.date());
    }

    s.get(..10).and_then(iso_date::parse)
}

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

pub const DEVICE_IDENTIFIER_FIELD: &str = "deviceIdentifier";
/// Field name used by the first generation of Android clients.
pub const LEGACY_DEVICE_FIELD: &str = "deviceMac";
pub const TEMPERATURE_FIELD: &str = "temperature";
pub const HUMIDITY_FIELD: &str = "humidity";
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Device timestamps outside these years are treated as absent.
const MIN_TIMESTAMP_YEAR: i32 = 0;
const MAX_TIMESTAMP_YEAR: i32 = 9999;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("request body is not valid JSON")]
    MalformedBody,

    #[error("request body must be a JSON object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

/// Typed view of an inbound reading. Optional fields that were present but
/// unusable are already folded to `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedReading {
    pub device_identifier: String,
    pub temperature: f64,
    pub humidity: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Decodes raw request bytes. An empty body is read as an empty object so
/// that it is reported as missing fields.
pub fn parse_body(bytes: &[u8]) -> Result<Value, ValidationError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(bytes).map_err(|_| ValidationError::MalformedBody)
}

/// Checks an untyped request body and extracts the reading fields.
///
/// `deviceIdentifier` (or the legacy `deviceMac`) must be a non-empty string
/// and `temperature` must be a JSON number; strings are never coerced. A
/// non-numeric `humidity` and an unparseable `timestamp` are treated as absent.
pub fn validate(body: &Value) -> Result<ValidatedReading, ValidationError> {
    let fields = body.as_object().ok_or(ValidationError::NotAnObject)?;

    let device_identifier = device_identifier(fields)?;

    let temperature = match fields.get(TEMPERATURE_FIELD) {
        None | Some(Value::Null) => {
            return Err(ValidationError::MissingField(TEMPERATURE_FIELD));
        }
        Some(value) => value.as_f64().ok_or(ValidationError::InvalidField {
            field: TEMPERATURE_FIELD,
            reason: "must be a number",
        })?,
    };

    let humidity = fields.get(HUMIDITY_FIELD).and_then(Value::as_f64);
    let timestamp = fields.get(TIMESTAMP_FIELD).and_then(parse_timestamp);

    Ok(ValidatedReading {
        device_identifier,
        temperature,
        humidity,
        timestamp,
    })
}

fn device_identifier(fields: &Map<String, Value>) -> Result<String, ValidationError> {
    let value = fields
        .get(DEVICE_IDENTIFIER_FIELD)
        .filter(|v| !v.is_null())
        .or_else(|| fields.get(LEGACY_DEVICE_FIELD).filter(|v| !v.is_null()));

    match value {
        None => Err(ValidationError::MissingField(DEVICE_IDENTIFIER_FIELD)),
        Some(Value::String(id)) if id.trim().is_empty() => {
            Err(ValidationError::InvalidField {
                field: DEVICE_IDENTIFIER_FIELD,
                reason: "must not be empty",
            })
        }
        Some(Value::String(id)) if id.contains('\0') => Err(ValidationError::InvalidField {
            field: DEVICE_IDENTIFIER_FIELD,
            reason: "must not contain NUL characters",
        }),
        Some(Value::String(id)) => Ok(id.clone()),
        Some(_) => Err(ValidationError::InvalidField {
            field: DEVICE_IDENTIFIER_FIELD,
            reason: "must be a string",
        }),
    }
}

/// Accepts RFC 3339 strings, zone-less ISO date-times (read as UTC) and
/// integer epoch milliseconds, within years 0 to 9999.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    parse_any_timestamp(value).filter(|ts| {
        (MIN_TIMESTAMP_YEAR..=MAX_TIMESTAMP_YEAR).contains(&ts.year())
    })
}

fn parse_any_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| naive.and_utc())
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_minimal_reading() {
        let reading =
            validate(&json!({"deviceIdentifier": "AA:BB", "temperature": 4.2})).unwrap();

        assert_eq!(reading.device_identifier, "AA:BB");
        assert_eq!(reading.temperature, 4.2);
        assert_eq!(reading.humidity, None);
        assert_eq!(reading.timestamp, None);
    }

    #[test]
    fn test_valid_full_reading() {
        let reading = validate(&json!({
            "deviceIdentifier": "AA:BB",
            "temperature": 4.2,
            "humidity": 55,
            "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(reading.humidity, Some(55.0));
        assert_eq!(
            reading.timestamp,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_out_of_range_temperature_is_accepted() {
        let reading =
            validate(&json!({"deviceIdentifier": "AA:BB", "temperature": -273.0})).unwrap();
        assert_eq!(reading.temperature, -273.0);
    }

    #[test]
    fn test_missing_device_identifier() {
        assert_eq!(
            validate(&json!({"temperature": 4.2})),
            Err(ValidationError::MissingField(DEVICE_IDENTIFIER_FIELD))
        );
    }

    #[test]
    fn test_empty_device_identifier() {
        let err = validate(&json!({"deviceIdentifier": "", "temperature": 4.2})).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidField { field: DEVICE_IDENTIFIER_FIELD, .. }
        ));
    }

    #[test]
    fn test_whitespace_device_identifier() {
        let err = validate(&json!({"deviceIdentifier": "   ", "temperature": 4.2})).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidField { reason: "must not be empty", .. }
        ));
    }

    #[test]
    fn test_nul_in_device_identifier() {
        let err = validate(&json!({"deviceIdentifier": "AA\0BB", "temperature": 4.2}))
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidField {
                field: DEVICE_IDENTIFIER_FIELD,
                reason: "must not contain NUL characters",
            }
        );
    }

    #[test]
    fn test_non_string_device_identifier() {
        assert!(validate(&json!({"deviceIdentifier": 42, "temperature": 4.2})).is_err());
    }

    #[test]
    fn test_legacy_device_field() {
        let reading = validate(&json!({"deviceMac": "11:22:33", "temperature": 1.0})).unwrap();
        assert_eq!(reading.device_identifier, "11:22:33");
    }

    #[test]
    fn test_string_temperature_is_not_coerced() {
        let err =
            validate(&json!({"deviceIdentifier": "AA:BB", "temperature": "4.2"})).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidField {
                field: TEMPERATURE_FIELD,
                reason: "must be a number",
            }
        );
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn test_missing_temperature() {
        assert_eq!(
            validate(&json!({"deviceIdentifier": "AA:BB", "temperature": null})),
            Err(ValidationError::MissingField(TEMPERATURE_FIELD))
        );
    }

    #[test]
    fn test_non_numeric_humidity_is_absent() {
        let reading = validate(&json!({
            "deviceIdentifier": "AA:BB",
            "temperature": 4.2,
            "humidity": "wet"
        }))
        .unwrap();
        assert_eq!(reading.humidity, None);
    }

    #[test]
    fn test_malformed_timestamp_is_absent() {
        let reading = validate(&json!({
            "deviceIdentifier": "AA:BB",
            "temperature": 4.2,
            "timestamp": "yesterday-ish"
        }))
        .unwrap();
        assert_eq!(reading.timestamp, None);
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 12, 30, 0).unwrap();

        assert_eq!(parse_timestamp(&json!("2024-03-05T14:30:00+02:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-03-05T12:30:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-03-05 12:30:00.000")), Some(expected));
        assert_eq!(
            parse_timestamp(&json!(expected.timestamp_millis())),
            Some(expected)
        );
        assert_eq!(parse_timestamp(&json!(true)), None);
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(b"").unwrap(), json!({}));
        assert_eq!(parse_body(b"{\"a\": 1}").unwrap(), json!({"a": 1}));
        assert_eq!(parse_body(b"{not json"), Err(ValidationError::MalformedBody));
    }

    #[test]
    fn test_unrepresentable_timestamps_are_absent() {
        // Far before any year a store can hold.
        assert_eq!(parse_timestamp(&json!(-1_000_000_000_000_000_i64)), None);
        assert_eq!(parse_timestamp(&json!(i64::MAX)), None);
        assert_eq!(parse_timestamp(&json!("+10000-01-01T00:00:00")), None);

        let reading = validate(&json!({
            "deviceIdentifier": "AA:BB",
            "temperature": 4.2,
            "timestamp": -1_000_000_000_000_000_i64
        }))
        .unwrap();
        assert_eq!(reading.timestamp, None);

        let edge = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(parse_timestamp(&json!(edge.timestamp_millis())), Some(edge));
    }

    #[test]
    fn test_body_must_be_object() {
        assert_eq!(validate(&json!([1, 2])), Err(ValidationError::NotAnObject));
        assert_eq!(validate(&Value::Null), Err(ValidationError::NotAnObject));
    }
}

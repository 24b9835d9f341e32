//! Per-record validation against an [EntitySchema].
//!
//! Every field is checked before deciding pass/fail so a rejection carries
//! the full list of problems with the row, not only the first one found.

use chrono::NaiveDate;

use crate::record::{FieldError, RawRecord, Rejection, ValidatedRecord, Value};
use crate::schema::{Constraint, EntitySchema, FieldDefinition, FieldType};

/// Check one raw row against its schema.
///
/// Strings are trimmed and blank values treated as absent. Columns present in
/// the row but unknown to the schema are ignored. The output field order
/// always follows the schema, never the CSV column order.
pub fn validate(raw: RawRecord, schema: &EntitySchema) -> Result<ValidatedRecord, Rejection> {
    let mut errors = Vec::new();
    let mut values = Vec::with_capacity(schema.fields.len());

    for field in &schema.fields {
        let present = raw
            .get(field.name)
            .map(str::trim)
            .filter(|s| !s.is_empty());
        match present {
            None => {
                if field.required {
                    errors.push(FieldError::new(field.name, "required_missing"));
                }
                values.push((
                    field.name,
                    field.default.clone().unwrap_or(Value::Null),
                ));
            }
            Some(s) => match coerce(s, field) {
                Ok(value) => values.push((field.name, value)),
                Err(reason) => {
                    errors.push(FieldError::new(field.name, reason));
                    values.push((field.name, Value::Null));
                }
            },
        }
    }

    if !errors.is_empty() {
        return Err(Rejection::new(schema.filename, raw, errors));
    }

    let record = ValidatedRecord::new(values);
    let rule_errors: Vec<FieldError> = schema
        .record_rules
        .iter()
        .filter(|rule| !(rule.check)(&record))
        .map(|rule| FieldError::new("<record>", rule.message))
        .collect();
    if !rule_errors.is_empty() {
        return Err(Rejection::new(schema.filename, raw, rule_errors));
    }

    Ok(record)
}

fn coerce(s: &str, field: &FieldDefinition) -> Result<Value, String> {
    let value = match field.field_type {
        FieldType::Text => Value::Text(s.to_owned()),
        FieldType::Integer => Value::Integer(
            s.parse::<i64>()
                .map_err(|_| format!("'{s}' is not an integer"))?,
        ),
        FieldType::Float => Value::Float(
            s.parse::<f64>()
                .map_err(|_| format!("'{s}' is not a number"))?,
        ),
        FieldType::Date => Value::Date(
            NaiveDate::parse_from_str(s, "%Y%m%d")
                .map_err(|_| format!("'{s}' is not a valid date; YYYYMMDD format is expected"))?,
        ),
        FieldType::Time => Value::Time(parse_time(s)?),
    };
    check_constraints(&value, field).map(|_| value)
}

fn check_constraints(value: &Value, field: &FieldDefinition) -> Result<(), String> {
    for constraint in &field.constraints {
        match constraint {
            Constraint::Range(min, max) => {
                let n = value
                    .as_float()
                    .ok_or_else(|| "range constraint on a non-numeric value".to_owned())?;
                if n < *min || n > *max {
                    return Err(format!("{n} is outside [{min}, {max}]"));
                }
            }
            Constraint::OneOf(allowed) => {
                let code = value
                    .as_integer()
                    .ok_or_else(|| "enum constraint on a non-integer value".to_owned())?;
                if !allowed.contains(&code) {
                    return Err(format!("{code} is not one of {allowed:?}"));
                }
            }
            Constraint::Pattern(re) => {
                let text = value
                    .as_text()
                    .ok_or_else(|| "pattern constraint on a non-text value".to_owned())?;
                if !re.is_match(text) {
                    return Err(format!("'{text}' does not match {}", re.as_str()));
                }
            }
        }
    }
    Ok(())
}

/// Parses `H:MM:SS` or `HH:MM:SS` into seconds since midnight. Hours may
/// exceed 23 for trips that run past midnight
fn parse_time(s: &str) -> Result<u32, String> {
    let invalid = || format!("'{s}' is not a valid time; H:MM:SS format is expected");
    let len = s.len();
    // The slices below are byte offsets; anything non-ASCII is malformed
    // anyway and must reject, never panic on a char boundary
    if !s.is_ascii() || !(7..=8).contains(&len) {
        return Err(invalid());
    }
    let sec = &s[len - 2..];
    let min = &s[len - 5..len - 3];
    let hour = &s[..len - 6];
    if &s[len - 3..len - 2] != ":" || &s[len - 6..len - 5] != ":" {
        return Err(invalid());
    }
    parse_time_impl(hour, min, sec).map_err(|_| invalid())
}

fn parse_time_impl(h: &str, m: &str, s: &str) -> Result<u32, std::num::ParseIntError> {
    let hours: u32 = h.parse()?;
    let minutes: u32 = m.parse()?;
    let seconds: u32 = s.parse()?;
    Ok(hours * 3600 + minutes * 60 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Registry;

    fn raw(pairs: &[(&str, &str)]) -> RawRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn missing_required_field_rejects() {
        let registry = Registry::gtfs();
        let schema = registry.lookup("stops.txt").unwrap();
        let rejection = validate(raw(&[("stop_lat", "40.0")]), schema).unwrap_err();
        assert_eq!(rejection.filename, "stops.txt");
        assert!(rejection
            .errors
            .iter()
            .any(|e| e.field == "stop_id" && e.reason == "required_missing"));
    }

    #[test]
    fn latitude_bounds_are_inclusive() {
        let registry = Registry::gtfs();
        let schema = registry.lookup("stops.txt").unwrap();
        for lat in ["-90", "90", "40.7128"] {
            let record = validate(raw(&[("stop_id", "s1"), ("stop_lat", lat)]), schema);
            assert!(record.is_ok(), "latitude {lat} should be accepted");
        }
        for lat in ["-90.001", "90.001", "999"] {
            let rejection =
                validate(raw(&[("stop_id", "s1"), ("stop_lat", lat)]), schema).unwrap_err();
            assert_eq!(rejection.errors.len(), 1);
            assert_eq!(rejection.errors[0].field, "stop_lat");
        }
    }

    #[test]
    fn all_errors_accumulate() {
        let registry = Registry::gtfs();
        let schema = registry.lookup("stops.txt").unwrap();
        let rejection = validate(
            raw(&[("stop_lat", "999"), ("location_type", "42")]),
            schema,
        )
        .unwrap_err();
        let fields: Vec<&str> = rejection.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["stop_id", "stop_lat", "location_type"]);
    }

    #[test]
    fn unknown_columns_are_ignored() {
        let registry = Registry::gtfs();
        let schema = registry.lookup("agency.txt").unwrap();
        let record = validate(
            raw(&[
                ("agency_id", "a1"),
                ("agency_name", "Metro"),
                ("agency_url", "https://metro.example"),
                ("agency_timezone", "America/New_York"),
                ("agency_branding", "whatever"),
            ]),
            schema,
        )
        .unwrap();
        assert!(record.get("agency_branding").is_none());
    }

    #[test]
    fn output_follows_schema_order_not_csv_order() {
        let registry = Registry::gtfs();
        let schema = registry.lookup("calendar_dates.txt").unwrap();
        let record = validate(
            raw(&[
                ("exception_type", "1"),
                ("date", "20260828"),
                ("service_id", "svc"),
            ]),
            schema,
        )
        .unwrap();
        let names: Vec<&str> = record.values().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["service_id", "date", "exception_type"]);
        assert_eq!(
            record.get("date"),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2026, 8, 28).unwrap()))
        );
    }

    #[test]
    fn defaults_fill_absent_optionals() {
        let registry = Registry::gtfs();
        let schema = registry.lookup("stops.txt").unwrap();
        let record = validate(raw(&[("stop_id", "s1")]), schema).unwrap();
        assert_eq!(record.get("location_type"), Some(&Value::Integer(0)));
        assert_eq!(record.get("stop_name"), Some(&Value::Null));
    }

    #[test]
    fn blank_values_count_as_absent() {
        let registry = Registry::gtfs();
        let schema = registry.lookup("stops.txt").unwrap();
        let rejection = validate(raw(&[("stop_id", "   ")]), schema).unwrap_err();
        assert_eq!(rejection.errors[0].reason, "required_missing");
    }

    #[test]
    fn transfer_rule_fires_after_field_checks() {
        let registry = Registry::gtfs();
        let schema = registry.lookup("transfers.txt").unwrap();
        let rejection = validate(
            raw(&[
                ("from_stop_id", "a"),
                ("to_stop_id", "b"),
                ("transfer_type", "2"),
            ]),
            schema,
        )
        .unwrap_err();
        assert_eq!(rejection.errors[0].field, "<record>");

        let ok = validate(
            raw(&[
                ("from_stop_id", "a"),
                ("to_stop_id", "b"),
                ("transfer_type", "2"),
                ("min_transfer_time", "120"),
            ]),
            schema,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn times_past_midnight_parse() {
        let registry = Registry::gtfs();
        let schema = registry.lookup("stop_times.txt").unwrap();
        let record = validate(
            raw(&[
                ("trip_id", "t1"),
                ("stop_id", "s1"),
                ("stop_sequence", "1"),
                ("arrival_time", "25:03:00"),
                ("departure_time", "8:00:30"),
            ]),
            schema,
        )
        .unwrap();
        assert_eq!(record.get("arrival_time"), Some(&Value::Time(90180)));
        assert_eq!(record.get("departure_time"), Some(&Value::Time(28830)));

        let rejection = validate(
            raw(&[
                ("trip_id", "t1"),
                ("stop_id", "s1"),
                ("stop_sequence", "1"),
                ("arrival_time", "8.00.30"),
            ]),
            schema,
        )
        .unwrap_err();
        assert_eq!(rejection.errors[0].field, "arrival_time");
    }

    #[test]
    fn multibyte_time_value_rejects_instead_of_panicking() {
        let registry = Registry::gtfs();
        let schema = registry.lookup("stop_times.txt").unwrap();
        // Multibyte garbage whose byte length still looks like H:MM:SS
        for time in ["8:00:é0", "é8:00:00", "25:0é:00"] {
            let rejection = validate(
                raw(&[
                    ("trip_id", "t1"),
                    ("stop_id", "s1"),
                    ("stop_sequence", "1"),
                    ("arrival_time", time),
                ]),
                schema,
            )
            .unwrap_err();
            assert_eq!(rejection.errors[0].field, "arrival_time", "time: {time}");
            assert!(rejection.errors[0].reason.contains("not a valid time"));
        }
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Decoded sensor readings and the composite records built from them.
//!
//! A [`RawReading`] is one JSON object emitted by the radio decoder. Multi-part
//! sensors spread a single measurement over several readings, so readings that
//! share an identity are folded into a [`SensorRecord`] with [`merge_fields`].

use crate::source::DecodeError;
use serde_json::{Map, Value};

/// Field name -> JSON value, as decoded from one line.
pub type Fields = Map<String, Value>;

/// Field carrying the sensor model discriminator.
pub const MODEL_FIELD: &str = "model";

/// One decoded reading. Always carries a string `model` field.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    fields: Fields,
}

impl RawReading {
    /// Sensor model discriminator (e.g. `"LaCrosse-TX141Bv3"`).
    pub fn model(&self) -> &str {
        self.fields
            .get(MODEL_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// All decoded fields, including `model`.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Consume the reading, returning its fields.
    pub fn into_fields(self) -> Fields {
        self.fields
    }

    /// Cache key correlating partial readings of one physical sensor.
    ///
    /// `"<model>/<id>"` when `identity_field` holds a scalar, `"<model>"` otherwise.
    pub fn identity(&self, identity_field: &str) -> String {
        match self.fields.get(identity_field).and_then(scalar_to_string) {
            Some(id) => format!("{}/{}", self.model(), id),
            None => self.model().to_string(),
        }
    }
}

impl TryFrom<Value> for RawReading {
    type Error = DecodeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(fields) = value else {
            return Err(DecodeError::NotAnObject);
        };
        match fields.get(MODEL_FIELD) {
            Some(Value::String(model)) if !model.is_empty() => Ok(Self { fields }),
            _ => Err(DecodeError::MissingModel),
        }
    }
}

/// Composite record accumulated for one sensor identity.
///
/// Fields are only ever added or overwritten, never removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorRecord {
    fields: Fields,
}

impl SensorRecord {
    /// Seed a record from a first reading (null fields are dropped).
    pub fn from_reading(reading: &RawReading) -> Self {
        let mut record = Self::default();
        record.absorb(reading);
        record
    }

    /// Merge a later reading into this record.
    pub fn absorb(&mut self, reading: &RawReading) {
        merge_fields(&mut self.fields, reading.fields());
    }

    /// Current composite fields.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Look up a single field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Completeness predicate: every required field is present and non-null.
    pub fn is_complete<S: AsRef<str>>(&self, required: &[S]) -> bool {
        required
            .iter()
            .all(|name| matches!(self.fields.get(name.as_ref()), Some(v) if !v.is_null()))
    }

    /// Names of required fields still missing from the record.
    pub fn missing<'a, S: AsRef<str>>(&self, required: &'a [S]) -> Vec<&'a str> {
        required
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| matches!(self.fields.get(*name), None | Some(Value::Null)))
            .collect()
    }
}

/// Shallow field-wise merge of `update` into `target`.
///
/// Every non-null field of `update` overwrites the same key in `target`. Null
/// fields in `update` are ignored, so they never erase a previously cached
/// value, and keys absent from `update` are left untouched.
pub fn merge_fields(target: &mut Fields, update: &Fields) {
    for (key, value) in update {
        if value.is_null() {
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
}

/// Numeric view of a field for delta comparisons.
///
/// Missing, null and non-numeric values read as `0.0`; booleans as `0.0`/`1.0`.
pub fn numeric_field(fields: &Fields, name: &str) -> f64 {
    match fields.get(name) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        _ => 0.0,
    }
}

/// Render a scalar JSON value as an identity component.
fn scalar_to_string(val: &Value) -> Option<String> {
    match val {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        // Null, empty strings, arrays and objects do not identify a sensor
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reading(value: Value) -> RawReading {
        RawReading::try_from(value).expect("valid reading")
    }

    #[test]
    fn test_reading_requires_object_with_model() {
        assert!(matches!(
            RawReading::try_from(json!([1, 2])),
            Err(DecodeError::NotAnObject)
        ));
        assert!(matches!(
            RawReading::try_from(json!({"id": 3})),
            Err(DecodeError::MissingModel)
        ));
        assert!(matches!(
            RawReading::try_from(json!({"model": 7})),
            Err(DecodeError::MissingModel)
        ));
        assert_eq!(reading(json!({"model": "Acurite-Tower"})).model(), "Acurite-Tower");
    }

    #[test]
    fn test_identity_with_and_without_id() {
        let with_id = reading(json!({"model": "LaCrosse-TX141Bv3", "id": 221}));
        assert_eq!(with_id.identity("id"), "LaCrosse-TX141Bv3/221");

        let string_id = reading(json!({"model": "Acurite-Tower", "id": "A"}));
        assert_eq!(string_id.identity("id"), "Acurite-Tower/A");

        let no_id = reading(json!({"model": "Oregon-THGR122N", "id": null}));
        assert_eq!(no_id.identity("id"), "Oregon-THGR122N");

        let custom = reading(json!({"model": "Fineoffset-WH24", "channel": 2}));
        assert_eq!(custom.identity("channel"), "Fineoffset-WH24/2");
    }

    #[test]
    fn test_merge_overwrites_present_fields_only() {
        let mut record = SensorRecord::from_reading(&reading(json!({
            "model": "m", "id": 1, "temperature_C": 20.5, "humidity": 40
        })));

        record.absorb(&reading(json!({
            "model": "m", "id": 1, "wind_avg_km_h": 3.2, "humidity": null
        })));
        record.absorb(&reading(json!({"model": "m", "id": 1, "temperature_C": 21.0})));

        assert_eq!(record.get("temperature_C"), Some(&json!(21.0)));
        assert_eq!(record.get("humidity"), Some(&json!(40)));
        assert_eq!(record.get("wind_avg_km_h"), Some(&json!(3.2)));
        assert_eq!(record.fields().len(), 5);
    }

    #[test]
    fn test_seed_drops_null_fields() {
        let record = SensorRecord::from_reading(&reading(json!({
            "model": "m", "humidity": null
        })));
        assert!(record.get("humidity").is_none());
    }

    #[test]
    fn test_completeness_predicate() {
        let record = SensorRecord::from_reading(&reading(json!({
            "model": "m", "temperature_C": 20.0
        })));

        assert!(record.is_complete(&["temperature_C"]));
        assert!(!record.is_complete(&["temperature_C", "humidity"]));
        assert_eq!(record.missing(&["temperature_C", "humidity"]), vec!["humidity"]);

        let none: [&str; 0] = [];
        assert!(record.is_complete(&none));
    }

    #[test]
    fn test_numeric_field_defaults_to_zero() {
        let fields = reading(json!({
            "model": "m", "t": 12.5, "n": 3, "ok": true, "s": "x", "z": null
        }))
        .into_fields();

        assert_eq!(numeric_field(&fields, "t"), 12.5);
        assert_eq!(numeric_field(&fields, "n"), 3.0);
        assert_eq!(numeric_field(&fields, "ok"), 1.0);
        assert_eq!(numeric_field(&fields, "s"), 0.0);
        assert_eq!(numeric_field(&fields, "z"), 0.0);
        assert_eq!(numeric_field(&fields, "absent"), 0.0);
    }
}

//! EJSON value helpers.
//!
//! DDP document fields carry a handful of reserved-key encodings for values
//! JSON cannot express natively: `{"$date": millis}` for timestamps and
//! `{"$binary": base64}` for byte strings. Values under other reserved keys
//! (`$type`, ...) pass through opaquely.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value, json};

/// Encode a timestamp as `{"$date": millisSinceEpoch}`.
pub fn encode_date(when: DateTime<Utc>) -> Value {
    json!({ "$date": when.timestamp_millis() })
}

/// Decode a `{"$date": millis}` value, if that is what `value` is.
pub fn decode_date(value: &Value) -> Option<DateTime<Utc>> {
    let millis = value.get("$date")?.as_i64()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Encode bytes as `{"$binary": base64}`.
pub fn encode_binary(bytes: &[u8]) -> Value {
    json!({ "$binary": STANDARD.encode(bytes) })
}

/// Decode a `{"$binary": base64}` value, if that is what `value` is.
pub fn decode_binary(value: &Value) -> Option<Vec<u8>> {
    let encoded = value.get("$binary")?.as_str()?;
    STANDARD.decode(encoded).ok()
}

/// Capability for applying server field updates onto a document record.
///
/// Document-model collaborators implement this per record type; the
/// dispatcher itself never mutates documents, it only forwards `fields` and
/// `cleared` verbatim.
pub trait ApplyFields {
    /// Merge `fields` into the record, then drop every key in `cleared`.
    fn apply_fields(&mut self, fields: &Map<String, Value>, cleared: &[String]);
}

impl ApplyFields for Map<String, Value> {
    fn apply_fields(&mut self, fields: &Map<String, Value>, cleared: &[String]) {
        for (key, value) in fields {
            self.insert(key.clone(), value.clone());
        }
        for key in cleared {
            self.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_round_trip() {
        let when = Utc.with_ymd_and_hms(2021, 6, 1, 12, 30, 0).unwrap();
        let encoded = encode_date(when);
        assert_eq!(encoded, json!({"$date": when.timestamp_millis()}));
        assert_eq!(decode_date(&encoded), Some(when));
    }

    #[test]
    fn date_decode_rejects_other_shapes() {
        assert_eq!(decode_date(&json!({"$date": "not-a-number"})), None);
        assert_eq!(decode_date(&json!(1622550600000_i64)), None);
        assert_eq!(decode_date(&json!({"$binary": "AAAA"})), None);
    }

    #[test]
    fn binary_round_trip() {
        let bytes = b"\x00\x01\xfe\xff";
        let encoded = encode_binary(bytes);
        assert_eq!(decode_binary(&encoded), Some(bytes.to_vec()));
    }

    #[test]
    fn apply_fields_merges_and_clears() {
        let mut doc: Map<String, Value> = serde_json::from_value(json!({
            "state": "MA", "city": "Boston", "zip": "02134",
        }))
        .unwrap();
        let fields: Map<String, Value> =
            serde_json::from_value(json!({"city": "Cambridge", "pop": 118})).unwrap();

        doc.apply_fields(&fields, &["zip".to_string()]);

        assert_eq!(doc["city"], json!("Cambridge"));
        assert_eq!(doc["state"], json!("MA"));
        assert_eq!(doc["pop"], json!(118));
        assert!(!doc.contains_key("zip"));
    }
}

// src/encoders/json.rs
use super::{util, RecordFormatter};
use crate::error::{Error, Result};
use crate::model::{LogRecord, LogValue};
use serde_json::{Map, Value};

/// Renders one JSON object per line.
pub struct JsonLinesFormatter {
  flatten_fields: bool,
}

impl JsonLinesFormatter {
  /// With `flatten_fields`, structured context is merged into the top-level
  /// object instead of being nested under `"fields"`. Top-level keys win on
  /// collision.
  pub fn new(flatten_fields: bool) -> Self {
    Self { flatten_fields }
  }
}

fn to_json(value: &LogValue) -> Value {
  match value {
    LogValue::String(s) | LogValue::Debug(s) => Value::String(s.clone()),
    LogValue::Int(i) => Value::Number((*i).into()),
    LogValue::Float(f) => serde_json::Number::from_f64(*f)
      .map(Value::Number)
      .unwrap_or(Value::Null),
    LogValue::Bool(b) => Value::Bool(*b),
  }
}

impl RecordFormatter for JsonLinesFormatter {
  fn format_record(&self, record: &LogRecord) -> Result<Vec<u8>> {
    // serde_json's Map is ordered by key unless `preserve_order` is enabled.
    let mut json_map = Map::new();

    let mut ts_buf = String::new();
    util::write_timestamp(&mut ts_buf, &record.timestamp);
    json_map.insert("timestamp".to_string(), Value::String(ts_buf));
    json_map.insert("level".to_string(), Value::String(record.level.to_string()));
    json_map.insert("name".to_string(), Value::String(record.logger.clone()));
    json_map.insert(
      "process".to_string(),
      Value::Number(record.process_id.into()),
    );
    json_map.insert(
      "process_name".to_string(),
      Value::String(record.process_name.clone()),
    );
    json_map.insert(
      "thread".to_string(),
      Value::String(record.thread_id.clone()),
    );
    if let Some(msg) = &record.message {
      json_map.insert("message".to_string(), Value::String(msg.clone()));
    }

    if !record.fields.is_empty() {
      if self.flatten_fields {
        for (key, value) in &record.fields {
          json_map.entry(key.clone()).or_insert_with(|| to_json(value));
        }
      } else {
        let fields: Map<String, Value> = record
          .fields
          .iter()
          .map(|(key, value)| (key.clone(), to_json(value)))
          .collect();
        json_map.insert("fields".to_string(), Value::Object(fields));
      }
    }

    let json_string = serde_json::to_string(&Value::Object(json_map))
      .map_err(|e| Error::Format(format!("JSON serialization failed: {}", e)))?;

    Ok(format!("{}\n", json_string).into_bytes())
  }
}

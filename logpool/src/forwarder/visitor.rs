// src/forwarder/visitor.rs
use crate::model::{LogRecord, LogValue};
use std::collections::BTreeMap;
use tracing::field::{Field, Visit};

// Fields added by the `log` bridge; the target is already the record's logger.
const LOG_BRIDGE_PREFIX: &str = "log.";

pub(crate) struct LogRecordVisitor<'a> {
  fields: &'a mut BTreeMap<String, LogValue>,
  message: &'a mut Option<String>,
  // To handle duplicate "message" keys
  message_field_count: u32,
}

impl<'a> LogRecordVisitor<'a> {
  pub(crate) fn new(record: &'a mut LogRecord) -> Self {
    Self {
      fields: &mut record.fields,
      message: &mut record.message,
      message_field_count: 0,
    }
  }

  fn insert(&mut self, field: &Field, value: LogValue) {
    if field.name().starts_with(LOG_BRIDGE_PREFIX) {
      return;
    }
    self.fields.insert(field.name().to_string(), value);
  }

  fn record_message(&mut self, value: LogValue) {
    if self.message.is_none() {
      *self.message = Some(value.to_string());
    } else {
      self.message_field_count += 1;
      let disambiguated_key = format!("message.{}", self.message_field_count);
      self.fields.insert(disambiguated_key, value);
    }
  }
}

impl<'a> Visit for LogRecordVisitor<'a> {
  fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
    let value_str = format!("{:?}", value);
    if field.name() == "message" {
      self.record_message(LogValue::Debug(value_str));
    } else {
      self.insert(field, LogValue::Debug(value_str));
    }
  }

  fn record_str(&mut self, field: &Field, value: &str) {
    if field.name() == "message" {
      self.record_message(LogValue::String(value.to_string()));
    } else {
      self.insert(field, LogValue::String(value.to_string()));
    }
  }

  fn record_i64(&mut self, field: &Field, value: i64) {
    self.insert(field, LogValue::Int(value));
  }

  fn record_u64(&mut self, field: &Field, value: u64) {
    if value <= i64::MAX as u64 {
      self.insert(field, LogValue::Int(value as i64));
    } else {
      // Does not fit, store as string
      self.insert(field, LogValue::String(value.to_string()));
    }
  }

  fn record_f64(&mut self, field: &Field, value: f64) {
    self.insert(field, LogValue::Float(value));
  }

  fn record_bool(&mut self, field: &Field, value: bool) {
    self.insert(field, LogValue::Bool(value));
  }
}

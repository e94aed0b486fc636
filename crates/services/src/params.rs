use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;
use workdesk_core::{Error, Result};

use crate::adapter::{OperationSpec, ParamKind, ParamSlot};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// Parameters after validation: every value is coerced to its slot kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: BTreeMap<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    /// A slot that validation guarantees; absent only if the adapter
    /// declares it optional but treats it as required.
    pub fn require(&self, name: &str) -> Result<&str> {
        self.str(name).ok_or_else(|| Error::ParameterInvalid {
            slot: name.to_string(),
            reason: "missing".to_string(),
        })
    }

    pub fn list(&self, name: &str) -> Vec<String> {
        match self.values.get(name) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn u32_or(&self, name: &str, default: u32) -> Result<u32> {
        match self.str(name) {
            None => Ok(default),
            Some(s) => s.parse::<u32>().map_err(|_| Error::ParameterInvalid {
                slot: name.to_string(),
                reason: format!("'{}' is not a number", s),
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<const N: usize> From<[(&str, Value); N]> for Params {
    fn from(pairs: [(&str, Value); N]) -> Self {
        let mut params = Params::new();
        for (k, v) in pairs {
            params.insert(k, v);
        }
        params
    }
}

/// Check `raw` against the operation's slots and coerce each value.
///
/// A required slot that is absent, null or blank fails with
/// `ParameterMissing`; a value that cannot take its slot's kind fails with
/// `ParameterInvalid`. Undeclared names are dropped.
pub fn normalize(
    service_id: &str,
    op: &OperationSpec,
    raw: &BTreeMap<String, Value>,
    today: NaiveDate,
) -> Result<Params> {
    let mut params = Params::new();

    for slot in &op.required {
        match raw.get(slot.name).filter(|v| !is_blank(v)) {
            Some(value) => params.insert(slot.name, coerce(slot, value, today)?),
            None => {
                return Err(Error::ParameterMissing {
                    service: service_id.to_string(),
                    operation: op.name.to_string(),
                    slot: slot.name.to_string(),
                })
            }
        }
    }

    for slot in &op.optional {
        if let Some(value) = raw.get(slot.name).filter(|v| !is_blank(v)) {
            params.insert(slot.name, coerce(slot, value, today)?);
        }
    }

    for name in raw.keys() {
        if op.slot(name).is_none() {
            debug!(service = service_id, operation = op.name, param = %name, "Dropping undeclared parameter");
        }
    }

    Ok(params)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn invalid(slot: &ParamSlot, reason: impl Into<String>) -> Error {
    Error::ParameterInvalid {
        slot: slot.name.to_string(),
        reason: reason.into(),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn coerce(slot: &ParamSlot, value: &Value, today: NaiveDate) -> Result<Value> {
    match slot.kind {
        ParamKind::Text => match value {
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().filter_map(scalar_text).collect();
                Ok(Value::String(parts.join(", ")))
            }
            other => scalar_text(other)
                .map(Value::String)
                .ok_or_else(|| invalid(slot, "expected text")),
        },
        ParamKind::Email => {
            let text = scalar_text(value).ok_or_else(|| invalid(slot, "expected an email address"))?;
            if EMAIL_RE.is_match(&text) {
                Ok(Value::String(text))
            } else {
                Err(invalid(slot, format!("'{}' is not an email address", text)))
            }
        }
        ParamKind::Date => {
            let text = scalar_text(value).ok_or_else(|| invalid(slot, "expected a date"))?;
            parse_date(&text, today)
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                .ok_or_else(|| invalid(slot, format!("'{}' is not a date (use YYYY-MM-DD)", text)))
        }
        ParamKind::Handle => {
            let text = scalar_text(value).ok_or_else(|| invalid(slot, "expected an id"))?;
            Ok(Value::String(text))
        }
        ParamKind::Values => {
            let items: Vec<Value> = match value {
                Value::Array(items) => items
                    .iter()
                    .map(|v| scalar_text(v).ok_or_else(|| invalid(slot, "expected a list of values")))
                    .collect::<Result<Vec<_>>>()?
                    .into_iter()
                    .map(Value::String)
                    .collect(),
                Value::String(s) => s
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(|p| Value::String(p.to_string()))
                    .collect(),
                other => match scalar_text(other) {
                    Some(t) => vec![Value::String(t)],
                    None => return Err(invalid(slot, "expected a list of values")),
                },
            };
            if items.is_empty() {
                return Err(invalid(slot, "no values given"));
            }
            Ok(Value::Array(items))
        }
    }
}

/// `YYYY-MM-DD`, `today` or `tomorrow`.
pub fn parse_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    match text.trim().to_lowercase().as_str() {
        "today" => Some(today),
        "tomorrow" => Some(today + Duration::days(1)),
        other => NaiveDate::parse_from_str(other, "%Y-%m-%d").ok(),
    }
}

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use workdesk_services::ServiceDescriptor;

/// One (service, operation, slots) tuple the classifier may answer with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaEntry {
    pub service_id: String,
    pub operation_name: String,
    pub description: String,
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

impl SchemaEntry {
    pub fn declares(&self, slot: &str) -> bool {
        self.required.iter().chain(self.optional.iter()).any(|s| s == slot)
    }
}

/// Ordered catalogue of every operation of every registered service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntentSchema {
    pub entries: Vec<SchemaEntry>,
}

impl IntentSchema {
    pub fn from_descriptors(services: &[&ServiceDescriptor]) -> Self {
        let entries = services
            .iter()
            .flat_map(|d| {
                d.operations.iter().map(move |op| SchemaEntry {
                    service_id: d.service_id.to_string(),
                    operation_name: op.name.to_string(),
                    description: op.description.to_string(),
                    required: op.required.iter().map(|s| s.name.to_string()).collect(),
                    optional: op.optional.iter().map(|s| s.name.to_string()).collect(),
                })
            })
            .collect();
        Self { entries }
    }

    pub fn entry(&self, service_id: &str, operation_name: &str) -> Option<&SchemaEntry> {
        self.entries
            .iter()
            .find(|e| e.service_id == service_id && e.operation_name == operation_name)
    }

    pub fn has_service(&self, service_id: &str) -> bool {
        self.entries.iter().any(|e| e.service_id == service_id)
    }

    /// One line per operation, e.g. `gmail.send(to, subject; body) - Send an email`.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| {
                let mut slots = e.required.join(", ");
                if !e.optional.is_empty() {
                    slots.push_str("; ");
                    slots.push_str(&e.optional.join(", "));
                }
                format!("{}.{}({}) - {}", e.service_id, e.operation_name, slots, e.description)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// What the external classification service is asked.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationRequest<'a> {
    pub raw_text: &'a str,
    pub schema: &'a IntentSchema,
    pub active_service: Option<&'a str>,
    pub today: NaiveDate,
}

/// What the external classification service answers, before validation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClassificationResponse {
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reply: Option<String>,
}

impl ClassificationResponse {
    /// Check the response against the schema. The error string says what was wrong.
    pub fn validate(&self, schema: &IntentSchema) -> std::result::Result<(), String> {
        let confidence = self
            .confidence
            .ok_or_else(|| "confidence is missing".to_string())?;
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(format!("confidence {} is outside [0, 1]", confidence));
        }
        let Some(service_id) = self.service_id.as_deref() else {
            return Ok(());
        };
        if !schema.has_service(service_id) {
            return Err(format!("unknown service '{}'", service_id));
        }
        let operation = self
            .operation_name
            .as_deref()
            .ok_or_else(|| format!("no operation given for '{}'", service_id))?;
        let entry = schema
            .entry(service_id, operation)
            .ok_or_else(|| format!("unknown operation '{}.{}'", service_id, operation))?;
        if let Some(slot) = self.parameters.keys().find(|k| !entry.declares(k)) {
            return Err(format!(
                "'{}' is not a parameter of {}.{}",
                slot, service_id, operation
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use workdesk_services::{gmail, tasks};

    fn schema() -> IntentSchema {
        let g = gmail::descriptor();
        let t = tasks::descriptor();
        IntentSchema::from_descriptors(&[&g, &t])
    }

    fn response(value: Value) -> ClassificationResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_schema_is_ordered() {
        let schema = schema();
        assert_eq!(schema.entries[0].service_id, "gmail");
        assert_eq!(schema.entries[0].operation_name, "list");
        assert_eq!(schema.entries.last().unwrap().operation_name, "clear_completed");
        let send = schema.entry("gmail", "send").unwrap();
        assert_eq!(send.required, vec!["to", "subject"]);
        assert!(send.declares("body"));
        assert!(schema.render().contains("gmail.send(to, subject; body)"));
    }

    #[test]
    fn test_valid_response() {
        let r = response(json!({
            "service_id": "gmail", "operation_name": "send",
            "parameters": {"to": "a@b.com", "subject": "the meeting"},
            "confidence": 0.9
        }));
        assert!(r.validate(&schema()).is_ok());
    }

    #[test]
    fn test_null_service_is_valid() {
        let r = response(json!({"service_id": null, "confidence": 0.0, "reply": "Hi!"}));
        assert!(r.validate(&schema()).is_ok());
    }

    #[test]
    fn test_rejects_unknown_operation_and_slot() {
        let schema = schema();
        let r = response(json!({"service_id": "gmail", "operation_name": "fly", "confidence": 0.9}));
        assert!(r.validate(&schema).unwrap_err().contains("unknown operation"));
        let r = response(json!({
            "service_id": "tasks", "operation_name": "create",
            "parameters": {"title": "x", "colour": "red"}, "confidence": 0.9
        }));
        assert!(r.validate(&schema).unwrap_err().contains("colour"));
        let r = response(json!({"service_id": "fax", "operation_name": "send", "confidence": 0.9}));
        assert!(r.validate(&schema).is_err());
    }

    #[test]
    fn test_rejects_bad_confidence() {
        let schema = schema();
        let r = response(json!({"service_id": "tasks", "operation_name": "list", "confidence": 1.5}));
        assert!(r.validate(&schema).is_err());
        let r = response(json!({"service_id": "tasks", "operation_name": "list"}));
        assert!(r.validate(&schema).is_err());
    }
}

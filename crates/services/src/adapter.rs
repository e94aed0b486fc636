use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use workdesk_core::config::Config;
use workdesk_core::{Credential, Result};

use crate::output::OperationOutput;
use crate::params::Params;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// Free text.
    Text,
    Email,
    /// `YYYY-MM-DD`, or `today` / `tomorrow`.
    Date,
    /// Opaque remote id; may be given positionally as "item N".
    Handle,
    /// A list of strings.
    Values,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParamSlot {
    pub name: &'static str,
    pub kind: ParamKind,
}

pub const fn slot(name: &'static str, kind: ParamKind) -> ParamSlot {
    ParamSlot { name, kind }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationShape {
    List,
    Record,
    Ack,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// Phrases the keyword matcher accepts for this operation, besides its name.
    pub synonyms: &'static [&'static str],
    pub shape: OperationShape,
    pub required: Vec<ParamSlot>,
    pub optional: Vec<ParamSlot>,
}

impl OperationSpec {
    pub fn new(name: &'static str, shape: OperationShape, description: &'static str) -> Self {
        Self {
            name,
            description,
            synonyms: &[],
            shape,
            required: Vec::new(),
            optional: Vec::new(),
        }
    }

    pub fn synonyms(mut self, synonyms: &'static [&'static str]) -> Self {
        self.synonyms = synonyms;
        self
    }

    pub fn required(mut self, slots: &[ParamSlot]) -> Self {
        self.required.extend_from_slice(slots);
        self
    }

    pub fn optional(mut self, slots: &[ParamSlot]) -> Self {
        self.optional.extend_from_slice(slots);
        self
    }

    /// Required slots first, then optional ones.
    pub fn slots(&self) -> impl Iterator<Item = &ParamSlot> {
        self.required.iter().chain(self.optional.iter())
    }

    pub fn slot(&self, name: &str) -> Option<&ParamSlot> {
        self.slots().find(|s| s.name == name)
    }

    pub fn slot_names(&self) -> Vec<&'static str> {
        self.slots().map(|s| s.name).collect()
    }
}

/// Static description of one service: identity, scopes, vocabulary and operations.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceDescriptor {
    pub service_id: &'static str,
    pub display_name: &'static str,
    pub required_scopes: Vec<&'static str>,
    /// Words that name the service in free text.
    pub keywords: &'static [&'static str],
    pub operations: Vec<OperationSpec>,
}

impl ServiceDescriptor {
    pub fn operation(&self, name: &str) -> Option<&OperationSpec> {
        self.operations.iter().find(|op| op.name == name)
    }

    pub fn scope_set(&self) -> BTreeSet<String> {
        self.required_scopes.iter().map(|s| s.to_string()).collect()
    }
}

/// Per-adapter knobs taken from the `services` config section.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub timeout_secs: u64,
    pub max_results: u32,
    pub api_base: Option<String>,
    /// Drive override, for services that list their files through Drive.
    pub drive_base: Option<String>,
}

impl AdapterSettings {
    pub fn from_config(config: &Config, service_id: &str) -> Self {
        Self {
            timeout_secs: config.services.timeout_secs,
            max_results: config.services.max_results,
            api_base: config.api_base_for(service_id).map(str::to_string),
            drive_base: config.api_base_for("drive").map(str::to_string),
        }
    }
}

impl AdapterSettings {
    /// Settings for the Drive client of a service that lists through Drive.
    pub fn drive(&self) -> Self {
        Self {
            api_base: self.drive_base.clone(),
            ..self.clone()
        }
    }
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_results: 10,
            api_base: None,
            drive_base: None,
        }
    }
}

/// One product service. Each `invoke` issues exactly one remote request.
#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    fn descriptor(&self) -> &ServiceDescriptor;

    async fn invoke(
        &self,
        operation: &str,
        credential: &Credential,
        params: &Params,
    ) -> Result<OperationOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_slots_ordered() {
        let op = OperationSpec::new("send", OperationShape::Ack, "Send a message")
            .required(&[slot("to", ParamKind::Email), slot("subject", ParamKind::Text)])
            .optional(&[slot("body", ParamKind::Text)]);
        assert_eq!(op.slot_names(), vec!["to", "subject", "body"]);
        assert_eq!(op.slot("body").map(|s| s.kind), Some(ParamKind::Text));
        assert!(op.slot("cc").is_none());
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config
            .services
            .api_bases
            .insert("drive".into(), "http://127.0.0.1:9/".into());
        let settings = AdapterSettings::from_config(&config, "drive");
        assert_eq!(settings.api_base.as_deref(), Some("http://127.0.0.1:9"));
        assert!(AdapterSettings::from_config(&config, "docs").api_base.is_none());
    }
}

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};
use workdesk_core::config::{Config, ALL_SERVICES};
use workdesk_core::{Error, Result};

use crate::adapter::{AdapterSettings, OperationSpec, ServiceAdapter, ServiceDescriptor};
use crate::calendar::CalendarAdapter;
use crate::contacts::ContactsAdapter;
use crate::docs::DocsAdapter;
use crate::drive::DriveAdapter;
use crate::forms::FormsAdapter;
use crate::gmail::GmailAdapter;
use crate::sheets::SheetsAdapter;
use crate::slides::SlidesAdapter;
use crate::tasks::TasksAdapter;

/// Adapters by service id, fixed at startup. Iteration follows registration order.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    adapters: HashMap<String, Arc<dyn ServiceAdapter>>,
    order: Vec<String>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every enabled service from config, in canonical order.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        for id in ALL_SERVICES {
            if !config.is_service_enabled(id) {
                debug!(service = id, "Service disabled in config");
                continue;
            }
            let settings = AdapterSettings::from_config(config, id);
            registry.register(build_adapter(id, &settings)?);
        }
        for id in &config.services.enabled {
            if !ALL_SERVICES.contains(&id.as_str()) {
                warn!(service = %id, "Ignoring unknown service in config");
            }
        }
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn ServiceAdapter>) {
        let id = adapter.descriptor().service_id.to_string();
        debug!(service = %id, "Registering service adapter");
        if self.adapters.insert(id.clone(), adapter).is_none() {
            self.order.push(id);
        }
    }

    pub fn get(&self, service_id: &str) -> Option<&Arc<dyn ServiceAdapter>> {
        self.adapters.get(service_id)
    }

    /// Look up an adapter and one of its operations.
    pub fn resolve(
        &self,
        service_id: &str,
        operation: &str,
    ) -> Result<(&Arc<dyn ServiceAdapter>, &OperationSpec)> {
        let adapter = self
            .get(service_id)
            .ok_or_else(|| Error::IntentUnresolved(format!("unknown service '{}'", service_id)))?;
        let spec = adapter.descriptor().operation(operation).ok_or_else(|| {
            Error::IntentUnresolved(format!("{} has no operation '{}'", service_id, operation))
        })?;
        Ok((adapter, spec))
    }

    pub fn descriptors(&self) -> Vec<&ServiceDescriptor> {
        self.order
            .iter()
            .filter_map(|id| self.adapters.get(id))
            .map(|a| a.descriptor())
            .collect()
    }

    pub fn service_ids(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Union of every registered adapter's scopes; what consent asks for.
    pub fn union_scopes(&self) -> BTreeSet<String> {
        self.descriptors()
            .iter()
            .flat_map(|d| d.required_scopes.iter().map(|s| s.to_string()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

fn build_adapter(id: &str, settings: &AdapterSettings) -> Result<Arc<dyn ServiceAdapter>> {
    let adapter: Arc<dyn ServiceAdapter> = match id {
        "calendar" => Arc::new(CalendarAdapter::new(settings)?),
        "gmail" => Arc::new(GmailAdapter::new(settings)?),
        "drive" => Arc::new(DriveAdapter::new(settings)?),
        "docs" => Arc::new(DocsAdapter::new(settings)?),
        "sheets" => Arc::new(SheetsAdapter::new(settings)?),
        "slides" => Arc::new(SlidesAdapter::new(settings)?),
        "tasks" => Arc::new(TasksAdapter::new(settings)?),
        "contacts" => Arc::new(ContactsAdapter::new(settings)?),
        "forms" => Arc::new(FormsAdapter::new(settings)?),
        other => return Err(Error::Config(format!("Unknown service '{}'", other))),
    };
    Ok(adapter)
}

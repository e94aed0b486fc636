use chrono::{Local, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use workdesk_auth::{
    CredentialProvider, CredentialStore, FileTokenStore, GoogleOAuthProvider, UnconfiguredProvider,
};
use workdesk_classifier::IntentBridge;
use workdesk_core::{Config, Error, ErrorKind, Paths, Result, SessionContext};
use workdesk_services::{params, ServiceRegistry};

use crate::render::{self, Outcome, RenderedResult};

/// Owns everything one session needs: the credential store, the adapter
/// registry, the classifier bridge and the conversational context.
pub struct Dispatcher {
    credentials: Arc<CredentialStore>,
    registry: ServiceRegistry,
    bridge: IntentBridge,
    context: SessionContext,
    max_handles: usize,
    today: Option<NaiveDate>,
}

impl Dispatcher {
    pub fn new(
        credentials: Arc<CredentialStore>,
        registry: ServiceRegistry,
        bridge: IntentBridge,
        max_handles: usize,
    ) -> Self {
        Self {
            credentials,
            registry,
            bridge,
            context: SessionContext::new(),
            max_handles,
            today: None,
        }
    }

    /// Wire the real adapters, token file and OAuth client from config.
    pub fn from_config(config: &Config, paths: &Paths) -> Result<Self> {
        let registry = ServiceRegistry::from_config(config)?;
        let credentials = Arc::new(credential_store(config, paths, &registry));
        let bridge = IntentBridge::from_config(config)?;
        info!(
            services = registry.len(),
            scopes = credentials.all_scopes().len(),
            "Dispatcher ready"
        );
        Ok(Self::new(credentials, registry, bridge, config.session.max_handles))
    }

    /// Pin the date used for "today" and "tomorrow".
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Run one turn. Never fails: every error is rendered.
    pub async fn handle(&mut self, raw_text: &str) -> RenderedResult {
        let raw_text = raw_text.trim();
        match self.dispatch(raw_text).await {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(error = %e, kind = ?e.kind(), "Turn failed");
                render::error(&e)
            }
        }
    }

    async fn dispatch(&mut self, raw_text: &str) -> Result<RenderedResult> {
        let today = self.today();
        let intent = {
            let descriptors = self.registry.descriptors();
            self.bridge
                .classify(raw_text, &descriptors, &self.context, today)
                .await?
        };
        if !intent.is_resolved() {
            debug!(text = %raw_text, note = ?intent.note, "Intent unresolved");
            return Ok(render::unresolved(&intent));
        }
        let (Some(service_id), Some(operation)) = (intent.service_id.clone(), intent.operation_name.clone())
        else {
            return Ok(render::unresolved(&intent));
        };

        let (adapter, spec) = self.registry.resolve(&service_id, &operation)?;
        let adapter = Arc::clone(adapter);
        let params = params::normalize(&service_id, spec, &intent.parameters, today)?;
        // Every registered service's scopes must be granted, not just this one's.
        let required = self.credentials.all_scopes().clone();

        // Re-consent only recovers a token that existed and failed to refresh;
        // a first consent that fails is reported as is.
        let had_token = self.credentials.peek().await?.is_some();
        let credential = match self.credentials.get_valid_credential(&service_id, &required).await {
            Err(Error::AuthExpired(detail)) if had_token => {
                warn!(service = %service_id, detail = %detail, "Authorization expired, requesting consent");
                self.credentials.login().await?;
                self.credentials.get_valid_credential(&service_id, &required).await?
            }
            other => other?,
        };

        info!(
            service = %service_id,
            operation = %operation,
            confidence = %intent.confidence,
            source = ?intent.source,
            "Dispatching"
        );
        let output = match adapter.invoke(&operation, &credential, &params).await {
            Ok(output) => output,
            Err(e) => {
                if e.kind() == ErrorKind::AuthExpired {
                    self.credentials.invalidate().await;
                }
                return Err(e);
            }
        };

        if let Some(handles) = output.handles() {
            self.context.record_list(handles, self.max_handles);
        }
        self.context.active_service_id = Some(service_id);
        Ok(render::output(adapter.descriptor().display_name, &output))
    }

    /// Token presence and per-service scope coverage. Reads only local state.
    pub async fn status(&self) -> RenderedResult {
        let mut lines = Vec::new();
        let credential = match self.credentials.peek().await {
            Ok(Some(credential)) => {
                let now = Utc::now();
                let remaining = credential.expiry - now;
                let state = if remaining.num_seconds() > 0 {
                    format!("expires in {} min", remaining.num_minutes())
                } else {
                    "expired, refreshes on next use".to_string()
                };
                lines.push(format!(
                    "Token:      ✓ present ({}, {})",
                    state,
                    credential.expiry.format("%Y-%m-%d %H:%M UTC")
                ));
                Some(credential)
            }
            Ok(None) => {
                lines.push("Token:      ✗ none (consent runs on the first command)".to_string());
                None
            }
            Err(e) => {
                lines.push(format!("Token:      ✗ unreadable ({})", e));
                None
            }
        };

        lines.push(format!(
            "Classifier: {}",
            match (self.bridge.has_primary(), self.bridge.has_fallback()) {
                (true, true) => "remote, keyword fallback",
                (true, false) => "remote only",
                (false, true) => "keyword matching",
                (false, false) => "none",
            }
        ));
        lines.push(format!(
            "Context:    active service {}, {} remembered item(s)",
            self.context.active_service_id.as_deref().unwrap_or("none"),
            self.context.last_result_handles.len()
        ));
        lines.push("Services:".to_string());
        for d in self.registry.descriptors() {
            let line = match &credential {
                None => format!("  - {:<9} {}", d.service_id, d.display_name),
                Some(c) => {
                    let missing = c.missing_scopes(&d.scope_set());
                    if missing.is_empty() {
                        format!("  ✓ {:<9} {}", d.service_id, d.display_name)
                    } else {
                        let missing: Vec<&str> = missing.iter().map(|s| render::short_scope(s)).collect();
                        format!(
                            "  ✗ {:<9} {} (missing {})",
                            d.service_id,
                            d.display_name,
                            missing.join(", ")
                        )
                    }
                }
            };
            lines.push(line);
        }
        RenderedResult::new(Outcome::Status, lines.join("\n"))
    }

    /// Operations per service, with their slots.
    pub fn help(&self) -> RenderedResult {
        let mut lines = vec![
            "Ask in plain words, e.g. \"show my tasks\" or \"send email to ann@example.com about lunch\".".to_string(),
            "Refer to listed results as \"item 2\". Commands: status, help, quit.".to_string(),
        ];
        for d in self.registry.descriptors() {
            let ops: Vec<String> = d
                .operations
                .iter()
                .map(|op| {
                    let slots = op.slot_names();
                    if slots.is_empty() {
                        op.name.to_string()
                    } else {
                        format!("{}({})", op.name, slots.join(", "))
                    }
                })
                .collect();
            lines.push(format!("  {:<9} {}", d.service_id, ops.join(", ")));
        }
        RenderedResult::new(Outcome::Status, lines.join("\n"))
    }
}

fn credential_store(config: &Config, paths: &Paths, registry: &ServiceRegistry) -> CredentialStore {
    let token_file = paths.resolve(&config.oauth.token_file);
    let secrets_file = paths.resolve(&config.oauth.client_secrets_file);
    let provider: Arc<dyn CredentialProvider> =
        match GoogleOAuthProvider::from_file(&secrets_file, config.oauth.timeout_secs) {
            Ok(provider) => Arc::new(provider),
            Err(e) => {
                debug!(error = %e, "OAuth client unavailable");
                Arc::new(UnconfiguredProvider::new(e.to_string()))
            }
        };
    CredentialStore::new(
        Arc::new(FileTokenStore::new(token_file)),
        provider,
        registry.union_scopes(),
        chrono::Duration::seconds(config.oauth.refresh_skew_secs),
    )
}

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use workdesk_core::config::Config;
use workdesk_core::{Error, Intent, Result, SessionContext};
use workdesk_services::{ParamKind, ServiceDescriptor};

use crate::keyword::KeywordClassifier;
use crate::remote::RemoteClassifier;
use crate::{Classifier, ClassifyInput};

static POSITIONAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:(?:item|number)\s*#?\s*|#\s*)?(\d+)\s*$").expect("valid positional regex")
});

/// Two-stage classification: the primary stage when it can answer, the
/// keyword fallback when it cannot. Positional references are resolved here.
pub struct IntentBridge {
    primary: Option<Arc<dyn Classifier>>,
    fallback: Option<Arc<dyn Classifier>>,
}

impl IntentBridge {
    pub fn new(primary: Option<Arc<dyn Classifier>>, fallback: Option<Arc<dyn Classifier>>) -> Self {
        Self { primary, fallback }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let primary = RemoteClassifier::from_config(&config.classifier, config.classifier_api_key())?
            .map(|c| Arc::new(c) as Arc<dyn Classifier>);
        let fallback = config
            .classifier
            .fallback_enabled
            .then(|| Arc::new(KeywordClassifier::new()) as Arc<dyn Classifier>);
        debug!(
            primary = primary.is_some(),
            fallback = fallback.is_some(),
            "Intent bridge configured"
        );
        Ok(Self::new(primary, fallback))
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub async fn classify(
        &self,
        raw_text: &str,
        services: &[&ServiceDescriptor],
        context: &SessionContext,
        today: NaiveDate,
    ) -> Result<Intent> {
        let input = ClassifyInput {
            raw_text,
            services,
            context,
            today,
        };

        let unavailable = match &self.primary {
            Some(primary) => match primary.classify(&input).await {
                Ok(intent) => return resolve_references(intent, services, context),
                Err(e) => {
                    warn!(classifier = primary.name(), error = %e, "Primary classifier failed");
                    match e {
                        Error::ClassificationUnavailable(detail) => detail,
                        other => other.to_string(),
                    }
                }
            },
            None => "no classifier configured".to_string(),
        };

        let Some(fallback) = &self.fallback else {
            return Err(Error::ClassificationUnavailable(unavailable));
        };
        debug!(classifier = fallback.name(), "Using fallback classifier");
        let intent = fallback.classify(&input).await?;
        resolve_references(intent, services, context)
    }
}

/// The 1-based position a value refers to, if it looks positional.
///
/// Positions too large to represent saturate, and numbers that are not
/// positive integers map to 0, so both fail the lookup instead of passing
/// through as ids.
pub fn positional_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => Some(match n.as_u64() {
            Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
            None => match n.as_f64() {
                Some(f) if f >= 1.0 && f.fract() == 0.0 => usize::MAX,
                _ => 0,
            },
        }),
        Value::String(s) => POSITIONAL_RE
            .captures(s)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().parse().unwrap_or(usize::MAX)),
        _ => None,
    }
}

/// Replace positional values in Handle slots with the recorded handles.
pub fn resolve_references(
    mut intent: Intent,
    services: &[&ServiceDescriptor],
    context: &SessionContext,
) -> Result<Intent> {
    let (Some(service_id), Some(operation)) = (&intent.service_id, &intent.operation_name) else {
        return Ok(intent);
    };
    let Some(spec) = services
        .iter()
        .find(|d| d.service_id == service_id)
        .and_then(|d| d.operation(operation))
    else {
        return Ok(intent);
    };

    for slot in spec.slots().filter(|s| s.kind == ParamKind::Handle) {
        let Some(value) = intent.parameters.get_mut(slot.name) else {
            continue;
        };
        let Some(index) = positional_index(value) else {
            continue;
        };
        let handle = context
            .handle_at(index)
            .ok_or(Error::ReferenceOutOfRange {
                index,
                available: context.last_result_handles.len(),
            })?;
        debug!(slot = slot.name, index, handle, "Resolved positional reference");
        *value = Value::String(handle.to_string());
    }
    Ok(intent)
}

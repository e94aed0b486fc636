use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use workdesk_core::config::ClassifierConfig;
use workdesk_core::{Confidence, Error, Intent, IntentSource, Result};

use crate::schema::{ClassificationRequest, ClassificationResponse, IntentSchema};
use crate::{Classifier, ClassifyInput};

/// An external service that maps text to an operation of the schema.
/// Errors mean the service could not answer at all.
#[async_trait]
pub trait ClassificationService: Send + Sync {
    async fn classify(&self, request: &ClassificationRequest<'_>) -> Result<ClassificationResponse>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions classifier for any OpenAI-compatible endpoint.
pub struct OpenAiClassificationService {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl OpenAiClassificationService {
    pub fn new(api_key: &str, api_base: &str, model: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    fn system_prompt(request: &ClassificationRequest<'_>) -> String {
        format!(
            "You route requests for a productivity assistant. Today is {today}.\n\
             Active service: {active}.\n\
             Available operations, as service.operation(required; optional):\n{schema}\n\n\
             Answer with one JSON object and nothing else:\n\
             {{\"service_id\": string or null, \"operation_name\": string or null, \
             \"parameters\": {{slot: value}}, \"confidence\": number between 0 and 1, \
             \"reply\": string or null}}\n\
             Rules:\n\
             - Only use services, operations and parameter names listed above.\n\
             - If the user refers to an earlier result by position, pass the text \"item N\" for that id.\n\
             - Dates are YYYY-MM-DD, today or tomorrow.\n\
             - If the text is not a request for one of these operations, set service_id to null \
             and put a short conversational answer in reply.\n\
             - If the user does not name a service, prefer the active service.",
            today = request.today,
            active = request.active_service.unwrap_or("none"),
            schema = request.schema.render(),
        )
    }
}

#[async_trait]
impl ClassificationService for OpenAiClassificationService {
    async fn classify(&self, request: &ClassificationRequest<'_>) -> Result<ClassificationResponse> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: Self::system_prompt(request),
                },
                ChatMessage {
                    role: "user",
                    content: request.raw_text.to_string(),
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat { kind: "json_object" },
        };

        info!(url = %url, model = %self.model, "Calling classifier");
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::ClassificationUnavailable("request timed out".to_string())
                } else {
                    Error::ClassificationUnavailable(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            error!(status = %status, body = %raw_body, "Classifier API error");
            return Err(Error::ClassificationUnavailable(format!("API error {}", status)));
        }

        let chat: ChatResponse = serde_json::from_str(&raw_body).map_err(|e| {
            Error::ClassificationUnavailable(format!("unreadable response: {}", e))
        })?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::ClassificationUnavailable("empty response".to_string()))?;
        debug!(content = %content, "Classifier reply");

        let object = extract_json_object(&content).ok_or_else(|| {
            Error::ClassificationUnavailable("reply contains no JSON object".to_string())
        })?;
        serde_json::from_str(object)
            .map_err(|e| Error::ClassificationUnavailable(format!("invalid response: {}", e)))
    }
}

/// The first balanced `{...}` in `text`, ignoring braces inside strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Primary classifier stage: asks the external service, then validates the answer.
pub struct RemoteClassifier {
    service: Arc<dyn ClassificationService>,
    min_confidence: f64,
}

impl RemoteClassifier {
    pub fn new(service: Arc<dyn ClassificationService>, min_confidence: f64) -> Self {
        Self {
            service,
            min_confidence,
        }
    }

    /// `None` when the remote stage is disabled or has no API key.
    pub fn from_config(config: &ClassifierConfig, api_key: Option<String>) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let Some(api_key) = api_key else {
            debug!("No classifier API key, remote stage disabled");
            return Ok(None);
        };
        let service =
            OpenAiClassificationService::new(&api_key, &config.api_base, &config.model, config.timeout_secs)?;
        Ok(Some(Self::new(Arc::new(service), config.min_confidence)))
    }

    fn to_intent(&self, raw_text: &str, response: ClassificationResponse) -> Intent {
        let score = response.confidence.unwrap_or(0.0);
        let (Some(service_id), Some(operation)) = (response.service_id, response.operation_name) else {
            let mut intent = Intent::unresolved(raw_text);
            intent.source = IntentSource::Remote;
            intent.reply = response.reply.filter(|r| !r.trim().is_empty());
            return intent;
        };
        if score < self.min_confidence {
            let mut intent = Intent::unresolved(raw_text)
                .with_note(format!("low confidence for {}.{}", service_id, operation));
            intent.source = IntentSource::Remote;
            return intent;
        }
        let parameters = response
            .parameters
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .collect();
        Intent::resolved(
            raw_text,
            &service_id,
            &operation,
            parameters,
            Confidence::from_score(score),
            IntentSource::Remote,
        )
    }
}

#[async_trait]
impl Classifier for RemoteClassifier {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn classify(&self, input: &ClassifyInput<'_>) -> Result<Intent> {
        let schema = IntentSchema::from_descriptors(input.services);
        let request = ClassificationRequest {
            raw_text: input.raw_text,
            schema: &schema,
            active_service: input.context.active_service_id.as_deref(),
            today: input.today,
        };
        let response = self.service.classify(&request).await?;
        response
            .validate(&schema)
            .map_err(|reason| Error::ClassificationUnavailable(format!("invalid response: {}", reason)))?;
        Ok(self.to_intent(input.raw_text, response))
    }
}

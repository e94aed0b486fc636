use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use workdesk_core::{Credential, Error, Result};

use crate::adapter::AdapterSettings;

/// Thin REST client for one Google API, mapping failures onto the error taxonomy.
pub struct GoogleApiClient {
    client: Client,
    service: &'static str,
    base: String,
    scopes: Vec<&'static str>,
}

impl GoogleApiClient {
    pub fn new(
        service: &'static str,
        default_base: &str,
        scopes: &[&'static str],
        settings: &AdapterSettings,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        let base = settings
            .api_base
            .clone()
            .unwrap_or_else(|| default_base.to_string());
        Ok(Self {
            client,
            service,
            base: base.trim_end_matches('/').to_string(),
            scopes: scopes.to_vec(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn request(&self, method: Method, path: &str, credential: &Credential) -> RequestBuilder {
        self.request_url(method, &self.url(path), credential)
    }

    /// Same as `request`, for endpoints outside the API base (media uploads).
    pub fn request_url(&self, method: Method, url: &str, credential: &Credential) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&credential.access_token)
    }

    pub fn get(&self, path: &str, credential: &Credential) -> RequestBuilder {
        self.request(Method::GET, path, credential)
    }

    pub fn post(&self, path: &str, credential: &Credential) -> RequestBuilder {
        self.request(Method::POST, path, credential)
    }

    /// Send the request; JSON body on success, `Value::Null` when empty.
    pub async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let resp = self.execute(request).await?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::remote(self.service, format!("failed to read response: {}", e)))?;

        debug!(service = self.service, status = status.as_u16(), bytes = text.len(), "API call succeeded");
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| Error::remote(self.service, format!("malformed response: {}", e)))
    }

    /// Send the request and return the raw body, for media downloads.
    pub async fn send_bytes(&self, request: RequestBuilder) -> Result<Vec<u8>> {
        let resp = self.execute(request).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::remote(self.service, format!("failed to read response: {}", e)))?;
        debug!(service = self.service, bytes = bytes.len(), "Media download succeeded");
        Ok(bytes.to_vec())
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        let resp = request.send().await.map_err(|e| {
            let detail = if e.is_timeout() {
                "request timed out".to_string()
            } else {
                e.to_string()
            };
            Error::remote(self.service, detail)
        })?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(service = self.service, status = status.as_u16(), "API returned error status");
            return Err(classify_failure(self.service, &self.scopes, status, &text));
        }
        Ok(resp)
    }
}

/// Map a non-2xx answer onto an error kind.
pub fn classify_failure(
    service: &str,
    scopes: &[&str],
    status: StatusCode,
    body: &str,
) -> Error {
    let message = error_message(body);
    if status == StatusCode::UNAUTHORIZED {
        return Error::AuthExpired(format!("{} rejected the access token", service));
    }
    if status == StatusCode::FORBIDDEN && is_scope_failure(body) {
        return Error::AuthInsufficientScope {
            service: service.to_string(),
            missing: scopes.iter().map(|s| s.to_string()).collect(),
        };
    }
    let detail = match message {
        Some(m) => format!("{} {}", status.as_u16(), m),
        None => status.to_string(),
    };
    Error::remote(service, detail)
}

fn error_message(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    let err = v.get("error")?;
    err.get("message")
        .and_then(Value::as_str)
        .or_else(|| err.as_str())
        .map(str::to_string)
}

fn is_scope_failure(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("insufficient authentication scopes")
        || lower.contains("access_token_scope_insufficient")
        || lower.contains("insufficientpermissions")
}

/// String field of a JSON object, or "".
pub(crate) fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Array field of a JSON object, or an empty slice.
pub(crate) fn array_field<'a>(v: &'a Value, key: &str) -> &'a [Value] {
    v.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Escape a value embedded in a Drive `q` string literal.
pub(crate) fn drive_quote(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

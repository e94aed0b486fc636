use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;
use workdesk_core::{Credential, Error, Result};

use crate::provider::CredentialProvider;

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const REVOKE_URI: &str = "https://oauth2.googleapis.com/revoke";
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;
const CONSENT_WAIT_SECS: u64 = 300;

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// OAuth client registration, as downloaded from the cloud console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Accepts both the `installed` and the `web` layout.
    pub fn parse(content: &str) -> Result<Self> {
        let file: ClientSecretsFile = serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid client secrets: {}", e)))?;
        file.installed.or(file.web).ok_or_else(|| {
            Error::Config("Client secrets have neither an 'installed' nor a 'web' section".to_string())
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Client secrets not found at {}. Download an OAuth desktop client from the cloud console and save it there.",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }
}

/// Token endpoint answer, success or error.
#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Installed-app OAuth flow against Google's endpoints: PKCE, loopback redirect.
pub struct GoogleOAuthProvider {
    secrets: ClientSecrets,
    client: Client,
    revoke_uri: String,
    consent_wait: Duration,
}

impl GoogleOAuthProvider {
    pub fn new(secrets: ClientSecrets, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            secrets,
            client,
            revoke_uri: REVOKE_URI.to_string(),
            consent_wait: Duration::from_secs(CONSENT_WAIT_SECS),
        })
    }

    pub fn from_file(path: &Path, timeout_secs: u64) -> Result<Self> {
        Self::new(ClientSecrets::from_file(path)?, timeout_secs)
    }

    pub fn consent_url(
        &self,
        redirect_uri: &str,
        scopes: &BTreeSet<String>,
        state: &str,
        code_challenge: &str,
    ) -> Result<String> {
        let scope = scopes.iter().cloned().collect::<Vec<_>>().join(" ");
        let url = url::Url::parse_with_params(
            &self.secrets.auth_uri,
            &[
                ("client_id", self.secrets.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("state", state),
                ("code_challenge", code_challenge),
                ("code_challenge_method", "S256"),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| Error::Config(format!("Invalid auth_uri '{}': {}", self.secrets.auth_uri, e)))?;
        Ok(url.to_string())
    }

    async fn exchange(
        &self,
        form: &[(&str, &str)],
        previous: Option<&Credential>,
        requested: &BTreeSet<String>,
    ) -> Result<Credential> {
        let resp = self
            .client
            .post(&self.secrets.token_uri)
            .form(form)
            .send()
            .await
            .map_err(|e| Error::AuthExpired(format!("token endpoint unreachable: {}", e)))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::AuthExpired(format!("token endpoint read failed: {}", e)))?;
        let body: TokenResponse = serde_json::from_str(&text).map_err(|_| {
            Error::AuthExpired(format!("token endpoint returned {}: {}", status, truncate(&text, 200)))
        })?;
        credential_from_token_response(body, previous, requested, Utc::now())
    }
}

#[async_trait]
impl CredentialProvider for GoogleOAuthProvider {
    async fn obtain(&self, scopes: &BTreeSet<String>) -> Result<Credential> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{}/", port);

        let verifier = new_code_verifier();
        let challenge = pkce_challenge(&verifier);
        let state = Uuid::new_v4().simple().to_string();
        let url = self.consent_url(&redirect_uri, scopes, &state, &challenge)?;

        println!("Open this URL in your browser to authorize workdesk:\n\n  {}\n", url);
        info!(port, scopes = scopes.len(), "Waiting for OAuth consent");

        let code = tokio::time::timeout(self.consent_wait, await_redirect(listener, state))
            .await
            .map_err(|_| Error::AuthExpired("timed out waiting for consent".to_string()))??;

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", self.secrets.client_id.as_str()),
            ("client_secret", self.secrets.client_secret.as_str()),
            ("code_verifier", verifier.as_str()),
        ];
        let credential = self.exchange(&form, None, scopes).await?;
        info!(expiry = %credential.expiry, "OAuth consent completed");
        Ok(credential)
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or_else(|| Error::AuthExpired("no refresh token".to_string()))?;
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.secrets.client_id.as_str()),
            ("client_secret", self.secrets.client_secret.as_str()),
        ];
        self.exchange(&form, Some(credential), &credential.granted_scopes)
            .await
    }

    async fn revoke(&self, credential: &Credential) -> Result<()> {
        let token = credential
            .refresh_token
            .as_deref()
            .unwrap_or(credential.access_token.as_str());
        let resp = self
            .client
            .post(&self.revoke_uri)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| Error::remote("oauth", e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::remote(
                "oauth",
                format!("revoke returned {}: {}", status, truncate(&text, 200)),
            ));
        }
        Ok(())
    }
}

fn new_code_verifier() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// S256 code challenge: base64url(sha256(verifier)) without padding.
pub fn pkce_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Extract the authorization code from the redirect's query parameters.
pub fn parse_redirect(query: &HashMap<String, String>, expected_state: &str) -> Result<String> {
    if let Some(reason) = query.get("error") {
        return Err(Error::AuthExpired(format!("consent denied: {}", reason)));
    }
    if query.get("state").map(String::as_str) != Some(expected_state) {
        return Err(Error::AuthExpired("state mismatch in redirect".to_string()));
    }
    query
        .get("code")
        .filter(|c| !c.is_empty())
        .cloned()
        .ok_or_else(|| Error::AuthExpired("redirect carried no authorization code".to_string()))
}

#[derive(Clone)]
struct RedirectState {
    expected_state: Arc<String>,
    outcome: Arc<Mutex<Option<oneshot::Sender<Result<String>>>>>,
}

/// GET / on the loopback listener: the browser lands here after consent.
async fn handle_redirect(
    State(state): State<RedirectState>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Html<&'static str>) {
    if query.is_empty() {
        return (StatusCode::NOT_FOUND, Html("<p>Not found</p>"));
    }
    let result = parse_redirect(&query, &state.expected_state);
    let page = match &result {
        Ok(_) => "<p>Authorization complete. You can close this window and return to workdesk.</p>",
        Err(_) => "<p>Authorization failed. Return to workdesk for details.</p>",
    };
    match state.outcome.lock().await.take() {
        Some(tx) => {
            let _ = tx.send(result);
        }
        None => debug!("Redirect already handled"),
    }
    (StatusCode::OK, Html(page))
}

/// Serve the redirect route on `listener` until the first redirect arrives.
async fn await_redirect(listener: TcpListener, expected_state: String) -> Result<String> {
    let (tx, rx) = oneshot::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let app = Router::new()
        .route("/", get(handle_redirect))
        .with_state(RedirectState {
            expected_state: Arc::new(expected_state),
            outcome: Arc::new(Mutex::new(Some(tx))),
        });

    tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await;
        if let Err(e) = served {
            warn!(error = %e, "Loopback listener failed");
        }
    });

    let outcome = rx
        .await
        .map_err(|_| Error::AuthExpired("loopback listener stopped before the redirect".to_string()));
    let _ = stop_tx.send(());
    outcome?
}

fn credential_from_token_response(
    resp: TokenResponse,
    previous: Option<&Credential>,
    requested: &BTreeSet<String>,
    now: DateTime<Utc>,
) -> Result<Credential> {
    if let Some(error) = resp.error {
        let detail = match resp.error_description {
            Some(desc) => format!("{}: {}", error, desc),
            None => error,
        };
        return Err(Error::AuthExpired(detail));
    }
    let access_token = resp
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::AuthExpired("token response carried no access_token".to_string()))?;
    let expires_in = resp.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);

    let refresh_token = resp
        .refresh_token
        .or_else(|| previous.and_then(|p| p.refresh_token.clone()));
    let granted_scopes = match resp.scope {
        Some(scope) => scope.split_whitespace().map(str::to_string).collect(),
        None => previous
            .map(|p| p.granted_scopes.clone())
            .unwrap_or_else(|| requested.clone()),
    };

    Ok(Credential {
        access_token,
        refresh_token,
        expiry: now + ChronoDuration::seconds(expires_in),
        granted_scopes,
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn provider() -> GoogleOAuthProvider {
        let secrets = ClientSecrets::parse(
            r#"{"installed":{"client_id":"cid.apps.googleusercontent.com","client_secret":"shh"}}"#,
        )
        .unwrap();
        GoogleOAuthProvider::new(secrets, 5).unwrap()
    }

    #[test]
    fn test_pkce_rfc7636_vector() {
        assert_eq!(
            pkce_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_code_verifier_length() {
        let v = new_code_verifier();
        assert!(v.len() >= 43 && v.len() <= 128);
        assert!(v.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_client_secrets_layouts() {
        let web = ClientSecrets::parse(r#"{"web":{"client_id":"w","client_secret":"s"}}"#).unwrap();
        assert_eq!(web.client_id, "w");
        assert_eq!(web.token_uri, DEFAULT_TOKEN_URI);

        let err = ClientSecrets::parse(r#"{"other":{}}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_client_secrets_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientSecrets::from_file(&dir.path().join("credentials.json")).unwrap_err();
        assert!(err.to_string().contains("credentials.json"));
    }

    #[test]
    fn test_consent_url_params() {
        let p = provider();
        let url = p
            .consent_url(
                "http://127.0.0.1:5000/",
                &scopes(&["https://www.googleapis.com/auth/drive", "https://www.googleapis.com/auth/tasks"]),
                "st4te",
                "ch4llenge",
            )
            .unwrap();
        let parsed = url::Url::parse(&url).unwrap();
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs["access_type"], "offline");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["state"], "st4te");
        assert_eq!(
            pairs["scope"],
            "https://www.googleapis.com/auth/drive https://www.googleapis.com/auth/tasks"
        );
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_parse_redirect_ok() {
        let code = parse_redirect(&query(&[("state", "abc"), ("code", "4/0Ax"), ("scope", "x")]), "abc").unwrap();
        assert_eq!(code, "4/0Ax");
    }

    #[test]
    fn test_parse_redirect_rejects_state_and_denial() {
        let err = parse_redirect(&query(&[("state", "evil"), ("code", "c")]), "abc").unwrap_err();
        assert!(err.to_string().contains("state mismatch"));

        let err = parse_redirect(&query(&[("error", "access_denied"), ("state", "abc")]), "abc").unwrap_err();
        assert!(err.to_string().contains("access_denied"));

        assert!(parse_redirect(&query(&[("state", "abc")]), "abc").is_err());
    }

    #[tokio::test]
    async fn test_loopback_redirect_delivers_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
        let waiting = tokio::spawn(await_redirect(listener, "abc".to_string()));
        let client = reqwest::Client::new();

        let favicon = client.get(format!("{}/favicon.ico", base)).send().await.unwrap();
        assert_eq!(favicon.status(), reqwest::StatusCode::NOT_FOUND);

        let page = client
            .get(format!("{}/?state=abc&code=4%2F0Ax", base))
            .send()
            .await
            .unwrap();
        assert!(page.status().is_success());
        assert!(page.text().await.unwrap().contains("Authorization complete"));
        assert_eq!(waiting.await.unwrap().unwrap(), "4/0Ax");
    }

    #[tokio::test]
    async fn test_loopback_redirect_reports_denial() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
        let waiting = tokio::spawn(await_redirect(listener, "abc".to_string()));

        let page = reqwest::get(format!("{}/?error=access_denied&state=abc", base))
            .await
            .unwrap();
        assert!(page.text().await.unwrap().contains("Authorization failed"));
        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::AuthExpired(ref d) if d.contains("access_denied")));
    }

    #[test]
    fn test_token_response_keeps_previous_refresh_and_scopes() {
        let now = Utc::now();
        let previous = Credential {
            access_token: "old".into(),
            refresh_token: Some("rt".into()),
            expiry: now,
            granted_scopes: scopes(&["a", "b"]),
        };
        let resp: TokenResponse =
            serde_json::from_str(r#"{"access_token":"new","expires_in":120,"token_type":"Bearer"}"#).unwrap();
        let cred = credential_from_token_response(resp, Some(&previous), &scopes(&["z"]), now).unwrap();
        assert_eq!(cred.access_token, "new");
        assert_eq!(cred.refresh_token.as_deref(), Some("rt"));
        assert_eq!(cred.granted_scopes, scopes(&["a", "b"]));
        assert_eq!(cred.expiry, now + ChronoDuration::seconds(120));
    }

    #[test]
    fn test_token_response_initial_grant() {
        let now = Utc::now();
        let resp: TokenResponse = serde_json::from_str(
            r#"{"access_token":"at","refresh_token":"rt","scope":"b a"}"#,
        )
        .unwrap();
        let cred = credential_from_token_response(resp, None, &scopes(&["a", "b", "c"]), now).unwrap();
        assert_eq!(cred.granted_scopes, scopes(&["a", "b"]));
        assert_eq!(cred.expiry, now + ChronoDuration::seconds(3600));
    }

    #[test]
    fn test_token_response_error() {
        let resp: TokenResponse = serde_json::from_str(
            r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
        )
        .unwrap();
        let err = credential_from_token_response(resp, None, &BTreeSet::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, Error::AuthExpired(ref d) if d.starts_with("invalid_grant")));
    }
}

use async_trait::async_trait;
use base64::alphabet::URL_SAFE;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde_json::{json, Value};
use workdesk_core::{Credential, Error, Result};

use crate::adapter::{
    slot, AdapterSettings, OperationShape, OperationSpec, ParamKind, ServiceAdapter,
    ServiceDescriptor,
};
use crate::http::{array_field, str_field, GoogleApiClient};
use crate::output::{ListItem, OperationOutput};
use crate::params::Params;
use crate::scopes;

const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const MAX_BODY_CHARS: usize = 2000;

/// Gmail bodies are base64url, with or without padding.
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor {
        service_id: "gmail",
        display_name: "Gmail",
        required_scopes: vec![scopes::GMAIL_MODIFY],
        keywords: &["gmail", "email", "emails", "mail", "inbox", "message", "messages"],
        operations: vec![
            OperationSpec::new("list", OperationShape::List, "List recent conversations")
                .synonyms(&["show", "recent", "check"])
                .optional(&[slot("query", ParamKind::Text)]),
            OperationSpec::new("unread", OperationShape::List, "List unread conversations")
                .synonyms(&["new mail", "new emails", "new messages"]),
            OperationSpec::new("search", OperationShape::List, "Search mail")
                .synonyms(&["find", "look for"])
                .required(&[slot("query", ParamKind::Text)]),
            OperationSpec::new("read", OperationShape::Record, "Read a conversation")
                .synonyms(&["open", "view"])
                .required(&[slot("message_id", ParamKind::Handle)]),
            OperationSpec::new("send", OperationShape::Ack, "Send an email")
                .synonyms(&["email to", "mail to", "write to"])
                .required(&[slot("to", ParamKind::Email), slot("subject", ParamKind::Text)])
                .optional(&[slot("body", ParamKind::Text)]),
            OperationSpec::new("trash", OperationShape::Ack, "Move a conversation to the trash")
                .synonyms(&["delete", "remove"])
                .required(&[slot("message_id", ParamKind::Handle)]),
            OperationSpec::new("labels", OperationShape::List, "List labels").synonyms(&["label"]),
        ],
    }
}

pub struct GmailAdapter {
    descriptor: ServiceDescriptor,
    api: GoogleApiClient,
    max_results: u32,
}

impl GmailAdapter {
    pub fn new(settings: &AdapterSettings) -> Result<Self> {
        let descriptor = descriptor();
        let api = GoogleApiClient::new("gmail", API_BASE, &descriptor.required_scopes, settings)?;
        Ok(Self {
            descriptor,
            api,
            max_results: settings.max_results,
        })
    }

    async fn threads(&self, credential: &Credential, query: Option<&str>) -> Result<OperationOutput> {
        let max = self.max_results.to_string();
        let mut request = self
            .api
            .get("/threads", credential)
            .query(&[("maxResults", max.as_str())]);
        if let Some(q) = query {
            request = request.query(&[("q", q)]);
        }
        let resp = self.api.send(request).await?;
        Ok(OperationOutput::list(parse_threads(&resp)))
    }
}

#[async_trait]
impl ServiceAdapter for GmailAdapter {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        operation: &str,
        credential: &Credential,
        params: &Params,
    ) -> Result<OperationOutput> {
        match operation {
            "list" => self.threads(credential, params.str("query")).await,
            "unread" => self.threads(credential, Some("is:unread")).await,
            "search" => self.threads(credential, Some(params.require("query")?)).await,
            "read" => {
                let id = params.require("message_id")?;
                let path = format!("/threads/{}", urlencoding::encode(id));
                let resp = self
                    .api
                    .send(self.api.get(&path, credential).query(&[("format", "full")]))
                    .await?;
                Ok(thread_record(&resp))
            }
            "send" => {
                let to = params.require("to")?;
                let subject = params.require("subject")?;
                let body = params.str("body").unwrap_or("");
                let raw = encode_message(to, subject, body);
                self.api
                    .send(
                        self.api
                            .post("/messages/send", credential)
                            .json(&json!({ "raw": raw })),
                    )
                    .await?;
                Ok(OperationOutput::ack(format!("Sent '{}' to {}", subject, to)))
            }
            "trash" => {
                let id = params.require("message_id")?;
                let path = format!("/threads/{}/trash", urlencoding::encode(id));
                self.api.send(self.api.post(&path, credential)).await?;
                Ok(OperationOutput::ack("Conversation moved to trash"))
            }
            "labels" => {
                let resp = self.api.send(self.api.get("/labels", credential)).await?;
                let items = array_field(&resp, "labels")
                    .iter()
                    .map(|l| {
                        ListItem::new(str_field(l, "id"), str_field(l, "name"))
                            .with_detail(str_field(l, "type").to_lowercase())
                    })
                    .collect();
                Ok(OperationOutput::list(items))
            }
            other => Err(Error::IntentUnresolved(format!("gmail has no operation '{}'", other))),
        }
    }
}

/// RFC 2822 message, base64url-encoded for `messages.send`.
fn encode_message(to: &str, subject: &str, body: &str) -> String {
    let message = format!(
        "To: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\nMIME-Version: 1.0\r\n\r\n{}",
        header_value(to),
        header_value(subject),
        body
    );
    URL_SAFE_NO_PAD.encode(message.as_bytes())
}

/// Header values stay on one line: CR, LF and other whitespace runs fold to a space.
fn header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_threads(resp: &Value) -> Vec<ListItem> {
    array_field(resp, "threads")
        .iter()
        .map(|t| {
            let snippet = html_unescape(str_field(t, "snippet"));
            let label = if snippet.is_empty() {
                "(no preview)".to_string()
            } else {
                shorten(&snippet, 80)
            };
            ListItem::new(str_field(t, "id"), label)
        })
        .collect()
}

fn thread_record(resp: &Value) -> OperationOutput {
    let messages = array_field(resp, "messages");
    let first = messages.first().cloned().unwrap_or(Value::Null);
    let last = messages.last().cloned().unwrap_or(Value::Null);
    let subject = header(&first, "Subject").unwrap_or("(no subject)");
    let body = last
        .get("payload")
        .and_then(plain_text)
        .unwrap_or_else(|| html_unescape(str_field(&last, "snippet")));

    OperationOutput::record(subject)
        .field_opt("From", header(&last, "From"))
        .field_opt("Date", header(&last, "Date"))
        .field("Messages", messages.len().to_string())
        .field("Body", shorten(body.trim(), MAX_BODY_CHARS))
        .build()
}

fn header<'a>(message: &'a Value, name: &str) -> Option<&'a str> {
    message
        .get("payload")
        .map(|p| array_field(p, "headers"))
        .unwrap_or(&[])
        .iter()
        .find(|h| str_field(h, "name").eq_ignore_ascii_case(name))
        .map(|h| str_field(h, "value"))
}

/// First `text/plain` part, searching nested multiparts depth-first.
fn plain_text(part: &Value) -> Option<String> {
    if str_field(part, "mimeType") == "text/plain" {
        let data = part.get("body").map(|b| str_field(b, "data")).unwrap_or("");
        if !data.is_empty() {
            let bytes = BODY_ENGINE.decode(data).ok()?;
            return Some(String::from_utf8_lossy(&bytes).into_owned());
        }
    }
    array_field(part, "parts").iter().find_map(plain_text)
}

fn html_unescape(s: &str) -> String {
    s.replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn shorten(s: &str, max: usize) -> String {
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

    #[test]
    fn test_descriptor() {
        let d = descriptor();
        let send = d.operation("send").unwrap();
        assert_eq!(send.slot_names(), vec!["to", "subject", "body"]);
        assert_eq!(d.operation("read").unwrap().shape, OperationShape::Record);
        assert_eq!(d.operations.len(), 7);
    }

    #[test]
    fn test_encode_message() {
        let raw = encode_message("a@b.com", "the meeting", "see you");
        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(raw).unwrap()).unwrap();
        assert!(decoded.starts_with("To: a@b.com\r\nSubject: the meeting\r\n"));
        assert!(decoded.ends_with("\r\n\r\nsee you"));
    }

    #[test]
    fn test_encode_message_folds_header_newlines() {
        let raw = encode_message("a@b.com", "hi\r\nBcc: evil@x.com", "body\nline two");
        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(raw).unwrap()).unwrap();
        let (head, body) = decoded.split_once("\r\n\r\n").unwrap();
        assert!(head.contains("\r\nSubject: hi Bcc: evil@x.com\r\n"));
        assert!(!head.lines().any(|l| l.starts_with("Bcc:")));
        assert_eq!(body, "body\nline two");
    }

    #[test]
    fn test_parse_threads() {
        let resp = json!({"threads": [
            {"id": "t1", "snippet": "Lunch &amp; learn"},
            {"id": "t2", "snippet": ""}
        ]});
        let items = parse_threads(&resp);
        assert_eq!(items[0].label, "Lunch & learn");
        assert_eq!(items[1].label, "(no preview)");
    }

    #[test]
    fn test_thread_record_decodes_plain_part() {
        let data = URL_SAFE_NO_PAD.encode("Hello there");
        let resp = json!({"id": "t1", "messages": [{
            "snippet": "Hello",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    {"name": "Subject", "value": "Greetings"},
                    {"name": "From", "value": "ann@example.com"}
                ],
                "parts": [
                    {"mimeType": "text/html", "body": {"data": "PGI-"}},
                    {"mimeType": "text/plain", "body": {"data": data}}
                ]
            }
        }]});
        match thread_record(&resp) {
            OperationOutput::Record { title, fields } => {
                assert_eq!(title, "Greetings");
                assert!(fields.contains(&("From".to_string(), "ann@example.com".to_string())));
                assert!(fields.contains(&("Body".to_string(), "Hello there".to_string())));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

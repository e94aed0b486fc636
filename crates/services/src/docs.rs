use async_trait::async_trait;
use serde_json::{json, Value};
use workdesk_core::{Credential, Error, Result};

use crate::adapter::{
    slot, AdapterSettings, OperationShape, OperationSpec, ParamKind, ServiceAdapter,
    ServiceDescriptor,
};
use crate::drive::{list_files, mime_query, DRIVE_API_BASE};
use crate::http::{array_field, str_field, GoogleApiClient};
use crate::output::OperationOutput;
use crate::params::Params;
use crate::scopes;

const API_BASE: &str = "https://docs.googleapis.com/v1";
const DOC_MIME: &str = "application/vnd.google-apps.document";
const MAX_CONTENT_CHARS: usize = 2000;

pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor {
        service_id: "docs",
        display_name: "Google Docs",
        required_scopes: vec![scopes::DOCUMENTS, scopes::DRIVE],
        keywords: &["doc", "docs", "document", "documents"],
        operations: vec![
            OperationSpec::new("list", OperationShape::List, "List documents").synonyms(&["show"]),
            OperationSpec::new("create", OperationShape::Record, "Create a document")
                .synonyms(&["new", "make", "start"])
                .required(&[slot("title", ParamKind::Text)]),
            OperationSpec::new("read", OperationShape::Record, "Read a document's text")
                .synonyms(&["open", "view"])
                .required(&[slot("document_id", ParamKind::Handle)]),
            OperationSpec::new("append", OperationShape::Ack, "Append text to a document")
                .synonyms(&["add text", "add to", "write"])
                .required(&[slot("document_id", ParamKind::Handle), slot("text", ParamKind::Text)]),
            OperationSpec::new("replace_text", OperationShape::Ack, "Replace every occurrence of a text")
                .synonyms(&["replace", "find and replace", "substitute"])
                .required(&[
                    slot("document_id", ParamKind::Handle),
                    slot("find", ParamKind::Text),
                    slot("replace", ParamKind::Text),
                ]),
        ],
    }
}

pub struct DocsAdapter {
    descriptor: ServiceDescriptor,
    api: GoogleApiClient,
    drive: GoogleApiClient,
    max_results: u32,
}

impl DocsAdapter {
    pub fn new(settings: &AdapterSettings) -> Result<Self> {
        let descriptor = descriptor();
        let api = GoogleApiClient::new("docs", API_BASE, &descriptor.required_scopes, settings)?;
        let drive = GoogleApiClient::new(
            "docs",
            DRIVE_API_BASE,
            &descriptor.required_scopes,
            &settings.drive(),
        )?;
        Ok(Self {
            descriptor,
            api,
            drive,
            max_results: settings.max_results,
        })
    }
}

#[async_trait]
impl ServiceAdapter for DocsAdapter {
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
            "list" => list_files(&self.drive, credential, self.max_results, &mime_query(DOC_MIME)).await,
            "create" => {
                let title = params.require("title")?;
                let resp = self
                    .api
                    .send(self.api.post("/documents", credential).json(&json!({ "title": title })))
                    .await?;
                let id = str_field(&resp, "documentId");
                Ok(OperationOutput::record(str_field(&resp, "title"))
                    .field("id", id)
                    .field("url", format!("https://docs.google.com/document/d/{}/edit", id))
                    .build())
            }
            "read" => {
                let id = params.require("document_id")?;
                let path = format!("/documents/{}", urlencoding::encode(id));
                let resp = self.api.send(self.api.get(&path, credential)).await?;
                let text = document_text(&resp);
                let shown: String = text.chars().take(MAX_CONTENT_CHARS).collect();
                Ok(OperationOutput::record(str_field(&resp, "title"))
                    .field("id", str_field(&resp, "documentId"))
                    .field("content", shown.trim_end())
                    .build())
            }
            "append" => {
                let id = params.require("document_id")?;
                let text = params.require("text")?;
                let path = format!("/documents/{}:batchUpdate", urlencoding::encode(id));
                self.api
                    .send(self.api.post(&path, credential).json(&append_request(text)))
                    .await?;
                Ok(OperationOutput::ack(format!(
                    "Appended {} characters",
                    text.chars().count()
                )))
            }
            "replace_text" => {
                let id = params.require("document_id")?;
                let find = params.require("find")?;
                let replace = params.require("replace")?;
                let path = format!("/documents/{}:batchUpdate", urlencoding::encode(id));
                let resp = self
                    .api
                    .send(self.api.post(&path, credential).json(&replace_request(find, replace)))
                    .await?;
                Ok(OperationOutput::ack(format!(
                    "Replaced {} occurrence(s) of '{}'",
                    occurrences_changed(&resp),
                    find
                )))
            }
            other => Err(Error::IntentUnresolved(format!("docs has no operation '{}'", other))),
        }
    }
}

/// Insert at the end of the body in a single request; no index lookup needed.
fn append_request(text: &str) -> Value {
    json!({
        "requests": [{
            "insertText": {
                "text": format!("\n{}", text),
                "endOfSegmentLocation": {}
            }
        }]
    })
}

fn replace_request(find: &str, replace: &str) -> Value {
    json!({
        "requests": [{
            "replaceAllText": {
                "containsText": { "text": find, "matchCase": true },
                "replaceText": replace
            }
        }]
    })
}

fn occurrences_changed(resp: &Value) -> u64 {
    array_field(resp, "replies")
        .first()
        .and_then(|r| r.get("replaceAllText"))
        .and_then(|r| r.get("occurrencesChanged"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

fn document_text(doc: &Value) -> String {
    let content = doc
        .get("body")
        .map(|b| array_field(b, "content"))
        .unwrap_or(&[]);
    let mut out = String::new();
    for element in content {
        let Some(paragraph) = element.get("paragraph") else {
            continue;
        };
        for run in array_field(paragraph, "elements") {
            if let Some(text_run) = run.get("textRun") {
                out.push_str(str_field(text_run, "content"));
            }
        }
    }
    out
}

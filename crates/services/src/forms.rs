use async_trait::async_trait;
use serde_json::{json, Value};
use workdesk_core::{Credential, Error, Result};

use crate::adapter::{
    slot, AdapterSettings, OperationShape, OperationSpec, ParamKind, ServiceAdapter,
    ServiceDescriptor,
};
use crate::drive::{list_files, mime_query, DRIVE_API_BASE};
use crate::http::{array_field, str_field, GoogleApiClient};
use crate::output::{ListItem, OperationOutput};
use crate::params::Params;
use crate::scopes;

const API_BASE: &str = "https://forms.googleapis.com/v1";
const FORM_MIME: &str = "application/vnd.google-apps.form";

pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor {
        service_id: "forms",
        display_name: "Google Forms",
        required_scopes: vec![scopes::FORMS_BODY, scopes::DRIVE],
        keywords: &["form", "forms", "survey", "surveys", "quiz", "questionnaire"],
        operations: vec![
            OperationSpec::new("list", OperationShape::List, "List forms").synonyms(&["show"]),
            OperationSpec::new("create", OperationShape::Record, "Create a form")
                .synonyms(&["new", "make"])
                .required(&[slot("title", ParamKind::Text)]),
            OperationSpec::new("responses", OperationShape::List, "List a form's responses")
                .synonyms(&["answers", "submissions", "results"])
                .required(&[slot("form_id", ParamKind::Handle)]),
            OperationSpec::new("add_question", OperationShape::Ack, "Add a short-answer question")
                .synonyms(&["add a question", "new question", "question"])
                .required(&[slot("form_id", ParamKind::Handle), slot("question", ParamKind::Text)]),
        ],
    }
}

pub struct FormsAdapter {
    descriptor: ServiceDescriptor,
    api: GoogleApiClient,
    drive: GoogleApiClient,
    max_results: u32,
}

impl FormsAdapter {
    pub fn new(settings: &AdapterSettings) -> Result<Self> {
        let descriptor = descriptor();
        let api = GoogleApiClient::new("forms", API_BASE, &descriptor.required_scopes, settings)?;
        let drive = GoogleApiClient::new(
            "forms",
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
impl ServiceAdapter for FormsAdapter {
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
            "list" => list_files(&self.drive, credential, self.max_results, &mime_query(FORM_MIME)).await,
            "create" => {
                let title = params.require("title")?;
                let resp = self
                    .api
                    .send(
                        self.api
                            .post("/forms", credential)
                            .json(&json!({ "info": { "title": title, "documentTitle": title } })),
                    )
                    .await?;
                let id = str_field(&resp, "formId");
                Ok(OperationOutput::record(title)
                    .field("id", id)
                    .field_opt("responder url", Some(str_field(&resp, "responderUri")))
                    .field("edit url", format!("https://docs.google.com/forms/d/{}/edit", id))
                    .build())
            }
            "responses" => {
                let id = params.require("form_id")?;
                let path = format!("/forms/{}/responses", urlencoding::encode(id));
                let resp = self.api.send(self.api.get(&path, credential)).await?;
                Ok(OperationOutput::list(parse_responses(&resp)))
            }
            "add_question" => {
                let id = params.require("form_id")?;
                let question = params.require("question")?;
                let path = format!("/forms/{}:batchUpdate", urlencoding::encode(id));
                self.api
                    .send(self.api.post(&path, credential).json(&question_request(question)))
                    .await?;
                Ok(OperationOutput::ack(format!("Added question '{}'", question)))
            }
            other => Err(Error::IntentUnresolved(format!("forms has no operation '{}'", other))),
        }
    }
}

fn question_request(question: &str) -> Value {
    json!({
        "requests": [{
            "createItem": {
                "item": {
                    "title": question,
                    "questionItem": {
                        "question": {
                            "required": false,
                            "textQuestion": { "paragraph": false }
                        }
                    }
                },
                "location": { "index": 0 }
            }
        }]
    })
}

/// One row per response: when it was submitted and its first text answer.
fn parse_responses(resp: &Value) -> Vec<ListItem> {
    array_field(resp, "responses")
        .iter()
        .map(|r| {
            let submitted = str_field(r, "lastSubmittedTime");
            let answers = r.get("answers").and_then(Value::as_object);
            let count = answers.map(|a| a.len()).unwrap_or(0);
            let first = answers
                .and_then(|a| a.values().next())
                .and_then(|a| a.get("textAnswers"))
                .map(|t| array_field(t, "answers"))
                .and_then(|list| list.first())
                .map(|v| str_field(v, "value"))
                .unwrap_or("");
            let label = if submitted.is_empty() {
                str_field(r, "responseId")
            } else {
                submitted
            };
            let detail = if first.is_empty() {
                format!("{} answer(s)", count)
            } else {
                format!("{} answer(s), first: {}", count, first)
            };
            ListItem::new(str_field(r, "responseId"), label).with_detail(detail)
        })
        .collect()
}

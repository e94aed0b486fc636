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

const API_BASE: &str = "https://slides.googleapis.com/v1";
const SLIDES_MIME: &str = "application/vnd.google-apps.presentation";
const LAYOUTS: [&str; 6] = [
    "BLANK",
    "TITLE",
    "TITLE_AND_BODY",
    "TITLE_ONLY",
    "SECTION_HEADER",
    "TITLE_AND_TWO_COLUMNS",
];

pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor {
        service_id: "slides",
        display_name: "Google Slides",
        required_scopes: vec![scopes::PRESENTATIONS, scopes::DRIVE],
        keywords: &["slides", "presentation", "presentations", "deck", "decks"],
        operations: vec![
            OperationSpec::new("list", OperationShape::List, "List presentations").synonyms(&["show"]),
            OperationSpec::new("create", OperationShape::Record, "Create a presentation")
                .synonyms(&["new", "make"])
                .required(&[slot("title", ParamKind::Text)]),
            OperationSpec::new("add_slide", OperationShape::Ack, "Add a slide to a presentation")
                .synonyms(&["new slide", "add a slide", "another slide"])
                .required(&[slot("presentation_id", ParamKind::Handle)])
                .optional(&[slot("layout", ParamKind::Text)]),
        ],
    }
}

pub struct SlidesAdapter {
    descriptor: ServiceDescriptor,
    api: GoogleApiClient,
    drive: GoogleApiClient,
    max_results: u32,
}

impl SlidesAdapter {
    pub fn new(settings: &AdapterSettings) -> Result<Self> {
        let descriptor = descriptor();
        let api = GoogleApiClient::new("slides", API_BASE, &descriptor.required_scopes, settings)?;
        let drive = GoogleApiClient::new(
            "slides",
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
impl ServiceAdapter for SlidesAdapter {
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
            "list" => {
                list_files(&self.drive, credential, self.max_results, &mime_query(SLIDES_MIME)).await
            }
            "create" => {
                let title = params.require("title")?;
                let resp = self
                    .api
                    .send(self.api.post("/presentations", credential).json(&json!({ "title": title })))
                    .await?;
                let id = str_field(&resp, "presentationId");
                Ok(OperationOutput::record(title)
                    .field("id", id)
                    .field("slides", array_field(&resp, "slides").len().to_string())
                    .field("url", format!("https://docs.google.com/presentation/d/{}/edit", id))
                    .build())
            }
            "add_slide" => {
                let id = params.require("presentation_id")?;
                let layout = normalize_layout(params.str("layout"))?;
                let path = format!("/presentations/{}:batchUpdate", urlencoding::encode(id));
                let resp = self
                    .api
                    .send(self.api.post(&path, credential).json(&create_slide_request(&layout)))
                    .await?;
                let object_id = resp
                    .get("replies")
                    .and_then(|r| r.get(0))
                    .and_then(|r| r.get("createSlide"))
                    .map(|c| str_field(c, "objectId"))
                    .unwrap_or("");
                Ok(OperationOutput::ack(format!(
                    "Added a {} slide{}",
                    layout,
                    if object_id.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", object_id)
                    }
                )))
            }
            other => Err(Error::IntentUnresolved(format!("slides has no operation '{}'", other))),
        }
    }
}

fn normalize_layout(layout: Option<&str>) -> Result<String> {
    let layout = layout
        .unwrap_or("BLANK")
        .trim()
        .to_uppercase()
        .replace([' ', '-'], "_");
    if LAYOUTS.contains(&layout.as_str()) {
        Ok(layout)
    } else {
        Err(Error::ParameterInvalid {
            slot: "layout".to_string(),
            reason: format!("'{}' is not one of {}", layout, LAYOUTS.join(", ")),
        })
    }
}

fn create_slide_request(layout: &str) -> Value {
    json!({
        "requests": [{
            "createSlide": {
                "slideLayoutReference": { "predefinedLayout": layout }
            }
        }]
    })
}

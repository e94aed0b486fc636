use async_trait::async_trait;
use reqwest::Method;
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

const API_BASE: &str = "https://sheets.googleapis.com/v4";
const SHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";
const DEFAULT_READ_RANGE: &str = "A1:Z50";
const DEFAULT_APPEND_RANGE: &str = "A1";

pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor {
        service_id: "sheets",
        display_name: "Google Sheets",
        required_scopes: vec![scopes::SPREADSHEETS, scopes::DRIVE],
        keywords: &["sheet", "sheets", "spreadsheet", "spreadsheets"],
        operations: vec![
            OperationSpec::new("list", OperationShape::List, "List spreadsheets").synonyms(&["show"]),
            OperationSpec::new("create", OperationShape::Record, "Create a spreadsheet")
                .synonyms(&["new", "make"])
                .required(&[slot("title", ParamKind::Text)]),
            OperationSpec::new("read", OperationShape::Record, "Read a range of cells")
                .synonyms(&["open", "view"])
                .required(&[slot("spreadsheet_id", ParamKind::Handle)])
                .optional(&[slot("range", ParamKind::Text)]),
            OperationSpec::new("append", OperationShape::Ack, "Append a row")
                .synonyms(&["add row", "add a row", "add", "write"])
                .required(&[
                    slot("spreadsheet_id", ParamKind::Handle),
                    slot("values", ParamKind::Values),
                ])
                .optional(&[slot("range", ParamKind::Text)]),
            OperationSpec::new("update", OperationShape::Ack, "Overwrite cells starting at a range")
                .synonyms(&["update", "overwrite", "set cells"])
                .required(&[
                    slot("spreadsheet_id", ParamKind::Handle),
                    slot("values", ParamKind::Values),
                ])
                .optional(&[slot("range", ParamKind::Text)]),
            OperationSpec::new("clear", OperationShape::Ack, "Clear the values in a range")
                .synonyms(&["clear", "clear cells", "wipe"])
                .required(&[slot("spreadsheet_id", ParamKind::Handle)])
                .optional(&[slot("range", ParamKind::Text)]),
        ],
    }
}

pub struct SheetsAdapter {
    descriptor: ServiceDescriptor,
    api: GoogleApiClient,
    drive: GoogleApiClient,
    max_results: u32,
}

impl SheetsAdapter {
    pub fn new(settings: &AdapterSettings) -> Result<Self> {
        let descriptor = descriptor();
        let api = GoogleApiClient::new("sheets", API_BASE, &descriptor.required_scopes, settings)?;
        let drive = GoogleApiClient::new(
            "sheets",
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
impl ServiceAdapter for SheetsAdapter {
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
                list_files(&self.drive, credential, self.max_results, &mime_query(SHEET_MIME)).await
            }
            "create" => {
                let title = params.require("title")?;
                let resp = self
                    .api
                    .send(
                        self.api
                            .post("/spreadsheets", credential)
                            .json(&json!({ "properties": { "title": title } })),
                    )
                    .await?;
                let name = resp
                    .get("properties")
                    .map(|p| str_field(p, "title"))
                    .unwrap_or(title);
                Ok(OperationOutput::record(name)
                    .field("id", str_field(&resp, "spreadsheetId"))
                    .field("url", str_field(&resp, "spreadsheetUrl"))
                    .build())
            }
            "read" => {
                let id = params.require("spreadsheet_id")?;
                let range = params.str("range").unwrap_or(DEFAULT_READ_RANGE);
                let resp = self
                    .api
                    .send(self.api.get(&values_path(id, range, ""), credential))
                    .await?;
                Ok(values_record(&resp, range))
            }
            "append" => {
                let id = params.require("spreadsheet_id")?;
                let values = params.list("values");
                let range = params.str("range").unwrap_or(DEFAULT_APPEND_RANGE);
                let resp = self
                    .api
                    .send(
                        self.api
                            .post(&values_path(id, range, ":append"), credential)
                            .query(&[("valueInputOption", "USER_ENTERED")])
                            .json(&json!({ "values": [values] })),
                    )
                    .await?;
                let updated = resp
                    .get("updates")
                    .map(|u| str_field(u, "updatedRange"))
                    .unwrap_or("");
                let target = if updated.is_empty() { range } else { updated };
                Ok(OperationOutput::ack(format!(
                    "Appended {} value(s) to {}",
                    values.len(),
                    target
                )))
            }
            "update" => {
                let id = params.require("spreadsheet_id")?;
                let values = params.list("values");
                let range = params.str("range").unwrap_or(DEFAULT_APPEND_RANGE);
                let resp = self
                    .api
                    .send(
                        self.api
                            .request(Method::PUT, &values_path(id, range, ""), credential)
                            .query(&[("valueInputOption", "USER_ENTERED")])
                            .json(&json!({ "values": [values] })),
                    )
                    .await?;
                let updated = match str_field(&resp, "updatedRange") {
                    "" => range,
                    r => r,
                };
                Ok(OperationOutput::ack(format!(
                    "Updated {} cell(s) in {}",
                    resp.get("updatedCells").and_then(Value::as_u64).unwrap_or(values.len() as u64),
                    updated
                )))
            }
            "clear" => {
                let id = params.require("spreadsheet_id")?;
                let range = params.str("range").unwrap_or(DEFAULT_READ_RANGE);
                let resp = self
                    .api
                    .send(
                        self.api
                            .post(&values_path(id, range, ":clear"), credential)
                            .json(&json!({})),
                    )
                    .await?;
                let cleared = match str_field(&resp, "clearedRange") {
                    "" => range,
                    r => r,
                };
                Ok(OperationOutput::ack(format!("Cleared {}", cleared)))
            }
            other => Err(Error::IntentUnresolved(format!("sheets has no operation '{}'", other))),
        }
    }
}

fn values_path(id: &str, range: &str, suffix: &str) -> String {
    format!(
        "/spreadsheets/{}/values/{}{}",
        urlencoding::encode(id),
        urlencoding::encode(range),
        suffix
    )
}

fn cell_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn values_record(resp: &Value, requested: &str) -> OperationOutput {
    let range = match str_field(resp, "range") {
        "" => requested,
        r => r,
    };
    let rows = array_field(resp, "values");
    if rows.is_empty() {
        return OperationOutput::record(range).field("rows", "0").build();
    }
    rows.iter()
        .enumerate()
        .fold(OperationOutput::record(range), |rec, (i, row)| {
            let cells: Vec<String> = row
                .as_array()
                .map(|r| r.iter().map(cell_text).collect())
                .unwrap_or_default();
            rec.field(&format!("Row {}", i + 1), cells.join(" | "))
        })
        .build()
}

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, SecondsFormat, Utc};
use reqwest::Method;
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

const API_BASE: &str = "https://www.googleapis.com/calendar/v3";
const EVENTS_PATH: &str = "/calendars/primary/events";

pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor {
        service_id: "calendar",
        display_name: "Google Calendar",
        required_scopes: vec![scopes::CALENDAR],
        keywords: &["calendar", "event", "events", "appointment", "appointments", "agenda"],
        operations: vec![
            OperationSpec::new("list", OperationShape::List, "List upcoming events")
                .synonyms(&["show", "upcoming", "what's on", "whats on"])
                .optional(&[slot("max_results", ParamKind::Text)]),
            OperationSpec::new("create", OperationShape::Ack, "Create an all-day event")
                .synonyms(&["add", "schedule", "book", "new event"])
                .required(&[slot("title", ParamKind::Text), slot("date", ParamKind::Date)])
                .optional(&[slot("end_date", ParamKind::Date)]),
            OperationSpec::new("delete", OperationShape::Ack, "Delete an event")
                .synonyms(&["remove", "cancel"])
                .required(&[slot("event_id", ParamKind::Handle)]),
        ],
    }
}

pub struct CalendarAdapter {
    descriptor: ServiceDescriptor,
    api: GoogleApiClient,
    max_results: u32,
}

impl CalendarAdapter {
    pub fn new(settings: &AdapterSettings) -> Result<Self> {
        let descriptor = descriptor();
        let api = GoogleApiClient::new("calendar", API_BASE, &descriptor.required_scopes, settings)?;
        Ok(Self {
            descriptor,
            api,
            max_results: settings.max_results,
        })
    }
}

#[async_trait]
impl ServiceAdapter for CalendarAdapter {
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
                let max = params.u32_or("max_results", self.max_results)?.to_string();
                let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
                let resp = self
                    .api
                    .send(self.api.get(EVENTS_PATH, credential).query(&[
                        ("timeMin", now.as_str()),
                        ("maxResults", max.as_str()),
                        ("singleEvents", "true"),
                        ("orderBy", "startTime"),
                    ]))
                    .await?;
                Ok(OperationOutput::list(parse_events(&resp)))
            }
            "create" => {
                let title = params.require("title")?;
                let date = params.require("date")?;
                let body = event_body(title, date, params.str("end_date"))?;
                self.api
                    .send(self.api.post(EVENTS_PATH, credential).json(&body))
                    .await?;
                Ok(OperationOutput::ack(format!("Created '{}' for {}", title, date)))
            }
            "delete" => {
                let event_id = params.require("event_id")?;
                let path = format!("{}/{}", EVENTS_PATH, urlencoding::encode(event_id));
                self.api
                    .send(self.api.request(Method::DELETE, &path, credential))
                    .await?;
                Ok(OperationOutput::ack("Event deleted"))
            }
            other => Err(Error::IntentUnresolved(format!(
                "calendar has no operation '{}'",
                other
            ))),
        }
    }
}

/// All-day event from `date` through `end_date` inclusive. The API's end date is exclusive.
fn event_body(title: &str, date: &str, end_date: Option<&str>) -> Result<Value> {
    let start = parse_day("date", date)?;
    let last = match end_date {
        Some(d) => parse_day("end_date", d)?,
        None => start,
    };
    if last < start {
        return Err(Error::ParameterInvalid {
            slot: "end_date".to_string(),
            reason: "ends before it starts".to_string(),
        });
    }
    let end = last + Duration::days(1);
    Ok(json!({
        "summary": title,
        "start": { "date": start.format("%Y-%m-%d").to_string() },
        "end": { "date": end.format("%Y-%m-%d").to_string() },
    }))
}

fn parse_day(slot: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| Error::ParameterInvalid {
        slot: slot.to_string(),
        reason: format!("'{}' is not a date", value),
    })
}

fn parse_events(resp: &Value) -> Vec<ListItem> {
    array_field(resp, "items")
        .iter()
        .map(|event| {
            let start = event.get("start").cloned().unwrap_or(Value::Null);
            let when = match str_field(&start, "dateTime") {
                "" => str_field(&start, "date"),
                dt => dt,
            };
            let summary = match str_field(event, "summary") {
                "" => "(no title)",
                s => s,
            };
            ListItem::new(str_field(event, "id"), summary).with_detail(when.get(..10).unwrap_or(when))
        })
        .collect()
}

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};
use workdesk_core::{Credential, Error, Result};

use crate::adapter::{
    slot, AdapterSettings, OperationShape, OperationSpec, ParamKind, ServiceAdapter,
    ServiceDescriptor,
};
use crate::http::{array_field, str_field, GoogleApiClient};
use crate::output::{ListItem, OperationOutput};
use crate::params::Params;
use crate::scopes;

const API_BASE: &str = "https://tasks.googleapis.com/tasks/v1";
const DEFAULT_LIST: &str = "/lists/@default";

pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor {
        service_id: "tasks",
        display_name: "Google Tasks",
        required_scopes: vec![scopes::TASKS],
        keywords: &["task", "tasks", "todo", "todos", "reminder", "reminders"],
        operations: vec![
            OperationSpec::new("list", OperationShape::List, "List open tasks")
                .synonyms(&["show", "pending", "open"]),
            OperationSpec::new("lists", OperationShape::List, "List task lists")
                .synonyms(&["task lists", "my lists"]),
            OperationSpec::new("create", OperationShape::Ack, "Add a task")
                .synonyms(&["add", "new", "remind me"])
                .required(&[slot("title", ParamKind::Text)])
                .optional(&[slot("due", ParamKind::Date), slot("notes", ParamKind::Text)]),
            OperationSpec::new("complete", OperationShape::Ack, "Mark a task completed")
                .synonyms(&["done", "finish", "mark done", "check off"])
                .required(&[slot("task_id", ParamKind::Handle)]),
            OperationSpec::new("delete", OperationShape::Ack, "Delete a task")
                .synonyms(&["remove"])
                .required(&[slot("task_id", ParamKind::Handle)]),
            OperationSpec::new("clear_completed", OperationShape::Ack, "Hide completed tasks")
                .synonyms(&["clear", "clean up"]),
        ],
    }
}

pub struct TasksAdapter {
    descriptor: ServiceDescriptor,
    api: GoogleApiClient,
    max_results: u32,
}

impl TasksAdapter {
    pub fn new(settings: &AdapterSettings) -> Result<Self> {
        let descriptor = descriptor();
        let api = GoogleApiClient::new("tasks", API_BASE, &descriptor.required_scopes, settings)?;
        Ok(Self {
            descriptor,
            api,
            max_results: settings.max_results,
        })
    }
}

#[async_trait]
impl ServiceAdapter for TasksAdapter {
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
                let max = self.max_results.to_string();
                let path = format!("{}/tasks", DEFAULT_LIST);
                let resp = self
                    .api
                    .send(self.api.get(&path, credential).query(&[
                        ("showCompleted", "false"),
                        ("maxResults", max.as_str()),
                    ]))
                    .await?;
                Ok(OperationOutput::list(parse_tasks(&resp)))
            }
            "lists" => {
                let resp = self.api.send(self.api.get("/users/@me/lists", credential)).await?;
                let items = array_field(&resp, "items")
                    .iter()
                    .map(|l| ListItem::new(str_field(l, "id"), str_field(l, "title")))
                    .collect();
                Ok(OperationOutput::list(items))
            }
            "create" => {
                let title = params.require("title")?;
                let body = task_body(title, params.str("due"), params.str("notes"));
                let path = format!("{}/tasks", DEFAULT_LIST);
                self.api
                    .send(self.api.post(&path, credential).json(&body))
                    .await?;
                Ok(OperationOutput::ack(match params.str("due") {
                    Some(due) => format!("Added task '{}' due {}", title, due),
                    None => format!("Added task '{}'", title),
                }))
            }
            "complete" => {
                let path = task_path(params.require("task_id")?);
                let resp = self
                    .api
                    .send(
                        self.api
                            .request(Method::PATCH, &path, credential)
                            .json(&json!({ "status": "completed" })),
                    )
                    .await?;
                Ok(OperationOutput::ack(format!(
                    "Completed '{}'",
                    str_field(&resp, "title")
                )))
            }
            "delete" => {
                let path = task_path(params.require("task_id")?);
                self.api
                    .send(self.api.request(Method::DELETE, &path, credential))
                    .await?;
                Ok(OperationOutput::ack("Task deleted"))
            }
            "clear_completed" => {
                let path = format!("{}/clear", DEFAULT_LIST);
                self.api.send(self.api.post(&path, credential)).await?;
                Ok(OperationOutput::ack("Cleared completed tasks"))
            }
            other => Err(Error::IntentUnresolved(format!("tasks has no operation '{}'", other))),
        }
    }
}

fn task_path(task_id: &str) -> String {
    format!("{}/tasks/{}", DEFAULT_LIST, urlencoding::encode(task_id))
}

/// `due` is a `YYYY-MM-DD` date; the API wants an RFC 3339 timestamp.
fn task_body(title: &str, due: Option<&str>, notes: Option<&str>) -> Value {
    let mut body = Map::new();
    body.insert("title".into(), json!(title));
    if let Some(due) = due {
        body.insert("due".into(), json!(format!("{}T00:00:00.000Z", due)));
    }
    if let Some(notes) = notes {
        body.insert("notes".into(), json!(notes));
    }
    Value::Object(body)
}

fn parse_tasks(resp: &Value) -> Vec<ListItem> {
    array_field(resp, "items")
        .iter()
        .map(|t| {
            let due = str_field(t, "due");
            let label = match str_field(t, "title") {
                "" => "(untitled)",
                title => title,
            };
            let detail = if due.is_empty() {
                String::new()
            } else {
                format!("due {}", due.get(..10).unwrap_or(due))
            };
            ListItem::new(str_field(t, "id"), label).with_detail(detail)
        })
        .collect()
}

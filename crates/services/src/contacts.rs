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

const API_BASE: &str = "https://people.googleapis.com/v1";
const PERSON_FIELDS: &str = "names,emailAddresses,phoneNumbers";

pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor {
        service_id: "contacts",
        display_name: "Google Contacts",
        required_scopes: vec![scopes::CONTACTS],
        keywords: &["contact", "contacts", "people", "person", "address book"],
        operations: vec![
            OperationSpec::new("list", OperationShape::List, "List contacts").synonyms(&["show"]),
            OperationSpec::new("search", OperationShape::List, "Search contacts")
                .synonyms(&["find", "look up", "lookup"])
                .required(&[slot("query", ParamKind::Text)]),
            OperationSpec::new("create", OperationShape::Ack, "Add a contact")
                .synonyms(&["add", "new", "save"])
                .required(&[slot("name", ParamKind::Text)])
                .optional(&[slot("email", ParamKind::Email), slot("phone", ParamKind::Text)]),
            OperationSpec::new("delete", OperationShape::Ack, "Delete a contact")
                .synonyms(&["remove"])
                .required(&[slot("contact_id", ParamKind::Handle)]),
        ],
    }
}

pub struct ContactsAdapter {
    descriptor: ServiceDescriptor,
    api: GoogleApiClient,
    max_results: u32,
}

impl ContactsAdapter {
    pub fn new(settings: &AdapterSettings) -> Result<Self> {
        let descriptor = descriptor();
        let api = GoogleApiClient::new("contacts", API_BASE, &descriptor.required_scopes, settings)?;
        Ok(Self {
            descriptor,
            api,
            max_results: settings.max_results,
        })
    }
}

#[async_trait]
impl ServiceAdapter for ContactsAdapter {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        operation: &str,
        credential: &Credential,
        params: &Params,
    ) -> Result<OperationOutput> {
        let page_size = self.max_results.to_string();
        match operation {
            "list" => {
                let resp = self
                    .api
                    .send(self.api.get("/people/me/connections", credential).query(&[
                        ("personFields", PERSON_FIELDS),
                        ("pageSize", page_size.as_str()),
                        ("sortOrder", "LAST_MODIFIED_DESCENDING"),
                    ]))
                    .await?;
                let items = array_field(&resp, "connections")
                    .iter()
                    .map(person_item)
                    .collect();
                Ok(OperationOutput::list(items))
            }
            "search" => {
                let query = params.require("query")?;
                let resp = self
                    .api
                    .send(self.api.get("/people:searchContacts", credential).query(&[
                        ("query", query),
                        ("readMask", PERSON_FIELDS),
                        ("pageSize", page_size.as_str()),
                    ]))
                    .await?;
                let items = array_field(&resp, "results")
                    .iter()
                    .filter_map(|r| r.get("person"))
                    .map(person_item)
                    .collect();
                Ok(OperationOutput::list(items))
            }
            "create" => {
                let name = params.require("name")?;
                let body = person_body(name, params.str("email"), params.str("phone"));
                self.api
                    .send(self.api.post("/people:createContact", credential).json(&body))
                    .await?;
                Ok(OperationOutput::ack(format!("Added contact '{}'", name)))
            }
            "delete" => {
                let resource = resource_name(params.require("contact_id")?);
                let path = format!("/{}:deleteContact", resource);
                self.api
                    .send(self.api.request(Method::DELETE, &path, credential))
                    .await?;
                Ok(OperationOutput::ack("Contact deleted"))
            }
            other => Err(Error::IntentUnresolved(format!("contacts has no operation '{}'", other))),
        }
    }
}

fn resource_name(contact_id: &str) -> String {
    if contact_id.starts_with("people/") {
        contact_id.to_string()
    } else {
        format!("people/{}", contact_id)
    }
}

fn first_value<'a>(person: &'a Value, field: &str, key: &str) -> &'a str {
    array_field(person, field)
        .first()
        .map(|v| str_field(v, key))
        .unwrap_or("")
}

fn person_item(person: &Value) -> ListItem {
    let name = match first_value(person, "names", "displayName") {
        "" => "(no name)",
        n => n,
    };
    let detail = [
        first_value(person, "emailAddresses", "value"),
        first_value(person, "phoneNumbers", "value"),
    ]
    .iter()
    .filter(|s| !s.is_empty())
    .copied()
    .collect::<Vec<_>>()
    .join(", ");
    ListItem::new(str_field(person, "resourceName"), name).with_detail(detail)
}

/// First word is the given name, the rest the family name.
fn person_body(name: &str, email: Option<&str>, phone: Option<&str>) -> Value {
    let mut parts = name.trim().splitn(2, ' ');
    let given = parts.next().unwrap_or("");
    let family = parts.next().unwrap_or("").trim();
    let mut body = Map::new();
    body.insert("names".into(), json!([{ "givenName": given, "familyName": family }]));
    if let Some(email) = email {
        body.insert("emailAddresses".into(), json!([{ "value": email }]));
    }
    if let Some(phone) = phone {
        body.insert("phoneNumbers".into(), json!([{ "value": phone }]));
    }
    Value::Object(body)
}

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use workdesk_core::{Credential, Error, Result};

use crate::adapter::{
    slot, AdapterSettings, OperationShape, OperationSpec, ParamKind, ServiceAdapter,
    ServiceDescriptor,
};
use crate::http::{array_field, drive_quote, str_field, GoogleApiClient};
use crate::output::{ListItem, OperationOutput};
use crate::params::Params;
use crate::scopes;

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const FILE_FIELDS: &str = "files(id,name,mimeType,modifiedTime)";
const SHARE_ROLES: [&str; 3] = ["reader", "commenter", "writer"];

pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor {
        service_id: "drive",
        display_name: "Google Drive",
        required_scopes: vec![scopes::DRIVE],
        keywords: &["drive", "file", "files", "folder", "folders"],
        operations: vec![
            OperationSpec::new("list", OperationShape::List, "List recent files")
                .synonyms(&["show", "my files", "recent files"]),
            OperationSpec::new("search", OperationShape::List, "Find files by name")
                .synonyms(&["find", "look for"])
                .required(&[slot("query", ParamKind::Text)]),
            OperationSpec::new("create_folder", OperationShape::Ack, "Create a folder")
                .synonyms(&["new folder", "make folder", "make a folder", "create a folder", "mkdir"])
                .required(&[slot("name", ParamKind::Text)]),
            OperationSpec::new("upload", OperationShape::Ack, "Upload a local file")
                .synonyms(&["put"])
                .required(&[slot("path", ParamKind::Text)]),
            OperationSpec::new("download", OperationShape::Ack, "Save a file's content locally")
                .synonyms(&["download", "fetch"])
                .required(&[slot("file_id", ParamKind::Handle)])
                .optional(&[slot("path", ParamKind::Text)]),
            OperationSpec::new("share", OperationShape::Ack, "Share a file with someone")
                .synonyms(&["give access", "grant access"])
                .required(&[slot("file_id", ParamKind::Handle), slot("email", ParamKind::Email)])
                .optional(&[slot("role", ParamKind::Text)]),
            OperationSpec::new("delete", OperationShape::Ack, "Move a file to the trash")
                .synonyms(&["remove", "trash"])
                .required(&[slot("file_id", ParamKind::Handle)]),
        ],
    }
}

pub struct DriveAdapter {
    descriptor: ServiceDescriptor,
    api: GoogleApiClient,
    upload_base: String,
    max_results: u32,
}

impl DriveAdapter {
    pub fn new(settings: &AdapterSettings) -> Result<Self> {
        let descriptor = descriptor();
        let api = GoogleApiClient::new(
            "drive",
            DRIVE_API_BASE,
            &descriptor.required_scopes,
            settings,
        )?;
        let upload_base = match &settings.api_base {
            Some(base) => format!("{}/upload", base),
            None => UPLOAD_BASE.to_string(),
        };
        Ok(Self {
            descriptor,
            api,
            upload_base,
            max_results: settings.max_results,
        })
    }

    async fn upload(&self, credential: &Credential, path: &str) -> Result<OperationOutput> {
        let path_ref = Path::new(path);
        let content = tokio::fs::read(path_ref).await.map_err(|e| Error::ParameterInvalid {
            slot: "path".to_string(),
            reason: format!("cannot read '{}': {}", path, e),
        })?;
        let name = path_ref
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        let mime = mime_guess::from_path(path_ref).first_or_octet_stream();

        let boundary = format!("workdesk-{}", Uuid::new_v4().simple());
        let metadata = json!({ "name": name });
        let body = multipart_related(&boundary, &metadata, mime.essence_str(), &content);

        let url = format!("{}/files?uploadType=multipart&fields=id,name", self.upload_base);
        let resp = self
            .api
            .send(
                self.api
                    .request_url(Method::POST, &url, credential)
                    .header(
                        reqwest::header::CONTENT_TYPE,
                        format!("multipart/related; boundary={}", boundary),
                    )
                    .body(body),
            )
            .await?;
        Ok(OperationOutput::ack(format!(
            "Uploaded '{}' ({})",
            str_field(&resp, "name"),
            str_field(&resp, "id")
        )))
    }
}

#[async_trait]
impl ServiceAdapter for DriveAdapter {
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
            "list" => list_files(&self.api, credential, self.max_results, "trashed=false").await,
            "search" => {
                let q = format!(
                    "name contains '{}' and trashed=false",
                    drive_quote(params.require("query")?)
                );
                list_files(&self.api, credential, self.max_results, &q).await
            }
            "create_folder" => {
                let name = params.require("name")?;
                let resp = self
                    .api
                    .send(
                        self.api
                            .post("/files", credential)
                            .query(&[("fields", "id,name")])
                            .json(&json!({ "name": name, "mimeType": FOLDER_MIME })),
                    )
                    .await?;
                Ok(OperationOutput::ack(format!(
                    "Created folder '{}' ({})",
                    name,
                    str_field(&resp, "id")
                )))
            }
            "upload" => self.upload(credential, params.require("path")?).await,
            "download" => {
                let file_id = params.require("file_id")?;
                let target = download_target(file_id, params.str("path"));
                let path = format!("/files/{}", urlencoding::encode(file_id));
                let content = self
                    .api
                    .send_bytes(self.api.get(&path, credential).query(&[("alt", "media")]))
                    .await?;
                tokio::fs::write(&target, &content)
                    .await
                    .map_err(|e| Error::ParameterInvalid {
                        slot: "path".to_string(),
                        reason: format!("cannot write '{}': {}", target.display(), e),
                    })?;
                Ok(OperationOutput::ack(format!(
                    "Saved {} bytes to {}",
                    content.len(),
                    target.display()
                )))
            }
            "share" => {
                let file_id = params.require("file_id")?;
                let email = params.require("email")?;
                let role = params.str("role").unwrap_or("reader").to_lowercase();
                if !SHARE_ROLES.contains(&role.as_str()) {
                    return Err(Error::ParameterInvalid {
                        slot: "role".to_string(),
                        reason: format!("'{}' is not one of {}", role, SHARE_ROLES.join(", ")),
                    });
                }
                let path = format!("/files/{}/permissions", urlencoding::encode(file_id));
                self.api
                    .send(
                        self.api
                            .post(&path, credential)
                            .query(&[("sendNotificationEmail", "true")])
                            .json(&json!({ "type": "user", "role": role, "emailAddress": email })),
                    )
                    .await?;
                Ok(OperationOutput::ack(format!("Shared with {} as {}", email, role)))
            }
            "delete" => {
                let file_id = params.require("file_id")?;
                let path = format!("/files/{}", urlencoding::encode(file_id));
                self.api
                    .send(
                        self.api
                            .request(Method::PATCH, &path, credential)
                            .json(&json!({ "trashed": true })),
                    )
                    .await?;
                Ok(OperationOutput::ack("Moved to trash"))
            }
            other => Err(Error::IntentUnresolved(format!("drive has no operation '{}'", other))),
        }
    }
}

/// Where a download lands: the given file, inside the given directory, or
/// the working directory, named after the file id when no name is given.
fn download_target(file_id: &str, path: Option<&str>) -> PathBuf {
    match path {
        Some(p) if Path::new(p).is_dir() => Path::new(p).join(file_id),
        Some(p) => PathBuf::from(p),
        None => PathBuf::from(file_id),
    }
}

/// One `files.list` call with the given query; shared by the services that
/// keep their documents in Drive.
pub(crate) async fn list_files(
    api: &GoogleApiClient,
    credential: &Credential,
    max_results: u32,
    q: &str,
) -> Result<OperationOutput> {
    let page_size = max_results.to_string();
    let resp = api
        .send(api.get("/files", credential).query(&[
            ("q", q),
            ("pageSize", page_size.as_str()),
            ("orderBy", "modifiedTime desc"),
            ("fields", FILE_FIELDS),
        ]))
        .await?;
    Ok(OperationOutput::list(parse_files(&resp)))
}

pub(crate) fn mime_query(mime: &str) -> String {
    format!("mimeType='{}' and trashed=false", mime)
}

pub(crate) fn parse_files(resp: &Value) -> Vec<ListItem> {
    array_field(resp, "files")
        .iter()
        .map(|f| {
            let modified = str_field(f, "modifiedTime");
            ListItem::new(str_field(f, "id"), str_field(f, "name"))
                .with_detail(modified.get(..10).unwrap_or(modified))
        })
        .collect()
}

fn multipart_related(boundary: &str, metadata: &Value, mime: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 256);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n--{b}\r\nContent-Type: {t}\r\n\r\n",
            b = boundary,
            m = metadata,
            t = mime
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor() {
        let d = descriptor();
        assert_eq!(d.service_id, "drive");
        assert_eq!(d.operations.len(), 7);
        assert_eq!(d.operation("download").unwrap().slot_names(), vec!["file_id", "path"]);
        let share = d.operation("share").unwrap();
        assert_eq!(share.slot_names(), vec!["file_id", "email", "role"]);
        assert_eq!(d.operation("list").unwrap().shape, OperationShape::List);
    }

    #[test]
    fn test_parse_files() {
        let resp = json!({"files": [
            {"id": "1a", "name": "Budget", "mimeType": "x", "modifiedTime": "2026-01-02T03:04:05.000Z"},
            {"id": "2b", "name": "Notes"}
        ]});
        let items = parse_files(&resp);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].detail.as_deref(), Some("2026-01-02"));
        assert_eq!(items[1].detail, None);
        assert!(parse_files(&json!({})).is_empty());
    }

    #[test]
    fn test_multipart_related_layout() {
        let body = multipart_related("B", &json!({"name": "a.txt"}), "text/plain", b"hello");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--B\r\nContent-Type: application/json"));
        assert!(text.contains("{\"name\":\"a.txt\"}"));
        assert!(text.contains("Content-Type: text/plain\r\n\r\nhello\r\n--B--"));
    }

    #[tokio::test]
    async fn test_upload_missing_file_is_invalid_param() {
        let adapter = DriveAdapter::new(&AdapterSettings::default()).unwrap();
        let credential = Credential {
            access_token: "t".into(),
            refresh_token: None,
            expiry: chrono::Utc::now(),
            granted_scopes: Default::default(),
        };
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");
        let params = Params::from([("path", json!(missing.to_string_lossy()))]);
        let err = adapter.invoke("upload", &credential, &params).await.unwrap_err();
        assert!(matches!(err, Error::ParameterInvalid { ref slot, .. } if slot == "path"));
    }

    #[test]
    fn test_download_target() {
        let dir = tempfile::tempdir().unwrap();
        let in_dir = download_target("f1", Some(dir.path().to_str().unwrap()));
        assert_eq!(in_dir, dir.path().join("f1"));
        assert_eq!(download_target("f1", Some("out/report.pdf")), PathBuf::from("out/report.pdf"));
        assert_eq!(download_target("f1", None), PathBuf::from("f1"));
    }

    #[tokio::test]
    async fn test_download_writes_media() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap();
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello")
                .await;
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });

        let adapter = DriveAdapter::new(&AdapterSettings {
            api_base: Some(base),
            timeout_secs: 5,
            ..AdapterSettings::default()
        })
        .unwrap();
        let credential = Credential {
            access_token: "t".into(),
            refresh_token: None,
            expiry: chrono::Utc::now(),
            granted_scopes: Default::default(),
        };
        let dir = tempfile::tempdir().unwrap();
        let params = Params::from([
            ("file_id", json!("f1")),
            ("path", json!(dir.path().to_string_lossy())),
        ]);
        let out = adapter.invoke("download", &credential, &params).await.unwrap();
        assert!(matches!(out, OperationOutput::Ack { ref message } if message.starts_with("Saved 5 bytes")));
        assert_eq!(std::fs::read(dir.path().join("f1")).unwrap(), b"hello");

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /files/f1?alt=media "));
    }
}

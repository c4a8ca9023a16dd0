// Request and response records of the job execution API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A `{name, value}` entry of a job or package field list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

/// Turn a field list into a JSON object. Later duplicates win.
pub fn fields_to_object(fields: &[Field]) -> Map<String, Value> {
    fields
        .iter()
        .map(|f| (f.name.clone(), f.value.clone()))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub script: Option<String>,
}

/// `GET /jobs/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub node: Node,
    #[serde(default)]
    pub is_interactive: bool,
}

/// One entry of `GET /jobs/{id}/packages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub id: u64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

/// A file known to the server.
///
/// Input files listed by `GET /jobs/{id}/files` carry a download link in
/// `content`; descriptors built for upload leave it out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Path relative to the job root, `/` separated.
    pub name: String,
    #[serde(rename = "type", default)]
    pub media_type: String,
    pub content_hash: String,
    #[serde(default)]
    pub is_executable: bool,
    #[serde(default)]
    pub is_binary: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl FileDescriptor {
    /// Whether the file sits below the reserved `out` directory.
    pub fn is_output(&self) -> bool {
        self.name
            .split('/')
            .find(|s| !s.is_empty() && *s != ".")
            == Some("out")
    }
}

/// Response of the refresh endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatRequest<'a> {
    pub log_tail: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusRequest<'a> {
    pub status: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport<'a> {
    pub error: &'a str,
    pub message: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadObjectsRequest<'a> {
    pub objects: &'a [String],
}

/// One entry of the `upload_objects` response. A `None` link means the
/// server already has the object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadLink {
    pub object_id: String,
    #[serde(default)]
    pub link: Option<String>,
}

/// Final `PUT /jobs/{id}` body.
#[derive(Debug, Clone, Serialize)]
pub struct JobCompletion<'a> {
    pub status: String,
    pub files: &'a [FileDescriptor],
}

//! Resource catalog
//!
//! Read-only descriptors with no instance data, served without policy
//! filtering. The `docs://` resources are files read from the configured
//! docs directory on every request.

use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A resource advertised by `resources/list`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub mime_type: &'static str,
}

/// Body of one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceContent {
    pub descriptor: ResourceDescriptor,
    pub text: String,
}

impl ResourceContent {
    /// `resources/read` content entry
    pub fn to_value(&self) -> Value {
        json!({
            "uri": self.descriptor.uri,
            "mimeType": self.descriptor.mime_type,
            "text": self.text,
        })
    }
}

pub const SCHEMA_MODELS: ResourceDescriptor = ResourceDescriptor {
    uri: "schema://models",
    name: "models",
    description: "Field layout of records, members and attachments",
    mime_type: "application/json",
};

pub const AWARDS_CSV_TEMPLATE: ResourceDescriptor = ResourceDescriptor {
    uri: "templates://awards_csv",
    name: "awards_csv",
    description: "CSV header for bulk record import",
    mime_type: "text/csv",
};

pub const DOCS_README: ResourceDescriptor = ResourceDescriptor {
    uri: "docs://readme",
    name: "readme",
    description: "Project README",
    mime_type: "text/markdown",
};

pub const DOCS_AGENTS: ResourceDescriptor = ResourceDescriptor {
    uri: "docs://agents",
    name: "agents",
    description: "Guidance for agents using this server",
    mime_type: "text/markdown",
};

pub static RESOURCES: &[ResourceDescriptor] =
    &[DOCS_README, DOCS_AGENTS, SCHEMA_MODELS, AWARDS_CSV_TEMPLATE];

/// Backing file of each `docs://` resource
const DOC_FILES: &[(ResourceDescriptor, &str)] =
    &[(DOCS_README, "README.md"), (DOCS_AGENTS, "AGENTS.md")];

/// Bulk import columns, in file order
const IMPORT_HEADERS: &[&str] = &[
    "比赛名称",
    "获奖日期",
    "赛事级别",
    "奖项等级",
    "证书编号",
    "备注",
    "成员",
    "标签",
    "附件路径",
];

// (name, type, nullable)
type Column = (&'static str, &'static str, bool);

const RECORD_COLUMNS: &[Column] = &[
    ("id", "integer", false),
    ("competition_name", "string", false),
    ("award_date", "date", false),
    ("level", "string", false),
    ("rank", "string", false),
    ("certificate_code", "string", true),
    ("remarks", "string", true),
    ("attachment_folder", "string", true),
    ("deleted", "boolean", false),
    ("deleted_at", "datetime", true),
];

const MEMBER_COLUMNS: &[Column] = &[
    ("id", "integer", false),
    ("name", "string", false),
    ("gender", "string", true),
    ("id_card", "string", true),
    ("phone", "string", true),
    ("student_id", "string", true),
    ("email", "string", true),
    ("school", "string", true),
    ("school_code", "string", true),
    ("major", "string", true),
    ("major_code", "string", true),
    ("class_name", "string", true),
    ("college", "string", true),
    ("pinyin", "string", true),
    ("active", "boolean", false),
    ("sort_index", "integer", false),
];

const ATTACHMENT_COLUMNS: &[Column] = &[
    ("id", "integer", false),
    ("record_id", "integer", false),
    ("stored_name", "string", false),
    ("original_name", "string", false),
    ("relative_path", "string", false),
    ("file_md5", "string", true),
    ("file_size", "integer", true),
    ("deleted", "boolean", false),
];

fn describe(table: &str, columns: &[Column]) -> Value {
    let columns: Vec<Value> = columns
        .iter()
        .map(|(name, ty, nullable)| json!({ "name": name, "type": ty, "nullable": nullable }))
        .collect();
    json!({ "table": table, "columns": columns })
}

fn schema_models() -> String {
    let models = json!({
        "Record": describe("awards", RECORD_COLUMNS),
        "Member": describe("team_members", MEMBER_COLUMNS),
        "Attachment": describe("attachments", ATTACHMENT_COLUMNS),
    });
    serde_json::to_string_pretty(&models).unwrap_or_else(|_| models.to_string())
}

/// Read a built-in resource by URI
pub fn read_resource(uri: &str) -> Option<ResourceContent> {
    let (descriptor, text) = match uri {
        u if u == SCHEMA_MODELS.uri => (SCHEMA_MODELS, schema_models()),
        u if u == AWARDS_CSV_TEMPLATE.uri => {
            (AWARDS_CSV_TEMPLATE, format!("{}\n", IMPORT_HEADERS.join(",")))
        }
        _ => return None,
    };
    Some(ResourceContent { descriptor, text })
}

/// Every advertised resource, with the docs directory the `docs://` ones read from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceCatalog {
    docs_dir: Option<PathBuf>,
}

impl ResourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_docs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.docs_dir = Some(dir.into());
        self
    }

    pub fn docs_dir(&self) -> Option<&Path> {
        self.docs_dir.as_deref()
    }

    pub fn list(&self) -> &'static [ResourceDescriptor] {
        RESOURCES
    }

    /// Read a resource by URI
    ///
    /// `None` for an unknown URI, and for a `docs://` resource whose file is
    /// missing or not UTF-8.
    pub async fn read(&self, uri: &str) -> Option<ResourceContent> {
        let Some((descriptor, file)) = DOC_FILES.iter().find(|(d, _)| d.uri == uri) else {
            return read_resource(uri);
        };

        let path = self.docs_dir.as_ref()?.join(file);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Some(ResourceContent {
                descriptor: *descriptor,
                text,
            }),
            Err(e) => {
                debug!(uri, path = %path.display(), error = %e, "Document resource unavailable");
                None
            }
        }
    }
}

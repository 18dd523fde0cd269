//! Records persisted by the index: registered APIs, their classes, and the
//! admin events that mutate them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name under which the platform's own standard library is registered.
pub const STANDARD_LIBRARY: &str = "JDK";

/// Top-level namespaces ingested for the standard library.
pub const STANDARD_LIBRARY_ROOTS: [&str; 2] = ["java", "javax"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRecord {
    pub id: Uuid,
    pub name: String,
    pub base_url: String,
    pub download_url: String,
}

impl ApiRecord {
    pub fn new(name: &str, base_url: &str, download_url: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            base_url: normalize_base_url(base_url, name),
            download_url: download_url.to_string(),
        }
    }

    /// Same name and URLs under a new identity.
    pub fn with_fresh_identity(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            ..self.clone()
        }
    }

    /// Shadow key backing the case-insensitive name constraint.
    pub fn upper_name(&self) -> String {
        self.name.to_uppercase()
    }

    pub fn is_standard_library(&self) -> bool {
        self.name == STANDARD_LIBRARY
    }
}

impl fmt::Display for ApiRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Ensures the documentation root ends with `/<name>/`.
pub fn normalize_base_url(url: &str, name: &str) -> String {
    let mut base = url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    let suffix = format!("/{name}/");
    if !base.ends_with(&suffix) {
        base.push_str(name);
        base.push('/');
    }
    base
}

/// Name and URLs of an API to be added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSpec {
    pub name: String,
    pub base_url: String,
    pub download_url: String,
}

/// Reference to an existing API, resolved by id first and name second.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiTarget {
    pub id: Option<Uuid>,
    pub name: Option<String>,
}

impl ApiTarget {
    pub fn by_id(id: Uuid) -> Self {
        Self {
            id: Some(id),
            name: None,
        }
    }

    pub fn by_name(name: &str) -> Self {
        Self {
            id: None,
            name: Some(name.to_string()),
        }
    }

    /// Reads a uuid as an id and anything else as a name.
    pub fn parse(raw: &str) -> Self {
        match Uuid::parse_str(raw.trim()) {
            Ok(id) => Self::by_id(id),
            Err(_) => Self::by_name(raw.trim()),
        }
    }
}

impl fmt::Display for ApiTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.id, &self.name) {
            (Some(id), Some(name)) => write!(f, "{name} ({id})"),
            (Some(id), None) => write!(f, "{id}"),
            (None, Some(name)) => f.write_str(name),
            (None, None) => f.write_str("<unspecified>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRecord {
    pub name: String,
    pub signature: String,
    pub parameters: Vec<String>,
    pub return_type: Option<String>,
    pub constructor: bool,
}

impl MethodRecord {
    /// Fragment identifying the method on its class page, e.g. `#split(String, int)`.
    pub fn anchor(&self) -> String {
        format!("#{}({})", self.name, self.parameters.join(", "))
    }
}

/// Class metadata keyed by (api, package, class name).
///
/// A stub created by a lookup has `parsed == false` and no members until an
/// ingestion run fills it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub id: Uuid,
    pub api_id: Uuid,
    pub package: String,
    pub name: String,
    pub kind: Option<String>,
    pub declaration: Option<String>,
    pub methods: Vec<MethodRecord>,
    pub nested: Vec<String>,
    pub source_hash: Option<String>,
    pub parsed: bool,
}

impl ClassRecord {
    pub fn stub(api: &ApiRecord, package: &str, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            api_id: api.id,
            package: package.to_string(),
            name: name.to_string(),
            kind: None,
            declaration: None,
            methods: Vec::new(),
            nested: Vec::new(),
            source_hash: None,
            parsed: false,
        }
    }

    pub fn qualified_name(&self) -> String {
        if self.package.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.package, self.name)
        }
    }

    pub fn doc_url(&self, api: &ApiRecord) -> String {
        let mut url = api.base_url.clone();
        if !self.package.is_empty() {
            url.push_str(&self.package.replace('.', "/"));
            url.push('/');
        }
        url.push_str(&self.name);
        url.push_str(".html");
        url
    }

    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MethodRecord> {
        self.methods.iter().filter(move |m| m.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventState {
    New,
    Processing,
    Completed,
    Failed,
}

impl EventState {
    pub fn is_terminal(self) -> bool {
        matches!(self, EventState::Completed | EventState::Failed)
    }

    /// NEW -> PROCESSING -> {COMPLETED, FAILED}; nothing else.
    pub fn can_advance_to(self, next: EventState) -> bool {
        matches!(
            (self, next),
            (EventState::New, EventState::Processing)
                | (EventState::Processing, EventState::Completed)
                | (EventState::Processing, EventState::Failed)
        )
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventState::New => "NEW",
            EventState::Processing => "PROCESSING",
            EventState::Completed => "COMPLETED",
            EventState::Failed => "FAILED",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Add,
    Delete,
    Update,
    Reload,
}

/// The mutation an admin event requests, one variant per event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiOperation {
    Add(ApiSpec),
    Delete(ApiTarget),
    /// Delete followed by add. Without a replacement the existing URLs are reused.
    Update {
        target: ApiTarget,
        replacement: Option<ApiSpec>,
    },
    Reload(ApiTarget),
}

impl ApiOperation {
    pub fn event_type(&self) -> EventType {
        match self {
            ApiOperation::Add(_) => EventType::Add,
            ApiOperation::Delete(_) => EventType::Delete,
            ApiOperation::Update { .. } => EventType::Update,
            ApiOperation::Reload(_) => EventType::Reload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminEvent {
    pub id: Uuid,
    pub requested_by: String,
    pub requested_on: DateTime<Utc>,
    pub operation: ApiOperation,
    pub state: EventState,
    pub completed: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl AdminEvent {
    pub fn new(requested_by: &str, operation: ApiOperation) -> Self {
        Self {
            id: Uuid::new_v4(),
            requested_by: requested_by.to_string(),
            requested_on: Utc::now(),
            operation,
            state: EventState::New,
            completed: None,
            error: None,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.operation.event_type()
    }
}

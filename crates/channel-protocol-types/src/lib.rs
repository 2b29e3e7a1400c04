//! Pure wire types for the channel source protocol.
//!
//! Data types and their serialization only. This is the shared language of the
//! nodes listening on one broadcast channel.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Channel every node joins when none is configured.
pub const DEFAULT_CHANNEL_NAME: &str = "orbit-channel";

/// A record stored in the replicated data store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record type (e.g. "planet").
    #[serde(rename = "type")]
    pub record_type: String,
    /// Record ID, unique within its type.
    pub id: String,
    /// Attribute values.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl Record {
    /// Create a record with no attributes.
    pub fn new(record_type: &str, id: &str) -> Self {
        Self {
            record_type: record_type.to_string(),
            id: id.to_string(),
            attributes: Map::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, name: &str, value: Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    /// Identity of this record.
    pub fn identity(&self) -> RecordIdentity {
        RecordIdentity {
            record_type: self.record_type.clone(),
            id: self.id.clone(),
        }
    }
}

/// Type + ID pair identifying a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordIdentity {
    #[serde(rename = "type")]
    pub record_type: String,
    pub id: String,
}

impl RecordIdentity {
    pub fn new(record_type: &str, id: &str) -> Self {
        Self {
            record_type: record_type.to_string(),
            id: id.to_string(),
        }
    }
}

/// A single mutation carried by a transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum RecordOperation {
    AddRecord {
        record: Record,
    },
    UpdateRecord {
        record: Record,
    },
    RemoveRecord {
        record: RecordIdentity,
    },
    ReplaceAttribute {
        record: RecordIdentity,
        attribute: String,
        value: Value,
    },
}

/// A uniquely identified batch of mutations.
///
/// Immutable once built; the ID is what the transform log records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub id: String,
    pub operations: Vec<RecordOperation>,
}

impl Transform {
    /// Create a transform with an auto-generated ID.
    pub fn new(operations: Vec<RecordOperation>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operations,
        }
    }

    /// Create a transform with a caller-chosen ID.
    pub fn with_id(id: &str, operations: Vec<RecordOperation>) -> Self {
        Self {
            id: id.to_string(),
            operations,
        }
    }
}

/// What a query retrieves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum QueryExpression {
    FindRecord { record: RecordIdentity },
    FindRecords { record_type: String },
}

/// A uniquely identified read request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub expression: QueryExpression,
}

impl Query {
    /// Create a query with an auto-generated ID.
    pub fn new(expression: QueryExpression) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            expression,
        }
    }

    /// Create a query with a caller-chosen ID.
    pub fn with_id(id: &str, expression: QueryExpression) -> Self {
        Self {
            id: id.to_string(),
            expression,
        }
    }
}

/// Error information carried by an `error` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code.
    pub code: i32,
    /// Error message.
    pub message: String,
    /// Additional error data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorInfo {
    pub fn new(code: i32, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
            data: None,
        }
    }

    pub fn with_data(code: i32, message: &str, data: Value) -> Self {
        Self {
            code,
            message: message.to_string(),
            data: Some(data),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Request kinds that travel over the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Sync,
    Push,
    Update,
    Pull,
    Query,
}

impl RequestKind {
    /// Whether the originator waits for a correlated reply.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, RequestKind::Sync)
    }

    /// Whether the payload is a transform (as opposed to a query).
    pub fn is_write(&self) -> bool {
        matches!(self, RequestKind::Sync | RequestKind::Push | RequestKind::Update)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Sync => "sync",
            RequestKind::Push => "push",
            RequestKind::Update => "update",
            RequestKind::Pull => "pull",
            RequestKind::Query => "query",
        }
    }
}

/// Message exchanged on the broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Sync {
        transform: Transform,
    },
    Push {
        transform: Transform,
    },
    Update {
        transform: Transform,
    },
    Pull {
        query: Query,
    },
    Query {
        query: Query,
    },
    Success {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
    Error {
        id: String,
        error: ErrorInfo,
    },
}

impl Message {
    /// Build the request message for a transform-carrying kind.
    ///
    /// Returns `None` when `kind` carries a query.
    pub fn for_transform(kind: RequestKind, transform: Transform) -> Option<Self> {
        match kind {
            RequestKind::Sync => Some(Message::Sync { transform }),
            RequestKind::Push => Some(Message::Push { transform }),
            RequestKind::Update => Some(Message::Update { transform }),
            RequestKind::Pull | RequestKind::Query => None,
        }
    }

    /// Build the request message for a query-carrying kind.
    ///
    /// Returns `None` when `kind` carries a transform.
    pub fn for_query(kind: RequestKind, query: Query) -> Option<Self> {
        match kind {
            RequestKind::Pull => Some(Message::Pull { query }),
            RequestKind::Query => Some(Message::Query { query }),
            _ => None,
        }
    }

    /// Create a success reply.
    pub fn success(id: &str, result: Option<Value>) -> Self {
        Message::Success {
            id: id.to_string(),
            result,
        }
    }

    /// Create an error reply.
    pub fn error(id: &str, error: ErrorInfo) -> Self {
        Message::Error {
            id: id.to_string(),
            error,
        }
    }

    /// The request or correlation ID this message carries.
    pub fn id(&self) -> &str {
        match self {
            Message::Sync { transform }
            | Message::Push { transform }
            | Message::Update { transform } => &transform.id,
            Message::Pull { query } | Message::Query { query } => &query.id,
            Message::Success { id, .. } | Message::Error { id, .. } => id,
        }
    }

    /// Request kind, or `None` for replies.
    pub fn request_kind(&self) -> Option<RequestKind> {
        match self {
            Message::Sync { .. } => Some(RequestKind::Sync),
            Message::Push { .. } => Some(RequestKind::Push),
            Message::Update { .. } => Some(RequestKind::Update),
            Message::Pull { .. } => Some(RequestKind::Pull),
            Message::Query { .. } => Some(RequestKind::Query),
            Message::Success { .. } | Message::Error { .. } => None,
        }
    }

    /// Check if this is a `success` or `error` reply.
    pub fn is_reply(&self) -> bool {
        self.request_kind().is_none()
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// Standard error codes
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const LISTENER_FAILED: i32 = -32010;
    pub const STORE_FAILED: i32 = -32011;
    pub const NOT_FOUND: i32 = -32002;
    pub const CONFLICT: i32 = -32003;
}

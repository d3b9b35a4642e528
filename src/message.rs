//! Message types and record codec
//!
//! This module defines the wire shape of a relayed message and the codec
//! between a `Message` and the field-map record kept in the external store.
//!
//! Keep-alives are synthetic messages with the reserved id [`KEEP_ALIVE_ID`]
//! and empty content. They are never stored; clients filter them by id.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Reserved message id marking a keep-alive
pub const KEEP_ALIVE_ID: &str = "keep-alive";

/// Record field names, shared with the store key conventions
const FIELD_USER_ID: &str = "user_id";
const FIELD_ROOM_ID: &str = "room_id";
const FIELD_CONTENT: &str = "content";
const FIELD_TIMESTAMP: &str = "timestamp";

/// A message relayed through a room
///
/// Immutable once created. Cheap enough to clone across the fan-out path;
/// content is short text by design.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque unique id (UUID v4 for real messages)
    pub id: String,
    /// Author
    pub user_id: String,
    /// Room the message was published to
    pub room_id: String,
    /// Text content; empty only for keep-alives
    pub content: String,
    /// Creation time, milliseconds since Unix epoch
    pub timestamp: i64,
}

impl Message {
    /// Create a new message with a fresh id and the current timestamp
    pub fn new(
        user_id: impl Into<String>,
        room_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            room_id: room_id.into(),
            content: content.into(),
            timestamp: now_millis(),
        }
    }

    /// Create a keep-alive for an open stream
    pub fn keep_alive(user_id: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            id: KEEP_ALIVE_ID.to_string(),
            user_id: user_id.into(),
            room_id: room_id.into(),
            content: String::new(),
            timestamp: now_millis(),
        }
    }

    /// Whether this is a synthetic keep-alive
    pub fn is_keep_alive(&self) -> bool {
        self.id == KEEP_ALIVE_ID
    }

    /// Encode to the field map stored under the message key
    pub fn to_record(&self) -> Vec<(String, String)> {
        vec![
            (FIELD_USER_ID.into(), self.user_id.clone()),
            (FIELD_ROOM_ID.into(), self.room_id.clone()),
            (FIELD_CONTENT.into(), self.content.clone()),
            (FIELD_TIMESTAMP.into(), self.timestamp.to_string()),
        ]
    }

    /// Decode from a stored field map
    ///
    /// The id is not part of the record; it is the key the record was stored
    /// under. An empty map (expired or never-written record) is reported as
    /// [`RecordError::Missing`].
    pub fn from_record(
        id: impl Into<String>,
        fields: &HashMap<String, String>,
    ) -> std::result::Result<Self, RecordError> {
        let id = id.into();
        if fields.is_empty() {
            return Err(RecordError::Missing(id));
        }

        let field = |name: &'static str| {
            fields
                .get(name)
                .cloned()
                .ok_or(RecordError::MissingField { id: id.clone(), field: name })
        };

        let raw_ts = field(FIELD_TIMESTAMP)?;
        let timestamp = raw_ts
            .parse::<i64>()
            .map_err(|_| RecordError::BadTimestamp { id: id.clone(), value: raw_ts })?;

        Ok(Self {
            user_id: field(FIELD_USER_ID)?,
            room_id: field(FIELD_ROOM_ID)?,
            content: field(FIELD_CONTENT)?,
            timestamp,
            id,
        })
    }
}

/// Error decoding a stored message record
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecordError {
    /// No record exists under this id
    #[error("no record for message {0}")]
    Missing(String),

    /// Record exists but a required field is absent
    #[error("message {id} record is missing field {field}")]
    MissingField { id: String, field: &'static str },

    /// Timestamp field did not parse as integer milliseconds
    #[error("message {id} has unparseable timestamp {value:?}")]
    BadTimestamp { id: String, value: String },
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

//! Wire protocol
//!
//! The relay's service layer is transport-agnostic; this module defines the
//! newline-delimited JSON framing the bundled TCP transport speaks. One JSON
//! value per line in each direction. A `stream_messages` request switches the
//! connection into streaming mode: the server emits `message` responses
//! (including keep-alives) until the client disconnects or sends any byte.

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::message::Message;

/// Client request, one per line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    JoinRoom {
        user_id: String,
        room_id: String,
    },
    SendMessage {
        user_id: String,
        room_id: String,
        content: String,
    },
    LeaveRoom {
        user_id: String,
        room_id: String,
    },
    StreamMessages {
        user_id: String,
        room_id: String,
    },
}

/// Server response, one per line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Joined {
        success: bool,
        recent_messages: Vec<Message>,
    },
    Sent {
        success: bool,
        message: Message,
    },
    Left {
        success: bool,
    },
    /// One streamed message; keep-alives use the reserved id
    Message {
        message: Message,
    },
    Error {
        code: String,
        message: String,
    },
}

impl Response {
    /// Map a relay error to its wire form
    pub fn from_error(err: &RelayError) -> Self {
        Response::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

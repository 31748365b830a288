//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the lecturer's session
//! screen and the API server.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

//=========================================================================================
// Messages Sent FROM the Server TO the Client
//=========================================================================================
// NOTE: The channel is push-only. Anything the client sends besides a close
// frame is ignored.
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the subscription. Always the first message on the connection.
    Subscribed {
        session_id: Uuid,
        course_id: Uuid,
        expires_at: DateTime<Utc>,
    },

    /// A student's scan was accepted for this session.
    ScanRecorded {
        session_id: Uuid,
        student_id: Uuid,
        scanned_at: DateTime<Utc>,
        /// Accepted scans for the session so far, this one included. Omitted
        /// when the server could not count them.
        #[serde(skip_serializing_if = "Option::is_none")]
        scan_count: Option<usize>,
    },

    /// Periodic countdown until the code stops being accepted.
    Countdown {
        session_id: Uuid,
        remaining_seconds: i64,
        remaining: String,
    },

    /// The window has closed; the server closes the connection after this.
    SessionExpired { session_id: Uuid },

    /// Reports a fatal error to the client, which should display an error message.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_tagged_in_snake_case() {
        let session_id = Uuid::nil();
        let json = serde_json::to_value(ServerMessage::SessionExpired { session_id }).unwrap();
        assert_eq!(json["type"], "session_expired");
        assert_eq!(json["session_id"], session_id.to_string());

        let json = serde_json::to_value(ServerMessage::Countdown {
            session_id,
            remaining_seconds: 90,
            remaining: "1 minute".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "countdown");
        assert_eq!(json["remaining_seconds"], 90);
    }
}

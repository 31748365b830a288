//! crates/attendance_core/src/payload.rs
//!
//! The string encoded into the attendance QR code.
//!
//! The payload is JSON with camelCase keys. Timestamps are RFC 3339 in UTC
//! (`2024-01-15T09:00:00Z`); offsets are accepted on decode and normalized to
//! UTC, but nothing here ever shifts an instant by a local-time offset.

use crate::domain::{Course, Session};
use crate::ports::{PortError, PortResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    pub session_id: Uuid,
    pub course_id: Uuid,
    /// Carried so the scanning device can show the course without a lookup.
    pub course_code: String,
    pub course_name: String,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl QrPayload {
    pub fn for_session(session: &Session, course: &Course) -> Self {
        Self {
            session_id: session.id,
            course_id: session.course_id,
            course_code: course.code.clone(),
            course_name: course.name.clone(),
            generated_at: session.generated_at,
            expires_at: session.expires_at,
        }
    }

    pub fn encode(&self) -> PortResult<String> {
        serde_json::to_string(self)
            .map_err(|e| PortError::Unexpected(format!("failed to encode QR payload: {}", e)))
    }

    /// Parses a scanned string. Anything that is not a well-formed payload is
    /// an `InvalidCode`.
    pub fn decode(raw: &str) -> PortResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PortError::InvalidCode("empty payload".to_string()));
        }
        let payload: QrPayload = serde_json::from_str(raw)
            .map_err(|e| PortError::InvalidCode(format!("malformed payload: {}", e)))?;
        if payload.expires_at <= payload.generated_at {
            return Err(PortError::InvalidCode(
                "payload expires before it was generated".to_string(),
            ));
        }
        Ok(payload)
    }

    /// Rejects a payload whose identity or window differs from the stored session.
    pub fn verify_against(&self, session: &Session) -> PortResult<()> {
        if self.session_id != session.id {
            return Err(PortError::InvalidCode("session mismatch".to_string()));
        }
        if self.course_id != session.course_id {
            return Err(PortError::InvalidCode(
                "code was not issued for this course".to_string(),
            ));
        }
        if self.generated_at != session.generated_at || self.expires_at != session.expires_at {
            return Err(PortError::InvalidCode(
                "payload window does not match the issued session".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample() -> (Session, Course) {
        let course = Course {
            id: Uuid::new_v4(),
            code: "CS101".to_string(),
            name: "Intro to Computing".to_string(),
            description: String::new(),
            lecturer_id: None,
            schedules: Vec::new(),
        };
        let generated_at = Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap();
        let session = Session {
            id: Uuid::new_v4(),
            course_id: course.id,
            created_by: Uuid::new_v4(),
            generated_at,
            expires_at: generated_at + Duration::hours(1),
        };
        (session, course)
    }

    #[test]
    fn encodes_camel_case_utc_timestamps() {
        let (session, course) = sample();
        let encoded = QrPayload::for_session(&session, &course).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();

        assert_eq!(value["courseCode"], "CS101");
        assert_eq!(value["courseName"], "Intro to Computing");
        assert_eq!(value["generatedAt"], "2024-01-15T09:00:00Z");
        assert_eq!(value["expiresAt"], "2024-01-15T10:00:00Z");
        assert_eq!(value["sessionId"], session.id.to_string());
    }

    #[test]
    fn decode_normalizes_offsets_to_utc() {
        let (session, course) = sample();
        let raw = format!(
            r#"{{"sessionId":"{}","courseId":"{}","courseCode":"CS101","courseName":"Intro to Computing","generatedAt":"2024-01-15T17:00:00+08:00","expiresAt":"2024-01-15T18:00:00+08:00"}}"#,
            session.id, course.id
        );
        let payload = QrPayload::decode(&raw).unwrap();

        assert_eq!(payload.generated_at, session.generated_at);
        assert!(payload.verify_against(&session).is_ok());
    }

    #[test]
    fn decode_rejects_garbage() {
        for raw in ["", "   ", "not json", r#"{"courseId":"CS101"}"#] {
            assert!(matches!(QrPayload::decode(raw), Err(PortError::InvalidCode(_))), "{raw:?}");
        }
    }

    #[test]
    fn verify_rejects_tampered_window() {
        let (session, course) = sample();
        let mut payload = QrPayload::for_session(&session, &course);
        payload.expires_at = payload.expires_at + Duration::hours(5);

        assert!(matches!(payload.verify_against(&session), Err(PortError::InvalidCode(_))));
    }

    #[test]
    fn verify_rejects_foreign_course() {
        let (session, course) = sample();
        let mut payload = QrPayload::for_session(&session, &course);
        payload.course_id = Uuid::new_v4();

        assert!(matches!(payload.verify_against(&session), Err(PortError::InvalidCode(_))));
    }
}

//! crates/attendance_core/src/issuer.rs
//!
//! The lecturer-facing half of the protocol: minting attendance sessions.

use crate::access::ensure_course_lecturer;
use crate::clock::Clock;
use crate::domain::{Course, Session};
use crate::payload::QrPayload;
use crate::ports::{DatabaseService, PortResult};
use chrono::{Duration, SubsecRound};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// How long a session accepts scans unless configured otherwise.
pub const DEFAULT_SESSION_VALIDITY_MINUTES: i64 = 60;

/// A session as handed back to the lecturer.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session: Session,
    pub course: Course,
    /// The string to encode into the QR code.
    pub payload: String,
    /// `true` when an already-open session was returned instead of a new one.
    pub reused: bool,
}

pub struct SessionIssuer {
    db: Arc<dyn DatabaseService>,
    clock: Arc<dyn Clock>,
    validity: Duration,
}

impl SessionIssuer {
    /// `validity` applies to every session this issuer creates.
    pub fn new(db: Arc<dyn DatabaseService>, clock: Arc<dyn Clock>, validity: Duration) -> Self {
        Self { db, clock, validity }
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Issues a session for `course_id`, or returns the one still open.
    pub async fn create_session(&self, course_id: Uuid, lecturer_id: Uuid) -> PortResult<IssuedSession> {
        let course = self.db.get_course(course_id).await?;
        ensure_course_lecturer(&course, lecturer_id)?;

        // The open check uses the exact clock, like the recorder does. Only the
        // stamped instants are cut to whole seconds so they survive storage and
        // the payload unchanged.
        let now = self.clock.now();
        let generated_at = now.trunc_subsecs(0);
        let candidate = Session {
            id: Uuid::new_v4(),
            course_id,
            created_by: lecturer_id,
            generated_at,
            expires_at: generated_at + self.validity,
        };

        let (session, created) = self.db.create_session_if_absent(candidate, now).await?;
        if created {
            info!(
                "Issued attendance session {} for course {} (expires {})",
                session.id, course.code, session.expires_at
            );
        } else {
            info!(
                "Course {} already has open session {}; reusing it",
                course.code, session.id
            );
        }

        let payload = QrPayload::for_session(&session, &course).encode()?;
        Ok(IssuedSession {
            session,
            course,
            payload,
            reused: !created,
        })
    }

    /// The session currently open for the course, if any.
    pub async fn active_session(&self, course_id: Uuid, lecturer_id: Uuid) -> PortResult<Option<IssuedSession>> {
        let course = self.db.get_course(course_id).await?;
        ensure_course_lecturer(&course, lecturer_id)?;

        let Some(session) = self.db.find_active_session(course_id, self.clock.now()).await? else {
            return Ok(None);
        };
        let payload = QrPayload::for_session(&session, &course).encode()?;
        Ok(Some(IssuedSession {
            session,
            course,
            payload,
            reused: true,
        }))
    }
}

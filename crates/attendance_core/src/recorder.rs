//! crates/attendance_core/src/recorder.rs
//!
//! The student-facing half of the protocol: validating and recording scans.

use crate::clock::Clock;
use crate::domain::{Scan, ScanEvent, Session};
use crate::payload::QrPayload;
use crate::ports::{DatabaseService, PortError, PortResult, ScanNotifier};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// The outcome of an accepted scan.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub scan: Scan,
    pub session: Session,
    pub course_code: String,
}

pub struct ScanRecorder {
    db: Arc<dyn DatabaseService>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn ScanNotifier>,
}

impl ScanRecorder {
    pub fn new(db: Arc<dyn DatabaseService>, clock: Arc<dyn Clock>, notifier: Arc<dyn ScanNotifier>) -> Self {
        Self { db, clock, notifier }
    }

    /// Validates a scanned payload for `student_id` and records the scan.
    ///
    /// `expected_course` is set when the submission came through a
    /// course-scoped endpoint; a code from any other course is then rejected
    /// even if it is still within its window.
    ///
    /// Checks run in a fixed order: identity, window, enrollment, duplicate.
    pub async fn record_scan(
        &self,
        encoded_payload: &str,
        student_id: Uuid,
        expected_course: Option<Uuid>,
    ) -> PortResult<ScanResult> {
        let payload = QrPayload::decode(encoded_payload)?;

        let session = match self.db.get_session(payload.session_id).await {
            Ok(session) => session,
            Err(PortError::NotFound(_)) => {
                warn!("Scan for unknown session {} by student {}", payload.session_id, student_id);
                return Err(PortError::InvalidCode("unknown session".to_string()));
            }
            Err(e) => return Err(e),
        };
        payload.verify_against(&session)?;
        if let Some(expected) = expected_course {
            if expected != session.course_id {
                warn!(
                    "Student {} replayed a {} code against course {}",
                    student_id, payload.course_code, expected
                );
                return Err(PortError::InvalidCode(
                    "code was not issued for this course".to_string(),
                ));
            }
        }

        let now = self.clock.now();
        if !session.is_open_at(now) {
            return Err(PortError::Expired {
                expires_at: session.expires_at,
            });
        }

        if !self.db.is_enrolled(session.course_id, student_id).await? {
            return Err(PortError::NotEnrolled);
        }

        let scan = self
            .db
            .insert_scan(Scan {
                id: Uuid::new_v4(),
                session_id: session.id,
                student_id,
                scanned_at: now,
            })
            .await?;
        info!("Recorded scan by student {} for session {}", student_id, session.id);

        // The scan is already stored; a failed count must not turn it into an error.
        let scan_count = match self.db.list_scans_for_sessions(&[session.id]).await {
            Ok(scans) => Some(scans.len()),
            Err(e) => {
                warn!("Could not count scans for session {}: {}", session.id, e);
                None
            }
        };
        self.notifier.publish(ScanEvent {
            session_id: session.id,
            course_id: session.course_id,
            student_id,
            scanned_at: scan.scanned_at,
            scan_count,
        });

        Ok(ScanResult {
            scan,
            session,
            course_code: payload.course_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailingScanListing, Fixture};
    use chrono::{Duration, TimeZone, Utc};

    fn at(h: u32, m: u32, s: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, h, m, s).unwrap()
    }

    #[tokio::test]
    async fn scan_in_the_last_second_is_accepted() {
        let fx = Fixture::new().await;
        let issued = fx.issuer().create_session(fx.course.id, fx.lecturer.id).await.unwrap();

        fx.clock.set(at(9, 59, 59));
        let result = fx.recorder().record_scan(&issued.payload, fx.students[0].id, None).await.unwrap();

        assert_eq!(result.scan.scanned_at, at(9, 59, 59));
        assert_eq!(result.course_code, "CS101");
    }

    #[tokio::test]
    async fn scan_at_the_expiry_instant_is_accepted() {
        let fx = Fixture::new().await;
        let issued = fx.issuer().create_session(fx.course.id, fx.lecturer.id).await.unwrap();

        fx.clock.set(at(10, 0, 0));
        assert!(fx.recorder().record_scan(&issued.payload, fx.students[0].id, None).await.is_ok());
    }

    #[tokio::test]
    async fn scan_after_expiry_is_rejected() {
        let fx = Fixture::new().await;
        let issued = fx.issuer().create_session(fx.course.id, fx.lecturer.id).await.unwrap();

        fx.clock.set(at(10, 0, 1));
        let err = fx.recorder().record_scan(&issued.payload, fx.students[0].id, None).await.unwrap_err();

        match err {
            PortError::Expired { expires_at } => assert_eq!(expires_at, at(10, 0, 0)),
            other => panic!("expected Expired, got {:?}", other),
        }
        assert!(fx.db.list_scans_for_sessions(&[issued.session.id]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_scan_is_a_duplicate_and_keeps_one_record() {
        let fx = Fixture::new().await;
        let issued = fx.issuer().create_session(fx.course.id, fx.lecturer.id).await.unwrap();
        let recorder = fx.recorder();

        fx.clock.set(at(9, 30, 0));
        recorder.record_scan(&issued.payload, fx.students[0].id, None).await.unwrap();

        fx.clock.set(at(9, 59, 0));
        let err = recorder.record_scan(&issued.payload, fx.students[0].id, None).await.unwrap_err();
        match err {
            PortError::DuplicateScan { scanned_at } => assert_eq!(scanned_at, at(9, 30, 0)),
            other => panic!("expected DuplicateScan, got {:?}", other),
        }

        let scans = fx.db.list_scans_for_sessions(&[issued.session.id]).await.unwrap();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].scanned_at, at(9, 30, 0));
    }

    #[tokio::test]
    async fn concurrent_scans_by_one_student_produce_one_record() {
        let fx = Fixture::new().await;
        let issued = fx.issuer().create_session(fx.course.id, fx.lecturer.id).await.unwrap();
        let recorder = Arc::new(fx.recorder());
        let student_id = fx.students[0].id;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let recorder = recorder.clone();
            let payload = issued.payload.clone();
            handles.push(tokio::spawn(async move {
                recorder.record_scan(&payload, student_id, None).await
            }));
        }
        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(PortError::DuplicateScan { .. }) => {}
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }

        assert_eq!(accepted, 1);
        assert_eq!(fx.db.list_scans_for_sessions(&[issued.session.id]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unenrolled_student_is_rejected() {
        let fx = Fixture::new().await;
        let issued = fx.issuer().create_session(fx.course.id, fx.lecturer.id).await.unwrap();

        let err = fx
            .recorder()
            .record_scan(&issued.payload, fx.outsider.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotEnrolled));
    }

    #[tokio::test]
    async fn payload_replayed_against_another_course_is_rejected() {
        let fx = Fixture::new().await;
        let issued = fx.issuer().create_session(fx.course.id, fx.lecturer.id).await.unwrap();

        let err = fx
            .recorder()
            .record_scan(&issued.payload, fx.students[0].id, Some(fx.other_course.id))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::InvalidCode(_)));

        // Still rejected once expired: the identity check comes first.
        fx.clock.advance(Duration::hours(3));
        let err = fx
            .recorder()
            .record_scan(&issued.payload, fx.students[0].id, Some(fx.other_course.id))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::InvalidCode(_)));
    }

    #[tokio::test]
    async fn tampered_expiry_is_rejected() {
        let fx = Fixture::new().await;
        let issued = fx.issuer().create_session(fx.course.id, fx.lecturer.id).await.unwrap();
        let mut payload = QrPayload::decode(&issued.payload).unwrap();
        payload.expires_at = payload.expires_at + Duration::days(1);

        fx.clock.advance(Duration::hours(2));
        let err = fx
            .recorder()
            .record_scan(&payload.encode().unwrap(), fx.students[0].id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::InvalidCode(_)));
    }

    #[tokio::test]
    async fn unknown_session_is_an_invalid_code() {
        let fx = Fixture::new().await;
        let issued = fx.issuer().create_session(fx.course.id, fx.lecturer.id).await.unwrap();
        let mut payload = QrPayload::decode(&issued.payload).unwrap();
        payload.session_id = Uuid::new_v4();

        let err = fx
            .recorder()
            .record_scan(&payload.encode().unwrap(), fx.students[0].id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::InvalidCode(_)));
    }

    #[tokio::test]
    async fn accepted_scans_are_published() {
        let fx = Fixture::new().await;
        let issued = fx.issuer().create_session(fx.course.id, fx.lecturer.id).await.unwrap();
        let recorder = fx.recorder();

        recorder.record_scan(&issued.payload, fx.students[0].id, None).await.unwrap();
        recorder.record_scan(&issued.payload, fx.students[1].id, None).await.unwrap();
        let _ = recorder.record_scan(&issued.payload, fx.students[1].id, None).await;

        let events = fx.notifier.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].student_id, fx.students[1].id);
        assert_eq!(events[1].scan_count, Some(2));
    }

    #[tokio::test]
    async fn a_failed_count_does_not_fail_a_recorded_scan() {
        let fx = Fixture::new().await;
        let issued = fx.issuer().create_session(fx.course.id, fx.lecturer.id).await.unwrap();
        let recorder = ScanRecorder::new(
            Arc::new(FailingScanListing(fx.db.clone())),
            fx.clock.clone(),
            fx.notifier.clone(),
        );

        let result = recorder.record_scan(&issued.payload, fx.students[0].id, None).await.unwrap();
        assert_eq!(result.session.id, issued.session.id);

        let stored = fx.db.list_scans_for_sessions(&[issued.session.id]).await.unwrap();
        assert_eq!(stored.len(), 1);
        let events = fx.notifier.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].student_id, fx.students[0].id);
        assert_eq!(events[0].scan_count, None);
    }
}

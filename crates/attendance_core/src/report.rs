//! crates/attendance_core/src/report.rs
//!
//! Reconciles a course roster against recorded scans.
//!
//! `build_attendance_report` is a pure function of (course, roster, sessions,
//! scans): rows are ordered by student name, columns by session generation
//! time, and nothing it is given is mutated. `ReportAggregator` only loads
//! those inputs through the database port.
//!
//! # CSV layout
//!
//! ```text
//! "Course: CS101 - Intro to Computing"
//! "ID Number","Student Name","Jan 15, 2024 at 5:00 PM",...
//! "2024-0002","hopper, Ada","Present",...
//! ```
//!
//! Column headers are the only place an instant is shifted into the display
//! offset.

use crate::domain::{Course, Scan, Session, SessionRecord, User};
use crate::ports::{DatabaseService, PortError, PortResult};
use chrono::{DateTime, FixedOffset, Utc};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
        }
    }
}

/// One session column of the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportColumn {
    pub session_id: Uuid,
    pub generated_at: DateTime<Utc>,
}

/// One student row; `statuses` lines up with `AttendanceReport::columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub student_id: Uuid,
    pub id_number: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub statuses: Vec<AttendanceStatus>,
}

impl ReportRow {
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceReport {
    pub course_id: Uuid,
    pub course_code: String,
    pub course_name: String,
    pub columns: Vec<ReportColumn>,
    pub rows: Vec<ReportRow>,
}

/// Roster order: last name, then first name, ignoring case. Ties fall back to
/// the id so the order is total.
pub fn compare_students(a: &User, b: &User) -> Ordering {
    a.last_name
        .to_lowercase()
        .cmp(&b.last_name.to_lowercase())
        .then_with(|| a.first_name.to_lowercase().cmp(&b.first_name.to_lowercase()))
        .then_with(|| a.id.cmp(&b.id))
}

fn compare_sessions(a: &Session, b: &Session) -> Ordering {
    a.generated_at.cmp(&b.generated_at).then_with(|| a.id.cmp(&b.id))
}

pub fn build_attendance_report(
    course: &Course,
    roster: &[User],
    sessions: &[Session],
    scans: &[Scan],
) -> AttendanceReport {
    let mut students: Vec<&User> = roster.iter().collect();
    students.sort_by(|a, b| compare_students(a, b));

    let mut ordered_sessions: Vec<&Session> = sessions.iter().collect();
    ordered_sessions.sort_by(|a, b| compare_sessions(a, b));

    let attended: HashSet<(Uuid, Uuid)> = scans.iter().map(|s| (s.session_id, s.student_id)).collect();

    let columns = ordered_sessions
        .iter()
        .map(|s| ReportColumn {
            session_id: s.id,
            generated_at: s.generated_at,
        })
        .collect();

    let rows = students
        .iter()
        .map(|student| ReportRow {
            student_id: student.id,
            id_number: student.id_number.clone(),
            first_name: student.first_name.clone(),
            last_name: student.last_name.clone(),
            statuses: ordered_sessions
                .iter()
                .map(|session| {
                    if attended.contains(&(session.id, student.id)) {
                        AttendanceStatus::Present
                    } else {
                        AttendanceStatus::Absent
                    }
                })
                .collect(),
        })
        .collect();

    AttendanceReport {
        course_id: course.id,
        course_code: course.code.clone(),
        course_name: course.name.clone(),
        columns,
        rows,
    }
}

/// `Jan 15, 2024 at 5:00 PM` in the given display offset.
pub fn format_session_header(generated_at: DateTime<Utc>, offset: FixedOffset) -> String {
    generated_at
        .with_timezone(&offset)
        .format("%b %-d, %Y at %-I:%M %p")
        .to_string()
}

impl AttendanceReport {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.rows.is_empty()
    }

    /// Writes the report as CSV. Every field is quoted; the title line has a
    /// single field, so the writer runs in flexible mode.
    pub fn write_csv<W: io::Write>(&self, writer: W, offset: FixedOffset) -> Result<(), csv::Error> {
        let mut csv_writer = csv::WriterBuilder::new()
            .flexible(true)
            .quote_style(csv::QuoteStyle::Always)
            .from_writer(writer);

        csv_writer.write_record([format!("Course: {} - {}", self.course_code, self.course_name)])?;

        let mut header = vec!["ID Number".to_string(), "Student Name".to_string()];
        header.extend(
            self.columns
                .iter()
                .map(|c| format_session_header(c.generated_at, offset)),
        );
        csv_writer.write_record(&header)?;

        for row in &self.rows {
            let mut record = vec![row.id_number.clone().unwrap_or_default(), row.display_name()];
            record.extend(row.statuses.iter().map(|s| s.as_str().to_string()));
            csv_writer.write_record(&record)?;
        }

        csv_writer.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self, offset: FixedOffset) -> PortResult<String> {
        let mut buffer = Vec::new();
        self.write_csv(&mut buffer, offset)
            .map_err(|e| PortError::Unexpected(format!("failed to render CSV: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| PortError::Unexpected(e.to_string()))
    }

    /// `CS101_Attendance_20240115T090000Z.csv`
    pub fn file_name(&self, now: DateTime<Utc>) -> String {
        format!("{}_Attendance_{}.csv", self.course_code, now.format("%Y%m%dT%H%M%SZ"))
    }
}

//=========================================================================================
// Loading Inputs Through the Port
//=========================================================================================

pub struct ReportAggregator {
    db: Arc<dyn DatabaseService>,
}

impl ReportAggregator {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    /// Builds the report for all of a course's sessions, or for `session_ids`
    /// when given. Every requested id must be a session of this course.
    pub async fn build(&self, course_id: Uuid, session_ids: Option<&[Uuid]>) -> PortResult<AttendanceReport> {
        let course = self.db.get_course(course_id).await?;
        let roster = self.db.get_roster(course_id).await?;
        let all_sessions = self.db.list_sessions_for_course(course_id).await?;

        let sessions = match session_ids {
            None => all_sessions,
            Some(ids) => select_sessions(all_sessions, ids, &course)?,
        };

        let ids: Vec<Uuid> = sessions.iter().map(|s| s.id).collect();
        let scans = self.db.list_scans_for_sessions(&ids).await?;
        debug!(
            "Building report for {}: {} students, {} sessions, {} scans",
            course.code,
            roster.len(),
            sessions.len(),
            scans.len()
        );

        Ok(build_attendance_report(&course, &roster, &sessions, &scans))
    }

    /// Sessions of a course in generation order, each with its scans.
    pub async fn fetch_session_records(
        &self,
        course_id: Uuid,
        session_id: Option<Uuid>,
    ) -> PortResult<Vec<SessionRecord>> {
        let course = self.db.get_course(course_id).await?;
        let all_sessions = self.db.list_sessions_for_course(course_id).await?;
        let mut sessions = match session_id {
            None => all_sessions,
            Some(id) => select_sessions(all_sessions, &[id], &course)?,
        };
        sessions.sort_by(compare_sessions);

        let ids: Vec<Uuid> = sessions.iter().map(|s| s.id).collect();
        let mut scans_by_session: HashMap<Uuid, Vec<Scan>> = HashMap::new();
        for scan in self.db.list_scans_for_sessions(&ids).await? {
            scans_by_session.entry(scan.session_id).or_default().push(scan);
        }

        Ok(sessions
            .into_iter()
            .map(|session| {
                let mut scans = scans_by_session.remove(&session.id).unwrap_or_default();
                scans.sort_by(|a, b| a.scanned_at.cmp(&b.scanned_at).then_with(|| a.id.cmp(&b.id)));
                SessionRecord { session, scans }
            })
            .collect())
    }
}

fn select_sessions(all: Vec<Session>, ids: &[Uuid], course: &Course) -> PortResult<Vec<Session>> {
    let by_id: HashMap<Uuid, Session> = all.into_iter().map(|s| (s.id, s)).collect();
    let mut seen = HashSet::new();
    let mut selected = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(*id) {
            continue;
        }
        let session = by_id.get(id).cloned().ok_or_else(|| {
            PortError::NotFound(format!("Session {} not found in course {}", id, course.code))
        })?;
        selected.push(session);
    }
    Ok(selected)
}

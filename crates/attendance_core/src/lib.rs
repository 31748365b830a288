pub mod access;
pub mod clock;
pub mod countdown;
pub mod domain;
pub mod issuer;
pub mod memory;
pub mod payload;
pub mod ports;
pub mod recorder;
pub mod report;

#[cfg(test)]
mod test_support;

pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{
    ClassSchedule, Course, CourseUpdate, NewCourse, NewUser, Role, Scan, ScanEvent, Session, SessionRecord, User,
    UserCredentials, UserUpdate,
};
pub use issuer::{IssuedSession, SessionIssuer, DEFAULT_SESSION_VALIDITY_MINUTES};
pub use memory::InMemoryDatabase;
pub use payload::QrPayload;
pub use ports::{DatabaseService, PortError, PortResult, ScanEventStream, ScanNotifier};
pub use recorder::{ScanRecorder, ScanResult};
pub use report::{AttendanceReport, AttendanceStatus, ReportAggregator, ReportColumn, ReportRow};

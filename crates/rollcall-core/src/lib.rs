//! rollcall-core — Face template matching and attendance recording.
//!
//! Pure domain logic: templates arrive from an external embedding model,
//! the matcher resolves them to an enrolled employee and the recorder
//! applies the per-day check-in/check-out state machine.

pub mod matcher;
pub mod recorder;
pub mod report;
pub mod template;
pub mod types;

pub use matcher::{EuclideanMatcher, MatchError, Matcher, AMBIGUITY_EPSILON};
pub use recorder::{
    AttendanceOutcome, AttendanceStore, InsertOutcome, MemoryStore, Recorder, ScanDecision,
};
pub use report::{
    absentees, daily_report, summarize_range, DailyLine, DailyReport, EmployeeSummary,
};
pub use template::{FaceTemplate, TemplateError};
pub use types::{
    AttendanceDay, AttendanceStatus, EmployeeId, EmployeeProfile, EnrolledTemplate, MatchResult,
    RejectReason, ScanEvent,
};

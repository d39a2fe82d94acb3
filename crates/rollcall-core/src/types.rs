use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::template::FaceTemplate;

/// Opaque employee identity.
pub type EmployeeId = Uuid;

/// An employee record. The face template itself is never part of the
/// profile; `has_template` tells whether one is enrolled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeProfile {
    pub id: EmployeeId,
    pub name: String,
    pub department: String,
    pub position: String,
    pub email: Option<String>,
    pub has_template: bool,
    pub created_at: DateTime<Utc>,
}

/// A gallery entry: one enrolled template and the employee it belongs to.
#[derive(Debug, Clone)]
pub struct EnrolledTemplate {
    pub employee_id: EmployeeId,
    pub employee_name: String,
    pub template: FaceTemplate,
}

/// Attendance status tag for one employee on one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
    /// Only ever derived at reporting time, never stored.
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "late" => Some(AttendanceStatus::Late),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }
}

/// Attendance record keyed by (employee, calendar date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceDay {
    pub employee_id: EmployeeId,
    pub date: NaiveDate,
    pub check_in: NaiveTime,
    pub check_out: Option<NaiveTime>,
    pub status: AttendanceStatus,
    /// Match confidence of the check-in scan, if it came from a face match.
    pub confidence: Option<f32>,
}

impl AttendanceDay {
    pub fn is_complete(&self) -> bool {
        self.check_out.is_some()
    }
}

/// The event a successful scan produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanEvent {
    CheckIn,
    CheckOut,
}

/// Why a probe was not matched to an employee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// The gallery is empty: nothing to compare against.
    #[serde(rename = "no_face_detected")]
    NoEnrolledTemplates,
    #[serde(rename = "not_recognized")]
    NotRecognized,
    /// Two distinct employees are equidistant from the probe.
    #[serde(rename = "ambiguous_match")]
    AmbiguousMatch,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::NoEnrolledTemplates => "no_face_detected",
            RejectReason::NotRecognized => "not_recognized",
            RejectReason::AmbiguousMatch => "ambiguous_match",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of matching a probe template against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Matched {
        employee_id: EmployeeId,
        /// Raw Euclidean distance to the matched template.
        distance: f32,
        /// Threshold-normalized score in [0, 1], for display only.
        confidence: f32,
    },
    Rejected(RejectReason),
}

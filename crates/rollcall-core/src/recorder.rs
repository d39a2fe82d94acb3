//! Attendance recording: the per-(employee, date) scan state machine.
//!
//! ```text
//! NoRecord --scan--> CheckedIn --scan--> Complete --scan--> Complete (no-op)
//! ```
//!
//! The date key is the calendar date of the scan in the deployment's local
//! time zone, so midnight always starts a fresh `NoRecord`.

use std::collections::BTreeMap;
use std::convert::Infallible;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::types::{AttendanceDay, AttendanceStatus, EmployeeId, ScanEvent};

/// What a scan should do, given the stored row for the day (if any).
#[derive(Debug, Clone, PartialEq)]
pub enum ScanDecision {
    CheckIn(AttendanceDay),
    CheckOut(AttendanceDay),
    /// Scan time precedes the stored check-in; nothing is written.
    BeforeCheckIn(AttendanceDay),
    AlreadyComplete(AttendanceDay),
}

/// Outcome of a recorded scan, carrying the row as stored afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum AttendanceOutcome {
    CheckInRecorded(AttendanceDay),
    CheckOutRecorded(AttendanceDay),
    /// Both check-in and check-out are already set; nothing was written.
    AlreadyComplete(AttendanceDay),
}

impl AttendanceOutcome {
    pub fn day(&self) -> &AttendanceDay {
        match self {
            AttendanceOutcome::CheckInRecorded(d)
            | AttendanceOutcome::CheckOutRecorded(d)
            | AttendanceOutcome::AlreadyComplete(d) => d,
        }
    }

    pub fn event(&self) -> Option<ScanEvent> {
        match self {
            AttendanceOutcome::CheckInRecorded(_) => Some(ScanEvent::CheckIn),
            AttendanceOutcome::CheckOutRecorded(_) => Some(ScanEvent::CheckOut),
            AttendanceOutcome::AlreadyComplete(_) => None,
        }
    }
}

/// Result of inserting a new day row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row for (employee, date) already exists.
    Conflict,
}

/// Persistence seam for attendance rows.
pub trait AttendanceStore {
    type Error;

    fn get_day(
        &mut self,
        employee_id: EmployeeId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceDay>, Self::Error>;

    fn insert_day(&mut self, day: &AttendanceDay) -> Result<InsertOutcome, Self::Error>;

    /// Set the check-out time of an existing row whose check-out is unset.
    /// Returns `false` when no such row exists.
    fn set_check_out(
        &mut self,
        employee_id: EmployeeId,
        date: NaiveDate,
        at: NaiveTime,
    ) -> Result<bool, Self::Error>;
}

/// Lateness rule: strictly after the cutoff is late.
pub fn status_for(time: NaiveTime, cutoff: NaiveTime) -> AttendanceStatus {
    if time > cutoff {
        AttendanceStatus::Late
    } else {
        AttendanceStatus::Present
    }
}

/// Pure transition function of the state machine.
pub fn decide(
    existing: Option<&AttendanceDay>,
    employee_id: EmployeeId,
    at: NaiveDateTime,
    cutoff: NaiveTime,
    confidence: Option<f32>,
) -> ScanDecision {
    match existing {
        None => ScanDecision::CheckIn(AttendanceDay {
            employee_id,
            date: at.date(),
            check_in: at.time(),
            check_out: None,
            status: status_for(at.time(), cutoff),
            confidence,
        }),
        Some(day) if !day.is_complete() && at.time() < day.check_in => {
            ScanDecision::BeforeCheckIn(day.clone())
        }
        Some(day) if !day.is_complete() => ScanDecision::CheckOut(AttendanceDay {
            check_out: Some(at.time()),
            ..day.clone()
        }),
        Some(day) => ScanDecision::AlreadyComplete(day.clone()),
    }
}

/// Applies scans to a store using a fixed lateness cutoff.
#[derive(Debug, Clone, Copy)]
pub struct Recorder {
    cutoff: NaiveTime,
}

impl Recorder {
    pub fn new(cutoff: NaiveTime) -> Self {
        Self { cutoff }
    }

    /// Record one scan for `employee_id` at local time `at`.
    ///
    /// The caller must serialize calls for the same employee and date; the
    /// store's conflict/guard results cover the case where it does not.
    pub fn record_scan<S: AttendanceStore>(
        &self,
        store: &mut S,
        employee_id: EmployeeId,
        at: NaiveDateTime,
        confidence: Option<f32>,
    ) -> Result<AttendanceOutcome, S::Error> {
        let date = at.date();
        let existing = store.get_day(employee_id, date)?;

        match decide(existing.as_ref(), employee_id, at, self.cutoff, confidence) {
            ScanDecision::CheckIn(day) => match store.insert_day(&day)? {
                InsertOutcome::Inserted => {
                    tracing::info!(
                        employee = %employee_id,
                        %date,
                        time = %day.check_in,
                        status = day.status.as_str(),
                        "check-in recorded"
                    );
                    Ok(AttendanceOutcome::CheckInRecorded(day))
                }
                InsertOutcome::Conflict => {
                    // A concurrent check-in won; this scan collapses into it.
                    let stored = store.get_day(employee_id, date)?.unwrap_or(day);
                    tracing::debug!(employee = %employee_id, %date, "duplicate check-in collapsed");
                    Ok(AttendanceOutcome::CheckInRecorded(stored))
                }
            },
            ScanDecision::CheckOut(day) => {
                let at_time = at.time();
                if store.set_check_out(employee_id, date, at_time)? {
                    tracing::info!(employee = %employee_id, %date, time = %at_time, "check-out recorded");
                    Ok(AttendanceOutcome::CheckOutRecorded(day))
                } else {
                    let stored = store.get_day(employee_id, date)?.unwrap_or(day);
                    Ok(AttendanceOutcome::AlreadyComplete(stored))
                }
            }
            ScanDecision::BeforeCheckIn(day) => {
                tracing::debug!(
                    employee = %employee_id,
                    %date,
                    time = %at.time(),
                    check_in = %day.check_in,
                    "scan earlier than check-in collapsed"
                );
                Ok(AttendanceOutcome::CheckInRecorded(day))
            }
            ScanDecision::AlreadyComplete(day) => {
                tracing::info!(employee = %employee_id, %date, "attendance already complete");
                Ok(AttendanceOutcome::AlreadyComplete(day))
            }
        }
    }
}

/// In-memory attendance store.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    days: BTreeMap<(EmployeeId, NaiveDate), AttendanceDay>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn days(&self) -> impl Iterator<Item = &AttendanceDay> {
        self.days.values()
    }

}

impl AttendanceStore for MemoryStore {
    type Error = Infallible;

    fn get_day(
        &mut self,
        employee_id: EmployeeId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceDay>, Infallible> {
        Ok(self.days.get(&(employee_id, date)).cloned())
    }

    fn insert_day(&mut self, day: &AttendanceDay) -> Result<InsertOutcome, Infallible> {
        let key = (day.employee_id, day.date);
        if self.days.contains_key(&key) {
            return Ok(InsertOutcome::Conflict);
        }
        self.days.insert(key, day.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn set_check_out(
        &mut self,
        employee_id: EmployeeId,
        date: NaiveDate,
        at: NaiveTime,
    ) -> Result<bool, Infallible> {
        match self.days.get_mut(&(employee_id, date)) {
            Some(day) if day.check_out.is_none() => {
                day.check_out = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

//! Reporting over stored attendance rows.
//!
//! Absence is derived here: an employee with no row for a date is absent.
//! No absent row is ever written.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::types::{AttendanceDay, AttendanceStatus, EmployeeId, EmployeeProfile};

/// One employee's line in a daily report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLine {
    pub employee_id: EmployeeId,
    pub name: String,
    pub department: String,
    pub status: AttendanceStatus,
    pub check_in: Option<NaiveTime>,
    pub check_out: Option<NaiveTime>,
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub lines: Vec<DailyLine>,
    pub present: usize,
    pub late: usize,
    pub absent: usize,
    pub checked_out: usize,
}

/// Build the report for `date`, one line per employee in `employees`.
/// Rows in `days` for other dates or unknown employees are ignored.
pub fn daily_report(
    employees: &[EmployeeProfile],
    days: &[AttendanceDay],
    date: NaiveDate,
) -> DailyReport {
    let by_employee: HashMap<EmployeeId, &AttendanceDay> = days
        .iter()
        .filter(|d| d.date == date)
        .map(|d| (d.employee_id, d))
        .collect();

    let mut report = DailyReport {
        date,
        lines: Vec::with_capacity(employees.len()),
        present: 0,
        late: 0,
        absent: 0,
        checked_out: 0,
    };

    let absent: HashSet<EmployeeId> = absentees(employees, days, date)
        .into_iter()
        .map(|e| e.id)
        .collect();

    for employee in employees {
        let attended = by_employee
            .get(&employee.id)
            .filter(|_| !absent.contains(&employee.id));
        let line = match attended {
            Some(day) => {
                match day.status {
                    AttendanceStatus::Late => report.late += 1,
                    _ => report.present += 1,
                }
                if day.is_complete() {
                    report.checked_out += 1;
                }
                DailyLine {
                    employee_id: employee.id,
                    name: employee.name.clone(),
                    department: employee.department.clone(),
                    status: day.status,
                    check_in: Some(day.check_in),
                    check_out: day.check_out,
                    confidence: day.confidence,
                }
            }
            None => {
                report.absent += 1;
                DailyLine {
                    employee_id: employee.id,
                    name: employee.name.clone(),
                    department: employee.department.clone(),
                    status: AttendanceStatus::Absent,
                    check_in: None,
                    check_out: None,
                    confidence: None,
                }
            }
        };
        report.lines.push(line);
    }

    report
}

/// Employees with no attendance row for `date`.
pub fn absentees<'a>(
    employees: &'a [EmployeeProfile],
    days: &[AttendanceDay],
    date: NaiveDate,
) -> Vec<&'a EmployeeProfile> {
    employees
        .iter()
        .filter(|e| !days.iter().any(|d| d.date == date && d.employee_id == e.id))
        .collect()
}

/// Per-employee totals over an inclusive date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeSummary {
    pub employee_id: EmployeeId,
    pub days_attended: usize,
    pub days_late: usize,
    pub days_completed: usize,
    /// Mean check-in match confidence over days that carry one.
    pub mean_confidence: Option<f32>,
}

pub fn summarize_range(
    days: &[AttendanceDay],
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<EmployeeSummary> {
    let mut acc: BTreeMap<EmployeeId, (EmployeeSummary, f32, usize)> = BTreeMap::new();

    for day in days.iter().filter(|d| d.date >= from && d.date <= to) {
        let (summary, conf_sum, conf_n) = acc.entry(day.employee_id).or_insert_with(|| {
            (
                EmployeeSummary {
                    employee_id: day.employee_id,
                    days_attended: 0,
                    days_late: 0,
                    days_completed: 0,
                    mean_confidence: None,
                },
                0.0,
                0,
            )
        });
        summary.days_attended += 1;
        if day.status == AttendanceStatus::Late {
            summary.days_late += 1;
        }
        if day.is_complete() {
            summary.days_completed += 1;
        }
        if let Some(c) = day.confidence {
            *conf_sum += c;
            *conf_n += 1;
        }
    }

    acc.into_values()
        .map(|(mut summary, conf_sum, conf_n)| {
            if conf_n > 0 {
                summary.mean_confidence = Some(conf_sum / conf_n as f32);
            }
            summary
        })
        .collect()
}

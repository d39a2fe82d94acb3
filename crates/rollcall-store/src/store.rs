//! Employee and attendance persistence on a single SQLite connection.

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rollcall_core::{
    AttendanceDay, AttendanceOutcome, AttendanceStatus, AttendanceStore, EmployeeId,
    EmployeeProfile, EnrolledTemplate, FaceTemplate, InsertOutcome, Recorder,
};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::cipher::{CipherError, TemplateCipher};
use crate::schema;

const DATE_FMT: &str = "%Y-%m-%d";
const TIME_FMT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("template for employee {employee}: {source}")]
    Template {
        employee: String,
        #[source]
        source: CipherError,
    },
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Intake fields for a new employee.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEmployee {
    pub name: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Metadata changes; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmployeeUpdate {
    pub name: Option<String>,
    pub department: Option<String>,
    pub position: Option<String>,
    pub email: Option<String>,
    /// Remove the stored email; takes precedence over `email`.
    #[serde(default)]
    pub clear_email: bool,
}

/// SQLite-backed store. Owns its connection; callers serialize access.
pub struct Store {
    conn: Connection,
    cipher: TemplateCipher,
}

impl Store {
    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path, cipher: TemplateCipher) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        schema::init(&conn)?;
        tracing::info!(path = %path.display(), "database opened");
        Ok(Self { conn, cipher })
    }

    pub fn open_in_memory(cipher: TemplateCipher) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::init(&conn)?;
        Ok(Self { conn, cipher })
    }

    // ---------------------------
    // Employees
    // ---------------------------

    /// Create a profile, optionally enrolling a template in the same write.
    /// The template must already be validated for the deployment dimension.
    pub fn create_employee(
        &self,
        new: &NewEmployee,
        template: Option<&FaceTemplate>,
    ) -> Result<EmployeeProfile, StoreError> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let blob = template
            .map(|t| self.seal(&id, t))
            .transpose()?;

        self.conn.execute(
            "INSERT INTO employees (id, name, department, position, email, template, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.to_string(),
                new.name,
                new.department,
                new.position,
                new.email,
                blob,
                created_at.to_rfc3339(),
            ],
        )?;

        Ok(EmployeeProfile {
            id,
            name: new.name.clone(),
            department: new.department.clone(),
            position: new.position.clone(),
            email: new.email.clone(),
            has_template: template.is_some(),
            created_at,
        })
    }

    pub fn get_employee(&self, id: EmployeeId) -> Result<Option<EmployeeProfile>, StoreError> {
        let profile = self
            .conn
            .query_row(
                "SELECT id, name, department, position, email, template IS NOT NULL, created_at
                 FROM employees WHERE id = ?1",
                [id.to_string()],
                map_employee,
            )
            .optional()?;
        Ok(profile)
    }

    pub fn list_employees(&self) -> Result<Vec<EmployeeProfile>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, department, position, email, template IS NOT NULL, created_at
             FROM employees ORDER BY name, id",
        )?;
        let rows = stmt.query_map([], map_employee)?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn update_employee(
        &self,
        id: EmployeeId,
        update: &EmployeeUpdate,
    ) -> Result<Option<EmployeeProfile>, StoreError> {
        let changed = self.conn.execute(
            "UPDATE employees SET
                name = COALESCE(?2, name),
                department = COALESCE(?3, department),
                position = COALESCE(?4, position),
                email = CASE WHEN ?6 THEN NULL ELSE COALESCE(?5, email) END
             WHERE id = ?1",
            params![
                id.to_string(),
                update.name,
                update.department,
                update.position,
                update.email,
                update.clear_email,
            ],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_employee(id)
    }

    /// Delete a profile and, by cascade, its attendance history.
    pub fn delete_employee(&self, id: EmployeeId) -> Result<bool, StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM employees WHERE id = ?1", [id.to_string()])?;
        Ok(changed > 0)
    }

    /// Enroll or replace an employee's template. Returns `false` if the
    /// employee does not exist.
    pub fn set_template(&self, id: EmployeeId, template: &FaceTemplate) -> Result<bool, StoreError> {
        let blob = self.seal(&id, template)?;
        let changed = self.conn.execute(
            "UPDATE employees SET template = ?2 WHERE id = ?1",
            params![id.to_string(), blob],
        )?;
        Ok(changed > 0)
    }

    pub fn clear_template(&self, id: EmployeeId) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "UPDATE employees SET template = NULL WHERE id = ?1",
            [id.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Decrypt every enrolled template.
    pub fn load_gallery(&self) -> Result<Vec<EnrolledTemplate>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, template FROM employees WHERE template IS NOT NULL ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut gallery = Vec::new();
        for r in rows {
            let (id, name, blob) = r?;
            let employee_id = parse_uuid(&id)?;
            let template = self
                .cipher
                .decrypt(&blob)
                .map_err(|source| StoreError::Template {
                    employee: id.clone(),
                    source,
                })?;
            gallery.push(EnrolledTemplate {
                employee_id,
                employee_name: name,
                template,
            });
        }
        Ok(gallery)
    }

    /// (employees, employees with a template)
    pub fn counts(&self) -> Result<(usize, usize), StoreError> {
        let (total, enrolled): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COUNT(template) FROM employees",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((total as usize, enrolled as usize))
    }

    fn seal(&self, id: &Uuid, template: &FaceTemplate) -> Result<Vec<u8>, StoreError> {
        self.cipher
            .encrypt(template)
            .map_err(|source| StoreError::Template {
                employee: id.to_string(),
                source,
            })
    }

    // ---------------------------
    // Attendance
    // ---------------------------

    /// Run one scan through the recorder inside an immediate transaction.
    pub fn record_scan(
        &mut self,
        recorder: &Recorder,
        employee_id: EmployeeId,
        at: NaiveDateTime,
        confidence: Option<f32>,
    ) -> Result<AttendanceOutcome, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = recorder.record_scan(&mut SqlAttendance(&tx), employee_id, at, confidence)?;
        tx.commit()?;
        Ok(outcome)
    }

    pub fn attendance_on(&self, date: NaiveDate) -> Result<Vec<AttendanceDay>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT employee_id, date, check_in, check_out, status, confidence
             FROM attendance WHERE date = ?1 ORDER BY check_in ASC",
        )?;
        let rows = stmt.query_map([date.format(DATE_FMT).to_string()], map_day)?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Rows in the inclusive range, optionally for one employee.
    pub fn attendance_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        employee: Option<EmployeeId>,
    ) -> Result<Vec<AttendanceDay>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT employee_id, date, check_in, check_out, status, confidence
             FROM attendance
             WHERE date >= ?1 AND date <= ?2 AND (?3 IS NULL OR employee_id = ?3)
             ORDER BY date ASC, check_in ASC",
        )?;
        let rows = stmt.query_map(
            params![
                from.format(DATE_FMT).to_string(),
                to.format(DATE_FMT).to_string(),
                employee.map(|id| id.to_string()),
            ],
            map_day,
        )?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

/// Recorder seam over an open transaction.
struct SqlAttendance<'c>(&'c Connection);

impl AttendanceStore for SqlAttendance<'_> {
    type Error = StoreError;

    fn get_day(
        &mut self,
        employee_id: EmployeeId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceDay>, StoreError> {
        let day = self
            .0
            .query_row(
                "SELECT employee_id, date, check_in, check_out, status, confidence
                 FROM attendance WHERE employee_id = ?1 AND date = ?2",
                params![employee_id.to_string(), date.format(DATE_FMT).to_string()],
                map_day,
            )
            .optional()?;
        Ok(day)
    }

    fn insert_day(&mut self, day: &AttendanceDay) -> Result<InsertOutcome, StoreError> {
        let inserted = self.0.execute(
            "INSERT INTO attendance (employee_id, date, check_in, check_out, status, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(employee_id, date) DO NOTHING",
            params![
                day.employee_id.to_string(),
                day.date.format(DATE_FMT).to_string(),
                day.check_in.format(TIME_FMT).to_string(),
                day.check_out.map(|t| t.format(TIME_FMT).to_string()),
                day.status.as_str(),
                day.confidence,
            ],
        )?;
        Ok(if inserted == 1 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Conflict
        })
    }

    fn set_check_out(
        &mut self,
        employee_id: EmployeeId,
        date: NaiveDate,
        at: NaiveTime,
    ) -> Result<bool, StoreError> {
        let changed = self.0.execute(
            "UPDATE attendance SET check_out = ?3
             WHERE employee_id = ?1 AND date = ?2 AND check_out IS NULL",
            params![
                employee_id.to_string(),
                date.format(DATE_FMT).to_string(),
                at.format(TIME_FMT).to_string(),
            ],
        )?;
        Ok(changed == 1)
    }
}

fn conversion_error(col: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        col,
        rusqlite::types::Type::Text,
        Box::new(StoreError::Corrupt(msg)),
    )
}

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|_| StoreError::Corrupt(format!("invalid employee id: {s}")))
}

fn map_employee(row: &Row) -> rusqlite::Result<EmployeeProfile> {
    let id_str: String = row.get(0)?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|_| conversion_error(0, format!("invalid employee id: {id_str}")))?;
    let created_str: String = row.get(6)?;
    let created_at = DateTime::parse_from_rfc3339(&created_str)
        .map_err(|_| conversion_error(6, format!("invalid created_at: {created_str}")))?
        .with_timezone(&Utc);

    Ok(EmployeeProfile {
        id,
        name: row.get(1)?,
        department: row.get(2)?,
        position: row.get(3)?,
        email: row.get(4)?,
        has_template: row.get(5)?,
        created_at,
    })
}

fn map_day(row: &Row) -> rusqlite::Result<AttendanceDay> {
    let id_str: String = row.get(0)?;
    let employee_id = Uuid::parse_str(&id_str)
        .map_err(|_| conversion_error(0, format!("invalid employee id: {id_str}")))?;

    let date_str: String = row.get(1)?;
    let date = NaiveDate::parse_from_str(&date_str, DATE_FMT)
        .map_err(|_| conversion_error(1, format!("invalid date: {date_str}")))?;

    let in_str: String = row.get(2)?;
    let check_in = NaiveTime::parse_from_str(&in_str, TIME_FMT)
        .map_err(|_| conversion_error(2, format!("invalid check_in: {in_str}")))?;

    let out_str: Option<String> = row.get(3)?;
    let check_out = out_str
        .map(|s| {
            NaiveTime::parse_from_str(&s, TIME_FMT)
                .map_err(|_| conversion_error(3, format!("invalid check_out: {s}")))
        })
        .transpose()?;

    let status_str: String = row.get(4)?;
    let status = AttendanceStatus::from_db_str(&status_str)
        .ok_or_else(|| conversion_error(4, format!("invalid status: {status_str}")))?;

    let confidence: Option<f64> = row.get(5)?;

    Ok(AttendanceDay {
        employee_id,
        date,
        check_in,
        check_out,
        status,
        confidence: confidence.map(|c| c as f32),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory(TemplateCipher::random()).unwrap()
    }

    fn intake(name: &str) -> NewEmployee {
        NewEmployee {
            name: name.into(),
            department: "Ops".into(),
            position: "Technician".into(),
            email: None,
        }
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn recorder() -> Recorder {
        Recorder::new(NaiveTime::from_hms_opt(9, 0, 0).unwrap())
    }

    #[test]
    fn test_create_and_get_employee() {
        let store = store();
        let template = FaceTemplate::new(vec![0.1, 0.2, 0.3]);
        let created = store.create_employee(&intake("Ana"), Some(&template)).unwrap();
        assert!(created.has_template);

        let fetched = store.get_employee(created.id).unwrap().unwrap();
        assert_eq!(fetched.name, "Ana");
        assert_eq!(fetched.department, "Ops");
        assert!(fetched.has_template);
        assert_eq!(store.get_employee(Uuid::new_v4()).unwrap(), None);
    }

    #[test]
    fn test_templates_are_encrypted_at_rest() {
        let store = store();
        let template = FaceTemplate::new(vec![0.5, 0.25]);
        let created = store.create_employee(&intake("Ana"), Some(&template)).unwrap();
        let blob: Vec<u8> = store
            .conn
            .query_row(
                "SELECT template FROM employees WHERE id = ?1",
                [created.id.to_string()],
                |row| row.get(0),
            )
            .unwrap();
        assert_ne!(blob, template.to_le_bytes());

        let gallery = store.load_gallery().unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery[0].template, template);
        assert_eq!(gallery[0].employee_name, "Ana");
    }

    #[test]
    fn test_reenroll_and_clear_template() {
        let store = store();
        let e = store.create_employee(&intake("Ben"), None).unwrap();
        assert!(store.load_gallery().unwrap().is_empty());

        let t1 = FaceTemplate::new(vec![1.0, 0.0]);
        let t2 = FaceTemplate::new(vec![0.0, 1.0]);
        assert!(store.set_template(e.id, &t1).unwrap());
        assert!(store.set_template(e.id, &t2).unwrap());
        assert_eq!(store.load_gallery().unwrap()[0].template, t2);
        assert_eq!(store.counts().unwrap(), (1, 1));

        assert!(store.clear_template(e.id).unwrap());
        assert!(store.load_gallery().unwrap().is_empty());
        assert!(!store.get_employee(e.id).unwrap().unwrap().has_template);
        assert!(!store.set_template(Uuid::new_v4(), &t1).unwrap());
    }

    #[test]
    fn test_update_employee() {
        let store = store();
        let e = store.create_employee(&intake("Cleo"), None).unwrap();
        let updated = store
            .update_employee(
                e.id,
                &EmployeeUpdate {
                    position: Some("Lead".into()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.position, "Lead");
        assert_eq!(updated.name, "Cleo");

        let with_email = store
            .update_employee(
                e.id,
                &EmployeeUpdate {
                    email: Some("cleo@example.com".into()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(with_email.email.as_deref(), Some("cleo@example.com"));

        let untouched = store
            .update_employee(e.id, &EmployeeUpdate::default())
            .unwrap()
            .unwrap();
        assert_eq!(untouched.email.as_deref(), Some("cleo@example.com"));

        let cleared = store
            .update_employee(
                e.id,
                &EmployeeUpdate {
                    clear_email: true,
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(cleared.email, None);
        assert_eq!(cleared.position, "Lead");
        assert!(store
            .update_employee(Uuid::new_v4(), &EmployeeUpdate::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_scan_sequence_persists() {
        let mut store = store();
        let e = store.create_employee(&intake("Dan"), None).unwrap();
        let rec = recorder();

        let first = store.record_scan(&rec, e.id, at("2026-05-04 09:10:00"), Some(0.75)).unwrap();
        assert!(matches!(first, AttendanceOutcome::CheckInRecorded(_)));
        assert_eq!(first.day().status, AttendanceStatus::Late);

        let second = store.record_scan(&rec, e.id, at("2026-05-04 17:00:00"), None).unwrap();
        assert!(matches!(second, AttendanceOutcome::CheckOutRecorded(_)));

        let third = store.record_scan(&rec, e.id, at("2026-05-04 17:05:00"), None).unwrap();
        assert!(matches!(third, AttendanceOutcome::AlreadyComplete(_)));

        let date = NaiveDate::from_ymd_opt(2026, 5, 4).unwrap();
        let rows = store.attendance_on(date).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].check_out, NaiveTime::from_hms_opt(17, 0, 0));
        assert_eq!(rows[0].confidence, Some(0.75));
    }

    #[test]
    fn test_duplicate_insert_is_conflict() {
        let store = store();
        let e = store.create_employee(&intake("Eve"), None).unwrap();
        let day = AttendanceDay {
            employee_id: e.id,
            date: NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(),
            check_in: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            check_out: None,
            status: AttendanceStatus::Present,
            confidence: None,
        };
        let mut sql = SqlAttendance(&store.conn);
        assert_eq!(sql.insert_day(&day).unwrap(), InsertOutcome::Inserted);
        assert_eq!(sql.insert_day(&day).unwrap(), InsertOutcome::Conflict);
    }

    #[test]
    fn test_delete_cascades_attendance() {
        let mut store = store();
        let e = store.create_employee(&intake("Finn"), None).unwrap();
        store.record_scan(&recorder(), e.id, at("2026-05-04 08:00:00"), None).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 5, 4).unwrap();
        assert_eq!(store.attendance_on(date).unwrap().len(), 1);

        assert!(store.delete_employee(e.id).unwrap());
        assert!(store.attendance_on(date).unwrap().is_empty());
        assert!(!store.delete_employee(e.id).unwrap());
    }

    #[test]
    fn test_attendance_between_filters() {
        let mut store = store();
        let a = store.create_employee(&intake("Gus"), None).unwrap();
        let b = store.create_employee(&intake("Hal"), None).unwrap();
        let rec = recorder();
        for day in ["2026-05-01", "2026-05-02", "2026-05-03"] {
            store.record_scan(&rec, a.id, at(&format!("{day} 08:00:00")), None).unwrap();
            store.record_scan(&rec, b.id, at(&format!("{day} 08:30:00")), None).unwrap();
        }
        let from = NaiveDate::from_ymd_opt(2026, 5, 2).unwrap();
        let to = NaiveDate::from_ymd_opt(2026, 5, 3).unwrap();
        assert_eq!(store.attendance_between(from, to, None).unwrap().len(), 4);
        let only_a = store.attendance_between(from, to, Some(a.id)).unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|d| d.employee_id == a.id));
    }

    #[test]
    fn test_wrong_key_surfaces_on_gallery_load() {
        let dir = std::env::temp_dir().join(format!("rollcall-store-{}", Uuid::new_v4()));
        let path = dir.join("rollcall.db");
        {
            let store = Store::open(&path, TemplateCipher::from_passphrase("a")).unwrap();
            store
                .create_employee(&intake("Ivy"), Some(&FaceTemplate::new(vec![0.1, 0.9])))
                .unwrap();
        }
        let store = Store::open(&path, TemplateCipher::from_passphrase("b")).unwrap();
        assert!(matches!(
            store.load_gallery(),
            Err(StoreError::Template { .. })
        ));
        let _ = std::fs::remove_dir_all(dir);
    }
}

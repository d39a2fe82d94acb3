use rusqlite::Connection;

/// Create tables if missing. Absent rows cannot be stored: the status
/// column only admits what a check-in writes.
pub fn init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS employees (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            department  TEXT NOT NULL DEFAULT '',
            position    TEXT NOT NULL DEFAULT '',
            email       TEXT,
            template    BLOB,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS attendance (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            employee_id  TEXT NOT NULL REFERENCES employees(id) ON DELETE CASCADE,
            date         TEXT NOT NULL,
            check_in     TEXT NOT NULL,
            check_out    TEXT,
            status       TEXT NOT NULL CHECK(status IN ('present','late')),
            confidence   REAL,
            UNIQUE(employee_id, date)
        );

        CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date);
        "#,
    )
}

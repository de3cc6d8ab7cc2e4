use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::calc::DEFAULT_PASSING_THRESHOLD;

pub const DB_FILE_NAME: &str = "portal.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            sr_number TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            class_label TEXT NOT NULL,
            medium TEXT NOT NULL,
            father_name TEXT NOT NULL,
            mother_name TEXT,
            date_of_birth TEXT,
            photo_url TEXT,
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_label, medium)",
        [],
    )?;

    // One exam record per (student, exam type): the duplicate guard lives in
    // the storage layer, not in a check-then-insert on the caller side.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            exam_type TEXT NOT NULL,
            exam_date TEXT,
            total_marks REAL NOT NULL,
            obtained_marks REAL NOT NULL,
            percentage REAL NOT NULL,
            grade TEXT NOT NULL,
            UNIQUE(student_id, exam_type),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_records_student ON exam_records(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_subjects(
            id TEXT PRIMARY KEY,
            exam_record_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            subject_name TEXT NOT NULL,
            max_marks REAL NOT NULL,
            obtained_marks REAL NOT NULL,
            grade TEXT NOT NULL,
            UNIQUE(exam_record_id, subject_name),
            FOREIGN KEY(exam_record_id) REFERENCES exam_records(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_subjects_record ON exam_subjects(exam_record_id)",
        [],
    )?;

    // One fee ledger per student.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL UNIQUE,
            total_fees REAL NOT NULL,
            paid_fees REAL NOT NULL,
            discount_fees REAL NOT NULL,
            bus_fees REAL NOT NULL,
            pending_fees REAL NOT NULL,
            turnover REAL NOT NULL,
            due_date TEXT,
            last_payment_date TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS homework_assignments(
            id TEXT PRIMARY KEY,
            class_label TEXT NOT NULL,
            medium TEXT NOT NULL,
            subject_name TEXT NOT NULL,
            title TEXT NOT NULL,
            details TEXT,
            assigned_date TEXT NOT NULL,
            due_date TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_homework_assignments_class
         ON homework_assignments(class_label, medium)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS homework_submissions(
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            attachment_url TEXT,
            status TEXT NOT NULL,
            grade_remark TEXT,
            UNIQUE(assignment_id, student_id),
            FOREIGN KEY(assignment_id) REFERENCES homework_assignments(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_homework_submissions_assignment
         ON homework_submissions(assignment_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_homework_submissions_student
         ON homework_submissions(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notices(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            class_label TEXT,
            medium TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notices_status ON notices(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            topic TEXT NOT NULL,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_topic ON notifications(topic)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Pass mark for overall results; workspace-configurable, default 35.
pub fn passing_threshold(conn: &Connection) -> f64 {
    settings_get_json(conn, "exams.passingThreshold")
        .ok()
        .flatten()
        .and_then(|v| v.as_f64())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .unwrap_or(DEFAULT_PASSING_THRESHOLD)
}

use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILENAME: &str = "studentd.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILENAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            description TEXT,
            credit_hours INTEGER NOT NULL DEFAULT 3,
            status TEXT NOT NULL DEFAULT 'active',
            student_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            last_updated TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            rollno TEXT NOT NULL,
            name TEXT NOT NULL,
            section TEXT,
            batch TEXT,
            department TEXT,
            semester TEXT,
            mids_marks REAL,
            finals_marks REAL,
            sessional REAL,
            assignment REAL,
            quiz REAL,
            uploaded_at TEXT,
            marks_updated_at TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(course_id, rollno)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_course ON students(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_course_rollno ON students(course_id, rollno)",
        [],
    )?;

    // Older workspaces predate the marks_updated_at stamp. Add if needed.
    ensure_students_marks_updated_at(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_sessions(
            course_id TEXT NOT NULL,
            date TEXT NOT NULL,
            time TEXT,
            recorded_at TEXT,
            PRIMARY KEY(course_id, date),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_entries(
            course_id TEXT NOT NULL,
            date TEXT NOT NULL,
            rollno TEXT NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY(course_id, date, rollno),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_entries_course ON attendance_entries(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_entries_rollno ON attendance_entries(course_id, rollno)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS results(
            course_id TEXT NOT NULL,
            rollno TEXT NOT NULL,
            name TEXT,
            section TEXT,
            batch TEXT,
            percentage REAL NOT NULL,
            grade TEXT NOT NULL,
            gpa REAL NOT NULL,
            status TEXT NOT NULL,
            total_marks REAL NOT NULL,
            mids_marks REAL NOT NULL,
            finals_marks REAL NOT NULL,
            sessional REAL NOT NULL,
            assignment REAL NOT NULL,
            quiz REAL NOT NULL,
            calculated_at TEXT,
            PRIMARY KEY(course_id, rollno),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_course ON results(course_id)",
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

fn ensure_students_marks_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "marks_updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN marks_updated_at TEXT", [])?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        None => Ok(None),
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
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

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

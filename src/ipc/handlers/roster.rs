use crate::csvio;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_iso, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

struct RosterFile {
    // canonical column -> index into each record
    columns: HashMap<&'static str, usize>,
    records: Vec<(usize, Vec<String>)>, // (1-based file row, fields)
}

fn read_roster_file(path: &str) -> anyhow::Result<RosterFile> {
    let text = std::fs::read_to_string(path)?;
    let mut lines = text.lines().enumerate();

    let header = loop {
        match lines.next() {
            Some((_, l)) if l.trim().is_empty() => continue,
            Some((_, l)) => break l,
            None => anyhow::bail!("the uploaded file is empty"),
        }
    };

    let mut columns: HashMap<&'static str, usize> = HashMap::new();
    for (idx, raw) in csvio::parse_csv_record(header).iter().enumerate() {
        if let Some(canon) = csvio::canonical_roster_column(raw) {
            columns.entry(canon).or_insert(idx);
        }
    }

    let mut records = Vec::new();
    for (line_no, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        records.push((line_no + 1, csvio::parse_csv_record(line)));
    }
    Ok(RosterFile { columns, records })
}

fn cell<'a>(fields: &'a [String], idx: Option<&usize>) -> &'a str {
    idx.and_then(|i| fields.get(*i))
        .map(|s| s.trim())
        .unwrap_or("")
}

fn handle_roster_import_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_code = match required_str(req, "courseCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let path = match required_str(req, "path") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let roster = match read_roster_file(&path) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": path })),
            )
        }
    };

    let missing: Vec<&str> = csvio::ROSTER_COLUMNS
        .iter()
        .copied()
        .filter(|c| !roster.columns.contains_key(c))
        .collect();
    if !missing.is_empty() {
        return err(
            &req.id,
            "bad_columns",
            format!("missing columns in file: {}", missing.join(", ")),
            Some(json!({ "missing": missing, "required": csvio::ROSTER_COLUMNS })),
        );
    }

    let existing_course_id: Option<String> = match conn
        .query_row(
            "SELECT id FROM courses WHERE code = ?",
            [&course_code],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let default_credit_hours = db::settings_get_json(conn, "courses.default_credit_hours")
        .ok()
        .flatten()
        .and_then(|v| v.as_i64())
        .unwrap_or(3);

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let now = now_iso();
    let course_id = match &existing_course_id {
        Some(id) => {
            // Re-upload replaces the previous roster wholesale.
            if let Err(e) = tx.execute("DELETE FROM students WHERE course_id = ?", [id]) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_delete_failed",
                    e.to_string(),
                    Some(json!({ "table": "students" })),
                );
            }
            id.clone()
        }
        None => {
            let id = Uuid::new_v4().to_string();
            if let Err(e) = tx.execute(
                "INSERT INTO courses(id, code, credit_hours, status, created_at) VALUES(?, ?, ?, 'active', ?)",
                (&id, &course_code, default_credit_hours, &now),
            ) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "courses" })),
                );
            }
            id
        }
    };

    let mut inserted = 0usize;
    let mut errors: Vec<String> = Vec::new();
    let total_rows = roster.records.len();

    for (row_no, fields) in &roster.records {
        let rollno = cell(fields, roster.columns.get("rollno"));
        if rollno.is_empty() {
            errors.push(format!("Row {}: empty roll number", row_no));
            continue;
        }
        let res = tx.execute(
            "INSERT INTO students(
               id, course_id, rollno, name, section, batch, department, semester, uploaded_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(course_id, rollno) DO UPDATE SET
               name = excluded.name,
               section = excluded.section,
               batch = excluded.batch,
               department = excluded.department,
               semester = excluded.semester,
               uploaded_at = excluded.uploaded_at",
            (
                Uuid::new_v4().to_string(),
                &course_id,
                rollno,
                cell(fields, roster.columns.get("name")),
                cell(fields, roster.columns.get("section")),
                cell(fields, roster.columns.get("batch")),
                cell(fields, roster.columns.get("department")),
                cell(fields, roster.columns.get("semester")),
                &now,
            ),
        );
        match res {
            Ok(_) => inserted += 1,
            Err(e) => errors.push(format!("Row {}: {}", row_no, e)),
        }
    }

    if let Err(e) = tx.execute(
        "UPDATE courses SET
           student_count = ?,
           description = ?,
           status = 'active',
           last_updated = ?
         WHERE id = ?",
        (
            inserted as i64,
            format!("Course created via upload with {} students", inserted),
            &now,
            &course_id,
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(
        "roster import for {}: {} of {} rows",
        course_code,
        inserted,
        total_rows
    );
    ok(
        &req.id,
        json!({
            "status": "success",
            "course": course_code,
            "studentsAdded": inserted,
            "totalRows": total_rows,
            "errors": if errors.is_empty() { serde_json::Value::Null } else { json!(errors) }
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.importCsv" => Some(handle_roster_import_csv(state, req)),
        _ => None,
    }
}

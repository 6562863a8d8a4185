use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{course_id_required, db_conn, now_iso, optional_mark, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const IDENTITY_FIELDS: [&str; 5] = ["name", "section", "batch", "department", "semester"];
const MARK_FIELDS: [&str; 5] = [
    "mids_marks",
    "finals_marks",
    "sessional",
    "assignment",
    "quiz",
];

fn student_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "rollno": r.get::<_, String>(0)?,
        "name": r.get::<_, Option<String>>(1)?,
        "section": r.get::<_, Option<String>>(2)?,
        "batch": r.get::<_, Option<String>>(3)?,
        "department": r.get::<_, Option<String>>(4)?,
        "semester": r.get::<_, Option<String>>(5)?,
        "midsMarks": r.get::<_, Option<f64>>(6)?,
        "finalsMarks": r.get::<_, Option<f64>>(7)?,
        "sessional": r.get::<_, Option<f64>>(8)?,
        "assignment": r.get::<_, Option<f64>>(9)?,
        "quiz": r.get::<_, Option<f64>>(10)?,
        "uploadedAt": r.get::<_, Option<String>>(11)?,
    }))
}

const STUDENT_SELECT: &str = "SELECT rollno, name, section, batch, department, semester,
       mids_marks, finals_marks, sessional, assignment, quiz, uploaded_at
 FROM students";

fn student_exists(
    conn: &Connection,
    course_id: &str,
    rollno: &str,
) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT 1 FROM students WHERE course_id = ? AND rollno = ?",
        (course_id, rollno),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_code = match required_str(req, "courseCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let course_id = match course_id_required(conn, req, &course_code) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let sql = format!("{} WHERE course_id = ? ORDER BY rollno", STUDENT_SELECT);
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&course_id], |r| student_row_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_code = match required_str(req, "courseCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(student) = req.params.get("student").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid student", None);
    };
    let rollno = match student.get("rollno").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "student roll number is required", None),
    };
    let course_id = match course_id_required(conn, req, &course_code) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match student_exists(conn, &course_id, &rollno) {
        Ok(true) => {
            return err(
                &req.id,
                "already_exists",
                format!(
                    "student with roll number {} already exists in this course",
                    rollno
                ),
                Some(json!({ "rollno": rollno })),
            )
        }
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let get_text =
        |key: &str| -> Option<String> { student.get(key).and_then(|v| v.as_str()).map(|s| s.trim().to_string()) };

    if let Err(e) = conn.execute(
        "INSERT INTO students(
           id, course_id, rollno, name, section, batch, department, semester, uploaded_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &course_id,
            &rollno,
            get_text("name").unwrap_or_default(),
            get_text("section"),
            get_text("batch"),
            get_text("department"),
            get_text("semester"),
            now_iso(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(
        &req.id,
        json!({
            "status": "success",
            "message": format!("student {} added to course {}", rollno, course_code)
        }),
    )
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_code = match required_str(req, "courseCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(student) = req.params.get("student").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid student", None);
    };
    let rollno = match student.get("rollno").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "student roll number is required", None),
    };
    let course_id = match course_id_required(conn, req, &course_code) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // Merge semantics: only the supplied fields change.
    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    for key in IDENTITY_FIELDS {
        if let Some(v) = student.get(key) {
            let Some(s) = v.as_str() else {
                return err(
                    &req.id,
                    "bad_params",
                    format!("student.{} must be a string", key),
                    None,
                );
            };
            set_parts.push(format!("{} = ?", key));
            bind_values.push(Value::Text(s.trim().to_string()));
        }
    }

    let student_value = serde_json::Value::Object(student.clone());
    let mut touched_marks = false;
    for key in MARK_FIELDS {
        match optional_mark(req, &student_value, key) {
            Ok(None) => {}
            Ok(Some(v)) => {
                set_parts.push(format!("{} = ?", key));
                bind_values.push(Value::Real(v));
                touched_marks = true;
            }
            Err(resp) => return resp,
        }
    }
    if touched_marks {
        set_parts.push("marks_updated_at = ?".into());
        bind_values.push(Value::Text(now_iso()));
    }

    if set_parts.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "student must include at least one field to update",
            None,
        );
    }

    let sql = format!(
        "UPDATE students SET {} WHERE course_id = ? AND rollno = ?",
        set_parts.join(", ")
    );
    bind_values.push(Value::Text(course_id.clone()));
    bind_values.push(Value::Text(rollno.clone()));

    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            )
        }
    };
    if changed == 0 {
        return err(
            &req.id,
            "not_found",
            format!("student {} not found in course {}", rollno, course_code),
            None,
        );
    }

    ok(
        &req.id,
        json!({
            "status": "success",
            "message": format!("student {} updated", rollno)
        }),
    )
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_code = match required_str(req, "courseCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let rollno = match required_str(req, "rollno") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let course_id = match course_id_required(conn, req, &course_code) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match student_exists(conn, &course_id, &rollno) {
        Ok(true) => {}
        Ok(false) => {
            return err(
                &req.id,
                "not_found",
                format!("student {} not found in course {}", rollno, course_code),
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Attendance maps key on rollno, so scrub those entries too.
    if let Err(e) = tx.execute(
        "DELETE FROM attendance_entries WHERE course_id = ? AND rollno = ?",
        (&course_id, &rollno),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "attendance_entries" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM students WHERE course_id = ? AND rollno = ?",
        (&course_id, &rollno),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "status": "success",
            "message": format!("student {} deleted from course {}", rollno, course_code)
        }),
    )
}

fn handle_students_search(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_code = match required_str(req, "courseCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let query = req
        .params
        .get("query")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    let course_id = match course_id_required(conn, req, &course_code) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let sql = format!(
        "{} WHERE course_id = ?
           AND (LOWER(rollno) LIKE '%' || ? || '%' OR LOWER(COALESCE(name, '')) LIKE '%' || ? || '%')
         ORDER BY rollno",
        STUDENT_SELECT
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&course_id, &query, &query), |r| student_row_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.add" => Some(handle_students_add(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.search" => Some(handle_students_search(state, req)),
        _ => None,
    }
}

use crate::csvio;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{course_id_required, db_conn, now_iso, optional_mark, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

const MARK_FIELDS: [&str; 5] = [
    "mids_marks",
    "finals_marks",
    "sessional",
    "assignment",
    "quiz",
];

const HAS_MARKS: &str = "(mids_marks IS NOT NULL OR finals_marks IS NOT NULL OR
   sessional IS NOT NULL OR assignment IS NOT NULL OR quiz IS NOT NULL)";

fn handle_marks_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let sql = format!(
        "SELECT rollno, name, section,
                COALESCE(mids_marks, 0), COALESCE(finals_marks, 0), COALESCE(sessional, 0),
                COALESCE(assignment, 0), COALESCE(quiz, 0), marks_updated_at
         FROM students
         WHERE course_id = ? AND {}
         ORDER BY rollno",
        HAS_MARKS
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&course_id], |r| {
            Ok(json!({
                "rollno": r.get::<_, String>(0)?,
                "name": r.get::<_, Option<String>>(1)?,
                "section": r.get::<_, Option<String>>(2)?,
                "midsMarks": r.get::<_, f64>(3)?,
                "finalsMarks": r.get::<_, f64>(4)?,
                "sessional": r.get::<_, f64>(5)?,
                "assignment": r.get::<_, f64>(6)?,
                "quiz": r.get::<_, f64>(7)?,
                "marksUpdatedAt": r.get::<_, Option<String>>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(marks) => ok(&req.id, json!({ "marks": marks })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_marks_save(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let Some(marks_obj) = req.params.get("marks") else {
        return err(&req.id, "bad_params", "missing marks", None);
    };
    if !marks_obj.is_object() {
        return err(&req.id, "bad_params", "marks must be an object", None);
    }
    let course_id = match course_id_required(conn, req, &course_code) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut supplied: Vec<(&'static str, f64)> = Vec::new();
    for key in MARK_FIELDS {
        match optional_mark(req, marks_obj, key) {
            Ok(None) => {}
            Ok(Some(v)) => supplied.push((key, v)),
            Err(resp) => return resp,
        }
    }
    if supplied.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "marks must include at least one component",
            None,
        );
    }

    let existing: Option<String> = match conn
        .query_row(
            "SELECT id FROM students WHERE course_id = ? AND rollno = ?",
            (&course_id, &rollno),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let now = now_iso();
    match existing {
        Some(_) => {
            // Merge onto the existing roster row; untouched components stay.
            let mut set_parts: Vec<String> = Vec::new();
            let mut bind_values: Vec<Value> = Vec::new();
            for (key, v) in &supplied {
                set_parts.push(format!("{} = ?", key));
                bind_values.push(Value::Real(*v));
            }
            set_parts.push("marks_updated_at = ?".into());
            bind_values.push(Value::Text(now));
            bind_values.push(Value::Text(course_id));
            bind_values.push(Value::Text(rollno.clone()));

            let sql = format!(
                "UPDATE students SET {} WHERE course_id = ? AND rollno = ?",
                set_parts.join(", ")
            );
            if let Err(e) = conn.execute(&sql, params_from_iter(bind_values)) {
                return err(
                    &req.id,
                    "db_update_failed",
                    e.to_string(),
                    Some(json!({ "table": "students" })),
                );
            }
        }
        None => {
            // Unknown rollno gets a bare roster row carrying the marks.
            let by_key: HashMap<&str, f64> = supplied.iter().copied().collect();
            if let Err(e) = conn.execute(
                "INSERT INTO students(
                   id, course_id, rollno, name,
                   mids_marks, finals_marks, sessional, assignment, quiz,
                   uploaded_at, marks_updated_at
                 ) VALUES(?, ?, ?, '', ?, ?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &course_id,
                    &rollno,
                    by_key.get("mids_marks").copied(),
                    by_key.get("finals_marks").copied(),
                    by_key.get("sessional").copied(),
                    by_key.get("assignment").copied(),
                    by_key.get("quiz").copied(),
                    &now,
                    &now,
                ),
            ) {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "students" })),
                );
            }
        }
    }

    ok(
        &req.id,
        json!({ "status": "success", "message": "marks saved successfully" }),
    )
}

fn handle_marks_update(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let field = match required_str(req, "field") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(field) = MARK_FIELDS.iter().find(|f| **f == field) else {
        return err(
            &req.id,
            "bad_params",
            format!("field must be one of: {}", MARK_FIELDS.join(", ")),
            Some(json!({ "field": field })),
        );
    };
    let value = match req.params.get("value").and_then(|v| v.as_f64()) {
        Some(v) => v,
        None => {
            return err(
                &req.id,
                "invalid_input",
                "value must be a number",
                Some(json!({ "field": field })),
            )
        }
    };
    let course_id = match course_id_required(conn, req, &course_code) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let sql = format!(
        "UPDATE students SET {} = ?, marks_updated_at = ? WHERE course_id = ? AND rollno = ?",
        field
    );
    let changed = match conn.execute(&sql, (value, now_iso(), &course_id, &rollno)) {
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
        json!({ "status": "success", "message": "marks updated successfully" }),
    )
}

fn handle_marks_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    // Clears the component columns but keeps the roster row.
    let changed = match conn.execute(
        "UPDATE students SET
           mids_marks = NULL, finals_marks = NULL, sessional = NULL,
           assignment = NULL, quiz = NULL, marks_updated_at = NULL
         WHERE course_id = ? AND rollno = ?",
        (&course_id, &rollno),
    ) {
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
        json!({ "status": "success", "message": "marks deleted successfully" }),
    )
}

fn handle_marks_import_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let course_id = match course_id_required(conn, req, &course_code) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let text = match std::fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": path })),
            )
        }
    };

    let mut lines = text.lines();
    let Some(header_line) = lines.find(|l| !l.trim().is_empty()) else {
        return err(&req.id, "io_failed", "the uploaded file is empty", None);
    };
    let headers = csvio::parse_csv_record(header_line);

    let mut rollno_idx: Option<usize> = None;
    let mut name_idx: Option<usize> = None;
    let mut section_idx: Option<usize> = None;
    // (column index, canonical component) pairs, first alias wins.
    let mut mark_cols: Vec<(usize, &'static str)> = Vec::new();
    let mut seen_components: Vec<&'static str> = Vec::new();
    for (idx, raw) in headers.iter().enumerate() {
        match csvio::canonical_roster_column(raw) {
            Some("rollno") if rollno_idx.is_none() => rollno_idx = Some(idx),
            Some("name") if name_idx.is_none() => name_idx = Some(idx),
            Some("section") if section_idx.is_none() => section_idx = Some(idx),
            _ => {}
        }
        if let Some(component) = csvio::canonical_marks_column(raw) {
            if !seen_components.contains(&component) {
                seen_components.push(component);
                mark_cols.push((idx, component));
            }
        }
    }

    let Some(rollno_idx) = rollno_idx else {
        return err(
            &req.id,
            "bad_columns",
            "file must contain a 'rollno' column",
            None,
        );
    };
    if mark_cols.is_empty() {
        return err(
            &req.id,
            "bad_columns",
            "file contains no recognizable mark columns",
            None,
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let now = now_iso();
    let mut processed = 0usize;
    let mut warnings: Vec<String> = Vec::new();

    for (offset, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row_no = offset + 2; // 1-based, counting the header line
        let fields = csvio::parse_csv_record(line);
        let rollno = fields
            .get(rollno_idx)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if rollno.is_empty() {
            warnings.push(format!("Row {}: empty roll number", row_no));
            continue;
        }

        let mut components: HashMap<&'static str, f64> = HashMap::new();
        for (idx, component) in &mark_cols {
            let raw = fields.get(*idx).map(|s| s.as_str()).unwrap_or("");
            let (value, parsed) = csvio::coerce_mark_cell(raw);
            if !parsed {
                warnings.push(format!(
                    "Row {}: '{}' is not numeric for {}; stored 0",
                    row_no, raw, component
                ));
            }
            components.insert(component, value);
        }

        let exists: Option<String> = match tx
            .query_row(
                "SELECT id FROM students WHERE course_id = ? AND rollno = ?",
                (&course_id, &rollno),
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_query_failed", e.to_string(), None);
            }
        };

        let res = match exists {
            Some(_) => {
                let mut set_parts: Vec<String> = Vec::new();
                let mut bind_values: Vec<Value> = Vec::new();
                for (key, v) in &components {
                    set_parts.push(format!("{} = ?", key));
                    bind_values.push(Value::Real(*v));
                }
                set_parts.push("marks_updated_at = ?".into());
                bind_values.push(Value::Text(now.clone()));
                bind_values.push(Value::Text(course_id.clone()));
                bind_values.push(Value::Text(rollno.clone()));
                let sql = format!(
                    "UPDATE students SET {} WHERE course_id = ? AND rollno = ?",
                    set_parts.join(", ")
                );
                tx.execute(&sql, params_from_iter(bind_values))
            }
            None => tx.execute(
                "INSERT INTO students(
                   id, course_id, rollno, name, section,
                   mids_marks, finals_marks, sessional, assignment, quiz,
                   uploaded_at, marks_updated_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &course_id,
                    &rollno,
                    fields
                        .get(name_idx.unwrap_or(usize::MAX))
                        .map(|s| s.trim().to_string())
                        .unwrap_or_default(),
                    fields
                        .get(section_idx.unwrap_or(usize::MAX))
                        .map(|s| s.trim().to_string()),
                    components.get("mids_marks").copied(),
                    components.get("finals_marks").copied(),
                    components.get("sessional").copied(),
                    components.get("assignment").copied(),
                    components.get("quiz").copied(),
                    &now,
                    &now,
                ),
            ),
        };

        match res {
            Ok(_) => processed += 1,
            Err(e) => warnings.push(format!("Row {}: {}", row_no, e)),
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!("marks import for {}: {} rows", course_code, processed);
    ok(
        &req.id,
        json!({
            "status": "success",
            "course": course_code,
            "studentsProcessed": processed,
            "warnings": if warnings.is_empty() { serde_json::Value::Null } else { json!(warnings) }
        }),
    )
}

fn handle_marks_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let sql = format!(
        "SELECT rollno, name, section, batch, department, semester,
                COALESCE(mids_marks, 0), COALESCE(finals_marks, 0), COALESCE(sessional, 0),
                COALESCE(assignment, 0), COALESCE(quiz, 0)
         FROM students
         WHERE course_id = ? AND {}
         ORDER BY rollno",
        HAS_MARKS
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows: Result<Vec<Vec<String>>, _> = stmt
        .query_map([&course_id], |r| {
            Ok(vec![
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?.unwrap_or_default(),
                r.get::<_, Option<String>>(2)?.unwrap_or_default(),
                r.get::<_, Option<String>>(3)?.unwrap_or_default(),
                r.get::<_, Option<String>>(4)?.unwrap_or_default(),
                r.get::<_, Option<String>>(5)?.unwrap_or_default(),
                csvio::fmt_mark(r.get::<_, f64>(6)?),
                csvio::fmt_mark(r.get::<_, f64>(7)?),
                csvio::fmt_mark(r.get::<_, f64>(8)?),
                csvio::fmt_mark(r.get::<_, f64>(9)?),
                csvio::fmt_mark(r.get::<_, f64>(10)?),
            ])
        })
        .and_then(|it| it.collect());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if rows.is_empty() {
        return err(&req.id, "not_found", "no marks data found", None);
    }

    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(p) => std::path::PathBuf::from(p),
        None => std::env::temp_dir().join(format!("{}_marks.csv", course_code)),
    };

    let mut out = String::new();
    out.push_str("rollno,name,section,batch,department,semester,mids_marks,finals_marks,sessional,assignment,quiz\n");
    for row in &rows {
        out.push_str(&csvio::csv_line(row));
        out.push('\n');
    }
    if let Err(e) = std::fs::write(&out_path, out) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": out_path.to_string_lossy() })),
        );
    }

    ok(
        &req.id,
        json!({
            "path": out_path.to_string_lossy(),
            "rowCount": rows.len()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.list" => Some(handle_marks_list(state, req)),
        "marks.save" => Some(handle_marks_save(state, req)),
        "marks.update" => Some(handle_marks_update(state, req)),
        "marks.delete" => Some(handle_marks_delete(state, req)),
        "marks.importCsv" => Some(handle_marks_import_csv(state, req)),
        "marks.exportCsv" => Some(handle_marks_export_csv(state, req)),
        _ => None,
    }
}

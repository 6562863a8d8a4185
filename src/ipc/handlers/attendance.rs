use crate::csvio;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::now_iso;
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    fn db(e: impl std::fmt::Display) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

fn course_id_by_code(conn: &Connection, code: &str) -> Result<String, HandlerErr> {
    conn.query_row("SELECT id FROM courses WHERE code = ?", [code], |r| {
        r.get::<_, String>(0)
    })
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr::new("not_found", format!("course '{}' not found", code)))
}

fn attendance_mark(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_code = get_required_str(params, "courseCode")?;
    let date = get_required_str(params, "date")?;
    let time = params
        .get("time")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let Some(map) = params.get("attendance").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::new(
            "bad_params",
            "date and attendance data are required",
        ));
    };
    if map.is_empty() {
        return Err(HandlerErr::new(
            "bad_params",
            "date and attendance data are required",
        ));
    }

    let mut entries: Vec<(String, String)> = Vec::with_capacity(map.len());
    for (rollno, status) in map {
        let Some(status) = status.as_str() else {
            return Err(HandlerErr::new(
                "bad_params",
                "attendance values must be strings",
            ));
        };
        entries.push((rollno.clone(), status.to_string()));
    }

    let course_id = course_id_by_code(conn, &course_code)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    // Re-marking a date replaces the whole session.
    tx.execute(
        "INSERT INTO attendance_sessions(course_id, date, time, recorded_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(course_id, date) DO UPDATE SET
           time = excluded.time,
           recorded_at = excluded.recorded_at",
        (&course_id, &date, time.as_deref(), now_iso()),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    tx.execute(
        "DELETE FROM attendance_entries WHERE course_id = ? AND date = ?",
        (&course_id, &date),
    )
    .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    for (rollno, status) in &entries {
        tx.execute(
            "INSERT INTO attendance_entries(course_id, date, rollno, status) VALUES(?, ?, ?, ?)",
            (&course_id, &date, rollno, status),
        )
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "status": "success",
        "message": format!("attendance saved for {} on {}", course_code, date),
        "studentsMarked": entries.len()
    }))
}

fn load_session_map(
    conn: &Connection,
    course_id: &str,
    date: &str,
) -> Result<BTreeMap<String, String>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT rollno, status FROM attendance_entries WHERE course_id = ? AND date = ?")
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map((course_id, date), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(rows.into_iter().collect())
}

fn attendance_view(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_code = get_required_str(params, "courseCode")?;
    let date = get_required_str(params, "date")?;
    let course_id = course_id_by_code(conn, &course_code)?;

    let session: Option<(Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT time, recorded_at FROM attendance_sessions WHERE course_id = ? AND date = ?",
            (&course_id, &date),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((time, recorded_at)) = session else {
        return Err(HandlerErr::new(
            "not_found",
            "no attendance found for this date",
        ));
    };

    let map = load_session_map(conn, &course_id, &date)?;
    Ok(json!({
        "date": date,
        "time": time,
        "course": course_code,
        "recordedAt": recorded_at,
        "attendance": map
    }))
}

fn attendance_dates(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_code = get_required_str(params, "courseCode")?;
    let course_id = course_id_by_code(conn, &course_code)?;

    let mut stmt = conn
        .prepare(
            "SELECT s.date, s.time, s.recorded_at,
                    (SELECT COUNT(*) FROM attendance_entries e
                     WHERE e.course_id = s.course_id AND e.date = s.date) AS marked
             FROM attendance_sessions s
             WHERE s.course_id = ?
             ORDER BY s.date",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&course_id], |r| {
            Ok(json!({
                "date": r.get::<_, String>(0)?,
                "time": r.get::<_, Option<String>>(1)?,
                "recordedAt": r.get::<_, Option<String>>(2)?,
                "studentsMarked": r.get::<_, i64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "dates": rows }))
}

fn attendance_export_csv(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_code = get_required_str(params, "courseCode")?;
    let course_id = course_id_by_code(conn, &course_code)?;

    let mut stmt = conn
        .prepare(
            "SELECT e.date, COALESCE(s.time, ''), e.rollno, e.status,
                    COALESCE(st.name, ''), COALESCE(st.section, ''),
                    COALESCE(st.department, ''), COALESCE(st.semester, '')
             FROM attendance_entries e
             JOIN attendance_sessions s
               ON s.course_id = e.course_id AND s.date = e.date
             LEFT JOIN students st
               ON st.course_id = e.course_id AND st.rollno = e.rollno
             WHERE e.course_id = ?
             ORDER BY e.date, e.rollno",
        )
        .map_err(HandlerErr::db)?;
    let rows: Vec<Vec<String>> = stmt
        .query_map([&course_id], |r| {
            Ok(vec![
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                course_code.clone(),
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, String>(7)?,
            ])
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    if rows.is_empty() {
        return Err(HandlerErr::new(
            "not_found",
            "no attendance records found",
        ));
    }

    let out_path = match params.get("outPath").and_then(|v| v.as_str()) {
        Some(p) => std::path::PathBuf::from(p),
        None => {
            let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            std::env::temp_dir().join(format!("{}_attendance_{}.csv", course_code, stamp))
        }
    };

    let mut out = String::new();
    out.push_str("date,time,rollno,status,course,name,section,department,semester\n");
    for row in &rows {
        out.push_str(&csvio::csv_line(row));
        out.push('\n');
    }
    std::fs::write(&out_path, out).map_err(|e| HandlerErr {
        code: "io_failed",
        message: e.to_string(),
        details: Some(json!({ "path": out_path.to_string_lossy() })),
    })?;

    Ok(json!({
        "path": out_path.to_string_lossy(),
        "rowCount": rows.len()
    }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(with_conn(state, req, attendance_mark)),
        "attendance.view" => Some(with_conn(state, req, attendance_view)),
        "attendance.dates" => Some(with_conn(state, req, attendance_dates)),
        "attendance.exportCsv" => Some(with_conn(state, req, attendance_export_csv)),
        _ => None,
    }
}

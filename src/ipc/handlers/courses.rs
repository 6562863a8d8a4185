use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{course_id_required, db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    // No workspace yet means no courses, not an error; the dashboard
    // polls this before anything is set up.
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "courses": [] }));
    };

    let mut stmt = match conn.prepare("SELECT code FROM courses ORDER BY code") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_info(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let row = conn.query_row(
        "SELECT
           c.description,
           c.credit_hours,
           c.status,
           c.student_count,
           c.created_at,
           c.last_updated,
           (SELECT COUNT(*) FROM students s WHERE s.course_id = c.id) AS student_count_live,
           (SELECT COUNT(*) FROM attendance_sessions a WHERE a.course_id = c.id) AS session_count,
           (SELECT COUNT(*) FROM results r WHERE r.course_id = c.id) AS result_count,
           (SELECT COUNT(*) FROM students s WHERE s.course_id = c.id AND (
              s.mids_marks IS NOT NULL OR s.finals_marks IS NOT NULL OR
              s.sessional IS NOT NULL OR s.assignment IS NOT NULL OR s.quiz IS NOT NULL
           )) AS marks_count
         FROM courses c
         WHERE c.id = ?",
        [&course_id],
        |r| {
            Ok(json!({
                "courseCode": course_code,
                "description": r.get::<_, Option<String>>(0)?,
                "creditHours": r.get::<_, i64>(1)?,
                "status": r.get::<_, String>(2)?,
                "totalStudentsInFile": r.get::<_, i64>(3)?,
                "createdAt": r.get::<_, Option<String>>(4)?,
                "lastUpdated": r.get::<_, Option<String>>(5)?,
                "studentCount": r.get::<_, i64>(6)?,
                "attendanceRecords": r.get::<_, i64>(7)?,
                "resultsCount": r.get::<_, i64>(8)?,
                "marksCount": r.get::<_, i64>(9)?,
            }))
        },
    );

    match row {
        Ok(info) => ok(&req.id, info),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    // Counts reported back to the caller, gathered before anything goes.
    let count = |sql: &str| -> Result<i64, serde_json::Value> {
        conn.query_row(sql, [&course_id], |r| r.get(0))
            .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
    };
    let deleted_students = match count("SELECT COUNT(*) FROM students WHERE course_id = ?") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let deleted_attendance =
        match count("SELECT COUNT(*) FROM attendance_sessions WHERE course_id = ?") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
    let deleted_results = match count("SELECT COUNT(*) FROM results WHERE course_id = ?") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let deleted_marks = match count(
        "SELECT COUNT(*) FROM students WHERE course_id = ? AND (
           mids_marks IS NOT NULL OR finals_marks IS NOT NULL OR
           sessional IS NOT NULL OR assignment IS NOT NULL OR quiz IS NOT NULL
         )",
    ) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute(
        "DELETE FROM attendance_entries WHERE course_id = ?",
        [&course_id],
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
        "DELETE FROM attendance_sessions WHERE course_id = ?",
        [&course_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "attendance_sessions" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM results WHERE course_id = ?", [&course_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "results" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM students WHERE course_id = ?", [&course_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM courses WHERE id = ?", [&course_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!("deleted course {} and all dependent rows", course_code);
    ok(
        &req.id,
        json!({
            "status": "deleted",
            "course": course_code,
            "deletedStudents": deleted_students,
            "deletedAttendance": deleted_attendance,
            "deletedMarks": deleted_marks,
            "deletedResults": deleted_results
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.info" => Some(handle_courses_info(state, req)),
        "courses.delete" => Some(handle_courses_delete(state, req)),
        _ => None,
    }
}

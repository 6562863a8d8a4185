use crate::csvio;
use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{course_id_required, db_conn, now_iso, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct RosterMarks {
    rollno: String,
    name: String,
    section: String,
    batch: String,
    marks: grading::RawMarks,
}

fn roster_marks(conn: &Connection, course_id: &str) -> Result<Vec<RosterMarks>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT rollno, COALESCE(name, ''), COALESCE(section, ''), COALESCE(batch, ''),
                COALESCE(mids_marks, 0), COALESCE(finals_marks, 0), COALESCE(sessional, 0),
                COALESCE(assignment, 0), COALESCE(quiz, 0)
         FROM students
         WHERE course_id = ?
         ORDER BY rollno",
    )?;
    let rows = stmt.query_map([course_id], |r| {
        Ok(RosterMarks {
            rollno: r.get(0)?,
            name: r.get(1)?,
            section: r.get(2)?,
            batch: r.get(3)?,
            marks: grading::RawMarks {
                mids_marks: r.get(4)?,
                finals_marks: r.get(5)?,
                sessional: r.get(6)?,
                assignment: r.get(7)?,
                quiz: r.get(8)?,
            },
        })
    })?;
    rows.collect()
}

fn result_json(
    course_code: &str,
    student: &RosterMarks,
    computed: &grading::ComputedResult,
    calculated_at: Option<&str>,
) -> serde_json::Value {
    json!({
        "rollno": student.rollno.clone(),
        "name": student.name.clone(),
        "section": student.section.clone(),
        "batch": student.batch.clone(),
        "course": course_code,
        "percentage": computed.percentage,
        "grade": computed.grade.as_str(),
        "gpa": computed.gpa,
        "status": computed.status.as_str(),
        "totalMarks": computed.total_marks,
        "components": {
            "midsMarks": computed.components.mids_marks,
            "finalsMarks": computed.components.finals_marks,
            "sessional": computed.components.sessional,
            "assignment": computed.components.assignment,
            "quiz": computed.components.quiz
        },
        "calculatedAt": calculated_at
    })
}

fn stored_result_json(course_code: &str, r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "rollno": r.get::<_, String>(0)?,
        "name": r.get::<_, Option<String>>(1)?,
        "section": r.get::<_, Option<String>>(2)?,
        "batch": r.get::<_, Option<String>>(3)?,
        "course": course_code,
        "percentage": r.get::<_, f64>(4)?,
        "grade": r.get::<_, String>(5)?,
        "gpa": r.get::<_, f64>(6)?,
        "status": r.get::<_, String>(7)?,
        "totalMarks": r.get::<_, f64>(8)?,
        "components": {
            "midsMarks": r.get::<_, f64>(9)?,
            "finalsMarks": r.get::<_, f64>(10)?,
            "sessional": r.get::<_, f64>(11)?,
            "assignment": r.get::<_, f64>(12)?,
            "quiz": r.get::<_, f64>(13)?
        },
        "calculatedAt": r.get::<_, Option<String>>(14)?
    }))
}

const RESULT_SELECT: &str = "SELECT rollno, name, section, batch, percentage, grade, gpa, status, total_marks,
       mids_marks, finals_marks, sessional, assignment, quiz, calculated_at
 FROM results";

fn handle_results_calculate(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let students = match roster_marks(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if students.is_empty() {
        return err(
            &req.id,
            "not_found",
            format!("no students found in course '{}'", course_code),
            None,
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Stale results from a previous run are cleared first.
    if let Err(e) = tx.execute("DELETE FROM results WHERE course_id = ?", [&course_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "results" })),
        );
    }

    let calculated_at = now_iso();
    let mut results: Vec<serde_json::Value> = Vec::with_capacity(students.len());
    for s in &students {
        let computed = grading::compute_result_for(&s.marks);
        if let Err(e) = tx.execute(
            "INSERT INTO results(
               course_id, rollno, name, section, batch,
               percentage, grade, gpa, status, total_marks,
               mids_marks, finals_marks, sessional, assignment, quiz,
               calculated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &course_id,
                &s.rollno,
                &s.name,
                &s.section,
                &s.batch,
                computed.percentage,
                computed.grade.as_str(),
                computed.gpa,
                computed.status.as_str(),
                computed.total_marks,
                computed.components.mids_marks,
                computed.components.finals_marks,
                computed.components.sessional,
                computed.components.assignment,
                computed.components.quiz,
                &calculated_at,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "results", "rollno": s.rollno.clone() })),
            );
        }
        results.push(result_json(
            &course_code,
            s,
            &computed,
            Some(&calculated_at),
        ));
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(
        "calculated results for {} students in {}",
        results.len(),
        course_code
    );
    ok(
        &req.id,
        json!({
            "status": "success",
            "course": course_code,
            "studentsProcessed": results.len(),
            "results": results
        }),
    )
}

fn handle_results_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let sql = format!("{} WHERE course_id = ? ORDER BY rollno", RESULT_SELECT);
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&course_id], |r| stored_result_json(&course_code, r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(results) => ok(&req.id, json!({ "results": results })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_results_get(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let sql = format!(
        "{} WHERE course_id = ? AND rollno = ?",
        RESULT_SELECT
    );
    let stored = match conn
        .query_row(&sql, (&course_id, &rollno), |r| {
            stored_result_json(&course_code, r)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(result) = stored {
        return ok(&req.id, result);
    }

    // No persisted result yet: compute on the fly from the roster row
    // without saving anything.
    let student = match conn
        .query_row(
            "SELECT rollno, COALESCE(name, ''), COALESCE(section, ''), COALESCE(batch, ''),
                    COALESCE(mids_marks, 0), COALESCE(finals_marks, 0), COALESCE(sessional, 0),
                    COALESCE(assignment, 0), COALESCE(quiz, 0)
             FROM students
             WHERE course_id = ? AND rollno = ?",
            (&course_id, &rollno),
            |r| {
                Ok(RosterMarks {
                    rollno: r.get(0)?,
                    name: r.get(1)?,
                    section: r.get(2)?,
                    batch: r.get(3)?,
                    marks: grading::RawMarks {
                        mids_marks: r.get(4)?,
                        finals_marks: r.get(5)?,
                        sessional: r.get(6)?,
                        assignment: r.get(7)?,
                        quiz: r.get(8)?,
                    },
                })
            },
        )
        .optional()
    {
        Ok(Some(v)) => v,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                format!("student {} not found in course {}", rollno, course_code),
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let computed = grading::compute_result_for(&student.marks);
    ok(&req.id, result_json(&course_code, &student, &computed, None))
}

fn handle_results_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    struct StatRow {
        rollno: String,
        name: String,
        percentage: f64,
        grade: String,
        gpa: f64,
        status: String,
        calculated_at: Option<String>,
    }

    let mut stmt = match conn.prepare(
        "SELECT rollno, COALESCE(name, ''), percentage, grade, gpa, status, calculated_at
         FROM results
         WHERE course_id = ?
         ORDER BY rollno",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows: Result<Vec<StatRow>, _> = stmt
        .query_map([&course_id], |r| {
            Ok(StatRow {
                rollno: r.get(0)?,
                name: r.get(1)?,
                percentage: r.get(2)?,
                grade: r.get(3)?,
                gpa: r.get(4)?,
                status: r.get(5)?,
                calculated_at: r.get(6)?,
            })
        })
        .and_then(|it| it.collect());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if rows.is_empty() {
        return err(
            &req.id,
            "not_found",
            "no results found. calculate results first.",
            None,
        );
    }

    let round2 = |x: f64| (x * 100.0).round() / 100.0;

    let total = rows.len();
    let passing = rows.iter().filter(|r| r.status == "Pass").count();
    let failing = total - passing;
    let pass_rate = round2(passing as f64 / total as f64 * 100.0);

    // Zero GPAs/percentages are excluded from the averages, matching the
    // long-standing dashboard behavior.
    let gpas: Vec<f64> = rows.iter().map(|r| r.gpa).filter(|g| *g > 0.0).collect();
    let percentages: Vec<f64> = rows
        .iter()
        .map(|r| r.percentage)
        .filter(|p| *p > 0.0)
        .collect();
    let average_gpa = if gpas.is_empty() {
        0.0
    } else {
        round2(gpas.iter().sum::<f64>() / gpas.len() as f64)
    };
    let average_percentage = if percentages.is_empty() {
        0.0
    } else {
        round2(percentages.iter().sum::<f64>() / percentages.len() as f64)
    };

    let mut grade_distribution: BTreeMap<String, i64> = BTreeMap::new();
    for r in &rows {
        *grade_distribution.entry(r.grade.clone()).or_insert(0) += 1;
    }

    let top = rows
        .iter()
        .max_by(|a, b| {
            a.percentage
                .partial_cmp(&b.percentage)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|r| {
            json!({
                "rollno": r.rollno.clone(),
                "name": r.name.clone(),
                "percentage": r.percentage,
                "grade": r.grade.clone(),
                "gpa": r.gpa
            })
        });

    let last_calculated = rows
        .iter()
        .filter_map(|r| r.calculated_at.as_deref())
        .max()
        .unwrap_or("")
        .to_string();

    ok(
        &req.id,
        json!({
            "course": course_code,
            "totalStudents": total,
            "passingStudents": passing,
            "failingStudents": failing,
            "passRate": pass_rate,
            "averageGpa": average_gpa,
            "averagePercentage": average_percentage,
            "gradeDistribution": grade_distribution,
            "topPerformer": top,
            "lastCalculated": last_calculated
        }),
    )
}

fn handle_results_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let mut stmt = match conn.prepare(
        "SELECT rollno, COALESCE(name, ''), COALESCE(section, ''), COALESCE(batch, ''),
                mids_marks, finals_marks, sessional, assignment, quiz,
                total_marks, percentage, grade, gpa, status, COALESCE(calculated_at, '')
         FROM results
         WHERE course_id = ?
         ORDER BY rollno",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows: Result<Vec<Vec<String>>, _> = stmt
        .query_map([&course_id], |r| {
            Ok(vec![
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                course_code.clone(),
                csvio::fmt_mark(r.get::<_, f64>(4)?),
                csvio::fmt_mark(r.get::<_, f64>(5)?),
                csvio::fmt_mark(r.get::<_, f64>(6)?),
                csvio::fmt_mark(r.get::<_, f64>(7)?),
                csvio::fmt_mark(r.get::<_, f64>(8)?),
                csvio::fmt_mark(r.get::<_, f64>(9)?),
                format!("{:.2}", r.get::<_, f64>(10)?),
                r.get::<_, String>(11)?,
                format!("{}", r.get::<_, f64>(12)?),
                r.get::<_, String>(13)?,
                r.get::<_, String>(14)?,
            ])
        })
        .and_then(|it| it.collect());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if rows.is_empty() {
        return err(&req.id, "not_found", "no results found", None);
    }

    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(p) => std::path::PathBuf::from(p),
        None => {
            let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            std::env::temp_dir().join(format!("{}_results_{}.csv", course_code, stamp))
        }
    };

    let mut out = String::new();
    out.push_str("rollno,name,section,batch,course,mids_marks,finals_marks,sessional,assignment,quiz,total_marks,percentage,grade,gpa,status,calculated_at\n");
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
        "results.calculate" => Some(handle_results_calculate(state, req)),
        "results.list" => Some(handle_results_list(state, req)),
        "results.get" => Some(handle_results_get(state, req)),
        "results.stats" => Some(handle_results_stats(state, req)),
        "results.exportCsv" => Some(handle_results_export_csv(state, req)),
        _ => None,
    }
}

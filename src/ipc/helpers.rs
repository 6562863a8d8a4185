use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Resolve a course code to its row id, or produce the standard
/// `not_found` response for the caller to return.
pub fn course_id_required(
    conn: &Connection,
    req: &Request,
    course_code: &str,
) -> Result<String, serde_json::Value> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM courses WHERE code = ?",
            [course_code],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    found.ok_or_else(|| {
        err(
            &req.id,
            "not_found",
            format!("course '{}' not found", course_code),
            Some(json!({ "courseCode": course_code })),
        )
    })
}

pub fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Read one of the five mark components from params. `invalid_input` when
/// present but not a number; absent fields stay `None` so upserts can
/// merge. JSON boundary is strict; CSV coercion lives in csvio.
pub fn optional_mark(
    req: &Request,
    obj: &serde_json::Value,
    key: &str,
) -> Result<Option<f64>, serde_json::Value> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "invalid_input",
                format!("{} must be a number", key),
                Some(json!({ "field": key, "got": v.clone() })),
            )
        }),
    }
}

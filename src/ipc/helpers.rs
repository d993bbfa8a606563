use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

/// Folds a handler result into a protocol response.
pub fn finish(req: &Request, resp: Result<serde_json::Value, serde_json::Value>) -> serde_json::Value {
    match resp {
        Ok(result) => ok(&req.id, result),
        Err(e) => e,
    }
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn required_i64_min(req: &Request, key: &str, min: i64) -> Result<i64, serde_json::Value> {
    let Some(n) = req.params.get(key).and_then(|v| v.as_i64()) else {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be integer", key),
            None,
        ));
    };
    if n < min {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be >= {}", key, min),
            Some(json!({ key: n })),
        ));
    }
    Ok(n)
}

pub fn required_i64_range(
    req: &Request,
    key: &str,
    min: i64,
    max: i64,
) -> Result<i64, serde_json::Value> {
    let n = required_i64_min(req, key, min)?;
    if n > max {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be <= {}", key, max),
            Some(json!({ key: n })),
        ));
    }
    Ok(n)
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Fails with `not_found` unless the student row exists.
pub fn ensure_student(
    conn: &Connection,
    req: &Request,
    student_id: &str,
) -> Result<(), serde_json::Value> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if found.is_none() {
        return Err(err(
            &req.id,
            "not_found",
            "student not found",
            Some(json!({ "studentId": student_id })),
        ));
    }
    Ok(())
}

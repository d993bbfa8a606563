use crate::calc;
use crate::db;
use crate::ipc::error::err;
use crate::ipc::helpers::{db_conn, ensure_student, finish, required_i64_range, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

use super::setup;

/// Upper bound for either day count; a century of school days.
pub const MAX_ATTENDANCE_DAYS: i64 = 36_500;

/// `(present, absent)` day counts, if any were recorded.
pub fn load_attendance(conn: &Connection, student_id: &str) -> anyhow::Result<Option<(i64, i64)>> {
    let row = conn
        .query_row(
            "SELECT present, absent FROM attendance WHERE student_id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    Ok(row)
}

pub fn attendance_view(present: i64, absent: i64, threshold: i64) -> Value {
    let percent = calc::attendance_percent(present, absent);
    json!({
        "present": present,
        "absent": absent,
        "percent": percent,
        "low": (present > 0 || absent > 0) && percent < threshold as f64,
    })
}

fn handle_attendance_get(state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    ensure_student(conn, req, &student_id)?;
    let q = |e: anyhow::Error| err(&req.id, "db_query_failed", format!("{e:#}"), None);
    let (present, absent) = load_attendance(conn, &student_id)
        .map_err(q)?
        .unwrap_or((0, 0));
    let threshold = setup::low_attendance_threshold(conn).map_err(q)?;
    let mut view = attendance_view(present, absent, threshold);
    view["studentId"] = json!(student_id);
    Ok(view)
}

fn handle_attendance_update(state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let present = required_i64_range(req, "present", 0, MAX_ATTENDANCE_DAYS)?;
    let absent = required_i64_range(req, "absent", 0, MAX_ATTENDANCE_DAYS)?;
    ensure_student(conn, req, &student_id)?;

    conn.execute(
        "INSERT INTO attendance(student_id, present, absent, updated_at) VALUES(?, ?, ?, ?)
         ON CONFLICT(student_id) DO UPDATE SET
            present = excluded.present,
            absent = excluded.absent,
            updated_at = excluded.updated_at",
        (&student_id, present, absent, db::now_timestamp()),
    )
    .map_err(|e| err(&req.id, "db_update_failed", e.to_string(), None))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "attendance.get" => handle_attendance_get(state, req),
        "attendance.update" => handle_attendance_update(state, req),
        _ => return None,
    };
    Some(finish(req, resp))
}

use crate::calc;
use crate::ipc::error::err;
use crate::ipc::helpers::{db_conn, finish, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

use super::{attendance, fees, reports, setup, students};

// Parent dashboard: every card is null when its data is missing.
fn handle_dashboard_get(state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let q = |e: anyhow::Error| err(&req.id, "db_query_failed", format!("{e:#}"), None);

    let student = students::load_student(conn, &student_id)
        .map_err(|e| q(e.into()))?
        .ok_or_else(|| {
            err(
                &req.id,
                "not_found",
                "student not found",
                Some(json!({ "studentId": student_id })),
            )
        })?;

    let installments = fees::load_installments(conn, &student_id).map_err(q)?;
    let fee_card = if installments.is_empty() {
        Value::Null
    } else {
        let totals = fees::totals_of(&installments);
        json!({ "paid": totals.total_paid, "remaining": totals.remaining_fees })
    };

    let threshold = setup::low_attendance_threshold(conn).map_err(q)?;
    let attendance_card = match attendance::load_attendance(conn, &student_id).map_err(q)? {
        Some((present, absent)) => attendance::attendance_view(present, absent, threshold),
        None => Value::Null,
    };

    let report_card = match reports::earliest_card(conn, &student_id).map_err(q)? {
        Some(card) => {
            let policy = setup::grading_policy(conn).map_err(q)?;
            // A strict-policy rejection blanks the summary, not the dashboard.
            let (summary, summary_error) = match calc::summarize_report_card(&card, policy) {
                Ok(summary) => (json!(summary), Value::Null),
                Err(e) => {
                    tracing::warn!(code = %e.code, term = card.term, "dashboard summary skipped");
                    (Value::Null, json!(e))
                }
            };
            json!({
                "term": card.term,
                "marks": card
                    .subjects
                    .iter()
                    .map(|s| json!({ "name": s.name, "score": s.score, "max": s.max }))
                    .collect::<Vec<_>>(),
                "summary": summary,
                "summaryError": summary_error,
            })
        }
        None => Value::Null,
    };

    Ok(json!({
        "student": student,
        "fees": fee_card,
        "attendance": attendance_card,
        "report": report_card,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "dashboard.get" => handle_dashboard_get(state, req),
        _ => return None,
    };
    Some(finish(req, resp))
}

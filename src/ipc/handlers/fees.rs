use crate::calc::round_2_decimals;
use crate::ipc::error::err;
use crate::ipc::helpers::{db_conn, ensure_student, finish, required_i64_min, required_str};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::setup;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub amount: f64,
    pub date: String,
    #[serde(default)]
    pub paid: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeTotals {
    pub total_paid: f64,
    pub remaining_fees: f64,
}

pub fn load_installments(conn: &Connection, student_id: &str) -> anyhow::Result<Vec<Installment>> {
    let mut stmt = conn.prepare(
        "SELECT amount, due_date, paid FROM fee_installments WHERE student_id = ? ORDER BY idx",
    )?;
    let rows = stmt
        .query_map([student_id], |r| {
            Ok(Installment {
                amount: r.get(0)?,
                date: r.get(1)?,
                paid: r.get::<_, i64>(2)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn totals_of(installments: &[Installment]) -> FeeTotals {
    let (paid, unpaid) = installments.iter().fold((0.0, 0.0), |(p, u), inst| {
        if inst.paid {
            (p + inst.amount, u)
        } else {
            (p, u + inst.amount)
        }
    });
    FeeTotals {
        total_paid: round_2_decimals(paid),
        remaining_fees: round_2_decimals(unpaid),
    }
}

pub fn fee_totals(conn: &Connection, student_id: &str) -> anyhow::Result<FeeTotals> {
    Ok(totals_of(&load_installments(conn, student_id)?))
}

fn handle_fees_get(state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    ensure_student(conn, req, &student_id)?;
    let q = |e: anyhow::Error| err(&req.id, "db_query_failed", format!("{e:#}"), None);
    let installments = load_installments(conn, &student_id).map_err(q)?;
    let currency = setup::currency_symbol(conn).map_err(q)?;
    let totals = totals_of(&installments);
    Ok(json!({
        "studentId": student_id,
        "currencySymbol": currency,
        "totalPaid": totals.total_paid,
        "remainingFees": totals.remaining_fees,
        "installments": installments,
    }))
}

fn parse_installments(req: &Request) -> Result<Vec<Installment>, Value> {
    let Some(items) = req.params.get("installments").and_then(|v| v.as_array()) else {
        return Err(err(
            &req.id,
            "bad_params",
            "installments must be an array",
            None,
        ));
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let inst: Installment = serde_json::from_value(item.clone()).map_err(|e| {
            err(
                &req.id,
                "bad_params",
                format!("installments[{}] is invalid: {}", i, e),
                Some(json!({ "index": i })),
            )
        })?;
        if !inst.amount.is_finite() || inst.amount < 0.0 {
            return Err(err(
                &req.id,
                "bad_params",
                format!("installments[{}].amount must be a non-negative number", i),
                Some(json!({ "index": i })),
            ));
        }
        let date = inst.date.trim();
        if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
            return Err(err(
                &req.id,
                "bad_params",
                format!("installments[{}].date must be YYYY-MM-DD", i),
                Some(json!({ "index": i, "date": inst.date })),
            ));
        }
        out.push(Installment {
            date: date.to_string(),
            ..inst
        });
    }
    Ok(out)
}

fn handle_installments_set(state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let installments = parse_installments(req)?;
    ensure_student(conn, req, &student_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| err(&req.id, "db_tx_failed", e.to_string(), None))?;
    tx.execute(
        "DELETE FROM fee_installments WHERE student_id = ?",
        [&student_id],
    )
    .map_err(|e| err(&req.id, "db_delete_failed", e.to_string(), None))?;
    for (i, inst) in installments.iter().enumerate() {
        tx.execute(
            "INSERT INTO fee_installments(student_id, idx, amount, due_date, paid)
             VALUES(?, ?, ?, ?, ?)",
            (&student_id, i as i64, inst.amount, &inst.date, inst.paid as i64),
        )
        .map_err(|e| {
            err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "fee_installments", "index": i })),
            )
        })?;
    }
    tx.commit()
        .map_err(|e| err(&req.id, "db_commit_failed", e.to_string(), None))?;

    let totals = totals_of(&installments);
    Ok(json!({
        "studentId": student_id,
        "count": installments.len(),
        "totalPaid": totals.total_paid,
        "remainingFees": totals.remaining_fees,
    }))
}

fn handle_installments_mark_paid(state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let index = required_i64_min(req, "index", 0)?;
    let Some(paid) = req.params.get("paid").and_then(|v| v.as_bool()) else {
        return Err(err(&req.id, "bad_params", "paid must be boolean", None));
    };
    ensure_student(conn, req, &student_id)?;

    let changed = conn
        .execute(
            "UPDATE fee_installments SET paid = ? WHERE student_id = ? AND idx = ?",
            (paid as i64, &student_id, index),
        )
        .map_err(|e| err(&req.id, "db_update_failed", e.to_string(), None))?;
    if changed == 0 {
        return Err(err(
            &req.id,
            "not_found",
            "installment not found",
            Some(json!({ "studentId": student_id, "index": index })),
        ));
    }
    let totals = fee_totals(conn, &student_id)
        .map_err(|e| err(&req.id, "db_query_failed", format!("{e:#}"), None))?;
    Ok(json!({
        "totalPaid": totals.total_paid,
        "remainingFees": totals.remaining_fees,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "fees.get" => handle_fees_get(state, req),
        "fees.installments.set" => handle_installments_set(state, req),
        "fees.installments.markPaid" => handle_installments_mark_paid(state, req),
        _ => return None,
    };
    Some(finish(req, resp))
}

use crate::calc::{self, GradePolicy, ReportCard, Subject, TeacherRemark};
use crate::db;
use crate::ipc::error::{calc_err, err};
use crate::ipc::helpers::{db_conn, ensure_student, finish, required_i64_min, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

use super::setup;

pub fn list_terms(conn: &Connection, student_id: &str) -> anyhow::Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT term FROM report_cards WHERE student_id = ? ORDER BY term")?;
    let terms = stmt
        .query_map([student_id], |r| r.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(terms)
}

pub fn load_card(
    conn: &Connection,
    student_id: &str,
    term: i64,
) -> anyhow::Result<Option<ReportCard>> {
    let head: Option<(String, String, String, String)> = conn
        .query_row(
            "SELECT id, overall_grade, remark_text, final_grade
             FROM report_cards WHERE student_id = ? AND term = ?",
            (student_id, term),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((card_id, overall_grade, remark_text, final_grade)) = head else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT name, score, max, grade, remark
         FROM report_subjects WHERE report_card_id = ? ORDER BY idx",
    )?;
    let subjects = stmt
        .query_map([&card_id], |r| {
            Ok(Subject {
                name: r.get(0)?,
                score: r.get(1)?,
                max: r.get(2)?,
                grade: r.get(3)?,
                remark: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(ReportCard {
        student_id: student_id.to_string(),
        term,
        subjects,
        overall_grade,
        teacher_remark: TeacherRemark {
            text: remark_text,
            final_grade,
        },
    }))
}

pub fn latest_card(conn: &Connection, student_id: &str) -> anyhow::Result<Option<ReportCard>> {
    match list_terms(conn, student_id)?.last() {
        Some(&term) => load_card(conn, student_id, term),
        None => Ok(None),
    }
}

pub fn earliest_card(conn: &Connection, student_id: &str) -> anyhow::Result<Option<ReportCard>> {
    match list_terms(conn, student_id)?.first() {
        Some(&term) => load_card(conn, student_id, term),
        None => Ok(None),
    }
}

fn card_payload(card: &ReportCard, terms: &[i64]) -> Value {
    json!({
        "studentId": card.student_id,
        "term": card.term,
        "terms": terms,
        "subjects": card.subjects,
        "overall": { "grade": card.overall_grade },
        "teacherRemark": card.teacher_remark,
    })
}

fn parse_subjects(req: &Request, raw: Option<&Value>) -> Result<Vec<Subject>, Value> {
    let Some(items) = raw.and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "subjects must be an array", None));
    };
    let mut subjects = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let mut s: Subject = serde_json::from_value(item.clone()).map_err(|e| {
            err(
                &req.id,
                "bad_params",
                format!("subjects[{}] is invalid: {}", i, e),
                Some(json!({ "index": i })),
            )
        })?;
        s.name = s.name.trim().to_string();
        s.grade = calc::normalize_grade(&s.grade);
        subjects.push(s);
    }
    Ok(subjects)
}

/// Stored subjects must satisfy `score >= 0` and `max > 0`.
fn validate_stored_subjects(req: &Request, subjects: &[Subject]) -> Result<(), Value> {
    for (i, s) in subjects.iter().enumerate() {
        let problem = if s.name.is_empty() {
            Some("name must not be empty")
        } else if !s.score.is_finite() || s.score < 0.0 {
            Some("score must be a non-negative number")
        } else if !s.max.is_finite() || s.max <= 0.0 {
            Some("max must be a positive number")
        } else {
            None
        };
        if let Some(msg) = problem {
            return Err(err(
                &req.id,
                "bad_params",
                format!("subjects[{}]: {}", i, msg),
                Some(json!({ "index": i, "subject": s.name })),
            ));
        }
    }
    Ok(())
}

fn handle_terms(state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    ensure_student(conn, req, &student_id)?;
    let terms = list_terms(conn, &student_id)
        .map_err(|e| err(&req.id, "db_query_failed", format!("{e:#}"), None))?;
    Ok(json!({ "studentId": student_id, "terms": terms }))
}

fn require_card(
    conn: &Connection,
    req: &Request,
    student_id: &str,
    term: i64,
) -> Result<ReportCard, Value> {
    load_card(conn, student_id, term)
        .map_err(|e| err(&req.id, "db_query_failed", format!("{e:#}"), None))?
        .ok_or_else(|| {
            err(
                &req.id,
                "not_found",
                "report card not found",
                Some(json!({ "studentId": student_id, "term": term })),
            )
        })
}

fn handle_card_get(state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let term = required_i64_min(req, "term", 1)?;
    let card = require_card(conn, req, &student_id, term)?;
    let terms = list_terms(conn, &student_id)
        .map_err(|e| err(&req.id, "db_query_failed", format!("{e:#}"), None))?;
    Ok(card_payload(&card, &terms))
}

fn handle_card_upsert(state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let term = required_i64_min(req, "term", 1)?;
    let subjects = parse_subjects(req, req.params.get("subjects"))?;
    validate_stored_subjects(req, &subjects)?;
    let overall_grade = req
        .params
        .get("overallGrade")
        .and_then(|v| v.as_str())
        .map(calc::normalize_grade)
        .unwrap_or_default();
    let remark: TeacherRemark = match req.params.get("teacherRemark") {
        None | Some(Value::Null) => TeacherRemark::default(),
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
            err(
                &req.id,
                "bad_params",
                format!("teacherRemark is invalid: {}", e),
                None,
            )
        })?,
    };
    ensure_student(conn, req, &student_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| err(&req.id, "db_tx_failed", e.to_string(), None))?;
    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM report_cards WHERE student_id = ? AND term = ?",
            (&student_id, term),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    let now = db::now_timestamp();
    let card_id = match existing {
        Some(id) => {
            tx.execute(
                "UPDATE report_cards
                 SET overall_grade = ?, remark_text = ?, final_grade = ?, updated_at = ?
                 WHERE id = ?",
                (
                    &overall_grade,
                    &remark.text,
                    calc::normalize_grade(&remark.final_grade),
                    &now,
                    &id,
                ),
            )
            .map_err(|e| err(&req.id, "db_update_failed", e.to_string(), None))?;
            tx.execute("DELETE FROM report_subjects WHERE report_card_id = ?", [&id])
                .map_err(|e| err(&req.id, "db_delete_failed", e.to_string(), None))?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO report_cards(id, student_id, term, overall_grade, remark_text, final_grade, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    &student_id,
                    term,
                    &overall_grade,
                    &remark.text,
                    calc::normalize_grade(&remark.final_grade),
                    &now,
                ),
            )
            .map_err(|e| {
                err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "report_cards" })),
                )
            })?;
            id
        }
    };

    for (i, s) in subjects.iter().enumerate() {
        tx.execute(
            "INSERT INTO report_subjects(report_card_id, idx, name, score, max, grade, remark)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (&card_id, i as i64, &s.name, s.score, s.max, &s.grade, &s.remark),
        )
        .map_err(|e| {
            err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "report_subjects", "index": i })),
            )
        })?;
    }
    tx.commit()
        .map_err(|e| err(&req.id, "db_commit_failed", e.to_string(), None))?;

    tracing::info!(student_id = %student_id, term, subjects = subjects.len(), "report card saved");
    Ok(json!({ "studentId": student_id, "term": term, "subjectCount": subjects.len() }))
}

fn handle_card_delete(state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let term = required_i64_min(req, "term", 1)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| err(&req.id, "db_tx_failed", e.to_string(), None))?;
    tx.execute(
        "DELETE FROM report_subjects WHERE report_card_id IN
            (SELECT id FROM report_cards WHERE student_id = ? AND term = ?)",
        (&student_id, term),
    )
    .map_err(|e| err(&req.id, "db_delete_failed", e.to_string(), None))?;
    let removed = tx
        .execute(
            "DELETE FROM report_cards WHERE student_id = ? AND term = ?",
            (&student_id, term),
        )
        .map_err(|e| err(&req.id, "db_delete_failed", e.to_string(), None))?;
    tx.commit()
        .map_err(|e| err(&req.id, "db_commit_failed", e.to_string(), None))?;
    if removed == 0 {
        return Err(err(
            &req.id,
            "not_found",
            "report card not found",
            Some(json!({ "studentId": student_id, "term": term })),
        ));
    }
    Ok(json!({ "ok": true }))
}

fn handle_summary(state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let term = required_i64_min(req, "term", 1)?;
    let card = require_card(conn, req, &student_id, term)?;
    let policy = setup::grading_policy(conn)
        .map_err(|e| err(&req.id, "db_query_failed", format!("{e:#}"), None))?;
    let summary =
        calc::summarize_report_card(&card, policy).map_err(|e| calc_err(&req.id, e))?;
    Ok(json!({
        "studentId": card.student_id,
        "term": card.term,
        "overallGrade": card.overall_grade,
        "policy": policy.as_str(),
        "summary": summary,
    }))
}

fn handle_compute(state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let subjects = parse_subjects(req, req.params.get("subjects"))?;
    let policy = match req.params.get("policy") {
        None | Some(Value::Null) => match state.db.as_ref() {
            Some(conn) => setup::grading_policy(conn)
                .map_err(|e| err(&req.id, "db_query_failed", format!("{e:#}"), None))?,
            None => GradePolicy::default(),
        },
        Some(v) => v.as_str().and_then(GradePolicy::parse).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "policy must be one of: lenient, strict",
                Some(json!({ "policy": v })),
            )
        })?,
    };
    let summary = calc::summarize_subjects(&subjects, policy).map_err(|e| calc_err(&req.id, e))?;
    Ok(json!({ "policy": policy.as_str(), "summary": summary }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "reports.terms" => handle_terms(state, req),
        "reports.card.get" => handle_card_get(state, req),
        "reports.card.upsert" => handle_card_upsert(state, req),
        "reports.card.delete" => handle_card_delete(state, req),
        "reports.summary" => handle_summary(state, req),
        "reports.compute" => handle_compute(state, req),
        _ => return None,
    };
    Some(finish(req, resp))
}

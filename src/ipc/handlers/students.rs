use crate::calc;
use crate::db;
use crate::ipc::error::err;
use crate::ipc::helpers::{db_conn, ensure_student, finish, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{attendance, fees, reports};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub student_id: String,
    pub roll_no: String,
    pub name: String,
    pub student_class: String,
    pub section: Option<String>,
    pub class_teacher: Option<String>,
}

fn row_to_student(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        student_id: r.get(0)?,
        roll_no: r.get(1)?,
        name: r.get(2)?,
        student_class: r.get(3)?,
        section: r.get(4)?,
        class_teacher: r.get(5)?,
    })
}

/// Leading integer of a roll number; anything unparseable sorts as 0.
fn roll_sort_key(roll_no: &str) -> i64 {
    let t = roll_no.trim();
    let (sign, digits) = match t.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, t.strip_prefix('+').unwrap_or(t)),
    };
    let lead: String = digits.chars().take_while(|c| c.is_ascii_digit()).collect();
    lead.parse::<i64>().map(|n| sign * n).unwrap_or(0)
}

/// Class names compare case-insensitively; exact bytes only break ties.
fn compare_class(a: &str, b: &str) -> std::cmp::Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

pub fn sort_students(rows: &mut [StudentRow]) {
    rows.sort_by(|a, b| {
        compare_class(&a.student_class, &b.student_class)
            .then_with(|| roll_sort_key(&a.roll_no).cmp(&roll_sort_key(&b.roll_no)))
            .then_with(|| a.name.cmp(&b.name))
    });
}

pub fn load_students(conn: &Connection) -> rusqlite::Result<Vec<StudentRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, roll_no, name, student_class, section, class_teacher FROM students",
    )?;
    let mut rows = stmt
        .query_map([], row_to_student)?
        .collect::<Result<Vec<_>, _>>()?;
    sort_students(&mut rows);
    Ok(rows)
}

pub fn load_student(conn: &Connection, student_id: &str) -> rusqlite::Result<Option<StudentRow>> {
    conn.query_row(
        "SELECT id, roll_no, name, student_class, section, class_teacher
         FROM students WHERE id = ?",
        [student_id],
        row_to_student,
    )
    .optional()
}

fn handle_students_list(state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let conn = db_conn(state, req)?;
    let students = load_students(conn)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    Ok(json!({ "students": students }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let conn = db_conn(state, req)?;
    let roll_no = required_str(req, "rollNo")?;
    let name = required_str(req, "name")?;
    let student_class = required_str(req, "studentClass")?;
    let section = optional_str(req, "section");
    let class_teacher = optional_str(req, "classTeacher");

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, roll_no, name, student_class, section, class_teacher, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &roll_no,
            &name,
            &student_class,
            &section,
            &class_teacher,
            db::now_timestamp(),
        ),
    )
    .map_err(|e| {
        err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        )
    })?;
    tracing::info!(student_id = %student_id, "student created");
    Ok(json!({ "studentId": student_id }))
}

fn patch_text(
    req: &Request,
    patch: &serde_json::Map<String, Value>,
    key: &str,
    nullable: bool,
) -> Result<Option<Option<String>>, Value> {
    let Some(v) = patch.get(key) else {
        return Ok(None);
    };
    if v.is_null() {
        if nullable {
            return Ok(Some(None));
        }
        return Err(err(
            &req.id,
            "bad_params",
            format!("patch.{} must not be null", key),
            None,
        ));
    }
    let Some(s) = v.as_str() else {
        return Err(err(
            &req.id,
            "bad_params",
            format!("patch.{} must be string", key),
            None,
        ));
    };
    let t = s.trim();
    if t.is_empty() && !nullable {
        return Err(err(
            &req.id,
            "bad_params",
            format!("patch.{} must not be empty", key),
            None,
        ));
    }
    Ok(Some(if t.is_empty() { None } else { Some(t.to_string()) }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(err(&req.id, "bad_params", "patch must be an object", None));
    };
    for k in patch.keys() {
        if !matches!(
            k.as_str(),
            "rollNo" | "name" | "studentClass" | "section" | "classTeacher"
        ) {
            return Err(err(
                &req.id,
                "bad_params",
                format!("unknown student field: {}", k),
                None,
            ));
        }
    }
    ensure_student(conn, req, &student_id)?;

    let columns = [
        ("rollNo", "roll_no", false),
        ("name", "name", false),
        ("studentClass", "student_class", false),
        ("section", "section", true),
        ("classTeacher", "class_teacher", true),
    ];
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| err(&req.id, "db_tx_failed", e.to_string(), None))?;
    for (key, column, nullable) in columns {
        let Some(value) = patch_text(req, patch, key, nullable)? else {
            continue;
        };
        let sql = format!("UPDATE students SET {} = ? WHERE id = ?", column);
        tx.execute(&sql, (&value, &student_id))
            .map_err(|e| err(&req.id, "db_update_failed", e.to_string(), None))?;
    }
    tx.execute(
        "UPDATE students SET updated_at = ? WHERE id = ?",
        (db::now_timestamp(), &student_id),
    )
    .map_err(|e| err(&req.id, "db_update_failed", e.to_string(), None))?;
    tx.commit()
        .map_err(|e| err(&req.id, "db_commit_failed", e.to_string(), None))?;
    Ok(json!({ "ok": true }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    ensure_student(conn, req, &student_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| err(&req.id, "db_tx_failed", e.to_string(), None))?;
    let statements = [
        "DELETE FROM report_subjects WHERE report_card_id IN
            (SELECT id FROM report_cards WHERE student_id = ?)",
        "DELETE FROM report_cards WHERE student_id = ?",
        "DELETE FROM fee_installments WHERE student_id = ?",
        "DELETE FROM attendance WHERE student_id = ?",
        "DELETE FROM students WHERE id = ?",
    ];
    for sql in statements {
        tx.execute(sql, [&student_id])
            .map_err(|e| err(&req.id, "db_delete_failed", e.to_string(), None))?;
    }
    tx.commit()
        .map_err(|e| err(&req.id, "db_commit_failed", e.to_string(), None))?;
    tracing::info!(student_id = %student_id, "student deleted");
    Ok(json!({ "ok": true }))
}

fn handle_students_find(state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let conn = db_conn(state, req)?;
    let name = required_str(req, "name")?;
    let roll_no = required_str(req, "rollNo")?;
    let student_class = required_str(req, "studentClass")?;

    let student = conn
        .query_row(
            "SELECT id, roll_no, name, student_class, section, class_teacher
             FROM students
             WHERE lower(name) = lower(?) AND lower(roll_no) = lower(?)
               AND lower(student_class) = lower(?)
             ORDER BY id
             LIMIT 1",
            (&name, &roll_no, &student_class),
            row_to_student,
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    match student {
        Some(s) => Ok(json!({ "student": s })),
        None => Err(err(
            &req.id,
            "not_found",
            "no student matches name, rollNo and studentClass",
            None,
        )),
    }
}

fn handle_students_database(state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let conn = db_conn(state, req)?;
    let q = |e: anyhow::Error| err(&req.id, "db_query_failed", format!("{e:#}"), None);

    let students = load_students(conn).map_err(|e| q(e.into()))?;
    let mut rows = Vec::with_capacity(students.len());
    for s in students {
        let totals = fees::fee_totals(conn, &s.student_id).map_err(q)?;
        let attendance_percent = attendance::load_attendance(conn, &s.student_id)
            .map_err(q)?
            .map(|(present, absent)| calc::attendance_percent(present, absent));
        let latest = reports::latest_card(conn, &s.student_id).map_err(q)?;
        // The overview always uses the lenient grade table.
        let (term, subjects, percentage, cgpa) = match latest {
            Some(card) => {
                let pct = calc::calculate_overall_percentage(&card.subjects);
                let cgpa = calc::calculate_cgpa(&card.subjects);
                (Some(card.term), card.subjects, Some(pct), Some(cgpa))
            }
            None => (None, Vec::new(), None, None),
        };
        rows.push(json!({
            "studentId": s.student_id,
            "rollNo": s.roll_no,
            "name": s.name,
            "studentClass": s.student_class,
            "section": s.section,
            "classTeacher": s.class_teacher,
            "feesPaid": totals.total_paid,
            "feesDue": totals.remaining_fees,
            "attendancePercent": attendance_percent,
            "term": term,
            "subjects": subjects,
            "percentage": percentage,
            "cgpa": cgpa,
        }));
    }
    Ok(json!({ "rows": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "students.list" => handle_students_list(state, req),
        "students.create" => handle_students_create(state, req),
        "students.update" => handle_students_update(state, req),
        "students.delete" => handle_students_delete(state, req),
        "students.find" => handle_students_find(state, req),
        "students.database" => handle_students_database(state, req),
        _ => return None,
    };
    Some(finish(req, resp))
}

use crate::calc::GradePolicy;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
pub enum SetupSection {
    Grading,
    Attendance,
    Fees,
}

impl SetupSection {
    const ALL: [SetupSection; 3] = [Self::Grading, Self::Attendance, Self::Fees];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            "attendance" => Some(Self::Attendance),
            "fees" => Some(Self::Fees),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Grading => "grading",
            Self::Attendance => "attendance",
            Self::Fees => "fees",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::Attendance => "setup.attendance",
            Self::Fees => "setup.fees",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "unknownGradePolicy": GradePolicy::default().as_str()
        }),
        SetupSection::Attendance => json!({
            "lowAttendanceThreshold": 75
        }),
        SetupSection::Fees => json!({
            "currencySymbol": "₹"
        }),
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "unknownGradePolicy" => {
                    let s = parse_string_max(v, k, 16)?;
                    let Some(policy) = GradePolicy::parse(&s) else {
                        return Err("unknownGradePolicy must be one of: lenient, strict".into());
                    };
                    obj.insert(k.clone(), Value::String(policy.as_str().to_string()));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
            SetupSection::Attendance => match k.as_str() {
                "lowAttendanceThreshold" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 100)?));
                }
                _ => return Err(format!("unknown attendance field: {}", k)),
            },
            SetupSection::Fees => match k.as_str() {
                "currencySymbol" => {
                    let s = parse_string_max(v, k, 8)?;
                    if s.is_empty() {
                        return Err("currencySymbol must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown fees field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed stored values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                if merge_section_patch(section, &mut current, &one).is_err() {
                    tracing::warn!(section = section.name(), field = %k, "ignoring bad stored setting");
                }
            }
        }
    }
    Ok(current)
}

pub fn grading_policy(conn: &rusqlite::Connection) -> anyhow::Result<GradePolicy> {
    let section = load_section(conn, SetupSection::Grading)?;
    Ok(section
        .get("unknownGradePolicy")
        .and_then(|v| v.as_str())
        .and_then(GradePolicy::parse)
        .unwrap_or_default())
}

pub fn low_attendance_threshold(conn: &rusqlite::Connection) -> anyhow::Result<i64> {
    let section = load_section(conn, SetupSection::Attendance)?;
    Ok(section
        .get("lowAttendanceThreshold")
        .and_then(|v| v.as_i64())
        .unwrap_or(75))
}

pub fn currency_symbol(conn: &rusqlite::Connection) -> anyhow::Result<String> {
    let section = load_section(conn, SetupSection::Fees)?;
    Ok(section
        .get("currencySymbol")
        .and_then(|v| v.as_str())
        .unwrap_or("₹")
        .to_string())
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(
            &req.id,
            "bad_params",
            "unknown section",
            Some(json!({ "section": section_raw })),
        );
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.name(), "setup updated");
    ok(&req.id, json!({ section.name(): current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

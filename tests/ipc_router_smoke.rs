use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_reportcardd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn reportcardd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("reportcard-router-smoke");
    let bundle_out = workspace.join("smoke-backup.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "rollNo": "1", "name": "Smoke Student", "studentClass": "5" }),
    );
    let sid = created
        .get("result")
        .and_then(|v| v.get("studentId"))
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let calls = [
        ("students.list", json!({})),
        ("students.update", json!({ "studentId": sid, "patch": { "section": "A" } })),
        (
            "students.find",
            json!({ "name": "Smoke Student", "rollNo": "1", "studentClass": "5" }),
        ),
        ("students.database", json!({})),
        (
            "reports.card.upsert",
            json!({ "studentId": sid, "term": 1, "subjects": [] }),
        ),
        ("reports.terms", json!({ "studentId": sid })),
        ("reports.card.get", json!({ "studentId": sid, "term": 1 })),
        ("reports.summary", json!({ "studentId": sid, "term": 1 })),
        ("reports.compute", json!({ "subjects": [] })),
        ("reports.card.delete", json!({ "studentId": sid, "term": 1 })),
        (
            "fees.installments.set",
            json!({ "studentId": sid, "installments": [] }),
        ),
        (
            "fees.installments.markPaid",
            json!({ "studentId": sid, "index": 0, "paid": true }),
        ),
        ("fees.get", json!({ "studentId": sid })),
        (
            "attendance.update",
            json!({ "studentId": sid, "present": 1, "absent": 0 }),
        ),
        ("attendance.get", json!({ "studentId": sid })),
        ("dashboard.get", json!({ "studentId": sid })),
        ("setup.get", json!({})),
        (
            "setup.update",
            json!({ "section": "grading", "patch": { "unknownGradePolicy": "lenient" } }),
        ),
        (
            "backup.exportWorkspaceBundle",
            json!({
                "workspacePath": workspace.to_string_lossy(),
                "outPath": bundle_out.to_string_lossy()
            }),
        ),
        (
            "backup.importWorkspaceBundle",
            json!({
                "workspacePath": workspace.to_string_lossy(),
                "inPath": bundle_out.to_string_lossy()
            }),
        ),
        ("students.delete", json!({ "studentId": sid })),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        let _ = request(&mut stdin, &mut reader, &format!("c{}", i), method, params);
    }

    let _ = child.kill();
}

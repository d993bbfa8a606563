use crate::backup;
use crate::ipc::error::err;
use crate::ipc::helpers::{finish, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use super::core::select_workspace;

fn handle_export(_state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let workspace = PathBuf::from(required_str(req, "workspacePath")?);
    let out_path = PathBuf::from(required_str(req, "outPath")?);

    let summary = backup::export_workspace_bundle(&workspace, &out_path)
        .map_err(|e| err(&req.id, "backup_export_failed", format!("{e:#}"), None))?;
    tracing::info!(
        out = %out_path.to_string_lossy(),
        sha256 = %summary.db_sha256,
        "workspace bundle exported"
    );
    Ok(json!({
        "ok": true,
        "path": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "dbSha256": summary.db_sha256,
    }))
}

/// True when both paths name the same directory once resolved on disk.
fn same_workspace(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn handle_import(state: &mut AppState, req: &Request) -> Result<Value, Value> {
    let workspace = PathBuf::from(required_str(req, "workspacePath")?);
    let in_path = PathBuf::from(required_str(req, "inPath")?);

    // The open connection must not hold the file being replaced.
    let reopen = state
        .workspace
        .clone()
        .filter(|current| same_workspace(current, &workspace));
    if reopen.is_some() {
        state.db = None;
    }
    let imported = backup::import_workspace_bundle(&in_path, &workspace);
    if let Some(current) = reopen {
        if let Err(e) = select_workspace(state, &current) {
            return Err(err(&req.id, "db_open_failed", format!("{e:#}"), None));
        }
    }
    let summary =
        imported.map_err(|e| err(&req.id, "backup_import_failed", format!("{e:#}"), None))?;
    tracing::info!(src = %in_path.to_string_lossy(), "workspace bundle imported");
    Ok(json!({
        "ok": true,
        "workspacePath": workspace.to_string_lossy(),
        "bundleFormatDetected": summary.bundle_format,
        "dbSha256": summary.db_sha256,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "backup.exportWorkspaceBundle" => handle_export(state, req),
        "backup.importWorkspaceBundle" => handle_import(state, req),
        _ => return None,
    };
    Some(finish(req, resp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_spellings_resolve_to_one_directory() {
        let dir = std::env::temp_dir().join(format!("reportcard-same-ws-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("sub")).expect("create dirs");
        assert!(same_workspace(&dir, &dir.join("sub").join("..")));
        assert!(same_workspace(&dir, &dir.join(".")));
        assert!(!same_workspace(&dir, &dir.join("sub")));
        assert!(!same_workspace(&dir, &dir.join("missing")));
    }
}

use crate::backup;
use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{required_str, service, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_export(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let workspace = state
        .workspace
        .as_ref()
        .ok_or_else(|| service("select a workspace first"))?;
    let out_path = PathBuf::from(required_str(&req.params, "outPath")?);

    let summary =
        backup::export_workspace_bundle(workspace, &out_path).map_err(|e| service(format!("{e:?}")))?;
    tracing::info!(out = %out_path.to_string_lossy(), entries = summary.entry_count, "bundle exported");
    Ok(json!({
        "outPath": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
    }))
}

/// Restores the bundle into the target directory and switches the live
/// workspace over to it. In-memory sessions do not survive the switch.
fn handle_import(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let bundle_path = PathBuf::from(required_str(&req.params, "bundlePath")?);
    let workspace_path = PathBuf::from(required_str(&req.params, "workspacePath")?);

    let summary = backup::import_workspace_bundle(&bundle_path, &workspace_path)
        .map_err(|e| service(format!("{e:?}")))?;

    let conn = db::open_db(&workspace_path).map_err(|e| service(format!("{e:?}")))?;
    state.workspace = Some(workspace_path.clone());
    state.db = Some(conn);
    state.sessions.clear();
    state.subscriptions.clear();

    tracing::info!(
        workspace = %workspace_path.to_string_lossy(),
        assets = summary.asset_count,
        "bundle imported"
    );
    Ok(json!({
        "workspacePath": workspace_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format_detected,
        "assetCount": summary.asset_count,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.export" => handle_export(state, req),
        "backup.import" => handle_import(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}

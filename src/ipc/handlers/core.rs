use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_f64, require_db, service, validation, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "validation_error", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            tracing::info!(workspace = %path.to_string_lossy(), "workspace opened");
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            // A new workspace invalidates everything session-scoped.
            state.sessions.clear();
            state.subscriptions.clear();
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "service_unavailable", format!("{e:?}"), None),
    }
}

fn settings_get(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let threshold = db::passing_threshold(conn);
    let tuition = db::settings_get_json(conn, "fees.tuitionOverrides").map_err(service)?;
    let bus = db::settings_get_json(conn, "fees.busOverrides").map_err(service)?;
    Ok(json!({
        "passingThreshold": threshold,
        "tuitionOverrides": tuition,
        "busOverrides": bus,
    }))
}

fn settings_set(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    if let Some(threshold) = optional_f64(&req.params, "passingThreshold")? {
        if !(0.0..=100.0).contains(&threshold) {
            return Err(validation("passingThreshold must be between 0 and 100"));
        }
        db::settings_set_json(conn, "exams.passingThreshold", &json!(threshold))
            .map_err(service)?;
    }
    settings_get(state)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "settings.get" => Some(match settings_get(state) {
            Ok(result) => ok(&req.id, result),
            Err(e) => e.response(&req.id),
        }),
        "settings.set" => Some(match settings_set(state, req) {
            Ok(result) => ok(&req.id, result),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}

use crate::ipc::error::ok;
use crate::ipc::helpers::{
    admit_generation, not_found, now_iso, optional_str, require_db, required_str, service,
    validation, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::ToSql;
use serde_json::json;
use uuid::Uuid;

fn handle_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let title = required_str(&req.params, "title")?;
    let body = required_str(&req.params, "body")?;
    let medium = required_str(&req.params, "medium")?;
    // No classLabel means a school-wide notice.
    let class_label = optional_str(&req.params, "classLabel");

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO notices(id, title, body, class_label, medium, status, created_at)
         VALUES(?, ?, ?, ?, ?, 'active', ?)",
        (&id, &title, &body, &class_label, &medium, now_iso()),
    )
    .map_err(service)?;

    Ok(json!({ "noticeId": id, "status": "active" }))
}

fn handle_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    admit_generation(state, &req.params, "notices")?;
    let conn = require_db(state)?;
    let status = optional_str(&req.params, "status");
    if let Some(ref s) = status {
        if s != "active" && s != "archived" {
            return Err(validation("status must be 'active' or 'archived'"));
        }
    }
    let medium = optional_str(&req.params, "medium");
    let class_label = optional_str(&req.params, "classLabel");

    let mut sql = String::from(
        "SELECT id, title, body, class_label, medium, status, created_at
         FROM notices WHERE 1=1",
    );
    let mut binds: Vec<&dyn ToSql> = Vec::new();
    if let Some(ref s) = status {
        sql.push_str(" AND status = ?");
        binds.push(s);
    }
    if let Some(ref m) = medium {
        sql.push_str(" AND medium = ?");
        binds.push(m);
    }
    if let Some(ref cl) = class_label {
        // Class-scoped callers also see school-wide notices.
        sql.push_str(" AND (class_label = ? OR class_label IS NULL)");
        binds.push(cl);
    }
    sql.push_str(" ORDER BY created_at DESC");

    let mut stmt = conn.prepare(&sql).map_err(service)?;
    let notices = stmt
        .query_map(rusqlite::params_from_iter(binds), |r| {
            Ok(json!({
                "noticeId": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "body": r.get::<_, String>(2)?,
                "classLabel": r.get::<_, Option<String>>(3)?,
                "medium": r.get::<_, String>(4)?,
                "status": r.get::<_, String>(5)?,
                "createdAt": r.get::<_, String>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(service)?;

    Ok(json!({ "notices": notices }))
}

fn handle_set_status(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let notice_id = required_str(&req.params, "noticeId")?;
    let status = required_str(&req.params, "status")?;
    if status != "active" && status != "archived" {
        return Err(validation("status must be 'active' or 'archived'"));
    }

    let affected = conn
        .execute(
            "UPDATE notices SET status = ? WHERE id = ?",
            (&status, &notice_id),
        )
        .map_err(service)?;
    if affected == 0 {
        return Err(not_found("notice not found"));
    }
    Ok(json!({ "noticeId": notice_id, "status": status }))
}

fn handle_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let notice_id = required_str(&req.params, "noticeId")?;
    let affected = conn
        .execute("DELETE FROM notices WHERE id = ?", [&notice_id])
        .map_err(service)?;
    if affected == 0 {
        return Err(not_found("notice not found"));
    }
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "notices.create" => handle_create(state, req),
        "notices.list" => handle_list(state, req),
        "notices.setStatus" => handle_set_status(state, req),
        "notices.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}

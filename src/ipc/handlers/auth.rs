use crate::assets;
use crate::freshness::FetchGate;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    auth, now_iso, require_db, require_session, required_str, service, validation, HandlerErr,
};
use crate::ipc::types::{AppState, Request, Session};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn student_json(row: &StudentRow) -> serde_json::Value {
    json!({
        "studentId": row.id,
        "srNumber": row.sr_number,
        "displayName": row.display_name,
        "classLabel": row.class_label,
        "medium": row.medium,
        "fatherName": row.father_name,
        "motherName": row.mother_name,
        "dateOfBirth": row.date_of_birth,
        "photoUrl": row.photo_url,
    })
}

struct StudentRow {
    id: String,
    sr_number: String,
    display_name: String,
    class_label: String,
    medium: String,
    father_name: String,
    mother_name: Option<String>,
    date_of_birth: Option<String>,
    photo_url: Option<String>,
}

fn load_student_by_sr(
    conn: &rusqlite::Connection,
    sr_number: &str,
) -> Result<Option<StudentRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, sr_number, display_name, class_label, medium,
                father_name, mother_name, date_of_birth, photo_url
         FROM students WHERE sr_number = ?",
        [sr_number],
        |r| {
            Ok(StudentRow {
                id: r.get(0)?,
                sr_number: r.get(1)?,
                display_name: r.get(2)?,
                class_label: r.get(3)?,
                medium: r.get(4)?,
                father_name: r.get(5)?,
                mother_name: r.get(6)?,
                date_of_birth: r.get(7)?,
                photo_url: r.get(8)?,
            })
        },
    )
    .optional()
    .map_err(service)
}

fn load_student_by_id(
    conn: &rusqlite::Connection,
    student_id: &str,
) -> Result<Option<StudentRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, sr_number, display_name, class_label, medium,
                father_name, mother_name, date_of_birth, photo_url
         FROM students WHERE id = ?",
        [student_id],
        |r| {
            Ok(StudentRow {
                id: r.get(0)?,
                sr_number: r.get(1)?,
                display_name: r.get(2)?,
                class_label: r.get(3)?,
                medium: r.get(4)?,
                father_name: r.get(5)?,
                mother_name: r.get(6)?,
                date_of_birth: r.get(7)?,
                photo_url: r.get(8)?,
            })
        },
    )
    .optional()
    .map_err(service)
}

/// SR number + date of birth is the portal credential pair. Both failure
/// modes (unknown SR, wrong date) return the same message.
fn handle_login(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let sr_number = required_str(&req.params, "srNumber")?;
    let date_of_birth = required_str(&req.params, "dateOfBirth")?;

    let row = {
        let conn = require_db(state)?;
        load_student_by_sr(conn, &sr_number)?
    };
    let Some(row) = row else {
        return Err(auth("invalid credentials"));
    };
    if row.date_of_birth.as_deref() != Some(date_of_birth.as_str()) {
        return Err(auth("invalid credentials"));
    }

    let token = Uuid::new_v4().to_string();
    state.sessions.insert(
        token.clone(),
        Session {
            student_id: row.id.clone(),
            sr_number: row.sr_number.clone(),
            medium: row.medium.clone(),
            started_at: now_iso(),
            gate: FetchGate::default(),
        },
    );
    tracing::info!(sr_number = %row.sr_number, "login");

    Ok(json!({
        "sessionToken": token,
        "student": student_json(&row),
    }))
}

fn handle_logout(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let token = required_str(&req.params, "sessionToken")?;
    if state.sessions.remove(&token).is_none() {
        return Err(auth("unknown or expired session token"));
    }
    // Teardown is explicit: a dead session must not keep receiving events.
    state.subscriptions.retain(|s| s.session_token != token);
    Ok(json!({ "loggedOut": true }))
}

fn handle_profile(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (_, session) = require_session(state, &req.params)?;
    let student_id = session.student_id.clone();
    let session_info = json!({
        "srNumber": session.sr_number,
        "medium": session.medium,
        "startedAt": session.started_at,
    });
    let conn = require_db(state)?;
    let row = load_student_by_id(conn, &student_id)?
        .ok_or_else(|| crate::ipc::helpers::not_found("student not found"))?;
    Ok(json!({ "student": student_json(&row), "session": session_info }))
}

/// Store the photo first; the profile row is only touched if the upload
/// succeeded, so a failed upload leaves no partial write.
fn handle_set_photo(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (_, session) = require_session(state, &req.params)?;
    let student_id = session.student_id.clone();
    let source_path = required_str(&req.params, "sourcePath")?;

    let workspace = state
        .workspace
        .as_ref()
        .ok_or_else(|| service("select a workspace first"))?;
    let stored = assets::store_file(workspace, std::path::Path::new(&source_path), "photos")
        .map_err(|e| validation(e.to_string()))?;

    let conn = require_db(state)?;
    conn.execute(
        "UPDATE students SET photo_url = ? WHERE id = ?",
        (&stored.public_url, &student_id),
    )
    .map_err(service)?;

    Ok(json!({
        "publicUrl": stored.public_url,
        "sha256": stored.sha256,
        "byteLen": stored.byte_len,
    }))
}

/// Issue a fetch generation for a record kind; the matching list call then
/// carries it back so stale in-flight responses can be refused.
fn handle_begin_fetch(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let token = required_str(&req.params, "sessionToken")?;
    let kind = required_str(&req.params, "kind")?;
    let session = state
        .sessions
        .get_mut(&token)
        .ok_or_else(|| auth("unknown or expired session token"))?;
    let generation = session.gate.begin(&kind);
    Ok(json!({ "kind": kind, "generation": generation }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "auth.login" => handle_login(state, req),
        "auth.logout" => handle_logout(state, req),
        "auth.profile" => handle_profile(state, req),
        "profile.setPhoto" => handle_set_photo(state, req),
        "session.beginFetch" => handle_begin_fetch(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}

use crate::assets;
use crate::calc::homework_status;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    admit_generation, map_constraint_err, not_found, now_iso, optional_str, parse_iso_date,
    require_db, required_str, service, today_iso, validation, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_assign(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let class_label = required_str(&req.params, "classLabel")?;
    let medium = required_str(&req.params, "medium")?;
    let subject_name = required_str(&req.params, "subjectName")?;
    let title = required_str(&req.params, "title")?;
    let details = optional_str(&req.params, "details");
    let due_date = parse_iso_date(&required_str(&req.params, "dueDate")?, "dueDate")?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO homework_assignments(id, class_label, medium, subject_name,
                                          title, details, assigned_date, due_date)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &class_label,
            &medium,
            &subject_name,
            &title,
            &details,
            today_iso(),
            &due_date,
        ),
    )
    .map_err(service)?;

    Ok(json!({ "assignmentId": id }))
}

/// Assignments for a class. With a studentId the per-assignment status is
/// derived for that student (pending / overdue / submitted / graded);
/// without one, submission counts are included instead.
fn handle_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    admit_generation(state, &req.params, "homework")?;
    let conn = require_db(state)?;
    let class_label = required_str(&req.params, "classLabel")?;
    let medium = required_str(&req.params, "medium")?;
    let student_id = optional_str(&req.params, "studentId");
    let today = today_iso();

    struct AssignmentRow {
        id: String,
        subject_name: String,
        title: String,
        details: Option<String>,
        assigned_date: String,
        due_date: String,
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, subject_name, title, details, assigned_date, due_date
             FROM homework_assignments
             WHERE class_label = ? AND medium = ?
             ORDER BY due_date, rowid",
        )
        .map_err(service)?;
    let assignments: Vec<AssignmentRow> = stmt
        .query_map((&class_label, &medium), |r| {
            Ok(AssignmentRow {
                id: r.get(0)?,
                subject_name: r.get(1)?,
                title: r.get(2)?,
                details: r.get(3)?,
                assigned_date: r.get(4)?,
                due_date: r.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(service)?;

    let mut out = Vec::with_capacity(assignments.len());
    for a in &assignments {
        let mut entry = json!({
            "assignmentId": a.id,
            "subjectName": a.subject_name,
            "title": a.title,
            "details": a.details,
            "assignedDate": a.assigned_date,
            "dueDate": a.due_date,
        });
        if let Some(ref sid) = student_id {
            let submission: Option<(String, String, Option<String>, Option<String>)> = conn
                .query_row(
                    "SELECT id, status, attachment_url, grade_remark
                     FROM homework_submissions
                     WHERE assignment_id = ? AND student_id = ?",
                    (&a.id, sid),
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
                )
                .optional()
                .map_err(service)?;
            let status = homework_status(
                &a.due_date,
                &today,
                submission.as_ref().map(|(_, s, _, _)| s.as_str()),
            );
            entry["status"] = json!(status);
            if let Some((submission_id, _, attachment_url, grade_remark)) = submission {
                entry["submissionId"] = json!(submission_id);
                entry["attachmentUrl"] = json!(attachment_url);
                entry["gradeRemark"] = json!(grade_remark);
            }
        } else {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM homework_submissions WHERE assignment_id = ?",
                    [&a.id],
                    |r| r.get(0),
                )
                .map_err(service)?;
            entry["submissionCount"] = json!(count);
        }
        out.push(entry);
    }

    Ok(json!({ "assignments": out }))
}

/// Upload first, insert second: if the attachment cannot be stored the
/// submission row is never written.
fn handle_submit(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let assignment_id = required_str(&req.params, "assignmentId")?;
    let student_id = required_str(&req.params, "studentId")?;

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM homework_assignments WHERE id = ?",
            [&assignment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(service)?;
    if exists.is_none() {
        return Err(not_found("assignment not found"));
    }
    let student_ok: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(service)?;
    if student_ok.is_none() {
        return Err(not_found("student not found"));
    }

    let attachment_url = match optional_str(&req.params, "attachmentPath") {
        Some(path) => {
            let workspace = state
                .workspace
                .as_ref()
                .ok_or_else(|| service("select a workspace first"))?;
            let stored =
                assets::store_file(workspace, std::path::Path::new(&path), "homework")
                    .map_err(|e| validation(e.to_string()))?;
            Some(stored.public_url)
        }
        None => None,
    };

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO homework_submissions(id, assignment_id, student_id, submitted_at,
                                          attachment_url, status)
         VALUES(?, ?, ?, ?, ?, 'submitted')",
        (&id, &assignment_id, &student_id, now_iso(), &attachment_url),
    )
    .map_err(|e| map_constraint_err(e, "this student has already submitted this assignment"))?;

    Ok(json!({ "submissionId": id, "attachmentUrl": attachment_url }))
}

fn handle_grade(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let submission_id = required_str(&req.params, "submissionId")?;
    let grade_remark = required_str(&req.params, "gradeRemark")?;

    let affected = conn
        .execute(
            "UPDATE homework_submissions SET status = 'graded', grade_remark = ? WHERE id = ?",
            (&grade_remark, &submission_id),
        )
        .map_err(service)?;
    if affected == 0 {
        return Err(not_found("submission not found"));
    }
    Ok(json!({ "submissionId": submission_id, "status": "graded" }))
}

fn handle_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let assignment_id = required_str(&req.params, "assignmentId")?;
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM homework_assignments WHERE id = ?",
            [&assignment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(service)?;
    if exists.is_none() {
        return Err(not_found("assignment not found"));
    }

    let tx = conn.unchecked_transaction().map_err(service)?;
    if let Err(e) = tx.execute(
        "DELETE FROM homework_submissions WHERE assignment_id = ?",
        [&assignment_id],
    ) {
        let _ = tx.rollback();
        return Err(service(e));
    }
    if let Err(e) = tx.execute(
        "DELETE FROM homework_assignments WHERE id = ?",
        [&assignment_id],
    ) {
        let _ = tx.rollback();
        return Err(service(e));
    }
    tx.commit().map_err(service)?;

    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "homework.assign" => handle_assign(state, req),
        "homework.list" => handle_list(state, req),
        "homework.submit" => handle_submit(state, req),
        "homework.grade" => handle_grade(state, req),
        "homework.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}

use crate::ipc::error::ok;
use crate::ipc::helpers::{
    map_constraint_err, not_found, optional_str, parse_iso_date, require_db, required_str,
    service, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, ToSql};
use serde_json::json;
use uuid::Uuid;

fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(service)
}

fn handle_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let sr_number = required_str(&req.params, "srNumber")?;
    let display_name = required_str(&req.params, "displayName")?;
    let class_label = required_str(&req.params, "classLabel")?;
    let medium = required_str(&req.params, "medium")?;
    let father_name = required_str(&req.params, "fatherName")?;
    let mother_name = optional_str(&req.params, "motherName");
    let date_of_birth = match optional_str(&req.params, "dateOfBirth") {
        Some(d) => Some(parse_iso_date(&d, "dateOfBirth")?),
        None => None,
    };

    let id = Uuid::new_v4().to_string();
    let sort_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE class_label = ?",
            [&class_label],
            |r| r.get(0),
        )
        .map_err(service)?;

    conn.execute(
        "INSERT INTO students(id, sr_number, display_name, class_label, medium,
                              father_name, mother_name, date_of_birth, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &sr_number,
            &display_name,
            &class_label,
            &medium,
            &father_name,
            &mother_name,
            &date_of_birth,
            sort_order,
        ),
    )
    .map_err(|e| map_constraint_err(e, "a student with this SR number already exists"))?;

    Ok(json!({ "studentId": id, "srNumber": sr_number }))
}

fn handle_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let class_label = optional_str(&req.params, "classLabel");
    let medium = optional_str(&req.params, "medium");

    let mut sql = String::from(
        "SELECT id, sr_number, display_name, class_label, medium,
                father_name, mother_name, date_of_birth, photo_url, sort_order
         FROM students WHERE 1=1",
    );
    let mut binds: Vec<&dyn ToSql> = Vec::new();
    if let Some(ref cl) = class_label {
        sql.push_str(" AND class_label = ?");
        binds.push(cl);
    }
    if let Some(ref m) = medium {
        sql.push_str(" AND medium = ?");
        binds.push(m);
    }
    sql.push_str(" ORDER BY class_label, sort_order, display_name");

    let mut stmt = conn.prepare(&sql).map_err(service)?;
    let students = stmt
        .query_map(rusqlite::params_from_iter(binds), |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "srNumber": r.get::<_, String>(1)?,
                "displayName": r.get::<_, String>(2)?,
                "classLabel": r.get::<_, String>(3)?,
                "medium": r.get::<_, String>(4)?,
                "fatherName": r.get::<_, String>(5)?,
                "motherName": r.get::<_, Option<String>>(6)?,
                "dateOfBirth": r.get::<_, Option<String>>(7)?,
                "photoUrl": r.get::<_, Option<String>>(8)?,
                "sortOrder": r.get::<_, i64>(9)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(service)?;

    Ok(json!({ "students": students }))
}

fn handle_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = required_str(&req.params, "studentId")?;
    if !student_exists(conn, &student_id)? {
        return Err(not_found("student not found"));
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut binds: Vec<Box<dyn ToSql>> = Vec::new();
    if let Some(v) = optional_str(&req.params, "displayName") {
        sets.push("display_name = ?");
        binds.push(Box::new(v));
    }
    if let Some(v) = optional_str(&req.params, "classLabel") {
        sets.push("class_label = ?");
        binds.push(Box::new(v));
    }
    if let Some(v) = optional_str(&req.params, "medium") {
        sets.push("medium = ?");
        binds.push(Box::new(v));
    }
    if let Some(v) = optional_str(&req.params, "fatherName") {
        sets.push("father_name = ?");
        binds.push(Box::new(v));
    }
    if let Some(v) = optional_str(&req.params, "motherName") {
        sets.push("mother_name = ?");
        binds.push(Box::new(v));
    }
    if let Some(v) = optional_str(&req.params, "dateOfBirth") {
        let parsed = parse_iso_date(&v, "dateOfBirth")?;
        sets.push("date_of_birth = ?");
        binds.push(Box::new(parsed));
    }
    if sets.is_empty() {
        return Err(crate::ipc::helpers::validation("no fields to update"));
    }

    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    binds.push(Box::new(student_id.clone()));
    conn.execute(
        &sql,
        rusqlite::params_from_iter(binds.iter().map(|b| b.as_ref())),
    )
    .map_err(service)?;

    Ok(json!({ "studentId": student_id }))
}

fn handle_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = required_str(&req.params, "studentId")?;
    if !student_exists(conn, &student_id)? {
        return Err(not_found("student not found"));
    }

    let tx = conn.unchecked_transaction().map_err(service)?;

    // Dependency order; no ON DELETE CASCADE in the schema.
    let steps: &[(&str, &str)] = &[
        (
            "exam_subjects",
            "DELETE FROM exam_subjects WHERE exam_record_id IN
               (SELECT id FROM exam_records WHERE student_id = ?)",
        ),
        ("exam_records", "DELETE FROM exam_records WHERE student_id = ?"),
        ("fee_records", "DELETE FROM fee_records WHERE student_id = ?"),
        (
            "homework_submissions",
            "DELETE FROM homework_submissions WHERE student_id = ?",
        ),
        ("students", "DELETE FROM students WHERE id = ?"),
    ];
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&student_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr {
                code: "service_unavailable",
                message: e.to_string(),
                details: Some(json!({ "table": table })),
            });
        }
    }
    tx.commit().map_err(service)?;

    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.create" => handle_create(state, req),
        "students.list" => handle_list(state, req),
        "students.update" => handle_update(state, req),
        "students.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}

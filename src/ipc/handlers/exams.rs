use crate::calc::{
    self, classify_grade, exam_totals, percentage_of, ExamRecord, SubjectMark,
};
use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    admit_generation, map_constraint_err, not_found, optional_str, parse_iso_date, require_db,
    required_str, service, validation, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{types::Value, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct ExamFilter {
    student_id: Option<String>,
    class_label: Option<String>,
    medium: Option<String>,
}

impl ExamFilter {
    fn from_params(params: &serde_json::Value) -> Self {
        Self {
            student_id: optional_str(params, "studentId"),
            class_label: optional_str(params, "classLabel"),
            medium: optional_str(params, "medium"),
        }
    }
}

/// Load exam records with their subject lists, ordered by student roster
/// position and then insertion order. Subject rows are the authoritative
/// source for marks; stored per-exam totals are carried for display only.
fn load_exam_records(conn: &Connection, filter: &ExamFilter) -> Result<Vec<ExamRecord>, HandlerErr> {
    let mut sql = String::from(
        "SELECT e.id, e.student_id, e.exam_type, e.exam_date,
                e.total_marks, e.obtained_marks, e.percentage, e.grade
         FROM exam_records e
         JOIN students s ON s.id = e.student_id
         WHERE 1=1",
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(ref sid) = filter.student_id {
        sql.push_str(" AND e.student_id = ?");
        binds.push(Value::Text(sid.clone()));
    }
    if let Some(ref cl) = filter.class_label {
        sql.push_str(" AND s.class_label = ?");
        binds.push(Value::Text(cl.clone()));
    }
    if let Some(ref m) = filter.medium {
        sql.push_str(" AND s.medium = ?");
        binds.push(Value::Text(m.clone()));
    }
    sql.push_str(" ORDER BY s.sort_order, s.display_name, e.rowid");

    let mut stmt = conn.prepare(&sql).map_err(service)?;
    let mut records: Vec<ExamRecord> = stmt
        .query_map(rusqlite::params_from_iter(binds), |r| {
            Ok(ExamRecord {
                id: r.get(0)?,
                student_id: r.get(1)?,
                exam_type: r.get(2)?,
                exam_date: r.get(3)?,
                subjects: Vec::new(),
                total_marks: r.get(4)?,
                obtained_marks: r.get(5)?,
                percentage: r.get(6)?,
                grade: r.get(7)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(service)?;

    if records.is_empty() {
        return Ok(records);
    }

    let exam_ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
    let placeholders = std::iter::repeat("?")
        .take(exam_ids.len())
        .collect::<Vec<_>>()
        .join(",");
    let subj_sql = format!(
        "SELECT exam_record_id, subject_name, max_marks, obtained_marks, grade
         FROM exam_subjects
         WHERE exam_record_id IN ({})
         ORDER BY sort_order",
        placeholders
    );
    let bind_values: Vec<Value> = exam_ids.iter().map(|id| Value::Text(id.clone())).collect();

    let mut subj_stmt = conn.prepare(&subj_sql).map_err(service)?;
    let mut by_exam: HashMap<String, Vec<SubjectMark>> = HashMap::new();
    let rows = subj_stmt
        .query_map(rusqlite::params_from_iter(bind_values), |r| {
            let exam_record_id: String = r.get(0)?;
            Ok((
                exam_record_id,
                SubjectMark {
                    subject_name: r.get(1)?,
                    max_marks: r.get(2)?,
                    obtained_marks: r.get(3)?,
                    grade: r.get(4)?,
                },
            ))
        })
        .map_err(service)?;
    for row in rows {
        let (exam_record_id, mark) = row.map_err(service)?;
        by_exam.entry(exam_record_id).or_default().push(mark);
    }

    for rec in &mut records {
        rec.subjects = by_exam.remove(&rec.id).unwrap_or_default();
    }
    Ok(records)
}

fn handle_add(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = required_str(&req.params, "studentId")?;
    let exam_type = required_str(&req.params, "examType")?;
    let exam_date = match optional_str(&req.params, "examDate") {
        Some(d) => Some(parse_iso_date(&d, "examDate")?),
        None => None,
    };

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(service)?;
    if exists.is_none() {
        return Err(not_found("student not found"));
    }

    let raw_subjects = req
        .params
        .get("subjects")
        .and_then(|v| v.as_array())
        .ok_or_else(|| validation("missing subjects"))?;
    let mut subjects: Vec<SubjectMark> = Vec::with_capacity(raw_subjects.len());
    for raw in raw_subjects {
        let subject_name = required_str(raw, "subjectName")?;
        let max_marks = crate::ipc::helpers::required_f64(raw, "maxMarks")?;
        let obtained_marks = crate::ipc::helpers::required_f64(raw, "obtainedMarks")?;
        let grade = classify_grade(percentage_of(obtained_marks, max_marks)).to_string();
        subjects.push(SubjectMark {
            subject_name,
            max_marks,
            obtained_marks,
            grade,
        });
    }
    calc::validate_subject_marks(&subjects)?;

    let (obtained, total) = exam_totals(&subjects);
    let percentage = percentage_of(obtained, total);
    let grade = classify_grade(percentage).to_string();

    let exam_id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction().map_err(service)?;
    // UNIQUE(student_id, exam_type) is the duplicate guard; there is no
    // read-then-insert window for concurrent creators to slip through.
    if let Err(e) = tx.execute(
        "INSERT INTO exam_records(id, student_id, exam_type, exam_date,
                                  total_marks, obtained_marks, percentage, grade)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &exam_id,
            &student_id,
            &exam_type,
            &exam_date,
            total,
            obtained,
            percentage,
            &grade,
        ),
    ) {
        let _ = tx.rollback();
        return Err(map_constraint_err(
            e,
            "an exam of this type already exists for this student",
        ));
    }
    for (i, s) in subjects.iter().enumerate() {
        if let Err(e) = tx.execute(
            "INSERT INTO exam_subjects(id, exam_record_id, sort_order,
                                       subject_name, max_marks, obtained_marks, grade)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &exam_id,
                i as i64,
                &s.subject_name,
                s.max_marks,
                s.obtained_marks,
                &s.grade,
            ),
        ) {
            let _ = tx.rollback();
            return Err(map_constraint_err(e, "duplicate subject in exam record"));
        }
    }
    tx.commit().map_err(service)?;

    Ok(json!({
        "examRecordId": exam_id,
        "totalMarks": total,
        "obtainedMarks": obtained,
        "percentage": percentage,
        "grade": grade,
    }))
}

fn handle_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    admit_generation(state, &req.params, "exams")?;
    let conn = require_db(state)?;
    let filter = ExamFilter::from_params(&req.params);
    let records = load_exam_records(conn, &filter)?;
    Ok(json!({
        "exams": records.iter().map(|r| serde_json::to_value(r).unwrap_or_default()).collect::<Vec<_>>(),
    }))
}

fn handle_history(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    admit_generation(state, &req.params, "exams")?;
    let conn = require_db(state)?;
    let filter = ExamFilter::from_params(&req.params);
    let records = load_exam_records(conn, &filter)?;
    let threshold = db::passing_threshold(conn);
    let histories = calc::group_by_student(records, threshold);
    Ok(json!({
        "passingThreshold": threshold,
        "histories": histories
            .iter()
            .map(|h| serde_json::to_value(h).unwrap_or_default())
            .collect::<Vec<_>>(),
    }))
}

fn handle_report_card(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = required_str(&req.params, "studentId")?;
    let filter = ExamFilter {
        student_id: Some(student_id.clone()),
        ..Default::default()
    };
    let records = load_exam_records(conn, &filter)?;
    if records.is_empty() {
        return Err(not_found("no exam records for this student"));
    }
    let threshold = db::passing_threshold(conn);
    let pivot = calc::subject_pivot(&records);
    let histories = calc::group_by_student(records, threshold);
    let history = &histories[0];
    Ok(json!({
        "studentId": student_id,
        "examTypes": history.exams.iter().map(|e| e.exam_type.clone()).collect::<Vec<_>>(),
        "subjects": pivot
            .iter()
            .map(|row| serde_json::to_value(row).unwrap_or_default())
            .collect::<Vec<_>>(),
        "overall": serde_json::to_value(&history.overall).unwrap_or_default(),
    }))
}

fn handle_class_rank(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let class_label = required_str(&req.params, "classLabel")?;
    let filter = ExamFilter {
        class_label: Some(class_label.clone()),
        medium: optional_str(&req.params, "medium"),
        ..Default::default()
    };
    let records = load_exam_records(conn, &filter)?;
    let threshold = db::passing_threshold(conn);
    let histories = calc::group_by_student(records, threshold);

    let entries: Vec<(String, f64)> = histories
        .iter()
        .map(|h| (h.student_id.clone(), h.overall.percentage))
        .collect();
    let ranked = calc::rank_by_percentage(&entries);

    let mut names: HashMap<String, String> = HashMap::new();
    {
        let mut stmt = conn
            .prepare("SELECT id, display_name FROM students WHERE class_label = ?")
            .map_err(service)?;
        let rows = stmt
            .query_map([&class_label], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })
            .map_err(service)?;
        for row in rows {
            let (id, name) = row.map_err(service)?;
            names.insert(id, name);
        }
    }

    Ok(json!({
        "classLabel": class_label,
        "ranks": ranked
            .iter()
            .map(|e| {
                json!({
                    "studentId": e.student_id,
                    "displayName": names.get(&e.student_id),
                    "percentage": e.percentage,
                    "rank": e.rank,
                })
            })
            .collect::<Vec<_>>(),
    }))
}

fn handle_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let exam_record_id = required_str(&req.params, "examRecordId")?;
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM exam_records WHERE id = ?",
            [&exam_record_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(service)?;
    if exists.is_none() {
        return Err(not_found("exam record not found"));
    }

    let tx = conn.unchecked_transaction().map_err(service)?;
    if let Err(e) = tx.execute(
        "DELETE FROM exam_subjects WHERE exam_record_id = ?",
        [&exam_record_id],
    ) {
        let _ = tx.rollback();
        return Err(service(e));
    }
    if let Err(e) = tx.execute("DELETE FROM exam_records WHERE id = ?", [&exam_record_id]) {
        let _ = tx.rollback();
        return Err(service(e));
    }
    tx.commit().map_err(service)?;

    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "exams.add" => handle_add(state, req),
        "exams.list" => handle_list(state, req),
        "exams.history" => handle_history(state, req),
        "exams.reportCard" => handle_report_card(state, req),
        "exams.classRank" => handle_class_rank(state, req),
        "exams.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}

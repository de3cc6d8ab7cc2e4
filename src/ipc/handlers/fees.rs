use crate::calc::{self, derive_fees, format_inr, FeeLedger};
use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    admit_generation, map_constraint_err, non_negative, not_found, now_iso, optional_f64,
    optional_str, parse_iso_date, require_db, required_f64, required_str, service, validation,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::FeeSchedule;
use rusqlite::{Connection, OptionalExtension, ToSql};
use serde_json::json;
use uuid::Uuid;

struct FeeRow {
    id: String,
    student_id: String,
    ledger: FeeLedger,
    due_date: Option<String>,
    last_payment_date: Option<String>,
}

fn fee_row_json(row: &FeeRow) -> serde_json::Value {
    let derived = derive_fees(&row.ledger);
    json!({
        "feeRecordId": row.id,
        "studentId": row.student_id,
        "totalFees": row.ledger.total_fees,
        "paidFees": row.ledger.paid_fees,
        "discountFees": row.ledger.discount_fees,
        "busFees": row.ledger.bus_fees,
        "pendingFees": derived.pending_fees,
        "turnover": derived.turnover,
        "pendingDisplay": format_inr(derived.pending_fees),
        "turnoverDisplay": format_inr(derived.turnover),
        "dueDate": row.due_date,
        "lastPaymentDate": row.last_payment_date,
    })
}

fn load_schedule(conn: &Connection) -> Result<FeeSchedule, HandlerErr> {
    let tuition = db::settings_get_json(conn, "fees.tuitionOverrides").map_err(service)?;
    let bus = db::settings_get_json(conn, "fees.busOverrides").map_err(service)?;
    Ok(FeeSchedule::with_overrides(tuition.as_ref(), bus.as_ref()))
}

fn map_fee_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<FeeRow> {
    Ok(FeeRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        ledger: FeeLedger {
            total_fees: r.get(2)?,
            paid_fees: r.get(3)?,
            discount_fees: r.get(4)?,
            bus_fees: r.get(5)?,
        },
        due_date: r.get(6)?,
        last_payment_date: r.get(7)?,
    })
}

const FEE_COLUMNS: &str = "id, student_id, total_fees, paid_fees, discount_fees, bus_fees,
                           due_date, last_payment_date";

fn load_fee_by_id(conn: &Connection, fee_record_id: &str) -> Result<FeeRow, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM fee_records WHERE id = ?", FEE_COLUMNS),
        [fee_record_id],
        |r| map_fee_row(r),
    )
    .optional()
    .map_err(service)?
    .ok_or_else(|| not_found("fee record not found"))
}

fn persist_derived(conn: &Connection, row: &FeeRow) -> Result<(), HandlerErr> {
    let derived = derive_fees(&row.ledger);
    conn.execute(
        "UPDATE fee_records
         SET total_fees = ?, paid_fees = ?, discount_fees = ?, bus_fees = ?,
             pending_fees = ?, turnover = ?, due_date = ?, last_payment_date = ?
         WHERE id = ?",
        (
            row.ledger.total_fees,
            row.ledger.paid_fees,
            row.ledger.discount_fees,
            row.ledger.bus_fees,
            derived.pending_fees,
            derived.turnover,
            &row.due_date,
            &row.last_payment_date,
            &row.id,
        ),
    )
    .map_err(service)?;
    Ok(())
}

/// Create the single fee ledger for a student. Tuition defaults to the
/// schedule amount for the student's class when not supplied; bus fees
/// default to the amount for the given route.
fn handle_add(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = required_str(&req.params, "studentId")?;

    let class_label: Option<String> = conn
        .query_row(
            "SELECT class_label FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(service)?;
    let Some(class_label) = class_label else {
        return Err(not_found("student not found"));
    };

    let schedule = load_schedule(conn)?;
    let total_fees = match optional_f64(&req.params, "totalFees")? {
        Some(v) => non_negative(v, "totalFees")?,
        None => schedule.tuition_for(&class_label),
    };
    let bus_fees = match optional_f64(&req.params, "busFees")? {
        Some(v) => non_negative(v, "busFees")?,
        None => match optional_str(&req.params, "busRoute") {
            Some(route) => schedule.bus_for(&route),
            None => 0.0,
        },
    };
    let paid_fees = non_negative(optional_f64(&req.params, "paidFees")?.unwrap_or(0.0), "paidFees")?;
    let discount_fees = non_negative(
        optional_f64(&req.params, "discountFees")?.unwrap_or(0.0),
        "discountFees",
    )?;
    let due_date = match optional_str(&req.params, "dueDate") {
        Some(d) => Some(parse_iso_date(&d, "dueDate")?),
        None => None,
    };

    let ledger = FeeLedger {
        total_fees,
        paid_fees,
        discount_fees,
        bus_fees,
    };
    let derived = derive_fees(&ledger);

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO fee_records(id, student_id, total_fees, paid_fees, discount_fees,
                                 bus_fees, pending_fees, turnover, due_date, last_payment_date)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)",
        (
            &id,
            &student_id,
            total_fees,
            paid_fees,
            discount_fees,
            bus_fees,
            derived.pending_fees,
            derived.turnover,
            &due_date,
        ),
    )
    .map_err(|e| map_constraint_err(e, "a fee record already exists for this student"))?;

    let row = load_fee_by_id(conn, &id)?;
    Ok(fee_row_json(&row))
}

fn handle_get(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let row = if let Some(id) = optional_str(&req.params, "feeRecordId") {
        load_fee_by_id(conn, &id)?
    } else {
        let student_id = required_str(&req.params, "studentId")?;
        conn.query_row(
            &format!("SELECT {} FROM fee_records WHERE student_id = ?", FEE_COLUMNS),
            [&student_id],
            |r| map_fee_row(r),
        )
        .optional()
        .map_err(service)?
        .ok_or_else(|| not_found("fee record not found"))?
    };
    Ok(fee_row_json(&row))
}

fn handle_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    admit_generation(state, &req.params, "fees")?;
    let conn = require_db(state)?;
    let class_label = optional_str(&req.params, "classLabel");
    let medium = optional_str(&req.params, "medium");

    let mut sql = String::from(
        "SELECT f.id, f.student_id, f.total_fees, f.paid_fees, f.discount_fees, f.bus_fees,
                f.due_date, f.last_payment_date
         FROM fee_records f
         JOIN students s ON s.id = f.student_id
         WHERE 1=1",
    );
    let mut binds: Vec<&dyn ToSql> = Vec::new();
    if let Some(ref cl) = class_label {
        sql.push_str(" AND s.class_label = ?");
        binds.push(cl);
    }
    if let Some(ref m) = medium {
        sql.push_str(" AND s.medium = ?");
        binds.push(m);
    }
    sql.push_str(" ORDER BY s.class_label, s.sort_order, s.display_name");

    let mut stmt = conn.prepare(&sql).map_err(service)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds), |r| map_fee_row(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(service)?;

    Ok(json!({
        "fees": rows.iter().map(fee_row_json).collect::<Vec<_>>(),
    }))
}

fn handle_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let fee_record_id = required_str(&req.params, "feeRecordId")?;
    let mut row = load_fee_by_id(conn, &fee_record_id)?;

    if let Some(v) = optional_f64(&req.params, "totalFees")? {
        row.ledger.total_fees = non_negative(v, "totalFees")?;
    }
    if let Some(v) = optional_f64(&req.params, "busFees")? {
        row.ledger.bus_fees = non_negative(v, "busFees")?;
    }
    if let Some(v) = optional_f64(&req.params, "discountFees")? {
        row.ledger.discount_fees = non_negative(v, "discountFees")?;
    }
    if let Some(v) = optional_f64(&req.params, "paidFees")? {
        row.ledger.paid_fees = non_negative(v, "paidFees")?;
    }
    if let Some(d) = optional_str(&req.params, "dueDate") {
        row.due_date = Some(parse_iso_date(&d, "dueDate")?);
    }

    persist_derived(conn, &row)?;
    let row = load_fee_by_id(conn, &fee_record_id)?;
    Ok(fee_row_json(&row))
}

fn handle_add_payment(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let fee_record_id = required_str(&req.params, "feeRecordId")?;
    let amount = required_f64(&req.params, "amount")?;

    let mut row = load_fee_by_id(conn, &fee_record_id)?;
    calc::apply_payment(&mut row.ledger, amount)?;
    row.last_payment_date = Some(now_iso());
    persist_derived(conn, &row)?;

    let row = load_fee_by_id(conn, &fee_record_id)?;
    Ok(fee_row_json(&row))
}

fn handle_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let fee_record_id = required_str(&req.params, "feeRecordId")?;
    let affected = conn
        .execute("DELETE FROM fee_records WHERE id = ?", [&fee_record_id])
        .map_err(service)?;
    if affected == 0 {
        return Err(not_found("fee record not found"));
    }
    Ok(json!({ "deleted": true }))
}

/// Resolve schedule amounts without touching any student record.
fn handle_schedule(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let schedule = load_schedule(conn)?;
    let mut result = serde_json::Map::new();
    if let Some(class_label) = optional_str(&req.params, "classLabel") {
        let amount = schedule.tuition_for(&class_label);
        result.insert("classLabel".to_string(), json!(class_label));
        result.insert("tuitionFees".to_string(), json!(amount));
        result.insert("tuitionDisplay".to_string(), json!(format_inr(amount)));
    }
    if let Some(route) = optional_str(&req.params, "busRoute") {
        let amount = schedule.bus_for(&route);
        result.insert("busRoute".to_string(), json!(route));
        result.insert("busFees".to_string(), json!(amount));
        result.insert("busDisplay".to_string(), json!(format_inr(amount)));
    }
    if result.is_empty() {
        return Err(validation("provide classLabel and/or busRoute"));
    }
    Ok(serde_json::Value::Object(result))
}

fn handle_schedule_overrides_set(
    state: &AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    if let Some(tuition) = req.params.get("tuition") {
        if !tuition.is_object() {
            return Err(validation("tuition must be an object of label: amount"));
        }
        db::settings_set_json(conn, "fees.tuitionOverrides", tuition).map_err(service)?;
    }
    if let Some(bus) = req.params.get("bus") {
        if !bus.is_object() {
            return Err(validation("bus must be an object of route: amount"));
        }
        db::settings_set_json(conn, "fees.busOverrides", bus).map_err(service)?;
    }
    Ok(json!({ "updated": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "fees.add" => handle_add(state, req),
        "fees.get" => handle_get(state, req),
        "fees.list" => handle_list(state, req),
        "fees.update" => handle_update(state, req),
        "fees.addPayment" => handle_add_payment(state, req),
        "fees.delete" => handle_delete(state, req),
        "fees.schedule" => handle_schedule(state, req),
        "fees.scheduleOverrides.set" => handle_schedule_overrides_set(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}

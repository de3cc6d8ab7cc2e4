use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

use crate::calc::CalcError;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Session};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn validation(message: impl Into<String>) -> HandlerErr {
    HandlerErr {
        code: "validation_error",
        message: message.into(),
        details: None,
    }
}

pub fn not_found(message: impl Into<String>) -> HandlerErr {
    HandlerErr {
        code: "not_found",
        message: message.into(),
        details: None,
    }
}

pub fn auth(message: impl Into<String>) -> HandlerErr {
    HandlerErr {
        code: "auth_error",
        message: message.into(),
        details: None,
    }
}

/// Backend/storage failure surfaced to the caller; no automatic retry.
pub fn service(e: impl ToString) -> HandlerErr {
    HandlerErr {
        code: "service_unavailable",
        message: e.to_string(),
        details: None,
    }
}

impl From<CalcError> for HandlerErr {
    fn from(e: CalcError) -> Self {
        let code = match e.code.as_str() {
            "validation_error" => "validation_error",
            "not_found" => "not_found",
            _ => "service_unavailable",
        };
        HandlerErr {
            code,
            message: e.message,
            details: e.details,
        }
    }
}

/// Insert/update failures on a UNIQUE or FK constraint are caller conflicts;
/// everything else is a backend failure.
pub fn map_constraint_err(e: rusqlite::Error, conflict_message: &str) -> HandlerErr {
    if let rusqlite::Error::SqliteFailure(ref f, _) = e {
        if f.code == rusqlite::ErrorCode::ConstraintViolation {
            return HandlerErr {
                code: "conflict",
                message: conflict_message.to_string(),
                details: Some(json!({ "cause": e.to_string() })),
            };
        }
    }
    service(e)
}

pub fn require_db<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state.db.as_ref().ok_or_else(|| HandlerErr {
        code: "service_unavailable",
        message: "select a workspace first".to_string(),
        details: None,
    })
}

pub fn require_session<'a>(
    state: &'a AppState,
    params: &serde_json::Value,
) -> Result<(String, &'a Session), HandlerErr> {
    let token = required_str(params, "sessionToken")?;
    let session = state
        .sessions
        .get(&token)
        .ok_or_else(|| auth("unknown or expired session token"))?;
    Ok((token, session))
}

/// Freshness gate for list/fetch methods. When the caller supplies a
/// session token and generation, a fetch older than the latest begun for
/// that record kind is refused so its response cannot overwrite newer data.
pub fn admit_generation(
    state: &AppState,
    params: &serde_json::Value,
    kind: &str,
) -> Result<(), HandlerErr> {
    let Some(token) = optional_str(params, "sessionToken") else {
        return Ok(());
    };
    let session = state
        .sessions
        .get(&token)
        .ok_or_else(|| auth("unknown or expired session token"))?;
    let generation = params.get("generation").and_then(|v| v.as_u64());
    if !session.gate.admit(kind, generation) {
        return Err(HandlerErr {
            code: "stale_request",
            message: format!("a newer {} fetch has started", kind),
            details: None,
        });
    }
    Ok(())
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| validation(format!("missing {}", key)))
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    match params.get(key) {
        Some(v) => match v.as_f64() {
            Some(n) if n.is_finite() => Ok(n),
            _ => Err(validation(format!("{} must be a finite number", key))),
        },
        None => Err(validation(format!("missing {}", key))),
    }
}

pub fn optional_f64(params: &serde_json::Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_f64() {
            Some(n) if n.is_finite() => Ok(Some(n)),
            _ => Err(validation(format!("{} must be a finite number", key))),
        },
    }
}

pub fn non_negative(value: f64, key: &str) -> Result<f64, HandlerErr> {
    if value < 0.0 {
        Err(validation(format!("{} must be >= 0", key)))
    } else {
        Ok(value)
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

pub fn today_iso() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

pub fn parse_iso_date(value: &str, key: &str) -> Result<String, HandlerErr> {
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| validation(format!("{} must be an ISO date (YYYY-MM-DD)", key)))
}

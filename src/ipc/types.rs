use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::freshness::FetchGate;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// One logged-in portal session. Sessions live only in memory; logout (or
/// process exit) discards them along with their subscriptions.
pub struct Session {
    pub student_id: String,
    pub sr_number: String,
    pub medium: String,
    pub started_at: String,
    pub gate: FetchGate,
}

/// A live push subscription. Events fan out additively into `pending` and
/// are drained by polling; unsubscribing (or logging out) tears it down.
pub struct Subscription {
    pub id: String,
    pub session_token: String,
    pub topic: String,
    pub pending: VecDeque<serde_json::Value>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub sessions: HashMap<String, Session>,
    pub subscriptions: Vec<Subscription>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            sessions: HashMap::new(),
            subscriptions: Vec::new(),
        }
    }
}

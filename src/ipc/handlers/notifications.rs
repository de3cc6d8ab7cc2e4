use crate::ipc::error::ok;
use crate::ipc::helpers::{
    admit_generation, auth, not_found, now_iso, optional_str, require_db, required_str, service,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request, Subscription};
use rusqlite::ToSql;
use serde_json::json;
use std::collections::VecDeque;
use uuid::Uuid;

/// Persist the notification, then fan it out to every live subscription on
/// the topic. Delivery is additive: events queue up until polled.
fn handle_send(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let topic = required_str(&req.params, "topic")?;
    let title = required_str(&req.params, "title")?;
    let body = required_str(&req.params, "body")?;

    let created_at = now_iso();
    let id = Uuid::new_v4().to_string();
    {
        let conn = require_db(state)?;
        conn.execute(
            "INSERT INTO notifications(id, topic, title, body, created_at)
             VALUES(?, ?, ?, ?, ?)",
            (&id, &topic, &title, &body, &created_at),
        )
        .map_err(service)?;
    }

    let event = json!({
        "notificationId": &id,
        "topic": &topic,
        "title": &title,
        "body": &body,
        "createdAt": &created_at,
    });
    let mut delivered = 0;
    for sub in state
        .subscriptions
        .iter_mut()
        .filter(|s| s.topic == topic || s.topic == "*")
    {
        sub.pending.push_back(event.clone());
        delivered += 1;
    }

    Ok(json!({ "notificationId": id, "delivered": delivered }))
}

fn handle_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    admit_generation(state, &req.params, "notifications")?;
    let conn = require_db(state)?;
    let topic = optional_str(&req.params, "topic");

    let mut sql = String::from(
        "SELECT id, topic, title, body, created_at FROM notifications WHERE 1=1",
    );
    let mut binds: Vec<&dyn ToSql> = Vec::new();
    if let Some(ref t) = topic {
        sql.push_str(" AND topic = ?");
        binds.push(t);
    }
    sql.push_str(" ORDER BY created_at DESC");

    let mut stmt = conn.prepare(&sql).map_err(service)?;
    let notifications = stmt
        .query_map(rusqlite::params_from_iter(binds), |r| {
            Ok(json!({
                "notificationId": r.get::<_, String>(0)?,
                "topic": r.get::<_, String>(1)?,
                "title": r.get::<_, String>(2)?,
                "body": r.get::<_, String>(3)?,
                "createdAt": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(service)?;

    Ok(json!({ "notifications": notifications }))
}

fn handle_subscribe(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let token = required_str(&req.params, "sessionToken")?;
    if !state.sessions.contains_key(&token) {
        return Err(auth("unknown or expired session token"));
    }
    let topic = required_str(&req.params, "topic")?;

    let id = Uuid::new_v4().to_string();
    state.subscriptions.push(Subscription {
        id: id.clone(),
        session_token: token,
        topic: topic.clone(),
        pending: VecDeque::new(),
    });
    Ok(json!({ "subscriptionId": id, "topic": topic }))
}

fn handle_poll(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let subscription_id = required_str(&req.params, "subscriptionId")?;
    let sub = state
        .subscriptions
        .iter_mut()
        .find(|s| s.id == subscription_id)
        .ok_or_else(|| not_found("subscription not found"))?;
    let events: Vec<serde_json::Value> = sub.pending.drain(..).collect();
    Ok(json!({ "events": events }))
}

fn handle_unsubscribe(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let subscription_id = required_str(&req.params, "subscriptionId")?;
    let before = state.subscriptions.len();
    state.subscriptions.retain(|s| s.id != subscription_id);
    if state.subscriptions.len() == before {
        return Err(not_found("subscription not found"));
    }
    Ok(json!({ "unsubscribed": true }))
}

fn handle_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let notification_id = required_str(&req.params, "notificationId")?;
    let affected = conn
        .execute(
            "DELETE FROM notifications WHERE id = ?",
            [&notification_id],
        )
        .map_err(service)?;
    if affected == 0 {
        return Err(not_found("notification not found"));
    }
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "notifications.send" => handle_send(state, req),
        "notifications.list" => handle_list(state, req),
        "notifications.subscribe" => handle_subscribe(state, req),
        "notifications.poll" => handle_poll(state, req),
        "notifications.unsubscribe" => handle_unsubscribe(state, req),
        "notifications.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}

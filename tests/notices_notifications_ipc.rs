use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_portald");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn portald");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .expect("error code")
        .to_string()
}

fn notice_titles(result: &serde_json::Value) -> Vec<String> {
    result
        .get("notices")
        .and_then(|v| v.as_array())
        .expect("notices")
        .iter()
        .map(|n| {
            n.get("title")
                .and_then(|v| v.as_str())
                .expect("title")
                .to_string()
        })
        .collect()
}

#[test]
fn notice_scoping_and_archive_flow() {
    let workspace = temp_dir("portal-notices");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let school_wide = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "notices.create",
        json!({ "title": "Holiday on Monday", "body": "School closed.", "medium": "Hindi" }),
    );
    assert_eq!(
        school_wide.get("status").and_then(|v| v.as_str()),
        Some("active")
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "notices.create",
        json!({
            "title": "Fifth class picnic",
            "body": "Bring consent forms.",
            "medium": "Hindi",
            "classLabel": "Fifth"
        }),
    );

    // A class-scoped listing sees its own notices plus school-wide ones.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "notices.list",
        json!({ "classLabel": "Fifth", "medium": "Hindi" }),
    );
    let mut titles = notice_titles(&listed);
    titles.sort();
    assert_eq!(titles, vec!["Fifth class picnic", "Holiday on Monday"]);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "notices.list",
        json!({ "classLabel": "Ninth", "medium": "Hindi" }),
    );
    assert_eq!(notice_titles(&listed), vec!["Holiday on Monday"]);

    let notice_id = school_wide
        .get("noticeId")
        .and_then(|v| v.as_str())
        .expect("noticeId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "notices.setStatus",
        json!({ "noticeId": notice_id.clone(), "status": "archived" }),
    );
    let active = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "notices.list",
        json!({ "status": "active" }),
    );
    assert_eq!(notice_titles(&active), vec!["Fifth class picnic"]);
    let archived = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "notices.list",
        json!({ "status": "archived" }),
    );
    assert_eq!(notice_titles(&archived), vec!["Holiday on Monday"]);

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "9",
        "notices.setStatus",
        json!({ "noticeId": notice_id.clone(), "status": "hidden" }),
    );
    assert_eq!(code, "validation_error");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "notices.delete",
        json!({ "noticeId": notice_id.clone() }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "11",
        "notices.delete",
        json!({ "noticeId": notice_id }),
    );
    assert_eq!(code, "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn subscriptions_deliver_until_torn_down() {
    let workspace = temp_dir("portal-notify");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "srNumber": "SR-N1",
            "displayName": "Priya",
            "classLabel": "Tenth",
            "medium": "English",
            "fatherName": "Father",
            "dateOfBirth": "2009-12-05"
        }),
    );
    let login = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "auth.login",
        json!({ "srNumber": "SR-N1", "dateOfBirth": "2009-12-05" }),
    );
    let token = login
        .get("sessionToken")
        .and_then(|v| v.as_str())
        .expect("session token")
        .to_string();

    let sub = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "notifications.subscribe",
        json!({ "sessionToken": token.clone(), "topic": "notices" }),
    );
    let sub_id = sub
        .get("subscriptionId")
        .and_then(|v| v.as_str())
        .expect("subscriptionId")
        .to_string();

    let sent = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "notifications.send",
        json!({ "topic": "notices", "title": "PTM Saturday", "body": "10am onwards" }),
    );
    assert_eq!(sent.get("delivered").and_then(|v| v.as_u64()), Some(1));

    // Events queue until polled, and polling drains them.
    let polled = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "notifications.poll",
        json!({ "subscriptionId": sub_id.clone() }),
    );
    let events = polled.get("events").and_then(|v| v.as_array()).expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].get("title").and_then(|v| v.as_str()),
        Some("PTM Saturday")
    );
    let polled = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "notifications.poll",
        json!({ "subscriptionId": sub_id.clone() }),
    );
    assert_eq!(
        polled.get("events").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    // Sends on other topics do not reach this subscription.
    let sent = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "notifications.send",
        json!({ "topic": "fees", "title": "Fee reminder", "body": "Due Friday" }),
    );
    assert_eq!(sent.get("delivered").and_then(|v| v.as_u64()), Some(0));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "notifications.unsubscribe",
        json!({ "subscriptionId": sub_id.clone() }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "10",
        "notifications.poll",
        json!({ "subscriptionId": sub_id }),
    );
    assert_eq!(code, "not_found");

    // Logout tears down remaining subscriptions for the session.
    let sub = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "notifications.subscribe",
        json!({ "sessionToken": token.clone(), "topic": "notices" }),
    );
    let sub_id = sub
        .get("subscriptionId")
        .and_then(|v| v.as_str())
        .expect("subscriptionId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "auth.logout",
        json!({ "sessionToken": token }),
    );
    let sent = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "notifications.send",
        json!({ "topic": "notices", "title": "After logout", "body": "nobody listening" }),
    );
    assert_eq!(sent.get("delivered").and_then(|v| v.as_u64()), Some(0));
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "14",
        "notifications.poll",
        json!({ "subscriptionId": sub_id }),
    );
    assert_eq!(code, "not_found");

    // The notification log itself is durable regardless of delivery.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "notifications.list",
        json!({ "topic": "notices" }),
    );
    let titles: Vec<&str> = listed
        .get("notifications")
        .and_then(|v| v.as_array())
        .expect("notifications")
        .iter()
        .filter_map(|n| n.get("title").and_then(|v| v.as_str()))
        .collect();
    assert!(titles.contains(&"PTM Saturday"));
    assert!(titles.contains(&"After logout"));

    let _ = std::fs::remove_dir_all(workspace);
}

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

fn status_of(list: &serde_json::Value, assignment_id: &str) -> String {
    list.get("assignments")
        .and_then(|v| v.as_array())
        .expect("assignments")
        .iter()
        .find(|a| a.get("assignmentId").and_then(|v| v.as_str()) == Some(assignment_id))
        .and_then(|a| a.get("status"))
        .and_then(|v| v.as_str())
        .expect("status")
        .to_string()
}

#[test]
fn assignment_status_submission_and_grading_flow() {
    let workspace = temp_dir("portal-homework");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "srNumber": "SR-H1",
            "displayName": "Vikas",
            "classLabel": "Seventh",
            "medium": "English",
            "fatherName": "Father",
        }),
    );
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let upcoming = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "homework.assign",
        json!({
            "classLabel": "Seventh",
            "medium": "English",
            "subjectName": "Science",
            "title": "Chapter 4 questions",
            "dueDate": "2099-01-01"
        }),
    );
    let upcoming_id = upcoming
        .get("assignmentId")
        .and_then(|v| v.as_str())
        .expect("assignmentId")
        .to_string();
    let past = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "homework.assign",
        json!({
            "classLabel": "Seventh",
            "medium": "English",
            "subjectName": "Maths",
            "title": "Old worksheet",
            "dueDate": "2020-01-01"
        }),
    );
    let past_id = past
        .get("assignmentId")
        .and_then(|v| v.as_str())
        .expect("assignmentId")
        .to_string();

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "homework.list",
        json!({ "classLabel": "Seventh", "medium": "English", "studentId": student_id.clone() }),
    );
    assert_eq!(status_of(&list, &upcoming_id), "pending");
    assert_eq!(status_of(&list, &past_id), "overdue");

    let attachment = workspace.join("essay.txt");
    std::fs::write(&attachment, b"my homework answer").expect("write attachment");

    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "homework.submit",
        json!({
            "assignmentId": upcoming_id.clone(),
            "studentId": student_id.clone(),
            "attachmentPath": attachment.to_string_lossy()
        }),
    );
    let submission_id = submitted
        .get("submissionId")
        .and_then(|v| v.as_str())
        .expect("submissionId")
        .to_string();
    let url = submitted
        .get("attachmentUrl")
        .and_then(|v| v.as_str())
        .expect("attachmentUrl");
    assert!(url.starts_with("assets/homework/"));
    assert!(workspace.join(url).is_file());

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "homework.list",
        json!({ "classLabel": "Seventh", "medium": "English", "studentId": student_id.clone() }),
    );
    assert_eq!(status_of(&list, &upcoming_id), "submitted");

    // One submission per student per assignment.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "8",
        "homework.submit",
        json!({
            "assignmentId": upcoming_id.clone(),
            "studentId": student_id.clone(),
        }),
    );
    assert_eq!(code, "conflict");

    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "homework.grade",
        json!({ "submissionId": submission_id, "gradeRemark": "Good work" }),
    );
    assert_eq!(graded.get("status").and_then(|v| v.as_str()), Some("graded"));

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "homework.list",
        json!({ "classLabel": "Seventh", "medium": "English", "studentId": student_id }),
    );
    assert_eq!(status_of(&list, &upcoming_id), "graded");
    let entry = list
        .get("assignments")
        .and_then(|v| v.as_array())
        .expect("assignments")
        .iter()
        .find(|a| a.get("assignmentId").and_then(|v| v.as_str()) == Some(upcoming_id.as_str()))
        .cloned()
        .expect("graded entry");
    assert_eq!(
        entry.get("gradeRemark").and_then(|v| v.as_str()),
        Some("Good work")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn failed_attachment_upload_leaves_no_submission() {
    let workspace = temp_dir("portal-homework-abort");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "srNumber": "SR-H2",
            "displayName": "Nisha",
            "classLabel": "Fourth",
            "medium": "Hindi",
            "fatherName": "Father",
        }),
    );
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    let assigned = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "homework.assign",
        json!({
            "classLabel": "Fourth",
            "medium": "Hindi",
            "subjectName": "Hindi",
            "title": "Poem recitation notes",
            "dueDate": "2099-06-01"
        }),
    );
    let assignment_id = assigned
        .get("assignmentId")
        .and_then(|v| v.as_str())
        .expect("assignmentId")
        .to_string();

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "4",
        "homework.submit",
        json!({
            "assignmentId": assignment_id.clone(),
            "studentId": student_id,
            "attachmentPath": workspace.join("does-not-exist.pdf").to_string_lossy()
        }),
    );
    assert_eq!(code, "validation_error");

    // The failed upload must not have left a submission row behind.
    let list = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "homework.list",
        json!({ "classLabel": "Fourth", "medium": "Hindi" }),
    );
    let count = list
        .get("assignments")
        .and_then(|v| v.as_array())
        .expect("assignments")
        .iter()
        .find(|a| a.get("assignmentId").and_then(|v| v.as_str()) == Some(assignment_id.as_str()))
        .and_then(|a| a.get("submissionCount"))
        .and_then(|v| v.as_i64())
        .expect("submissionCount");
    assert_eq!(count, 0);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn deleting_an_assignment_removes_its_submissions() {
    let workspace = temp_dir("portal-homework-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "srNumber": "SR-H3",
            "displayName": "Arjun",
            "classLabel": "Second",
            "medium": "Hindi",
            "fatherName": "Father",
        }),
    );
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    let assigned = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "homework.assign",
        json!({
            "classLabel": "Second",
            "medium": "Hindi",
            "subjectName": "EVS",
            "title": "Leaf collection",
            "dueDate": "2099-03-01"
        }),
    );
    let assignment_id = assigned
        .get("assignmentId")
        .and_then(|v| v.as_str())
        .expect("assignmentId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "homework.submit",
        json!({ "assignmentId": assignment_id.clone(), "studentId": student_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "homework.delete",
        json!({ "assignmentId": assignment_id.clone() }),
    );

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "homework.list",
        json!({ "classLabel": "Second", "medium": "Hindi" }),
    );
    assert_eq!(
        list.get("assignments")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "7",
        "homework.delete",
        json!({ "assignmentId": assignment_id }),
    );
    assert_eq!(code, "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}

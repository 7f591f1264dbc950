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
    let exe = env!("CARGO_BIN_EXE_querylabd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn querylabd");
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
        id,
        value
    );
    value["result"].clone()
}

#[test]
fn roster_crud_and_email_uniqueness() {
    let workspace = temp_dir("querylab-roster");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "users.create",
        json!({
            "email": "Ada@Example.edu",
            "firstName": "Ada",
            "lastName": "Lovelace",
            "code": "S1001"
        }),
    );
    let user_id = created["userId"].as_str().expect("userId").to_string();

    // Emails are normalized and unique.
    let dup = request(
        &mut stdin,
        &mut reader,
        "u2",
        "users.create",
        json!({ "email": "ada@example.edu" }),
    );
    assert_eq!(dup["ok"], json!(false));
    assert_eq!(dup["error"]["code"], json!("conflict"));

    let bad_role = request(
        &mut stdin,
        &mut reader,
        "u3",
        "users.create",
        json!({ "email": "x@example.edu", "role": "superuser" }),
    );
    assert_eq!(bad_role["error"]["code"], json!("bad_params"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "u4",
        "users.update",
        json!({
            "userId": user_id,
            "patch": { "role": "instructor", "courseSection": "CS101-A" }
        }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "u5",
        "users.list",
        json!({ "role": "instructor" }),
    );
    let users = listed["users"].as_array().expect("users");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["email"], json!("ada@example.edu"));
    assert_eq!(users[0]["courseSection"], json!("CS101-A"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "u6",
        "users.delete",
        json!({ "userId": user_id }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "u7", "users.list", json!({}));
    assert!(listed["users"].as_array().expect("users").is_empty());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn sections_track_instructor_rosters_and_progress() {
    let workspace = temp_dir("querylab-sections");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let instructor = request_ok(
        &mut stdin,
        &mut reader,
        "i1",
        "users.create",
        json!({
            "email": "grace@example.edu",
            "firstName": "Grace",
            "lastName": "Hopper",
            "role": "instructor"
        }),
    );
    let instructor_id = instructor["userId"].as_str().expect("userId").to_string();

    // Students cannot own course sections.
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "i2",
        "users.create",
        json!({ "email": "sam@example.edu", "role": "student" }),
    );
    let student_id = student["userId"].as_str().expect("userId").to_string();
    let denied = request(
        &mut stdin,
        &mut reader,
        "s0",
        "sections.create",
        json!({
            "instructorId": student_id,
            "courseCode": "CS101",
            "courseName": "Introduction to Databases",
            "sectionCode": "A"
        }),
    );
    assert_eq!(denied["error"]["code"], json!("bad_params"));

    let section = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "sections.create",
        json!({
            "instructorId": instructor_id,
            "courseCode": "CS101",
            "courseName": "Introduction to Databases",
            "sectionCode": "A",
            "academicYear": "2025-2026",
            "semester": "Fall"
        }),
    );
    let section_id = section["sectionId"].as_str().expect("sectionId").to_string();

    // The same section for the same term conflicts.
    let dup = request(
        &mut stdin,
        &mut reader,
        "s2",
        "sections.create",
        json!({
            "instructorId": instructor_id,
            "courseCode": "CS101",
            "courseName": "Introduction to Databases",
            "sectionCode": "A",
            "academicYear": "2025-2026",
            "semester": "Fall"
        }),
    );
    assert_eq!(dup["error"]["code"], json!("conflict"));

    // Enroll the student in the section's roster.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s3",
        "users.update",
        json!({
            "userId": student_id,
            "patch": {
                "associatedInstructorId": instructor_id,
                "courseSection": "CS101-A",
                "academicYear": "2025-2026",
                "semester": "Fall"
            }
        }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "s4",
        "sections.list",
        json!({ "instructorId": instructor_id }),
    );
    let sections = listed["sections"].as_array().expect("sections");
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0]["sectionIdentifier"], json!("CS101-A"));
    assert_eq!(sections[0]["instructorEmail"], json!("grace@example.edu"));

    let students = request_ok(
        &mut stdin,
        &mut reader,
        "s5",
        "sections.students",
        json!({ "instructorId": instructor_id, "courseSection": "CS101-A" }),
    );
    assert_eq!(students["students"].as_array().expect("students").len(), 1);
    assert_eq!(students["students"][0]["email"], json!("sam@example.edu"));

    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "s6",
        "sections.progress",
        json!({ "sectionId": section_id }),
    );
    assert_eq!(progress["section"]["courseCode"], json!("CS101"));
    assert_eq!(progress["students"].as_array().expect("students").len(), 1);
    assert_eq!(progress["students"][0]["completedQuestions"], json!(0));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s7",
        "sections.update",
        json!({ "sectionId": section_id, "patch": { "isActive": false } }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "s8",
        "sections.list",
        json!({ "instructorId": instructor_id }),
    );
    assert_eq!(listed["sections"][0]["isActive"], json!(false));

    let term = request_ok(&mut stdin, &mut reader, "t1", "term.current", json!({}));
    assert!(term["academicYear"].as_str().expect("year").contains('-'));
    assert!(["Fall", "Spring", "Summer"]
        .contains(&term["semester"].as_str().expect("semester")));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

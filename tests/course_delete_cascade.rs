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
    let exe = env!("CARGO_BIN_EXE_studentd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn studentd");
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
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn deleting_a_course_removes_all_dependent_rows() {
    let workspace = temp_dir("studentd-course-delete");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    for course in ["CS101", "MA202"] {
        let csv = "rollno,name,section,batch,department,semester\n\
                   20F-001,Bilal Ahmed,A,2020,CS,5\n\
                   20F-002,Ayesha Khan,A,2020,CS,5\n";
        let roster_path = workspace.join(format!("{course}.csv"));
        std::fs::write(&roster_path, csv).expect("write roster csv");
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("roster-{course}"),
            "roster.importCsv",
            json!({ "courseCode": course, "path": roster_path.to_string_lossy() }),
        );
    }

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "marks.save",
        json!({ "courseCode": "CS101", "rollno": "20F-001", "marks": { "mids_marks": 25 } }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.mark",
        json!({
            "courseCode": "CS101",
            "date": "2025-02-01",
            "attendance": { "20F-001": "present", "20F-002": "absent" }
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "results.calculate",
        json!({ "courseCode": "CS101" }),
    );

    let info = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "courses.info",
        json!({ "courseCode": "CS101" }),
    );
    assert_eq!(info["studentCount"], 2);
    assert_eq!(info["attendanceRecords"], 1);
    assert_eq!(info["resultsCount"], 2);
    assert_eq!(info["marksCount"], 1);
    assert_eq!(info["creditHours"], 3);

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "courses.delete",
        json!({ "courseCode": "CS101" }),
    );
    assert_eq!(deleted["status"], "deleted");
    assert_eq!(deleted["deletedStudents"], 2);
    assert_eq!(deleted["deletedAttendance"], 1);
    assert_eq!(deleted["deletedMarks"], 1);
    assert_eq!(deleted["deletedResults"], 2);

    // The sibling course is untouched.
    let courses = request_ok(&mut stdin, &mut reader, "7", "courses.list", json!({}));
    assert_eq!(courses["courses"], json!(["MA202"]));

    let gone = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "students.list",
        json!({ "courseCode": "CS101" }),
    );
    assert_eq!(gone["code"], "not_found");

    let gone_again = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "courses.delete",
        json!({ "courseCode": "CS101" }),
    );
    assert_eq!(gone_again["code"], "not_found");

    drop(stdin);
    let _ = child.wait();
}

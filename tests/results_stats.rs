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
fn stats_summarize_pass_rate_distribution_and_top_performer() {
    let workspace = temp_dir("studentd-results-stats");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let csv = "rollno,name,section,batch,department,semester\n\
               R1,Top Scorer,A,2020,CS,5\n\
               R2,Mid Scorer,A,2020,CS,5\n\
               R3,No Show,A,2020,CS,5\n";
    let roster_path = workspace.join("roster.csv");
    std::fs::write(&roster_path, csv).expect("write roster csv");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.importCsv",
        json!({ "courseCode": "CS101", "path": roster_path.to_string_lossy() }),
    );

    // Stats before any calculation is an explicit error.
    let early = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "results.stats",
        json!({ "courseCode": "CS101" }),
    );
    assert_eq!(early["code"], "not_found");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "marks.save",
        json!({ "courseCode": "CS101", "rollno": "R1", "marks": {
            "mids_marks": 30, "finals_marks": 50, "sessional": 10, "assignment": 5, "quiz": 5
        }}),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "marks.save",
        json!({ "courseCode": "CS101", "rollno": "R2", "marks": {
            "mids_marks": 20, "finals_marks": 30
        }}),
    );
    // R3 never gets marks and computes to an F.

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "results.calculate",
        json!({ "courseCode": "CS101" }),
    );

    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "results.stats",
        json!({ "courseCode": "CS101" }),
    );
    assert_eq!(stats["totalStudents"], 3);
    assert_eq!(stats["passingStudents"], 2);
    assert_eq!(stats["failingStudents"], 1);
    assert_eq!(stats["passRate"], 66.67);
    // Zero GPAs/percentages are excluded from the averages (dashboard
    // behavior carried over as-is).
    assert_eq!(stats["averageGpa"], 3.15);
    assert_eq!(stats["averagePercentage"], 75.0);
    assert_eq!(stats["gradeDistribution"]["A+"], 1);
    assert_eq!(stats["gradeDistribution"]["C"], 1);
    assert_eq!(stats["gradeDistribution"]["F"], 1);
    assert_eq!(stats["topPerformer"]["rollno"], "R1");
    assert_eq!(stats["topPerformer"]["percentage"], 100.0);
    assert!(stats["lastCalculated"]
        .as_str()
        .map(|s| !s.is_empty())
        .unwrap_or(false));

    let out_path = workspace.join("results.csv");
    let export = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "results.exportCsv",
        json!({ "courseCode": "CS101", "outPath": out_path.to_string_lossy() }),
    );
    assert_eq!(export["rowCount"], 3);
    let written = std::fs::read_to_string(&out_path).expect("read export");
    assert!(written.starts_with(
        "rollno,name,section,batch,course,mids_marks,finals_marks,sessional,assignment,quiz,total_marks,percentage,grade,gpa,status,calculated_at"
    ));
    assert!(written.contains("R1,Top Scorer,A,2020,CS101,30,50,10,5,5,100,100.00,A+,4,Pass,"));

    drop(stdin);
    let _ = child.wait();
}

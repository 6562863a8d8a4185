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

fn request_ok(
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn setup_course(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    course: &str,
    rollnos: &[&str],
) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let mut csv = String::from("rollno,name,section,batch,department,semester\n");
    for r in rollnos {
        csv.push_str(&format!("{},Student {},A,2020,CS,5\n", r, r));
    }
    let roster_path = workspace.join("roster.csv");
    std::fs::write(&roster_path, csv).expect("write roster csv");
    let _ = request_ok(
        stdin,
        reader,
        "roster",
        "roster.importCsv",
        json!({ "courseCode": course, "path": roster_path.to_string_lossy() }),
    );
}

fn save_marks(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    course: &str,
    rollno: &str,
    marks: serde_json::Value,
) {
    let _ = request_ok(
        stdin,
        reader,
        &format!("marks-{}", rollno),
        "marks.save",
        json!({ "courseCode": course, "rollno": rollno, "marks": marks }),
    );
}

#[test]
fn calculated_results_hold_grading_behavior() {
    let workspace = temp_dir("studentd-grading-locks");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let course = "CS101";
    let rollnos = ["R1", "R2", "R3", "R4", "R5", "R6", "R7"];
    setup_course(&mut stdin, &mut reader, &workspace, course, &rollnos);

    // R1 stays unmarked. The rest cover the grading edges.
    save_marks(
        &mut stdin,
        &mut reader,
        course,
        "R2",
        json!({ "mids_marks": 30, "finals_marks": 50, "sessional": 10, "assignment": 5, "quiz": 5 }),
    );
    save_marks(
        &mut stdin,
        &mut reader,
        course,
        "R3",
        json!({ "mids_marks": 40, "finals_marks": 60, "sessional": 10, "assignment": 5, "quiz": 5 }),
    );
    save_marks(
        &mut stdin,
        &mut reader,
        course,
        "R4",
        json!({ "mids_marks": -10 }),
    );
    save_marks(
        &mut stdin,
        &mut reader,
        course,
        "R5",
        json!({ "mids_marks": 35 }),
    );
    save_marks(
        &mut stdin,
        &mut reader,
        course,
        "R6",
        json!({ "mids_marks": 34.99 }),
    );
    save_marks(
        &mut stdin,
        &mut reader,
        course,
        "R7",
        json!({ "mids_marks": 29.99 }),
    );

    let calc = request_ok(
        &mut stdin,
        &mut reader,
        "calc",
        "results.calculate",
        json!({ "courseCode": course }),
    );
    assert_eq!(calc["studentsProcessed"], 7);

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "results.list",
        json!({ "courseCode": course }),
    );
    let results = list["results"].as_array().expect("results array");
    assert_eq!(results.len(), 7);

    let by_rollno = |r: &str| -> serde_json::Value {
        results
            .iter()
            .find(|v| v["rollno"] == r)
            .cloned()
            .unwrap_or_else(|| panic!("missing result for {}", r))
    };

    // No marks at all computes as all-zero components.
    let r1 = by_rollno("R1");
    assert_eq!(r1["percentage"], 0.0);
    assert_eq!(r1["grade"], "F");
    assert_eq!(r1["gpa"], 0.0);
    assert_eq!(r1["status"], "Fail");
    assert_eq!(r1["totalMarks"], 0.0);

    // Full marks sum exactly to 100.
    let r2 = by_rollno("R2");
    assert_eq!(r2["percentage"], 100.0);
    assert_eq!(r2["grade"], "A+");
    assert_eq!(r2["gpa"], 4.0);
    assert_eq!(r2["status"], "Pass");
    assert_eq!(r2["totalMarks"], 100.0);
    assert_eq!(r2["components"]["midsMarks"], 30.0);

    // Over-the-max components: percentage clamps, the raw total does not.
    let r3 = by_rollno("R3");
    assert_eq!(r3["percentage"], 100.0);
    assert_eq!(r3["totalMarks"], 120.0);
    assert_eq!(r3["grade"], "A+");

    // Negative component: clamp to zero, total preserved below zero.
    let r4 = by_rollno("R4");
    assert_eq!(r4["percentage"], 0.0);
    assert_eq!(r4["totalMarks"], -10.0);
    assert_eq!(r4["grade"], "F");
    assert_eq!(r4["status"], "Fail");

    // D/D-/F boundaries: 35.00 is D, 34.99 is D-, 29.99 is F.
    let r5 = by_rollno("R5");
    assert_eq!(r5["percentage"], 35.0);
    assert_eq!(r5["grade"], "D");
    assert_eq!(r5["gpa"], 1.7);
    assert_eq!(r5["status"], "Pass");

    let r6 = by_rollno("R6");
    assert_eq!(r6["percentage"], 34.99);
    assert_eq!(r6["grade"], "D-");
    assert_eq!(r6["gpa"], 1.5);

    let r7 = by_rollno("R7");
    assert_eq!(r7["grade"], "F");
    assert_eq!(r7["status"], "Fail");

    // Recalculating replaces rather than accumulates.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "calc2",
        "results.calculate",
        json!({ "courseCode": course }),
    );
    assert_eq!(again["studentsProcessed"], 7);
    let list2 = request_ok(
        &mut stdin,
        &mut reader,
        "list2",
        "results.list",
        json!({ "courseCode": course }),
    );
    assert_eq!(list2["results"].as_array().map(|a| a.len()), Some(7));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn result_get_computes_on_the_fly_before_calculate() {
    let workspace = temp_dir("studentd-result-get");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let course = "EE210";
    setup_course(&mut stdin, &mut reader, &workspace, course, &["X1"]);
    save_marks(
        &mut stdin,
        &mut reader,
        course,
        "X1",
        json!({ "mids_marks": 20, "finals_marks": 30 }),
    );

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "get",
        "results.get",
        json!({ "courseCode": course, "rollno": "X1" }),
    );
    assert_eq!(got["percentage"], 50.0);
    assert_eq!(got["grade"], "C");
    assert_eq!(got["gpa"], 2.3);
    assert_eq!(got["status"], "Pass");
    // Nothing persisted: this was computed on demand.
    assert!(got["calculatedAt"].is_null());

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "results.list",
        json!({ "courseCode": course }),
    );
    assert_eq!(list["results"].as_array().map(|a| a.len()), Some(0));

    drop(stdin);
    let _ = child.wait();
}

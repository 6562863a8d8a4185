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
fn exported_bundle_restores_into_a_fresh_workspace() {
    let workspace_a = temp_dir("studentd-backup-src");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace_a.to_string_lossy() }),
    );
    let csv = "rollno,name,section,batch,department,semester\n\
               R1,Bilal Ahmed,A,2020,CS,5\n";
    let roster_path = workspace_a.join("roster.csv");
    std::fs::write(&roster_path, csv).expect("write roster csv");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.importCsv",
        json!({ "courseCode": "CS101", "path": roster_path.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "marks.save",
        json!({ "courseCode": "CS101", "rollno": "R1", "marks": { "mids_marks": 30, "finals_marks": 50 } }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "results.calculate",
        json!({ "courseCode": "CS101" }),
    );

    let bundle_path = temp_dir("studentd-backup-out").join("backup.zip");
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "backup.export",
        json!({ "outPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(exported["bundleFormat"], "studentd-workspace-v1");
    assert_eq!(exported["entryCount"], 3);
    assert!(exported["dbSha256"]
        .as_str()
        .map(|s| s.len() == 64)
        .unwrap_or(false));

    // Restore into a brand new workspace and read the data back.
    let workspace_b = temp_dir("studentd-backup-dst");
    let restored = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "backup.import",
        json!({
            "path": bundle_path.to_string_lossy(),
            "workspacePath": workspace_b.to_string_lossy()
        }),
    );
    assert_eq!(restored["bundleFormatDetected"], "studentd-workspace-v1");

    let courses = request_ok(&mut stdin, &mut reader, "7", "courses.list", json!({}));
    assert_eq!(courses["courses"], json!(["CS101"]));
    let results = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "results.list",
        json!({ "courseCode": "CS101" }),
    );
    assert_eq!(results["results"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(results["results"][0]["grade"], "A");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn import_rejects_garbage_bundles() {
    let workspace = temp_dir("studentd-backup-garbage");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // A zip signature with junk behind it is an invalid bundle.
    let junk_path = workspace.join("junk.zip");
    std::fs::write(&junk_path, [0x50, 0x4B, 0x03, 0x04, 0xFF, 0xFF, 0xFF])
        .expect("write junk");
    let target = temp_dir("studentd-backup-garbage-dst");
    let error = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "backup.import",
        json!({
            "path": junk_path.to_string_lossy(),
            "workspacePath": target.to_string_lossy()
        }),
    );
    assert_eq!(error["code"], "bundle_invalid");

    drop(stdin);
    let _ = child.wait();
}

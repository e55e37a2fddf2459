mod test_support;

use serde_json::json;
use std::path::Path;
use test_support::{request_err_code, request_ok, spawn_sidecar, temp_dir};

fn write_students_csv(path: &Path, broken: bool) {
    let mut text = String::from("student_no,last_name,first_name,email\n");
    for i in 0..10 {
        let (last, email) = match i {
            2 if broken => (String::new(), format!("s{}@school.edu", i)),
            7 if broken => (format!("Last{}", i), "not-an-email".to_string()),
            _ => (format!("Last{}", i), format!("s{}@school.edu", i)),
        };
        text.push_str(&format!("{},{},First{},{}\n", 5000 + i, last, i, email));
    }
    std::fs::write(path, text).expect("write csv");
}

#[test]
fn dry_run_reports_bad_rows_and_blocks_commit_until_fixed() {
    let workspace = temp_dir("rosterd-import-pipeline");
    let csv_path = workspace.join("students.csv");
    let errors_out = workspace.join("out").join("students-errors.csv");
    write_students_csv(&csv_path, true);

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
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
        "import.selectEntity",
        json!({ "entity": "students" }),
    );
    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "import.selectFile",
        json!({ "path": csv_path.to_string_lossy() }),
    );
    assert_eq!(
        selected.pointer("/status/state").and_then(|v| v.as_str()),
        Some("selected")
    );

    let validated = request_ok(&mut stdin, &mut reader, "4", "import.validate", json!({}));
    let report = validated.pointer("/run/report").expect("report");
    assert_eq!(report.get("dryRun").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(report.get("total").and_then(|v| v.as_u64()), Some(10));
    assert_eq!(report.get("created").and_then(|v| v.as_u64()), Some(8));
    assert_eq!(report.get("failed").and_then(|v| v.as_u64()), Some(2));
    let rows: Vec<u64> = validated
        .pointer("/run/outcomes")
        .and_then(|v| v.as_array())
        .expect("outcomes")
        .iter()
        .filter_map(|o| o.get("row").and_then(|v| v.as_u64()))
        .collect();
    // Header is line 1, so data row i sits on line i + 2.
    assert_eq!(rows, vec![4, 9]);
    assert_eq!(
        validated.pointer("/status/canCommit").and_then(|v| v.as_bool()),
        Some(false)
    );

    let code = request_err_code(&mut stdin, &mut reader, "5", "import.commit", json!({}));
    assert_eq!(code, "commit_rejected");

    // Validation and the rejected commit wrote nothing.
    let students = request_ok(&mut stdin, &mut reader, "6", "students.list", json!({}));
    assert_eq!(
        students.get("students").and_then(|v| v.as_array()).map(Vec::len),
        Some(0)
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "import.exportErrors",
        json!({ "outPath": errors_out.to_string_lossy() }),
    );
    assert_eq!(exported.get("rowsExported").and_then(|v| v.as_u64()), Some(2));
    let text = std::fs::read_to_string(&errors_out).expect("read errors csv");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "row,message,student_no,last_name,first_name,email");
    assert!(lines[1].starts_with("4,"));
    assert!(lines[2].starts_with("9,"));
    assert!(lines[2].contains("not-an-email"));

    // Fix the file on disk; the session must see it as a new file.
    write_students_csv(&csv_path, false);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "import.selectFile",
        json!({ "path": csv_path.to_string_lossy() }),
    );
    let code = request_err_code(&mut stdin, &mut reader, "9", "import.commit", json!({}));
    assert_eq!(code, "commit_rejected");

    let validated = request_ok(&mut stdin, &mut reader, "10", "import.validate", json!({}));
    assert_eq!(
        validated.pointer("/run/report/failed").and_then(|v| v.as_u64()),
        Some(0)
    );
    assert_eq!(
        validated.pointer("/status/canCommit").and_then(|v| v.as_bool()),
        Some(true)
    );

    let committed = request_ok(&mut stdin, &mut reader, "11", "import.commit", json!({}));
    assert_eq!(
        committed.pointer("/run/report/dryRun").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(
        committed.pointer("/run/report/created").and_then(|v| v.as_u64()),
        Some(10)
    );
    assert_eq!(
        committed.pointer("/status/state").and_then(|v| v.as_str()),
        Some("committed")
    );

    let students = request_ok(&mut stdin, &mut reader, "12", "students.list", json!({}));
    assert_eq!(
        students.get("students").and_then(|v| v.as_array()).map(Vec::len),
        Some(10)
    );

    // A committed session cannot commit again.
    let code = request_err_code(&mut stdin, &mut reader, "13", "import.commit", json!({}));
    assert_eq!(code, "commit_rejected");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn import_requires_entity_and_file_and_resets_on_entity_change() {
    let workspace = temp_dir("rosterd-import-guards");
    let csv_path = workspace.join("students.csv");
    write_students_csv(&csv_path, false);

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "2",
        "import.selectEntity",
        json!({ "entity": "grades" }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err_code(&mut stdin, &mut reader, "3", "import.validate", json!({}));
    assert_eq!(code, "no_entity");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "import.selectEntity",
        json!({ "entity": "students" }),
    );
    let code = request_err_code(&mut stdin, &mut reader, "5", "import.validate", json!({}));
    assert_eq!(code, "no_file");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "6",
        "import.selectFile",
        json!({ "path": workspace.join("missing.csv").to_string_lossy() }),
    );
    assert_eq!(code, "io_failed");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "import.selectFile",
        json!({ "path": csv_path.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "8", "import.validate", json!({}));

    let changed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "import.selectEntity",
        json!({ "entity": "enrollments" }),
    );
    assert_eq!(
        changed.pointer("/status/state").and_then(|v| v.as_str()),
        Some("idle")
    );
    assert!(changed
        .pointer("/status/validation")
        .map(|v| v.is_null())
        .unwrap_or(false));

    let code = request_err_code(&mut stdin, &mut reader, "10", "import.commit", json!({}));
    assert_eq!(code, "commit_rejected");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "11",
        "import.exportErrors",
        json!({ "outPath": workspace.join("e.csv").to_string_lossy() }),
    );
    assert_eq!(code, "no_run");

    drop(stdin);
    let _ = child.wait();
}

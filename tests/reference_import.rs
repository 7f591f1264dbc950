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
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value["result"].clone()
}

#[test]
fn import_upserts_topics_and_flags_broken_solutions() {
    let workspace = temp_dir("querylab-import");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Two reference databases, so n_-prefixed files validate against
    // Northwind and the rest against ClassicModels.
    let classic = workspace.join("classic.sql");
    std::fs::write(
        &classic,
        "CREATE TABLE Customers(customerName TEXT, city TEXT);
         INSERT INTO Customers VALUES('Atelier graphique', 'Nantes');",
    )
    .expect("write classic seed");
    let northwind = workspace.join("northwind.sql");
    std::fs::write(
        &northwind,
        "CREATE TABLE Orders(orderId INTEGER, shipCity TEXT);
         INSERT INTO Orders VALUES(10248, 'Reims');",
    )
    .expect("write northwind seed");
    for (i, (db, path)) in [("ClassicModels", &classic), ("Northwind", &northwind)]
        .iter()
        .enumerate()
    {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("seed-{}", i),
            "refdb.loadScript",
            json!({ "database": db, "path": path.to_string_lossy() }),
        );
    }

    let refdir = workspace.join("reference_files");
    std::fs::create_dir_all(&refdir).expect("create reference dir");
    std::fs::write(
        refdir.join("basic_select.json"),
        serde_json::to_string_pretty(&json!({
            "title": "Basic SELECT",
            "type": "sql",
            "database": "ClassicModels",
            "questions": [
                {
                    "number": 1,
                    "text": "List every customer and city.",
                    "solution_query": "SELECT customerName, city FROM Customers"
                },
                {
                    "number": 2,
                    "text": "Count the customers.",
                    "solution_query": "SELECT COUNT(*) FROM NoSuchTable"
                }
            ]
        }))
        .expect("encode"),
    )
    .expect("write reference file");
    std::fs::write(
        refdir.join("n_orders.json"),
        serde_json::to_string_pretty(&json!({
            "title": "Orders",
            "type": "sql",
            "database": "Northwind",
            "questions": [
                {
                    "number": 1,
                    "text": "List order ids.",
                    "solution_query": "SELECT orderId FROM Orders"
                }
            ]
        }))
        .expect("encode"),
    )
    .expect("write northwind reference file");
    std::fs::write(
        refdir.join("modeling.json"),
        serde_json::to_string_pretty(&json!({
            "title": "Library Model",
            "type": "data model",
            "details": [
                { "scenario": "Model a lending library.", "Outputs": ["Books", "Members"] }
            ]
        }))
        .expect("encode"),
    )
    .expect("write modeling reference file");

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "imp1",
        "reference.importTopics",
        json!({ "dir": refdir.to_string_lossy() }),
    );
    assert_eq!(summary["filesSeen"], json!(3));
    assert_eq!(summary["filesSkipped"], json!(0));
    assert_eq!(summary["topicsCreated"], json!(3));
    assert_eq!(summary["questionsCreated"], json!(4));
    // The broken solution is surfaced, not silently imported.
    let invalid = summary["invalidSolutions"].as_array().expect("invalid list");
    assert_eq!(invalid.len(), 1);
    assert_eq!(invalid[0]["topic"], json!("ClassicModels: Basic SELECT"));
    assert_eq!(invalid[0]["questionNumber"], json!(2));

    // Topic names carry the database prefix.
    let topics = request_ok(&mut stdin, &mut reader, "t1", "topics.list", json!({}));
    let names: Vec<String> = topics["topics"]
        .as_array()
        .expect("topics")
        .iter()
        .map(|t| t["name"].as_str().unwrap_or_default().to_string())
        .collect();
    assert!(names.contains(&"ClassicModels: Basic SELECT".to_string()));
    assert!(names.contains(&"Northwind: Orders".to_string()));
    assert!(names.contains(&"ClassicModels: Library Model".to_string()));

    // Unchanged files are skipped on re-import.
    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "imp2",
        "reference.importTopics",
        json!({ "dir": refdir.to_string_lossy() }),
    );
    assert_eq!(summary["filesSkipped"], json!(3));
    assert_eq!(summary["topicsCreated"], json!(0));
    assert_eq!(summary["questionsCreated"], json!(0));

    // A changed question text updates in place without duplicating.
    std::fs::write(
        refdir.join("n_orders.json"),
        serde_json::to_string_pretty(&json!({
            "title": "Orders",
            "type": "sql",
            "database": "Northwind",
            "questions": [
                {
                    "number": 1,
                    "text": "List every order id.",
                    "solution_query": "SELECT orderId FROM Orders"
                }
            ]
        }))
        .expect("encode"),
    )
    .expect("rewrite northwind reference file");
    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "imp3",
        "reference.importTopics",
        json!({ "dir": refdir.to_string_lossy() }),
    );
    assert_eq!(summary["filesSkipped"], json!(2));
    assert_eq!(summary["questionsUpdated"], json!(1));
    assert_eq!(summary["questionsCreated"], json!(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

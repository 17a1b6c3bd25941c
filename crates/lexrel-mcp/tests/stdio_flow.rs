use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

fn temp_db_path(tag: &str) -> std::path::PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    std::env::temp_dir().join(format!(
        "lexrel-stdio-{tag}-{}-{now}.json",
        std::process::id()
    ))
}

fn spawn_daemon(db: &std::path::Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_lexrel-mcpd"))
        .env("LEXREL_DB", db)
        .env("LEXREL_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn lexrel-mcpd")
}

#[test]
fn line_delimited_intake_and_summary_work() {
    let db = temp_db_path("lines");
    let mut child = spawn_daemon(&db);
    let mut child_stdin = child.stdin.take().expect("stdin");
    let mut reader = BufReader::new(child.stdout.take().expect("stdout"));

    let requests = [
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {"name": "client_intake", "arguments": {"id": "c-1", "name": "Acme"}}
        }),
        json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {
                "name": "case_open",
                "arguments": {
                    "id": "k-1",
                    "clientId": "c-1",
                    "pipelineStage": "en_curso",
                    "expectedValue": 8000,
                    "probability": 25
                }
            }
        }),
        json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {"name": "pipeline_summary", "arguments": {}}
        }),
    ];
    for req in &requests {
        writeln!(child_stdin, "{req}").expect("write request");
    }
    drop(child_stdin);

    let mut responses = Vec::new();
    for _ in 0..requests.len() {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read response line");
        responses.push(serde_json::from_str::<Value>(&line).expect("parse response json"));
    }

    assert_eq!(responses[0]["result"]["structuredContent"]["id"], json!("c-1"));
    assert_eq!(
        responses[1]["result"]["structuredContent"]["pipelineStage"],
        json!("en_curso")
    );
    let totals = &responses[2]["result"]["structuredContent"]["totals"];
    assert_eq!(totals["count"], json!(1));
    assert_eq!(totals["weighted_value"], json!(2000.0));

    let status = child.wait().expect("wait child");
    assert!(status.success());
    let _ = std::fs::remove_file(db);
}

fn write_framed(stdin: &mut std::process::ChildStdin, payload: &Value) {
    let body = serde_json::to_vec(payload).expect("serialize payload");
    let frame = format!("Content-Length: {}\r\n\r\n", body.len());
    stdin
        .write_all(frame.as_bytes())
        .expect("write frame header");
    stdin.write_all(&body).expect("write frame body");
    stdin.flush().expect("flush frame");
}

fn read_framed(reader: &mut BufReader<std::process::ChildStdout>) -> Value {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read frame header");
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse::<usize>().ok();
            }
        }
    }

    let len = content_length.expect("content-length header");
    let mut body = vec![0_u8; len];
    std::io::Read::read_exact(reader, &mut body).expect("read frame body");
    serde_json::from_slice(&body).expect("parse framed response")
}

#[test]
fn framed_initialize_and_tools_list_work() {
    let db = temp_db_path("framed");
    let mut child = spawn_daemon(&db);
    let mut child_stdin = child.stdin.take().expect("stdin");
    let mut reader = BufReader::new(child.stdout.take().expect("stdout"));

    write_framed(
        &mut child_stdin,
        &json!({
            "jsonrpc":"2.0",
            "id":1,
            "method":"initialize",
            "params":{
                "protocolVersion":"2024-11-05",
                "capabilities":{},
                "clientInfo":{"name":"stdio-test","version":"1.0.0"}
            }
        }),
    );
    let init = read_framed(&mut reader);
    assert_eq!(
        init["result"]["protocolVersion"].as_str(),
        Some("2024-11-05")
    );
    assert_eq!(
        init["result"]["serverInfo"]["name"].as_str(),
        Some("lexrel-mcp")
    );

    write_framed(
        &mut child_stdin,
        &json!({"jsonrpc":"2.0","id":2,"method":"tools/list","params":{}}),
    );
    let tools = read_framed(&mut reader);
    let names = tools["result"]["tools"]
        .as_array()
        .expect("tools array")
        .iter()
        .filter_map(|tool| tool.get("name").and_then(Value::as_str))
        .collect::<Vec<_>>();
    for expected in [
        "client_health",
        "lead_score",
        "recommendations",
        "pipeline_summary",
        "pipeline_transition",
    ] {
        assert!(names.contains(&expected), "missing tool {expected}");
    }

    drop(child_stdin);
    let status = child.wait().expect("wait child");
    assert!(status.success());
    let _ = std::fs::remove_file(db);
}

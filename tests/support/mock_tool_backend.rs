//! Test fixture binary for the root crate's integration tests, mirroring
//! `toolhost`'s own `mock_backend` fixture — duplicated rather than shared
//! because `CARGO_BIN_EXE_<name>` only resolves binaries defined in the
//! package under test. Exposes `echo` and `slow` tools.

use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};

fn main() {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let Ok(request): Result<Value, _> = serde_json::from_str(&line) else {
            continue;
        };
        let id = request["id"].clone();
        let method = request["method"].as_str().unwrap_or_default();

        match method {
            "list_tools" => {
                let reply = json!({
                    "id": id,
                    "result": [
                        {
                            "name": "echo",
                            "description": "echoes the message argument",
                            "parameters": {
                                "type": "object",
                                "properties": {"message": {"type": "string"}},
                                "required": ["message"]
                            }
                        },
                        {
                            "name": "slow",
                            "description": "sleeps for the given number of seconds",
                            "parameters": {
                                "type": "object",
                                "properties": {"secs": {"type": "number"}},
                                "required": ["secs"]
                            }
                        }
                    ]
                });
                write_line(&mut stdout, &reply);
            }
            "call_tool" => {
                let name = request["params"]["name"].as_str().unwrap_or_default();
                let arguments = &request["params"]["arguments"];
                match name {
                    "echo" => {
                        let message = arguments["message"].as_str().unwrap_or_default();
                        write_line(
                            &mut stdout,
                            &json!({"id": id, "result": {"content": format!("ECHO: {message}")}}),
                        );
                    }
                    "slow" => {
                        let secs = arguments["secs"].as_f64().unwrap_or(0.0);
                        thread::sleep(Duration::from_secs_f64(secs));
                        write_line(
                            &mut stdout,
                            &json!({"id": id, "result": {"content": "done sleeping"}}),
                        );
                    }
                    other => {
                        write_line(
                            &mut stdout,
                            &json!({"id": id, "error": {"code": 1, "message": format!("unknown tool '{other}'")}}),
                        );
                    }
                }
            }
            _ => {}
        }
    }
}

fn write_line(stdout: &mut io::Stdout, value: &Value) {
    let mut line = serde_json::to_string(value).expect("mock backend reply always serializes");
    line.push('\n');
    let _ = stdout.write_all(line.as_bytes());
    let _ = stdout.flush();
}

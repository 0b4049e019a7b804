use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Output, Stdio};
use std::sync::mpsc;
use std::thread::{self, sleep};
use std::time::{Duration, Instant};

use review_gate_protocol::{files, ResponseEvent, ResponseRecord, TriggerEnvelope};
use tempfile::TempDir;

struct ChildGuard {
    child: Child,
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

struct Env {
    home: TempDir,
}

impl Env {
    fn new() -> Self {
        Self {
            home: TempDir::new().expect("Failed to create temp home"),
        }
    }

    fn exchange(&self) -> PathBuf {
        self.home.path().join("exchange")
    }

    fn command(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_review-gate"));
        command
            .env("HOME", self.home.path())
            .env("XDG_DATA_HOME", self.home.path().join("data"))
            .env("XDG_CONFIG_HOME", self.home.path().join("config"))
            .env_remove("REVIEW_GATE_EXCHANGE_DIR")
            .arg("--exchange-dir")
            .arg(self.exchange());
        command
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command()
            .args(args)
            .output()
            .expect("Failed to run review-gate")
    }
}

fn wait_for(timeout: Duration, mut probe: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if probe() {
            return true;
        }
        sleep(Duration::from_millis(25));
    }
    false
}

/// Spawns `watch` and forwards its stdout lines over a channel.
fn spawn_watch(env: &Env, extra: &[&str]) -> (ChildGuard, ChildStdin, mpsc::Receiver<String>) {
    std::fs::create_dir_all(env.exchange()).unwrap();
    let mut child = env
        .command()
        .arg("watch")
        .args(extra)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn review-gate watch");

    let stdin = child.stdin.take().unwrap();
    let stdout = child.stdout.take().unwrap();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    (ChildGuard { child }, stdin, rx)
}

fn wait_for_line(lines: &mpsc::Receiver<String>, needle: &str) {
    let deadline = Instant::now() + Duration::from_secs(15);
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match lines.recv_timeout(remaining) {
            Ok(line) if line.contains(needle) => return,
            Ok(_) => continue,
            Err(_) => break,
        }
    }
    panic!("Timed out waiting for watch output containing {:?}", needle);
}

fn spawn_ask(env: &Env, args: &[&str]) -> Child {
    env.command()
        .arg("ask")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn review-gate ask")
}

#[test]
fn status_reports_inactive_without_server_log() {
    let env = Env::new();
    std::fs::create_dir_all(env.exchange()).unwrap();

    let output = env.run(&["status"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("MCP server: inactive"), "stdout: {}", stdout);
}

#[test]
fn settings_are_clamped_and_saved() {
    let env = Env::new();

    let output = env.run(&["settings", "--timeout", "1000", "--auto-message", "Keep going"]);
    assert!(output.status.success());
    let shown: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(shown["timeout"], 600);

    let saved = env
        .home
        .path()
        .join(".config")
        .join("review-gate-v2")
        .join("settings.json");
    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(saved).unwrap()).unwrap();
    assert_eq!(saved["auto_message"], "Keep going");
}

#[test]
fn ask_reads_response_written_by_another_process() {
    let env = Env::new();
    let exchange = env.exchange();
    let ask = spawn_ask(
        &env,
        &["Review?", "--id", "t1", "--files-only", "--timeout", "20"],
    );
    let ask = ChildGuard { child: ask };

    let primary = files::trigger_paths(&exchange)[0].clone();
    assert!(wait_for(Duration::from_secs(10), || primary.exists()));
    let envelope: TriggerEnvelope =
        serde_json::from_slice(&std::fs::read(&primary).unwrap()).unwrap();
    assert_eq!(envelope.data.trigger_id, "t1");
    assert_eq!(envelope.data.message.as_deref(), Some("Review?"));
    for path in files::trigger_paths(&exchange) {
        let _ = std::fs::remove_file(path);
    }

    std::fs::write(
        files::ack_path(&exchange, "t1"),
        r#"{"acknowledged": true, "trigger_id": "t1"}"#,
    )
    .unwrap();
    std::fs::write(
        files::response_paths(&exchange, "t1")[2].clone(),
        r#"{"trigger_id": "t1", "response": "TASK_COMPLETE"}"#,
    )
    .unwrap();

    let output = ask.into_output();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "TASK_COMPLETE");
    assert!(files::response_paths(&exchange, "t1")
        .iter()
        .all(|p| !p.exists()));
}

#[test]
fn ask_fails_without_acknowledgement() {
    let env = Env::new();
    let output = env.run(&["ask", "Anyone?", "--files-only", "--ack-timeout", "1"]);
    assert!(!output.status.success());
    assert!(files::trigger_paths(&env.exchange())
        .iter()
        .all(|p| !p.exists()));
}

#[test]
fn watch_answers_file_trigger_from_terminal() {
    let env = Env::new();
    let (_watch, mut stdin, lines) = spawn_watch(&env, &["--no-ipc"]);
    wait_for_line(&lines, "Watching");

    let ask = ChildGuard {
        child: spawn_ask(&env, &["Review?", "--id", "w1", "--files-only", "--timeout", "20"]),
    };
    wait_for_line(&lines, "(w1)");
    stdin.write_all(b"TASK_COMPLETE\n").unwrap();
    stdin.flush().unwrap();

    let output = ask.into_output();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "TASK_COMPLETE");
}

#[cfg(unix)]
#[test]
fn watch_answers_socket_trigger() {
    let env = Env::new();
    let (_watch, mut stdin, lines) = spawn_watch(&env, &[]);
    let socket = files::socket_path(&env.exchange());
    assert!(wait_for(Duration::from_secs(10), || socket.exists()));

    let ask = ChildGuard {
        child: spawn_ask(&env, &["Ship it?", "--id", "s1", "--json"]),
    };
    wait_for_line(&lines, "(s1)");
    stdin.write_all(b"yes, ship\n").unwrap();
    stdin.flush().unwrap();

    let output = ask.into_output();
    assert!(output.status.success());
    let record: ResponseRecord = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(record.trigger_id, "s1");
    assert_eq!(record.user_input, "yes, ship");
    assert_eq!(record.event_type, ResponseEvent::McpResponse);
}

impl ChildGuard {
    fn into_output(mut self) -> Output {
        let mut stdout = String::new();
        if let Some(mut pipe) = self.child.stdout.take() {
            use std::io::Read;
            let _ = pipe.read_to_string(&mut stdout);
        }
        let status = self.child.wait().expect("Failed to wait for child");
        Output {
            status,
            stdout: stdout.into_bytes(),
            stderr: Vec::new(),
        }
    }
}

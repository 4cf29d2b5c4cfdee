// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios driven against the built `meow` binary: bake a
//! template, run it for real, and inspect the persisted run afterwards.
//! Each test gets its own tempdir project so runs never interact.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use meow_core::{RunId, RunStatus, StepStatus};
use meow_storage::{FsRunStore, RunStore};

fn bin_path() -> PathBuf {
    assert_cmd::cargo::cargo_bin("meow")
}

fn meow(dir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::new(bin_path());
    cmd.current_dir(dir);
    cmd
}

fn write_template(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write template");
    path
}

fn run_store(dir: &Path) -> FsRunStore {
    FsRunStore::new(dir)
}

fn load_run(dir: &Path, run_id: &str) -> meow_core::Run {
    run_store(dir).get(&RunId::new(run_id)).expect("load persisted run")
}

fn poll_until(mut pred: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(30));
    }
    pred()
}

fn socket_path(dir: &Path, run_id: &str) -> PathBuf {
    dir.join(".meow").join("sock").join(format!("{run_id}.sock"))
}

/// Spawn `meow daemon`, wait for it to print the run id, then wait for its
/// detached child to bind the control socket.
fn spawn_daemon(dir: &Path, template: &Path, workflow: &str, vars: &[(&str, &str)]) -> String {
    let mut cmd = Command::new(bin_path());
    cmd.current_dir(dir)
        .arg("daemon")
        .arg(template)
        .arg(workflow)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (k, v) in vars {
        cmd.arg("--var").arg(format!("{k}={v}"));
    }
    let mut child = cmd.spawn().expect("spawn daemon");
    let stdout = child.stdout.take().expect("daemon stdout");
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    reader.read_line(&mut line).expect("read run id");
    let run_id = line.trim().to_string();
    let _ = child.wait();

    let sock = socket_path(dir, &run_id);
    assert!(
        poll_until(|| sock.exists(), Duration::from_secs(5)),
        "control socket never appeared at {}",
        sock.display()
    );
    run_id
}

#[test]
fn two_step_shell_chain_completes_and_threads_outputs() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let outfile = tmp.path().join("out.txt");
    let template = write_template(
        tmp.path(),
        "workflow.yaml",
        r#"
workflows:
  main:
    variables:
      - name: outfile
        required: true
    steps:
      - id: A
        spec:
          executor: shell
          command: "echo hello=world >&3"
      - id: B
        needs: [A]
        spec:
          executor: shell
          command: "echo {{outputs.A.hello}} > {{var.outfile}}"
"#,
    );

    let output = meow(tmp.path())
        .arg("run")
        .arg(&template)
        .arg("main")
        .arg("--var")
        .arg(format!("outfile={}", outfile.display()))
        .output()
        .expect("run the chain");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let run_id = String::from_utf8_lossy(&output.stdout).lines().next().unwrap().to_string();

    let run = load_run(tmp.path(), &run_id);
    assert_eq!(run.status, RunStatus::Done);
    assert_eq!(run.step("A").unwrap().status, StepStatus::Done);
    assert_eq!(run.step("B").unwrap().status, StepStatus::Done);

    let written = std::fs::read_to_string(&outfile).expect("read outfile");
    assert_eq!(written.trim(), "world");
}

#[test]
fn branch_skips_the_untaken_side() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let template = write_template(
        tmp.path(),
        "workflow.yaml",
        r#"
workflows:
  main:
    variables:
      - name: flag
        required: true
    steps:
      - id: check
        spec:
          executor: shell
          command: "echo result={{var.flag}} >&3"
      - id: decide
        needs: [check]
        spec:
          executor: branch
          condition: "{{outputs.check.result}}"
          on_true: on_true
          on_false: on_false
      - id: on_true
        needs: [decide]
        spec:
          executor: shell
          command: "true"
      - id: on_false
        needs: [decide]
        spec:
          executor: shell
          command: "true"
"#,
    );

    let output = meow(tmp.path())
        .arg("run")
        .arg(&template)
        .arg("main")
        .arg("--var")
        .arg("flag=true")
        .output()
        .expect("run the branch");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let run_id = String::from_utf8_lossy(&output.stdout).lines().next().unwrap().to_string();

    let run = load_run(tmp.path(), &run_id);
    assert_eq!(run.status, RunStatus::Done);
    assert_eq!(run.step("on_true").unwrap().status, StepStatus::Done);
    assert_eq!(run.step("on_false").unwrap().status, StepStatus::Skipped);
}

#[test]
fn foreach_fans_out_one_child_per_item() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let template = write_template(
        tmp.path(),
        "workflow.yaml",
        r#"
workflows:
  child:
    internal: true
    steps:
      - id: work
        spec:
          executor: shell
          command: "echo {{var.item}} >&3"
  main:
    variables:
      - name: items
        required: true
    steps:
      - id: fan-out
        spec:
          executor: foreach
          items: "{{var.items}}"
          item_var: item
          workflow_name: child
"#,
    );

    let output = meow(tmp.path())
        .arg("run")
        .arg(&template)
        .arg("main")
        .arg("--var")
        .arg(r#"items=["a","b","c"]"#)
        .output()
        .expect("run the foreach");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let run_id = String::from_utf8_lossy(&output.stdout).lines().next().unwrap().to_string();

    let run = load_run(tmp.path(), &run_id);
    assert_eq!(run.status, RunStatus::Done);
    let children: Vec<_> = run
        .steps
        .iter()
        .filter(|s| s.id.as_str().starts_with("fan-out/") && s.id.as_str().ends_with("/work"))
        .collect();
    assert_eq!(children.len(), 3, "expected exactly three fanned-out children");
    assert!(children.iter().all(|s| s.status == StepStatus::Done));
}

#[test]
fn approval_gate_is_observed_once_and_a_repeat_send_is_idempotent() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let template = write_template(
        tmp.path(),
        "workflow.yaml",
        r#"
workflows:
  main:
    steps:
      - id: wait
        spec:
          executor: shell
          command: "sleep 2"
"#,
    );

    let run_id = spawn_daemon(tmp.path(), &template, "main", &[]);

    // Register the waiter *before* the approval is sent: the bus is
    // fire-and-forget, so an approval emitted with no registered waiter
    // would otherwise be silently dropped.
    let awaiter = Command::new(bin_path())
        .current_dir(tmp.path())
        .arg("await")
        .arg(&run_id)
        .arg("gate-approved")
        .arg("--filter")
        .arg("gate=release")
        .arg("--timeout-ms")
        .arg("5000")
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn await");
    std::thread::sleep(Duration::from_millis(300));

    meow(tmp.path())
        .arg("approve")
        .arg(&run_id)
        .arg("release")
        .arg("true")
        .assert()
        .success();
    // A second, redundant approval is just another ack; nothing is
    // listening for it anymore and it has no further effect.
    meow(tmp.path())
        .arg("approve")
        .arg(&run_id)
        .arg("release")
        .arg("true")
        .assert()
        .success();

    let output = awaiter.wait_with_output().expect("await exits");
    assert!(output.status.success(), "await should exit 0 on a match");
    let event: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("await prints the matched event as JSON");
    assert_eq!(event["event_type"], "gate-approved");
    assert_eq!(event["data"]["gate"], "release");
    assert_eq!(event["data"]["approved"], true);

    assert!(
        poll_until(|| load_run(tmp.path(), &run_id).status.is_terminal(), Duration::from_secs(5)),
        "run never finished"
    );
    assert_eq!(load_run(tmp.path(), &run_id).status, RunStatus::Done);
}

#[test]
fn stop_skips_in_flight_steps_and_runs_the_stop_hook_once() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let marker = tmp.path().join("cleanup-ran");
    let template = write_template(
        tmp.path(),
        "workflow.yaml",
        &format!(
            r#"
workflows:
  main:
    cleanup_on_stop: "echo stopped >> {marker}"
    steps:
      - id: long
        spec:
          executor: shell
          command: "sleep 5"
"#,
            marker = marker.display(),
        ),
    );

    let run_id = spawn_daemon(tmp.path(), &template, "main", &[]);

    meow(tmp.path()).arg("stop").arg(&run_id).assert().success();

    assert!(
        poll_until(|| load_run(tmp.path(), &run_id).status.is_terminal(), Duration::from_secs(5)),
        "run never reached a terminal status after stop"
    );
    let run = load_run(tmp.path(), &run_id);
    assert_eq!(run.status, RunStatus::Stopped);
    assert_eq!(run.step("long").unwrap().status, StepStatus::Skipped);

    assert!(
        poll_until(|| marker.exists(), Duration::from_secs(5)),
        "cleanup_on_stop hook never ran"
    );
    let ran = std::fs::read_to_string(&marker).expect("read marker");
    assert_eq!(ran.lines().count(), 1, "cleanup hook should run exactly once");
}

#[test]
fn a_run_left_running_with_no_lock_is_reported_orphaned() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = run_store(tmp.path());
    let mut run = meow_core::test_support::sample_run("run-orphan");
    run.status = RunStatus::Running;
    store.create(&run).expect("seed an orphaned run");
    // Deliberately never call `store.acquire_lock` — this stands in for an
    // orchestrator process that died mid-run without releasing its lock,
    // which it never held to begin with here.

    let output = meow(tmp.path()).arg("status").output().expect("list runs");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .find(|l| l.starts_with("run-orphan\t"))
        .unwrap_or_else(|| panic!("run-orphan missing from listing:\n{stdout}"));
    assert!(line.contains("Running"));
    assert!(line.ends_with("orphaned"));

    // Listing must not have mutated the run or touched its lock.
    let reloaded = store.get(&run.id).expect("reload");
    assert_eq!(reloaded.status, RunStatus::Running);
    assert!(!store.is_locked(&run.id).expect("is_locked"));
}

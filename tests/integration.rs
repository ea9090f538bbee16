//! End-to-end integration tests for the stress test manager
//!
//! These tests lay out a test directory in a temp dir and run it through
//! `mock_remote`, a remote shell that ignores the host and runs the
//! command locally:
//! 1. through the library, inspecting run reports and the registry
//! 2. through the `stresstest` binary, inspecting its output

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use stresstest::common::config::Config;
use stresstest::launch::LaunchOutput;
use stresstest::{Cascade, ClientOutcome, Error, ErrorClass, Orchestrator, RunReport, TestPlan};

/// Test context with paths and cleanup
struct TestContext {
    /// Kept alive for the duration of the test
    _temp: tempfile::TempDir,
    /// Script directory (stressTestDefault.env lives here)
    script_dir: PathBuf,
    /// The test directory
    test_root: PathBuf,
    /// Empty engine config file, isolating tests from the user's config
    config_file: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp = tempfile::tempdir().expect("Failed to create temp dir");
        let script_dir = temp.path().join("scripts");
        let test_root = temp.path().join("tests").join("gwTest");
        fs::create_dir_all(&script_dir).expect("Failed to create script dir");
        fs::create_dir_all(&test_root).expect("Failed to create test dir");
        let config_file = temp.path().join("config.toml");
        fs::write(&config_file, "").expect("Failed to write config");

        Self {
            _temp: temp,
            script_dir,
            test_root,
            config_file,
        }
    }

    /// Write `<test_root>/<name>` with `content`
    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.test_root.join(name);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).expect("Failed to create dir");
        }
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    fn plan(&self) -> TestPlan {
        TestPlan::load(&Cascade::new(&self.script_dir, &self.test_root)).expect("Failed to load plan")
    }

    fn orchestrator(&self) -> Orchestrator {
        let mut config = Config::default();
        config.timeouts.drain_poll_ms = 100;
        Orchestrator::new(&config, vec![mock_remote()])
    }

    /// Run the stresstest binary
    fn run_cli(&self, args: &[&str], log: Option<&Path>) -> CliOutput {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_stresstest"));
        cmd.arg("--config")
            .arg(&self.config_file)
            .arg("--script-dir")
            .arg(&self.script_dir)
            .arg("--remote-shell")
            .arg(mock_remote())
            .args(args)
            .env_remove("RUST_LOG");
        if let Some(log) = log {
            cmd.env("MOCK_REMOTE_LOG", log);
        }
        let output = cmd.output().expect("Failed to run stresstest");

        CliOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
        }
    }
}

struct CliOutput {
    stdout: String,
    stderr: String,
    success: bool,
}

fn mock_remote() -> String {
    env!("CARGO_BIN_EXE_mock_remote").to_string()
}

fn outcome<'a>(report: &'a RunReport, name: &str) -> &'a stresstest::Result<LaunchOutput> {
    &report
        .outcomes
        .iter()
        .find(|o| o.name == name)
        .expect("participant reported")
        .result
}

fn root_arg(ctx: &TestContext) -> String {
    ctx.test_root.display().to_string()
}

#[tokio::test]
async fn test_run_end_to_end() {
    let ctx = TestContext::new();
    ctx.write("test.env", "TEST_HOST=node1\nTEST_N_CLIENTS=2\n");
    ctx.write(
        "pvServer.env",
        "TEST_LAUNCHER=\"echo serving $TEST_NAME\"\nTEST_PV_PREFIX=GW:\nTEST_N_COUNTERS=4\n",
    );
    ctx.write("clientB.env", "TEST_LAUNCHER=\"echo $CLIENT_NAME on $TEST_HOST\"\n");

    let mut orch = ctx.orchestrator();
    let mut order = Vec::new();
    let report = orch
        .run_test(ctx.plan(), &mut |o: &ClientOutcome| order.push(o.name.clone()))
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.succeeded(), 2);
    order.sort();
    assert_eq!(order, ["clientB", "pvServer"]);

    let server = report.outcomes.iter().find(|o| o.name == "pvServer").unwrap();
    let out = server.result.as_ref().unwrap();
    assert_eq!(out.output, "serving gwTest\n");
    assert_eq!(out.host, "node1");
    assert_eq!(out.exit_code, Some(0));
    let client = report.outcomes.iter().find(|o| o.name == "clientB").unwrap();
    assert_eq!(client.result.as_ref().unwrap().output, "clientB on node1\n");

    // Registry is empty after teardown
    assert_eq!(orch.registry().process_count(), 0);
    assert!(report.teardown.is_clean());

    // Four items striped over two instances of clientB
    let list0 = fs::read_to_string(ctx.test_root.join("node1/clients/clientB00/pvs.list")).unwrap();
    let list1 = fs::read_to_string(ctx.test_root.join("node1/clients/clientB01/pvs.list")).unwrap();
    assert_eq!(list0, "GW:00:Count00\nGW:00:Count02\n");
    assert_eq!(list1, "GW:00:Count01\nGW:00:Count03\n");
    assert!(ctx.test_root.join("testConfig.json").exists());
}

#[tokio::test]
async fn test_duration_terminates_long_session() {
    let ctx = TestContext::new();
    ctx.write("clientB.env", "TEST_HOST=node1\nTEST_LAUNCHER=\"sleep 30\"\nTEST_DURATION=0.3\n");

    let started = Instant::now();
    let report = ctx
        .orchestrator()
        .run_test(ctx.plan(), &mut |_: &ClientOutcome| {})
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));

    let out = report.outcomes[0].result.as_ref().unwrap();
    assert!(out.terminated);
    assert_eq!(out.exit_code, None);
}

#[tokio::test]
async fn test_abort_stops_everything() {
    let ctx = TestContext::new();
    ctx.write("test.env", "TEST_HOST=node1\n");
    ctx.write("aServer.env", "TEST_LAUNCHER=\"sleep 30\"\n");
    ctx.write("clientB.env", "TEST_LAUNCHER=\"sleep 30\"\n");
    ctx.write("clientC.env", "TEST_LAUNCHER=\"echo late\"\nTEST_START_DELAY=60\n");

    let mut orch = ctx.orchestrator();
    let control = orch.control();
    let registry = orch.registry().clone();
    tokio::spawn(async move {
        while registry.live_count() < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        control.abort("operator interrupt");
        // A second request during teardown is ignored
        control.abort("operator interrupt");
    });

    let started = Instant::now();
    let report = orch.run_test(ctx.plan(), &mut |_: &ClientOutcome| {}).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(15));

    assert_eq!(report.aborted.as_deref(), Some("operator interrupt"));
    let mut killed = report.teardown.killed.clone();
    killed.sort();
    assert_eq!(killed, ["aServer", "clientB"]);
    assert_eq!(report.teardown.cancelled, ["clientC"]);
    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(orch.registry().process_count(), 0);

    // Teardown does not run again
    assert!(orch.shutdown(&mut |_: &ClientOutcome| {}).await.skipped);
}

#[tokio::test]
async fn test_bad_participants_do_not_stop_siblings() {
    let ctx = TestContext::new();
    ctx.write("test.env", "TEST_LAUNCHER=\"echo ok\"\n");
    ctx.write("clientA.env", "TEST_HOST=node1\n");
    ctx.write("clientB.env", "\n");
    ctx.write("clientC.env", "TEST_HOST=node1\nTEST_LAUNCHER=\"run $UNDEFINED_DIR/x\"\n");
    ctx.write("clientD.env", "TEST_HOST=node1\nTEST_DURATION=later\n");

    let report = ctx
        .orchestrator()
        .run_test(ctx.plan(), &mut |_: &ClientOutcome| {})
        .await
        .unwrap();
    assert_eq!(report.outcomes.len(), 4);

    let result = |name: &str| outcome(&report, name);
    assert_eq!(result("clientA").as_ref().unwrap().output, "ok\n");
    assert!(matches!(result("clientB"), Err(Error::MissingHost { .. })));
    assert!(matches!(result("clientC"), Err(Error::UnexpandedMacros { .. })));
    assert!(matches!(result("clientD"), Err(Error::InvalidNumber { .. })));
    for name in ["clientB", "clientC", "clientD"] {
        let err = result(name).as_ref().unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
    }
}

#[tokio::test]
async fn test_kill_markers_run_at_teardown() {
    let ctx = TestContext::new();
    let witness = ctx.test_root.join("killed");
    let marker = ctx.write(
        "node7/gateway.killer",
        &format!("#!/bin/sh\necho done > {}\n", witness.display()),
    );
    fs::set_permissions(&marker, fs::Permissions::from_mode(0o755)).unwrap();
    ctx.write("clientB.env", "TEST_HOST=node1\nTEST_LAUNCHER=\"true\"\n");

    let report = ctx
        .orchestrator()
        .run_test(ctx.plan(), &mut |_: &ClientOutcome| {})
        .await
        .unwrap();
    assert_eq!(report.teardown.remote_kills, 1);
    assert_eq!(fs::read_to_string(&witness).unwrap(), "done\n");
}

#[test]
fn test_cli_run_reports_each_participant() {
    let ctx = TestContext::new();
    ctx.write("test.env", "TEST_HOST=node1\n");
    ctx.write("aServer.env", "TEST_LAUNCHER=\"echo up\"\n");
    ctx.write("clientB.env", "TEST_HOST=node2\nTEST_LAUNCHER=\"echo hi\"\n");
    ctx.write("clientC.env", "TEST_HOST=\n");
    let log = ctx.test_root.join("remote.log");

    let output = ctx.run_cli(&["run", "--test-dir", &root_arg(&ctx)], Some(&log));
    assert!(
        output.success,
        "run failed:\nstdout: {}\nstderr: {}",
        output.stdout, output.stderr
    );
    assert!(output.stdout.contains("aServer"));
    assert!(output.stdout.contains("clientB"));
    assert!(output.stdout.contains("TEST_HOST not specified"));
    assert!(output.stdout.contains("2 succeeded, 1 failed"));

    let mut calls: Vec<String> = fs::read_to_string(&log)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    calls.sort();
    assert_eq!(calls, ["node1 echo up", "node2 echo hi"]);
}

#[test]
fn test_cli_missing_test_dir_is_fatal() {
    let ctx = TestContext::new();
    let missing = ctx.test_root.join("nope").display().to_string();
    let output = ctx.run_cli(&["run", "-t", &missing], None);
    assert!(!output.success);
    assert!(output.stderr.contains("Test directory not found"));
}

#[test]
fn test_cli_show() {
    let ctx = TestContext::new();
    fs::write(ctx.script_dir.join("stressTestDefault.env"), "TEST_DURATION=120\n").unwrap();
    ctx.write("test.env", "TEST_HOST=node1\n");
    ctx.write("clientB.env", "TEST_LAUNCHER=\"$SCRIPTDIR/run.sh $CLIENT_NAME\"\n");

    let output = ctx.run_cli(&["show", "-t", &root_arg(&ctx), "clientB"], None);
    assert!(output.success, "stderr: {}", output.stderr);
    assert!(output.stdout.contains("TEST_HOST=node1"));
    assert!(output.stdout.contains("TEST_DURATION=120"));
    assert!(output
        .stdout
        .contains(&format!("{}/run.sh clientB", ctx.script_dir.display())));

    let output = ctx.run_cli(&["show", "-t", &root_arg(&ctx), "clientZ"], None);
    assert!(!output.success);
    assert!(output.stderr.contains("Unknown participant"));
}

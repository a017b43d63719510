#[path = "common/mod.rs"]
mod common;

use std::{
    fs::{self, File},
    path::Path,
    process::{Child, Command as StdCommand, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use assert_cmd::Command;
use common::{force_kill, is_process_running, read_pid, wait_for_exit, wait_for_path};
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use predicates::prelude::*;
use sublaunch::config::{LauncherConfig, ProcessEntry, load_config};
use tempfile::tempdir;

#[test]
fn init_writes_sample_config() {
    let temp = tempdir().unwrap();
    let config_path = temp.path().join("sublaunch/config.json");

    Command::new(assert_cmd::cargo::cargo_bin!("sublaunch"))
        .arg("--app-dir")
        .arg(temp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("config.json"));

    let config = load_config(&config_path).unwrap();
    assert_eq!(
        config,
        LauncherConfig::sample(&temp.path().join("sublaunch"))
    );
    assert!(temp.path().join("sublaunch/logs").is_dir());
}

#[test]
fn init_keeps_existing_config_unless_forced() {
    let temp = tempdir().unwrap();
    let base = temp.path().join("sublaunch");
    fs::create_dir_all(&base).unwrap();
    let config_path = base.join("config.json");
    fs::write(&config_path, r#"{"Entries":[]}"#).unwrap();

    Command::new(assert_cmd::cargo::cargo_bin!("sublaunch"))
        .arg("--app-dir")
        .arg(temp.path())
        .arg("init")
        .assert()
        .success();
    assert!(load_config(&config_path).unwrap().entries.is_empty());

    Command::new(assert_cmd::cargo::cargo_bin!("sublaunch"))
        .arg("--app-dir")
        .arg(temp.path())
        .arg("init")
        .arg("--force")
        .assert()
        .success();
    assert_eq!(load_config(&config_path).unwrap().entries.len(), 2);
}

#[test]
fn init_reports_unwritable_config() {
    let temp = tempdir().unwrap();
    // A plain file where the base directory should be.
    fs::write(temp.path().join("sublaunch"), "").unwrap();

    Command::new(assert_cmd::cargo::cargo_bin!("sublaunch"))
        .arg("--app-dir")
        .arg(temp.path())
        .args(["--log-level", "error"])
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to write config file"));
}

#[test]
fn logs_prints_tail_of_newest_run() {
    let temp = tempdir().unwrap();
    let log_dir = temp.path().join("sublaunch/logs");
    fs::create_dir_all(&log_dir).unwrap();
    fs::write(
        log_dir.join("worker - 2024-01-01 00_00_00.log"),
        "00:00:00.000 [INFO] old run\n",
    )
    .unwrap();
    fs::write(
        log_dir.join("worker - 2024-01-02 00_00_00.log"),
        "00:00:00.000 [INFO] first\n00:00:00.001 [ERROR] second\n",
    )
    .unwrap();

    Command::new(assert_cmd::cargo::cargo_bin!("sublaunch"))
        .arg("--app-dir")
        .arg(temp.path())
        .args(["logs", "--name", "worker", "--lines", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[ERROR] second"))
        .stdout(predicate::str::contains("first").not())
        .stdout(predicate::str::contains("old run").not());
}

#[test]
fn run_tears_down_on_sigterm() {
    let temp = tempdir().unwrap();
    let base = temp.path().join("sublaunch");
    fs::create_dir_all(&base).unwrap();
    let pids = temp.path().join("pids");
    fs::create_dir_all(&pids).unwrap();

    let config = LauncherConfig {
        entries: vec![
            ProcessEntry {
                name: "A".into(),
                path: "/bin/sh".into(),
                arguments: format!(
                    "-c 'echo $$ > {0}/a.pid; echo hello; exec sleep 60'",
                    pids.display()
                ),
                capture_output: true,
                kill_on_shutdown: true,
                ..ProcessEntry::default()
            },
            ProcessEntry {
                name: "B".into(),
                path: "/bin/sh".into(),
                arguments: format!("-c 'echo $$ > {0}/b.pid; exec sleep 60'", pids.display()),
                hide_window: true,
                ..ProcessEntry::default()
            },
            ProcessEntry {
                name: "off".into(),
                enabled: false,
                path: "/bin/sh".into(),
                arguments: format!("-c 'touch {0}/off.ran'", pids.display()),
                ..ProcessEntry::default()
            },
        ],
    };
    config.save(&base.join("config.json")).unwrap();

    let supervisor_log = temp.path().join("sublaunch.log");
    let mut host = StdCommand::new(assert_cmd::cargo::cargo_bin!("sublaunch"))
        .arg("--app-dir")
        .arg(temp.path())
        .args(["--log-level", "info"])
        .arg("run")
        .arg("--log-file")
        .arg(&supervisor_log)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let a_pid = read_pid(&pids.join("a.pid"));
    let b_pid = read_pid(&pids.join("b.pid"));
    assert!(is_process_running(a_pid));
    assert!(is_process_running(b_pid));

    let log_dir = base.join("logs");
    let deadline = Instant::now() + Duration::from_secs(5);
    let a_log = loop {
        if let Some(path) = sublaunch::logs::latest_log(&log_dir, "A").unwrap()
            && fs::read_to_string(&path).unwrap_or_default().contains("[INFO] hello")
        {
            break path;
        }
        assert!(Instant::now() < deadline, "A never logged its greeting");
        thread::sleep(Duration::from_millis(50));
    };

    send_sigterm(&host);
    assert!(wait_for_host(&mut host).success());

    assert!(wait_for_exit(a_pid), "A should be killed with the host");
    assert!(is_process_running(b_pid), "B should outlive the host");
    assert!(!pids.join("off.ran").exists());
    assert!(fs::read_to_string(&a_log).unwrap().contains("hello"));

    wait_for_path(&supervisor_log);
    let diagnostics = fs::read_to_string(&supervisor_log).unwrap();
    assert!(diagnostics.contains("Launch: Name:A"), "{diagnostics}");
    assert!(diagnostics.contains("Teardown complete"), "{diagnostics}");

    force_kill(b_pid);
}

fn spawn_host(app_dir: &Path, stdout: Stdio) -> Child {
    StdCommand::new(assert_cmd::cargo::cargo_bin!("sublaunch"))
        .arg("--app-dir")
        .arg(app_dir)
        .args(["--log-level", "info"])
        .arg("run")
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(Stdio::null())
        .spawn()
        .unwrap()
}

fn wait_for_host(host: &mut Child) -> ExitStatus {
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        if let Some(status) = host.try_wait().unwrap() {
            return status;
        }
        if Instant::now() >= deadline {
            let _ = host.kill();
            panic!("host did not exit after SIGTERM");
        }
        thread::sleep(Duration::from_millis(50));
    }
}

fn send_sigterm(host: &Child) {
    signal::kill(Pid::from_raw(host.id() as i32), Signal::SIGTERM).unwrap();
}

#[test]
fn sigterm_during_launch_still_tears_down_started_entries() {
    let temp = tempdir().unwrap();
    let base = temp.path().join("sublaunch");
    fs::create_dir_all(&base).unwrap();
    let pids = temp.path().join("pids");
    fs::create_dir_all(&pids).unwrap();

    let mut entries = vec![ProcessEntry {
        name: "A".into(),
        path: "/bin/sh".into(),
        arguments: format!("-c 'echo $$ > {0}/a.pid; exec sleep 60'", pids.display()),
        kill_on_shutdown: true,
        ..ProcessEntry::default()
    }];
    // Enough slow-to-set-up entries that the signal lands while launch is still running.
    entries.extend((0..400).map(|i| ProcessEntry {
        name: format!("filler-{i}"),
        path: "/bin/true".into(),
        capture_output: true,
        ..ProcessEntry::default()
    }));
    LauncherConfig { entries }
        .save(&base.join("config.json"))
        .unwrap();

    let mut host = spawn_host(temp.path(), Stdio::null());
    let a_pid = read_pid(&pids.join("a.pid"));
    send_sigterm(&host);

    let status = wait_for_host(&mut host);
    assert!(status.success(), "host died from the raw signal: {status:?}");
    assert!(wait_for_exit(a_pid), "A outlived the host");
}

#[test]
fn hidden_entry_output_does_not_reach_host() {
    let temp = tempdir().unwrap();
    let base = temp.path().join("sublaunch");
    fs::create_dir_all(&base).unwrap();

    let config = LauncherConfig {
        entries: vec![
            ProcessEntry {
                name: "hidden".into(),
                path: "/bin/sh".into(),
                arguments: "-c 'echo hidden-line'".into(),
                hide_window: true,
                ..ProcessEntry::default()
            },
            ProcessEntry {
                name: "visible".into(),
                path: "/bin/sh".into(),
                arguments: "-c 'echo visible-line'".into(),
                ..ProcessEntry::default()
            },
        ],
    };
    config.save(&base.join("config.json")).unwrap();

    let host_stdout = temp.path().join("host.out");
    let mut host = spawn_host(
        temp.path(),
        Stdio::from(File::create(&host_stdout).unwrap()),
    );

    let deadline = Instant::now() + Duration::from_secs(5);
    while !fs::read_to_string(&host_stdout)
        .unwrap_or_default()
        .contains("visible-line")
    {
        assert!(Instant::now() < deadline, "visible entry never wrote");
        thread::sleep(Duration::from_millis(50));
    }
    // Both entries are launched in order; let the hidden one finish too.
    thread::sleep(Duration::from_millis(300));

    send_sigterm(&host);
    assert!(wait_for_host(&mut host).success());

    let output = fs::read_to_string(&host_stdout).unwrap();
    assert!(output.contains("visible-line"));
    assert!(!output.contains("hidden-line"), "{output}");
}

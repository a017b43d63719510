#[path = "common/mod.rs"]
mod common;

use std::fs;

use common::{parse_log_line, shell_entry, wait_for_lines};
use sublaunch::{config::ProcessEntry, logs::latest_log, supervisor::ProcessSupervisor};
use tempfile::tempdir;

#[test]
fn disabled_entries_never_start() {
    let temp = tempdir().unwrap();
    let marker = temp.path().join("ran");
    let mut entry = shell_entry("disabled", &format!("touch {}", marker.display()));
    entry.enabled = false;

    let mut supervisor = ProcessSupervisor::new(temp.path(), temp.path());
    assert!(supervisor.launch(&[entry]).is_empty());

    std::thread::sleep(std::time::Duration::from_millis(300));
    assert!(!marker.exists(), "disabled entry must not be spawned");
    assert!(supervisor.shutdown().entries.is_empty());
}

#[test]
fn missing_executable_does_not_stop_later_entries() {
    let temp = tempdir().unwrap();
    let marker = temp.path().join("second-ran");

    let entries = vec![
        ProcessEntry {
            name: "ghost".into(),
            path: temp.path().join("no-such-binary").display().to_string(),
            capture_output: true,
            ..ProcessEntry::default()
        },
        shell_entry("second", &format!("touch {}", marker.display())),
    ];

    let mut supervisor = ProcessSupervisor::new(temp.path(), temp.path());
    let launched: Vec<_> = supervisor
        .launch(&entries)
        .iter()
        .map(|entry| entry.name().to_string())
        .collect();

    assert_eq!(launched, vec!["second"]);
    common::wait_for_path(&marker);
    supervisor.shutdown();
}

#[test]
fn name_falls_back_to_executable_for_log_file() {
    let temp = tempdir().unwrap();
    let entry = ProcessEntry {
        path: "/bin/echo".into(),
        arguments: "hello from echo".into(),
        capture_output: true,
        ..ProcessEntry::default()
    };

    let mut supervisor = ProcessSupervisor::new(temp.path(), temp.path());
    let launched = supervisor.launch(&[entry]);
    assert_eq!(launched[0].name(), "echo");

    let log_path = latest_log(temp.path(), "echo").unwrap().expect("log file");
    let lines = wait_for_lines(&log_path, 1);
    supervisor.shutdown();

    assert_eq!(parse_log_line(&lines[0]), ("INFO", "hello from echo"));
    let file_name = log_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(file_name.starts_with("echo - "), "{file_name}");
    assert!(file_name.ends_with(".log"), "{file_name}");
}

#[test]
fn interleaved_streams_keep_order_and_line_integrity() {
    let temp = tempdir().unwrap();
    let mut entry = shell_entry(
        "chatty",
        "i=0; while [ $i -lt 300 ]; do echo \"out-$i-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\"; echo \"err-$i-bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\" >&2; i=$((i+1)); done",
    );
    entry.capture_output = true;

    let mut supervisor = ProcessSupervisor::new(temp.path(), temp.path());
    supervisor.launch(&[entry]);
    let log_path = supervisor.entries()[0].log_path().unwrap().to_path_buf();

    let lines = wait_for_lines(&log_path, 600);
    supervisor.shutdown();

    let mut next_out = 0;
    let mut next_err = 0;
    for line in &lines {
        let (tag, message) = parse_log_line(line);
        let (prefix, rest) = message.split_once('-').unwrap();
        let (index, padding) = rest.split_once('-').unwrap();
        let index: usize = index.parse().unwrap();
        assert_eq!(padding.len(), 32, "corrupted line: {line}");

        match (tag, prefix) {
            ("INFO", "out") => {
                assert_eq!(index, next_out);
                next_out += 1;
            }
            ("ERROR", "err") => {
                assert_eq!(index, next_err);
                next_err += 1;
            }
            _ => panic!("line tagged with the wrong stream: {line}"),
        }
    }
    assert_eq!((next_out, next_err), (300, 300));
}

#[test]
fn unwritable_log_directory_still_launches() {
    let temp = tempdir().unwrap();
    let blocker = temp.path().join("not-a-dir");
    fs::write(&blocker, "").unwrap();
    let marker = temp.path().join("ran");

    let mut entry = shell_entry("logless", &format!("touch {}", marker.display()));
    entry.capture_output = true;

    let mut supervisor = ProcessSupervisor::new(&blocker, temp.path());
    let launched = supervisor.launch(&[entry]);
    assert_eq!(launched.len(), 1);
    assert!(launched[0].log_path().is_none());

    common::wait_for_path(&marker);
    supervisor.shutdown();
}

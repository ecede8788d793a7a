//! Integration tests for console capture from real processes.

#![cfg(unix)]

use procwarden::orchestrator::{LifecycleSettings, ManagedInstance};

use super::test_helpers::{fast_settings, script_config, wait_until};

#[tokio::test]
async fn console_keeps_last_thousand_lines() {
    let temp = tempfile::tempdir().expect("tempdir");
    let body = "i=1\nwhile [ $i -le 1500 ]; do echo \"line $i\"; i=$((i+1)); done\n";
    let settings = LifecycleSettings {
        console_capacity: 1000,
        ..fast_settings()
    };
    let instance = ManagedInstance::new(script_config("chatty", temp.path(), body), settings);

    instance.start().await.expect("start");
    assert!(wait_until(|| !instance.is_alive()).await);

    let lines = instance.console(0);
    assert_eq!(lines.len(), 1000);
    assert_eq!(lines.first().map(String::as_str), Some("line 501"));
    assert_eq!(lines.last().map(String::as_str), Some("line 1500"));
    assert_eq!(instance.console(3), vec!["line 1498", "line 1499", "line 1500"]);
}

#[tokio::test]
async fn stdout_and_stderr_share_the_buffer() {
    let temp = tempfile::tempdir().expect("tempdir");
    let body = "echo to-stdout\necho to-stderr >&2\n";
    let instance = ManagedInstance::new(script_config("mixed", temp.path(), body), fast_settings());

    instance.start().await.expect("start");
    assert!(wait_until(|| !instance.is_alive()).await);

    let mut lines = instance.console(0);
    lines.sort();
    assert_eq!(lines, vec!["to-stderr", "to-stdout"]);
}

#[tokio::test]
async fn console_survives_restart() {
    let temp = tempfile::tempdir().expect("tempdir");
    let instance = ManagedInstance::new(
        script_config("repeat", temp.path(), "echo run\n"),
        fast_settings(),
    );

    instance.start().await.expect("first start");
    assert!(wait_until(|| !instance.is_alive()).await);
    instance.start().await.expect("second start");
    assert!(wait_until(|| instance.console(0).len() == 2).await);

    assert_eq!(instance.console(0), vec!["run", "run"]);
}

//! Integration tests for the per-instance lifecycle state machine.
//!
//! Covers:
//! - start/stop of a long-running process
//! - invalid launch specs leaving the instance stopped
//! - clean exit vs crash classification without auto-restart
//! - crash detection while a background child keeps the output pipes open
//! - permanently-stopped flag and resume
//! - uptime and status snapshots

#![cfg(unix)]

use std::time::{Duration, Instant};

use procwarden::config::InstanceConfig;
use procwarden::models::instance::{ExecutionSpec, InstanceState};
use procwarden::orchestrator::ManagedInstance;
use procwarden::AppError;

use super::test_helpers::{
    bounded, fast_settings, long_running_instance, script_config, wait_until,
};

#[tokio::test]
async fn start_then_stop_long_running_process() {
    let temp = tempfile::tempdir().expect("tempdir");
    let instance = long_running_instance("app", temp.path());

    instance.start().await.expect("start");

    assert_eq!(instance.state(), InstanceState::Running);
    assert!(instance.is_alive());
    assert!(instance.pid().is_some());

    bounded(instance.stop()).await.expect("stop");

    assert_eq!(instance.state(), InstanceState::Stopped);
    assert!(!instance.is_alive());
    assert_eq!(instance.exit_code(), None, "SIGTERM death has no exit code");
}

#[tokio::test]
async fn second_start_is_rejected_while_running() {
    let temp = tempfile::tempdir().expect("tempdir");
    let instance = long_running_instance("app", temp.path());
    instance.start().await.expect("start");
    let pid = instance.pid();

    let result = instance.start().await;

    assert!(matches!(result, Err(AppError::AlreadyRunning(_))));
    assert_eq!(instance.pid(), pid, "no second process spawned");
    bounded(instance.stop()).await.expect("stop");
}

#[tokio::test]
async fn both_launch_targets_fail_start_and_stay_stopped() {
    let temp = tempfile::tempdir().expect("tempdir");
    let execution = ExecutionSpec {
        executable: "sh".into(),
        working_directory: temp.path().to_path_buf(),
        archive: Some("server.jar".into()),
        entry_point: Some("com.example.Main".into()),
        ..ExecutionSpec::default()
    };
    let instance = ManagedInstance::new(InstanceConfig::new("bad", execution), fast_settings());

    let result = instance.start().await;

    assert!(matches!(result, Err(AppError::Config(_))));
    assert_eq!(instance.state(), InstanceState::Stopped);
    assert!(!instance.is_alive());
    assert!(instance.pid().is_none(), "no process was spawned");
}

#[tokio::test]
async fn missing_launch_target_fails_start() {
    let temp = tempfile::tempdir().expect("tempdir");
    let execution = ExecutionSpec {
        working_directory: temp.path().to_path_buf(),
        ..ExecutionSpec::default()
    };
    let instance = ManagedInstance::new(InstanceConfig::new("bad", execution), fast_settings());

    let result = instance.start().await;

    assert!(matches!(result, Err(AppError::Config(ref msg)) if msg.contains("neither")));
    assert_eq!(instance.state(), InstanceState::Stopped);
}

#[tokio::test]
async fn missing_executable_is_spawn_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let execution = ExecutionSpec {
        executable: temp.path().join("no-such-binary").to_string_lossy().into_owned(),
        working_directory: temp.path().to_path_buf(),
        entry_point: Some("main".into()),
        ..ExecutionSpec::default()
    };
    let instance = ManagedInstance::new(InstanceConfig::new("ghost", execution), fast_settings());

    let result = instance.start().await;

    assert!(matches!(result, Err(AppError::Spawn(_))));
    assert_eq!(instance.state(), InstanceState::Stopped);
    assert!(!instance.is_alive());
}

#[tokio::test]
async fn missing_working_directory_is_created() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = script_config("app", temp.path(), "pwd\n");
    let nested = temp.path().join("apps").join("nested");
    config.execution.working_directory.clone_from(&nested);
    let instance = ManagedInstance::new(config, fast_settings());

    instance.start().await.expect("start");
    assert!(wait_until(|| !instance.is_alive()).await);

    assert!(nested.is_dir());
    let output = instance.console(0);
    assert!(
        output.iter().any(|line| line.ends_with("nested")),
        "process ran in the new directory: {output:?}"
    );
}

#[tokio::test]
async fn clean_exit_is_stopped_without_auto_restart() {
    let temp = tempfile::tempdir().expect("tempdir");
    let instance = ManagedInstance::new(
        script_config("job", temp.path(), "echo done\nexit 0\n"),
        fast_settings(),
    );

    instance.start().await.expect("start");

    assert!(wait_until(|| instance.state() == InstanceState::Stopped).await);
    assert_eq!(instance.exit_code(), Some(0));
    assert_eq!(instance.uptime(), Duration::ZERO);
}

#[tokio::test]
async fn nonzero_exit_is_crashed_without_auto_restart() {
    let temp = tempfile::tempdir().expect("tempdir");
    let instance = ManagedInstance::new(
        script_config("job", temp.path(), "exit 3\n"),
        fast_settings(),
    );

    instance.start().await.expect("start");

    assert!(wait_until(|| instance.state() == InstanceState::Crashed).await);
    assert_eq!(instance.exit_code(), Some(3));
    assert!(!instance.is_alive());

    instance.start().await.expect("crashed instance can be started again");
    assert!(wait_until(|| instance.state() == InstanceState::Crashed).await);
}

#[tokio::test]
async fn environment_overrides_reach_process() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = script_config("env", temp.path(), "echo \"mode=$APP_MODE\"\n");
    config
        .execution
        .env
        .insert("APP_MODE".into(), "staging".into());
    let instance = ManagedInstance::new(config, fast_settings());

    instance.start().await.expect("start");
    assert!(wait_until(|| !instance.is_alive()).await);

    assert_eq!(instance.console(0), vec!["mode=staging"]);
}

#[tokio::test]
async fn stop_on_never_started_instance_is_noop() {
    let temp = tempfile::tempdir().expect("tempdir");
    let instance = long_running_instance("idle", temp.path());

    instance.stop().await.expect("stop");
    instance.kill().await.expect("kill");

    assert_eq!(instance.state(), InstanceState::Stopped);
    assert!(instance.pid().is_none());
}

#[tokio::test]
async fn permanently_stopped_blocks_start_until_resume() {
    let temp = tempfile::tempdir().expect("tempdir");
    let instance = long_running_instance("app", temp.path());
    instance.start().await.expect("start");

    bounded(instance.stop_permanently()).await.expect("stop permanently");

    assert_eq!(instance.state(), InstanceState::Stopped);
    assert!(instance.is_permanently_stopped());
    assert!(matches!(
        instance.start().await,
        Err(AppError::PermanentlyStopped(_))
    ));
    assert!(matches!(
        instance.restart().await,
        Err(AppError::PermanentlyStopped(_))
    ));

    instance.resume();

    assert!(!instance.is_permanently_stopped());
    assert_eq!(instance.state(), InstanceState::Stopped, "resume does not start");
    instance.start().await.expect("start after resume");
    assert!(instance.is_alive());
    bounded(instance.stop()).await.expect("stop");
}

#[tokio::test]
async fn stop_permanently_on_idle_instance_sets_flag() {
    let temp = tempfile::tempdir().expect("tempdir");
    let instance = long_running_instance("app", temp.path());

    instance.stop_permanently().await.expect("flag set on idle instance");

    assert!(instance.is_permanently_stopped());
    assert!(matches!(
        instance.start().await,
        Err(AppError::PermanentlyStopped(_))
    ));
    assert!(instance.pid().is_none());
}

#[tokio::test]
async fn uptime_tracks_running_process() {
    let temp = tempfile::tempdir().expect("tempdir");
    let instance = long_running_instance("app", temp.path());
    assert_eq!(instance.uptime(), Duration::ZERO);

    instance.start().await.expect("start");
    tokio::time::sleep(Duration::from_millis(150)).await;

    let uptime = instance.uptime();
    assert!(uptime >= Duration::from_millis(100), "uptime {uptime:?}");
    assert!(uptime < Duration::from_secs(10), "uptime {uptime:?}");

    bounded(instance.stop()).await.expect("stop");
    assert_eq!(instance.uptime(), Duration::ZERO);
}

#[tokio::test]
async fn status_snapshot_reflects_instance() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = script_config("app", temp.path(), "exec sleep 30\n");
    config.name = "Application".into();
    let instance = ManagedInstance::new(config, fast_settings());

    let idle = instance.status();
    assert_eq!(idle.id, "app");
    assert_eq!(idle.name, "Application");
    assert_eq!(idle.state, InstanceState::Stopped);
    assert!(idle.started_at.is_none());
    assert!(idle.pid.is_none());

    instance.start().await.expect("start");
    let running = instance.status();
    assert_eq!(running.state, InstanceState::Running);
    assert!(running.alive);
    assert!(running.started_at.is_some());
    assert_eq!(running.pid, instance.pid());

    let json = serde_json::to_value(&running).expect("serialize");
    assert_eq!(json["state"], "running");

    bounded(instance.stop()).await.expect("stop");
}

#[tokio::test]
async fn kill_terminates_immediately() {
    let temp = tempfile::tempdir().expect("tempdir");
    let instance = long_running_instance("app", temp.path());
    instance.start().await.expect("start");

    let started = std::time::Instant::now();
    bounded(instance.kill()).await.expect("kill");

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(instance.state(), InstanceState::Stopped);
    assert!(!instance.is_alive());
}

#[tokio::test]
async fn crash_is_detected_while_background_child_holds_output_open() {
    let temp = tempfile::tempdir().expect("tempdir");
    let instance = ManagedInstance::new(
        script_config("orphaner", temp.path(), "echo started\nsleep 20 &\nexit 1\n"),
        fast_settings(),
    );
    let began = Instant::now();

    instance.start().await.expect("start");
    assert!(wait_until(|| instance.state() == InstanceState::Crashed).await);

    assert!(
        began.elapsed() < Duration::from_secs(5),
        "crash surfaced late: {:?}",
        began.elapsed()
    );
    assert_eq!(instance.exit_code(), Some(1));
    assert!(!instance.is_alive());

    instance.start().await.expect("restart after crash");
    assert!(wait_until(|| instance.state() == InstanceState::Crashed).await);
}

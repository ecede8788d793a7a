use std::time::Duration;

use procwarden::config::{
    load_instance_dir, load_instance_file, save_instance_config, GlobalConfig, InstanceConfig,
};
use procwarden::models::instance::ExecutionSpec;
use procwarden::orchestrator::LifecycleSettings;
use procwarden::AppError;

fn sample_toml() -> String {
    r#"
ipc_name = "procwarden-test"
console_capacity = 250

[shutdown]
stop_grace_seconds = 30
kill_grace_seconds = 2

[[instances]]
id = "web"
name = "Web Frontend"
executable = "/usr/bin/java"
working_directory = "/srv/web"
archive = "server.jar"
pre_args = ["-Xmx1G"]
post_args = ["--port=8080"]

[instances.env]
APP_MODE = "production"

[instances.restart]
max_restarts_in_window = 3
restart_window_minutes = 15
cooldown_seconds = 1
scheduled_restarts = ["0 0 4 * * ?"]

[[instances]]
id = "worker"
enabled = false
entry_point = "com.example.Worker"
"#
    .to_owned()
}

fn exec_with_entry_point() -> ExecutionSpec {
    ExecutionSpec {
        entry_point: Some("com.example.Main".into()),
        ..ExecutionSpec::default()
    }
}

#[test]
fn parses_valid_config() {
    let config = GlobalConfig::from_toml_str(&sample_toml()).expect("config parses");

    assert_eq!(config.ipc_name, "procwarden-test");
    assert_eq!(config.console_capacity, 250);
    assert_eq!(config.stop_grace(), Duration::from_secs(30));
    assert_eq!(config.kill_grace(), Duration::from_secs(2));
    assert_eq!(config.instances.len(), 2);

    let web = &config.instances[0];
    assert_eq!(web.id, "web");
    assert_eq!(web.name, "Web Frontend");
    assert!(web.enabled);
    assert_eq!(web.execution.executable, "/usr/bin/java");
    assert_eq!(web.execution.archive.as_deref(), Some("server.jar"));
    assert_eq!(web.execution.env.get("APP_MODE").map(String::as_str), Some("production"));
    assert_eq!(web.restart.max_restarts_in_window, 3);
    assert_eq!(web.restart.window(), Duration::from_secs(15 * 60));
    assert_eq!(web.restart.scheduled_restarts, vec!["0 0 4 * * ?"]);
}

#[test]
fn minimal_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("empty config parses");

    assert_eq!(config.ipc_name, "procwarden");
    assert_eq!(config.console_capacity, 1000);
    assert_eq!(config.stop_grace(), Duration::from_secs(60));
    assert_eq!(config.kill_grace(), Duration::from_secs(5));
    assert!(config.instances_dir.is_none());
    assert!(config.instances.is_empty());
}

#[test]
fn blank_name_defaults_to_id() {
    let config = GlobalConfig::from_toml_str(&sample_toml()).expect("config parses");
    let worker = &config.instances[1];

    assert_eq!(worker.name, "worker");
    assert!(!worker.enabled);
    assert_eq!(worker.execution.executable, "java");
    assert!(worker.restart.auto_restart);
    assert!(worker.monitoring.enabled);
    assert_eq!(worker.monitoring.update_interval_ms, 2000);
}

#[test]
fn rejects_zero_console_capacity() {
    let result = GlobalConfig::from_toml_str("console_capacity = 0");
    assert!(matches!(result, Err(AppError::Config(ref msg)) if msg.contains("console_capacity")));
}

#[test]
fn rejects_duplicate_inline_ids() {
    let toml = r#"
[[instances]]
id = "web"
archive = "a.jar"

[[instances]]
id = "web"
archive = "b.jar"
"#;
    let result = GlobalConfig::from_toml_str(toml);
    assert!(matches!(result, Err(AppError::Config(ref msg)) if msg.contains("duplicate instance id: web")));
}

#[test]
fn rejects_blank_id() {
    let toml = r#"
[[instances]]
id = "  "
archive = "a.jar"
"#;
    let result = GlobalConfig::from_toml_str(toml);
    assert!(matches!(result, Err(AppError::Config(ref msg)) if msg.contains("missing id")));
}

#[test]
fn invalid_toml_is_config_error() {
    let result = GlobalConfig::from_toml_str("ipc_name = [");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn missing_config_file_is_config_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let result = GlobalConfig::load_from_path(temp.path().join("absent.toml"));
    assert!(matches!(result, Err(AppError::Config(ref msg)) if msg.contains("failed to read config")));
}

#[test]
fn load_from_path_reads_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("procwarden.toml");
    std::fs::write(&path, sample_toml()).expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("config loads");
    assert_eq!(config.instances.len(), 2);
}

#[test]
fn lifecycle_settings_follow_config() {
    let config = GlobalConfig::from_toml_str(&sample_toml()).expect("config parses");
    let settings = LifecycleSettings::from(&config);

    assert_eq!(settings.stop_grace, Duration::from_secs(30));
    assert_eq!(settings.kill_grace, Duration::from_secs(2));
    assert_eq!(settings.console_capacity, 250);
}

#[test]
fn missing_instance_dir_is_created_with_example() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path().join("instances");

    let records = load_instance_dir(&dir).expect("dir loads");

    assert!(records.is_empty(), "example record is not returned");
    let example = load_instance_file(dir.join("example.json")).expect("example parses");
    assert_eq!(example.id, "example");
    assert!(!example.enabled);
    assert_eq!(example.execution.archive.as_deref(), Some("application.jar"));
}

#[test]
fn instance_dir_skips_invalid_and_foreign_files() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path();
    save_instance_config(dir, &InstanceConfig::new("good", exec_with_entry_point()))
        .expect("save");
    std::fs::write(dir.join("broken.json"), "{not json").expect("write broken");
    std::fs::write(dir.join("no-id.json"), r#"{"archive": "a.jar"}"#).expect("write no-id");
    std::fs::write(dir.join("notes.txt"), "ignored").expect("write txt");

    let records = load_instance_dir(dir).expect("dir loads");

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "good");
}

#[test]
fn instance_dir_loads_in_file_name_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    for id in ["charlie", "alpha", "bravo"] {
        save_instance_config(temp.path(), &InstanceConfig::new(id, exec_with_entry_point()))
            .expect("save");
    }

    let ids: Vec<String> = load_instance_dir(temp.path())
        .expect("dir loads")
        .into_iter()
        .map(|r| r.id)
        .collect();

    assert_eq!(ids, vec!["alpha", "bravo", "charlie"]);
}

#[test]
fn saved_record_reloads_identically() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut record = InstanceConfig::new("api", exec_with_entry_point());
    record.name = "API".into();
    record.restart.cooldown_seconds = 9;
    record.execution.env.insert("PORT".into(), "9000".into());

    let path = save_instance_config(temp.path(), &record).expect("save");

    assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("api.json"));
    assert_eq!(load_instance_file(&path).expect("reload"), record);
}

#[test]
fn all_instances_merges_inline_and_directory_records() {
    let temp = tempfile::tempdir().expect("tempdir");
    save_instance_config(temp.path(), &InstanceConfig::new("batch", exec_with_entry_point()))
        .expect("save");
    let mut config = GlobalConfig::from_toml_str(&sample_toml()).expect("config parses");
    config.instances_dir = Some(temp.path().to_path_buf());

    let ids: Vec<String> = config
        .all_instances()
        .expect("records load")
        .into_iter()
        .map(|r| r.id)
        .collect();

    assert_eq!(ids, vec!["web", "worker", "batch"]);
}

#[test]
fn all_instances_rejects_duplicates_across_sources() {
    let temp = tempfile::tempdir().expect("tempdir");
    save_instance_config(temp.path(), &InstanceConfig::new("web", exec_with_entry_point()))
        .expect("save");
    let mut config = GlobalConfig::from_toml_str(&sample_toml()).expect("config parses");
    config.instances_dir = Some(temp.path().to_path_buf());

    let result = config.all_instances();
    assert!(matches!(result, Err(AppError::Config(ref msg)) if msg.contains("web")));
}

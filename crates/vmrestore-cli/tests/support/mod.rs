use assert_cmd::Command;
use std::fs;
use std::path::Path;

pub fn new_command_with_temp_home() -> (Command, tempfile::TempDir) {
    let temp_home = tempfile::tempdir().expect("temp home");
    let binary = assert_cmd::cargo::cargo_bin!("vmrestore");
    let mut command = Command::new(binary);
    command.env("HOME", temp_home.path());
    command.env("XDG_CONFIG_HOME", temp_home.path().join(".config"));
    command.env_remove("VMRESTORE_LOG");
    (command, temp_home)
}

/// Config whose engine is `sh -c <script>`, so tests control the restore command.
pub fn write_config_with_script(home: &Path, script: &str) {
    let config_dir = home.join(".config").join("vmrestore");
    fs::create_dir_all(&config_dir).expect("create config dir");
    let scratch = home.join("scratch");
    fs::create_dir_all(&scratch).expect("create scratch dir");

    let config = format!(
        r#"
version = 1

[engine]
program = "/bin/sh"
args = ["-c", {script:?}, "vmrestore-engine"]

[registry]
lock_path = {lock:?}

[restore]
scratch_dir = {scratch:?}
tick_ms = 20
"#,
        lock = home.join("registry.lock").display().to_string(),
        scratch = scratch.display().to_string(),
    );
    fs::write(config_dir.join("config.toml"), config).expect("write config");
}

pub fn write_backup(dir: &Path) {
    fs::create_dir_all(dir).expect("create backup dir");
    fs::write(dir.join("qubes.xml"), "<qubes/>").expect("write backup header");
}

pub fn assert_timestamp_log_names(entries: &[std::fs::DirEntry]) {
    assert!(!entries.is_empty(), "expected at least one diagnostics log");

    for entry in entries {
        let name = entry
            .file_name()
            .into_string()
            .expect("diagnostics filename utf8");
        let stem = name
            .strip_suffix(".log")
            .expect("diagnostics filename .log suffix");
        assert!(
            !stem.is_empty() && stem.chars().all(|character| character.is_ascii_digit()),
            "diagnostics filename must be <timestamp>.log, got: {name}"
        );
    }
}

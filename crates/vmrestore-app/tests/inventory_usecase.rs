mod support;

use std::fs;
use std::sync::Arc;

use vmrestore_app::{ensure_config_ready, summarize_selection};
use vmrestore_core::work::{BackupSource, RestoreOptions, VmCandidate};

use support::{CountingRegistry, ENV_LOCK, Finish, ScriptedEngine, app_with, write_valid_config};

fn candidate(name: &str, good_to_go: bool) -> VmCandidate {
    VmCandidate {
        name: name.to_string(),
        good_to_go,
        problem: (!good_to_go).then(|| "missing netvm".to_string()),
    }
}

#[test]
fn list_vms_hides_internal_entries() {
    let temp = tempfile::tempdir().expect("temp dir");
    fs::write(temp.path().join("qubes.xml"), "<qubes/>").expect("backup header");
    let engine = Arc::new(
        ScriptedEngine::new(Vec::new(), Finish::Return).with_candidates(vec![
            candidate("$dom0", true),
            candidate("work", true),
            candidate("vault", false),
        ]),
    );
    let app = app_with(engine, Arc::new(CountingRegistry::default()), temp.path());

    let candidates = app
        .list_vms(&BackupSource::local(temp.path()), &RestoreOptions::default())
        .expect("inventory");

    let names: Vec<&str> = candidates.iter().map(|vm| vm.name.as_str()).collect();
    assert_eq!(names, vec!["work", "vault"]);

    let summary = summarize_selection(&candidates, &["work".to_string(), "vault".to_string()]);
    assert!(!summary.all_good());
}

#[test]
fn list_vms_rejects_directory_without_backup_header() {
    let temp = tempfile::tempdir().expect("temp dir");
    let engine = Arc::new(ScriptedEngine::new(Vec::new(), Finish::Return));
    let app = app_with(engine, Arc::new(CountingRegistry::default()), temp.path());

    let error = app
        .list_vms(&BackupSource::local(temp.path()), &RestoreOptions::default())
        .expect_err("not a backup");
    assert!(error.to_string().contains("qubes.xml"));
}

#[test]
fn list_vms_accepts_any_location_inside_a_source_vm() {
    let temp = tempfile::tempdir().expect("temp dir");
    let engine = Arc::new(
        ScriptedEngine::new(Vec::new(), Finish::Return)
            .with_candidates(vec![candidate("work", true)]),
    );
    let app = app_with(engine, Arc::new(CountingRegistry::default()), temp.path());
    let mut source = BackupSource::local("/home/user/backups/latest");
    source.source_vm = Some("usb-vm".to_string());

    let candidates = app
        .list_vms(&source, &RestoreOptions::default())
        .expect("inventory");
    assert_eq!(candidates.len(), 1);
}

#[test]
fn ensure_config_ready_reports_missing_config() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    let temp = tempfile::tempdir().expect("temp dir");
    unsafe {
        std::env::set_var("HOME", temp.path());
    }

    let error = ensure_config_ready().expect_err("missing config");
    assert!(error.to_string().contains("missing config at"));
}

#[test]
fn ensure_config_ready_loads_valid_config() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    let temp = tempfile::tempdir().expect("temp dir");
    write_valid_config(temp.path());
    unsafe {
        std::env::set_var("HOME", temp.path());
    }

    let config = ensure_config_ready().expect("config");
    assert_eq!(config.engine.program, "qvm-backup-restore");
    assert_eq!(config.restore.tick_ms, 50);
}

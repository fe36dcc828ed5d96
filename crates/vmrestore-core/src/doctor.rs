use std::env;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::config::{VmrestoreConfig, load_config, resolve_config_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Pass,
    Fail,
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorCheck {
    pub name: String,
    pub state: CheckState,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorReport {
    pub checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    pub fn has_failures(&self) -> bool {
        self.checks
            .iter()
            .any(|check| check.state == CheckState::Fail)
    }

    pub fn summary(&self) -> String {
        let passed = self
            .checks
            .iter()
            .filter(|check| check.state == CheckState::Pass)
            .count();
        let failed = self.checks.len().saturating_sub(passed);
        format!("{passed} passed, {failed} failed")
    }
}

const CONFIG_DEPENDENT_CHECKS: &[&str] = &[
    "config parses and validates",
    "restore engine executable",
    "scratch directory writable",
    "registry lock path usable",
];

pub fn run_doctor() -> DoctorReport {
    match resolve_config_path() {
        Ok(config_path) => run_doctor_for_path(&config_path),
        Err(error) => {
            let mut checks = vec![os_check()];
            checks.push(fail_check("config path resolves", error.to_string()));
            push_skipped_checks(
                &mut checks,
                &["config file exists"],
                "config path could not be resolved",
            );
            push_skipped_checks(
                &mut checks,
                CONFIG_DEPENDENT_CHECKS,
                "config path could not be resolved",
            );
            DoctorReport { checks }
        }
    }
}

pub fn run_doctor_for_path(config_path: &Path) -> DoctorReport {
    let mut checks = vec![os_check()];

    if !config_path.exists() {
        checks.push(fail_check(
            "config file exists",
            format!("expected at {}", config_path.display()),
        ));
        push_skipped_checks(&mut checks, CONFIG_DEPENDENT_CHECKS, "config file is missing");
        return DoctorReport { checks };
    }

    checks.push(pass_check(
        "config file exists",
        format!("found at {}", config_path.display()),
    ));

    match load_config(config_path) {
        Ok(config) => {
            checks.push(pass_check("config parses and validates", "config is valid"));
            checks.extend(config_checks(&config));
        }
        Err(error) => {
            checks.push(fail_check("config parses and validates", error.to_string()));
            push_skipped_checks(&mut checks, &CONFIG_DEPENDENT_CHECKS[1..], "config is invalid");
        }
    }

    DoctorReport { checks }
}

fn os_check() -> DoctorCheck {
    match env::consts::OS {
        "linux" => pass_check("os is supported", "detected Linux"),
        detected => fail_check(
            "os is supported",
            format!("detected {detected}, expected Linux"),
        ),
    }
}

fn config_checks(config: &VmrestoreConfig) -> Vec<DoctorCheck> {
    vec![
        check_engine_program(&config.engine.program),
        check_scratch_dir(&config.restore.scratch_dir),
        check_lock_path(&config.registry.lock_path),
    ]
}

fn check_engine_program(program: &str) -> DoctorCheck {
    if is_executable_in_path(program) {
        pass_check(
            "restore engine executable",
            format!("'{program}' found in PATH"),
        )
    } else {
        fail_check(
            "restore engine executable",
            format!("'{program}' not found in PATH"),
        )
    }
}

fn check_scratch_dir(scratch_dir: &Path) -> DoctorCheck {
    if !scratch_dir.is_dir() {
        return fail_check(
            "scratch directory writable",
            format!("{} is not a directory", scratch_dir.display()),
        );
    }

    match write_probe(scratch_dir) {
        Ok(()) => pass_check(
            "scratch directory writable",
            format!("{} accepts new files", scratch_dir.display()),
        ),
        Err(error) => fail_check(
            "scratch directory writable",
            format!("cannot write to {}: {error}", scratch_dir.display()),
        ),
    }
}

fn write_probe(dir: &Path) -> std::io::Result<()> {
    let probe = dir.join(format!(".vmrestore-doctor-{}", std::process::id()));
    fs::write(&probe, b"probe")?;
    fs::remove_file(&probe)
}

fn check_lock_path(lock_path: &Path) -> DoctorCheck {
    if lock_path.is_file() {
        return pass_check(
            "registry lock path usable",
            format!("{} exists", lock_path.display()),
        );
    }

    match lock_path.parent() {
        Some(parent) if parent.is_dir() => pass_check(
            "registry lock path usable",
            format!(
                "{} will be created on first lock",
                lock_path.display()
            ),
        ),
        _ => fail_check(
            "registry lock path usable",
            format!(
                "parent directory of {} does not exist",
                lock_path.display()
            ),
        ),
    }
}

fn pass_check(name: &str, details: impl Into<String>) -> DoctorCheck {
    DoctorCheck {
        name: name.to_string(),
        state: CheckState::Pass,
        details: details.into(),
    }
}

fn fail_check(name: &str, details: impl Into<String>) -> DoctorCheck {
    DoctorCheck {
        name: name.to_string(),
        state: CheckState::Fail,
        details: details.into(),
    }
}

fn skipped_check(name: &str, reason: &str) -> DoctorCheck {
    fail_check(name, format!("skipped because {reason}"))
}

fn push_skipped_checks(checks: &mut Vec<DoctorCheck>, names: &[&str], reason: &str) {
    checks.extend(
        names
            .iter()
            .copied()
            .map(|name| skipped_check(name, reason)),
    );
}

pub fn is_executable_in_path(program: &str) -> bool {
    let program_path = Path::new(program);

    if program_path.is_absolute() || program.contains('/') {
        return is_executable_file(program_path);
    }

    let Some(path_value) = env::var_os("PATH") else {
        return false;
    };

    env::split_paths(&path_value)
        .map(|directory| directory.join(program))
        .any(|candidate| is_executable_file(&candidate))
}

fn is_executable_file(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match path.metadata() {
            Ok(metadata) => metadata.permissions().mode() & 0o111 != 0,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check<'a>(report: &'a DoctorReport, name: &str) -> &'a DoctorCheck {
        report
            .checks
            .iter()
            .find(|check| check.name == name)
            .unwrap_or_else(|| panic!("missing check {name}"))
    }

    #[test]
    fn check_state_display_is_uppercase_label() {
        assert_eq!(CheckState::Pass.to_string(), "PASS");
        assert_eq!(CheckState::Fail.to_string(), "FAIL");
    }

    #[test]
    fn doctor_summary_counts_pass_and_fail() {
        let report = DoctorReport {
            checks: vec![
                pass_check("a", "ok"),
                fail_check("b", "no"),
                pass_check("c", "ok"),
            ],
        };

        assert_eq!(report.summary(), "2 passed, 1 failed");
        assert!(report.has_failures());
    }

    #[test]
    fn missing_config_skips_dependent_checks() {
        let temp = tempfile::tempdir().expect("temp dir");
        let report = run_doctor_for_path(&temp.path().join("config.toml"));

        assert_eq!(check(&report, "config file exists").state, CheckState::Fail);
        assert!(
            check(&report, "scratch directory writable")
                .details
                .contains("skipped because config file is missing")
        );
        assert_eq!(report.checks.len(), 2 + CONFIG_DEPENDENT_CHECKS.len());
    }

    #[test]
    fn valid_config_checks_engine_scratch_and_lock() {
        let temp = tempfile::tempdir().expect("temp dir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            format!(
                "version = 1\n\n[engine]\nprogram = \"/bin/sh\"\n\n[registry]\nlock_path = \"{}\"\n\n[restore]\nscratch_dir = \"{}\"\n",
                temp.path().join("qubes.xml").display(),
                temp.path().display()
            ),
        )
        .expect("write config");

        let report = run_doctor_for_path(&config_path);

        assert_eq!(
            check(&report, "config parses and validates").state,
            CheckState::Pass
        );
        assert_eq!(
            check(&report, "restore engine executable").state,
            CheckState::Pass
        );
        assert_eq!(
            check(&report, "scratch directory writable").state,
            CheckState::Pass
        );
        assert_eq!(
            check(&report, "registry lock path usable").state,
            CheckState::Pass
        );
    }

    #[test]
    fn missing_engine_program_fails() {
        let result = check_engine_program("/nonexistent/qvm-backup-restore");
        assert_eq!(result.state, CheckState::Fail);
    }

    #[test]
    fn lock_path_in_missing_directory_fails() {
        let result = check_lock_path(Path::new("/nonexistent/dir/qubes.xml"));
        assert_eq!(result.state, CheckState::Fail);
    }
}

//! Requirements check run before anything is started
//!
//! Verifies that every service executable can be found, that the streaming
//! runtime installation is where the panel file says it is, and reports
//! whether each health endpoint already answers. Each failed check carries
//! the fix an operator would apply.

use crate::config::{RuntimeEnv, ServiceSpec, SEARCH_PATH_VAR};
use crate::runtime::health::{self, HealthProbe};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

/// Outcome of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub check: String,
    pub passed: bool,
    pub message: String,
    pub fix: Option<String>,
}

impl CheckResult {
    fn pass(check: &str, message: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            passed: true,
            message: message.into(),
            fix: None,
        }
    }

    fn fail(check: &str, message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            passed: false,
            message: message.into(),
            fix: Some(fix.into()),
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = if self.passed { "ok" } else { "!!" };
        write!(f, "[{}] {}: {}", symbol, self.check, self.message)?;
        if let Some(fix) = &self.fix {
            write!(f, "\n     fix: {}", fix)?;
        }
        Ok(())
    }
}

/// Run every check. Endpoints are connected to once, without retries.
pub async fn check_requirements(
    specs: &[ServiceSpec],
    runtime: Option<&RuntimeEnv>,
) -> Vec<CheckResult> {
    let mut results = Vec::new();

    if let Some(runtime) = runtime {
        results.extend(check_runtime(runtime));
    }
    for spec in specs {
        results.push(check_executable(spec));
    }
    for spec in specs {
        if let Some(probe) = &spec.health {
            results.push(check_endpoint(&spec.name, probe).await);
        }
    }

    let failed = results.iter().filter(|r| !r.passed).count();
    log::info!("Requirements check: {} of {} passed", results.len() - failed, results.len());
    results
}

fn check_runtime(runtime: &RuntimeEnv) -> Vec<CheckResult> {
    let mut dirs = vec![
        ("runtime binaries", &runtime.bin_dir),
        ("runtime typelibs", &runtime.typelib_dir),
    ];
    if let Some(plugin_dir) = &runtime.plugin_dir {
        dirs.push(("runtime plugins", plugin_dir));
    }

    dirs.into_iter()
        .map(|(check, dir)| {
            if dir.is_dir() {
                CheckResult::pass(check, format!("found at {}", dir.display()))
            } else {
                CheckResult::fail(
                    check,
                    format!("not found at {}", dir.display()),
                    "Install the streaming runtime or fix the 'runtime' section",
                )
            }
        })
        .collect()
}

fn check_executable(spec: &ServiceSpec) -> CheckResult {
    let check = format!("{} executable", spec.name);
    let search_path = spec
        .env
        .resolve_current()
        .ok()
        .and_then(|vars| vars.into_iter().find(|(name, _)| name == SEARCH_PATH_VAR))
        .map(|(_, value)| value)
        .or_else(|| std::env::var_os(SEARCH_PATH_VAR));

    match find_executable(&spec.executable, search_path) {
        Some(path) => CheckResult::pass(&check, format!("found at {}", path.display())),
        None => CheckResult::fail(
            &check,
            format!("'{}' not found", spec.executable.display()),
            format!(
                "Install '{}' or set its full path in the panel file",
                spec.executable.display()
            ),
        ),
    }
}

async fn check_endpoint(service: &str, probe: &HealthProbe) -> CheckResult {
    let check = format!("{} endpoint", service);
    if health::probe_once(probe).await {
        CheckResult::pass(&check, format!("{} is answering", probe.endpoint()))
    } else {
        CheckResult::fail(
            &check,
            format!("{} is not answering", probe.endpoint()),
            format!("Start '{}' from the panel; another instance may hold the port", service),
        )
    }
}

/// Locate `executable` the way a spawn would: paths with a directory
/// component are taken as they are, bare names are looked up on `search_path`.
pub fn find_executable(executable: &Path, search_path: Option<OsString>) -> Option<PathBuf> {
    if executable.components().count() > 1 {
        return is_executable_file(executable).then(|| executable.to_path_buf());
    }

    let search_path = search_path?;
    std::env::split_paths(&search_path)
        .flat_map(|dir| candidates(&dir, executable))
        .find(|candidate| is_executable_file(candidate))
}

fn candidates(dir: &Path, name: &Path) -> Vec<PathBuf> {
    let plain = dir.join(name);
    if cfg!(windows) && plain.extension().is_none() {
        vec![plain.with_extension("exe"), plain]
    } else {
        vec![plain]
    }
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}

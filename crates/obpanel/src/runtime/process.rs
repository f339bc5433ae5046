//! Handle to one spawned service process

use crate::config::ServiceSpec;
use chrono::{DateTime, Local};
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// How long to wait for the exit after a forced kill
const KILL_WAIT: Duration = Duration::from_secs(2);

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process exited on its own (code is `None` when ended by a signal)
    Exited(Option<i32>),
    /// The grace period ran out and the process was killed
    Killed,
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::Exited(Some(code)) => write!(f, "exited with code {}", code),
            StopOutcome::Exited(None) => write!(f, "exited on signal"),
            StopOutcome::Killed => write!(f, "killed"),
        }
    }
}

/// A spawned service process
pub struct ServiceHandle {
    /// Service name (for logging)
    pub service: String,
    /// Process ID
    pub pid: u32,
    /// Wall-clock start time
    pub started_at: DateTime<Local>,
    started: Instant,
    child: Child,
    exit: Option<ExitStatus>,
}

impl ServiceHandle {
    /// Spawn the process described by `spec` with both output streams piped
    pub fn spawn(spec: &ServiceSpec) -> Result<Self, ProcessError> {
        log::info!("[{}] Starting: {}", spec.name, spec.command_line());

        let env = spec
            .env
            .resolve_current()
            .map_err(|e| ProcessError::Environment {
                name: spec.name.clone(),
                reason: e.to_string(),
            })?;

        let mut cmd = Command::new(&spec.executable);
        cmd.args(&spec.args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| {
            log::error!("[{}] Failed to spawn process: {}", spec.name, e);
            ProcessError::SpawnFailed {
                name: spec.name.clone(),
                source: e,
            }
        })?;

        let pid = child.id().unwrap_or(0);
        log::info!("[{}] Process started with PID: {}", spec.name, pid);

        Ok(Self {
            service: spec.name.clone(),
            pid,
            started_at: Local::now(),
            started: Instant::now(),
            child,
            exit: None,
        })
    }

    /// Non-blocking liveness check
    pub fn is_alive(&mut self) -> bool {
        if self.exit.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit = Some(status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                log::error!("[{}] Error checking process status: {}", self.service, e);
                false
            }
        }
    }

    /// Exit code, once the process has been observed to exit
    pub fn exit_code(&self) -> Option<i32> {
        self.exit.and_then(|s| s.code())
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Stop gracefully (SIGTERM), then SIGKILL once `grace` has passed.
    ///
    /// Returns within roughly `grace` plus a fixed kill wait no matter how the
    /// process behaves.
    pub async fn stop(&mut self, grace: Duration) -> Result<StopOutcome, ProcessError> {
        if !self.is_alive() {
            let code = self.exit_code();
            log::debug!("[{}] Already exited with code: {:?}", self.service, code);
            return Ok(StopOutcome::Exited(code));
        }

        log::info!("[{}] Stopping process...", self.service);

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Err(e) = kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM) {
                log::debug!("[{}] SIGTERM failed: {}", self.service, e);
            }

            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => {
                    self.exit = Some(status);
                    log::info!(
                        "[{}] Process exited with code: {:?}",
                        self.service,
                        status.code()
                    );
                    return Ok(StopOutcome::Exited(status.code()));
                }
                Ok(Err(e)) => {
                    return Err(ProcessError::Wait {
                        name: self.service.clone(),
                        source: e,
                    });
                }
                Err(_) => {
                    log::warn!(
                        "[{}] Process did not exit within {:?}, forcing kill",
                        self.service,
                        grace
                    );
                }
            }
        }

        // No graceful request exists off unix; the grace period is unused there.
        #[cfg(not(unix))]
        let _ = grace;

        self.kill().await?;
        Ok(StopOutcome::Killed)
    }

    /// Forced kill, bounded by [`KILL_WAIT`]
    async fn kill(&mut self) -> Result<(), ProcessError> {
        self.child
            .start_kill()
            .map_err(|e| ProcessError::KillFailed {
                name: self.service.clone(),
                reason: e.to_string(),
            })?;

        match tokio::time::timeout(KILL_WAIT, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.exit = Some(status);
                log::info!("[{}] Process killed", self.service);
                Ok(())
            }
            Ok(Err(e)) => Err(ProcessError::KillFailed {
                name: self.service.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ProcessError::KillFailed {
                name: self.service.clone(),
                reason: format!("still alive {:?} after kill", KILL_WAIT),
            }),
        }
    }

    /// Send a kill without waiting. Used on teardown paths that cannot await.
    pub fn force_kill(&mut self) {
        if self.is_alive() {
            log::warn!("[{}] Force killing PID {}", self.service, self.pid);
            if let Err(e) = self.child.start_kill() {
                log::error!("[{}] Kill failed: {}", self.service, e);
            }
        }
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("service", &self.service)
            .field("pid", &self.pid)
            .field("started_at", &self.started_at)
            .field("exit", &self.exit)
            .finish()
    }
}

/// Errors that can occur with service processes
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn process '{name}': {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid environment for '{name}': {reason}")]
    Environment { name: String, reason: String },

    #[error("Error waiting for process '{name}': {source}")]
    Wait {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to kill process '{name}': {reason}")]
    KillFailed { name: String, reason: String },
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(name: &str, script: &str) -> ServiceSpec {
        ServiceSpec::new(name, "/bin/sh").with_args(["-c", script])
    }

    #[tokio::test]
    async fn test_spawn_missing_executable() {
        let spec = ServiceSpec::new("ghost", "/nonexistent/store-engine");
        let result = ServiceHandle::spawn(&spec);
        assert!(matches!(result, Err(ProcessError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_graceful_stop() {
        let mut handle = ServiceHandle::spawn(&sh("sleeper", "exec sleep 30")).unwrap();
        assert!(handle.is_alive());
        assert!(handle.pid > 0);

        let outcome = handle.stop(Duration::from_secs(5)).await.unwrap();
        // SIGTERM's default action ends the process without an exit code
        assert_eq!(outcome, StopOutcome::Exited(None));
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_forced_stop_is_bounded() {
        let script = "trap '' TERM; while true; do sleep 0.05; done";
        let mut handle = ServiceHandle::spawn(&sh("stubborn", script)).unwrap();
        // let the shell install its trap first
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        let outcome = handle.stop(Duration::from_millis(300)).await.unwrap();
        assert_eq!(outcome, StopOutcome::Killed);
        assert!(started.elapsed() < Duration::from_millis(300) + KILL_WAIT);
    }

    #[tokio::test]
    async fn test_stop_after_voluntary_exit() {
        let mut handle = ServiceHandle::spawn(&sh("short", "exit 3")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!handle.is_alive());
        assert_eq!(handle.exit_code(), Some(3));

        let outcome = handle.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome, StopOutcome::Exited(Some(3)));
    }

    #[tokio::test]
    async fn test_env_overlay_reaches_child() {
        use crate::config::EnvOverlay;
        use tokio::io::AsyncReadExt;

        let spec = sh("env", "printf '%s' \"$OB_MODE\"")
            .with_env(EnvOverlay::default().with_var("OB_MODE", "tx"));
        let mut handle = ServiceHandle::spawn(&spec).unwrap();
        let mut out = String::new();
        handle
            .take_stdout()
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        assert_eq!(out, "tx");
    }

    #[tokio::test]
    async fn test_working_dir_applies_to_child() {
        use tokio::io::AsyncReadExt;

        let dir = tempfile::tempdir().unwrap();
        let spec = sh("store", "pwd").with_working_dir(dir.path());
        let mut handle = ServiceHandle::spawn(&spec).unwrap();
        let mut out = String::new();
        handle
            .take_stdout()
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();

        let reported = std::fs::canonicalize(out.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
        assert!(handle.uptime() > Duration::ZERO);
    }
}

//! Supervisor - dependency-ordered startup, health gating and reverse-order shutdown

use crate::config::{ConfigError, ConfigStore, EnvOverlay, PanelFile};
use crate::runtime::dependency::{DependencyError, DependencyGraph};
use crate::runtime::health::{self, HealthOutcome, HealthProbe};
use crate::runtime::log_stream::{DetachOutcome, LogLine, LogSink, LogStreamer, StreamTag};
use crate::runtime::process::{ProcessError, ServiceHandle, StopOutcome};
use crate::runtime::state::ServiceState;
use chrono::{DateTime, Local};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

/// Supervisor timing configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Default time allowed for a voluntary exit
    pub grace_period: Duration,
    /// Time a freshly started service must stay alive before it counts as up
    pub settle_delay: Duration,
    /// Upper bound for detaching a log streamer
    pub detach_timeout: Duration,
    /// Time after a stop during which `start_all` is refused
    pub restart_cooldown: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(3),
            settle_delay: Duration::from_millis(500),
            detach_timeout: Duration::from_secs(1),
            restart_cooldown: Duration::from_secs(5),
        }
    }
}

impl From<&PanelFile> for SupervisorConfig {
    fn from(panel: &PanelFile) -> Self {
        Self {
            grace_period: Duration::from_millis(panel.grace_period_ms),
            settle_delay: Duration::from_millis(panel.settle_delay_ms),
            detach_timeout: Duration::from_millis(panel.detach_timeout_ms),
            restart_cooldown: Duration::from_millis(panel.restart_cooldown_ms),
        }
    }
}

/// Event emitted by the supervisor
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// Output line from a service, or a supervisor notice
    Line(LogLine),
    /// State change
    Transition {
        service: String,
        from: ServiceState,
        to: ServiceState,
    },
    /// Stop requested for a service
    Stopping { service: String },
    /// Service stopped
    Stopped {
        service: String,
        outcome: StopOutcome,
    },
    /// A running service lost its dependency
    Degraded { service: String, dependency: String },
    /// Service failed
    Failed { service: String, error: String },
}

/// Point-in-time view of one service
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSnapshot {
    pub name: String,
    pub state: ServiceState,
    /// Running, but its dependency is no longer running
    pub degraded: bool,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Local>>,
    pub uptime: Option<Duration>,
    pub last_exit: Option<StopOutcome>,
    pub last_error: Option<String>,
}

/// Report for a service found dead by [`Supervisor::reap_exited`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub service: String,
    pub code: Option<i32>,
    /// Running dependents now flagged degraded
    pub degraded: Vec<String>,
}

struct ServiceEntry {
    state: ServiceState,
    degraded: bool,
    handle: Option<ServiceHandle>,
    streamer: Option<LogStreamer>,
    last_exit: Option<StopOutcome>,
    last_error: Option<String>,
}

impl ServiceEntry {
    fn new() -> Self {
        Self {
            state: ServiceState::NotStarted,
            degraded: false,
            handle: None,
            streamer: None,
            last_exit: None,
            last_error: None,
        }
    }
}

type Table = IndexMap<String, ServiceEntry>;

/// Services in start order, as they would be launched
#[derive(Debug)]
pub struct LaunchPlan {
    pub services: Vec<LaunchPlanService>,
}

/// One service in the launch plan
#[derive(Debug)]
pub struct LaunchPlanService {
    pub name: String,
    pub command: String,
    pub depends_on: Option<String>,
    pub health: Option<String>,
    pub env: EnvOverlay,
}

/// Owns every service handle of the session.
///
/// State and handles live behind one mutex that is never held across an
/// await; `start_all` and `stop_all` are serialized by a separate async lock.
pub struct Supervisor {
    config: SupervisorConfig,
    store: ConfigStore,
    graph: DependencyGraph,
    table: Mutex<Table>,
    ops: tokio::sync::Mutex<()>,
    cancel: watch::Sender<()>,
    last_stop: Mutex<Option<Instant>>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    sink: Arc<dyn LogSink>,
}

impl Supervisor {
    /// Create a supervisor over the services in `store`
    pub fn new(
        store: ConfigStore,
        config: SupervisorConfig,
        events: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> Result<Self, SupervisorError> {
        let graph = DependencyGraph::build(&store.specs())?;

        let table: Table = store
            .service_names()
            .into_iter()
            .map(|name| (name, ServiceEntry::new()))
            .collect();

        let line_tx = events.clone();
        let sink: Arc<dyn LogSink> = Arc::new(move |line: LogLine| {
            let _ = line_tx.send(SupervisorEvent::Line(line));
        });

        let (cancel, _) = watch::channel(());

        Ok(Self {
            config,
            store,
            graph,
            table: Mutex::new(table),
            ops: tokio::sync::Mutex::new(()),
            cancel,
            last_stop: Mutex::new(None),
            events,
            sink,
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.store
    }

    /// Time left before `start_all` is accepted again after a stop
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let last_stop = *self.last_stop.lock().unwrap_or_else(PoisonError::into_inner);
        let remaining = self
            .config
            .restart_cooldown
            .checked_sub(last_stop?.elapsed())?;
        (!remaining.is_zero()).then_some(remaining)
    }

    /// Launch plan without executing anything
    pub fn plan(&self) -> Result<LaunchPlan, SupervisorError> {
        let services = self
            .graph
            .launch_order()
            .map(|name| {
                let spec = self.store.get_spec(name)?;
                Ok(LaunchPlanService {
                    name: spec.name.clone(),
                    command: spec.command_line(),
                    depends_on: spec.depends_on.clone(),
                    health: spec.health.as_ref().map(HealthProbe::endpoint),
                    env: spec.env,
                })
            })
            .collect::<Result<Vec<_>, SupervisorError>>()?;
        Ok(LaunchPlan { services })
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SupervisorEvent) {
        let _ = self.events.send(event);
    }

    /// Supervisor notice, delivered through the log sink
    fn notify(&self, service: &str, text: impl Into<String>) {
        self.sink
            .on_line(LogLine::new(service, StreamTag::Supervisor, text));
    }

    /// `{service: state}` snapshot
    pub fn status(&self) -> IndexMap<String, ServiceState> {
        self.table()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.state))
            .collect()
    }

    pub fn state_of(&self, service: &str) -> Option<ServiceState> {
        self.table().get(service).map(|e| e.state)
    }

    /// Detailed snapshot, in declaration order
    pub fn snapshot(&self) -> Vec<ServiceSnapshot> {
        self.table()
            .iter()
            .map(|(name, entry)| ServiceSnapshot {
                name: name.clone(),
                state: entry.state,
                degraded: entry.degraded,
                pid: entry.handle.as_ref().map(|h| h.pid),
                started_at: entry.handle.as_ref().map(|h| h.started_at),
                uptime: entry.handle.as_ref().map(|h| h.uptime()),
                last_exit: entry.last_exit,
                last_error: entry.last_error.clone(),
            })
            .collect()
    }

    /// Replace the editable service's arguments. Refused while it is active.
    pub fn set_arguments(&self, text: &str) -> Result<Vec<String>, SupervisorError> {
        let service = self
            .store
            .editable_service()
            .ok_or(ConfigError::NotEditable)?;

        // Held across the edit so a concurrent start cannot read half-updated args
        let table = self.table();
        if let Some(entry) = table.get(&service) {
            if entry.state.is_active() || entry.handle.is_some() {
                return Err(SupervisorError::ServiceBusy {
                    service,
                    state: entry.state,
                });
            }
        }
        Ok(self.store.set_arguments(text)?)
    }

    fn transition(
        &self,
        service: &str,
        entry: &mut ServiceEntry,
        to: ServiceState,
    ) -> Result<(), SupervisorError> {
        let from = entry.state;
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(SupervisorError::InvalidTransition {
                service: service.to_string(),
                from,
                to,
            });
        }
        entry.state = to;
        log::info!("[{}] {} -> {}", service, from, to);
        self.emit(SupervisorEvent::Transition {
            service: service.to_string(),
            from,
            to,
        });
        Ok(())
    }

    /// Mark a service Failed and report it through every channel
    fn fail(&self, service: &str, error: &SupervisorError) {
        let message = error.to_string();
        {
            let mut table = self.table();
            if let Some(entry) = table.get_mut(service) {
                entry.last_error = Some(message.clone());
                if let Err(e) = self.transition(service, entry, ServiceState::Failed) {
                    log::warn!("{}", e);
                }
            }
        }
        log::error!("[{}] {}", service, message);
        self.notify(service, format!("failed: {}", message));
        self.emit(SupervisorEvent::Failed {
            service: service.to_string(),
            error: message,
        });
    }

    /// Start every service in dependency order.
    ///
    /// Running services are left alone, so repeated calls never duplicate a
    /// process. The first failure aborts the sequence; services already
    /// started keep running. Refused with [`SupervisorError::CoolingDown`]
    /// for `restart_cooldown` after a stop.
    pub async fn start_all(
        &self,
        force_skip_health: bool,
    ) -> Result<IndexMap<String, ServiceState>, SupervisorError> {
        let _ops = self.ops.lock().await;
        if let Some(remaining) = self.cooldown_remaining() {
            return Err(SupervisorError::CoolingDown { remaining });
        }
        let mut cancel = self.cancel.subscribe();

        // state alone may be stale if a service died since the last reap
        for exit in self.reap_exited() {
            log::info!("[{}] Found exited before start (code {:?})", exit.service, exit.code);
        }

        let order: Vec<String> = self.graph.launch_order().map(String::from).collect();
        for name in &order {
            if self.state_of(name) == Some(ServiceState::Running) {
                log::debug!("[{}] Already running", name);
                continue;
            }
            self.start_service(name, force_skip_health, &mut cancel)
                .await?;
        }

        Ok(self.status())
    }

    async fn start_service(
        &self,
        name: &str,
        force_skip_health: bool,
        cancel: &mut watch::Receiver<()>,
    ) -> Result<(), SupervisorError> {
        if let Some(dependency) = self.graph.dependency_of(name) {
            if self.state_of(dependency) != Some(ServiceState::Running) {
                return Err(SupervisorError::DependencyNotRunning {
                    service: name.to_string(),
                    dependency: dependency.to_string(),
                });
            }
        }

        // A handle left by a failed readiness check is re-probed, not respawned
        let reused = {
            let mut table = self.table();
            let entry = table
                .get_mut(name)
                .ok_or_else(|| SupervisorError::UnknownService(name.to_string()))?;
            let alive = entry.handle.as_mut().is_some_and(|h| h.is_alive());
            if !alive {
                entry.handle = None;
                if let Some(streamer) = entry.streamer.take() {
                    self.detach_in_background(streamer);
                }
            }
            self.transition(name, entry, ServiceState::Starting)?;
            alive
        };

        let spec = self.store.get_spec(name)?;

        if reused {
            log::info!("[{}] Reusing live process for readiness check", name);
        } else {
            let mut handle = match ServiceHandle::spawn(&spec) {
                Ok(handle) => handle,
                Err(source) => {
                    let error = SupervisorError::Spawn {
                        service: name.to_string(),
                        source,
                    };
                    self.fail(name, &error);
                    return Err(error);
                }
            };
            let streamer = LogStreamer::attach(&mut handle, self.sink.clone());
            self.notify(name, format!("started (pid {})", handle.pid));

            let mut table = self.table();
            if let Some(entry) = table.get_mut(name) {
                entry.handle = Some(handle);
                entry.streamer = Some(streamer);
                entry.last_exit = None;
            }
        }

        match &spec.health {
            Some(probe) if !force_skip_health => self.await_health(name, probe, cancel).await?,
            Some(probe) => {
                log::warn!("[{}] Skipping health check on {}", name, probe.endpoint());
                self.notify(name, "health check skipped by operator");
            }
            None => {}
        }

        // An endpoint answering is not proof: another process may own the port
        self.await_settle(name, cancel).await?;

        let mut table = self.table();
        if let Some(entry) = table.get_mut(name) {
            self.transition(name, entry, ServiceState::Running)?;
            entry.degraded = false;
            entry.last_error = None;
        }
        for dependent in self.graph.dependents(name) {
            if let Some(entry) = table.get_mut(dependent) {
                entry.degraded = false;
            }
        }

        Ok(())
    }

    async fn await_health(
        &self,
        name: &str,
        probe: &HealthProbe,
        cancel: &mut watch::Receiver<()>,
    ) -> Result<(), SupervisorError> {
        log::info!("[{}] Waiting for {}", name, probe.endpoint());

        let outcome = health::spawn_wait_ready(probe.clone(), cancel.clone())
            .await
            .unwrap_or_else(|e| {
                log::error!("[{}] Health check task failed: {}", name, e);
                HealthOutcome::Cancelled { attempts: 0 }
            });

        match outcome {
            HealthOutcome::Ready { .. } => {
                self.notify(name, format!("{} {}", probe.endpoint(), outcome));
                Ok(())
            }
            HealthOutcome::Unreachable { attempts } => {
                let error = SupervisorError::DependencyUnavailable {
                    service: name.to_string(),
                    endpoint: probe.endpoint(),
                    attempts,
                };
                self.fail(name, &error);
                Err(error)
            }
            HealthOutcome::Cancelled { .. } => {
                self.notify(name, "start cancelled");
                Err(SupervisorError::Cancelled {
                    service: name.to_string(),
                })
            }
        }
    }

    /// The process must still be alive after the settle delay
    async fn await_settle(
        &self,
        name: &str,
        cancel: &mut watch::Receiver<()>,
    ) -> Result<(), SupervisorError> {
        tokio::select! {
            _ = tokio::time::sleep(self.config.settle_delay) => {}
            _ = cancel.changed() => {
                self.notify(name, "start cancelled");
                return Err(SupervisorError::Cancelled { service: name.to_string() });
            }
        }

        let exited = {
            let mut table = self.table();
            match table.get_mut(name) {
                Some(entry) => {
                    if entry.handle.as_mut().is_some_and(|h| h.is_alive()) {
                        None
                    } else {
                        let code = entry.handle.take().and_then(|h| h.exit_code());
                        entry.last_exit = Some(StopOutcome::Exited(code));
                        if let Some(streamer) = entry.streamer.take() {
                            self.detach_in_background(streamer);
                        }
                        Some(code)
                    }
                }
                None => Some(None),
            }
        };

        match exited {
            None => Ok(()),
            Some(code) => {
                let error = SupervisorError::UnexpectedExit {
                    service: name.to_string(),
                    code,
                };
                self.fail(name, &error);
                Err(error)
            }
        }
    }

    /// Stop every service in reverse dependency order.
    ///
    /// Any in-flight readiness wait is cancelled first. Services that were
    /// never started or are already stopped are skipped.
    pub async fn stop_all(
        &self,
        grace_period: Duration,
    ) -> Result<IndexMap<String, ServiceState>, SupervisorError> {
        self.cancel.send_replace(());
        let _ops = self.ops.lock().await;

        let order: Vec<String> = self.graph.shutdown_order().map(String::from).collect();
        let mut first_error = None;
        let mut stopped_any = false;

        for name in &order {
            match self.stop_service(name, grace_period).await {
                Ok(stopped) => stopped_any |= stopped,
                Err(e) => {
                    log::error!("[{}] Error stopping service: {}", name, e);
                    stopped_any = true;
                    first_error.get_or_insert(e);
                }
            }
        }

        if stopped_any {
            *self.last_stop.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(self.status()),
        }
    }

    /// Returns whether a process was actually stopped
    async fn stop_service(&self, name: &str, grace: Duration) -> Result<bool, SupervisorError> {
        let (mut handle, streamer) = {
            let mut table = self.table();
            let Some(entry) = table.get_mut(name) else {
                return Ok(false);
            };
            entry.degraded = false;
            if entry.handle.is_none() {
                return Ok(false);
            }
            self.transition(name, entry, ServiceState::Stopping)?;
            match entry.handle.take() {
                Some(handle) => (handle, entry.streamer.take()),
                None => return Ok(false),
            }
        };

        self.emit(SupervisorEvent::Stopping {
            service: name.to_string(),
        });

        let result = handle.stop(grace).await;
        if let Some(streamer) = streamer {
            let outcome = streamer.detach(self.config.detach_timeout).await;
            self.report_detach(name, outcome);
        }

        match result {
            Ok(outcome) => {
                {
                    let mut table = self.table();
                    if let Some(entry) = table.get_mut(name) {
                        entry.last_exit = Some(outcome);
                        self.transition(name, entry, ServiceState::Stopped)?;
                    }
                }
                self.notify(name, format!("stopped ({})", outcome));
                self.emit(SupervisorEvent::Stopped {
                    service: name.to_string(),
                    outcome,
                });
                Ok(true)
            }
            Err(source) => {
                let error = SupervisorError::StopFailed {
                    service: name.to_string(),
                    source,
                };
                self.fail(name, &error);
                Err(error)
            }
        }
    }

    fn report_detach(&self, name: &str, outcome: DetachOutcome) {
        match outcome {
            DetachOutcome::Drained { lines } => {
                log::debug!("[{}] Output drained ({} lines)", name, lines);
            }
            DetachOutcome::ForcedClose => {
                log::warn!("[{}] Output pipes closed forcibly", name);
                self.notify(name, "output pipes closed forcibly; trailing output may be lost");
            }
        }
    }

    /// Detect Running services whose process has exited on its own.
    ///
    /// Each one moves to Failed; Running dependents are flagged degraded but
    /// left running. Never blocks.
    pub fn reap_exited(&self) -> Vec<ExitReport> {
        let mut reports = Vec::new();
        let mut table = self.table();
        let names: Vec<String> = table.keys().cloned().collect();

        for name in names {
            let code = {
                let Some(entry) = table.get_mut(&name) else {
                    continue;
                };
                if entry.state != ServiceState::Running {
                    continue;
                }
                let exited = match entry.handle.as_mut() {
                    Some(handle) => !handle.is_alive(),
                    None => true,
                };
                if !exited {
                    continue;
                }

                let code = entry.handle.take().and_then(|h| h.exit_code());
                if let Some(streamer) = entry.streamer.take() {
                    self.detach_in_background(streamer);
                }
                let error = SupervisorError::UnexpectedExit {
                    service: name.clone(),
                    code,
                };
                entry.last_exit = Some(StopOutcome::Exited(code));
                entry.last_error = Some(error.to_string());
                if let Err(e) = self.transition(&name, entry, ServiceState::Failed) {
                    log::warn!("{}", e);
                }
                log::error!("[{}] {}", name, error);
                self.notify(&name, format!("failed: {}", error));
                self.emit(SupervisorEvent::Failed {
                    service: name.clone(),
                    error: error.to_string(),
                });
                code
            };

            let mut degraded = Vec::new();
            for dependent in self.graph.dependents(&name) {
                if let Some(entry) = table.get_mut(dependent) {
                    if entry.state == ServiceState::Running && !entry.degraded {
                        entry.degraded = true;
                        log::warn!("[{}] Degraded: dependency '{}' exited", dependent, name);
                        self.notify(dependent, format!("degraded: '{}' is down", name));
                        self.emit(SupervisorEvent::Degraded {
                            service: dependent.to_string(),
                            dependency: name.clone(),
                        });
                        degraded.push(dependent.to_string());
                    }
                }
            }

            reports.push(ExitReport {
                service: name,
                code,
                degraded,
            });
        }

        reports
    }

    fn detach_in_background(&self, streamer: LogStreamer) {
        let timeout = self.config.detach_timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let service = streamer.service().to_string();
                    if streamer.detach(timeout).await == DetachOutcome::ForcedClose {
                        log::warn!("[{}] Output pipes closed forcibly", service);
                    }
                });
            }
            // Dropping the streamer cancels its readers
            Err(_) => drop(streamer),
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        let mut table = self.table();
        for entry in table.values_mut() {
            if let Some(handle) = entry.handle.as_mut() {
                handle.force_kill();
            }
        }
    }
}

impl std::fmt::Display for LaunchPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Launch Plan")?;
        writeln!(f, "===========")?;
        writeln!(f)?;
        writeln!(f, "Services (in start order):")?;

        for (i, service) in self.services.iter().enumerate() {
            writeln!(f)?;
            writeln!(f, "  {}. {}", i + 1, service.name)?;
            writeln!(f, "     Command: {}", service.command)?;

            if let Some(dep) = &service.depends_on {
                writeln!(f, "     Depends on: {}", dep)?;
            }
            if let Some(endpoint) = &service.health {
                writeln!(f, "     Health check: tcp://{}", endpoint)?;
            }
            if !service.env.is_empty() {
                writeln!(f, "     Environment:")?;
                for (key, value) in &service.env.set {
                    writeln!(f, "       {}={}", key, value)?;
                }
                for (key, dirs) in &service.env.prepend {
                    writeln!(f, "       {}={}", key, prepended_value(key, dirs))?;
                }
            }
        }

        Ok(())
    }
}

/// Prepended directories followed by a reference to the inherited value,
/// joined with the platform's path-list separator
fn prepended_value(name: &str, dirs: &[std::path::PathBuf]) -> String {
    let inherited = if cfg!(windows) {
        format!("%{}%", name)
    } else {
        format!("${}", name)
    };
    let entries = dirs.iter().cloned().chain([inherited.clone().into()]);
    match std::env::join_paths(entries) {
        Ok(joined) => joined.to_string_lossy().into_owned(),
        Err(_) => {
            let mut parts: Vec<String> = dirs.iter().map(|d| d.display().to_string()).collect();
            parts.push(inherited);
            parts.join(" ")
        }
    }
}

/// Errors that can occur in the supervisor
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Failed to start '{service}': {source}")]
    Spawn {
        service: String,
        #[source]
        source: ProcessError,
    },

    #[error("Service '{service}' unreachable at {endpoint} after {attempts} attempts")]
    DependencyUnavailable {
        service: String,
        endpoint: String,
        attempts: u32,
    },

    #[error("Dependency '{dependency}' is not running; cannot start '{service}'")]
    DependencyNotRunning { service: String, dependency: String },

    #[error("Service '{service}' exited unexpectedly (code {code:?})")]
    UnexpectedExit { service: String, code: Option<i32> },

    #[error("Start of '{service}' cancelled")]
    Cancelled { service: String },

    #[error("Restart cooldown active; start again in {:.1}s", .remaining.as_secs_f32())]
    CoolingDown { remaining: Duration },

    #[error("Failed to stop '{service}': {source}")]
    StopFailed {
        service: String,
        #[source]
        source: ProcessError,
    },

    #[error("Service '{service}' is {state}; stop it first")]
    ServiceBusy {
        service: String,
        state: ServiceState,
    },

    #[error("Invalid transition for '{service}': {from} -> {to}")]
    InvalidTransition {
        service: String,
        from: ServiceState,
        to: ServiceState,
    },

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dependency error: {0}")]
    Dependency(#[from] DependencyError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceSpec;
    use std::path::PathBuf;

    fn supervisor(
        specs: Vec<ServiceSpec>,
    ) -> (Supervisor, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let store = ConfigStore::new(specs, None).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        (Supervisor::new(store, SupervisorConfig::default(), tx).unwrap(), rx)
    }

    #[test]
    fn test_cycle_rejected_at_construction() {
        let store = ConfigStore::new(
            [
                ServiceSpec::new("a", "a").depends_on("b"),
                ServiceSpec::new("b", "b").depends_on("a"),
            ],
            None,
        )
        .unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = Supervisor::new(store, SupervisorConfig::default(), tx);
        assert!(matches!(result, Err(SupervisorError::Dependency(_))));
    }

    #[tokio::test]
    async fn test_stop_all_without_start_is_noop() {
        let (sup, mut rx) = supervisor(vec![
            ServiceSpec::new("store", "store-engine"),
            ServiceSpec::new("agent", "stream-agent").depends_on("store"),
        ]);

        let status = sup.stop_all(Duration::from_millis(100)).await.unwrap();
        assert!(status.values().all(|s| *s == ServiceState::NotStarted));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_spawn_failure_marks_failed() {
        let (sup, _rx) = supervisor(vec![
            ServiceSpec::new("store", "/nonexistent/store-engine"),
            ServiceSpec::new("agent", "/nonexistent/stream-agent").depends_on("store"),
        ]);

        let result = sup.start_all(false).await;
        assert!(matches!(result, Err(SupervisorError::Spawn { .. })));
        assert_eq!(sup.state_of("store"), Some(ServiceState::Failed));
        assert_eq!(sup.state_of("agent"), Some(ServiceState::NotStarted));

        let snapshot = sup.snapshot();
        assert!(snapshot[0].last_error.is_some());
        assert_eq!(snapshot[0].pid, None);
    }

    #[test]
    fn test_plan_follows_start_order() {
        let (sup, _rx) = supervisor(vec![
            ServiceSpec::new("agent", "stream-agent")
                .with_args(["-e", "pcm"])
                .depends_on("store"),
            ServiceSpec::new("store", "store-engine")
                .with_health(HealthProbe::new("127.0.0.1", 6379)),
        ]);

        let plan = sup.plan().unwrap();
        let names: Vec<_> = plan.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["store", "agent"]);
        assert_eq!(plan.services[1].command, "stream-agent -e pcm");

        let text = plan.to_string();
        assert!(text.contains("Health check: tcp://127.0.0.1:6379"));
        assert!(text.contains("Depends on: store"));
    }

    #[test]
    fn test_set_arguments_requires_editable_service() {
        let (sup, _rx) = supervisor(vec![ServiceSpec::new("store", "store-engine")]);
        assert!(matches!(
            sup.set_arguments("a b"),
            Err(SupervisorError::Config(ConfigError::NotEditable))
        ));
    }

    #[test]
    fn test_plan_prepends_with_platform_separator() {
        let dirs = [PathBuf::from("/opt/runtime/bin"), PathBuf::from("/opt/runtime/sbin")];
        let value = prepended_value("PATH", &dirs);
        if cfg!(windows) {
            assert_eq!(value, "/opt/runtime/bin;/opt/runtime/sbin;%PATH%");
        } else {
            assert_eq!(value, "/opt/runtime/bin:/opt/runtime/sbin:$PATH");
        }
    }

    #[test]
    fn test_forced_detach_is_reported() {
        let (sup, mut rx) = supervisor(vec![ServiceSpec::new("store", "store-engine")]);

        sup.report_detach("store", DetachOutcome::Drained { lines: 3 });
        assert!(rx.try_recv().is_err());

        sup.report_detach("store", DetachOutcome::ForcedClose);
        match rx.try_recv() {
            Ok(SupervisorEvent::Line(line)) => {
                assert_eq!(line.service, "store");
                assert_eq!(line.stream, StreamTag::Supervisor);
                assert!(line.text.contains("closed forcibly"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_cooldown_before_first_stop() {
        let (sup, _rx) = supervisor(vec![ServiceSpec::new("store", "store-engine")]);
        assert_eq!(sup.cooldown_remaining(), None);

        // stopping nothing does not arm the cooldown
        sup.stop_all(Duration::from_millis(100)).await.unwrap();
        assert_eq!(sup.cooldown_remaining(), None);
    }
}

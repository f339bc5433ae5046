//! Test helpers for supervisor scenarios

#![allow(dead_code)]

use obpanel::{
    ConfigStore, HealthProbe, LogLine, ServiceSpec, StreamTag, Supervisor, SupervisorConfig,
    SupervisorEvent,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Service running a shell script
pub fn sh(name: &str, script: &str) -> ServiceSpec {
    ServiceSpec::new(name, "/bin/sh").with_args(["-c", script])
}

/// Short timings so scenarios finish quickly
pub fn test_config() -> SupervisorConfig {
    SupervisorConfig {
        grace_period: Duration::from_secs(2),
        settle_delay: Duration::from_millis(150),
        detach_timeout: Duration::from_millis(500),
        restart_cooldown: Duration::ZERO,
    }
}

/// Probe with a handful of quick attempts
pub fn fast_probe(port: u16, attempts: u32) -> HealthProbe {
    HealthProbe::new("127.0.0.1", port)
        .with_timeout(Duration::from_millis(200))
        .with_attempts(attempts, Duration::from_millis(30))
}

/// Listener standing in for the store's port
pub async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// A port nothing listens on
pub async fn closed_port() -> u16 {
    let (listener, port) = listener().await;
    drop(listener);
    port
}

/// Supervisor plus the receiving end of its event channel
pub struct Harness {
    pub supervisor: Arc<Supervisor>,
    pub events: mpsc::UnboundedReceiver<SupervisorEvent>,
    seen: Vec<SupervisorEvent>,
}

impl Harness {
    pub fn new(specs: Vec<ServiceSpec>, editable: Option<&str>) -> Self {
        Self::with_config(specs, editable, test_config())
    }

    pub fn with_config(
        specs: Vec<ServiceSpec>,
        editable: Option<&str>,
        config: SupervisorConfig,
    ) -> Self {
        let store = ConfigStore::new(specs, editable).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor::new(store, config, tx).unwrap();
        Self {
            supervisor: Arc::new(supervisor),
            events: rx,
            seen: Vec::new(),
        }
    }

    /// Every event received so far
    pub fn drain(&mut self) -> &[SupervisorEvent] {
        while let Ok(event) = self.events.try_recv() {
            self.seen.push(event);
        }
        &self.seen
    }

    /// Output lines of `service` on `stream`, in arrival order
    pub fn lines(&mut self, service: &str, stream: StreamTag) -> Vec<String> {
        self.drain()
            .iter()
            .filter_map(|event| match event {
                SupervisorEvent::Line(LogLine {
                    service: s,
                    stream: tag,
                    text,
                    ..
                }) if s == service && *tag == stream => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Services in the order their stop began
    pub fn stop_sequence(&mut self) -> Vec<String> {
        self.drain()
            .iter()
            .filter_map(|event| match event {
                SupervisorEvent::Stopping { service } => Some(service.clone()),
                _ => None,
            })
            .collect()
    }

    /// Wait until `service` has produced `count` lines on `stream`
    pub async fn wait_for_lines(
        &mut self,
        service: &str,
        stream: StreamTag,
        count: usize,
    ) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let lines = self.lines(service, stream);
            if lines.len() >= count || tokio::time::Instant::now() >= deadline {
                return lines;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Whether `pid` still names a process that has not been reaped.
/// Zombies count as gone.
pub fn process_exists(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => !stat.contains(") Z "),
        Err(_) if std::path::Path::new("/proc/self").exists() => false,
        // no procfs: signal 0 only tells whether the pid is taken
        Err(_) => kill(Pid::from_raw(pid as i32), None).is_ok(),
    }
}

/// Poll `check` until it returns true or five seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

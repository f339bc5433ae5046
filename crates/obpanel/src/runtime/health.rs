//! Bounded-retry TCP readiness probe
//!
//! A freshly spawned dependency needs a variable amount of time before it
//! starts listening, so a single failed connect is never conclusive: only
//! exhausting every attempt reports the endpoint unreachable.

use crate::config::HealthConfig;
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;

/// Where and how hard to probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthProbe {
    pub host: String,
    pub port: u16,
    /// Bound on a single connect attempt
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Pause between failed attempts
    pub interval: Duration,
}

impl HealthProbe {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        HealthConfig::local(port).into_probe(host.into())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_attempts(mut self, max_attempts: u32, interval: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.interval = interval;
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl HealthConfig {
    fn into_probe(self, host: String) -> HealthProbe {
        HealthProbe {
            host,
            port: self.port,
            timeout: Duration::from_millis(self.timeout_ms),
            max_attempts: self.max_attempts,
            interval: Duration::from_millis(self.interval_ms),
        }
    }
}

impl From<&HealthConfig> for HealthProbe {
    fn from(config: &HealthConfig) -> Self {
        config.clone().into_probe(config.host.clone())
    }
}

/// Result of a readiness wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    /// Connected on the given attempt (1-based)
    Ready { attempts: u32 },
    /// Every attempt failed
    Unreachable { attempts: u32 },
    /// The wait was cancelled before a verdict
    Cancelled { attempts: u32 },
}

impl HealthOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, HealthOutcome::Ready { .. })
    }
}

impl fmt::Display for HealthOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthOutcome::Ready { attempts } => write!(f, "ready after {} attempt(s)", attempts),
            HealthOutcome::Unreachable { attempts } => {
                write!(f, "unreachable after {} attempt(s)", attempts)
            }
            HealthOutcome::Cancelled { attempts } => {
                write!(f, "cancelled after {} attempt(s)", attempts)
            }
        }
    }
}

/// Try a single connect, bounded by the probe timeout
pub async fn probe_once(probe: &HealthProbe) -> bool {
    let endpoint = (probe.host.as_str(), probe.port);
    match tokio::time::timeout(probe.timeout, TcpStream::connect(endpoint)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            log::debug!("Health probe {} failed: {}", probe.endpoint(), e);
            false
        }
        Err(_) => {
            log::debug!("Health probe {} timed out", probe.endpoint());
            false
        }
    }
}

/// Probe until ready, attempts are exhausted, or `cancel` fires
pub async fn wait_ready(probe: &HealthProbe, cancel: &mut watch::Receiver<()>) -> HealthOutcome {
    let max_attempts = probe.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        tokio::select! {
            ready = probe_once(probe) => {
                if ready {
                    log::debug!("Health probe {} ready on attempt {}", probe.endpoint(), attempt);
                    return HealthOutcome::Ready { attempts: attempt };
                }
            }
            _ = cancel.changed() => return HealthOutcome::Cancelled { attempts: attempt },
        }

        if attempt < max_attempts {
            tokio::select! {
                _ = tokio::time::sleep(probe.interval) => {}
                _ = cancel.changed() => return HealthOutcome::Cancelled { attempts: attempt },
            }
        }
    }

    log::warn!(
        "Health probe {} unreachable after {} attempts",
        probe.endpoint(),
        max_attempts
    );
    HealthOutcome::Unreachable {
        attempts: max_attempts,
    }
}

/// Spawn the readiness wait on its own task
pub fn spawn_wait_ready(
    probe: HealthProbe,
    mut cancel: watch::Receiver<()>,
) -> tokio::task::JoinHandle<HealthOutcome> {
    tokio::spawn(async move { wait_ready(&probe, &mut cancel).await })
}

//! Per-service lifecycle state machine

use std::fmt;

/// Lifecycle state of a supervised service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    /// Never started in this session
    NotStarted,
    /// Spawned, readiness not yet confirmed
    Starting,
    /// Ready and being monitored
    Running,
    /// Stop requested, waiting for exit
    Stopping,
    /// Stopped on request
    Stopped,
    /// Spawn or readiness failed, or the process died unexpectedly
    Failed,
}

impl ServiceState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, next),
            (NotStarted, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Running, Failed)
                | (Stopping, Stopped)
                | (Stopping, Failed)
                | (Stopped, Starting)
                | (Failed, Starting)
                | (Failed, Stopping)
        )
    }

    /// Stopped or Failed
    pub fn is_terminal(self) -> bool {
        matches!(self, ServiceState::Stopped | ServiceState::Failed)
    }

    /// Starting, Running or Stopping
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ServiceState::Starting | ServiceState::Running | ServiceState::Stopping
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::NotStarted => "not started",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
            ServiceState::Failed => "failed",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ServiceState::*;
    use super::*;

    #[test]
    fn test_happy_path() {
        let path = [NotStarted, Starting, Running, Stopping, Stopped, Starting];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn test_failure_edges() {
        assert!(Starting.can_transition_to(Failed));
        assert!(Running.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Starting));
        assert!(!NotStarted.can_transition_to(Running));
        assert!(!NotStarted.can_transition_to(Failed));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Starting));
    }

    #[test]
    fn test_terminal_states() {
        assert!(Stopped.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Running.is_terminal());
        assert!(Stopping.is_active());
        assert!(!NotStarted.is_active());
    }
}

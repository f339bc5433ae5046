//! Operator panel for a two-service audio link
//!
//! Supervises a state store and a streaming agent that depends on it.
//!
//! # Overview
//!
//! The panel:
//! - Starts services in dependency order, gating dependents on a TCP health probe
//! - Stops them in reverse order, escalating to a forced kill after a grace period
//! - Streams every output line to a single sink, tagged by service and stream
//! - Lets the operator edit the agent's arguments between runs
//! - Checks executables, the runtime installation and endpoints on request
//!
//! # Example Panel File
//!
//! ```yaml
//! version: "1.0"
//! grace_period_ms: 3000
//!
//! runtime:
//!   bin_dir: "/opt/audio/bin"
//!   typelib_dir: "/opt/audio/lib/girepository-1.0"
//!
//! services:
//!   store:
//!     executable: "redis-server"
//!     health:
//!       port: 6379
//!
//!   agent:
//!     executable: "openob"
//!     args: "127.0.0.1 emetteur transmission tx 192.168.1.17 -e pcm -r 48000 -j 60 -a auto"
//!     depends_on: store
//!     editable: true
//!     runtime_env: true
//! ```

pub mod cli;
pub mod config;
pub mod runtime;

pub use cli::{Command, PanelArgs};
pub use config::{
    ConfigError, ConfigStore, LinkSettings, PanelFile, PanelFileError, RuntimeEnv, ServiceSpec,
};
pub use runtime::{
    check_requirements, CheckResult, DependencyError, DependencyGraph, HealthOutcome, HealthProbe,
    LaunchPlan, LogLine, LogSink, LogStreamer, ProcessError, ServiceHandle, ServiceSnapshot,
    ServiceState, StopOutcome, StreamTag, Supervisor, SupervisorConfig, SupervisorError,
    SupervisorEvent,
};

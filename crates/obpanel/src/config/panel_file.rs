//! Panel file YAML schema definitions

use crate::config::env::RuntimeEnv;
use crate::config::link::DEFAULT_AGENT_ARGS;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Well-known name of the key-value store service in the default panel
pub const STORE_SERVICE: &str = "store";
/// Well-known name of the streaming agent service in the default panel
pub const AGENT_SERVICE: &str = "agent";

/// Port the key-value store listens on by default
pub const DEFAULT_STORE_PORT: u16 = 6379;

/// Root panel file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelFile {
    /// Panel file format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Time allowed for a voluntary exit before a forced kill
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Time a freshly started service must stay alive before it counts as up
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Upper bound for detaching a log streamer
    #[serde(default = "default_detach_timeout_ms")]
    pub detach_timeout_ms: u64,

    /// Start requests are refused for this long after a stop
    #[serde(default = "default_restart_cooldown_ms")]
    pub restart_cooldown_ms: u64,

    /// Streaming runtime installation, applied to services with `runtime_env`
    #[serde(default)]
    pub runtime: Option<RuntimeEnv>,

    /// Service definitions (ordered map for deterministic start order)
    pub services: IndexMap<String, ServiceConfig>,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_grace_period_ms() -> u64 {
    3000
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_detach_timeout_ms() -> u64 {
    1000
}

fn default_restart_cooldown_ms() -> u64 {
    5000
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Executable path or command name
    pub executable: String,

    /// Arguments, either a list or a whitespace-separated line
    #[serde(default)]
    pub args: ArgsValue,

    /// Working directory for the process
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Extra environment variables, set verbatim
    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Service that must be running and healthy first
    #[serde(default)]
    pub depends_on: Option<String>,

    /// Readiness probe; services without one are checked for liveness only
    #[serde(default)]
    pub health: Option<HealthConfig>,

    /// Whether the operator may edit this service's arguments
    #[serde(default)]
    pub editable: bool,

    /// Whether the streaming runtime environment is applied
    #[serde(default)]
    pub runtime_env: bool,
}

/// Arguments can be written as a list or as a single line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgsValue {
    List(Vec<String>),
    Line(String),
}

impl Default for ArgsValue {
    fn default() -> Self {
        ArgsValue::List(Vec::new())
    }
}

impl ArgsValue {
    /// Flatten into argument tokens
    pub fn to_tokens(&self) -> Vec<String> {
        match self {
            ArgsValue::List(list) => list.clone(),
            ArgsValue::Line(line) => line.split_whitespace().map(String::from).collect(),
        }
    }
}

/// TCP readiness probe settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_host")]
    pub host: String,
    pub port: u16,
    #[serde(default = "default_health_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_health_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_health_interval_ms")]
    pub interval_ms: u64,
}

fn default_health_host() -> String {
    "127.0.0.1".to_string()
}

fn default_health_timeout_ms() -> u64 {
    500
}

fn default_health_attempts() -> u32 {
    10
}

fn default_health_interval_ms() -> u64 {
    500
}

impl HealthConfig {
    /// Probe on localhost with default retry settings
    pub fn local(port: u16) -> Self {
        Self {
            host: default_health_host(),
            port,
            timeout_ms: default_health_timeout_ms(),
            max_attempts: default_health_attempts(),
            interval_ms: default_health_interval_ms(),
        }
    }
}

impl Default for PanelFile {
    /// Key-value store on its default port, and the streaming agent in the
    /// sender role depending on it.
    fn default() -> Self {
        let mut services = IndexMap::new();
        services.insert(
            STORE_SERVICE.to_string(),
            ServiceConfig {
                executable: "redis-server".to_string(),
                args: ArgsValue::default(),
                working_dir: None,
                env: IndexMap::new(),
                depends_on: None,
                health: Some(HealthConfig::local(DEFAULT_STORE_PORT)),
                editable: false,
                runtime_env: false,
            },
        );
        services.insert(
            AGENT_SERVICE.to_string(),
            ServiceConfig {
                executable: "openob".to_string(),
                args: ArgsValue::Line(DEFAULT_AGENT_ARGS.to_string()),
                working_dir: None,
                env: IndexMap::new(),
                depends_on: Some(STORE_SERVICE.to_string()),
                health: None,
                editable: true,
                runtime_env: true,
            },
        );

        Self {
            version: default_version(),
            grace_period_ms: default_grace_period_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            detach_timeout_ms: default_detach_timeout_ms(),
            restart_cooldown_ms: default_restart_cooldown_ms(),
            runtime: None,
            services,
        }
    }
}

impl PanelFile {
    /// Load panel file from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PanelFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| PanelFileError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse panel file from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, PanelFileError> {
        let panel: PanelFile = serde_yaml::from_str(content).map_err(PanelFileError::Parse)?;
        panel.validate()?;
        Ok(panel)
    }

    /// Validate the panel file configuration
    pub fn validate(&self) -> Result<(), PanelFileError> {
        if self.services.is_empty() {
            return Err(PanelFileError::Validation(
                "at least one service must be defined".to_string(),
            ));
        }

        let mut editable: Option<&str> = None;

        for (name, service) in &self.services {
            if service.executable.trim().is_empty() {
                return Err(PanelFileError::Validation(format!(
                    "Service '{}': 'executable' must not be empty",
                    name
                )));
            }

            if let Some(dep) = &service.depends_on {
                if dep == name {
                    return Err(PanelFileError::Validation(format!(
                        "Service '{}': cannot depend on itself",
                        name
                    )));
                }
                if !self.services.contains_key(dep) {
                    return Err(PanelFileError::Validation(format!(
                        "Service '{}': depends on unknown service '{}'",
                        name, dep
                    )));
                }
            }

            if let Some(health) = &service.health {
                if health.max_attempts == 0 {
                    return Err(PanelFileError::Validation(format!(
                        "Service '{}': health 'max_attempts' must be at least 1",
                        name
                    )));
                }
            }

            if service.editable {
                if let Some(other) = editable {
                    return Err(PanelFileError::Validation(format!(
                        "Services '{}' and '{}' are both editable; only one may be",
                        other, name
                    )));
                }
                if service.args.to_tokens().is_empty() {
                    return Err(PanelFileError::Validation(format!(
                        "Service '{}': editable arguments must not be empty",
                        name
                    )));
                }
                editable = Some(name);
            }
        }

        Ok(())
    }

    /// Name of the service whose arguments the operator may edit
    pub fn editable_service(&self) -> Option<&str> {
        self.services
            .iter()
            .find(|(_, s)| s.editable)
            .map(|(name, _)| name.as_str())
    }
}

/// Errors that can occur when loading a panel file
#[derive(Debug, thiserror::Error)]
pub enum PanelFileError {
    #[error("Failed to read panel file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse panel file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

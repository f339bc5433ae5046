//! Service specifications and the operator-editable argument line

use crate::config::env::EnvOverlay;
use crate::config::panel_file::{PanelFile, PanelFileError};
use crate::runtime::health::HealthProbe;
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// How to launch one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Service name (for logging and status)
    pub name: String,
    /// Executable path
    pub executable: PathBuf,
    /// Command line arguments
    pub args: Vec<String>,
    /// Working directory
    pub working_dir: Option<PathBuf>,
    /// Additions to the inherited environment
    pub env: EnvOverlay,
    /// Service that must be running and healthy first
    pub depends_on: Option<String>,
    /// Readiness probe
    pub health: Option<HealthProbe>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            args: Vec::new(),
            working_dir: None,
            env: EnvOverlay::default(),
            depends_on: None,
            health: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, env: EnvOverlay) -> Self {
        self.env = env;
        self
    }

    pub fn depends_on(mut self, service: impl Into<String>) -> Self {
        self.depends_on = Some(service.into());
        self
    }

    pub fn with_health(mut self, probe: HealthProbe) -> Self {
        self.health = Some(probe);
        self
    }

    /// Command line as shown to the operator
    pub fn command_line(&self) -> String {
        let mut line = self.executable.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

struct StoreInner {
    specs: IndexMap<String, ServiceSpec>,
    editable: Option<String>,
}

/// Holds the service specifications.
///
/// Readers always get a copy so a running supervisor never observes an edit
/// half-way through.
pub struct ConfigStore {
    inner: RwLock<StoreInner>,
}

impl ConfigStore {
    /// Build a store from explicit specs. `editable` names the service whose
    /// arguments may be replaced with [`ConfigStore::set_arguments`].
    pub fn new(
        specs: impl IntoIterator<Item = ServiceSpec>,
        editable: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let specs: IndexMap<String, ServiceSpec> =
            specs.into_iter().map(|s| (s.name.clone(), s)).collect();

        if let Some(name) = editable {
            if !specs.contains_key(name) {
                return Err(ConfigError::UnknownService(name.to_string()));
            }
        }

        Ok(Self {
            inner: RwLock::new(StoreInner {
                specs,
                editable: editable.map(String::from),
            }),
        })
    }

    /// Build a store from a validated panel file
    pub fn from_panel(panel: &PanelFile) -> Result<Self, ConfigError> {
        panel.validate()?;

        let runtime = panel.runtime.as_ref().map(|rt| rt.overlay());
        let specs = panel.services.iter().map(|(name, service)| {
            let mut env = service
                .env
                .iter()
                .fold(EnvOverlay::default(), |env, (k, v)| env.with_var(k, v));
            if service.runtime_env {
                match &runtime {
                    Some(overlay) => env = env.merge(overlay.clone()),
                    None => log::debug!("[{}] runtime_env set but no runtime configured", name),
                }
            }

            ServiceSpec {
                name: name.clone(),
                executable: PathBuf::from(&service.executable),
                args: service.args.to_tokens(),
                working_dir: service.working_dir.as_ref().map(PathBuf::from),
                env,
                depends_on: service.depends_on.clone(),
                health: service.health.as_ref().map(HealthProbe::from),
            }
        });

        Self::new(specs.collect::<Vec<_>>(), panel.editable_service())
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of one service spec
    pub fn get_spec(&self, name: &str) -> Result<ServiceSpec, ConfigError> {
        self.read()
            .specs
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownService(name.to_string()))
    }

    /// Snapshot of all specs in declaration order
    pub fn specs(&self) -> Vec<ServiceSpec> {
        self.read().specs.values().cloned().collect()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.read().specs.keys().cloned().collect()
    }

    pub fn editable_service(&self) -> Option<String> {
        self.read().editable.clone()
    }

    /// Current arguments of the editable service as one line
    pub fn arguments(&self) -> Option<String> {
        let inner = self.read();
        let name = inner.editable.as_ref()?;
        inner.specs.get(name).map(|s| s.args.join(" "))
    }

    /// Replace the editable service's arguments.
    ///
    /// The text is split on whitespace; an empty result is rejected and the
    /// previous arguments are kept.
    pub fn set_arguments(&self, text: &str) -> Result<Vec<String>, ConfigError> {
        let tokens = tokenize(text)?;
        let mut inner = self.write();
        let name = inner.editable.clone().ok_or(ConfigError::NotEditable)?;
        let spec = inner
            .specs
            .get_mut(&name)
            .ok_or_else(|| ConfigError::UnknownService(name.clone()))?;
        spec.args = tokens.clone();
        log::info!("[{}] Arguments set to: {}", name, tokens.join(" "));
        Ok(tokens)
    }
}

/// Split an argument line on whitespace
pub fn tokenize(text: &str) -> Result<Vec<String>, ConfigError> {
    let tokens: Vec<String> = text.split_whitespace().map(String::from).collect();
    if tokens.is_empty() {
        return Err(ConfigError::InvalidArguments(
            "argument list must not be empty".to_string(),
        ));
    }
    Ok(tokens)
}

/// Errors raised by the configuration store
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("No service has editable arguments")]
    NotEditable,

    #[error(transparent)]
    Panel(#[from] PanelFileError),
}

//! Environment overlay for spawned services
//!
//! The streaming agent loads native plugins from the streaming runtime's
//! installation, so its environment needs the runtime's directories in front
//! of the inherited search paths. The overlay is additive: nothing inherited
//! is removed.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;

/// Executable search path variable
pub const SEARCH_PATH_VAR: &str = "PATH";
/// Typelib discovery variable used by the runtime's introspection bindings
pub const TYPELIB_PATH_VAR: &str = "GI_TYPELIB_PATH";
/// Native plugin discovery variable
pub const PLUGIN_PATH_VAR: &str = "GST_PLUGIN_PATH";

/// Location of the streaming runtime installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeEnv {
    /// Directory holding the runtime's binaries and shared libraries
    pub bin_dir: PathBuf,
    /// Directory holding the runtime's typelib files
    pub typelib_dir: PathBuf,
    /// Optional plugin directory
    #[serde(default)]
    pub plugin_dir: Option<PathBuf>,
}

impl RuntimeEnv {
    /// Build the overlay this runtime contributes to a service environment
    pub fn overlay(&self) -> EnvOverlay {
        let mut overlay = EnvOverlay::default()
            .prepend(SEARCH_PATH_VAR, self.bin_dir.clone())
            .prepend(TYPELIB_PATH_VAR, self.typelib_dir.clone());
        if let Some(dir) = &self.plugin_dir {
            overlay = overlay.prepend(PLUGIN_PATH_VAR, dir.clone());
        }
        overlay
    }
}

/// Additions applied on top of the inherited process environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    /// Variables set verbatim
    pub set: IndexMap<String, String>,
    /// Directories prepended to path-list variables
    pub prepend: IndexMap<String, Vec<PathBuf>>,
}

impl EnvOverlay {
    /// Set a variable verbatim
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set.insert(name.into(), value.into());
        self
    }

    /// Prepend a directory to a path-list variable
    pub fn prepend(mut self, name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        self.prepend.entry(name.into()).or_default().push(dir.into());
        self
    }

    /// Merge another overlay into this one
    pub fn merge(mut self, other: EnvOverlay) -> Self {
        self.set.extend(other.set);
        for (name, dirs) in other.prepend {
            self.prepend.entry(name).or_default().extend(dirs);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.prepend.is_empty()
    }

    /// Resolve against the inherited environment.
    ///
    /// `inherited` looks up the current value of a variable. Prepended
    /// directories come first, followed by the inherited entries.
    pub fn resolve<F>(
        &self,
        inherited: F,
    ) -> Result<Vec<(String, OsString)>, std::env::JoinPathsError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let mut vars: Vec<(String, OsString)> = self
            .set
            .iter()
            .map(|(k, v)| (k.clone(), OsString::from(v)))
            .collect();

        for (name, dirs) in &self.prepend {
            let mut entries: Vec<PathBuf> = dirs.clone();
            if let Some(current) = inherited(name) {
                entries.extend(std::env::split_paths(&current));
            }
            vars.push((name.clone(), std::env::join_paths(entries)?));
        }

        Ok(vars)
    }

    /// Resolve against this process's environment
    pub fn resolve_current(&self) -> Result<Vec<(String, OsString)>, std::env::JoinPathsError> {
        self.resolve(|name| std::env::var_os(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn runtime() -> RuntimeEnv {
        RuntimeEnv {
            bin_dir: PathBuf::from("/opt/runtime/bin"),
            typelib_dir: PathBuf::from("/opt/runtime/lib/girepository-1.0"),
            plugin_dir: None,
        }
    }

    #[test]
    fn test_overlay_is_additive() {
        let inherited: HashMap<&str, OsString> =
            [("PATH", OsString::from("/usr/bin"))].into_iter().collect();
        let vars = runtime()
            .overlay()
            .resolve(|name| inherited.get(name).cloned())
            .unwrap();
        let vars: HashMap<_, _> = vars.into_iter().collect();

        let path: Vec<PathBuf> = std::env::split_paths(&vars["PATH"]).collect();
        assert_eq!(
            path,
            vec![PathBuf::from("/opt/runtime/bin"), PathBuf::from("/usr/bin")]
        );
        assert_eq!(
            vars["GI_TYPELIB_PATH"],
            OsString::from("/opt/runtime/lib/girepository-1.0")
        );
        assert!(!vars.contains_key(PLUGIN_PATH_VAR));
    }

    #[test]
    fn test_plugin_dir_and_verbatim_vars() {
        let mut rt = runtime();
        rt.plugin_dir = Some(PathBuf::from("/opt/runtime/plugins"));
        let overlay = EnvOverlay::default()
            .with_var("OB_MODE", "tx")
            .merge(rt.overlay());
        let vars: HashMap<_, _> = overlay.resolve(|_| None).unwrap().into_iter().collect();

        assert_eq!(vars["OB_MODE"], OsString::from("tx"));
        assert_eq!(vars[PLUGIN_PATH_VAR], OsString::from("/opt/runtime/plugins"));
    }

    #[test]
    fn test_empty_overlay() {
        let overlay = EnvOverlay::default();
        assert!(overlay.is_empty());
        assert!(overlay.resolve(|_| None).unwrap().is_empty());
    }
}

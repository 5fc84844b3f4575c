//! Snapshot of the process environment consulted by the resolver.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Variable naming the simulator executable directly.
pub const ENV_EXECUTABLE: &str = "ENERGYPLUS_EXE";
/// Variable naming the `Energy+.idd` schema file directly.
pub const ENV_SCHEMA: &str = "ENERGYPLUS_IDD";
/// Installation-root variables, consulted in this order.
pub const ENV_HOME_VARS: [&str; 2] = ["ENERGYPLUS_HOME", "EPLUS_HOME"];

/// Schema file name shipped with every installation.
pub const SCHEMA_FILE_NAME: &str = "Energy+.idd";

/// Environment inputs for resolution.
///
/// Resolution never reads `std::env` itself; it reads one of these. Binaries
/// capture the live process with [`ResolverEnv::from_process`], tests build
/// one by hand so nothing global is mutated.
#[derive(Debug, Clone, Default)]
pub struct ResolverEnv {
    vars: BTreeMap<String, String>,
    /// Directories of the process search path, in order.
    pub search_path: Vec<PathBuf>,
    /// Parent directories scanned for `EnergyPlus*` installation folders.
    pub install_parents: Vec<PathBuf>,
    /// Working directory used as the last schema fallback.
    pub cwd: Option<PathBuf>,
    /// Selects `energyplus.exe` and Windows install locations.
    pub windows: bool,
}

impl ResolverEnv {
    /// Capture the current process environment.
    pub fn from_process() -> Self {
        let vars: BTreeMap<String, String> = std::env::vars()
            .filter(|(k, _)| {
                k == ENV_EXECUTABLE || k == ENV_SCHEMA || ENV_HOME_VARS.contains(&k.as_str())
            })
            .collect();
        let search_path = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        let windows = cfg!(windows);

        Self {
            vars,
            search_path,
            install_parents: default_install_parents(windows),
            cwd: std::env::current_dir().ok(),
            windows,
        }
    }

    /// Empty environment: no variables, no search path, no install dirs.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Set a variable (builder style).
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_search_path(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_path = dirs;
        self
    }

    pub fn with_install_parents(mut self, dirs: Vec<PathBuf>) -> Self {
        self.install_parents = dirs;
        self
    }

    pub fn with_cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Non-empty value of `key`, if set.
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// File name of the simulator executable on this platform.
    pub fn executable_name(&self) -> &'static str {
        if self.windows {
            "energyplus.exe"
        } else {
            "energyplus"
        }
    }
}

/// Conventional parents of `EnergyPlus*` installation folders.
pub fn default_install_parents(windows: bool) -> Vec<PathBuf> {
    if windows {
        let mut parents = Vec::new();
        let drive = std::env::var("SystemDrive").unwrap_or_else(|_| "C:".to_string());
        parents.push(PathBuf::from(format!("{drive}\\")));
        for key in ["ProgramFiles", "ProgramFiles(x86)"] {
            if let Ok(dir) = std::env::var(key) {
                parents.push(PathBuf::from(dir));
            }
        }
        parents
    } else {
        ["/usr/local", "/opt", "/Applications"]
            .iter()
            .map(PathBuf::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_variables_count_as_unset() {
        let env = ResolverEnv::empty()
            .with_var(ENV_EXECUTABLE, "   ")
            .with_var(ENV_SCHEMA, "/x/Energy+.idd");
        assert_eq!(env.var(ENV_EXECUTABLE), None);
        assert_eq!(env.var(ENV_SCHEMA), Some("/x/Energy+.idd"));
    }

    #[test]
    fn executable_name_follows_platform() {
        let mut env = ResolverEnv::empty();
        assert_eq!(env.executable_name(), "energyplus");
        env.windows = true;
        assert_eq!(env.executable_name(), "energyplus.exe");
    }

    #[test]
    fn unix_install_parents_are_fixed() {
        let parents = default_install_parents(false);
        assert_eq!(parents[0], PathBuf::from("/usr/local"));
        assert_eq!(parents.len(), 3);
    }
}

//! Ordered discovery strategies.
//!
//! Each chain is a static slice of [`Strategy`] values evaluated front to
//! back; the first lookup that lands on an existing file wins. Adding a source
//! means adding an entry here, not touching the evaluation loop.

use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use super::env::{ResolverEnv, ENV_EXECUTABLE, ENV_HOME_VARS, ENV_SCHEMA, SCHEMA_FILE_NAME};
use super::Overrides;

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)energyplus(?:v|-)?(\d+)(?:[._-](\d+))?(?:[._-](\d+))?")
        .expect("version pattern is a valid regex")
});

/// Inputs visible to a lookup.
pub struct LookupContext<'a> {
    pub env: &'a ResolverEnv,
    pub overrides: &'a Overrides,
    /// Executable resolved by the first chain, if any.
    pub executable: Option<&'a Path>,
}

/// What a single lookup observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The source is not configured (variable unset, no override given).
    Unset,
    /// A concrete candidate was derived but is not an existing file.
    Missing(PathBuf),
    /// A set of locations was searched without a match.
    Searched { locations: usize },
    /// An existing file.
    Found(PathBuf),
}

/// One discovery source.
pub struct Strategy {
    /// Stable label shown in traces and doctor output.
    pub step: &'static str,
    /// A missing candidate from this step fails resolution outright.
    pub authoritative: bool,
    pub lookup: fn(&LookupContext<'_>) -> Lookup,
}

/// Executable discovery order.
pub static EXECUTABLE_CHAIN: &[Strategy] = &[
    Strategy {
        step: "override",
        authoritative: true,
        lookup: exe_override,
    },
    Strategy {
        step: "env ENERGYPLUS_EXE",
        authoritative: false,
        lookup: exe_env,
    },
    Strategy {
        step: "env ENERGYPLUS_HOME",
        authoritative: false,
        lookup: exe_primary_home,
    },
    Strategy {
        step: "env EPLUS_HOME",
        authoritative: false,
        lookup: exe_secondary_home,
    },
    Strategy {
        step: "PATH",
        authoritative: false,
        lookup: exe_search_path,
    },
    Strategy {
        step: "install dirs",
        authoritative: false,
        lookup: exe_install_dirs,
    },
];

/// Schema (`Energy+.idd`) discovery order.
pub static SCHEMA_CHAIN: &[Strategy] = &[
    Strategy {
        step: "override",
        authoritative: true,
        lookup: idd_override,
    },
    Strategy {
        step: "env ENERGYPLUS_IDD",
        authoritative: false,
        lookup: idd_env,
    },
    Strategy {
        step: "env ENERGYPLUS_HOME",
        authoritative: false,
        lookup: idd_primary_home,
    },
    Strategy {
        step: "env EPLUS_HOME",
        authoritative: false,
        lookup: idd_secondary_home,
    },
    Strategy {
        step: "executable dir",
        authoritative: false,
        lookup: idd_next_to_executable,
    },
    Strategy {
        step: "install dirs",
        authoritative: false,
        lookup: idd_install_dirs,
    },
    Strategy {
        step: "model dir",
        authoritative: false,
        lookup: idd_model_dir,
    },
    Strategy {
        step: "cwd",
        authoritative: false,
        lookup: idd_cwd,
    },
];

// ---------------------------------------------------------------------------
// Lookup helpers
// ---------------------------------------------------------------------------

fn check(candidate: PathBuf) -> Lookup {
    if candidate.is_file() {
        Lookup::Found(candidate)
    } else {
        Lookup::Missing(candidate)
    }
}

fn check_opt(candidate: Option<PathBuf>) -> Lookup {
    candidate.map(check).unwrap_or(Lookup::Unset)
}

fn home_var(ctx: &LookupContext<'_>, idx: usize) -> Option<PathBuf> {
    ctx.env.var(ENV_HOME_VARS[idx]).map(PathBuf::from)
}

/// Version triple parsed from an installation folder name such as
/// `EnergyPlus-23.2.0` or `EnergyPlusV9-6-0`. Unversioned folders sort last.
pub fn version_key(name: &str) -> (u32, u32, u32) {
    let Some(caps) = VERSION_RE.captures(name) else {
        return (0, 0, 0);
    };
    let part = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(0)
    };
    (part(1), part(2), part(3))
}

/// `EnergyPlus*` folders under each install parent, parents in order and
/// newest version first within a parent.
pub fn install_roots(parents: &[PathBuf]) -> Vec<PathBuf> {
    let mut roots = Vec::new();
    for parent in parents {
        let Ok(entries) = std::fs::read_dir(parent) else {
            continue;
        };
        let mut found: Vec<(String, PathBuf)> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.to_ascii_lowercase()
                    .starts_with("energyplus")
                    .then(|| (name, e.path()))
            })
            .collect();
        found.sort_by_key(|(name, _)| (Reverse(version_key(name)), name.clone()));
        roots.extend(found.into_iter().map(|(_, path)| path));
    }
    roots
}

fn scan(candidates: Vec<PathBuf>) -> Lookup {
    let locations = candidates.len();
    candidates
        .into_iter()
        .find(|c| c.is_file())
        .map(Lookup::Found)
        .unwrap_or(Lookup::Searched { locations })
}

// ---------------------------------------------------------------------------
// Executable lookups
// ---------------------------------------------------------------------------

fn exe_override(ctx: &LookupContext<'_>) -> Lookup {
    check_opt(ctx.overrides.executable.clone())
}

fn exe_env(ctx: &LookupContext<'_>) -> Lookup {
    check_opt(ctx.env.var(ENV_EXECUTABLE).map(PathBuf::from))
}

fn exe_primary_home(ctx: &LookupContext<'_>) -> Lookup {
    check_opt(home_var(ctx, 0).map(|h| h.join(ctx.env.executable_name())))
}

fn exe_secondary_home(ctx: &LookupContext<'_>) -> Lookup {
    check_opt(home_var(ctx, 1).map(|h| h.join(ctx.env.executable_name())))
}

fn exe_search_path(ctx: &LookupContext<'_>) -> Lookup {
    let name = ctx.env.executable_name();
    scan(ctx.env.search_path.iter().map(|d| d.join(name)).collect())
}

fn exe_install_dirs(ctx: &LookupContext<'_>) -> Lookup {
    let name = ctx.env.executable_name();
    scan(
        install_roots(&ctx.env.install_parents)
            .into_iter()
            .map(|r| r.join(name))
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// Schema lookups
// ---------------------------------------------------------------------------

fn idd_override(ctx: &LookupContext<'_>) -> Lookup {
    check_opt(ctx.overrides.schema.clone())
}

fn idd_env(ctx: &LookupContext<'_>) -> Lookup {
    check_opt(ctx.env.var(ENV_SCHEMA).map(PathBuf::from))
}

fn idd_primary_home(ctx: &LookupContext<'_>) -> Lookup {
    check_opt(home_var(ctx, 0).map(|h| h.join(SCHEMA_FILE_NAME)))
}

fn idd_secondary_home(ctx: &LookupContext<'_>) -> Lookup {
    check_opt(home_var(ctx, 1).map(|h| h.join(SCHEMA_FILE_NAME)))
}

fn idd_next_to_executable(ctx: &LookupContext<'_>) -> Lookup {
    check_opt(
        ctx.executable
            .and_then(Path::parent)
            .map(|d| d.join(SCHEMA_FILE_NAME)),
    )
}

fn idd_install_dirs(ctx: &LookupContext<'_>) -> Lookup {
    scan(
        install_roots(&ctx.env.install_parents)
            .into_iter()
            .map(|r| r.join(SCHEMA_FILE_NAME))
            .collect(),
    )
}

fn idd_model_dir(ctx: &LookupContext<'_>) -> Lookup {
    check_opt(
        ctx.overrides
            .model
            .as_deref()
            .and_then(Path::parent)
            .map(|d| d.join(SCHEMA_FILE_NAME)),
    )
}

fn idd_cwd(ctx: &LookupContext<'_>) -> Lookup {
    check_opt(ctx.env.cwd.as_ref().map(|d| d.join(SCHEMA_FILE_NAME)))
}

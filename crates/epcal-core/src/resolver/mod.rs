//! Simulator discovery.
//!
//! Resolves the EnergyPlus executable and its `Energy+.idd` schema file from
//! an ordered chain of sources (explicit override, environment variables,
//! installation roots, the process search path, conventional install
//! folders). Every source consulted leaves a [`TraceEntry`], so a failed
//! lookup can always say where it looked.
//!
//! Resolution only checks file existence and lists directories; it never
//! executes anything.

pub mod chain;
pub mod doctor;
pub mod env;
pub mod error;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use chain::{Lookup, LookupContext, Strategy, EXECUTABLE_CHAIN, SCHEMA_CHAIN};
pub use doctor::{diagnose, DoctorReport, Verdict};
pub use env::ResolverEnv;
pub use error::{ResolutionError, ResolveResult};

/// The two artifacts the simulator needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    Executable,
    Schema,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Artifact::Executable => write!(f, "executable"),
            Artifact::Schema => write!(f, "schema"),
        }
    }
}

/// Outcome of one step in a discovery chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Hit,
    Miss,
}

/// Record of a single discovery step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub artifact: Artifact,
    pub step: String,
    pub outcome: Outcome,
    /// Path tried, when the step derived one.
    pub value: Option<PathBuf>,
    pub detail: String,
}

impl TraceEntry {
    fn from_lookup(artifact: Artifact, step: &str, lookup: &Lookup) -> Self {
        let (outcome, value, detail) = match lookup {
            Lookup::Unset => (Outcome::Miss, None, "(not set)".to_string()),
            Lookup::Missing(p) => (Outcome::Miss, Some(p.clone()), "not a file".to_string()),
            Lookup::Searched { locations } => (
                Outcome::Miss,
                None,
                format!("no match in {locations} location(s)"),
            ),
            Lookup::Found(p) => (Outcome::Hit, Some(p.clone()), "found".to_string()),
        };
        Self {
            artifact,
            step: step.to_string(),
            outcome,
            value,
            detail,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.outcome == Outcome::Hit
    }
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.outcome {
            Outcome::Hit => "OK",
            Outcome::Miss => "MISS",
        };
        match &self.value {
            Some(p) => write!(f, "{:<4} {}: {} ({})", status, self.step, p.display(), self.detail),
            None => write!(f, "{:<4} {}: {}", status, self.step, self.detail),
        }
    }
}

/// Render a trace as numbered lines, one per step.
pub fn render_trace(trace: &[TraceEntry]) -> String {
    trace
        .iter()
        .enumerate()
        .map(|(i, e)| format!("  [{}] {} {}", i + 1, e.artifact, e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Caller-supplied inputs that take precedence over discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub executable: Option<PathBuf>,
    pub schema: Option<PathBuf>,
    /// Model being simulated; its directory is a schema fallback.
    pub model: Option<PathBuf>,
    /// Treat an unresolved schema as fatal.
    pub require_schema: bool,
}

/// Resolved simulator paths plus the trace that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPaths {
    pub executable: PathBuf,
    /// `None` lets the simulator fall back to its bundled schema.
    pub schema: Option<PathBuf>,
    pub trace: Vec<TraceEntry>,
}

/// Outcome of walking one chain.
pub(crate) enum ChainOutcome {
    Found(PathBuf),
    NotFound,
    OverrideMissing(PathBuf),
}

/// Walk `chain` in order, appending one trace entry per evaluated step.
pub(crate) fn walk_chain(
    artifact: Artifact,
    chain: &[Strategy],
    ctx: &LookupContext<'_>,
    trace: &mut Vec<TraceEntry>,
) -> ChainOutcome {
    for strategy in chain {
        let lookup = (strategy.lookup)(ctx);
        let entry = TraceEntry::from_lookup(artifact, strategy.step, &lookup);
        debug!(artifact = %artifact, step = strategy.step, outcome = ?entry.outcome, "resolver step");
        trace.push(entry);

        match lookup {
            Lookup::Found(path) => return ChainOutcome::Found(path),
            Lookup::Missing(path) if strategy.authoritative => {
                return ChainOutcome::OverrideMissing(path)
            }
            _ => {}
        }
    }
    ChainOutcome::NotFound
}

/// Resolve executable and schema.
///
/// Guarantees:
/// - The first step yielding an existing file wins; later steps are not
///   evaluated and leave no trace entry.
/// - An explicit override that does not exist fails immediately.
/// - A missing schema is only an error when an override named one or
///   `require_schema` is set.
pub fn resolve(overrides: &Overrides, env: &ResolverEnv) -> ResolveResult<ResolvedPaths> {
    let mut trace = Vec::new();
    let ctx = LookupContext {
        env,
        overrides,
        executable: None,
    };

    let executable = match walk_chain(Artifact::Executable, EXECUTABLE_CHAIN, &ctx, &mut trace) {
        ChainOutcome::Found(p) => p,
        ChainOutcome::NotFound => return Err(ResolutionError::ExecutableNotFound { trace }),
        ChainOutcome::OverrideMissing(path) => {
            return Err(ResolutionError::OverrideMissing {
                artifact: Artifact::Executable,
                path,
                trace,
            })
        }
    };

    let ctx = LookupContext {
        executable: Some(executable.as_path()),
        ..ctx
    };
    let schema = match walk_chain(Artifact::Schema, SCHEMA_CHAIN, &ctx, &mut trace) {
        ChainOutcome::Found(p) => Some(p),
        ChainOutcome::NotFound if overrides.require_schema => {
            return Err(ResolutionError::SchemaNotFound { trace })
        }
        ChainOutcome::NotFound => None,
        ChainOutcome::OverrideMissing(path) => {
            return Err(ResolutionError::OverrideMissing {
                artifact: Artifact::Schema,
                path,
                trace,
            })
        }
    };

    Ok(ResolvedPaths {
        executable,
        schema,
        trace,
    })
}

/// Session-scoped resolution held by the caller.
///
/// Resolution is cheap but not free (directory scans); a `Toolchain` keeps
/// one result for reuse across many runs and re-resolves only on
/// [`Toolchain::refresh`].
#[derive(Debug, Clone)]
pub struct Toolchain {
    overrides: Overrides,
    env: ResolverEnv,
    resolved: ResolvedPaths,
}

impl Toolchain {
    /// Resolve once and keep the result.
    pub fn discover(overrides: Overrides, env: ResolverEnv) -> ResolveResult<Self> {
        let resolved = resolve(&overrides, &env)?;
        Ok(Self {
            overrides,
            env,
            resolved,
        })
    }

    /// Wrap already-resolved paths (e.g. from a previous session).
    pub fn from_resolved(resolved: ResolvedPaths) -> Self {
        Self {
            overrides: Overrides {
                executable: Some(resolved.executable.clone()),
                schema: resolved.schema.clone(),
                ..Overrides::default()
            },
            env: ResolverEnv::empty(),
            resolved,
        }
    }

    pub fn paths(&self) -> &ResolvedPaths {
        &self.resolved
    }

    pub fn executable(&self) -> &Path {
        &self.resolved.executable
    }

    pub fn schema(&self) -> Option<&Path> {
        self.resolved.schema.as_deref()
    }

    /// Re-run discovery with the same inputs, e.g. after an install.
    pub fn refresh(&mut self) -> ResolveResult<&ResolvedPaths> {
        self.resolved = resolve(&self.overrides, &self.env)?;
        Ok(&self.resolved)
    }
}

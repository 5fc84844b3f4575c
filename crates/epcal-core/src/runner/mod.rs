//! Simulator invocation: validation, command assembly, bounded execution.

pub mod error;
pub mod process;
pub mod result;
pub mod spec;

pub use error::{RunError, RunnerResult};
pub use process::{ProcessRunner, SimulationExecutor, OUTPUT_TAIL_CHARS};
pub use result::{RunResult, RunStatus};
pub use spec::{model_uses_templates, OverridePaths, RunSpec, DEFAULT_TIMEOUT_SECS};

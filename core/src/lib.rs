pub mod config;
pub mod registry;
pub mod report;
pub mod runner;
pub mod validation;

pub use config::{bootstrap_registry, cleanup_registry, BootstrapConfig, ConfigError, DatasetSpec};
pub use registry::{
    Action, FileKind, PlanSummary, Precondition, RegistryError, Step, StepRegistry, StepSummary,
};
pub use report::{count_statuses, render, render_table, StatusCounts};
pub use runner::{
    CancelToken, RunOptions, RunReport, RunStatus, Runner, StepOutcome, StepStatus,
};
pub use validation::{validate_config, validate_selection, Diagnostic, DiagnosticLevel};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

/// A single named unit of setup work: a capability precondition, an
/// idempotent action, and a flag marking whether failure halts the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub description: String,
    pub precondition: Precondition,
    pub action: Action,
    pub fatal: bool,
}

impl Step {
    pub fn new(id: impl Into<String>, description: impl Into<String>, action: Action) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            precondition: Precondition::Always,
            action,
            fatal: false,
        }
    }

    pub fn with_precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = precondition;
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

/// Read-only capability check evaluated before a step's action. An unmet
/// precondition records the step as skipped, never as failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Precondition {
    Always,
    ToolInstalled { tool: String },
    PathExists { path: PathBuf },
    PathMissing { path: PathBuf },
    EnvSet { name: String },
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precondition::Always => write!(f, "always"),
            Precondition::ToolInstalled { tool } => write!(f, "tool '{tool}' installed"),
            Precondition::PathExists { path } => write!(f, "path {} exists", path.display()),
            Precondition::PathMissing { path } => write!(f, "path {} missing", path.display()),
            Precondition::EnvSet { name } => write!(f, "env var '{name}' set"),
        }
    }
}

/// Declared payload kind for fetched datasets. Handlers are looked up by
/// this tag rather than by sniffing file extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Csv,
    Json,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Csv => "csv",
            FileKind::Json => "json",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

/// The side-effecting half of a step. All filesystem writes and subprocess
/// invocations live here; the runner itself only dispatches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Resolve a tool on PATH and fail when it is absent.
    CheckTool { tool: String },
    /// Create every listed directory, parents included.
    EnsureDirs { paths: Vec<PathBuf> },
    /// Run a command line, optionally with extra args and a working directory.
    Command {
        run: String,
        #[serde(default)]
        args: Option<String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
    /// Download a file with a single `curl --fail` invocation and verify the
    /// payload with the handler for its declared kind.
    Fetch {
        url: String,
        dest: PathBuf,
        file_kind: FileKind,
    },
    /// Delete every listed file or directory that exists.
    RemovePaths { paths: Vec<PathBuf> },
}

impl Action {
    /// One-line description of what the action would do, used verbatim for
    /// dry-run outcomes.
    pub fn describe(&self) -> String {
        match self {
            Action::CheckTool { tool } => format!("check that '{tool}' is on PATH"),
            Action::EnsureDirs { paths } => {
                let joined: Vec<String> =
                    paths.iter().map(|p| p.display().to_string()).collect();
                format!("create directories: {}", joined.join(", "))
            }
            Action::Command { run, args, cwd } => {
                let mut line = format!("run `{run}`");
                if let Some(args) = args {
                    line.push_str(&format!(" with args `{args}`"));
                }
                if let Some(cwd) = cwd {
                    line.push_str(&format!(" in {}", cwd.display()));
                }
                line
            }
            Action::Fetch {
                url,
                dest,
                file_kind,
            } => format!(
                "fetch {} -> {} ({})",
                url,
                dest.display(),
                file_kind.as_str()
            ),
            Action::RemovePaths { paths } => {
                let joined: Vec<String> =
                    paths.iter().map(|p| p.display().to_string()).collect();
                format!("remove: {}", joined.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),
    #[error("step id cannot be empty")]
    EmptyStepId,
}

/// Ordered collection of steps. Registration order is execution order and
/// ids are unique within one registry.
#[derive(Debug, Default)]
pub struct StepRegistry {
    steps: Vec<Step>,
    ids: HashSet<String>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, step: Step) -> Result<(), RegistryError> {
        if step.id.trim().is_empty() {
            return Err(RegistryError::EmptyStepId);
        }
        if !self.ids.insert(step.id.clone()) {
            return Err(RegistryError::DuplicateStep(step.id));
        }
        self.steps.push(step);
        Ok(())
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            total_steps: self.steps.len(),
            fatal_steps: self.steps.iter().filter(|step| step.fatal).count(),
            steps: self
                .steps
                .iter()
                .map(|step| StepSummary {
                    id: step.id.clone(),
                    description: step.description.clone(),
                    precondition: step.precondition.to_string(),
                    action: step.action.describe(),
                    fatal: step.fatal,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSummary {
    pub total_steps: usize,
    pub fatal_steps: usize,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSummary {
    pub id: String,
    pub description: String,
    pub precondition: String,
    pub action: String,
    pub fatal: bool,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Steps: {} ({} fatal)",
            self.total_steps, self.fatal_steps
        )?;
        for step in &self.steps {
            let marker = if step.fatal { " [fatal]" } else { "" };
            writeln!(f, "  - {}{}: {}", step.id, marker, step.description)?;
            writeln!(f, "      when: {}", step.precondition)?;
            writeln!(f, "      does: {}", step.action)?;
        }
        Ok(())
    }
}

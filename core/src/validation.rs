use crate::config::BootstrapConfig;
use crate::registry::StepRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub location: Option<String>,
    pub message: String,
}

impl Diagnostic {
    fn error(location: Option<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            location,
            message: message.into(),
        }
    }

    fn warning(location: Option<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            location,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.level, DiagnosticLevel::Error)
    }
}

struct ValidationContext {
    location: Option<String>,
    diagnostics: Vec<Diagnostic>,
}

impl ValidationContext {
    fn new() -> Self {
        Self {
            location: None,
            diagnostics: Vec::new(),
        }
    }

    fn at(&mut self, location: impl Into<String>) {
        self.location = Some(location.into());
    }

    fn top_level(&mut self) {
        self.location = None;
    }

    fn error(&mut self, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::error(self.location.clone(), message));
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::warning(self.location.clone(), message));
    }

    fn finish(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

/// Validate a config before building a plan from it. Errors make the config
/// unusable; warnings flag likely mistakes that still produce a valid plan.
pub fn validate_config(config: &BootstrapConfig) -> Vec<Diagnostic> {
    let mut ctx = ValidationContext::new();

    if config.python.trim().is_empty() {
        ctx.error("python interpreter name cannot be empty");
    }
    if config.venv_dir.as_os_str().is_empty() {
        ctx.error("venv_dir cannot be empty");
    }
    if config.data_dir.as_os_str().is_empty() {
        ctx.error("data_dir cannot be empty");
    }
    if config.requirements.as_os_str().is_empty() {
        ctx.error("requirements path cannot be empty");
    }
    if config.generate_docs && config.docs_source == config.docs_output {
        ctx.error("docs_source and docs_output cannot be the same path");
    }

    let mut seen = HashSet::new();
    for dataset in &config.datasets {
        ctx.at(format!("dataset {}", dataset.name));

        if dataset.name.trim().is_empty() {
            ctx.error("dataset name cannot be empty");
        } else if !seen.insert(dataset.name.clone()) {
            ctx.error(format!("dataset name '{}' is declared twice", dataset.name));
        }

        if dataset.url.trim().is_empty() {
            ctx.error("dataset url cannot be empty");
        } else if !dataset.url.starts_with("http://") && !dataset.url.starts_with("https://") {
            ctx.warning(format!(
                "url '{}' is not http(s); curl may not support it",
                dataset.url
            ));
        }

        if let Some(dest) = &dataset.dest {
            let declared = dataset.file_kind.extension();
            match dest.extension().and_then(|ext| ext.to_str()) {
                Some(ext) if ext.eq_ignore_ascii_case(declared) => {}
                Some(ext) => ctx.warning(format!(
                    "dest extension '.{ext}' does not match declared kind '{declared}'"
                )),
                None => ctx.warning(format!(
                    "dest has no extension; declared kind is '{declared}'"
                )),
            }
        }
    }
    ctx.top_level();

    ctx.finish()
}

/// Validate a `--step` subset against the registry it will run on. Unknown
/// ids are errors so a typo cannot silently skip the whole run.
pub fn validate_selection(registry: &StepRegistry, only: &[String]) -> Vec<Diagnostic> {
    let mut ctx = ValidationContext::new();
    let mut seen = HashSet::new();

    for id in only {
        if !registry.contains(id) {
            ctx.error(format!("unknown step id '{id}'"));
        }
        if !seen.insert(id.as_str()) {
            ctx.warning(format!("step id '{id}' selected more than once"));
        }
    }

    ctx.finish()
}

use crate::registry::{Action, FileKind, Precondition, Step, StepRegistry};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;

/// Options for a single run. `only` restricts execution to the named steps;
/// everything else is recorded as skipped so outcome order still matches
/// registration order.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub verbose: bool,
    pub only: Option<Vec<String>>,
}

/// Cooperative cancellation flag checked between steps. Steps themselves are
/// never interrupted mid-action.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct Runner;

impl Runner {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&self, registry: &StepRegistry, options: &RunOptions) -> RunReport {
        self.run_with_cancel(registry, options, &CancelToken::new())
    }

    pub fn run_with_cancel(
        &self,
        registry: &StepRegistry,
        options: &RunOptions,
        cancel: &CancelToken,
    ) -> RunReport {
        let started_at = OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());
        let timer = Instant::now();

        let mut outcomes = Vec::with_capacity(registry.len());
        let mut halted_by: Option<String> = None;
        let mut cancelled = false;

        for step in registry.steps() {
            if let Some(fatal_id) = &halted_by {
                outcomes.push(StepOutcome::skipped(
                    &step.id,
                    format!("halted by fatal failure of '{fatal_id}'"),
                    0,
                ));
                continue;
            }

            if cancelled || cancel.is_cancelled() {
                cancelled = true;
                outcomes.push(StepOutcome::skipped(&step.id, "run cancelled", 0));
                continue;
            }

            if let Some(only) = &options.only {
                if !only.iter().any(|id| id == &step.id) {
                    outcomes.push(StepOutcome::skipped(&step.id, "not selected", 0));
                    continue;
                }
            }

            if options.verbose {
                eprintln!("[run] {}: {}", step.id, step.description);
            }

            let outcome = self.execute_step(step, options);
            if options.verbose {
                eprintln!("[run] {} -> {}", step.id, outcome.status);
            }
            if outcome.status == StepStatus::Failed && step.fatal {
                halted_by = Some(step.id.clone());
            }
            outcomes.push(outcome);
        }

        let status = if halted_by.is_some() || cancelled {
            RunStatus::Failed
        } else {
            RunStatus::Success
        };

        RunReport {
            outcomes,
            status,
            started_at,
            duration_ms: timer.elapsed().as_millis(),
        }
    }

    fn execute_step(&self, step: &Step, options: &RunOptions) -> StepOutcome {
        let timer = Instant::now();

        if let Err(reason) = check_precondition(&step.precondition) {
            return StepOutcome::skipped(&step.id, reason, timer.elapsed().as_millis());
        }

        if options.dry_run {
            return StepOutcome::succeeded(
                &step.id,
                format!("(dry-run) would {}", step.action.describe()),
                timer.elapsed().as_millis(),
            );
        }

        match execute_action(&step.action) {
            Ok(message) => StepOutcome::succeeded(&step.id, message, timer.elapsed().as_millis()),
            Err(message) => StepOutcome::failed(&step.id, message, timer.elapsed().as_millis()),
        }
    }
}

fn check_precondition(precondition: &Precondition) -> Result<(), String> {
    match precondition {
        Precondition::Always => Ok(()),
        Precondition::ToolInstalled { tool } => match which::which(tool) {
            Ok(_) => Ok(()),
            Err(_) => Err(format!("tool '{tool}' is not installed")),
        },
        Precondition::PathExists { path } => {
            if path.exists() {
                Ok(())
            } else {
                Err(format!("path {} does not exist", path.display()))
            }
        }
        Precondition::PathMissing { path } => {
            if path.exists() {
                Err(format!("path {} already present", path.display()))
            } else {
                Ok(())
            }
        }
        Precondition::EnvSet { name } => match env::var(name) {
            Ok(value) if !value.trim().is_empty() => Ok(()),
            _ => Err(format!("environment variable '{name}' is not set")),
        },
    }
}

fn execute_action(action: &Action) -> Result<String, String> {
    match action {
        Action::CheckTool { tool } => match which::which(tool) {
            Ok(path) => Ok(format!("found '{}' at {}", tool, path.display())),
            Err(_) => Err(format!("tool '{tool}' not found on PATH")),
        },
        Action::EnsureDirs { paths } => {
            for path in paths {
                fs::create_dir_all(path)
                    .map_err(|err| format!("failed to create {}: {err}", path.display()))?;
            }
            Ok(format!("ensured {} directory(ies)", paths.len()))
        }
        Action::Command { run, args, cwd } => execute_command(run, args.as_deref(), cwd.as_deref()),
        Action::Fetch {
            url,
            dest,
            file_kind,
        } => execute_fetch(url, dest, *file_kind),
        Action::RemovePaths { paths } => {
            let mut removed = 0usize;
            for path in paths {
                if path.is_dir() {
                    fs::remove_dir_all(path)
                        .map_err(|err| format!("failed to remove {}: {err}", path.display()))?;
                    removed += 1;
                } else if path.exists() {
                    fs::remove_file(path)
                        .map_err(|err| format!("failed to remove {}: {err}", path.display()))?;
                    removed += 1;
                }
            }
            Ok(format!("removed {removed} of {} path(s)", paths.len()))
        }
    }
}

fn execute_command(run: &str, args: Option<&str>, cwd: Option<&Path>) -> Result<String, String> {
    let mut parts = shell_words::split(run)
        .map_err(|err| format!("failed to parse command line: {err}"))?;
    if parts.is_empty() {
        return Err("command line produced no executable".to_string());
    }

    let program = parts.remove(0);
    let mut invocation = vec![program.clone()];
    let mut cmd = Command::new(&program);
    for arg in parts {
        cmd.arg(&arg);
        invocation.push(arg);
    }

    if let Some(extra) = args {
        let extra_parts =
            shell_words::split(extra).map_err(|err| format!("failed to parse args: {err}"))?;
        for arg in extra_parts {
            cmd.arg(&arg);
            invocation.push(arg);
        }
    }

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    match cmd.output() {
        Ok(output) => {
            if output.status.success() {
                Ok(format!("`{}` exited with code 0", invocation.join(" ")))
            } else {
                Err(format!(
                    "`{}` exited with code {:?}\nstderr:\n{}",
                    invocation.join(" "),
                    output.status.code(),
                    truncate_output(&output.stderr)
                ))
            }
        }
        Err(err) => Err(format!("failed to spawn '{program}': {err}")),
    }
}

fn execute_fetch(url: &str, dest: &Path, kind: FileKind) -> Result<String, String> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed to create {}: {err}", parent.display()))?;
    }

    // Single attempt, no retry. curl --fail turns HTTP errors into a
    // non-zero exit instead of saving the error body.
    let output = Command::new("curl")
        .arg("--fail")
        .arg("--silent")
        .arg("--show-error")
        .arg("--location")
        .arg("--output")
        .arg(dest)
        .arg(url)
        .output()
        .map_err(|err| format!("failed to spawn 'curl': {err}"))?;

    if !output.status.success() {
        return Err(format!(
            "curl exited with code {:?} for {url}\nstderr:\n{}",
            output.status.code(),
            truncate_output(&output.stderr)
        ));
    }

    handler_for(kind).verify(dest)?;
    Ok(format!(
        "fetched {url} -> {} ({} payload verified)",
        dest.display(),
        kind.as_str()
    ))
}

/// Payload verification keyed by declared file kind.
pub trait FileHandler {
    fn verify(&self, path: &Path) -> Result<(), String>;
}

struct CsvHandler;
struct JsonHandler;

impl FileHandler for CsvHandler {
    fn verify(&self, path: &Path) -> Result<(), String> {
        let contents = fs::read_to_string(path)
            .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
        match contents.lines().find(|line| !line.trim().is_empty()) {
            Some(_) => Ok(()),
            None => Err(format!("{} has no csv header line", path.display())),
        }
    }
}

impl FileHandler for JsonHandler {
    fn verify(&self, path: &Path) -> Result<(), String> {
        let contents = fs::read_to_string(path)
            .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
        serde_json::from_str::<serde_json::Value>(&contents)
            .map(|_| ())
            .map_err(|err| format!("{} is not valid json: {err}", path.display()))
    }
}

pub fn handler_for(kind: FileKind) -> &'static dyn FileHandler {
    match kind {
        FileKind::Csv => &CsvHandler,
        FileKind::Json => &JsonHandler,
    }
}

fn truncate_output(bytes: &[u8]) -> String {
    const MAX: usize = 512;
    let text = String::from_utf8_lossy(bytes);
    if text.len() > MAX {
        let cut = text
            .char_indices()
            .take_while(|(idx, _)| *idx < MAX)
            .map(|(idx, ch)| idx + ch.len_utf8())
            .last()
            .unwrap_or(0);
        format!("{}...", &text[..cut])
    } else {
        text.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub id: String,
    pub status: StepStatus,
    pub message: Option<String>,
    pub duration_ms: u128,
}

impl StepOutcome {
    pub fn succeeded(id: &str, message: impl Into<String>, duration_ms: u128) -> Self {
        Self {
            id: id.to_string(),
            status: StepStatus::Succeeded,
            message: Some(message.into()),
            duration_ms,
        }
    }

    pub fn failed(id: &str, message: impl Into<String>, duration_ms: u128) -> Self {
        Self {
            id: id.to_string(),
            status: StepStatus::Failed,
            message: Some(message.into()),
            duration_ms,
        }
    }

    pub fn skipped(id: &str, message: impl Into<String>, duration_ms: u128) -> Self {
        Self {
            id: id.to_string(),
            status: StepStatus::Skipped,
            message: Some(message.into()),
            duration_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    Skipped,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Succeeded => "succeeded",
            StepStatus::Skipped => "skipped",
            StepStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub outcomes: Vec<StepOutcome>,
    pub status: RunStatus,
    pub started_at: String,
    pub duration_ms: u128,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| outcome.status == StepStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Action, Precondition, Step, StepRegistry};
    use std::path::PathBuf;

    const MISSING_TOOL: &str = "primer-test-no-such-tool";

    fn registry_of(steps: Vec<Step>) -> StepRegistry {
        let mut registry = StepRegistry::new();
        for step in steps {
            registry.register(step).expect("register step");
        }
        registry
    }

    fn ensure_dir_step(id: &str, path: PathBuf) -> Step {
        Step::new(id, format!("create {id}"), Action::EnsureDirs { paths: vec![path] })
    }

    #[test]
    fn dry_run_never_touches_the_filesystem() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let target = tmp.path().join("workspace");
        let registry = registry_of(vec![ensure_dir_step("create-layout", target.clone())]);

        let report = Runner::new().run(
            &registry,
            &RunOptions {
                dry_run: true,
                ..RunOptions::default()
            },
        );

        assert!(report.is_success());
        assert!(!target.exists(), "dry run must not create directories");
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, StepStatus::Succeeded);
        let message = outcome.message.as_deref().unwrap_or_default();
        assert!(message.starts_with("(dry-run)"));
    }

    #[test]
    fn fatal_failure_halts_following_steps() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let registry = registry_of(vec![
            Step::new(
                "check-tool",
                "verify interpreter",
                Action::CheckTool {
                    tool: MISSING_TOOL.into(),
                },
            )
            .fatal(),
            ensure_dir_step("make-dirs", tmp.path().join("dirs")),
            ensure_dir_step("install-deps", tmp.path().join("deps")),
        ]);

        let report = Runner::new().run(&registry, &RunOptions::default());

        assert_eq!(report.status, RunStatus::Failed);
        let statuses: Vec<StepStatus> =
            report.outcomes.iter().map(|outcome| outcome.status).collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Failed, StepStatus::Skipped, StepStatus::Skipped]
        );
        assert!(!tmp.path().join("dirs").exists());
        let skipped = report.outcomes[1].message.as_deref().unwrap_or_default();
        assert!(skipped.contains("check-tool"));
    }

    #[test]
    fn nonfatal_failure_does_not_halt() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let target = tmp.path().join("layout");
        let registry = registry_of(vec![
            Step::new(
                "optional-tool",
                "probe an optional tool",
                Action::CheckTool {
                    tool: MISSING_TOOL.into(),
                },
            ),
            ensure_dir_step("create-layout", target.clone()),
        ]);

        let report = Runner::new().run(&registry, &RunOptions::default());

        assert_eq!(report.status, RunStatus::Success);
        assert!(report.has_failures());
        assert_eq!(report.outcomes[0].status, StepStatus::Failed);
        assert_eq!(report.outcomes[1].status, StepStatus::Succeeded);
        assert!(target.exists());
    }

    #[test]
    fn all_steps_succeeding_yields_success() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let registry = registry_of(vec![
            ensure_dir_step("one", tmp.path().join("one")),
            ensure_dir_step("two", tmp.path().join("two")),
            ensure_dir_step("three", tmp.path().join("three")),
        ]);

        let report = Runner::new().run(&registry, &RunOptions::default());

        assert_eq!(report.status, RunStatus::Success);
        assert!(!report.has_failures());
        let ids: Vec<&str> = report.outcomes.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["one", "two", "three"]);
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.status == StepStatus::Succeeded));
    }

    #[test]
    fn unmet_precondition_records_skipped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let venv = tmp.path().join("venv");
        std::fs::create_dir_all(&venv).expect("create venv dir");

        let registry = registry_of(vec![
            Step::new(
                "create-venv",
                "create virtualenv",
                Action::EnsureDirs { paths: vec![] },
            )
            .with_precondition(Precondition::PathMissing { path: venv.clone() }),
            Step::new(
                "install-deps",
                "install dependencies",
                Action::EnsureDirs { paths: vec![] },
            )
            .with_precondition(Precondition::PathExists {
                path: tmp.path().join("requirements.txt"),
            }),
        ]);

        let report = Runner::new().run(&registry, &RunOptions::default());

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.outcomes[0].status, StepStatus::Skipped);
        assert!(report.outcomes[0]
            .message
            .as_deref()
            .unwrap_or_default()
            .contains("already present"));
        assert_eq!(report.outcomes[1].status, StepStatus::Skipped);
        assert!(report.outcomes[1]
            .message
            .as_deref()
            .unwrap_or_default()
            .contains("does not exist"));
    }

    #[test]
    fn ensure_dirs_is_idempotent() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let target = tmp.path().join("data/raw");
        let registry = registry_of(vec![ensure_dir_step("create-layout", target.clone())]);
        let runner = Runner::new();

        let first = runner.run(&registry, &RunOptions::default());
        let second = runner.run(&registry, &RunOptions::default());

        assert!(first.is_success());
        assert!(second.is_success());
        assert!(target.exists());
    }

    #[test]
    fn cancelled_run_skips_remaining_steps() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let registry = registry_of(vec![
            ensure_dir_step("one", tmp.path().join("one")),
            ensure_dir_step("two", tmp.path().join("two")),
        ]);

        let token = CancelToken::new();
        token.cancel();
        let report = Runner::new().run_with_cancel(&registry, &RunOptions::default(), &token);

        assert_eq!(report.status, RunStatus::Failed);
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.status == StepStatus::Skipped));
        assert!(!tmp.path().join("one").exists());
    }

    #[test]
    fn subset_selection_skips_unselected_steps() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let registry = registry_of(vec![
            ensure_dir_step("alpha", tmp.path().join("alpha")),
            ensure_dir_step("beta", tmp.path().join("beta")),
        ]);

        let report = Runner::new().run(
            &registry,
            &RunOptions {
                only: Some(vec!["beta".to_string()]),
                ..RunOptions::default()
            },
        );

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.outcomes[0].status, StepStatus::Skipped);
        assert_eq!(
            report.outcomes[0].message.as_deref(),
            Some("not selected")
        );
        assert_eq!(report.outcomes[1].status, StepStatus::Succeeded);
        assert!(!tmp.path().join("alpha").exists());
        assert!(tmp.path().join("beta").exists());
    }

    #[test]
    fn env_set_precondition_requires_non_blank_value() {
        // Unique var names so this test does not race with other env users.
        std::env::set_var("PRIMER_TEST_ENV_PRESENT", "1");
        std::env::set_var("PRIMER_TEST_ENV_BLANK", "   ");
        std::env::remove_var("PRIMER_TEST_ENV_ABSENT");

        let env_step = |id: &str, name: &str| {
            Step::new(id, format!("gated by {name}"), Action::EnsureDirs { paths: vec![] })
                .with_precondition(Precondition::EnvSet { name: name.into() })
        };
        let registry = registry_of(vec![
            env_step("present", "PRIMER_TEST_ENV_PRESENT"),
            env_step("blank", "PRIMER_TEST_ENV_BLANK"),
            env_step("absent", "PRIMER_TEST_ENV_ABSENT"),
        ]);

        let report = Runner::new().run(&registry, &RunOptions::default());

        assert_eq!(report.outcomes[0].status, StepStatus::Succeeded);
        assert_eq!(report.outcomes[1].status, StepStatus::Skipped);
        assert_eq!(report.outcomes[2].status, StepStatus::Skipped);
        assert!(report.outcomes[2]
            .message
            .as_deref()
            .unwrap_or_default()
            .contains("PRIMER_TEST_ENV_ABSENT"));

        std::env::remove_var("PRIMER_TEST_ENV_PRESENT");
        std::env::remove_var("PRIMER_TEST_ENV_BLANK");
    }

    #[test]
    fn remove_paths_deletes_files_and_dirs_and_is_idempotent() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let file = tmp.path().join("coverage.xml");
        let dir = tmp.path().join("build");
        let missing = tmp.path().join("dist");
        std::fs::write(&file, "report").expect("write file");
        std::fs::create_dir_all(dir.join("lib")).expect("create dir tree");
        std::fs::write(dir.join("lib/mod.py"), "pass").expect("write nested file");

        let registry = registry_of(vec![Step::new(
            "clean-artifacts",
            "remove build artifacts",
            Action::RemovePaths {
                paths: vec![file.clone(), dir.clone(), missing.clone()],
            },
        )]);
        let runner = Runner::new();

        let first = runner.run(&registry, &RunOptions::default());
        assert_eq!(first.outcomes[0].status, StepStatus::Succeeded);
        assert_eq!(
            first.outcomes[0].message.as_deref(),
            Some("removed 2 of 3 path(s)")
        );
        assert!(!file.exists());
        assert!(!dir.exists());

        // Re-running against the already-clean tree removes nothing.
        let second = runner.run(&registry, &RunOptions::default());
        assert_eq!(second.outcomes[0].status, StepStatus::Succeeded);
        assert_eq!(
            second.outcomes[0].message.as_deref(),
            Some("removed 0 of 3 path(s)")
        );
    }

    #[test]
    fn command_failure_captures_exit_code() {
        let registry = registry_of(vec![Step::new(
            "failing-command",
            "run a failing command",
            Action::Command {
                run: "sh".to_string(),
                args: Some("-c \"exit 3\"".to_string()),
                cwd: None,
            },
        )]);

        let report = Runner::new().run(&registry, &RunOptions::default());

        assert_eq!(report.outcomes[0].status, StepStatus::Failed);
        let message = report.outcomes[0].message.as_deref().unwrap_or_default();
        assert!(message.contains("exited with code"));
    }

    #[test]
    fn command_success_reports_invocation() {
        let registry = registry_of(vec![Step::new(
            "true-command",
            "run a trivial command",
            Action::Command {
                run: "sh -c true".to_string(),
                args: None,
                cwd: None,
            },
        )]);

        let report = Runner::new().run(&registry, &RunOptions::default());

        assert_eq!(report.outcomes[0].status, StepStatus::Succeeded);
        assert!(report.outcomes[0]
            .message
            .as_deref()
            .unwrap_or_default()
            .contains("exited with code 0"));
    }

    #[test]
    fn json_handler_rejects_invalid_payload() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let good = tmp.path().join("good.json");
        let bad = tmp.path().join("bad.json");
        std::fs::write(&good, r#"{"rows": []}"#).expect("write good");
        std::fs::write(&bad, "not json at all {").expect("write bad");

        assert!(handler_for(FileKind::Json).verify(&good).is_ok());
        assert!(handler_for(FileKind::Json).verify(&bad).is_err());
    }

    #[test]
    fn csv_handler_rejects_empty_payload() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let good = tmp.path().join("good.csv");
        let empty = tmp.path().join("empty.csv");
        std::fs::write(&good, "id,name\n1,alpha\n").expect("write good");
        std::fs::write(&empty, "\n\n").expect("write empty");

        assert!(handler_for(FileKind::Csv).verify(&good).is_ok());
        assert!(handler_for(FileKind::Csv).verify(&empty).is_err());
    }
}

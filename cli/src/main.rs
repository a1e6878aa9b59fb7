use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use primer_core::{
    bootstrap_registry, cleanup_registry, render, render_table, validate_config,
    validate_selection, BootstrapConfig, Diagnostic, DiagnosticLevel, RunOptions, RunReport,
    Runner, StepRegistry,
};
use serde_json::json;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG: &str = "primer.json";

#[derive(Debug, Parser)]
#[command(author, version, about = "Primer project bootstrap runner")]
struct PrimerCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the bootstrap plan and its validation diagnostics without running it
    Plan {
        /// Path to the config file (defaults to ./primer.json when present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output format
        #[arg(long, default_value_t = PlanFormat::Text)]
        format: PlanFormat,
        /// Validate the named steps against the plan. Repeat for multiple steps.
        #[arg(long = "step", value_name = "ID", action = ArgAction::Append)]
        steps: Vec<String>,
    },
    /// Execute the bootstrap plan
    Run {
        /// Path to the config file (defaults to ./primer.json when present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Simulate the run without side effects
        #[arg(long)]
        dry_run: bool,
        /// Print per-step progress on stderr
        #[arg(long, short)]
        verbose: bool,
        /// Output JSON instead of the human-readable report
        #[arg(long)]
        json: bool,
        /// Run only the named steps. Repeat for multiple steps.
        #[arg(long = "step", value_name = "ID", action = ArgAction::Append)]
        steps: Vec<String>,
    },
    /// Execute the cleanup plan
    Clean {
        /// Path to the config file (defaults to ./primer.json when present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Simulate the cleanup without side effects
        #[arg(long)]
        dry_run: bool,
        /// Print per-step progress on stderr
        #[arg(long, short)]
        verbose: bool,
        /// Output JSON instead of the human-readable report
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = PrimerCli::parse();

    match cli.command {
        Command::Plan {
            config,
            format,
            steps,
        } => {
            let config = load_config(config.as_deref())?;
            let diagnostics = validate_config(&config);
            if diagnostics.iter().any(Diagnostic::is_error) {
                output_plan(None, &diagnostics, format)?;
                anyhow::bail!("config validation failed");
            }

            let registry = bootstrap_registry(&config)?;
            let mut diagnostics = diagnostics;
            diagnostics.extend(validate_selection(&registry, &steps));
            let has_errors = diagnostics.iter().any(Diagnostic::is_error);
            output_plan(Some(&registry), &diagnostics, format)?;
            if has_errors {
                anyhow::bail!("plan validation failed");
            }
        }
        Command::Run {
            config,
            dry_run,
            verbose,
            json,
            steps,
        } => {
            let config = load_config(config.as_deref())?;
            bail_on_errors(validate_config(&config), "config validation failed")?;

            let registry = bootstrap_registry(&config)?;
            bail_on_errors(
                validate_selection(&registry, &steps),
                "step selection failed",
            )?;

            let report = execute(&registry, dry_run, verbose, steps);
            output_run(&registry, &report, json, verbose)?;
            if !report.is_success() {
                anyhow::bail!("bootstrap run failed");
            }
        }
        Command::Clean {
            config,
            dry_run,
            verbose,
            json,
        } => {
            let config = load_config(config.as_deref())?;
            bail_on_errors(validate_config(&config), "config validation failed")?;

            let registry = cleanup_registry(&config)?;
            let report = execute(&registry, dry_run, verbose, Vec::new());
            output_run(&registry, &report, json, verbose)?;
            if !report.is_success() {
                anyhow::bail!("cleanup run failed");
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<BootstrapConfig> {
    match path {
        Some(path) => Ok(BootstrapConfig::load(path)?),
        None => {
            let default = Path::new(DEFAULT_CONFIG);
            if default.exists() {
                Ok(BootstrapConfig::load(default)?)
            } else {
                Ok(BootstrapConfig::default())
            }
        }
    }
}

fn execute(registry: &StepRegistry, dry_run: bool, verbose: bool, steps: Vec<String>) -> RunReport {
    let options = RunOptions {
        dry_run,
        verbose,
        only: if steps.is_empty() { None } else { Some(steps) },
    };
    Runner::new().run(registry, &options)
}

fn bail_on_errors(diagnostics: Vec<Diagnostic>, context: &str) -> anyhow::Result<()> {
    print_diagnostics(&diagnostics);
    if diagnostics.iter().any(Diagnostic::is_error) {
        anyhow::bail!("{context}");
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PlanFormat {
    Text,
    Json,
    Yaml,
}

impl std::fmt::Display for PlanFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            PlanFormat::Text => "text",
            PlanFormat::Json => "json",
            PlanFormat::Yaml => "yaml",
        };
        write!(f, "{value}")
    }
}

fn output_plan(
    registry: Option<&StepRegistry>,
    diagnostics: &[Diagnostic],
    format: PlanFormat,
) -> anyhow::Result<()> {
    let summary = registry.map(StepRegistry::summary);

    match format {
        PlanFormat::Text => {
            print_diagnostics(diagnostics);
            if let Some(summary) = summary {
                println!("{summary}");
            }
        }
        PlanFormat::Json => {
            let payload = json!({
                "summary": summary,
                "diagnostics": diagnostics,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        PlanFormat::Yaml => {
            let payload = json!({
                "summary": summary,
                "diagnostics": diagnostics,
            });
            print!("{}", serde_yaml::to_string(&payload)?);
        }
    }

    Ok(())
}

fn output_run(
    registry: &StepRegistry,
    report: &RunReport,
    json: bool,
    verbose: bool,
) -> anyhow::Result<()> {
    if json {
        let payload = json!({
            "summary": registry.summary(),
            "report": report,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print!("{}", render(report));
        if verbose {
            println!("\n{}", render_table(report));
        }
    }
    Ok(())
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }

    println!("Diagnostics:");
    for diagnostic in diagnostics {
        let level = match diagnostic.level {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warn",
        };
        match &diagnostic.location {
            Some(location) => println!("  - [{level}] {location}: {}", diagnostic.message),
            None => println!("  - [{level}] {}", diagnostic.message),
        }
    }
    println!();
}

use crate::registry::{Action, FileKind, Precondition, RegistryError, Step, StepRegistry};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Explicit configuration for the bootstrap plan. Every knob the original
/// setup flow read from ambient environment variables is a typed field here
/// with a default, so a missing config file yields a usable plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub project_root: PathBuf,
    pub python: String,
    pub venv_dir: PathBuf,
    pub data_dir: PathBuf,
    pub requirements: PathBuf,
    pub install_dev: bool,
    pub run_lint: bool,
    pub run_tests: bool,
    pub generate_docs: bool,
    pub docs_source: PathBuf,
    pub docs_output: PathBuf,
    pub datasets: Vec<DatasetSpec>,
    pub clean_paths: Vec<PathBuf>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            python: "python3".to_string(),
            venv_dir: PathBuf::from(".venv"),
            data_dir: PathBuf::from("data"),
            requirements: PathBuf::from("requirements.txt"),
            install_dev: false,
            run_lint: true,
            run_tests: true,
            generate_docs: false,
            docs_source: PathBuf::from("docs"),
            docs_output: PathBuf::from("docs/_build"),
            datasets: Vec::new(),
            clean_paths: vec![
                PathBuf::from("build"),
                PathBuf::from("dist"),
                PathBuf::from(".pytest_cache"),
                PathBuf::from("__pycache__"),
            ],
        }
    }
}

/// One dataset to fetch. The payload kind is declared, not sniffed from the
/// file extension; `dest` defaults to `<data_dir>/raw/<name>.<kind>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub name: String,
    pub url: String,
    pub file_kind: FileKind,
    #[serde(default)]
    pub dest: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

impl BootstrapConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }

    fn pip(&self) -> String {
        self.resolve(&self.venv_dir.join("bin/pip"))
            .display()
            .to_string()
    }

    pub fn dataset_dest(&self, dataset: &DatasetSpec) -> PathBuf {
        match &dataset.dest {
            Some(dest) => self.resolve(dest),
            None => self.resolve(&self.data_dir.join("raw").join(format!(
                "{}.{}",
                dataset.name,
                dataset.file_kind.extension()
            ))),
        }
    }
}

/// Assemble the full bootstrap plan for a config, in dependency order:
/// interpreter check, directory layout, virtualenv, dependency installs,
/// dataset fetches, lint, tests, docs.
pub fn bootstrap_registry(config: &BootstrapConfig) -> Result<StepRegistry, RegistryError> {
    let mut registry = StepRegistry::new();
    let venv = config.resolve(&config.venv_dir);
    let data = config.resolve(&config.data_dir);
    let requirements = config.resolve(&config.requirements);

    registry.register(
        Step::new(
            "check-python",
            format!("verify '{}' is available", config.python),
            Action::CheckTool {
                tool: config.python.clone(),
            },
        )
        .fatal(),
    )?;

    registry.register(
        Step::new(
            "create-layout",
            "create the data directory layout",
            Action::EnsureDirs {
                paths: vec![data.clone(), data.join("raw"), data.join("processed")],
            },
        )
        .fatal(),
    )?;

    registry.register(
        Step::new(
            "create-venv",
            "create the virtual environment",
            Action::Command {
                run: format!("{} -m venv {}", config.python, venv.display()),
                args: None,
                cwd: None,
            },
        )
        .with_precondition(Precondition::PathMissing { path: venv.clone() })
        .fatal(),
    )?;

    registry.register(
        Step::new(
            "install-deps",
            "install pinned dependencies",
            Action::Command {
                run: format!("{} install -r {}", config.pip(), requirements.display()),
                args: None,
                cwd: None,
            },
        )
        .with_precondition(Precondition::PathExists {
            path: requirements.clone(),
        })
        .fatal(),
    )?;

    if config.install_dev {
        registry.register(
            Step::new(
                "install-dev-deps",
                "install the package with dev extras",
                Action::Command {
                    run: format!("{} install -e \".[dev]\"", config.pip()),
                    args: None,
                    cwd: Some(config.project_root.clone()),
                },
            )
            .with_precondition(Precondition::PathExists {
                path: config.resolve(Path::new("pyproject.toml")),
            }),
        )?;
    }

    for dataset in &config.datasets {
        registry.register(
            Step::new(
                format!("fetch-{}", dataset.name),
                format!("download dataset '{}'", dataset.name),
                Action::Fetch {
                    url: dataset.url.clone(),
                    dest: config.dataset_dest(dataset),
                    file_kind: dataset.file_kind,
                },
            )
            .with_precondition(Precondition::ToolInstalled {
                tool: "curl".to_string(),
            }),
        )?;
    }

    if config.run_lint {
        registry.register(
            Step::new(
                "lint",
                "run the linter over the source tree",
                Action::Command {
                    run: "flake8".to_string(),
                    args: None,
                    cwd: Some(config.project_root.clone()),
                },
            )
            .with_precondition(Precondition::ToolInstalled {
                tool: "flake8".to_string(),
            }),
        )?;
    }

    if config.run_tests {
        registry.register(
            Step::new(
                "test",
                "run the test suite",
                Action::Command {
                    run: "pytest".to_string(),
                    args: None,
                    cwd: Some(config.project_root.clone()),
                },
            )
            .with_precondition(Precondition::ToolInstalled {
                tool: "pytest".to_string(),
            }),
        )?;
    }

    if config.generate_docs {
        registry.register(
            Step::new(
                "build-docs",
                "build the html documentation",
                Action::Command {
                    run: format!(
                        "sphinx-build -b html {} {}",
                        config.resolve(&config.docs_source).display(),
                        config.resolve(&config.docs_output).display()
                    ),
                    args: None,
                    cwd: None,
                },
            )
            .with_precondition(Precondition::ToolInstalled {
                tool: "sphinx-build".to_string(),
            }),
        )?;
    }

    Ok(registry)
}

/// Assemble the cleanup plan: build artifacts and caches, plus the docs
/// output when docs generation is enabled. Never removes the virtualenv.
pub fn cleanup_registry(config: &BootstrapConfig) -> Result<StepRegistry, RegistryError> {
    let mut registry = StepRegistry::new();

    let paths: Vec<PathBuf> = config
        .clean_paths
        .iter()
        .map(|path| config.resolve(path))
        .collect();
    registry.register(Step::new(
        "clean-artifacts",
        "remove build artifacts and caches",
        Action::RemovePaths { paths },
    ))?;

    if config.generate_docs {
        registry.register(Step::new(
            "clean-docs",
            "remove the generated documentation",
            Action::RemovePaths {
                paths: vec![config.resolve(&config.docs_output)],
            },
        ))?;
    }

    Ok(registry)
}

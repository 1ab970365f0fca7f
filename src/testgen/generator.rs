//! generator.rs
//!
//! Coverage-oriented inspiration tests from an external generator process.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::GeneratorConfig;
use crate::executor::run::{run_with_timeout, CancelToken, ExecError, ProcessSpec};
use crate::testgen::candidate::{CompilationUnit, ProjectLayout};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inspiration {
    Available(String),
    /// Not a failure on its own; the pipeline falls back to source only.
    Unavailable(String),
}

impl Inspiration {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Available(t) => Some(t),
            Self::Unavailable(_) => None,
        }
    }
}

pub trait InspirationSource: Send + Sync {
    /// `Err` only for cancellation; every other problem is `Unavailable`.
    fn generate(&self, unit: &CompilationUnit, cancel: &CancelToken) -> Result<Inspiration, ExecError>;
}

pub struct DisabledGenerator;

impl InspirationSource for DisabledGenerator {
    fn generate(&self, _unit: &CompilationUnit, _cancel: &CancelToken) -> Result<Inspiration, ExecError> {
        Ok(Inspiration::Unavailable("generator disabled".into()))
    }
}

/* ============================================================
   EvoSuite
   ============================================================ */

pub struct EvoSuiteGenerator {
    cfg: GeneratorConfig,
    layout: ProjectLayout,
    // resolved once per run and shared by every worker
    dependency_classpath: OnceLock<Result<String, String>>,
}

impl EvoSuiteGenerator {
    pub fn new(cfg: GeneratorConfig, layout: ProjectLayout) -> Self {
        Self {
            cfg,
            layout,
            dependency_classpath: OnceLock::new(),
        }
    }

    /// Output file the generator writes for `unit` under `test_dir`.
    pub fn expected_output(test_dir: &Path, unit: &CompilationUnit) -> PathBuf {
        test_dir
            .join(unit.package_dir())
            .join(format!("{}_ESTest.java", unit.simple_name()))
    }

    pub fn command(&self, unit: &CompilationUnit, project_cp: &str, test_dir: &Path) -> ProcessSpec {
        ProcessSpec::new([self.cfg.java.as_str(), "-jar"])
            .arg(self.cfg.jar.to_string_lossy())
            .arg("-class")
            .arg(unit.name())
            .arg("-projectCP")
            .arg(project_cp)
            .arg(format!("-Dtest_dir={}", test_dir.display()))
            .arg("-Dmock_if_no_generator=true")
            .arg(format!("-Dsearch_budget={}", self.cfg.search_budget_secs))
            .current_dir(self.layout.root())
    }

    fn dependency_classpath(&self, cancel: &CancelToken) -> Result<&str, String> {
        self.dependency_classpath
            .get_or_init(|| self.build_dependency_classpath(cancel))
            .as_deref()
            .map_err(Clone::clone)
    }

    fn build_dependency_classpath(&self, cancel: &CancelToken) -> Result<String, String> {
        let scratch = tempfile::tempdir().map_err(|e| e.to_string())?;
        let out = scratch.path().join("classpath.txt");

        let spec = ProcessSpec::new([self.cfg.build_tool.as_str(), "dependency:build-classpath"])
            .arg(format!("-Dmdep.outputFile={}", out.display()))
            .arg("-DincludeScope=runtime")
            .arg("-q")
            .current_dir(self.layout.root());

        info!(command = %spec.display(), "building project classpath");

        let exec = run_with_timeout(
            &spec,
            Duration::from_secs(self.cfg.classpath_timeout_secs),
            cancel,
        )
        .map_err(|e| format!("dependency classpath: {e}"))?;

        if !exec.success() {
            return Err(format!(
                "dependency classpath: {} exited with {}\n{}",
                self.cfg.build_tool,
                exec.exit_code(),
                exec.transcript.trim()
            ));
        }

        fs::read_to_string(&out)
            .map(|s| s.trim().to_string())
            .map_err(|e| format!("dependency classpath: {e}"))
    }

    fn project_classpath(&self, cancel: &CancelToken) -> Result<String, String> {
        let deps = self.dependency_classpath(cancel)?;
        let classes = self.layout.classes_dir();
        let mut entries = vec![classes];
        entries.extend(std::env::split_paths(deps));
        std::env::join_paths(entries)
            .map(|s| s.to_string_lossy().into_owned())
            .map_err(|e| e.to_string())
    }
}

impl InspirationSource for EvoSuiteGenerator {
    fn generate(&self, unit: &CompilationUnit, cancel: &CancelToken) -> Result<Inspiration, ExecError> {
        let project_cp = match self.project_classpath(cancel) {
            Ok(cp) => cp,
            Err(_) if cancel.is_cancelled() => return Err(ExecError::Cancelled),
            Err(reason) => return Ok(Inspiration::Unavailable(reason)),
        };

        // removed on drop, whatever the outcome
        let out_dir = match tempfile::Builder::new()
            .prefix(&format!("evosuite-tests-{}-", unit.slug()))
            .tempdir()
        {
            Ok(d) => d,
            Err(e) => return Ok(Inspiration::Unavailable(format!("scratch dir: {e}"))),
        };

        let spec = self.command(unit, &project_cp, out_dir.path());
        debug!(unit = %unit, command = %spec.display(), "starting generator");

        let exec = match run_with_timeout(&spec, Duration::from_secs(self.cfg.timeout_secs), cancel) {
            Ok(exec) => exec,
            Err(ExecError::Cancelled) => return Err(ExecError::Cancelled),
            Err(e) => {
                warn!(unit = %unit, error = %e, "generator did not finish");
                return Ok(Inspiration::Unavailable(e.to_string()));
            }
        };

        info!(unit = %unit, exit_code = exec.exit_code(), "generator finished");
        if !exec.success() {
            return Ok(Inspiration::Unavailable(format!(
                "generator exited with status {}",
                exec.exit_code()
            )));
        }

        let expected = Self::expected_output(out_dir.path(), unit);
        match fs::read_to_string(&expected) {
            Ok(text) => Ok(Inspiration::Available(text)),
            Err(_) => Ok(Inspiration::Unavailable(format!(
                "generator produced no {}",
                expected.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
            ))),
        }
    }
}

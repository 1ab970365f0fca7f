//! Per-unit pipeline:
//! Discovered -> GeneratingInspiration -> Synthesizing -> Validating -> {Saved, Failed}

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::compile::healing::{initial_classpath, HealingLoop};
use crate::compile::resolver::Resolve;
use crate::compile::validator::{Validate, ValidateError};
use crate::executor::run::{CancelToken, ExecError};
use crate::llm::backend::Synthesizer;
use crate::llm::client::SynthesisError;
use crate::llm::parse::extract_code_block;
use crate::llm::prompt::SynthesisInputs;
use crate::state::{Failure, FailureCategory, JobOutcome};
use crate::testgen::cache::DependencyCache;
use crate::testgen::candidate::{Candidate, CompilationUnit, ProjectLayout};
use crate::testgen::generator::{Inspiration, InspirationSource};
use crate::testgen::materialize::read_optional;

const GENERATOR_FAILED_PREFIX: &str = "[generator failed] ";

/// Faults that end a unit outside the normal failure taxonomy.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Validate(#[from] ValidateError),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Anything the scheduler can run once per unit.
pub trait UnitJob: Send + Sync {
    fn run(&self, unit: &CompilationUnit, cancel: &CancelToken) -> JobOutcome;
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_attempts: u32,
    pub base_archives: Vec<PathBuf>,
    /// Unavailable inspiration ends the unit instead of falling back.
    pub require_inspiration: bool,
}

pub struct UnitPipeline {
    layout: ProjectLayout,
    options: PipelineOptions,
    generator: Arc<dyn InspirationSource>,
    synthesizer: Arc<dyn Synthesizer>,
    validator: Arc<dyn Validate>,
    resolver: Arc<dyn Resolve>,
    cache: Arc<DependencyCache>,
}

impl UnitPipeline {
    pub fn new(
        layout: ProjectLayout,
        options: PipelineOptions,
        generator: Arc<dyn InspirationSource>,
        synthesizer: Arc<dyn Synthesizer>,
        validator: Arc<dyn Validate>,
        resolver: Arc<dyn Resolve>,
        cache: Arc<DependencyCache>,
    ) -> Self {
        Self {
            layout,
            options,
            generator,
            synthesizer,
            validator,
            resolver,
            cache,
        }
    }

    fn process(&self, unit: &CompilationUnit, cancel: &CancelToken) -> Result<JobOutcome, PipelineError> {
        info!(unit = %unit, "processing");

        /* ================= INSPIRATION ================= */

        let inspiration = self.generator.generate(unit, cancel)?;
        let generator_failed = match &inspiration {
            Inspiration::Available(_) => {
                info!(unit = %unit, "inspiration generated");
                false
            }
            Inspiration::Unavailable(reason) => {
                if self.options.require_inspiration {
                    return Ok(Failure::new(
                        FailureCategory::Generator,
                        "no inspiration available",
                        reason.clone(),
                    )
                    .into());
                }
                warn!(unit = %unit, %reason, "no inspiration; synthesizing from source only");
                true
            }
        };

        let outcome = self.synthesize_and_validate(unit, inspiration.text(), cancel)?;

        Ok(match outcome {
            JobOutcome::Failure(mut f) if generator_failed => {
                f.reason.insert_str(0, GENERATOR_FAILED_PREFIX);
                JobOutcome::Failure(f)
            }
            other => other,
        })
    }

    fn synthesize_and_validate(
        &self,
        unit: &CompilationUnit,
        inspiration: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<JobOutcome, PipelineError> {
        /* ================= SYNTHESIS ================= */

        let source_path = self.layout.source_file(unit);
        let Some(source) = read_file(&source_path)? else {
            return Ok(Failure::synthesis(
                "source file not found",
                source_path.display().to_string(),
            )
            .into());
        };

        let save_path = self.layout.test_file(unit);
        let existing = read_file(&save_path)?;
        if existing.is_some() {
            info!(unit = %unit, path = %save_path.display(), "using existing test as style guide");
        }

        let reply = match self.synthesizer.synthesize(
            unit.name(),
            SynthesisInputs {
                source: &source,
                inspiration,
                existing_test: existing.as_deref(),
            },
            cancel,
        ) {
            Ok(reply) => reply,
            Err(SynthesisError::Cancelled) => return Err(ExecError::Cancelled.into()),
            Err(e) => {
                return Ok(Failure::synthesis("LLM request failed", e.to_string()).into());
            }
        };

        let Some(code) = extract_code_block(&reply) else {
            return Ok(Failure::synthesis("no extractable code block", reply).into());
        };

        /* ================= VALIDATION ================= */

        let candidate = Candidate {
            unit: unit.clone(),
            source: code,
            save_path,
        };

        let classpath = initial_classpath(
            &self.layout.classes_dir(),
            &self.options.base_archives,
            &self.cache,
            unit.name(),
        );

        let report = HealingLoop::new(
            self.validator.as_ref(),
            self.resolver.as_ref(),
            self.options.max_attempts,
        )
        .run(&candidate, classpath, cancel)?;

        Ok(report.outcome)
    }
}

impl UnitJob for UnitPipeline {
    /// Never panics and never returns a fault: everything becomes an outcome.
    fn run(&self, unit: &CompilationUnit, cancel: &CancelToken) -> JobOutcome {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.process(unit, cancel)));

        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => Failure::other(e.to_string()).into(),
            Err(payload) => Failure::other(format!("panic: {}", panic_message(payload.as_ref()))).into(),
        };

        match &outcome {
            JobOutcome::Success => info!(unit = %unit, "synthesized and validated"),
            JobOutcome::Failure(f) => warn!(unit = %unit, category = ?f.category, reason = %f.reason, "unit failed"),
        }

        outcome
    }
}

fn read_file(path: &std::path::Path) -> Result<Option<String>, PipelineError> {
    read_optional(path).map_err(|source| PipelineError::Read {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

//! Self-healing compile loop.
//!
//! Attempting -> { Accepted, MissingDependency, Unrecoverable }. A missing
//! package is resolved at most once per candidate; the classpath and the
//! set of attempted identifiers only grow, so the loop ends within
//! `max_attempts` compiler runs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::compile::classpath::ClasspathSet;
use crate::compile::resolver::Resolve;
use crate::compile::validator::{Validate, ValidateError, Verdict};
use crate::executor::run::CancelToken;
use crate::state::{Failure, JobOutcome};
use crate::testgen::cache::DependencyCache;
use crate::testgen::candidate::Candidate;

/// Result of one healing sequence plus what it took to get there.
#[derive(Debug, Clone)]
pub struct HealReport {
    pub outcome: JobOutcome,
    pub attempts: u32,
    /// Identifiers handed to the resolver, in order.
    pub resolved: Vec<String>,
}

/// Baseline classpath: compiled project output, the test-framework
/// archives that exist on disk, then everything already cached.
pub fn initial_classpath(
    classes_dir: &Path,
    base_archives: &[PathBuf],
    cache: &DependencyCache,
    unit: &str,
) -> ClasspathSet {
    let mut cp = ClasspathSet::new();
    cp.push(classes_dir);

    for jar in base_archives {
        if jar.exists() {
            cp.push(jar);
        } else {
            warn!(unit, archive = %jar.display(), "base dependency archive not found");
        }
    }

    cp.extend(cache.archives());
    cp
}

pub struct HealingLoop<'a> {
    validator: &'a dyn Validate,
    resolver: &'a dyn Resolve,
    max_attempts: u32,
}

impl<'a> HealingLoop<'a> {
    pub fn new(validator: &'a dyn Validate, resolver: &'a dyn Resolve, max_attempts: u32) -> Self {
        Self {
            validator,
            resolver,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Errors are infrastructure faults (scratch i/o, compiler launch,
    /// cancellation); every compile-level outcome is in the report.
    pub fn run(
        &self,
        candidate: &Candidate,
        mut classpath: ClasspathSet,
        cancel: &CancelToken,
    ) -> Result<HealReport, ValidateError> {
        let unit = candidate.unit.name();
        let mut attempted: HashSet<String> = HashSet::new();
        let mut resolved = Vec::new();
        let mut last_transcript = String::new();

        for attempt in 1..=self.max_attempts {
            info!(
                unit,
                attempt,
                max_attempts = self.max_attempts,
                archives = classpath.archive_count(),
                "compile attempt"
            );

            let finish = |outcome: JobOutcome, resolved: Vec<String>| HealReport {
                outcome,
                attempts: attempt,
                resolved,
            };

            match self.validator.validate(candidate, &classpath, cancel)? {
                Verdict::Accepted => {
                    return Ok(finish(JobOutcome::Success, resolved));
                }

                Verdict::Unrecoverable { reason, transcript } => {
                    return Ok(finish(
                        Failure::compilation(reason, transcript).into(),
                        resolved,
                    ));
                }

                Verdict::MissingDependency {
                    identifier,
                    transcript,
                } => {
                    if attempted.contains(&identifier) {
                        warn!(unit, package = %identifier, "dependency still missing after resolution");
                        return Ok(finish(
                            Failure::compilation(
                                format!("repeated unresolved dependency {identifier}"),
                                transcript,
                            )
                            .into(),
                            resolved,
                        ));
                    }

                    info!(unit, package = %identifier, "missing package, searching registry");
                    attempted.insert(identifier.clone());
                    resolved.push(identifier.clone());

                    match self.resolver.resolve(&identifier) {
                        Ok(archive) => {
                            info!(unit, archive = %archive.display(), "resolved, retrying compilation");
                            classpath.push(&archive);
                        }
                        Err(e) => {
                            warn!(unit, package = %identifier, error = %e, "could not resolve dependency");
                            return Ok(finish(
                                Failure::compilation(
                                    format!("unresolvable dependency {identifier}"),
                                    format!("{e}\n--- Compiler Output ---\n{transcript}"),
                                )
                                .into(),
                                resolved,
                            ));
                        }
                    }

                    last_transcript = transcript;
                }
            }
        }

        Ok(HealReport {
            outcome: Failure::compilation("exceeded retry budget", last_transcript).into(),
            attempts: self.max_attempts,
            resolved,
        })
    }
}

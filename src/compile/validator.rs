//! Compiles one candidate in isolation and classifies the result.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

use crate::compile::classpath::ClasspathSet;
use crate::config::CompileConfig;
use crate::executor::run::{run_with_timeout, CancelToken, ExecError, ProcessSpec};
use crate::testgen::candidate::Candidate;
use crate::testgen::materialize::publish;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Compiled and written to the candidate's save path.
    Accepted,
    MissingDependency {
        identifier: String,
        transcript: String,
    },
    /// Nothing dependency resolution could fix.
    Unrecoverable {
        reason: String,
        transcript: String,
    },
}

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("scratch directory: {0}")]
    Scratch(#[source] io::Error),
    #[error("failed to publish {path}: {source}")]
    Publish {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("compiler: {0}")]
    Exec(#[from] ExecError),
}

pub trait Validate: Send + Sync {
    fn validate(
        &self,
        candidate: &Candidate,
        classpath: &ClasspathSet,
        cancel: &CancelToken,
    ) -> Result<Verdict, ValidateError>;
}

/* ============================================================
   Missing-dependency detection
   ============================================================ */

/// Extracts the missing package from a failed compiler transcript.
/// One rule per toolchain; the retry loop never looks at transcripts.
pub trait DiagnosticRule: Send + Sync {
    fn missing_dependency(&self, transcript: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct JavacDiagnostics {
    pattern: Regex,
}

impl JavacDiagnostics {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"error: package ([\w.]+) does not exist")
                .expect("static regex"),
        }
    }
}

impl Default for JavacDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticRule for JavacDiagnostics {
    fn missing_dependency(&self, transcript: &str) -> Option<String> {
        self.pattern
            .captures(transcript)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

/* ============================================================
   Compiler-backed validator
   ============================================================ */

pub struct CompilerValidator {
    compiler: Vec<String>,
    timeout: Duration,
    scratch_root: Option<PathBuf>,
    rule: Box<dyn DiagnosticRule>,
}

impl CompilerValidator {
    pub fn new(cfg: &CompileConfig) -> Self {
        Self::with_rule(cfg, Box::new(JavacDiagnostics::new()))
    }

    pub fn with_rule(cfg: &CompileConfig, rule: Box<dyn DiagnosticRule>) -> Self {
        Self {
            compiler: cfg.compiler.clone(),
            timeout: cfg.timeout(),
            scratch_root: cfg.scratch_dir.clone(),
            rule,
        }
    }

    fn scratch(&self, candidate: &Candidate) -> io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        let prefix = format!("junit-validation-{}-", candidate.unit.slug());
        builder.prefix(&prefix);
        match &self.scratch_root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
    }
}

impl Validate for CompilerValidator {
    fn validate(
        &self,
        candidate: &Candidate,
        classpath: &ClasspathSet,
        cancel: &CancelToken,
    ) -> Result<Verdict, ValidateError> {
        // dropped (and removed) on every return path below
        let scratch = self.scratch(candidate).map_err(ValidateError::Scratch)?;

        let source_path = scratch.path().join(candidate.file_name());
        let out_dir = scratch.path().join("classes");
        fs::write(&source_path, &candidate.source).map_err(ValidateError::Scratch)?;
        fs::create_dir_all(&out_dir).map_err(ValidateError::Scratch)?;

        let spec = ProcessSpec::new(self.compiler.iter().cloned())
            .arg("-cp")
            .arg(classpath.to_arg().to_string_lossy())
            .arg("-d")
            .arg(out_dir.to_string_lossy())
            .arg(source_path.to_string_lossy());

        debug!(unit = %candidate.unit, command = %spec.display(), "invoking compiler");

        let exec = match run_with_timeout(&spec, self.timeout, cancel) {
            Ok(exec) => exec,
            Err(ExecError::Timeout(after)) => {
                return Ok(Verdict::Unrecoverable {
                    reason: format!("compiler timed out after {}s", after.as_secs()),
                    transcript: String::new(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if exec.success() {
            publish(&candidate.save_path, &candidate.source).map_err(|source| {
                ValidateError::Publish {
                    path: candidate.save_path.clone(),
                    source,
                }
            })?;
            info!(unit = %candidate.unit, path = %candidate.save_path.display(), "validated and saved");
            return Ok(Verdict::Accepted);
        }

        Ok(match self.rule.missing_dependency(&exec.transcript) {
            Some(identifier) => Verdict::MissingDependency {
                identifier,
                transcript: exec.transcript,
            },
            None => Verdict::Unrecoverable {
                reason: format!("compiler exited with status {}", exec.exit_code()),
                transcript: exec.transcript,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn javac_rule_extracts_package() {
        let rule = JavacDiagnostics::new();
        let transcript = "\
CalculatorTest.java:3: error: package org.junit.jupiter.api does not exist
import org.junit.jupiter.api.Test;
                            ^
1 error
";
        assert_eq!(
            rule.missing_dependency(transcript).as_deref(),
            Some("org.junit.jupiter.api")
        );
    }

    #[test]
    fn javac_rule_takes_first_of_several() {
        let rule = JavacDiagnostics::new();
        let transcript = "A.java:1: error: package com.a does not exist\nA.java:2: error: package com.b does not exist\n";
        assert_eq!(rule.missing_dependency(transcript).as_deref(), Some("com.a"));
    }

    #[test]
    fn javac_rule_ignores_other_errors() {
        let rule = JavacDiagnostics::new();
        assert_eq!(rule.missing_dependency("A.java:4: error: ';' expected"), None);
        assert_eq!(rule.missing_dependency("error: cannot find symbol Foo"), None);
    }
}

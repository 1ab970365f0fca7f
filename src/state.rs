use std::fmt;

use serde::Serialize;

/* ---------- failure taxonomy ---------- */

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Generator,
    Synthesis,
    Compilation,
    Other,
}

impl FailureCategory {
    pub fn label(self) -> &'static str {
        match self {
            Self::Generator => "Generator Failures",
            Self::Synthesis => "Synthesis Failures",
            Self::Compilation => "Compilation Failures",
            Self::Other => "Other Failures",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub category: FailureCategory,
    pub reason: String,
    /// Compiler transcript or fault description; may be empty.
    pub detail: String,
}

impl Failure {
    pub fn new(category: FailureCategory, reason: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            category,
            reason: reason.into(),
            detail: detail.into(),
        }
    }

    pub fn compilation(reason: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(FailureCategory::Compilation, reason, detail)
    }

    pub fn synthesis(reason: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(FailureCategory::Synthesis, reason, detail)
    }

    pub fn other(reason: impl Into<String>) -> Self {
        Self::new(FailureCategory::Other, reason, String::new())
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.category, self.reason)
    }
}

/* ---------- per-unit result ---------- */

/// Produced exactly once per unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    Failure(Failure),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Success => None,
            Self::Failure(f) => Some(f),
        }
    }
}

impl From<Failure> for JobOutcome {
    fn from(f: Failure) -> Self {
        Self::Failure(f)
    }
}

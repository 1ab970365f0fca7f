use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::LayoutConfig;

/// One class under test, identified by its fully-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CompilationUnit {
    name: String,
}

impl CompilationUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dotted package, empty for the default package.
    pub fn package(&self) -> &str {
        self.name.rsplit_once('.').map_or("", |(pkg, _)| pkg)
    }

    pub fn simple_name(&self) -> &str {
        self.name.rsplit_once('.').map_or(&self.name, |(_, simple)| simple)
    }

    /// `com.acme.Foo` -> `com/acme`
    pub fn package_dir(&self) -> PathBuf {
        self.package().split('.').filter(|s| !s.is_empty()).collect()
    }

    /// Filesystem-safe token, e.g. for scratch directory names.
    pub fn slug(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

impl fmt::Display for CompilationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Maps units onto the project's source, test and build directories.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
    cfg: LayoutConfig,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>, cfg: LayoutConfig) -> Self {
        Self {
            root: root.into(),
            cfg,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn classes_dir(&self) -> PathBuf {
        self.root.join(&self.cfg.classes_dir)
    }

    pub fn source_file(&self, unit: &CompilationUnit) -> PathBuf {
        self.root
            .join(&self.cfg.source_dir)
            .join(unit.package_dir())
            .join(format!("{}.java", unit.simple_name()))
    }

    /// Canonical test location; also where a hand-written test is looked up.
    pub fn test_file(&self, unit: &CompilationUnit) -> PathBuf {
        self.root
            .join(&self.cfg.test_dir)
            .join(unit.package_dir())
            .join(format!("{}{}.java", unit.simple_name(), self.cfg.test_suffix))
    }
}

/// Synthesized test text plus where it goes once it compiles.
/// Owned by exactly one pipeline invocation.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub unit: CompilationUnit,
    pub source: String,
    pub save_path: PathBuf,
}

impl Candidate {
    pub fn file_name(&self) -> String {
        self.save_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}Test.java", self.unit.simple_name()))
    }
}

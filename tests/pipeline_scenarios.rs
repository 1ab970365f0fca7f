//! End-to-end unit pipeline runs against a scripted `sh` compiler, an
//! in-process registry and canned generator/synthesizer replies.
#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use evogen::compile::resolver::{DependencyResolver, PackageRegistry, ResolveError};
use evogen::compile::validator::CompilerValidator;
use evogen::config::{CompileConfig, LayoutConfig};
use evogen::executor::run::{CancelToken, ExecError};
use evogen::llm::backend::Synthesizer;
use evogen::llm::client::SynthesisError;
use evogen::llm::prompt::SynthesisInputs;
use evogen::pipeline::{PipelineOptions, UnitJob, UnitPipeline};
use evogen::state::{FailureCategory, JobOutcome};
use evogen::testgen::cache::{Coordinates, DependencyCache};
use evogen::testgen::candidate::{CompilationUnit, ProjectLayout};
use evogen::testgen::generator::{Inspiration, InspirationSource};
use tempfile::TempDir;

const UNIT: &str = "org.example.Calculator";
const TEST_SOURCE: &str = "package org.example;\n\nclass CalculatorTest {}\n";
const MISSING_FOO: &str = "CalculatorTest.java:3: error: package com.foo.bar does not exist";

/* ---------- fakes ---------- */

struct FixedGenerator(Option<&'static str>);

impl InspirationSource for FixedGenerator {
    fn generate(&self, _unit: &CompilationUnit, _cancel: &CancelToken) -> Result<Inspiration, ExecError> {
        Ok(match self.0 {
            Some(text) => Inspiration::Available(text.into()),
            None => Inspiration::Unavailable("generator exited with status 1".into()),
        })
    }
}

#[derive(Default)]
struct CannedSynthesizer {
    reply: Option<String>,
    seen_inspiration: Mutex<Vec<Option<String>>>,
}

impl CannedSynthesizer {
    fn fenced() -> Self {
        Self {
            reply: Some(format!("Here you go:\n```java\n{TEST_SOURCE}```\n")),
            ..Default::default()
        }
    }

    fn replying(text: &str) -> Self {
        Self {
            reply: Some(text.into()),
            ..Default::default()
        }
    }
}

impl Synthesizer for CannedSynthesizer {
    fn synthesize(&self, _unit: &str, inputs: SynthesisInputs<'_>, _cancel: &CancelToken) -> Result<String, SynthesisError> {
        self.seen_inspiration
            .lock()
            .unwrap()
            .push(inputs.inspiration.map(str::to_string));
        self.reply.clone().ok_or(SynthesisError::EmptyResponse)
    }
}

/// Knows `com.foo.bar` -> com.foo:bar:1.0; counts every call.
#[derive(Clone, Default)]
struct FakeRegistry {
    searches: Arc<AtomicUsize>,
    downloads: Arc<AtomicUsize>,
    broken_download: bool,
}

impl PackageRegistry for FakeRegistry {
    fn search(&self, identifier: &str) -> Result<Option<Coordinates>, ResolveError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok((identifier == "com.foo.bar").then(|| Coordinates::new("com.foo", "bar", "1.0")))
    }

    fn download(&self, _coords: &Coordinates, dest: &Path) -> Result<(), ResolveError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        fs::write(dest, b"PK partial")?;
        if self.broken_download {
            return Err(ResolveError::DownloadFailed {
                url: "https://repo.invalid/bar-1.0.jar".into(),
                status: 502,
            });
        }
        Ok(())
    }
}

/* ---------- harness ---------- */

struct Harness {
    _tmp: TempDir,
    root: PathBuf,
    cache_dir: PathBuf,
    scratch_dir: PathBuf,
    attempts_file: PathBuf,
    registry: FakeRegistry,
}

impl Harness {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("project");
        fs::create_dir_all(root.join("target/classes/org/example")).unwrap();
        fs::create_dir_all(root.join("src/main/java/org/example")).unwrap();
        fs::write(
            root.join("src/main/java/org/example/Calculator.java"),
            "package org.example;\npublic class Calculator { int add(int a, int b) { return a + b; } }\n",
        )
        .unwrap();

        Self {
            cache_dir: tmp.path().join("cache"),
            scratch_dir: tmp.path().join("scratch"),
            attempts_file: tmp.path().join("attempts"),
            root,
            _tmp: tmp,
            registry: FakeRegistry::default(),
        }
    }

    fn save_path(&self) -> PathBuf {
        self.root.join("src/test/java/org/example/CalculatorTest.java")
    }

    /// Compiler stand-in: `sh -c <body> javac -cp <cp> -d <out> <file>`,
    /// so `$2` is the classpath. Every invocation is tallied.
    fn compiler(&self, body: &str, timeout_secs: u64) -> CompileConfig {
        let script = format!("echo x >> '{}'\n{body}", self.attempts_file.display());
        CompileConfig {
            compiler: vec!["sh".into(), "-c".into(), script, "javac".into()],
            timeout_secs,
            scratch_dir: Some(self.scratch_dir.clone()),
            base_archives: vec![PathBuf::from("/definitely/missing/junit-jupiter-api-5.10.2.jar")],
            ..CompileConfig::default()
        }
    }

    fn pipeline(
        &self,
        compile: &CompileConfig,
        generator: FixedGenerator,
        synthesizer: Arc<CannedSynthesizer>,
        require_inspiration: bool,
    ) -> UnitPipeline {
        let cache = Arc::new(DependencyCache::open(&self.cache_dir).unwrap());
        UnitPipeline::new(
            ProjectLayout::new(&self.root, LayoutConfig::default()),
            PipelineOptions {
                max_attempts: 5,
                base_archives: compile.base_archives.clone(),
                require_inspiration,
            },
            Arc::new(generator),
            synthesizer,
            Arc::new(CompilerValidator::new(compile)),
            Arc::new(DependencyResolver::new(self.registry.clone(), Arc::clone(&cache))),
            cache,
        )
    }

    fn run(&self, body: &str) -> JobOutcome {
        let compile = self.compiler(body, 10);
        self.pipeline(&compile, FixedGenerator(Some("class Calculator_ESTest {}")), Arc::new(CannedSynthesizer::fenced()), false)
            .run(&CompilationUnit::new(UNIT), &CancelToken::new())
    }

    fn attempts(&self) -> usize {
        fs::read_to_string(&self.attempts_file)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    fn scratch_is_empty(&self) -> bool {
        fs::read_dir(&self.scratch_dir)
            .map(|mut d| d.next().is_none())
            .unwrap_or(true)
    }
}

fn reason(outcome: &JobOutcome) -> String {
    outcome.failure().map(|f| f.reason.clone()).unwrap_or_default()
}

/* ---------- scenarios ---------- */

#[test]
fn compiles_first_time_with_baseline_classpath() {
    let h = Harness::new();
    let outcome = h.run("exit 0");

    assert_eq!(outcome, JobOutcome::Success);
    assert_eq!(fs::read_to_string(h.save_path()).unwrap(), TEST_SOURCE.trim());
    assert_eq!(h.attempts(), 1);
    assert_eq!(h.registry.searches.load(Ordering::SeqCst), 0);
    assert!(h.scratch_is_empty());
}

#[test]
fn missing_package_is_downloaded_and_retried() {
    let h = Harness::new();
    let body = format!(
        "case \"$2\" in *bar-1.0.jar*) exit 0 ;; esac\necho '{MISSING_FOO}' >&2\nexit 1"
    );
    let outcome = h.run(&body);

    assert_eq!(outcome, JobOutcome::Success);
    assert_eq!(h.attempts(), 2);
    assert_eq!(h.registry.searches.load(Ordering::SeqCst), 1);
    assert_eq!(h.registry.downloads.load(Ordering::SeqCst), 1);
    assert!(h.cache_dir.join("bar-1.0.jar").is_file());
    assert!(h.save_path().is_file());
    assert!(h.scratch_is_empty());
}

#[test]
fn repeated_missing_package_stops_after_two_attempts() {
    let h = Harness::new();
    let outcome = h.run(&format!("echo '{MISSING_FOO}' >&2\nexit 1"));

    let f = outcome.failure().unwrap();
    assert_eq!(f.category, FailureCategory::Compilation);
    assert_eq!(f.reason, "repeated unresolved dependency com.foo.bar");
    assert_eq!(h.attempts(), 2);
    assert_eq!(h.registry.searches.load(Ordering::SeqCst), 1);
    assert!(!h.save_path().exists());
}

#[test]
fn unknown_package_is_unresolvable_after_one_attempt() {
    let h = Harness::new();
    let outcome = h.run("echo 'T.java:1: error: package com.nowhere does not exist' >&2\nexit 1");

    let f = outcome.failure().unwrap();
    assert_eq!(f.category, FailureCategory::Compilation);
    assert_eq!(f.reason, "unresolvable dependency com.nowhere");
    assert!(f.detail.contains("package com.nowhere does not exist"));
    assert_eq!(h.attempts(), 1);
    assert!(!h.save_path().exists());
}

#[test]
fn failed_download_leaves_no_partial_archive() {
    let mut h = Harness::new();
    h.registry.broken_download = true;
    let outcome = h.run(&format!("echo '{MISSING_FOO}' >&2\nexit 1"));

    assert_eq!(reason(&outcome), "unresolvable dependency com.foo.bar");
    let leftovers: Vec<_> = fs::read_dir(&h.cache_dir).unwrap().collect();
    assert!(leftovers.is_empty(), "cache should be empty, found {leftovers:?}");
}

#[test]
fn compiler_timeout_is_unrecoverable_without_resolving() {
    let h = Harness::new();
    let compile = h.compiler("exec sleep 5", 1);
    let outcome = h
        .pipeline(&compile, FixedGenerator(None), Arc::new(CannedSynthesizer::fenced()), false)
        .run(&CompilationUnit::new(UNIT), &CancelToken::new());

    let f = outcome.failure().unwrap();
    assert_eq!(f.category, FailureCategory::Compilation);
    assert!(f.reason.contains("timed out"), "{}", f.reason);
    assert!(f.reason.starts_with("[generator failed] "));
    assert_eq!(h.registry.searches.load(Ordering::SeqCst), 0);
    assert!(h.scratch_is_empty());
}

#[test]
fn syntax_error_keeps_transcript_and_previous_artifact() {
    let h = Harness::new();
    fs::create_dir_all(h.save_path().parent().unwrap()).unwrap();
    fs::write(h.save_path(), "// accepted earlier\n").unwrap();

    let outcome = h.run("echo \"CalculatorTest.java:7: error: ';' expected\" >&2\nexit 1");

    let f = outcome.failure().unwrap();
    assert_eq!(f.category, FailureCategory::Compilation);
    assert!(f.detail.contains("';' expected"));
    assert_eq!(h.attempts(), 1);
    assert_eq!(fs::read_to_string(h.save_path()).unwrap(), "// accepted earlier\n");
}

#[test]
fn accepting_twice_yields_identical_artifact() {
    let h = Harness::new();
    assert_eq!(h.run("exit 0"), JobOutcome::Success);
    let first = fs::read(h.save_path()).unwrap();
    assert_eq!(h.run("exit 0"), JobOutcome::Success);
    assert_eq!(fs::read(h.save_path()).unwrap(), first);
}

/* ---------- synthesis & inspiration ---------- */

#[test]
fn unparseable_reply_is_a_synthesis_failure() {
    let h = Harness::new();
    let compile = h.compiler("exit 0", 10);
    let outcome = h
        .pipeline(
            &compile,
            FixedGenerator(Some("x")),
            Arc::new(CannedSynthesizer::replying("Sorry, I cannot help with that.")),
            false,
        )
        .run(&CompilationUnit::new(UNIT), &CancelToken::new());

    let f = outcome.failure().unwrap();
    assert_eq!(f.category, FailureCategory::Synthesis);
    assert_eq!(f.reason, "no extractable code block");
    assert_eq!(h.attempts(), 0);
}

#[test]
fn raw_package_reply_is_accepted_without_fence() {
    let h = Harness::new();
    let compile = h.compiler("exit 0", 10);
    let outcome = h
        .pipeline(&compile, FixedGenerator(None), Arc::new(CannedSynthesizer::replying(TEST_SOURCE)), false)
        .run(&CompilationUnit::new(UNIT), &CancelToken::new());

    assert_eq!(outcome, JobOutcome::Success);
}

#[test]
fn missing_source_file_is_a_synthesis_failure() {
    let h = Harness::new();
    let compile = h.compiler("exit 0", 10);
    let outcome = h
        .pipeline(&compile, FixedGenerator(None), Arc::new(CannedSynthesizer::fenced()), false)
        .run(&CompilationUnit::new("org.example.Ghost"), &CancelToken::new());

    assert_eq!(outcome.failure().unwrap().category, FailureCategory::Synthesis);
    assert!(reason(&outcome).contains("source file not found"));
}

#[test]
fn synthesizer_error_is_a_synthesis_failure() {
    let h = Harness::new();
    let compile = h.compiler("exit 0", 10);
    let outcome = h
        .pipeline(&compile, FixedGenerator(None), Arc::new(CannedSynthesizer::default()), false)
        .run(&CompilationUnit::new(UNIT), &CancelToken::new());

    assert_eq!(outcome.failure().unwrap().category, FailureCategory::Synthesis);
}

#[test]
fn missing_inspiration_falls_back_to_source_only() {
    let h = Harness::new();
    let compile = h.compiler("exit 0", 10);
    let synth = Arc::new(CannedSynthesizer::fenced());
    let outcome = h
        .pipeline(&compile, FixedGenerator(None), Arc::clone(&synth), false)
        .run(&CompilationUnit::new(UNIT), &CancelToken::new());

    assert_eq!(outcome, JobOutcome::Success);
    assert_eq!(*synth.seen_inspiration.lock().unwrap(), vec![None]);
}

#[test]
fn inspiration_is_passed_to_the_synthesizer() {
    let h = Harness::new();
    let compile = h.compiler("exit 0", 10);
    let synth = Arc::new(CannedSynthesizer::fenced());
    h.pipeline(&compile, FixedGenerator(Some("class Calculator_ESTest {}")), Arc::clone(&synth), false)
        .run(&CompilationUnit::new(UNIT), &CancelToken::new());

    assert_eq!(
        *synth.seen_inspiration.lock().unwrap(),
        vec![Some("class Calculator_ESTest {}".to_string())]
    );
}

#[test]
fn required_inspiration_turns_absence_into_generator_failure() {
    let h = Harness::new();
    let compile = h.compiler("exit 0", 10);
    let synth = Arc::new(CannedSynthesizer::fenced());
    let outcome = h
        .pipeline(&compile, FixedGenerator(None), Arc::clone(&synth), true)
        .run(&CompilationUnit::new(UNIT), &CancelToken::new());

    assert_eq!(outcome.failure().unwrap().category, FailureCategory::Generator);
    assert!(synth.seen_inspiration.lock().unwrap().is_empty());
}

/// Stands in for a client whose rate-limit wait was interrupted.
struct InterruptedSynthesizer;

impl Synthesizer for InterruptedSynthesizer {
    fn synthesize(&self, _unit: &str, _inputs: SynthesisInputs<'_>, cancel: &CancelToken) -> Result<String, SynthesisError> {
        cancel.cancel();
        Err(SynthesisError::Cancelled)
    }
}

#[test]
fn cancelled_synthesis_ends_the_unit_without_compiling() {
    let h = Harness::new();
    let compile = h.compiler("exit 0", 10);
    let cache = Arc::new(DependencyCache::open(&h.cache_dir).unwrap());
    let pipeline = UnitPipeline::new(
        ProjectLayout::new(&h.root, LayoutConfig::default()),
        PipelineOptions {
            max_attempts: 5,
            base_archives: Vec::new(),
            require_inspiration: false,
        },
        Arc::new(FixedGenerator(None)),
        Arc::new(InterruptedSynthesizer),
        Arc::new(CompilerValidator::new(&compile)),
        Arc::new(DependencyResolver::new(h.registry.clone(), Arc::clone(&cache))),
        cache,
    );

    let outcome = pipeline.run(&CompilationUnit::new(UNIT), &CancelToken::new());

    let f = outcome.failure().unwrap();
    assert_eq!(f.category, FailureCategory::Other);
    assert!(f.reason.contains("cancelled"), "{}", f.reason);
    assert_eq!(h.attempts(), 0);
    assert!(!h.save_path().exists());
}

//! evogen: per-class JUnit 5 test synthesis with a self-healing compile loop.
//!
//! Each compiled class is taken through inspiration (EvoSuite), synthesis
//! (LLM), and validation (javac), where missing packages are resolved from
//! Maven Central and added to the classpath until the test compiles or the
//! retry budget runs out. A bounded worker pool runs units in parallel.

pub mod compile;
pub mod config;
pub mod discovery;
pub mod executor;
pub mod llm;
pub mod logger;
pub mod pipeline;
pub mod report;
pub mod scheduler;
pub mod state;
pub mod testgen;

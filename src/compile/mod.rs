//! Compile-and-heal: classpath assembly, dependency resolution, candidate
//! validation and the retry loop tying them together.

pub mod classpath;
pub mod healing;
pub mod resolver;
pub mod validator;

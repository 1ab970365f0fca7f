pub mod cache;
pub mod candidate;
pub mod generator;
pub mod materialize;

//! Untrusted-code checking sandbox.
//!
//! Merges a submission with its hidden fixture, runs the result inside a
//! one-shot Docker container per language profile and turns the captured
//! output into a verdict. Every container and staged file is torn down on
//! every exit path.

pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod profiles;
pub mod session;
pub mod stager;
pub mod storage;

#[cfg(test)]
mod fake;

pub use config::SandboxConfig;
pub use engine::{ContainerRuntime, DockerEngine};
pub use error::{CheckError, StoreError};
pub use executor::{Checker, ExecutionResult};
pub use profiles::{LanguageProfile, MergeOrder};
pub use session::Step;
pub use storage::{FixtureStore, FsFixtureStore};

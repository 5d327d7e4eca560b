//! Language Profile Registry
//!
//! Fixed, process-wide table describing each supported toolchain. Built once
//! on first use and never mutated, so concurrent checks read it without locking.

use std::collections::HashMap;

use codepilot_common::types::Language;
use lazy_static::lazy_static;

use crate::error::CheckError;

/// Directory inside the container that holds the staged source
pub const APP_DIR: &str = "/usr/src/app";

/// Position of the hidden fixture relative to the user's code.
///
/// Fixed per language, e.g. Rust puts the fixture first so its `main`
/// and `use` items lead the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOrder {
    CodeThenTest,
    TestThenCode,
}

impl MergeOrder {
    pub fn merge(&self, user_code: &str, fixture: &str) -> String {
        match self {
            MergeOrder::CodeThenTest => format!("{}\n{}", user_code, fixture),
            MergeOrder::TestThenCode => format!("{}\n{}", fixture, user_code),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LanguageProfile {
    pub language: Language,
    pub image: String,
    pub file_extension: String,
    /// Absent for toolchains whose run command builds and executes in one go
    pub compile_command: Option<Vec<String>>,
    pub run_command: Vec<String>,
    pub merge_order: MergeOrder,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
}

impl LanguageProfile {
    /// Path of the merged source inside the container
    pub fn source_path(&self) -> String {
        source_path(&self.file_extension)
    }

    pub fn has_compile_step(&self) -> bool {
        self.compile_command.is_some()
    }
}

fn source_path(ext: &str) -> String {
    format!("{}/code_with_tests.{}", APP_DIR, ext)
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

fn build_profiles() -> HashMap<Language, LanguageProfile> {
    let binary = format!("{}/main", APP_DIR);
    let mut profiles = HashMap::new();

    profiles.insert(
        Language::Python,
        LanguageProfile {
            language: Language::Python,
            image: "python:3-alpine".to_string(),
            file_extension: "py".to_string(),
            compile_command: None,
            run_command: argv(&["python", &source_path("py")]),
            merge_order: MergeOrder::CodeThenTest,
            memory_limit_mb: 256,
            cpu_limit: 0.5,
        },
    );

    profiles.insert(
        Language::Go,
        LanguageProfile {
            language: Language::Go,
            image: "golang:1.21.4-alpine3.17".to_string(),
            file_extension: "go".to_string(),
            compile_command: None,
            run_command: argv(&["go", "run", &source_path("go")]),
            merge_order: MergeOrder::CodeThenTest,
            memory_limit_mb: 512,
            cpu_limit: 1.0,
        },
    );

    profiles.insert(
        Language::Rust,
        LanguageProfile {
            language: Language::Rust,
            image: "rust:alpine3.17".to_string(),
            file_extension: "rs".to_string(),
            compile_command: Some(argv(&["rustc", &source_path("rs"), "-o", &binary])),
            run_command: argv(&[&binary]),
            merge_order: MergeOrder::TestThenCode,
            memory_limit_mb: 512,
            cpu_limit: 1.0,
        },
    );

    profiles.insert(
        Language::Cpp,
        LanguageProfile {
            language: Language::Cpp,
            image: "gcc:bookworm".to_string(),
            file_extension: "cpp".to_string(),
            compile_command: Some(argv(&[
                "g++",
                &source_path("cpp"),
                "-o",
                &binary,
                "-std=c++20",
            ])),
            run_command: argv(&[&binary]),
            merge_order: MergeOrder::CodeThenTest,
            memory_limit_mb: 512,
            cpu_limit: 1.0,
        },
    );

    profiles
}

lazy_static! {
    static ref PROFILES: HashMap<Language, LanguageProfile> = build_profiles();
}

/// Resolve a language name to its profile
pub fn lookup(language_name: &str) -> Result<&'static LanguageProfile, CheckError> {
    let language: Language = language_name
        .parse()
        .map_err(|_| CheckError::NotSupported(language_name.to_string()))?;

    get(language).ok_or_else(|| CheckError::NotSupported(language_name.to_string()))
}

pub fn get(language: Language) -> Option<&'static LanguageProfile> {
    PROFILES.get(&language)
}

/// All registered profiles, in `Language::ALL` order
pub fn languages() -> impl Iterator<Item = &'static LanguageProfile> {
    Language::ALL.into_iter().filter_map(get)
}

//! Error types for the patchspec-ir crate
//!
//! Unified error handling across all features:
//! - Categorized error kinds matching the pipeline phases
//! - Optional file path and line context
//! - Fatal kinds (Config, PatchMalformed) propagate to the caller; every
//!   other kind is recovered locally and logged

use thiserror::Error;

/// Error kind categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed CLI options, unreadable files
    Config,
    /// A diff line that does not parse
    PatchMalformed,
    /// No SEG available for a function referenced by the diff
    IrMissing,
    /// SMT returned Unknown or timed out
    AnalysisBudget,
    /// Unknown tag in a spec CSV row
    SpecMalformed,
    /// IO errors
    Io,
    /// Internal errors (bugs)
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::PatchMalformed => "patch_malformed",
            ErrorKind::IrMissing => "ir_missing",
            ErrorKind::AnalysisBudget => "analysis_budget",
            ErrorKind::SpecMalformed => "spec_malformed",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        }
    }

    /// Fatal kinds abort the run; the rest are recovered locally.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::Config | ErrorKind::PatchMalformed)
    }
}

/// Unified error type
#[derive(Debug, Error)]
#[error("[{}] {message}{}", .kind.as_str(), location_suffix(.file_path, .line))]
pub struct PatchSpecError {
    pub kind: ErrorKind,
    pub message: String,
    pub file_path: Option<String>,
    pub line: Option<u32>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

fn location_suffix(file_path: &Option<String>, line: &Option<u32>) -> String {
    match (file_path, line) {
        (Some(f), Some(l)) => format!(" in {}:{}", f, l),
        (Some(f), None) => format!(" in {}", f),
        _ => String::new(),
    }
}

impl PatchSpecError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file_path: None,
            line: None,
            source: None,
        }
    }

    pub fn with_file(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn patch_malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PatchMalformed, message)
    }

    pub fn ir_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IrMissing, message)
    }

    pub fn analysis_budget(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AnalysisBudget, message)
    }

    pub fn spec_malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SpecMalformed, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<std::io::Error> for PatchSpecError {
    fn from(err: std::io::Error) -> Self {
        PatchSpecError::new(ErrorKind::Io, err.to_string()).with_source(err)
    }
}

impl From<csv::Error> for PatchSpecError {
    fn from(err: csv::Error) -> Self {
        PatchSpecError::new(ErrorKind::SpecMalformed, err.to_string()).with_source(err)
    }
}

impl From<serde_json::Error> for PatchSpecError {
    fn from(err: serde_json::Error) -> Self {
        PatchSpecError::new(ErrorKind::Config, format!("module image: {}", err)).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, PatchSpecError>;

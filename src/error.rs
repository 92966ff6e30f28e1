//! Error types for template loading, property resolution, and evaluation

use thiserror::Error;

use crate::value::Value;

/// Joins aggregated validation errors for display.
pub(crate) fn join_errors(errors: &[MasonryError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum MasonryError {
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("invalid construct type '{input}': {reason}")]
    InvalidConstructType { input: String, reason: String },

    #[error("invalid URN '{input}': {reason}")]
    InvalidUrn { input: String, reason: String },

    #[error("invalid resource id '{input}': {reason}")]
    InvalidResourceId { input: String, reason: String },

    #[error("invalid property reference '{input}'")]
    InvalidPropertyRef { input: String },

    #[error("invalid path syntax '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("index {index} out of bounds at '{path}' (len {len})")]
    IndexOutOfBounds { path: String, index: usize, len: usize },

    #[error("unknown property type '{tag}'")]
    UnknownPropertyType { tag: String },

    #[error("required property {path} is not set")]
    RequiredProperty { path: String },

    #[error("property {path}: expected {expected}, got {actual}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        actual: String,
    },

    #[error("property {path}: value {value} is not in allowed values")]
    NotAllowed { path: String, value: Value },

    #[error("property {path}: {reason}")]
    Bounds { path: String, reason: String },

    #[error(transparent)]
    Sanitized(#[from] SanitizeError),

    #[error("{}", join_errors(.0))]
    Aggregate(Vec<MasonryError>),

    #[error("template for construct '{0}' not found")]
    TemplateNotFound(String),

    #[error("construct '{0}' is not registered")]
    UrnNotFound(String),

    #[error("graph contains a cycle involving '{0}'")]
    GraphCycle(String),

    #[error("edge endpoint '{0}' does not exist in graph")]
    MissingEndpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Non-fatal validation signal: the value failed a sanitization rule and a
/// corrected value is available. Callers may accept `sanitized` instead of
/// treating this as fatal.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("value {input} does not match sanitization rules (corrected: {sanitized})")]
pub struct SanitizeError {
    pub input: Value,
    pub sanitized: Value,
}

impl MasonryError {
    /// Flattens a list of child errors into a single error.
    ///
    /// When every child failure is a sanitization, the aggregate is itself a
    /// `SanitizeError` so callers can still accept the corrected collection.
    pub fn aggregate(errors: Vec<MasonryError>) -> Option<MasonryError> {
        match errors.len() {
            0 => None,
            1 => errors.into_iter().next(),
            _ => Some(MasonryError::Aggregate(errors)),
        }
    }

    /// Returns the corrected value when this error (or every error it
    /// aggregates) is a sanitization signal.
    pub fn sanitized_value(&self) -> Option<&SanitizeError> {
        match self {
            MasonryError::Sanitized(s) => Some(s),
            _ => None,
        }
    }
}

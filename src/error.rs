//! Error types for the SIGMA DAG engine.

use std::fmt;

pub type Result<T> = std::result::Result<T, SigmaError>;

/// Errors produced during rule compilation and DAG evaluation.
///
/// Compilation errors are collected per rule by the [`Compiler`](crate::Compiler)
/// so that one malformed rule does not abort a batch. Evaluation errors are
/// fatal for the current event only; a missing event field is not an error
/// but a normal `false` primitive result.
#[derive(Debug, Clone, PartialEq)]
pub enum SigmaError {
    CompilationError(String),
    ExecutionError(String),
    InvalidBytecode(String),
    IncompatibleVersion(u32),
    InvalidPrimitiveId(u32),
    InvalidPrimitiveIndex(usize),
    StackUnderflow,
    StackOverflow,
    UnsupportedMatchType(String),
    InvalidRegex(String),
    DangerousRegexPattern(String),
    InvalidIpAddress(String),
    InvalidCidr(String),
    InvalidNumber(String),
    InvalidRange(String),
    InvalidThreshold(String),
    ModifierError(String),
    FieldExtractionError(String),
    InvalidFieldPath(String),
    ExecutionTimeout,
    TooManyOperations(u64),
    TooManyRegexOperations(u64),
    BatchSizeMismatch,
    IoError(String),
    YamlError(String),
}

impl fmt::Display for SigmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigmaError::CompilationError(msg) => write!(f, "Compilation error: {msg}"),
            SigmaError::ExecutionError(msg) => write!(f, "Execution error: {msg}"),
            SigmaError::InvalidBytecode(msg) => write!(f, "Invalid bytecode: {msg}"),
            SigmaError::IncompatibleVersion(version) => {
                write!(f, "Incompatible version: {version}")
            }
            SigmaError::InvalidPrimitiveId(id) => write!(f, "Invalid primitive ID: {id}"),
            SigmaError::InvalidPrimitiveIndex(idx) => write!(f, "Invalid primitive index: {idx}"),
            SigmaError::StackUnderflow => write!(f, "Stack underflow during execution"),
            SigmaError::StackOverflow => write!(f, "Stack overflow during execution"),
            SigmaError::UnsupportedMatchType(match_type) => {
                write!(f, "Unsupported match type: {match_type}")
            }
            SigmaError::InvalidRegex(pattern) => write!(f, "Invalid regex pattern: {pattern}"),
            SigmaError::DangerousRegexPattern(pattern) => {
                write!(f, "Dangerous regex pattern detected: {pattern}")
            }
            SigmaError::InvalidIpAddress(ip) => write!(f, "Invalid IP address: {ip}"),
            SigmaError::InvalidCidr(cidr) => write!(f, "Invalid CIDR notation: {cidr}"),
            SigmaError::InvalidNumber(num) => write!(f, "Invalid number: {num}"),
            SigmaError::InvalidRange(range) => write!(f, "Invalid range: {range}"),
            SigmaError::InvalidThreshold(threshold) => {
                write!(f, "Invalid threshold: {threshold}")
            }
            SigmaError::ModifierError(msg) => write!(f, "Modifier error: {msg}"),
            SigmaError::FieldExtractionError(msg) => write!(f, "Field extraction error: {msg}"),
            SigmaError::InvalidFieldPath(path) => write!(f, "Invalid field path: {path}"),
            SigmaError::ExecutionTimeout => write!(f, "Execution timeout exceeded"),
            SigmaError::TooManyOperations(count) => write!(f, "Too many operations: {count}"),
            SigmaError::TooManyRegexOperations(count) => {
                write!(f, "Too many regex operations: {count}")
            }
            SigmaError::BatchSizeMismatch => write!(f, "Batch size mismatch"),
            SigmaError::IoError(msg) => write!(f, "IO error: {msg}"),
            SigmaError::YamlError(msg) => write!(f, "YAML parsing error: {msg}"),
        }
    }
}

impl std::error::Error for SigmaError {}

impl From<std::io::Error> for SigmaError {
    fn from(err: std::io::Error) -> Self {
        SigmaError::IoError(err.to_string())
    }
}

impl From<serde_yaml::Error> for SigmaError {
    fn from(err: serde_yaml::Error) -> Self {
        SigmaError::YamlError(err.to_string())
    }
}

//! Error types for the obfuscation pipeline
//!
//! Lexing and parsing failures are fatal. Transform failures are recovered
//! per literal, VM lowering failures degrade to a no-op instruction, and
//! anything else surfaces to the caller as an [`ObfuscateError`].

use thiserror::Error;

/// Tokenizer failure with its source position
#[derive(Debug, Clone, PartialEq, Error)]
#[error("lex error at {line}:{column}: {message}")]
pub struct LexError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl LexError {
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

/// Parser failure with its source position
#[derive(Debug, Clone, PartialEq, Error)]
#[error("parse error at {line}:{column}: {message}")]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

/// A single literal could not be rewritten; the literal is kept as-is
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("string of {0} bytes is too long for this encoding")]
    StringTooLong(usize),

    #[error("integer {0} is outside the range this encoding preserves")]
    IntegerOutOfRange(i64),

    #[error("literal cannot be encoded: {0}")]
    Unsupported(String),
}

/// A construct the bytecode compiler could not lower
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmCompileError {
    #[error("no visible label '{0}' for goto")]
    UnresolvedGoto(String),

    #[error("break outside a loop")]
    BreakOutsideLoop,

    #[error("operand {0} does not fit in an instruction field")]
    OperandOverflow(i64),
}

/// Errors loading an options file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Failure of a whole obfuscation call
#[derive(Debug, Error)]
pub enum ObfuscateError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("pass '{pass}' failed: {message}")]
    Pass { pass: &'static str, message: String },

    #[error("output assembly failed: {0}")]
    Assembly(String),
}

pub type Result<T> = std::result::Result<T, ObfuscateError>;

//! Moonveil Core Library
//!
//! This crate provides the core functionality for Moonveil:
//! - Lua 5.4 / Luau lexing, parsing and printing
//! - Source-level transform passes (renaming, string and constant
//!   encryption, junk code, control-flow flattening)
//! - Bytecode virtualization with a generated interpreter
//! - Integrity and environment checks, watermarking
//! - Minification and quick structural validation
//!
//! Output is a pure function of `(source, options)`: the same seed always
//! produces the same bytes.

pub mod ast;
pub mod config;
pub mod error;
pub mod lexer;
pub mod minify;
pub mod obfuscator;
pub mod parser;
pub mod printer;
pub mod random;
pub mod security;
pub mod session;
pub mod target;
pub mod transform;
pub mod validate;
pub mod vm;

// Re-export commonly used types
pub use config::{
    FailAction, Features, ObfuscateOptions, Tuning, WatermarkPosition, WatermarkStyle,
    CONFIG_FILE_NAME, FEATURE_NAMES,
};
pub use error::{ConfigError, LexError, ObfuscateError, ParseError, TransformError, VmCompileError};
pub use minify::minify;
pub use obfuscator::{obfuscate, ObfuscateResponse, ObfuscationOutput, Obfuscator};
pub use parser::{parse, ParseOrLexError};
pub use printer::print_block;
pub use session::Stats;
pub use target::Target;
pub use validate::{validate_code, Validation};

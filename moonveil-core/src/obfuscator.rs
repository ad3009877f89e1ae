//! Lua Obfuscator
//!
//! Runs one source file through the full pipeline:
//!
//! - parse into an AST
//! - source passes (rename, strings, constants, junk, control flow)
//! - optional bytecode virtualization
//! - integrity and environment checks, watermark
//! - printing and optional minification
//!
//! Every call builds its own [`Session`]; an [`Obfuscator`] holds nothing
//! but its options and can be shared freely.

use std::fs;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ast::{collect_names, Block};
use crate::config::ObfuscateOptions;
use crate::error::ObfuscateError;
use crate::minify::minify;
use crate::parser::{parse, ParseOrLexError};
use crate::printer::print_block;
use crate::security::{EnvironmentChecker, IntegrityChecker, Watermark};
use crate::session::{Session, Stats};
use crate::transform::{source_passes, Pass};
use crate::vm::VmWrapper;

/// Obfuscated program text and what was done to it
#[derive(Debug, Clone, PartialEq)]
pub struct ObfuscationOutput {
    pub code: String,
    pub stats: Stats,
}

/// JSON shape handed to callers: `{success, code, stats}` or
/// `{success: false, error}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObfuscateResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Stats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<std::result::Result<ObfuscationOutput, ObfuscateError>> for ObfuscateResponse {
    fn from(result: std::result::Result<ObfuscationOutput, ObfuscateError>) -> Self {
        match result {
            Ok(output) => Self {
                success: true,
                code: Some(output.code),
                stats: Some(output.stats),
                error: None,
            },
            Err(err) => Self {
                success: false,
                code: None,
                stats: None,
                error: Some(err.to_string()),
            },
        }
    }
}

impl From<ParseOrLexError> for ObfuscateError {
    fn from(err: ParseOrLexError) -> Self {
        match err {
            ParseOrLexError::Lex(e) => ObfuscateError::Lex(e),
            ParseOrLexError::Parse(e) => ObfuscateError::Parse(e),
        }
    }
}

/// Obfuscator instance with its options
#[derive(Debug, Clone, Default)]
pub struct Obfuscator {
    options: ObfuscateOptions,
}

impl Obfuscator {
    pub fn new(options: ObfuscateOptions) -> Self {
        Self { options }
    }

    /// Default options: standard target, seed 0, every feature off
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Load options from a `moonveil.toml`
    pub fn from_config_file(path: &Path) -> Result<Self> {
        Ok(Self::new(ObfuscateOptions::from_config_file(path)?))
    }

    pub fn options(&self) -> &ObfuscateOptions {
        &self.options
    }

    pub fn obfuscate(&self, source: &str) -> std::result::Result<ObfuscationOutput, ObfuscateError> {
        obfuscate(source, &self.options)
    }

    /// Obfuscate a Lua source file, returning the transformed content
    pub fn obfuscate_file(&self, path: &Path) -> Result<ObfuscationOutput> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        self.obfuscate(&source)
            .with_context(|| format!("Failed to obfuscate {}", path.display()))
    }
}

fn run_pass(pass: &dyn Pass, program: &mut Block, session: &mut Session) -> std::result::Result<(), ObfuscateError> {
    let started = Instant::now();
    pass.run(program, session)?;
    debug!("pass {} took {:?}", pass.name(), started.elapsed());
    Ok(())
}

/// Obfuscate `source` with `options`
///
/// Either the whole pipeline succeeds and a complete program is returned, or
/// nothing is.
pub fn obfuscate(source: &str, options: &ObfuscateOptions) -> std::result::Result<ObfuscationOutput, ObfuscateError> {
    let started = Instant::now();
    let mut program = parse(source)?;
    let mut session = Session::new(options, &collect_names(&program));
    session.stats.input_size = source.len();
    let features = session.features;

    for pass in source_passes(&features) {
        run_pass(pass.as_ref(), &mut program, &mut session)?;
    }
    // Library functions are captured before any user code can shadow them
    session.bind_globals(&mut program);
    if features.vm_obfuscation {
        run_pass(&VmWrapper, &mut program, &mut session)?;
    }
    if features.integrity_check {
        run_pass(&IntegrityChecker::new(source), &mut program, &mut session)?;
    }
    if features.environment_check {
        run_pass(&EnvironmentChecker, &mut program, &mut session)?;
    }
    let watermark = if features.watermark {
        let mark = Watermark::new(&mut session);
        run_pass(&mark, &mut program, &mut session)?;
        Some(mark)
    } else {
        None
    };
    session.bind_globals(&mut program);

    let mut code = print_block(&program);
    // The printed program must read back before it is handed out
    parse(&code).map_err(|e| ObfuscateError::Assembly(format!("printed program does not parse: {}", e)))?;
    if let Some(mark) = &watermark {
        code = mark.decorate(&code);
    }
    if features.minify {
        code = minify(&code).map_err(|e| ObfuscateError::Assembly(e.to_string()))?;
    }

    let mut stats = session.stats;
    stats.output_size = code.len();
    stats.time_ms = started.elapsed().as_millis() as u64;
    info!(
        "obfuscated {} bytes into {} bytes for {}",
        stats.input_size, stats.output_size, options.target
    );
    Ok(ObfuscationOutput { code, stats })
}

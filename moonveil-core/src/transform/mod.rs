//! Source-level transform passes
//!
//! Each pass rewrites the AST in place and records what it did in the
//! session stats. Passes run in a fixed order; disabled ones are skipped.

pub mod constants;
pub mod flatten;
pub mod junk;
pub mod opaque;
pub mod rename;
pub mod strings;

use crate::ast::Block;
use crate::config::Features;
use crate::error::ObfuscateError;
use crate::session::Session;

pub use constants::ConstantEncryptor;
pub use flatten::ControlFlowFlattener;
pub use junk::JunkInjector;
pub use rename::Renamer;
pub use strings::StringEncryptor;

/// A single AST rewrite
pub trait Pass {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    fn run(&self, program: &mut Block, session: &mut Session) -> Result<(), ObfuscateError>;
}

/// The source passes enabled by `features`, in pipeline order
pub fn source_passes(features: &Features) -> Vec<Box<dyn Pass>> {
    let mut passes: Vec<Box<dyn Pass>> = Vec::new();
    if features.variable_renaming {
        passes.push(Box::new(Renamer));
    }
    if features.string_encryption {
        passes.push(Box::new(StringEncryptor));
    }
    if features.constant_encryption {
        passes.push(Box::new(ConstantEncryptor));
    }
    if features.junk_code {
        passes.push(Box::new(JunkInjector));
    }
    if features.control_flow {
        passes.push(Box::new(ControlFlowFlattener));
    }
    passes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_order_is_fixed() {
        let names: Vec<_> = source_passes(&Features::all()).iter().map(|p| p.name()).collect();
        assert_eq!(names, ["rename", "strings", "constants", "junk", "controlflow"]);
    }

    #[test]
    fn test_disabled_passes_are_omitted() {
        let features = Features {
            constant_encryption: true,
            control_flow: true,
            ..Default::default()
        };
        let names: Vec<_> = source_passes(&features).iter().map(|p| p.name()).collect();
        assert_eq!(names, ["constants", "controlflow"]);
    }
}

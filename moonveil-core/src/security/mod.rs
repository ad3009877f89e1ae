//! Runtime self-checks and watermarking
//!
//! These passes run after the program (or the VM interpreter wrapping it)
//! is final. Their code is written as Lua text with generated names spliced
//! in, then parsed back so it joins the AST like everything else.

pub mod environment;
pub mod integrity;
pub mod watermark;

use crate::ast::Block;
use crate::config::FailAction;
use crate::error::ObfuscateError;
use crate::parser::parse;
use crate::printer::print_expr;
use crate::session::Session;
use crate::transform::strings::xor_closure;

pub use environment::EnvironmentChecker;
pub use integrity::IntegrityChecker;
pub use watermark::Watermark;

/// Statement text run when a check fails
pub(crate) fn fail_code(session: &mut Session, action: FailAction, message: &str) -> String {
    match action {
        FailAction::Error => {
            let text = print_expr(&xor_closure(session, message.as_bytes()));
            format!("error({}, 0)", text)
        }
        FailAction::Loop => "while true do end".to_string(),
        FailAction::Silent => "return".to_string(),
    }
}

/// Parse generated check code
pub(crate) fn parse_snippet(pass: &'static str, source: &str) -> Result<Block, ObfuscateError> {
    parse(source).map_err(|e| ObfuscateError::Pass {
        pass,
        message: format!("generated code did not parse: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Features, ObfuscateOptions};
    use crate::target::Target;
    use std::collections::BTreeSet;

    #[test]
    fn test_fail_code_forms() {
        let options = ObfuscateOptions::new(Target::Standard, 4, Features::default());
        let mut s = Session::new(&options, &BTreeSet::new());
        assert_eq!(fail_code(&mut s, FailAction::Loop, "x"), "while true do end");
        assert_eq!(fail_code(&mut s, FailAction::Silent, "x"), "return");

        let code = fail_code(&mut s, FailAction::Error, "tampered");
        assert!(code.starts_with("error("));
        assert!(!code.contains("tampered"));
        let mut block = parse(&code).unwrap();
        s.bind_globals(&mut block);
        let lua = mlua::Lua::new();
        let err = lua.load(crate::printer::print_block(&block).as_str()).exec().unwrap_err();
        assert!(err.to_string().contains("tampered"));
    }

    #[test]
    fn test_parse_snippet_reports_pass() {
        let err = parse_snippet("integrity", "if then").unwrap_err();
        assert!(err.to_string().starts_with("pass 'integrity' failed"));
    }
}

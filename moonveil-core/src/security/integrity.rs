//! Integrity check
//!
//! The pre-transform source is hashed and mixed with a session salt into a
//! seal string, along with the source length. The emitted check is a closure
//! called at the chunk head before anything else runs; it rehashes the seal
//! and compares it against an encrypted expected value, so editing the seal
//! (or the constant) trips the fail action and the body never starts.

use tracing::debug;

use super::{fail_code, parse_snippet};
use crate::ast::Block;
use crate::error::ObfuscateError;
use crate::printer::{print_expr, quote_string};
use crate::session::Session;
use crate::transform::constants::encrypt_int;
use crate::transform::opaque;
use crate::transform::Pass;

/// `h = (h * 31 + b) mod 2^32` over `bytes`
pub fn rolling_hash(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u64, |h, b| (h * 31 + *b as u64) % (1 << 32)) as u32
}

pub struct IntegrityChecker {
    source_hash: u32,
    source_len: u32,
}

impl IntegrityChecker {
    /// Checker sealed over the original program text
    pub fn new(source: &str) -> Self {
        Self {
            source_hash: rolling_hash(source.as_bytes()),
            source_len: source.len() as u32,
        }
    }
}

impl Pass for IntegrityChecker {
    fn name(&self) -> &'static str {
        "integrity"
    }

    fn run(&self, program: &mut Block, session: &mut Session) -> Result<(), ObfuscateError> {
        let salt = session.random.next_int(1, u32::MAX as i64) as u32;
        let seal = format!(
            "{:08x}{:08x}{:08x}",
            self.source_hash ^ salt,
            salt,
            self.source_len ^ salt
        );
        let expected = rolling_hash(seal.as_bytes());
        let expected = encrypt_int(session, expected as i64).map_err(|e| ObfuscateError::Pass {
            pass: "integrity",
            message: e.to_string(),
        })?;

        let s = session.fresh_name();
        let h = session.fresh_name();
        let i = session.fresh_name();
        let gate = print_expr(&opaque::always_true(session));
        let action = session.tuning.integrity_fail_action;
        let fail = fail_code(session, action, "integrity check failed");

        // A silent failure returns nil from the closure, which stops the chunk
        let code = format!(
            "if not (function()\n\
             local {s} = {seal}\n\
             local {h} = 0\n\
             for {i} = 1, #{s} do\n\
             {h} = ({h} * 31 + string.byte({s}, {i})) % 4294967296\n\
             end\n\
             if {gate} then\n\
             if {h} ~= {expected} then {fail} end\n\
             end\n\
             return true\n\
             end)() then return end",
            seal = quote_string(seal.as_bytes()),
            expected = print_expr(&expected),
        );
        let check = parse_snippet(self.name(), &code)?;
        program.splice(0..0, check);
        debug!("integrity seal {}", seal);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FailAction, Features, ObfuscateOptions};
    use crate::parser::parse;
    use crate::printer::print_block;
    use crate::target::Target;
    use std::collections::BTreeSet;

    fn checked(source: &str, action: FailAction) -> String {
        let mut block = parse(source).unwrap();
        let mut options = ObfuscateOptions::new(Target::Standard, 10, Features::default());
        options.tuning.integrity_fail_action = action;
        let mut session = Session::new(&options, &BTreeSet::new());
        IntegrityChecker::new(source).run(&mut block, &mut session).unwrap();
        session.bind_globals(&mut block);
        print_block(&block)
    }

    #[test]
    fn test_rolling_hash_known_values() {
        assert_eq!(rolling_hash(b""), 0);
        assert_eq!(rolling_hash(b"a"), 97);
        assert_eq!(rolling_hash(b"ab"), 97 * 31 + 98);
        // wraps at 2^32
        let long = vec![0xffu8; 64];
        let expected = long
            .iter()
            .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(*b as u32));
        assert_eq!(rolling_hash(&long), expected);
    }

    #[test]
    fn test_untouched_program_runs() {
        let out = checked("return 'ok'", FailAction::Error);
        let lua = mlua::Lua::new();
        assert_eq!(lua.load(out.as_str()).eval::<String>().unwrap(), "ok");
    }

    #[test]
    fn test_tampered_seal_fails() {
        let out = checked("return 'ok'", FailAction::Error);
        // flip one hex digit of the seal
        let start = out.find("= \"").unwrap() + 3;
        let digit = &out[start..start + 1];
        let replacement = if digit == "0" { "1" } else { "0" };
        let tampered = format!("{}{}{}", &out[..start], replacement, &out[start + 1..]);
        let lua = mlua::Lua::new();
        let err = lua.load(tampered.as_str()).eval::<String>().unwrap_err();
        assert!(err.to_string().contains("integrity check failed"));
    }

    #[test]
    fn test_check_runs_before_body() {
        let source = "ran = true\nreturn 'ok'";
        let out = checked(source, FailAction::Silent);
        assert!(out.contains("(function()"));
        let start = out.find("= \"").unwrap() + 3;
        // salt sits in the middle third, the salted length in the last
        let seal = &out[start..start + 24];
        let salt = u32::from_str_radix(&seal[8..16], 16).unwrap();
        let len = u32::from_str_radix(&seal[16..24], 16).unwrap() ^ salt;
        assert_eq!(len as usize, source.len());

        let replacement = if &out[start..start + 1] == "0" { "1" } else { "0" };
        let tampered = format!("{}{}{}", &out[..start], replacement, &out[start + 1..]);
        let lua = mlua::Lua::new();
        let value: mlua::Value = lua.load(tampered.as_str()).eval().unwrap();
        assert_eq!(value, mlua::Value::Nil);
        assert_eq!(lua.globals().get::<_, mlua::Value>("ran").unwrap(), mlua::Value::Nil);
    }

    #[test]
    fn test_silent_action_returns_nothing() {
        let out = checked("return 'ok'", FailAction::Silent);
        let start = out.find("= \"").unwrap() + 3;
        let digit = &out[start..start + 1];
        let replacement = if digit == "0" { "1" } else { "0" };
        let tampered = format!("{}{}{}", &out[..start], replacement, &out[start + 1..]);
        let lua = mlua::Lua::new();
        let value: mlua::Value = lua.load(tampered.as_str()).eval().unwrap();
        assert_eq!(value, mlua::Value::Nil);
    }
}

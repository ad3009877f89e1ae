//! Environment checks
//!
//! Refuses to run when a debugger hook is installed, when core library
//! functions have been replaced by Lua closures, or when the runtime does
//! not look like the target.

use tracing::debug;

use super::{fail_code, parse_snippet};
use crate::ast::Block;
use crate::config::FailAction;
use crate::error::ObfuscateError;
use crate::session::Session;
use crate::target::Target;
use crate::transform::Pass;

pub struct EnvironmentChecker;

impl Pass for EnvironmentChecker {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn run(&self, program: &mut Block, session: &mut Session) -> Result<(), ObfuscateError> {
        // Never runs on roblox; the target profile already filtered it out
        if !session.profile.allows_environment_check {
            return Ok(());
        }
        let action = session.tuning.integrity_fail_action;

        let mut checks = vec![hook_check(session, action)];
        checks.push(native_check(session, action));
        checks.push(runtime_check(session, action));
        if session.profile.executor_fingerprints {
            checks.push(executor_check(session, action));
        }
        session.random.shuffle(&mut checks);

        let code = format!("do\n{}\nend", checks.join("\n"));
        let block = parse_snippet(self.name(), &code)?;
        program.splice(0..0, block);
        debug!("environment checks added for {}", session.target);
        Ok(())
    }
}

/// A debug hook is installed
fn hook_check(session: &mut Session, action: FailAction) -> String {
    let fail = fail_code(session, action, "debugger detected");
    format!("if debug and debug.gethook and debug.gethook() then {fail} end")
}

/// Core functions must still be C functions
fn native_check(session: &mut Session, action: FailAction) -> String {
    let f = session.fresh_name();
    let w = session.fresh_name();
    let fail = fail_code(session, action, "tampered runtime");
    match session.target {
        Target::Standard => format!(
            "if debug and debug.getinfo then\n\
             for _, {f} in ipairs({{tostring, pcall, string.char}}) do\n\
             local {w} = debug.getinfo({f}, \"S\")\n\
             if {w} and {w}.what ~= \"C\" then {fail} end\n\
             end\n\
             end"
        ),
        Target::Roblox | Target::Loadstring => format!(
            "if debug and debug.info then\n\
             for _, {f} in ipairs({{tostring, pcall, string.char}}) do\n\
             if debug.info({f}, \"s\") ~= \"[C]\" then {fail} end\n\
             end\n\
             end"
        ),
    }
}

/// Globals every runtime of the target provides
fn runtime_check(session: &mut Session, action: FailAction) -> String {
    let fail = fail_code(session, action, "unsupported runtime");
    match session.target {
        Target::Standard => format!(
            "if type(string) ~= \"table\" or type(math) ~= \"table\" or type(table) ~= \"table\" then {fail} end"
        ),
        Target::Roblox | Target::Loadstring => format!(
            "if type(game) ~= \"userdata\" or type(task) ~= \"table\" then {fail} end"
        ),
    }
}

/// Executor-provided closures must not be hooked, and the code must run on
/// the executor's own thread
fn executor_check(session: &mut Session, action: FailAction) -> String {
    let fail = fail_code(session, action, "hooked executor");
    format!(
        "if iscclosure and (not iscclosure(print) or not iscclosure(loadstring)) then {fail} end\n\
         if checkcaller and not checkcaller() then {fail} end"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Features, ObfuscateOptions};
    use crate::parser::parse;
    use crate::printer::print_block;
    use std::collections::BTreeSet;

    fn guarded(source: &str, target: Target) -> (Block, String) {
        let mut block = parse(source).unwrap();
        let options = ObfuscateOptions::new(target, 3, Features::default());
        let mut session = Session::new(&options, &BTreeSet::new());
        EnvironmentChecker.run(&mut block, &mut session).unwrap();
        session.bind_globals(&mut block);
        let printed = print_block(&block);
        (block, printed)
    }

    /// A runtime with the debug library loaded
    fn with_debug() -> mlua::Lua {
        unsafe { mlua::Lua::unsafe_new() }
    }

    #[test]
    fn test_clean_runtime_passes() {
        let (_, out) = guarded("return 1 + 1", Target::Standard);
        assert_eq!(with_debug().load(out.as_str()).eval::<i64>().unwrap(), 2);
        assert_eq!(mlua::Lua::new().load(out.as_str()).eval::<i64>().unwrap(), 2);
    }

    #[test]
    fn test_replaced_tostring_fails() {
        let (_, out) = guarded("return 1", Target::Standard);
        let lua = with_debug();
        lua.load("tostring = function(v) return '' end").exec().unwrap();
        let err = lua.load(out.as_str()).eval::<i64>().unwrap_err();
        assert!(err.to_string().contains("tampered runtime"), "{err}");
    }

    #[test]
    fn test_installed_hook_fails() {
        let (_, out) = guarded("return 1", Target::Standard);
        let lua = with_debug();
        lua.load("debug.sethook(function() end, 'l')").exec().unwrap();
        let err = lua.load(out.as_str()).eval::<i64>().unwrap_err();
        assert!(err.to_string().contains("debugger detected"), "{err}");
    }

    #[test]
    fn test_checks_skipped_without_debug_library() {
        let (_, out) = guarded("return 1", Target::Standard);
        let lua = mlua::Lua::new();
        assert!(matches!(lua.globals().get::<_, mlua::Value>("debug").unwrap(), mlua::Value::Nil));
        lua.load("tostring = function(v) return '' end").exec().unwrap();
        assert_eq!(lua.load(out.as_str()).eval::<i64>().unwrap(), 1);
    }

    #[test]
    fn test_roblox_gets_nothing() {
        let (block, _) = guarded("return 1", Target::Roblox);
        assert_eq!(block.len(), 1);
    }

    #[test]
    fn test_loadstring_fingerprints() {
        let (_, out) = guarded("return 1", Target::Loadstring);
        assert!(out.contains("iscclosure"));
        assert!(out.contains("debug.info"));
        assert!(out.contains("game"));
    }
}

//! Dead code injection
//!
//! Inserts statements with no observable effect between the statements of
//! every block. Anything that declares a local is wrapped in `do ... end` so
//! `goto` scoping rules are unaffected.

use tracing::debug;

use super::opaque;
use super::Pass;
use crate::ast::*;
use crate::error::ObfuscateError;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JunkKind {
    DeadLocal,
    FalseBranch,
    IdentityArithmetic,
    EmptyLoop,
    PureCall,
}

const KINDS: [JunkKind; 5] = [
    JunkKind::DeadLocal,
    JunkKind::FalseBranch,
    JunkKind::IdentityArithmetic,
    JunkKind::EmptyLoop,
    JunkKind::PureCall,
];

pub struct JunkInjector;

impl Pass for JunkInjector {
    fn name(&self) -> &'static str {
        "junk"
    }

    fn run(&self, program: &mut Block, session: &mut Session) -> Result<(), ObfuscateError> {
        let density = session.tuning.junk_density.clamp(0.0, 1.0);
        let cap = session.tuning.junk_max_per_block;
        let mut walker = Walker {
            session,
            density,
            cap,
        };
        walker.visit_block(program);
        debug!("injected {} junk statements", walker.session.stats.junk_injected);
        Ok(())
    }
}

struct Walker<'s> {
    session: &'s mut Session,
    density: f64,
    cap: usize,
}

impl VisitorMut for Walker<'_> {
    fn visit_block(&mut self, block: &mut Block) {
        walk_block(self, block);
        if block.is_empty() || self.cap == 0 {
            return;
        }

        let mut out = Vec::with_capacity(block.len() + self.cap);
        let mut added = 0;
        for stmt in block.drain(..) {
            let terminal = stmt.is_terminator();
            out.push(stmt);
            if !terminal && added < self.cap && self.session.random.chance(self.density) {
                out.push(junk_statement(self.session));
                added += 1;
            }
        }
        *block = out;
        self.session.stats.junk_injected += added;
    }
}

/// One statement with no observable effect
pub fn junk_statement(session: &mut Session) -> Stmt {
    match *session.random.pick(&KINDS) {
        JunkKind::DeadLocal => {
            let name = session.fresh_name();
            let value = junk_value(session);
            Stmt::Do(vec![Stmt::local(&[name.as_str()], vec![value])])
        }
        JunkKind::FalseBranch => {
            let cond = opaque::always_false(session);
            let name = session.fresh_name();
            let target = session.fresh_name();
            let value = junk_value(session);
            Stmt::If {
                clauses: vec![(
                    cond,
                    vec![
                        Stmt::local(&[name.as_str()], vec![value]),
                        Stmt::Assign {
                            targets: vec![Expr::name(target)],
                            values: vec![Expr::name(name)],
                        },
                    ],
                )],
                else_block: None,
            }
        }
        JunkKind::IdentityArithmetic => {
            // local v = (n + 0) * 1
            let name = session.fresh_name();
            let n = session.random.next_int(0, 65535);
            let sum = Expr::paren(Expr::binary(BinOp::Add, session.number(n), session.number(0)));
            let value = Expr::binary(BinOp::Mul, sum, session.number(1));
            Stmt::Do(vec![Stmt::local(&[name.as_str()], vec![value])])
        }
        JunkKind::EmptyLoop => {
            if session.random.chance(0.5) {
                let var = session.fresh_name();
                let hi = session.random.next_int(1, 1000);
                let lo = session.random.next_int(0, hi - 1);
                Stmt::NumericFor {
                    var,
                    start: session.number(hi),
                    limit: session.number(lo),
                    step: None,
                    body: Vec::new(),
                }
            } else {
                Stmt::While {
                    cond: opaque::always_false(session),
                    body: Vec::new(),
                }
            }
        }
        JunkKind::PureCall => {
            let n = session.random.next_int(0, 9999);
            let number = session.number(n);
            let call = match session.random.index(3) {
                0 => Expr::call(session.global("type"), vec![number]),
                1 => Expr::call(session.global("tostring"), vec![number]),
                _ => {
                    let count = session.plain_string(b"#");
                    Expr::call(session.global("select"), vec![count, number])
                }
            };
            Stmt::Call(call)
        }
    }
}

fn junk_value(session: &mut Session) -> Expr {
    let n = session.random.next_int(0, 1 << 20);
    match session.random.index(3) {
        0 => session.number(n),
        1 => {
            let len = session.random.next_int(2, 10) as usize;
            let text: Vec<u8> = (0..len)
                .map(|_| b'a' + session.random.next_int(0, 25) as u8)
                .collect();
            session.plain_string(&text)
        }
        _ => Expr::Table(vec![Field::Positional(session.number(n))]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Features, ObfuscateOptions};
    use crate::parser::parse;
    use crate::printer::print_block;
    use crate::target::Target;
    use std::collections::BTreeSet;

    fn session(density: f64, cap: usize) -> Session {
        let mut options = ObfuscateOptions::new(Target::Standard, 77, Features::default());
        options.tuning.junk_density = density;
        options.tuning.junk_max_per_block = cap;
        Session::new(&options, &BTreeSet::new())
    }

    #[test]
    fn test_never_after_return_or_break() {
        let mut block = parse("local a = 1\nwhile true do a = a + 1 break end\nreturn a").unwrap();
        let mut s = session(1.0, 10);
        JunkInjector.run(&mut block, &mut s).unwrap();
        assert!(matches!(block.last(), Some(Stmt::Return(_))));
        let Some(Stmt::While { body, .. }) = block.iter().find(|s| matches!(s, Stmt::While { .. })) else {
            panic!("loop missing");
        };
        assert!(matches!(body.last(), Some(Stmt::Break)));
        // the printed program must still parse
        parse(&print_block(&block)).unwrap();
    }

    #[test]
    fn test_cap_per_block() {
        let source = (0..20).map(|i| format!("x{i} = {i}")).collect::<Vec<_>>().join("\n");
        let mut block = parse(&source).unwrap();
        let mut s = session(1.0, 3);
        JunkInjector.run(&mut block, &mut s).unwrap();
        assert_eq!(block.len(), 23);
        assert_eq!(s.stats.junk_injected, 3);
    }

    #[test]
    fn test_zero_density_adds_nothing() {
        let mut block = parse("print(1)\nprint(2)").unwrap();
        let before = block.clone();
        let mut s = session(0.0, 3);
        JunkInjector.run(&mut block, &mut s).unwrap();
        assert_eq!(block, before);
    }

    #[test]
    fn test_junk_has_no_effect_under_lua() {
        let source = "local t = {}\nfor i = 1, 5 do t[#t + 1] = i * 2 end\nlocal s = 0\nfor _, v in ipairs(t) do s = s + v end\nreturn s";
        let mut block = parse(source).unwrap();
        let mut s = session(1.0, 8);
        JunkInjector.run(&mut block, &mut s).unwrap();
        assert!(s.stats.junk_injected > 0);
        s.bind_globals(&mut block);
        let lua = mlua::Lua::new();
        let printed = print_block(&block);
        let result: i64 = lua.load(printed.as_str()).eval().unwrap();
        assert_eq!(result, 30);
    }
}

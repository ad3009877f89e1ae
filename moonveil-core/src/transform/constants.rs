//! Constant encryption
//!
//! Integer literals become small arithmetic or bitwise expressions that
//! evaluate to the same value; `true`, `false` and `nil` become expressions
//! from a fixed bank. Float literals are left alone.

use tracing::debug;

use super::Pass;
use crate::ast::*;
use crate::error::{ObfuscateError, TransformError};
use crate::session::Session;

/// Largest magnitude rewritten; every intermediate value stays exact in a
/// double
pub const SAFE_LIMIT: i64 = 1 << 32;

/// Bitwise forms only for `0 <= n < XOR_LIMIT` so 32-bit `bit32` results match
pub const XOR_LIMIT: i64 = 1 << 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntForm {
    Xor,
    Additive,
    Subtractive,
    MulAdd,
    NestedXor,
    Identity,
}

pub struct ConstantEncryptor;

impl Pass for ConstantEncryptor {
    fn name(&self) -> &'static str {
        "constants"
    }

    fn run(&self, program: &mut Block, session: &mut Session) -> Result<(), ObfuscateError> {
        let mut walker = Walker { session };
        walker.visit_block(program);
        debug!(
            "encrypted {} constants",
            walker.session.stats.constants_encrypted
        );
        Ok(())
    }
}

struct Walker<'s> {
    session: &'s mut Session,
}

impl VisitorMut for Walker<'_> {
    fn visit_expr(&mut self, expr: &mut Expr) {
        let replacement = match expr {
            Expr::Number(NumLit {
                value: Number::Int(n),
                form: None,
            }) => match encrypt_int(self.session, *n) {
                Ok(e) => Some(e),
                Err(e) => {
                    debug!("integer literal left as-is: {}", e);
                    None
                }
            },
            Expr::Number(_) => None,
            Expr::True => Some(encrypt_bool(self.session, true)),
            Expr::False => Some(encrypt_bool(self.session, false)),
            Expr::Nil => Some(encrypt_nil(self.session)),
            _ => {
                walk_expr(self, expr);
                return;
            }
        };
        if let Some(replacement) = replacement {
            *expr = replacement;
            self.session.stats.constants_encrypted += 1;
        }
    }
}

/// An expression that evaluates to exactly `n`
pub fn encrypt_int(session: &mut Session, n: i64) -> Result<Expr, TransformError> {
    if !(-SAFE_LIMIT..=SAFE_LIMIT).contains(&n) {
        return Err(TransformError::IntegerOutOfRange(n));
    }
    let mut forms = vec![IntForm::Additive, IntForm::Subtractive, IntForm::MulAdd];
    if (0..XOR_LIMIT).contains(&n) {
        forms.extend([IntForm::Xor, IntForm::NestedXor, IntForm::Identity]);
    }
    let form = *session.random.pick(&forms);

    let expr = match form {
        IntForm::Xor => {
            let key = session.random.next_int(1, XOR_LIMIT - 1);
            let (e, k) = (session.number(n ^ key), session.number(key));
            session.bxor(e, k)
        }
        IntForm::Additive => {
            let a = session.random.next_int(-(1 << 20), 1 << 20);
            let (x, y) = (session.number(a), session.number(n - a));
            Expr::paren(Expr::binary(BinOp::Add, x, y))
        }
        IntForm::Subtractive => {
            let r = session.random.next_int(1, 1 << 20);
            let (x, y) = (session.number(n + r), session.number(r));
            Expr::paren(Expr::binary(BinOp::Sub, x, y))
        }
        IntForm::MulAdd => {
            let m = session.random.next_int(2, 97);
            let (q, r) = (n.div_euclid(m), n.rem_euclid(m));
            let product = Expr::binary(BinOp::Mul, session.number(q), session.number(m));
            Expr::paren(Expr::binary(BinOp::Add, product, session.number(r)))
        }
        IntForm::NestedXor => {
            let offset = session.random.next_int(0, n.min(0xFFFF));
            let key = session.random.next_int(1, XOR_LIMIT - 1);
            let (e, k) = (session.number((n - offset) ^ key), session.number(key));
            let inner = session.bxor(e, k);
            Expr::paren(Expr::binary(BinOp::Add, inner, session.number(offset)))
        }
        IntForm::Identity => {
            let value = session.number(n);
            match session.random.index(3) {
                0 => {
                    let mask = session.number(0xFFFF_FFFF);
                    session.band(value, mask)
                }
                1 => {
                    let zero = session.number(0);
                    session.bor(value, zero)
                }
                _ => {
                    let zero = session.number(0);
                    session.bxor(value, zero)
                }
            }
        }
    };
    Ok(expr)
}

/// An expression that evaluates to `value`
pub fn encrypt_bool(session: &mut Session, value: bool) -> Expr {
    let n = session.random.next_int(1, 9999);
    let expr = match (value, session.random.index(4)) {
        // double negation
        (true, 0) => Expr::unary(UnOp::Not, Expr::unary(UnOp::Not, session.number(n))),
        (false, 0) => Expr::unary(UnOp::Not, Expr::unary(UnOp::Not, Expr::Nil)),
        (true, 1) => Expr::unary(UnOp::Not, Expr::Nil),
        (false, 1) => Expr::unary(UnOp::Not, session.number(n)),
        // tautological / contradictory comparison
        (true, 2) => Expr::binary(BinOp::Eq, session.number(n), session.number(n)),
        (false, 2) => {
            let next = Expr::binary(BinOp::Add, session.number(n), session.number(1));
            Expr::binary(BinOp::Eq, session.number(n), next)
        }
        // type() introspection
        (true, _) => {
            let probe = Expr::call(session.global("type"), vec![session.plain_string(b"")]);
            Expr::binary(BinOp::Eq, probe, session.plain_string(b"string"))
        }
        (false, _) => {
            let number = session.number(n);
            let probe = Expr::call(session.global("type"), vec![number]);
            Expr::binary(BinOp::Eq, probe, session.plain_string(b"string"))
        }
    };
    Expr::paren(expr)
}

/// An expression that evaluates to `nil`
pub fn encrypt_nil(session: &mut Session) -> Expr {
    let n = session.random.next_int(1, 9999);
    let expr = match session.random.index(3) {
        0 => Expr::index(Expr::paren(Expr::Table(Vec::new())), session.number(n)),
        1 => Expr::binary(BinOp::And, Expr::Nil, session.number(n)),
        _ => {
            let key = session.number(n);
            Expr::call(session.global("rawget"), vec![Expr::Table(Vec::new()), key])
        }
    };
    Expr::paren(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Features, ObfuscateOptions};
    use crate::parser::parse;
    use crate::printer::{print_block, print_expr};
    use crate::target::Target;
    use std::collections::BTreeSet;

    fn session(target: Target, seed: u64) -> Session {
        Session::new(
            &ObfuscateOptions::new(target, seed, Features::default()),
            &BTreeSet::new(),
        )
    }

    /// Evaluator for the integer forms this module emits
    fn eval_int(s: &Session, expr: &Expr) -> i64 {
        match expr {
            Expr::Number(NumLit {
                value: Number::Int(n),
                ..
            }) => *n,
            Expr::Paren(inner) => eval_int(s, inner),
            Expr::Unary {
                op: UnOp::Neg,
                operand,
            } => -eval_int(s, operand),
            Expr::Binary { op, left, right } => {
                let (a, b) = (eval_int(s, left), eval_int(s, right));
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::BXor => a ^ b,
                    BinOp::BAnd => a & b,
                    BinOp::BOr => a | b,
                    other => panic!("unexpected operator {:?}", other),
                }
            }
            Expr::Call { callee, args } => {
                let (a, b) = (eval_int(s, &args[0]), eval_int(s, &args[1]));
                let bit32 = |v: i64| v & 0xFFFF_FFFF;
                let alias = print_expr(callee);
                let path = s
                    .globals
                    .iter()
                    .find(|(_, bound)| **bound == alias)
                    .map(|(path, _)| path.as_str())
                    .unwrap_or(alias.as_str());
                match path {
                    "bit32.bxor" => bit32(a ^ b),
                    "bit32.band" => bit32(a & b),
                    "bit32.bor" => bit32(a | b),
                    other => panic!("unexpected call {}", other),
                }
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_integer_round_trip_sampled() {
        for target in [Target::Standard, Target::Roblox] {
            let mut s = session(target, 1234);
            for _ in 0..10_000 {
                let n = if s.random.chance(0.5) {
                    s.random.next_int(0, XOR_LIMIT - 1)
                } else {
                    s.random.next_int(-SAFE_LIMIT, SAFE_LIMIT)
                };
                let expr = encrypt_int(&mut s, n).unwrap();
                assert_eq!(eval_int(&s, &expr), n, "{}", print_expr(&expr));
            }
        }
    }

    #[test]
    fn test_integer_round_trip_under_lua() {
        let lua = mlua::Lua::new();
        let mut s = session(Target::Standard, 99);
        for _ in 0..300 {
            let n = s.random.next_int(0, 1 << 33) - (1 << 32);
            let expr = encrypt_int(&mut s, n).unwrap();
            let source = format!("return {}", print_expr(&expr));
            let value: mlua::Value = lua.load(source.as_str()).eval().unwrap();
            // must stay an integer, not become a float
            assert_eq!(value, mlua::Value::Integer(n), "{source}");
        }
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut s = session(Target::Standard, 1);
        assert_eq!(
            encrypt_int(&mut s, SAFE_LIMIT + 1),
            Err(TransformError::IntegerOutOfRange(SAFE_LIMIT + 1))
        );
    }

    /// `return expr` with the library aliases it needs bound first
    fn chunk(s: &mut Session, expr: Expr) -> String {
        let mut block = vec![Stmt::Return(vec![expr])];
        s.bind_globals(&mut block);
        print_block(&block)
    }

    #[test]
    fn test_bool_and_nil_banks_under_lua() {
        let lua = mlua::Lua::new();
        let mut s = session(Target::Standard, 5);
        for _ in 0..100 {
            for value in [true, false] {
                let expr = encrypt_bool(&mut s, value);
                let source = chunk(&mut s, expr);
                assert_eq!(lua.load(source.as_str()).eval::<bool>().unwrap(), value, "{source}");
            }
            let expr = encrypt_nil(&mut s);
            let source = chunk(&mut s, expr);
            let value: mlua::Value = lua.load(source.as_str()).eval().unwrap();
            assert_eq!(value, mlua::Value::Nil, "{source}");
        }
    }

    #[test]
    fn test_banks_ignore_shadowed_builtins() {
        let lua = mlua::Lua::new();
        let mut s = session(Target::Standard, 8);
        for _ in 0..50 {
            let expr = encrypt_bool(&mut s, true);
            let mut block = parse("local type, rawget = nil, nil").unwrap();
            block.push(Stmt::Return(vec![expr]));
            s.bind_globals(&mut block);
            let source = print_block(&block);
            assert!(lua.load(source.as_str()).eval::<bool>().unwrap(), "{source}");
        }
    }

    #[test]
    fn test_pass_skips_floats() {
        let mut block = parse("local a, b, c = 1.5, 7, true").unwrap();
        let mut s = session(Target::Standard, 3);
        ConstantEncryptor.run(&mut block, &mut s).unwrap();
        assert_eq!(s.stats.constants_encrypted, 2);
        let out = print_block(&block);
        assert!(out.contains("1.5"));
        assert!(!out.contains("true"));
    }
}

//! Opaque predicates
//!
//! Expressions with a fixed boolean value that is not obvious from the text.
//! They only use literals, so they have no side effects and read no program
//! state.

use crate::ast::{BinOp, Expr};
use crate::session::Session;

/// An expression that always evaluates to `true`
pub fn always_true(session: &mut Session) -> Expr {
    let n = session.random.next_int(2, 4000);
    match session.random.index(5) {
        // n * (n + 1) is always even
        0 => {
            let product = Expr::binary(
                BinOp::Mul,
                session.number(n),
                Expr::paren(Expr::binary(BinOp::Add, session.number(n), session.number(1))),
            );
            let rem = Expr::binary(BinOp::Mod, product, session.number(2));
            Expr::paren(Expr::binary(BinOp::Eq, rem, session.number(0)))
        }
        1 => {
            let square = Expr::binary(BinOp::Mul, session.number(n), session.number(n));
            Expr::paren(Expr::binary(BinOp::Ge, square, session.number(0)))
        }
        2 => {
            let m = session.random.next_int(2, 97);
            let rem = Expr::binary(BinOp::Mod, session.number(n), session.number(m));
            Expr::paren(Expr::binary(BinOp::Lt, rem, session.number(m)))
        }
        3 => {
            let next = Expr::binary(BinOp::Add, session.number(n), session.number(1));
            Expr::paren(Expr::binary(BinOp::Ne, session.number(n), next))
        }
        _ => {
            let len = session.random.next_int(1, 6) as usize;
            let text = filler(session, len);
            let length = Expr::unary(crate::ast::UnOp::Len, session.plain_string(&text));
            Expr::paren(Expr::binary(BinOp::Eq, length, session.number(len as i64)))
        }
    }
}

/// An expression that always evaluates to `false`
pub fn always_false(session: &mut Session) -> Expr {
    let n = session.random.next_int(2, 4000);
    match session.random.index(5) {
        0 => {
            let product = Expr::binary(
                BinOp::Mul,
                session.number(n),
                Expr::paren(Expr::binary(BinOp::Add, session.number(n), session.number(1))),
            );
            let rem = Expr::binary(BinOp::Mod, product, session.number(2));
            Expr::paren(Expr::binary(BinOp::Eq, rem, session.number(1)))
        }
        1 => {
            let square = Expr::binary(BinOp::Mul, session.number(n), session.number(n));
            Expr::paren(Expr::binary(BinOp::Lt, square, session.number(0)))
        }
        2 => {
            let m = session.random.next_int(2, 97);
            let rem = Expr::binary(BinOp::Mod, session.number(n), session.number(m));
            Expr::paren(Expr::binary(BinOp::Ge, rem, session.number(m)))
        }
        3 => {
            let next = Expr::binary(BinOp::Add, session.number(n), session.number(1));
            Expr::paren(Expr::binary(BinOp::Eq, session.number(n), next))
        }
        _ => {
            let len = session.random.next_int(1, 6) as usize;
            let text = filler(session, len);
            let length = Expr::unary(crate::ast::UnOp::Len, session.plain_string(&text));
            let bound = session.random.next_int(len as i64 + 1, 64);
            Expr::paren(Expr::binary(BinOp::Ge, length, session.number(bound)))
        }
    }
}

/// Wrap an `if`/`while` condition without changing its truthiness
pub fn disguise_condition(cond: Expr, session: &mut Session) -> Expr {
    if session.random.chance(0.5) {
        Expr::binary(BinOp::And, Expr::paren(cond), always_true(session))
    } else {
        Expr::binary(BinOp::Or, always_false(session), Expr::paren(cond))
    }
}

fn filler(session: &mut Session, len: usize) -> Vec<u8> {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    (0..len).map(|_| *session.random.pick(ALPHABET)).collect()
}

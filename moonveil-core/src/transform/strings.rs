//! String literal encryption
//!
//! Each source string literal is replaced by an expression that rebuilds the
//! same bytes at runtime. The method is picked per literal, weighted by
//! length.

use tracing::{debug, warn};

use super::Pass;
use crate::ast::*;
use crate::error::{ObfuscateError, TransformError};
use crate::session::Session;

/// Longest string the `string.char(...)` form accepts; every byte becomes a
/// call argument and Lua caps those
pub const CHAR_ARGS_LIMIT: usize = 100;

/// Key length for the XOR form
const MAX_KEY_LEN: usize = 8;

/// Strings up to this length lean on the escape form
const SHORT_STRING_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Xor,
    CharCodes,
    Escapes,
    Split,
}

pub struct StringEncryptor;

impl Pass for StringEncryptor {
    fn name(&self) -> &'static str {
        "strings"
    }

    fn run(&self, program: &mut Block, session: &mut Session) -> Result<(), ObfuscateError> {
        let mut walker = Walker { session };
        walker.visit_block(program);
        debug!("encrypted {} strings", walker.session.stats.strings_encrypted);
        Ok(())
    }
}

struct Walker<'s> {
    session: &'s mut Session,
}

impl VisitorMut for Walker<'_> {
    fn visit_expr(&mut self, expr: &mut Expr) {
        if let Expr::String(lit) = expr {
            if lit.form.is_none() {
                let method = choose_method(self.session, lit.value.len());
                match encrypt(self.session, &lit.value, method) {
                    Ok(replacement) => {
                        *expr = replacement;
                        self.session.stats.strings_encrypted += 1;
                    }
                    Err(e) => warn!("string literal left as-is: {}", e),
                }
            }
            return;
        }
        walk_expr(self, expr);
    }
}

fn choose_method(session: &mut Session, len: usize) -> Method {
    if len == 0 {
        return Method::Escapes;
    }
    let methods = [Method::Xor, Method::CharCodes, Method::Escapes, Method::Split];
    if len <= SHORT_STRING_LEN {
        let weights = [1.0, 1.0, 6.0, if len >= 4 { 1.0 } else { 0.0 }];
        return *session.random.weighted_pick(&methods, &weights);
    }
    let weights = [
        3.0,
        if len <= CHAR_ARGS_LIMIT { 2.0 } else { 0.0 },
        if len <= CHAR_ARGS_LIMIT { 2.0 } else { 1.0 },
        if len >= 4 { 2.0 } else { 0.0 },
    ];
    *session.random.weighted_pick(&methods, &weights)
}

/// Encode `value` with `method`
pub fn encrypt(session: &mut Session, value: &[u8], method: Method) -> Result<Expr, TransformError> {
    match method {
        Method::Xor => Ok(xor_closure(session, value)),
        Method::CharCodes => char_codes(session, value),
        Method::Escapes => Ok(escaped(session, value)),
        Method::Split => split(session, value),
    }
}

/// `(function(d, k) ... end)({...}, {...})`
pub fn xor_closure(session: &mut Session, value: &[u8]) -> Expr {
    let key_len = session.random.next_int(1, value.len().clamp(1, MAX_KEY_LEN) as i64) as usize;
    let key = session.random.random_key(key_len);
    let encoded: Vec<i64> = value
        .iter()
        .enumerate()
        .map(|(i, b)| (b ^ key[i % key.len()]) as i64)
        .collect();
    let data: Vec<Expr> = encoded.into_iter().map(|n| session.number(n)).collect();
    let key_exprs: Vec<Expr> = key.iter().map(|k| session.number(*k as i64)).collect();

    let d = session.fresh_name();
    let k = session.fresh_name();
    let out = session.fresh_name();
    let i = session.fresh_name();

    // o[i] = string.char(bxor(d[i], k[(i - 1) % #k + 1]))
    let key_index = Expr::binary(
        BinOp::Add,
        Expr::binary(
            BinOp::Mod,
            Expr::paren(Expr::binary(BinOp::Sub, Expr::name(&i), session.number(1))),
            Expr::unary(UnOp::Len, Expr::name(&k)),
        ),
        session.number(1),
    );
    let byte = session.bxor(
        Expr::index(Expr::name(&d), Expr::name(&i)),
        Expr::index(Expr::name(&k), key_index),
    );
    let char_fn = session.global("string.char");
    let concat_fn = session.global("table.concat");
    let one = session.number(1);
    let body = vec![
        Stmt::local(&[out.as_str()], vec![Expr::Table(Vec::new())]),
        Stmt::NumericFor {
            var: i.clone(),
            start: one,
            limit: Expr::unary(UnOp::Len, Expr::name(&d)),
            step: None,
            body: vec![Stmt::Assign {
                targets: vec![Expr::index(Expr::name(&out), Expr::name(&i))],
                values: vec![Expr::call(char_fn, vec![byte])],
            }],
        },
        Stmt::Return(vec![Expr::call(concat_fn, vec![Expr::name(&out)])]),
    ];
    let decoder = Expr::Function(FuncBody {
        params: vec![d, k],
        is_vararg: false,
        body,
    });
    Expr::call(
        Expr::paren(decoder),
        vec![
            Expr::Table(data.into_iter().map(Field::Positional).collect()),
            Expr::Table(key_exprs.into_iter().map(Field::Positional).collect()),
        ],
    )
}

/// `string.char(104, 105)`
pub fn char_codes(session: &mut Session, value: &[u8]) -> Result<Expr, TransformError> {
    if value.len() > CHAR_ARGS_LIMIT {
        return Err(TransformError::StringTooLong(value.len()));
    }
    let args = value.iter().map(|b| session.number(*b as i64)).collect();
    Ok(Expr::call(session.global("string.char"), args))
}

/// Same bytes, every byte written as a decimal or hex escape
pub fn escaped(session: &mut Session, value: &[u8]) -> Expr {
    #[derive(Clone, Copy)]
    enum Style {
        Decimal,
        Hex,
        Mixed,
    }
    let style = *session.random.pick(&[Style::Decimal, Style::Hex, Style::Mixed]);
    let quote = if session.random.chance(0.5) { '"' } else { '\'' };
    let mut form = String::with_capacity(value.len() * 4 + 2);
    form.push(quote);
    for b in value {
        let hex = match style {
            Style::Decimal => false,
            Style::Hex => true,
            Style::Mixed => session.random.chance(0.5),
        };
        if hex {
            form.push_str(&format!("\\x{:02X}", b));
        } else {
            form.push_str(&format!("\\{:03}", b));
        }
    }
    form.push(quote);
    Expr::String(StrLit {
        value: value.to_vec(),
        form: Some(form),
    })
}

/// Concatenation of 2-4 chunks, each encoded on its own
pub fn split(session: &mut Session, value: &[u8]) -> Result<Expr, TransformError> {
    if value.len() < 2 {
        return Err(TransformError::Unsupported(
            "split needs at least two bytes".to_string(),
        ));
    }
    let pieces = session.random.next_int(2, value.len().min(4) as i64) as usize;
    let mut cuts: Vec<usize> = Vec::with_capacity(pieces + 1);
    cuts.push(0);
    while cuts.len() < pieces {
        let cut = session.random.next_int(1, value.len() as i64 - 1) as usize;
        if !cuts.contains(&cut) {
            cuts.push(cut);
        }
    }
    cuts.push(value.len());
    cuts.sort_unstable();

    let mut result: Option<Expr> = None;
    for window in cuts.windows(2) {
        let chunk = &value[window[0]..window[1]];
        let method = if chunk.len() <= CHAR_ARGS_LIMIT {
            *session.random.pick(&[Method::Xor, Method::CharCodes, Method::Escapes])
        } else {
            *session.random.pick(&[Method::Xor, Method::Escapes])
        };
        let part = encrypt(session, chunk, method)?;
        result = Some(match result {
            None => part,
            Some(acc) => Expr::binary(BinOp::Concat, acc, part),
        });
    }
    result.ok_or_else(|| TransformError::Unsupported("empty split".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Features, ObfuscateOptions};
    use crate::parser::parse;
    use crate::printer::print_block;
    use crate::target::Target;
    use std::collections::BTreeSet;

    fn session(seed: u64) -> Session {
        Session::new(
            &ObfuscateOptions::new(Target::Standard, seed, Features::default()),
            &BTreeSet::new(),
        )
    }

    fn eval(s: &mut Session, expr: &Expr) -> Vec<u8> {
        let lua = mlua::Lua::new();
        let mut chunk = vec![Stmt::Return(vec![expr.clone()])];
        s.bind_globals(&mut chunk);
        let source = print_block(&chunk);
        let value: mlua::String = lua
            .load(source.as_str())
            .eval()
            .unwrap_or_else(|e| panic!("{source}: {e}"));
        value.as_bytes().to_vec()
    }

    #[test]
    fn test_every_method_reproduces_bytes() {
        let mut s = session(3);
        let samples: [&[u8]; 4] = [b"hello world", b"\0\x01\xff binary", "ünïcödé".as_bytes(), b"ab"];
        for sample in samples {
            for method in [Method::Xor, Method::CharCodes, Method::Escapes, Method::Split] {
                let expr = encrypt(&mut s, sample, method).unwrap();
                assert_eq!(eval(&mut s, &expr), sample, "{:?}", method);
            }
        }
    }

    #[test]
    fn test_char_codes_rejects_long_strings() {
        let mut s = session(1);
        let long = vec![b'a'; CHAR_ARGS_LIMIT + 1];
        assert_eq!(
            char_codes(&mut s, &long),
            Err(TransformError::StringTooLong(CHAR_ARGS_LIMIT + 1))
        );
        // long strings still encrypt through the other methods
        for _ in 0..20 {
            assert_ne!(choose_method(&mut s, long.len()), Method::CharCodes);
        }
    }

    #[test]
    fn test_short_strings_mostly_escaped() {
        let mut escaped = 0;
        for seed in 0..200 {
            let mut s = session(seed);
            if choose_method(&mut s, 6) == Method::Escapes {
                escaped += 1;
            }
        }
        assert!(escaped > 120, "escapes picked {escaped}/200 times");
    }

    #[test]
    fn test_library_calls_survive_shadowing() {
        let mut s = session(4);
        let expr = xor_closure(&mut s, b"shadowed");
        let mut chunk = parse("local string, table = nil, nil").unwrap();
        chunk.push(Stmt::Return(vec![expr]));
        s.bind_globals(&mut chunk);
        let source = print_block(&chunk);
        let lua = mlua::Lua::new();
        let value: mlua::String = lua.load(source.as_str()).eval().unwrap();
        assert_eq!(value.as_bytes(), b"shadowed");
    }

    #[test]
    fn test_empty_string() {
        let mut s = session(2);
        assert_eq!(choose_method(&mut s, 0), Method::Escapes);
        let expr = xor_closure(&mut s, b"");
        assert_eq!(eval(&mut s, &expr), b"");
    }

    #[test]
    fn test_pass_replaces_literals_and_counts() {
        let mut block = parse("local a = 'secret'\nprint(a .. \"!\")").unwrap();
        let mut s = session(9);
        StringEncryptor.run(&mut block, &mut s).unwrap();
        let out = print_block(&block);
        assert!(!out.contains("secret"));
        assert_eq!(s.stats.strings_encrypted, 2);

        // a second run leaves generated literals alone
        StringEncryptor.run(&mut block, &mut s).unwrap();
        assert_eq!(s.stats.strings_encrypted, 2);
    }
}

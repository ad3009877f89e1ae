//! Whitespace and comment stripping
//!
//! Works on the token stream rather than the text so string and number
//! literals are re-emitted exactly as written.

use crate::error::LexError;
use crate::lexer::{tokenize, Token, TokenKind};

/// Comments starting with this marker survive minification
pub const PRESERVED_COMMENT: &str = "--[[!";

/// Character pairs that lex differently when written without a gap
const FUSING: &[&str] = &["--", "..", "[[", "[=", "==", "<=", ">=", "~=", "<<", ">>", "//", "::"];

/// Re-emit `source` on a single line without comments
pub fn minify(source: &str) -> Result<String, LexError> {
    let tokens = tokenize(source)?;
    let mut out = String::with_capacity(source.len());
    let mut prev: Option<&Token> = None;

    for token in &tokens {
        match token.kind {
            TokenKind::Eof => break,
            TokenKind::Comment if !token.raw.starts_with(PRESERVED_COMMENT) => continue,
            _ => {}
        }
        if let Some(prev) = prev {
            if needs_space(prev, token) {
                out.push(' ');
            }
        }
        out.push_str(&token.raw);
        prev = Some(token);
    }

    Ok(out)
}

fn needs_space(prev: &Token, next: &Token) -> bool {
    let (Some(a), Some(b)) = (prev.raw.chars().last(), next.raw.chars().next()) else {
        return false;
    };
    if prev.kind == TokenKind::Comment || next.kind == TokenKind::Comment {
        return true;
    }
    let word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    if word(a) && word(b) {
        return true;
    }
    // `1 ..x` must not become a malformed number
    if prev.kind == TokenKind::Number && (b == '.' || word(b)) {
        return true;
    }
    let joined = format!("{a}{b}");
    FUSING.contains(&joined.as_str())
}

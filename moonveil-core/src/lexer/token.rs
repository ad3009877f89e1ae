use std::fmt;

/// Token classes produced by the lexer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    String,
    Number,
    Identifier,
    Keyword,
    Operator,
    Boolean,
    Nil,
    Vararg,
    Comment,
    Eof,
}

/// A numeric literal value, keeping the integer/float distinction Lua 5.3+ makes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

/// Decoded payload of a token
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    /// Identifier, keyword, operator or comment text
    Text(String),
    /// Decoded string contents (Lua strings are byte strings)
    Bytes(Vec<u8>),
    Number(Number),
    Bool(bool),
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: TokenValue,
    /// Exact source text of the token
    pub raw: String,
    pub line: u32,
    pub column: u32,
}

impl Token {
    pub fn is_keyword(&self, word: &str) -> bool {
        self.kind == TokenKind::Keyword && self.raw == word
    }

    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Operator && self.raw == op
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Eof => write!(f, "<eof>"),
            _ => write!(f, "'{}'", self.raw),
        }
    }
}

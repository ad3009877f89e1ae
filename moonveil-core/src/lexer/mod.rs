//! Lua/Luau tokenizer
//!
//! Single pass over the source bytes. Comments are kept as tokens so the
//! minifier can see them; the parser skips them. The stream always ends with
//! exactly one `Eof` token.

pub mod token;

pub use self::token::{Number, Token, TokenKind, TokenValue};

use crate::error::LexError;

/// Reserved words of the language
pub const KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// Operators, longest first so greedy matching picks the right one
const OPERATORS: &[&str] = &[
    "...", "..", "==", "~=", "<=", ">=", "<<", ">>", "//", "::", "+", "-", "*", "/", "%", "^",
    "#", "&", "~", "|", "<", ">", "=", "(", ")", "{", "}", "[", "]", ";", ":", ",", ".",
];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

/// Tokenize a whole source text
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).tokenize()
}

pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        self.skip_shebang();
        loop {
            self.skip_whitespace();
            if self.at_end() {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    value: TokenValue::None,
                    raw: String::new(),
                    line: self.line,
                    column: self.column,
                });
                return Ok(tokens);
            }
            tokens.push(self.scan_token()?);
        }
    }

    // ---- Cursor helpers ----

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    /// Consume one line break: `\n`, `\r`, `\r\n` or `\n\r`
    fn skip_newline(&mut self) {
        let first = self.peek();
        self.pos += 1;
        let second = self.peek();
        if matches!(second, Some(b'\n' | b'\r')) && second != first {
            self.pos += 1;
        }
        self.line += 1;
        self.column = 1;
    }

    fn error(&self, message: impl Into<String>, line: u32, column: u32) -> LexError {
        LexError::new(message, line, column)
    }

    fn skip_shebang(&mut self) {
        if self.bytes.starts_with(b"#") {
            while let Some(ch) = self.peek() {
                if ch == b'\n' {
                    break;
                }
                self.bump();
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if matches!(ch, b' ' | b'\t' | b'\r' | b'\n' | 0x0b | 0x0c) {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn make(&self, kind: TokenKind, value: TokenValue, start: usize, line: u32, column: u32) -> Token {
        Token {
            kind,
            value,
            raw: self.source[start..self.pos].to_string(),
            line,
            column,
        }
    }

    // ---- Scanning ----

    fn scan_token(&mut self) -> Result<Token, LexError> {
        let (start, line, column) = (self.pos, self.line, self.column);
        let ch = self.peek().unwrap_or(0);

        if ch == b'-' && self.peek_at(1) == Some(b'-') {
            return self.scan_comment();
        }
        if ch == b'"' || ch == b'\'' {
            return self.scan_short_string(ch);
        }
        if ch == b'[' {
            if let Some(level) = self.long_bracket_level() {
                let content = self.scan_long_bracket(level, "string")?;
                return Ok(self.make(TokenKind::String, TokenValue::Bytes(content), start, line, column));
            }
        }
        if ch.is_ascii_digit() || (ch == b'.' && self.peek_at(1).map_or(false, |c| c.is_ascii_digit())) {
            return self.scan_number();
        }
        if ch.is_ascii_alphabetic() || ch == b'_' {
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() || c == b'_' {
                    self.bump();
                } else {
                    break;
                }
            }
            let word = &self.source[start..self.pos];
            let (kind, value) = match word {
                "true" => (TokenKind::Boolean, TokenValue::Bool(true)),
                "false" => (TokenKind::Boolean, TokenValue::Bool(false)),
                "nil" => (TokenKind::Nil, TokenValue::None),
                w if is_keyword(w) => (TokenKind::Keyword, TokenValue::Text(w.to_string())),
                w => (TokenKind::Identifier, TokenValue::Text(w.to_string())),
            };
            return Ok(self.make(kind, value, start, line, column));
        }

        for op in OPERATORS {
            if self.bytes[self.pos..].starts_with(op.as_bytes()) {
                for _ in 0..op.len() {
                    self.bump();
                }
                let kind = if *op == "..." {
                    TokenKind::Vararg
                } else {
                    TokenKind::Operator
                };
                return Ok(self.make(kind, TokenValue::Text(op.to_string()), start, line, column));
            }
        }

        let shown = self.source[self.pos..].chars().next().unwrap_or('?');
        Err(self.error(format!("unexpected symbol '{}'", shown.escape_default()), line, column))
    }

    fn scan_comment(&mut self) -> Result<Token, LexError> {
        let (start, line, column) = (self.pos, self.line, self.column);
        self.bump();
        self.bump();
        if self.peek() == Some(b'[') {
            if let Some(level) = self.long_bracket_level() {
                let content = self.scan_long_bracket(level, "comment")?;
                let text = String::from_utf8_lossy(&content).into_owned();
                return Ok(self.make(TokenKind::Comment, TokenValue::Text(text), start, line, column));
            }
        }
        while let Some(c) = self.peek() {
            if c == b'\n' || c == b'\r' {
                break;
            }
            self.bump();
        }
        let text = self.source[start + 2..self.pos].to_string();
        Ok(self.make(TokenKind::Comment, TokenValue::Text(text), start, line, column))
    }

    /// If positioned at `[` `=`* `[`, the number of `=` signs
    fn long_bracket_level(&self) -> Option<usize> {
        let mut offset = 1;
        while self.peek_at(offset) == Some(b'=') {
            offset += 1;
        }
        if self.peek_at(offset) == Some(b'[') {
            Some(offset - 1)
        } else {
            None
        }
    }

    fn scan_long_bracket(&mut self, level: usize, what: &str) -> Result<Vec<u8>, LexError> {
        let (line, column) = (self.line, self.column);
        for _ in 0..level + 2 {
            self.bump();
        }
        // A newline right after the opening bracket is not part of the content
        if matches!(self.peek(), Some(b'\n' | b'\r')) {
            self.skip_newline();
        }

        let mut content = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(self.error(format!("unfinished long {}", what), line, column));
                }
                Some(b']') => {
                    let mut offset = 1;
                    while self.peek_at(offset) == Some(b'=') {
                        offset += 1;
                    }
                    if offset - 1 == level && self.peek_at(offset) == Some(b']') {
                        for _ in 0..level + 2 {
                            self.bump();
                        }
                        return Ok(content);
                    }
                    content.push(b']');
                    self.bump();
                }
                Some(b'\n' | b'\r') => {
                    self.skip_newline();
                    content.push(b'\n');
                }
                Some(c) => {
                    content.push(c);
                    self.bump();
                }
            }
        }
    }

    fn scan_short_string(&mut self, quote: u8) -> Result<Token, LexError> {
        let (start, line, column) = (self.pos, self.line, self.column);
        self.bump();
        let mut content = Vec::new();
        loop {
            let c = match self.peek() {
                None | Some(b'\n') | Some(b'\r') => {
                    return Err(self.error("unfinished string", line, column));
                }
                Some(c) => c,
            };
            if c == quote {
                self.bump();
                break;
            }
            if c != b'\\' {
                content.push(c);
                self.bump();
                continue;
            }

            let (esc_line, esc_column) = (self.line, self.column);
            self.bump();
            let esc = match self.peek() {
                None => return Err(self.error("unfinished string", line, column)),
                Some(e) => e,
            };
            match esc {
                b'n' => self.push_escape(&mut content, b'\n'),
                b't' => self.push_escape(&mut content, b'\t'),
                b'r' => self.push_escape(&mut content, b'\r'),
                b'a' => self.push_escape(&mut content, 0x07),
                b'b' => self.push_escape(&mut content, 0x08),
                b'f' => self.push_escape(&mut content, 0x0c),
                b'v' => self.push_escape(&mut content, 0x0b),
                b'\\' | b'"' | b'\'' => self.push_escape(&mut content, esc),
                b'\n' | b'\r' => {
                    self.bump();
                    let other = if esc == b'\n' { b'\r' } else { b'\n' };
                    if self.peek() == Some(other) {
                        self.bump();
                    }
                    content.push(b'\n');
                }
                b'z' => {
                    self.bump();
                    self.skip_whitespace();
                }
                b'x' => {
                    self.bump();
                    let mut value = 0u32;
                    for _ in 0..2 {
                        match self.peek().and_then(|h| (h as char).to_digit(16)) {
                            Some(d) => {
                                value = value * 16 + d;
                                self.bump();
                            }
                            None => {
                                return Err(self.error("hexadecimal digit expected", esc_line, esc_column));
                            }
                        }
                    }
                    content.push(value as u8);
                }
                b'u' => {
                    self.bump();
                    if self.peek() != Some(b'{') {
                        return Err(self.error("missing '{' in \\u{xxxx}", esc_line, esc_column));
                    }
                    self.bump();
                    let mut value: u64 = 0;
                    let mut digits = 0;
                    while let Some(d) = self.peek().and_then(|h| (h as char).to_digit(16)) {
                        value = value * 16 + d as u64;
                        digits += 1;
                        if value > 0x7FFF_FFFF {
                            return Err(self.error("UTF-8 value too large", esc_line, esc_column));
                        }
                        self.bump();
                    }
                    if digits == 0 || self.peek() != Some(b'}') {
                        return Err(self.error("missing '}' in \\u{xxxx}", esc_line, esc_column));
                    }
                    self.bump();
                    encode_utf8(value as u32, &mut content);
                }
                d if d.is_ascii_digit() => {
                    let mut value = 0u32;
                    for _ in 0..3 {
                        match self.peek() {
                            Some(d) if d.is_ascii_digit() => {
                                value = value * 10 + (d - b'0') as u32;
                                self.bump();
                            }
                            _ => break,
                        }
                    }
                    if value > 255 {
                        return Err(self.error("decimal escape too large", esc_line, esc_column));
                    }
                    content.push(value as u8);
                }
                _ => return Err(self.error("invalid escape sequence", esc_line, esc_column)),
            }
        }
        Ok(self.make(TokenKind::String, TokenValue::Bytes(content), start, line, column))
    }

    fn push_escape(&mut self, content: &mut Vec<u8>, byte: u8) {
        self.bump();
        content.push(byte);
    }

    fn scan_number(&mut self) -> Result<Token, LexError> {
        let (start, line, column) = (self.pos, self.line, self.column);
        let radix_prefix = if self.peek() == Some(b'0') {
            match self.peek_at(1) {
                Some(b'x') | Some(b'X') => 16,
                Some(b'b') | Some(b'B') => 2,
                _ => 10,
            }
        } else {
            10
        };

        let value = if radix_prefix != 10 {
            self.bump();
            self.bump();
            let digits_start = self.pos;
            let mut is_float = false;
            while let Some(c) = self.peek() {
                let accepted = match c {
                    b'_' => true,
                    b'.' if radix_prefix == 16 => {
                        is_float = true;
                        true
                    }
                    b'p' | b'P' if radix_prefix == 16 => {
                        is_float = true;
                        self.bump();
                        if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                            self.bump();
                        }
                        continue;
                    }
                    c if radix_prefix == 16 => c.is_ascii_hexdigit(),
                    c => c == b'0' || c == b'1',
                };
                if !accepted {
                    break;
                }
                self.bump();
            }
            let text: String = self.source[digits_start..self.pos]
                .chars()
                .filter(|c| *c != '_')
                .collect();
            if is_float {
                parse_hex_float(&text)
            } else {
                parse_radix_int(&text, radix_prefix)
            }
        } else {
            let mut is_float = false;
            while let Some(c) = self.peek() {
                match c {
                    b'0'..=b'9' | b'_' => {}
                    b'.' => is_float = true,
                    b'e' | b'E' => {
                        is_float = true;
                        self.bump();
                        if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                            self.bump();
                        }
                        continue;
                    }
                    _ => break,
                }
                self.bump();
            }
            let text: String = self.source[start..self.pos]
                .chars()
                .filter(|c| *c != '_')
                .collect();
            if is_float {
                text.parse::<f64>().ok().map(Number::Float)
            } else {
                match text.parse::<i64>() {
                    Ok(i) => Some(Number::Int(i)),
                    Err(_) => text.parse::<f64>().ok().map(Number::Float),
                }
            }
        };

        // A number running straight into a name is malformed ("3x")
        if let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'.' {
                return Err(self.error(
                    format!("malformed number near '{}'", &self.source[start..=self.pos]),
                    line,
                    column,
                ));
            }
        }

        match value {
            Some(number) => Ok(self.make(TokenKind::Number, TokenValue::Number(number), start, line, column)),
            None => Err(self.error(
                format!("malformed number near '{}'", &self.source[start..self.pos]),
                line,
                column,
            )),
        }
    }
}

/// Integer in base 2 or 16; overflow wraps around like Lua 5.4 hex literals
fn parse_radix_int(digits: &str, radix: u32) -> Option<Number> {
    if digits.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for c in digits.chars() {
        let d = c.to_digit(radix)? as u64;
        value = value.wrapping_mul(radix as u64).wrapping_add(d);
    }
    Some(Number::Int(value as i64))
}

/// `0x1.8p3` style literal (digits after the `0x` prefix)
fn parse_hex_float(text: &str) -> Option<Number> {
    let (mantissa, exponent) = match text.find(|c| c == 'p' || c == 'P') {
        Some(i) => (&text[..i], text[i + 1..].parse::<i32>().ok()?),
        None => (text, 0),
    };
    let (int_part, frac_part) = match mantissa.find('.') {
        Some(i) => (&mantissa[..i], &mantissa[i + 1..]),
        None => (mantissa, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let mut value = 0f64;
    for c in int_part.chars() {
        value = value * 16.0 + c.to_digit(16)? as f64;
    }
    let mut scale = 1.0 / 16.0;
    for c in frac_part.chars() {
        value += c.to_digit(16)? as f64 * scale;
        scale /= 16.0;
    }
    Some(Number::Float(value * 2f64.powi(exponent)))
}

fn encode_utf8(mut cp: u32, out: &mut Vec<u8>) {
    if cp < 0x80 {
        out.push(cp as u8);
        return;
    }
    // Lua's extended UTF-8 accepts code points up to 2^31
    let mut buf = [0u8; 6];
    let mut n = 0;
    let mut limit = 0x3f;
    loop {
        buf[5 - n] = 0x80 | (cp & 0x3f) as u8;
        n += 1;
        cp >>= 6;
        limit >>= 1;
        if cp <= limit {
            break;
        }
    }
    buf[5 - n] = ((!limit << 1) as u8) | cp as u8;
    n += 1;
    out.extend_from_slice(&buf[6 - n..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().iter().map(|t| t.kind).collect()
    }

    fn first(source: &str) -> Token {
        tokenize(source).unwrap().remove(0)
    }

    #[test]
    fn test_stream_ends_with_single_eof() {
        let tokens = tokenize("local x = 1").unwrap();
        assert_eq!(tokens.iter().filter(|t| t.is_eof()).count(), 1);
        assert!(tokens.last().unwrap().is_eof());
        assert_eq!(tokenize("").unwrap().len(), 1);
    }

    #[test]
    fn test_keywords_and_literal_kinds() {
        assert_eq!(
            kinds("local x = nil or true ... y"),
            vec![
                TokenKind::Keyword,
                TokenKind::Identifier,
                TokenKind::Operator,
                TokenKind::Nil,
                TokenKind::Keyword,
                TokenKind::Boolean,
                TokenKind::Vararg,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_greedy_operators() {
        let raws: Vec<String> = tokenize("a//b..c<=d~=e::f>>g")
            .unwrap()
            .into_iter()
            .filter(|t| t.kind == TokenKind::Operator)
            .map(|t| t.raw)
            .collect();
        assert_eq!(raws, vec!["//", "..", "<=", "~=", "::", ">>"]);
    }

    #[test]
    fn test_string_escapes() {
        let tok = first(r#""a\n\t\\\"\65\x42\u{48}\z
              c""#);
        assert_eq!(tok.value, TokenValue::Bytes(b"a\n\t\\\"ABHc".to_vec()));
    }

    #[test]
    fn test_utf8_escape_multibyte() {
        let tok = first(r#""\u{20AC}""#);
        assert_eq!(tok.value, TokenValue::Bytes("€".as_bytes().to_vec()));
    }

    #[test]
    fn test_long_strings_with_levels() {
        let tok = first("[==[\nhello ]] world]==]");
        assert_eq!(tok.kind, TokenKind::String);
        assert_eq!(tok.value, TokenValue::Bytes(b"hello ]] world".to_vec()));
        assert_eq!(tok.raw, "[==[\nhello ]] world]==]");
    }

    #[test]
    fn test_long_string_line_breaks_become_newlines() {
        let tok = first("[[\r\na\r\nb\n\rc\rd\n\ne]]");
        assert_eq!(tok.value, TokenValue::Bytes(b"a\nb\nc\nd\n\ne".to_vec()));
        let tokens = tokenize("x = [[\r\none\r\ntwo]]\ny").unwrap();
        let y = tokens.iter().find(|t| t.raw == "y").unwrap();
        assert_eq!(y.line, 4);
    }

    #[test]
    fn test_comments_are_tokens() {
        let tokens = tokenize("-- line\n--[[ block\n ]] x").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Comment);
        assert_eq!(tokens[0].value, TokenValue::Text(" line".to_string()));
        assert_eq!(tokens[1].kind, TokenKind::Comment);
        assert_eq!(tokens[2].raw, "x");
        assert_eq!(tokens[2].line, 3);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(first("42").value, TokenValue::Number(Number::Int(42)));
        assert_eq!(first("0xFF").value, TokenValue::Number(Number::Int(255)));
        assert_eq!(first("0b1010").value, TokenValue::Number(Number::Int(10)));
        assert_eq!(first("1_000_000").value, TokenValue::Number(Number::Int(1_000_000)));
        assert_eq!(first("3.5").value, TokenValue::Number(Number::Float(3.5)));
        assert_eq!(first(".5").value, TokenValue::Number(Number::Float(0.5)));
        assert_eq!(first("1e3").value, TokenValue::Number(Number::Float(1000.0)));
        assert_eq!(first("0x1p4").value, TokenValue::Number(Number::Float(16.0)));
        assert_eq!(first("0xA.8").value, TokenValue::Number(Number::Float(10.5)));
        assert_eq!(
            first("9223372036854775808").value,
            TokenValue::Number(Number::Float(9223372036854775808.0))
        );
    }

    #[test]
    fn test_line_and_column_tracking() {
        let tokens = tokenize("a\n  bb = 1").unwrap();
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
        assert_eq!((tokens[2].line, tokens[2].column), (2, 6));
    }

    #[test]
    fn test_unterminated_string_is_error() {
        let err = tokenize("local s = \"abc\nx").unwrap_err();
        assert_eq!((err.line, err.column), (1, 11));
        assert!(err.message.contains("unfinished string"));
    }

    #[test]
    fn test_unterminated_long_comment_is_error() {
        let err = tokenize("x = 1 --[[ never closed").unwrap_err();
        assert!(err.message.contains("unfinished long comment"));
    }

    #[test]
    fn test_illegal_character_is_error() {
        let err = tokenize("x = 1 $ 2").unwrap_err();
        assert_eq!((err.line, err.column), (1, 7));
    }

    #[test]
    fn test_malformed_number_is_error() {
        assert!(tokenize("x = 3x").is_err());
        assert!(tokenize("x = 0x").is_err());
    }

    #[test]
    fn test_shebang_is_skipped() {
        let tokens = tokenize("#!/usr/bin/lua\nprint(1)").unwrap();
        assert_eq!(tokens[0].raw, "print");
    }
}

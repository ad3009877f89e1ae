//! Recursive-descent parser
//!
//! Builds an [`ast::Block`](crate::ast::Block) from the token stream using
//! precedence climbing for binary operators and a suffix-chain parser for
//! member access, indexing and calls.

use crate::ast::*;
use crate::error::{LexError, ParseError};
use crate::lexer::{self, Token, TokenKind, TokenValue};

/// Tokenize and parse a whole chunk
pub fn parse(source: &str) -> Result<Block, ParseOrLexError> {
    let tokens = lexer::tokenize(source)?;
    Ok(Parser::new(tokens).parse_chunk()?)
}

/// Either front-end failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseOrLexError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Comments are dropped; the stream must end with `Eof`
    pub fn new(tokens: Vec<Token>) -> Self {
        let tokens = tokens
            .into_iter()
            .filter(|t| t.kind != TokenKind::Comment)
            .collect();
        Self { tokens, pos: 0 }
    }

    pub fn parse_chunk(&mut self) -> Result<Block, ParseError> {
        let block = self.parse_block()?;
        if !self.current().is_eof() {
            return Err(self.error("'<eof>' expected"));
        }
        Ok(block)
    }

    // ---- Token helpers ----

    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek(&self) -> &Token {
        let i = (self.pos + 1).min(self.tokens.len() - 1);
        &self.tokens[i]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn check_op(&self, op: &str) -> bool {
        self.current().is_op(op)
    }

    fn check_keyword(&self, word: &str) -> bool {
        self.current().is_keyword(word)
    }

    fn accept_op(&mut self, op: &str) -> bool {
        if self.check_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn accept_keyword(&mut self, word: &str) -> bool {
        if self.check_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), ParseError> {
        if self.accept_op(op) {
            Ok(())
        } else {
            Err(self.error(&format!("'{}' expected", op)))
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<(), ParseError> {
        if self.accept_keyword(word) {
            Ok(())
        } else {
            Err(self.error(&format!("'{}' expected", word)))
        }
    }

    /// Expect a block terminator, naming the opener in the message when it is
    /// on an earlier line
    fn expect_match(&mut self, what: &str, opener: &str, line: u32) -> Result<(), ParseError> {
        if self.accept_keyword(what) {
            return Ok(());
        }
        if line == self.current().line {
            Err(self.error(&format!("'{}' expected", what)))
        } else {
            Err(self.error(&format!(
                "'{}' expected (to close '{}' at line {})",
                what, opener, line
            )))
        }
    }

    fn expect_name(&mut self) -> Result<String, ParseError> {
        if self.current().kind == TokenKind::Identifier {
            Ok(self.advance().raw)
        } else {
            Err(self.error("<name> expected"))
        }
    }

    fn error(&self, message: &str) -> ParseError {
        let tok = self.current();
        ParseError::new(format!("{} near {}", message, tok), tok.line, tok.column)
    }

    fn block_follows(&self) -> bool {
        let tok = self.current();
        tok.is_eof()
            || tok.is_keyword("end")
            || tok.is_keyword("else")
            || tok.is_keyword("elseif")
            || tok.is_keyword("until")
    }

    // ---- Statements ----

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        let mut block = Vec::new();
        loop {
            while self.accept_op(";") {}
            if self.block_follows() {
                break;
            }
            if self.check_keyword("return") {
                block.push(self.parse_return()?);
                if !self.block_follows() {
                    return Err(self.error("'end' expected after return"));
                }
                break;
            }
            block.push(self.parse_statement()?);
        }
        Ok(block)
    }

    fn parse_return(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        let values = if self.block_follows() || self.check_op(";") {
            Vec::new()
        } else {
            self.parse_expr_list()?
        };
        self.accept_op(";");
        Ok(Stmt::Return(values))
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        let tok = self.current().clone();
        if tok.kind == TokenKind::Keyword {
            match tok.raw.as_str() {
                "if" => return self.parse_if(),
                "while" => {
                    self.advance();
                    let cond = self.parse_expr()?;
                    self.expect_keyword("do")?;
                    let body = self.parse_block()?;
                    self.expect_match("end", "while", tok.line)?;
                    return Ok(Stmt::While { cond, body });
                }
                "do" => {
                    self.advance();
                    let body = self.parse_block()?;
                    self.expect_match("end", "do", tok.line)?;
                    return Ok(Stmt::Do(body));
                }
                "for" => return self.parse_for(),
                "repeat" => {
                    self.advance();
                    let body = self.parse_block()?;
                    self.expect_match("until", "repeat", tok.line)?;
                    let cond = self.parse_expr()?;
                    return Ok(Stmt::Repeat { body, cond });
                }
                "function" => {
                    self.advance();
                    let name = self.parse_func_name()?;
                    let func = self.parse_func_body(tok.line)?;
                    return Ok(Stmt::Function { name, func });
                }
                "local" => {
                    self.advance();
                    if self.accept_keyword("function") {
                        let name = self.expect_name()?;
                        let func = self.parse_func_body(tok.line)?;
                        return Ok(Stmt::LocalFunction { name, func });
                    }
                    return self.parse_local();
                }
                "break" => {
                    self.advance();
                    return Ok(Stmt::Break);
                }
                "goto" => {
                    self.advance();
                    return Ok(Stmt::Goto(self.expect_name()?));
                }
                _ => {}
            }
        }
        if self.accept_op("::") {
            let name = self.expect_name()?;
            self.expect_op("::")?;
            return Ok(Stmt::Label(name));
        }
        self.parse_expr_statement()
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let line = self.advance().line;
        let mut clauses = Vec::new();
        let cond = self.parse_expr()?;
        self.expect_keyword("then")?;
        clauses.push((cond, self.parse_block()?));

        let mut else_block = None;
        loop {
            if self.accept_keyword("elseif") {
                let cond = self.parse_expr()?;
                self.expect_keyword("then")?;
                clauses.push((cond, self.parse_block()?));
            } else if self.accept_keyword("else") {
                else_block = Some(self.parse_block()?);
                self.expect_match("end", "if", line)?;
                break;
            } else {
                self.expect_match("end", "if", line)?;
                break;
            }
        }
        Ok(Stmt::If {
            clauses,
            else_block,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let line = self.advance().line;
        let first = self.expect_name()?;
        if self.accept_op("=") {
            let start = self.parse_expr()?;
            self.expect_op(",")?;
            let limit = self.parse_expr()?;
            let step = if self.accept_op(",") {
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.expect_keyword("do")?;
            let body = self.parse_block()?;
            self.expect_match("end", "for", line)?;
            return Ok(Stmt::NumericFor {
                var: first,
                start,
                limit,
                step,
                body,
            });
        }

        let mut vars = vec![first];
        while self.accept_op(",") {
            vars.push(self.expect_name()?);
        }
        if !self.accept_keyword("in") {
            return Err(self.error("'=' or 'in' expected"));
        }
        let exprs = self.parse_expr_list()?;
        self.expect_keyword("do")?;
        let body = self.parse_block()?;
        self.expect_match("end", "for", line)?;
        Ok(Stmt::GenericFor { vars, exprs, body })
    }

    fn parse_local(&mut self) -> Result<Stmt, ParseError> {
        let mut names = Vec::new();
        loop {
            let name = self.expect_name()?;
            let attrib = if self.accept_op("<") {
                let attrib = self.expect_name()?;
                if attrib != "const" && attrib != "close" {
                    return Err(self.error(&format!("unknown attribute '{}'", attrib)));
                }
                self.expect_op(">")?;
                Some(attrib)
            } else {
                None
            };
            names.push(LocalName { name, attrib });
            if !self.accept_op(",") {
                break;
            }
        }
        let values = if self.accept_op("=") {
            self.parse_expr_list()?
        } else {
            Vec::new()
        };
        Ok(Stmt::Local { names, values })
    }

    fn parse_func_name(&mut self) -> Result<FuncName, ParseError> {
        let base = self.expect_name()?;
        let mut path = Vec::new();
        while self.accept_op(".") {
            path.push(self.expect_name()?);
        }
        let method = if self.accept_op(":") {
            Some(self.expect_name()?)
        } else {
            None
        };
        Ok(FuncName { base, path, method })
    }

    fn parse_func_body(&mut self, line: u32) -> Result<FuncBody, ParseError> {
        self.expect_op("(")?;
        let mut params = Vec::new();
        let mut is_vararg = false;
        if !self.check_op(")") {
            loop {
                if self.current().kind == TokenKind::Vararg {
                    self.advance();
                    is_vararg = true;
                    break;
                }
                params.push(self.expect_name()?);
                if !self.accept_op(",") {
                    break;
                }
            }
        }
        self.expect_op(")")?;
        let body = self.parse_block()?;
        self.expect_match("end", "function", line)?;
        Ok(FuncBody {
            params,
            is_vararg,
            body,
        })
    }

    fn parse_expr_statement(&mut self) -> Result<Stmt, ParseError> {
        let first = self.parse_suffixed_expr()?;
        if self.check_op("=") || self.check_op(",") {
            let mut targets = vec![first];
            while self.accept_op(",") {
                targets.push(self.parse_suffixed_expr()?);
            }
            for target in &targets {
                if !target.is_assignable() {
                    return Err(self.error("syntax error: cannot assign to this expression"));
                }
            }
            self.expect_op("=")?;
            let values = self.parse_expr_list()?;
            return Ok(Stmt::Assign { targets, values });
        }
        if !first.is_call() {
            return Err(self.error("syntax error: expected assignment or function call"));
        }
        Ok(Stmt::Call(first))
    }

    // ---- Expressions ----

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut exprs = vec![self.parse_expr()?];
        while self.accept_op(",") {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_subexpr(0)
    }

    fn unary_op(&self) -> Option<UnOp> {
        let tok = self.current();
        if tok.is_keyword("not") {
            Some(UnOp::Not)
        } else if tok.is_op("-") {
            Some(UnOp::Neg)
        } else if tok.is_op("#") {
            Some(UnOp::Len)
        } else if tok.is_op("~") {
            Some(UnOp::BNot)
        } else {
            None
        }
    }

    fn binary_op(&self) -> Option<BinOp> {
        let tok = self.current();
        match tok.kind {
            TokenKind::Operator | TokenKind::Keyword => BinOp::from_symbol(&tok.raw),
            _ => None,
        }
    }

    /// Precedence climbing: parse operators whose left priority exceeds `limit`
    fn parse_subexpr(&mut self, limit: u8) -> Result<Expr, ParseError> {
        let mut left = if let Some(op) = self.unary_op() {
            self.advance();
            let operand = self.parse_subexpr(UNARY_PRIORITY)?;
            Expr::unary(op, operand)
        } else {
            self.parse_simple_expr()?
        };

        while let Some(op) = self.binary_op() {
            let (left_priority, right_priority) = op.priority();
            if left_priority <= limit {
                break;
            }
            self.advance();
            let right = self.parse_subexpr(right_priority)?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_simple_expr(&mut self) -> Result<Expr, ParseError> {
        let tok = self.current().clone();
        let expr = match (&tok.kind, &tok.value) {
            (TokenKind::Number, TokenValue::Number(n)) => Expr::Number(NumLit {
                value: *n,
                form: None,
            }),
            (TokenKind::String, TokenValue::Bytes(b)) => Expr::String(StrLit {
                value: b.clone(),
                form: None,
            }),
            (TokenKind::Nil, _) => Expr::Nil,
            (TokenKind::Boolean, TokenValue::Bool(true)) => Expr::True,
            (TokenKind::Boolean, _) => Expr::False,
            (TokenKind::Vararg, _) => Expr::Vararg,
            _ if tok.is_op("{") => return self.parse_table(),
            _ if tok.is_keyword("function") => {
                self.advance();
                return Ok(Expr::Function(self.parse_func_body(tok.line)?));
            }
            _ => return self.parse_suffixed_expr(),
        };
        self.advance();
        Ok(expr)
    }

    fn parse_primary_expr(&mut self) -> Result<Expr, ParseError> {
        if self.current().kind == TokenKind::Identifier {
            return Ok(Expr::Name(self.advance().raw));
        }
        if self.check_op("(") {
            let line = self.advance().line;
            let inner = self.parse_expr()?;
            if !self.accept_op(")") {
                if self.current().line == line {
                    return Err(self.error("')' expected"));
                }
                return Err(self.error(&format!("')' expected (to close '(' at line {})", line)));
            }
            return Ok(Expr::paren(inner));
        }
        Err(self.error("unexpected symbol"))
    }

    fn parse_suffixed_expr(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary_expr()?;
        loop {
            if self.accept_op(".") {
                let name = self.expect_name()?;
                expr = Expr::member(expr, name);
            } else if self.accept_op("[") {
                let key = self.parse_expr()?;
                self.expect_op("]")?;
                expr = Expr::index(expr, key);
            } else if self.check_op(":") {
                self.advance();
                let method = self.expect_name()?;
                let args = self.parse_call_args()?;
                expr = Expr::MethodCall {
                    object: Box::new(expr),
                    method,
                    args,
                };
            } else if self.check_op("(") || self.check_op("{") || self.current().kind == TokenKind::String {
                let args = self.parse_call_args()?;
                expr = Expr::call(expr, args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let tok = self.current().clone();
        if tok.kind == TokenKind::String {
            self.advance();
            if let TokenValue::Bytes(b) = tok.value {
                return Ok(vec![Expr::String(StrLit { value: b, form: None })]);
            }
        }
        if tok.is_op("{") {
            return Ok(vec![self.parse_table()?]);
        }
        if !self.accept_op("(") {
            return Err(self.error("function arguments expected"));
        }
        if self.accept_op(")") {
            return Ok(Vec::new());
        }
        let args = self.parse_expr_list()?;
        if !self.accept_op(")") {
            if self.current().line == tok.line {
                return Err(self.error("')' expected"));
            }
            return Err(self.error(&format!("')' expected (to close '(' at line {})", tok.line)));
        }
        Ok(args)
    }

    fn parse_table(&mut self) -> Result<Expr, ParseError> {
        let line = self.current().line;
        self.expect_op("{")?;
        let mut fields = Vec::new();
        while !self.check_op("}") {
            if self.accept_op("[") {
                let key = self.parse_expr()?;
                self.expect_op("]")?;
                self.expect_op("=")?;
                fields.push(Field::Keyed(key, self.parse_expr()?));
            } else if self.current().kind == TokenKind::Identifier && self.peek().is_op("=") {
                let name = self.advance().raw;
                self.advance();
                fields.push(Field::Named(name, self.parse_expr()?));
            } else {
                fields.push(Field::Positional(self.parse_expr()?));
            }
            if !self.accept_op(",") && !self.accept_op(";") {
                break;
            }
        }
        if !self.accept_op("}") {
            if self.current().line == line {
                return Err(self.error("'}' expected"));
            }
            return Err(self.error(&format!("'}}' expected (to close '{{' at line {})", line)));
        }
        Ok(Expr::Table(fields))
    }
}

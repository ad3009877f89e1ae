//! Abstract syntax tree
//!
//! Closed set of node kinds. Every node owns its children; cloning is a deep
//! structural copy.

use std::collections::BTreeSet;

pub use crate::lexer::Number;

pub type Block = Vec<Stmt>;

/// Numeric literal. `form` is an explicit lexical rendering (e.g. `0x1F`);
/// literals the obfuscator generates always carry one, source literals don't.
#[derive(Debug, Clone, PartialEq)]
pub struct NumLit {
    pub value: Number,
    pub form: Option<String>,
}

/// String literal. `form` is an explicit quoted rendering including quotes;
/// literals the obfuscator generates always carry one, source literals don't.
#[derive(Debug, Clone, PartialEq)]
pub struct StrLit {
    pub value: Vec<u8>,
    pub form: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
    BNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Lt,
    Gt,
    Le,
    Ge,
    Ne,
    Eq,
    BOr,
    BXor,
    BAnd,
    Shl,
    Shr,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
}

/// Binding power of unary operators
pub const UNARY_PRIORITY: u8 = 12;

impl BinOp {
    /// (left, right) binding powers; right < left means right-associative
    pub fn priority(self) -> (u8, u8) {
        match self {
            BinOp::Or => (1, 1),
            BinOp::And => (2, 2),
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Ne | BinOp::Eq => (3, 3),
            BinOp::BOr => (4, 4),
            BinOp::BXor => (5, 5),
            BinOp::BAnd => (6, 6),
            BinOp::Shl | BinOp::Shr => (7, 7),
            BinOp::Concat => (9, 8),
            BinOp::Add | BinOp::Sub => (10, 10),
            BinOp::Mul | BinOp::Div | BinOp::IDiv | BinOp::Mod => (11, 11),
            BinOp::Pow => (14, 13),
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Or => "or",
            BinOp::And => "and",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Ne => "~=",
            BinOp::Eq => "==",
            BinOp::BOr => "|",
            BinOp::BXor => "~",
            BinOp::BAnd => "&",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Concat => "..",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::IDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "or" => BinOp::Or,
            "and" => BinOp::And,
            "<" => BinOp::Lt,
            ">" => BinOp::Gt,
            "<=" => BinOp::Le,
            ">=" => BinOp::Ge,
            "~=" => BinOp::Ne,
            "==" => BinOp::Eq,
            "|" => BinOp::BOr,
            "~" => BinOp::BXor,
            "&" => BinOp::BAnd,
            "<<" => BinOp::Shl,
            ">>" => BinOp::Shr,
            ".." => BinOp::Concat,
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "//" => BinOp::IDiv,
            "%" => BinOp::Mod,
            "^" => BinOp::Pow,
            _ => return None,
        })
    }
}

impl UnOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnOp::Neg => "-",
            UnOp::Not => "not",
            UnOp::Len => "#",
            UnOp::BNot => "~",
        }
    }
}

/// Parameters and body shared by every function form
#[derive(Debug, Clone, PartialEq)]
pub struct FuncBody {
    pub params: Vec<String>,
    pub is_vararg: bool,
    pub body: Block,
}

/// `a.b.c:d` in `function a.b.c:d() end`
#[derive(Debug, Clone, PartialEq)]
pub struct FuncName {
    pub base: String,
    pub path: Vec<String>,
    pub method: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// `expr`
    Positional(Expr),
    /// `name = expr`
    Named(String, Expr),
    /// `[key] = expr`
    Keyed(Expr, Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Nil,
    True,
    False,
    Vararg,
    Number(NumLit),
    String(StrLit),
    Name(String),
    Member {
        object: Box<Expr>,
        name: String,
    },
    Index {
        object: Box<Expr>,
        key: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    MethodCall {
        object: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Function(FuncBody),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    Table(Vec<Field>),
    /// Parenthesized expression; truncates multiple values to one
    Paren(Box<Expr>),
}

/// A name in a `local` statement with its optional `<const>`/`<close>` attribute
#[derive(Debug, Clone, PartialEq)]
pub struct LocalName {
    pub name: String,
    pub attrib: Option<String>,
}

impl LocalName {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrib: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Local {
        names: Vec<LocalName>,
        values: Vec<Expr>,
    },
    LocalFunction {
        name: String,
        func: FuncBody,
    },
    Function {
        name: FuncName,
        func: FuncBody,
    },
    Assign {
        targets: Vec<Expr>,
        values: Vec<Expr>,
    },
    /// Expression statement; always a `Call` or `MethodCall`
    Call(Expr),
    Do(Block),
    While {
        cond: Expr,
        body: Block,
    },
    Repeat {
        body: Block,
        cond: Expr,
    },
    /// First clause is the `if`, the rest are `elseif`s
    If {
        clauses: Vec<(Expr, Block)>,
        else_block: Option<Block>,
    },
    NumericFor {
        var: String,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
    },
    GenericFor {
        vars: Vec<String>,
        exprs: Vec<Expr>,
        body: Block,
    },
    Return(Vec<Expr>),
    Break,
    Goto(String),
    Label(String),
}

impl Expr {
    pub fn name(name: impl Into<String>) -> Self {
        Expr::Name(name.into())
    }

    pub fn int(value: i64) -> Self {
        Expr::Number(NumLit {
            value: Number::Int(value),
            form: None,
        })
    }

    pub fn int_with_form(value: i64, form: String) -> Self {
        Expr::Number(NumLit {
            value: Number::Int(value),
            form: Some(form),
        })
    }

    pub fn string(value: impl Into<Vec<u8>>) -> Self {
        Expr::String(StrLit {
            value: value.into(),
            form: None,
        })
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: Box::new(callee),
            args,
        }
    }

    pub fn member(object: Expr, name: impl Into<String>) -> Self {
        Expr::Member {
            object: Box::new(object),
            name: name.into(),
        }
    }

    pub fn index(object: Expr, key: Expr) -> Self {
        Expr::Index {
            object: Box::new(object),
            key: Box::new(key),
        }
    }

    pub fn paren(inner: Expr) -> Self {
        Expr::Paren(Box::new(inner))
    }

    /// `a.b.c` from a dotted path
    pub fn path(path: &str) -> Self {
        let mut parts = path.split('.');
        let mut expr = Expr::name(parts.next().unwrap_or_default());
        for part in parts {
            expr = Expr::member(expr, part);
        }
        expr
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Expr::Call { .. } | Expr::MethodCall { .. })
    }

    /// Expressions that can produce more than one value in a list tail
    pub fn is_multi_value(&self) -> bool {
        matches!(self, Expr::Call { .. } | Expr::MethodCall { .. } | Expr::Vararg)
    }

    /// Valid assignment target
    pub fn is_assignable(&self) -> bool {
        matches!(self, Expr::Name(_) | Expr::Member { .. } | Expr::Index { .. })
    }
}

impl Stmt {
    /// Statements after which nothing else may follow in a block
    pub fn is_terminator(&self) -> bool {
        matches!(self, Stmt::Return(_) | Stmt::Break)
    }

    /// `local a, b = ...`
    pub fn local(names: &[&str], values: Vec<Expr>) -> Self {
        Stmt::Local {
            names: names.iter().map(|n| LocalName::plain(*n)).collect(),
            values,
        }
    }
}

/// Mutable AST walker. Override a `visit_*` method and call the matching
/// `walk_*` function to keep recursing.
pub trait VisitorMut {
    fn visit_block(&mut self, block: &mut Block) {
        walk_block(self, block);
    }

    fn visit_stmt(&mut self, stmt: &mut Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &mut Expr) {
        walk_expr(self, expr);
    }

    fn visit_func(&mut self, func: &mut FuncBody) {
        walk_func(self, func);
    }
}

pub fn walk_block<V: VisitorMut + ?Sized>(v: &mut V, block: &mut Block) {
    for stmt in block.iter_mut() {
        v.visit_stmt(stmt);
    }
}

pub fn walk_func<V: VisitorMut + ?Sized>(v: &mut V, func: &mut FuncBody) {
    v.visit_block(&mut func.body);
}

pub fn walk_stmt<V: VisitorMut + ?Sized>(v: &mut V, stmt: &mut Stmt) {
    match stmt {
        Stmt::Local { values, .. } => {
            for e in values {
                v.visit_expr(e);
            }
        }
        Stmt::LocalFunction { func, .. } | Stmt::Function { func, .. } => v.visit_func(func),
        Stmt::Assign { targets, values } => {
            for e in targets {
                v.visit_expr(e);
            }
            for e in values {
                v.visit_expr(e);
            }
        }
        Stmt::Call(e) => v.visit_expr(e),
        Stmt::Do(body) => v.visit_block(body),
        Stmt::While { cond, body } => {
            v.visit_expr(cond);
            v.visit_block(body);
        }
        Stmt::Repeat { body, cond } => {
            v.visit_block(body);
            v.visit_expr(cond);
        }
        Stmt::If {
            clauses,
            else_block,
        } => {
            for (cond, body) in clauses {
                v.visit_expr(cond);
                v.visit_block(body);
            }
            if let Some(body) = else_block {
                v.visit_block(body);
            }
        }
        Stmt::NumericFor {
            start,
            limit,
            step,
            body,
            ..
        } => {
            v.visit_expr(start);
            v.visit_expr(limit);
            if let Some(step) = step {
                v.visit_expr(step);
            }
            v.visit_block(body);
        }
        Stmt::GenericFor { exprs, body, .. } => {
            for e in exprs {
                v.visit_expr(e);
            }
            v.visit_block(body);
        }
        Stmt::Return(values) => {
            for e in values {
                v.visit_expr(e);
            }
        }
        Stmt::Break | Stmt::Goto(_) | Stmt::Label(_) => {}
    }
}

pub fn walk_expr<V: VisitorMut + ?Sized>(v: &mut V, expr: &mut Expr) {
    match expr {
        Expr::Nil
        | Expr::True
        | Expr::False
        | Expr::Vararg
        | Expr::Number(_)
        | Expr::String(_)
        | Expr::Name(_) => {}
        Expr::Member { object, .. } => v.visit_expr(object),
        Expr::Index { object, key } => {
            v.visit_expr(object);
            v.visit_expr(key);
        }
        Expr::Call { callee, args } => {
            v.visit_expr(callee);
            for a in args {
                v.visit_expr(a);
            }
        }
        Expr::MethodCall { object, args, .. } => {
            v.visit_expr(object);
            for a in args {
                v.visit_expr(a);
            }
        }
        Expr::Function(func) => v.visit_func(func),
        Expr::Binary { left, right, .. } => {
            v.visit_expr(left);
            v.visit_expr(right);
        }
        Expr::Unary { operand, .. } => v.visit_expr(operand),
        Expr::Table(fields) => {
            for field in fields {
                match field {
                    Field::Positional(e) | Field::Named(_, e) => v.visit_expr(e),
                    Field::Keyed(k, e) => {
                        v.visit_expr(k);
                        v.visit_expr(e);
                    }
                }
            }
        }
        Expr::Paren(inner) => v.visit_expr(inner),
    }
}

/// Every variable-like identifier in a block: references, declarations,
/// parameters and loop variables. Field and method names are not included.
pub fn collect_names(block: &Block) -> BTreeSet<String> {
    struct Collector(BTreeSet<String>);

    impl VisitorMut for Collector {
        fn visit_stmt(&mut self, stmt: &mut Stmt) {
            match stmt {
                Stmt::Local { names, .. } => {
                    self.0.extend(names.iter().map(|n| n.name.clone()));
                }
                Stmt::LocalFunction { name, .. } => {
                    self.0.insert(name.clone());
                }
                Stmt::Function { name, .. } => {
                    self.0.insert(name.base.clone());
                }
                Stmt::NumericFor { var, .. } => {
                    self.0.insert(var.clone());
                }
                Stmt::GenericFor { vars, .. } => {
                    self.0.extend(vars.iter().cloned());
                }
                _ => {}
            }
            walk_stmt(self, stmt);
        }

        fn visit_expr(&mut self, expr: &mut Expr) {
            if let Expr::Name(name) = expr {
                self.0.insert(name.clone());
            }
            walk_expr(self, expr);
        }

        fn visit_func(&mut self, func: &mut FuncBody) {
            self.0.extend(func.params.iter().cloned());
            walk_func(self, func);
        }
    }

    // The walker needs `&mut`; collect from a scratch copy
    let mut scratch = block.clone();
    let mut collector = Collector(BTreeSet::new());
    collector.visit_block(&mut scratch);
    collector.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priorities_match_lua() {
        assert!(BinOp::Pow.priority().0 > UNARY_PRIORITY);
        assert!(BinOp::Mul.priority().0 < UNARY_PRIORITY);
        let (l, r) = BinOp::Concat.priority();
        assert!(r < l, "concat is right associative");
        let (l, r) = BinOp::Add.priority();
        assert_eq!(l, r);
    }

    #[test]
    fn test_symbol_round_trip() {
        for op in [BinOp::Or, BinOp::IDiv, BinOp::Shl, BinOp::Concat, BinOp::Ne, BinOp::BXor] {
            assert_eq!(BinOp::from_symbol(op.symbol()), Some(op));
        }
        assert_eq!(BinOp::from_symbol("not"), None);
    }

    #[test]
    fn test_path_builds_member_chain() {
        let e = Expr::path("string.char");
        assert_eq!(e, Expr::member(Expr::name("string"), "char"));
    }

    #[test]
    fn test_clone_is_deep() {
        let original = Stmt::Do(vec![Stmt::Call(Expr::call(Expr::name("print"), vec![Expr::int(1)]))]);
        let mut copy = original.clone();
        if let Stmt::Do(body) = &mut copy {
            body.clear();
        }
        assert_ne!(original, copy);
        assert!(matches!(&original, Stmt::Do(body) if body.len() == 1));
    }

    #[test]
    fn test_collect_names_skips_fields() {
        let block = vec![
            Stmt::local(&["a"], vec![Expr::member(Expr::name("obj"), "field")]),
            Stmt::GenericFor {
                vars: vec!["k".into(), "v".into()],
                exprs: vec![Expr::call(Expr::name("pairs"), vec![Expr::name("a")])],
                body: vec![],
            },
        ];
        let names = collect_names(&block);
        let expected: BTreeSet<String> = ["a", "obj", "k", "v", "pairs"].iter().map(|s| s.to_string()).collect();
        assert_eq!(names, expected);
    }
}

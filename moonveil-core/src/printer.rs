//! AST to source text
//!
//! Emits 4-space indented code with the minimum parentheses needed for the
//! parser to rebuild the same tree.

use crate::ast::*;

const INDENT: &str = "    ";

/// Render a whole chunk
pub fn print_block(block: &Block) -> String {
    let mut printer = Printer::default();
    printer.block(block);
    printer.finish()
}

/// Render a single expression
pub fn print_expr(expr: &Expr) -> String {
    let mut printer = Printer::default();
    printer.expr(expr);
    printer.out
}

#[derive(Default)]
struct Printer {
    out: String,
    depth: usize,
    /// Whether the last emitted statement could be continued by a `(`
    at_line_start: bool,
}

impl Printer {
    fn finish(self) -> String {
        self.out
    }

    fn newline(&mut self) {
        self.out.push('\n');
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.at_line_start = true;
    }

    fn push(&mut self, text: &str) {
        self.out.push_str(text);
        self.at_line_start = false;
    }

    fn block(&mut self, block: &Block) {
        let mut first = true;
        for stmt in block {
            if !first || self.depth > 0 {
                self.newline();
            }
            first = false;
            self.stmt(stmt);
        }
    }

    fn nested(&mut self, block: &Block) {
        self.depth += 1;
        self.block(block);
        self.depth -= 1;
        self.newline();
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Local { names, values } => {
                self.push("local ");
                for (i, name) in names.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.push(&name.name);
                    if let Some(attrib) = &name.attrib {
                        self.push(&format!(" <{}>", attrib));
                    }
                }
                if !values.is_empty() {
                    self.push(" = ");
                    self.expr_list(values);
                }
            }
            Stmt::LocalFunction { name, func } => {
                self.push("local function ");
                self.push(name);
                self.func_body(func);
            }
            Stmt::Function { name, func } => {
                self.push("function ");
                self.push(&name.base);
                for part in &name.path {
                    self.push(".");
                    self.push(part);
                }
                if let Some(method) = &name.method {
                    self.push(":");
                    self.push(method);
                }
                self.func_body(func);
            }
            Stmt::Assign { targets, values } => {
                let mut text = Printer::default();
                text.expr_list(targets);
                self.guard_paren(&text.out);
                self.push(&text.out);
                self.push(" = ");
                self.expr_list(values);
            }
            Stmt::Call(call) => {
                let text = print_expr(call);
                self.guard_paren(&text);
                self.push(&text);
            }
            Stmt::Do(body) => {
                self.push("do");
                self.nested(body);
                self.push("end");
            }
            Stmt::While { cond, body } => {
                self.push("while ");
                self.expr(cond);
                self.push(" do");
                self.nested(body);
                self.push("end");
            }
            Stmt::Repeat { body, cond } => {
                self.push("repeat");
                self.nested(body);
                self.push("until ");
                self.expr(cond);
            }
            Stmt::If {
                clauses,
                else_block,
            } => {
                for (i, (cond, body)) in clauses.iter().enumerate() {
                    self.push(if i == 0 { "if " } else { "elseif " });
                    self.expr(cond);
                    self.push(" then");
                    self.nested(body);
                }
                if let Some(body) = else_block {
                    self.push("else");
                    self.nested(body);
                }
                self.push("end");
            }
            Stmt::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => {
                self.push("for ");
                self.push(var);
                self.push(" = ");
                self.expr(start);
                self.push(", ");
                self.expr(limit);
                if let Some(step) = step {
                    self.push(", ");
                    self.expr(step);
                }
                self.push(" do");
                self.nested(body);
                self.push("end");
            }
            Stmt::GenericFor { vars, exprs, body } => {
                self.push("for ");
                self.push(&vars.join(", "));
                self.push(" in ");
                self.expr_list(exprs);
                self.push(" do");
                self.nested(body);
                self.push("end");
            }
            Stmt::Return(values) => {
                self.push("return");
                if !values.is_empty() {
                    self.push(" ");
                    self.expr_list(values);
                }
            }
            Stmt::Break => self.push("break"),
            Stmt::Goto(label) => {
                self.push("goto ");
                self.push(label);
            }
            Stmt::Label(label) => self.push(&format!("::{}::", label)),
        }
    }

    /// A statement starting with `(` would be read as a call continuing the
    /// previous statement; separate it explicitly
    fn guard_paren(&mut self, text: &str) {
        if text.starts_with('(') {
            self.push(";");
        }
    }

    fn func_body(&mut self, func: &FuncBody) {
        self.push("(");
        let mut params = func.params.join(", ");
        if func.is_vararg {
            if !params.is_empty() {
                params.push_str(", ");
            }
            params.push_str("...");
        }
        self.push(&params);
        self.push(")");
        self.nested(&func.body);
        self.push("end");
    }

    fn expr_list(&mut self, exprs: &[Expr]) {
        for (i, e) in exprs.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(e);
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Nil => self.push("nil"),
            Expr::True => self.push("true"),
            Expr::False => self.push("false"),
            Expr::Vararg => self.push("..."),
            Expr::Number(n) => {
                let text = number_text(n);
                self.push(&text);
            }
            Expr::String(s) => {
                let text = match &s.form {
                    Some(form) => form.clone(),
                    None => quote_string(&s.value),
                };
                self.push(&text);
            }
            Expr::Name(name) => self.push(name),
            Expr::Member { object, name } => {
                self.prefix(object);
                self.push(".");
                self.push(name);
            }
            Expr::Index { object, key } => {
                self.prefix(object);
                self.push("[");
                self.expr(key);
                self.push("]");
            }
            Expr::Call { callee, args } => {
                self.prefix(callee);
                self.push("(");
                self.expr_list(args);
                self.push(")");
            }
            Expr::MethodCall {
                object,
                method,
                args,
            } => {
                self.prefix(object);
                self.push(":");
                self.push(method);
                self.push("(");
                self.expr_list(args);
                self.push(")");
            }
            Expr::Function(func) => {
                self.push("function");
                self.func_body(func);
            }
            Expr::Binary { op, left, right } => {
                let (left_priority, right_priority) = op.priority();
                let left_parens = match left.as_ref() {
                    Expr::Binary { op: inner, .. } => left_priority > inner.priority().1,
                    Expr::Unary { .. } => left_priority > UNARY_PRIORITY,
                    _ => false,
                };
                let right_parens = match right.as_ref() {
                    Expr::Binary { op: inner, .. } => inner.priority().0 <= right_priority,
                    _ => false,
                };
                self.wrapped(left, left_parens);
                self.push(" ");
                self.push(op.symbol());
                self.push(" ");
                self.wrapped(right, right_parens);
            }
            Expr::Unary { op, operand } => {
                self.push(op.symbol());
                let parens = match operand.as_ref() {
                    Expr::Binary { op: inner, .. } => inner.priority().0 <= UNARY_PRIORITY,
                    _ => false,
                };
                let mut inner = Printer::default();
                inner.wrapped(operand, parens);
                // `not` needs a word break; `- -x` must not become a comment
                let needs_space = *op == UnOp::Not
                    || (inner.out.starts_with('-') && *op == UnOp::Neg)
                    || (inner.out.starts_with('~') && *op == UnOp::BNot);
                if needs_space {
                    self.push(" ");
                }
                self.push(&inner.out);
            }
            Expr::Table(fields) => {
                if fields.is_empty() {
                    self.push("{}");
                    return;
                }
                self.push("{");
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    match field {
                        Field::Positional(e) => self.expr(e),
                        Field::Named(name, e) => {
                            self.push(name);
                            self.push(" = ");
                            self.expr(e);
                        }
                        Field::Keyed(k, e) => {
                            self.push("[");
                            self.expr(k);
                            self.push("] = ");
                            self.expr(e);
                        }
                    }
                }
                self.push("}");
            }
            Expr::Paren(inner) => {
                self.push("(");
                self.expr(inner);
                self.push(")");
            }
        }
    }

    fn wrapped(&mut self, expr: &Expr, parens: bool) {
        if parens {
            self.push("(");
            self.expr(expr);
            self.push(")");
        } else {
            self.expr(expr);
        }
    }

    /// Objects of `.`, `[]`, `:` and calls must be prefix expressions
    fn prefix(&mut self, expr: &Expr) {
        let is_prefix = matches!(
            expr,
            Expr::Name(_)
                | Expr::Paren(_)
                | Expr::Member { .. }
                | Expr::Index { .. }
                | Expr::Call { .. }
                | Expr::MethodCall { .. }
        );
        self.wrapped(expr, !is_prefix);
    }
}

fn number_text(n: &NumLit) -> String {
    if let Some(form) = &n.form {
        return form.clone();
    }
    match n.value {
        Number::Int(i) if i == i64::MIN => "(-9223372036854775807 - 1)".to_string(),
        Number::Int(i) if i < 0 => format!("({})", i),
        Number::Int(i) => i.to_string(),
        Number::Float(f) if f.is_nan() => "(0 / 0)".to_string(),
        Number::Float(f) if f.is_infinite() => {
            if f > 0.0 {
                "1e999".to_string()
            } else {
                "(-1e999)".to_string()
            }
        }
        Number::Float(f) if f.is_sign_negative() => format!("({:?})", f),
        Number::Float(f) => format!("{:?}", f),
    }
}

/// Double-quoted Lua string literal for arbitrary bytes
pub fn quote_string(bytes: &[u8]) -> String {
    let keep_utf8 = std::str::from_utf8(bytes).is_ok();
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            0x80..=0xff if keep_utf8 => {
                // Copy the whole multi-byte sequence
                let width = utf8_width(b);
                let end = (i + width).min(bytes.len());
                out.push_str(&String::from_utf8_lossy(&bytes[i..end]));
                i = end;
                continue;
            }
            _ => out.push_str(&format!("\\{:03}", b)),
        }
        i += 1;
    }
    out.push('"');
    out
}

fn utf8_width(lead: u8) -> usize {
    match lead {
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn round_trip(source: &str) -> String {
        let block = parse(source).unwrap();
        let printed = print_block(&block);
        let reparsed = parse(&printed).unwrap_or_else(|e| panic!("{printed}\n{e}"));
        assert_eq!(block, reparsed, "printed:\n{printed}");
        printed
    }

    #[test]
    fn test_simple_statements() {
        assert_eq!(round_trip("local x = 5\nprint(x)"), "local x = 5\nprint(x)");
    }

    #[test]
    fn test_nested_blocks_indent() {
        let printed = round_trip("if a then while b do f() end else g() end");
        assert_eq!(printed, "if a then\n    while b do\n        f()\n    end\nelse\n    g()\nend");
    }

    #[test]
    fn test_minimal_parens_survive_reparse() {
        for source in [
            "return (a + b) * c",
            "return a - (b - c)",
            "return (a .. b) .. c",
            "return a ^ (b ^ c)",
            "return (a ^ b) ^ c",
            "return (-a) ^ 2",
            "return -a ^ 2",
            "return not (a == b)",
            "return (a or b) and c",
            "return - -a",
            "return ~ ~a",
            "return (\"x\"):rep(3)",
            "return ({}).x",
            "return (f())",
        ] {
            round_trip(source);
        }
    }

    #[test]
    fn test_generated_tree_gets_parens() {
        let e = Expr::binary(
            BinOp::Mul,
            Expr::binary(BinOp::Add, Expr::int(1), Expr::int(2)),
            Expr::int(3),
        );
        assert_eq!(print_expr(&e), "(1 + 2) * 3");
        let neg = Expr::unary(UnOp::Neg, Expr::int(-4));
        assert_eq!(print_expr(&neg), "-(-4)");
    }

    #[test]
    fn test_numbers_keep_kind() {
        assert_eq!(round_trip("return 1.0, 0.5, 1e300, 255"), "return 1.0, 0.5, 1e300, 255");
        let inf = Expr::Number(NumLit {
            value: Number::Float(f64::INFINITY),
            form: None,
        });
        assert_eq!(print_expr(&inf), "1e999");
    }

    #[test]
    fn test_string_quoting() {
        assert_eq!(quote_string(b"a\"b\\c\n"), "\"a\\\"b\\\\c\\n\"");
        assert_eq!(quote_string(&[0, 1, 200]), "\"\\000\\001\\200\"");
        assert_eq!(quote_string("héllo".as_bytes()), "\"héllo\"");
        round_trip("return '\\0\\1\\2', [[long\nstring]]");
    }

    #[test]
    fn test_paren_statement_is_separated() {
        let printed = round_trip("x = y;\n(f or g)()");
        assert!(printed.contains(";(f or g)()"));
    }

    #[test]
    fn test_functions_and_tables() {
        round_trip("local t = {1, 2, x = function(a, ...) return ... end, [\"k\"] = {}}");
        round_trip("function a.b:c(d) return self, d end");
        round_trip("local x <close> = nil");
    }
}

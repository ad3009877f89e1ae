//! Local identifier renaming
//!
//! Every local variable, parameter and loop variable gets one generated
//! name for the whole session. Only references that resolve to a local are
//! rewritten; globals, fields, methods and labels keep their names.

use std::collections::HashSet;

use tracing::debug;

use super::Pass;
use crate::ast::*;
use crate::error::ObfuscateError;
use crate::session::Session;

pub struct Renamer;

impl Pass for Renamer {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn run(&self, program: &mut Block, session: &mut Session) -> Result<(), ObfuscateError> {
        let excluded: HashSet<String> = session
            .target
            .builtins()
            .into_iter()
            .map(String::from)
            .collect();
        let mut walker = ScopeWalker {
            session,
            excluded,
            scopes: vec![Vec::new()],
        };
        walk_block(&mut walker, program);
        let renamed = walker.session.renames.len();
        walker.session.stats.variables_renamed = renamed;
        debug!("renamed {} identifiers", renamed);
        Ok(())
    }
}

struct ScopeWalker<'s> {
    session: &'s mut Session,
    excluded: HashSet<String>,
    /// Original names declared in each open scope
    scopes: Vec<Vec<String>>,
}

impl ScopeWalker<'_> {
    fn declare(&mut self, name: &mut String) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(name.clone());
        }
        if self.excluded.contains(name.as_str()) {
            return;
        }
        *name = self.generated(name);
    }

    fn generated(&mut self, original: &str) -> String {
        if let Some(existing) = self.session.renames.get(original) {
            return existing.clone();
        }
        let fresh = self.session.fresh_name();
        self.session.renames.insert(original.to_string(), fresh.clone());
        fresh
    }

    fn resolve(&mut self, name: &mut String) {
        if self.excluded.contains(name.as_str()) {
            return;
        }
        let target = name.as_str();
        let visible = self
            .scopes
            .iter()
            .rev()
            .any(|scope| scope.iter().any(|declared| declared == target));
        if visible {
            *name = self.generated(name);
        }
    }

    fn with_scope<F: FnOnce(&mut Self)>(&mut self, f: F) {
        self.scopes.push(Vec::new());
        f(self);
        self.scopes.pop();
    }
}

impl VisitorMut for ScopeWalker<'_> {
    fn visit_block(&mut self, block: &mut Block) {
        self.with_scope(|w| walk_block(w, block));
    }

    fn visit_stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Local { names, values } => {
                // Values see the names from before this declaration
                for value in values.iter_mut() {
                    self.visit_expr(value);
                }
                for local in names.iter_mut() {
                    self.declare(&mut local.name);
                }
            }
            Stmt::LocalFunction { name, func } => {
                self.declare(name);
                self.visit_func(func);
            }
            Stmt::Function { name, func } => {
                self.resolve(&mut name.base);
                self.visit_func(func);
            }
            Stmt::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => {
                self.visit_expr(start);
                self.visit_expr(limit);
                if let Some(step) = step {
                    self.visit_expr(step);
                }
                self.with_scope(|w| {
                    w.declare(var);
                    w.visit_block(body);
                });
            }
            Stmt::GenericFor { vars, exprs, body } => {
                for e in exprs.iter_mut() {
                    self.visit_expr(e);
                }
                self.with_scope(|w| {
                    for var in vars.iter_mut() {
                        w.declare(var);
                    }
                    w.visit_block(body);
                });
            }
            Stmt::Repeat { body, cond } => {
                // The condition can see the body's locals
                self.with_scope(|w| {
                    walk_block(w, body);
                    w.visit_expr(cond);
                });
            }
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: &mut Expr) {
        if let Expr::Name(name) = expr {
            self.resolve(name);
            return;
        }
        walk_expr(self, expr);
    }

    fn visit_func(&mut self, func: &mut FuncBody) {
        self.with_scope(|w| {
            for param in func.params.iter_mut() {
                w.declare(param);
            }
            walk_block(w, &mut func.body);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Features, ObfuscateOptions};
    use crate::parser::parse;
    use crate::printer::print_block;
    use crate::target::Target;

    fn rename(source: &str) -> (String, Session) {
        let mut block = parse(source).unwrap();
        let options = ObfuscateOptions::new(Target::Standard, 42, Features::default());
        let mut session = Session::new(&options, &collect_names(&block));
        Renamer.run(&mut block, &mut session).unwrap();
        (print_block(&block), session)
    }

    #[test]
    fn test_locals_renamed_globals_kept() {
        let (out, session) = rename("local x = 5\nprint(x, y)");
        let new = &session.renames["x"];
        assert_eq!(out, format!("local {new} = 5\nprint({new}, y)"));
        assert_eq!(session.stats.variables_renamed, 1);
    }

    #[test]
    fn test_fields_and_methods_untouched() {
        let (out, session) = rename("local t = {}\nt.value = 1\nt:method()\nreturn t.value");
        let t = &session.renames["t"];
        assert!(out.contains(&format!("{t}.value = 1")));
        assert!(out.contains(&format!("{t}:method()")));
    }

    #[test]
    fn test_global_with_same_name_as_local_elsewhere() {
        let (out, session) = rename("function f() local x = 1 return x end\nx = 2\nprint(x)");
        let x = &session.renames["x"];
        assert!(out.contains("x = 2"));
        assert!(out.contains("print(x)"));
        assert!(out.contains(&format!("return {x}")));
        // the global function name is not a local
        assert!(out.starts_with("function f()"));
    }

    #[test]
    fn test_local_initializer_sees_outer_name() {
        let (out, session) = rename("local print = print\nprint(1)");
        // builtins are never renamed, even when shadowed
        assert!(session.renames.is_empty());
        assert_eq!(out, "local print = print\nprint(1)");

        let (out, session) = rename("local v = v");
        assert_eq!(out, format!("local {} = v", session.renames["v"]));
    }

    #[test]
    fn test_params_loops_and_repeat_scopes() {
        let source = "local function add(a, b) return a + b end\n\
                      for i = 1, 3 do print(add(i, i)) end\n\
                      for k, v in pairs({}) do print(k, v) end\n\
                      repeat local done = true until done";
        let (out, session) = rename(source);
        for name in ["add", "a", "b", "i", "k", "v", "done"] {
            assert!(session.renames.contains_key(name), "{name} not renamed");
        }
        assert!(out.contains(&format!("until {}", session.renames["done"])));
        assert!(out.contains("pairs({})"));
    }

    #[test]
    fn test_rename_map_is_injective_and_avoids_builtins() {
        let source = (0..200)
            .map(|i| format!("local v{i} = {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let (_, session) = rename(&source);
        let generated: HashSet<_> = session.renames.values().collect();
        assert_eq!(generated.len(), 200);
        let builtins = Target::Standard.builtins();
        for name in generated {
            assert!(!builtins.contains(&name.as_str()));
            assert!(!crate::lexer::is_keyword(name));
        }
    }

    #[test]
    fn test_first_occurrence_order() {
        let (_, session) = rename("local b = 1\nlocal a = 2\nlocal b2 = a + b");
        let order: Vec<_> = session.renames.keys().cloned().collect();
        assert_eq!(order, ["b", "a", "b2"]);
    }
}

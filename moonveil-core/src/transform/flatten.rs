//! Control-flow flattening
//!
//! Rewrites the top level of the chunk and of every function body into a
//! dispatch loop:
//!
//! ```lua
//! local a, b
//! local state = 5013
//! while state ~= 271 do
//!     if state == 5013 then
//!         a = 1
//!         state = 88
//!     elseif state == 88 then
//!         ...
//!     end
//! end
//! ```
//!
//! Unreachable states with their own transitions are mixed in among the live
//! ones, and every few branches open with a block behind an always-false
//! guard that jumps to one of them.
//!
//! Blocks are left alone when hoisting their locals could change what a
//! name refers to.

use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use super::junk::junk_statement;
use super::opaque;
use super::Pass;
use crate::ast::*;
use crate::error::ObfuscateError;
use crate::session::Session;

pub struct ControlFlowFlattener;

impl Pass for ControlFlowFlattener {
    fn name(&self) -> &'static str {
        "controlflow"
    }

    fn run(&self, program: &mut Block, session: &mut Session) -> Result<(), ObfuscateError> {
        let mut walker = Walker {
            session,
            flattened: 0,
        };
        walker.visit_block(program);
        walker.flatten(program);
        debug!("flattened {} blocks", walker.flattened);
        Ok(())
    }
}

struct Walker<'s> {
    session: &'s mut Session,
    flattened: usize,
}

impl VisitorMut for Walker<'_> {
    fn visit_func(&mut self, func: &mut FuncBody) {
        walk_func(self, func);
        self.flatten(&mut func.body);
    }
}

impl Walker<'_> {
    fn flatten(&mut self, block: &mut Block) {
        let min = self.session.tuning.flatten_min_statements.max(2);
        let Some(hoisted) = hoistable_locals(block, min) else {
            return;
        };

        let statements = std::mem::take(block);
        let count = statements.len();

        // Distinct state values; `count` is the exit, anything past it is dead
        let dead = 1 + count / 4;
        let mut used = HashSet::new();
        let mut states = Vec::with_capacity(count + 1 + dead);
        while states.len() < count + 1 + dead {
            let value = self.session.random.next_int(1, 1 << 24);
            if used.insert(value) {
                states.push(value);
            }
        }
        let dead_states = states[count + 1..].to_vec();
        let state = self.session.fresh_name();
        let opaque_enabled = self.session.tuning.opaque_predicates;

        let mut branches: Vec<(Expr, Block)> = Vec::with_capacity(count);
        for (i, stmt) in statements.into_iter().enumerate() {
            let ends = stmt.is_terminator();
            let mut body = self.dehoist(stmt, opaque_enabled);
            if !ends {
                body.push(Stmt::Assign {
                    targets: vec![Expr::name(&state)],
                    values: vec![self.session.number(states[i + 1])],
                });
            }
            let check = Expr::binary(
                BinOp::Eq,
                Expr::name(&state),
                self.session.number(states[i]),
            );
            branches.push((check, body));
        }

        let stride = self.session.random.next_int(2, 4) as usize;
        let mut at = self.session.random.index(stride);
        while at < branches.len() {
            let guard = opaque::always_false(self.session);
            let body = vec![
                junk_statement(self.session),
                self.jump(&state, &dead_states),
            ];
            branches[at].1.insert(
                0,
                Stmt::If {
                    clauses: vec![(guard, body)],
                    else_block: None,
                },
            );
            at += stride;
        }

        for value in &dead_states {
            let check = Expr::binary(BinOp::Eq, Expr::name(&state), self.session.number(*value));
            let body = vec![junk_statement(self.session), self.jump(&state, &states)];
            branches.push((check, body));
        }
        self.session.random.shuffle(&mut branches);

        let mut out = Vec::with_capacity(3);
        if !hoisted.is_empty() {
            out.push(Stmt::Local {
                names: hoisted.into_iter().map(LocalName::plain).collect(),
                values: Vec::new(),
            });
        }
        out.push(Stmt::local(
            &[state.as_str()],
            vec![self.session.number(states[0])],
        ));
        out.push(Stmt::While {
            cond: Expr::binary(
                BinOp::Ne,
                Expr::name(&state),
                self.session.number(states[count]),
            ),
            body: vec![Stmt::If {
                clauses: branches,
                else_block: None,
            }],
        });
        *block = out;
        self.flattened += 1;
    }

    /// `state = <one of targets>`
    fn jump(&mut self, state: &str, targets: &[i64]) -> Stmt {
        let target = *self.session.random.pick(targets);
        Stmt::Assign {
            targets: vec![Expr::name(state)],
            values: vec![self.session.number(target)],
        }
    }

    /// The statement as it runs inside its branch, with local declarations
    /// turned into assignments to the hoisted names
    fn dehoist(&mut self, stmt: Stmt, opaque_enabled: bool) -> Block {
        match stmt {
            Stmt::Local { names, values } => {
                if values.is_empty() {
                    return Vec::new();
                }
                vec![Stmt::Assign {
                    targets: names.into_iter().map(|n| Expr::Name(n.name)).collect(),
                    values,
                }]
            }
            Stmt::LocalFunction { name, func } => vec![Stmt::Assign {
                targets: vec![Expr::Name(name)],
                values: vec![Expr::Function(func)],
            }],
            Stmt::If {
                clauses,
                else_block,
            } if opaque_enabled => {
                let clauses = clauses
                    .into_iter()
                    .map(|(cond, body)| (opaque::disguise_condition(cond, self.session), body))
                    .collect();
                vec![Stmt::If {
                    clauses,
                    else_block,
                }]
            }
            other => vec![other],
        }
    }
}

/// Names to hoist, or `None` when the block must not be flattened
fn hoistable_locals(block: &Block, min: usize) -> Option<Vec<String>> {
    if block.len() < min {
        return None;
    }
    let mut hoisted: Vec<String> = Vec::new();
    // Every name mentioned so far; a local declared after a mention of the
    // same name would capture that earlier reference once hoisted
    let mut mentioned: BTreeSet<String> = BTreeSet::new();

    for stmt in block {
        match stmt {
            Stmt::Break | Stmt::Goto(_) | Stmt::Label(_) => return None,
            Stmt::Local { names, values } => {
                if names.iter().any(|n| n.attrib.is_some()) {
                    return None;
                }
                let probe = vec![Stmt::Return(values.clone())];
                mentioned.extend(collect_names(&probe));
                for local in names {
                    if mentioned.contains(&local.name) || hoisted.contains(&local.name) {
                        return None;
                    }
                    hoisted.push(local.name.clone());
                }
            }
            Stmt::LocalFunction { name, .. } => {
                if mentioned.contains(name) || hoisted.contains(name) {
                    return None;
                }
                hoisted.push(name.clone());
                mentioned.extend(collect_names(&vec![stmt.clone()]));
            }
            other => mentioned.extend(collect_names(&vec![other.clone()])),
        }
    }
    Some(hoisted)
}

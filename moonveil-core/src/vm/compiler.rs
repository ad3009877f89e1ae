//! AST to stack-machine lowering
//!
//! Values flow through a per-frame operand stack. Every local lives in a
//! fresh one-element cell created by `NEWLOCAL` each time its declaration
//! runs, so closures capture the cell rather than the slot. Multi-value
//! contexts (call arguments, returns, table constructors, adjusted lists)
//! bracket their values with `MARK`.
//!
//! Jumps hold absolute targets while a function is being built and are
//! rewritten to relative offsets once decoys have been interleaved.

use tracing::debug;

use super::bytecode::{Bytecode, Constant, ConstantPool, Instruction, Proto, UpvalueSource};
use super::opcodes::Op;
use crate::ast::{BinOp, Block, Expr, Field, FuncBody, FuncName, Number, Stmt, UnOp};
use crate::error::VmCompileError;
use crate::session::Session;

/// `CALL` result count meaning "keep every value"
const ALL_VALUES: i64 = 0;

enum Var {
    Local(u32),
    Upvalue(u32),
    Global(u32),
}

/// Where a multiple assignment stores one value
enum Place {
    Var(Var),
    Field { object: u32, key: Key },
}

enum Key {
    Slot(u32),
    Constant(u32),
}

struct PendingGoto {
    label: String,
    at: usize,
}

#[derive(Default)]
struct Scope {
    locals: Vec<(String, u32)>,
    labels: Vec<(String, usize)>,
    gotos: Vec<PendingGoto>,
}

struct FuncState {
    proto: usize,
    code: Vec<Instruction>,
    scopes: Vec<Scope>,
    next_slot: u32,
    upvalues: Vec<(String, UpvalueSource)>,
    /// Pending `break` jumps, one list per enclosing loop
    loops: Vec<Vec<usize>>,
}

impl FuncState {
    fn new(proto: usize) -> Self {
        Self {
            proto,
            code: Vec::new(),
            scopes: Vec::new(),
            next_slot: 0,
            upvalues: Vec::new(),
            loops: Vec::new(),
        }
    }

    fn find_local(&self, name: &str) -> Option<u32> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.locals.iter().rev())
            .find(|(local, _)| local == name)
            .map(|(_, slot)| *slot)
    }
}

pub struct Compiler<'s> {
    session: &'s mut Session,
    constants: ConstantPool,
    protos: Vec<Proto>,
    funcs: Vec<FuncState>,
    line: u32,
}

impl<'s> Compiler<'s> {
    pub fn new(session: &'s mut Session) -> Self {
        Self {
            session,
            constants: ConstantPool::new(),
            protos: Vec::new(),
            funcs: Vec::new(),
            line: 0,
        }
    }

    /// Lower the main chunk and every nested function
    pub fn compile(mut self, program: &Block) -> Bytecode {
        let main = FuncBody {
            params: Vec::new(),
            is_vararg: true,
            body: program.clone(),
        };
        self.function(&main, false);
        self.pad_constants();

        let magic = self.session.random.next_int(1, u32::MAX as i64) as u32;
        debug!(
            "compiled {} prototypes, {} constants",
            self.protos.len(),
            self.constants.len()
        );
        Bytecode {
            magic,
            version: super::bytecode::BYTECODE_VERSION,
            flags: 0,
            constants: self.constants,
            protos: self.protos,
        }
    }

    fn pad_constants(&mut self) {
        for _ in 0..self.session.tuning.vm_constant_padding {
            let constant = match self.session.random.index(3) {
                0 => Constant::Int(self.session.random.next_int(-(1 << 30), 1 << 30)),
                1 => Constant::Float(self.session.random.next_float() * 1000.0),
                _ => {
                    let len = self.session.random.next_int(4, 12) as usize;
                    let name = self.session.random.bytes(len);
                    Constant::Str(name)
                }
            };
            self.constants.add(&constant);
        }
    }

    fn func(&mut self) -> &mut FuncState {
        let last = self.funcs.len() - 1;
        &mut self.funcs[last]
    }

    fn here(&mut self) -> usize {
        self.func().code.len()
    }

    fn emit(&mut self, op: Op, a: i64, b: i64, c: i64) -> usize {
        let line = self.line;
        let range = i32::MIN as i64..=i32::MAX as i64;
        let instruction = match [a, b, c].into_iter().find(|v| !range.contains(v)) {
            Some(bad) => {
                self.degrade(VmCompileError::OperandOverflow(bad));
                Instruction::new(Op::Nop, 0, 0, 0, line)
            }
            None => Instruction::new(op, a, b, c, line),
        };
        let code = &mut self.func().code;
        code.push(instruction);
        code.len() - 1
    }

    fn emit_op(&mut self, op: Op) -> usize {
        self.emit(op, 0, 0, 0)
    }

    /// Point the jump at `at` to the current end of code
    fn patch_here(&mut self, at: usize) {
        let here = self.here() as i64;
        self.func().code[at].b = here;
    }

    fn degrade(&mut self, error: VmCompileError) {
        self.session.warn(format!("vm lowering: {}", error));
    }

    fn constant(&mut self, constant: Constant) -> u32 {
        self.constants.add(&constant)
    }

    fn string_constant(&mut self, value: &str) -> u32 {
        self.constant(Constant::Str(value.as_bytes().to_vec()))
    }

    fn alloc_slot(&mut self) -> u32 {
        let func = self.func();
        let slot = func.next_slot;
        func.next_slot += 1;
        slot
    }

    fn declare(&mut self, name: &str) -> u32 {
        let slot = self.alloc_slot();
        if let Some(scope) = self.func().scopes.last_mut() {
            scope.locals.push((name.to_string(), slot));
        }
        slot
    }

    fn open_scope(&mut self) {
        self.func().scopes.push(Scope::default());
    }

    /// Resolve the scope's gotos against its labels; the rest move outward
    fn close_scope(&mut self) {
        let Some(scope) = self.func().scopes.pop() else {
            return;
        };
        let mut unresolved = Vec::new();
        for goto in scope.gotos {
            match scope.labels.iter().rev().find(|(name, _)| *name == goto.label) {
                Some((_, target)) => self.func().code[goto.at].b = *target as i64,
                None => unresolved.push(goto),
            }
        }
        if unresolved.is_empty() {
            return;
        }
        if let Some(parent) = self.func().scopes.last_mut() {
            parent.gotos.extend(unresolved);
            return;
        }
        for goto in unresolved {
            self.degrade(VmCompileError::UnresolvedGoto(goto.label));
            let line = self.func().code[goto.at].line;
            self.func().code[goto.at] = Instruction::new(Op::Nop, 0, 0, 0, line);
        }
    }

    fn resolve(&mut self, name: &str) -> Var {
        let level = self.funcs.len() - 1;
        if let Some(slot) = self.funcs[level].find_local(name) {
            return Var::Local(slot);
        }
        match self.resolve_upvalue(level, name) {
            Some(index) => Var::Upvalue(index),
            None => Var::Global(self.string_constant(name)),
        }
    }

    fn resolve_upvalue(&mut self, level: usize, name: &str) -> Option<u32> {
        if level == 0 {
            return None;
        }
        if let Some(index) = self.funcs[level].upvalues.iter().position(|(n, _)| n == name) {
            return Some(index as u32);
        }
        let source = match self.funcs[level - 1].find_local(name) {
            Some(slot) => UpvalueSource::ParentLocal(slot),
            None => UpvalueSource::ParentUpvalue(self.resolve_upvalue(level - 1, name)?),
        };
        let upvalues = &mut self.funcs[level].upvalues;
        upvalues.push((name.to_string(), source));
        Some(upvalues.len() as u32 - 1)
    }

    /// Compile a function body into a new prototype; returns its index
    fn function(&mut self, func: &FuncBody, is_method: bool) -> u32 {
        let index = self.protos.len();
        self.protos.push(Proto::default());
        self.funcs.push(FuncState::new(index));

        self.open_scope();
        if is_method {
            self.declare("self");
        }
        for param in &func.params {
            self.declare(param);
        }
        let num_params = func.params.len() as u32 + is_method as u32;
        for stmt in &func.body {
            self.stmt(stmt);
        }
        self.emit_op(Op::Mark);
        self.emit_op(Op::Return);
        self.close_scope();

        let Some(state) = self.funcs.pop() else {
            return index as u32;
        };
        let code = self.finish_code(state.code);
        self.protos[state.proto] = Proto {
            num_params,
            is_vararg: func.is_vararg,
            upvalues: state.upvalues.into_iter().map(|(_, source)| source).collect(),
            code,
        };
        index as u32
    }

    /// Interleave decoys, then turn absolute jump targets into offsets
    fn finish_code(&mut self, code: Vec<Instruction>) -> Vec<Instruction> {
        let ratio = self.session.tuning.vm_decoy_ratio.max(0.0);
        let decoys = (code.len() as f64 * ratio).round() as usize;

        // decoys_before[i]: decoys placed ahead of original instruction i
        let mut decoys_before = vec![0usize; code.len() + 1];
        for _ in 0..decoys {
            let at = self.session.random.index(code.len() + 1);
            decoys_before[at] += 1;
        }

        let mut out = Vec::with_capacity(code.len() + decoys);
        let mut new_index = vec![0usize; code.len() + 1];
        let mut original = Vec::with_capacity(code.len());
        for (i, count) in decoys_before.iter().enumerate() {
            new_index[i] = out.len();
            for _ in 0..*count {
                let decoy = self.decoy(code.get(i).map_or(0, |ins| ins.line));
                out.push(decoy);
            }
            if let Some(instruction) = code.get(i) {
                original.push(out.len());
                out.push(instruction.clone());
            }
        }

        for at in original {
            let instruction = &mut out[at];
            if instruction.op.is_jump() {
                let target = (instruction.b.max(0) as usize).min(code.len());
                instruction.b = new_index[target] as i64 - (at as i64 + 1);
            }
        }
        out
    }

    fn decoy(&mut self, line: u32) -> Instruction {
        let random = &mut self.session.random;
        let op = *random.pick(&Op::DECOYS);
        let a = random.next_int(0, 255);
        let b = random.next_int(-64, 64);
        let c = random.next_int(0, 255);
        Instruction {
            op,
            a,
            b,
            c,
            decoy: true,
            line,
        }
    }

    fn block(&mut self, block: &Block) {
        self.open_scope();
        for stmt in block {
            self.stmt(stmt);
        }
        self.close_scope();
    }

    fn stmt(&mut self, stmt: &Stmt) {
        self.line += 1;
        match stmt {
            Stmt::Local { names, values } => {
                if names.iter().any(|n| n.attrib.as_deref() == Some("close")) {
                    self.session
                        .warn("vm lowering: to-be-closed variable compiled as a plain local");
                }
                let names: Vec<&str> = names.iter().map(|n| n.name.as_str()).collect();
                self.local(&names, values);
            }
            Stmt::LocalFunction { name, func } => {
                let slot = self.declare(name);
                self.emit(Op::LoadNil, 1, 0, 0);
                self.emit(Op::NewLocal, slot as i64, 0, 0);
                let proto = self.function(func, false);
                self.emit(Op::Closure, 0, proto as i64, 0);
                self.emit(Op::SetLocal, slot as i64, 0, 0);
            }
            Stmt::Function { name, func } => self.function_stmt(name, func),
            Stmt::Assign { targets, values } => self.assign(targets, values),
            Stmt::Call(call) => self.call(call, 1),
            Stmt::Do(body) => self.block(body),
            Stmt::While { cond, body } => {
                let start = self.here();
                self.expr(cond);
                let exit = self.emit_op(Op::JmpIfNot);
                self.func().loops.push(Vec::new());
                self.block(body);
                self.emit(Op::Jmp, 0, start as i64, 0);
                self.patch_here(exit);
                self.close_loop();
            }
            Stmt::Repeat { body, cond } => {
                let start = self.here();
                self.func().loops.push(Vec::new());
                // The condition sees the body's locals
                self.open_scope();
                for stmt in body {
                    self.stmt(stmt);
                }
                self.expr(cond);
                self.emit(Op::JmpIfNot, 0, start as i64, 0);
                self.close_scope();
                self.close_loop();
            }
            Stmt::If {
                clauses,
                else_block,
            } => {
                let mut exits = Vec::new();
                for (i, (cond, body)) in clauses.iter().enumerate() {
                    self.expr(cond);
                    let next = self.emit_op(Op::JmpIfNot);
                    self.block(body);
                    if i + 1 < clauses.len() || else_block.is_some() {
                        exits.push(self.emit_op(Op::Jmp));
                    }
                    self.patch_here(next);
                }
                if let Some(body) = else_block {
                    self.block(body);
                }
                for exit in exits {
                    self.patch_here(exit);
                }
            }
            Stmt::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => self.numeric_for(var, start, limit, step.as_ref(), body),
            Stmt::GenericFor { vars, exprs, body } => self.generic_for(vars, exprs, body),
            Stmt::Return(values) => {
                self.emit_op(Op::Mark);
                self.expr_list(values);
                self.emit_op(Op::Return);
            }
            Stmt::Break => {
                if self.func().loops.is_empty() {
                    self.degrade(VmCompileError::BreakOutsideLoop);
                    self.emit_op(Op::Nop);
                } else {
                    let jump = self.emit_op(Op::Jmp);
                    if let Some(breaks) = self.func().loops.last_mut() {
                        breaks.push(jump);
                    }
                }
            }
            Stmt::Goto(label) => {
                let at = self.emit_op(Op::Jmp);
                if let Some(scope) = self.func().scopes.last_mut() {
                    scope.gotos.push(PendingGoto {
                        label: label.clone(),
                        at,
                    });
                }
            }
            Stmt::Label(label) => {
                let here = self.here();
                if let Some(scope) = self.func().scopes.last_mut() {
                    scope.labels.push((label.clone(), here));
                }
            }
        }
    }

    fn close_loop(&mut self) {
        if let Some(breaks) = self.func().loops.pop() {
            for jump in breaks {
                self.patch_here(jump);
            }
        }
    }

    fn local(&mut self, names: &[&str], values: &[Expr]) {
        if values.is_empty() {
            self.emit(Op::LoadNil, names.len() as i64, 0, 0);
        } else if values.len() == names.len() {
            // one value per name, so a trailing call truncates to one
            for value in values {
                self.expr(value);
            }
        } else {
            self.emit_op(Op::Mark);
            self.expr_list(values);
            self.emit(Op::Adjust, names.len() as i64, 0, 0);
        }
        // Declared only now so the values see the outer bindings
        let slots: Vec<u32> = names.iter().map(|name| self.declare(name)).collect();
        for slot in slots.iter().rev() {
            self.emit(Op::NewLocal, *slot as i64, 0, 0);
        }
    }

    fn function_stmt(&mut self, name: &FuncName, func: &FuncBody) {
        let proto = self.function(func, name.method.is_some());
        let key = match (&name.method, name.path.last()) {
            (Some(method), _) => method.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => {
                self.emit(Op::Closure, 0, proto as i64, 0);
                let var = self.resolve(&name.base);
                self.store(var);
                return;
            }
        };
        let var = self.resolve(&name.base);
        self.load(var);
        let through = if name.method.is_some() {
            &name.path[..]
        } else {
            &name.path[..name.path.len() - 1]
        };
        for part in through {
            let k = self.string_constant(part);
            self.emit(Op::GetField, k as i64, 0, 0);
        }
        let k = self.string_constant(&key);
        self.emit(Op::LoadK, k as i64, 0, 0);
        self.emit(Op::Closure, 0, proto as i64, 0);
        self.emit_op(Op::SetTable);
    }

    fn assign(&mut self, targets: &[Expr], values: &[Expr]) {
        if let ([target], [value]) = (targets, values) {
            match target {
                Expr::Name(name) => {
                    self.expr(value);
                    let var = self.resolve(name);
                    self.store(var);
                }
                Expr::Member { object, name } => {
                    self.expr(object);
                    let k = self.string_constant(name);
                    self.emit(Op::LoadK, k as i64, 0, 0);
                    self.expr(value);
                    self.emit_op(Op::SetTable);
                }
                Expr::Index { object, key } => {
                    self.expr(object);
                    self.expr(key);
                    self.expr(value);
                    self.emit_op(Op::SetTable);
                }
                _ => self.session.warn("vm lowering: invalid assignment target"),
            }
            return;
        }

        // Table and key operands are evaluated before any value
        let mut places = Vec::with_capacity(targets.len());
        for target in targets {
            let place = match target {
                Expr::Name(name) => Place::Var(self.resolve(name)),
                Expr::Member { object, name } => {
                    let object = self.spill(object);
                    let k = self.string_constant(name);
                    Place::Field {
                        object,
                        key: Key::Constant(k),
                    }
                }
                Expr::Index { object, key } => {
                    let object = self.spill(object);
                    let key = self.spill(key);
                    Place::Field {
                        object,
                        key: Key::Slot(key),
                    }
                }
                _ => {
                    self.session.warn("vm lowering: invalid assignment target");
                    continue;
                }
            };
            places.push(place);
        }

        self.emit_op(Op::Mark);
        self.expr_list(values);
        self.emit(Op::Adjust, places.len() as i64, 0, 0);
        let temps: Vec<u32> = places.iter().map(|_| self.alloc_slot()).collect();
        for slot in temps.iter().rev() {
            self.emit(Op::NewLocal, *slot as i64, 0, 0);
        }

        for (place, temp) in places.into_iter().zip(temps) {
            match place {
                Place::Var(var) => {
                    self.emit(Op::GetLocal, temp as i64, 0, 0);
                    self.store(var);
                }
                Place::Field { object, key } => {
                    self.emit(Op::GetLocal, object as i64, 0, 0);
                    match key {
                        Key::Slot(slot) => self.emit(Op::GetLocal, slot as i64, 0, 0),
                        Key::Constant(k) => self.emit(Op::LoadK, k as i64, 0, 0),
                    };
                    self.emit(Op::GetLocal, temp as i64, 0, 0);
                    self.emit_op(Op::SetTable);
                }
            }
        }
    }

    /// Evaluate `expr` into a hidden local
    fn spill(&mut self, expr: &Expr) -> u32 {
        self.expr(expr);
        let slot = self.alloc_slot();
        self.emit(Op::NewLocal, slot as i64, 0, 0);
        slot
    }

    fn numeric_for(&mut self, var: &str, start: &Expr, limit: &Expr, step: Option<&Expr>, body: &Block) {
        self.open_scope();
        // index, limit, step in consecutive slots
        let base = self.alloc_slot();
        self.alloc_slot();
        self.alloc_slot();
        self.expr(start);
        self.emit(Op::NewLocal, base as i64, 0, 0);
        self.expr(limit);
        self.emit(Op::NewLocal, base as i64 + 1, 0, 0);
        match step {
            Some(step) => self.expr(step),
            None => {
                let one = self.constant(Constant::Int(1));
                self.emit(Op::LoadK, one as i64, 0, 0);
            }
        }
        self.emit(Op::NewLocal, base as i64 + 2, 0, 0);
        self.emit(Op::ForPrep, base as i64, 0, 0);

        let test = self.here();
        let exit = self.emit(Op::ForTest, base as i64, 0, 0);
        self.func().loops.push(Vec::new());
        self.open_scope();
        let slot = self.declare(var);
        self.emit(Op::GetLocal, base as i64, 0, 0);
        self.emit(Op::NewLocal, slot as i64, 0, 0);
        for stmt in body {
            self.stmt(stmt);
        }
        self.close_scope();
        self.emit(Op::ForStep, base as i64, 0, 0);
        self.emit(Op::Jmp, 0, test as i64, 0);
        self.patch_here(exit);
        self.close_loop();
        self.close_scope();
    }

    fn generic_for(&mut self, vars: &[String], exprs: &[Expr], body: &Block) {
        self.open_scope();
        // iterator, state, control in consecutive slots
        let base = self.alloc_slot();
        self.alloc_slot();
        self.alloc_slot();
        self.emit_op(Op::Mark);
        self.expr_list(exprs);
        self.emit(Op::Adjust, 3, 0, 0);
        for offset in (0..3).rev() {
            self.emit(Op::NewLocal, base as i64 + offset, 0, 0);
        }

        let top = self.here();
        self.emit_op(Op::Mark);
        for offset in 0..3 {
            self.emit(Op::GetLocal, base as i64 + offset, 0, 0);
        }
        let count = vars.len() as i64;
        self.emit(Op::Call, 0, 0, count + 1);
        let exit = self.emit(Op::TForTest, base as i64 + 2, 0, count);
        self.func().loops.push(Vec::new());
        self.open_scope();
        let slots: Vec<u32> = vars.iter().map(|v| self.declare(v)).collect();
        for slot in slots.iter().rev() {
            self.emit(Op::NewLocal, *slot as i64, 0, 0);
        }
        for stmt in body {
            self.stmt(stmt);
        }
        self.close_scope();
        self.emit(Op::Jmp, 0, top as i64, 0);
        self.patch_here(exit);
        self.close_loop();
        self.close_scope();
    }

    fn load(&mut self, var: Var) {
        match var {
            Var::Local(slot) => self.emit(Op::GetLocal, slot as i64, 0, 0),
            Var::Upvalue(index) => self.emit(Op::GetUpval, index as i64, 0, 0),
            Var::Global(k) => self.emit(Op::GetGlobal, k as i64, 0, 0),
        };
    }

    fn store(&mut self, var: Var) {
        match var {
            Var::Local(slot) => self.emit(Op::SetLocal, slot as i64, 0, 0),
            Var::Upvalue(index) => self.emit(Op::SetUpval, index as i64, 0, 0),
            Var::Global(k) => self.emit(Op::SetGlobal, k as i64, 0, 0),
        };
    }

    /// Push every value of a list; only the last entry may expand
    fn expr_list(&mut self, list: &[Expr]) {
        for (i, expr) in list.iter().enumerate() {
            if i + 1 == list.len() {
                self.expr_multi(expr);
            } else {
                self.expr(expr);
            }
        }
    }

    fn expr_multi(&mut self, expr: &Expr) {
        match expr {
            Expr::Call { .. } | Expr::MethodCall { .. } => self.call(expr, ALL_VALUES),
            Expr::Vararg => {
                self.emit(Op::Vararg, ALL_VALUES, 0, 0);
            }
            _ => self.expr(expr),
        }
    }

    /// `results` is the wanted count plus one, or [`ALL_VALUES`]
    fn call(&mut self, expr: &Expr, results: i64) {
        self.emit_op(Op::Mark);
        match expr {
            Expr::Call { callee, args } => {
                self.expr(callee);
                self.expr_list(args);
            }
            Expr::MethodCall {
                object,
                method,
                args,
            } => {
                self.expr(object);
                let k = self.string_constant(method);
                self.emit(Op::SelfOp, k as i64, 0, 0);
                self.expr_list(args);
            }
            other => {
                self.session.warn("vm lowering: call statement without a call");
                self.expr(other);
            }
        }
        self.emit(Op::Call, 0, 0, results);
    }

    /// Push exactly one value
    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Nil => {
                self.emit(Op::LoadNil, 1, 0, 0);
            }
            Expr::True => {
                self.emit_op(Op::LoadTrue);
            }
            Expr::False => {
                self.emit_op(Op::LoadFalse);
            }
            Expr::Vararg => {
                self.emit(Op::Vararg, 2, 0, 0);
            }
            Expr::Number(lit) => {
                let constant = match lit.value {
                    Number::Int(n) => Constant::Int(n),
                    Number::Float(f) => Constant::Float(f),
                };
                let k = self.constant(constant);
                self.emit(Op::LoadK, k as i64, 0, 0);
            }
            Expr::String(lit) => {
                let k = self.constant(Constant::Str(lit.value.clone()));
                self.emit(Op::LoadK, k as i64, 0, 0);
            }
            Expr::Name(name) => {
                let var = self.resolve(name);
                self.load(var);
            }
            Expr::Member { object, name } => {
                self.expr(object);
                let k = self.string_constant(name);
                self.emit(Op::GetField, k as i64, 0, 0);
            }
            Expr::Index { object, key } => {
                self.expr(object);
                self.expr(key);
                self.emit_op(Op::GetTable);
            }
            Expr::Call { .. } | Expr::MethodCall { .. } => self.call(expr, 2),
            Expr::Function(func) => {
                let proto = self.function(func, false);
                self.emit(Op::Closure, 0, proto as i64, 0);
            }
            Expr::Binary { op, left, right } => self.binary(*op, left, right),
            Expr::Unary { op, operand } => {
                self.expr(operand);
                self.emit_op(match op {
                    UnOp::Neg => Op::Unm,
                    UnOp::Not => Op::Not,
                    UnOp::Len => Op::Len,
                    UnOp::BNot => Op::BNot,
                });
            }
            Expr::Table(fields) => self.table(fields),
            Expr::Paren(inner) => self.expr(inner),
        }
    }

    fn binary(&mut self, op: BinOp, left: &Expr, right: &Expr) {
        let short_circuit = match op {
            BinOp::And => Some(Op::JmpIfNotKeep),
            BinOp::Or => Some(Op::JmpIfKeep),
            _ => None,
        };
        self.expr(left);
        if let Some(jump) = short_circuit {
            let skip = self.emit_op(jump);
            self.expr(right);
            self.patch_here(skip);
            return;
        }
        self.expr(right);
        self.emit_op(match op {
            BinOp::Add => Op::Add,
            BinOp::Sub => Op::Sub,
            BinOp::Mul => Op::Mul,
            BinOp::Div => Op::Div,
            BinOp::IDiv => Op::IDiv,
            BinOp::Mod => Op::Mod,
            BinOp::Pow => Op::Pow,
            BinOp::Concat => Op::Concat,
            BinOp::BAnd => Op::BAnd,
            BinOp::BOr => Op::BOr,
            BinOp::BXor => Op::BXor,
            BinOp::Shl => Op::Shl,
            BinOp::Shr => Op::Shr,
            BinOp::Eq => Op::Eq,
            BinOp::Ne => Op::Ne,
            BinOp::Lt => Op::Lt,
            BinOp::Le => Op::Le,
            BinOp::Gt => Op::Gt,
            BinOp::Ge => Op::Ge,
            BinOp::And | BinOp::Or => Op::Nop,
        });
    }

    fn table(&mut self, fields: &[Field]) {
        self.emit_op(Op::NewTable);
        self.emit_op(Op::Mark);
        for (i, field) in fields.iter().enumerate() {
            match field {
                Field::Positional(value) if i + 1 == fields.len() => self.expr_multi(value),
                Field::Positional(value) => self.expr(value),
                Field::Named(name, value) => {
                    let k = self.string_constant(name);
                    self.emit(Op::LoadK, k as i64, 0, 0);
                    self.expr(value);
                    self.emit_op(Op::TSetKV);
                }
                Field::Keyed(key, value) => {
                    self.expr(key);
                    self.expr(value);
                    self.emit_op(Op::TSetKV);
                }
            }
        }
        self.emit_op(Op::SetList);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Features, ObfuscateOptions};
    use crate::parser::parse;
    use std::collections::BTreeSet;

    fn compile(source: &str, decoy_ratio: f64) -> (Bytecode, Vec<String>) {
        let mut options = ObfuscateOptions::new(crate::target::Target::Standard, 5, Features::default());
        options.tuning.vm_decoy_ratio = decoy_ratio;
        let mut session = Session::new(&options, &BTreeSet::new());
        let block = parse(source).unwrap();
        let bytecode = Compiler::new(&mut session).compile(&block);
        (bytecode, session.stats.warnings)
    }

    fn ops(proto: &Proto) -> Vec<Op> {
        proto.code.iter().filter(|i| !i.decoy).map(|i| i.op).collect()
    }

    #[test]
    fn test_simple_return() {
        let (bytecode, warnings) = compile("return 1 + x", 0.0);
        assert!(warnings.is_empty());
        assert_eq!(bytecode.protos.len(), 1);
        assert_eq!(
            ops(&bytecode.protos[0]),
            [Op::Mark, Op::LoadK, Op::GetGlobal, Op::Add, Op::Return, Op::Mark, Op::Return]
        );
        assert!(bytecode.protos[0].is_vararg);
    }

    #[test]
    fn test_closure_captures_parent_local() {
        let (bytecode, _) = compile("local n = 0\nlocal function inc() n = n + 1 end", 0.0);
        assert_eq!(bytecode.protos.len(), 2);
        assert_eq!(bytecode.protos[1].upvalues, [UpvalueSource::ParentLocal(0)]);
    }

    #[test]
    fn test_nested_capture_goes_through_parent_upvalue() {
        let source = "local a = 1\nlocal function f() return function() return a end end";
        let (bytecode, _) = compile(source, 0.0);
        assert_eq!(bytecode.protos[1].upvalues, [UpvalueSource::ParentLocal(0)]);
        assert_eq!(bytecode.protos[2].upvalues, [UpvalueSource::ParentUpvalue(0)]);
    }

    #[test]
    fn test_method_function_gets_self_param() {
        let (bytecode, _) = compile("function obj.a:m(x) return self end", 0.0);
        assert_eq!(bytecode.protos[1].num_params, 2);
    }

    #[test]
    fn test_break_outside_loop_degrades() {
        let (bytecode, warnings) = compile("break\nreturn 1", 0.0);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("break outside a loop"));
        assert_eq!(bytecode.protos[0].code[0].op, Op::Nop);
    }

    #[test]
    fn test_unknown_goto_degrades() {
        let (bytecode, warnings) = compile("goto nowhere\nreturn 1", 0.0);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("nowhere"));
        assert_eq!(bytecode.protos[0].code[0].op, Op::Nop);
    }

    #[test]
    fn test_goto_resolves_to_enclosing_label() {
        let source = "for i = 1, 3 do\nif i == 2 then goto continue end\n::continue::\nend";
        let (_, warnings) = compile(source, 0.0);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_decoys_keep_real_order_and_jumps() {
        let source = "local s = 0\nfor i = 1, 10 do if i % 2 == 0 then s = s + i end end\nreturn s";
        let (plain, _) = compile(source, 0.0);
        let (decorated, _) = compile(source, 1.0);
        let main = &decorated.protos[0];
        assert!(main.code.iter().any(|i| i.decoy));
        assert_eq!(ops(main), ops(&plain.protos[0]));

        // every real jump lands on the same real instruction as before
        let real_positions: Vec<usize> = (0..main.code.len()).filter(|i| !main.code[*i].decoy).collect();
        for (n, at) in real_positions.iter().enumerate() {
            let instruction = &main.code[*at];
            if !instruction.op.is_jump() {
                continue;
            }
            let mut target = (*at as i64 + 1 + instruction.sbx()) as usize;
            while target < main.code.len() && main.code[target].decoy {
                target += 1;
            }
            let plain_ins = &plain.protos[0].code[n];
            let plain_target = (n as i64 + 1 + plain_ins.sbx()) as usize;
            let landed = real_positions.iter().position(|p| *p == target).unwrap_or(plain.protos[0].code.len());
            assert_eq!(landed, plain_target);
        }
    }

    #[test]
    fn test_constants_are_pooled_and_padded() {
        let (bytecode, _) = compile("print('a', 'a', 1, 1)", 0.0);
        let strings = bytecode
            .constants
            .iter()
            .filter(|c| *c == Constant::Str(b"a".to_vec()))
            .count();
        assert_eq!(strings, 1);
        // print, "a", 1 and four padding entries
        assert!(bytecode.constants.len() >= 3 + 3);
    }
}

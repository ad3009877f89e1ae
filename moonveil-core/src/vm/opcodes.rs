//! Logical VM operations and their numeric encoding
//!
//! The set of operations is fixed; only the numbers assigned to them change
//! from session to session.

use std::collections::BTreeMap;
use std::fmt;

use crate::random::Random;

/// Every operation the interpreter knows, real ones first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Op {
    LoadK,
    LoadNil,
    LoadTrue,
    LoadFalse,
    NewLocal,
    GetLocal,
    SetLocal,
    GetUpval,
    SetUpval,
    GetGlobal,
    SetGlobal,
    GetTable,
    GetField,
    SetTable,
    NewTable,
    TSetKV,
    SetList,
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    Concat,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Unm,
    Not,
    Len,
    BNot,
    Jmp,
    JmpIf,
    JmpIfNot,
    JmpIfKeep,
    JmpIfNotKeep,
    Mark,
    Call,
    SelfOp,
    Return,
    Vararg,
    Adjust,
    Pop,
    Closure,
    ForPrep,
    ForTest,
    ForStep,
    TForTest,
    Nop,
    // Never executed; only there to be skipped
    DecoyMove,
    DecoySwap,
    DecoyCheck,
    DecoyMix,
    DecoyFold,
    DecoyProbe,
}

impl Op {
    pub const ALL: [Op; 64] = [
        Op::LoadK,
        Op::LoadNil,
        Op::LoadTrue,
        Op::LoadFalse,
        Op::NewLocal,
        Op::GetLocal,
        Op::SetLocal,
        Op::GetUpval,
        Op::SetUpval,
        Op::GetGlobal,
        Op::SetGlobal,
        Op::GetTable,
        Op::GetField,
        Op::SetTable,
        Op::NewTable,
        Op::TSetKV,
        Op::SetList,
        Op::Add,
        Op::Sub,
        Op::Mul,
        Op::Div,
        Op::IDiv,
        Op::Mod,
        Op::Pow,
        Op::Concat,
        Op::BAnd,
        Op::BOr,
        Op::BXor,
        Op::Shl,
        Op::Shr,
        Op::Eq,
        Op::Ne,
        Op::Lt,
        Op::Le,
        Op::Gt,
        Op::Ge,
        Op::Unm,
        Op::Not,
        Op::Len,
        Op::BNot,
        Op::Jmp,
        Op::JmpIf,
        Op::JmpIfNot,
        Op::JmpIfKeep,
        Op::JmpIfNotKeep,
        Op::Mark,
        Op::Call,
        Op::SelfOp,
        Op::Return,
        Op::Vararg,
        Op::Adjust,
        Op::Pop,
        Op::Closure,
        Op::ForPrep,
        Op::ForTest,
        Op::ForStep,
        Op::TForTest,
        Op::Nop,
        Op::DecoyMove,
        Op::DecoySwap,
        Op::DecoyCheck,
        Op::DecoyMix,
        Op::DecoyFold,
        Op::DecoyProbe,
    ];

    pub const DECOYS: [Op; 6] = [
        Op::DecoyMove,
        Op::DecoySwap,
        Op::DecoyCheck,
        Op::DecoyMix,
        Op::DecoyFold,
        Op::DecoyProbe,
    ];

    pub fn is_decoy(self) -> bool {
        Op::DECOYS.contains(&self)
    }

    /// Jumps carry a relative target in `B`
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Op::Jmp | Op::JmpIf | Op::JmpIfNot | Op::JmpIfKeep | Op::JmpIfNotKeep | Op::ForTest | Op::TForTest
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Op::LoadK => "LOADK",
            Op::LoadNil => "LOADNIL",
            Op::LoadTrue => "LOADTRUE",
            Op::LoadFalse => "LOADFALSE",
            Op::NewLocal => "NEWLOCAL",
            Op::GetLocal => "GETLOCAL",
            Op::SetLocal => "SETLOCAL",
            Op::GetUpval => "GETUPVAL",
            Op::SetUpval => "SETUPVAL",
            Op::GetGlobal => "GETGLOBAL",
            Op::SetGlobal => "SETGLOBAL",
            Op::GetTable => "GETTABLE",
            Op::GetField => "GETFIELD",
            Op::SetTable => "SETTABLE",
            Op::NewTable => "NEWTABLE",
            Op::TSetKV => "TSETKV",
            Op::SetList => "SETLIST",
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::Div => "DIV",
            Op::IDiv => "IDIV",
            Op::Mod => "MOD",
            Op::Pow => "POW",
            Op::Concat => "CONCAT",
            Op::BAnd => "BAND",
            Op::BOr => "BOR",
            Op::BXor => "BXOR",
            Op::Shl => "SHL",
            Op::Shr => "SHR",
            Op::Eq => "EQ",
            Op::Ne => "NE",
            Op::Lt => "LT",
            Op::Le => "LE",
            Op::Gt => "GT",
            Op::Ge => "GE",
            Op::Unm => "UNM",
            Op::Not => "NOT",
            Op::Len => "LEN",
            Op::BNot => "BNOT",
            Op::Jmp => "JMP",
            Op::JmpIf => "JMPIF",
            Op::JmpIfNot => "JMPIFNOT",
            Op::JmpIfKeep => "JMPIFKEEP",
            Op::JmpIfNotKeep => "JMPIFNOTKEEP",
            Op::Mark => "MARK",
            Op::Call => "CALL",
            Op::SelfOp => "SELF",
            Op::Return => "RETURN",
            Op::Vararg => "VARARG",
            Op::Adjust => "ADJUST",
            Op::Pop => "POP",
            Op::Closure => "CLOSURE",
            Op::ForPrep => "FORPREP",
            Op::ForTest => "FORTEST",
            Op::ForStep => "FORSTEP",
            Op::TForTest => "TFORTEST",
            Op::Nop => "NOP",
            Op::DecoyMove => "DMOVE",
            Op::DecoySwap => "DSWAP",
            Op::DecoyCheck => "DCHECK",
            Op::DecoyMix => "DMIX",
            Op::DecoyFold => "DFOLD",
            Op::DecoyProbe => "DPROBE",
        }
    }

    fn position(self) -> usize {
        Op::ALL.iter().position(|op| *op == self).unwrap_or(0)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bijection between operations and numeric codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcodeMap {
    /// Code of `Op::ALL[i]`
    codes: Vec<u32>,
    by_code: BTreeMap<u32, Op>,
}

impl OpcodeMap {
    /// Codes `1..=64` in declaration order
    pub fn canonical() -> Self {
        let codes: Vec<u32> = (1..=Op::ALL.len() as u32).collect();
        Self::from_codes(codes)
    }

    fn from_codes(codes: Vec<u32>) -> Self {
        let by_code = codes
            .iter()
            .zip(Op::ALL.iter())
            .map(|(code, op)| (*code, *op))
            .collect();
        Self { codes, by_code }
    }

    /// Permute the codes with the session stream
    pub fn shuffle(&mut self, random: &mut Random) {
        let mut codes = std::mem::take(&mut self.codes);
        random.shuffle(&mut codes);
        *self = Self::from_codes(codes);
    }

    pub fn get(&self, op: Op) -> u32 {
        self.codes[op.position()]
    }

    pub fn get_name(&self, code: u32) -> Option<Op> {
        self.by_code.get(&code).copied()
    }

    /// `(op, code)` pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (Op, u32)> + '_ {
        Op::ALL.iter().copied().zip(self.codes.iter().copied())
    }
}

impl Default for OpcodeMap {
    fn default() -> Self {
        Self::canonical()
    }
}

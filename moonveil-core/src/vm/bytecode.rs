//! In-memory bytecode: constants, instructions and prototypes

use indexmap::IndexSet;

use super::opcodes::Op;

/// Format version written into every header
pub const BYTECODE_VERSION: u32 = 1;

/// Header flag: decoy instructions are present
pub const FLAG_DECOYS: u32 = 1;
/// Header flag: bitwise operations go through `bit32`
pub const FLAG_BIT32: u32 = 1 << 1;

/// Pooled literal value
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Str(Vec<u8>),
}

/// Hashable identity of a constant; floats compare by bit pattern so `0.0`
/// and `-0.0` stay distinct
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstantKey {
    Int(i64),
    Float(u64),
    Str(Vec<u8>),
}

impl From<&Constant> for ConstantKey {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::Int(n) => ConstantKey::Int(*n),
            Constant::Float(f) => ConstantKey::Float(f.to_bits()),
            Constant::Str(s) => ConstantKey::Str(s.clone()),
        }
    }
}

impl From<ConstantKey> for Constant {
    fn from(key: ConstantKey) -> Self {
        match key {
            ConstantKey::Int(n) => Constant::Int(n),
            ConstantKey::Float(bits) => Constant::Float(f64::from_bits(bits)),
            ConstantKey::Str(s) => Constant::Str(s),
        }
    }
}

/// Deduplicated constants in insertion order
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: IndexSet<ConstantKey>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `constant`, adding it on first sight
    pub fn add(&mut self, constant: &Constant) -> u32 {
        let (index, _) = self.entries.insert_full(ConstantKey::from(constant));
        index as u32
    }

    pub fn get(&self, index: u32) -> Option<Constant> {
        self.entries.get_index(index as usize).cloned().map(Constant::from)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Constant> + '_ {
        self.entries.iter().cloned().map(Constant::from)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub op: Op,
    pub a: i64,
    pub b: i64,
    pub c: i64,
    /// Skipped by the interpreter
    pub decoy: bool,
    /// Ordinal of the statement this was lowered from
    pub line: u32,
}

impl Instruction {
    pub fn new(op: Op, a: i64, b: i64, c: i64, line: u32) -> Self {
        Self {
            op,
            a,
            b,
            c,
            decoy: false,
            line,
        }
    }

    /// `B` read as an unsigned index
    pub fn bx(&self) -> u32 {
        self.b as u32
    }

    /// `B` read as a signed jump offset
    pub fn sbx(&self) -> i64 {
        self.b
    }
}

/// Where a closure finds one of its captured cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalueSource {
    /// Local slot of the enclosing function
    ParentLocal(u32),
    /// Upvalue of the enclosing function
    ParentUpvalue(u32),
}

/// One compiled function
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Proto {
    pub num_params: u32,
    pub is_vararg: bool,
    pub upvalues: Vec<UpvalueSource>,
    pub code: Vec<Instruction>,
}

impl Proto {
    pub fn real_len(&self) -> usize {
        self.code.iter().filter(|i| !i.decoy).count()
    }
}

/// Compiled program: prototype 0 is the main chunk
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub magic: u32,
    pub version: u32,
    pub flags: u32,
    pub constants: ConstantPool,
    pub protos: Vec<Proto>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_deduplicates_by_type_and_value() {
        let mut pool = ConstantPool::new();
        let a = pool.add(&Constant::Int(1));
        let b = pool.add(&Constant::Float(1.0));
        let c = pool.add(&Constant::Str(b"1".to_vec()));
        assert_eq!((a, b, c), (0, 1, 2));
        assert_eq!(pool.add(&Constant::Int(1)), 0);
        assert_eq!(pool.add(&Constant::Float(1.0)), 1);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.get(2), Some(Constant::Str(b"1".to_vec())));
        assert_eq!(pool.get(3), None);
    }

    #[test]
    fn test_signed_zero_kept_apart() {
        let mut pool = ConstantPool::new();
        assert_ne!(pool.add(&Constant::Float(0.0)), pool.add(&Constant::Float(-0.0)));
    }

    #[test]
    fn test_operand_accessors() {
        let jump = Instruction::new(Op::Jmp, 0, -3, 0, 1);
        assert_eq!(jump.sbx(), -3);
        let load = Instruction::new(Op::Closure, 0, 7, 0, 1);
        assert_eq!(load.bx(), 7);
    }
}

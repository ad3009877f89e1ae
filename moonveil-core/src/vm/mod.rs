//! Bytecode virtual machine backend
//!
//! The program is compiled to a private instruction set, serialized, and
//! replaced by an interpreter that carries the encoded bytecode. Each stage
//! consumes the previous one:
//!
//! ```text
//! Unbuilt --compile--> Compiled --serialize--> Serialized --embed--> Embedded
//! ```

pub mod bytecode;
pub mod compiler;
pub mod opcodes;
pub mod serialize;
pub mod template;

use tracing::debug;

use crate::ast::Block;
use crate::error::ObfuscateError;
use crate::session::Session;
use crate::target::BitwiseStyle;
use crate::transform::Pass;

pub use bytecode::{Bytecode, Constant, ConstantPool, Instruction, Proto, UpvalueSource};
pub use compiler::Compiler;
pub use opcodes::{Op, OpcodeMap};

/// Program not yet lowered
pub struct Unbuilt<'a> {
    program: &'a Block,
}

/// Bytecode plus the opcode numbering it will be written with
pub struct Compiled {
    pub bytecode: Bytecode,
    pub opcodes: OpcodeMap,
}

/// Encoded payload and what is needed to decode it
pub struct Serialized {
    pub hex: String,
    pub key: Vec<u8>,
    pub magic: u32,
    pub opcodes: OpcodeMap,
}

/// Interpreter with the payload inlined, ready to print
pub struct Embedded {
    pub program: Block,
}

impl<'a> Unbuilt<'a> {
    pub fn new(program: &'a Block) -> Self {
        Self { program }
    }

    pub fn compile(self, session: &mut Session) -> Compiled {
        let mut bytecode = Compiler::new(session).compile(self.program);
        if session.tuning.vm_decoy_ratio > 0.0 {
            bytecode.flags |= bytecode::FLAG_DECOYS;
        }
        if session.profile.bitwise == BitwiseStyle::Bit32 {
            bytecode.flags |= bytecode::FLAG_BIT32;
        }
        let mut opcodes = OpcodeMap::canonical();
        if session.tuning.vm_shuffle_opcodes {
            opcodes.shuffle(&mut session.random);
        }
        Compiled { bytecode, opcodes }
    }
}

impl Compiled {
    pub fn serialize(self, session: &mut Session) -> Serialized {
        let image = serialize::encode(&self.bytecode, &self.opcodes);
        let key_len = session.random.next_int(8, 16) as usize;
        let key = session.random.random_key(key_len);
        let hex = serialize::to_hex(&serialize::xor(&image, &key));
        debug!("bytecode image is {} bytes", image.len());
        Serialized {
            hex,
            key,
            magic: self.bytecode.magic,
            opcodes: self.opcodes,
        }
    }
}

impl Serialized {
    pub fn embed(self, session: &mut Session) -> Result<Embedded, ObfuscateError> {
        let input = template::TemplateInput {
            hex: &self.hex,
            key: &self.key,
            magic: self.magic,
            opcodes: &self.opcodes,
            iteration_cap: session.tuning.vm_iteration_cap,
            bitwise: session.profile.bitwise,
        };
        let source = template::render(&input, &mut session.random);
        let program = template::embed(&source, session)?;
        Ok(Embedded { program })
    }
}

/// Replaces the program with an interpreter running its bytecode
pub struct VmWrapper;

impl Pass for VmWrapper {
    fn name(&self) -> &'static str {
        "vm"
    }

    fn run(&self, program: &mut Block, session: &mut Session) -> Result<(), ObfuscateError> {
        let embedded = Unbuilt::new(program)
            .compile(session)
            .serialize(session)
            .embed(session)?;
        *program = embedded.program;
        Ok(())
    }
}

//! Binary bytecode layout
//!
//! All integers are little-endian `u32`; tags and booleans are single bytes.
//! Instruction operands are stored with [`OPERAND_BIAS`] added so negative
//! jump offsets fit. The framed image is XORed with the session key and hex
//! encoded.
//!
//! ```text
//! frame    := len:u32 payload
//! payload  := magic:u32 version:u32 flags:u32
//!             nconst:u32 constant*  nproto:u32 proto*
//! constant := tag:u8 len:u32 bytes
//! proto    := nparams:u32 vararg:u8 nup:u32 (kind:u8 index:u32)*
//!             ncode:u32 (op:u32 a:u32 b:u32 c:u32 decoy:u8 line:u32)*
//! ```

use super::bytecode::{Bytecode, Constant, UpvalueSource};
use super::opcodes::OpcodeMap;

pub const OPERAND_BIAS: i64 = 1 << 31;

pub const TAG_INT: u8 = 1;
pub const TAG_FLOAT: u8 = 2;
pub const TAG_STRING: u8 = 3;

/// Float constants as text the Lua `tonumber` accepts
fn float_text(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "1e999" } else { "-1e999" }.to_string()
    } else {
        format!("{:?}", value)
    }
}

struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    fn u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn operand(&mut self, value: i64) {
        self.u32((value + OPERAND_BIAS) as u32);
    }

    fn blob(&mut self, data: &[u8]) {
        self.u32(data.len() as u32);
        self.bytes.extend_from_slice(data);
    }
}

/// Length-framed binary image of `bytecode`
pub fn encode(bytecode: &Bytecode, opcodes: &OpcodeMap) -> Vec<u8> {
    let mut w = Writer { bytes: Vec::new() };
    w.u32(bytecode.magic);
    w.u32(bytecode.version);
    w.u32(bytecode.flags);

    w.u32(bytecode.constants.len() as u32);
    for constant in bytecode.constants.iter() {
        match constant {
            Constant::Int(n) => {
                w.u8(TAG_INT);
                w.blob(n.to_string().as_bytes());
            }
            Constant::Float(f) => {
                w.u8(TAG_FLOAT);
                w.blob(float_text(f).as_bytes());
            }
            Constant::Str(s) => {
                w.u8(TAG_STRING);
                w.blob(&s);
            }
        }
    }

    w.u32(bytecode.protos.len() as u32);
    for proto in &bytecode.protos {
        w.u32(proto.num_params);
        w.u8(proto.is_vararg as u8);
        w.u32(proto.upvalues.len() as u32);
        for upvalue in &proto.upvalues {
            match upvalue {
                UpvalueSource::ParentLocal(slot) => {
                    w.u8(0);
                    w.u32(*slot);
                }
                UpvalueSource::ParentUpvalue(index) => {
                    w.u8(1);
                    w.u32(*index);
                }
            }
        }
        w.u32(proto.code.len() as u32);
        for instruction in &proto.code {
            w.u32(opcodes.get(instruction.op));
            w.operand(instruction.a);
            w.operand(instruction.b);
            w.operand(instruction.c);
            w.u8(instruction.decoy as u8);
            w.u32(instruction.line);
        }
    }

    let payload = w.bytes;
    let mut framed = Vec::with_capacity(payload.len() + 4);
    framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    framed.extend_from_slice(&payload);
    framed
}

/// XOR with a repeating key
pub fn xor(data: &[u8], key: &[u8]) -> Vec<u8> {
    if key.is_empty() {
        return data.to_vec();
    }
    data.iter()
        .zip(key.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect()
}

pub fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::bytecode::{Instruction, Proto, BYTECODE_VERSION};
    use crate::vm::opcodes::Op;

    fn from_hex(text: &str) -> Vec<u8> {
        (0..text.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&text[i..i + 2], 16).unwrap())
            .collect()
    }

    fn read_u32(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    fn sample() -> Bytecode {
        let mut bytecode = Bytecode {
            magic: 0xdead_beef,
            version: BYTECODE_VERSION,
            flags: 0,
            ..Default::default()
        };
        bytecode.constants.add(&Constant::Int(-7));
        bytecode.constants.add(&Constant::Float(f64::INFINITY));
        bytecode.constants.add(&Constant::Str(b"hi".to_vec()));
        bytecode.protos.push(Proto {
            num_params: 0,
            is_vararg: true,
            upvalues: vec![],
            code: vec![Instruction::new(Op::Jmp, 0, -2, 0, 1)],
        });
        bytecode
    }

    #[test]
    fn test_frame_and_header() {
        let map = OpcodeMap::canonical();
        let image = encode(&sample(), &map);
        assert_eq!(read_u32(&image, 0) as usize, image.len() - 4);
        assert_eq!(read_u32(&image, 4), 0xdead_beef);
        assert_eq!(read_u32(&image, 8), BYTECODE_VERSION);
        assert_eq!(read_u32(&image, 16), 3);
        // int constant as decimal text
        assert_eq!(image[20], TAG_INT);
        assert_eq!(read_u32(&image, 21), 2);
        assert_eq!(&image[25..27], b"-7");
        assert_eq!(image[27], TAG_FLOAT);
        assert_eq!(&image[32..37], b"1e999");
    }

    #[test]
    fn test_negative_operand_is_biased() {
        let map = OpcodeMap::canonical();
        let image = encode(&sample(), &map);
        let tail = &image[image.len() - 21..];
        assert_eq!(read_u32(tail, 0), map.get(Op::Jmp));
        assert_eq!(read_u32(tail, 8) as i64 - OPERAND_BIAS, -2);
    }

    #[test]
    fn test_xor_hex_reverses() {
        let data = b"moonveil bytecode".to_vec();
        let key = [3u8, 200, 17];
        let hex = to_hex(&xor(&data, &key));
        assert_eq!(hex.len(), data.len() * 2);
        assert_ne!(from_hex(&hex), data);
        assert_eq!(xor(&from_hex(&hex), &key), data);
    }

    #[test]
    fn test_float_text_parses_back() {
        for value in [0.5, 1e300, -2.25, 1e-7, 3.0] {
            assert_eq!(float_text(value).parse::<f64>().unwrap(), value);
        }
        assert_eq!(float_text(f64::NEG_INFINITY), "-1e999");
    }
}

use crate::opcodes::{get_opcode, Opcode};

#[derive(Debug)]
pub struct Instruction {
    pub opcode: Opcode,
    pub offset: usize,
    pub argument: Option<Vec<u8>>,
}

/// Decoded bytecode: the instruction stream, the raw bytes (CODECOPY reads
/// them directly) and a jumptable from byte offset to instruction index.
#[derive(Debug, Default)]
pub struct Bytecode {
    pub instructions: Vec<Instruction>,
    pub bytecode: Vec<u8>,
    pub jumptable: Vec<(usize, usize)>,
}

impl Bytecode {
    /// Maps a JUMP target (byte offset) to an instruction index; `None`
    /// for offsets that are not a JUMPDEST.
    pub fn resolve_jump(&self, offset: usize) -> Option<usize> {
        let index = self
            .jumptable
            .binary_search_by_key(&offset, |(key, _)| *key)
            .ok()?;
        Some(self.jumptable[index].1)
    }
}

pub struct Decoder;

impl Decoder {
    pub fn decode(code: &[u8]) -> Bytecode {
        let mut instructions = Vec::new();
        let mut jumptable = Vec::new();

        let mut pos = 0;
        while pos < code.len() {
            let opcode = get_opcode(code[pos]);
            let mut instruction = Instruction {
                // undefined bytes keep their original value for the trace
                opcode: Opcode { code: code[pos], ..opcode },
                offset: pos,
                argument: None,
            };

            if opcode.code == 0x5b {
                jumptable.push((pos, instructions.len()));
            }

            pos += 1;

            let push_bytes = opcode.push_width();
            if push_bytes > 0 {
                // data running off the end of the code reads as zeros
                let mut argument = vec![0u8; push_bytes];
                let available = push_bytes.min(code.len() - pos);
                argument[..available].copy_from_slice(&code[pos..pos + available]);
                instruction.argument = Some(argument);
                pos += push_bytes;
            }

            instructions.push(instruction);
        }

        Bytecode {
            instructions,
            bytecode: code.to_vec(),
            jumptable,
        }
    }
}

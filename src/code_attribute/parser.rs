use std::io::Cursor;

use binrw::{BinRead, BinWrite};

use super::types::Instruction;

/// Failure to decode a method body at a given byte offset.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unsupported opcode {opcode} at IL_{offset:04x}")]
pub struct DecodeError {
    pub offset: u32,
    /// Hex spelling of the opcode byte(s) found at `offset`.
    pub opcode: String,
}

/// Decode a single instruction starting at the beginning of `input`.
/// Returns the instruction and the number of bytes it occupies.
pub fn instruction_parser(input: &[u8], address: u32) -> Result<(Instruction, usize), DecodeError> {
    let mut cursor = Cursor::new(input);
    match Instruction::read(&mut cursor) {
        Ok(instruction) => Ok((instruction, cursor.position() as usize)),
        Err(_) => Err(DecodeError {
            offset: address,
            opcode: opcode_spelling(input),
        }),
    }
}

fn opcode_spelling(input: &[u8]) -> String {
    match input {
        [0xfe, second, ..] => format!("0xfe{:02x}", second),
        [first, ..] => format!("0x{:02x}", first),
        [] => "<end of body>".into(),
    }
}

/// Decode a whole method body into `(offset, instruction)` pairs in stream order.
pub fn code_parser(code: &[u8]) -> Result<Vec<(u32, Instruction)>, DecodeError> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let (instruction, size) = instruction_parser(&code[offset..], offset as u32)?;
        instructions.push((offset as u32, instruction));
        offset += size;
    }
    Ok(instructions)
}

/// Encode instructions back into a method body.
pub fn assemble(instructions: &[Instruction]) -> binrw::BinResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    for instruction in instructions {
        instruction.write(&mut cursor)?;
    }
    Ok(cursor.into_inner())
}

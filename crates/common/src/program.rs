//! Bytecode file loading.
//!
//! File layout (little-endian, packed):
//!
//! ```text
//! offset 0        i32 string_table_length
//! offset 4        i32 globals_length
//! offset 8        i32 publics_length
//! offset 12       publics_length × { i32 name_offset, i32 code_offset }
//! then            string_table_length bytes (NUL-separated C strings)
//! remainder       code section (must be non-empty)
//! ```
//!
//! The loader validates the structure above and nothing else: it never
//! walks the code section. Content validation is the verifier's job.

use log::debug;

use crate::error::LoadError;

/// The fixed header: three `i32` length fields.
pub const HEADER_SIZE: usize = 12;

/// One record of the publics table: a named entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Public {
    /// Offset of the NUL-terminated name in the string table.
    pub name_offset: i32,
    /// Offset of the entry instruction in the code section.
    pub code_offset: i32,
}

/// A loaded bytecode image. All offsets inside `publics`, `strings` and
/// `code` stay valid for the program's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// Number of global slots reserved at the bottom of the operand stack.
    pub globals: usize,
    pub publics: Vec<Public>,
    /// Raw string table bytes.
    pub strings: Vec<u8>,
    /// Raw code section bytes. The verifier may patch function headers
    /// in place (max-depth annotation).
    pub code: Vec<u8>,
}

fn read_i32(bytes: &[u8], pos: usize) -> i32 {
    let mut quad = [0u8; 4];
    quad.copy_from_slice(&bytes[pos..pos + 4]);
    i32::from_le_bytes(quad)
}

impl Program {
    /// Parse and validate a bytecode file.
    pub fn load(bytes: &[u8]) -> Result<Program, LoadError> {
        if bytes.len() < HEADER_SIZE {
            return Err(LoadError::TooSmall);
        }

        let st_length = read_i32(bytes, 0);
        let globals_length = read_i32(bytes, 4);
        let pubs_length = read_i32(bytes, 8);

        if st_length < 0 || globals_length < 0 || pubs_length < 0 {
            return Err(LoadError::InvalidHeader);
        }

        let st_length = st_length as usize;
        let pubs_length = pubs_length as usize;

        let expected = HEADER_SIZE
            .checked_add(pubs_length.checked_mul(8).ok_or(LoadError::SectionsOverflow)?)
            .and_then(|n| n.checked_add(st_length))
            .ok_or(LoadError::SectionsOverflow)?;
        if bytes.len() < expected {
            return Err(LoadError::SectionsOverflow);
        }

        let mut publics = Vec::with_capacity(pubs_length);
        for i in 0..pubs_length {
            let pos = HEADER_SIZE + i * 8;
            let public = Public {
                name_offset: read_i32(bytes, pos),
                code_offset: read_i32(bytes, pos + 4),
            };
            if public.name_offset < 0 || public.code_offset < 0 {
                return Err(LoadError::NegativePublic);
            }
            publics.push(public);
        }

        let st_offset = HEADER_SIZE + pubs_length * 8;
        let code_offset = st_offset + st_length;
        if code_offset == bytes.len() {
            return Err(LoadError::EmptyCode);
        }

        let program = Program {
            globals: globals_length as usize,
            publics,
            strings: bytes[st_offset..code_offset].to_vec(),
            code: bytes[code_offset..].to_vec(),
        };

        debug!(
            "loaded program: {} globals, {} publics, {} string bytes, {} code bytes",
            program.globals,
            program.publics.len(),
            program.strings.len(),
            program.code.len()
        );

        Ok(program)
    }

    /// The NUL-terminated string starting at `offset` in the string
    /// table, without its terminator. `None` when the offset is outside
    /// the table.
    pub fn string_at(&self, offset: usize) -> Option<&[u8]> {
        let tail = self.strings.get(offset..)?;
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        Some(&tail[..end])
    }
}

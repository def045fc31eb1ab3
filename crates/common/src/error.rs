//! Load and decode errors shared across the toolchain.

use thiserror::Error;

/// Errors raised while parsing a bytecode file's header and sections.
///
/// The loader validates structure only; everything inside the code
/// section is the verifier's business.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The file cannot hold the fixed 12-byte header.
    #[error("File is too small")]
    TooSmall,

    /// A header length field is negative.
    #[error("Invalid header")]
    InvalidHeader,

    /// The declared publics table and string table overrun the file.
    #[error("File is too small or header is invalid")]
    SectionsOverflow,

    /// A publics-table record contains a negative offset.
    #[error("Unexpected negative value in pubs table")]
    NegativePublic,

    /// No bytes remain for the code section.
    #[error("Empty code section")]
    EmptyCode,
}

/// Errors raised while decoding a single instruction out of the code
/// section.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The opcode byte is not part of the instruction set.
    #[error("[ip={offset:#x}] Unknown instruction {byte}")]
    UnknownOpcode { offset: usize, byte: u8 },

    /// The instruction's arguments extend past the end of the code section.
    #[error("[ip={offset:#x}] Unexpected file end")]
    Truncated { offset: usize },

    /// A closure capture descriptor carries an undefined kind byte.
    #[error("[ip={offset:#x}] Unknown capture kind {kind}")]
    UnknownCaptureKind { offset: usize, kind: u8 },
}

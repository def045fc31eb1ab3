//! Verification errors.
//!
//! Every offset-bearing variant renders with the `[ip=0xHEX]` prefix so
//! the CLI can report it as a single line. Verification failures are
//! fatal: the program is never executed after one.

use lama_common::DecodeError;
use thiserror::Error;

/// Errors found by the static verifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// An instruction is decodable along one path but malformed.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Two control-flow paths reach the same instruction with different
    /// operand-stack depths.
    #[error("[ip={ip:#x}] Stack size mismatch on converging paths ({recorded} vs {incoming})")]
    DepthMismatch { ip: usize, recorded: i32, incoming: i32 },

    /// The operand stack is shallower than the instruction consumes.
    #[error("[ip={ip:#x}] Insufficient stack size for operation")]
    StackUnderflow { ip: usize },

    /// A non-`CONST` instruction carries a negative argument.
    #[error("[ip={ip:#x}] Unexpected negative argument")]
    NegativeArgument { ip: usize },

    /// A global index is outside the globals area.
    #[error("[ip={ip:#x}] Global index outside of range")]
    GlobalOutOfRange { ip: usize },

    /// A local index is outside the function's locals area.
    #[error("[ip={ip:#x}] Local index outside of range")]
    LocalOutOfRange { ip: usize },

    /// An argument index is outside the function's arguments area.
    #[error("[ip={ip:#x}] Argument index outside of range")]
    ArgOutOfRange { ip: usize },

    /// A string-table offset points past the table.
    #[error("[ip={ip:#x}] String offset outside of range")]
    StringOutOfRange { ip: usize },

    /// A jump or call target points outside the code section.
    #[error("[ip={ip:#x}] Code offset outside of range")]
    CodeOutOfRange { ip: usize },

    /// A `CALL`, `CLOSURE`, or public target is not a `BEGIN`/`CBEGIN`.
    #[error("[ip={ip:#x}] Call target is not a function")]
    NotAFunction { ip: usize },

    /// The publics table exports no entry point to verify.
    #[error("Entry point not found")]
    NoEntryPoint,
}

//! Runtime errors.
//!
//! Every failure that happens at an instruction site carries the byte
//! offset of that instruction and renders with the `[ip=0xHEX]` prefix.
//! The interpreter never recovers: each of these is fatal.

use thiserror::Error;

/// Errors raised during bytecode execution.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// An arithmetic operand is a pointer where an int was expected.
    #[error("[ip={ip:#x}] Arguments not integers")]
    NotIntegers { ip: usize },

    /// A single operand is a pointer where an int was expected.
    #[error("[ip={ip:#x}] Value is not int")]
    NotInt { ip: usize },

    #[error("[ip={ip:#x}] Division by zero")]
    DivisionByZero { ip: usize },

    #[error("[ip={ip:#x}] Remainder from zero")]
    RemainderByZero { ip: usize },

    /// A scalar where a string, array, or S-exp was expected.
    #[error("[ip={ip:#x}] Not aggregate")]
    NotAggregate { ip: usize },

    /// An aggregate index outside `0..length`.
    #[error("[ip={ip:#x}] Index outside of range")]
    IndexOutOfRange { ip: usize },

    /// Storing a non-byte value into a string element.
    #[error("[ip={ip:#x}] Can't assign value to string")]
    BadStringByte { ip: usize },

    /// `CALLC` on something that is not a closure.
    #[error("[ip={ip:#x}] Call not closure")]
    NotAClosure { ip: usize },

    /// A capture index outside the closure's environment.
    #[error("[ip={ip:#x}] Capture index outside of range")]
    CaptureOutOfRange { ip: usize },

    /// A global/local/argument slot outside the live stack.
    #[error("[ip={ip:#x}] Stack slot outside of range")]
    SlotOutOfRange { ip: usize },

    /// Pop on an empty operand stack.
    #[error("[ip={ip:#x}] Stack empty")]
    StackEmpty { ip: usize },

    /// The operand stack exceeded its fixed capacity.
    #[error("[ip={ip:#x}] Stack overflow")]
    StackOverflow { ip: usize },

    /// The frame stack exceeded its fixed capacity.
    #[error("[ip={ip:#x}] Call stack overflow")]
    FrameOverflow { ip: usize },

    /// The `FAIL` opcode: no pattern matched at the source position.
    #[error("[ip={ip:#x}] Match failure at {line}:{col}")]
    MatchFailure { ip: usize, line: i32, col: i32 },

    /// `ip` ran past the code section, or an argument read would.
    #[error("[ip={ip:#x}] Unexpected file end")]
    UnexpectedEnd { ip: usize },

    /// The opcode byte is not part of the instruction set.
    #[error("[ip={ip:#x}] Unknown instruction {byte}")]
    UnknownInstruction { ip: usize, byte: u8 },

    /// A decodable opcode with no runtime semantics (`STI`, the
    /// reference-load family).
    #[error("[ip={ip:#x}] Not implemented")]
    NotImplemented { ip: usize },

    /// Standard input did not yield an integer for `CALL_Lread`.
    #[error("[ip={ip:#x}] Invalid integer input")]
    InvalidInput { ip: usize },

    /// Writing to standard output failed.
    #[error("[ip={ip:#x}] {source}")]
    Io {
        ip: usize,
        #[source]
        source: std::io::Error,
    },
}

impl RuntimeError {
    /// The instruction offset this error is attributed to.
    pub fn ip(&self) -> usize {
        match self {
            RuntimeError::NotIntegers { ip }
            | RuntimeError::NotInt { ip }
            | RuntimeError::DivisionByZero { ip }
            | RuntimeError::RemainderByZero { ip }
            | RuntimeError::NotAggregate { ip }
            | RuntimeError::IndexOutOfRange { ip }
            | RuntimeError::BadStringByte { ip }
            | RuntimeError::NotAClosure { ip }
            | RuntimeError::CaptureOutOfRange { ip }
            | RuntimeError::SlotOutOfRange { ip }
            | RuntimeError::StackEmpty { ip }
            | RuntimeError::StackOverflow { ip }
            | RuntimeError::FrameOverflow { ip }
            | RuntimeError::MatchFailure { ip, .. }
            | RuntimeError::UnexpectedEnd { ip }
            | RuntimeError::UnknownInstruction { ip, .. }
            | RuntimeError::NotImplemented { ip }
            | RuntimeError::InvalidInput { ip }
            | RuntimeError::Io { ip, .. } => *ip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn division_by_zero_display() {
        assert_eq!(
            RuntimeError::DivisionByZero { ip: 0x13 }.to_string(),
            "[ip=0x13] Division by zero"
        );
    }

    #[test]
    fn match_failure_display() {
        assert_eq!(
            RuntimeError::MatchFailure { ip: 4, line: 12, col: 3 }.to_string(),
            "[ip=0x4] Match failure at 12:3"
        );
    }

    #[test]
    fn ip_accessor_matches_variant() {
        assert_eq!(RuntimeError::StackEmpty { ip: 77 }.ip(), 77);
    }
}

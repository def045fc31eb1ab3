//! Analysis errors.

use lama_common::DecodeError;
use thiserror::Error;

/// Errors raised by the reachability and idiom scanner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalyzeError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A publics-table entry points past the code section.
    #[error("Public symbol points outside of code")]
    PublicOutOfCode,

    /// A jump, call, or closure target points past the code section.
    #[error("[ip={ip:#x}] Branch target outside of code")]
    TargetOutOfRange { ip: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            AnalyzeError::PublicOutOfCode.to_string(),
            "Public symbol points outside of code"
        );
        assert_eq!(
            AnalyzeError::TargetOutOfRange { ip: 0x1f }.to_string(),
            "[ip=0x1f] Branch target outside of code"
        );
    }
}

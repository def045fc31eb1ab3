//! Static verifier for Lama bytecode.
//!
//! Proves, before execution, that for every reachable instruction the
//! operand-stack depth is uniquely determined, that index arguments
//! point into their tables (globals, locals, arguments, string table,
//! code), and computes the maximum operand depth per function so the
//! interpreter can pre-reserve stack space.
//!
//! Verification is fatal-on-first-error: a depth inconsistency leaves
//! nothing meaningful to check downstream of it.
//!
//! # Usage
//!
//! ```
//! use lama_common::{Opcode, Program, ProgramBuilder};
//! use lama_verifier::verify;
//!
//! let mut b = ProgramBuilder::new();
//! let entry = b.here();
//! b.public("main", entry);
//! b.begin(2, 0);
//! b.op1(Opcode::Const, 42);
//! b.op(Opcode::End);
//!
//! let mut program = Program::load(&b.finish()).unwrap();
//! assert!(verify(&mut program).is_ok());
//! ```

pub mod depth;
pub mod error;

pub use error::VerifyError;

use lama_common::Program;

/// Verify a loaded program.
///
/// On success every function header reached from the publics table has
/// its maximum operand-stack depth packed into the high 16 bits of the
/// header's second argument word (the low 16 bits keep the locals
/// count). On failure the program must not be executed.
pub fn verify(program: &mut Program) -> Result<(), VerifyError> {
    depth::check(program)
}

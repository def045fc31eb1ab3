//! Shared types for the Lama bytecode toolchain.
//!
//! This crate provides the foundational data structures used by the
//! verifier, the interpreter, and the analysis tools:
//!
//! - [`Value`] — the tagged machine word (unboxed int / heap handle)
//! - [`Opcode`] — the instruction set, with wire bytes and arg tables
//! - [`Instr`] — a decoded instruction view (size, stack effect, display)
//! - [`Program`] — the validated bytecode image (loader)
//! - [`ProgramBuilder`] — binary fixture builder for tests and tools
//! - [`LoadError`] / [`DecodeError`] — structural failure taxonomy
//!
//! # Dependencies
//!
//! `thiserror` for the error enums and `log` for one loader debug line;
//! nothing else.

pub mod build;
pub mod error;
pub mod instruction;
pub mod opcode;
pub mod program;
pub mod value;

pub use build::{Label, ProgramBuilder};
pub use error::{DecodeError, LoadError};
pub use instruction::{Capture, CaptureKind, Instr};
pub use opcode::{Opcode, ALL_OPCODES};
pub use program::{Program, Public, HEADER_SIZE};
pub use value::{ObjHandle, Value};

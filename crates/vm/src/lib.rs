//! The Lama bytecode interpreter.
//!
//! A stack machine over tagged words: call frames, closures,
//! pattern-matching opcodes, and unboxed integers sharing storage with
//! heap handles. The heap is an arena with a mark/sweep collector; the
//! operand stack is the root window and is handed to every allocation.
//!
//! # Usage
//!
//! ```
//! use std::io::Cursor;
//! use lama_common::{Opcode, Program, ProgramBuilder};
//! use lama_vm::Vm;
//!
//! let mut b = ProgramBuilder::new();
//! let entry = b.here();
//! b.public("main", entry);
//! b.begin(2, 0);
//! b.op1(Opcode::Const, 7);
//! b.op1(Opcode::Const, 5);
//! b.op(Opcode::Add);
//! b.op(Opcode::Lwrite);
//! b.op(Opcode::End);
//!
//! let program = Program::load(&b.finish()).unwrap();
//! let mut out = Vec::new();
//! Vm::new(&program, Cursor::new(Vec::new()), &mut out).run().unwrap();
//! assert_eq!(out, b"12\n");
//! ```

pub mod error;
pub mod execute;
pub mod heap;
pub mod machine;

pub use error::RuntimeError;
pub use heap::{Heap, ObjKind, TagId};
pub use machine::{Frame, Vm, FRAME_CAPACITY, STACK_CAPACITY};

use std::io;

use lama_common::Program;

/// Interpret a program against standard input and output, returning
/// its exit code.
pub fn interpret(program: &Program) -> Result<i32, RuntimeError> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut vm = Vm::new(program, stdin.lock(), stdout.lock());
    vm.run()
}

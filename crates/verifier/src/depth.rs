//! Operand-stack depth dataflow.
//!
//! Walks the control-flow graph of every function reachable from the
//! publics table with a worklist of `(offset, incoming depth, function)`
//! items. At each instruction the incoming depth must agree with any
//! previously recorded depth (`END`/`RET` excepted), must cover the
//! instruction's pops, and the running maximum per function is kept so
//! the interpreter can pre-reserve operand stack.
//!
//! Each offset is revisited only while its depth is unrecorded, so the
//! total work is linear in the code size.

use std::collections::HashMap;

use lama_common::{CaptureKind, Instr, Opcode, Program};
use log::debug;

use crate::error::VerifyError;

/// Per-function facts gathered from its `BEGIN`/`CBEGIN` header.
#[derive(Debug, Clone, Copy)]
struct FuncInfo {
    /// Offset of the header instruction.
    offset: usize,
    /// Declared argument count (`args[0]`).
    args: i32,
    /// Locals count: low 16 bits of the packed second argument.
    locals: i32,
    /// Supremum of operand depths seen on any verified path.
    max_depth: i32,
}

struct Item {
    offset: usize,
    depth: i32,
    func: usize,
}

struct Pass<'a> {
    program: &'a Program,
    depth_at: Vec<Option<i32>>,
    functions: Vec<FuncInfo>,
    func_at: HashMap<usize, usize>,
    worklist: Vec<Item>,
}

/// Verify `program` and annotate every reached function header with its
/// maximum operand-stack depth (packed into the high 16 bits of the
/// header's second argument word).
pub fn check(program: &mut Program) -> Result<(), VerifyError> {
    if program.publics.is_empty() {
        return Err(VerifyError::NoEntryPoint);
    }
    let entries: Vec<usize> = program.publics.iter().map(|p| p.code_offset as usize).collect();
    let code_len = program.code.len();

    let mut pass = Pass {
        program,
        depth_at: vec![None; code_len],
        functions: Vec::new(),
        func_at: HashMap::new(),
        worklist: Vec::new(),
    };

    for offset in entries {
        let func = pass.enter_function(offset, offset)?;
        pass.worklist.push(Item { offset, depth: 0, func });
    }

    while let Some(item) = pass.worklist.pop() {
        pass.step(item)?;
    }

    let functions = pass.functions;
    debug!("verified {} functions", functions.len());

    for func in functions {
        let max = func.max_depth.min(0xffff);
        let packed = (max << 16) | (func.locals & 0xffff);
        let pos = func.offset + 5;
        program.code[pos..pos + 4].copy_from_slice(&packed.to_le_bytes());
    }

    Ok(())
}

impl Pass<'_> {
    /// Register the function headed at `target`, validating that the
    /// target lies in code and starts with `BEGIN`/`CBEGIN`. `site` is
    /// the instruction blamed in diagnostics.
    fn enter_function(&mut self, target: usize, site: usize) -> Result<usize, VerifyError> {
        if target >= self.program.code.len() {
            return Err(VerifyError::CodeOutOfRange { ip: site });
        }
        if let Some(&idx) = self.func_at.get(&target) {
            return Ok(idx);
        }

        let header = Instr::decode(&self.program.code, target)?;
        if header.opcode != Opcode::Begin && header.opcode != Opcode::Cbegin {
            return Err(VerifyError::NotAFunction { ip: site });
        }

        let idx = self.functions.len();
        self.functions.push(FuncInfo {
            offset: target,
            args: header.args[0],
            locals: header.args[1] & 0xffff,
            max_depth: 0,
        });
        self.func_at.insert(target, idx);
        Ok(idx)
    }

    fn step(&mut self, item: Item) -> Result<(), VerifyError> {
        let Item { offset, depth, func } = item;
        let ins = Instr::decode(&self.program.code, offset)?;

        match self.depth_at[offset] {
            Some(recorded) if recorded == depth => return Ok(()),
            Some(recorded) => {
                // Returns merge paths of any depth: the frame reset
                // makes the residual depth irrelevant.
                if ins.opcode == Opcode::End || ins.opcode == Opcode::Ret {
                    return Ok(());
                }
                return Err(VerifyError::DepthMismatch {
                    ip: offset,
                    recorded,
                    incoming: depth,
                });
            }
            None => self.depth_at[offset] = Some(depth),
        }

        if ins.opcode != Opcode::Const {
            for &arg in ins.args.iter().take(ins.opcode.args_length()) {
                if arg < 0 {
                    return Err(VerifyError::NegativeArgument { ip: offset });
                }
            }
            for capture in &ins.captures {
                if capture.index < 0 {
                    return Err(VerifyError::NegativeArgument { ip: offset });
                }
            }
        }

        let popped = ins.popped();
        if depth < popped {
            return Err(VerifyError::StackUnderflow { ip: offset });
        }
        let depth = depth - popped + ins.pushed();

        if depth > self.functions[func].max_depth {
            self.functions[func].max_depth = depth;
        }

        self.check_access(&ins, func)?;

        match ins.opcode {
            Opcode::Jmp => {
                self.worklist.push(Item { offset: ins.args[0] as usize, depth, func });
            }
            Opcode::Cjmpz | Opcode::Cjmpnz => {
                self.worklist.push(Item { offset: ins.args[0] as usize, depth, func });
                self.push_fallthrough(&ins, depth, func);
            }
            Opcode::Call | Opcode::Closure => {
                let target = ins.args[0] as usize;
                let callee = self.enter_function(target, offset)?;
                self.worklist.push(Item { offset: target, depth: 0, func: callee });
                self.push_fallthrough(&ins, depth, func);
            }
            Opcode::End | Opcode::Ret | Opcode::Fail => {}
            _ => self.push_fallthrough(&ins, depth, func),
        }

        Ok(())
    }

    fn push_fallthrough(&mut self, ins: &Instr, depth: i32, func: usize) {
        if let Some(next) = ins.next_offset(self.program.code.len()) {
            self.worklist.push(Item { offset: next, depth, func });
        }
    }

    /// Bounds-check every index argument against its table. Capture
    /// indices of kind `C` are not checkable statically.
    fn check_access(&self, ins: &Instr, func: usize) -> Result<(), VerifyError> {
        let ip = ins.offset;
        let info = &self.functions[func];
        match ins.opcode {
            Opcode::Ldg | Opcode::Stg => {
                if ins.args[0] as usize >= self.program.globals {
                    return Err(VerifyError::GlobalOutOfRange { ip });
                }
            }
            Opcode::Ldl | Opcode::Stl => {
                if ins.args[0] >= info.locals {
                    return Err(VerifyError::LocalOutOfRange { ip });
                }
            }
            Opcode::Lda | Opcode::StArg => {
                if ins.args[0] >= info.args {
                    return Err(VerifyError::ArgOutOfRange { ip });
                }
            }
            Opcode::String | Opcode::Sexp | Opcode::Tag => {
                if ins.args[0] as usize >= self.program.strings.len() {
                    return Err(VerifyError::StringOutOfRange { ip });
                }
            }
            Opcode::Jmp | Opcode::Cjmpz | Opcode::Cjmpnz => {
                if ins.args[0] as usize >= self.program.code.len() {
                    return Err(VerifyError::CodeOutOfRange { ip });
                }
            }
            Opcode::Closure => {
                for capture in &ins.captures {
                    match capture.kind {
                        CaptureKind::Global => {
                            if capture.index as usize >= self.program.globals {
                                return Err(VerifyError::GlobalOutOfRange { ip });
                            }
                        }
                        CaptureKind::Local => {
                            if capture.index >= info.locals {
                                return Err(VerifyError::LocalOutOfRange { ip });
                            }
                        }
                        CaptureKind::Arg => {
                            if capture.index >= info.args {
                                return Err(VerifyError::ArgOutOfRange { ip });
                            }
                        }
                        CaptureKind::Captured => {}
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

//! Fetch-decode-execute loop and opcode implementations.

use std::io::{BufRead, Write};

use lama_common::{ObjHandle, Opcode, Value};

use crate::error::RuntimeError;
use crate::heap::ObjKind;
use crate::machine::{Frame, Vm, FRAME_CAPACITY};

impl<'a, R: BufRead, W: Write> Vm<'a, R, W> {
    /// Execute from the current `ip` until the sentinel frame is popped.
    pub fn run(&mut self) -> Result<i32, RuntimeError> {
        loop {
            self.op_ip = self.ip;
            let byte = *self
                .program
                .code
                .get(self.ip)
                .ok_or(RuntimeError::UnexpectedEnd { ip: self.ip })?;
            self.ip += 1;
            let opcode = Opcode::decode(byte, self.op_ip).map_err(|_| {
                RuntimeError::UnknownInstruction { ip: self.op_ip, byte }
            })?;

            match opcode {
                // ---- Arithmetic, comparison, logic ----
                Opcode::Add => self.exec_binary(|l, r| l.wrapping_add(r))?,
                Opcode::Sub => self.exec_binary(|l, r| l.wrapping_sub(r))?,
                Opcode::Mul => self.exec_binary(|l, r| l.wrapping_mul(r))?,
                Opcode::Div => self.exec_div()?,
                Opcode::Rem => self.exec_rem()?,
                Opcode::Lss => self.exec_binary(|l, r| (l < r) as i32)?,
                Opcode::Leq => self.exec_binary(|l, r| (l <= r) as i32)?,
                Opcode::Gre => self.exec_binary(|l, r| (l > r) as i32)?,
                Opcode::Geq => self.exec_binary(|l, r| (l >= r) as i32)?,
                Opcode::Equ => self.exec_equ()?,
                Opcode::Neq => self.exec_binary(|l, r| (l != r) as i32)?,
                Opcode::And => self.exec_binary(|l, r| (l != 0 && r != 0) as i32)?,
                Opcode::Or => self.exec_binary(|l, r| (l != 0 || r != 0) as i32)?,

                // ---- Constants and aggregates ----
                Opcode::Const => {
                    let literal = self.read_i32()?;
                    self.push(Value::int(literal))?;
                }
                Opcode::String => self.exec_string()?,
                Opcode::Sexp => self.exec_sexp()?,
                Opcode::Sta => self.exec_sta()?,
                Opcode::Elem => self.exec_elem()?,

                // ---- Control ----
                Opcode::Jmp => {
                    let target = self.read_i32()?;
                    self.ip = target as usize;
                }
                Opcode::Cjmpz => self.exec_cjmp(false)?,
                Opcode::Cjmpnz => self.exec_cjmp(true)?,
                Opcode::End | Opcode::Ret => {
                    if let Some(result) = self.exec_return()? {
                        return Ok(result);
                    }
                }

                // ---- Stack shuffling ----
                Opcode::Drop => {
                    self.pop()?;
                }
                Opcode::Dup => {
                    let top = self.pop()?;
                    self.push(top)?;
                    self.push(top)?;
                }
                Opcode::Swap => {
                    let top = self.pop()?;
                    let second = self.pop()?;
                    self.push(top)?;
                    self.push(second)?;
                }

                // ---- Loads and stores ----
                Opcode::Ldg => {
                    let index = self.read_i32()?;
                    let value = self.slot(self.global_slot(index)?)?;
                    self.push(value)?;
                }
                Opcode::Ldl => {
                    let index = self.read_i32()?;
                    let value = self.slot(self.local_slot(index)?)?;
                    self.push(value)?;
                }
                Opcode::Lda => {
                    let index = self.read_i32()?;
                    let value = self.slot(self.arg_slot(index)?)?;
                    self.push(value)?;
                }
                Opcode::Ldc => {
                    let index = self.read_i32()?;
                    let value = self.capture_value(index)?;
                    self.push(value)?;
                }
                Opcode::Stg => {
                    let index = self.read_i32()?;
                    let value = self.pop()?;
                    let slot = self.global_slot(index)?;
                    self.set_slot(slot, value)?;
                    self.push(value)?;
                }
                Opcode::Stl => {
                    let index = self.read_i32()?;
                    let value = self.pop()?;
                    let slot = self.local_slot(index)?;
                    self.set_slot(slot, value)?;
                    self.push(value)?;
                }
                Opcode::StArg => {
                    let index = self.read_i32()?;
                    let value = self.pop()?;
                    let slot = self.arg_slot(index)?;
                    self.set_slot(slot, value)?;
                    self.push(value)?;
                }
                Opcode::Stc => {
                    let index = self.read_i32()?;
                    let value = self.pop()?;
                    let closure = self.current_closure()?;
                    let index = usize::try_from(index)
                        .map_err(|_| RuntimeError::CaptureOutOfRange { ip: self.op_ip })?;
                    if !self.heap.set_capture(closure, index, value) {
                        return Err(RuntimeError::CaptureOutOfRange { ip: self.op_ip });
                    }
                    self.push(value)?;
                }

                // ---- Functions ----
                Opcode::Begin | Opcode::Cbegin => self.exec_begin()?,
                Opcode::Closure => self.exec_closure()?,
                Opcode::Call => self.exec_call()?,
                Opcode::Callc => self.exec_callc()?,

                // ---- Pattern matching ----
                Opcode::Tag => self.exec_tag()?,
                Opcode::Array => self.exec_array_test()?,
                Opcode::Fail => {
                    let line = self.read_i32()?;
                    let col = self.read_i32()?;
                    self.pop()?;
                    return Err(RuntimeError::MatchFailure { ip: self.op_ip, line, col });
                }
                Opcode::Line => {
                    self.read_i32()?;
                }
                Opcode::PattEq => self.exec_patt_eq()?,
                Opcode::PattIsString => self.exec_patt_kind(ObjKind::String)?,
                Opcode::PattIsArray => self.exec_patt_kind(ObjKind::Array)?,
                Opcode::PattIsSexp => self.exec_patt_kind(ObjKind::Sexp)?,
                Opcode::PattIsFun => self.exec_patt_kind(ObjKind::Closure)?,
                Opcode::PattIsRef => {
                    let value = self.pop()?;
                    self.push(Value::bool(value.is_obj()))?;
                }
                Opcode::PattIsVal => {
                    let value = self.pop()?;
                    self.push(Value::bool(value.is_int()))?;
                }

                // ---- Builtins ----
                Opcode::Lread => self.exec_lread()?,
                Opcode::Lwrite => self.exec_lwrite()?,
                Opcode::Llength => self.exec_llength()?,
                Opcode::Lstring => self.exec_lstring()?,
                Opcode::Barray => self.exec_barray()?,

                // ---- Decodable but without runtime semantics ----
                Opcode::Sti
                | Opcode::Ldgr
                | Opcode::Ldlr
                | Opcode::Ldar
                | Opcode::Ldcr => {
                    return Err(RuntimeError::NotImplemented { ip: self.op_ip });
                }
            }
        }
    }

    // ---- Operand helpers ----

    /// Pop RHS then LHS, both unboxed.
    fn pop_int_pair(&mut self) -> Result<(i32, i32), RuntimeError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        match (lhs.as_int(), rhs.as_int()) {
            (Some(l), Some(r)) => Ok((l, r)),
            _ => Err(RuntimeError::NotIntegers { ip: self.op_ip }),
        }
    }

    fn exec_binary(&mut self, op: fn(i32, i32) -> i32) -> Result<(), RuntimeError> {
        let (l, r) = self.pop_int_pair()?;
        self.push(Value::int(op(l, r)))
    }

    fn exec_div(&mut self) -> Result<(), RuntimeError> {
        let (l, r) = self.pop_int_pair()?;
        if r == 0 {
            return Err(RuntimeError::DivisionByZero { ip: self.op_ip });
        }
        self.push(Value::int(l.wrapping_div(r)))
    }

    fn exec_rem(&mut self) -> Result<(), RuntimeError> {
        let (l, r) = self.pop_int_pair()?;
        if r == 0 {
            return Err(RuntimeError::RemainderByZero { ip: self.op_ip });
        }
        self.push(Value::int(l.wrapping_rem(r)))
    }

    /// Raw-word equality works for boxed and unboxed operands alike.
    fn exec_equ(&mut self) -> Result<(), RuntimeError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        self.push(Value::bool(lhs.raw() == rhs.raw()))
    }

    // ---- Slot addressing ----

    fn global_slot(&self, index: i32) -> Result<usize, RuntimeError> {
        usize::try_from(index).map_err(|_| RuntimeError::SlotOutOfRange { ip: self.op_ip })
    }

    fn local_slot(&self, index: i32) -> Result<usize, RuntimeError> {
        let index = usize::try_from(index)
            .map_err(|_| RuntimeError::SlotOutOfRange { ip: self.op_ip })?;
        Ok(self.base + index)
    }

    fn arg_slot(&self, index: i32) -> Result<usize, RuntimeError> {
        let index = usize::try_from(index)
            .map_err(|_| RuntimeError::SlotOutOfRange { ip: self.op_ip })?;
        let args_start = self
            .base
            .checked_sub(self.args)
            .ok_or(RuntimeError::SlotOutOfRange { ip: self.op_ip })?;
        Ok(args_start + index)
    }

    fn capture_value(&self, index: i32) -> Result<Value, RuntimeError> {
        let closure = self.current_closure()?;
        let index = usize::try_from(index)
            .map_err(|_| RuntimeError::CaptureOutOfRange { ip: self.op_ip })?;
        self.heap
            .capture(closure, index)
            .ok_or(RuntimeError::CaptureOutOfRange { ip: self.op_ip })
    }

    // ---- Aggregates ----

    fn pop_aggregate(&mut self) -> Result<(ObjHandle, ObjKind), RuntimeError> {
        let value = self.pop()?;
        let handle = value
            .as_obj()
            .ok_or(RuntimeError::NotAggregate { ip: self.op_ip })?;
        match self.heap.kind(handle) {
            kind @ (ObjKind::String | ObjKind::Array | ObjKind::Sexp) => Ok((handle, kind)),
            ObjKind::Closure => Err(RuntimeError::NotAggregate { ip: self.op_ip }),
        }
    }

    fn check_index(&self, index: Value, length: usize) -> Result<usize, RuntimeError> {
        let index = index
            .as_int()
            .ok_or(RuntimeError::NotInt { ip: self.op_ip })?;
        match usize::try_from(index) {
            Ok(index) if index < length => Ok(index),
            _ => Err(RuntimeError::IndexOutOfRange { ip: self.op_ip }),
        }
    }

    /// Read a string-table offset argument and resolve it. The bytes
    /// borrow from the program, not from the machine, so the caller may
    /// keep them across further state changes.
    fn string_arg(&mut self) -> Result<&'a [u8], RuntimeError> {
        let offset = self.read_i32()?;
        let offset = usize::try_from(offset)
            .map_err(|_| RuntimeError::IndexOutOfRange { ip: self.op_ip })?;
        let program: &'a lama_common::Program = self.program;
        program
            .string_at(offset)
            .ok_or(RuntimeError::IndexOutOfRange { ip: self.op_ip })
    }

    fn exec_string(&mut self) -> Result<(), RuntimeError> {
        let bytes = self.string_arg()?;
        let handle = self.heap.alloc_string(bytes, &self.stack);
        self.push(Value::obj(handle))
    }

    fn exec_sexp(&mut self) -> Result<(), RuntimeError> {
        let name = self.string_arg()?;
        let arity = self.read_i32()?;
        let arity = usize::try_from(arity)
            .map_err(|_| RuntimeError::IndexOutOfRange { ip: self.op_ip })?;
        let tag = self.heap.intern_tag(name);
        let handle = self.heap.alloc_sexp(tag, arity, &self.stack);
        for field in (0..arity).rev() {
            let value = self.pop()?;
            self.heap.set_field(handle, field, value);
        }
        self.push(Value::obj(handle))
    }

    fn exec_sta(&mut self) -> Result<(), RuntimeError> {
        let value = self.pop()?;
        let index = self.pop()?;
        let (handle, kind) = self.pop_aggregate()?;
        let index = self.check_index(index, self.heap.length(handle))?;
        match kind {
            ObjKind::Array | ObjKind::Sexp => {
                self.heap.set_field(handle, index, value);
            }
            ObjKind::String => {
                let byte = value.as_int().filter(|b| (0..=0xff).contains(b));
                let byte = byte.ok_or(RuntimeError::BadStringByte { ip: self.op_ip })? as u8;
                match self.heap.string_byte_mut(handle, index) {
                    Some(slot) => *slot = byte,
                    None => return Err(RuntimeError::IndexOutOfRange { ip: self.op_ip }),
                }
            }
            ObjKind::Closure => return Err(RuntimeError::NotAggregate { ip: self.op_ip }),
        }
        self.push(value)
    }

    fn exec_elem(&mut self) -> Result<(), RuntimeError> {
        let index = self.pop()?;
        let (handle, kind) = self.pop_aggregate()?;
        let index = self.check_index(index, self.heap.length(handle))?;
        let element = match kind {
            ObjKind::Array | ObjKind::Sexp => self
                .heap
                .field(handle, index)
                .ok_or(RuntimeError::IndexOutOfRange { ip: self.op_ip })?,
            ObjKind::String => {
                let bytes = self
                    .heap
                    .string_bytes(handle)
                    .ok_or(RuntimeError::NotAggregate { ip: self.op_ip })?;
                Value::int(bytes[index] as i32)
            }
            ObjKind::Closure => return Err(RuntimeError::NotAggregate { ip: self.op_ip }),
        };
        self.push(element)
    }

    // ---- Control ----

    fn exec_cjmp(&mut self, jump_if_nonzero: bool) -> Result<(), RuntimeError> {
        let target = self.read_i32()?;
        let value = self.pop()?;
        let n = value.as_int().ok_or(RuntimeError::NotInt { ip: self.op_ip })?;
        if (n != 0) == jump_if_nonzero {
            self.ip = target as usize;
        }
        Ok(())
    }

    /// Shared by `END` and `RET`: reset the stack to the caller's
    /// window, re-push the return value, restore the caller's
    /// registers. `Some(code)` means the sentinel frame was reached.
    fn exec_return(&mut self) -> Result<Option<i32>, RuntimeError> {
        let value = self.pop()?;
        let keep = self
            .base
            .checked_sub(self.args + usize::from(self.is_closure))
            .ok_or(RuntimeError::StackEmpty { ip: self.op_ip })?;
        self.stack.truncate(keep);
        self.push(value)?;

        let frame = *self
            .frames
            .last()
            .ok_or(RuntimeError::StackEmpty { ip: self.op_ip })?;
        if frame.return_ip == 0 {
            return Ok(Some(0));
        }
        self.frames.pop();
        self.ip = frame.return_ip;
        self.base = frame.prev_base;
        self.args = frame.prev_args;
        self.locals = frame.prev_locals;
        self.captured = frame.prev_captured;
        self.is_closure = frame.was_closure;
        Ok(None)
    }

    // ---- Functions ----

    fn exec_begin(&mut self) -> Result<(), RuntimeError> {
        self.read_i32()?; // declared argument count
        let packed = self.read_i32()?;
        let locals = (packed & 0xffff) as usize;
        let max_depth = ((packed >> 16) & 0xffff) as usize;
        if max_depth > 0 {
            // Verifier annotation: everything this function will ever
            // hold above its locals fits in one reservation.
            self.stack.reserve(locals + max_depth);
        }
        for _ in 0..locals {
            self.push(Value::ZERO)?;
        }
        self.locals = locals;
        Ok(())
    }

    fn exec_closure(&mut self) -> Result<(), RuntimeError> {
        let entry = self.read_i32()?;
        let count = self.read_i32()?;
        let count = usize::try_from(count)
            .map_err(|_| RuntimeError::IndexOutOfRange { ip: self.op_ip })?;
        let handle = self.heap.alloc_closure(entry as u32, count, &self.stack);
        self.push(Value::obj(handle))?;
        for capture in 0..count {
            let kind = self.read_u8()?;
            let index = self.read_i32()?;
            let value = match kind {
                0 => self.slot(self.global_slot(index)?)?,
                1 => self.slot(self.local_slot(index)?)?,
                2 => self.slot(self.arg_slot(index)?)?,
                3 => self.capture_value(index)?,
                _ => return Err(RuntimeError::NotImplemented { ip: self.op_ip }),
            };
            self.heap.set_capture(handle, capture, value);
        }
        Ok(())
    }

    fn save_frame(&mut self) -> Result<(), RuntimeError> {
        if self.frames.len() >= FRAME_CAPACITY {
            return Err(RuntimeError::FrameOverflow { ip: self.op_ip });
        }
        self.frames.push(Frame {
            return_ip: self.ip,
            prev_base: self.base,
            prev_args: self.args,
            prev_locals: self.locals,
            prev_captured: self.captured,
            was_closure: self.is_closure,
        });
        Ok(())
    }

    fn exec_call(&mut self) -> Result<(), RuntimeError> {
        let target = self.read_i32()?;
        let nargs = self.read_i32()?;
        let nargs = usize::try_from(nargs)
            .map_err(|_| RuntimeError::SlotOutOfRange { ip: self.op_ip })?;
        self.save_frame()?;
        self.ip = target as usize;
        self.base = self.stack.len();
        self.args = nargs;
        self.locals = 0;
        self.captured = 0;
        self.is_closure = false;
        Ok(())
    }

    fn exec_callc(&mut self) -> Result<(), RuntimeError> {
        let nargs = self.read_i32()?;
        let nargs = usize::try_from(nargs)
            .map_err(|_| RuntimeError::SlotOutOfRange { ip: self.op_ip })?;
        let closure_slot = self
            .stack
            .len()
            .checked_sub(nargs + 1)
            .ok_or(RuntimeError::StackEmpty { ip: self.op_ip })?;
        let handle = self
            .slot(closure_slot)?
            .as_obj()
            .filter(|&h| self.heap.kind(h) == ObjKind::Closure)
            .ok_or(RuntimeError::NotAClosure { ip: self.op_ip })?;
        let entry = self
            .heap
            .closure_entry(handle)
            .ok_or(RuntimeError::NotAClosure { ip: self.op_ip })?;

        self.save_frame()?;
        self.ip = entry as usize;
        self.base = self.stack.len();
        self.args = nargs;
        self.locals = 0;
        self.captured = self.heap.length(handle) - 1;
        self.is_closure = true;
        Ok(())
    }

    // ---- Pattern matching ----

    fn exec_tag(&mut self) -> Result<(), RuntimeError> {
        let name = self.string_arg()?;
        let arity = self.read_i32()?;
        let expected = self.heap.intern_tag(name);
        let value = self.pop()?;
        let matches = match value.as_obj() {
            Some(handle) if self.heap.kind(handle) == ObjKind::Sexp => {
                self.heap.sexp_tag(handle) == Some(expected)
                    && self.heap.length(handle) == arity as usize
            }
            _ => false,
        };
        self.push(Value::bool(matches))
    }

    fn exec_array_test(&mut self) -> Result<(), RuntimeError> {
        let length = self.read_i32()?;
        let value = self.pop()?;
        let matches = match value.as_obj() {
            Some(handle) => {
                self.heap.kind(handle) == ObjKind::Array
                    && self.heap.length(handle) == length as usize
            }
            None => false,
        };
        self.push(Value::bool(matches))
    }

    fn exec_patt_eq(&mut self) -> Result<(), RuntimeError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let equal = match (lhs.as_obj(), rhs.as_obj()) {
            (Some(l), Some(r)) => {
                match (self.heap.string_bytes(l), self.heap.string_bytes(r)) {
                    (Some(lb), Some(rb)) => lb == rb,
                    _ => false,
                }
            }
            _ => false,
        };
        self.push(Value::bool(equal))
    }

    fn exec_patt_kind(&mut self, kind: ObjKind) -> Result<(), RuntimeError> {
        let value = self.pop()?;
        let matches = match value.as_obj() {
            Some(handle) => self.heap.kind(handle) == kind,
            None => false,
        };
        self.push(Value::bool(matches))
    }

    // ---- Builtins ----

    fn exec_lread(&mut self) -> Result<(), RuntimeError> {
        write!(self.output, " > ")
            .and_then(|()| self.output.flush())
            .map_err(|source| RuntimeError::Io { ip: self.op_ip, source })?;
        let mut line = String::new();
        self.input
            .read_line(&mut line)
            .map_err(|source| RuntimeError::Io { ip: self.op_ip, source })?;
        let n: i32 = line
            .trim()
            .parse()
            .map_err(|_| RuntimeError::InvalidInput { ip: self.op_ip })?;
        self.push(Value::int(n))
    }

    fn exec_lwrite(&mut self) -> Result<(), RuntimeError> {
        let value = self.pop()?;
        let n = value.as_int().ok_or(RuntimeError::NotInt { ip: self.op_ip })?;
        writeln!(self.output, "{n}")
            .map_err(|source| RuntimeError::Io { ip: self.op_ip, source })?;
        self.push(Value::int(0))
    }

    fn exec_llength(&mut self) -> Result<(), RuntimeError> {
        let (handle, _) = self.pop_aggregate()?;
        let length = self.heap.length(handle);
        self.push(Value::int(length as i32))
    }

    fn exec_lstring(&mut self) -> Result<(), RuntimeError> {
        let value = self.pop()?;
        let rendered = self.heap.stringify(value);
        let handle = self.heap.alloc_string(&rendered, &self.stack);
        self.push(Value::obj(handle))
    }

    fn exec_barray(&mut self) -> Result<(), RuntimeError> {
        let length = self.read_i32()?;
        let length = usize::try_from(length)
            .map_err(|_| RuntimeError::IndexOutOfRange { ip: self.op_ip })?;
        let handle = self.heap.alloc_array(length, &self.stack);
        for field in (0..length).rev() {
            let value = self.pop()?;
            self.heap.set_field(handle, field, value);
        }
        self.push(Value::obj(handle))
    }
}

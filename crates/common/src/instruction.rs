//! Instruction decoding: a typed view over one instruction in the code
//! section.
//!
//! Wire layout at a byte offset:
//!
//! ```text
//! 1 byte   opcode
//! 0/4/8    fixed i32 arguments, little-endian (per-opcode count)
//! 5·n      capture tail, CLOSURE only: n × { kind: u8, index: i32 }
//! ```
//!
//! Decoding never looks past the instruction's own bytes; whether the
//! arguments make sense is the verifier's job.

use std::fmt;

use crate::error::DecodeError;
use crate::opcode::Opcode;

/// Where a closure capture is sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Global = 0,
    Local = 1,
    Arg = 2,
    /// Re-captured from the enclosing closure's environment.
    Captured = 3,
}

impl CaptureKind {
    /// Decode a capture kind byte at a known code offset.
    pub fn decode(byte: u8, offset: usize) -> Result<CaptureKind, DecodeError> {
        match byte {
            0 => Ok(CaptureKind::Global),
            1 => Ok(CaptureKind::Local),
            2 => Ok(CaptureKind::Arg),
            3 => Ok(CaptureKind::Captured),
            kind => Err(DecodeError::UnknownCaptureKind { offset, kind }),
        }
    }

    /// Single-letter display name used by the disassembler.
    pub fn letter(self) -> &'static str {
        match self {
            CaptureKind::Global => "G",
            CaptureKind::Local => "L",
            CaptureKind::Arg => "A",
            CaptureKind::Captured => "C",
        }
    }
}

/// One closure capture descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capture {
    pub kind: CaptureKind,
    pub index: i32,
}

/// A decoded instruction at a fixed offset into the code section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instr {
    pub opcode: Opcode,
    /// Byte offset of the opcode byte within the code section.
    pub offset: usize,
    /// Fixed arguments; unused slots are zero.
    pub args: [i32; 2],
    /// Capture tail; empty unless `opcode` is `CLOSURE`.
    pub captures: Vec<Capture>,
}

fn read_i32(code: &[u8], pos: usize, ins_offset: usize) -> Result<i32, DecodeError> {
    let bytes = code
        .get(pos..pos + 4)
        .ok_or(DecodeError::Truncated { offset: ins_offset })?;
    let mut quad = [0u8; 4];
    quad.copy_from_slice(bytes);
    Ok(i32::from_le_bytes(quad))
}

impl Instr {
    /// Decode the instruction starting at `offset`.
    pub fn decode(code: &[u8], offset: usize) -> Result<Instr, DecodeError> {
        let byte = *code.get(offset).ok_or(DecodeError::Truncated { offset })?;
        let opcode = Opcode::decode(byte, offset)?;

        let mut args = [0i32; 2];
        let mut pos = offset + 1;
        for arg in args.iter_mut().take(opcode.args_length()) {
            *arg = read_i32(code, pos, offset)?;
            pos += 4;
        }

        let mut captures = Vec::new();
        if opcode.has_capture_tail() && args[1] > 0 {
            captures.reserve(args[1] as usize);
            for _ in 0..args[1] {
                let kind_byte = *code.get(pos).ok_or(DecodeError::Truncated { offset })?;
                let kind = CaptureKind::decode(kind_byte, offset)?;
                let index = read_i32(code, pos + 1, offset)?;
                pos += 5;
                captures.push(Capture { kind, index });
            }
        }

        Ok(Instr {
            opcode,
            offset,
            args,
            captures,
        })
    }

    /// In-memory size: opcode byte, fixed arguments, capture tail.
    pub fn size(&self) -> usize {
        1 + 4 * self.opcode.args_length() + 5 * self.captures.len()
    }

    /// Offset of the next instruction in straight-line order, or `None`
    /// when this instruction ends the code section.
    pub fn next_offset(&self, code_len: usize) -> Option<usize> {
        let next = self.offset + self.size();
        (next < code_len).then_some(next)
    }

    /// Operand-stack slots consumed by this instruction.
    pub fn popped(&self) -> i32 {
        match self.opcode {
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Rem
            | Opcode::Lss
            | Opcode::Leq
            | Opcode::Gre
            | Opcode::Geq
            | Opcode::Equ
            | Opcode::Neq
            | Opcode::And
            | Opcode::Or
            | Opcode::Sti
            | Opcode::Swap
            | Opcode::Elem
            | Opcode::PattEq => 2,

            Opcode::Sta => 3,

            Opcode::Const
            | Opcode::String
            | Opcode::Jmp
            | Opcode::Ldg
            | Opcode::Ldl
            | Opcode::Lda
            | Opcode::Ldc
            | Opcode::Ldgr
            | Opcode::Ldlr
            | Opcode::Ldar
            | Opcode::Ldcr
            | Opcode::Begin
            | Opcode::Cbegin
            | Opcode::Closure
            | Opcode::Line
            | Opcode::Lread => 0,

            Opcode::End
            | Opcode::Ret
            | Opcode::Drop
            | Opcode::Dup
            | Opcode::Stg
            | Opcode::Stl
            | Opcode::StArg
            | Opcode::Stc
            | Opcode::Cjmpz
            | Opcode::Cjmpnz
            | Opcode::Tag
            | Opcode::Array
            | Opcode::Fail
            | Opcode::PattIsString
            | Opcode::PattIsArray
            | Opcode::PattIsSexp
            | Opcode::PattIsRef
            | Opcode::PattIsVal
            | Opcode::PattIsFun
            | Opcode::Lwrite
            | Opcode::Llength
            | Opcode::Lstring => 1,

            Opcode::Sexp | Opcode::Call => self.args[1],
            Opcode::Callc => self.args[0] + 1,
            Opcode::Barray => self.args[0],
        }
    }

    /// Operand-stack slots produced by this instruction.
    pub fn pushed(&self) -> i32 {
        match self.opcode {
            Opcode::Jmp
            | Opcode::Drop
            | Opcode::Cjmpz
            | Opcode::Cjmpnz
            | Opcode::Begin
            | Opcode::Cbegin
            | Opcode::Fail
            | Opcode::Line => 0,

            Opcode::Dup | Opcode::Swap => 2,

            _ => 1,
        }
    }

    /// `pushed − popped`: the net depth change.
    pub fn stack_diff(&self) -> i32 {
        self.pushed() - self.popped()
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.opcode.mnemonic())?;
        for (i, arg) in self.args.iter().take(self.opcode.args_length()).enumerate() {
            if self.opcode.is_hex_arg(i) {
                write!(f, " 0x{arg:x}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        for capture in &self.captures {
            write!(f, " {}({})", capture.kind.letter(), capture.index)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc1(op: Opcode, a0: i32) -> Vec<u8> {
        let mut code = vec![op as u8];
        code.extend_from_slice(&a0.to_le_bytes());
        code
    }

    fn enc2(op: Opcode, a0: i32, a1: i32) -> Vec<u8> {
        let mut code = enc1(op, a0);
        code.extend_from_slice(&a1.to_le_bytes());
        code
    }

    #[test]
    fn decode_no_args() {
        let ins = Instr::decode(&[Opcode::Add as u8], 0).unwrap();
        assert_eq!(ins.opcode, Opcode::Add);
        assert_eq!(ins.size(), 1);
        assert_eq!(ins.to_string(), "ADD");
    }

    #[test]
    fn decode_one_arg() {
        let ins = Instr::decode(&enc1(Opcode::Const, -13), 0).unwrap();
        assert_eq!(ins.args[0], -13);
        assert_eq!(ins.size(), 5);
        assert_eq!(ins.to_string(), "CONST -13");
    }

    #[test]
    fn decode_two_args() {
        let ins = Instr::decode(&enc2(Opcode::Begin, 2, 3), 0).unwrap();
        assert_eq!(ins.args, [2, 3]);
        assert_eq!(ins.size(), 9);
        assert_eq!(ins.to_string(), "BEGIN 2 3");
    }

    #[test]
    fn decode_at_nonzero_offset() {
        let mut code = vec![Opcode::Drop as u8];
        code.extend_from_slice(&enc1(Opcode::Jmp, 0x2a));
        let ins = Instr::decode(&code, 1).unwrap();
        assert_eq!(ins.opcode, Opcode::Jmp);
        assert_eq!(ins.offset, 1);
        assert_eq!(ins.next_offset(code.len()), None);
    }

    #[test]
    fn decode_closure_tail() {
        let mut code = enc2(Opcode::Closure, 0x40, 2);
        code.push(1); // L
        code.extend_from_slice(&0i32.to_le_bytes());
        code.push(2); // A
        code.extend_from_slice(&3i32.to_le_bytes());
        let ins = Instr::decode(&code, 0).unwrap();
        assert_eq!(ins.captures.len(), 2);
        assert_eq!(ins.captures[0].kind, CaptureKind::Local);
        assert_eq!(ins.captures[1], Capture { kind: CaptureKind::Arg, index: 3 });
        assert_eq!(ins.size(), 9 + 10);
        assert_eq!(ins.to_string(), "CLOSURE 0x40 2 L(0) A(3)");
    }

    #[test]
    fn decode_closure_bad_capture_kind() {
        let mut code = enc2(Opcode::Closure, 0, 1);
        code.push(9);
        code.extend_from_slice(&0i32.to_le_bytes());
        assert_eq!(
            Instr::decode(&code, 0),
            Err(DecodeError::UnknownCaptureKind { offset: 0, kind: 9 })
        );
    }

    #[test]
    fn decode_truncated_args() {
        let code = [Opcode::Const as u8, 1, 2];
        assert_eq!(
            Instr::decode(&code, 0),
            Err(DecodeError::Truncated { offset: 0 })
        );
    }

    #[test]
    fn decode_past_end() {
        assert_eq!(Instr::decode(&[], 0), Err(DecodeError::Truncated { offset: 0 }));
    }

    #[test]
    fn decode_unknown_opcode() {
        assert_eq!(
            Instr::decode(&[0x7f], 4).unwrap_err(),
            DecodeError::UnknownOpcode { offset: 4, byte: 0x7f }
        );
    }

    #[test]
    fn next_offset_within_code() {
        let mut code = enc1(Opcode::Const, 7);
        code.push(Opcode::End as u8);
        let ins = Instr::decode(&code, 0).unwrap();
        assert_eq!(ins.next_offset(code.len()), Some(5));
    }

    #[test]
    fn hex_args_render_in_hex() {
        let ins = Instr::decode(&enc2(Opcode::Call, 0x1f, 2), 0).unwrap();
        assert_eq!(ins.to_string(), "CALL 0x1f 2");
    }

    #[test]
    fn popped_follows_arguments() {
        let sexp = Instr::decode(&enc2(Opcode::Sexp, 0, 3), 0).unwrap();
        assert_eq!(sexp.popped(), 3);
        let call = Instr::decode(&enc2(Opcode::Call, 0, 2), 0).unwrap();
        assert_eq!(call.popped(), 2);
        let callc = Instr::decode(&enc1(Opcode::Callc, 2), 0).unwrap();
        assert_eq!(callc.popped(), 3);
        let barray = Instr::decode(&enc1(Opcode::Barray, 4), 0).unwrap();
        assert_eq!(barray.popped(), 4);
    }

    #[test]
    fn fixed_stack_effects() {
        let add = Instr::decode(&[Opcode::Add as u8], 0).unwrap();
        assert_eq!((add.popped(), add.pushed()), (2, 1));
        let dup = Instr::decode(&[Opcode::Dup as u8], 0).unwrap();
        assert_eq!((dup.popped(), dup.pushed()), (1, 2));
        let swap = Instr::decode(&[Opcode::Swap as u8], 0).unwrap();
        assert_eq!((swap.popped(), swap.pushed()), (2, 2));
        let sta = Instr::decode(&[Opcode::Sta as u8], 0).unwrap();
        assert_eq!((sta.popped(), sta.pushed()), (3, 1));
        let fail = Instr::decode(&enc2(Opcode::Fail, 1, 2), 0).unwrap();
        assert_eq!((fail.popped(), fail.pushed()), (1, 0));
    }

    #[test]
    fn stack_diff_is_pushed_minus_popped() {
        let ins = Instr::decode(&[Opcode::Elem as u8], 0).unwrap();
        assert_eq!(ins.stack_diff(), -1);
    }
}

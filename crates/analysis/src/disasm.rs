//! Disassembler: code section → human-readable text.
//!
//! One instruction per line, `{offset:x} {mnemonic} {args…}`, with hex
//! rendering for code/string-table offsets and ` K(i)` capture tails.

use std::fmt::Write;

use lama_common::{DecodeError, Instr, Program};

/// Disassemble the whole code section.
///
/// A trailing instruction whose arguments would overrun the section
/// stops the walk with an error; so does an unknown opcode byte.
pub fn disassemble(program: &Program) -> Result<String, DecodeError> {
    let mut out = String::new();
    let mut offset = 0;
    while offset < program.code.len() {
        let ins = Instr::decode(&program.code, offset)?;
        // Infallible: writing to a String cannot fail.
        let _ = writeln!(out, "{:x} {}", offset, ins);
        offset += ins.size();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lama_common::{CaptureKind, Opcode, ProgramBuilder};

    fn load(builder: ProgramBuilder) -> Program {
        Program::load(&builder.finish()).unwrap()
    }

    #[test]
    fn renders_offsets_and_mnemonics() {
        let mut b = ProgramBuilder::new();
        let entry = b.here();
        b.public("main", entry);
        b.begin(2, 0);
        b.op1(Opcode::Const, 42);
        b.op(Opcode::Lwrite);
        b.op(Opcode::End);
        let text = disassemble(&load(b)).unwrap();
        assert_eq!(text, "0 BEGIN 2 0\n9 CONST 42\ne CALL_Lwrite\nf END\n");
    }

    #[test]
    fn jump_targets_render_in_hex() {
        let mut b = ProgramBuilder::new();
        let entry = b.here();
        b.public("main", entry);
        b.begin(2, 0);
        let target = b.label();
        b.jump(Opcode::Jmp, target);
        b.mark(target);
        b.op1(Opcode::Const, 0);
        b.op(Opcode::End);
        let text = disassemble(&load(b)).unwrap();
        assert!(text.contains("9 JMP 0xe\n"), "got:\n{text}");
    }

    #[test]
    fn closure_captures_render_with_kind_letters() {
        let mut b = ProgramBuilder::new();
        let entry = b.here();
        b.public("main", entry);
        b.begin(2, 1);
        let body = b.label();
        b.closure(body, &[(CaptureKind::Local, 0), (CaptureKind::Global, 2)]);
        b.op(Opcode::End);
        b.mark(body);
        b.op2(Opcode::Cbegin, 1, 0);
        b.op1(Opcode::Const, 0);
        b.op(Opcode::Ret);
        let text = disassemble(&load(b)).unwrap();
        assert!(text.contains("CLOSURE 0x1d 2 L(0) G(2)"), "got:\n{text}");
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let mut b = ProgramBuilder::new();
        let entry = b.here();
        b.public("main", entry);
        b.begin(2, 0);
        b.op(Opcode::End);
        let mut program = load(b);
        program.code[9] = 0x7f;
        assert_eq!(
            disassemble(&program),
            Err(DecodeError::UnknownOpcode { offset: 9, byte: 0x7f })
        );
    }

    #[test]
    fn truncated_instruction_is_rejected() {
        let mut b = ProgramBuilder::new();
        let entry = b.here();
        b.public("main", entry);
        b.begin(2, 0);
        b.op(Opcode::End);
        let mut program = load(b);
        // A CONST opcode byte with no room for its argument.
        program.code[9] = Opcode::Const as u8;
        assert_eq!(
            disassemble(&program),
            Err(DecodeError::Truncated { offset: 9 })
        );
    }
}

//! Reachability and idiom-frequency scanner.
//!
//! A depth-first walk from every public entry marks each reachable
//! instruction, plus the boundary positions where straight-line flow
//! stops: `JMP` (site and target), `END`, `RET`, `FAIL`, public
//! entries, and the instruction immediately after a `CALL`. Unigram and
//! bigram opcode sequences are then counted over the reachable,
//! non-boundary-crossing runs.
//!
//! Occurrence keys are the instructions' raw byte spans, so two
//! instructions count together exactly when they are structurally
//! identical.

use std::collections::HashMap;
use std::fmt::Write;

use lama_common::{Instr, Opcode, Program};
use log::debug;

use crate::error::AnalyzeError;

/// Occurrence counts, each entry `(representative offset, count)` in
/// descending count order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Idioms {
    pub unigrams: Vec<(usize, u32)>,
    pub bigrams: Vec<(usize, u32)>,
}

/// Scan a program for instruction idioms.
pub fn analyze(program: &Program) -> Result<Idioms, AnalyzeError> {
    let (visited, boundary) = mark(program)?;
    count(program, &visited, &boundary)
}

/// Render the merged report: both lists interleaved in descending
/// count order under the classic header.
pub fn report(program: &Program, idioms: &Idioms) -> Result<String, AnalyzeError> {
    let mut out = String::from("Instructions sorted by occurencies:\n");
    let mut uni = idioms.unigrams.iter().peekable();
    let mut bi = idioms.bigrams.iter().peekable();
    loop {
        let take_unigram = match (uni.peek(), bi.peek()) {
            (None, None) => break,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(&&(_, uc)), Some(&&(_, bc))) => uc > bc,
        };
        if take_unigram {
            let &(offset, count) = uni.next().expect("peeked");
            let ins = Instr::decode(&program.code, offset)?;
            let _ = writeln!(out, "{count} {ins}");
        } else {
            let &(offset, count) = bi.next().expect("peeked");
            let first = Instr::decode(&program.code, offset)?;
            let second = Instr::decode(&program.code, offset + first.size())?;
            let _ = writeln!(out, "{count} {first}; {second}");
        }
    }
    Ok(out)
}

/// Reachability pass: visited and boundary bitvectors over code bytes.
fn mark(program: &Program) -> Result<(Vec<bool>, Vec<bool>), AnalyzeError> {
    let code = &program.code;
    let mut visited = vec![false; code.len()];
    let mut boundary = vec![false; code.len()];
    let mut stack = Vec::new();

    for public in &program.publics {
        let offset = public.code_offset as usize;
        if offset >= code.len() {
            return Err(AnalyzeError::PublicOutOfCode);
        }
        boundary[offset] = true;
        if !visited[offset] {
            visited[offset] = true;
            stack.push(offset);
        }
    }

    while let Some(start) = stack.pop() {
        let mut cursor = Some(start);
        while let Some(offset) = cursor {
            let ins = Instr::decode(code, offset)?;
            match ins.opcode {
                Opcode::Jmp => {
                    let target = ins.args[0] as usize;
                    if target >= code.len() {
                        return Err(AnalyzeError::TargetOutOfRange { ip: offset });
                    }
                    boundary[offset] = true;
                    boundary[target] = true;
                    if visited[target] {
                        break;
                    }
                    visited[target] = true;
                    cursor = Some(target);
                    continue;
                }
                Opcode::End | Opcode::Ret | Opcode::Fail => {
                    boundary[offset] = true;
                    break;
                }
                Opcode::Call | Opcode::Cjmpz | Opcode::Cjmpnz | Opcode::Closure => {
                    let target = ins.args[0] as usize;
                    if target >= code.len() {
                        return Err(AnalyzeError::TargetOutOfRange { ip: offset });
                    }
                    if !visited[target] {
                        visited[target] = true;
                        stack.push(target);
                    }
                    // A call transfers away and back: straight-line
                    // pairing stops at its successor.
                    if ins.opcode == Opcode::Call {
                        if let Some(next) = ins.next_offset(code.len()) {
                            boundary[next] = true;
                        }
                    }
                }
                _ => {}
            }
            match ins.next_offset(code.len()) {
                Some(next) if !visited[next] => {
                    visited[next] = true;
                    cursor = Some(next);
                }
                _ => break,
            }
        }
    }

    Ok((visited, boundary))
}

fn bump<'c>(
    list: &mut Vec<(usize, u32)>,
    index: &mut HashMap<&'c [u8], usize>,
    span: &'c [u8],
    offset: usize,
) {
    match index.get(span) {
        Some(&at) => list[at].1 += 1,
        None => {
            index.insert(span, list.len());
            list.push((offset, 1));
        }
    }
}

/// Counting pass over the linear instruction sequence.
fn count(
    program: &Program,
    visited: &[bool],
    boundary: &[bool],
) -> Result<Idioms, AnalyzeError> {
    let code = &program.code;
    let mut unigrams: Vec<(usize, u32)> = Vec::new();
    let mut bigrams: Vec<(usize, u32)> = Vec::new();
    let mut unigram_index: HashMap<&[u8], usize> = HashMap::new();
    let mut bigram_index: HashMap<&[u8], usize> = HashMap::new();

    let mut prev: Option<usize> = None;
    let mut offset = 0;
    while offset < code.len() {
        let ins = Instr::decode(code, offset)?;
        let end = offset + ins.size();
        if !visited[offset] {
            prev = None;
            offset = end;
            continue;
        }

        bump(&mut unigrams, &mut unigram_index, &code[offset..end], offset);
        if let Some(prev_offset) = prev {
            bump(&mut bigrams, &mut bigram_index, &code[prev_offset..end], prev_offset);
        }

        prev = if boundary[offset] { None } else { Some(offset) };
        offset = end;
    }

    unigrams.sort_by(|a, b| b.1.cmp(&a.1));
    bigrams.sort_by(|a, b| b.1.cmp(&a.1));

    debug!(
        "idiom scan: {} distinct unigrams, {} distinct bigrams",
        unigrams.len(),
        bigrams.len()
    );

    Ok(Idioms { unigrams, bigrams })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lama_common::{Opcode, ProgramBuilder};

    fn load(builder: ProgramBuilder) -> Program {
        Program::load(&builder.finish()).unwrap()
    }

    fn with_main() -> ProgramBuilder {
        let mut b = ProgramBuilder::new();
        let entry = b.here();
        b.public("main", entry);
        b.begin(2, 0);
        b
    }

    /// Count for the unigram whose representative decodes to `text`.
    fn unigram_count(program: &Program, idioms: &Idioms, text: &str) -> Option<u32> {
        idioms.unigrams.iter().find_map(|&(offset, count)| {
            (Instr::decode(&program.code, offset).unwrap().to_string() == text).then_some(count)
        })
    }

    fn bigram_count(program: &Program, idioms: &Idioms, text: &str) -> Option<u32> {
        idioms.bigrams.iter().find_map(|&(offset, count)| {
            let first = Instr::decode(&program.code, offset).unwrap();
            let second = Instr::decode(&program.code, offset + first.size()).unwrap();
            (format!("{first}; {second}") == text).then_some(count)
        })
    }

    #[test]
    fn counts_structurally_equal_instructions_together() {
        let mut b = with_main();
        b.op1(Opcode::Const, 1);
        b.op1(Opcode::Const, 1);
        b.op1(Opcode::Const, 2);
        b.op(Opcode::End);
        let program = load(b);
        let idioms = analyze(&program).unwrap();
        assert_eq!(unigram_count(&program, &idioms, "CONST 1"), Some(2));
        assert_eq!(unigram_count(&program, &idioms, "CONST 2"), Some(1));
        assert_eq!(unigram_count(&program, &idioms, "BEGIN 2 0"), Some(1));
        assert_eq!(bigram_count(&program, &idioms, "CONST 1; CONST 1"), Some(1));
        assert_eq!(bigram_count(&program, &idioms, "CONST 1; CONST 2"), Some(1));
        assert_eq!(bigram_count(&program, &idioms, "CONST 2; END"), Some(1));
        // The entry is a boundary: no pair across it.
        assert_eq!(bigram_count(&program, &idioms, "BEGIN 2 0; CONST 1"), None);
    }

    #[test]
    fn unreachable_code_is_not_counted() {
        let mut b = with_main();
        b.op1(Opcode::Const, 7);
        b.op(Opcode::End);
        // Dead function nothing references.
        b.begin(0, 0);
        b.op1(Opcode::Const, 7);
        b.op1(Opcode::Const, 7);
        b.op(Opcode::End);
        let program = load(b);
        let idioms = analyze(&program).unwrap();
        assert_eq!(unigram_count(&program, &idioms, "CONST 7"), Some(1));
    }

    #[test]
    fn call_successor_breaks_pairs() {
        let mut b = with_main();
        let callee = b.label();
        b.call(callee, 0);
        b.op(Opcode::Drop);
        b.op1(Opcode::Const, 0);
        b.op(Opcode::End);
        b.mark(callee);
        b.begin(0, 0);
        b.op1(Opcode::Const, 1);
        b.op(Opcode::End);
        let program = load(b);
        let idioms = analyze(&program).unwrap();
        // The instruction after the CALL is a boundary: no pair starts
        // there, though the (CALL, successor) pair itself is counted.
        assert_eq!(bigram_count(&program, &idioms, "DROP; CONST 0"), None);
        assert_eq!(bigram_count(&program, &idioms, "CONST 0; END"), Some(1));
        let call_pairs = idioms
            .bigrams
            .iter()
            .filter(|&&(offset, _)| {
                Instr::decode(&program.code, offset).unwrap().opcode == Opcode::Call
            })
            .count();
        assert_eq!(call_pairs, 1);
    }

    #[test]
    fn jump_target_is_reachable_through_the_jump() {
        let mut b = with_main();
        let over = b.label();
        b.jump(Opcode::Jmp, over);
        // Dead straight-line bytes.
        b.op1(Opcode::Const, 9);
        b.mark(over);
        b.op1(Opcode::Const, 3);
        b.op(Opcode::End);
        let program = load(b);
        let idioms = analyze(&program).unwrap();
        assert_eq!(unigram_count(&program, &idioms, "CONST 9"), None);
        assert_eq!(unigram_count(&program, &idioms, "CONST 3"), Some(1));
    }

    #[test]
    fn public_outside_code_is_rejected() {
        let mut b = ProgramBuilder::new();
        let entry = b.here();
        b.public("main", entry);
        b.begin(2, 0);
        b.op(Opcode::End);
        let mut program = load(b);
        program.publics[0].code_offset = 4096;
        assert_eq!(analyze(&program), Err(AnalyzeError::PublicOutOfCode));
    }

    #[test]
    fn report_is_merged_descending() {
        let mut b = with_main();
        b.op1(Opcode::Const, 1);
        b.op1(Opcode::Const, 1);
        b.op1(Opcode::Const, 1);
        b.op(Opcode::End);
        let program = load(b);
        let idioms = analyze(&program).unwrap();
        let text = report(&program, &idioms).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Instructions sorted by occurencies:"));
        assert_eq!(lines.next(), Some("3 CONST 1"));
        // Counts never increase down the report.
        let counts: Vec<u32> = text
            .lines()
            .skip(1)
            .map(|l| l.split(' ').next().unwrap().parse().unwrap())
            .collect();
        assert!(counts.windows(2).all(|w| w[0] >= w[1]), "not sorted: {text}");
    }
}

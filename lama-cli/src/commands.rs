//! CLI command implementations.

use std::fs;

use lama_common::Program;

/// Read and load a bytecode file. Failures are printed as single-line
/// diagnostics and become exit code 1.
fn load(path: &str) -> Result<Program, i32> {
    let bytes = match fs::read(path) {
        Ok(bytes) if !bytes.is_empty() => bytes,
        _ => {
            eprintln!("File not exists or empty");
            return Err(1);
        }
    };
    Program::load(&bytes).map_err(|e| {
        eprintln!("{e}");
        1
    })
}

/// `-c`: structural validation only.
pub fn check(path: &str) -> Result<(), i32> {
    load(path)?;
    println!("Parsed file successfully");
    Ok(())
}

/// `-d`: disassemble to stdout.
pub fn disassemble(path: &str) -> Result<(), i32> {
    let program = load(path)?;
    let text = lama_analysis::disassemble(&program).map_err(|e| {
        eprintln!("{e}");
        1
    })?;
    print!("{text}");
    Ok(())
}

/// `-a`: idiom frequency report to stdout.
pub fn analyze(path: &str) -> Result<(), i32> {
    let program = load(path)?;
    let idioms = lama_analysis::analyze(&program).map_err(|e| {
        eprintln!("{e}");
        1
    })?;
    let text = lama_analysis::report(&program, &idioms).map_err(|e| {
        eprintln!("{e}");
        1
    })?;
    print!("{text}");
    Ok(())
}

/// Plain and `-v` execution. Verification runs before any bytecode
/// executes and annotates function headers with their max depth.
pub fn run(path: &str, verify: bool) -> Result<(), i32> {
    let mut program = load(path)?;
    if verify {
        lama_verifier::verify(&mut program).map_err(|e| {
            eprintln!("{e}");
            1
        })?;
    }
    match lama_vm::interpret(&program) {
        Ok(0) => Ok(()),
        Ok(code) => Err(code),
        Err(e) => {
            eprintln!("{e}");
            Err(1)
        }
    }
}

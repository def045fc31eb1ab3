//! `lamavm` — load, check, disassemble, analyze, verify, and run Lama
//! bytecode files.
//!
//! Exit codes: 0 on success, 1 on any failure (load, verification, or
//! runtime). Runtime diagnostics carry the faulting instruction offset
//! as `[ip=0xHEX]`.

mod commands;

use std::process;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    let (flag, path) = match args.len() {
        0 | 1 => {
            print_usage();
            process::exit(1);
        }
        2 if args[1].starts_with('-') => {
            eprintln!("error: missing input file");
            print_usage();
            process::exit(1);
        }
        2 => (None, args[1].as_str()),
        _ => (Some(args[1].as_str()), args[2].as_str()),
    };

    let result = match flag {
        None => commands::run(path, false),
        Some("-c") => commands::check(path),
        Some("-d") => commands::disassemble(path),
        Some("-a") => commands::analyze(path),
        Some("-v") => commands::run(path, true),
        Some(other) => {
            eprintln!("error: unknown flag '{other}'");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(code) = result {
        process::exit(code);
    }
}

fn print_usage() {
    eprintln!("Usage: lamavm [flag] <file.bc>");
    eprintln!();
    eprintln!("Flags:");
    eprintln!("  (none)   interpret the file");
    eprintln!("  -c       validate the header only");
    eprintln!("  -d       disassemble");
    eprintln!("  -a       print the idiom frequency report");
    eprintln!("  -v       verify, then interpret");
}

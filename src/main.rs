//! While compiler CLI entry point.
//!
//! Usage:
//!   wlc compile <input.while> -o <output.wb>
//!   wlc check <input.while>    (parse and type-check only)
//!   wlc parse <input.while>    (dump AST)
//!   wlc lex <input.while>      (dump tokens)

use miette::Report;
use wlc::{checker, codegen, lexer::Lexer, parser::Parser};
use std::{env, fs, process};

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: wlc <command> <file.while>");
        eprintln!("Commands: lex, parse, check, compile");
        process::exit(64);
    }

    let command = &args[1];
    let filename = &args[2];

    let source = match fs::read_to_string(filename) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading '{}': {}", filename, e);
            process::exit(74);
        }
    };

    match command.as_str() {
        "lex" => {
            let tokens = match Lexer::new(&source).scan_tokens() {
                Ok(tokens) => tokens,
                Err(e) => report(e, &source),
            };
            for token in &tokens {
                println!("{:?}", token);
            }
        }
        "parse" => {
            let program = lex_and_parse(&source);
            for decl in &program {
                println!("{:#?}", decl);
            }
        }
        "check" => {
            let mut program = lex_and_parse(&source);
            if let Err(e) = checker::check(&mut program) {
                report(e, &source);
            }
            println!("No errors.");
        }
        "compile" => {
            let mut program = lex_and_parse(&source);
            if let Err(e) = checker::check(&mut program) {
                report(e, &source);
            }
            let methods = match codegen::generate_program(&program) {
                Ok(methods) => methods,
                Err(e) => {
                    eprintln!("Compilation error: {}", e);
                    process::exit(65);
                }
            };
            let output = if args.len() > 4 && args[3] == "-o" {
                args[4].clone()
            } else {
                filename.replace(".while", ".wb")
            };
            let result = fs::File::create(&output)
                .and_then(|mut f| wlc::bytecode::write_binary(&mut f, &methods));
            match result {
                Ok(()) => println!("Compiled to {}", output),
                Err(e) => {
                    eprintln!("Error writing '{}': {}", output, e);
                    process::exit(74);
                }
            }
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            process::exit(64);
        }
    }
}

/// Lex and parse source code, exiting on the first error.
fn lex_and_parse(source: &str) -> wlc::ast::Program {
    let tokens = match Lexer::new(source).scan_tokens() {
        Ok(tokens) => tokens,
        Err(e) => report(e, source),
    };
    match Parser::new(tokens).parse() {
        Ok(program) => program,
        Err(e) => report(e, source),
    }
}

/// Render a diagnostic against the source text and exit.
fn report(error: impl miette::Diagnostic + Send + Sync + 'static, source: &str) -> ! {
    let report = Report::new(error).with_source_code(source.to_string());
    eprintln!("{:?}", report);
    process::exit(65);
}

use std::process::ExitCode;

use perl_core::compiler::compile_program;
use perl_core::disassembler::disassemble;
use perl_core::frontend::parser::parse_program;
use perl_core::logger::init_logger;
use perl_core::{run_source, RuntimeConfig, RuntimeContext};

/// Minimal driver. Argument handling is deliberately plain: the engine
/// core is the product, the CLI is a thin shell around it.
///
///   perl-core -e <code>      run inline program
///   perl-core <file>         run a program file
///   --parse                  dump the AST to stderr, no execution
///   --disassemble            dump compiled bytecode to stderr, then run
///   --interpreter            force the register-bytecode interpreter
fn main() -> ExitCode {
    init_logger();

    let mut parse_only = false;
    let mut dump_bytecode = false;
    let mut inline: Option<String> = None;
    let mut file: Option<String> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--parse" => parse_only = true,
            "--disassemble" => dump_bytecode = true,
            // the only backend in this build is the interpreter
            "--interpreter" => {}
            "-e" => match args.next() {
                Some(code) => inline = Some(code),
                None => {
                    eprintln!("No code specified for -e.");
                    return ExitCode::from(2);
                }
            },
            other if file.is_none() && !other.starts_with('-') => {
                file = Some(other.to_string());
            }
            other => {
                eprintln!("Unrecognized switch: {}", other);
                return ExitCode::from(2);
            }
        }
    }

    let (source, name) = match (inline, file) {
        (Some(code), _) => (code, "-e".to_string()),
        (None, Some(path)) => match std::fs::read_to_string(&path) {
            Ok(source) => (source, path),
            Err(err) => {
                eprintln!("Can't open perl script \"{}\": {}", path, err);
                return ExitCode::from(2);
            }
        },
        (None, None) => {
            eprintln!("Usage: perl-core [-e code | file] [--parse] [--disassemble]");
            return ExitCode::from(2);
        }
    };

    if parse_only {
        return match parse_program(&source, &name) {
            Ok(program) => {
                eprintln!("{:#?}", program);
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("{} at {} line {}.", err.message, name, err.line);
                ExitCode::from(255)
            }
        };
    }

    if dump_bytecode {
        match parse_program(&source, &name).and_then(|p| compile_program(&p)) {
            Ok(code) => eprint!("{}", disassemble(&code)),
            Err(err) => {
                eprintln!("{} at {} line {}.", err.message, name, err.line);
                return ExitCode::from(255);
            }
        }
    }

    let mut ctx = RuntimeContext::new(RuntimeConfig::from_env());
    match run_source(&mut ctx, &source, &name) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.to_message());
            ExitCode::from(255)
        }
    }
}

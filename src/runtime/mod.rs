pub mod builtins;
pub mod context;
pub mod control_flow;
pub mod dynamic_scope;
pub mod frame;
pub mod interpreter;
pub mod iterator;
pub mod ops;
pub mod symbols;

use std::cell::RefCell;
use std::rc::Rc;

use crate::compiler::compile_program;
use crate::frontend::parser::parse_program;
use crate::global::error::PerlError;
use crate::runtime::context::RuntimeContext;
use crate::values::array::Array;
use crate::values::code::Code;
use crate::values::scalar::Sv;

/// Parses, compiles and runs a program in the given context. The result
/// is the value of the program's last expression (scalar context).
pub fn run_source(
    ctx: &mut RuntimeContext,
    source: &str,
    file: &str,
) -> Result<Sv, PerlError> {
    let program = parse_program(source, file)?;
    let compiled = compile_program(&program)?;
    ctx.current_file = compiled.file.clone();
    let main = Rc::new(Code::new(compiled, Some("main".into())));
    let args = Rc::new(RefCell::new(Array::new()));
    let underscore = ctx.symbols.scalar("main::_");
    interpreter::call_code(ctx, main, args, Some(underscore), false)
}

/// As [`run_source`], but returns the program result in list context.
pub fn run_source_list(
    ctx: &mut RuntimeContext,
    source: &str,
    file: &str,
) -> Result<Sv, PerlError> {
    let program = parse_program(source, file)?;
    let compiled = compile_program(&program)?;
    ctx.current_file = compiled.file.clone();
    let main = Rc::new(Code::new(compiled, Some("main".into())));
    let args = Rc::new(RefCell::new(Array::new()));
    let underscore = ctx.symbols.scalar("main::_");
    interpreter::call_code(ctx, main, args, Some(underscore), true)
}

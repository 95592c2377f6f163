use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

use crate::compiler::buffers::{read_i32, read_u16, read_u32, read_u8};
use crate::compiler::code::InterpretedCode;
use crate::compiler::operators::Builtin;
use crate::compiler::{compile_eval_string, CTX_LIST};
use crate::frontend::ast::BinOp;
use crate::frontend::parser::parse_program;
use crate::global::error::{ErrorKind, PerlError, ValueError};
use crate::global::opcodes::{Opcode, NO_LABEL};
use crate::runtime::builtins;
use crate::runtime::context::RuntimeContext;
use crate::runtime::control_flow::{ControlMarker, LoopSignal};
use crate::runtime::dynamic_scope::SaveRecord;
use crate::runtime::frame::Frame;
use crate::runtime::iterator::PerlIter;
use crate::runtime::ops;
use crate::values::array::Array;
use crate::values::code::Code;
use crate::values::hash::Hash;
use crate::values::numeric::Num;
use crate::values::reference::{PerlRef, RefTarget};
use crate::values::scalar::{
    sv_bool, sv_fresh_undef, sv_num, sv_undef, Scalar, ScalarCell, Sv,
};
use crate::values::string::PStr;

// bounded well inside the host thread stack; goto &sub bounces do not
// count against it
const MAX_CALL_DEPTH: usize = 384;

/// Calls a compiled callable: sets up the frame, runs the dispatch loop,
/// unwinds the dynamic scope on every exit path, and services the
/// `GotoSub` tail-call and `Return` markers.
///
/// The result is a list reference in list context, the last returned
/// value (or undef) in scalar context.
pub fn call_code(
    ctx: &mut RuntimeContext,
    code: Rc<Code>,
    args: Rc<RefCell<Array>>,
    underscore: Option<Sv>,
    list_context: bool,
) -> Result<Sv, PerlError> {
    let underscore = underscore.unwrap_or_else(|| ctx.symbols.scalar("main::_"));
    let mut current = code;

    if ctx.call_depth >= MAX_CALL_DEPTH {
        return Err(PerlError::new(
            ErrorKind::UserDie,
            format!("Deep recursion on subroutine \"{}\"", current.display_name()),
        ));
    }
    ctx.call_depth += 1;

    let result = loop {
        let watermark = ctx.enter_dynamic_scope();
        let captured = current.captured_cells();
        let outcome = run_frame(
            ctx,
            &current.compiled,
            args.clone(),
            underscore.clone(),
            list_context,
            &captured,
        );
        // save-records run on the normal AND the exceptional path
        ctx.exit_dynamic_scope(watermark);

        match outcome {
            Err(err) => break Err(err),
            Ok(()) => {
                if let Some(next) = ctx.control.take_goto() {
                    // tail call: reuse the current @_ without growing the
                    // Perl-visible call stack
                    current = next;
                    continue;
                }
                if let Some(values) = ctx.control.take_return() {
                    break Ok(collect_result(values, list_context));
                }
                // a loop marker is escaping through this frame; the value
                // of the call is undef and the caller's probes take over
                break Ok(sv_undef());
            }
        }
    };
    ctx.call_depth -= 1;
    result
}

fn collect_result(values: Vec<Sv>, list_context: bool) -> Sv {
    if list_context {
        let mut array = Array::new();
        for cell in values {
            array.push_cell(cell);
        }
        ScalarCell::new(Scalar::Ref(PerlRef::to_array(Rc::new(RefCell::new(array)))))
    } else {
        match values.into_iter().last() {
            Some(cell) => cell,
            None => sv_undef(),
        }
    }
}

/// What a marker resolution decided.
enum Unwind {
    Continue,
    Jump(u32),
    ExitFrame,
}

/// The switch-dispatched interpreter loop. Returns `Ok(())` when the frame
/// is left via a marker (Return/GotoSub, or a loop marker that belongs to
/// an outer frame).
fn run_frame(
    ctx: &mut RuntimeContext,
    code: &InterpretedCode,
    args: Rc<RefCell<Array>>,
    underscore: Sv,
    list_context: bool,
    captured: &[Sv],
) -> Result<(), PerlError> {
    let mut frame = Frame::new(code, args, underscore, list_context, captured);
    let bytes = &code.bytecode;
    let mut pc: usize = 0;

    macro_rules! fail {
        ($at:expr, $err:expr) => {
            return Err(PerlError::from($err)
                .located(&code.file, code.line_for_pc($at as u32)))
        };
    }

    while pc < bytes.len() {
        let op_pc = pc;
        let op = match Opcode::try_from(bytes[pc]) {
            Ok(op) => op,
            Err(_) => fail!(
                op_pc,
                PerlError::new(
                    ErrorKind::Compile,
                    format!("Invalid opcode 0x{:02x}", bytes[pc])
                )
            ),
        };
        pc += 1;
        trace!("pc {:5} {}", op_pc, op);

        match op {
            Opcode::NOP => {}
            Opcode::JUMP => {
                let t = read_u32(bytes, &mut pc);
                pc = t as usize;
            }
            Opcode::JUMP_IF_FALSE | Opcode::JUMP_IF_TRUE => {
                let r = read_u8(bytes, &mut pc);
                let t = read_u32(bytes, &mut pc);
                let cond = match ops::truthy(ctx, frame.reg(r)) {
                    Ok(b) => b,
                    Err(e) => fail!(op_pc, e),
                };
                let jump = if op == Opcode::JUMP_IF_FALSE { !cond } else { cond };
                if jump {
                    pc = t as usize;
                }
            }
            Opcode::RETURN => {
                let r = read_u8(bytes, &mut pc);
                let values = match ops::list_of(frame.reg(r)) {
                    Ok(array) => array.borrow().cells().to_vec(),
                    // a scalar in return position returns itself
                    Err(_) => vec![frame.reg(r).clone()],
                };
                ctx.control.set(ControlMarker::Return(values));
                return Ok(());
            }
            Opcode::DIE => {
                let r = read_u8(bytes, &mut pc);
                let args = match ops::list_of(frame.reg(r)) {
                    Ok(array) => array,
                    Err(e) => fail!(op_pc, e),
                };
                let err = match ops::die_value(ctx, &args) {
                    Ok(err) => err,
                    Err(e) => fail!(op_pc, e),
                };
                fail!(op_pc, err);
            }
            Opcode::WARN => {
                let r = read_u8(bytes, &mut pc);
                let args = match ops::list_of(frame.reg(r)) {
                    Ok(array) => array,
                    Err(e) => fail!(op_pc, e),
                };
                let cells: Vec<Sv> = args.borrow().cells().to_vec();
                let mut message = String::new();
                for cell in &cells {
                    match ops::stringify(ctx, cell) {
                        Ok(text) => message.push_str(&text.to_text()),
                        Err(e) => fail!(op_pc, e),
                    }
                }
                if message.is_empty() {
                    message.push_str("Warning: something's wrong");
                }
                if !message.ends_with('\n') {
                    message = format!(
                        "{} at {} line {}.\n",
                        message,
                        code.file,
                        code.line_for_pc(op_pc as u32)
                    );
                }
                eprint!("{}", message);
            }
            Opcode::SET_MARKER_LAST | Opcode::SET_MARKER_NEXT | Opcode::SET_MARKER_REDO => {
                let label_const = read_u16(bytes, &mut pc);
                let label = if label_const == NO_LABEL {
                    None
                } else {
                    Some(
                        code.constants[label_const as usize]
                            .get_str()
                            .to_text()
                            .into_owned(),
                    )
                };
                let marker = match op {
                    Opcode::SET_MARKER_LAST => ControlMarker::Last(label),
                    Opcode::SET_MARKER_NEXT => ControlMarker::Next(label),
                    _ => ControlMarker::Redo(label),
                };
                ctx.control.set(marker);
                match resolve_marker(ctx, code, &mut frame, op_pc as u32) {
                    Unwind::Continue => {}
                    Unwind::Jump(t) => pc = t as usize,
                    Unwind::ExitFrame => return Ok(()),
                }
            }
            Opcode::GOTO_SUB => {
                let r = read_u8(bytes, &mut pc);
                let target = match resolve_code(ctx, frame.reg(r)) {
                    Ok(code) => code,
                    Err(e) => fail!(op_pc, e),
                };
                ctx.control.set(ControlMarker::GotoSub(target));
                return Ok(());
            }
            Opcode::ENTER_SCOPE => {
                frame.dyn_marks.push(ctx.enter_dynamic_scope());
            }
            Opcode::LEAVE_SCOPE => {
                if let Some(mark) = frame.dyn_marks.pop() {
                    ctx.exit_dynamic_scope(mark);
                }
            }
            Opcode::SAVE_REGEX_STATE => {
                let snapshot = ctx.regex.snapshot();
                ctx.scopes.push(SaveRecord::RegexState(snapshot));
            }
            Opcode::WANT_ARRAY => {
                let r = read_u8(bytes, &mut pc);
                let flag = frame.reg(2).get_int() == 1;
                frame.set_reg(r, sv_bool(flag));
            }

            Opcode::LOAD_CONST => {
                let r = read_u8(bytes, &mut pc);
                let c = read_u16(bytes, &mut pc);
                frame.set_reg(r, code.constants[c as usize].clone());
            }
            Opcode::LOAD_UNDEF => {
                let r = read_u8(bytes, &mut pc);
                frame.set_reg(r, sv_fresh_undef());
            }
            Opcode::LOAD_INT => {
                let r = read_u8(bytes, &mut pc);
                let v = read_i32(bytes, &mut pc);
                frame.set_reg(r, crate::values::scalar::sv_int(v as i64));
            }
            Opcode::ALIAS_REG => {
                let dst = read_u8(bytes, &mut pc);
                let src = read_u8(bytes, &mut pc);
                let cell = frame.reg(src).clone();
                frame.set_reg(dst, cell);
            }
            Opcode::COPY_VALUE => {
                let dst = read_u8(bytes, &mut pc);
                let src = read_u8(bytes, &mut pc);
                let value = frame.reg(src).get();
                if let Err(e) = frame.reg(dst).set(value) {
                    fail!(op_pc, e);
                }
            }
            Opcode::GET_GLOBAL => {
                let r = read_u8(bytes, &mut pc);
                let c = read_u16(bytes, &mut pc);
                let name = code.constants[c as usize].get_str().to_text().into_owned();
                let cell = ctx.symbols.scalar(&name);
                frame.set_reg(r, cell);
            }
            Opcode::GET_GLOBAL_ARRAY => {
                let r = read_u8(bytes, &mut pc);
                let c = read_u16(bytes, &mut pc);
                let name = code.constants[c as usize].get_str().to_text().into_owned();
                let array = ctx.symbols.array(&name);
                frame.set_reg(r, ScalarCell::new(Scalar::Ref(PerlRef::to_array(array))));
            }
            Opcode::GET_GLOBAL_HASH => {
                let r = read_u8(bytes, &mut pc);
                let c = read_u16(bytes, &mut pc);
                let name = code.constants[c as usize].get_str().to_text().into_owned();
                let hash = ctx.symbols.hash(&name);
                frame.set_reg(r, ScalarCell::new(Scalar::Ref(PerlRef::to_hash(hash))));
            }
            Opcode::GET_GLOBAL_CODE => {
                let r = read_u8(bytes, &mut pc);
                let c = read_u16(bytes, &mut pc);
                let name = code.constants[c as usize].get_str().to_text().into_owned();
                match ctx.symbols.lookup_code(&name) {
                    Some(found) => {
                        frame.set_reg(r, ScalarCell::new(Scalar::Code(found)))
                    }
                    None => fail!(
                        op_pc,
                        PerlError::new(
                            ErrorKind::UserDie,
                            format!("Undefined subroutine &{} called", name)
                        )
                    ),
                }
            }
            Opcode::SET_GLOBAL_CODE => {
                let c = read_u16(bytes, &mut pc);
                let r = read_u8(bytes, &mut pc);
                let name = code.constants[c as usize].get_str().to_text().into_owned();
                match resolve_code(ctx, frame.reg(r)) {
                    Ok(found) => ctx.symbols.set_code(&name, found),
                    Err(e) => fail!(op_pc, e),
                }
            }
            Opcode::ALIAS_GLOBAL_SCALAR => {
                let c = read_u16(bytes, &mut pc);
                let r = read_u8(bytes, &mut pc);
                let name = code.constants[c as usize].get_str().to_text().into_owned();
                let glob = ctx.symbols.glob(&name);
                glob.set_scalar_cell(frame.reg(r).clone());
            }
            Opcode::GET_SPECIAL => {
                let r = read_u8(bytes, &mut pc);
                let which = read_u16(bytes, &mut pc);
                let value = match which {
                    0 => ctx.regex.match_pstr(),
                    1 => ctx.regex.prematch_pstr(),
                    2 => ctx.regex.postmatch_pstr(),
                    n if n >= 10 => ctx.regex.capture_pstr((n - 10) as usize),
                    _ => None,
                };
                let cell = match value {
                    Some(text) => ScalarCell::new_read_only(Scalar::Str(text)),
                    None => sv_undef(),
                };
                frame.set_reg(r, cell);
            }
            Opcode::LOCAL_GLOBAL_SCALAR => {
                let c = read_u16(bytes, &mut pc);
                let name = code.constants[c as usize].get_str().to_text().into_owned();
                let glob = ctx.symbols.glob(&name);
                ctx.scopes.push(SaveRecord::GlobScalar {
                    glob: glob.clone(),
                    saved: glob.scalar_slot(),
                });
                glob.set_scalar_cell(sv_fresh_undef());
            }
            Opcode::LOCAL_GLOBAL_ARRAY => {
                let c = read_u16(bytes, &mut pc);
                let name = code.constants[c as usize].get_str().to_text().into_owned();
                let glob = ctx.symbols.glob(&name);
                ctx.scopes.push(SaveRecord::GlobArray {
                    glob: glob.clone(),
                    saved: glob.array_slot(),
                });
                glob.set_array(Rc::new(RefCell::new(Array::new())));
            }
            Opcode::LOCAL_GLOBAL_HASH => {
                let c = read_u16(bytes, &mut pc);
                let name = code.constants[c as usize].get_str().to_text().into_owned();
                let glob = ctx.symbols.glob(&name);
                ctx.scopes.push(SaveRecord::GlobHash {
                    glob: glob.clone(),
                    saved: glob.hash_slot(),
                });
                glob.set_hash(Rc::new(RefCell::new(Hash::new())));
            }
            Opcode::LOCAL_HASH_ELEM => {
                let h = read_u8(bytes, &mut pc);
                let k = read_u8(bytes, &mut pc);
                let hash = match ops::hash_of(frame.reg(h)) {
                    Ok(hash) => hash,
                    Err(e) => fail!(op_pc, e),
                };
                let key = frame.reg(k).get_str();
                let saved = hash.borrow().get(&key);
                ctx.scopes.push(SaveRecord::HashElem {
                    hash: hash.clone(),
                    key: key.clone(),
                    saved,
                });
                hash.borrow_mut().insert_cell(key, sv_fresh_undef());
            }
            Opcode::LOCAL_ARRAY_ELEM => {
                let a = read_u8(bytes, &mut pc);
                let i = read_u8(bytes, &mut pc);
                let array = match ops::list_of(frame.reg(a)) {
                    Ok(array) => array,
                    Err(e) => fail!(op_pc, e),
                };
                let index = frame.reg(i).get_int();
                let saved = array.borrow().get(index);
                ctx.scopes.push(SaveRecord::ArrayElem {
                    array: array.clone(),
                    index,
                    saved,
                });
                let cell = array.borrow_mut().get_lvalue(index);
                if let Some(cell) = cell {
                    let _ = cell.set(Scalar::Undef);
                }
            }

            Opcode::ADD
            | Opcode::SUB
            | Opcode::MUL
            | Opcode::DIV
            | Opcode::MOD
            | Opcode::POW
            | Opcode::CONCAT
            | Opcode::REPEAT
            | Opcode::NUM_EQ
            | Opcode::NUM_NE
            | Opcode::NUM_LT
            | Opcode::NUM_LE
            | Opcode::NUM_GT
            | Opcode::NUM_GE
            | Opcode::NUM_CMP
            | Opcode::STR_EQ
            | Opcode::STR_NE
            | Opcode::STR_LT
            | Opcode::STR_LE
            | Opcode::STR_GT
            | Opcode::STR_GE
            | Opcode::STR_CMP
            | Opcode::BIT_AND
            | Opcode::BIT_OR
            | Opcode::BIT_XOR
            | Opcode::SHIFT_LEFT
            | Opcode::SHIFT_RIGHT => {
                let dst = read_u8(bytes, &mut pc);
                let a = read_u8(bytes, &mut pc);
                let b = read_u8(bytes, &mut pc);
                let binop = opcode_binop(op);
                let lhs = frame.reg(a).clone();
                let rhs = frame.reg(b).clone();
                match ops::binary(ctx, binop, &lhs, &rhs) {
                    Ok(result) => frame.set_reg(dst, result),
                    Err(e) => fail!(op_pc, e),
                }
            }
            Opcode::ADD_SCALAR_INT => {
                let dst = read_u8(bytes, &mut pc);
                let a = read_u8(bytes, &mut pc);
                let v = read_i32(bytes, &mut pc);
                // fast path for plain integers, shared by the host JIT
                let fast = match &*frame.reg(a).borrow() {
                    Scalar::Int(x) => x.checked_add(v as i64),
                    _ => None,
                };
                match fast {
                    Some(sum) => frame.set_reg(dst, sv_num(Num::Int(sum))),
                    None => {
                        let lhs = frame.reg(a).clone();
                        let rhs = sv_num(Num::Int(v as i64));
                        match ops::binary(ctx, BinOp::Add, &lhs, &rhs) {
                            Ok(result) => frame.set_reg(dst, result),
                            Err(e) => fail!(op_pc, e),
                        }
                    }
                }
            }
            Opcode::NEG => {
                let dst = read_u8(bytes, &mut pc);
                let a = read_u8(bytes, &mut pc);
                let lhs = frame.reg(a).clone();
                match ops::numify(ctx, &lhs) {
                    Ok(num) => frame.set_reg(dst, sv_num(crate::values::numeric::neg(&num))),
                    Err(e) => fail!(op_pc, e),
                }
            }
            Opcode::INC => {
                let r = read_u8(bytes, &mut pc);
                if let Err(e) = ops::increment(frame.reg(r)) {
                    fail!(op_pc, e);
                }
            }
            Opcode::DEC => {
                let r = read_u8(bytes, &mut pc);
                if let Err(e) = ops::decrement(frame.reg(r)) {
                    fail!(op_pc, e);
                }
            }
            Opcode::BIT_NOT => {
                let dst = read_u8(bytes, &mut pc);
                let a = read_u8(bytes, &mut pc);
                let lhs = frame.reg(a).clone();
                match ops::numify(ctx, &lhs) {
                    Ok(num) => {
                        frame.set_reg(dst, sv_num(crate::values::numeric::bit_not(&num)))
                    }
                    Err(e) => fail!(op_pc, e),
                }
            }
            Opcode::NOT => {
                let dst = read_u8(bytes, &mut pc);
                let a = read_u8(bytes, &mut pc);
                let operand = frame.reg(a).clone();
                match ops::truthy(ctx, &operand) {
                    Ok(b) => frame.set_reg(dst, sv_bool(!b)),
                    Err(e) => fail!(op_pc, e),
                }
            }
            Opcode::DEFINED => {
                let dst = read_u8(bytes, &mut pc);
                let a = read_u8(bytes, &mut pc);
                let defined = frame.reg(a).is_defined();
                frame.set_reg(dst, sv_bool(defined));
            }
            Opcode::REF_KIND => {
                let dst = read_u8(bytes, &mut pc);
                let a = read_u8(bytes, &mut pc);
                let text = match &*frame.reg(a).borrow() {
                    Scalar::Ref(r) => r.blessed().unwrap_or_else(|| r.kind_name().into()),
                    Scalar::Code(_) => "CODE".into(),
                    _ => String::new(),
                };
                frame.set_reg(dst, ScalarCell::new(Scalar::Str(PStr::from_text(&text))));
            }

            Opcode::ADD_ASSIGN
            | Opcode::SUB_ASSIGN
            | Opcode::MUL_ASSIGN
            | Opcode::DIV_ASSIGN
            | Opcode::MOD_ASSIGN
            | Opcode::POW_ASSIGN
            | Opcode::CONCAT_ASSIGN
            | Opcode::REPEAT_ASSIGN
            | Opcode::SHL_ASSIGN
            | Opcode::SHR_ASSIGN
            | Opcode::BIT_AND_ASSIGN
            | Opcode::BIT_OR_ASSIGN
            | Opcode::BIT_XOR_ASSIGN => {
                let lv = read_u8(bytes, &mut pc);
                let rv = read_u8(bytes, &mut pc);
                let binop = opcode_compound_binop(op);
                let target = frame.reg(lv).clone();
                let rhs = frame.reg(rv).clone();
                if let Err(e) = ops::compound_assign(ctx, binop, &target, &rhs) {
                    fail!(op_pc, e);
                }
            }
            Opcode::ADD_ASSIGN_INT => {
                let lv = read_u8(bytes, &mut pc);
                let v = read_i32(bytes, &mut pc);
                let target = frame.reg(lv).clone();
                let fast = match &*target.borrow() {
                    Scalar::Int(x) => x.checked_add(v as i64),
                    _ => None,
                };
                let fast = if target.is_read_only() || target.blessed().is_some() {
                    None
                } else {
                    fast
                };
                match fast {
                    Some(sum) => {
                        if let Err(e) = target.set(Scalar::Int(sum)) {
                            fail!(op_pc, e);
                        }
                    }
                    None => {
                        let rhs = sv_num(Num::Int(v as i64));
                        if let Err(e) = ops::compound_assign(ctx, BinOp::Add, &target, &rhs) {
                            fail!(op_pc, e);
                        }
                    }
                }
            }

            Opcode::LIST_NEW => {
                let r = read_u8(bytes, &mut pc);
                frame.set_reg(r, ops::new_list());
            }
            Opcode::HASH_NEW => {
                let r = read_u8(bytes, &mut pc);
                frame.set_reg(
                    r,
                    ScalarCell::new(Scalar::Ref(PerlRef::to_hash(Rc::new(RefCell::new(
                        Hash::new(),
                    ))))),
                );
            }
            Opcode::LIST_PUSH => {
                let l = read_u8(bytes, &mut pc);
                let v = read_u8(bytes, &mut pc);
                let list = match ops::list_of(frame.reg(l)) {
                    Ok(list) => list,
                    Err(e) => fail!(op_pc, e),
                };
                let value = frame.reg(v).get();
                list.borrow_mut().push_value(value);
            }
            Opcode::LIST_PUSH_CELL => {
                let l = read_u8(bytes, &mut pc);
                let v = read_u8(bytes, &mut pc);
                let list = match ops::list_of(frame.reg(l)) {
                    Ok(list) => list,
                    Err(e) => fail!(op_pc, e),
                };
                list.borrow_mut().push_cell(frame.reg(v).clone());
            }
            Opcode::LIST_FLATTEN => {
                let l = read_u8(bytes, &mut pc);
                let v = read_u8(bytes, &mut pc);
                let list = match ops::list_of(frame.reg(l)) {
                    Ok(list) => list,
                    Err(e) => fail!(op_pc, e),
                };
                if let Err(e) = ops::flatten_into(&list, frame.reg(v)) {
                    fail!(op_pc, e);
                }
            }
            Opcode::LIST_GET => {
                let dst = read_u8(bytes, &mut pc);
                let l = read_u8(bytes, &mut pc);
                let index = read_i32(bytes, &mut pc);
                let list = match ops::list_of(frame.reg(l)) {
                    Ok(list) => list,
                    Err(e) => fail!(op_pc, e),
                };
                let cell = list.borrow().get(index as i64);
                frame.set_reg(dst, cell.unwrap_or_else(sv_fresh_undef));
            }
            Opcode::LIST_SLICE => {
                let dst = read_u8(bytes, &mut pc);
                let l = read_u8(bytes, &mut pc);
                let from = read_i32(bytes, &mut pc);
                let list = match ops::list_of(frame.reg(l)) {
                    Ok(list) => list,
                    Err(e) => fail!(op_pc, e),
                };
                let out = Rc::new(RefCell::new(Array::new()));
                if from != i32::MAX {
                    let cells: Vec<Sv> = list.borrow().cells().to_vec();
                    for cell in cells.into_iter().skip(from.max(0) as usize) {
                        out.borrow_mut().push_cell(cell);
                    }
                }
                frame.set_reg(dst, ScalarCell::new(Scalar::Ref(PerlRef::to_array(out))));
            }
            Opcode::RANGE_TO_LIST => {
                let l = read_u8(bytes, &mut pc);
                let a = read_u8(bytes, &mut pc);
                let b = read_u8(bytes, &mut pc);
                let list = match ops::list_of(frame.reg(l)) {
                    Ok(list) => list,
                    Err(e) => fail!(op_pc, e),
                };
                let mut iter = make_range_iter(frame.reg(a), frame.reg(b));
                while let Some(cell) = iter.next() {
                    list.borrow_mut().push_value(cell.get());
                }
            }
            Opcode::ITER_FROM_RANGE => {
                let dst = read_u8(bytes, &mut pc);
                let a = read_u8(bytes, &mut pc);
                let b = read_u8(bytes, &mut pc);
                let iter = make_range_iter(frame.reg(a), frame.reg(b));
                frame.set_reg(
                    dst,
                    ScalarCell::new(Scalar::Iter(Rc::new(RefCell::new(iter)))),
                );
            }
            Opcode::ITER_CREATE => {
                let dst = read_u8(bytes, &mut pc);
                let l = read_u8(bytes, &mut pc);
                let list = match ops::list_of(frame.reg(l)) {
                    Ok(list) => list,
                    Err(e) => fail!(op_pc, e),
                };
                let cells: Vec<Sv> = list.borrow().cells().to_vec();
                frame.set_reg(
                    dst,
                    ScalarCell::new(Scalar::Iter(Rc::new(RefCell::new(
                        PerlIter::over_cells(cells),
                    )))),
                );
            }
            Opcode::FOREACH_NEXT_OR_EXIT => {
                let var = read_u8(bytes, &mut pc);
                let it = read_u8(bytes, &mut pc);
                let exit = read_u32(bytes, &mut pc);
                // defensive: a mistyped register must raise TypeError, not
                // a raw cast failure
                let iter = match &*frame.reg(it).borrow() {
                    Scalar::Iter(iter) => iter.clone(),
                    other => fail!(
                        op_pc,
                        PerlError::new(
                            ErrorKind::TypeError,
                            format!(
                                "foreach iterator register holds {} instead of an iterator",
                                other.type_name()
                            )
                        )
                    ),
                };
                let next = iter.borrow_mut().next();
                match next {
                    Some(cell) => frame.set_reg(var, cell),
                    None => pc = exit as usize,
                }
            }
            Opcode::ARRAY_LEN => {
                let dst = read_u8(bytes, &mut pc);
                let a = read_u8(bytes, &mut pc);
                let array = match ops::list_of(frame.reg(a)) {
                    Ok(array) => array,
                    Err(e) => fail!(op_pc, e),
                };
                let len = array.borrow().len() as i64;
                frame.set_reg(dst, sv_num(Num::Int(len)));
            }
            Opcode::ARRAY_LAST_INDEX => {
                let dst = read_u8(bytes, &mut pc);
                let a = read_u8(bytes, &mut pc);
                let array = match ops::list_of(frame.reg(a)) {
                    Ok(array) => array,
                    Err(e) => fail!(op_pc, e),
                };
                let last = array.borrow().len() as i64 - 1;
                frame.set_reg(dst, sv_num(Num::Int(last)));
            }
            Opcode::ARRAY_GET | Opcode::ARRAY_GET_LV => {
                let dst = read_u8(bytes, &mut pc);
                let a = read_u8(bytes, &mut pc);
                let i = read_u8(bytes, &mut pc);
                let array = match ops::list_of(frame.reg(a)) {
                    Ok(array) => array,
                    Err(e) => fail!(op_pc, e),
                };
                let index = frame.reg(i).get_int();
                let cell = if op == Opcode::ARRAY_GET {
                    array.borrow().get(index)
                } else {
                    array.borrow_mut().get_lvalue(index)
                };
                frame.set_reg(dst, cell.unwrap_or_else(sv_fresh_undef));
            }
            Opcode::ARRAY_SET => {
                let a = read_u8(bytes, &mut pc);
                let i = read_u8(bytes, &mut pc);
                let v = read_u8(bytes, &mut pc);
                let array = match ops::list_of(frame.reg(a)) {
                    Ok(array) => array,
                    Err(e) => fail!(op_pc, e),
                };
                let index = frame.reg(i).get_int();
                let cell = array.borrow_mut().get_lvalue(index);
                if let Some(cell) = cell {
                    if let Err(e) = cell.set(frame.reg(v).get()) {
                        fail!(op_pc, e);
                    }
                }
            }
            Opcode::ARRAY_EXISTS => {
                let dst = read_u8(bytes, &mut pc);
                let a = read_u8(bytes, &mut pc);
                let i = read_u8(bytes, &mut pc);
                let array = match ops::list_of(frame.reg(a)) {
                    Ok(array) => array,
                    Err(e) => fail!(op_pc, e),
                };
                let index = frame.reg(i).get_int();
                let exists = array.borrow().exists(index);
                frame.set_reg(dst, sv_bool(exists));
            }
            Opcode::ARRAY_DELETE => {
                let dst = read_u8(bytes, &mut pc);
                let a = read_u8(bytes, &mut pc);
                let i = read_u8(bytes, &mut pc);
                let array = match ops::list_of(frame.reg(a)) {
                    Ok(array) => array,
                    Err(e) => fail!(op_pc, e),
                };
                let index = frame.reg(i).get_int();
                let removed = array.borrow_mut().delete(index);
                frame.set_reg(dst, removed.unwrap_or_else(sv_fresh_undef));
            }
            Opcode::ARRAY_PUSH | Opcode::ARRAY_UNSHIFT => {
                let dst = read_u8(bytes, &mut pc);
                let a = read_u8(bytes, &mut pc);
                let l = read_u8(bytes, &mut pc);
                let array = match ops::list_of(frame.reg(a)) {
                    Ok(array) => array,
                    Err(e) => fail!(op_pc, e),
                };
                let values: Vec<Scalar> = match ops::list_of(frame.reg(l)) {
                    Ok(list) => list.borrow().iter().map(|c| c.get()).collect(),
                    Err(e) => fail!(op_pc, e),
                };
                {
                    let mut array = array.borrow_mut();
                    if op == Opcode::ARRAY_PUSH {
                        for value in values {
                            array.push_value(value);
                        }
                    } else {
                        for value in values.into_iter().rev() {
                            array.unshift_value(value);
                        }
                    }
                }
                let len = array.borrow().len() as i64;
                frame.set_reg(dst, sv_num(Num::Int(len)));
            }
            Opcode::ARRAY_POP | Opcode::ARRAY_SHIFT => {
                let dst = read_u8(bytes, &mut pc);
                let a = read_u8(bytes, &mut pc);
                let array = match ops::list_of(frame.reg(a)) {
                    Ok(array) => array,
                    Err(e) => fail!(op_pc, e),
                };
                let cell = if op == Opcode::ARRAY_POP {
                    array.borrow_mut().pop()
                } else {
                    array.borrow_mut().shift()
                };
                frame.set_reg(dst, cell.unwrap_or_else(sv_undef));
            }
            Opcode::ARRAY_ASSIGN => {
                let a = read_u8(bytes, &mut pc);
                let l = read_u8(bytes, &mut pc);
                let array = match ops::list_of(frame.reg(a)) {
                    Ok(array) => array,
                    Err(e) => fail!(op_pc, e),
                };
                let values: Vec<Scalar> = match ops::list_of(frame.reg(l)) {
                    Ok(list) => list.borrow().iter().map(|c| c.get()).collect(),
                    Err(e) => fail!(op_pc, e),
                };
                array.borrow_mut().replace_with_values(values);
            }

            Opcode::HASH_GET | Opcode::HASH_GET_LV => {
                let dst = read_u8(bytes, &mut pc);
                let h = read_u8(bytes, &mut pc);
                let k = read_u8(bytes, &mut pc);
                let hash = match ops::hash_of(frame.reg(h)) {
                    Ok(hash) => hash,
                    Err(e) => fail!(op_pc, e),
                };
                let key = frame.reg(k).get_str();
                let cell = if op == Opcode::HASH_GET {
                    hash.borrow().get(&key)
                } else {
                    Some(hash.borrow_mut().get_lvalue(key))
                };
                frame.set_reg(dst, cell.unwrap_or_else(sv_fresh_undef));
            }
            Opcode::HASH_SET => {
                let h = read_u8(bytes, &mut pc);
                let k = read_u8(bytes, &mut pc);
                let v = read_u8(bytes, &mut pc);
                let hash = match ops::hash_of(frame.reg(h)) {
                    Ok(hash) => hash,
                    Err(e) => fail!(op_pc, e),
                };
                let key = frame.reg(k).get_str();
                hash.borrow_mut().insert_value(key, frame.reg(v).get());
            }
            Opcode::HASH_DELETE => {
                let dst = read_u8(bytes, &mut pc);
                let h = read_u8(bytes, &mut pc);
                let k = read_u8(bytes, &mut pc);
                let hash = match ops::hash_of(frame.reg(h)) {
                    Ok(hash) => hash,
                    Err(e) => fail!(op_pc, e),
                };
                let key = frame.reg(k).get_str();
                let removed = hash.borrow_mut().delete(&key);
                frame.set_reg(dst, removed.unwrap_or_else(sv_fresh_undef));
            }
            Opcode::HASH_EXISTS => {
                let dst = read_u8(bytes, &mut pc);
                let h = read_u8(bytes, &mut pc);
                let k = read_u8(bytes, &mut pc);
                let hash = match ops::hash_of(frame.reg(h)) {
                    Ok(hash) => hash,
                    Err(e) => fail!(op_pc, e),
                };
                let key = frame.reg(k).get_str();
                let exists = hash.borrow().exists(&key);
                frame.set_reg(dst, sv_bool(exists));
            }
            Opcode::HASH_KEYS | Opcode::HASH_VALUES => {
                let dst = read_u8(bytes, &mut pc);
                let h = read_u8(bytes, &mut pc);
                let hash = match ops::hash_of(frame.reg(h)) {
                    Ok(hash) => hash,
                    Err(e) => fail!(op_pc, e),
                };
                let out = Rc::new(RefCell::new(Array::new()));
                if op == Opcode::HASH_KEYS {
                    for key in hash.borrow_mut().keys() {
                        out.borrow_mut().push_value(Scalar::Str(key));
                    }
                } else {
                    for cell in hash.borrow_mut().values() {
                        out.borrow_mut().push_value(cell.get());
                    }
                }
                frame.set_reg(dst, ScalarCell::new(Scalar::Ref(PerlRef::to_array(out))));
            }
            Opcode::HASH_EACH => {
                let dst = read_u8(bytes, &mut pc);
                let h = read_u8(bytes, &mut pc);
                let hash = match ops::hash_of(frame.reg(h)) {
                    Ok(hash) => hash,
                    Err(e) => fail!(op_pc, e),
                };
                let out = Rc::new(RefCell::new(Array::new()));
                if let Some((key, value)) = hash.borrow_mut().each() {
                    out.borrow_mut().push_value(Scalar::Str(key));
                    out.borrow_mut().push_value(value.get());
                }
                frame.set_reg(dst, ScalarCell::new(Scalar::Ref(PerlRef::to_array(out))));
            }
            Opcode::HASH_ASSIGN => {
                let h = read_u8(bytes, &mut pc);
                let l = read_u8(bytes, &mut pc);
                let hash = match ops::hash_of(frame.reg(h)) {
                    Ok(hash) => hash,
                    Err(e) => fail!(op_pc, e),
                };
                let cells: Vec<Sv> = match ops::list_of(frame.reg(l)) {
                    Ok(list) => list.borrow().cells().to_vec(),
                    Err(e) => fail!(op_pc, e),
                };
                let mut pairs = Vec::new();
                let mut it = cells.into_iter();
                while let Some(key) = it.next() {
                    let value = it.next().map(|c| c.get()).unwrap_or(Scalar::Undef);
                    pairs.push((key.get_str(), value));
                }
                hash.borrow_mut().replace_with_pairs(pairs);
            }
            Opcode::GLOB_ASSIGN => {
                let c = read_u16(bytes, &mut pc);
                let r = read_u8(bytes, &mut pc);
                let name = code.constants[c as usize].get_str().to_text().into_owned();
                let glob = ctx.symbols.glob(&name);
                let value = frame.reg(r).get();
                match &value {
                    Scalar::Code(found) => glob.set_code(found.clone()),
                    Scalar::Ref(reference) => match &reference.target {
                        RefTarget::Code(found) => glob.set_code(found.clone()),
                        RefTarget::Array(array) => glob.set_array(array.clone()),
                        RefTarget::Hash(hash) => glob.set_hash(hash.clone()),
                        RefTarget::Scalar(cell) => glob.set_scalar_cell(cell.clone()),
                        RefTarget::Glob(_) => {}
                    },
                    Scalar::Glob(other) => {
                        if let Some(slot) = other.scalar_slot() {
                            glob.set_scalar_cell(slot);
                        }
                        if let Some(slot) = other.array_slot() {
                            glob.set_array(slot);
                        }
                        if let Some(slot) = other.hash_slot() {
                            glob.set_hash(slot);
                        }
                        if let Some(slot) = other.code() {
                            glob.set_code(slot);
                        }
                    }
                    _ => fail!(
                        op_pc,
                        PerlError::new(
                            ErrorKind::TypeError,
                            "Can't assign a non-reference to a typeglob"
                        )
                    ),
                }
            }

            Opcode::MAKE_REF => {
                let dst = read_u8(bytes, &mut pc);
                let r = read_u8(bytes, &mut pc);
                let target = frame.reg(r).clone();
                let value = {
                    let inner = target.borrow();
                    match &*inner {
                        Scalar::Code(found) => Scalar::Ref(PerlRef::to_code(found.clone())),
                        _ => Scalar::Ref(PerlRef::to_scalar(target.clone())),
                    }
                };
                frame.set_reg(dst, ScalarCell::new(value));
            }
            Opcode::ANON_ARRAY => {
                let dst = read_u8(bytes, &mut pc);
                let l = read_u8(bytes, &mut pc);
                let values: Vec<Scalar> = match ops::list_of(frame.reg(l)) {
                    Ok(list) => list.borrow().iter().map(|c| c.get()).collect(),
                    Err(e) => fail!(op_pc, e),
                };
                let array = Rc::new(RefCell::new(Array::from_values(values)));
                frame.set_reg(dst, ScalarCell::new(Scalar::Ref(PerlRef::to_array(array))));
            }
            Opcode::ANON_HASH => {
                let dst = read_u8(bytes, &mut pc);
                let l = read_u8(bytes, &mut pc);
                let cells: Vec<Sv> = match ops::list_of(frame.reg(l)) {
                    Ok(list) => list.borrow().cells().to_vec(),
                    Err(e) => fail!(op_pc, e),
                };
                let mut hash = Hash::new();
                let mut it = cells.into_iter();
                while let Some(key) = it.next() {
                    let value = it.next().map(|c| c.get()).unwrap_or(Scalar::Undef);
                    hash.insert_value(key.get_str(), value);
                }
                frame.set_reg(
                    dst,
                    ScalarCell::new(Scalar::Ref(PerlRef::to_hash(Rc::new(RefCell::new(hash))))),
                );
            }
            Opcode::DEREF_SCALAR => {
                let dst = read_u8(bytes, &mut pc);
                let r = read_u8(bytes, &mut pc);
                let cell = {
                    let inner = frame.reg(r).borrow();
                    match &*inner {
                        Scalar::Ref(reference) => reference.deref_scalar(),
                        Scalar::Undef => Err(ValueError::WrongRefKind("a SCALAR")),
                        _ => Err(ValueError::WrongRefKind("a SCALAR")),
                    }
                };
                match cell {
                    Ok(cell) => frame.set_reg(dst, cell),
                    Err(e) => fail!(op_pc, e),
                }
            }
            Opcode::DEREF_ARRAY | Opcode::DEREF_ARRAY_LV => {
                let dst = read_u8(bytes, &mut pc);
                let r = read_u8(bytes, &mut pc);
                let source = frame.reg(r).clone();
                let lvalue = op == Opcode::DEREF_ARRAY_LV;
                match deref_array(&source, lvalue) {
                    Ok(array) => frame
                        .set_reg(dst, ScalarCell::new(Scalar::Ref(PerlRef::to_array(array)))),
                    Err(e) => fail!(op_pc, e),
                }
            }
            Opcode::DEREF_HASH | Opcode::DEREF_HASH_LV => {
                let dst = read_u8(bytes, &mut pc);
                let r = read_u8(bytes, &mut pc);
                let source = frame.reg(r).clone();
                let lvalue = op == Opcode::DEREF_HASH_LV;
                match deref_hash(&source, lvalue) {
                    Ok(hash) => {
                        frame.set_reg(dst, ScalarCell::new(Scalar::Ref(PerlRef::to_hash(hash))))
                    }
                    Err(e) => fail!(op_pc, e),
                }
            }
            Opcode::DEREF_CODE => {
                let dst = read_u8(bytes, &mut pc);
                let r = read_u8(bytes, &mut pc);
                match resolve_code(ctx, frame.reg(r)) {
                    Ok(found) => frame.set_reg(dst, ScalarCell::new(Scalar::Code(found))),
                    Err(e) => fail!(op_pc, e),
                }
            }
            Opcode::BLESS => {
                let dst = read_u8(bytes, &mut pc);
                let r = read_u8(bytes, &mut pc);
                let p = read_u8(bytes, &mut pc);
                let package = frame.reg(p).get_str().to_text().into_owned();
                let target = frame.reg(r).clone();
                {
                    let inner = target.borrow();
                    match &*inner {
                        Scalar::Ref(reference) => reference.bless(&package),
                        _ => fail!(
                            op_pc,
                            PerlError::new(
                                ErrorKind::TypeError,
                                "Can't bless non-reference value"
                            )
                        ),
                    }
                }
                frame.set_reg(dst, target);
            }

            Opcode::MAKE_CLOSURE => {
                let dst = read_u8(bytes, &mut pc);
                let c = read_u16(bytes, &mut pc);
                let template = match &*code.constants[c as usize].borrow() {
                    Scalar::Code(template) => template.clone(),
                    _ => fail!(
                        op_pc,
                        PerlError::new(ErrorKind::Compile, "Corrupt closure template")
                    ),
                };
                let cells: Vec<Sv> = template
                    .compiled
                    .captured
                    .iter()
                    .map(|cv| frame.reg(cv.outer_reg).clone())
                    .collect();
                let closure = Rc::new(Code::with_captured(
                    template.compiled.clone(),
                    template.name.clone(),
                    cells,
                ));
                frame.set_reg(dst, ScalarCell::new(Scalar::Code(closure)));
            }
            Opcode::CALL => {
                let dst = read_u8(bytes, &mut pc);
                let f = read_u8(bytes, &mut pc);
                let a = read_u8(bytes, &mut pc);
                let wants = read_u8(bytes, &mut pc);
                let callee = match resolve_code(ctx, frame.reg(f)) {
                    Ok(found) => found,
                    Err(e) => fail!(op_pc, e),
                };
                let args = match ops::list_of(frame.reg(a)) {
                    Ok(list) => list,
                    Err(e) => fail!(op_pc, e),
                };
                let underscore = frame.reg(1).clone();
                match call_code(ctx, callee, args, Some(underscore), wants == CTX_LIST) {
                    Ok(result) => frame.set_reg(dst, result),
                    Err(e) => fail!(op_pc, e),
                }
                match resolve_marker(ctx, code, &mut frame, op_pc as u32) {
                    Unwind::Continue => {}
                    Unwind::Jump(t) => pc = t as usize,
                    Unwind::ExitFrame => return Ok(()),
                }
            }
            Opcode::METHOD_CALL => {
                let dst = read_u8(bytes, &mut pc);
                let inv = read_u8(bytes, &mut pc);
                let m = read_u16(bytes, &mut pc);
                let a = read_u8(bytes, &mut pc);
                let wants = read_u8(bytes, &mut pc);
                let method = code.constants[m as usize].get_str().to_text().into_owned();
                let invocant = frame.reg(inv).clone();
                let class = {
                    let inner = invocant.borrow();
                    match &*inner {
                        Scalar::Ref(reference) => reference.blessed(),
                        Scalar::Str(s) => Some(s.to_text().into_owned()),
                        _ => None,
                    }
                };
                let class = match class {
                    Some(class) => class,
                    None => fail!(
                        op_pc,
                        PerlError::new(
                            ErrorKind::TypeError,
                            format!(
                                "Can't call method \"{}\" on unblessed reference",
                                method
                            )
                        )
                    ),
                };
                let callee = match ctx.find_method(&class, &method) {
                    Some(found) => found,
                    None => fail!(
                        op_pc,
                        PerlError::new(
                            ErrorKind::UserDie,
                            format!(
                                "Can't locate object method \"{}\" via package \"{}\"",
                                method, class
                            )
                        )
                    ),
                };
                let args = match ops::list_of(frame.reg(a)) {
                    Ok(list) => list,
                    Err(e) => fail!(op_pc, e),
                };
                let underscore = frame.reg(1).clone();
                match call_code(ctx, callee, args, Some(underscore), wants == CTX_LIST) {
                    Ok(result) => frame.set_reg(dst, result),
                    Err(e) => fail!(op_pc, e),
                }
                match resolve_marker(ctx, code, &mut frame, op_pc as u32) {
                    Unwind::Continue => {}
                    Unwind::Jump(t) => pc = t as usize,
                    Unwind::ExitFrame => return Ok(()),
                }
            }
            Opcode::EVAL_CALL => {
                let dst = read_u8(bytes, &mut pc);
                let f = read_u8(bytes, &mut pc);
                let wants = read_u8(bytes, &mut pc);
                let callee = match resolve_code(ctx, frame.reg(f)) {
                    Ok(found) => found,
                    Err(e) => fail!(op_pc, e),
                };
                let args = match ops::list_of(frame.reg(0)) {
                    Ok(list) => list,
                    Err(_) => Rc::new(RefCell::new(Array::new())),
                };
                let underscore = frame.reg(1).clone();
                let result = call_code(ctx, callee, args, Some(underscore), wants == CTX_LIST);
                frame.set_reg(dst, eval_result(ctx, result, wants == CTX_LIST));
                match resolve_marker(ctx, code, &mut frame, op_pc as u32) {
                    Unwind::Continue => {}
                    Unwind::Jump(t) => pc = t as usize,
                    Unwind::ExitFrame => return Ok(()),
                }
            }
            Opcode::EVAL_STRING => {
                let dst = read_u8(bytes, &mut pc);
                let s = read_u8(bytes, &mut pc);
                let d = read_u16(bytes, &mut pc);
                let wants = read_u8(bytes, &mut pc);
                let source = frame.reg(s).get_str().to_text().into_owned();
                let scope = &code.eval_scopes[d as usize];
                let result = eval_string(ctx, code, &frame, &source, scope, wants == CTX_LIST);
                frame.set_reg(dst, eval_result(ctx, result, wants == CTX_LIST));
                match resolve_marker(ctx, code, &mut frame, op_pc as u32) {
                    Unwind::Continue => {}
                    Unwind::Jump(t) => pc = t as usize,
                    Unwind::ExitFrame => return Ok(()),
                }
            }
            Opcode::CALL_BUILTIN => {
                let dst = read_u8(bytes, &mut pc);
                let b = read_u16(bytes, &mut pc);
                let a = read_u8(bytes, &mut pc);
                let wants = read_u8(bytes, &mut pc);
                let builtin = match Builtin::try_from(b) {
                    Ok(builtin) => builtin,
                    Err(_) => fail!(
                        op_pc,
                        PerlError::new(ErrorKind::Compile, "Unknown builtin id")
                    ),
                };
                let args = match ops::list_of(frame.reg(a)) {
                    Ok(list) => list,
                    Err(e) => fail!(op_pc, e),
                };
                match builtins::call(ctx, builtin, &args, wants == CTX_LIST) {
                    Ok(result) => frame.set_reg(dst, result),
                    Err(e) => fail!(op_pc, e),
                }
                match resolve_marker(ctx, code, &mut frame, op_pc as u32) {
                    Unwind::Continue => {}
                    Unwind::Jump(t) => pc = t as usize,
                    Unwind::ExitFrame => return Ok(()),
                }
            }
            Opcode::INSTALL_OVERLOAD => {
                let c = read_u16(bytes, &mut pc);
                let l = read_u8(bytes, &mut pc);
                let package = code.constants[c as usize].get_str().to_text().into_owned();
                let cells: Vec<Sv> = match ops::list_of(frame.reg(l)) {
                    Ok(list) => list.borrow().cells().to_vec(),
                    Err(e) => fail!(op_pc, e),
                };
                let mut it = cells.into_iter();
                while let Some(name) = it.next() {
                    let op_name = name.get_str().to_text().into_owned();
                    let target = match it.next() {
                        Some(cell) => cell,
                        None => break,
                    };
                    match resolve_code(ctx, &target) {
                        Ok(found) => {
                            let glob_name = crate::values::overload::overload_glob_name(
                                &package, &op_name,
                            );
                            ctx.symbols.set_code(&glob_name, found);
                        }
                        Err(e) => fail!(op_pc, e),
                    }
                }
            }

            Opcode::MATCH_SCALAR => {
                let dst = read_u8(bytes, &mut pc);
                let t = read_u8(bytes, &mut pc);
                let p = read_u16(bytes, &mut pc);
                let flags = read_u8(bytes, &mut pc);
                let encoded = code.constants[p as usize].get_str();
                let pattern = match ops::compile_pattern_const(ctx, &encoded) {
                    Ok(pattern) => pattern,
                    Err(e) => fail!(op_pc, e),
                };
                let target = frame.reg(t).clone();
                match ops::match_scalar(ctx, &target, &pattern, flags) {
                    Ok(matched) => frame.set_reg(dst, sv_bool(matched)),
                    Err(e) => fail!(op_pc, e),
                }
            }
            Opcode::MATCH_LIST => {
                let dst = read_u8(bytes, &mut pc);
                let t = read_u8(bytes, &mut pc);
                let p = read_u16(bytes, &mut pc);
                let flags = read_u8(bytes, &mut pc);
                let encoded = code.constants[p as usize].get_str();
                let pattern = match ops::compile_pattern_const(ctx, &encoded) {
                    Ok(pattern) => pattern,
                    Err(e) => fail!(op_pc, e),
                };
                let target = frame.reg(t).clone();
                match ops::match_list(ctx, &target, &pattern, flags) {
                    Ok(list) => frame
                        .set_reg(dst, ScalarCell::new(Scalar::Ref(PerlRef::to_array(list)))),
                    Err(e) => fail!(op_pc, e),
                }
            }
            Opcode::SUBST => {
                let dst = read_u8(bytes, &mut pc);
                let t = read_u8(bytes, &mut pc);
                let p = read_u16(bytes, &mut pc);
                let r = read_u16(bytes, &mut pc);
                let flags = read_u8(bytes, &mut pc);
                let encoded = code.constants[p as usize].get_str();
                let replacement = code.constants[r as usize].get_str();
                let pattern = match ops::compile_pattern_const(ctx, &encoded) {
                    Ok(pattern) => pattern,
                    Err(e) => fail!(op_pc, e),
                };
                let target = frame.reg(t).clone();
                match ops::substitute(ctx, &target, &pattern, &replacement, flags) {
                    Ok(count) if count > 0 => frame.set_reg(dst, sv_num(Num::Int(count))),
                    Ok(_) => frame.set_reg(dst, sv_bool(false)),
                    Err(e) => fail!(op_pc, e),
                }
            }
        }
    }
    Ok(())
}

/// Probes the control-flow registry against the loops enclosing `pc`,
/// innermost first. A matching loop marker unwinds the frame's dynamic
/// scopes to the loop's depth and continues at the loop's target; anything
/// else leaves the frame with the marker still set.
fn resolve_marker(
    ctx: &mut RuntimeContext,
    code: &InterpretedCode,
    frame: &mut Frame,
    pc: u32,
) -> Unwind {
    if !ctx.control.is_set() {
        return Unwind::Continue;
    }
    if matches!(
        ctx.control.peek(),
        Some(ControlMarker::Return(_)) | Some(ControlMarker::GotoSub(_))
    ) {
        return Unwind::ExitFrame;
    }
    let targets: Vec<(Option<String>, u32, u32, u32, u32)> = code
        .loops_at(pc)
        .into_iter()
        .map(|info| {
            (
                info.label.clone(),
                info.redo_pc,
                info.next_pc,
                info.last_pc,
                info.scope_depth,
            )
        })
        .collect();
    for (label, redo_pc, next_pc, last_pc, scope_depth) in targets {
        if let Some(signal) = ctx.control.take_if_loop(label.as_deref()) {
            while frame.dyn_marks.len() > scope_depth as usize {
                if let Some(mark) = frame.dyn_marks.pop() {
                    ctx.exit_dynamic_scope(mark);
                }
            }
            let target = match signal {
                LoopSignal::Redo => redo_pc,
                LoopSignal::Next => next_pc,
                LoopSignal::Last => last_pc,
            };
            return Unwind::Jump(target);
        }
    }
    Unwind::ExitFrame
}

/// Converts an eval outcome into its value and the `$@` contract: `$@`
/// clears on success and carries the error (message or intact reference)
/// on failure.
fn eval_result(
    ctx: &mut RuntimeContext,
    result: Result<Sv, PerlError>,
    list_context: bool,
) -> Sv {
    let errsv = ctx.symbols.scalar("main::@");
    match result {
        Ok(value) => {
            let _ = errsv.set(Scalar::Str(PStr::empty()));
            value
        }
        Err(err) => {
            let value = match &err.value {
                Some(cell) => cell.get(),
                None => Scalar::Str(PStr::from_text(&err.to_message())),
            };
            let _ = errsv.set(value);
            if list_context {
                ops::new_list()
            } else {
                sv_fresh_undef()
            }
        }
    }
}

/// The `eval STRING` pipeline: lex, parse and compile the source against
/// the lexical environment of the eval site, then run it as a catching
/// frame. Captured cells are pulled from the calling frame; non-scalar
/// payloads (iterator tokens) are filtered out.
fn eval_string(
    ctx: &mut RuntimeContext,
    code: &InterpretedCode,
    frame: &Frame,
    source: &str,
    scope: &crate::compiler::code::EvalScope,
    list_context: bool,
) -> Result<Sv, PerlError> {
    let program = parse_program(source, "(eval)").map_err(|err| {
        PerlError::from(err).located(&code.file, 0)
    })?;
    let compiled = compile_eval_string(&program, &scope.package, &scope.lexicals)?;
    let cells: Vec<Sv> = compiled
        .captured
        .iter()
        .map(|cv| {
            let cell = frame.reg(cv.outer_reg).clone();
            // an iterator token is not a Perl scalar
            if matches!(&*cell.borrow(), Scalar::Iter(_)) {
                sv_fresh_undef()
            } else {
                cell
            }
        })
        .collect();
    let callee = Rc::new(Code::with_captured(compiled, Some("eval".into()), cells));
    let args = Rc::new(RefCell::new(Array::new()));
    let underscore = frame.reg(1).clone();
    call_code(ctx, callee, args, Some(underscore), list_context)
}

/// A callable from a register: plain code value, code ref, or a scalar
/// ref chaining to one.
fn resolve_code(
    _ctx: &mut RuntimeContext,
    sv: &Sv,
) -> Result<Rc<Code>, ValueError> {
    match &*sv.borrow() {
        Scalar::Code(code) => Ok(code.clone()),
        Scalar::Ref(reference) => reference.deref_code(),
        _ => Err(ValueError::NotARef("CODE")),
    }
}

/// Array dereference. An undef cell autovivifies in l-value position; in
/// r-value position it reads as an unattached empty array so the chain
/// stays observable-free under `exists`/`defined`.
fn deref_array(
    sv: &Sv,
    lvalue: bool,
) -> Result<Rc<RefCell<Array>>, ValueError> {
    let existing = match &*sv.borrow() {
        Scalar::Ref(reference) => Some(reference.deref_array()),
        Scalar::Undef => None,
        _ => Some(Err(ValueError::WrongRefKind("an ARRAY"))),
    };
    match existing {
        Some(result) => result,
        None => {
            let array = Rc::new(RefCell::new(Array::new()));
            if lvalue {
                sv.set(Scalar::Ref(PerlRef::to_array(array.clone())))
                    .map_err(|_| ValueError::WrongRefKind("an ARRAY"))?;
            }
            Ok(array)
        }
    }
}

fn deref_hash(sv: &Sv, lvalue: bool) -> Result<Rc<RefCell<Hash>>, ValueError> {
    let existing = match &*sv.borrow() {
        Scalar::Ref(reference) => Some(reference.deref_hash()),
        Scalar::Undef => None,
        _ => Some(Err(ValueError::WrongRefKind("a HASH"))),
    };
    match existing {
        Some(result) => result,
        None => {
            let hash = Rc::new(RefCell::new(Hash::new()));
            if lvalue {
                sv.set(Scalar::Ref(PerlRef::to_hash(hash.clone())))
                    .map_err(|_| ValueError::WrongRefKind("a HASH"))?;
            }
            Ok(hash)
        }
    }
}

/// Numeric or magic-string range iterator construction.
fn make_range_iter(from: &Sv, to: &Sv) -> PerlIter {
    let string_range = {
        let a = from.borrow();
        let b = to.borrow();
        matches!((&*a, &*b), (Scalar::Str(x), Scalar::Str(y))
            if !x.is_empty() && !y.is_empty()
                && !crate::values::numeric::parse_numeric(&x.to_text()).clean
                && !crate::values::numeric::parse_numeric(&y.to_text()).clean)
    };
    if string_range {
        PerlIter::over_str_range(from.get_str(), to.get_str())
    } else {
        PerlIter::over_range(from.get_int(), to.get_int())
    }
}

fn opcode_binop(op: Opcode) -> BinOp {
    match op {
        Opcode::ADD => BinOp::Add,
        Opcode::SUB => BinOp::Sub,
        Opcode::MUL => BinOp::Mul,
        Opcode::DIV => BinOp::Div,
        Opcode::MOD => BinOp::Mod,
        Opcode::POW => BinOp::Pow,
        Opcode::CONCAT => BinOp::Concat,
        Opcode::REPEAT => BinOp::Repeat,
        Opcode::NUM_EQ => BinOp::NumEq,
        Opcode::NUM_NE => BinOp::NumNe,
        Opcode::NUM_LT => BinOp::NumLt,
        Opcode::NUM_LE => BinOp::NumLe,
        Opcode::NUM_GT => BinOp::NumGt,
        Opcode::NUM_GE => BinOp::NumGe,
        Opcode::NUM_CMP => BinOp::NumCmp,
        Opcode::STR_EQ => BinOp::StrEq,
        Opcode::STR_NE => BinOp::StrNe,
        Opcode::STR_LT => BinOp::StrLt,
        Opcode::STR_LE => BinOp::StrLe,
        Opcode::STR_GT => BinOp::StrGt,
        Opcode::STR_GE => BinOp::StrGe,
        Opcode::STR_CMP => BinOp::StrCmp,
        Opcode::BIT_AND => BinOp::BitAnd,
        Opcode::BIT_OR => BinOp::BitOr,
        Opcode::BIT_XOR => BinOp::BitXor,
        Opcode::SHIFT_LEFT => BinOp::Shl,
        _ => BinOp::Shr,
    }
}

fn opcode_compound_binop(op: Opcode) -> BinOp {
    match op {
        Opcode::ADD_ASSIGN => BinOp::Add,
        Opcode::SUB_ASSIGN => BinOp::Sub,
        Opcode::MUL_ASSIGN => BinOp::Mul,
        Opcode::DIV_ASSIGN => BinOp::Div,
        Opcode::MOD_ASSIGN => BinOp::Mod,
        Opcode::POW_ASSIGN => BinOp::Pow,
        Opcode::CONCAT_ASSIGN => BinOp::Concat,
        Opcode::REPEAT_ASSIGN => BinOp::Repeat,
        Opcode::SHL_ASSIGN => BinOp::Shl,
        Opcode::SHR_ASSIGN => BinOp::Shr,
        Opcode::BIT_AND_ASSIGN => BinOp::BitAnd,
        Opcode::BIT_OR_ASSIGN => BinOp::BitOr,
        _ => BinOp::BitXor,
    }
}

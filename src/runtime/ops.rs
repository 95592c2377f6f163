use std::cell::RefCell;
use std::rc::Rc;

use crate::compiler::{MATCH_FLAG_GLOBAL, MATCH_FLAG_NEGATED};
use crate::frontend::ast::BinOp;
use crate::global::error::{ErrorKind, PerlError, RegexError, ValueError};
use crate::regex::adapter::{byte_to_char_offset, char_to_byte_offset, CompiledPattern};
use crate::regex::preprocessor::PatternFlags;
use crate::runtime::context::RuntimeContext;
use crate::runtime::interpreter;
use crate::values::array::Array;
use crate::values::numeric::{self, Num};
use crate::values::overload::{compound_fallback, Overloadable};
use crate::values::scalar::{
    sv_bool, sv_fresh_undef, sv_num, Scalar, ScalarCell, Sv,
};
use crate::values::string::PStr;

use crate::compiler::operators::binop_overload_name;

/// Truth of a value; blessed references consult `bool`, `""`, `0+`
/// overloads in that order before defaulting to true.
pub fn truthy(ctx: &mut RuntimeContext, sv: &Sv) -> Result<bool, PerlError> {
    let blessed_ref = match &*sv.borrow() {
        Scalar::Ref(r) if r.blessed().is_some() => Some(r.clone()),
        _ => None,
    };
    if let Some(r) = blessed_ref {
        for op in ["bool", "\"\"", "0+"] {
            if let Some(code) = r.overload_for(ctx, op) {
                let result = call_overload(ctx, &code, &[sv.clone()])?;
                return Ok(result.get_bool());
            }
        }
        return Ok(true);
    }
    Ok(sv.get_bool())
}

/// String of a value; blessed references consult the `""` overload.
pub fn stringify(ctx: &mut RuntimeContext, sv: &Sv) -> Result<PStr, PerlError> {
    let blessed_ref = match &*sv.borrow() {
        Scalar::Ref(r) if r.blessed().is_some() => Some(r.clone()),
        _ => None,
    };
    if let Some(r) = blessed_ref {
        if let Some(code) = r.overload_for(ctx, "\"\"") {
            let result = call_overload(ctx, &code, &[sv.clone()])?;
            return Ok(result.get_str());
        }
    }
    Ok(sv.get_str())
}

/// Numeric view; blessed references consult the `0+` overload.
pub fn numify(ctx: &mut RuntimeContext, sv: &Sv) -> Result<Num, PerlError> {
    let blessed_ref = match &*sv.borrow() {
        Scalar::Ref(r) if r.blessed().is_some() => Some(r.clone()),
        _ => None,
    };
    if let Some(r) = blessed_ref {
        if let Some(code) = r.overload_for(ctx, "0+") {
            let result = call_overload(ctx, &code, &[sv.clone()])?;
            return Ok(result.get_num().num);
        }
    }
    let parsed = sv.get_num();
    if ctx.config.warnings && !parsed.clean {
        if sv.is_defined() {
            ctx.emit_warning(&format!(
                "Argument \"{}\" isn't numeric",
                sv.get_str()
            ));
        } else {
            ctx.emit_warning("Use of uninitialized value in numeric context");
        }
    }
    Ok(parsed.num)
}

/// Calls an overload method with the conventional (self, other, swapped)
/// argument list.
fn call_overload(
    ctx: &mut RuntimeContext,
    code: &Rc<crate::values::code::Code>,
    args: &[Sv],
) -> Result<Sv, PerlError> {
    let mut array = Array::new();
    for arg in args {
        array.push_cell(arg.clone());
    }
    let args = Rc::new(RefCell::new(array));
    interpreter::call_code(ctx, code.clone(), args, None, false)
}

fn overload_for_operands(
    ctx: &mut RuntimeContext,
    name: &str,
    lhs: &Sv,
    rhs: &Sv,
) -> Option<(Rc<crate::values::code::Code>, bool)> {
    let lhs_ref = match &*lhs.borrow() {
        Scalar::Ref(r) if r.blessed().is_some() => Some(r.clone()),
        _ => None,
    };
    if let Some(r) = lhs_ref {
        if let Some(code) = r.overload_for(ctx, name) {
            return Some((code, false));
        }
    }
    let rhs_ref = match &*rhs.borrow() {
        Scalar::Ref(r) if r.blessed().is_some() => Some(r.clone()),
        _ => None,
    };
    if let Some(r) = rhs_ref {
        if let Some(code) = r.overload_for(ctx, name) {
            return Some((code, true));
        }
    }
    None
}

/// A binary operator with overload dispatch and the numeric/string
/// fallback semantics.
pub fn binary(
    ctx: &mut RuntimeContext,
    op: BinOp,
    lhs: &Sv,
    rhs: &Sv,
) -> Result<Sv, PerlError> {
    let name = binop_overload_name(op);
    if let Some((code, swapped)) = overload_for_operands(ctx, name, lhs, rhs) {
        let (a, b) = if swapped {
            (rhs.clone(), lhs.clone())
        } else {
            (lhs.clone(), rhs.clone())
        };
        return call_overload(ctx, &code, &[a, b, sv_bool(swapped)]);
    }
    binary_plain(ctx, op, lhs, rhs)
}

fn binary_plain(
    ctx: &mut RuntimeContext,
    op: BinOp,
    lhs: &Sv,
    rhs: &Sv,
) -> Result<Sv, PerlError> {
    match op {
        BinOp::Add => {
            let (a, b) = (numify(ctx, lhs)?, numify(ctx, rhs)?);
            Ok(sv_num(numeric::add(&a, &b)))
        }
        BinOp::Sub => {
            let (a, b) = (numify(ctx, lhs)?, numify(ctx, rhs)?);
            Ok(sv_num(numeric::sub(&a, &b)))
        }
        BinOp::Mul => {
            let (a, b) = (numify(ctx, lhs)?, numify(ctx, rhs)?);
            Ok(sv_num(numeric::mul(&a, &b)))
        }
        BinOp::Div => {
            let (a, b) = (numify(ctx, lhs)?, numify(ctx, rhs)?);
            Ok(sv_num(numeric::div(&a, &b)?))
        }
        BinOp::Mod => {
            let (a, b) = (numify(ctx, lhs)?, numify(ctx, rhs)?);
            Ok(sv_num(numeric::modulo(&a, &b)?))
        }
        BinOp::Pow => {
            let (a, b) = (numify(ctx, lhs)?, numify(ctx, rhs)?);
            Ok(sv_num(numeric::pow(&a, &b)))
        }
        BinOp::Concat => {
            let (a, b) = (stringify(ctx, lhs)?, stringify(ctx, rhs)?);
            Ok(ScalarCell::new(Scalar::Str(a.concat(&b))))
        }
        BinOp::Repeat => {
            let a = stringify(ctx, lhs)?;
            let count = numify(ctx, rhs)?.to_i64();
            Ok(ScalarCell::new(Scalar::Str(a.repeat(count))))
        }
        BinOp::NumEq
        | BinOp::NumNe
        | BinOp::NumLt
        | BinOp::NumLe
        | BinOp::NumGt
        | BinOp::NumGe => {
            let (a, b) = (numify(ctx, lhs)?, numify(ctx, rhs)?);
            let ord = numeric::compare(&a, &b);
            let result = match (op, ord) {
                (_, None) => false, // NaN comparisons
                (BinOp::NumEq, Some(o)) => o.is_eq(),
                (BinOp::NumNe, Some(o)) => o.is_ne(),
                (BinOp::NumLt, Some(o)) => o.is_lt(),
                (BinOp::NumLe, Some(o)) => o.is_le(),
                (BinOp::NumGt, Some(o)) => o.is_gt(),
                (_, Some(o)) => o.is_ge(),
            };
            Ok(sv_bool(result))
        }
        BinOp::NumCmp => {
            let (a, b) = (numify(ctx, lhs)?, numify(ctx, rhs)?);
            match numeric::compare(&a, &b) {
                Some(o) => Ok(sv_num(Num::Int(o as i64))),
                None => Ok(sv_fresh_undef()),
            }
        }
        BinOp::StrEq
        | BinOp::StrNe
        | BinOp::StrLt
        | BinOp::StrLe
        | BinOp::StrGt
        | BinOp::StrGe => {
            let (a, b) = (stringify(ctx, lhs)?, stringify(ctx, rhs)?);
            let ord = a.cmp(&b);
            let result = match op {
                BinOp::StrEq => ord.is_eq(),
                BinOp::StrNe => ord.is_ne(),
                BinOp::StrLt => ord.is_lt(),
                BinOp::StrLe => ord.is_le(),
                BinOp::StrGt => ord.is_gt(),
                _ => ord.is_ge(),
            };
            Ok(sv_bool(result))
        }
        BinOp::StrCmp => {
            let (a, b) = (stringify(ctx, lhs)?, stringify(ctx, rhs)?);
            Ok(sv_num(Num::Int(a.cmp(&b) as i64)))
        }
        BinOp::BitAnd => {
            let (a, b) = (numify(ctx, lhs)?, numify(ctx, rhs)?);
            Ok(sv_num(numeric::bit_and(&a, &b)))
        }
        BinOp::BitOr => {
            let (a, b) = (numify(ctx, lhs)?, numify(ctx, rhs)?);
            Ok(sv_num(numeric::bit_or(&a, &b)))
        }
        BinOp::BitXor => {
            let (a, b) = (numify(ctx, lhs)?, numify(ctx, rhs)?);
            Ok(sv_num(numeric::bit_xor(&a, &b)))
        }
        BinOp::Shl => {
            let (a, b) = (numify(ctx, lhs)?, numify(ctx, rhs)?);
            Ok(sv_num(numeric::shift_left(&a, &b)))
        }
        BinOp::Shr => {
            let (a, b) = (numify(ctx, lhs)?, numify(ctx, rhs)?);
            Ok(sv_num(numeric::shift_right(&a, &b)))
        }
    }
}

/// Compound assignment: the compound overload form (`+=`) is probed
/// first; on a miss the base operator runs and the result is written back
/// to the l-value.
pub fn compound_assign(
    ctx: &mut RuntimeContext,
    op: BinOp,
    target: &Sv,
    rhs: &Sv,
) -> Result<(), PerlError> {
    let compound_name = format!("{}=", binop_overload_name(op));
    if let Some((code, swapped)) = overload_for_operands(ctx, &compound_name, target, rhs) {
        if !swapped {
            let result =
                call_overload(ctx, &code, &[target.clone(), rhs.clone(), sv_bool(false)])?;
            target.set(result.get())?;
            return Ok(());
        }
    }
    debug_assert!(compound_fallback(&compound_name).is_some());
    let result = binary(ctx, op, target, rhs)?;
    target.set(result.get())?;
    Ok(())
}

/// `++`: numeric increment, or the magic string increment for pure
/// strings ("az" -> "ba").
pub fn increment(target: &Sv) -> Result<(), PerlError> {
    let current = target.get();
    let next = match &current {
        Scalar::Str(s) if !s.is_empty() => {
            let text = s.to_text();
            let numeric_like = text
                .chars()
                .all(|c| c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e' || c == 'E');
            if numeric_like {
                Scalar::from_num(numeric::add(&current.get_num().num, &Num::Int(1)))
            } else {
                Scalar::Str(s.string_increment())
            }
        }
        _ => Scalar::from_num(numeric::add(&current.get_num().num, &Num::Int(1))),
    };
    target.set(next)?;
    Ok(())
}

pub fn decrement(target: &Sv) -> Result<(), PerlError> {
    let current = target.get().get_num().num;
    target.set(Scalar::from_num(numeric::sub(&current, &Num::Int(1))))?;
    Ok(())
}

// ---- regex execution -----------------------------------------------------

/// Decodes a `flags NUL pattern` constant and compiles it through the
/// adapter cache.
pub fn compile_pattern_const(
    ctx: &mut RuntimeContext,
    encoded: &PStr,
) -> Result<Rc<CompiledPattern>, PerlError> {
    let text = encoded.to_text().into_owned();
    let (flags, pattern) = text.split_once('\u{0}').unwrap_or(("", text.as_str()));
    let flags = PatternFlags::parse(flags);
    ctx.regex.compile(pattern, flags).map_err(PerlError::from)
}

fn regex_error(ctx: &mut RuntimeContext, err: RegexError) -> Result<bool, PerlError> {
    if matches!(err, RegexError::Unimplemented(_)) && ctx.config.unimplemented_as_warning {
        ctx.emit_warning(&err.to_string());
        return Ok(false);
    }
    Err(PerlError::from(err))
}

/// Scalar-context match, with `m//g` position bookkeeping on the target
/// cell. Returns the boolean result (already negation-adjusted).
pub fn match_scalar(
    ctx: &mut RuntimeContext,
    target: &Sv,
    pattern: &Rc<CompiledPattern>,
    flags: u8,
) -> Result<bool, PerlError> {
    let subject = stringify(ctx, target)?;
    let text = subject.to_text().into_owned();
    let global = flags & MATCH_FLAG_GLOBAL != 0;
    let negated = flags & MATCH_FLAG_NEGATED != 0;

    let start = if global {
        char_to_byte_offset(&text, target.pos().unwrap_or(0))
    } else {
        0
    };

    let matched = match ctx.regex.exec(pattern, &subject, start, true) {
        Ok(result) => result,
        Err(err) => {
            // demoted Unimplemented counts as no-match
            regex_error(ctx, err)?;
            return Ok(negated);
        }
    };

    match matched {
        Some((match_start, match_end)) => {
            if global {
                // a zero-length match advances past itself next time
                let next = if match_end == match_start && match_end < text.len() {
                    let mut end = match_end + 1;
                    while end < text.len() && !text.is_char_boundary(end) {
                        end += 1;
                    }
                    end
                } else {
                    match_end
                };
                target.set_pos(Some(byte_to_char_offset(&text, next)));
                ctx.regex.record_pos_cell(target);
            }
            Ok(!negated)
        }
        None => {
            if global {
                target.set_pos(None);
            }
            Ok(negated)
        }
    }
}

/// List-context match. A zero-capture pattern yields `(1)`; with captures
/// the list has one entry per group, `undef` for non-participants and the
/// empty string for empty matches. Under `/g` every match contributes.
pub fn match_list(
    ctx: &mut RuntimeContext,
    target: &Sv,
    pattern: &Rc<CompiledPattern>,
    flags: u8,
) -> Result<Rc<RefCell<Array>>, PerlError> {
    let subject = stringify(ctx, target)?;
    let text = subject.to_text().into_owned();
    let global = flags & MATCH_FLAG_GLOBAL != 0;
    let groups = pattern.capture_slots();
    let out = Rc::new(RefCell::new(Array::new()));

    let mut start = 0usize;
    loop {
        let matched = match ctx.regex.exec(pattern, &subject, start, true) {
            Ok(result) => result,
            Err(err) => {
                regex_error(ctx, err)?;
                return Ok(out);
            }
        };
        let (match_start, match_end) = match matched {
            Some(span) => span,
            None => break,
        };
        if groups == 0 {
            out.borrow_mut().push_value(Scalar::Int(1));
            if !global {
                break;
            }
        } else {
            let mut array = out.borrow_mut();
            for n in 1..=groups {
                match ctx.regex.capture_pstr(n) {
                    Some(text) => array.push_value(Scalar::Str(text)),
                    None => array.push_value(Scalar::Undef),
                }
            }
        }
        if !global {
            break;
        }
        start = if match_end == match_start {
            let mut next = match_end + 1;
            while next < text.len() && !text.is_char_boundary(next) {
                next += 1;
            }
            next
        } else {
            match_end
        };
        if start > text.len() {
            break;
        }
    }
    Ok(out)
}

/// `s///`: repeated matching with `$1`-style expansion of the replacement
/// text; writes the result back through the target cell and returns the
/// substitution count.
pub fn substitute(
    ctx: &mut RuntimeContext,
    target: &Sv,
    pattern: &Rc<CompiledPattern>,
    replacement: &PStr,
    flags: u8,
) -> Result<i64, PerlError> {
    let subject = stringify(ctx, target)?;
    let text = subject.to_text().into_owned();
    let global = flags & MATCH_FLAG_GLOBAL != 0;
    let repl_text = replacement.to_text().into_owned();

    let mut out = String::new();
    let mut cursor = 0usize;
    let mut count = 0i64;

    loop {
        let matched = match ctx.regex.exec(pattern, &subject, cursor, true) {
            Ok(result) => result,
            Err(err) => {
                regex_error(ctx, err)?;
                return Ok(0);
            }
        };
        let (start, end) = match matched {
            Some(span) => span,
            None => break,
        };
        out.push_str(&text[cursor..start]);
        out.push_str(&expand_replacement(ctx, &repl_text));
        count += 1;
        cursor = if end == start {
            if end < text.len() {
                let mut next = end + 1;
                while next < text.len() && !text.is_char_boundary(next) {
                    next += 1;
                }
                out.push_str(&text[end..next]);
                next
            } else {
                end + 1
            }
        } else {
            end
        };
        if !global || cursor > text.len() {
            break;
        }
    }
    if count > 0 {
        out.push_str(&text[cursor.min(text.len())..]);
        target.set(Scalar::Str(PStr::from_text(&out)))?;
    }
    Ok(count)
}

/// `$1`, `${12}`, `$&`, `` $` ``, `$'` and `\1` in a replacement.
fn expand_replacement(ctx: &RuntimeContext, replacement: &str) -> String {
    let chars: Vec<char> = replacement.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let group_ref = match c {
            '$' | '\\' if i + 1 < chars.len() => {
                let next = chars[i + 1];
                if next.is_ascii_digit() {
                    let mut digits = String::new();
                    let mut j = i + 1;
                    while j < chars.len() && chars[j].is_ascii_digit() {
                        digits.push(chars[j]);
                        j += 1;
                    }
                    Some((digits, j))
                } else if c == '$' && next == '&' {
                    out.push_str(
                        &ctx.regex
                            .match_pstr()
                            .map(|s| s.to_text().into_owned())
                            .unwrap_or_default(),
                    );
                    i += 2;
                    continue;
                } else if c == '\\' {
                    out.push(next);
                    i += 2;
                    continue;
                } else {
                    None
                }
            }
            _ => None,
        };
        match group_ref {
            Some((digits, j)) => {
                if let Ok(n) = digits.parse::<usize>() {
                    if let Some(text) = ctx.regex.capture_pstr(n) {
                        out.push_str(&text.to_text());
                    }
                }
                i = j;
            }
            None => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

// ---- list helpers --------------------------------------------------------

/// A fresh list value (a reference to a new array).
pub fn new_list() -> Sv {
    ScalarCell::new(Scalar::Ref(crate::values::reference::PerlRef::to_array(
        Rc::new(RefCell::new(Array::new())),
    )))
}

/// The array behind a list/array register.
pub fn list_of(sv: &Sv) -> Result<Rc<RefCell<Array>>, ValueError> {
    match &*sv.borrow() {
        Scalar::Ref(r) => r.deref_array(),
        _ => Err(ValueError::WrongRefKind("an ARRAY")),
    }
}

/// The hash behind a hash register.
pub fn hash_of(
    sv: &Sv,
) -> Result<Rc<RefCell<crate::values::hash::Hash>>, ValueError> {
    match &*sv.borrow() {
        Scalar::Ref(r) => r.deref_hash(),
        _ => Err(ValueError::WrongRefKind("a HASH")),
    }
}

/// Flattens a value into a list: arrays contribute element copies, hashes
/// contribute key/value pairs, scalars contribute themselves.
pub fn flatten_into(list: &Rc<RefCell<Array>>, sv: &Sv) -> Result<(), ValueError> {
    let value = sv.get();
    match &value {
        Scalar::Ref(r) => {
            if let Ok(array) = r.deref_array() {
                let cells: Vec<Sv> = array.borrow().cells().to_vec();
                let mut out = list.borrow_mut();
                for cell in cells {
                    out.push_value(cell.get());
                }
                return Ok(());
            }
            if let Ok(hash) = r.deref_hash() {
                let mut out = list.borrow_mut();
                for (key, cell) in hash.borrow().entries() {
                    out.push_value(Scalar::Str(key.clone()));
                    out.push_value(cell.get());
                }
                return Ok(());
            }
            list.borrow_mut().push_value(value);
            Ok(())
        }
        _ => {
            list.borrow_mut().push_value(value);
            Ok(())
        }
    }
}

/// The error value that `die` raises for a list of arguments: a single
/// reference propagates intact, anything else concatenates into a string.
pub fn die_value(
    ctx: &mut RuntimeContext,
    args: &Rc<RefCell<Array>>,
) -> Result<PerlError, PerlError> {
    let cells: Vec<Sv> = args.borrow().cells().to_vec();
    if cells.len() == 1 {
        let only = &cells[0];
        if only.borrow().is_ref() {
            return Ok(PerlError::die_value(ScalarCell::new(only.get())));
        }
    }
    let mut message = String::new();
    for cell in &cells {
        message.push_str(&stringify(ctx, cell)?.to_text());
    }
    if message.is_empty() {
        message.push_str("Died");
    }
    Ok(PerlError::new(ErrorKind::UserDie, message))
}

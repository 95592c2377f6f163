use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use num_traits::ToPrimitive;

use crate::compiler::operators::Builtin;
use crate::global::error::{ErrorKind, PerlError};
use crate::runtime::context::RuntimeContext;
use crate::runtime::interpreter::call_code;
use crate::runtime::ops;
use crate::values::array::Array;
use crate::values::numeric::{self, Num};
use crate::values::reference::PerlRef;
use crate::values::scalar::{
    sv_bool, sv_fresh_undef, sv_num, sv_undef, Scalar, ScalarCell, Sv,
};
use crate::values::string::PStr;

fn list_sv(array: Rc<RefCell<Array>>) -> Sv {
    ScalarCell::new(Scalar::Ref(PerlRef::to_array(array)))
}

pub fn call(
    ctx: &mut RuntimeContext,
    builtin: Builtin,
    args: &Rc<RefCell<Array>>,
    list_context: bool,
) -> Result<Sv, PerlError> {
    let cells: Vec<Sv> = args.borrow().cells().to_vec();
    match builtin {
        Builtin::Print | Builtin::Say => {
            let mut out = String::new();
            for cell in &cells {
                out.push_str(&ops::stringify(ctx, cell)?.to_text());
            }
            if builtin == Builtin::Say {
                out.push('\n');
            }
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            let _ = handle.write_all(out.as_bytes());
            let _ = handle.flush();
            Ok(sv_bool(true))
        }
        Builtin::Join => {
            let mut it = cells.iter();
            let sep = match it.next() {
                Some(cell) => ops::stringify(ctx, cell)?,
                None => PStr::empty(),
            };
            let mut out = PStr::empty();
            for (i, cell) in it.enumerate() {
                if i > 0 {
                    out.push_pstr(&sep);
                }
                out.push_pstr(&ops::stringify(ctx, cell)?);
            }
            Ok(ScalarCell::new(Scalar::Str(out)))
        }
        Builtin::Split => split(ctx, &cells, list_context),
        Builtin::Sort => sort(ctx, cells, list_context),
        Builtin::Reverse => {
            if list_context {
                let mut array = Array::new();
                for cell in cells.into_iter().rev() {
                    array.push_value(cell.get());
                }
                Ok(list_sv(Rc::new(RefCell::new(array))))
            } else {
                let mut joined = PStr::empty();
                for cell in &cells {
                    joined.push_pstr(&ops::stringify(ctx, cell)?);
                }
                let reversed: String = joined.to_text().chars().rev().collect();
                Ok(ScalarCell::new(Scalar::Str(PStr::from_text(&reversed))))
            }
        }
        Builtin::Sprintf => {
            let format = match cells.first() {
                Some(cell) => ops::stringify(ctx, cell)?,
                None => PStr::empty(),
            };
            let text = sprintf(ctx, &format.to_text(), &cells[1.min(cells.len())..])?;
            Ok(ScalarCell::new(Scalar::Str(PStr::from_text(&text))))
        }
        Builtin::Pack => {
            let template = match cells.first() {
                Some(cell) => cell.get_str().to_text().into_owned(),
                None => String::new(),
            };
            let packed = pack(&template, &cells[1.min(cells.len())..])?;
            Ok(ScalarCell::new(Scalar::Str(packed)))
        }
        Builtin::Unpack => {
            let template = match cells.first() {
                Some(cell) => cell.get_str().to_text().into_owned(),
                None => String::new(),
            };
            let data = match cells.get(1) {
                Some(cell) => cell.get_str(),
                None => PStr::empty(),
            };
            let values = unpack(&template, &data)?;
            let mut array = Array::new();
            for value in values {
                array.push_value(value);
            }
            Ok(list_sv(Rc::new(RefCell::new(array))))
        }
        Builtin::Length => {
            let target = cells.first().cloned().unwrap_or_else(sv_undef);
            if !target.is_defined() {
                return Ok(sv_fresh_undef());
            }
            let text = ops::stringify(ctx, &target)?;
            Ok(sv_num(Num::Int(text.char_len() as i64)))
        }
        Builtin::Substr => {
            let target = match cells.first() {
                Some(cell) => ops::stringify(ctx, cell)?,
                None => PStr::empty(),
            };
            let start = cells.get(1).map(|c| c.get_int()).unwrap_or(0);
            let len = cells.get(2).map(|c| c.get_int());
            if cells.len() > 3 {
                return Err(PerlError::new(
                    ErrorKind::Unimplemented,
                    "4-argument substr is not supported",
                ));
            }
            match target.substr(start, len) {
                Some(slice) => Ok(ScalarCell::new(Scalar::Str(slice))),
                None => {
                    ctx.emit_warning("substr outside of string");
                    Ok(sv_fresh_undef())
                }
            }
        }
        Builtin::Index | Builtin::Rindex => {
            let haystack = match cells.first() {
                Some(cell) => ops::stringify(ctx, cell)?,
                None => PStr::empty(),
            };
            let needle = match cells.get(1) {
                Some(cell) => ops::stringify(ctx, cell)?,
                None => PStr::empty(),
            };
            let position = cells.get(2).map(|c| c.get_int());
            let found = if builtin == Builtin::Index {
                haystack.index_of(&needle, position.unwrap_or(0))
            } else {
                haystack.rindex_of(&needle, position)
            };
            Ok(sv_num(Num::Int(found)))
        }
        Builtin::Uc | Builtin::Lc | Builtin::Ucfirst | Builtin::Lcfirst => {
            let target = match cells.first() {
                Some(cell) => ops::stringify(ctx, cell)?,
                None => PStr::empty(),
            };
            let out = match builtin {
                Builtin::Uc => target.to_uppercase(),
                Builtin::Lc => target.to_lowercase(),
                Builtin::Ucfirst => target.ucfirst(),
                _ => target.lcfirst(),
            };
            Ok(ScalarCell::new(Scalar::Str(out)))
        }
        Builtin::Chr => {
            let value = cells.first().map(|c| c.get_int()).unwrap_or(0);
            let c = char::from_u32(value.max(0) as u32).unwrap_or('\u{fffd}');
            Ok(ScalarCell::new(Scalar::Str(PStr::from(c))))
        }
        Builtin::Ord => {
            let target = match cells.first() {
                Some(cell) => ops::stringify(ctx, cell)?,
                None => PStr::empty(),
            };
            let value = target.chars().next().map(|c| c as u32).unwrap_or(0);
            Ok(sv_num(Num::Int(value as i64)))
        }
        Builtin::Abs => {
            let num = match cells.first() {
                Some(cell) => ops::numify(ctx, cell)?,
                None => Num::Int(0),
            };
            let out = match num {
                Num::Int(v) => Num::Int(v.saturating_abs()),
                Num::Big(b) => {
                    Num::from_big(if b.sign() == num_bigint::Sign::Minus { -b } else { b })
                }
                Num::Double(d) => Num::Double(d.abs()),
            };
            Ok(sv_num(out))
        }
        Builtin::Int => {
            let num = match cells.first() {
                Some(cell) => ops::numify(ctx, cell)?,
                None => Num::Int(0),
            };
            let out = match num {
                Num::Double(d) => Num::Int(d.trunc() as i64),
                other => other,
            };
            Ok(sv_num(out))
        }
        Builtin::Sqrt | Builtin::Log | Builtin::Exp => {
            let value = match cells.first() {
                Some(cell) => ops::numify(ctx, cell)?.to_f64(),
                None => 0.0,
            };
            let out = match builtin {
                Builtin::Sqrt => value.sqrt(),
                Builtin::Log => value.ln(),
                _ => value.exp(),
            };
            Ok(sv_num(Num::Double(out)))
        }
        Builtin::Hex => {
            let text = match cells.first() {
                Some(cell) => cell.get_str().to_text().into_owned(),
                None => String::new(),
            };
            let digits = text.trim_start_matches("0x").trim_start_matches("0X");
            let value = i64::from_str_radix(digits, 16).unwrap_or(0);
            Ok(sv_num(Num::Int(value)))
        }
        Builtin::Oct => {
            let text = match cells.first() {
                Some(cell) => cell.get_str().to_text().into_owned(),
                None => String::new(),
            };
            let text = text.trim();
            let value = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                i64::from_str_radix(hex, 16).unwrap_or(0)
            } else if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
                i64::from_str_radix(bin, 2).unwrap_or(0)
            } else {
                i64::from_str_radix(text.trim_start_matches('0'), 8).unwrap_or(0)
            };
            Ok(sv_num(Num::Int(value)))
        }
        Builtin::Scalar => Ok(cells.into_iter().last().unwrap_or_else(sv_undef)),
        Builtin::Splice => splice(&cells, list_context),
        Builtin::Pos => {
            let target = cells.first().cloned().unwrap_or_else(sv_undef);
            match target.pos() {
                Some(pos) => Ok(sv_num(Num::Int(pos as i64))),
                None => Ok(sv_fresh_undef()),
            }
        }
        Builtin::Chomp => {
            let target = cells.first().cloned().unwrap_or_else(sv_undef);
            let mut text = target.get_str();
            let removed = text.chomp();
            if removed > 0 {
                target.set(Scalar::Str(text))?;
            }
            Ok(sv_num(Num::Int(removed)))
        }
        Builtin::Chop => {
            let target = cells.first().cloned().unwrap_or_else(sv_undef);
            let mut text = target.get_str();
            let removed = text.chop();
            target.set(Scalar::Str(text))?;
            Ok(ScalarCell::new(Scalar::Str(removed)))
        }
        Builtin::Grep | Builtin::Map => {
            let mut it = cells.into_iter();
            let block = match it.next() {
                Some(cell) => cell,
                None => return Ok(ops::new_list()),
            };
            let code = match &*block.borrow() {
                Scalar::Code(code) => code.clone(),
                Scalar::Ref(reference) => reference
                    .deref_code()
                    .map_err(PerlError::from)?,
                _ => {
                    return Err(PerlError::new(
                        ErrorKind::TypeError,
                        "Not a CODE reference",
                    ))
                }
            };
            let out = Rc::new(RefCell::new(Array::new()));
            for item in it {
                let args = Rc::new(RefCell::new(Array::new()));
                let result = call_code(
                    ctx,
                    code.clone(),
                    args,
                    Some(item.clone()),
                    builtin == Builtin::Map,
                )?;
                if builtin == Builtin::Grep {
                    if ops::truthy(ctx, &result)? {
                        out.borrow_mut().push_value(item.get());
                    }
                } else {
                    ops::flatten_into(&out, &result)?;
                }
            }
            Ok(list_sv(out))
        }
    }
}

fn splice(cells: &[Sv], list_context: bool) -> Result<Sv, PerlError> {
    let array = match cells.first() {
        Some(cell) => ops::list_of(cell).map_err(PerlError::from)?,
        None => {
            return Err(PerlError::new(
                ErrorKind::TypeError,
                "splice requires an array",
            ))
        }
    };
    let offset = cells.get(1).map(|c| c.get_int()).unwrap_or(0);
    let length = cells.get(2).map(|c| c.get_int());
    let replacement: Vec<Sv> = cells
        .iter()
        .skip(3)
        .map(|c| ScalarCell::new(c.get()))
        .collect();
    let removed = array.borrow_mut().splice(offset, length, replacement);
    if list_context {
        let mut out = Array::new();
        for cell in removed {
            out.push_cell(cell);
        }
        Ok(list_sv(Rc::new(RefCell::new(out))))
    } else {
        Ok(removed.into_iter().last().unwrap_or_else(sv_fresh_undef))
    }
}

fn sort(
    ctx: &mut RuntimeContext,
    cells: Vec<Sv>,
    _list_context: bool,
) -> Result<Sv, PerlError> {
    let mut items = cells;
    let comparator = match items.first() {
        Some(first) => match &*first.borrow() {
            Scalar::Code(code) => Some(code.clone()),
            _ => None,
        },
        None => None,
    };
    if comparator.is_some() {
        items.remove(0);
    }

    match comparator {
        None => {
            let mut keyed: Vec<(PStr, Sv)> = Vec::with_capacity(items.len());
            for cell in items {
                keyed.push((ops::stringify(ctx, &cell)?, cell));
            }
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = Array::new();
            for (_, cell) in keyed {
                out.push_value(cell.get());
            }
            Ok(list_sv(Rc::new(RefCell::new(out))))
        }
        Some(code) => {
            // $a and $b are package globals visible to the comparator
            let a_cell = ctx.symbols.scalar("main::a");
            let b_cell = ctx.symbols.scalar("main::b");
            let mut error = None;
            let mut items = items;
            items.sort_by(|x, y| {
                if error.is_some() {
                    return std::cmp::Ordering::Equal;
                }
                let _ = a_cell.set(x.get());
                let _ = b_cell.set(y.get());
                let args = Rc::new(RefCell::new(Array::new()));
                match call_code(ctx, code.clone(), args, None, false) {
                    Ok(result) => match result.get_int() {
                        v if v < 0 => std::cmp::Ordering::Less,
                        0 => std::cmp::Ordering::Equal,
                        _ => std::cmp::Ordering::Greater,
                    },
                    Err(err) => {
                        error = Some(err);
                        std::cmp::Ordering::Equal
                    }
                }
            });
            if let Some(err) = error {
                return Err(err);
            }
            let mut out = Array::new();
            for cell in items {
                out.push_value(cell.get());
            }
            Ok(list_sv(Rc::new(RefCell::new(out))))
        }
    }
}

fn split(
    ctx: &mut RuntimeContext,
    cells: &[Sv],
    _list_context: bool,
) -> Result<Sv, PerlError> {
    let pattern_text = match cells.first() {
        Some(cell) => cell.get_str(),
        None => PStr::from_text(" "),
    };
    let target = match cells.get(1) {
        Some(cell) => ops::stringify(ctx, cell)?,
        None => ctx.symbols.scalar("main::_").get_str(),
    };
    let limit = cells.get(2).map(|c| c.get_int()).unwrap_or(0);

    let encoded = pattern_text.to_text().into_owned();
    let (_, raw_pattern) = encoded
        .split_once('\u{0}')
        .unwrap_or(("", encoded.as_str()));

    let mut text = target.to_text().into_owned();
    // the awk special case: a single-space pattern splits on whitespace
    // runs and strips leading whitespace
    let awk = raw_pattern == " ";
    if awk {
        text = text.trim_start().to_string();
    }
    let pattern = if awk {
        ops::compile_pattern_const(ctx, &PStr::from_text("\u{0}\\s+"))?
    } else {
        ops::compile_pattern_const(ctx, &pattern_text)?
    };

    let subject = PStr::from_text(&text);
    let mut fields: Vec<PStr> = Vec::new();
    let mut cursor = 0usize;
    loop {
        if limit > 0 && fields.len() as i64 >= limit - 1 {
            break;
        }
        let matched = ctx
            .regex
            .exec(&pattern, &subject, cursor, false)
            .map_err(PerlError::from)?;
        let (start, end) = match matched {
            Some(span) => span,
            None => break,
        };
        if end == start {
            // zero-width separator: take one char and move on
            if start >= text.len() {
                break;
            }
            let mut next = start + 1;
            while next < text.len() && !text.is_char_boundary(next) {
                next += 1;
            }
            fields.push(PStr::from_text(&text[cursor..next]));
            cursor = next;
            continue;
        }
        fields.push(PStr::from_text(&text[cursor..start]));
        cursor = end;
        if cursor > text.len() {
            break;
        }
    }
    fields.push(PStr::from_text(&text[cursor.min(text.len())..]));

    // trailing empty fields drop unless a negative limit keeps them
    if limit == 0 {
        while matches!(fields.last(), Some(f) if f.is_empty()) {
            fields.pop();
        }
    }

    let mut out = Array::new();
    for field in fields {
        out.push_value(Scalar::Str(field));
    }
    Ok(list_sv(Rc::new(RefCell::new(out))))
}

fn sprintf(
    ctx: &mut RuntimeContext,
    format: &str,
    args: &[Sv],
) -> Result<String, PerlError> {
    let chars: Vec<char> = format.chars().collect();
    let mut out = String::new();
    let mut arg_index = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        i += 1;
        if i < chars.len() && chars[i] == '%' {
            out.push('%');
            i += 1;
            continue;
        }
        let mut flags = String::new();
        while i < chars.len() && "-+ 0#".contains(chars[i]) {
            flags.push(chars[i]);
            i += 1;
        }
        let mut width = String::new();
        while i < chars.len() && chars[i].is_ascii_digit() {
            width.push(chars[i]);
            i += 1;
        }
        let mut precision: Option<usize> = None;
        if i < chars.len() && chars[i] == '.' {
            i += 1;
            let mut digits = String::new();
            while i < chars.len() && chars[i].is_ascii_digit() {
                digits.push(chars[i]);
                i += 1;
            }
            precision = Some(digits.parse().unwrap_or(0));
        }
        let conv = match chars.get(i) {
            Some(&c) => c,
            None => break,
        };
        i += 1;

        let arg = args.get(arg_index).cloned().unwrap_or_else(sv_undef);
        arg_index += 1;

        let rendered = match conv {
            's' => {
                let text = ops::stringify(ctx, &arg)?.to_text().into_owned();
                match precision {
                    Some(precision) => text.chars().take(precision).collect(),
                    None => text,
                }
            }
            'd' | 'i' => format!("{}", ops::numify(ctx, &arg)?.to_i64()),
            'u' => format!("{}", ops::numify(ctx, &arg)?.to_i64().max(0)),
            'x' => format!("{:x}", ops::numify(ctx, &arg)?.to_i64()),
            'X' => format!("{:X}", ops::numify(ctx, &arg)?.to_i64()),
            'o' => format!("{:o}", ops::numify(ctx, &arg)?.to_i64()),
            'b' => format!("{:b}", ops::numify(ctx, &arg)?.to_i64()),
            'c' => {
                let value = ops::numify(ctx, &arg)?.to_i64();
                char::from_u32(value.max(0) as u32)
                    .unwrap_or('\u{fffd}')
                    .to_string()
            }
            'f' => {
                let value = ops::numify(ctx, &arg)?.to_f64();
                format!("{:.*}", precision.unwrap_or(6), value)
            }
            'e' => {
                let value = ops::numify(ctx, &arg)?.to_f64();
                format!("{:.*e}", precision.unwrap_or(6), value)
            }
            'g' => numeric::format_double(ops::numify(ctx, &arg)?.to_f64()),
            other => {
                out.push('%');
                out.push(other);
                arg_index -= 1;
                continue;
            }
        };

        let width: usize = width.parse().unwrap_or(0);
        if rendered.chars().count() >= width {
            out.push_str(&rendered);
        } else {
            let pad = width - rendered.chars().count();
            if flags.contains('-') {
                out.push_str(&rendered);
                out.extend(std::iter::repeat(' ').take(pad));
            } else if flags.contains('0') && !rendered.starts_with('-') {
                out.extend(std::iter::repeat('0').take(pad));
                out.push_str(&rendered);
            } else {
                out.extend(std::iter::repeat(' ').take(pad));
                out.push_str(&rendered);
            }
        }
    }
    Ok(out)
}

struct TemplateItem {
    code: char,
    count: Option<usize>,
    star: bool,
}

fn parse_template(template: &str) -> Vec<TemplateItem> {
    let chars: Vec<char> = template.chars().collect();
    let mut items = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let code = chars[i];
        i += 1;
        if code.is_whitespace() {
            continue;
        }
        let mut count = None;
        let mut star = false;
        if chars.get(i) == Some(&'*') {
            star = true;
            i += 1;
        } else {
            let mut digits = String::new();
            while matches!(chars.get(i), Some(c) if c.is_ascii_digit()) {
                digits.push(chars[i]);
                i += 1;
            }
            if !digits.is_empty() {
                count = digits.parse().ok();
            }
        }
        items.push(TemplateItem { code, count, star });
    }
    items
}

/// `pack`: the formats the core guarantees (`a A C c s S l L n N v V q Q
/// x`), with `q`/`Q` exact through the big-integer path.
fn pack(template: &str, args: &[Sv]) -> Result<PStr, PerlError> {
    let mut out: Vec<u8> = Vec::new();
    let mut arg_index = 0usize;
    let mut next = |args: &[Sv], arg_index: &mut usize| -> Sv {
        let cell = args.get(*arg_index).cloned().unwrap_or_else(sv_undef);
        *arg_index += 1;
        cell
    };

    for item in parse_template(template) {
        match item.code {
            'a' | 'A' => {
                let text = next(args, &mut arg_index).get_str();
                let bytes: Vec<u8> = if text.is_unicode() {
                    text.to_text().bytes().collect()
                } else {
                    text.bytes().to_vec()
                };
                let len = if item.star {
                    bytes.len()
                } else {
                    item.count.unwrap_or(1)
                };
                for i in 0..len {
                    out.push(*bytes.get(i).unwrap_or(if item.code == 'A' {
                        &b' '
                    } else {
                        &0u8
                    }));
                }
            }
            'x' => {
                for _ in 0..item.count.unwrap_or(1) {
                    out.push(0);
                }
            }
            code => {
                let repeat = if item.star {
                    args.len().saturating_sub(arg_index)
                } else {
                    item.count.unwrap_or(1)
                };
                for _ in 0..repeat {
                    let value = next(args, &mut arg_index);
                    match code {
                        'C' | 'c' => out.push(value.get_int() as u8),
                        's' => out.extend_from_slice(&(value.get_int() as i16).to_le_bytes()),
                        'S' | 'v' => {
                            out.extend_from_slice(&(value.get_int() as u16).to_le_bytes())
                        }
                        'n' => out.extend_from_slice(&(value.get_int() as u16).to_be_bytes()),
                        'l' => out.extend_from_slice(&(value.get_int() as i32).to_le_bytes()),
                        'L' | 'V' => {
                            out.extend_from_slice(&(value.get_int() as u32).to_le_bytes())
                        }
                        'N' => out.extend_from_slice(&(value.get_int() as u32).to_be_bytes()),
                        'q' => {
                            let big = value.get_big_integer();
                            let v = big.to_i64().unwrap_or(0);
                            out.extend_from_slice(&v.to_le_bytes());
                        }
                        'Q' => {
                            // exactness matters here: i64::MAX and above
                            // survive through the big-integer read
                            let big = value.get_big_integer();
                            let v = big
                                .to_u64()
                                .or_else(|| big.to_i64().map(|x| x as u64))
                                .unwrap_or(0);
                            out.extend_from_slice(&v.to_le_bytes());
                        }
                        other => {
                            return Err(PerlError::new(
                                ErrorKind::Unimplemented,
                                format!("Invalid type '{}' in pack", other),
                            ))
                        }
                    }
                }
            }
        }
    }
    Ok(PStr::from_bytes(out))
}

fn unpack(template: &str, data: &PStr) -> Result<Vec<Scalar>, PerlError> {
    let bytes: Vec<u8> = if data.is_unicode() {
        data.to_text().bytes().collect()
    } else {
        data.bytes().to_vec()
    };
    let mut values = Vec::new();
    let mut at = 0usize;

    let take = |at: &mut usize, n: usize| -> Option<Vec<u8>> {
        if *at + n <= bytes.len() {
            let slice = bytes[*at..*at + n].to_vec();
            *at += n;
            Some(slice)
        } else {
            None
        }
    };

    for item in parse_template(template) {
        match item.code {
            'a' | 'A' => {
                let len = if item.star {
                    bytes.len().saturating_sub(at)
                } else {
                    item.count.unwrap_or(1)
                };
                if let Some(slice) = take(&mut at, len) {
                    let mut text = PStr::from_bytes(slice);
                    if item.code == 'A' {
                        let trimmed: Vec<u8> = {
                            let mut b = text.bytes().to_vec();
                            while matches!(b.last(), Some(b' ') | Some(0)) {
                                b.pop();
                            }
                            b
                        };
                        text = PStr::from_bytes(trimmed);
                    }
                    values.push(Scalar::Str(text));
                }
            }
            'x' => {
                let _ = take(&mut at, item.count.unwrap_or(1));
            }
            code => {
                let mut repeat = if item.star {
                    usize::MAX
                } else {
                    item.count.unwrap_or(1)
                };
                while repeat > 0 {
                    let width = match code {
                        'C' | 'c' => 1,
                        's' | 'S' | 'n' | 'v' => 2,
                        'l' | 'L' | 'N' | 'V' => 4,
                        'q' | 'Q' => 8,
                        other => {
                            return Err(PerlError::new(
                                ErrorKind::Unimplemented,
                                format!("Invalid type '{}' in unpack", other),
                            ))
                        }
                    };
                    let slice = match take(&mut at, width) {
                        Some(slice) => slice,
                        None => break,
                    };
                    let value = match code {
                        'C' => Scalar::Int(slice[0] as i64),
                        'c' => Scalar::Int(slice[0] as i8 as i64),
                        's' => {
                            Scalar::Int(i16::from_le_bytes([slice[0], slice[1]]) as i64)
                        }
                        'S' | 'v' => {
                            Scalar::Int(u16::from_le_bytes([slice[0], slice[1]]) as i64)
                        }
                        'n' => Scalar::Int(u16::from_be_bytes([slice[0], slice[1]]) as i64),
                        'l' => Scalar::Int(i32::from_le_bytes([
                            slice[0], slice[1], slice[2], slice[3],
                        ]) as i64),
                        'L' | 'V' => Scalar::Int(u32::from_le_bytes([
                            slice[0], slice[1], slice[2], slice[3],
                        ]) as i64),
                        'N' => Scalar::Int(u32::from_be_bytes([
                            slice[0], slice[1], slice[2], slice[3],
                        ]) as i64),
                        'q' => {
                            let mut buf = [0u8; 8];
                            buf.copy_from_slice(&slice);
                            Scalar::Int(i64::from_le_bytes(buf))
                        }
                        'Q' => {
                            let mut buf = [0u8; 8];
                            buf.copy_from_slice(&slice);
                            let v = u64::from_le_bytes(buf);
                            // values past i64::MAX promote, never truncate
                            match i64::try_from(v) {
                                Ok(small) => Scalar::Int(small),
                                Err(_) => Scalar::Big(v.into()),
                            }
                        }
                        _ => Scalar::Undef,
                    };
                    values.push(value);
                    if !item.star {
                        repeat -= 1;
                    }
                }
            }
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_q_round_trips_exactly() {
        let value = ScalarCell::new(Scalar::Int(i64::MAX));
        let packed = pack("Q", &[value]).unwrap();
        assert_eq!(packed.byte_len(), 8);
        let values = unpack("Q", &packed).unwrap();
        match &values[0] {
            Scalar::Int(v) => assert_eq!(*v, i64::MAX),
            other => panic!("expected Int, got {other:?}"),
        }
    }

    #[test]
    fn unpack_q_promotes_past_i64() {
        let value = ScalarCell::new(Scalar::Big(num_bigint::BigInt::from(u64::MAX)));
        let packed = pack("Q", &[value]).unwrap();
        let values = unpack("Q", &packed).unwrap();
        match &values[0] {
            Scalar::Big(b) => assert_eq!(b.to_string(), u64::MAX.to_string()),
            other => panic!("expected Big, got {other:?}"),
        }
    }

    #[test]
    fn pack_network_order() {
        let value = ScalarCell::new(Scalar::Int(0x0102));
        let packed = pack("n", &[value]).unwrap();
        assert_eq!(packed.bytes(), &[0x01, 0x02]);
    }

    #[test]
    fn pack_ascii_pads() {
        let value = ScalarCell::new(Scalar::Str("hi".into()));
        let packed = pack("A4", &[value]).unwrap();
        assert_eq!(packed.bytes(), b"hi  ");
        let values = unpack("A4", &packed).unwrap();
        match &values[0] {
            Scalar::Str(s) => assert_eq!(s.to_text(), "hi"),
            other => panic!("expected Str, got {other:?}"),
        }
    }
}

use std::fmt::Write;

use itertools::Itertools;

use crate::compiler::buffers::{read_i32, read_u16, read_u32, read_u8};
use crate::compiler::code::InterpretedCode;
use crate::global::opcodes::{Opcode, OperandKind};
use crate::values::scalar::Scalar;

/// Renders a compiled body as a textual opcode listing, one instruction
/// per line with resolved constant previews. Drives `--disassemble`.
pub fn disassemble(code: &InterpretedCode) -> String {
    let mut out = String::new();
    let name = code.name.as_deref().unwrap_or("main");
    let _ = writeln!(
        out,
        "; {} ({} bytes, {} registers, {} constants)",
        name,
        code.bytecode.len(),
        code.max_register,
        code.constants.len()
    );
    if !code.captured.is_empty() {
        let names = code.captured.iter().map(|cv| cv.name.as_str()).join(", ");
        let _ = writeln!(out, "; captures: {}", names);
    }

    let bytes = &code.bytecode;
    let mut pc = 0usize;
    while pc < bytes.len() {
        let at = pc;
        let op = match Opcode::try_from(bytes[pc]) {
            Ok(op) => op,
            Err(_) => {
                let _ = writeln!(out, "{:5}  .byte 0x{:02x}", at, bytes[pc]);
                pc += 1;
                continue;
            }
        };
        pc += 1;
        let mut line = format!("{:5}  {}", at, op);
        for kind in op.operands() {
            match kind {
                OperandKind::Reg => {
                    let r = read_u8(bytes, &mut pc);
                    let _ = write!(line, " r{}", r);
                }
                OperandKind::Const => {
                    let c = read_u16(bytes, &mut pc);
                    let _ = write!(line, " c{}", c);
                    if let Some(cell) = code.constants.get(c as usize) {
                        let _ = write!(line, "{}", const_preview(&cell.borrow()));
                    }
                }
                OperandKind::Target => {
                    let t = read_u32(bytes, &mut pc);
                    let _ = write!(line, " ->{}", t);
                }
                OperandKind::Imm => {
                    let v = read_i32(bytes, &mut pc);
                    let _ = write!(line, " #{}", v);
                }
                OperandKind::Byte => {
                    let b = read_u8(bytes, &mut pc);
                    let _ = write!(line, " b{}", b);
                }
            }
        }
        let _ = writeln!(out, "{}", line);
    }

    for info in &code.loops {
        let _ = writeln!(
            out,
            "; loop {:?} [{}..{}] redo={} next={} last={}",
            info.label, info.start, info.end, info.redo_pc, info.next_pc, info.last_pc
        );
    }

    // nested bodies referenced from the constant pool
    for (i, cell) in code.constants.iter().enumerate() {
        if let Scalar::Code(template) = &*cell.borrow() {
            let _ = writeln!(out, "\n; constant c{}:", i);
            out.push_str(&disassemble(&template.compiled));
        }
    }
    out
}

fn const_preview(value: &Scalar) -> String {
    match value {
        Scalar::Str(s) => {
            let text = s.to_text().into_owned();
            let short: String = text.chars().take(24).collect();
            let ellipsis = if text.chars().count() > 24 { "…" } else { "" };
            format!("={:?}{}", short.replace('\u{0}', "\\0"), ellipsis)
        }
        Scalar::Int(v) => format!("={}", v),
        Scalar::Big(v) => format!("={}", v),
        Scalar::Double(v) => format!("={}", v),
        Scalar::Undef => "=undef".to_string(),
        Scalar::Code(_) => "=<code>".to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_program;
    use crate::frontend::parser::parse_program;

    #[test]
    fn listing_covers_every_instruction() {
        let program = parse_program("my $x = 1; $x + 2;", "t.pl").unwrap();
        let code = compile_program(&program).unwrap();
        let listing = disassemble(&code);
        assert!(listing.contains("LOAD_INT"));
        assert!(listing.contains("RETURN"));
    }

    #[test]
    fn nested_bodies_are_listed() {
        let program = parse_program("sub f { 42; } f();", "t.pl").unwrap();
        let code = compile_program(&program).unwrap();
        let listing = disassemble(&code);
        assert!(listing.contains("MAKE_CLOSURE"));
        assert!(listing.contains("; constant c"));
    }
}

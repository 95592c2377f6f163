use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum::Display;

use crate::frontend::ast::BinOp;
use crate::global::opcodes::Opcode;

/// Operator table: binary AST operators to their opcode.
pub fn binop_opcode(op: BinOp) -> Opcode {
    match op {
        BinOp::Add => Opcode::ADD,
        BinOp::Sub => Opcode::SUB,
        BinOp::Mul => Opcode::MUL,
        BinOp::Div => Opcode::DIV,
        BinOp::Mod => Opcode::MOD,
        BinOp::Pow => Opcode::POW,
        BinOp::Concat => Opcode::CONCAT,
        BinOp::Repeat => Opcode::REPEAT,
        BinOp::NumEq => Opcode::NUM_EQ,
        BinOp::NumNe => Opcode::NUM_NE,
        BinOp::NumLt => Opcode::NUM_LT,
        BinOp::NumLe => Opcode::NUM_LE,
        BinOp::NumGt => Opcode::NUM_GT,
        BinOp::NumGe => Opcode::NUM_GE,
        BinOp::NumCmp => Opcode::NUM_CMP,
        BinOp::StrEq => Opcode::STR_EQ,
        BinOp::StrNe => Opcode::STR_NE,
        BinOp::StrLt => Opcode::STR_LT,
        BinOp::StrLe => Opcode::STR_LE,
        BinOp::StrGt => Opcode::STR_GT,
        BinOp::StrGe => Opcode::STR_GE,
        BinOp::StrCmp => Opcode::STR_CMP,
        BinOp::BitAnd => Opcode::BIT_AND,
        BinOp::BitOr => Opcode::BIT_OR,
        BinOp::BitXor => Opcode::BIT_XOR,
        BinOp::Shl => Opcode::SHIFT_LEFT,
        BinOp::Shr => Opcode::SHIFT_RIGHT,
    }
}

/// Compound-assignment opcodes, so overload dispatch can probe the
/// compound form before falling back to the base operator.
pub fn compound_opcode(op: BinOp) -> Option<Opcode> {
    Some(match op {
        BinOp::Add => Opcode::ADD_ASSIGN,
        BinOp::Sub => Opcode::SUB_ASSIGN,
        BinOp::Mul => Opcode::MUL_ASSIGN,
        BinOp::Div => Opcode::DIV_ASSIGN,
        BinOp::Mod => Opcode::MOD_ASSIGN,
        BinOp::Pow => Opcode::POW_ASSIGN,
        BinOp::Concat => Opcode::CONCAT_ASSIGN,
        BinOp::Repeat => Opcode::REPEAT_ASSIGN,
        BinOp::Shl => Opcode::SHL_ASSIGN,
        BinOp::Shr => Opcode::SHR_ASSIGN,
        BinOp::BitAnd => Opcode::BIT_AND_ASSIGN,
        BinOp::BitOr => Opcode::BIT_OR_ASSIGN,
        BinOp::BitXor => Opcode::BIT_XOR_ASSIGN,
        _ => return None,
    })
}

/// The overload method name for a binary operator (`(+` lookup key).
pub fn binop_overload_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
        BinOp::Concat => ".",
        BinOp::Repeat => "x",
        BinOp::NumEq => "==",
        BinOp::NumNe => "!=",
        BinOp::NumLt => "<",
        BinOp::NumLe => "<=",
        BinOp::NumGt => ">",
        BinOp::NumGe => ">=",
        BinOp::NumCmp => "<=>",
        BinOp::StrEq => "eq",
        BinOp::StrNe => "ne",
        BinOp::StrLt => "lt",
        BinOp::StrLe => "le",
        BinOp::StrGt => "gt",
        BinOp::StrGe => "ge",
        BinOp::StrCmp => "cmp",
        BinOp::BitAnd => "&",
        BinOp::BitOr => "|",
        BinOp::BitXor => "^",
        BinOp::Shl => "<<",
        BinOp::Shr => ">>",
    }
}

/// Builtins dispatched through CALL_BUILTIN. Operators with specialised
/// opcodes (push, keys, defined, …) never reach this table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Display,
)]
#[repr(u16)]
pub enum Builtin {
    Print,
    Say,
    Join,
    Split,
    Sort,
    Reverse,
    Sprintf,
    Pack,
    Unpack,
    Length,
    Substr,
    Index,
    Rindex,
    Uc,
    Lc,
    Ucfirst,
    Lcfirst,
    Chr,
    Ord,
    Abs,
    Int,
    Sqrt,
    Log,
    Exp,
    Hex,
    Oct,
    Scalar,
    Splice,
    Pos,
    Chomp,
    Chop,
    Grep,
    Map,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Builtin> {
        Some(match name {
            "print" => Builtin::Print,
            "say" => Builtin::Say,
            "join" => Builtin::Join,
            "split" => Builtin::Split,
            "sort" => Builtin::Sort,
            "reverse" => Builtin::Reverse,
            "sprintf" => Builtin::Sprintf,
            "pack" => Builtin::Pack,
            "unpack" => Builtin::Unpack,
            "length" => Builtin::Length,
            "substr" => Builtin::Substr,
            "index" => Builtin::Index,
            "rindex" => Builtin::Rindex,
            "uc" => Builtin::Uc,
            "lc" => Builtin::Lc,
            "ucfirst" => Builtin::Ucfirst,
            "lcfirst" => Builtin::Lcfirst,
            "chr" => Builtin::Chr,
            "ord" => Builtin::Ord,
            "abs" => Builtin::Abs,
            "int" => Builtin::Int,
            "sqrt" => Builtin::Sqrt,
            "log" => Builtin::Log,
            "exp" => Builtin::Exp,
            "hex" => Builtin::Hex,
            "oct" => Builtin::Oct,
            "scalar" => Builtin::Scalar,
            "splice" => Builtin::Splice,
            "pos" => Builtin::Pos,
            "chomp" => Builtin::Chomp,
            "chop" => Builtin::Chop,
            "grep" => Builtin::Grep,
            "map" => Builtin::Map,
            _ => return None,
        })
    }
}

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum::Display;
use strum_macros::EnumIter;

/// Operand layout element. Registers are 8-bit indices; constant-pool
/// slots and small immediates are 16-bit; jump targets and wide immediates
/// are 32-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// register index (u8)
    Reg,
    /// constant-pool slot or inline u16 payload
    Const,
    /// absolute bytecode offset (u32)
    Target,
    /// signed 32-bit immediate
    Imm,
    /// single-byte payload (context flag, match flags)
    Byte,
}

impl OperandKind {
    pub fn width(self) -> usize {
        match self {
            OperandKind::Reg | OperandKind::Byte => 1,
            OperandKind::Const => 2,
            OperandKind::Target | OperandKind::Imm => 4,
        }
    }
}

/// The register bytecode instruction set. Dispatch is a plain switch over
/// the opcode byte; handler bodies are small enough for the optimiser to
/// inline the hot arithmetic.
#[allow(non_camel_case_types)]
#[derive(
    EnumIter,
    Debug,
    Eq,
    PartialEq,
    TryFromPrimitive,
    IntoPrimitive,
    Copy,
    Clone,
    Display,
)]
#[repr(u8)]
pub enum Opcode {
    // control flow 0x00 - 0x1f
    NOP = 0x00,
    JUMP,
    JUMP_IF_FALSE,
    JUMP_IF_TRUE,
    RETURN,            // sets the Return marker and leaves the frame
    DIE,
    WARN,
    SET_MARKER_LAST,   // label constant, 0xffff for the innermost loop
    SET_MARKER_NEXT,
    SET_MARKER_REDO,
    GOTO_SUB,          // tail-call request via the GotoSub marker
    ENTER_SCOPE,
    LEAVE_SCOPE,
    SAVE_REGEX_STATE,  // push a regex snapshot on the dynamic scope
    WANT_ARRAY,

    // loads, aliases, globals 0x20 - 0x3f
    LOAD_CONST = 0x20,
    LOAD_UNDEF,        // fresh mutable undef (l-value safe)
    LOAD_INT,
    ALIAS_REG,         // share the cell
    COPY_VALUE,        // write the value through (assignment)
    GET_GLOBAL,
    GET_GLOBAL_ARRAY,
    GET_GLOBAL_HASH,
    GET_GLOBAL_CODE,
    SET_GLOBAL_CODE,
    ALIAS_GLOBAL_SCALAR,
    GET_SPECIAL,       // $1.., $&, $`, $' computed from the regex adapter
    LOCAL_GLOBAL_SCALAR,
    LOCAL_GLOBAL_ARRAY,
    LOCAL_GLOBAL_HASH,
    LOCAL_HASH_ELEM,
    LOCAL_ARRAY_ELEM,

    // arithmetic and comparisons 0x40 - 0x6f
    ADD = 0x40,
    SUB,
    MUL,
    DIV,
    MOD,
    POW,
    ADD_SCALAR_INT,    // superinstruction: rhs is a small-int immediate
    NEG,
    INC,
    DEC,
    CONCAT,
    REPEAT,
    NUM_EQ,
    NUM_NE,
    NUM_LT,
    NUM_LE,
    NUM_GT,
    NUM_GE,
    NUM_CMP,
    STR_EQ,
    STR_NE,
    STR_LT,
    STR_LE,
    STR_GT,
    STR_GE,
    STR_CMP,
    BIT_AND,
    BIT_OR,
    BIT_XOR,
    BIT_NOT,
    SHIFT_LEFT,
    SHIFT_RIGHT,
    NOT,
    DEFINED,
    REF_KIND,

    // compound assignment (compound overload form probed first) 0x70 - 0x7f
    ADD_ASSIGN = 0x70,
    SUB_ASSIGN,
    MUL_ASSIGN,
    DIV_ASSIGN,
    MOD_ASSIGN,
    POW_ASSIGN,
    CONCAT_ASSIGN,
    REPEAT_ASSIGN,
    SHL_ASSIGN,
    SHR_ASSIGN,
    BIT_AND_ASSIGN,
    BIT_OR_ASSIGN,
    BIT_XOR_ASSIGN,
    ADD_ASSIGN_INT,

    // lists, arrays, iterators 0x80 - 0x9f
    LIST_NEW = 0x80,
    LIST_PUSH,         // copy semantics
    LIST_PUSH_CELL,    // aliasing, for @_ construction
    LIST_FLATTEN,
    LIST_GET,
    RANGE_TO_LIST,
    ITER_FROM_RANGE,   // lazy; never materialises the range
    ITER_CREATE,
    FOREACH_NEXT_OR_EXIT, // fused hasNext/next/branch
    ARRAY_LEN,
    ARRAY_LAST_INDEX,
    ARRAY_GET,
    ARRAY_GET_LV,
    ARRAY_SET,
    ARRAY_EXISTS,
    ARRAY_DELETE,
    ARRAY_PUSH,
    ARRAY_POP,
    ARRAY_SHIFT,
    ARRAY_UNSHIFT,
    ARRAY_ASSIGN,

    // hashes 0xa0 - 0xaf
    HASH_GET = 0xa0,
    HASH_GET_LV,
    HASH_SET,
    HASH_DELETE,
    HASH_EXISTS,
    HASH_KEYS,
    HASH_VALUES,
    HASH_EACH,
    HASH_ASSIGN,
    HASH_NEW,
    LIST_SLICE,
    GLOB_ASSIGN,

    // references 0xb0 - 0xbf
    MAKE_REF = 0xb0,
    ANON_ARRAY,
    ANON_HASH,
    DEREF_SCALAR,
    DEREF_ARRAY,       // r-value: never autovivifies
    DEREF_ARRAY_LV,    // l-value: autovivifies undef cells
    DEREF_HASH,
    DEREF_HASH_LV,
    DEREF_CODE,
    BLESS,

    // calls 0xc0 - 0xcf
    MAKE_CLOSURE = 0xc0,
    CALL,
    METHOD_CALL,
    EVAL_CALL,         // eval BLOCK: catching call
    EVAL_STRING,
    CALL_BUILTIN,
    INSTALL_OVERLOAD,

    // regex 0xd0 - 0xdf
    MATCH_SCALAR = 0xd0,
    MATCH_LIST,
    SUBST,
}

impl Opcode {
    /// Operand layout, in encoding order. The interpreter decodes inline;
    /// the disassembler and dead-simple verifiers read this table.
    pub fn operands(self) -> &'static [OperandKind] {
        use OperandKind::*;
        match self {
            Opcode::NOP
            | Opcode::ENTER_SCOPE
            | Opcode::LEAVE_SCOPE
            | Opcode::SAVE_REGEX_STATE => &[],
            Opcode::JUMP => &[Target],
            Opcode::JUMP_IF_FALSE | Opcode::JUMP_IF_TRUE => &[Reg, Target],
            Opcode::RETURN
            | Opcode::DIE
            | Opcode::WARN
            | Opcode::GOTO_SUB
            | Opcode::LOAD_UNDEF
            | Opcode::INC
            | Opcode::DEC
            | Opcode::WANT_ARRAY
            | Opcode::LIST_NEW
            | Opcode::HASH_NEW => &[Reg],
            Opcode::SET_MARKER_LAST
            | Opcode::SET_MARKER_NEXT
            | Opcode::SET_MARKER_REDO
            | Opcode::LOCAL_GLOBAL_SCALAR
            | Opcode::LOCAL_GLOBAL_ARRAY
            | Opcode::LOCAL_GLOBAL_HASH => &[Const],
            Opcode::LOAD_CONST
            | Opcode::GET_GLOBAL
            | Opcode::GET_GLOBAL_ARRAY
            | Opcode::GET_GLOBAL_HASH
            | Opcode::GET_GLOBAL_CODE
            | Opcode::GET_SPECIAL
            | Opcode::MAKE_CLOSURE => &[Reg, Const],
            Opcode::SET_GLOBAL_CODE | Opcode::ALIAS_GLOBAL_SCALAR => &[Const, Reg],
            Opcode::LOAD_INT => &[Reg, Imm],
            Opcode::ALIAS_REG
            | Opcode::COPY_VALUE
            | Opcode::NEG
            | Opcode::BIT_NOT
            | Opcode::NOT
            | Opcode::DEFINED
            | Opcode::REF_KIND
            | Opcode::LIST_PUSH
            | Opcode::LIST_PUSH_CELL
            | Opcode::LIST_FLATTEN
            | Opcode::ITER_CREATE
            | Opcode::ARRAY_LEN
            | Opcode::ARRAY_LAST_INDEX
            | Opcode::ARRAY_POP
            | Opcode::ARRAY_SHIFT
            | Opcode::ARRAY_ASSIGN
            | Opcode::HASH_KEYS
            | Opcode::HASH_VALUES
            | Opcode::HASH_EACH
            | Opcode::HASH_ASSIGN
            | Opcode::MAKE_REF
            | Opcode::ANON_ARRAY
            | Opcode::ANON_HASH
            | Opcode::DEREF_SCALAR
            | Opcode::DEREF_ARRAY
            | Opcode::DEREF_ARRAY_LV
            | Opcode::DEREF_HASH
            | Opcode::DEREF_HASH_LV
            | Opcode::DEREF_CODE
            | Opcode::LOCAL_HASH_ELEM
            | Opcode::LOCAL_ARRAY_ELEM => &[Reg, Reg],
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
            | Opcode::SHIFT_RIGHT
            | Opcode::RANGE_TO_LIST
            | Opcode::ITER_FROM_RANGE
            | Opcode::ARRAY_GET
            | Opcode::ARRAY_GET_LV
            | Opcode::ARRAY_SET
            | Opcode::ARRAY_EXISTS
            | Opcode::ARRAY_DELETE
            | Opcode::ARRAY_PUSH
            | Opcode::ARRAY_UNSHIFT
            | Opcode::HASH_GET
            | Opcode::HASH_GET_LV
            | Opcode::HASH_SET
            | Opcode::HASH_DELETE
            | Opcode::HASH_EXISTS
            | Opcode::BLESS => &[Reg, Reg, Reg],
            Opcode::ADD_SCALAR_INT => &[Reg, Reg, Imm],
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
            | Opcode::BIT_XOR_ASSIGN => &[Reg, Reg],
            Opcode::ADD_ASSIGN_INT => &[Reg, Imm],
            Opcode::LIST_GET | Opcode::LIST_SLICE => &[Reg, Reg, Imm],
            Opcode::GLOB_ASSIGN => &[Const, Reg],
            Opcode::FOREACH_NEXT_OR_EXIT => &[Reg, Reg, Target],
            Opcode::CALL => &[Reg, Reg, Reg, Byte],
            Opcode::METHOD_CALL => &[Reg, Reg, Const, Reg, Byte],
            Opcode::EVAL_CALL => &[Reg, Reg, Byte],
            Opcode::EVAL_STRING => &[Reg, Reg, Const, Byte],
            Opcode::CALL_BUILTIN => &[Reg, Const, Reg, Byte],
            Opcode::INSTALL_OVERLOAD => &[Const, Reg],
            Opcode::MATCH_SCALAR | Opcode::MATCH_LIST => &[Reg, Reg, Const, Byte],
            Opcode::SUBST => &[Reg, Reg, Const, Const, Byte],
        }
    }

    /// Encoded instruction width including the opcode byte.
    pub fn width(self) -> usize {
        1 + self.operands().iter().map(|k| k.width()).sum::<usize>()
    }
}

/// Label operand meaning "no label" on marker instructions.
pub const NO_LABEL: u16 = 0xffff;

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn opcode_bytes_round_trip() {
        for op in Opcode::iter() {
            let byte: u8 = op.into();
            assert_eq!(Opcode::try_from(byte).ok(), Some(op));
        }
    }

    #[test]
    fn widths_are_consistent() {
        assert_eq!(Opcode::NOP.width(), 1);
        assert_eq!(Opcode::JUMP.width(), 5);
        assert_eq!(Opcode::ADD.width(), 4);
        assert_eq!(Opcode::FOREACH_NEXT_OR_EXIT.width(), 7);
        assert_eq!(Opcode::METHOD_CALL.width(), 7);
        assert_eq!(Opcode::EVAL_CALL.width(), 4);
    }
}

use num_bigint::BigInt;

use crate::values::scalar::SpecialVar;
use crate::values::string::PStr;

/// A parsed program: a statement list plus the file name it came from.
#[derive(Debug, Clone)]
pub struct Program {
    pub file: String,
    pub stmts: Vec<Stmt>,
}

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr {
        expr: Expr,
        line: u32,
    },
    /// `my ($a, $b) = LIST;` / `my $x;` / `my @a;` / `my %h;`
    My {
        vars: Vec<(Sigil, String)>,
        init: Option<Expr>,
        line: u32,
    },
    /// `local $x = …;` / `local @a;` / `local $h{k};`
    Local {
        targets: Vec<Expr>,
        init: Option<Expr>,
        line: u32,
    },
    If {
        arms: Vec<(Expr, Block)>,
        otherwise: Option<Block>,
        line: u32,
    },
    While {
        label: Option<String>,
        cond: Expr,
        body: Block,
        is_until: bool,
        line: u32,
    },
    DoWhile {
        body: Block,
        cond: Expr,
        is_until: bool,
        line: u32,
    },
    ForC {
        label: Option<String>,
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Block,
        line: u32,
    },
    Foreach {
        label: Option<String>,
        var: ForeachVar,
        list: Expr,
        body: Block,
        line: u32,
    },
    /// A bare (possibly labelled) block. Runs once; `last`/`next`/`redo`
    /// treat it as a loop, including from called functions.
    BareBlock {
        label: Option<String>,
        body: Block,
        line: u32,
    },
    Sub {
        name: String,
        body: Block,
        line: u32,
    },
    Package {
        name: String,
        line: u32,
    },
    Return {
        expr: Option<Expr>,
        line: u32,
    },
    Last {
        label: Option<String>,
        line: u32,
    },
    Next {
        label: Option<String>,
        line: u32,
    },
    Redo {
        label: Option<String>,
        line: u32,
    },
    GotoSub {
        target: Expr,
        line: u32,
    },
    /// `use overload '+' => sub {…}, …;`
    UseOverload {
        pairs: Vec<Expr>,
        line: u32,
    },
    /// `use parent -norequire, 'Base';` / `use strict;` and friends that
    /// the core accepts without effect.
    UseIgnored {
        line: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sigil {
    Scalar,
    Array,
    Hash,
}

#[derive(Debug, Clone)]
pub enum ForeachVar {
    /// `foreach my $x (…)`
    My(String),
    /// `foreach $x (…)` over an existing variable
    Named(String),
    /// implicit `$_`
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Repeat,
    NumEq,
    NumNe,
    NumLt,
    NumLe,
    NumGt,
    NumGe,
    NumCmp,
    StrEq,
    StrNe,
    StrLt,
    StrLe,
    StrGt,
    StrGe,
    StrCmp,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    /// unary plus: semantically a no-op, syntactically load-bearing
    Plus,
    Not,
    BitNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
    /// defined-or `//`
    Dor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemKind {
    Array,
    Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerefKind {
    Scalar,
    Array,
    Hash,
    Code,
}

/// One piece of a double-quoted string.
#[derive(Debug, Clone)]
pub enum InterpPart {
    Lit(PStr),
    Var(Expr),
}

#[derive(Debug, Clone)]
pub enum Expr {
    IntLit(i64),
    BigLit(BigInt),
    FloatLit(f64),
    StrLit(PStr),
    InterpStr(Vec<InterpPart>),
    Undef,
    /// `$name` (unqualified, qualified, `_`, punctuation like `@`-less `$0`)
    ScalarVar(String),
    /// `$1`, `$&`, `` $` ``, `$'`
    SpecialVar(SpecialVar),
    ArrayVar(String),
    HashVar(String),
    GlobVar(String),
    /// `$#array` / `$#{expr}`
    ArrayLastIdx(Box<Expr>),
    /// `$a[i]`, `$h{k}`, `$r->[i]`, `$r->{k}`, `$$r[i]`
    Elem {
        container: Box<Expr>,
        index: Box<Expr>,
        kind: ElemKind,
        /// container is a reference expression rather than a named
        /// array/hash
        via_ref: bool,
    },
    Unop {
        op: UnOp,
        operand: Box<Expr>,
    },
    Binop {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        op: LogicOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    OpAssign {
        op: BinOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    LogicalAssign {
        op: LogicOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Range {
        from: Box<Expr>,
        to: Box<Expr>,
    },
    List(Vec<Expr>),
    AnonArray(Vec<Expr>),
    AnonHash(Vec<Expr>),
    AnonSub(Block),
    /// `\expr`
    MakeRef(Box<Expr>),
    /// `&name` without a call: the named sub as a code value
    NamedCode(String),
    Deref {
        kind: DerefKind,
        expr: Box<Expr>,
    },
    /// Named call: user sub or builtin, resolved at compile time.
    Call {
        name: String,
        args: Vec<Expr>,
    },
    /// `$code->(…)` / `&$code(…)`
    CallRef {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    MethodCall {
        invocant: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Match {
        /// `None` binds `$_`
        target: Option<Box<Expr>>,
        pattern: String,
        flags: String,
        negated: bool,
    },
    Subst {
        target: Option<Box<Expr>>,
        pattern: String,
        replacement: String,
        flags: String,
    },
    EvalBlock(Block),
    EvalString(Box<Expr>),
    DoBlock(Block),
    Wantarray,
}

impl Expr {
    /// Whether this expression can sit on the left of `=`.
    pub fn is_lvalue(&self) -> bool {
        match self {
            Expr::ScalarVar(_)
            | Expr::ArrayVar(_)
            | Expr::HashVar(_)
            | Expr::GlobVar(_)
            | Expr::Elem { .. }
            | Expr::SpecialVar(_) => true,
            Expr::Deref { .. } => true,
            Expr::List(items) => items.iter().all(Expr::is_lvalue),
            Expr::Ternary { then, otherwise, .. } => {
                then.is_lvalue() && otherwise.is_lvalue()
            }
            _ => false,
        }
    }
}

use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::Zero;

use crate::global::error::ValueError;
use crate::runtime::iterator::PerlIter;
use crate::values::code::Code;
use crate::values::glob::Glob;
use crate::values::numeric::{self, Num, ParsedNum};
use crate::values::reference::PerlRef;
use crate::values::string::PStr;

/// Read-only sentinels whose value is computed from the regex engine
/// adapter on every read: `$1..$n`, `$&`, `` $` ``, `$'`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialVar {
    Capture(usize),
    Match,
    Prematch,
    Postmatch,
}

/// The polymorphic scalar. A cell presents exactly one variant at a time
/// but may be read in any context; each read applies the documented
/// coercion. `Iter` is an interpreter-internal payload carrying the lazy
/// `foreach` iterator and never escapes to user code.
#[derive(Debug, Clone)]
pub enum Scalar {
    Undef,
    Int(i64),
    Big(BigInt),
    Double(f64),
    Str(PStr),
    Ref(PerlRef),
    Code(Rc<Code>),
    Glob(Rc<Glob>),
    Special(SpecialVar),
    Iter(Rc<RefCell<PerlIter>>),
}

impl Scalar {
    pub fn from_num(num: Num) -> Scalar {
        match num {
            Num::Int(i) => Scalar::Int(i),
            Num::Big(b) => Scalar::Big(b),
            Num::Double(d) => Scalar::Double(d),
        }
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, Scalar::Undef)
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, Scalar::Ref(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Undef => "UNDEF",
            Scalar::Int(_) => "INT",
            Scalar::Big(_) => "BIGINT",
            Scalar::Double(_) => "DOUBLE",
            Scalar::Str(_) => "STRING",
            Scalar::Ref(_) => "REF",
            Scalar::Code(_) => "CODE",
            Scalar::Glob(_) => "GLOB",
            Scalar::Special(_) => "SPECIAL",
            Scalar::Iter(_) => "ITERATOR",
        }
    }

    /// Numeric coercion. The `clean` flag reports whether the textual form
    /// was fully numeric; the caller decides whether to warn.
    pub fn get_num(&self) -> ParsedNum {
        match self {
            Scalar::Undef | Scalar::Special(_) => ParsedNum {
                num: Num::Int(0),
                clean: false,
            },
            Scalar::Int(i) => ParsedNum {
                num: Num::Int(*i),
                clean: true,
            },
            Scalar::Big(b) => ParsedNum {
                num: Num::Big(b.clone()),
                clean: true,
            },
            Scalar::Double(d) => ParsedNum {
                num: Num::Double(*d),
                clean: true,
            },
            Scalar::Str(s) => {
                if s.is_empty() {
                    // the canonical false value; numifies silently
                    ParsedNum {
                        num: Num::Int(0),
                        clean: true,
                    }
                } else {
                    numeric::parse_numeric(&s.to_text())
                }
            }
            // references numify to the target address
            Scalar::Ref(r) => ParsedNum {
                num: Num::Int(r.address() as i64),
                clean: true,
            },
            Scalar::Code(c) => ParsedNum {
                num: Num::Int(Rc::as_ptr(c) as usize as i64),
                clean: true,
            },
            Scalar::Glob(g) => ParsedNum {
                num: Num::Int(Rc::as_ptr(g) as usize as i64),
                clean: true,
            },
            Scalar::Iter(_) => ParsedNum {
                num: Num::Int(0),
                clean: false,
            },
        }
    }

    pub fn get_int(&self) -> i64 {
        self.get_num().num.to_i64()
    }

    pub fn get_double(&self) -> f64 {
        self.get_num().num.to_f64()
    }

    /// Exact integer view; doubles truncate, strings parse.
    pub fn get_big_integer(&self) -> BigInt {
        self.get_num().num.to_bigint()
    }

    /// String coercion without overload dispatch. Blessed references get
    /// the `Pkg=KIND(0xADDR)` form; overloaded `""` is applied at the
    /// operator layer, where the runtime context is available.
    pub fn get_str(&self) -> PStr {
        match self {
            Scalar::Undef | Scalar::Special(_) => PStr::empty(),
            Scalar::Int(i) => PStr::from_text(&i.to_string()),
            Scalar::Big(b) => PStr::from_text(&b.to_string()),
            Scalar::Double(d) => PStr::from_text(&numeric::format_double(*d)),
            Scalar::Str(s) => s.clone(),
            Scalar::Ref(r) => PStr::from_text(&r.to_display()),
            Scalar::Code(c) => {
                PStr::from_text(&format!("CODE(0x{:x})", Rc::as_ptr(c) as usize))
            }
            Scalar::Glob(g) => PStr::from_text(&format!("*{}", g.name())),
            Scalar::Iter(_) => PStr::empty(),
        }
    }

    /// Boolean truth: undef, 0, 0.0, "" and "0" are false.
    pub fn get_bool(&self) -> bool {
        match self {
            Scalar::Undef | Scalar::Special(_) => false,
            Scalar::Int(i) => *i != 0,
            Scalar::Big(b) => !b.is_zero(),
            Scalar::Double(d) => *d != 0.0,
            Scalar::Str(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (None, _) => false,
                    (Some('0'), None) => false,
                    _ => true,
                }
            }
            Scalar::Ref(_) | Scalar::Code(_) | Scalar::Glob(_) | Scalar::Iter(_) => true,
        }
    }
}

/// A shared, mutable scalar cell. Aliasing a variable means sharing the
/// `Rc`; copying a value means writing through `set`. The cell also carries
/// the read-only bit, the `bless` tag of anything referencing it, and the
/// `pos()` attribute left behind by `m//g`.
#[derive(Debug)]
pub struct ScalarCell {
    value: RefCell<Scalar>,
    read_only: Cell<bool>,
    blessed: RefCell<Option<String>>,
    pos: Cell<Option<usize>>,
}

pub type Sv = Rc<ScalarCell>;

impl ScalarCell {
    pub fn new(value: Scalar) -> Sv {
        Rc::new(ScalarCell {
            value: RefCell::new(value),
            read_only: Cell::new(false),
            blessed: RefCell::new(None),
            pos: Cell::new(None),
        })
    }

    pub fn new_read_only(value: Scalar) -> Sv {
        let cell = ScalarCell::new(value);
        cell.read_only.set(true);
        cell
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.get()
    }

    pub fn borrow(&self) -> Ref<'_, Scalar> {
        self.value.borrow()
    }

    pub fn get(&self) -> Scalar {
        self.value.borrow().clone()
    }

    /// Writes a new value. Fails on read-only cells and on the computed
    /// regex specials, which reject every mutation.
    pub fn set(&self, value: Scalar) -> Result<(), ValueError> {
        if self.read_only.get() || matches!(*self.value.borrow(), Scalar::Special(_)) {
            return Err(ValueError::ReadOnly);
        }
        *self.value.borrow_mut() = value;
        self.pos.set(None);
        Ok(())
    }

    /// Copies the value out of `other` (Perl assignment).
    pub fn assign_from(&self, other: &ScalarCell) -> Result<(), ValueError> {
        let value = other.get();
        self.set(value)
    }

    pub fn set_int(&self, value: i64) -> Result<(), ValueError> {
        self.set(Scalar::Int(value))
    }

    pub fn set_string(&self, value: PStr) -> Result<(), ValueError> {
        self.set(Scalar::Str(value))
    }

    pub fn set_ref(&self, target: PerlRef) -> Result<(), ValueError> {
        self.set(Scalar::Ref(target))
    }

    pub fn is_ref(&self) -> bool {
        self.value.borrow().is_ref()
    }

    pub fn pos(&self) -> Option<usize> {
        self.pos.get()
    }

    pub fn set_pos(&self, pos: Option<usize>) {
        self.pos.set(pos);
    }

    pub fn blessed(&self) -> Option<String> {
        self.blessed.borrow().clone()
    }

    pub fn bless(&self, package: impl Into<String>) {
        *self.blessed.borrow_mut() = Some(package.into());
    }

    // Convenience readers used throughout the interpreter.

    pub fn get_bool(&self) -> bool {
        self.value.borrow().get_bool()
    }

    pub fn get_int(&self) -> i64 {
        self.value.borrow().get_int()
    }

    pub fn get_double(&self) -> f64 {
        self.value.borrow().get_double()
    }

    pub fn get_big_integer(&self) -> BigInt {
        self.value.borrow().get_big_integer()
    }

    pub fn get_str(&self) -> PStr {
        self.value.borrow().get_str()
    }

    pub fn get_num(&self) -> ParsedNum {
        self.value.borrow().get_num()
    }

    pub fn is_defined(&self) -> bool {
        self.value.borrow().is_defined()
    }
}

thread_local! {
    static UNDEF_RO: Sv = ScalarCell::new_read_only(Scalar::Undef);
    static SMALL_INTS: Vec<Sv> = (0..=256)
        .map(|i| ScalarCell::new_read_only(Scalar::Int(i)))
        .collect();
    static TRUE_RO: Sv = ScalarCell::new_read_only(Scalar::Int(1));
    static FALSE_RO: Sv = ScalarCell::new_read_only(Scalar::Str(PStr::empty()));
}

/// The shared read-only undef. Correct for r-values; l-value positions must
/// allocate with [`sv_fresh_undef`] instead or mutation fails `ReadOnly`.
pub fn sv_undef() -> Sv {
    UNDEF_RO.with(Rc::clone)
}

/// A fresh mutable undef cell for l-value positions.
pub fn sv_fresh_undef() -> Sv {
    ScalarCell::new(Scalar::Undef)
}

/// Integer constant; small values come from the shared read-only cache.
pub fn sv_int(value: i64) -> Sv {
    if (0..=256).contains(&value) {
        SMALL_INTS.with(|cache| cache[value as usize].clone())
    } else {
        ScalarCell::new_read_only(Scalar::Int(value))
    }
}

/// Canonical boolean results: `1` and the empty string.
pub fn sv_bool(value: bool) -> Sv {
    if value {
        TRUE_RO.with(Rc::clone)
    } else {
        FALSE_RO.with(Rc::clone)
    }
}

pub fn sv_str(text: impl Into<PStr>) -> Sv {
    ScalarCell::new(Scalar::Str(text.into()))
}

pub fn sv_num(num: Num) -> Sv {
    ScalarCell::new(Scalar::from_num(num))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Scalar::Undef.get_bool());
        assert!(!Scalar::Int(0).get_bool());
        assert!(!Scalar::Double(0.0).get_bool());
        assert!(!Scalar::Str(PStr::from_text("")).get_bool());
        assert!(!Scalar::Str(PStr::from_text("0")).get_bool());
        assert!(Scalar::Str(PStr::from_text("00")).get_bool());
        assert!(Scalar::Str(PStr::from_text("0.0")).get_bool());
        assert!(Scalar::Int(-1).get_bool());
    }

    #[test]
    fn read_only_cells_reject_writes() {
        let undef = sv_undef();
        assert_eq!(undef.set(Scalar::Int(1)), Err(ValueError::ReadOnly));
        let two = sv_int(2);
        assert_eq!(two.set(Scalar::Int(3)), Err(ValueError::ReadOnly));
        let fresh = sv_fresh_undef();
        assert!(fresh.set(Scalar::Int(1)).is_ok());
    }

    #[test]
    fn small_int_cache_is_shared() {
        assert!(Rc::ptr_eq(&sv_int(42), &sv_int(42)));
        assert!(!Rc::ptr_eq(&sv_int(1000), &sv_int(1000)));
    }

    #[test]
    fn assignment_round_trips() {
        let src = sv_str("17 apples");
        let dst = sv_fresh_undef();
        dst.assign_from(&src).unwrap();
        assert_eq!(dst.get_str(), src.get_str());
        assert_eq!(dst.get_int(), 17);
    }

    #[test]
    fn big_integer_reads_exactly() {
        let cell = ScalarCell::new(Scalar::Big(BigInt::from(u64::MAX)));
        assert_eq!(cell.get_big_integer().to_string(), u64::MAX.to_string());
        let int = ScalarCell::new(Scalar::Int(i64::MAX));
        assert_eq!(int.get_big_integer().to_string(), i64::MAX.to_string());
    }

    #[test]
    fn pos_clears_on_write() {
        let cell = sv_str("hello");
        cell.set_pos(Some(3));
        assert_eq!(cell.pos(), Some(3));
        cell.set(Scalar::Str(PStr::from_text("bye"))).unwrap();
        assert_eq!(cell.pos(), None);
    }
}

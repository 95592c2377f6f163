use std::cell::RefCell;
use std::rc::Rc;

use crate::global::error::ValueError;
use crate::values::array::Array;
use crate::values::code::Code;
use crate::values::glob::Glob;
use crate::values::hash::Hash;
use crate::values::scalar::{Scalar, Sv};

/// What a reference points at. Targets own their referent through `Rc`;
/// cycles in user data are legal and are collected at context teardown
/// when the last external handle drops.
#[derive(Debug, Clone)]
pub enum RefTarget {
    Scalar(Sv),
    Array(Rc<RefCell<Array>>),
    Hash(Rc<RefCell<Hash>>),
    Code(Rc<Code>),
    Glob(Rc<Glob>),
}

/// A Perl reference value. The `bless` tag lives on the referent, not on
/// the reference: two refs to one blessed array agree about its class.
#[derive(Debug, Clone)]
pub struct PerlRef {
    pub target: RefTarget,
}

impl PerlRef {
    pub fn to_scalar(cell: Sv) -> PerlRef {
        PerlRef {
            target: RefTarget::Scalar(cell),
        }
    }

    pub fn to_array(array: Rc<RefCell<Array>>) -> PerlRef {
        PerlRef {
            target: RefTarget::Array(array),
        }
    }

    pub fn to_hash(hash: Rc<RefCell<Hash>>) -> PerlRef {
        PerlRef {
            target: RefTarget::Hash(hash),
        }
    }

    pub fn to_code(code: Rc<Code>) -> PerlRef {
        PerlRef {
            target: RefTarget::Code(code),
        }
    }

    pub fn to_glob(glob: Rc<Glob>) -> PerlRef {
        PerlRef {
            target: RefTarget::Glob(glob),
        }
    }

    /// Stable address of the referent, used for `==` on refs and for the
    /// default stringification.
    pub fn address(&self) -> usize {
        match &self.target {
            RefTarget::Scalar(sv) => Rc::as_ptr(sv) as usize,
            RefTarget::Array(a) => Rc::as_ptr(a) as *const u8 as usize,
            RefTarget::Hash(h) => Rc::as_ptr(h) as *const u8 as usize,
            RefTarget::Code(c) => Rc::as_ptr(c) as usize,
            RefTarget::Glob(g) => Rc::as_ptr(g) as usize,
        }
    }

    /// The `ref()` answer for an unblessed reference: a scalar ref that
    /// itself holds a ref reports `REF`.
    pub fn kind_name(&self) -> &'static str {
        match &self.target {
            RefTarget::Scalar(sv) => {
                if matches!(*sv.borrow(), Scalar::Ref(_)) {
                    "REF"
                } else {
                    "SCALAR"
                }
            }
            RefTarget::Array(_) => "ARRAY",
            RefTarget::Hash(_) => "HASH",
            RefTarget::Code(_) => "CODE",
            RefTarget::Glob(_) => "GLOB",
        }
    }

    pub fn blessed(&self) -> Option<String> {
        match &self.target {
            RefTarget::Scalar(sv) => sv.blessed(),
            RefTarget::Array(a) => a.borrow().blessed.clone(),
            RefTarget::Hash(h) => h.borrow().blessed.clone(),
            RefTarget::Code(c) => c.blessed(),
            RefTarget::Glob(_) => None,
        }
    }

    pub fn bless(&self, package: &str) {
        match &self.target {
            RefTarget::Scalar(sv) => sv.bless(package),
            RefTarget::Array(a) => a.borrow_mut().blessed = Some(package.into()),
            RefTarget::Hash(h) => h.borrow_mut().blessed = Some(package.into()),
            RefTarget::Code(c) => c.set_blessed(package),
            RefTarget::Glob(_) => {}
        }
    }

    /// `SCALAR(0x…)`, or `Pkg=SCALAR(0x…)` for blessed referents.
    pub fn to_display(&self) -> String {
        let base = match &self.target {
            RefTarget::Scalar(sv) => {
                if matches!(*sv.borrow(), Scalar::Code(_)) {
                    "CODE"
                } else {
                    "SCALAR"
                }
            }
            RefTarget::Array(_) => "ARRAY",
            RefTarget::Hash(_) => "HASH",
            RefTarget::Code(_) => "CODE",
            RefTarget::Glob(_) => "GLOB",
        };
        match self.blessed() {
            Some(pkg) => format!("{}={}(0x{:x})", pkg, base, self.address()),
            None => format!("{}(0x{:x})", base, self.address()),
        }
    }

    pub fn deref_scalar(&self) -> Result<Sv, ValueError> {
        match &self.target {
            RefTarget::Scalar(sv) => Ok(sv.clone()),
            _ => Err(ValueError::WrongRefKind("a SCALAR")),
        }
    }

    pub fn deref_array(&self) -> Result<Rc<RefCell<Array>>, ValueError> {
        match &self.target {
            RefTarget::Array(a) => Ok(a.clone()),
            _ => Err(ValueError::WrongRefKind("an ARRAY")),
        }
    }

    pub fn deref_hash(&self) -> Result<Rc<RefCell<Hash>>, ValueError> {
        match &self.target {
            RefTarget::Hash(h) => Ok(h.clone()),
            _ => Err(ValueError::WrongRefKind("a HASH")),
        }
    }

    pub fn deref_code(&self) -> Result<Rc<Code>, ValueError> {
        match &self.target {
            RefTarget::Code(c) => Ok(c.clone()),
            RefTarget::Scalar(sv) => match &*sv.borrow() {
                Scalar::Code(c) => Ok(c.clone()),
                _ => Err(ValueError::NotARef("CODE")),
            },
            _ => Err(ValueError::NotARef("CODE")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::scalar::{sv_fresh_undef, sv_str};

    #[test]
    fn kind_names() {
        let plain = PerlRef::to_scalar(sv_str("x"));
        assert_eq!(plain.kind_name(), "SCALAR");

        let inner = PerlRef::to_scalar(sv_fresh_undef());
        let outer_cell = sv_fresh_undef();
        outer_cell.set(Scalar::Ref(inner)).unwrap();
        let outer = PerlRef::to_scalar(outer_cell);
        assert_eq!(outer.kind_name(), "REF");
    }

    #[test]
    fn bless_tags_the_referent() {
        let cell = sv_fresh_undef();
        let r1 = PerlRef::to_scalar(cell.clone());
        let r2 = PerlRef::to_scalar(cell);
        r1.bless("Widget");
        assert_eq!(r2.blessed().as_deref(), Some("Widget"));
        assert!(r2.to_display().starts_with("Widget=SCALAR(0x"));
    }

    #[test]
    fn addresses_identify_referents() {
        let cell = sv_fresh_undef();
        let a = PerlRef::to_scalar(cell.clone());
        let b = PerlRef::to_scalar(cell);
        assert_eq!(a.address(), b.address());
        assert_ne!(a.address(), PerlRef::to_scalar(sv_fresh_undef()).address());
    }
}

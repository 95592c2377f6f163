use std::cell::RefCell;
use std::rc::Rc;

use crate::regex::state::RegexSnapshot;
use crate::values::array::Array;
use crate::values::code::Code;
use crate::values::glob::Glob;
use crate::values::hash::Hash;
use crate::values::scalar::Sv;
use crate::values::string::PStr;

/// One entry of the dynamic-scope stack. Pushed by `local` (and by the
/// regex save around `eval`); executed in LIFO order when the owning scope
/// exits, normally or through an exception or non-local jump.
#[derive(Debug)]
pub enum SaveRecord {
    GlobScalar {
        glob: Rc<Glob>,
        saved: Option<Sv>,
    },
    GlobArray {
        glob: Rc<Glob>,
        saved: Option<Rc<RefCell<Array>>>,
    },
    GlobHash {
        glob: Rc<Glob>,
        saved: Option<Rc<RefCell<Hash>>>,
    },
    GlobCode {
        glob: Rc<Glob>,
        saved: Option<Rc<Code>>,
    },
    HashElem {
        hash: Rc<RefCell<Hash>>,
        key: PStr,
        saved: Option<Sv>,
    },
    ArrayElem {
        array: Rc<RefCell<Array>>,
        index: i64,
        saved: Option<Sv>,
    },
    RegexState(RegexSnapshot),
}

impl SaveRecord {
    /// Applies the record. Regex snapshots are returned to the caller so
    /// the context can hand them back to the adapter.
    fn restore(self) -> Option<RegexSnapshot> {
        match self {
            SaveRecord::GlobScalar { glob, saved } => {
                glob.restore_scalar_slot(saved);
                None
            }
            SaveRecord::GlobArray { glob, saved } => {
                glob.restore_array_slot(saved);
                None
            }
            SaveRecord::GlobHash { glob, saved } => {
                glob.restore_hash_slot(saved);
                None
            }
            SaveRecord::GlobCode { glob, saved } => {
                glob.restore_code_slot(saved);
                None
            }
            SaveRecord::HashElem { hash, key, saved } => {
                let mut hash = hash.borrow_mut();
                match saved {
                    Some(cell) => hash.insert_cell(key, cell),
                    None => {
                        hash.delete(&key);
                    }
                }
                None
            }
            SaveRecord::ArrayElem {
                array,
                index,
                saved,
            } => {
                let mut array = array.borrow_mut();
                match saved {
                    Some(cell) => {
                        if let Some(slot) = array.get_lvalue(index) {
                            let _ = slot.set(cell.get());
                        }
                    }
                    None => {
                        array.delete(index);
                    }
                }
                None
            }
            SaveRecord::RegexState(snapshot) => Some(snapshot),
        }
    }
}

/// Marker for a stack position; `exit_to` runs everything above it.
pub type ScopeMark = usize;

/// The save/restore stack behind `local` and the eval-frame regex state.
#[derive(Debug, Default)]
pub struct DynamicScopeStack {
    records: Vec<SaveRecord>,
}

impl DynamicScopeStack {
    pub fn new() -> DynamicScopeStack {
        DynamicScopeStack::default()
    }

    /// Records the current top; the matching `exit_to` unwinds back here.
    pub fn enter(&self) -> ScopeMark {
        self.records.len()
    }

    pub fn push(&mut self, record: SaveRecord) {
        self.records.push(record);
    }

    pub fn depth(&self) -> usize {
        self.records.len()
    }

    /// Pops every record above `mark` in LIFO order. Regex snapshots are
    /// collected for the caller to feed back into the adapter.
    pub fn exit_to(&mut self, mark: ScopeMark) -> Vec<RegexSnapshot> {
        let mut snapshots = Vec::new();
        while self.records.len() > mark {
            if let Some(record) = self.records.pop() {
                if let Some(snapshot) = record.restore() {
                    snapshots.push(snapshot);
                }
            }
        }
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::scalar::{sv_fresh_undef, Scalar};

    #[test]
    fn glob_scalar_restores_in_lifo_order() {
        let glob = Rc::new(Glob::new("main::v"));
        glob.scalar_cell().set(Scalar::Int(1)).unwrap();

        let mut stack = DynamicScopeStack::new();
        let mark = stack.enter();

        // local $v = 2
        stack.push(SaveRecord::GlobScalar {
            glob: glob.clone(),
            saved: glob.scalar_slot(),
        });
        glob.set_scalar_cell(sv_fresh_undef());
        glob.scalar_cell().set(Scalar::Int(2)).unwrap();

        // nested local $v = 3
        stack.push(SaveRecord::GlobScalar {
            glob: glob.clone(),
            saved: glob.scalar_slot(),
        });
        glob.set_scalar_cell(sv_fresh_undef());
        glob.scalar_cell().set(Scalar::Int(3)).unwrap();

        assert_eq!(glob.scalar_cell().get_int(), 3);
        stack.exit_to(mark);
        assert_eq!(glob.scalar_cell().get_int(), 1);
    }

    #[test]
    fn hash_elem_restore_deletes_vivified_keys() {
        let hash = Rc::new(RefCell::new(Hash::new()));
        let mut stack = DynamicScopeStack::new();
        let mark = stack.enter();

        let key: PStr = "k".into();
        stack.push(SaveRecord::HashElem {
            hash: hash.clone(),
            key: key.clone(),
            saved: hash.borrow().get(&key),
        });
        hash.borrow_mut()
            .get_lvalue(key.clone())
            .set(Scalar::Int(1))
            .unwrap();
        assert!(hash.borrow().exists(&key));

        stack.exit_to(mark);
        assert!(!hash.borrow().exists(&key));
    }

    #[test]
    fn partial_unwind_stops_at_mark() {
        let glob = Rc::new(Glob::new("main::w"));
        glob.scalar_cell().set(Scalar::Int(1)).unwrap();
        let mut stack = DynamicScopeStack::new();

        stack.push(SaveRecord::GlobScalar {
            glob: glob.clone(),
            saved: glob.scalar_slot(),
        });
        glob.set_scalar_cell(sv_fresh_undef());
        glob.scalar_cell().set(Scalar::Int(2)).unwrap();

        let inner = stack.enter();
        stack.push(SaveRecord::GlobScalar {
            glob: glob.clone(),
            saved: glob.scalar_slot(),
        });
        glob.set_scalar_cell(sv_fresh_undef());
        glob.scalar_cell().set(Scalar::Int(3)).unwrap();

        stack.exit_to(inner);
        assert_eq!(glob.scalar_cell().get_int(), 2);
        stack.exit_to(0);
        assert_eq!(glob.scalar_cell().get_int(), 1);
    }
}

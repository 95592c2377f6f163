use std::cell::RefCell;
use std::rc::Rc;

use crate::values::array::Array;
use crate::values::code::Code;
use crate::values::hash::Hash;
use crate::values::scalar::{sv_fresh_undef, Sv};

/// The standard I/O handles a glob's IO slot can carry. File and socket
/// wrappers live outside the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoSlot {
    Stdin,
    Stdout,
    Stderr,
}

/// A typeglob: one fully-qualified identifier addressing distinct SCALAR,
/// ARRAY, HASH, CODE and IO slots. Slots materialise lazily; `local` swaps
/// whole slots and puts the old one back on scope exit.
#[derive(Debug)]
pub struct Glob {
    name: String,
    scalar: RefCell<Option<Sv>>,
    array: RefCell<Option<Rc<RefCell<Array>>>>,
    hash: RefCell<Option<Rc<RefCell<Hash>>>>,
    code: RefCell<Option<Rc<Code>>>,
    io: RefCell<Option<IoSlot>>,
}

impl Glob {
    pub fn new(name: impl Into<String>) -> Glob {
        Glob {
            name: name.into(),
            scalar: RefCell::new(None),
            array: RefCell::new(None),
            hash: RefCell::new(None),
            code: RefCell::new(None),
            io: RefCell::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scalar slot, created on first access.
    pub fn scalar_cell(&self) -> Sv {
        self.scalar
            .borrow_mut()
            .get_or_insert_with(sv_fresh_undef)
            .clone()
    }

    /// Raw slot view; `None` when never touched. Used by save-records.
    pub fn scalar_slot(&self) -> Option<Sv> {
        self.scalar.borrow().clone()
    }

    pub fn set_scalar_cell(&self, cell: Sv) {
        *self.scalar.borrow_mut() = Some(cell);
    }

    pub fn restore_scalar_slot(&self, slot: Option<Sv>) {
        *self.scalar.borrow_mut() = slot;
    }

    pub fn array(&self) -> Rc<RefCell<Array>> {
        self.array
            .borrow_mut()
            .get_or_insert_with(|| Rc::new(RefCell::new(Array::new())))
            .clone()
    }

    pub fn array_slot(&self) -> Option<Rc<RefCell<Array>>> {
        self.array.borrow().clone()
    }

    pub fn set_array(&self, array: Rc<RefCell<Array>>) {
        *self.array.borrow_mut() = Some(array);
    }

    pub fn restore_array_slot(&self, slot: Option<Rc<RefCell<Array>>>) {
        *self.array.borrow_mut() = slot;
    }

    pub fn hash(&self) -> Rc<RefCell<Hash>> {
        self.hash
            .borrow_mut()
            .get_or_insert_with(|| Rc::new(RefCell::new(Hash::new())))
            .clone()
    }

    pub fn hash_slot(&self) -> Option<Rc<RefCell<Hash>>> {
        self.hash.borrow().clone()
    }

    pub fn set_hash(&self, hash: Rc<RefCell<Hash>>) {
        *self.hash.borrow_mut() = Some(hash);
    }

    pub fn restore_hash_slot(&self, slot: Option<Rc<RefCell<Hash>>>) {
        *self.hash.borrow_mut() = slot;
    }

    pub fn code(&self) -> Option<Rc<Code>> {
        self.code.borrow().clone()
    }

    pub fn set_code(&self, code: Rc<Code>) {
        *self.code.borrow_mut() = Some(code);
    }

    pub fn restore_code_slot(&self, slot: Option<Rc<Code>>) {
        *self.code.borrow_mut() = slot;
    }

    pub fn io(&self) -> Option<IoSlot> {
        *self.io.borrow()
    }

    pub fn set_io(&self, io: IoSlot) {
        *self.io.borrow_mut() = Some(io);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::scalar::Scalar;

    #[test]
    fn slots_are_lazy_and_stable() {
        let glob = Glob::new("main::x");
        assert!(glob.scalar_slot().is_none());
        let cell = glob.scalar_cell();
        cell.set(Scalar::Int(7)).unwrap();
        // second access returns the same cell
        assert_eq!(glob.scalar_cell().get_int(), 7);
        assert!(glob.scalar_slot().is_some());
    }

    #[test]
    fn slot_swap_round_trip() {
        let glob = Glob::new("main::y");
        let original = glob.scalar_cell();
        original.set(Scalar::Int(1)).unwrap();
        let saved = glob.scalar_slot();

        glob.set_scalar_cell(sv_fresh_undef());
        glob.scalar_cell().set(Scalar::Int(2)).unwrap();
        assert_eq!(glob.scalar_cell().get_int(), 2);

        glob.restore_scalar_slot(saved);
        assert_eq!(glob.scalar_cell().get_int(), 1);
    }
}

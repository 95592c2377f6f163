use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::values::array::Array;
use crate::values::code::Code;
use crate::values::glob::Glob;
use crate::values::hash::Hash;
use crate::values::scalar::Sv;

/// The global symbol table: fully-qualified name to typeglob. Entries are
/// created lazily on first access and never destroyed while the context
/// lives. One table per runtime context; nothing process-wide.
#[derive(Debug, Default)]
pub struct SymbolTable {
    globs: HashMap<String, Rc<Glob>>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    /// Fetches the glob for `name`, creating it on first access.
    pub fn glob(&mut self, name: &str) -> Rc<Glob> {
        if let Some(glob) = self.globs.get(name) {
            return glob.clone();
        }
        let glob = Rc::new(Glob::new(name));
        self.globs.insert(name.to_string(), glob.clone());
        glob
    }

    /// Read-only lookup that does not vivify.
    pub fn lookup_glob(&self, name: &str) -> Option<Rc<Glob>> {
        self.globs.get(name).cloned()
    }

    pub fn scalar(&mut self, name: &str) -> Sv {
        self.glob(name).scalar_cell()
    }

    pub fn array(&mut self, name: &str) -> Rc<RefCell<Array>> {
        self.glob(name).array()
    }

    pub fn hash(&mut self, name: &str) -> Rc<RefCell<Hash>> {
        self.glob(name).hash()
    }

    pub fn lookup_code(&self, name: &str) -> Option<Rc<Code>> {
        self.globs.get(name).and_then(|glob| glob.code())
    }

    pub fn set_code(&mut self, name: &str, code: Rc<Code>) {
        self.glob(name).set_code(code);
    }

    /// Qualifies a bare identifier against a package. Names that already
    /// carry a package separator pass through; `main` owns the punctuation
    /// and single-character variables.
    pub fn qualify(package: &str, name: &str) -> String {
        if name.contains("::") || name.contains('\'') {
            name.to_string()
        } else {
            format!("{}::{}", package, name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::scalar::Scalar;

    #[test]
    fn globs_vivify_lazily_and_persist() {
        let mut table = SymbolTable::new();
        assert!(table.lookup_glob("main::x").is_none());
        let cell = table.scalar("main::x");
        cell.set(Scalar::Int(5)).unwrap();
        assert!(table.lookup_glob("main::x").is_some());
        assert_eq!(table.scalar("main::x").get_int(), 5);
    }

    #[test]
    fn qualification() {
        assert_eq!(SymbolTable::qualify("main", "x"), "main::x");
        assert_eq!(SymbolTable::qualify("Foo", "x"), "Foo::x");
        assert_eq!(SymbolTable::qualify("Foo", "Bar::x"), "Bar::x");
    }

    #[test]
    fn distinct_slots_share_one_glob() {
        let mut table = SymbolTable::new();
        let glob = table.glob("main::thing");
        glob.scalar_cell().set(Scalar::Int(1)).unwrap();
        table.array("main::thing").borrow_mut().push_value(Scalar::Int(2));
        // scalar slot unaffected by array slot
        assert_eq!(table.scalar("main::thing").get_int(), 1);
        assert_eq!(table.array("main::thing").borrow().len(), 1);
    }
}

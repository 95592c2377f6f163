use indexmap::IndexMap;

use crate::values::scalar::{sv_fresh_undef, Scalar, ScalarCell, Sv};
use crate::values::string::PStr;

/// Insertion-ordered mapping from string keys to owned scalar cells.
///
/// One iteration cursor per hash: `keys` and `values` reset it, `each`
/// advances it. Mutation during iteration is defined only for deleting the
/// key most recently returned by `each`.
#[derive(Debug, Default)]
pub struct Hash {
    map: IndexMap<PStr, Sv>,
    cursor: usize,
    pub blessed: Option<String>,
}

impl Hash {
    pub fn new() -> Hash {
        Hash::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, key: &PStr) -> Option<Sv> {
        self.map.get(key).cloned()
    }

    /// L-value fetch: vivifies the slot with a fresh undef cell.
    pub fn get_lvalue(&mut self, key: PStr) -> Sv {
        self.map.entry(key).or_insert_with(sv_fresh_undef).clone()
    }

    pub fn exists(&self, key: &PStr) -> bool {
        self.map.contains_key(key)
    }

    pub fn insert_value(&mut self, key: PStr, value: Scalar) {
        match self.map.entry(key) {
            indexmap::map::Entry::Occupied(e) => {
                // keep the existing cell alive for outstanding aliases
                let _ = e.get().set(value);
            }
            indexmap::map::Entry::Vacant(e) => {
                e.insert(ScalarCell::new(value));
            }
        }
    }

    pub fn insert_cell(&mut self, key: PStr, cell: Sv) {
        self.map.insert(key, cell);
    }

    /// `delete`: order-preserving removal. The cursor shifts down when an
    /// earlier entry disappears so `each` neither skips nor repeats.
    pub fn delete(&mut self, key: &PStr) -> Option<Sv> {
        let index = self.map.get_index_of(key)?;
        let (_, cell) = self.map.shift_remove_entry(key)?;
        if index < self.cursor {
            self.cursor -= 1;
        }
        Some(cell)
    }

    pub fn keys(&mut self) -> Vec<PStr> {
        self.cursor = 0;
        self.map.keys().cloned().collect()
    }

    pub fn values(&mut self) -> Vec<Sv> {
        self.cursor = 0;
        self.map.values().cloned().collect()
    }

    /// Advances the shared cursor; `None` marks exhaustion and resets.
    pub fn each(&mut self) -> Option<(PStr, Sv)> {
        match self.map.get_index(self.cursor) {
            Some((k, v)) => {
                self.cursor += 1;
                Some((k.clone(), v.clone()))
            }
            None => {
                self.cursor = 0;
                None
            }
        }
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.cursor = 0;
    }

    pub fn entries(&self) -> impl Iterator<Item = (&PStr, &Sv)> {
        self.map.iter()
    }

    /// Replaces the whole contents from a flat key/value list.
    pub fn replace_with_pairs(&mut self, pairs: impl IntoIterator<Item = (PStr, Scalar)>) {
        self.map.clear();
        self.cursor = 0;
        for (key, value) in pairs {
            self.insert_value(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Hash {
        let mut h = Hash::new();
        h.insert_value("one".into(), Scalar::Int(1));
        h.insert_value("two".into(), Scalar::Int(2));
        h.insert_value("three".into(), Scalar::Int(3));
        h
    }

    #[test]
    fn keys_preserve_insertion_order() {
        let mut h = sample();
        let keys: Vec<String> = h.keys().iter().map(|k| k.to_text().into_owned()).collect();
        assert_eq!(keys, vec!["one", "two", "three"]);
    }

    #[test]
    fn each_walks_and_resets() {
        let mut h = sample();
        let first = h.each().unwrap();
        assert_eq!(first.0.to_text(), "one");
        let second = h.each().unwrap();
        assert_eq!(second.0.to_text(), "two");
        // keys() resets the shared cursor
        h.keys();
        assert_eq!(h.each().unwrap().0.to_text(), "one");
    }

    #[test]
    fn delete_current_key_is_safe() {
        let mut h = sample();
        let (k, _) = h.each().unwrap();
        h.delete(&k);
        // cursor shifted down: next each() continues with "two"
        assert_eq!(h.each().unwrap().0.to_text(), "two");
        assert_eq!(h.each().unwrap().0.to_text(), "three");
        assert!(h.each().is_none());
    }

    #[test]
    fn lvalue_vivifies() {
        let mut h = Hash::new();
        let cell = h.get_lvalue("x".into());
        assert!(!cell.is_defined());
        cell.set(Scalar::Int(5)).unwrap();
        assert_eq!(h.get(&"x".into()).unwrap().get_int(), 5);
    }

    #[test]
    fn insert_keeps_aliased_cell() {
        let mut h = sample();
        let alias = h.get(&"one".into()).unwrap();
        h.insert_value("one".into(), Scalar::Int(99));
        assert_eq!(alias.get_int(), 99);
    }
}

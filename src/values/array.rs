use crate::values::scalar::{sv_fresh_undef, Scalar, ScalarCell, Sv};

/// A growable sequence of owned scalar cells. Elements are cells, not
/// values: `foreach` and `@_` alias them, and an element fetched as an
/// l-value stays live after the array grows around it.
#[derive(Debug, Default)]
pub struct Array {
    elems: Vec<Sv>,
    pub blessed: Option<String>,
}

impl Array {
    pub fn new() -> Array {
        Array::default()
    }

    pub fn from_cells(elems: Vec<Sv>) -> Array {
        Array {
            elems,
            blessed: None,
        }
    }

    pub fn from_values(values: impl IntoIterator<Item = Scalar>) -> Array {
        Array {
            elems: values.into_iter().map(ScalarCell::new).collect(),
            blessed: None,
        }
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    fn resolve_index(&self, index: i64) -> Option<usize> {
        if index < 0 {
            let wrapped = self.elems.len() as i64 + index;
            (wrapped >= 0).then_some(wrapped as usize)
        } else {
            Some(index as usize)
        }
    }

    /// R-value fetch: out-of-range reads yield `None` (undef) and must not
    /// extend the array.
    pub fn get(&self, index: i64) -> Option<Sv> {
        let i = self.resolve_index(index)?;
        self.elems.get(i).cloned()
    }

    /// L-value fetch: extends with fresh undef cells so the returned cell
    /// is a live element. Negative indices past the front stay invalid.
    pub fn get_lvalue(&mut self, index: i64) -> Option<Sv> {
        let i = self.resolve_index(index)?;
        while self.elems.len() <= i {
            self.elems.push(sv_fresh_undef());
        }
        Some(self.elems[i].clone())
    }

    pub fn exists(&self, index: i64) -> bool {
        self.resolve_index(index)
            .map(|i| i < self.elems.len())
            .unwrap_or(false)
    }

    /// `delete $a[$i]`: undefs the slot, truncating when it is the tail.
    pub fn delete(&mut self, index: i64) -> Option<Sv> {
        let i = self.resolve_index(index)?;
        if i >= self.elems.len() {
            return None;
        }
        if i == self.elems.len() - 1 {
            self.elems.pop()
        } else {
            let old = self.elems[i].clone();
            self.elems[i] = sv_fresh_undef();
            Some(old)
        }
    }

    /// Copy-in append (`push @a, LIST` copies its arguments).
    pub fn push_value(&mut self, value: Scalar) {
        self.elems.push(ScalarCell::new(value));
    }

    /// Aliasing append, used for `@_` construction.
    pub fn push_cell(&mut self, cell: Sv) {
        self.elems.push(cell);
    }

    pub fn pop(&mut self) -> Option<Sv> {
        self.elems.pop()
    }

    pub fn shift(&mut self) -> Option<Sv> {
        if self.elems.is_empty() {
            None
        } else {
            Some(self.elems.remove(0))
        }
    }

    pub fn unshift_value(&mut self, value: Scalar) {
        self.elems.insert(0, ScalarCell::new(value));
    }

    /// `splice` with Perl offset/length semantics; returns the removed
    /// cells in order.
    pub fn splice(
        &mut self,
        offset: i64,
        length: Option<i64>,
        replacement: Vec<Sv>,
    ) -> Vec<Sv> {
        let n = self.elems.len() as i64;
        let start = if offset < 0 {
            (n + offset).max(0)
        } else {
            offset.min(n)
        } as usize;
        let remove = match length {
            None => self.elems.len() - start,
            Some(l) if l < 0 => {
                let end = (n + l).max(start as i64) as usize;
                end - start
            }
            Some(l) => (l as usize).min(self.elems.len() - start),
        };
        self.elems.splice(start..start + remove, replacement).collect()
    }

    pub fn clear(&mut self) {
        self.elems.clear();
    }

    pub fn cells(&self) -> &[Sv] {
        &self.elems
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sv> {
        self.elems.iter()
    }

    /// Replaces the whole contents with copies of `values` (list assignment).
    pub fn replace_with_values(&mut self, values: impl IntoIterator<Item = Scalar>) {
        self.elems = values.into_iter().map(ScalarCell::new).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::scalar::sv_str;

    fn int_array(values: &[i64]) -> Array {
        Array::from_values(values.iter().map(|&i| Scalar::Int(i)))
    }

    #[test]
    fn rvalue_get_does_not_extend() {
        let a = int_array(&[1, 2]);
        assert!(a.get(5).is_none());
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn lvalue_get_extends() {
        let mut a = int_array(&[1]);
        let cell = a.get_lvalue(3).unwrap();
        assert_eq!(a.len(), 4);
        assert!(!cell.is_defined());
        cell.set(Scalar::Int(9)).unwrap();
        assert_eq!(a.get(3).unwrap().get_int(), 9);
    }

    #[test]
    fn negative_indices_wrap() {
        let mut a = int_array(&[1, 2, 3]);
        assert_eq!(a.get(-1).unwrap().get_int(), 3);
        assert!(a.get(-4).is_none());
        assert!(a.get_lvalue(-4).is_none());
    }

    #[test]
    fn splice_returns_removed() {
        let mut a = int_array(&[1, 2, 3, 4, 5]);
        let removed = a.splice(1, Some(2), vec![sv_str("x")]);
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].get_int(), 2);
        assert_eq!(a.len(), 4);
        assert_eq!(a.get(1).unwrap().get_str().to_text(), "x");
    }

    #[test]
    fn delete_truncates_tail() {
        let mut a = int_array(&[1, 2, 3]);
        a.delete(2);
        assert_eq!(a.len(), 2);
        a.delete(0);
        assert_eq!(a.len(), 2);
        assert!(!a.get(0).unwrap().is_defined());
    }
}

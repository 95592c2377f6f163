use crate::values::scalar::{Scalar, ScalarCell, Sv};
use crate::values::string::PStr;

/// The lazy iterator carried inside a `Scalar::Iter` payload by the
/// `foreach` opcodes. Ranges never materialise: a loop over `1..50_000_000`
/// holds two integers, not fifty million cells.
///
/// This is explicit cursor state, not a suspended execution context.
#[derive(Debug)]
pub enum PerlIter {
    /// Inclusive numeric range. Yields read-only cells, matching the
    /// aliasing rules for foreach over a constant range.
    Range { current: i64, end: i64 },
    /// Magic string range (`'aa'..'az'`), driven by string increment.
    StrRange {
        current: PStr,
        end: PStr,
        done: bool,
    },
    /// A snapshot of cells: foreach over an array aliases its live
    /// elements, so mutation through the loop variable is visible.
    Cells { cells: Vec<Sv>, index: usize },
}

impl PerlIter {
    pub fn over_range(from: i64, to: i64) -> PerlIter {
        PerlIter::Range {
            current: from,
            end: to,
        }
    }

    pub fn over_str_range(from: PStr, to: PStr) -> PerlIter {
        PerlIter::StrRange {
            current: from,
            end: to,
            done: false,
        }
    }

    pub fn over_cells(cells: Vec<Sv>) -> PerlIter {
        PerlIter::Cells { cells, index: 0 }
    }

    pub fn next(&mut self) -> Option<Sv> {
        match self {
            PerlIter::Range { current, end } => {
                if *current > *end {
                    None
                } else {
                    let value = *current;
                    *current += 1;
                    Some(ScalarCell::new_read_only(Scalar::Int(value)))
                }
            }
            PerlIter::StrRange { current, end, done } => {
                if *done {
                    return None;
                }
                let value = current.clone();
                if value == *end || value.char_len() > end.char_len() {
                    *done = true;
                    if value.char_len() > end.char_len() {
                        return None;
                    }
                } else {
                    *current = current.string_increment();
                }
                Some(ScalarCell::new_read_only(Scalar::Str(value)))
            }
            PerlIter::Cells { cells, index } => {
                let cell = cells.get(*index).cloned();
                if cell.is_some() {
                    *index += 1;
                }
                cell
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_lazy_and_inclusive() {
        let mut it = PerlIter::over_range(1, 3);
        assert_eq!(it.next().unwrap().get_int(), 1);
        assert_eq!(it.next().unwrap().get_int(), 2);
        assert_eq!(it.next().unwrap().get_int(), 3);
        assert!(it.next().is_none());
    }

    #[test]
    fn range_cells_are_read_only() {
        let mut it = PerlIter::over_range(5, 5);
        let cell = it.next().unwrap();
        assert!(cell.is_read_only());
    }

    #[test]
    fn string_range_increments() {
        let mut it = PerlIter::over_str_range("ax".into(), "bb".into());
        let got: Vec<String> = std::iter::from_fn(|| it.next())
            .map(|sv| sv.get_str().to_text().into_owned())
            .collect();
        assert_eq!(got, vec!["ax", "ay", "az", "ba", "bb"]);
    }

    #[test]
    fn cell_iteration_aliases() {
        let cell = ScalarCell::new(Scalar::Int(1));
        let mut it = PerlIter::over_cells(vec![cell.clone()]);
        let seen = it.next().unwrap();
        seen.set(Scalar::Int(9)).unwrap();
        assert_eq!(cell.get_int(), 9);
    }
}

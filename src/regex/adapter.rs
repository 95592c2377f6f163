use std::collections::HashMap;
use std::rc::{Rc, Weak};

use log::trace;
use regex::{Regex, RegexBuilder};

use crate::global::error::RegexError;
use crate::regex::preprocessor::{preprocess, PatternFlags, PatternMeta};
use crate::regex::state::RegexSnapshot;
use crate::values::scalar::{ScalarCell, Sv};
use crate::values::string::PStr;

/// A pattern after preprocessing. `regex` is absent when the preprocessor
/// found a feature with no lowering; executing such a pattern raises the
/// catchable `Unimplemented` error.
#[derive(Debug)]
pub struct CompiledPattern {
    pub source: String,
    pub host_pattern: String,
    pub meta: PatternMeta,
    pub flags: PatternFlags,
    regex: Option<Regex>,
}

impl CompiledPattern {
    pub fn regex(&self) -> Result<&Regex, RegexError> {
        match &self.regex {
            Some(re) => Ok(re),
            None => Err(RegexError::Unimplemented(
                self.meta
                    .unimplemented
                    .clone()
                    .unwrap_or_else(|| "pattern feature".into()),
            )),
        }
    }

    /// How many groups a list-context match reports. Branch-reset groups
    /// keep their sequential host numbering (Phase-1 behaviour).
    pub fn capture_slots(&self) -> usize {
        self.meta.host_capture_count
    }
}

/// The per-context last-match record behind `$1..$n`, `$&`, `` $` ``, `$'`
/// and `@-`/`@+`. Offsets are byte positions into the host-form subject.
#[derive(Debug, Clone)]
pub struct MatchState {
    pub subject: String,
    pub subject_unicode: bool,
    pub pattern: String,
    pub captures: Vec<Option<(usize, usize)>>,
    pub named: Vec<(String, usize)>,
}

impl MatchState {
    fn slice(&self, range: (usize, usize)) -> PStr {
        let text = &self.subject[range.0..range.1];
        if self.subject_unicode {
            PStr::from_unicode(text)
        } else {
            PStr::from_text(text)
        }
    }
}

/// Wraps the host regex engine with Perl semantics: a compiled-pattern
/// cache, the thread-of-control's last-match state, and the registry of
/// cells whose `pos()` has been touched by `m//g`.
#[derive(Debug, Default)]
pub struct RegexAdapter {
    cache: HashMap<String, Rc<CompiledPattern>>,
    last_match: Option<MatchState>,
    touched_pos: Vec<Weak<ScalarCell>>,
}

impl RegexAdapter {
    pub fn new() -> RegexAdapter {
        RegexAdapter::default()
    }

    /// Preprocesses and compiles, memoising per (flags, pattern) pair.
    pub fn compile(
        &mut self,
        pattern: &str,
        flags: PatternFlags,
    ) -> Result<Rc<CompiledPattern>, RegexError> {
        let key = format!(
            "{}{}{}{}\u{0}{}",
            flags.ignore_case as u8,
            flags.multiline as u8,
            flags.dot_all as u8,
            flags.extended as u8,
            pattern
        );
        if let Some(compiled) = self.cache.get(&key) {
            return Ok(compiled.clone());
        }
        let (body, meta) = preprocess(pattern, &flags)?;
        let host_pattern = format!("{}{}", flags.host_prefix(), body);
        let regex = if meta.unimplemented.is_none() {
            trace!("compiling host pattern: {}", host_pattern);
            Some(
                RegexBuilder::new(&host_pattern)
                    .build()
                    .map_err(|err| RegexError::Syntax(err.to_string()))?,
            )
        } else {
            None
        };
        let compiled = Rc::new(CompiledPattern {
            source: pattern.to_string(),
            host_pattern,
            meta,
            flags,
            regex,
        });
        self.cache.insert(key, compiled.clone());
        Ok(compiled)
    }

    /// Runs `pattern` against `subject` from byte offset `start` of the
    /// host form. On success, optionally installs the last-match state and
    /// returns the overall byte span.
    pub fn exec(
        &mut self,
        pattern: &Rc<CompiledPattern>,
        subject: &PStr,
        start: usize,
        set_last: bool,
    ) -> Result<Option<(usize, usize)>, RegexError> {
        let text = subject.to_text().into_owned();
        if start > text.len() {
            return Ok(None);
        }
        let regex = pattern.regex()?;
        let captures = match regex.captures_at(&text, start) {
            Some(captures) => captures,
            None => return Ok(None),
        };
        let whole = captures
            .get(0)
            .map(|m| (m.start(), m.end()))
            .unwrap_or((0, 0));
        if set_last {
            let slots: Vec<Option<(usize, usize)>> = (0..captures.len())
                .map(|i| captures.get(i).map(|m| (m.start(), m.end())))
                .collect();
            self.last_match = Some(MatchState {
                subject: text,
                subject_unicode: subject.is_unicode(),
                pattern: pattern.source.clone(),
                captures: slots,
                named: pattern.meta.named_groups.clone(),
            });
        }
        Ok(Some(whole))
    }

    pub fn last_match(&self) -> Option<&MatchState> {
        self.last_match.as_ref()
    }

    /// `$1..$n`: `None` for no-match-yet and for non-participating groups.
    pub fn capture_pstr(&self, n: usize) -> Option<PStr> {
        let state = self.last_match.as_ref()?;
        let range = state.captures.get(n).copied().flatten()?;
        Some(state.slice(range))
    }

    pub fn named_capture_pstr(&self, name: &str) -> Option<PStr> {
        let state = self.last_match.as_ref()?;
        let n = state
            .named
            .iter()
            .find(|(have, _)| have == name)
            .map(|(_, n)| *n)?;
        self.capture_pstr(n)
    }

    /// `$&`.
    pub fn match_pstr(&self) -> Option<PStr> {
        let state = self.last_match.as_ref()?;
        let range = state.captures.first().copied().flatten()?;
        Some(state.slice(range))
    }

    /// `` $` ``.
    pub fn prematch_pstr(&self) -> Option<PStr> {
        let state = self.last_match.as_ref()?;
        let range = state.captures.first().copied().flatten()?;
        Some(state.slice((0, range.0)))
    }

    /// `$'`.
    pub fn postmatch_pstr(&self) -> Option<PStr> {
        let state = self.last_match.as_ref()?;
        let range = state.captures.first().copied().flatten()?;
        Some(state.slice((range.1, state.subject.len())))
    }

    /// `@-` / `@+` entry, reported in characters of the subject.
    pub fn capture_offsets(&self, n: usize) -> Option<(usize, usize)> {
        let state = self.last_match.as_ref()?;
        let (start, end) = state.captures.get(n).copied().flatten()?;
        Some((
            state.subject[..start].chars().count(),
            state.subject[..end].chars().count(),
        ))
    }

    pub fn last_capture_count(&self) -> usize {
        self.last_match
            .as_ref()
            .map(|s| s.captures.len().saturating_sub(1))
            .unwrap_or(0)
    }

    /// Registers a variable whose `pos()` the adapter has set, so that
    /// snapshots can save and restore it around `eval` frames.
    pub fn record_pos_cell(&mut self, cell: &Sv) {
        let already = self
            .touched_pos
            .iter()
            .any(|weak| weak.as_ptr() == Rc::as_ptr(cell));
        if !already {
            self.touched_pos.push(Rc::downgrade(cell));
        }
    }

    /// Captures all adapter state by value.
    pub fn snapshot(&mut self) -> RegexSnapshot {
        self.touched_pos.retain(|weak| weak.strong_count() > 0);
        RegexSnapshot {
            last_match: self.last_match.clone(),
            pos: self
                .touched_pos
                .iter()
                .map(|weak| {
                    let saved = weak.upgrade().and_then(|cell| cell.pos());
                    (weak.clone(), saved)
                })
                .collect(),
        }
    }

    /// Atomically reinstates a snapshot.
    pub fn restore(&mut self, snapshot: RegexSnapshot) {
        snapshot.restore_positions();
        self.last_match = snapshot.last_match;
    }
}

/// Translates a character offset (the user-visible `pos()` unit) into a
/// byte offset of the host subject form.
pub fn char_to_byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// Inverse of [`char_to_byte_offset`].
pub fn byte_to_char_offset(text: &str, bytes: usize) -> usize {
    text[..bytes.min(text.len())].chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> RegexAdapter {
        RegexAdapter::new()
    }

    #[test]
    fn basic_match_and_captures() {
        let mut a = adapter();
        let pat = a.compile("(\\w+) (\\w+)", PatternFlags::default()).unwrap();
        let subject = PStr::from_text("hello world");
        let whole = a.exec(&pat, &subject, 0, true).unwrap().unwrap();
        assert_eq!(whole, (0, 11));
        assert_eq!(a.capture_pstr(1).unwrap().to_text(), "hello");
        assert_eq!(a.capture_pstr(2).unwrap().to_text(), "world");
        assert_eq!(a.match_pstr().unwrap().to_text(), "hello world");
    }

    #[test]
    fn nonparticipating_vs_empty_capture() {
        let mut a = adapter();
        let pat = a.compile("(a)?(b*)", PatternFlags::default()).unwrap();
        a.exec(&pat, &PStr::from_text(""), 0, true).unwrap().unwrap();
        // (a)? did not participate; (b*) matched the empty string
        assert_eq!(a.capture_pstr(1), None);
        assert_eq!(a.capture_pstr(2).unwrap().to_text(), "");
    }

    #[test]
    fn unimplemented_pattern_fails_at_exec() {
        let mut a = adapter();
        let pat = a.compile("a(?=b)", PatternFlags::default()).unwrap();
        let err = a.exec(&pat, &PStr::from_text("ab"), 0, true).unwrap_err();
        assert!(matches!(err, RegexError::Unimplemented(_)));
    }

    #[test]
    fn snapshot_round_trips() {
        let mut a = adapter();
        let pat = a.compile("(.)", PatternFlags::default()).unwrap();
        a.exec(&pat, &PStr::from_text("ABC"), 0, true).unwrap();
        assert_eq!(a.capture_pstr(1).unwrap().to_text(), "A");

        let snapshot = a.snapshot();
        a.exec(&pat, &PStr::from_text("XYZ"), 0, true).unwrap();
        assert_eq!(a.capture_pstr(1).unwrap().to_text(), "X");

        a.restore(snapshot);
        assert_eq!(a.capture_pstr(1).unwrap().to_text(), "A");
    }

    #[test]
    fn pos_cells_restore_through_snapshots() {
        let mut a = adapter();
        let cell = crate::values::scalar::sv_str("aaa");
        cell.set_pos(Some(1));
        a.record_pos_cell(&cell);

        let snapshot = a.snapshot();
        cell.set_pos(Some(3));
        a.restore(snapshot);
        assert_eq!(cell.pos(), Some(1));
    }

    #[test]
    fn case_insensitive_flag() {
        let mut a = adapter();
        let pat = a.compile("abc", PatternFlags::parse("i")).unwrap();
        assert!(a
            .exec(&pat, &PStr::from_text("xABCy"), 0, false)
            .unwrap()
            .is_some());
    }
}

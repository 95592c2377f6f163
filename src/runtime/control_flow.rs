use std::rc::Rc;

use log::error;

use crate::values::code::Code;
use crate::values::scalar::Sv;

/// The non-local control signal: `last`/`next`/`redo LABEL`, `return`, and
/// `goto &sub`. A label of `None` matches the innermost enclosing loop; a
/// named label matches the nearest loop compiled with that label.
#[derive(Debug, Clone)]
pub enum ControlMarker {
    Last(Option<String>),
    Next(Option<String>),
    Redo(Option<String>),
    Return(Vec<Sv>),
    GotoSub(Rc<Code>),
}

/// What a loop probe should do once a matching loop marker is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopSignal {
    Last,
    Next,
    Redo,
}

/// The per-context single-slot registry that carries markers across frames.
/// Cross-context control flow is forbidden; the registry lives on the
/// runtime context, never in a process global.
#[derive(Debug, Default)]
pub struct ControlFlowRegistry {
    slot: Option<ControlMarker>,
}

impl ControlFlowRegistry {
    pub fn new() -> ControlFlowRegistry {
        ControlFlowRegistry::default()
    }

    /// Installs a marker. The slot must be empty; a stale marker means a
    /// probe was skipped, which is an interpreter invariant violation.
    pub fn set(&mut self, marker: ControlMarker) {
        if let Some(old) = &self.slot {
            error!("control marker overwritten while occupied: {:?}", old);
            debug_assert!(false, "control-flow registry slot already occupied");
        }
        self.slot = Some(marker);
    }

    pub fn is_set(&self) -> bool {
        self.slot.is_some()
    }

    pub fn peek(&self) -> Option<&ControlMarker> {
        self.slot.as_ref()
    }

    /// Atomic test-and-clear for loop markers: clears and reports the
    /// signal only when the marker's label matches this loop.
    pub fn take_if_loop(&mut self, label: Option<&str>) -> Option<LoopSignal> {
        let matches = |wanted: &Option<String>| match wanted {
            None => true,
            Some(name) => label == Some(name.as_str()),
        };
        let signal = match &self.slot {
            Some(ControlMarker::Last(l)) if matches(l) => LoopSignal::Last,
            Some(ControlMarker::Next(l)) if matches(l) => LoopSignal::Next,
            Some(ControlMarker::Redo(l)) if matches(l) => LoopSignal::Redo,
            _ => return None,
        };
        self.slot = None;
        Some(signal)
    }

    pub fn take_return(&mut self) -> Option<Vec<Sv>> {
        match &self.slot {
            Some(ControlMarker::Return(_)) => match self.slot.take() {
                Some(ControlMarker::Return(values)) => Some(values),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn take_goto(&mut self) -> Option<Rc<Code>> {
        match &self.slot {
            Some(ControlMarker::GotoSub(_)) => match self.slot.take() {
                Some(ControlMarker::GotoSub(code)) => Some(code),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn take(&mut self) -> Option<ControlMarker> {
        self.slot.take()
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlabelled_marker_matches_any_loop() {
        let mut reg = ControlFlowRegistry::new();
        reg.set(ControlMarker::Last(None));
        assert_eq!(reg.take_if_loop(Some("OUTER")), Some(LoopSignal::Last));
        assert!(!reg.is_set());
    }

    #[test]
    fn labelled_marker_skips_inner_loops() {
        let mut reg = ControlFlowRegistry::new();
        reg.set(ControlMarker::Next(Some("OUTER".into())));
        // inner unlabelled loop must not take it
        assert_eq!(reg.take_if_loop(None), None);
        assert!(reg.is_set());
        assert_eq!(reg.take_if_loop(Some("OUTER")), Some(LoopSignal::Next));
        assert!(!reg.is_set());
    }

    #[test]
    fn loop_probe_ignores_return() {
        let mut reg = ControlFlowRegistry::new();
        reg.set(ControlMarker::Return(vec![]));
        assert_eq!(reg.take_if_loop(None), None);
        assert!(reg.take_return().is_some());
    }
}

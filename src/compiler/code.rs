use std::rc::Rc;

use crate::values::scalar::Sv;

/// One captured lexical: which register of the creating frame to read the
/// cell from, and which low-numbered register of the callee to alias it
/// into. Captures occupy registers `3 + i` in descriptor order.
#[derive(Debug, Clone)]
pub struct CapturedVar {
    pub name: String,
    /// register in the creating (outer) frame
    pub outer_reg: u8,
    /// register in the callee frame
    pub slot: u8,
}

/// Extent and unwind targets of one loop (or bare labelled block) in a
/// compiled body. These entries are the control-flow probes: whenever a
/// marker is raised at a pc inside `start..end`, the interpreter consults
/// them innermost-first.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    pub label: Option<String>,
    pub start: u32,
    pub end: u32,
    pub redo_pc: u32,
    pub next_pc: u32,
    pub last_pc: u32,
    /// frame scope depth at loop entry; unwinding pops back to it
    pub scope_depth: u32,
}

/// The lexical environment of one `eval STRING` site: the package in
/// force there and the visible lexicals (sigil-qualified name to the
/// frame register holding the cell).
#[derive(Debug, Clone)]
pub struct EvalScope {
    pub package: String,
    pub lexicals: Vec<(String, u8)>,
}

/// A compiled function body. Immutable after compilation.
#[derive(Debug)]
pub struct InterpretedCode {
    pub bytecode: Vec<u8>,
    pub constants: Vec<Sv>,
    pub max_register: u16,
    pub captured: Vec<CapturedVar>,
    /// sorted (pc, line) pairs; errors resolve locations here, never from
    /// a lexer cursor
    pub line_map: Vec<(u32, u32)>,
    pub loops: Vec<LoopInfo>,
    /// lexical environments for `eval STRING` sites, indexed by the
    /// EVAL_STRING constant operand
    pub eval_scopes: Vec<EvalScope>,
    /// true for `eval BLOCK` bodies: errors convert to `$@`
    pub catches_errors: bool,
    pub file: Rc<str>,
    pub name: Option<String>,
}

impl InterpretedCode {
    /// Source line for a pc, from the compiled map.
    pub fn line_for_pc(&self, pc: u32) -> u32 {
        let mut line = self.line_map.first().map(|&(_, l)| l).unwrap_or(0);
        for &(start, l) in &self.line_map {
            if start > pc {
                break;
            }
            line = l;
        }
        line
    }

    /// Loops containing `pc`, innermost first.
    pub fn loops_at(&self, pc: u32) -> Vec<&LoopInfo> {
        let mut found: Vec<&LoopInfo> = self
            .loops
            .iter()
            .filter(|info| info.start <= pc && pc < info.end)
            .collect();
        found.sort_by(|a, b| b.start.cmp(&a.start).then(a.end.cmp(&b.end)));
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_code(line_map: Vec<(u32, u32)>, loops: Vec<LoopInfo>) -> InterpretedCode {
        InterpretedCode {
            bytecode: Vec::new(),
            constants: Vec::new(),
            max_register: 3,
            captured: Vec::new(),
            line_map,
            loops,
            eval_scopes: Vec::<EvalScope>::new(),
            catches_errors: false,
            file: Rc::from("t.pl"),
            name: None,
        }
    }

    #[test]
    fn line_lookup_uses_latest_entry() {
        let code = empty_code(vec![(0, 1), (10, 2), (20, 5)], vec![]);
        assert_eq!(code.line_for_pc(0), 1);
        assert_eq!(code.line_for_pc(12), 2);
        assert_eq!(code.line_for_pc(99), 5);
    }

    #[test]
    fn innermost_loop_first() {
        let outer = LoopInfo {
            label: Some("OUTER".into()),
            start: 0,
            end: 100,
            redo_pc: 5,
            next_pc: 0,
            last_pc: 100,
            scope_depth: 0,
        };
        let inner = LoopInfo {
            label: None,
            start: 10,
            end: 50,
            redo_pc: 12,
            next_pc: 10,
            last_pc: 50,
            scope_depth: 1,
        };
        let code = empty_code(vec![], vec![outer, inner]);
        let at = code.loops_at(20);
        assert_eq!(at.len(), 2);
        assert_eq!(at[0].label, None);
        assert_eq!(at[1].label.as_deref(), Some("OUTER"));
    }
}

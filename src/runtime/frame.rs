use crate::compiler::code::InterpretedCode;
use crate::values::array::Array;
use crate::values::scalar::{sv_fresh_undef, Scalar, ScalarCell, Sv};
use crate::values::reference::PerlRef;
use std::cell::RefCell;
use std::rc::Rc;

/// One activation record: the register file plus the dynamic-scope marks
/// opened by ENTER_SCOPE inside this frame.
///
/// Register conventions: 0 holds `@_`, 1 aliases the caller's `$_`,
/// 2 carries the context flag; captured cells land in their descriptor
/// slots; everything else starts as a fresh mutable undef.
pub struct Frame {
    pub regs: Vec<Sv>,
    pub dyn_marks: Vec<usize>,
}

impl Frame {
    pub fn new(
        code: &InterpretedCode,
        args: Rc<RefCell<Array>>,
        underscore: Sv,
        list_context: bool,
        captured: &[Sv],
    ) -> Frame {
        let size = (code.max_register as usize).max(3);
        let mut regs = Vec::with_capacity(size);
        regs.push(ScalarCell::new(Scalar::Ref(PerlRef::to_array(args))));
        regs.push(underscore);
        regs.push(ScalarCell::new(Scalar::Int(i64::from(list_context))));
        for _ in 3..size {
            regs.push(sv_fresh_undef());
        }
        for (i, cv) in code.captured.iter().enumerate() {
            if let Some(cell) = captured.get(i) {
                regs[cv.slot as usize] = cell.clone();
            }
        }
        Frame {
            regs,
            dyn_marks: Vec::new(),
        }
    }

    pub fn reg(&self, index: u8) -> &Sv {
        &self.regs[index as usize]
    }

    pub fn set_reg(&mut self, index: u8, cell: Sv) {
        self.regs[index as usize] = cell;
    }
}

use std::cell::RefCell;
use std::rc::Rc;

use crate::compiler::code::InterpretedCode;
use crate::values::scalar::Sv;

/// A compiled callable: the immutable interpreted body plus the cells
/// captured from the enclosing scope at closure-creation time. Those cells
/// are aliased into the callee's low-numbered registers on entry.
#[derive(Debug)]
pub struct Code {
    pub name: Option<String>,
    pub prototype: Option<String>,
    pub compiled: Rc<InterpretedCode>,
    captured: RefCell<Vec<Sv>>,
    blessed: RefCell<Option<String>>,
}

impl Code {
    pub fn new(compiled: Rc<InterpretedCode>, name: Option<String>) -> Code {
        Code {
            name,
            prototype: None,
            compiled,
            captured: RefCell::new(Vec::new()),
            blessed: RefCell::new(None),
        }
    }

    pub fn with_captured(
        compiled: Rc<InterpretedCode>,
        name: Option<String>,
        captured: Vec<Sv>,
    ) -> Code {
        Code {
            name,
            prototype: None,
            compiled,
            captured: RefCell::new(captured),
            blessed: RefCell::new(None),
        }
    }

    pub fn captured_cells(&self) -> Vec<Sv> {
        self.captured.borrow().clone()
    }

    pub fn blessed(&self) -> Option<String> {
        self.blessed.borrow().clone()
    }

    pub fn set_blessed(&self, package: &str) {
        *self.blessed.borrow_mut() = Some(package.into());
    }

    /// `eval BLOCK` bodies are compiled as anonymous catching subs.
    pub fn catches_errors(&self) -> bool {
        self.compiled.catches_errors
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("__ANON__")
    }
}

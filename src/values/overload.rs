use std::rc::Rc;

use crate::runtime::context::RuntimeContext;
use crate::values::code::Code;
use crate::values::reference::PerlRef;

/// Overload entries live in the package symbol table under `pkg::(op`,
/// so inheritance falls out of the ordinary MRO walk.
pub fn overload_glob_name(package: &str, op: &str) -> String {
    format!("{}::({}", package, op)
}

/// The seam between operators and user-defined behaviour. `None` means
/// fall through to the built-in numeric/string semantics.
pub trait Overloadable {
    fn overload_for(&self, ctx: &mut RuntimeContext, op: &str) -> Option<Rc<Code>>;
}

impl Overloadable for PerlRef {
    fn overload_for(&self, ctx: &mut RuntimeContext, op: &str) -> Option<Rc<Code>> {
        let package = self.blessed()?;
        for pkg in ctx.method_resolution_order(&package) {
            let name = overload_glob_name(&pkg, op);
            if let Some(code) = ctx.symbols.lookup_code(&name) {
                return Some(code);
            }
        }
        None
    }
}

/// Compound operators probe the compound name first (`+=`), then fall back
/// to the base operator (`+`) with a write-back at the call site.
pub fn compound_fallback(op: &str) -> Option<&'static str> {
    Some(match op {
        "+=" => "+",
        "-=" => "-",
        "*=" => "*",
        "/=" => "/",
        "%=" => "%",
        "**=" => "**",
        ".=" => ".",
        "x=" => "x",
        "<<=" => "<<",
        ">>=" => ">>",
        "&=" => "&",
        "|=" => "|",
        "^=" => "^",
        _ => return None,
    })
}

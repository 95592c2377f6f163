use std::collections::HashMap;
use std::rc::Rc;

use crate::regex::adapter::RegexAdapter;
use crate::runtime::control_flow::ControlFlowRegistry;
use crate::runtime::dynamic_scope::{DynamicScopeStack, ScopeMark};
use crate::runtime::symbols::SymbolTable;
use crate::values::code::Code;

/// Behaviour toggles, populated from the CLI and the recognised
/// environment variables.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub warnings: bool,
    /// `JPERL_UNIMPLEMENTED=warn` demotes `Unimplemented` errors to
    /// warnings; the default is a catchable exception.
    pub unimplemented_as_warning: bool,
    /// `JPERL_EVAL_USE_INTERPRETER=1` routes `eval STRING` through the
    /// register-bytecode interpreter. This build ships only that backend,
    /// so the flag is recognised and effectively always on.
    pub eval_use_interpreter: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            warnings: true,
            unimplemented_as_warning: false,
            eval_use_interpreter: true,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        if let Ok(value) = std::env::var("JPERL_UNIMPLEMENTED") {
            config.unimplemented_as_warning = value == "warn";
        }
        if let Ok(value) = std::env::var("JPERL_EVAL_USE_INTERPRETER") {
            config.eval_use_interpreter = value != "0";
        }
        config
    }
}

/// One Perl execution context: symbol table, dynamic-scope stack,
/// control-flow registry and regex adapter state. Contexts share nothing
/// mutable; several may coexist in a process. The record is threaded
/// through every compiler and interpreter call rather than living in a
/// global.
pub struct RuntimeContext {
    pub symbols: SymbolTable,
    pub scopes: DynamicScopeStack,
    pub control: ControlFlowRegistry,
    pub regex: RegexAdapter,
    pub config: RuntimeConfig,
    pub current_file: Rc<str>,
    pub call_depth: usize,
    mro_cache: HashMap<String, Vec<String>>,
}

impl RuntimeContext {
    pub fn new(config: RuntimeConfig) -> RuntimeContext {
        RuntimeContext {
            symbols: SymbolTable::new(),
            scopes: DynamicScopeStack::new(),
            control: ControlFlowRegistry::new(),
            regex: RegexAdapter::new(),
            config,
            current_file: Rc::from("-"),
            call_depth: 0,
            mro_cache: HashMap::new(),
        }
    }

    pub fn enter_dynamic_scope(&mut self) -> ScopeMark {
        self.scopes.enter()
    }

    /// Runs every save-record pushed above `mark`, feeding regex
    /// snapshots back into the adapter. Called on every exit path.
    pub fn exit_dynamic_scope(&mut self, mark: ScopeMark) {
        for snapshot in self.scopes.exit_to(mark) {
            self.regex.restore(snapshot);
        }
    }

    /// Depth-first `@ISA` walk in declaration order, memoised per package
    /// at first use.
    pub fn method_resolution_order(&mut self, package: &str) -> Vec<String> {
        if let Some(cached) = self.mro_cache.get(package) {
            return cached.clone();
        }
        let mut order = Vec::new();
        self.mro_walk(package, &mut order);
        self.mro_cache.insert(package.to_string(), order.clone());
        order
    }

    fn mro_walk(&self, package: &str, order: &mut Vec<String>) {
        if order.iter().any(|p| p == package) {
            return;
        }
        order.push(package.to_string());
        let isa_name = format!("{}::ISA", package);
        let parents: Vec<String> = match self.symbols.lookup_glob(&isa_name) {
            Some(glob) => match glob.array_slot() {
                Some(array) => array
                    .borrow()
                    .iter()
                    .map(|cell| cell.get_str().to_text().into_owned())
                    .collect(),
                None => Vec::new(),
            },
            None => Vec::new(),
        };
        for parent in parents {
            self.mro_walk(&parent, order);
        }
    }

    /// Resolves `pkg->method` through the MRO.
    pub fn find_method(&mut self, package: &str, method: &str) -> Option<Rc<Code>> {
        for pkg in self.method_resolution_order(package) {
            let name = format!("{}::{}", pkg, method);
            if let Some(code) = self.symbols.lookup_code(&name) {
                return Some(code);
            }
        }
        None
    }

    /// Drops memoised linearisations, e.g. after `@ISA` manipulation.
    pub fn invalidate_mro(&mut self) {
        self.mro_cache.clear();
    }

    /// A Perl-level warning: stderr, not the diagnostic log.
    pub fn emit_warning(&self, message: &str) {
        if self.config.warnings {
            eprintln!("{}", message.trim_end_matches('\n'));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::scalar::Scalar;

    #[test]
    fn mro_walks_isa_in_declaration_order() {
        let mut ctx = RuntimeContext::new(RuntimeConfig::default());
        let isa = ctx.symbols.array("Child::ISA");
        isa.borrow_mut()
            .push_value(Scalar::Str("Left".into()));
        isa.borrow_mut()
            .push_value(Scalar::Str("Right".into()));
        let left_isa = ctx.symbols.array("Left::ISA");
        left_isa
            .borrow_mut()
            .push_value(Scalar::Str("Base".into()));

        let order = ctx.method_resolution_order("Child");
        assert_eq!(order, vec!["Child", "Left", "Base", "Right"]);
    }

    #[test]
    fn mro_tolerates_cycles() {
        let mut ctx = RuntimeContext::new(RuntimeConfig::default());
        ctx.symbols
            .array("A::ISA")
            .borrow_mut()
            .push_value(Scalar::Str("B".into()));
        ctx.symbols
            .array("B::ISA")
            .borrow_mut()
            .push_value(Scalar::Str("A".into()));
        let order = ctx.method_resolution_order("A");
        assert_eq!(order, vec!["A", "B"]);
    }
}

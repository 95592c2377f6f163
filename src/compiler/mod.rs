pub mod buffers;
pub mod code;
pub mod operators;
pub mod registers;

use std::collections::HashMap;
use std::rc::Rc;

use crate::compiler::buffers::{append_i32, append_u16, append_u32, append_u8, patch_u32};
use crate::compiler::code::{CapturedVar, EvalScope, InterpretedCode, LoopInfo};
use crate::compiler::operators::{binop_opcode, compound_opcode, Builtin};
use crate::compiler::registers::RegisterAllocator;
use crate::frontend::ast::*;
use crate::global::error::CompileError;
use crate::global::opcodes::{Opcode, NO_LABEL};
use crate::values::scalar::{Scalar, ScalarCell, SpecialVar, Sv};
use crate::values::string::PStr;

/// Expression context: Perl evaluates every expression in scalar, list or
/// void context, settled at compile time except across call boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Want {
    Scalar,
    List,
    Void,
}

/// Call-time context flag operand values.
pub const CTX_SCALAR: u8 = 0;
pub const CTX_LIST: u8 = 1;

/// Match/subst flag operand bits.
pub const MATCH_FLAG_GLOBAL: u8 = 0x01;
pub const MATCH_FLAG_NEGATED: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Int(i64),
    Float(u64),
    Str(String),
    Undef,
}

/// Compile-time record of an open loop. The completed extents land in the
/// body's `loops` table, which the interpreter probes for markers; this
/// stack only answers "is this label visible here" while compiling.
struct CompLoop {
    label: Option<String>,
}

pub struct Compiler {
    buf: Vec<u8>,
    constants: Vec<Sv>,
    const_keys: HashMap<ConstKey, u16>,
    regs: RegisterAllocator,
    loop_stack: Vec<CompLoop>,
    loop_infos: Vec<LoopInfo>,
    line_map: Vec<(u32, u32)>,
    current_line: u32,
    package: String,
    file: Rc<str>,
    catches: bool,
    name: Option<String>,
    captured: Vec<CapturedVar>,
    /// lexicals visible in the creating frame (closure/eval support):
    /// sigil-prefixed name to the outer frame's register
    enclosing: Vec<(String, u8)>,
    eval_scopes: Vec<EvalScope>,
    scope_depth: u32,
}

/// Compiles a parsed program into the main interpreted body. Named subs
/// are defined at their textual position, which is what lets them close
/// over lexicals declared above them.
pub fn compile_program(program: &Program) -> Result<Rc<InterpretedCode>, CompileError> {
    let mut compiler = Compiler::new(Rc::from(program.file.as_str()), "main", false, Vec::new());
    compiler.stmts_with_result(&program.stmts, true)?;
    Ok(Rc::new(compiler.finish(None)))
}

/// Compiles `eval STRING` source against the lexical environment captured
/// at the eval site. Every visible lexical becomes a captured variable
/// injected into the callee's low registers.
pub fn compile_eval_string(
    program: &Program,
    package: &str,
    lexicals: &[(String, u8)],
) -> Result<Rc<InterpretedCode>, CompileError> {
    let mut compiler = Compiler::new(
        Rc::from(program.file.as_str()),
        package,
        true,
        lexicals.to_vec(),
    );
    for (name, outer_reg) in lexicals {
        let slot = compiler.regs.declare(name, 0)?;
        compiler.captured.push(CapturedVar {
            name: name.clone(),
            outer_reg: *outer_reg,
            slot,
        });
    }
    compiler.stmts_with_result(&program.stmts, true)?;
    Ok(Rc::new(compiler.finish(Some("eval".to_string()))))
}

impl Compiler {
    fn new(
        file: Rc<str>,
        package: &str,
        catches: bool,
        enclosing: Vec<(String, u8)>,
    ) -> Compiler {
        Compiler {
            buf: Vec::with_capacity(256),
            constants: Vec::new(),
            const_keys: HashMap::new(),
            regs: RegisterAllocator::new(),
            loop_stack: Vec::new(),
            loop_infos: Vec::new(),
            line_map: Vec::new(),
            current_line: 0,
            package: package.to_string(),
            file,
            catches,
            name: None,
            captured: Vec::new(),
            enclosing,
            eval_scopes: Vec::new(),
            scope_depth: 0,
        }
    }

    fn finish(mut self, name: Option<String>) -> InterpretedCode {
        if name.is_some() {
            self.name = name;
        }
        InterpretedCode {
            bytecode: self.buf,
            constants: self.constants,
            max_register: self.regs.max_register(),
            captured: self.captured,
            line_map: self.line_map,
            loops: self.loop_infos,
            eval_scopes: self.eval_scopes,
            catches_errors: self.catches,
            file: self.file,
            name: self.name,
        }
    }

    // ---- emission helpers ------------------------------------------------

    fn pc(&self) -> u32 {
        self.buf.len() as u32
    }

    fn op(&mut self, op: Opcode) {
        append_u8(&mut self.buf, op.into());
    }

    fn reg(&mut self, r: u8) {
        append_u8(&mut self.buf, r);
    }

    fn byte(&mut self, b: u8) {
        append_u8(&mut self.buf, b);
    }

    fn cidx(&mut self, c: u16) {
        append_u16(&mut self.buf, c);
    }

    fn imm(&mut self, v: i32) {
        append_i32(&mut self.buf, v);
    }

    fn target(&mut self, t: u32) {
        append_u32(&mut self.buf, t);
    }

    /// Emits a placeholder target, returning the patch offset.
    fn target_hole(&mut self) -> usize {
        let at = self.buf.len();
        append_u32(&mut self.buf, 0);
        at
    }

    fn patch(&mut self, hole: usize, target: u32) {
        patch_u32(&mut self.buf, hole, target);
    }

    fn err(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(message, self.current_line)
    }

    fn note_line(&mut self, line: u32) {
        if line != 0 {
            self.current_line = line;
        }
        let pc = self.pc();
        match self.line_map.last() {
            Some(&(_, l)) if l == self.current_line => {}
            _ => self.line_map.push((pc, self.current_line)),
        }
    }

    fn temp(&mut self) -> Result<u8, CompileError> {
        self.regs.alloc_temp(self.current_line)
    }

    // ---- constants -------------------------------------------------------

    fn add_const(&mut self, key: Option<ConstKey>, cell: Sv) -> Result<u16, CompileError> {
        if let Some(key) = &key {
            if let Some(&idx) = self.const_keys.get(key) {
                return Ok(idx);
            }
        }
        if self.constants.len() >= u16::MAX as usize {
            return Err(self.err("Constant pool exhausted"));
        }
        let idx = self.constants.len() as u16;
        self.constants.push(cell);
        if let Some(key) = key {
            self.const_keys.insert(key, idx);
        }
        Ok(idx)
    }

    fn const_int(&mut self, v: i64) -> Result<u16, CompileError> {
        self.add_const(
            Some(ConstKey::Int(v)),
            ScalarCell::new_read_only(Scalar::Int(v)),
        )
    }

    fn const_float(&mut self, v: f64) -> Result<u16, CompileError> {
        self.add_const(
            Some(ConstKey::Float(v.to_bits())),
            ScalarCell::new_read_only(Scalar::Double(v)),
        )
    }

    fn const_str(&mut self, s: &str) -> Result<u16, CompileError> {
        self.add_const(
            Some(ConstKey::Str(s.to_string())),
            ScalarCell::new_read_only(Scalar::Str(PStr::from_text(s))),
        )
    }

    fn const_pstr(&mut self, s: &PStr) -> Result<u16, CompileError> {
        self.add_const(None, ScalarCell::new_read_only(Scalar::Str(s.clone())))
    }

    fn const_undef(&mut self) -> Result<u16, CompileError> {
        self.add_const(
            Some(ConstKey::Undef),
            ScalarCell::new_read_only(Scalar::Undef),
        )
    }

    fn const_cell(&mut self, cell: Sv) -> Result<u16, CompileError> {
        self.add_const(None, cell)
    }

    /// Patterns travel as `flags NUL pattern` string constants; the
    /// adapter compiles and caches them per context at first use.
    fn const_pattern(&mut self, pattern: &str, flags: &str) -> Result<u16, CompileError> {
        self.const_str(&format!("{}\u{0}{}", flags, pattern))
    }

    // ---- name resolution -------------------------------------------------

    fn qualified(&self, name: &str) -> String {
        if name.contains("::") {
            name.to_string()
        } else if name == "_" || name == "0" || name == "@" || name == "!" {
            format!("main::{}", name)
        } else {
            format!("{}::{}", self.package, name)
        }
    }

    /// Resolves a sigil-qualified lexical, importing it from the creating
    /// frame as a captured variable when needed.
    fn resolve_lexical(&mut self, key: &str) -> Result<Option<u8>, CompileError> {
        if let Some(reg) = self.regs.resolve(key) {
            return Ok(Some(reg));
        }
        let outer = self
            .enclosing
            .iter()
            .find(|(name, _)| name == key)
            .map(|&(_, reg)| reg);
        if let Some(outer_reg) = outer {
            let slot = self.regs.declare(key, self.current_line)?;
            self.captured.push(CapturedVar {
                name: key.to_string(),
                outer_reg,
                slot,
            });
            return Ok(Some(slot));
        }
        Ok(None)
    }

    // ---- program structure -----------------------------------------------

    fn define_sub(&mut self, name: &str, body: &Block) -> Result<(), CompileError> {
        let qualified = self.qualified(name);
        let code_reg = self.compile_closure(body, Some(qualified.clone()), false)?;
        let name_const = self.const_str(&qualified)?;
        self.op(Opcode::SET_GLOBAL_CODE);
        self.cidx(name_const);
        self.reg(code_reg);
        Ok(())
    }

    /// Compiles a nested body and emits MAKE_CLOSURE; returns the register
    /// holding the fresh code value.
    fn compile_closure(
        &mut self,
        body: &Block,
        name: Option<String>,
        catches: bool,
    ) -> Result<u8, CompileError> {
        let mut lexicals = self.enclosing.clone();
        for (lex_name, reg) in self.regs.visible_lexicals() {
            lexicals.retain(|(have, _)| *have != lex_name);
            lexicals.push((lex_name, reg));
        }
        let mut child = Compiler::new(self.file.clone(), &self.package, catches, lexicals);
        child.name = name.clone();
        child.current_line = self.current_line;
        child.stmts_with_result(body, true)?;
        let compiled = Rc::new(child.finish(None));
        let template = Rc::new(crate::values::code::Code::new(compiled, name));
        let template_const =
            self.const_cell(ScalarCell::new_read_only(Scalar::Code(template)))?;
        let dst = self.temp()?;
        self.op(Opcode::MAKE_CLOSURE);
        self.reg(dst);
        self.cidx(template_const);
        Ok(dst)
    }

    /// Compiles statements; when `implicit_return` is set, the value of a
    /// trailing expression statement becomes the frame result.
    fn stmts_with_result(
        &mut self,
        stmts: &[Stmt],
        implicit_return: bool,
    ) -> Result<(), CompileError> {
        let split = stmts.len().saturating_sub(1);
        for stmt in stmts.iter().take(split) {
            self.stmt(stmt)?;
        }
        match stmts.last() {
            Some(Stmt::Expr { expr, line }) if implicit_return => {
                let line = *line;
                let expr = expr.clone();
                self.note_line(line);
                self.regs.begin_statement();
                let list = self.expr_as_list(&expr)?;
                self.op(Opcode::RETURN);
                self.reg(list);
            }
            Some(last) => {
                self.stmt(last)?;
                if implicit_return {
                    self.emit_empty_return()?;
                }
            }
            None => {
                if implicit_return {
                    self.emit_empty_return()?;
                }
            }
        }
        Ok(())
    }

    fn emit_empty_return(&mut self) -> Result<(), CompileError> {
        self.regs.begin_statement();
        let list = self.temp()?;
        self.op(Opcode::LIST_NEW);
        self.reg(list);
        self.op(Opcode::RETURN);
        self.reg(list);
        Ok(())
    }

    fn block(&mut self, body: &Block) -> Result<(), CompileError> {
        self.op(Opcode::ENTER_SCOPE);
        self.scope_depth += 1;
        self.regs.enter_scope();
        for stmt in body {
            self.stmt(stmt)?;
        }
        self.regs.exit_scope();
        self.scope_depth -= 1;
        self.op(Opcode::LEAVE_SCOPE);
        Ok(())
    }

    // ---- statements ------------------------------------------------------

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Expr { expr, line } => {
                self.note_line(*line);
                self.regs.begin_statement();
                self.expr(expr, Want::Void)?;
                Ok(())
            }
            Stmt::My { vars, init, line } => self.my_stmt(vars, init.as_ref(), *line),
            Stmt::Local {
                targets,
                init,
                line,
            } => self.local_stmt(targets, init.as_ref(), *line),
            Stmt::If {
                arms,
                otherwise,
                line,
            } => self.if_stmt(arms, otherwise.as_ref(), *line),
            Stmt::While {
                label,
                cond,
                body,
                is_until,
                line,
            } => self.while_stmt(label.clone(), cond, body, *is_until, *line),
            Stmt::DoWhile {
                body,
                cond,
                is_until,
                line,
            } => self.do_while_stmt(body, cond, *is_until, *line),
            Stmt::ForC {
                label,
                init,
                cond,
                step,
                body,
                line,
            } => self.for_c_stmt(label.clone(), init, cond, step, body, *line),
            Stmt::Foreach {
                label,
                var,
                list,
                body,
                line,
            } => self.foreach_stmt(label.clone(), var, list, body, *line),
            Stmt::BareBlock { label, body, line } => {
                self.bare_block_stmt(label.clone(), body, *line)
            }
            Stmt::Sub { name, body, line } => {
                self.note_line(*line);
                self.regs.begin_statement();
                let name = name.clone();
                let body = body.clone();
                self.define_sub(&name, &body)
            }
            Stmt::Package { name, line } => {
                self.note_line(*line);
                self.package = name.clone();
                Ok(())
            }
            Stmt::Return { expr, line } => {
                self.note_line(*line);
                self.regs.begin_statement();
                let list = match expr {
                    Some(expr) => self.expr_as_list(expr)?,
                    None => {
                        let list = self.temp()?;
                        self.op(Opcode::LIST_NEW);
                        self.reg(list);
                        list
                    }
                };
                self.op(Opcode::RETURN);
                self.reg(list);
                Ok(())
            }
            Stmt::Last { label, line } => {
                self.marker_stmt(Opcode::SET_MARKER_LAST, label, *line)
            }
            Stmt::Next { label, line } => {
                self.marker_stmt(Opcode::SET_MARKER_NEXT, label, *line)
            }
            Stmt::Redo { label, line } => {
                self.marker_stmt(Opcode::SET_MARKER_REDO, label, *line)
            }
            Stmt::GotoSub { target, line } => {
                self.note_line(*line);
                self.regs.begin_statement();
                let code = self.expr(target, Want::Scalar)?;
                self.op(Opcode::GOTO_SUB);
                self.reg(code);
                Ok(())
            }
            Stmt::UseOverload { pairs, line } => {
                self.note_line(*line);
                self.regs.begin_statement();
                let list = self.temp()?;
                self.op(Opcode::LIST_NEW);
                self.reg(list);
                let pairs = pairs.clone();
                for pair in &pairs {
                    self.push_into_list(pair, list)?;
                }
                let pkg = self.package.clone();
                let pkg_const = self.const_str(&pkg)?;
                self.op(Opcode::INSTALL_OVERLOAD);
                self.cidx(pkg_const);
                self.reg(list);
                Ok(())
            }
            Stmt::UseIgnored { line } => {
                self.note_line(*line);
                Ok(())
            }
        }
    }

    fn marker_stmt(
        &mut self,
        op: Opcode,
        label: &Option<String>,
        line: u32,
    ) -> Result<(), CompileError> {
        self.note_line(line);
        if let Some(name) = label {
            let visible = self
                .loop_stack
                .iter()
                .any(|open| open.label.as_deref() == Some(name.as_str()));
            if !visible {
                // legal: the label may belong to a loop in a calling
                // frame, where the marker resolves at run time
                log::debug!("loop label {} not visible in this frame", name);
            }
        }
        let label_const = match label {
            Some(name) => self.const_str(name)?,
            None => NO_LABEL,
        };
        self.op(op);
        self.cidx(label_const);
        Ok(())
    }

    fn my_stmt(
        &mut self,
        vars: &[(Sigil, String)],
        init: Option<&Expr>,
        line: u32,
    ) -> Result<(), CompileError> {
        self.note_line(line);
        self.regs.begin_statement();

        // single-variable fast path keeps scalar context for the init
        if vars.len() == 1 {
            let (sigil, name) = &vars[0];
            match sigil {
                Sigil::Scalar => {
                    let value = match init {
                        Some(init) => Some(self.expr(init, Want::Scalar)?),
                        None => None,
                    };
                    let reg = self.regs.declare(&format!("${}", name), line)?;
                    self.op(Opcode::LOAD_UNDEF);
                    self.reg(reg);
                    if let Some(value) = value {
                        self.op(Opcode::COPY_VALUE);
                        self.reg(reg);
                        self.reg(value);
                    }
                    return Ok(());
                }
                Sigil::Array => {
                    let value = match init {
                        Some(init) => Some(self.expr_as_list(init)?),
                        None => None,
                    };
                    let reg = self.regs.declare(&format!("@{}", name), line)?;
                    self.op(Opcode::LIST_NEW);
                    self.reg(reg);
                    if let Some(value) = value {
                        self.op(Opcode::ARRAY_ASSIGN);
                        self.reg(reg);
                        self.reg(value);
                    }
                    return Ok(());
                }
                Sigil::Hash => {
                    let value = match init {
                        Some(init) => Some(self.expr_as_list(init)?),
                        None => None,
                    };
                    let reg = self.regs.declare(&format!("%{}", name), line)?;
                    self.op(Opcode::HASH_NEW);
                    self.reg(reg);
                    if let Some(value) = value {
                        self.op(Opcode::HASH_ASSIGN);
                        self.reg(reg);
                        self.reg(value);
                    }
                    return Ok(());
                }
            }
        }

        // my (…) = LIST
        let list = match init {
            Some(init) => Some(self.expr_as_list(init)?),
            None => None,
        };
        let mut index: i32 = 0;
        for (sigil, name) in vars {
            match sigil {
                Sigil::Scalar => {
                    let reg = self.regs.declare(&format!("${}", name), line)?;
                    self.op(Opcode::LOAD_UNDEF);
                    self.reg(reg);
                    if let Some(list) = list {
                        let elem = self.temp()?;
                        self.op(Opcode::LIST_GET);
                        self.reg(elem);
                        self.reg(list);
                        self.imm(index);
                        self.op(Opcode::COPY_VALUE);
                        self.reg(reg);
                        self.reg(elem);
                    }
                    index += 1;
                }
                Sigil::Array => {
                    let reg = self.regs.declare(&format!("@{}", name), line)?;
                    self.op(Opcode::LIST_NEW);
                    self.reg(reg);
                    if let Some(list) = list {
                        let rest = self.temp()?;
                        self.op(Opcode::LIST_SLICE);
                        self.reg(rest);
                        self.reg(list);
                        self.imm(index);
                        self.op(Opcode::ARRAY_ASSIGN);
                        self.reg(reg);
                        self.reg(rest);
                    }
                    // an array in the middle slurps the remainder
                    index = i32::MAX;
                }
                Sigil::Hash => {
                    let reg = self.regs.declare(&format!("%{}", name), line)?;
                    self.op(Opcode::HASH_NEW);
                    self.reg(reg);
                    if let Some(list) = list {
                        let rest = self.temp()?;
                        self.op(Opcode::LIST_SLICE);
                        self.reg(rest);
                        self.reg(list);
                        self.imm(index);
                        self.op(Opcode::HASH_ASSIGN);
                        self.reg(reg);
                        self.reg(rest);
                    }
                    index = i32::MAX;
                }
            }
        }
        Ok(())
    }

    fn local_stmt(
        &mut self,
        targets: &[Expr],
        init: Option<&Expr>,
        line: u32,
    ) -> Result<(), CompileError> {
        self.note_line(line);
        self.regs.begin_statement();
        for target in targets {
            match target {
                Expr::ScalarVar(name) => {
                    if self.regs.resolve(&format!("${}", name)).is_some() {
                        return Err(self.err(format!(
                            "Can't localize lexical variable ${}",
                            name
                        )));
                    }
                    let qualified = self.qualified(name);
                    let name_const = self.const_str(&qualified)?;
                    self.op(Opcode::LOCAL_GLOBAL_SCALAR);
                    self.cidx(name_const);
                }
                Expr::ArrayVar(name) => {
                    let qualified = self.qualified(name);
                    let name_const = self.const_str(&qualified)?;
                    self.op(Opcode::LOCAL_GLOBAL_ARRAY);
                    self.cidx(name_const);
                }
                Expr::HashVar(name) => {
                    let qualified = self.qualified(name);
                    let name_const = self.const_str(&qualified)?;
                    self.op(Opcode::LOCAL_GLOBAL_HASH);
                    self.cidx(name_const);
                }
                Expr::Elem {
                    container,
                    index,
                    kind,
                    via_ref,
                } => {
                    let cont = self.container_reg(container, *kind, *via_ref, true)?;
                    let key = self.expr(index, Want::Scalar)?;
                    match kind {
                        ElemKind::Hash => {
                            self.op(Opcode::LOCAL_HASH_ELEM);
                            self.reg(cont);
                            self.reg(key);
                        }
                        ElemKind::Array => {
                            self.op(Opcode::LOCAL_ARRAY_ELEM);
                            self.reg(cont);
                            self.reg(key);
                        }
                    }
                }
                _ => return Err(self.err("Can't localize that kind of expression")),
            }
        }
        if let Some(init) = init {
            // re-assign through the freshly localized slots
            let assign_target = if targets.len() == 1 {
                targets[0].clone()
            } else {
                Expr::List(targets.to_vec())
            };
            self.assign(&assign_target, init, Want::Void)?;
        }
        Ok(())
    }

    fn if_stmt(
        &mut self,
        arms: &[(Expr, Block)],
        otherwise: Option<&Block>,
        line: u32,
    ) -> Result<(), CompileError> {
        self.note_line(line);
        let mut end_holes = Vec::new();
        for (cond, body) in arms {
            self.regs.begin_statement();
            let cond_reg = self.expr(cond, Want::Scalar)?;
            self.op(Opcode::JUMP_IF_FALSE);
            self.reg(cond_reg);
            let next_arm = self.target_hole();
            self.block(body)?;
            self.op(Opcode::JUMP);
            end_holes.push(self.target_hole());
            let here = self.pc();
            self.patch(next_arm, here);
        }
        if let Some(body) = otherwise {
            self.block(body)?;
        }
        let end = self.pc();
        for hole in end_holes {
            self.patch(hole, end);
        }
        Ok(())
    }

    fn while_stmt(
        &mut self,
        label: Option<String>,
        cond: &Expr,
        body: &Block,
        is_until: bool,
        line: u32,
    ) -> Result<(), CompileError> {
        self.note_line(line);
        let depth = self.scope_depth;
        let start = self.pc();
        self.loop_stack.push(CompLoop {
            label: label.clone(),
        });

        self.regs.begin_statement();
        let cond_reg = self.expr(cond, Want::Scalar)?;
        self.op(if is_until {
            Opcode::JUMP_IF_TRUE
        } else {
            Opcode::JUMP_IF_FALSE
        });
        self.reg(cond_reg);
        let exit_hole = self.target_hole();

        let redo_pc = self.pc();
        self.block(body)?;
        self.op(Opcode::JUMP);
        self.target(start);

        let end = self.pc();
        self.patch(exit_hole, end);
        self.loop_stack.pop();
        self.loop_infos.push(LoopInfo {
            label,
            start,
            end,
            redo_pc,
            next_pc: start,
            last_pc: end,
            scope_depth: depth,
        });
        Ok(())
    }

    fn do_while_stmt(
        &mut self,
        body: &Block,
        cond: &Expr,
        is_until: bool,
        line: u32,
    ) -> Result<(), CompileError> {
        self.note_line(line);
        // body runs first; `do BLOCK while` is not a loop for last/next
        let start = self.pc();
        self.block(body)?;
        self.regs.begin_statement();
        let cond_reg = self.expr(cond, Want::Scalar)?;
        self.op(if is_until {
            Opcode::JUMP_IF_FALSE
        } else {
            Opcode::JUMP_IF_TRUE
        });
        self.reg(cond_reg);
        self.target(start);
        Ok(())
    }

    fn for_c_stmt(
        &mut self,
        label: Option<String>,
        init: &Option<Box<Stmt>>,
        cond: &Option<Expr>,
        step: &Option<Expr>,
        body: &Block,
        line: u32,
    ) -> Result<(), CompileError> {
        self.note_line(line);
        // the init declaration lives in a scope wrapping the whole loop
        self.op(Opcode::ENTER_SCOPE);
        self.scope_depth += 1;
        self.regs.enter_scope();
        if let Some(init) = init {
            self.stmt(init)?;
        }

        let depth = self.scope_depth;
        let start = self.pc();
        self.loop_stack.push(CompLoop {
            label: label.clone(),
        });

        let mut exit_hole = None;
        if let Some(cond) = cond {
            self.regs.begin_statement();
            let cond_reg = self.expr(cond, Want::Scalar)?;
            self.op(Opcode::JUMP_IF_FALSE);
            self.reg(cond_reg);
            exit_hole = Some(self.target_hole());
        }

        let redo_pc = self.pc();
        self.block(body)?;

        let next_pc = self.pc();
        if let Some(step) = step {
            self.regs.begin_statement();
            self.expr(step, Want::Void)?;
        }
        self.op(Opcode::JUMP);
        self.target(start);

        let end = self.pc();
        if let Some(hole) = exit_hole {
            self.patch(hole, end);
        }
        self.loop_stack.pop();
        self.loop_infos.push(LoopInfo {
            label,
            start,
            end,
            redo_pc,
            next_pc,
            last_pc: end,
            scope_depth: depth,
        });

        self.regs.exit_scope();
        self.scope_depth -= 1;
        self.op(Opcode::LEAVE_SCOPE);
        Ok(())
    }

    fn foreach_stmt(
        &mut self,
        label: Option<String>,
        var: &ForeachVar,
        list: &Expr,
        body: &Block,
        line: u32,
    ) -> Result<(), CompileError> {
        self.note_line(line);
        self.op(Opcode::ENTER_SCOPE);
        self.scope_depth += 1;
        self.regs.enter_scope();
        self.regs.begin_statement();

        // iterator state outlives statement recycling
        let iter_reg = self.regs.pin_temp(line)?;
        match list {
            Expr::Range { from, to } => {
                let from_reg = self.expr(from, Want::Scalar)?;
                let to_reg = self.expr(to, Want::Scalar)?;
                self.op(Opcode::ITER_FROM_RANGE);
                self.reg(iter_reg);
                self.reg(from_reg);
                self.reg(to_reg);
            }
            // iterating an array aliases its live elements
            Expr::ArrayVar(name) => {
                let arr = self.array_reg(name)?;
                self.op(Opcode::ITER_CREATE);
                self.reg(iter_reg);
                self.reg(arr);
            }
            Expr::Deref {
                kind: DerefKind::Array,
                expr,
            } => {
                let r = self.expr(expr, Want::Scalar)?;
                let arr = self.temp()?;
                self.op(Opcode::DEREF_ARRAY);
                self.reg(arr);
                self.reg(r);
                self.op(Opcode::ITER_CREATE);
                self.reg(iter_reg);
                self.reg(arr);
            }
            other => {
                let list_reg = self.expr_as_list(other)?;
                self.op(Opcode::ITER_CREATE);
                self.reg(iter_reg);
                self.reg(list_reg);
            }
        }

        // the loop variable register, plus optional global aliasing
        let (var_reg, global_alias) = match var {
            ForeachVar::My(name) => {
                let reg = self.regs.declare(&format!("${}", name), line)?;
                (reg, None)
            }
            ForeachVar::Named(name) => match self.resolve_lexical(&format!("${}", name))? {
                Some(reg) => (reg, None),
                None => {
                    let qualified = self.qualified(name);
                    let name_const = self.const_str(&qualified)?;
                    self.op(Opcode::LOCAL_GLOBAL_SCALAR);
                    self.cidx(name_const);
                    (self.regs.pin_temp(line)?, Some(name_const))
                }
            },
            ForeachVar::Default => {
                let name_const = self.const_str("main::_")?;
                self.op(Opcode::LOCAL_GLOBAL_SCALAR);
                self.cidx(name_const);
                (self.regs.pin_temp(line)?, Some(name_const))
            }
        };

        let depth = self.scope_depth;
        let start = self.pc();
        self.loop_stack.push(CompLoop {
            label: label.clone(),
        });

        self.op(Opcode::FOREACH_NEXT_OR_EXIT);
        self.reg(var_reg);
        self.reg(iter_reg);
        let exit_hole = self.target_hole();

        if let Some(name_const) = global_alias {
            self.op(Opcode::ALIAS_GLOBAL_SCALAR);
            self.cidx(name_const);
            self.reg(var_reg);
            if matches!(var, ForeachVar::Default) {
                self.op(Opcode::ALIAS_REG);
                self.reg(1);
                self.reg(var_reg);
            }
        }

        let redo_pc = self.pc();
        self.block(body)?;
        self.op(Opcode::JUMP);
        self.target(start);

        let end = self.pc();
        self.patch(exit_hole, end);
        self.loop_stack.pop();
        self.loop_infos.push(LoopInfo {
            label,
            start,
            end,
            redo_pc,
            next_pc: start,
            last_pc: end,
            scope_depth: depth,
        });

        self.regs.exit_scope();
        self.scope_depth -= 1;
        self.op(Opcode::LEAVE_SCOPE);
        if matches!(var, ForeachVar::Default) {
            // rebind register 1 to the restored global $_ slot
            let name_const = self.const_str("main::_")?;
            self.op(Opcode::GET_GLOBAL);
            self.reg(1);
            self.cidx(name_const);
        }
        Ok(())
    }

    fn bare_block_stmt(
        &mut self,
        label: Option<String>,
        body: &Block,
        line: u32,
    ) -> Result<(), CompileError> {
        self.note_line(line);
        // a bare block is a loop that runs once; last/next leave it, redo
        // restarts it, including when raised by a called function
        let depth = self.scope_depth;
        let start = self.pc();
        self.loop_stack.push(CompLoop {
            label: label.clone(),
        });
        let redo_pc = self.pc();
        self.block(body)?;
        let end = self.pc();
        self.loop_stack.pop();
        self.loop_infos.push(LoopInfo {
            label,
            start,
            end,
            redo_pc,
            next_pc: end,
            last_pc: end,
            scope_depth: depth,
        });
        Ok(())
    }

    // ---- expressions -----------------------------------------------------

    fn expr(&mut self, e: &Expr, want: Want) -> Result<u8, CompileError> {
        match e {
            Expr::IntLit(v) => {
                let dst = self.temp()?;
                if let Ok(imm) = i32::try_from(*v) {
                    self.op(Opcode::LOAD_INT);
                    self.reg(dst);
                    self.imm(imm);
                } else {
                    let c = self.const_int(*v)?;
                    self.op(Opcode::LOAD_CONST);
                    self.reg(dst);
                    self.cidx(c);
                }
                Ok(dst)
            }
            Expr::BigLit(v) => {
                let c = self.const_cell(ScalarCell::new_read_only(Scalar::Big(v.clone())))?;
                let dst = self.temp()?;
                self.op(Opcode::LOAD_CONST);
                self.reg(dst);
                self.cidx(c);
                Ok(dst)
            }
            Expr::FloatLit(v) => {
                let c = self.const_float(*v)?;
                let dst = self.temp()?;
                self.op(Opcode::LOAD_CONST);
                self.reg(dst);
                self.cidx(c);
                Ok(dst)
            }
            Expr::StrLit(s) => {
                let c = self.const_pstr(s)?;
                let dst = self.temp()?;
                self.op(Opcode::LOAD_CONST);
                self.reg(dst);
                self.cidx(c);
                Ok(dst)
            }
            Expr::InterpStr(parts) => self.interp_string(parts),
            Expr::Undef => {
                let c = self.const_undef()?;
                let dst = self.temp()?;
                self.op(Opcode::LOAD_CONST);
                self.reg(dst);
                self.cidx(c);
                Ok(dst)
            }
            Expr::ScalarVar(_) | Expr::SpecialVar(_) | Expr::Elem { .. } => {
                self.lvalue(e, false)
            }
            Expr::Deref { .. } => self.lvalue(e, false),
            Expr::ArrayVar(name) => {
                let arr = self.array_reg(name)?;
                match want {
                    Want::Scalar => {
                        let dst = self.temp()?;
                        self.op(Opcode::ARRAY_LEN);
                        self.reg(dst);
                        self.reg(arr);
                        Ok(dst)
                    }
                    _ => Ok(arr),
                }
            }
            Expr::HashVar(name) => self.hash_reg(name),
            Expr::GlobVar(_) => Err(self.err("Typeglob value not supported here")),
            Expr::ArrayLastIdx(inner) => {
                let arr = match inner.as_ref() {
                    Expr::ArrayVar(name) => self.array_reg(name)?,
                    Expr::Deref { expr, .. } => {
                        let r = self.expr(expr, Want::Scalar)?;
                        let dst = self.temp()?;
                        self.op(Opcode::DEREF_ARRAY);
                        self.reg(dst);
                        self.reg(r);
                        dst
                    }
                    other => self.expr(other, Want::Scalar)?,
                };
                let dst = self.temp()?;
                self.op(Opcode::ARRAY_LAST_INDEX);
                self.reg(dst);
                self.reg(arr);
                Ok(dst)
            }
            Expr::Unop { op, operand } => self.unop(*op, operand),
            Expr::Binop { op, lhs, rhs } => self.binop(*op, lhs, rhs),
            Expr::Logical { op, lhs, rhs } => self.logical(*op, lhs, rhs),
            Expr::Assign { target, value } => self.assign(target, value, want),
            Expr::OpAssign { op, target, value } => self.op_assign(*op, target, value),
            Expr::LogicalAssign { op, target, value } => {
                self.logical_assign(*op, target, value)
            }
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                let cond_reg = self.expr(cond, Want::Scalar)?;
                let dst = self.temp()?;
                self.op(Opcode::JUMP_IF_FALSE);
                self.reg(cond_reg);
                let else_hole = self.target_hole();
                let t = self.expr(then, want)?;
                self.op(Opcode::ALIAS_REG);
                self.reg(dst);
                self.reg(t);
                self.op(Opcode::JUMP);
                let end_hole = self.target_hole();
                let here = self.pc();
                self.patch(else_hole, here);
                let o = self.expr(otherwise, want)?;
                self.op(Opcode::ALIAS_REG);
                self.reg(dst);
                self.reg(o);
                let end = self.pc();
                self.patch(end_hole, end);
                Ok(dst)
            }
            Expr::List(items) if want == Want::Scalar => {
                // comma operator: evaluate all, keep the last
                if items.is_empty() {
                    let c = self.const_undef()?;
                    let dst = self.temp()?;
                    self.op(Opcode::LOAD_CONST);
                    self.reg(dst);
                    self.cidx(c);
                    return Ok(dst);
                }
                let mut last = 0u8;
                for item in items {
                    last = self.expr(item, Want::Scalar)?;
                }
                Ok(last)
            }
            Expr::Range { .. } | Expr::List(_) => self.expr_as_list(e),
            Expr::AnonArray(items) => {
                let list = self.expr_as_list(&Expr::List(items.clone()))?;
                let dst = self.temp()?;
                self.op(Opcode::ANON_ARRAY);
                self.reg(dst);
                self.reg(list);
                Ok(dst)
            }
            Expr::AnonHash(items) => {
                let list = self.expr_as_list(&Expr::List(items.clone()))?;
                let dst = self.temp()?;
                self.op(Opcode::ANON_HASH);
                self.reg(dst);
                self.reg(list);
                Ok(dst)
            }
            Expr::AnonSub(body) => self.compile_closure(body, None, false),
            Expr::MakeRef(inner) => self.make_ref(inner),
            Expr::NamedCode(name) => {
                let qualified = self.qualified(name);
                let c = self.const_str(&qualified)?;
                let dst = self.temp()?;
                self.op(Opcode::GET_GLOBAL_CODE);
                self.reg(dst);
                self.cidx(c);
                Ok(dst)
            }
            Expr::Call { name, args } => self.call(name, args, want),
            Expr::CallRef { callee, args } => {
                let code = self.expr(callee, Want::Scalar)?;
                let arg_list = self.call_args_list(args)?;
                let dst = self.temp()?;
                self.op(Opcode::CALL);
                self.reg(dst);
                self.reg(code);
                self.reg(arg_list);
                self.byte(ctx_byte(want));
                Ok(dst)
            }
            Expr::MethodCall {
                invocant,
                method,
                args,
            } => {
                if method.starts_with('$') {
                    return Err(self.err("Dynamic method names are not supported"));
                }
                let inv = self.expr(invocant, Want::Scalar)?;
                let arg_list = self.temp()?;
                self.op(Opcode::LIST_NEW);
                self.reg(arg_list);
                self.op(Opcode::LIST_PUSH_CELL);
                self.reg(arg_list);
                self.reg(inv);
                for arg in args {
                    self.push_into_list(arg, arg_list)?;
                }
                let method_const = self.const_str(method)?;
                let dst = self.temp()?;
                self.op(Opcode::METHOD_CALL);
                self.reg(dst);
                self.reg(inv);
                self.cidx(method_const);
                self.reg(arg_list);
                self.byte(ctx_byte(want));
                Ok(dst)
            }
            Expr::Match {
                target,
                pattern,
                flags,
                negated,
            } => self.match_expr(target.as_deref(), pattern, flags, *negated, want),
            Expr::Subst {
                target,
                pattern,
                replacement,
                flags,
            } => self.subst_expr(target.as_deref(), pattern, replacement, flags),
            Expr::EvalBlock(body) => {
                let code = self.compile_closure(body, None, true)?;
                self.op(Opcode::ENTER_SCOPE);
                self.scope_depth += 1;
                self.op(Opcode::SAVE_REGEX_STATE);
                let dst = self.temp()?;
                self.op(Opcode::EVAL_CALL);
                self.reg(dst);
                self.reg(code);
                self.byte(ctx_byte(want));
                self.scope_depth -= 1;
                self.op(Opcode::LEAVE_SCOPE);
                Ok(dst)
            }
            Expr::EvalString(inner) => {
                let src = self.expr(inner, Want::Scalar)?;
                let scope = EvalScope {
                    package: self.package.clone(),
                    lexicals: self.regs.visible_lexicals(),
                };
                let desc = self.eval_scopes.len() as u16;
                self.eval_scopes.push(scope);
                self.op(Opcode::ENTER_SCOPE);
                self.scope_depth += 1;
                self.op(Opcode::SAVE_REGEX_STATE);
                let dst = self.temp()?;
                self.op(Opcode::EVAL_STRING);
                self.reg(dst);
                self.reg(src);
                self.cidx(desc);
                self.byte(ctx_byte(want));
                self.scope_depth -= 1;
                self.op(Opcode::LEAVE_SCOPE);
                Ok(dst)
            }
            Expr::DoBlock(body) => {
                // do BLOCK: value of the last expression; a plain
                // non-catching call
                let code = self.compile_closure(body, None, false)?;
                let arg_list = self.temp()?;
                self.op(Opcode::LIST_NEW);
                self.reg(arg_list);
                let dst = self.temp()?;
                self.op(Opcode::CALL);
                self.reg(dst);
                self.reg(code);
                self.reg(arg_list);
                self.byte(ctx_byte(want));
                Ok(dst)
            }
            Expr::Wantarray => {
                let dst = self.temp()?;
                self.op(Opcode::WANT_ARRAY);
                self.reg(dst);
                Ok(dst)
            }
        }
    }

    /// An expression in list context, yielding a register that holds a
    /// fresh list.
    fn expr_as_list(&mut self, e: &Expr) -> Result<u8, CompileError> {
        let list = self.temp()?;
        self.op(Opcode::LIST_NEW);
        self.reg(list);
        self.push_into_list(e, list)?;
        Ok(list)
    }

    /// Flattens `e` into `list`, in list context.
    fn push_into_list(&mut self, e: &Expr, list: u8) -> Result<(), CompileError> {
        match e {
            Expr::List(items) => {
                for item in items {
                    self.push_into_list(item, list)?;
                }
                Ok(())
            }
            Expr::Range { from, to } => {
                let from_reg = self.expr(from, Want::Scalar)?;
                let to_reg = self.expr(to, Want::Scalar)?;
                self.op(Opcode::RANGE_TO_LIST);
                self.reg(list);
                self.reg(from_reg);
                self.reg(to_reg);
                Ok(())
            }
            Expr::ArrayVar(name) => {
                let arr = self.array_reg(name)?;
                self.op(Opcode::LIST_FLATTEN);
                self.reg(list);
                self.reg(arr);
                Ok(())
            }
            Expr::HashVar(name) => {
                let hash = self.hash_reg(name)?;
                self.op(Opcode::LIST_FLATTEN);
                self.reg(list);
                self.reg(hash);
                Ok(())
            }
            Expr::Deref {
                kind: DerefKind::Array,
                expr,
            } => {
                let r = self.expr(expr, Want::Scalar)?;
                let arr = self.temp()?;
                self.op(Opcode::DEREF_ARRAY);
                self.reg(arr);
                self.reg(r);
                self.op(Opcode::LIST_FLATTEN);
                self.reg(list);
                self.reg(arr);
                Ok(())
            }
            Expr::Deref {
                kind: DerefKind::Hash,
                expr,
            } => {
                let r = self.expr(expr, Want::Scalar)?;
                let hash = self.temp()?;
                self.op(Opcode::DEREF_HASH);
                self.reg(hash);
                self.reg(r);
                self.op(Opcode::LIST_FLATTEN);
                self.reg(list);
                self.reg(hash);
                Ok(())
            }
            Expr::Call { .. }
            | Expr::CallRef { .. }
            | Expr::MethodCall { .. }
            | Expr::Match { .. }
            | Expr::EvalBlock(_)
            | Expr::EvalString(_)
            | Expr::DoBlock(_) => {
                let result = self.expr(e, Want::List)?;
                self.op(Opcode::LIST_FLATTEN);
                self.reg(list);
                self.reg(result);
                Ok(())
            }
            other => {
                let r = self.expr(other, Want::Scalar)?;
                self.op(Opcode::LIST_PUSH);
                self.reg(list);
                self.reg(r);
                Ok(())
            }
        }
    }

    /// Argument lists alias plain variables (so `@_` writes through) and
    /// copy everything else.
    fn call_args_list(&mut self, args: &[Expr]) -> Result<u8, CompileError> {
        let list = self.temp()?;
        self.op(Opcode::LIST_NEW);
        self.reg(list);
        for arg in args {
            match arg {
                Expr::ScalarVar(_) | Expr::Elem { .. } => {
                    let cell = self.lvalue(arg, false)?;
                    self.op(Opcode::LIST_PUSH_CELL);
                    self.reg(list);
                    self.reg(cell);
                }
                other => self.push_into_list(other, list)?,
            }
        }
        Ok(list)
    }

    fn interp_string(&mut self, parts: &[InterpPart]) -> Result<u8, CompileError> {
        let mut current: Option<u8> = None;
        for part in parts {
            let piece = match part {
                InterpPart::Lit(text) => {
                    let c = self.const_pstr(text)?;
                    let dst = self.temp()?;
                    self.op(Opcode::LOAD_CONST);
                    self.reg(dst);
                    self.cidx(c);
                    dst
                }
                InterpPart::Var(expr) => self.expr(expr, Want::Scalar)?,
            };
            current = Some(match current {
                None => piece,
                Some(prev) => {
                    let dst = self.temp()?;
                    self.op(Opcode::CONCAT);
                    self.reg(dst);
                    self.reg(prev);
                    self.reg(piece);
                    dst
                }
            });
        }
        match current {
            Some(reg) => Ok(reg),
            None => {
                let c = self.const_str("")?;
                let dst = self.temp()?;
                self.op(Opcode::LOAD_CONST);
                self.reg(dst);
                self.cidx(c);
                Ok(dst)
            }
        }
    }

    // ---- variables and lvalues -------------------------------------------

    /// Register holding an array value for `@name`.
    fn array_reg(&mut self, name: &str) -> Result<u8, CompileError> {
        if name == "_" {
            return Ok(0);
        }
        if let Some(reg) = self.resolve_lexical(&format!("@{}", name))? {
            return Ok(reg);
        }
        let qualified = self.qualified(name);
        let c = self.const_str(&qualified)?;
        let dst = self.temp()?;
        self.op(Opcode::GET_GLOBAL_ARRAY);
        self.reg(dst);
        self.cidx(c);
        Ok(dst)
    }

    fn hash_reg(&mut self, name: &str) -> Result<u8, CompileError> {
        if let Some(reg) = self.resolve_lexical(&format!("%{}", name))? {
            return Ok(reg);
        }
        let qualified = self.qualified(name);
        let c = self.const_str(&qualified)?;
        let dst = self.temp()?;
        self.op(Opcode::GET_GLOBAL_HASH);
        self.reg(dst);
        self.cidx(c);
        Ok(dst)
    }

    /// Register of the container for an element access. In l-value mode
    /// intermediate links autovivify; r-value chains never do.
    fn container_reg(
        &mut self,
        container: &Expr,
        kind: ElemKind,
        via_ref: bool,
        lvalue: bool,
    ) -> Result<u8, CompileError> {
        if via_ref {
            // in l-value mode the container chain itself autovivifies
            let r = if lvalue {
                self.lvalue(container, true)?
            } else {
                self.expr(container, Want::Scalar)?
            };
            let dst = self.temp()?;
            let op = match (kind, lvalue) {
                (ElemKind::Array, true) => Opcode::DEREF_ARRAY_LV,
                (ElemKind::Array, false) => Opcode::DEREF_ARRAY,
                (ElemKind::Hash, true) => Opcode::DEREF_HASH_LV,
                (ElemKind::Hash, false) => Opcode::DEREF_HASH,
            };
            self.op(op);
            self.reg(dst);
            self.reg(r);
            return Ok(dst);
        }
        match container {
            Expr::ArrayVar(name) => self.array_reg(name),
            Expr::HashVar(name) => self.hash_reg(name),
            other => self.container_reg(other, kind, true, lvalue),
        }
    }

    /// Resolves an expression to a register holding the addressed CELL.
    /// With `lvalue` set, element chains autovivify along the way.
    fn lvalue(&mut self, e: &Expr, lvalue: bool) -> Result<u8, CompileError> {
        match e {
            Expr::ScalarVar(name) => {
                if name == "_" {
                    return Ok(1);
                }
                if let Some(reg) = self.resolve_lexical(&format!("${}", name))? {
                    return Ok(reg);
                }
                let qualified = self.qualified(name);
                let c = self.const_str(&qualified)?;
                let dst = self.temp()?;
                self.op(Opcode::GET_GLOBAL);
                self.reg(dst);
                self.cidx(c);
                Ok(dst)
            }
            Expr::SpecialVar(var) => {
                let code = match var {
                    SpecialVar::Match => 0u16,
                    SpecialVar::Prematch => 1,
                    SpecialVar::Postmatch => 2,
                    SpecialVar::Capture(n) => {
                        10 + u16::try_from(*n)
                            .map_err(|_| self.err("Capture group number out of range"))?
                    }
                };
                let dst = self.temp()?;
                self.op(Opcode::GET_SPECIAL);
                self.reg(dst);
                self.cidx(code);
                Ok(dst)
            }
            Expr::Elem {
                container,
                index,
                kind,
                via_ref,
            } => {
                let cont = self.container_reg(container, *kind, *via_ref, lvalue)?;
                let idx = self.expr(index, Want::Scalar)?;
                let dst = self.temp()?;
                let op = match (kind, lvalue) {
                    (ElemKind::Array, true) => Opcode::ARRAY_GET_LV,
                    (ElemKind::Array, false) => Opcode::ARRAY_GET,
                    (ElemKind::Hash, true) => Opcode::HASH_GET_LV,
                    (ElemKind::Hash, false) => Opcode::HASH_GET,
                };
                self.op(op);
                self.reg(dst);
                self.reg(cont);
                self.reg(idx);
                Ok(dst)
            }
            Expr::Deref {
                kind: DerefKind::Scalar,
                expr,
            } => {
                let r = self.expr(expr, Want::Scalar)?;
                let dst = self.temp()?;
                self.op(Opcode::DEREF_SCALAR);
                self.reg(dst);
                self.reg(r);
                Ok(dst)
            }
            Expr::Deref {
                kind: DerefKind::Array,
                expr,
            } => {
                let r = self.expr(expr, Want::Scalar)?;
                let dst = self.temp()?;
                self.op(if lvalue {
                    Opcode::DEREF_ARRAY_LV
                } else {
                    Opcode::DEREF_ARRAY
                });
                self.reg(dst);
                self.reg(r);
                Ok(dst)
            }
            Expr::Deref {
                kind: DerefKind::Hash,
                expr,
            } => {
                let r = self.expr(expr, Want::Scalar)?;
                let dst = self.temp()?;
                self.op(if lvalue {
                    Opcode::DEREF_HASH_LV
                } else {
                    Opcode::DEREF_HASH
                });
                self.reg(dst);
                self.reg(r);
                Ok(dst)
            }
            Expr::Deref {
                kind: DerefKind::Code,
                expr,
            } => {
                let r = self.expr(expr, Want::Scalar)?;
                let dst = self.temp()?;
                self.op(Opcode::DEREF_CODE);
                self.reg(dst);
                self.reg(r);
                Ok(dst)
            }
            Expr::Unop {
                op: UnOp::Plus,
                operand,
            } => self.lvalue(operand, lvalue),
            Expr::List(items) if items.is_empty() => {
                // lvalue (): fresh mutable cell, silently (documented policy)
                let dst = self.temp()?;
                self.op(Opcode::LOAD_UNDEF);
                self.reg(dst);
                Ok(dst)
            }
            other => self.expr(other, Want::Scalar),
        }
    }

    fn make_ref(&mut self, inner: &Expr) -> Result<u8, CompileError> {
        match inner {
            Expr::ArrayVar(name) => self.array_reg(name),
            Expr::HashVar(name) => self.hash_reg(name),
            Expr::Deref {
                kind: DerefKind::Array,
                expr,
            } => {
                let r = self.expr(expr, Want::Scalar)?;
                let dst = self.temp()?;
                self.op(Opcode::DEREF_ARRAY);
                self.reg(dst);
                self.reg(r);
                Ok(dst)
            }
            Expr::Deref {
                kind: DerefKind::Hash,
                expr,
            } => {
                let r = self.expr(expr, Want::Scalar)?;
                let dst = self.temp()?;
                self.op(Opcode::DEREF_HASH);
                self.reg(dst);
                self.reg(r);
                Ok(dst)
            }
            other => {
                let cell = self.lvalue(other, true)?;
                let dst = self.temp()?;
                self.op(Opcode::MAKE_REF);
                self.reg(dst);
                self.reg(cell);
                Ok(dst)
            }
        }
    }

    // ---- assignment ------------------------------------------------------

    fn assign(&mut self, target: &Expr, value: &Expr, want: Want) -> Result<u8, CompileError> {
        let _ = want;
        match target {
            Expr::ArrayVar(_)
            | Expr::Deref {
                kind: DerefKind::Array,
                ..
            } => {
                let arr = match target {
                    Expr::ArrayVar(name) => self.array_reg(name)?,
                    other => self.lvalue(other, true)?,
                };
                let list = self.expr_as_list(value)?;
                self.op(Opcode::ARRAY_ASSIGN);
                self.reg(arr);
                self.reg(list);
                Ok(arr)
            }
            Expr::HashVar(_)
            | Expr::Deref {
                kind: DerefKind::Hash,
                ..
            } => {
                let hash = match target {
                    Expr::HashVar(name) => self.hash_reg(name)?,
                    other => self.lvalue(other, true)?,
                };
                let list = self.expr_as_list(value)?;
                self.op(Opcode::HASH_ASSIGN);
                self.reg(hash);
                self.reg(list);
                Ok(hash)
            }
            Expr::GlobVar(name) => {
                let qualified = self.qualified(name);
                let c = self.const_str(&qualified)?;
                let v = self.expr(value, Want::Scalar)?;
                self.op(Opcode::GLOB_ASSIGN);
                self.cidx(c);
                self.reg(v);
                Ok(v)
            }
            Expr::List(items) => {
                let list = self.expr_as_list(value)?;
                let mut index: i32 = 0;
                for item in items {
                    match item {
                        Expr::ArrayVar(name) => {
                            let arr = self.array_reg(name)?;
                            let rest = self.temp()?;
                            self.op(Opcode::LIST_SLICE);
                            self.reg(rest);
                            self.reg(list);
                            self.imm(index);
                            self.op(Opcode::ARRAY_ASSIGN);
                            self.reg(arr);
                            self.reg(rest);
                            index = i32::MAX;
                        }
                        Expr::HashVar(name) => {
                            let hash = self.hash_reg(name)?;
                            let rest = self.temp()?;
                            self.op(Opcode::LIST_SLICE);
                            self.reg(rest);
                            self.reg(list);
                            self.imm(index);
                            self.op(Opcode::HASH_ASSIGN);
                            self.reg(hash);
                            self.reg(rest);
                            index = i32::MAX;
                        }
                        other => {
                            let cell = self.lvalue(other, true)?;
                            let elem = self.temp()?;
                            self.op(Opcode::LIST_GET);
                            self.reg(elem);
                            self.reg(list);
                            self.imm(index);
                            self.op(Opcode::COPY_VALUE);
                            self.reg(cell);
                            self.reg(elem);
                            index += 1;
                        }
                    }
                }
                Ok(list)
            }
            other => {
                let value_reg = self.expr(value, Want::Scalar)?;
                let cell = self.lvalue(other, true)?;
                self.op(Opcode::COPY_VALUE);
                self.reg(cell);
                self.reg(value_reg);
                Ok(cell)
            }
        }
    }

    fn op_assign(&mut self, op: BinOp, target: &Expr, value: &Expr) -> Result<u8, CompileError> {
        let compound =
            compound_opcode(op).ok_or_else(|| self.err("Unsupported compound assignment"))?;
        // superinstruction: += with a small integer constant
        if compound == Opcode::ADD_ASSIGN {
            if let Expr::IntLit(v) = value {
                if let Ok(imm) = i32::try_from(*v) {
                    let cell = self.lvalue(target, true)?;
                    self.op(Opcode::ADD_ASSIGN_INT);
                    self.reg(cell);
                    self.imm(imm);
                    return Ok(cell);
                }
            }
        }
        let value_reg = self.expr(value, Want::Scalar)?;
        let cell = self.lvalue(target, true)?;
        self.op(compound);
        self.reg(cell);
        self.reg(value_reg);
        Ok(cell)
    }

    fn logical_assign(
        &mut self,
        op: LogicOp,
        target: &Expr,
        value: &Expr,
    ) -> Result<u8, CompileError> {
        let cell = self.lvalue(target, true)?;
        match op {
            LogicOp::And => {
                self.op(Opcode::JUMP_IF_FALSE);
                self.reg(cell);
                let end = self.target_hole();
                let v = self.expr(value, Want::Scalar)?;
                self.op(Opcode::COPY_VALUE);
                self.reg(cell);
                self.reg(v);
                let here = self.pc();
                self.patch(end, here);
            }
            LogicOp::Or => {
                self.op(Opcode::JUMP_IF_TRUE);
                self.reg(cell);
                let end = self.target_hole();
                let v = self.expr(value, Want::Scalar)?;
                self.op(Opcode::COPY_VALUE);
                self.reg(cell);
                self.reg(v);
                let here = self.pc();
                self.patch(end, here);
            }
            LogicOp::Dor => {
                let defined = self.temp()?;
                self.op(Opcode::DEFINED);
                self.reg(defined);
                self.reg(cell);
                self.op(Opcode::JUMP_IF_TRUE);
                self.reg(defined);
                let end = self.target_hole();
                let v = self.expr(value, Want::Scalar)?;
                self.op(Opcode::COPY_VALUE);
                self.reg(cell);
                self.reg(v);
                let here = self.pc();
                self.patch(end, here);
            }
        }
        Ok(cell)
    }

    // ---- operators -------------------------------------------------------

    fn unop(&mut self, op: UnOp, operand: &Expr) -> Result<u8, CompileError> {
        match op {
            UnOp::Plus => self.expr(operand, Want::Scalar),
            UnOp::Neg => {
                let r = self.expr(operand, Want::Scalar)?;
                let dst = self.temp()?;
                self.op(Opcode::NEG);
                self.reg(dst);
                self.reg(r);
                Ok(dst)
            }
            UnOp::Not => {
                let r = self.expr(operand, Want::Scalar)?;
                let dst = self.temp()?;
                self.op(Opcode::NOT);
                self.reg(dst);
                self.reg(r);
                Ok(dst)
            }
            UnOp::BitNot => {
                let r = self.expr(operand, Want::Scalar)?;
                let dst = self.temp()?;
                self.op(Opcode::BIT_NOT);
                self.reg(dst);
                self.reg(r);
                Ok(dst)
            }
            UnOp::PreInc | UnOp::PreDec => {
                let cell = self.lvalue(operand, true)?;
                self.op(if op == UnOp::PreInc {
                    Opcode::INC
                } else {
                    Opcode::DEC
                });
                self.reg(cell);
                Ok(cell)
            }
            UnOp::PostInc | UnOp::PostDec => {
                let cell = self.lvalue(operand, true)?;
                let old = self.temp()?;
                self.op(Opcode::LOAD_UNDEF);
                self.reg(old);
                self.op(Opcode::COPY_VALUE);
                self.reg(old);
                self.reg(cell);
                self.op(if op == UnOp::PostInc {
                    Opcode::INC
                } else {
                    Opcode::DEC
                });
                self.reg(cell);
                Ok(old)
            }
        }
    }

    fn binop(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<u8, CompileError> {
        // superinstruction: small-int constant on the rhs of +
        if op == BinOp::Add {
            if let Expr::IntLit(v) = rhs {
                if let Ok(imm) = i32::try_from(*v) {
                    let l = self.expr(lhs, Want::Scalar)?;
                    let dst = self.temp()?;
                    self.op(Opcode::ADD_SCALAR_INT);
                    self.reg(dst);
                    self.reg(l);
                    self.imm(imm);
                    return Ok(dst);
                }
            }
        }
        let l = self.expr(lhs, Want::Scalar)?;
        let r = self.expr(rhs, Want::Scalar)?;
        let dst = self.temp()?;
        self.op(binop_opcode(op));
        self.reg(dst);
        self.reg(l);
        self.reg(r);
        Ok(dst)
    }

    fn logical(&mut self, op: LogicOp, lhs: &Expr, rhs: &Expr) -> Result<u8, CompileError> {
        let dst = self.temp()?;
        let l = self.expr(lhs, Want::Scalar)?;
        self.op(Opcode::ALIAS_REG);
        self.reg(dst);
        self.reg(l);
        match op {
            LogicOp::And => {
                self.op(Opcode::JUMP_IF_FALSE);
                self.reg(l);
            }
            LogicOp::Or => {
                self.op(Opcode::JUMP_IF_TRUE);
                self.reg(l);
            }
            LogicOp::Dor => {
                let defined = self.temp()?;
                self.op(Opcode::DEFINED);
                self.reg(defined);
                self.reg(l);
                self.op(Opcode::JUMP_IF_TRUE);
                self.reg(defined);
            }
        }
        let end = self.target_hole();
        let r = self.expr(rhs, Want::Scalar)?;
        self.op(Opcode::ALIAS_REG);
        self.reg(dst);
        self.reg(r);
        let here = self.pc();
        self.patch(end, here);
        Ok(dst)
    }

    // ---- regex -----------------------------------------------------------

    fn match_expr(
        &mut self,
        target: Option<&Expr>,
        pattern: &str,
        flags: &str,
        negated: bool,
        want: Want,
    ) -> Result<u8, CompileError> {
        let target_reg = match target {
            Some(expr) => self.lvalue(expr, false)?,
            None => 1,
        };
        let pat = self.const_pattern(pattern, flags)?;
        let mut flag_byte = 0u8;
        if flags.contains('g') {
            flag_byte |= MATCH_FLAG_GLOBAL;
        }
        if negated {
            flag_byte |= MATCH_FLAG_NEGATED;
        }
        let dst = self.temp()?;
        let list_wanted = want == Want::List && !negated;
        self.op(if list_wanted {
            Opcode::MATCH_LIST
        } else {
            Opcode::MATCH_SCALAR
        });
        self.reg(dst);
        self.reg(target_reg);
        self.cidx(pat);
        self.byte(flag_byte);
        Ok(dst)
    }

    fn subst_expr(
        &mut self,
        target: Option<&Expr>,
        pattern: &str,
        replacement: &str,
        flags: &str,
    ) -> Result<u8, CompileError> {
        let target_reg = match target {
            Some(expr) => self.lvalue(expr, true)?,
            None => 1,
        };
        let pat = self.const_pattern(pattern, flags)?;
        let repl = self.const_str(replacement)?;
        let mut flag_byte = 0u8;
        if flags.contains('g') {
            flag_byte |= MATCH_FLAG_GLOBAL;
        }
        let dst = self.temp()?;
        self.op(Opcode::SUBST);
        self.reg(dst);
        self.reg(target_reg);
        self.cidx(pat);
        self.cidx(repl);
        self.byte(flag_byte);
        Ok(dst)
    }

    // ---- calls -----------------------------------------------------------

    fn call(&mut self, name: &str, args: &[Expr], want: Want) -> Result<u8, CompileError> {
        match name {
            "scalar" => {
                // imposes scalar context on its single argument
                let arg = args
                    .first()
                    .ok_or_else(|| self.err("scalar requires an argument"))?;
                return self.expr(arg, Want::Scalar);
            }
            "splice" => {
                let mut it = args.iter();
                let arr_expr = it
                    .next()
                    .ok_or_else(|| self.err("splice requires an array"))?;
                let arr = self.array_argument(arr_expr)?;
                let list = self.temp()?;
                self.op(Opcode::LIST_NEW);
                self.reg(list);
                // the array rides as a reference value ahead of the
                // offset/length/replacement arguments
                self.op(Opcode::LIST_PUSH);
                self.reg(list);
                self.reg(arr);
                for arg in it {
                    self.push_into_list(arg, list)?;
                }
                return self.emit_builtin(Builtin::Splice, list, want);
            }
            "defined" => {
                let r = match args.first() {
                    Some(arg) => self.lvalue(arg, false)?,
                    None => 1,
                };
                let dst = self.temp()?;
                self.op(Opcode::DEFINED);
                self.reg(dst);
                self.reg(r);
                return Ok(dst);
            }
            "ref" => {
                let r = match args.first() {
                    Some(arg) => self.expr(arg, Want::Scalar)?,
                    None => 1,
                };
                let dst = self.temp()?;
                self.op(Opcode::REF_KIND);
                self.reg(dst);
                self.reg(r);
                return Ok(dst);
            }
            "exists" | "delete" => {
                let arg = args
                    .first()
                    .ok_or_else(|| self.err(format!("{} requires an element", name)))?;
                if let Expr::Elem {
                    container,
                    index,
                    kind,
                    via_ref,
                } = arg
                {
                    let cont = self.container_reg(container, *kind, *via_ref, false)?;
                    let idx = self.expr(index, Want::Scalar)?;
                    let dst = self.temp()?;
                    let op = match (kind, name) {
                        (ElemKind::Hash, "exists") => Opcode::HASH_EXISTS,
                        (ElemKind::Hash, _) => Opcode::HASH_DELETE,
                        (ElemKind::Array, "exists") => Opcode::ARRAY_EXISTS,
                        (ElemKind::Array, _) => Opcode::ARRAY_DELETE,
                    };
                    self.op(op);
                    self.reg(dst);
                    self.reg(cont);
                    self.reg(idx);
                    return Ok(dst);
                }
                return Err(self.err(format!("{} argument must be an element", name)));
            }
            "keys" | "values" | "each" => {
                let arg = args
                    .first()
                    .ok_or_else(|| self.err(format!("{} requires a hash", name)))?;
                let hash = match arg {
                    Expr::HashVar(hname) => self.hash_reg(hname)?,
                    Expr::Deref {
                        kind: DerefKind::Hash,
                        expr,
                    } => {
                        let r = self.expr(expr, Want::Scalar)?;
                        let dst = self.temp()?;
                        self.op(Opcode::DEREF_HASH);
                        self.reg(dst);
                        self.reg(r);
                        dst
                    }
                    other => self.expr(other, Want::Scalar)?,
                };
                let dst = self.temp()?;
                self.op(match name {
                    "keys" => Opcode::HASH_KEYS,
                    "values" => Opcode::HASH_VALUES,
                    _ => Opcode::HASH_EACH,
                });
                self.reg(dst);
                self.reg(hash);
                if name == "keys" && want == Want::Scalar {
                    let count = self.temp()?;
                    self.op(Opcode::ARRAY_LEN);
                    self.reg(count);
                    self.reg(dst);
                    return Ok(count);
                }
                return Ok(dst);
            }
            "push" | "unshift" => {
                let mut it = args.iter();
                let arr_expr = it
                    .next()
                    .ok_or_else(|| self.err(format!("{} requires an array", name)))?;
                let arr = self.array_argument(arr_expr)?;
                let list = self.temp()?;
                self.op(Opcode::LIST_NEW);
                self.reg(list);
                for arg in it {
                    self.push_into_list(arg, list)?;
                }
                let dst = self.temp()?;
                self.op(if name == "push" {
                    Opcode::ARRAY_PUSH
                } else {
                    Opcode::ARRAY_UNSHIFT
                });
                self.reg(dst);
                self.reg(arr);
                self.reg(list);
                return Ok(dst);
            }
            "pop" | "shift" => {
                let arr = match args.first() {
                    Some(arg) => self.array_argument(arg)?,
                    None => 0, // @_ by default inside subs
                };
                let dst = self.temp()?;
                self.op(if name == "pop" {
                    Opcode::ARRAY_POP
                } else {
                    Opcode::ARRAY_SHIFT
                });
                self.reg(dst);
                self.reg(arr);
                return Ok(dst);
            }
            "die" | "warn" => {
                let list = self.temp()?;
                self.op(Opcode::LIST_NEW);
                self.reg(list);
                for arg in args {
                    self.push_into_list(arg, list)?;
                }
                self.op(if name == "die" {
                    Opcode::DIE
                } else {
                    Opcode::WARN
                });
                self.reg(list);
                return Ok(list);
            }
            "bless" => {
                let reference = args
                    .first()
                    .ok_or_else(|| self.err("bless requires a reference"))?;
                let r = self.expr(reference, Want::Scalar)?;
                let pkg = match args.get(1) {
                    Some(expr) => self.expr(expr, Want::Scalar)?,
                    None => {
                        let pkg_name = self.package.clone();
                        let c = self.const_str(&pkg_name)?;
                        let dst = self.temp()?;
                        self.op(Opcode::LOAD_CONST);
                        self.reg(dst);
                        self.cidx(c);
                        dst
                    }
                };
                let dst = self.temp()?;
                self.op(Opcode::BLESS);
                self.reg(dst);
                self.reg(r);
                self.reg(pkg);
                return Ok(dst);
            }
            "chomp" | "chop" => {
                let default = Expr::ScalarVar("_".into());
                let arg = args.first().unwrap_or(&default);
                if !arg.is_lvalue() {
                    return Err(
                        self.err(format!("Can't modify {} in scalar assignment", name))
                    );
                }
                let cell = self.lvalue(arg, true)?;
                let list = self.temp()?;
                self.op(Opcode::LIST_NEW);
                self.reg(list);
                self.op(Opcode::LIST_PUSH_CELL);
                self.reg(list);
                self.reg(cell);
                let builtin = if name == "chomp" {
                    Builtin::Chomp
                } else {
                    Builtin::Chop
                };
                return self.emit_builtin(builtin, list, want);
            }
            "pos" => {
                let default = Expr::ScalarVar("_".into());
                let arg = args.first().unwrap_or(&default);
                let cell = self.lvalue(arg, false)?;
                let list = self.temp()?;
                self.op(Opcode::LIST_NEW);
                self.reg(list);
                self.op(Opcode::LIST_PUSH_CELL);
                self.reg(list);
                self.reg(cell);
                return self.emit_builtin(Builtin::Pos, list, want);
            }
            "split" => {
                let list = self.temp()?;
                self.op(Opcode::LIST_NEW);
                self.reg(list);
                let mut rest = args;
                if let Some(Expr::Match { pattern, flags, .. }) = args.first() {
                    let c = self.const_pattern(pattern, flags)?;
                    let pat_reg = self.temp()?;
                    self.op(Opcode::LOAD_CONST);
                    self.reg(pat_reg);
                    self.cidx(c);
                    self.op(Opcode::LIST_PUSH);
                    self.reg(list);
                    self.reg(pat_reg);
                    rest = &args[1..];
                }
                for arg in rest {
                    self.push_into_list(arg, list)?;
                }
                return self.emit_builtin(Builtin::Split, list, want);
            }
            _ => {}
        }

        if let Some(builtin) = Builtin::from_name(name) {
            let list = self.temp()?;
            self.op(Opcode::LIST_NEW);
            self.reg(list);
            for arg in args {
                match arg {
                    Expr::AnonSub(body) => {
                        let code = self.compile_closure(body, None, false)?;
                        self.op(Opcode::LIST_PUSH);
                        self.reg(list);
                        self.reg(code);
                    }
                    other => self.push_into_list(other, list)?,
                }
            }
            return self.emit_builtin(builtin, list, want);
        }

        // user subroutine
        let qualified = self.qualified(name);
        let c = self.const_str(&qualified)?;
        let code = self.temp()?;
        self.op(Opcode::GET_GLOBAL_CODE);
        self.reg(code);
        self.cidx(c);
        let arg_list = self.call_args_list(args)?;
        let dst = self.temp()?;
        self.op(Opcode::CALL);
        self.reg(dst);
        self.reg(code);
        self.reg(arg_list);
        self.byte(ctx_byte(want));
        Ok(dst)
    }

    fn emit_builtin(
        &mut self,
        builtin: Builtin,
        list: u8,
        want: Want,
    ) -> Result<u8, CompileError> {
        let dst = self.temp()?;
        self.op(Opcode::CALL_BUILTIN);
        self.reg(dst);
        self.cidx(builtin.into());
        self.reg(list);
        self.byte(ctx_byte(want));
        Ok(dst)
    }

    /// An argument that must denote an array (push/pop/…).
    fn array_argument(&mut self, arg: &Expr) -> Result<u8, CompileError> {
        match arg {
            Expr::ArrayVar(name) => self.array_reg(name),
            Expr::Deref {
                kind: DerefKind::Array,
                expr,
            } => {
                let r = self.expr(expr, Want::Scalar)?;
                let dst = self.temp()?;
                self.op(Opcode::DEREF_ARRAY_LV);
                self.reg(dst);
                self.reg(r);
                Ok(dst)
            }
            other => {
                // a scalar holding an array reference
                let r = self.expr(other, Want::Scalar)?;
                let dst = self.temp()?;
                self.op(Opcode::DEREF_ARRAY_LV);
                self.reg(dst);
                self.reg(r);
                Ok(dst)
            }
        }
    }
}

fn ctx_byte(want: Want) -> u8 {
    match want {
        Want::List => CTX_LIST,
        _ => CTX_SCALAR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parser::parse_program;

    fn compile(src: &str) -> Rc<InterpretedCode> {
        let program = parse_program(src, "t.pl").unwrap();
        compile_program(&program).unwrap()
    }

    #[test]
    fn compiles_simple_program() {
        let code = compile("my $x = 1; $x + 2;");
        assert!(!code.bytecode.is_empty());
        assert!(code.max_register >= 4);
        assert!(!code.catches_errors);
    }

    #[test]
    fn foreach_range_emits_lazy_iterator() {
        let code = compile("my $s = 0; foreach my $i (1..10) { $s += $i; }");
        let bytes = &code.bytecode;
        let iter_op: u8 = Opcode::ITER_FROM_RANGE.into();
        let fused: u8 = Opcode::FOREACH_NEXT_OR_EXIT.into();
        assert!(bytes.contains(&iter_op));
        assert!(bytes.contains(&fused));
        // no RANGE_TO_LIST: the range must stay lazy
        let materialise: u8 = Opcode::RANGE_TO_LIST.into();
        assert!(!bytes.contains(&materialise));
    }

    #[test]
    fn loops_record_labels() {
        let code = compile("OUTER: while (1) { last OUTER; }");
        assert_eq!(code.loops.len(), 1);
        assert_eq!(code.loops[0].label.as_deref(), Some("OUTER"));
    }

    #[test]
    fn bare_blocks_are_probed_loops() {
        let code = compile("L: { 1; }");
        assert_eq!(code.loops.len(), 1);
        assert_eq!(code.loops[0].label.as_deref(), Some("L"));
        assert_eq!(code.loops[0].next_pc, code.loops[0].last_pc);
    }

    #[test]
    fn add_superinstruction() {
        let code = compile("my $x = 1; my $y = $x + 5;");
        let op: u8 = Opcode::ADD_SCALAR_INT.into();
        assert!(code.bytecode.contains(&op));
    }

    #[test]
    fn compound_add_immediate() {
        let code = compile("my $x = 0; $x += 3;");
        let op: u8 = Opcode::ADD_ASSIGN_INT.into();
        assert!(code.bytecode.contains(&op));
    }

    #[test]
    fn chop_of_nonlvalue_is_a_compile_error() {
        let program = parse_program("chop(+());", "t.pl").unwrap();
        let err = compile_program(&program).unwrap_err();
        assert_eq!(err.message, "Can't modify chop in scalar assignment");
    }

    #[test]
    fn line_map_is_recorded() {
        let code = compile("1;\n2;\n3;");
        assert!(code.line_map.len() >= 2);
        let lines: Vec<u32> = code.line_map.iter().map(|&(_, l)| l).collect();
        assert!(lines.contains(&1));
        assert!(lines.contains(&3));
    }

    #[test]
    fn eval_string_site_records_lexicals() {
        let code = compile("my $x = 1; my $r = eval '$x + 1';");
        assert_eq!(code.eval_scopes.len(), 1);
        assert_eq!(code.eval_scopes[0].package, "main");
        assert!(code.eval_scopes[0]
            .lexicals
            .iter()
            .any(|(name, _)| name == "$x"));
    }
}

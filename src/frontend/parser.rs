use num_bigint::BigInt;

use crate::frontend::ast::*;
use crate::frontend::lexer::{Lexer, NumTok, SpannedTok, Tok};
use crate::global::error::CompileError;
use crate::values::string::PStr;

/// Recursive-descent parser with precedence climbing, producing the AST
/// the bytecode compiler consumes.
pub struct Parser {
    toks: Vec<SpannedTok>,
    pos: usize,
    file: String,
}

pub fn parse_program(source: &str, file: &str) -> Result<Program, CompileError> {
    let toks = Lexer::tokenize(source)?;
    let mut parser = Parser {
        toks,
        pos: 0,
        file: file.to_string(),
    };
    let mut stmts = Vec::new();
    while !parser.at(&Tok::Eof) {
        stmts.push(parser.statement()?);
    }
    Ok(Program {
        file: parser.file,
        stmts,
    })
}

/// Builtins that take a parenthesis-less argument list running to the end
/// of the expression.
fn is_list_operator(name: &str) -> bool {
    matches!(
        name,
        "print" | "say" | "push" | "unshift" | "splice" | "join" | "split"
            | "sort" | "reverse" | "die" | "warn" | "sprintf" | "pack"
            | "unpack" | "index" | "rindex" | "substr" | "bless" | "grep"
            | "map"
    )
}

/// Named unary operators: one argument at unary precedence.
fn is_named_unary(name: &str) -> bool {
    matches!(
        name,
        "defined" | "ref" | "scalar" | "length" | "chr" | "ord" | "uc" | "lc"
            | "ucfirst" | "lcfirst" | "chomp" | "chop" | "pop" | "shift"
            | "exists" | "delete" | "keys" | "values" | "each" | "pos"
            | "abs" | "int" | "sqrt" | "log" | "exp" | "oct" | "hex"
    )
}

fn word_is_keyword(name: &str) -> bool {
    matches!(
        name,
        "if" | "elsif" | "else" | "unless" | "while" | "until" | "for"
            | "foreach" | "do" | "sub" | "my" | "our" | "local" | "return"
            | "last" | "next" | "redo" | "eval" | "package" | "use" | "no"
            | "goto" | "undef" | "wantarray" | "not" | "and" | "or" | "xor"
    )
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.toks[self.pos.min(self.toks.len() - 1)].tok
    }

    fn peek_at(&self, ahead: usize) -> &Tok {
        let idx = (self.pos + ahead).min(self.toks.len() - 1);
        &self.toks[idx].tok
    }

    fn line(&self) -> u32 {
        self.toks[self.pos.min(self.toks.len() - 1)].line
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn bump(&mut self) -> Tok {
        let tok = self.toks[self.pos.min(self.toks.len() - 1)].tok.clone();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<(), CompileError> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.error(format!("Expected {} near {:?}", what, self.peek())))
        }
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(message, self.line())
    }

    fn ident_is(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Ident(name) if name == word)
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if self.ident_is(word) {
            self.bump();
            true
        } else {
            false
        }
    }

    // ---- statements ------------------------------------------------------

    fn statement(&mut self) -> Result<Stmt, CompileError> {
        let line = self.line();

        // stray semicolon
        if self.eat(&Tok::Semi) {
            return Ok(Stmt::Expr {
                expr: Expr::List(vec![]),
                line,
            });
        }

        // LABEL: statement
        if let Tok::Ident(name) = self.peek().clone() {
            if !word_is_keyword(&name)
                && self.peek_at(1) == &Tok::Colon
                && name.chars().next().map(char::is_uppercase).unwrap_or(false)
            {
                self.bump();
                self.bump();
                return self.labelled_statement(Some(name), line);
            }
        }

        if self.at(&Tok::LBrace) {
            return self.labelled_statement(None, line);
        }

        if let Tok::Ident(word) = self.peek().clone() {
            match word.as_str() {
                "if" | "unless" => return self.if_statement(),
                "while" | "until" | "for" | "foreach" => {
                    return self.labelled_statement(None, line)
                }
                "do" if self.peek_at(1) == &Tok::LBrace => {
                    return self.labelled_statement(None, line)
                }
                "sub" if matches!(self.peek_at(1), Tok::Ident(_)) => {
                    self.bump();
                    let name = match self.bump() {
                        Tok::Ident(name) => name,
                        _ => return Err(self.error("Missing sub name")),
                    };
                    let body = self.block()?;
                    return Ok(Stmt::Sub { name, body, line });
                }
                "package" => {
                    self.bump();
                    let name = match self.bump() {
                        Tok::Ident(name) => name,
                        _ => return Err(self.error("Missing package name")),
                    };
                    self.eat(&Tok::Semi);
                    return Ok(Stmt::Package { name, line });
                }
                "my" | "our" => {
                    self.bump();
                    let stmt = self.my_declaration(line)?;
                    return self.finish_simple_statement(stmt);
                }
                "local" => {
                    self.bump();
                    let stmt = self.local_declaration(line)?;
                    return self.finish_simple_statement(stmt);
                }
                "return" => {
                    self.bump();
                    let expr = if self.at(&Tok::Semi) || self.at(&Tok::RBrace) {
                        None
                    } else {
                        Some(self.expr_list()?)
                    };
                    return self.finish_simple_statement(Stmt::Return { expr, line });
                }
                "last" | "next" | "redo" => {
                    self.bump();
                    let label = match self.peek().clone() {
                        Tok::Ident(name) if !word_is_keyword(&name) => {
                            self.bump();
                            Some(name)
                        }
                        _ => None,
                    };
                    let stmt = match word.as_str() {
                        "last" => Stmt::Last { label, line },
                        "next" => Stmt::Next { label, line },
                        _ => Stmt::Redo { label, line },
                    };
                    return self.finish_simple_statement(stmt);
                }
                "goto" => {
                    self.bump();
                    let target = match self.peek().clone() {
                        Tok::AmpName(name) => {
                            self.bump();
                            Expr::NamedCode(name)
                        }
                        Tok::AmpSigil => {
                            self.bump();
                            self.primary()?
                        }
                        _ => return Err(self.error("goto requires &subroutine")),
                    };
                    return self.finish_simple_statement(Stmt::GotoSub { target, line });
                }
                "use" | "no" => {
                    self.bump();
                    return self.use_statement(line);
                }
                _ => {}
            }
        }

        let expr = self.expr_list()?;
        self.finish_simple_statement(Stmt::Expr { expr, line })
    }

    /// Applies statement modifiers and the closing semicolon.
    fn finish_simple_statement(&mut self, stmt: Stmt) -> Result<Stmt, CompileError> {
        let line = self.line();
        let stmt = if self.eat_ident("if") {
            let cond = self.expr_list()?;
            Stmt::If {
                arms: vec![(cond, vec![stmt])],
                otherwise: None,
                line,
            }
        } else if self.eat_ident("unless") {
            let cond = self.expr_list()?;
            Stmt::If {
                arms: vec![(Expr::Unop {
                    op: UnOp::Not,
                    operand: Box::new(cond),
                }, vec![stmt])],
                otherwise: None,
                line,
            }
        } else if self.eat_ident("while") {
            let cond = self.expr_list()?;
            Stmt::While {
                label: None,
                cond,
                body: vec![stmt],
                is_until: false,
                line,
            }
        } else if self.eat_ident("until") {
            let cond = self.expr_list()?;
            Stmt::While {
                label: None,
                cond,
                body: vec![stmt],
                is_until: true,
                line,
            }
        } else if self.eat_ident("for") || self.eat_ident("foreach") {
            let list = self.expr_list()?;
            Stmt::Foreach {
                label: None,
                var: ForeachVar::Default,
                list,
                body: vec![stmt],
                line,
            }
        } else {
            stmt
        };
        if !self.at(&Tok::RBrace) && !self.at(&Tok::Eof) {
            self.expect(&Tok::Semi, "';'")?;
        }
        Ok(stmt)
    }

    fn labelled_statement(
        &mut self,
        label: Option<String>,
        line: u32,
    ) -> Result<Stmt, CompileError> {
        if self.at(&Tok::LBrace) {
            let body = self.block()?;
            return Ok(Stmt::BareBlock { label, body, line });
        }
        if self.ident_is("while") || self.ident_is("until") {
            let is_until = self.ident_is("until");
            self.bump();
            let cond = self.paren_expr()?;
            let body = self.block()?;
            return Ok(Stmt::While {
                label,
                cond,
                body,
                is_until,
                line,
            });
        }
        if self.eat_ident("for") || self.eat_ident("foreach") {
            return self.for_statement(label, line);
        }
        if self.ident_is("do") {
            self.bump();
            let body = self.block()?;
            let is_until = if self.eat_ident("while") {
                false
            } else if self.eat_ident("until") {
                true
            } else {
                // a plain do BLOCK statement: run once for its value
                return self.finish_simple_statement(Stmt::Expr {
                    expr: Expr::DoBlock(body),
                    line,
                });
            };
            let cond = self.expr_list()?;
            if !self.at(&Tok::RBrace) && !self.at(&Tok::Eof) {
                self.expect(&Tok::Semi, "';'")?;
            }
            return Ok(Stmt::DoWhile {
                body,
                cond,
                is_until,
                line,
            });
        }
        Err(self.error("Expected a block or loop after label"))
    }

    fn for_statement(
        &mut self,
        label: Option<String>,
        line: u32,
    ) -> Result<Stmt, CompileError> {
        // `for my $x (…)`, `for $x (…)`, `for (…)`; a C-style loop has a
        // top-level `;` inside the parens
        let var = if self.eat_ident("my") {
            match self.bump() {
                Tok::Scalar(name) => Some(ForeachVar::My(name)),
                _ => return Err(self.error("Missing variable after for my")),
            }
        } else if let Tok::Scalar(name) = self.peek().clone() {
            if self.peek_at(1) == &Tok::LParen {
                self.bump();
                Some(ForeachVar::Named(name))
            } else {
                None
            }
        } else {
            None
        };

        self.expect(&Tok::LParen, "'(' after for")?;
        if var.is_none() && self.c_style_ahead() {
            let init = if self.at(&Tok::Semi) {
                None
            } else {
                let line = self.line();
                let stmt = if self.eat_ident("my") {
                    self.my_declaration(line)?
                } else {
                    Stmt::Expr {
                        expr: self.expr_list()?,
                        line,
                    }
                };
                Some(Box::new(stmt))
            };
            self.expect(&Tok::Semi, "';' in for")?;
            let cond = if self.at(&Tok::Semi) {
                None
            } else {
                Some(self.expr_list()?)
            };
            self.expect(&Tok::Semi, "';' in for")?;
            let step = if self.at(&Tok::RParen) {
                None
            } else {
                Some(self.expr_list()?)
            };
            self.expect(&Tok::RParen, "')'")?;
            let body = self.block()?;
            return Ok(Stmt::ForC {
                label,
                init,
                cond,
                step,
                body,
                line,
            });
        }

        let list = if self.at(&Tok::RParen) {
            Expr::List(vec![])
        } else {
            self.expr_list()?
        };
        self.expect(&Tok::RParen, "')'")?;
        let body = self.block()?;
        Ok(Stmt::Foreach {
            label,
            var: var.unwrap_or(ForeachVar::Default),
            list,
            body,
            line,
        })
    }

    /// Scans ahead for a top-level `;` before the matching `)`.
    fn c_style_ahead(&self) -> bool {
        let mut depth = 0usize;
        let mut ahead = 0usize;
        loop {
            match self.peek_at(ahead) {
                Tok::LParen | Tok::LBracket | Tok::LBrace => depth += 1,
                Tok::RParen | Tok::RBracket | Tok::RBrace => {
                    if depth == 0 {
                        return false;
                    }
                    depth -= 1;
                }
                Tok::Semi if depth == 0 => return true,
                Tok::Eof => return false,
                _ => {}
            }
            ahead += 1;
        }
    }

    fn if_statement(&mut self) -> Result<Stmt, CompileError> {
        let line = self.line();
        let negate = self.eat_ident("unless");
        if !negate {
            self.expect(&Tok::Ident("if".into()), "if")?;
        }
        let mut cond = self.paren_expr()?;
        if negate {
            cond = Expr::Unop {
                op: UnOp::Not,
                operand: Box::new(cond),
            };
        }
        let mut arms = vec![(cond, self.block()?)];
        let mut otherwise = None;
        loop {
            if self.eat_ident("elsif") {
                let cond = self.paren_expr()?;
                arms.push((cond, self.block()?));
            } else if self.eat_ident("else") {
                otherwise = Some(self.block()?);
                break;
            } else {
                break;
            }
        }
        Ok(Stmt::If {
            arms,
            otherwise,
            line,
        })
    }

    fn my_declaration(&mut self, line: u32) -> Result<Stmt, CompileError> {
        let mut vars = Vec::new();
        if self.eat(&Tok::LParen) {
            loop {
                match self.bump() {
                    Tok::Scalar(name) => vars.push((Sigil::Scalar, name)),
                    Tok::Array(name) => vars.push((Sigil::Array, name)),
                    Tok::Hash(name) => vars.push((Sigil::Hash, name)),
                    other => {
                        return Err(self.error(format!(
                            "Expected variable in my list, found {:?}",
                            other
                        )))
                    }
                }
                if !self.eat(&Tok::Comma) {
                    break;
                }
                if self.at(&Tok::RParen) {
                    break;
                }
            }
            self.expect(&Tok::RParen, "')'")?;
        } else {
            match self.bump() {
                Tok::Scalar(name) => vars.push((Sigil::Scalar, name)),
                Tok::Array(name) => vars.push((Sigil::Array, name)),
                Tok::Hash(name) => vars.push((Sigil::Hash, name)),
                other => {
                    return Err(self
                        .error(format!("Expected variable after my, found {:?}", other)))
                }
            }
        }
        let init = if self.eat(&Tok::Assign) {
            Some(self.expr_list()?)
        } else {
            None
        };
        Ok(Stmt::My { vars, init, line })
    }

    fn local_declaration(&mut self, line: u32) -> Result<Stmt, CompileError> {
        let mut targets = Vec::new();
        if self.eat(&Tok::LParen) {
            loop {
                targets.push(self.unary()?);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            self.expect(&Tok::RParen, "')'")?;
        } else {
            targets.push(self.unary()?);
        }
        let init = if self.eat(&Tok::Assign) {
            Some(self.expr_list()?)
        } else {
            None
        };
        Ok(Stmt::Local {
            targets,
            init,
            line,
        })
    }

    fn use_statement(&mut self, line: u32) -> Result<Stmt, CompileError> {
        if self.eat_ident("overload") {
            let mut pairs = Vec::new();
            if !self.at(&Tok::Semi) {
                pairs.push(self.expr_list()?);
            }
            self.eat(&Tok::Semi);
            return Ok(Stmt::UseOverload { pairs, line });
        }
        // `use strict`, `use warnings`, version numbers, …: accepted, inert
        while !self.at(&Tok::Semi) && !self.at(&Tok::Eof) {
            self.bump();
        }
        self.eat(&Tok::Semi);
        Ok(Stmt::UseIgnored { line })
    }

    fn block(&mut self) -> Result<Block, CompileError> {
        self.expect(&Tok::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.at(&Tok::RBrace) && !self.at(&Tok::Eof) {
            stmts.push(self.statement()?);
        }
        self.expect(&Tok::RBrace, "'}'")?;
        Ok(stmts)
    }

    fn paren_expr(&mut self) -> Result<Expr, CompileError> {
        self.expect(&Tok::LParen, "'('")?;
        let expr = self.expr_list()?;
        self.expect(&Tok::RParen, "')'")?;
        Ok(expr)
    }

    // ---- expressions -----------------------------------------------------

    /// Comma-level expression (`a, b => c`). A single element collapses to
    /// itself; otherwise an `Expr::List`.
    fn expr_list(&mut self) -> Result<Expr, CompileError> {
        let mut items = vec![self.expr()?];
        while self.at(&Tok::Comma) || self.at(&Tok::FatArrow) {
            self.bump();
            if self.list_end() {
                break;
            }
            items.push(self.expr()?);
        }
        if items.len() == 1 {
            Ok(items.pop().unwrap_or(Expr::Undef))
        } else {
            Ok(Expr::List(items))
        }
    }

    fn list_end(&self) -> bool {
        matches!(
            self.peek(),
            Tok::RParen | Tok::RBracket | Tok::RBrace | Tok::Semi | Tok::Eof
        ) || matches!(self.peek(), Tok::Ident(w) if matches!(w.as_str(), "if" | "unless" | "while" | "until" | "for" | "foreach"))
    }

    /// Full expression below the comma level, starting from the low-
    /// precedence word operators.
    pub fn expr(&mut self) -> Result<Expr, CompileError> {
        self.or_word()
    }

    fn or_word(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.and_word()?;
        loop {
            if self.eat_ident("or") {
                let rhs = self.and_word()?;
                lhs = Expr::Logical {
                    op: LogicOp::Or,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                };
            } else if self.eat_ident("xor") {
                let rhs = self.and_word()?;
                // no short circuit for xor; lower as != on truth
                lhs = Expr::Binop {
                    op: BinOp::NumNe,
                    lhs: Box::new(Expr::Unop {
                        op: UnOp::Not,
                        operand: Box::new(Expr::Unop {
                            op: UnOp::Not,
                            operand: Box::new(lhs),
                        }),
                    }),
                    rhs: Box::new(Expr::Unop {
                        op: UnOp::Not,
                        operand: Box::new(Expr::Unop {
                            op: UnOp::Not,
                            operand: Box::new(rhs),
                        }),
                    }),
                };
            } else {
                return Ok(lhs);
            }
        }
    }

    fn and_word(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.not_word()?;
        while self.eat_ident("and") {
            let rhs = self.not_word()?;
            lhs = Expr::Logical {
                op: LogicOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn not_word(&mut self) -> Result<Expr, CompileError> {
        if self.eat_ident("not") {
            let operand = self.not_word()?;
            return Ok(Expr::Unop {
                op: UnOp::Not,
                operand: Box::new(operand),
            });
        }
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, CompileError> {
        let lhs = self.ternary()?;
        let op = match self.peek() {
            Tok::Assign => {
                self.bump();
                let value = self.assignment()?;
                return Ok(Expr::Assign {
                    target: Box::new(lhs),
                    value: Box::new(value),
                });
            }
            Tok::PlusAssign => Some(BinOp::Add),
            Tok::MinusAssign => Some(BinOp::Sub),
            Tok::MulAssign => Some(BinOp::Mul),
            Tok::DivAssign => Some(BinOp::Div),
            Tok::ModAssign => Some(BinOp::Mod),
            Tok::PowAssign => Some(BinOp::Pow),
            Tok::DotAssign => Some(BinOp::Concat),
            Tok::RepeatAssign => Some(BinOp::Repeat),
            Tok::ShlAssign => Some(BinOp::Shl),
            Tok::ShrAssign => Some(BinOp::Shr),
            Tok::AndAssign => Some(BinOp::BitAnd),
            Tok::OrAssign => Some(BinOp::BitOr),
            Tok::XorAssign => Some(BinOp::BitXor),
            Tok::AndAndAssign => {
                self.bump();
                let value = self.assignment()?;
                return Ok(Expr::LogicalAssign {
                    op: LogicOp::And,
                    target: Box::new(lhs),
                    value: Box::new(value),
                });
            }
            Tok::OrOrAssign => {
                self.bump();
                let value = self.assignment()?;
                return Ok(Expr::LogicalAssign {
                    op: LogicOp::Or,
                    target: Box::new(lhs),
                    value: Box::new(value),
                });
            }
            Tok::DefOrAssign => {
                self.bump();
                let value = self.assignment()?;
                return Ok(Expr::LogicalAssign {
                    op: LogicOp::Dor,
                    target: Box::new(lhs),
                    value: Box::new(value),
                });
            }
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let value = self.assignment()?;
            return Ok(Expr::OpAssign {
                op,
                target: Box::new(lhs),
                value: Box::new(value),
            });
        }
        Ok(lhs)
    }

    fn ternary(&mut self) -> Result<Expr, CompileError> {
        let cond = self.range()?;
        if self.eat(&Tok::Question) {
            let then = self.assignment()?;
            self.expect(&Tok::Colon, "':'")?;
            let otherwise = self.assignment()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(cond)
    }

    fn range(&mut self) -> Result<Expr, CompileError> {
        let from = self.or_expr()?;
        if self.eat(&Tok::DotDot) {
            let to = self.or_expr()?;
            return Ok(Expr::Range {
                from: Box::new(from),
                to: Box::new(to),
            });
        }
        Ok(from)
    }

    fn or_expr(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.and_expr()?;
        loop {
            let op = match self.peek() {
                Tok::OrOr => LogicOp::Or,
                Tok::DefOr => LogicOp::Dor,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.and_expr()?;
            lhs = Expr::Logical {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn and_expr(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.bit_or()?;
        while self.eat(&Tok::AndAnd) {
            let rhs = self.bit_or()?;
            lhs = Expr::Logical {
                op: LogicOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn bit_or(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.bit_and()?;
        loop {
            let op = match self.peek() {
                Tok::Pipe => BinOp::BitOr,
                Tok::Caret => BinOp::BitXor,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.bit_and()?;
            lhs = Expr::Binop {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn bit_and(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.equality()?;
        while self.at(&Tok::Amp) {
            self.bump();
            let rhs = self.equality()?;
            lhs = Expr::Binop {
                op: BinOp::BitAnd,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.relational()?;
        loop {
            let op = match self.peek() {
                Tok::NumEq => Some(BinOp::NumEq),
                Tok::NumNe => Some(BinOp::NumNe),
                Tok::NumCmp => Some(BinOp::NumCmp),
                Tok::Ident(w) if w == "eq" => Some(BinOp::StrEq),
                Tok::Ident(w) if w == "ne" => Some(BinOp::StrNe),
                Tok::Ident(w) if w == "cmp" => Some(BinOp::StrCmp),
                _ => None,
            };
            match op {
                Some(op) => {
                    self.bump();
                    let rhs = self.relational()?;
                    lhs = Expr::Binop {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    };
                }
                None => return Ok(lhs),
            }
        }
    }

    fn relational(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.shift_expr()?;
        loop {
            let op = match self.peek() {
                Tok::Lt => Some(BinOp::NumLt),
                Tok::Gt => Some(BinOp::NumGt),
                Tok::Le => Some(BinOp::NumLe),
                Tok::Ge => Some(BinOp::NumGe),
                Tok::Ident(w) if w == "lt" => Some(BinOp::StrLt),
                Tok::Ident(w) if w == "gt" => Some(BinOp::StrGt),
                Tok::Ident(w) if w == "le" => Some(BinOp::StrLe),
                Tok::Ident(w) if w == "ge" => Some(BinOp::StrGe),
                _ => None,
            };
            match op {
                Some(op) => {
                    self.bump();
                    let rhs = self.shift_expr()?;
                    lhs = Expr::Binop {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    };
                }
                None => return Ok(lhs),
            }
        }
    }

    fn shift_expr(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Tok::Shl => BinOp::Shl,
                Tok::Shr => BinOp::Shr,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.additive()?;
            lhs = Expr::Binop {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn additive(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                Tok::Dot => BinOp::Concat,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.multiplicative()?;
            lhs = Expr::Binop {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.bind_match()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::Percent => BinOp::Mod,
                Tok::Ident(w) if w == "x" => BinOp::Repeat,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.bind_match()?;
            lhs = Expr::Binop {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn bind_match(&mut self) -> Result<Expr, CompileError> {
        let lhs = self.unary()?;
        let negated = match self.peek() {
            Tok::BindMatch => false,
            Tok::BindNoMatch => true,
            _ => return Ok(lhs),
        };
        self.bump();
        match self.bump() {
            Tok::MatchLit { pattern, flags } => Ok(Expr::Match {
                target: Some(Box::new(lhs)),
                pattern,
                flags,
                negated,
            }),
            Tok::SubstLit {
                pattern,
                replacement,
                flags,
            } => Ok(Expr::Subst {
                target: Some(Box::new(lhs)),
                pattern,
                replacement,
                flags,
            }),
            other => Err(self.error(format!(
                "Expected pattern after =~, found {:?}",
                other
            ))),
        }
    }

    fn unary(&mut self) -> Result<Expr, CompileError> {
        match self.peek().clone() {
            Tok::Bang => {
                self.bump();
                let operand = self.unary()?;
                Ok(Expr::Unop {
                    op: UnOp::Not,
                    operand: Box::new(operand),
                })
            }
            Tok::Tilde => {
                self.bump();
                let operand = self.unary()?;
                Ok(Expr::Unop {
                    op: UnOp::BitNot,
                    operand: Box::new(operand),
                })
            }
            Tok::Minus => {
                self.bump();
                let operand = self.unary()?;
                Ok(Expr::Unop {
                    op: UnOp::Neg,
                    operand: Box::new(operand),
                })
            }
            Tok::Plus => {
                self.bump();
                let operand = self.unary()?;
                Ok(Expr::Unop {
                    op: UnOp::Plus,
                    operand: Box::new(operand),
                })
            }
            Tok::Backslash => {
                self.bump();
                let operand = self.unary()?;
                Ok(Expr::MakeRef(Box::new(operand)))
            }
            Tok::PlusPlus => {
                self.bump();
                let operand = self.unary()?;
                Ok(Expr::Unop {
                    op: UnOp::PreInc,
                    operand: Box::new(operand),
                })
            }
            Tok::MinusMinus => {
                self.bump();
                let operand = self.unary()?;
                Ok(Expr::Unop {
                    op: UnOp::PreDec,
                    operand: Box::new(operand),
                })
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, CompileError> {
        let base = self.postfix()?;
        if self.eat(&Tok::StarStar) {
            // right associative, binds tighter than unary minus on the rhs
            let exponent = self.unary()?;
            return Ok(Expr::Binop {
                op: BinOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek().clone() {
                Tok::Arrow => {
                    self.bump();
                    match self.peek().clone() {
                        Tok::LBracket => {
                            self.bump();
                            let index = self.expr_list()?;
                            self.expect(&Tok::RBracket, "']'")?;
                            expr = Expr::Elem {
                                container: Box::new(expr),
                                index: Box::new(index),
                                kind: ElemKind::Array,
                                via_ref: true,
                            };
                        }
                        Tok::LBrace => {
                            self.bump();
                            let index = self.hash_key()?;
                            self.expect(&Tok::RBrace, "'}'")?;
                            expr = Expr::Elem {
                                container: Box::new(expr),
                                index: Box::new(index),
                                kind: ElemKind::Hash,
                                via_ref: true,
                            };
                        }
                        Tok::LParen => {
                            self.bump();
                            let args = self.call_args()?;
                            expr = Expr::CallRef {
                                callee: Box::new(expr),
                                args,
                            };
                        }
                        Tok::Ident(method) => {
                            self.bump();
                            let args = if self.eat(&Tok::LParen) {
                                self.call_args()?
                            } else {
                                Vec::new()
                            };
                            expr = Expr::MethodCall {
                                invocant: Box::new(expr),
                                method,
                                args,
                            };
                        }
                        Tok::Scalar(name) => {
                            // dynamic method name: $obj->$meth(...)
                            self.bump();
                            let args = if self.eat(&Tok::LParen) {
                                self.call_args()?
                            } else {
                                Vec::new()
                            };
                            expr = Expr::MethodCall {
                                invocant: Box::new(expr),
                                method: format!("${}", name),
                                args,
                            };
                        }
                        other => {
                            return Err(self.error(format!(
                                "Expected method or subscript after ->, found {:?}",
                                other
                            )))
                        }
                    }
                }
                // the arrow is optional between stacked subscripts
                Tok::LBracket if matches!(expr, Expr::Elem { .. }) => {
                    self.bump();
                    let index = self.expr_list()?;
                    self.expect(&Tok::RBracket, "']'")?;
                    expr = Expr::Elem {
                        container: Box::new(expr),
                        index: Box::new(index),
                        kind: ElemKind::Array,
                        via_ref: true,
                    };
                }
                Tok::LBrace if matches!(expr, Expr::Elem { .. }) => {
                    self.bump();
                    let index = self.hash_key()?;
                    self.expect(&Tok::RBrace, "'}'")?;
                    expr = Expr::Elem {
                        container: Box::new(expr),
                        index: Box::new(index),
                        kind: ElemKind::Hash,
                        via_ref: true,
                    };
                }
                Tok::PlusPlus => {
                    self.bump();
                    expr = Expr::Unop {
                        op: UnOp::PostInc,
                        operand: Box::new(expr),
                    };
                }
                Tok::MinusMinus => {
                    self.bump();
                    expr = Expr::Unop {
                        op: UnOp::PostDec,
                        operand: Box::new(expr),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, CompileError> {
        let mut args = Vec::new();
        if self.eat(&Tok::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if !self.eat(&Tok::Comma) && !self.eat(&Tok::FatArrow) {
                break;
            }
            if self.at(&Tok::RParen) {
                break;
            }
        }
        self.expect(&Tok::RParen, "')'")?;
        Ok(args)
    }

    /// A hash subscript: barewords quote themselves.
    fn hash_key(&mut self) -> Result<Expr, CompileError> {
        if let Tok::Ident(word) = self.peek().clone() {
            if self.peek_at(1) == &Tok::RBrace {
                self.bump();
                return Ok(Expr::StrLit(PStr::from_text(&word)));
            }
        }
        self.expr_list()
    }

    fn primary(&mut self) -> Result<Expr, CompileError> {
        match self.bump() {
            Tok::Num(NumTok::Int(v)) => Ok(Expr::IntLit(v)),
            Tok::Num(NumTok::Big(v)) => Ok(Expr::BigLit(v)),
            Tok::Num(NumTok::Float(v)) => Ok(Expr::FloatLit(v)),
            Tok::Str { raw, interpolate } => {
                if interpolate {
                    interpolate_string(&raw, self.line())
                } else {
                    Ok(Expr::StrLit(unescape_single(&raw)))
                }
            }
            Tok::Qw(words) => Ok(Expr::List(
                words
                    .into_iter()
                    .map(|w| Expr::StrLit(PStr::from_text(&w)))
                    .collect(),
            )),
            Tok::MatchLit { pattern, flags } => Ok(Expr::Match {
                target: None,
                pattern,
                flags,
                negated: false,
            }),
            Tok::SubstLit {
                pattern,
                replacement,
                flags,
            } => Ok(Expr::Subst {
                target: None,
                pattern,
                replacement,
                flags,
            }),
            Tok::Special(var) => Ok(Expr::SpecialVar(var)),
            Tok::Scalar(name) => self.scalar_postfix(Expr::ScalarVar(name)),
            Tok::Array(name) => Ok(Expr::ArrayVar(name)),
            Tok::Hash(name) => Ok(Expr::HashVar(name)),
            Tok::Glob(name) => Ok(Expr::GlobVar(name)),
            Tok::ArrayLen(name) => {
                Ok(Expr::ArrayLastIdx(Box::new(Expr::ArrayVar(name))))
            }
            Tok::ArrayLenSigil => {
                let inner = self.sigil_operand()?;
                Ok(Expr::ArrayLastIdx(Box::new(Expr::Deref {
                    kind: DerefKind::Array,
                    expr: Box::new(inner),
                })))
            }
            Tok::AmpName(name) => {
                if self.eat(&Tok::LParen) {
                    let args = self.call_args()?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::NamedCode(name))
                }
            }
            Tok::DollarSigil => {
                let inner = self.sigil_operand()?;
                let deref = Expr::Deref {
                    kind: DerefKind::Scalar,
                    expr: Box::new(inner),
                };
                self.scalar_postfix(deref)
            }
            Tok::AtSigil => {
                let inner = self.sigil_operand()?;
                Ok(Expr::Deref {
                    kind: DerefKind::Array,
                    expr: Box::new(inner),
                })
            }
            Tok::PercentSigil => {
                let inner = self.sigil_operand()?;
                Ok(Expr::Deref {
                    kind: DerefKind::Hash,
                    expr: Box::new(inner),
                })
            }
            Tok::AmpSigil => {
                let inner = self.sigil_operand()?;
                let callee = Expr::Deref {
                    kind: DerefKind::Code,
                    expr: Box::new(inner),
                };
                if self.eat(&Tok::LParen) {
                    let args = self.call_args()?;
                    Ok(Expr::CallRef {
                        callee: Box::new(callee),
                        args,
                    })
                } else {
                    Ok(callee)
                }
            }
            Tok::LParen => {
                if self.eat(&Tok::RParen) {
                    return Ok(Expr::List(vec![]));
                }
                let inner = self.expr_list()?;
                self.expect(&Tok::RParen, "')'")?;
                match inner {
                    Expr::List(items) => Ok(Expr::List(items)),
                    single => Ok(Expr::List(vec![single])),
                }
            }
            Tok::LBracket => {
                let mut items = Vec::new();
                if !self.eat(&Tok::RBracket) {
                    loop {
                        items.push(self.expr()?);
                        if !self.eat(&Tok::Comma) && !self.eat(&Tok::FatArrow) {
                            break;
                        }
                        if self.at(&Tok::RBracket) {
                            break;
                        }
                    }
                    self.expect(&Tok::RBracket, "']'")?;
                }
                Ok(Expr::AnonArray(items))
            }
            Tok::LBrace => {
                let mut items = Vec::new();
                if !self.eat(&Tok::RBrace) {
                    loop {
                        if let Tok::Ident(word) = self.peek().clone() {
                            if self.peek_at(1) == &Tok::FatArrow {
                                self.bump();
                                items.push(Expr::StrLit(PStr::from_text(&word)));
                                self.bump();
                                continue;
                            }
                        }
                        items.push(self.expr()?);
                        if !self.eat(&Tok::Comma) && !self.eat(&Tok::FatArrow) {
                            break;
                        }
                        if self.at(&Tok::RBrace) {
                            break;
                        }
                    }
                    self.expect(&Tok::RBrace, "'}'")?;
                }
                Ok(Expr::AnonHash(items))
            }
            Tok::Ident(word) => self.word_expr(word),
            other => Err(self.error(format!("Unexpected token {:?}", other))),
        }
    }

    /// After `$name` or `${expr}`/`$$ref`: element access `[i]` / `{k}`.
    /// `$name[i]` binds to the named array; `$$r[i]` and `${$r}[i]` are
    /// element accesses through the reference `$r`.
    fn scalar_postfix(&mut self, scalar: Expr) -> Result<Expr, CompileError> {
        match self.peek() {
            Tok::LBracket => {
                self.bump();
                let index = self.expr_list()?;
                self.expect(&Tok::RBracket, "']'")?;
                let (container, via_ref) = match scalar {
                    Expr::ScalarVar(name) => (Expr::ArrayVar(name), false),
                    Expr::Deref {
                        kind: DerefKind::Scalar,
                        expr,
                    } => (*expr, true),
                    other => (other, true),
                };
                Ok(Expr::Elem {
                    container: Box::new(container),
                    index: Box::new(index),
                    kind: ElemKind::Array,
                    via_ref,
                })
            }
            Tok::LBrace => {
                self.bump();
                let index = self.hash_key()?;
                self.expect(&Tok::RBrace, "'}'")?;
                let (container, via_ref) = match scalar {
                    Expr::ScalarVar(name) => (Expr::HashVar(name), false),
                    Expr::Deref {
                        kind: DerefKind::Scalar,
                        expr,
                    } => (*expr, true),
                    other => (other, true),
                };
                Ok(Expr::Elem {
                    container: Box::new(container),
                    index: Box::new(index),
                    kind: ElemKind::Hash,
                    via_ref,
                })
            }
            _ => Ok(scalar),
        }
    }

    /// The operand of a bare sigil: `$name` or `{ expr }`.
    fn sigil_operand(&mut self) -> Result<Expr, CompileError> {
        if self.eat(&Tok::LBrace) {
            let inner = self.expr_list()?;
            self.expect(&Tok::RBrace, "'}'")?;
            Ok(inner)
        } else {
            match self.bump() {
                Tok::Scalar(name) => Ok(Expr::ScalarVar(name)),
                Tok::DollarSigil => {
                    let inner = self.sigil_operand()?;
                    Ok(Expr::Deref {
                        kind: DerefKind::Scalar,
                        expr: Box::new(inner),
                    })
                }
                other => Err(self.error(format!(
                    "Expected variable after sigil, found {:?}",
                    other
                ))),
            }
        }
    }

    fn word_expr(&mut self, word: String) -> Result<Expr, CompileError> {
        match word.as_str() {
            "undef" => return Ok(Expr::Undef),
            "wantarray" => return Ok(Expr::Wantarray),
            "eval" => {
                if self.at(&Tok::LBrace) {
                    let body = self.block()?;
                    return Ok(Expr::EvalBlock(body));
                }
                let arg = if self.at(&Tok::LParen) {
                    self.paren_expr()?
                } else {
                    self.unary()?
                };
                return Ok(Expr::EvalString(Box::new(arg)));
            }
            "do" => {
                if self.at(&Tok::LBrace) {
                    let body = self.block()?;
                    return Ok(Expr::DoBlock(body));
                }
                return Err(self.error("do FILE is not supported here"));
            }
            "sub" => {
                let body = self.block()?;
                return Ok(Expr::AnonSub(body));
            }
            "my" => {
                // `my` in expression position (C-for init handled upstream)
                return Err(self.error("my is only allowed at statement level"));
            }
            _ => {}
        }

        // class name directly before ->: leave for postfix method call
        if self.at(&Tok::Arrow) {
            return Ok(Expr::StrLit(PStr::from_text(&word)));
        }

        // bareword followed by fat arrow: auto-quoted by expr_list caller
        if self.at(&Tok::FatArrow) {
            return Ok(Expr::StrLit(PStr::from_text(&word)));
        }

        if self.eat(&Tok::LParen) {
            let args = self.call_args()?;
            return Ok(Expr::Call { name: word, args });
        }

        if is_named_unary(&word) {
            let arg = if self.starts_expression() {
                vec![self.unary()?]
            } else {
                Vec::new()
            };
            return Ok(Expr::Call {
                name: word,
                args: arg,
            });
        }

        if is_list_operator(&word) {
            let mut args = Vec::new();
            if self.starts_expression() {
                // `sort { ... } list` / `grep { ... } list`
                if matches!(word.as_str(), "sort" | "grep" | "map")
                    && self.at(&Tok::LBrace)
                {
                    let body = self.block()?;
                    args.push(Expr::AnonSub(body));
                }
                loop {
                    if !self.starts_expression() {
                        break;
                    }
                    args.push(self.expr()?);
                    if !self.eat(&Tok::Comma) && !self.eat(&Tok::FatArrow) {
                        break;
                    }
                }
            }
            return Ok(Expr::Call { name: word, args });
        }

        // plain user sub call without parens and without args
        Ok(Expr::Call {
            name: word,
            args: Vec::new(),
        })
    }

    /// Whether the current token can begin an expression.
    fn starts_expression(&self) -> bool {
        !matches!(
            self.peek(),
            Tok::Semi
                | Tok::RParen
                | Tok::RBracket
                | Tok::RBrace
                | Tok::Comma
                | Tok::FatArrow
                | Tok::Colon
                | Tok::Question
                | Tok::Eof
        ) && !matches!(self.peek(), Tok::Ident(w) if matches!(w.as_str(), "if" | "unless" | "while" | "until" | "for" | "foreach" | "or" | "and" | "xor" | "eq" | "ne" | "lt" | "le" | "gt" | "ge" | "cmp" | "x"))
    }
}

/// Single-quoted semantics: only `\\` and `\'` escape.
fn unescape_single(raw: &str) -> PStr {
    let mut out = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('\\') => out.push('\\'),
                Some('\'') => out.push('\''),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    PStr::from_text(&out)
}

/// Double-quoted string: escape processing plus `$name` / `${name}` /
/// `$name[idx]` / `$name{key}` interpolation.
fn interpolate_string(raw: &str, line: u32) -> Result<Expr, CompileError> {
    let chars: Vec<char> = raw.chars().collect();
    let mut parts: Vec<InterpPart> = Vec::new();
    let mut lit = String::new();
    let mut i = 0;

    let flush = |lit: &mut String, parts: &mut Vec<InterpPart>| {
        if !lit.is_empty() {
            parts.push(InterpPart::Lit(PStr::from_text(lit)));
            lit.clear();
        }
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                i += 1;
                let e = chars.get(i).copied().unwrap_or('\\');
                i += 1;
                match e {
                    'n' => lit.push('\n'),
                    't' => lit.push('\t'),
                    'r' => lit.push('\r'),
                    'f' => lit.push('\u{c}'),
                    'b' => lit.push('\u{8}'),
                    'a' => lit.push('\u{7}'),
                    'e' => lit.push('\u{1b}'),
                    '0' => lit.push('\0'),
                    'x' => {
                        let mut hex = String::new();
                        if chars.get(i) == Some(&'{') {
                            i += 1;
                            while i < chars.len() && chars[i] != '}' {
                                hex.push(chars[i]);
                                i += 1;
                            }
                            i += 1;
                        } else {
                            while hex.len() < 2
                                && matches!(chars.get(i), Some(c) if c.is_ascii_hexdigit())
                            {
                                hex.push(chars[i]);
                                i += 1;
                            }
                        }
                        let code = u32::from_str_radix(&hex, 16).unwrap_or(0);
                        lit.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                    }
                    other => lit.push(other),
                }
            }
            '$' if i + 1 < chars.len() => {
                i += 1;
                let mut name = String::new();
                if chars[i] == '{' {
                    i += 1;
                    while i < chars.len() && chars[i] != '}' {
                        name.push(chars[i]);
                        i += 1;
                    }
                    i += 1;
                } else if chars[i].is_alphabetic() || chars[i] == '_' {
                    while i < chars.len()
                        && (chars[i].is_alphanumeric()
                            || chars[i] == '_'
                            || (chars[i] == ':'
                                && chars.get(i + 1) == Some(&':')))
                    {
                        if chars[i] == ':' {
                            name.push_str("::");
                            i += 2;
                        } else {
                            name.push(chars[i]);
                            i += 1;
                        }
                    }
                } else if chars[i].is_ascii_digit() {
                    let mut digits = String::new();
                    while matches!(chars.get(i), Some(c) if c.is_ascii_digit()) {
                        digits.push(chars[i]);
                        i += 1;
                    }
                    flush(&mut lit, &mut parts);
                    let n: usize = digits
                        .parse()
                        .map_err(|_| CompileError::new("Capture number too large", line))?;
                    parts.push(InterpPart::Var(Expr::SpecialVar(
                        crate::values::scalar::SpecialVar::Capture(n),
                    )));
                    continue;
                } else {
                    lit.push('$');
                    continue;
                }

                flush(&mut lit, &mut parts);
                // subscript after the name?
                let base = Expr::ScalarVar(name.clone());
                if chars.get(i) == Some(&'[') {
                    let mut depth = 1;
                    let mut inner = String::new();
                    i += 1;
                    while i < chars.len() && depth > 0 {
                        match chars[i] {
                            '[' => depth += 1,
                            ']' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        inner.push(chars[i]);
                        i += 1;
                    }
                    i += 1;
                    let idx = parse_fragment(&inner, line)?;
                    parts.push(InterpPart::Var(Expr::Elem {
                        container: Box::new(Expr::ArrayVar(name)),
                        index: Box::new(idx),
                        kind: ElemKind::Array,
                        via_ref: false,
                    }));
                } else if chars.get(i) == Some(&'{') {
                    let mut depth = 1;
                    let mut inner = String::new();
                    i += 1;
                    while i < chars.len() && depth > 0 {
                        match chars[i] {
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        inner.push(chars[i]);
                        i += 1;
                    }
                    i += 1;
                    let key = if inner.chars().all(|c| c.is_alphanumeric() || c == '_') {
                        Expr::StrLit(PStr::from_text(&inner))
                    } else {
                        parse_fragment(&inner, line)?
                    };
                    parts.push(InterpPart::Var(Expr::Elem {
                        container: Box::new(Expr::HashVar(name)),
                        index: Box::new(key),
                        kind: ElemKind::Hash,
                        via_ref: false,
                    }));
                } else {
                    parts.push(InterpPart::Var(base));
                }
            }
            '@' if i + 1 < chars.len()
                && (chars[i + 1].is_alphabetic() || chars[i + 1] == '_') =>
            {
                i += 1;
                let mut name = String::new();
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    name.push(chars[i]);
                    i += 1;
                }
                flush(&mut lit, &mut parts);
                // arrays interpolate joined on single spaces
                parts.push(InterpPart::Var(Expr::Call {
                    name: "join".into(),
                    args: vec![
                        Expr::StrLit(PStr::from_text(" ")),
                        Expr::ArrayVar(name),
                    ],
                }));
            }
            other => {
                lit.push(other);
                i += 1;
            }
        }
    }
    flush(&mut lit, &mut parts);

    match parts.len() {
        0 => Ok(Expr::StrLit(PStr::empty())),
        1 => match parts.into_iter().next() {
            Some(InterpPart::Lit(text)) => Ok(Expr::StrLit(text)),
            Some(var) => Ok(Expr::InterpStr(vec![var])),
            None => Ok(Expr::StrLit(PStr::empty())),
        },
        _ => Ok(Expr::InterpStr(parts)),
    }
}

/// Parses an interpolation fragment (a subscript expression).
fn parse_fragment(source: &str, line: u32) -> Result<Expr, CompileError> {
    let toks = Lexer::tokenize(source)
        .map_err(|e| CompileError::new(e.message, line))?;
    let mut parser = Parser {
        toks,
        pos: 0,
        file: String::new(),
    };
    parser.expr().map_err(|e| CompileError::new(e.message, line))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        parse_program(src, "test.pl").unwrap()
    }

    #[test]
    fn simple_statements() {
        let p = parse("my $x = 1; $x = $x + 2;");
        assert_eq!(p.stmts.len(), 2);
        assert!(matches!(&p.stmts[0], Stmt::My { vars, .. } if vars.len() == 1));
    }

    #[test]
    fn if_elsif_else() {
        let p = parse("if ($x) { 1; } elsif ($y) { 2; } else { 3; }");
        match &p.stmts[0] {
            Stmt::If { arms, otherwise, .. } => {
                assert_eq!(arms.len(), 2);
                assert!(otherwise.is_some());
            }
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn labelled_loop_and_last() {
        let p = parse("OUTER: while (1) { last OUTER; }");
        match &p.stmts[0] {
            Stmt::While { label, body, .. } => {
                assert_eq!(label.as_deref(), Some("OUTER"));
                assert!(matches!(
                    &body[0],
                    Stmt::Last { label: Some(l), .. } if l == "OUTER"
                ));
            }
            other => panic!("expected while, got {other:?}"),
        }
    }

    #[test]
    fn foreach_forms() {
        let p = parse("foreach my $i (1..10) { $s += $i; }");
        assert!(matches!(
            &p.stmts[0],
            Stmt::Foreach { var: ForeachVar::My(v), .. } if v == "i"
        ));
        let p = parse("for (my $i = 0; $i < 3; $i++) { }");
        assert!(matches!(&p.stmts[0], Stmt::ForC { .. }));
    }

    #[test]
    fn match_binding() {
        let p = parse("$s =~ /a(b)c/;");
        match &p.stmts[0] {
            Stmt::Expr {
                expr: Expr::Match { pattern, .. },
                ..
            } => assert_eq!(pattern, "a(b)c"),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn precedence() {
        let p = parse("$x = 1 + 2 * 3;");
        match &p.stmts[0] {
            Stmt::Expr {
                expr: Expr::Assign { value, .. },
                ..
            } => match value.as_ref() {
                Expr::Binop { op: BinOp::Add, rhs, .. } => {
                    assert!(matches!(rhs.as_ref(), Expr::Binop { op: BinOp::Mul, .. }))
                }
                other => panic!("expected add at top, got {other:?}"),
            },
            other => panic!("expected assign, got {other:?}"),
        }
    }

    #[test]
    fn element_access_forms() {
        let p = parse("$a[0] = $h{key} + $r->[1] + $r->{k};");
        assert!(matches!(&p.stmts[0], Stmt::Expr { .. }));
    }

    #[test]
    fn anon_structures() {
        let p = parse("my $r = { a => 1, b => [2, 3] };");
        match &p.stmts[0] {
            Stmt::My { init: Some(Expr::AnonHash(items)), .. } => {
                assert_eq!(items.len(), 4);
            }
            other => panic!("expected anon hash init, got {other:?}"),
        }
    }

    #[test]
    fn interpolation() {
        let p = parse(r#"my $s = "x is $x!";"#);
        match &p.stmts[0] {
            Stmt::My { init: Some(Expr::InterpStr(parts)), .. } => {
                assert_eq!(parts.len(), 3);
            }
            other => panic!("expected interpolated init, got {other:?}"),
        }
    }

    #[test]
    fn eval_forms() {
        let p = parse("eval { die 'x'; }; eval '1 + 1';");
        assert!(matches!(
            &p.stmts[0],
            Stmt::Expr { expr: Expr::EvalBlock(_), .. }
        ));
        assert!(matches!(
            &p.stmts[1],
            Stmt::Expr { expr: Expr::EvalString(_), .. }
        ));
    }

    #[test]
    fn statement_modifiers() {
        let p = parse("$x = 1 if $y; $x = 2 unless $z;");
        assert!(matches!(&p.stmts[0], Stmt::If { .. }));
        assert!(matches!(&p.stmts[1], Stmt::If { .. }));
    }

    #[test]
    fn method_calls() {
        let p = parse("my $obj = Dog->new(name => 'Rex'); $obj->speak;");
        match &p.stmts[0] {
            Stmt::My { init: Some(Expr::MethodCall { method, args, .. }), .. } => {
                assert_eq!(method, "new");
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected method call, got {other:?}"),
        }
    }

    #[test]
    fn deref_forms() {
        parse("$$r = 1; @$a = (1); %$h = (); &$c(); ${$x} = 2;");
    }

    #[test]
    fn bare_block_is_a_loop() {
        let p = parse("L: { f(); }");
        assert!(matches!(
            &p.stmts[0],
            Stmt::BareBlock { label: Some(l), .. } if l == "L"
        ));
    }
}

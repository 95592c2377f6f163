use num_bigint::BigInt;
use std::str::FromStr;

use crate::global::error::CompileError;
use crate::values::scalar::SpecialVar;

/// Numeric literal as scanned; the compiler decides the scalar variant.
#[derive(Debug, Clone, PartialEq)]
pub enum NumTok {
    Int(i64),
    Big(BigInt),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Ident(String),
    /// `$name`, `$Pkg::name`, `$_`
    Scalar(String),
    /// `$1`, `$&`, `` $` ``, `$'`
    Special(SpecialVar),
    /// `@name`, `@_`
    Array(String),
    /// `%name`
    Hash(String),
    /// `&name`
    AmpName(String),
    /// `*name`
    Glob(String),
    /// `$#name`
    ArrayLen(String),
    /// bare `$` before `{` or another `$` (deref chain)
    DollarSigil,
    /// bare `@` before `{` or `$`
    AtSigil,
    /// bare `%` before `{` or `$` in operand position
    PercentSigil,
    /// bare `&` before `{` or `$` in operand position
    AmpSigil,
    /// `$#{` / `$#$`
    ArrayLenSigil,
    Num(NumTok),
    Str { raw: String, interpolate: bool },
    Qw(Vec<String>),
    MatchLit { pattern: String, flags: String },
    SubstLit {
        pattern: String,
        replacement: String,
        flags: String,
    },

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Semi,
    Comma,
    FatArrow,
    Arrow,
    Question,
    Colon,
    PackageSep, // bare `::` (only in names; folded by ident scanning)
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    StarStar,
    Dot,
    DotDot,
    Bang,
    Tilde,
    Backslash,
    Lt,
    Gt,
    Le,
    Ge,
    NumEq,
    NumNe,
    NumCmp,
    AndAnd,
    OrOr,
    DefOr,
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,
    BindMatch,
    BindNoMatch,
    PlusPlus,
    MinusMinus,
    PlusAssign,
    MinusAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    PowAssign,
    DotAssign,
    RepeatAssign,
    ShlAssign,
    ShrAssign,
    AndAssign,
    OrAssign,
    XorAssign,
    AndAndAssign,
    OrOrAssign,
    DefOrAssign,
    Eof,
}

#[derive(Debug, Clone)]
pub struct SpannedTok {
    pub tok: Tok,
    pub line: u32,
}

/// Hand-written scanner. Perl cannot be tokenised without feedback: `/`
/// starts a pattern in operand position and divides otherwise, and `%`,
/// `&`, `*` are sigils in operand position. The scanner tracks whether the
/// previous significant token produced a value.
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    /// true when the next `/` must be a pattern, `%`/`&`/`*` a sigil
    expect_operand: bool,
}

impl Lexer {
    pub fn new(source: &str) -> Lexer {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            expect_operand: true,
        }
    }

    pub fn tokenize(source: &str) -> Result<Vec<SpannedTok>, CompileError> {
        let mut lexer = Lexer::new(source);
        let mut toks = Vec::new();
        loop {
            let tok = lexer.next_token()?;
            let done = tok.tok == Tok::Eof;
            toks.push(tok);
            if done {
                return Ok(toks);
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
            }
        }
        c
    }

    fn eat(&mut self, want: char) -> bool {
        if self.peek() == Some(want) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(message, self.line)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn next_token(&mut self) -> Result<SpannedTok, CompileError> {
        self.skip_trivia();
        let line = self.line;
        let tok = self.scan()?;
        self.expect_operand = match &tok {
            Tok::Ident(name) => keyword_expects_operand(name),
            Tok::Scalar(_)
            | Tok::Special(_)
            | Tok::Array(_)
            | Tok::Hash(_)
            | Tok::AmpName(_)
            | Tok::Glob(_)
            | Tok::ArrayLen(_)
            | Tok::Num(_)
            | Tok::Str { .. }
            | Tok::Qw(_)
            | Tok::MatchLit { .. }
            | Tok::SubstLit { .. }
            | Tok::RParen
            | Tok::RBracket
            | Tok::RBrace
            | Tok::PlusPlus
            | Tok::MinusMinus => false,
            Tok::Eof => false,
            _ => true,
        };
        Ok(SpannedTok { tok, line })
    }

    fn scan(&mut self) -> Result<Tok, CompileError> {
        let c = match self.peek() {
            Some(c) => c,
            None => return Ok(Tok::Eof),
        };
        match c {
            '$' => self.dollar(),
            '@' => self.at_sigil(),
            '(' => {
                self.bump();
                Ok(Tok::LParen)
            }
            ')' => {
                self.bump();
                Ok(Tok::RParen)
            }
            '[' => {
                self.bump();
                Ok(Tok::LBracket)
            }
            ']' => {
                self.bump();
                Ok(Tok::RBracket)
            }
            '{' => {
                self.bump();
                Ok(Tok::LBrace)
            }
            '}' => {
                self.bump();
                Ok(Tok::RBrace)
            }
            ';' => {
                self.bump();
                Ok(Tok::Semi)
            }
            ',' => {
                self.bump();
                Ok(Tok::Comma)
            }
            '\\' => {
                self.bump();
                Ok(Tok::Backslash)
            }
            '?' => {
                self.bump();
                Ok(Tok::Question)
            }
            ':' => {
                self.bump();
                if self.eat(':') {
                    Ok(Tok::PackageSep)
                } else {
                    Ok(Tok::Colon)
                }
            }
            '+' => {
                self.bump();
                if self.eat('+') {
                    Ok(Tok::PlusPlus)
                } else if self.eat('=') {
                    Ok(Tok::PlusAssign)
                } else {
                    Ok(Tok::Plus)
                }
            }
            '-' => {
                self.bump();
                if self.eat('-') {
                    Ok(Tok::MinusMinus)
                } else if self.eat('=') {
                    Ok(Tok::MinusAssign)
                } else if self.eat('>') {
                    Ok(Tok::Arrow)
                } else {
                    Ok(Tok::Minus)
                }
            }
            '*' => {
                if self.expect_operand && matches!(self.peek_at(1), Some(c) if c.is_alphabetic() || c == '_') {
                    self.bump();
                    let name = self.ident_text();
                    return Ok(Tok::Glob(name));
                }
                self.bump();
                if self.eat('*') {
                    if self.eat('=') {
                        Ok(Tok::PowAssign)
                    } else {
                        Ok(Tok::StarStar)
                    }
                } else if self.eat('=') {
                    Ok(Tok::MulAssign)
                } else {
                    Ok(Tok::Star)
                }
            }
            '/' => {
                if self.expect_operand {
                    self.bump();
                    let (pattern, flags) = self.delimited_pattern('/')?;
                    Ok(Tok::MatchLit { pattern, flags })
                } else {
                    self.bump();
                    if self.eat('/') {
                        if self.eat('=') {
                            Ok(Tok::DefOrAssign)
                        } else {
                            Ok(Tok::DefOr)
                        }
                    } else if self.eat('=') {
                        Ok(Tok::DivAssign)
                    } else {
                        Ok(Tok::Slash)
                    }
                }
            }
            '%' => {
                if self.expect_operand {
                    match self.peek_at(1) {
                        Some(c2) if c2.is_alphabetic() || c2 == '_' => {
                            self.bump();
                            return Ok(Tok::Hash(self.ident_text()));
                        }
                        Some('{') | Some('$') => {
                            self.bump();
                            return Ok(Tok::PercentSigil);
                        }
                        _ => {}
                    }
                }
                self.bump();
                if self.eat('=') {
                    Ok(Tok::ModAssign)
                } else {
                    Ok(Tok::Percent)
                }
            }
            '&' => {
                if self.expect_operand {
                    match self.peek_at(1) {
                        Some(c2) if c2.is_alphabetic() || c2 == '_' => {
                            self.bump();
                            return Ok(Tok::AmpName(self.ident_text()));
                        }
                        Some('{') | Some('$') => {
                            self.bump();
                            return Ok(Tok::AmpSigil);
                        }
                        _ => {}
                    }
                }
                self.bump();
                if self.eat('&') {
                    if self.eat('=') {
                        Ok(Tok::AndAndAssign)
                    } else {
                        Ok(Tok::AndAnd)
                    }
                } else if self.eat('=') {
                    Ok(Tok::AndAssign)
                } else {
                    Ok(Tok::Amp)
                }
            }
            '|' => {
                self.bump();
                if self.eat('|') {
                    if self.eat('=') {
                        Ok(Tok::OrOrAssign)
                    } else {
                        Ok(Tok::OrOr)
                    }
                } else if self.eat('=') {
                    Ok(Tok::OrAssign)
                } else {
                    Ok(Tok::Pipe)
                }
            }
            '^' => {
                self.bump();
                if self.eat('=') {
                    Ok(Tok::XorAssign)
                } else {
                    Ok(Tok::Caret)
                }
            }
            '~' => {
                self.bump();
                Ok(Tok::Tilde)
            }
            '!' => {
                self.bump();
                if self.eat('~') {
                    Ok(Tok::BindNoMatch)
                } else if self.eat('=') {
                    Ok(Tok::NumNe)
                } else {
                    Ok(Tok::Bang)
                }
            }
            '=' => {
                self.bump();
                if self.eat('=') {
                    Ok(Tok::NumEq)
                } else if self.eat('~') {
                    Ok(Tok::BindMatch)
                } else if self.eat('>') {
                    Ok(Tok::FatArrow)
                } else {
                    Ok(Tok::Assign)
                }
            }
            '<' => {
                self.bump();
                if self.eat('=') {
                    if self.eat('>') {
                        Ok(Tok::NumCmp)
                    } else {
                        Ok(Tok::Le)
                    }
                } else if self.eat('<') {
                    if self.eat('=') {
                        Ok(Tok::ShlAssign)
                    } else {
                        Ok(Tok::Shl)
                    }
                } else {
                    Ok(Tok::Lt)
                }
            }
            '>' => {
                self.bump();
                if self.eat('=') {
                    Ok(Tok::Ge)
                } else if self.eat('>') {
                    if self.eat('=') {
                        Ok(Tok::ShrAssign)
                    } else {
                        Ok(Tok::Shr)
                    }
                } else {
                    Ok(Tok::Gt)
                }
            }
            '.' => {
                if matches!(self.peek_at(1), Some(d) if d.is_ascii_digit()) && self.expect_operand {
                    return self.number();
                }
                self.bump();
                if self.eat('.') {
                    self.eat('.'); // `...` behaves as `..` here
                    Ok(Tok::DotDot)
                } else if self.eat('=') {
                    Ok(Tok::DotAssign)
                } else {
                    Ok(Tok::Dot)
                }
            }
            '\'' => {
                self.bump();
                let raw = self.quoted_body('\'')?;
                Ok(Tok::Str {
                    raw,
                    interpolate: false,
                })
            }
            '"' => {
                self.bump();
                let raw = self.quoted_body('"')?;
                Ok(Tok::Str {
                    raw,
                    interpolate: true,
                })
            }
            c if c.is_ascii_digit() => self.number(),
            c if c.is_alphabetic() || c == '_' => self.word(),
            other => Err(self.error(format!("Unrecognized character '{}'", other))),
        }
    }

    fn ident_text(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.bump();
            } else if c == ':' && self.peek_at(1) == Some(':') {
                name.push_str("::");
                self.bump();
                self.bump();
            } else {
                break;
            }
        }
        name
    }

    fn dollar(&mut self) -> Result<Tok, CompileError> {
        self.bump(); // '$'
        match self.peek() {
            Some('#') => {
                self.bump();
                match self.peek() {
                    Some('{') | Some('$') => Ok(Tok::ArrayLenSigil),
                    Some(c) if c.is_alphabetic() || c == '_' => {
                        Ok(Tok::ArrayLen(self.ident_text()))
                    }
                    _ => Err(self.error("Expected array name after $#")),
                }
            }
            Some('{') | Some('$') => Ok(Tok::DollarSigil),
            Some('&') => {
                self.bump();
                Ok(Tok::Special(SpecialVar::Match))
            }
            Some('`') => {
                self.bump();
                Ok(Tok::Special(SpecialVar::Prematch))
            }
            Some('\'') => {
                self.bump();
                Ok(Tok::Special(SpecialVar::Postmatch))
            }
            Some('@') => {
                self.bump();
                Ok(Tok::Scalar("@".into()))
            }
            Some('!') => {
                self.bump();
                Ok(Tok::Scalar("!".into()))
            }
            Some('0') => {
                self.bump();
                Ok(Tok::Scalar("0".into()))
            }
            Some(c) if c.is_ascii_digit() => {
                let mut digits = String::new();
                while matches!(self.peek(), Some(d) if d.is_ascii_digit()) {
                    digits.push(self.bump().unwrap_or('0'));
                }
                let n: usize = digits
                    .parse()
                    .map_err(|_| self.error("Capture group number out of range"))?;
                Ok(Tok::Special(SpecialVar::Capture(n)))
            }
            Some(c) if c.is_alphabetic() || c == '_' => Ok(Tok::Scalar(self.ident_text())),
            _ => Err(self.error("Unrecognized variable after $")),
        }
    }

    fn at_sigil(&mut self) -> Result<Tok, CompileError> {
        self.bump(); // '@'
        match self.peek() {
            Some('{') | Some('$') => Ok(Tok::AtSigil),
            Some(c) if c.is_alphabetic() || c == '_' => Ok(Tok::Array(self.ident_text())),
            Some('-') => {
                self.bump();
                Ok(Tok::Array("-".into()))
            }
            Some('+') => {
                self.bump();
                Ok(Tok::Array("+".into()))
            }
            _ => Err(self.error("Unrecognized variable after @")),
        }
    }

    fn number(&mut self) -> Result<Tok, CompileError> {
        let mut text = String::new();
        if self.peek() == Some('0')
            && matches!(self.peek_at(1), Some('x') | Some('X') | Some('b') | Some('B'))
        {
            self.bump();
            let radix = if matches!(self.bump(), Some('x') | Some('X')) {
                16
            } else {
                2
            };
            while matches!(self.peek(), Some(c) if c.is_digit(radix) || c == '_') {
                let c = self.bump().unwrap_or('0');
                if c != '_' {
                    text.push(c);
                }
            }
            return match i64::from_str_radix(&text, radix) {
                Ok(v) => Ok(Tok::Num(NumTok::Int(v))),
                Err(_) => match BigInt::parse_bytes(text.as_bytes(), radix) {
                    Some(b) => Ok(Tok::Num(NumTok::Big(b))),
                    None => Err(self.error("Malformed numeric literal")),
                },
            };
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => {
                    text.push(c);
                    self.bump();
                }
                '_' => {
                    self.bump();
                }
                '.' if !is_float
                    && matches!(self.peek_at(1), Some(d) if d.is_ascii_digit()) =>
                {
                    is_float = true;
                    text.push('.');
                    self.bump();
                }
                'e' | 'E' => {
                    let next = self.peek_at(1);
                    let next2 = self.peek_at(2);
                    let has_exp = matches!(next, Some(d) if d.is_ascii_digit())
                        || (matches!(next, Some('+') | Some('-'))
                            && matches!(next2, Some(d) if d.is_ascii_digit()));
                    if !has_exp {
                        break;
                    }
                    is_float = true;
                    text.push('e');
                    self.bump();
                    if matches!(self.peek(), Some('+') | Some('-')) {
                        text.push(self.bump().unwrap_or('+'));
                    }
                    while matches!(self.peek(), Some(d) if d.is_ascii_digit()) {
                        text.push(self.bump().unwrap_or('0'));
                    }
                }
                _ => break,
            }
        }

        if is_float {
            return text
                .parse::<f64>()
                .map(|v| Tok::Num(NumTok::Float(v)))
                .map_err(|_| self.error("Malformed numeric literal"));
        }
        // leading-zero octal
        if text.len() > 1 && text.starts_with('0') {
            if let Ok(v) = i64::from_str_radix(&text[1..], 8) {
                return Ok(Tok::Num(NumTok::Int(v)));
            }
        }
        if let Ok(v) = text.parse::<i64>() {
            return Ok(Tok::Num(NumTok::Int(v)));
        }
        BigInt::from_str(&text)
            .map(|b| Tok::Num(NumTok::Big(b)))
            .map_err(|_| self.error("Malformed numeric literal"))
    }

    fn quoted_body(&mut self, close: char) -> Result<String, CompileError> {
        let mut raw = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("Unterminated string")),
                Some(c) if c == close => return Ok(raw),
                Some('\\') => {
                    let escaped = self
                        .bump()
                        .ok_or_else(|| self.error("Unterminated string"))?;
                    // keep the escape; interpolation handles it later
                    raw.push('\\');
                    raw.push(escaped);
                }
                Some(c) => raw.push(c),
            }
        }
    }

    fn closing_delim(open: char) -> char {
        match open {
            '(' => ')',
            '[' => ']',
            '{' => '}',
            '<' => '>',
            other => other,
        }
    }

    /// Body of a pattern/quote up to `close`, honouring escapes and, for
    /// bracketing delimiters, nesting.
    fn delimited_body(&mut self, open: char, close: char) -> Result<String, CompileError> {
        let mut body = String::new();
        let nested = open != close;
        let mut depth = 0usize;
        loop {
            match self.bump() {
                None => return Err(self.error("Unterminated pattern or quote")),
                Some('\\') => {
                    let escaped = self
                        .bump()
                        .ok_or_else(|| self.error("Unterminated pattern or quote"))?;
                    body.push('\\');
                    body.push(escaped);
                }
                Some(c) if nested && c == open => {
                    depth += 1;
                    body.push(c);
                }
                Some(c) if c == close => {
                    if depth == 0 {
                        return Ok(body);
                    }
                    depth -= 1;
                    body.push(c);
                }
                Some(c) => body.push(c),
            }
        }
    }

    fn pattern_flags(&mut self) -> String {
        let mut flags = String::new();
        while matches!(self.peek(), Some(c) if c.is_ascii_alphabetic()) {
            flags.push(self.bump().unwrap_or(' '));
        }
        flags
    }

    fn delimited_pattern(&mut self, open: char) -> Result<(String, String), CompileError> {
        let close = Lexer::closing_delim(open);
        let pattern = self.delimited_body(open, close)?;
        Ok((pattern, self.pattern_flags()))
    }

    fn word(&mut self) -> Result<Tok, CompileError> {
        let name = self.ident_text();
        match name.as_str() {
            "m" | "qr" if self.quote_follows() => {
                let open = self.quote_open()?;
                let (pattern, flags) = self.delimited_pattern(open)?;
                Ok(Tok::MatchLit { pattern, flags })
            }
            "s" if self.quote_follows() => {
                let open = self.quote_open()?;
                let close = Lexer::closing_delim(open);
                let pattern = self.delimited_body(open, close)?;
                let replacement = if open == close {
                    self.delimited_body(open, close)?
                } else {
                    self.skip_trivia();
                    let open2 = self.quote_open()?;
                    let close2 = Lexer::closing_delim(open2);
                    self.delimited_body(open2, close2)?
                };
                Ok(Tok::SubstLit {
                    pattern,
                    replacement,
                    flags: self.pattern_flags(),
                })
            }
            "q" if self.quote_follows() => {
                let open = self.quote_open()?;
                let body = self.delimited_body(open, Lexer::closing_delim(open))?;
                Ok(Tok::Str {
                    raw: body,
                    interpolate: false,
                })
            }
            "qq" if self.quote_follows() => {
                let open = self.quote_open()?;
                let body = self.delimited_body(open, Lexer::closing_delim(open))?;
                Ok(Tok::Str {
                    raw: body,
                    interpolate: true,
                })
            }
            "qw" if self.quote_follows() => {
                let open = self.quote_open()?;
                let body = self.delimited_body(open, Lexer::closing_delim(open))?;
                Ok(Tok::Qw(
                    body.split_whitespace().map(str::to_string).collect(),
                ))
            }
            _ => Ok(Tok::Ident(name)),
        }
    }

    /// A quoting word like `m` or `qq` only introduces a quote when a
    /// plausible delimiter follows immediately-ish.
    fn quote_follows(&self) -> bool {
        let mut ahead = 0;
        while matches!(self.peek_at(ahead), Some(c) if c == ' ' || c == '\t') {
            ahead += 1;
        }
        match self.peek_at(ahead) {
            Some(c) => !(c.is_alphanumeric() || c == '_' || c == ';' || c == ','
                || c == ')' || c == '=' || c == '-'),
            None => false,
        }
    }

    fn quote_open(&mut self) -> Result<char, CompileError> {
        self.skip_trivia();
        self.bump()
            .ok_or_else(|| self.error("Missing delimiter after quote-like operator"))
    }
}

/// After these keywords an operand (and therefore a pattern) may follow;
/// after other identifiers a `/` divides.
fn keyword_expects_operand(word: &str) -> bool {
    matches!(
        word,
        "return" | "and" | "or" | "not" | "xor" | "if" | "unless" | "while"
            | "until" | "for" | "foreach" | "print" | "say" | "push" | "unshift"
            | "join" | "split" | "die" | "warn" | "eq" | "ne" | "lt" | "le"
            | "gt" | "ge" | "cmp" | "x" | "my" | "our" | "local" | "defined"
            | "ref" | "scalar" | "grep" | "map" | "eval" | "do" | "else"
            | "elsif" | "use" | "bless" | "last" | "next" | "redo" | "sub"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        Lexer::tokenize(src)
            .unwrap()
            .into_iter()
            .map(|s| s.tok)
            .collect()
    }

    #[test]
    fn slash_is_context_sensitive() {
        // after a value: division
        let t = toks("$x / 2");
        assert!(t.contains(&Tok::Slash));
        // in operand position: a pattern
        let t = toks("$x =~ /ab/");
        assert!(matches!(
            t.as_slice(),
            [Tok::Scalar(_), Tok::BindMatch, Tok::MatchLit { .. }, Tok::Eof]
        ));
    }

    #[test]
    fn percent_is_context_sensitive() {
        let t = toks("%h = (); $x % 2;");
        assert_eq!(t[0], Tok::Hash("h".into()));
        assert!(t.contains(&Tok::Percent));
    }

    #[test]
    fn special_variables() {
        let t = toks("$1 $& $` $' $_ @_");
        assert_eq!(t[0], Tok::Special(SpecialVar::Capture(1)));
        assert_eq!(t[1], Tok::Special(SpecialVar::Match));
        assert_eq!(t[2], Tok::Special(SpecialVar::Prematch));
        assert_eq!(t[3], Tok::Special(SpecialVar::Postmatch));
        assert_eq!(t[4], Tok::Scalar("_".into()));
        assert_eq!(t[5], Tok::Array("_".into()));
    }

    #[test]
    fn numbers() {
        assert_eq!(toks("42")[0], Tok::Num(NumTok::Int(42)));
        assert_eq!(toks("0x1f")[0], Tok::Num(NumTok::Int(31)));
        assert_eq!(toks("017")[0], Tok::Num(NumTok::Int(15)));
        assert_eq!(toks("1_000_000")[0], Tok::Num(NumTok::Int(1_000_000)));
        assert_eq!(toks("1.5e3")[0], Tok::Num(NumTok::Float(1500.0)));
        match &toks("18446744073709551615")[0] {
            Tok::Num(NumTok::Big(b)) => {
                assert_eq!(b.to_string(), "18446744073709551615")
            }
            other => panic!("expected big literal, got {other:?}"),
        }
    }

    #[test]
    fn substitution_with_brackets() {
        let t = toks("s{foo}{bar}g");
        assert_eq!(
            t[0],
            Tok::SubstLit {
                pattern: "foo".into(),
                replacement: "bar".into(),
                flags: "g".into(),
            }
        );
    }

    #[test]
    fn qw_splits_words() {
        assert_eq!(
            toks("qw(a bc d)")[0],
            Tok::Qw(vec!["a".into(), "bc".into(), "d".into()])
        );
    }

    #[test]
    fn m_vs_identifier() {
        // `m` as a quote only when a delimiter follows
        let t = toks("my $m = 1;");
        assert_eq!(t[0], Tok::Ident("my".into()));
        assert_eq!(t[1], Tok::Scalar("m".into()));
        let t = toks("m/x/");
        assert!(matches!(t[0], Tok::MatchLit { .. }));
    }

    #[test]
    fn lines_are_tracked() {
        let spanned = Lexer::tokenize("1;\n2;\n3;").unwrap();
        let lines: Vec<u32> = spanned.iter().map(|s| s.line).collect();
        assert_eq!(lines[0], 1);
        assert_eq!(lines[2], 2);
        assert_eq!(lines[4], 3);
    }
}

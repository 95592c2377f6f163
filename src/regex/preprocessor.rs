use crate::global::error::RegexError;

/// Pattern-level match flags. `x` is consumed here (the scanner strips the
/// whitespace and comments itself); `i`, `m` and `s` ride through to the
/// host engine as inline flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternFlags {
    pub ignore_case: bool,
    pub multiline: bool,
    pub dot_all: bool,
    pub extended: bool,
}

impl PatternFlags {
    pub fn parse(letters: &str) -> PatternFlags {
        PatternFlags {
            ignore_case: letters.contains('i'),
            multiline: letters.contains('m'),
            dot_all: letters.contains('s'),
            extended: letters.contains('x'),
        }
    }

    /// Inline-flag prefix for the host pattern.
    pub fn host_prefix(&self) -> String {
        let mut letters = String::new();
        if self.ignore_case {
            letters.push('i');
        }
        if self.multiline {
            letters.push('m');
        }
        if self.dot_all {
            letters.push('s');
        }
        if letters.is_empty() {
            String::new()
        } else {
            format!("(?{})", letters)
        }
    }
}

/// A flattened `(?|…)` group: the Perl number its branches restart from
/// and the capture count of each branch. Runtime group-number remapping is
/// a Phase-2 concern and is not performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchResetInfo {
    pub first_group: usize,
    pub branch_counts: Vec<usize>,
}

/// Everything the engine needs to know about a pattern besides its host
/// translation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternMeta {
    /// Perl-visible capture count (branch resets advance by the max).
    pub capture_count: usize,
    /// Host group count (branch resets number their branches sequentially).
    pub host_capture_count: usize,
    pub named_groups: Vec<(String, usize)>,
    pub branch_resets: Vec<BranchResetInfo>,
    /// First feature found that has no lowering; the pattern still parses
    /// and counts captures, but cannot be executed.
    pub unimplemented: Option<String>,
}

/// Translates Perl pattern text into host (`regex` crate) syntax, carrying
/// out escape normalisation, character-class expansion, capture
/// accounting, branch-reset flattening and simple-conditional lowering.
pub fn preprocess(
    pattern: &str,
    flags: &PatternFlags,
) -> Result<(String, PatternMeta), RegexError> {
    let mut pre = Pre {
        chars: pattern.chars().collect(),
        pos: 0,
        out: String::with_capacity(pattern.len() + 8),
        perl_count: 0,
        host_count: 0,
        group_spans: Vec::new(),
        extents_valid: true,
        open_groups: Vec::new(),
        named: Vec::new(),
        named_refs: Vec::new(),
        refs: Vec::new(),
        branch_resets: Vec::new(),
        unimplemented: None,
        extended: flags.extended,
        branch_reset_depth: 0,
    };
    pre.translate_seq(Stop::End)?;
    if pre.pos < pre.chars.len() {
        return Err(RegexError::Syntax("Unmatched ) in regex".into()));
    }

    // capture accounting: back-references and conditionals must name a
    // group that exists somewhere in the pattern (forward refs are fine)
    for &n in &pre.refs {
        if n == 0 || n > pre.perl_count {
            return Err(RegexError::NonExistentGroup);
        }
    }
    for name in &pre.named_refs {
        if !pre.named.iter().any(|(have, _)| have == name) {
            return Err(RegexError::NonExistentGroup);
        }
    }

    let meta = PatternMeta {
        capture_count: pre.perl_count,
        host_capture_count: pre.host_count,
        named_groups: pre.named,
        branch_resets: pre.branch_resets,
        unimplemented: pre.unimplemented,
    };
    Ok((pre.out, meta))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    /// end of pattern
    End,
    /// stop before the enclosing `)`
    Group,
    /// stop before the enclosing `)` or a same-level `|`
    Alternation,
}

/// Output extent of a capturing group, used by conditional lowering.
/// `out_end` is the index just past the closing paren.
#[derive(Debug, Clone, Copy)]
struct GroupSpan {
    out_start: usize,
    out_end: usize,
    optional: bool,
}

struct Pre {
    chars: Vec<char>,
    pos: usize,
    out: String,
    perl_count: usize,
    host_count: usize,
    group_spans: Vec<Option<GroupSpan>>,
    extents_valid: bool,
    open_groups: Vec<usize>,
    named: Vec<(String, usize)>,
    named_refs: Vec<String>,
    refs: Vec<usize>,
    branch_resets: Vec<BranchResetInfo>,
    unimplemented: Option<String>,
    extended: bool,
    branch_reset_depth: usize,
}

impl Pre {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn eat(&mut self, want: char) -> bool {
        if self.peek() == Some(want) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn mark_unimplemented(&mut self, what: &str) {
        if self.unimplemented.is_none() {
            self.unimplemented = Some(what.to_string());
        }
    }

    /// Records a group span for conditional lowering. Extents inside
    /// branch-reset groups or after a rewrite are not trustworthy.
    fn record_span(&mut self, perl_n: usize, span: GroupSpan) {
        if self.branch_reset_depth > 0 || !self.extents_valid {
            return;
        }
        if self.group_spans.len() < perl_n {
            self.group_spans.resize(perl_n, None);
        }
        self.group_spans[perl_n - 1] = Some(span);
    }

    fn translate_seq(&mut self, stop: Stop) -> Result<(), RegexError> {
        while let Some(c) = self.peek() {
            match c {
                ')' => {
                    return match stop {
                        Stop::End => {
                            Err(RegexError::Syntax("Unmatched ) in regex".into()))
                        }
                        _ => Ok(()),
                    };
                }
                '|' if stop == Stop::Alternation => return Ok(()),
                '\\' => self.escape()?,
                '[' => self.char_class()?,
                '(' => self.group()?,
                '#' if self.extended => {
                    while let Some(c) = self.peek() {
                        self.pos += 1;
                        if c == '\n' {
                            break;
                        }
                    }
                }
                c if self.extended && c.is_whitespace() => {
                    self.pos += 1;
                }
                '*' | '+' | '?' => {
                    self.pos += 1;
                    self.out.push(c);
                    self.quantifier_suffix();
                }
                '{' => self.brace()?,
                _ => {
                    self.pos += 1;
                    self.out.push(c);
                }
            }
        }
        match stop {
            Stop::End => Ok(()),
            _ => Err(RegexError::Syntax("Unmatched ( in regex".into())),
        }
    }

    /// After a quantifier: `?` makes it lazy, `+` makes it possessive
    /// (which the host cannot express).
    fn quantifier_suffix(&mut self) {
        if self.eat('?') {
            self.out.push('?');
        } else if self.eat('+') {
            self.mark_unimplemented("possessive quantifier");
        }
    }

    /// `{n}`, `{n,}`, `{n,m}` are quantifiers; any other `{` is a literal
    /// and needs escaping for the host.
    fn brace(&mut self) -> Result<(), RegexError> {
        let mut ahead = 1;
        let mut digits = 0;
        while matches!(self.peek_at(ahead), Some(c) if c.is_ascii_digit()) {
            ahead += 1;
            digits += 1;
        }
        let mut quantifier = digits > 0;
        if quantifier && self.peek_at(ahead) == Some(',') {
            ahead += 1;
            while matches!(self.peek_at(ahead), Some(c) if c.is_ascii_digit()) {
                ahead += 1;
            }
        }
        quantifier = quantifier && self.peek_at(ahead) == Some('}');
        if quantifier {
            for _ in 0..=ahead {
                if let Some(c) = self.bump() {
                    self.out.push(c);
                }
            }
            self.quantifier_suffix();
        } else {
            self.pos += 1;
            self.out.push_str("\\{");
        }
        Ok(())
    }

    fn escape(&mut self) -> Result<(), RegexError> {
        self.pos += 1; // backslash
        let c = self
            .bump()
            .ok_or_else(|| RegexError::Syntax("Trailing \\ in regex".into()))?;
        match c {
            'A' | 'b' | 'B' | 'd' | 'D' | 's' | 'S' | 'w' | 'W' | 'z' | 'n' | 'r'
            | 't' | 'f' => {
                self.out.push('\\');
                self.out.push(c);
            }
            // \Z (before optional final newline) needs lookahead the host
            // lacks; \z is the documented approximation
            'Z' => self.out.push_str("\\z"),
            'a' => self.out.push_str("\\x{7}"),
            'e' => self.out.push_str("\\x{1B}"),
            '0' => {
                let mut value = 0u32;
                let mut taken = 0;
                while taken < 2 {
                    match self.peek() {
                        Some(d @ '0'..='7') => {
                            value = value * 8 + d.to_digit(8).unwrap_or(0);
                            self.pos += 1;
                            taken += 1;
                        }
                        _ => break,
                    }
                }
                self.out.push_str(&format!("\\x{{{:X}}}", value));
            }
            '1'..='9' => {
                let mut digits = String::from(c);
                while matches!(self.peek(), Some(d) if d.is_ascii_digit()) {
                    digits.push(self.bump().unwrap_or('0'));
                }
                let n: usize = digits.parse().unwrap_or(0);
                self.refs.push(n);
                self.mark_unimplemented("back-reference");
                self.out.push('\\');
                self.out.push_str(&digits);
            }
            'g' => self.g_reference()?,
            'k' => self.named_backref()?,
            'x' => self.hex_escape()?,
            'c' => {
                let ctl = self
                    .bump()
                    .ok_or_else(|| RegexError::Syntax("Missing control char".into()))?;
                let code = (ctl.to_ascii_uppercase() as u32) ^ 64;
                self.out.push_str(&format!("\\x{{{:X}}}", code));
            }
            'N' => {
                if self.peek() == Some('{') {
                    self.pos += 1;
                    let mut body = String::new();
                    while let Some(c) = self.bump() {
                        if c == '}' {
                            break;
                        }
                        body.push(c);
                    }
                    if let Some(hex) = body.strip_prefix("U+") {
                        self.out.push_str(&format!("\\x{{{}}}", hex));
                    } else {
                        self.mark_unimplemented("named unicode character");
                    }
                } else {
                    self.out.push_str("[^\\n]");
                }
            }
            'p' | 'P' => {
                self.out.push('\\');
                self.out.push(c);
                if self.peek() == Some('{') {
                    while let Some(c) = self.bump() {
                        self.out.push(c);
                        if c == '}' {
                            break;
                        }
                    }
                } else if let Some(letter) = self.bump() {
                    self.out.push(letter);
                }
            }
            'h' => self.out.push_str("[\\t\\p{Zs}]"),
            'H' => self.out.push_str("[^\\t\\p{Zs}]"),
            'v' => self.out.push_str("[\\n\\x{B}\\f\\r\\x{85}\\x{2028}\\x{2029}]"),
            'V' => self.out.push_str("[^\\n\\x{B}\\f\\r\\x{85}\\x{2028}\\x{2029}]"),
            'R' => self
                .out
                .push_str("(?:\\r\\n|[\\n\\x{B}\\f\\r\\x{85}\\x{2028}\\x{2029}])"),
            'Q' => {
                while let Some(c) = self.peek() {
                    if c == '\\' && self.peek_at(1) == Some('E') {
                        self.pos += 2;
                        break;
                    }
                    self.pos += 1;
                    self.push_literal(c);
                }
            }
            'E' => {}
            'G' => self.mark_unimplemented("\\G anchor"),
            'K' => self.mark_unimplemented("\\K keep"),
            _ => {
                self.out.push('\\');
                self.out.push(c);
            }
        }
        Ok(())
    }

    fn push_literal(&mut self, c: char) {
        if "\\^$.|?*+()[]{}".contains(c) {
            self.out.push('\\');
        }
        self.out.push(c);
    }

    fn hex_escape(&mut self) -> Result<(), RegexError> {
        if self.eat('{') {
            let mut hex = String::new();
            while let Some(c) = self.bump() {
                if c == '}' {
                    break;
                }
                hex.push(c);
            }
            self.out.push_str(&format!("\\x{{{}}}", hex));
        } else {
            let mut hex = String::new();
            while hex.len() < 2 {
                match self.peek() {
                    Some(c) if c.is_ascii_hexdigit() => {
                        hex.push(c);
                        self.pos += 1;
                    }
                    _ => break,
                }
            }
            if hex.is_empty() {
                hex.push('0');
            }
            self.out.push_str(&format!("\\x{{{}}}", hex));
        }
        Ok(())
    }

    /// `\g{N}`, `\g{-N}`, `\gN` — absolute or relative numeric reference.
    fn g_reference(&mut self) -> Result<(), RegexError> {
        let braced = self.eat('{');
        let negative = self.eat('-');
        let mut digits = String::new();
        while matches!(self.peek(), Some(d) if d.is_ascii_digit()) {
            digits.push(self.bump().unwrap_or('0'));
        }
        if braced {
            self.eat('}');
        }
        let n: usize = digits.parse().unwrap_or(0);
        let absolute = if negative {
            (self.perl_count + 1).saturating_sub(n)
        } else {
            n
        };
        self.refs.push(absolute);
        self.mark_unimplemented("back-reference");
        Ok(())
    }

    /// `\k<name>`, `\k{name}`, `\k'name'`.
    fn named_backref(&mut self) -> Result<(), RegexError> {
        let close = match self.bump() {
            Some('<') => '>',
            Some('{') => '}',
            Some('\'') => '\'',
            _ => {
                return Err(RegexError::Syntax(
                    "Sequence \\k... not terminated".into(),
                ))
            }
        };
        let mut name = String::new();
        while let Some(c) = self.bump() {
            if c == close {
                break;
            }
            name.push(c);
        }
        self.named_refs.push(name);
        self.mark_unimplemented("named back-reference");
        Ok(())
    }

    fn char_class(&mut self) -> Result<(), RegexError> {
        self.pos += 1; // '['
        self.out.push('[');
        if self.eat('^') {
            self.out.push('^');
        }
        if self.eat(']') {
            self.out.push_str("\\]");
        }
        loop {
            match self.peek() {
                None => {
                    return Err(RegexError::Syntax("Unmatched [ in regex".into()))
                }
                Some(']') => {
                    self.pos += 1;
                    self.out.push(']');
                    return Ok(());
                }
                Some('[') if self.peek_at(1) == Some(':') => {
                    // POSIX class, supported verbatim by the host
                    while let Some(c) = self.bump() {
                        self.out.push(c);
                        if c == ':' && self.peek() == Some(']') {
                            self.pos += 1;
                            self.out.push(']');
                            break;
                        }
                    }
                }
                Some('\\') => self.class_escape()?,
                Some(c) => {
                    self.pos += 1;
                    self.out.push(c);
                }
            }
        }
    }

    fn class_escape(&mut self) -> Result<(), RegexError> {
        self.pos += 1; // backslash
        let c = self
            .bump()
            .ok_or_else(|| RegexError::Syntax("Trailing \\ in regex".into()))?;
        match c {
            'd' | 'D' | 's' | 'S' | 'w' | 'W' | 'n' | 'r' | 't' | 'f' | '\\' | ']'
            | '[' | '^' | '-' => {
                self.out.push('\\');
                self.out.push(c);
            }
            // \b is backspace inside a class
            'b' => self.out.push_str("\\x{8}"),
            'a' => self.out.push_str("\\x{7}"),
            'e' => self.out.push_str("\\x{1B}"),
            'h' => self.out.push_str("\\t\\p{Zs}"),
            'v' => self.out.push_str("\\n\\x{B}\\f\\r\\x{85}\\x{2028}\\x{2029}"),
            'x' => self.hex_escape()?,
            '0'..='7' => {
                let mut value = c.to_digit(8).unwrap_or(0);
                let mut taken = 1;
                while taken < 3 {
                    match self.peek() {
                        Some(d @ '0'..='7') => {
                            value = value * 8 + d.to_digit(8).unwrap_or(0);
                            self.pos += 1;
                            taken += 1;
                        }
                        _ => break,
                    }
                }
                self.out.push_str(&format!("\\x{{{:X}}}", value));
            }
            'N' => {
                if self.eat('{') {
                    let mut body = String::new();
                    while let Some(c) = self.bump() {
                        if c == '}' {
                            break;
                        }
                        body.push(c);
                    }
                    if let Some(hex) = body.strip_prefix("U+") {
                        self.out.push_str(&format!("\\x{{{}}}", hex));
                    } else {
                        self.mark_unimplemented("named unicode character");
                    }
                }
            }
            'p' | 'P' => {
                self.out.push('\\');
                self.out.push(c);
                if self.peek() == Some('{') {
                    while let Some(c) = self.bump() {
                        self.out.push(c);
                        if c == '}' {
                            break;
                        }
                    }
                } else if let Some(letter) = self.bump() {
                    self.out.push(letter);
                }
            }
            _ => {
                self.out.push('\\');
                self.out.push(c);
            }
        }
        Ok(())
    }

    /// Parenthesised constructs. Each recursive handler consumes its own
    /// closing paren and leaves the cursor just past it; the caller resumes
    /// exactly there.
    fn group(&mut self) -> Result<(), RegexError> {
        self.pos += 1; // '('
        if !self.eat('?') {
            return self.capture_group(None);
        }
        match self.peek() {
            Some(':') => {
                self.pos += 1;
                self.out.push_str("(?:");
                self.translate_seq(Stop::Group)?;
                self.expect_close()?;
                Ok(())
            }
            Some('|') => self.branch_reset(),
            Some('=') | Some('!') => {
                let kind = self.bump().unwrap_or('=');
                self.mark_unimplemented("look-ahead assertion");
                self.out.push_str("(?");
                self.out.push(kind);
                self.translate_seq(Stop::Group)?;
                self.expect_close()?;
                Ok(())
            }
            Some('<') => {
                match self.peek_at(1) {
                    Some('=') | Some('!') => {
                        self.pos += 2;
                        self.mark_unimplemented("look-behind assertion");
                        self.out.push_str("(?:");
                        self.translate_seq(Stop::Group)?;
                        self.expect_close()?;
                        Ok(())
                    }
                    _ => {
                        self.pos += 1;
                        let name = self.group_name('>')?;
                        self.capture_group(Some(name))
                    }
                }
            }
            Some('\'') => {
                self.pos += 1;
                let name = self.group_name('\'')?;
                self.capture_group(Some(name))
            }
            Some('P') => match self.peek_at(1) {
                Some('<') => {
                    self.pos += 2;
                    let name = self.group_name('>')?;
                    self.capture_group(Some(name))
                }
                _ => {
                    self.mark_unimplemented("pattern recursion");
                    self.skip_to_close()
                }
            },
            Some('#') => {
                while let Some(c) = self.bump() {
                    if c == ')' {
                        break;
                    }
                }
                Ok(())
            }
            Some('>') => {
                self.pos += 1;
                self.mark_unimplemented("atomic group");
                self.out.push_str("(?:");
                self.translate_seq(Stop::Group)?;
                self.expect_close()?;
                Ok(())
            }
            Some('{') => {
                self.mark_unimplemented("embedded code block");
                self.skip_code_block()
            }
            Some('?') if self.peek_at(1) == Some('{') => {
                self.pos += 1;
                self.mark_unimplemented("embedded code block");
                self.skip_code_block()
            }
            Some('(') => self.conditional(),
            Some('R') | Some('0') => {
                self.mark_unimplemented("recursive pattern");
                self.skip_to_close()
            }
            Some('&') => {
                self.mark_unimplemented("subroutine call");
                self.skip_to_close()
            }
            Some(c) if c.is_ascii_digit() => {
                self.mark_unimplemented("recursive pattern");
                self.skip_to_close()
            }
            Some('+') | Some('-')
                if matches!(self.peek_at(1), Some(d) if d.is_ascii_digit()) =>
            {
                self.mark_unimplemented("recursive pattern");
                self.skip_to_close()
            }
            _ => self.inline_flags(),
        }
    }

    fn expect_close(&mut self) -> Result<(), RegexError> {
        if self.eat(')') {
            self.out.push(')');
            Ok(())
        } else {
            Err(RegexError::Syntax("Unmatched ( in regex".into()))
        }
    }

    fn skip_to_close(&mut self) -> Result<(), RegexError> {
        let mut depth = 0usize;
        while let Some(c) = self.bump() {
            match c {
                '(' => depth += 1,
                ')' if depth == 0 => return Ok(()),
                ')' => depth -= 1,
                _ => {}
            }
        }
        Err(RegexError::Syntax("Unmatched ( in regex".into()))
    }

    /// `(?{ … })` — balanced braces, then the group's close paren.
    fn skip_code_block(&mut self) -> Result<(), RegexError> {
        self.eat('{');
        let mut depth = 1usize;
        while let Some(c) = self.bump() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
        }
        if self.eat(')') {
            Ok(())
        } else {
            Err(RegexError::Syntax("Unmatched ( in regex".into()))
        }
    }

    fn group_name(&mut self, close: char) -> Result<String, RegexError> {
        let mut name = String::new();
        while let Some(c) = self.bump() {
            if c == close {
                return Ok(name);
            }
            name.push(c);
        }
        Err(RegexError::Syntax("Missing > after (?<".into()))
    }

    fn capture_group(&mut self, name: Option<String>) -> Result<(), RegexError> {
        self.perl_count += 1;
        self.host_count += 1;
        let perl_n = self.perl_count;
        self.open_groups.push(perl_n);
        if let Some(name) = name {
            let duplicate = self.named.iter().any(|(have, _)| *have == name);
            if duplicate && self.branch_reset_depth > 0 {
                self.mark_unimplemented(
                    "named duplicate captures across branch-reset branches",
                );
            }
            self.named.push((name.clone(), perl_n));
            let out_start = self.out.len();
            self.out.push_str(&format!("(?P<{}>", name));
            self.translate_seq(Stop::Group)?;
            self.expect_close()?;
            let out_end = self.out.len();
            self.open_groups.pop();
            let optional = self.peek() == Some('?');
            self.record_span(
                perl_n,
                GroupSpan {
                    out_start,
                    out_end,
                    optional,
                },
            );
        } else {
            let out_start = self.out.len();
            self.out.push('(');
            self.translate_seq(Stop::Group)?;
            self.expect_close()?;
            let out_end = self.out.len();
            self.open_groups.pop();
            let optional = self.peek() == Some('?');
            self.record_span(
                perl_n,
                GroupSpan {
                    out_start,
                    out_end,
                    optional,
                },
            );
        }
        Ok(())
    }

    /// `(?|A|B|C)` — flatten to `(?:A|B|C)`; every branch restarts Perl
    /// numbering at the group's base, and the outer counter advances by the
    /// widest branch.
    fn branch_reset(&mut self) -> Result<(), RegexError> {
        self.pos += 1; // '|'
        self.out.push_str("(?:");
        let base = self.perl_count;
        let mut counts = Vec::new();
        self.branch_reset_depth += 1;
        loop {
            self.translate_seq(Stop::Alternation)?;
            counts.push(self.perl_count - base);
            if self.eat('|') {
                self.out.push('|');
                self.perl_count = base;
            } else {
                break;
            }
        }
        self.branch_reset_depth -= 1;
        if !self.eat(')') {
            return Err(RegexError::Syntax("Unmatched ( in regex".into()));
        }
        self.out.push(')');
        self.perl_count = base + counts.iter().copied().max().unwrap_or(0);
        self.branch_resets.push(BranchResetInfo {
            first_group: base + 1,
            branch_counts: counts,
        });
        Ok(())
    }

    /// `(?(cond)yes|no)`. The simple numeric form over a preceding,
    /// directly-optional group with only plain text in between lowers to an
    /// alternation; everything else passes through as unimplemented.
    fn conditional(&mut self) -> Result<(), RegexError> {
        self.pos += 1; // inner '('
        let mut digits = String::new();
        while matches!(self.peek(), Some(d) if d.is_ascii_digit()) {
            digits.push(self.bump().unwrap_or('0'));
        }
        let numeric = !digits.is_empty() && self.peek() == Some(')');
        if !numeric {
            // named group, assertion or recursion condition
            self.mark_unimplemented("conditional with non-numeric condition");
            self.skip_to_close()?;
            self.out.push_str("(?:");
            self.translate_seq(Stop::Alternation)?;
            if self.eat('|') {
                self.out.push('|');
                self.translate_seq(Stop::Alternation)?;
            }
            self.expect_close()?;
            return Ok(());
        }
        self.pos += 1; // ')' closing the condition
        let n: usize = digits.parse().unwrap_or(0);
        self.refs.push(n);

        let lowerable = if self.open_groups.contains(&n) {
            self.mark_unimplemented("self-referential conditional");
            false
        } else if n == 0 || n > self.perl_count {
            self.mark_unimplemented("forward conditional");
            false
        } else {
            let span = self
                .group_spans
                .get(n - 1)
                .copied()
                .flatten()
                .filter(|s| s.optional && self.extents_valid);
            match span {
                Some(span) => {
                    let quantifier_present = self
                        .out
                        .get(span.out_end..span.out_end + 1)
                        .map(|s| s == "?")
                        .unwrap_or(false);
                    let mid = self.out.get(span.out_end + 1..).unwrap_or("");
                    quantifier_present && is_simple_text(mid)
                }
                None => false,
            }
        };

        if !lowerable {
            if self.unimplemented.is_none() {
                self.mark_unimplemented("complex conditional");
            }
            self.out.push_str("(?:");
            self.translate_seq(Stop::Alternation)?;
            if self.eat('|') {
                self.out.push('|');
                self.translate_seq(Stop::Alternation)?;
            }
            self.expect_close()?;
            return Ok(());
        }

        // later conditionals cannot trust group extents after this rewrite
        self.extents_valid = false;

        let span = self.group_spans[n - 1].unwrap_or(GroupSpan {
            out_start: 0,
            out_end: 0,
            optional: true,
        });
        let prefix = self.out[..span.out_start].to_string();
        let group = self.out[span.out_start..span.out_end].to_string();
        let mid = self.out[span.out_end + 1..].to_string();

        let saved = std::mem::take(&mut self.out);
        self.translate_seq(Stop::Alternation)?;
        let yes = std::mem::take(&mut self.out);
        let no = if self.eat('|') {
            self.translate_seq(Stop::Alternation)?;
            std::mem::take(&mut self.out)
        } else {
            String::new()
        };
        if !self.eat(')') {
            self.out = saved;
            return Err(RegexError::Syntax("Unmatched ( in regex".into()));
        }
        let _ = saved;

        self.out = format!(
            "{}(?:{}{}{}|{}{})",
            prefix, group, mid, yes, mid, no
        );
        Ok(())
    }

    /// `(?imsx-imsx)` and `(?flags:…)`; unsupported letters are dropped.
    fn inline_flags(&mut self) -> Result<(), RegexError> {
        let mut letters = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphabetic() || c == '-' || c == '^' {
                letters.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        let filtered: String = letters
            .chars()
            .filter(|c| "imsx-".contains(*c))
            .collect();
        let useful = filtered.chars().any(|c| c != '-');
        match self.peek() {
            Some(':') => {
                self.pos += 1;
                if useful {
                    self.out.push_str(&format!("(?{}:", filtered));
                } else {
                    self.out.push_str("(?:");
                }
                self.translate_seq(Stop::Group)?;
                self.expect_close()?;
                Ok(())
            }
            Some(')') => {
                self.pos += 1;
                if useful {
                    self.out.push_str(&format!("(?{})", filtered));
                }
                Ok(())
            }
            _ => Err(RegexError::Syntax("Sequence (?... not recognized".into())),
        }
    }
}

fn is_simple_text(text: &str) -> bool {
    !text.contains(['(', ')', '|'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(pattern: &str) -> (String, PatternMeta) {
        preprocess(pattern, &PatternFlags::default()).unwrap()
    }

    #[test]
    fn plain_patterns_pass_through() {
        let (out, meta) = run("abc");
        assert_eq!(out, "abc");
        assert_eq!(meta.capture_count, 0);
        assert!(meta.unimplemented.is_none());
    }

    #[test]
    fn capture_accounting() {
        let (_, meta) = run("(a)(b(c))");
        assert_eq!(meta.capture_count, 3);
        assert_eq!(meta.host_capture_count, 3);
    }

    #[test]
    fn escapes_normalise() {
        let (out, _) = run("\\x41\\x{263A}\\N{U+0041}\\Z");
        assert_eq!(out, "\\x{41}\\x{263A}\\x{41}\\z");
        let (out, _) = run("\\012");
        assert_eq!(out, "\\x{A}");
    }

    #[test]
    fn branch_reset_flattens_and_counts_by_max() {
        let (out, meta) = run("(?|(a)|(b)(c))");
        assert_eq!(out, "(?:(a)|(b)(c))");
        assert_eq!(meta.capture_count, 2);
        assert_eq!(meta.host_capture_count, 3);
        assert_eq!(
            meta.branch_resets,
            vec![BranchResetInfo {
                first_group: 1,
                branch_counts: vec![1, 2],
            }]
        );
        assert!(meta.unimplemented.is_none());
    }

    #[test]
    fn simple_conditional_lowers() {
        let (out, meta) = run("^(a)?(?(1)b|c)$");
        assert_eq!(out, "^(?:(a)b|c)$");
        assert_eq!(meta.capture_count, 1);
        assert!(meta.unimplemented.is_none());
    }

    #[test]
    fn conditional_with_text_between() {
        let (out, meta) = run("(x)?-(?(1)y|z)");
        assert_eq!(out, "(?:(x)-y|-z)");
        assert!(meta.unimplemented.is_none());
    }

    #[test]
    fn complex_conditional_is_unimplemented() {
        let (_, meta) = run("(a)(?(1)b|c)");
        assert_eq!(meta.unimplemented.as_deref(), Some("complex conditional"));
        let (_, meta) = run("(?(R)a|b)");
        assert!(meta.unimplemented.is_some());
    }

    #[test]
    fn nonexistent_group_is_an_error() {
        assert_eq!(
            preprocess("(a)\\5", &PatternFlags::default()),
            Err(RegexError::NonExistentGroup)
        );
        assert_eq!(
            preprocess("(a)?(?(2)b|c)", &PatternFlags::default()),
            Err(RegexError::NonExistentGroup)
        );
    }

    #[test]
    fn forward_reference_is_accepted() {
        // forward reference: group 2 exists later in the pattern
        let (_, meta) = preprocess("(\\2)(b)", &PatternFlags::default()).unwrap();
        assert_eq!(meta.capture_count, 2);
        assert_eq!(meta.unimplemented.as_deref(), Some("back-reference"));
    }

    #[test]
    fn unimplemented_features_detected() {
        let cases: &[(&str, &str)] = &[
            ("a(?{ code })b", "embedded code block"),
            ("(?R)", "recursive pattern"),
            ("(?1)ab", "recursive pattern"),
            ("(?=x)a", "look-ahead assertion"),
            ("(?<=x)a", "look-behind assertion"),
            ("a*+b", "possessive quantifier"),
        ];
        for (pattern, reason) in cases {
            let (_, meta) = run(pattern);
            assert_eq!(
                meta.unimplemented.as_deref(),
                Some(*reason),
                "pattern {pattern}"
            );
        }
    }

    #[test]
    fn named_groups_translate() {
        let (out, meta) = run("(?<word>\\w+)");
        assert_eq!(out, "(?P<word>\\w+)");
        assert_eq!(meta.named_groups, vec![("word".to_string(), 1)]);
    }

    #[test]
    fn posix_classes_pass_through() {
        let (out, _) = run("[[:alpha:]]+");
        assert_eq!(out, "[[:alpha:]]+");
    }

    #[test]
    fn extended_mode_strips_whitespace_and_comments() {
        let flags = PatternFlags::parse("x");
        let (out, meta) = preprocess("a b  # trailing\n(c)", &flags).unwrap();
        assert_eq!(out, "ab(c)");
        assert_eq!(meta.capture_count, 1);
    }

    #[test]
    fn nested_handlers_do_not_eat_enclosing_paren() {
        let (out, meta) = run("((?:inner)tail)end");
        assert_eq!(out, "((?:inner)tail)end");
        assert_eq!(meta.capture_count, 1);
    }

    #[test]
    fn literal_brace_is_escaped() {
        let (out, _) = run("a{b");
        assert_eq!(out, "a\\{b");
        let (out, _) = run("a{2,3}");
        assert_eq!(out, "a{2,3}");
    }
}

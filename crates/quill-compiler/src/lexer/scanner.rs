//! The scanner that produces tokens from source text.
//!
//! The scanner is context-free with two exceptions that the parser drives:
//! a `/` in operand position is rescanned as a regular expression literal,
//! and a `}` that closes a template substitution is rescanned as the next
//! template chunk.

use super::{SourcePos, Span, Token, TokenKind};

/// A saved scanner position, used to rewind the token stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannerState {
    pos: usize,
    line: u32,
    line_start: usize,
}

impl ScannerState {
    /// Byte offset the scanner will resume from.
    pub fn offset(&self) -> usize {
        self.pos
    }
}

/// A scanner that tokenizes JavaScript source code.
pub struct Scanner<'a> {
    source: &'a str,
    pos: usize,
    line: u32,
    line_start: usize,
    legacy_octal: bool,
}

impl<'a> Scanner<'a> {
    /// Creates a new scanner for the given source code.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            line: 1,
            line_start: 0,
            legacy_octal: false,
        }
    }

    /// Creates a scanner that starts at `offset` with the given position.
    pub fn starting_at(source: &'a str, offset: usize, pos: SourcePos) -> Self {
        Self {
            source,
            pos: offset,
            line: pos.line,
            line_start: offset.saturating_sub(pos.column as usize),
            legacy_octal: false,
        }
    }

    /// The full source text being scanned.
    pub fn source(&self) -> &'a str {
        self.source
    }

    /// Saves the current position.
    pub fn checkpoint(&self) -> ScannerState {
        ScannerState {
            pos: self.pos,
            line: self.line,
            line_start: self.line_start,
        }
    }

    /// Restores a position saved with [`Scanner::checkpoint`].
    pub fn rewind(&mut self, state: ScannerState) {
        self.pos = state.pos;
        self.line = state.line;
        self.line_start = state.line_start;
    }

    /// Current line/column.
    pub fn source_pos(&self) -> SourcePos {
        SourcePos::new(self.line, (self.pos - self.line_start) as u32)
    }

    /// Returns the next token from the source.
    pub fn next_token(&mut self) -> Token {
        let newline_before = self.skip_whitespace_and_comments();

        let start = self.pos;
        let pos = self.source_pos();
        self.legacy_octal = false;

        let kind = match self.advance() {
            None => TokenKind::Eof,
            Some(ch) => match ch {
                // Single-character tokens
                '{' => TokenKind::LeftBrace,
                '}' => TokenKind::RightBrace,
                '(' => TokenKind::LeftParen,
                ')' => TokenKind::RightParen,
                '[' => TokenKind::LeftBracket,
                ']' => TokenKind::RightBracket,
                ';' => TokenKind::Semicolon,
                ',' => TokenKind::Comma,
                ':' => TokenKind::Colon,
                '~' => TokenKind::Tilde,

                // Multi-character tokens
                '.' => self.scan_dot(),
                '+' => self.scan_plus(),
                '-' => self.scan_minus(),
                '*' => self.scan_star(),
                '/' => self.scan_slash(),
                '%' => self.scan_percent(),
                '<' => self.scan_less_than(),
                '>' => self.scan_greater_than(),
                '=' => self.scan_equal(),
                '!' => self.scan_bang(),
                '&' => self.scan_ampersand(),
                '|' => self.scan_pipe(),
                '^' => self.scan_caret(),
                '?' => self.scan_question(),

                // String literals
                '"' | '\'' => self.scan_string(ch),

                // Template literals
                '`' => self.scan_template_chunk(true),

                // Numbers
                '0'..='9' => self.scan_number(ch),

                // Identifiers and keywords
                _ if is_id_start(ch) => self.scan_identifier(start),

                _ => TokenKind::Invalid("illegal character"),
            },
        };

        let mut token = Token::new(kind, Span::new(start, self.pos), pos);
        token.newline_before = newline_before;
        token.legacy_octal = self.legacy_octal;
        token
    }

    /// Rescans the token starting at `start` (a `/` or `/=`) as a regular
    /// expression literal.
    pub fn rescan_regexp(&mut self, start: usize, pos: SourcePos) -> Token {
        self.reset_to(start, pos);
        self.advance(); // opening '/'

        let mut pattern = String::new();
        let mut in_class = false;
        let kind = loop {
            match self.advance() {
                None => break TokenKind::Invalid("unterminated regular expression literal"),
                Some(ch) if is_line_terminator(ch) => {
                    break TokenKind::Invalid("unterminated regular expression literal");
                }
                Some('\\') => {
                    pattern.push('\\');
                    match self.advance() {
                        Some(ch) if !is_line_terminator(ch) => pattern.push(ch),
                        _ => break TokenKind::Invalid("unterminated regular expression literal"),
                    }
                }
                Some('[') => {
                    in_class = true;
                    pattern.push('[');
                }
                Some(']') => {
                    in_class = false;
                    pattern.push(']');
                }
                Some('/') if !in_class => {
                    let flags_start = self.pos;
                    while let Some(ch) = self.peek() {
                        if is_id_continue(ch) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                    let flags = self.source[flags_start..self.pos].to_string();
                    if flags.chars().any(|c| !"dgimsuy".contains(c)) {
                        break TokenKind::Invalid("invalid regular expression flag");
                    }
                    break TokenKind::RegExp { pattern, flags };
                }
                Some(ch) => pattern.push(ch),
            }
        };

        Token::new(kind, Span::new(start, self.pos), pos)
    }

    /// Rescans from the `}` at `start` as the continuation of a template
    /// literal, producing a `TemplateMiddle` or `TemplateTail`.
    pub fn rescan_template_continuation(&mut self, start: usize, pos: SourcePos) -> Token {
        self.reset_to(start, pos);
        self.advance(); // '}'
        let kind = self.scan_template_chunk(false);
        Token::new(kind, Span::new(start, self.pos), pos)
    }

    fn reset_to(&mut self, start: usize, pos: SourcePos) {
        self.pos = start;
        self.line = pos.line;
        self.line_start = start - pos.column as usize;
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.source[self.pos..].chars().next()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.source[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consumes a line terminator that was just read, treating `\r\n` as one.
    fn newline(&mut self, ch: char) {
        if ch == '\r' {
            self.eat('\n');
        }
        self.line += 1;
        self.line_start = self.pos;
    }

    /// Skips trivia and reports whether a line terminator was crossed.
    fn skip_whitespace_and_comments(&mut self) -> bool {
        let mut saw_newline = false;
        loop {
            match self.peek() {
                Some(ch) if is_line_terminator(ch) => {
                    self.advance();
                    self.newline(ch);
                    saw_newline = true;
                }
                Some(ch) if is_whitespace(ch) => {
                    self.advance();
                }
                Some('/') => match self.peek_next() {
                    Some('/') => {
                        // Single-line comment: skip until end of line
                        while let Some(ch) = self.peek() {
                            if is_line_terminator(ch) {
                                break;
                            }
                            self.advance();
                        }
                    }
                    Some('*') => {
                        self.advance();
                        self.advance();
                        let mut prev = ' ';
                        while let Some(ch) = self.advance() {
                            if prev == '*' && ch == '/' {
                                break;
                            }
                            if is_line_terminator(ch) {
                                self.newline(ch);
                                saw_newline = true;
                            }
                            prev = ch;
                        }
                    }
                    _ => break,
                },
                _ => break,
            }
        }
        saw_newline
    }

    fn scan_dot(&mut self) -> TokenKind {
        match self.peek() {
            Some('.') if self.peek_next() == Some('.') => {
                self.advance();
                self.advance();
                TokenKind::Ellipsis
            }
            Some(ch) if ch.is_ascii_digit() => self.scan_decimal(String::from("0.")),
            _ => TokenKind::Dot,
        }
    }

    fn scan_plus(&mut self) -> TokenKind {
        if self.eat('+') {
            TokenKind::PlusPlus
        } else if self.eat('=') {
            TokenKind::PlusEqual
        } else {
            TokenKind::Plus
        }
    }

    fn scan_minus(&mut self) -> TokenKind {
        if self.eat('-') {
            TokenKind::MinusMinus
        } else if self.eat('=') {
            TokenKind::MinusEqual
        } else {
            TokenKind::Minus
        }
    }

    fn scan_star(&mut self) -> TokenKind {
        if self.eat('*') {
            if self.eat('=') {
                TokenKind::StarStarEqual
            } else {
                TokenKind::StarStar
            }
        } else if self.eat('=') {
            TokenKind::StarEqual
        } else {
            TokenKind::Star
        }
    }

    fn scan_slash(&mut self) -> TokenKind {
        if self.eat('=') {
            TokenKind::SlashEqual
        } else {
            TokenKind::Slash
        }
    }

    fn scan_percent(&mut self) -> TokenKind {
        if self.eat('=') {
            TokenKind::PercentEqual
        } else {
            TokenKind::Percent
        }
    }

    fn scan_less_than(&mut self) -> TokenKind {
        if self.eat('<') {
            if self.eat('=') {
                TokenKind::LeftShiftEqual
            } else {
                TokenKind::LeftShift
            }
        } else if self.eat('=') {
            TokenKind::LessThanEqual
        } else {
            TokenKind::LessThan
        }
    }

    fn scan_greater_than(&mut self) -> TokenKind {
        if self.eat('>') {
            if self.eat('>') {
                if self.eat('=') {
                    TokenKind::UnsignedRightShiftEqual
                } else {
                    TokenKind::UnsignedRightShift
                }
            } else if self.eat('=') {
                TokenKind::RightShiftEqual
            } else {
                TokenKind::RightShift
            }
        } else if self.eat('=') {
            TokenKind::GreaterThanEqual
        } else {
            TokenKind::GreaterThan
        }
    }

    fn scan_equal(&mut self) -> TokenKind {
        if self.eat('=') {
            if self.eat('=') {
                TokenKind::StrictEqual
            } else {
                TokenKind::EqualEqual
            }
        } else if self.eat('>') {
            TokenKind::Arrow
        } else {
            TokenKind::Equal
        }
    }

    fn scan_bang(&mut self) -> TokenKind {
        if self.eat('=') {
            if self.eat('=') {
                TokenKind::StrictNotEqual
            } else {
                TokenKind::NotEqual
            }
        } else {
            TokenKind::Bang
        }
    }

    fn scan_ampersand(&mut self) -> TokenKind {
        if self.eat('&') {
            TokenKind::AmpersandAmpersand
        } else if self.eat('=') {
            TokenKind::AmpersandEqual
        } else {
            TokenKind::Ampersand
        }
    }

    fn scan_pipe(&mut self) -> TokenKind {
        if self.eat('|') {
            TokenKind::PipePipe
        } else if self.eat('=') {
            TokenKind::PipeEqual
        } else {
            TokenKind::Pipe
        }
    }

    fn scan_caret(&mut self) -> TokenKind {
        if self.eat('=') {
            TokenKind::CaretEqual
        } else {
            TokenKind::Caret
        }
    }

    fn scan_question(&mut self) -> TokenKind {
        if self.eat('?') {
            TokenKind::QuestionQuestion
        } else {
            TokenKind::Question
        }
    }

    fn scan_string(&mut self, quote: char) -> TokenKind {
        let mut value = String::new();

        loop {
            match self.advance() {
                None => return TokenKind::Invalid("unterminated string literal"),
                Some(ch) if ch == quote => break,
                Some(ch) if ch == '\n' || ch == '\r' => {
                    return TokenKind::Invalid("unterminated string literal");
                }
                Some('\\') => {
                    if let Err(message) = self.scan_escape(&mut value, false) {
                        return TokenKind::Invalid(message);
                    }
                }
                Some(ch) => value.push(ch),
            }
        }

        TokenKind::String(value)
    }

    /// Scans one template chunk after its opening `` ` `` or `}`.
    fn scan_template_chunk(&mut self, head: bool) -> TokenKind {
        let mut value = String::new();

        loop {
            match self.advance() {
                None => return TokenKind::Invalid("unterminated template literal"),
                Some('`') => {
                    return if head {
                        TokenKind::NoSubstitutionTemplate(value)
                    } else {
                        TokenKind::TemplateTail(value)
                    };
                }
                Some('$') if self.peek() == Some('{') => {
                    self.advance();
                    return if head {
                        TokenKind::TemplateHead(value)
                    } else {
                        TokenKind::TemplateMiddle(value)
                    };
                }
                Some('\\') => {
                    if let Err(message) = self.scan_escape(&mut value, true) {
                        return TokenKind::Invalid(message);
                    }
                }
                Some(ch) if is_line_terminator(ch) => {
                    self.newline(ch);
                    value.push('\n');
                }
                Some(ch) => value.push(ch),
            }
        }
    }

    /// Scans the escape sequence after a backslash, appending the cooked
    /// character(s) to `value`.
    fn scan_escape(&mut self, value: &mut String, template: bool) -> Result<(), &'static str> {
        let Some(escaped) = self.advance() else {
            return Err("unterminated string literal");
        };
        match escaped {
            'n' => value.push('\n'),
            'r' => value.push('\r'),
            't' => value.push('\t'),
            'b' => value.push('\u{8}'),
            'f' => value.push('\u{c}'),
            'v' => value.push('\u{b}'),
            '0' if !self.peek().is_some_and(|c| c.is_ascii_digit()) => value.push('\0'),
            '0'..='7' => {
                if template {
                    return Err("octal escape sequences are not allowed in templates");
                }
                self.legacy_octal = true;
                let mut code = escaped.to_digit(8).unwrap_or(0);
                let max_digits = if escaped <= '3' { 2 } else { 1 };
                for _ in 0..max_digits {
                    match self.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            code = code * 8 + d;
                            self.advance();
                        }
                        None => break,
                    }
                }
                value.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            '8' | '9' => {
                self.legacy_octal = true;
                value.push(escaped);
            }
            'x' => {
                let code = self.scan_hex_digits(2).ok_or("malformed hexadecimal escape sequence")?;
                value.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            'u' => {
                let code = if self.eat('{') {
                    let start = self.pos;
                    while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                        self.advance();
                    }
                    let digits = &self.source[start..self.pos];
                    if !self.eat('}') || digits.is_empty() {
                        return Err("malformed Unicode character escape sequence");
                    }
                    u32::from_str_radix(digits, 16)
                        .ok()
                        .filter(|c| *c <= 0x10ffff)
                        .ok_or("undefined Unicode code-point")?
                } else {
                    self.scan_hex_digits(4).ok_or("malformed Unicode character escape sequence")?
                };
                value.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            ch if is_line_terminator(ch) => {
                // Line continuation
                self.newline(ch);
            }
            other => value.push(other),
        }
        Ok(())
    }

    fn scan_hex_digits(&mut self, count: usize) -> Option<u32> {
        let start = self.pos;
        for _ in 0..count {
            if !self.peek()?.is_ascii_hexdigit() {
                return None;
            }
            self.advance();
        }
        u32::from_str_radix(&self.source[start..self.pos], 16).ok()
    }

    fn scan_number(&mut self, first: char) -> TokenKind {
        // Handle hex, octal, binary and legacy octal
        if first == '0' {
            match self.peek() {
                Some('x' | 'X') => return self.scan_radix_number(16, "0x"),
                Some('o' | 'O') => return self.scan_radix_number(8, "0o"),
                Some('b' | 'B') => return self.scan_radix_number(2, "0b"),
                Some('0'..='9') => return self.scan_legacy_octal(),
                _ => {}
            }
        }

        let mut value = String::from(first);
        self.scan_digits(&mut value);

        if self.peek() == Some('n') {
            self.advance();
            return self.finish_numeric(TokenKind::BigInt(value));
        }

        if self.eat('.') {
            value.push('.');
        }
        self.scan_decimal(value)
    }

    /// Continues a decimal literal after its integer part and optional dot.
    fn scan_decimal(&mut self, mut value: String) -> TokenKind {
        if value.ends_with('.') {
            self.scan_digits(&mut value);
        }

        // Exponent part
        if matches!(self.peek(), Some('e' | 'E')) {
            self.advance();
            value.push('e');
            if let Some(sign @ ('+' | '-')) = self.peek() {
                self.advance();
                value.push(sign);
            }
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                return TokenKind::Invalid("missing exponent");
            }
            self.scan_digits(&mut value);
        }

        match value.parse::<f64>() {
            Ok(n) => self.finish_numeric(TokenKind::Number(n)),
            Err(_) => TokenKind::Invalid("malformed number literal"),
        }
    }

    fn scan_digits(&mut self, value: &mut String) {
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                value.push(ch);
                self.advance();
            } else if ch == '_' && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn scan_radix_number(&mut self, radix: u32, prefix: &str) -> TokenKind {
        self.advance(); // consume radix letter
        let mut value = String::new();

        while let Some(ch) = self.peek() {
            if ch.is_digit(radix) {
                value.push(ch);
                self.advance();
            } else if ch == '_' {
                self.advance();
            } else {
                break;
            }
        }

        if value.is_empty() {
            return TokenKind::Invalid("missing digits after number prefix");
        }

        if self.eat('n') {
            return self.finish_numeric(TokenKind::BigInt(format!("{prefix}{value}")));
        }

        // Accumulate in f64 so that literals wider than 64 bits still round.
        let n = value
            .chars()
            .filter_map(|c| c.to_digit(radix))
            .fold(0.0_f64, |acc, d| acc * radix as f64 + d as f64);
        self.finish_numeric(TokenKind::Number(n))
    }

    /// `0`-prefixed literals: octal when every digit is below 8, decimal
    /// otherwise. Both are flagged as legacy for the strict-mode check.
    fn scan_legacy_octal(&mut self) -> TokenKind {
        self.legacy_octal = true;
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        let digits = &self.source[start..self.pos];
        if digits.chars().all(|c| c < '8') {
            let n = digits
                .chars()
                .filter_map(|c| c.to_digit(8))
                .fold(0.0_f64, |acc, d| acc * 8.0 + d as f64);
            self.finish_numeric(TokenKind::Number(n))
        } else {
            let mut value = String::from(digits);
            if self.eat('.') {
                value.push('.');
            }
            self.scan_decimal(value)
        }
    }

    /// A numeric literal must not be immediately followed by an identifier.
    fn finish_numeric(&mut self, kind: TokenKind) -> TokenKind {
        match self.peek() {
            Some(ch) if is_id_start(ch) || ch.is_ascii_digit() => {
                TokenKind::Invalid("identifier starts immediately after numeric literal")
            }
            _ => kind,
        }
    }

    fn scan_identifier(&mut self, start: usize) -> TokenKind {
        while let Some(ch) = self.peek() {
            if is_id_continue(ch) {
                self.advance();
            } else {
                break;
            }
        }

        let name = &self.source[start..self.pos];

        // Check for keywords
        match name {
            "await" => TokenKind::Await,
            "break" => TokenKind::Break,
            "case" => TokenKind::Case,
            "catch" => TokenKind::Catch,
            "class" => TokenKind::Class,
            "const" => TokenKind::Const,
            "continue" => TokenKind::Continue,
            "debugger" => TokenKind::Debugger,
            "default" => TokenKind::Default,
            "delete" => TokenKind::Delete,
            "do" => TokenKind::Do,
            "else" => TokenKind::Else,
            "enum" => TokenKind::Enum,
            "export" => TokenKind::Export,
            "extends" => TokenKind::Extends,
            "false" => TokenKind::False,
            "finally" => TokenKind::Finally,
            "for" => TokenKind::For,
            "function" => TokenKind::Function,
            "if" => TokenKind::If,
            "import" => TokenKind::Import,
            "in" => TokenKind::In,
            "instanceof" => TokenKind::Instanceof,
            "let" => TokenKind::Let,
            "new" => TokenKind::New,
            "null" => TokenKind::Null,
            "return" => TokenKind::Return,
            "static" => TokenKind::Static,
            "super" => TokenKind::Super,
            "switch" => TokenKind::Switch,
            "this" => TokenKind::This,
            "throw" => TokenKind::Throw,
            "true" => TokenKind::True,
            "try" => TokenKind::Try,
            "typeof" => TokenKind::Typeof,
            "var" => TokenKind::Var,
            "void" => TokenKind::Void,
            "while" => TokenKind::While,
            "with" => TokenKind::With,
            "yield" => TokenKind::Yield,
            "async" => TokenKind::Async,
            _ => TokenKind::Identifier(name.to_string()),
        }
    }
}

/// Checks if a character can start an identifier.
fn is_id_start(ch: char) -> bool {
    ch == '_' || ch == '$' || unicode_xid::UnicodeXID::is_xid_start(ch)
}

/// Checks if a character can continue an identifier.
fn is_id_continue(ch: char) -> bool {
    ch == '_'
        || ch == '$'
        || ch == '\u{200c}'
        || ch == '\u{200d}'
        || unicode_xid::UnicodeXID::is_xid_continue(ch)
}

fn is_line_terminator(ch: char) -> bool {
    matches!(ch, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

fn is_whitespace(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\u{b}' | '\u{c}' | '\u{a0}' | '\u{feff}')
        || (!ch.is_ascii() && ch.is_whitespace() && !is_line_terminator(ch))
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        let token = self.next_token();
        if token.kind == TokenKind::Eof {
            None
        } else {
            Some(token)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::new(source).map(|t| t.kind).collect()
    }

    #[test]
    fn test_simple_tokens() {
        assert_eq!(
            kinds("{ } ( ) => ..."),
            vec![
                TokenKind::LeftBrace,
                TokenKind::RightBrace,
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::Arrow,
                TokenKind::Ellipsis,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("42 3.14 0xff 0b1010 .5 1e3 1_000"),
            vec![
                TokenKind::Number(42.0),
                TokenKind::Number(3.14),
                TokenKind::Number(255.0),
                TokenKind::Number(10.0),
                TokenKind::Number(0.5),
                TokenKind::Number(1000.0),
                TokenKind::Number(1000.0),
            ]
        );
    }

    #[test]
    fn test_bigint() {
        assert_eq!(
            kinds("123n 0x1fn"),
            vec![TokenKind::BigInt("123".into()), TokenKind::BigInt("0x1f".into())]
        );
    }

    #[test]
    fn test_legacy_octal_flag() {
        let mut scanner = Scanner::new("017 08 17");
        let octal = scanner.next_token();
        assert_eq!(octal.kind, TokenKind::Number(15.0));
        assert!(octal.legacy_octal);
        let decimal_like = scanner.next_token();
        assert_eq!(decimal_like.kind, TokenKind::Number(8.0));
        assert!(decimal_like.legacy_octal);
        assert!(!scanner.next_token().legacy_octal);
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(
            kinds(r#""hello" 'wor\'ld' "\x41B\u{43}" "a\
b""#),
            vec![
                TokenKind::String("hello".into()),
                TokenKind::String("wor'ld".into()),
                TokenKind::String("ABC".into()),
                TokenKind::String("ab".into()),
            ]
        );
    }

    #[test]
    fn test_octal_escape_flag() {
        let token = Scanner::new(r#""\101""#).next_token();
        assert_eq!(token.kind, TokenKind::String("A".into()));
        assert!(token.legacy_octal);
        assert!(!Scanner::new(r#""\0""#).next_token().legacy_octal);
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(
            Scanner::new("'abc").next_token().kind,
            TokenKind::Invalid(_)
        ));
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("function const foo _bar $baz"),
            vec![
                TokenKind::Function,
                TokenKind::Const,
                TokenKind::Identifier("foo".into()),
                TokenKind::Identifier("_bar".into()),
                TokenKind::Identifier("$baz".into()),
            ]
        );
    }

    #[test]
    fn test_newline_before() {
        let mut scanner = Scanner::new("a /* x\n */ b\nc d");
        assert!(!scanner.next_token().newline_before);
        let b = scanner.next_token();
        assert!(b.newline_before);
        assert_eq!(b.pos, SourcePos::new(2, 4));
        assert!(scanner.next_token().newline_before);
        assert!(!scanner.next_token().newline_before);
    }

    #[test]
    fn test_positions_track_lines() {
        let mut scanner = Scanner::new("x\r\n  y\u{2028}z");
        assert_eq!(scanner.next_token().pos, SourcePos::new(1, 0));
        assert_eq!(scanner.next_token().pos, SourcePos::new(2, 2));
        assert_eq!(scanner.next_token().pos, SourcePos::new(3, 0));
    }

    #[test]
    fn test_rescan_regexp() {
        let mut scanner = Scanner::new("/a[/]b/gi.x");
        let slash = scanner.next_token();
        assert_eq!(slash.kind, TokenKind::Slash);
        let regexp = scanner.rescan_regexp(slash.span.start, slash.pos);
        assert_eq!(
            regexp.kind,
            TokenKind::RegExp {
                pattern: "a[/]b".into(),
                flags: "gi".into()
            }
        );
        assert_eq!(scanner.next_token().kind, TokenKind::Dot);
    }

    #[test]
    fn test_template_chunks() {
        let mut scanner = Scanner::new("`a${x}b${y}c`");
        assert_eq!(scanner.next_token().kind, TokenKind::TemplateHead("a".into()));
        assert_eq!(scanner.next_token().kind, TokenKind::Identifier("x".into()));
        let close = scanner.next_token();
        assert_eq!(close.kind, TokenKind::RightBrace);
        let middle = scanner.rescan_template_continuation(close.span.start, close.pos);
        assert_eq!(middle.kind, TokenKind::TemplateMiddle("b".into()));
        scanner.next_token();
        let close = scanner.next_token();
        let tail = scanner.rescan_template_continuation(close.span.start, close.pos);
        assert_eq!(tail.kind, TokenKind::TemplateTail("c".into()));
        assert_eq!(scanner.next_token().kind, TokenKind::Eof);
    }

    #[test]
    fn test_checkpoint_rewind() {
        let mut scanner = Scanner::new("a\nb c");
        scanner.next_token();
        let saved = scanner.checkpoint();
        let b = scanner.next_token();
        scanner.next_token();
        scanner.rewind(saved);
        assert_eq!(scanner.next_token(), b);
    }

    #[test]
    fn test_division_vs_comment() {
        assert_eq!(
            kinds("6 / 2 // done"),
            vec![TokenKind::Number(6.0), TokenKind::Slash, TokenKind::Number(2.0)]
        );
    }

    #[test]
    fn test_number_followed_by_identifier() {
        assert!(matches!(kinds("3in")[0], TokenKind::Invalid(_)));
    }

    #[test]
    fn test_token_positions() {
        let mut scanner = Scanner::new("a\n  bc");
        assert_eq!(scanner.source_pos(), SourcePos::new(1, 0));
        assert_eq!(scanner.next_token().pos, SourcePos::new(1, 0));
        let b = scanner.next_token();
        assert_eq!(b.pos, SourcePos::new(2, 2));
        assert!(b.newline_before);
        assert_eq!(scanner.source_pos(), SourcePos::new(2, 4));
    }
}

//! Token definitions for the JavaScript lexer.

use std::fmt;

/// A span in the source code, representing a range of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    /// Start byte offset (inclusive)
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
}

impl Span {
    /// Creates a new span.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Returns the length of this span in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns true if this span is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns the smallest span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// A line/column position. Lines are 1-based, columns are 0-based byte
/// offsets from the start of the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourcePos {
    /// Line number (1-based)
    pub line: u32,
    /// Column (0-based)
    pub column: u32,
}

impl SourcePos {
    /// Creates a new position.
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl Default for SourcePos {
    fn default() -> Self {
        Self { line: 1, column: 0 }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// A token produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The span in the source code
    pub span: Span,
    /// Position of the first byte of the token
    pub pos: SourcePos,
    /// True if a line terminator appeared between the previous token and this one
    pub newline_before: bool,
    /// True for legacy octal numbers (`017`) and strings with octal escapes (`"\1"`)
    pub legacy_octal: bool,
}

impl Token {
    /// Creates a new token.
    pub fn new(kind: TokenKind, span: Span, pos: SourcePos) -> Self {
        Self {
            kind,
            span,
            pos,
            newline_before: false,
            legacy_octal: false,
        }
    }
}

/// The different kinds of tokens in JavaScript.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    /// Numeric literal (integer or floating point)
    Number(f64),
    /// BigInt literal, decimal digits without the `n` suffix
    BigInt(String),
    /// String literal (cooked value)
    String(String),
    /// A template with no substitutions: `` `abc` ``
    NoSubstitutionTemplate(String),
    /// The first chunk of a template with substitutions: `` `abc${ ``
    TemplateHead(String),
    /// A chunk between two substitutions: `` }abc${ ``
    TemplateMiddle(String),
    /// The last chunk of a template: `` }abc` ``
    TemplateTail(String),
    /// Regular expression literal
    RegExp {
        /// Body between the slashes
        pattern: String,
        /// Flag characters after the closing slash
        flags: String,
    },
    /// Boolean true
    True,
    /// Boolean false
    False,
    /// null
    Null,

    // Identifiers and Keywords
    /// Identifier
    Identifier(String),

    // Keywords
    Await,
    Break,
    Case,
    Catch,
    Class,
    Const,
    Continue,
    Debugger,
    Default,
    Delete,
    Do,
    Else,
    Enum,
    Export,
    Extends,
    Finally,
    For,
    Function,
    If,
    Import,
    In,
    Instanceof,
    Let,
    New,
    Return,
    Static,
    Super,
    Switch,
    This,
    Throw,
    Try,
    Typeof,
    Var,
    Void,
    While,
    With,
    Yield,
    Async,

    // Punctuation
    /// {
    LeftBrace,
    /// }
    RightBrace,
    /// (
    LeftParen,
    /// )
    RightParen,
    /// [
    LeftBracket,
    /// ]
    RightBracket,
    /// .
    Dot,
    /// ...
    Ellipsis,
    /// ;
    Semicolon,
    /// ,
    Comma,
    /// <
    LessThan,
    /// >
    GreaterThan,
    /// <=
    LessThanEqual,
    /// >=
    GreaterThanEqual,
    /// ==
    EqualEqual,
    /// !=
    NotEqual,
    /// ===
    StrictEqual,
    /// !==
    StrictNotEqual,
    /// +
    Plus,
    /// -
    Minus,
    /// *
    Star,
    /// /
    Slash,
    /// %
    Percent,
    /// **
    StarStar,
    /// ++
    PlusPlus,
    /// --
    MinusMinus,
    /// <<
    LeftShift,
    /// >>
    RightShift,
    /// >>>
    UnsignedRightShift,
    /// &
    Ampersand,
    /// |
    Pipe,
    /// ^
    Caret,
    /// !
    Bang,
    /// ~
    Tilde,
    /// &&
    AmpersandAmpersand,
    /// ||
    PipePipe,
    /// ??
    QuestionQuestion,
    /// ?
    Question,
    /// :
    Colon,
    /// =
    Equal,
    /// +=
    PlusEqual,
    /// -=
    MinusEqual,
    /// *=
    StarEqual,
    /// /=
    SlashEqual,
    /// %=
    PercentEqual,
    /// **=
    StarStarEqual,
    /// <<=
    LeftShiftEqual,
    /// >>=
    RightShiftEqual,
    /// >>>=
    UnsignedRightShiftEqual,
    /// &=
    AmpersandEqual,
    /// |=
    PipeEqual,
    /// ^=
    CaretEqual,
    /// =>
    Arrow,

    // Special
    /// End of file
    Eof,
    /// A malformed token; carries the reason
    Invalid(&'static str),
}

impl TokenKind {
    /// Returns true if this token is a keyword.
    pub fn is_keyword(&self) -> bool {
        self.keyword_text().is_some()
    }

    /// Returns the source text of a keyword token, or `None` for anything
    /// else. Literal keywords (`true`, `false`, `null`) are included so that
    /// they can be used as property names.
    pub fn keyword_text(&self) -> Option<&'static str> {
        let text = match self {
            TokenKind::Await => "await",
            TokenKind::Break => "break",
            TokenKind::Case => "case",
            TokenKind::Catch => "catch",
            TokenKind::Class => "class",
            TokenKind::Const => "const",
            TokenKind::Continue => "continue",
            TokenKind::Debugger => "debugger",
            TokenKind::Default => "default",
            TokenKind::Delete => "delete",
            TokenKind::Do => "do",
            TokenKind::Else => "else",
            TokenKind::Enum => "enum",
            TokenKind::Export => "export",
            TokenKind::Extends => "extends",
            TokenKind::Finally => "finally",
            TokenKind::For => "for",
            TokenKind::Function => "function",
            TokenKind::If => "if",
            TokenKind::Import => "import",
            TokenKind::In => "in",
            TokenKind::Instanceof => "instanceof",
            TokenKind::Let => "let",
            TokenKind::New => "new",
            TokenKind::Return => "return",
            TokenKind::Static => "static",
            TokenKind::Super => "super",
            TokenKind::Switch => "switch",
            TokenKind::This => "this",
            TokenKind::Throw => "throw",
            TokenKind::Try => "try",
            TokenKind::Typeof => "typeof",
            TokenKind::Var => "var",
            TokenKind::Void => "void",
            TokenKind::While => "while",
            TokenKind::With => "with",
            TokenKind::Yield => "yield",
            TokenKind::Async => "async",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Null => "null",
            _ => return None,
        };
        Some(text)
    }

    /// Returns true if this token is a literal.
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            TokenKind::Number(_)
                | TokenKind::BigInt(_)
                | TokenKind::String(_)
                | TokenKind::NoSubstitutionTemplate(_)
                | TokenKind::TemplateHead(_)
                | TokenKind::RegExp { .. }
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Null
        )
    }

    /// Returns true for the assignment operators (`=`, `+=`, ...).
    pub fn is_assignment(&self) -> bool {
        matches!(
            self,
            TokenKind::Equal
                | TokenKind::PlusEqual
                | TokenKind::MinusEqual
                | TokenKind::StarEqual
                | TokenKind::SlashEqual
                | TokenKind::PercentEqual
                | TokenKind::StarStarEqual
                | TokenKind::LeftShiftEqual
                | TokenKind::RightShiftEqual
                | TokenKind::UnsignedRightShiftEqual
                | TokenKind::AmpersandEqual
                | TokenKind::PipeEqual
                | TokenKind::CaretEqual
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_len() {
        let span = Span::new(5, 15);
        assert_eq!(span.len(), 10);
        assert!(Span::new(5, 5).is_empty());
    }

    #[test]
    fn test_span_to() {
        let a = Span::new(4, 8);
        let b = Span::new(10, 12);
        assert_eq!(a.to(b), Span::new(4, 12));
        assert_eq!(b.to(a), Span::new(4, 12));
    }

    #[test]
    fn test_source_pos_display() {
        assert_eq!(SourcePos::new(3, 7).to_string(), "line 3, column 7");
        assert_eq!(SourcePos::default(), SourcePos::new(1, 0));
    }

    #[test]
    fn test_token_new() {
        let token = Token::new(TokenKind::Number(42.0), Span::new(0, 2), SourcePos::default());
        assert_eq!(token.kind, TokenKind::Number(42.0));
        assert!(!token.newline_before);
        assert!(!token.legacy_octal);
    }

    #[test]
    fn test_keyword_text() {
        assert_eq!(TokenKind::If.keyword_text(), Some("if"));
        assert_eq!(TokenKind::Instanceof.keyword_text(), Some("instanceof"));
        assert_eq!(TokenKind::Null.keyword_text(), Some("null"));
        assert_eq!(TokenKind::Plus.keyword_text(), None);
        assert!(!TokenKind::Identifier("x".to_string()).is_keyword());
    }

    #[test]
    fn test_is_literal() {
        assert!(TokenKind::BigInt("123".to_string()).is_literal());
        assert!(TokenKind::TemplateHead("a".to_string()).is_literal());
        assert!(!TokenKind::TemplateTail("a".to_string()).is_literal());
        assert!(!TokenKind::LeftBrace.is_literal());
    }

    #[test]
    fn test_is_assignment() {
        assert!(TokenKind::Equal.is_assignment());
        assert!(TokenKind::UnsignedRightShiftEqual.is_assignment());
        assert!(!TokenKind::EqualEqual.is_assignment());
        assert!(!TokenKind::Arrow.is_assignment());
    }
}

use ustr::Ustr;

/// Tokens of the qmake project-file language.
/// A `Word` is any bare value: variable names, config atoms, file names,
/// `$$`-expansions.  Expansion happens at evaluation time, not here.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    EndOfFile,
    Word(Ustr),
    String(Ustr), //  quoted; the quotes themselves are not included
    Assign,       //  =
    Append,       //  +=
    Remove,       //  -=
    Unique,       //  *=
    OpenBrace,
    CloseBrace,
    OpenParenthesis,
    CloseParenthesis,
    Colon,
    Pipe,
    Bang,
    Comma,
    Else,
    Newline, //  statement separator (consecutive ones are collapsed)
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

impl Token {
    pub fn new(kind: TokenKind, line: u32) -> Self {
        Self { kind, line }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Word(s) => write!(f, "Word({})", s),
            TokenKind::String(s) => write!(f, "String({})", s),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at line {}", self.kind, self.line)
    }
}

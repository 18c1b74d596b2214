use crate::errors::Error;
use crate::files::File;
use crate::tokens::{Token, TokenKind};
use ustr::Ustr;

#[derive(Copy, Clone)]
struct Context {
    // The next character to process, the source line it is at, and the
    // offset at which we read it.
    offset: usize,
    line: u32,
    current: char,
}

/// A lexer for the qmake project-file language.
/// Newlines are significant (they terminate statements), so they are
/// emitted as tokens; a backslash before a newline continues the line.
pub struct ProLexer<'a> {
    path: std::path::PathBuf,
    input: &'a str,
    context: Context,
}

impl<'a> ProLexer<'a> {
    pub fn new(file: &'a File) -> Self {
        let input = file.as_str();
        Self {
            path: file.path().to_owned(),
            context: Context {
                current: input.chars().next().unwrap_or('\x00'),
                line: 1,
                offset: 0,
            },
            input,
        }
    }

    /// Wraps an error with location information, so that we can report
    /// which file+line the error occurred at.
    pub fn error_with_location(&self, error: Error) -> Error {
        Error::WithLocation {
            path: self.path.clone(),
            line: self.context.line,
            error: Box::new(error),
        }
    }

    /// Consumes one character.  This character is both returned and made
    /// available in self.context.current.
    /// At end of file, it returns \x00
    #[inline]
    fn scan_char(&mut self) -> char {
        self.context.offset += self.context.current.len_utf8();
        match self.input[self.context.offset..].chars().next() {
            None => self.context.current = '\x00',
            Some('\n') => {
                self.context.line += 1;
                self.context.current = '\n';
            }
            Some(c) => self.context.current = c,
        };
        self.context.current
    }

    /// Peek at the following character, without consuming it.
    #[inline]
    fn peek_char(&self) -> Option<char> {
        self.input[self.context.offset + self.context.current.len_utf8()..]
            .chars()
            .next()
    }

    /// Skip spaces and tabs (but not newlines, which are tokens here).
    fn skip_blanks(&mut self) {
        while let ' ' | '\t' | '\r' = self.context.current {
            self.scan_char();
        }
    }

    /// On input, self.context.current is the leading quote.
    fn scan_quote(&mut self) -> TokenKind {
        self.scan_char(); // consume leading quote
        let start_offset = self.context.offset;
        loop {
            match self.context.current {
                '\x00' => return TokenKind::EndOfFile, //  Unterminated str
                '"' => {
                    let end_offset = self.context.offset;
                    self.scan_char();
                    let s = Ustr::from(&self.input[start_offset..end_offset]);
                    return TokenKind::String(s);
                }
                _ => {}
            }
            self.scan_char();
        }
    }

    /// True when the current character can continue a bare word.
    /// `+`, `-` and `*` belong to the word unless they start a compound
    /// assignment operator (`+=`, `-=`, `*=`), so names such as c++11 or
    /// file-name.cpp lex as single words.
    fn is_wordchar(&self) -> bool {
        match self.context.current {
            ' ' | '\t' | '\r' | '\n' | '\x00' | '#' | '=' | '(' | ')'
            | '{' | '}' | ':' | '|' | '!' | ',' | '"' => false,
            '+' | '-' | '*' => self.peek_char() != Some('='),
            _ => true,
        }
    }

    /// Scan one bare word.  `$$(...)` and `$${...}` expansions are kept
    /// inside the word, including their delimiters, so the evaluator can
    /// resolve them later.
    fn scan_word(&mut self) -> TokenKind {
        let mut word = String::new();
        loop {
            if self.context.current == '$' && self.peek_char() == Some('$') {
                word.push('$');
                self.scan_char();
                word.push('$');
                self.scan_char();
                let close = match self.context.current {
                    '(' => Some(')'),
                    '{' => Some('}'),
                    _ => None,
                };
                if let Some(close) = close {
                    loop {
                        word.push(self.context.current);
                        let c = self.scan_char();
                        if c == close {
                            word.push(c);
                            self.scan_char();
                            break;
                        }
                        if c == '\x00' || c == '\n' {
                            break;
                        }
                    }
                }
                continue;
            }
            if !self.is_wordchar() {
                break;
            }
            word.push(self.context.current);
            self.scan_char();
        }
        match word.as_str() {
            "else" => TokenKind::Else,
            _ => TokenKind::Word(Ustr::from(&word)),
        }
    }

    /// Scan the next token.
    fn scan_token(&mut self) -> TokenKind {
        self.skip_blanks();
        match self.context.current {
            '\x00' => TokenKind::EndOfFile,
            '\n' => {
                self.scan_char();
                TokenKind::Newline
            }
            '\\' => {
                // Line continuation: swallow everything up to and
                // including the newline, then keep lexing.
                loop {
                    match self.scan_char() {
                        '\n' => {
                            self.scan_char();
                            break;
                        }
                        '\x00' => break,
                        _ => {}
                    }
                }
                self.scan_token()
            }
            '#' => {
                while !matches!(self.context.current, '\n' | '\x00') {
                    self.scan_char();
                }
                self.scan_token()
            }
            '"' => self.scan_quote(),
            '=' => {
                self.scan_char();
                TokenKind::Assign
            }
            '{' => {
                self.scan_char();
                TokenKind::OpenBrace
            }
            '}' => {
                self.scan_char();
                TokenKind::CloseBrace
            }
            '(' => {
                self.scan_char();
                TokenKind::OpenParenthesis
            }
            ')' => {
                self.scan_char();
                TokenKind::CloseParenthesis
            }
            ':' => {
                self.scan_char();
                TokenKind::Colon
            }
            '|' => {
                self.scan_char();
                TokenKind::Pipe
            }
            '!' => {
                self.scan_char();
                TokenKind::Bang
            }
            ',' => {
                self.scan_char();
                TokenKind::Comma
            }
            '+' | '-' | '*' if self.peek_char() == Some('=') => {
                let op = self.context.current;
                self.scan_char(); // the sign
                self.scan_char(); // the '='
                match op {
                    '+' => TokenKind::Append,
                    '-' => TokenKind::Remove,
                    _ => TokenKind::Unique,
                }
            }
            _ if self.is_wordchar() => self.scan_word(),
            c => {
                self.scan_char();
                TokenKind::InvalidChar(c)
            }
        }
    }

    /// Lex the whole file.  Consecutive newline tokens are collapsed and
    /// a trailing Newline is guaranteed before EndOfFile, which keeps the
    /// parser's statement loop uniform.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut toks: Vec<Token> = Vec::new();
        loop {
            let line = self.context.line;
            let kind = self.scan_token();
            match kind {
                TokenKind::EndOfFile => {
                    if !matches!(
                        toks.last().map(|t| &t.kind),
                        Some(TokenKind::Newline) | None
                    ) {
                        toks.push(Token::new(TokenKind::Newline, line));
                    }
                    toks.push(Token::new(TokenKind::EndOfFile, line));
                    return toks;
                }
                TokenKind::Newline => {
                    if !matches!(
                        toks.last().map(|t| &t.kind),
                        Some(TokenKind::Newline) | None
                    ) {
                        toks.push(Token::new(TokenKind::Newline, line));
                    }
                }
                k => toks.push(Token::new(k, line)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::files::File;
    use crate::lexer::ProLexer;
    use crate::tokens::TokenKind;
    use ustr::Ustr;

    fn kinds(s: &str) -> Vec<TokenKind> {
        let file = File::new_from_str(s);
        ProLexer::new(&file)
            .tokenize()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn word(s: &str) -> TokenKind {
        TokenKind::Word(Ustr::from(s))
    }

    #[test]
    fn test_assignments() {
        assert_eq!(
            kinds("SOURCES += a.cpp b.cpp"),
            vec![
                word("SOURCES"),
                TokenKind::Append,
                word("a.cpp"),
                word("b.cpp"),
                TokenKind::Newline,
                TokenKind::EndOfFile,
            ],
        );
        assert_eq!(
            kinds("QT -= gui"),
            vec![
                word("QT"),
                TokenKind::Remove,
                word("gui"),
                TokenKind::Newline,
                TokenKind::EndOfFile,
            ],
        );
        // + - * stay inside words when not followed by =
        assert_eq!(
            kinds("CONFIG *= c++11 file-name *.cpp"),
            vec![
                word("CONFIG"),
                TokenKind::Unique,
                word("c++11"),
                word("file-name"),
                word("*.cpp"),
                TokenKind::Newline,
                TokenKind::EndOfFile,
            ],
        );
    }

    #[test]
    fn test_scopes_and_comments() {
        assert_eq!(
            kinds("# header\nwin32:SOURCES += c.cpp  # trailing\n"),
            vec![
                word("win32"),
                TokenKind::Colon,
                word("SOURCES"),
                TokenKind::Append,
                word("c.cpp"),
                TokenKind::Newline,
                TokenKind::EndOfFile,
            ],
        );
        assert_eq!(
            kinds("!unix|win32 {\n}\nelse {\n}"),
            vec![
                TokenKind::Bang,
                word("unix"),
                TokenKind::Pipe,
                word("win32"),
                TokenKind::OpenBrace,
                TokenKind::Newline,
                TokenKind::CloseBrace,
                TokenKind::Newline,
                TokenKind::Else,
                TokenKind::OpenBrace,
                TokenKind::Newline,
                TokenKind::CloseBrace,
                TokenKind::Newline,
                TokenKind::EndOfFile,
            ],
        );
    }

    #[test]
    fn test_continuation_lines() {
        assert_eq!(
            kinds("SOURCES = a.cpp \\\n    b.cpp\n"),
            vec![
                word("SOURCES"),
                TokenKind::Assign,
                word("a.cpp"),
                word("b.cpp"),
                TokenKind::Newline,
                TokenKind::EndOfFile,
            ],
        );
    }

    #[test]
    fn test_expansions_kept_in_words() {
        assert_eq!(
            kinds("target.path = $${PREFIX}/bin $$(HOME)/x $$OUT"),
            vec![
                word("target.path"),
                TokenKind::Assign,
                word("$${PREFIX}/bin"),
                word("$$(HOME)/x"),
                word("$$OUT"),
                TokenKind::Newline,
                TokenKind::EndOfFile,
            ],
        );
    }

    #[test]
    fn test_quoted_strings() {
        assert_eq!(
            kinds("DEFINES += \"NAME=some value\""),
            vec![
                word("DEFINES"),
                TokenKind::Append,
                TokenKind::String(Ustr::from("NAME=some value")),
                TokenKind::Newline,
                TokenKind::EndOfFile,
            ],
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(kinds(""), vec![TokenKind::EndOfFile]);
        assert_eq!(kinds("\n\n\n"), vec![TokenKind::EndOfFile]);
    }
}

use crate::errors::{Error, Result};
use crate::files::File;
use crate::lexer::ProLexer;
use crate::rawpro::{AssignOp, Condition, ParsedPro, Statement};
use crate::tokens::{Token, TokenKind};
use ustr::Ustr;

lazy_static::lazy_static! {
    //  Functions that appear in conditions.  Any other name followed by a
    //  parenthesis at statement position is a statement-level call
    //  (include, message, ...).
    static ref TEST_FUNCTIONS: Vec<Ustr> = vec![
        Ustr::from("contains"),
        Ustr::from("isEmpty"),
        Ustr::from("equals"),
        Ustr::from("exists"),
        Ustr::from("CONFIG"),
    ];
    static ref INCLUDE: Ustr = Ustr::from("include");
}

/// Parses one project file into a [`ParsedPro`].
///
/// The grammar needs two tokens of lookahead to disambiguate `:` (both the
/// AND of two conditions and the separator before a one-line scope body),
/// so the whole token stream is buffered up front.  Project files are
/// small, this is never a concern.
pub struct ProScanner {
    path: std::path::PathBuf,
    toks: Vec<Token>,
    pos: usize,
}

impl ProScanner {
    pub fn parse(file: &File) -> Result<ParsedPro> {
        let mut scan = Self {
            path: file.path().to_owned(),
            toks: ProLexer::new(file).tokenize(),
            pos: 0,
        };
        let mut pro = ParsedPro::new(file.path());
        pro.statements = scan.parse_statements(false)?;
        Ok(pro)
    }

    #[inline]
    fn peek(&self) -> &TokenKind {
        &self.toks[self.pos].kind
    }

    #[inline]
    fn peek_at(&self, ahead: usize) -> &TokenKind {
        let idx = (self.pos + ahead).min(self.toks.len() - 1);
        &self.toks[idx].kind
    }

    fn next_token(&mut self) -> &Token {
        let tok = &self.toks[self.pos];
        if tok.kind != TokenKind::EndOfFile {
            self.pos += 1;
        }
        tok
    }

    fn line(&self) -> u32 {
        self.toks[self.pos].line
    }

    fn error(&self, error: Error) -> Error {
        Error::WithLocation {
            path: self.path.clone(),
            line: self.toks[self.pos.min(self.toks.len() - 1)].line,
            error: Box::new(error),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<()> {
        let n = self.next_token();
        if n.kind == kind {
            Ok(())
        } else {
            let got = n.clone();
            Err(self.error(Error::wrong_token(kind, got)))
        }
    }

    fn skip_newlines(&mut self) {
        while *self.peek() == TokenKind::Newline {
            self.pos += 1;
        }
    }

    /// Parse statements until end of file, or until the closing brace of a
    /// block when `in_block` is set.
    fn parse_statements(&mut self, in_block: bool) -> Result<Vec<Statement>> {
        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek() {
                TokenKind::EndOfFile => {
                    if in_block {
                        return Err(self.error(Error::UnexpectedEOF));
                    }
                    return Ok(stmts);
                }
                TokenKind::CloseBrace if in_block => {
                    self.next_token();
                    return Ok(stmts);
                }
                _ => {
                    if let Some(s) = self.parse_statement()? {
                        stmts.push(s);
                    }
                }
            }
        }
    }

    /// Parse one statement.  Returns None for calls we recognize but do
    /// not model (message(), error(), ...), which are skipped.
    fn parse_statement(&mut self) -> Result<Option<Statement>> {
        match self.peek().clone() {
            TokenKind::Bang => Ok(Some(self.parse_scope()?)),
            TokenKind::OpenParenthesis => Ok(Some(self.parse_scope()?)),
            TokenKind::Word(w) => match self.peek_at(1) {
                TokenKind::Assign
                | TokenKind::Append
                | TokenKind::Remove
                | TokenKind::Unique => Ok(Some(self.parse_assignment()?)),
                TokenKind::OpenParenthesis => {
                    if w == *INCLUDE {
                        Ok(Some(self.parse_include()?))
                    } else if TEST_FUNCTIONS.contains(&w) {
                        Ok(Some(self.parse_scope()?))
                    } else {
                        // message(), error(), unknown functions: skip the
                        // call and the rest of the line.
                        tracing::debug!(
                            "{}:{}: ignoring call to {}()",
                            self.path.display(),
                            self.line(),
                            w
                        );
                        self.skip_call()?;
                        self.skip_to_newline();
                        Ok(None)
                    }
                }
                TokenKind::Colon | TokenKind::Pipe | TokenKind::OpenBrace => {
                    Ok(Some(self.parse_scope()?))
                }
                _ => {
                    tracing::debug!(
                        "{}:{}: ignoring stray word {}",
                        self.path.display(),
                        self.line(),
                        w
                    );
                    self.skip_to_newline();
                    Ok(None)
                }
            },
            k => {
                let got = k.clone();
                Err(self.error(Error::wrong_token("statement", got)))
            }
        }
    }

    fn parse_assignment(&mut self) -> Result<Statement> {
        let line = self.line();
        let name = match self.next_token().kind.clone() {
            TokenKind::Word(w) => w,
            got => {
                return Err(self.error(Error::wrong_token("variable name", got)));
            }
        };
        let op = match self.next_token().kind.clone() {
            TokenKind::Assign => AssignOp::Replace,
            TokenKind::Append => AssignOp::Append,
            TokenKind::Remove => AssignOp::Remove,
            TokenKind::Unique => AssignOp::Unique,
            got => {
                return Err(self.error(Error::wrong_token("assignment operator", got)));
            }
        };
        let mut values = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Word(w) => {
                    values.push(*w);
                    self.next_token();
                }
                TokenKind::String(s) => {
                    values.push(*s);
                    self.next_token();
                }
                TokenKind::Newline | TokenKind::EndOfFile => break,
                //  A closing brace terminates `cond { VAR = v }` one-liners
                TokenKind::CloseBrace => break,
                k => {
                    let got = k.clone();
                    return Err(self.error(Error::wrong_token("value", got)));
                }
            }
        }
        Ok(Statement::Assignment {
            name,
            op,
            values,
            line,
        })
    }

    fn parse_include(&mut self) -> Result<Statement> {
        let line = self.line();
        self.next_token(); // the "include" word
        let mut args = self.parse_arg_list()?;
        if args.is_empty() {
            return Err(self.error(Error::WrongArgCount(*INCLUDE)));
        }
        Ok(Statement::Include {
            path: args.remove(0),
            line,
        })
    }

    /// `( arg, arg, ... )`.  Each argument is the concatenation of the
    /// word/string tokens up to the next comma.
    fn parse_arg_list(&mut self) -> Result<Vec<Ustr>> {
        self.expect(TokenKind::OpenParenthesis)?;
        let mut args = Vec::new();
        let mut current = String::new();
        loop {
            match self.peek().clone() {
                TokenKind::CloseParenthesis => {
                    self.next_token();
                    if !current.is_empty() {
                        args.push(Ustr::from(&current));
                    }
                    return Ok(args);
                }
                TokenKind::Comma => {
                    self.next_token();
                    args.push(Ustr::from(current.trim()));
                    current.clear();
                }
                TokenKind::Word(w) | TokenKind::String(w) => {
                    self.next_token();
                    if !current.is_empty() {
                        current.push(' ');
                    }
                    current.push_str(w.as_str());
                }
                TokenKind::Pipe => {
                    //  e.g. CONFIG(debug, debug|release)
                    self.next_token();
                    current.push('|');
                }
                TokenKind::Newline | TokenKind::EndOfFile => {
                    return Err(self.error(Error::UnexpectedEOF));
                }
                k => {
                    let got = k.clone();
                    return Err(self.error(Error::wrong_token("argument", got)));
                }
            }
        }
    }

    /// Skip over a call we do not model, keeping parentheses balanced.
    fn skip_call(&mut self) -> Result<()> {
        self.next_token(); // the function name
        self.expect(TokenKind::OpenParenthesis)?;
        let mut level = 1;
        loop {
            match self.next_token().kind.clone() {
                TokenKind::OpenParenthesis => level += 1,
                TokenKind::CloseParenthesis => {
                    level -= 1;
                    if level == 0 {
                        return Ok(());
                    }
                }
                TokenKind::EndOfFile => {
                    return Err(self.error(Error::UnexpectedEOF))
                }
                _ => {}
            }
        }
    }

    fn skip_to_newline(&mut self) {
        while !matches!(
            self.peek(),
            TokenKind::Newline | TokenKind::EndOfFile
        ) {
            self.next_token();
        }
    }

    /// A full scope: condition, then either a `{}` block or a `:`-prefixed
    /// single statement, then an optional else branch.
    fn parse_scope(&mut self) -> Result<Statement> {
        let condition = self.parse_condition()?;

        let body = match self.peek() {
            TokenKind::OpenBrace => {
                self.next_token();
                self.parse_statements(true)?
            }
            TokenKind::Colon => {
                self.next_token();
                if *self.peek() == TokenKind::OpenBrace {
                    self.next_token();
                    self.parse_statements(true)?
                } else {
                    match self.parse_statement()? {
                        Some(s) => vec![s],
                        None => vec![],
                    }
                }
            }
            k => {
                let got = k.clone();
                return Err(self.error(Error::wrong_token("scope body", got)));
            }
        };

        //  An else may follow on the same line or after newlines.  Only
        //  consume the newlines when an else is really there.
        let saved = self.pos;
        self.skip_newlines();
        let else_body = if *self.peek() == TokenKind::Else {
            self.next_token();
            match self.peek() {
                TokenKind::OpenBrace => {
                    self.next_token();
                    self.parse_statements(true)?
                }
                TokenKind::Colon => {
                    self.next_token();
                    match self.parse_statement()? {
                        Some(s) => vec![s],
                        None => vec![],
                    }
                }
                _ => match self.parse_statement()? {
                    Some(s) => vec![s],
                    None => vec![],
                },
            }
        } else {
            self.pos = saved;
            vec![]
        };

        Ok(Statement::Scope {
            condition,
            body,
            else_body,
        })
    }

    /// `:` chains conditions (AND) for as long as what follows the colon
    /// is another condition term; `|` (OR) binds tighter, as in qmake.
    fn parse_condition(&mut self) -> Result<Condition> {
        let mut cond = self.parse_or_term()?;
        while *self.peek() == TokenKind::Colon
            && self.colon_starts_condition()
        {
            self.next_token(); // the colon
            let right = self.parse_or_term()?;
            cond = cond.and(right);
        }
        Ok(cond)
    }

    /// Decide whether the token after the current `:` begins another
    /// condition term rather than the scope body.
    fn colon_starts_condition(&self) -> bool {
        match self.peek_at(1) {
            TokenKind::Bang => true,
            TokenKind::Word(w) => match self.peek_at(2) {
                TokenKind::Assign
                | TokenKind::Append
                | TokenKind::Remove
                | TokenKind::Unique => false,
                TokenKind::OpenParenthesis => {
                    *w != *INCLUDE && TEST_FUNCTIONS.contains(w)
                }
                _ => true,
            },
            _ => false,
        }
    }

    fn parse_or_term(&mut self) -> Result<Condition> {
        let mut cond = self.parse_primary()?;
        while *self.peek() == TokenKind::Pipe {
            self.next_token();
            let right = self.parse_primary()?;
            cond = cond.or(right);
        }
        Ok(cond)
    }

    fn parse_primary(&mut self) -> Result<Condition> {
        match self.peek().clone() {
            TokenKind::Bang => {
                self.next_token();
                Ok(self.parse_primary()?.not())
            }
            TokenKind::OpenParenthesis => {
                self.next_token();
                let cond = self.parse_condition()?;
                self.expect(TokenKind::CloseParenthesis)?;
                Ok(cond)
            }
            TokenKind::Word(w) => {
                self.next_token();
                if *self.peek() == TokenKind::OpenParenthesis {
                    if !TEST_FUNCTIONS.contains(&w) {
                        return Err(self.error(Error::UnknownFunction(w)));
                    }
                    let args = self.parse_arg_list()?;
                    Ok(Condition::Func { name: w, args })
                } else {
                    Ok(Condition::Atom(w))
                }
            }
            k => {
                let got = k.clone();
                Err(self.error(Error::wrong_token("condition", got)))
            }
        }
    }
}

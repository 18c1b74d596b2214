//! A project file that has been parsed but not evaluated.  All we store
//! here is the statement structure extracted from the text; no variable
//! expansion or condition resolution has happened yet, so the same parsed
//! block can be evaluated several times under different readers.

use ustr::Ustr;

/// How an assignment combines with the previous value of the variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Replace, //  =
    Append,  //  +=
    Remove,  //  -=
    Unique,  //  *=
}

/// The condition guarding a scope.  `:` between two conditions is an AND,
/// `|` an OR.  Atoms are config tests (win32, debug, ...); test functions
/// are decided (or not) by the reader.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Atom(Ustr),
    Func { name: Ustr, args: Vec<Ustr> },
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    pub fn not(self) -> Condition {
        Condition::Not(Box::new(self))
    }

    pub fn and(self, right: Condition) -> Condition {
        Condition::And(Box::new(self), Box::new(right))
    }

    pub fn or(self, right: Condition) -> Condition {
        Condition::Or(Box::new(self), Box::new(right))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assignment {
        name: Ustr,
        op: AssignOp,
        values: Vec<Ustr>,
        line: u32,
    },
    Scope {
        condition: Condition,
        body: Vec<Statement>,
        else_body: Vec<Statement>,
    },
    Include {
        path: Ustr,
        line: u32,
    },
}

/// One parsed project or fragment file.
#[derive(Debug, Default)]
pub struct ParsedPro {
    pub path: std::path::PathBuf,
    pub statements: Vec<Statement>,
}

impl ParsedPro {
    pub fn new(path: &std::path::Path) -> Self {
        Self {
            path: path.to_owned(),
            statements: vec![],
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub fn assign(name: &str, op: AssignOp, values: &[&str]) -> Statement {
        Statement::Assignment {
            name: Ustr::from(name),
            op,
            values: values.iter().map(|v| Ustr::from(v)).collect(),
            line: 0,
        }
    }

    pub fn atom(name: &str) -> Condition {
        Condition::Atom(Ustr::from(name))
    }

    pub fn func(name: &str, args: &[&str]) -> Condition {
        Condition::Func {
            name: Ustr::from(name),
            args: args.iter().map(|a| Ustr::from(a)).collect(),
        }
    }
}

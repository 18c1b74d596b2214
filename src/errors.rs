use ustr::Ustr;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{path}:{line} {error}")]
    WithLocation {
        path: std::path::PathBuf,
        line: u32,
        error: Box<Error>,
    },

    #[error("{path}: {error}")]
    WithPath {
        path: std::path::PathBuf,
        error: Box<Error>,
    },

    #[error("Unexpected end of file")]
    UnexpectedEOF,

    #[error("Expected {expected}, got {got}")]
    WrongToken { expected: String, got: String },

    #[error("Cannot decide condition on {0}")]
    Undecidable(Ustr),

    #[error("Unknown test function {0}")]
    UnknownFunction(Ustr),

    #[error("Wrong number of arguments for {0}")]
    WrongArgCount(Ustr),

    #[error("Inclusion loop through {0}")]
    IncludeLoop(std::path::PathBuf),

    #[error("{0} not found")]
    NotFound(String),

    #[error("filesystem watch failed: {0}")]
    Watch(String),

    #[error("{source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("{source}")]
    FmtIo {
        #[from]
        source: std::fmt::Error,
    },
}

impl Error {
    pub fn wrong_token<T1, T2>(expected: T1, got: T2) -> Self
    where
        T1: std::fmt::Display,
        T2: std::fmt::Display,
    {
        Error::WrongToken {
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }

    pub fn not_found<T: std::fmt::Display>(name: T) -> Self {
        Error::NotFound(name.to_string())
    }

    /// True when the error only means the exact pass could not decide a
    /// conditional scope (a normal state for real project files).
    pub fn is_undecidable(&self) -> bool {
        match self {
            Error::Undecidable(_) => true,
            Error::WithLocation { error, .. } | Error::WithPath { error, .. } => {
                error.is_undecidable()
            }
            _ => false,
        }
    }
}

//! Error module. See the [failure](https://crates.io/crates/failure) crate for details.

use std::fmt;
use std::io;
use std::path::Path;
use std::result;

use failure::{Backtrace, Context, Fail};

use crate::core::{job::JobId, parser::ParseError};

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    ctx: Context<ErrorKind>,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.ctx.get_context()
    }

    pub(crate) fn syntax(error: ParseError) -> Error {
        Error::from(ErrorKind::Syntax(error))
    }

    pub(crate) fn redirection<P: AsRef<Path>>(path: P, error: &io::Error) -> Error {
        Error::from(ErrorKind::RedirectionIo {
            path: path.as_ref().display().to_string(),
            reason: error.to_string(),
        })
    }

    pub(crate) fn spawn<T: fmt::Display>(reason: T) -> Error {
        Error::from(ErrorKind::Spawn(reason.to_string()))
    }

    pub(crate) fn builtin_command<T: AsRef<str>>(message: T, code: i32) -> Error {
        Error::from(ErrorKind::BuiltinCommand {
            message: message.as_ref().to_string(),
            code,
        })
    }

    pub(crate) fn no_such_job(job_id: JobId) -> Error {
        Error::from(ErrorKind::JobNotFound(job_id))
    }

    pub(crate) fn job_table_full(capacity: usize) -> Error {
        Error::from(ErrorKind::JobTableFull(capacity))
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.ctx.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.ctx.backtrace()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.ctx.fmt(f)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Syntax(ParseError),
    RedirectionIo { path: String, reason: String },
    Spawn(String),
    BuiltinCommand { message: String, code: i32 },
    JobNotFound(JobId),
    JobTableFull(usize),
    Docopt,
    Io,
    Nix,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ErrorKind::Syntax(ref error) => write!(f, "syntax error: {}", error),
            ErrorKind::RedirectionIo {
                ref path,
                ref reason,
            } => write!(f, "{}: {}", path, reason),
            ErrorKind::Spawn(ref reason) => write!(f, "failed to launch pipeline: {}", reason),
            ErrorKind::BuiltinCommand { ref message, .. } => write!(f, "{}", message),
            ErrorKind::JobNotFound(job_id) => write!(f, "job {} not found", job_id),
            ErrorKind::JobTableFull(capacity) => {
                write!(f, "job table full ({} jobs)", capacity)
            }
            ErrorKind::Docopt => write!(f, "Docopt error occurred"),
            ErrorKind::Io => write!(f, "I/O error occurred"),
            ErrorKind::Nix => write!(f, "Nix error occurred"),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error::from(Context::new(kind))
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(ctx: Context<ErrorKind>) -> Error {
        Error { ctx }
    }
}

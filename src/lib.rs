//! Jcsh - Job Control Shell
//!
//! A small POSIX shell core: pipelines with `<`, `>` and `>>` redirections, background jobs,
//! and terminal handoff between the shell and the job it waits on.

/// Logs `$result`'s error, if any, without propagating it.
macro_rules! log_if_err {
    ($result:expr, $fmt:expr) => {
        if let Err(ref e) = $result {
            ::log::error!("{}: {}", $fmt, e);
        }
    };
    ($result:expr, $fmt:expr, $($arg:tt)+) => {
        if let Err(ref e) = $result {
            ::log::error!("{}: {}", format!($fmt, $($arg)+), e);
        }
    };
}

pub mod core;
pub mod errors;
pub mod shell;
mod util;

pub use crate::shell::{Shell, ShellConfig};
pub use crate::util::JcshExitStatusExt;

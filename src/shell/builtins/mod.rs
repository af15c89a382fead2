//! Jcsh builtins
//!
//! Builtins run inside the shell process, on single-stage lines only. Where possible the
//! commands conform to their standard Bash counterparts.

use std::iter;

use docopt::Docopt;
use log::debug;

use self::prelude::*;

use self::dirs::Cd;
use self::exit::Exit;
use self::jobs::{Bg, Fg, Jobs};

pub mod prelude {
    pub use std::io::Write;
    pub use std::process::ExitStatus;

    pub use failure::ResultExt;

    pub use super::parse_args;
    pub use crate::errors::{Error, ErrorKind, Result};
    pub use crate::shell::shell::Shell;
    pub use crate::util::JcshExitStatusExt;
}

mod dirs;
mod exit;
mod jobs;

const BG_NAME: &str = "bg";
const CD_NAME: &str = "cd";
const EXIT_NAME: &str = "exit";
const FG_NAME: &str = "fg";
const JOBS_NAME: &str = "jobs";

const USAGE_EXIT_STATUS: i32 = 2;

/// Represents a Jcsh builtin command such as cd or fg.
pub trait BuiltinCommand {
    /// The NAME of the command.
    const NAME: &'static str;
    /// The help string to display to the user. It doubles as the docopt usage string.
    const HELP: &'static str;
    /// Runs the command with the given arguments in the `shell` environment, returning the
    /// command's exit status.
    fn run<T: AsRef<str>>(
        shell: &mut Shell,
        args: &[T],
        stdout: &mut dyn Write,
    ) -> Result<ExitStatus>;
}

pub fn is_builtin<T: AsRef<str>>(program: T) -> bool {
    [BG_NAME, CD_NAME, EXIT_NAME, FG_NAME, JOBS_NAME].contains(&program.as_ref())
}

/// precondition: command is a builtin.
/// Returns (`exit_status_code`, `builtin_result`)
pub fn run<S1, S2>(
    shell: &mut Shell,
    program: S1,
    args: &[S2],
    stdout: &mut dyn Write,
) -> (ExitStatus, Result<()>)
where
    S1: AsRef<str>,
    S2: AsRef<str>,
{
    debug_assert!(is_builtin(&program));
    debug!("running builtin {}", program.as_ref());

    let result = match program.as_ref() {
        BG_NAME => Bg::run(shell, args, stdout),
        CD_NAME => Cd::run(shell, args, stdout),
        EXIT_NAME => Exit::run(shell, args, stdout),
        FG_NAME => Fg::run(shell, args, stdout),
        JOBS_NAME => Jobs::run(shell, args, stdout),
        _ => unreachable!(),
    };

    match result {
        Ok(status) => (status, Ok(())),
        Err(e) => (get_builtin_exit_status(&e), Err(e)),
    }
}

fn get_builtin_exit_status(error: &Error) -> ExitStatus {
    let status = match *error.kind() {
        ErrorKind::BuiltinCommand { code, .. } => code,
        _ => 1,
    };

    ExitStatus::from_status(status)
}

/// Parses `args` against a docopt usage string. Any mismatch is a usage error with status 2.
pub fn parse_args<D, S, I>(usage: &str, program: S, args: I) -> Result<D>
where
    D: serde::de::DeserializeOwned,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    Docopt::new(usage)
        .and_then(|d| {
            d.help(false)
                .argv(iter::once(program.as_ref().to_string()).chain(
                    args.into_iter().map(|arg| arg.as_ref().to_string()),
                ))
                .deserialize()
        })
        .map_err(|e| {
            debug!("{}: {:?}", program.as_ref(), e);
            Error::builtin_command(
                format!("{}: {}", program.as_ref(), usage_line(usage)),
                USAGE_EXIT_STATUS,
            )
        })
}

/// First line of the `Usage:` section, e.g. `usage: fg <job-id>`.
fn usage_line(usage: &str) -> String {
    usage
        .lines()
        .skip_while(|line| !line.trim().eq_ignore_ascii_case("usage:"))
        .nth(1)
        .map(|line| format!("usage: {}", line.trim()))
        .unwrap_or_else(|| "usage error".to_string())
}

use std::env;
use std::path::PathBuf;

use serde::Deserialize;

use crate::shell::builtins::{self, prelude::*};

pub struct Cd;

#[derive(Debug, Deserialize)]
struct CdArgs {
    arg_dir: Option<String>,
}

impl builtins::BuiltinCommand for Cd {
    const NAME: &'static str = builtins::CD_NAME;

    const HELP: &'static str = "\
cd: cd [<dir>]
    Change the current directory to DIR. The variable $HOME is the default
    DIR, and `/' is used when HOME is not set.

Usage:
    cd [<dir>]";

    fn run<T: AsRef<str>>(
        _shell: &mut Shell,
        args: &[T],
        _stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let args: CdArgs = parse_args(Self::HELP, Self::NAME, args.iter().map(AsRef::as_ref))?;
        let dir = match args.arg_dir {
            Some(dir) => PathBuf::from(dir),
            None => home_dir(),
        };

        env::set_current_dir(&dir).map_err(|e| {
            Error::builtin_command(format!("cd: {}: {}", dir.display(), e), 1)
        })?;
        Ok(ExitStatus::from_success())
    }
}

fn home_dir() -> PathBuf {
    env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
}

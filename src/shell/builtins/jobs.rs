use log::debug;
use serde::Deserialize;

use crate::core::job::{JobId, JobState};
use crate::shell::builtins::{self, prelude::*};

pub struct Jobs;

#[derive(Debug, Deserialize)]
struct JobsArgs {
    flag_l: bool,
    flag_p: bool,
    flag_r: bool,
    flag_s: bool,
}

impl builtins::BuiltinCommand for Jobs {
    const NAME: &'static str = builtins::JOBS_NAME;

    const HELP: &'static str = "\
jobs: jobs [-l | -p] [-r | -s]
    Display status of jobs.

    Lists the active jobs in launch order, one line per job:
    [id] pgid command - state

Usage:
    jobs [-l | -p] [-r | -s]

Options:
    -l      List the process IDs of every member in addition to the normal information.
    -p      List process group IDs only.
    -r      Restrict output to running jobs.
    -s      Restrict output to stopped jobs.

Exit Status:
    Returns success unless an invalid option is given or an error occurs.";

    fn run<T: AsRef<str>>(
        shell: &mut Shell,
        args: &[T],
        stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let args: JobsArgs = parse_args(Self::HELP, Self::NAME, args.iter().map(AsRef::as_ref))?;
        debug!("{:?}", args);

        let jobs = shell.get_jobs();
        let selected = jobs.iter().filter(|job| {
            (!args.flag_r || job.state() == JobState::Running)
                && (!args.flag_s || job.state() == JobState::Stopped)
        });

        for job in selected {
            if args.flag_p {
                writeln!(stdout, "{}", job.pgid()).context(ErrorKind::Io)?;
                continue;
            }

            writeln!(stdout, "{}", job).context(ErrorKind::Io)?;
            if args.flag_l {
                for pid in job.pids() {
                    writeln!(stdout, "\t{}", pid).context(ErrorKind::Io)?;
                }
            }
        }

        Ok(ExitStatus::from_success())
    }
}

#[derive(Debug, Deserialize)]
struct JobIdArgs {
    arg_job_id: String,
}

/// Parses the `<job-id>` argument of `fg` and `bg`.
fn parse_job_id<T: AsRef<str>>(usage: &str, program: &str, args: &[T]) -> Result<JobId> {
    let args: JobIdArgs = parse_args(usage, program, args.iter().map(AsRef::as_ref))?;
    args.arg_job_id
        .parse::<u32>()
        .map(JobId)
        .map_err(|_| {
            Error::builtin_command(
                format!("{}: {}: job id must be a number", program, args.arg_job_id),
                2,
            )
        })
}

/// Turns a missing job into the `<program>: job <id> not found` message.
fn report_job_error(program: &str, error: Error) -> Error {
    match *error.kind() {
        ErrorKind::JobNotFound(_) => Error::builtin_command(format!("{}: {}", program, error), 1),
        _ => error,
    }
}

pub struct Fg;

impl builtins::BuiltinCommand for Fg {
    const NAME: &'static str = builtins::FG_NAME;

    const HELP: &'static str = "\
fg: fg <job-id>
    Move job to the foreground.

    Place the job identified by JOB-ID in the foreground, continuing it if
    it is stopped, and wait for it to finish or stop again.

Usage:
    fg <job-id>

Exit Status:
    Status of command placed in foreground or failure if an error occurs.";

    fn run<T: AsRef<str>>(
        shell: &mut Shell,
        args: &[T],
        _stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let job_id = parse_job_id(Self::HELP, Self::NAME, args)?;
        shell
            .put_job_in_foreground(job_id)
            .map_err(|e| report_job_error(Self::NAME, e))
    }
}

pub struct Bg;

impl builtins::BuiltinCommand for Bg {
    const NAME: &'static str = builtins::BG_NAME;

    const HELP: &'static str = "\
bg: bg <job-id>
    Move a job to the background.

    Continue the stopped job identified by JOB-ID without giving it the
    terminal, as if it had been started with `&'.

Usage:
    bg <job-id>

Exit Status:
    Returns success unless the job does not exist or an error occurs.";

    fn run<T: AsRef<str>>(
        shell: &mut Shell,
        args: &[T],
        _stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let job_id = parse_job_id(Self::HELP, Self::NAME, args)?;
        shell
            .put_job_in_background(job_id)
            .map_err(|e| report_job_error(Self::NAME, e))?;
        Ok(ExitStatus::from_success())
    }
}

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;

use failure::ResultExt;
use log::{debug, warn};
use nix::{
    errno::Errno,
    fcntl::OFlag,
    sys::{
        signal::{self, SigHandler, SigSet, SigmaskHow, Signal},
        wait,
    },
    unistd::{self, ForkResult, Pid},
};

use crate::core::{
    job::ProcessGroup,
    parser::{
        ast::{OutputMode, OutputRedirect},
        PipelineSpec,
    },
};
use crate::errors::{Error, ErrorKind, Result};
use crate::shell::terminal::JOB_CONTROL_SIGNALS;
use crate::util;

/// Where a stage's stdin or stdout points before exec.
#[derive(Debug)]
enum Binding {
    Inherit,
    Fd(OwnedFd),
}

impl Binding {
    fn raw_fd(&self) -> Option<RawFd> {
        match *self {
            Binding::Inherit => None,
            Binding::Fd(ref fd) => Some(fd.as_raw_fd()),
        }
    }
}

impl From<File> for Binding {
    fn from(file: File) -> Self {
        Binding::Fd(file.into())
    }
}

/// Everything a child needs for exec, prepared before fork so the child never allocates.
#[derive(Debug)]
struct StageSpawn {
    program: CString,
    argv: Vec<CString>,
}

impl StageSpawn {
    fn new(words: &[String]) -> Result<StageSpawn> {
        let argv = words
            .iter()
            .map(|word| CString::new(word.as_bytes()))
            .collect::<::std::result::Result<Vec<_>, _>>()
            .map_err(|_| Error::spawn(format!("{}: argument contains a NUL byte", words[0])))?;
        Ok(StageSpawn {
            program: argv[0].clone(),
            argv,
        })
    }
}

/// Opens the target of `<`.
pub fn open_input<P: AsRef<Path>>(path: P) -> Result<File> {
    File::open(path.as_ref()).map_err(|e| Error::redirection(path, &e))
}

/// Opens the target of `>` or `>>`, creating it with mode 0644.
pub fn open_output(redirect: &OutputRedirect) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).mode(0o644);
    match redirect.mode {
        OutputMode::Truncate => options.truncate(true),
        OutputMode::Append => options.append(true),
    };
    options
        .open(&redirect.path)
        .map_err(|e| Error::redirection(&redirect.path, &e))
}

/// Spawns one process per stage, connected by pipes, all in a new process group led by the
/// first stage.
///
/// Redirection files are opened before anything is forked, so a bad path spawns nothing. The
/// caller must keep `SIGCHLD` blocked until it has recorded the returned group. When
/// `claim_terminal` is set each child makes the group the terminal's foreground group before
/// exec.
pub fn spawn_processes(spec: &PipelineSpec, claim_terminal: bool) -> Result<ProcessGroup> {
    let stdin = match spec.stdin_redirect() {
        Some(path) => Binding::from(open_input(path)?),
        None => Binding::Inherit,
    };
    let stdout = match spec.stdout_redirect() {
        Some(redirect) => Binding::from(open_output(redirect)?),
        None => Binding::Inherit,
    };

    let last = spec.stages.len() - 1;
    for (i, stage) in spec.stages.iter().enumerate() {
        if (i > 0 && stage.stdin.is_some()) || (i < last && stage.stdout.is_some()) {
            debug!(
                "ignoring redirection on stage {} ({}), the pipe takes precedence",
                i,
                stage.program()
            );
        }
    }

    let stages = spec
        .stages
        .iter()
        .map(|stage| StageSpawn::new(&stage.argv))
        .collect::<Result<Vec<_>>>()?;

    let mut pids = Vec::with_capacity(stages.len());
    match launch_stages(&stages, stdin, stdout, claim_terminal, &mut pids) {
        Ok(()) => {
            let group = ProcessGroup {
                pgid: pids[0],
                pids,
            };
            debug!("spawned process group {:?}", group);
            Ok(group)
        }
        Err(e) => {
            abort_spawned(&pids);
            Err(e)
        }
    }
}

fn launch_stages(
    stages: &[StageSpawn],
    stdin: Binding,
    stdout: Binding,
    claim_terminal: bool,
    pids: &mut Vec<Pid>,
) -> Result<()> {
    let last = stages.len() - 1;
    let mut next_stdin = stdin;
    let mut last_stdout = Some(stdout);

    for (i, stage) in stages.iter().enumerate() {
        let stage_stdin = ::std::mem::replace(&mut next_stdin, Binding::Inherit);
        let stage_stdout = if i == last {
            last_stdout.take().unwrap_or(Binding::Inherit)
        } else {
            let (read_end, write_end) = unistd::pipe2(OFlag::O_CLOEXEC)
                .map_err(|e| Error::spawn(format!("pipe: {}", e.desc())))?;
            next_stdin = Binding::Fd(read_end);
            Binding::Fd(write_end)
        };

        let pgid = pids.first().cloned();
        let pid = match unsafe { unistd::fork() } {
            Ok(ForkResult::Child) => exec_child(
                stage,
                pgid,
                stage_stdin.raw_fd(),
                stage_stdout.raw_fd(),
                claim_terminal,
            ),
            Ok(ForkResult::Parent { child }) => child,
            Err(e) => return Err(Error::spawn(format!("fork: {}", e.desc()))),
        };

        let pgid = pgid.unwrap_or(pid);
        let temp_result = unistd::setpgid(pid, pgid);
        log_if_err!(temp_result, "failed to set pgid ({}) for pid ({})", pgid, pid);
        pids.push(pid);

        // The child owns its copies now
        drop(stage_stdin);
        drop(stage_stdout);
    }

    Ok(())
}

/// Runs in the forked child and never returns.
///
/// Only async-signal-safe calls are made here: the parent may have other threads whose locks
/// were copied mid-operation.
fn exec_child(
    stage: &StageSpawn,
    pgid: Option<Pid>,
    stdin: Option<RawFd>,
    stdout: Option<RawFd>,
    claim_terminal: bool,
) -> ! {
    let pgid = pgid.unwrap_or_else(unistd::getpid);
    let _ = unistd::setpgid(Pid::from_raw(0), pgid);

    // Must happen while SIGTTOU is still ignored
    if claim_terminal {
        let _ = unistd::tcsetpgrp(util::get_terminal(), pgid);
    }

    unsafe {
        for &signal in JOB_CONTROL_SIGNALS
            .iter()
            .chain(&[Signal::SIGCHLD, Signal::SIGPIPE])
        {
            let _ = signal::signal(signal, SigHandler::SigDfl);
        }
    }
    let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None);

    // Pipe and redirection fds are close-on-exec; dup2 clears the flag on the copies.
    if let Some(fd) = stdin {
        if let Err(errno) = unistd::dup2(fd, libc::STDIN_FILENO) {
            child_fail(&stage.program, errno);
        }
    }
    if let Some(fd) = stdout {
        if let Err(errno) = unistd::dup2(fd, libc::STDOUT_FILENO) {
            child_fail(&stage.program, errno);
        }
    }

    match unistd::execvp(&stage.program, &stage.argv) {
        Ok(never) => match never {},
        Err(errno) => child_fail(&stage.program, errno),
    }
}

fn child_fail(program: &CString, errno: Errno) -> ! {
    let parts: [&[u8]; 5] = [
        b"jcsh: ",
        program.as_bytes(),
        b": ",
        errno.desc().as_bytes(),
        b"\n",
    ];
    for part in &parts {
        unsafe {
            libc::write(
                libc::STDERR_FILENO,
                part.as_ptr() as *const libc::c_void,
                part.len(),
            );
        }
    }
    let status = if errno == Errno::ENOENT { 127 } else { 126 };
    unsafe { libc::_exit(status) }
}

/// Kills and reaps the stages of a pipeline that failed to launch completely.
fn abort_spawned(pids: &[Pid]) {
    if let Some(&pgid) = pids.first() {
        warn!("pipeline launch failed, killing process group {}", pgid);
        let temp_result = signal::killpg(pgid, Signal::SIGKILL);
        log_if_err!(temp_result, "failed to kill process group {}", pgid);
    }
    for &pid in pids {
        let temp_result = wait::waitpid(pid, None).context(ErrorKind::Nix);
        log_if_err!(temp_result, "failed to reap {}", pid);
    }
}

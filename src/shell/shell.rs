//! Jcsh - Shell Module
//!
//! The Shell runs one command line per cycle: it drains child state changes collected since the
//! last cycle, reports finished and stopped jobs, then parses and dispatches the next line to a
//! builtin or the pipeline launcher.

use std::fmt;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::{self, ExitStatus};

use failure::ResultExt;
use log::{debug, error, info, warn};
use nix::sys::signal::{self, Signal};

use crate::core::{
    job::{self, Job, JobId, JobState, ProcessGroup},
    parser::{Command, Parser, PipelineSpec},
};
use crate::errors::{Error, ErrorKind, Result};
use crate::shell::{
    builtins,
    execute_command::{open_output, spawn_processes},
    job_control::{self, JobTable, Notice, WaitOutcome},
    reaper::{Reaper, SigchldMask},
    terminal::TerminalController,
    ShellConfig,
};
use crate::util::JcshExitStatusExt;

const PROMPT: &str = "jcsh> ";
const SYNTAX_ERROR_EXIT_STATUS: i32 = 2;

/// Jcsh Shell
pub struct Shell {
    job_table: JobTable,
    terminal: TerminalController,
    reaper: Reaper,
    parser: Parser,
    /// Exit status of last command executed.
    last_exit_status: ExitStatus,
    config: ShellConfig,
    /// Is `false` if job control is disabled, stdin is not a terminal, or initializing job
    /// control fails.
    is_interactive: bool,
    /// Destination of job notices and builtin output.
    output: Box<dyn Write>,
}

impl Shell {
    /// Constructs a new Shell writing to stdout.
    pub fn new(config: ShellConfig) -> Result<Shell> {
        Shell::with_output(config, Box::new(io::stdout()))
    }

    /// Constructs a new Shell writing job notices and builtin output to `output`.
    pub fn with_output(config: ShellConfig, output: Box<dyn Write>) -> Result<Shell> {
        let mut shell = Shell {
            job_table: JobTable::with_capacity(config.job_table_capacity),
            terminal: TerminalController::disabled(),
            reaper: Reaper::manual(),
            parser: Parser::new(config.max_pipeline_stages, config.max_line_length),
            last_exit_status: ExitStatus::from_success(),
            config,
            is_interactive: config.enable_job_control() && atty::is(atty::Stream::Stdin),
            output,
        };

        if shell.is_interactive {
            if let Err(e) = shell.initialize_job_control() {
                error!(
                    "failed to initialize shell for job control despite isatty: {}",
                    e
                );
                shell.terminal = TerminalController::disabled();
                shell.reaper = Reaper::manual();
                shell.is_interactive = false;
            }
        }

        info!("jcsh started up");
        Ok(shell)
    }

    fn initialize_job_control(&mut self) -> Result<()> {
        self.terminal = TerminalController::acquire()?;
        self.reaper = Reaper::install()?;
        Ok(())
    }

    pub fn is_interactive(&self) -> bool {
        self.is_interactive
    }

    pub fn last_exit_status(&self) -> ExitStatus {
        self.last_exit_status
    }

    /// Process group currently owning the terminal.
    pub fn foreground_owner(&self) -> nix::unistd::Pid {
        self.terminal.foreground_owner()
    }

    /// Returns the shell's jobs (running and stopped) in launch order.
    pub fn get_jobs(&self) -> Vec<Job> {
        self.job_table.list().cloned().collect()
    }

    /// Runs one command line.
    ///
    /// Problems with the line itself (syntax, redirections, launching) are reported on stderr
    /// and recorded in the exit status; only unexpected failures are returned.
    pub fn execute_command_string(&mut self, input: &str) -> Result<()> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(());
        }

        let spec = match self.parser.parse(input) {
            Ok(spec) => spec,
            Err(e) => {
                if let ErrorKind::Syntax(_) = *e.kind() {
                    eprintln!("jcsh: {}", e);
                    self.last_exit_status = ExitStatus::from_status(SYNTAX_ERROR_EXIT_STATUS);
                    return Ok(());
                }

                return Err(e);
            }
        };

        if spec.stages.len() == 1 && builtins::is_builtin(spec.program()) {
            if spec.background {
                debug!("ignoring '&' on builtin {}", spec.program());
            }
            return self.execute_builtin(&spec.stages[0]);
        }

        match self.execute_pipeline(&spec) {
            Err(e) => match *e.kind() {
                ErrorKind::RedirectionIo { .. }
                | ErrorKind::Spawn(_)
                | ErrorKind::JobTableFull(_) => {
                    eprintln!("jcsh: {}", e);
                    self.last_exit_status = ExitStatus::from_failure();
                    Ok(())
                }
                _ => Err(e),
            },
            Ok(()) => Ok(()),
        }
    }

    fn execute_builtin(&mut self, command: &Command) -> Result<()> {
        let redirect = match command.stdout {
            Some(ref redirect) => match open_output(redirect) {
                Ok(file) => Some(file),
                Err(e) => {
                    eprintln!("jcsh: {}", e);
                    self.last_exit_status = ExitStatus::from_failure();
                    return Ok(());
                }
            },
            None => None,
        };

        let mut buffer = Vec::new();
        let (status, result) =
            builtins::run(self, command.program(), command.args(), &mut buffer);
        if let Err(ref e) = result {
            eprintln!("{}", e);
        }
        self.last_exit_status = status;

        match redirect {
            Some(mut file) => file.write_all(&buffer).context(ErrorKind::Io)?,
            None => {
                self.output.write_all(&buffer).context(ErrorKind::Io)?;
                self.output.flush().context(ErrorKind::Io)?;
            }
        }
        Ok(())
    }

    /// Launches a pipeline, in the background or in the foreground.
    fn execute_pipeline(&mut self, spec: &PipelineSpec) -> Result<()> {
        // Held until the group is registered or waited on, so the reaper never sees it first
        let _mask = SigchldMask::block()?;

        if spec.background {
            self.job_table.ensure_capacity()?;
        }

        // Children inherit unflushed output otherwise
        self.output.flush().context(ErrorKind::Io)?;
        let claim_terminal = !spec.background && self.terminal.is_enabled();
        let group = spawn_processes(spec, claim_terminal)?;

        if spec.background {
            let job_id = self
                .job_table
                .register(group, &spec.input, spec.program())?;
            let notice = Notice::started(self.job_table.lookup(job_id)?);
            self.notify(&notice)?;
            self.last_exit_status = ExitStatus::from_success();
            Ok(())
        } else {
            self.run_in_foreground(group, spec)
        }
    }

    /// Hands the terminal to `group`, waits for it, and registers it as a job if it stopped.
    fn run_in_foreground(&mut self, group: ProcessGroup, spec: &PipelineSpec) -> Result<()> {
        let guard = self.terminal.transfer_to(group.pgid)?;
        let outcome = job_control::wait_for_group(&group);
        let tmodes = guard.restore()?;

        match outcome? {
            WaitOutcome::Exited(status) => {
                self.last_exit_status = status;
            }
            WaitOutcome::Stopped(signal) => {
                self.last_exit_status = job::get_status_code_for_signal(signal);
                let pgid = group.pgid;
                match self
                    .job_table
                    .register(group.clone(), &spec.input, spec.program())
                {
                    Ok(job_id) => {
                        let job = self.job_table.lookup_mut(job_id)?;
                        job.mark_stopped(signal);
                        job.set_tmodes(tmodes);
                        job.set_notified_stopped_job(true);
                        let notice = Notice::stopped(job);
                        self.notify(&notice)?;
                    }
                    Err(e) => {
                        eprintln!("jcsh: {}", e);
                        warn!("no room to track stopped group {}, killing it", pgid);
                        signal::killpg(pgid, Signal::SIGKILL).context(ErrorKind::Nix)?;
                        job_control::wait_for_group(&group)?;
                        self.last_exit_status = ExitStatus::from_failure();
                    }
                }
            }
        }

        Ok(())
    }

    /// Resumes a stopped or running job in the foreground and waits for it.
    pub fn put_job_in_foreground(&mut self, job_id: JobId) -> Result<ExitStatus> {
        let _mask = SigchldMask::block()?;
        self.apply_staged_events()?;

        let job = self.job_table.lookup(job_id)?;
        if job.state() == JobState::Done {
            let status = job.last_status_code().unwrap_or_else(ExitStatus::from_success);
            let notice = Notice::done(job);
            self.job_table.remove(job_id);
            self.notify(&notice)?;
            self.last_exit_status = status;
            return Ok(status);
        }
        let (group, tmodes) = (job.group().clone(), job.tmodes().cloned());
        self.job_table.mark_running(job_id)?;
        debug!("putting job [{}] in foreground", job_id);

        self.output.flush().context(ErrorKind::Io)?;
        let guard = self.terminal.transfer_to(group.pgid)?;
        if let Some(ref tmodes) = tmodes {
            self.terminal.set_job_modes(tmodes);
        }
        let outcome = signal::killpg(group.pgid, Signal::SIGCONT)
            .context(ErrorKind::Nix)
            .map_err(Error::from)
            .and_then(|_| job_control::wait_for_group(&group));
        let tmodes = guard.restore()?;

        match outcome? {
            WaitOutcome::Exited(status) => {
                self.job_table.remove(job_id);
                self.last_exit_status = status;
            }
            WaitOutcome::Stopped(signal) => {
                let job = self.job_table.lookup_mut(job_id)?;
                job.mark_stopped(signal);
                job.set_tmodes(tmodes);
                job.set_notified_stopped_job(true);
                let notice = Notice::stopped(job);
                self.notify(&notice)?;
                self.last_exit_status = job::get_status_code_for_signal(signal);
            }
        }

        Ok(self.last_exit_status)
    }

    /// Resumes a stopped job without giving it the terminal.
    pub fn put_job_in_background(&mut self, job_id: JobId) -> Result<()> {
        let _mask = SigchldMask::block()?;
        let job = self.job_table.lookup(job_id)?;
        debug!("putting job [{}] in background", job_id);

        if job.state() == JobState::Stopped {
            signal::killpg(job.pgid(), Signal::SIGCONT).context(ErrorKind::Nix)?;
            self.job_table.mark_running(job_id)?;
        }

        let line = self.job_table.lookup(job_id)?.to_string();
        writeln!(self.output, "{}", line).context(ErrorKind::Io)?;
        self.output.flush().context(ErrorKind::Io)?;
        Ok(())
    }

    /// Applies child state changes collected since the last cycle to the job table.
    pub fn apply_staged_events(&mut self) -> Result<()> {
        let events = self.reaper.drain(self.job_table.pgids())?;
        for event in events {
            debug!("applying {:?}", event);
            self.job_table.apply(event);
        }
        Ok(())
    }

    /// Notify the user about stopped or terminated jobs and remove terminated jobs from the
    /// job table.
    pub fn do_job_notification(&mut self) -> Result<()> {
        self.apply_staged_events()?;
        for notice in self.job_table.take_notifications() {
            self.notify(&notice)?;
        }
        Ok(())
    }

    fn notify(&mut self, notice: &Notice) -> Result<()> {
        info!("{}", notice);
        writeln!(self.output, "{}", notice).context(ErrorKind::Io)?;
        self.output.flush().context(ErrorKind::Io)?;
        Ok(())
    }

    /// Runs a jcsh script from a file, one line per command cycle.
    pub fn execute_commands_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let buffer = fs::read_to_string(path).context(ErrorKind::Io)?;

        for line in buffer.lines() {
            let temp_result = self.do_job_notification();
            log_if_err!(temp_result, "do_job_notification");
            self.execute_command_string(line)?;
        }

        self.do_job_notification()
    }

    /// Runs commands from stdin until EOF is received.
    pub fn execute_from_stdin(&mut self) {
        let stdin = io::stdin();
        let mut line = String::new();
        loop {
            let temp_result = self.do_job_notification();
            log_if_err!(temp_result, "do_job_notification");

            if self.config.display_messages() {
                let temp_result = write!(self.output, "{}", PROMPT)
                    .and_then(|_| self.output.flush())
                    .context(ErrorKind::Io);
                log_if_err!(temp_result, "prompt");
            }

            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => (),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("failed to read from stdin: {}", e);
                    break;
                }
            }

            let temp_result = self.execute_command_string(&line);
            log_if_err!(temp_result, "execute_command_string");
        }
    }

    /// Exit the shell.
    ///
    /// Exit the shell with a status of n. If n is None, then the exit status is that of the last
    /// command executed. Only the low eight bits are kept, so -1 becomes 255 and 256 becomes 0.
    ///
    /// Jobs that are still running or stopped are abandoned.
    pub fn exit(&mut self, n: Option<ExitStatus>) -> ! {
        if self.config.display_messages() {
            let _ = writeln!(self.output, "exit");
        }
        let _ = self.output.flush();

        let code = n
            .unwrap_or(self.last_exit_status)
            .code()
            .unwrap_or(1);

        if !self.job_table.is_empty() {
            info!("abandoning {} jobs", self.job_table.len());
        }
        info!("jcsh has shut down");
        process::exit(code & 0xff);
    }
}

impl fmt::Debug for Shell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "interactive: {}\tlast status: {}\n{:?}",
            self.is_interactive, self.last_exit_status, self.job_table
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::thread;
    use std::time::{Duration, Instant};

    use tempfile::TempDir;

    /// Output sink the test can read back while the shell owns the writer.
    #[derive(Clone, Default)]
    struct SharedOutput(Rc<RefCell<Vec<u8>>>);

    impl SharedOutput {
        fn take(&self) -> String {
            let bytes = self.0.borrow_mut().split_off(0);
            String::from_utf8(bytes).expect("output should be UTF-8")
        }
    }

    impl Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn test_shell() -> (Shell, SharedOutput) {
        let output = SharedOutput::default();
        let shell = Shell::with_output(ShellConfig::noninteractive(), Box::new(output.clone()))
            .expect("failed to create shell");
        (shell, output)
    }

    fn run(shell: &mut Shell, line: &str) {
        shell
            .execute_command_string(line)
            .expect("command failed unexpectedly");
    }

    #[test]
    fn test_background_job_returns_immediately_and_reports_done_once() {
        let (mut shell, output) = test_shell();
        let start = Instant::now();
        run(&mut shell, "sleep 1 &");
        assert!(start.elapsed() < Duration::from_millis(900));

        let jobs = shell.get_jobs();
        assert_eq!(jobs.len(), 1);
        let pgid = jobs[0].pgid();
        assert_eq!(
            output.take(),
            format!("[Job 1] Started: sleep (PID: {})\n", pgid)
        );

        let mut notices = String::new();
        for _ in 0..300 {
            shell.do_job_notification().expect("notification failed");
            notices.push_str(&output.take());
            if shell.get_jobs().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(notices, "[Job 1] Done: sleep\n");

        shell.do_job_notification().expect("notification failed");
        assert_eq!(output.take(), "");
    }

    #[test]
    fn test_foreground_pipeline_blocks_and_sets_status() {
        let (mut shell, output) = test_shell();
        let start = Instant::now();
        run(&mut shell, "sleep 0.3 | true");
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(shell.last_exit_status().success());
        assert!(shell.get_jobs().is_empty());
        assert_eq!(output.take(), "");

        run(&mut shell, "false");
        assert_eq!(shell.last_exit_status().code(), Some(1));
    }

    #[test]
    fn test_background_pipeline_is_one_job() {
        let (mut shell, _output) = test_shell();
        run(&mut shell, "sleep 1 | sleep 1 &");
        let jobs = shell.get_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].pids().len(), 2);
        assert_eq!(jobs[0].input(), "sleep 1 | sleep 1");

        let temp_result = signal::killpg(jobs[0].pgid(), Signal::SIGKILL);
        assert!(temp_result.is_ok());
        for _ in 0..300 {
            shell.do_job_notification().expect("notification failed");
            if shell.get_jobs().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert!(shell.get_jobs().is_empty());
    }

    #[test]
    fn test_fg_unknown_job_changes_nothing() {
        let (mut shell, output) = test_shell();
        run(&mut shell, "sleep 2 &");
        output.take();
        let jobs_before = shell.get_jobs();
        let owner_before = shell.foreground_owner();

        run(&mut shell, "fg 7");
        assert_eq!(shell.last_exit_status().code(), Some(1));
        assert_eq!(shell.get_jobs().len(), jobs_before.len());
        assert_eq!(shell.get_jobs()[0].id(), jobs_before[0].id());
        assert_eq!(shell.foreground_owner(), owner_before);
        assert_eq!(output.take(), "");

        let temp_result = signal::killpg(jobs_before[0].pgid(), Signal::SIGKILL);
        assert!(temp_result.is_ok());
        assert_eq!(
            shell.put_job_in_foreground(jobs_before[0].id()).unwrap().code(),
            Some(128 + 9)
        );
    }

    #[test]
    fn test_fg_waits_for_background_job() {
        let (mut shell, output) = test_shell();
        run(&mut shell, "sleep 0.2 &");
        output.take();
        let job_id = shell.get_jobs()[0].id();

        run(&mut shell, &format!("fg {}", job_id));
        assert!(shell.last_exit_status().success());
        assert!(shell.get_jobs().is_empty());
    }

    #[test]
    fn test_fg_and_bg_usage_errors() {
        let (mut shell, _output) = test_shell();
        run(&mut shell, "fg");
        assert_eq!(shell.last_exit_status().code(), Some(2));
        run(&mut shell, "fg one");
        assert_eq!(shell.last_exit_status().code(), Some(2));
        run(&mut shell, "bg");
        assert_eq!(shell.last_exit_status().code(), Some(2));
    }

    #[test]
    fn test_syntax_error_status() {
        let (mut shell, _output) = test_shell();
        run(&mut shell, "echo hi | | wc");
        assert_eq!(shell.last_exit_status().code(), Some(2));
        assert!(shell.get_jobs().is_empty());
    }

    #[test]
    fn test_redirection_error_spawns_nothing() {
        let (mut shell, _output) = test_shell();
        run(&mut shell, "cat < /nonexistent/jcsh/input &");
        assert_eq!(shell.last_exit_status().code(), Some(1));
        assert!(shell.get_jobs().is_empty());
    }

    #[test]
    fn test_full_job_table_refuses_before_spawning() {
        let output = SharedOutput::default();
        let config = ShellConfig::noninteractive().job_table_capacity(1);
        let mut shell =
            Shell::with_output(config, Box::new(output.clone())).expect("failed to create shell");
        let dir = TempDir::new().expect("failed to create temp dir");
        let marker = dir.path().join("marker");

        run(&mut shell, "sleep 2 &");
        run(&mut shell, &format!("touch {} &", marker.display()));
        assert_eq!(shell.last_exit_status().code(), Some(1));
        assert_eq!(shell.get_jobs().len(), 1);
        thread::sleep(Duration::from_millis(100));
        assert!(!marker.exists());

        let pgid = shell.get_jobs()[0].pgid();
        assert!(signal::killpg(pgid, Signal::SIGKILL).is_ok());
        let job_id = shell.get_jobs()[0].id();
        assert!(shell.put_job_in_foreground(job_id).is_ok());
    }

    #[test]
    fn test_jobs_builtin_lists_and_honours_redirection() {
        let (mut shell, output) = test_shell();
        run(&mut shell, "sleep 2 &");
        output.take();
        let job = shell.get_jobs()[0].clone();

        run(&mut shell, "jobs");
        assert_eq!(
            output.take(),
            format!("[1] {} sleep 2 \u{2014} Running\n", job.pgid())
        );

        run(&mut shell, "jobs -p");
        assert_eq!(output.take(), format!("{}\n", job.pgid()));

        run(&mut shell, "jobs -s");
        assert_eq!(output.take(), "");

        let dir = TempDir::new().expect("failed to create temp dir");
        let listing = dir.path().join("jobs.txt");
        run(&mut shell, &format!("jobs > {}", listing.display()));
        assert_eq!(output.take(), "");
        assert_eq!(
            fs::read_to_string(&listing).unwrap(),
            format!("[1] {} sleep 2 \u{2014} Running\n", job.pgid())
        );

        assert!(signal::killpg(job.pgid(), Signal::SIGKILL).is_ok());
        assert!(shell.put_job_in_foreground(job.id()).is_ok());
    }

    #[test]
    fn test_stopped_background_job_resumes_with_bg() {
        let (mut shell, output) = test_shell();
        run(&mut shell, "sleep 2 &");
        output.take();
        let job = shell.get_jobs()[0].clone();

        assert!(signal::killpg(job.pgid(), Signal::SIGSTOP).is_ok());
        let mut notices = String::new();
        for _ in 0..300 {
            shell.do_job_notification().expect("notification failed");
            notices.push_str(&output.take());
            if !notices.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(notices, "[Job 1] Stopped: sleep\n");
        assert_eq!(shell.get_jobs()[0].state(), JobState::Stopped);

        run(&mut shell, "bg 1");
        assert!(shell.last_exit_status().success());
        assert_eq!(shell.get_jobs()[0].state(), JobState::Running);

        assert!(signal::killpg(job.pgid(), Signal::SIGKILL).is_ok());
        assert!(shell.put_job_in_foreground(job.id()).is_ok());
    }

    /// Writes a script that stops itself once, then exits with `status`.
    fn self_stopping_script(dir: &TempDir, status: i32) -> String {
        let script = dir.path().join("stop.sh");
        fs::write(&script, format!("kill -STOP $$\nexit {}\n", status))
            .expect("failed to write script");
        format!("sh {}", script.display())
    }

    #[test]
    fn test_stopped_foreground_job_is_registered_once() {
        let (mut shell, output) = test_shell();
        let dir = TempDir::new().expect("failed to create temp dir");
        let line = self_stopping_script(&dir, 0);

        run(&mut shell, &line);
        assert_eq!(shell.last_exit_status().code(), Some(128 + 19));
        assert_eq!(output.take(), "[Job 1] Stopped: sh\n");

        let jobs = shell.get_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].state(), JobState::Stopped);

        shell.do_job_notification().expect("notification failed");
        assert_eq!(output.take(), "");

        run(&mut shell, "jobs -s");
        assert_eq!(
            output.take(),
            format!("[1] {} {} \u{2014} Stopped\n", jobs[0].pgid(), line)
        );

        assert!(signal::killpg(jobs[0].pgid(), Signal::SIGKILL).is_ok());
        assert!(shell.put_job_in_foreground(jobs[0].id()).is_ok());
    }

    #[test]
    fn test_fg_resumes_stopped_job() {
        let (mut shell, output) = test_shell();
        let dir = TempDir::new().expect("failed to create temp dir");
        let line = self_stopping_script(&dir, 3);

        run(&mut shell, &line);
        assert_eq!(output.take(), "[Job 1] Stopped: sh\n");
        let owner_before = shell.foreground_owner();

        run(&mut shell, "fg 1");
        assert_eq!(shell.last_exit_status().code(), Some(3));
        assert!(shell.get_jobs().is_empty());
        assert_eq!(shell.foreground_owner(), owner_before);
        assert_eq!(output.take(), "");

        shell.do_job_notification().expect("notification failed");
        assert_eq!(output.take(), "");
    }
}

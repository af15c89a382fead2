use std::fmt;
use std::process::ExitStatus;

use nix::{
    sys::{signal::Signal, termios::Termios},
    unistd::Pid,
};

use crate::util::JcshExitStatusExt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u32);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Done,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            JobState::Running => write!(f, "Running"),
            JobState::Stopped => write!(f, "Stopped"),
            JobState::Done => write!(f, "Done"),
        }
    }
}

impl Default for JobState {
    fn default() -> Self {
        JobState::Running
    }
}

/// The processes of one pipeline. The first pid is the group leader and the
/// group id equals the leader's pid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessGroup {
    pub pgid: Pid,
    pub pids: Vec<Pid>,
}

impl ProcessGroup {
    pub fn leader(&self) -> Pid {
        self.pids[0]
    }
}

#[derive(Clone)]
pub struct Job {
    id: JobId,
    input: String,
    program: String,
    group: ProcessGroup,
    state: JobState,
    last_status_code: Option<ExitStatus>,
    notified_stopped_job: bool,
    tmodes: Option<Termios>,
}

impl Job {
    pub fn new(id: JobId, input: &str, program: &str, group: ProcessGroup) -> Self {
        Self {
            id,
            input: input.to_string(),
            program: program.to_string(),
            group,
            state: JobState::Running,
            last_status_code: None,
            notified_stopped_job: false,
            tmodes: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Full command text, as listed by `jobs`.
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Leader's program name, as used in job notices.
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn group(&self) -> &ProcessGroup {
        &self.group
    }

    pub fn pgid(&self) -> Pid {
        self.group.pgid
    }

    pub fn leader(&self) -> Pid {
        self.group.leader()
    }

    pub fn pids(&self) -> &[Pid] {
        &self.group.pids
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn last_status_code(&self) -> Option<ExitStatus> {
        self.last_status_code
    }

    pub fn notified_stopped_job(&self) -> bool {
        self.notified_stopped_job
    }

    pub fn set_notified_stopped_job(&mut self, notified_stopped_job: bool) {
        self.notified_stopped_job = notified_stopped_job;
    }

    pub fn tmodes(&self) -> Option<&Termios> {
        self.tmodes.as_ref()
    }

    pub fn set_tmodes(&mut self, tmodes: Option<Termios>) {
        self.tmodes = tmodes;
    }

    pub fn mark_done(&mut self, status_code: ExitStatus) {
        self.state = JobState::Done;
        self.last_status_code = Some(status_code);
    }

    pub fn mark_stopped(&mut self, signal: Signal) {
        self.state = JobState::Stopped;
        self.last_status_code = Some(get_status_code_for_signal(signal));
        self.notified_stopped_job = false;
    }

    pub fn mark_running(&mut self) {
        self.state = JobState::Running;
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "id: {}\tpgid: {}\tstate: {}\tinput: {}",
            self.id, self.group.pgid, self.state, self.input
        )
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} \u{2014} {}",
            self.id, self.group.pgid, self.input, self.state
        )
    }
}

/// Shell convention: a process killed or stopped by signal N reports 128 + N.
pub fn get_status_code_for_signal(signal: Signal) -> ExitStatus {
    ExitStatus::from_status(128 + (signal as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(pids: &[i32]) -> ProcessGroup {
        ProcessGroup {
            pgid: Pid::from_raw(pids[0]),
            pids: pids.iter().map(|&p| Pid::from_raw(p)).collect(),
        }
    }

    #[test]
    fn test_new_job_is_running() {
        let job = Job::new(JobId(1), "sleep 5", "sleep", group(&[100]));
        assert_eq!(job.state(), JobState::Running);
        assert_eq!(job.leader(), Pid::from_raw(100));
        assert_eq!(job.last_status_code(), None);
    }

    #[test]
    fn test_job_state_transitions() {
        let mut job = Job::new(JobId(1), "vim", "vim", group(&[100]));
        job.mark_stopped(Signal::SIGTSTP);
        assert_eq!(job.state(), JobState::Stopped);
        assert_eq!(job.last_status_code().and_then(|s| s.code()), Some(148));

        job.mark_running();
        assert_eq!(job.state(), JobState::Running);

        job.mark_done(ExitStatus::from_status(3));
        assert_eq!(job.state(), JobState::Done);
        assert_eq!(job.last_status_code().and_then(|s| s.code()), Some(3));
    }

    #[test]
    fn test_job_tracks_all_members() {
        let job = Job::new(JobId(2), "cmd1 | cmd2", "cmd1", group(&[200, 201]));
        assert_eq!(job.pids(), &[Pid::from_raw(200), Pid::from_raw(201)]);
        assert_eq!(job.leader(), Pid::from_raw(200));
    }

    #[test]
    fn test_job_display() {
        let job = Job::new(JobId(3), "sleep 5", "sleep", group(&[4242]));
        assert_eq!(job.to_string(), "[3] 4242 sleep 5 \u{2014} Running");
    }

    #[test]
    fn test_status_code_for_signal() {
        assert_eq!(
            get_status_code_for_signal(Signal::SIGKILL).code(),
            Some(128 + 9)
        );
    }
}

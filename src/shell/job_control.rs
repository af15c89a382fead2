use std::collections::BTreeMap;
use std::fmt;
use std::process::ExitStatus;

use failure::Fail;
use log::{debug, info};
use nix::{
    errno::Errno,
    sys::{
        signal::Signal,
        wait::{self, WaitPidFlag, WaitStatus},
    },
    unistd::Pid,
};

use crate::core::job::{self, Job, JobId, JobState, ProcessGroup};
use crate::errors::{Error, ErrorKind, Result};
use crate::shell::reaper::{ChildEvent, ChildState};
use crate::util::JcshExitStatusExt;

/// A job state change to report to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    Started {
        id: JobId,
        program: String,
        pgid: Pid,
    },
    Stopped {
        id: JobId,
        program: String,
    },
    Done {
        id: JobId,
        program: String,
    },
}

impl Notice {
    pub fn started(job: &Job) -> Notice {
        Notice::Started {
            id: job.id(),
            program: job.program().to_string(),
            pgid: job.pgid(),
        }
    }

    pub fn stopped(job: &Job) -> Notice {
        Notice::Stopped {
            id: job.id(),
            program: job.program().to_string(),
        }
    }

    pub fn done(job: &Job) -> Notice {
        Notice::Done {
            id: job.id(),
            program: job.program().to_string(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Notice::Started {
                id,
                ref program,
                pgid,
            } => write!(f, "[Job {}] Started: {} (PID: {})", id, program, pgid),
            Notice::Stopped { id, ref program } => write!(f, "[Job {}] Stopped: {}", id, program),
            Notice::Done { id, ref program } => write!(f, "[Job {}] Done: {}", id, program),
        }
    }
}

/// Registry of background and stopped jobs, in launch order.
pub struct JobTable {
    jobs: BTreeMap<JobId, Job>,
    capacity: usize,
}

impl JobTable {
    pub fn with_capacity(capacity: usize) -> JobTable {
        JobTable {
            jobs: BTreeMap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Fails with `JobTableFull` if another job cannot be registered.
    pub fn ensure_capacity(&self) -> Result<()> {
        if self.jobs.len() >= self.capacity {
            return Err(Error::job_table_full(self.capacity));
        }
        Ok(())
    }

    /// Adds a running job for `group`. Its id is one more than the highest id in the table.
    pub fn register(&mut self, group: ProcessGroup, input: &str, program: &str) -> Result<JobId> {
        self.ensure_capacity()?;
        let job_id = self.next_job_id();
        info!("registering job [{}] for process group {}", job_id, group.pgid);
        self.jobs
            .insert(job_id, Job::new(job_id, input, program, group));
        Ok(job_id)
    }

    pub fn list(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn lookup(&self, job_id: JobId) -> Result<&Job> {
        self.jobs
            .get(&job_id)
            .ok_or_else(|| Error::no_such_job(job_id))
    }

    pub fn lookup_mut(&mut self, job_id: JobId) -> Result<&mut Job> {
        self.jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::no_such_job(job_id))
    }

    pub fn remove(&mut self, job_id: JobId) -> Option<Job> {
        debug!("removing job [{}]", job_id);
        self.jobs.remove(&job_id)
    }

    /// Process groups of every tracked job.
    pub fn pgids(&self) -> Vec<Pid> {
        self.jobs.values().map(Job::pgid).collect()
    }

    /// Marks the job led by `pid` as Done.
    pub fn mark_done(&mut self, pid: Pid, status: ExitStatus) -> Option<JobId> {
        let job = self.find_job_led_by(pid)?;
        debug!("job [{}] done with {}", job.id(), status);
        job.mark_done(status);
        Some(job.id())
    }

    /// Marks the job led by `pid` as Stopped.
    pub fn mark_stopped(&mut self, pid: Pid, signal: Signal) -> Option<JobId> {
        let job = self.find_job_led_by(pid)?;
        debug!("job [{}] stopped by {:?}", job.id(), signal);
        job.mark_stopped(signal);
        Some(job.id())
    }

    pub fn mark_running(&mut self, job_id: JobId) -> Result<()> {
        self.lookup_mut(job_id)?.mark_running();
        Ok(())
    }

    /// Applies one collected child state change. Changes of processes other than a job's leader
    /// are ignored.
    pub fn apply(&mut self, event: ChildEvent) {
        let pid = event.pid;
        match event.state {
            ChildState::Exited(code) => {
                self.mark_done(pid, ExitStatus::from_status(code));
            }
            ChildState::Signaled(signal) => {
                self.mark_done(pid, job::get_status_code_for_signal(signal));
            }
            ChildState::Stopped(signal) => {
                self.mark_stopped(pid, signal);
            }
            ChildState::Continued => {
                if let Some(job) = self.find_job_led_by(pid) {
                    job.mark_running();
                }
            }
        }
    }

    /// Collects the notices owed to the user: every Done job once, after which it is removed,
    /// and every stop once.
    pub fn take_notifications(&mut self) -> Vec<Notice> {
        let mut notices = Vec::new();
        let mut done = Vec::new();
        for job in self.jobs.values_mut() {
            match job.state() {
                JobState::Done => {
                    notices.push(Notice::done(job));
                    done.push(job.id());
                }
                JobState::Stopped if !job.notified_stopped_job() => {
                    notices.push(Notice::stopped(job));
                    job.set_notified_stopped_job(true);
                }
                _ => (),
            }
        }
        for job_id in done {
            self.remove(job_id);
        }
        notices
    }

    fn next_job_id(&self) -> JobId {
        self.jobs
            .keys()
            .next_back()
            .map_or(JobId(1), |&JobId(id)| JobId(id + 1))
    }

    fn find_job_led_by(&mut self, pid: Pid) -> Option<&mut Job> {
        self.jobs.values_mut().find(|job| job.leader() == pid)
    }
}

impl fmt::Debug for JobTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{} jobs\tcapacity: {}", self.jobs.len(), self.capacity)?;
        for job in self.jobs.values() {
            writeln!(f, "{:?}", job)?;
        }

        Ok(())
    }
}

/// How a foreground wait ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every member terminated; the status is the leader's.
    Exited(ExitStatus),
    /// A member stopped.
    Stopped(Signal),
}

/// Blocks until every member of `group` has terminated or one of them stops.
pub fn wait_for_group(group: &ProcessGroup) -> Result<WaitOutcome> {
    let target = Pid::from_raw(-group.pgid.as_raw());
    let mut leader_status = None;
    let mut last_status = None;

    loop {
        let status = match wait::waitpid(target, Some(WaitPidFlag::WUNTRACED)) {
            Ok(WaitStatus::Exited(pid, code)) => (pid, ExitStatus::from_status(code)),
            Ok(WaitStatus::Signaled(pid, signal, _)) => {
                (pid, job::get_status_code_for_signal(signal))
            }
            Ok(WaitStatus::Stopped(pid, signal)) => {
                debug!("{} was signaled to stop {:?}", pid, signal);
                return Ok(WaitOutcome::Stopped(signal));
            }
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => break,
            Err(e) => return Err(e.context(ErrorKind::Nix).into()),
        };

        debug!("{} terminated with {}", status.0, status.1);
        if status.0 == group.leader() {
            leader_status = Some(status.1);
        }
        last_status = Some(status.1);
    }

    Ok(WaitOutcome::Exited(
        leader_status
            .or(last_status)
            .unwrap_or_else(ExitStatus::from_success),
    ))
}

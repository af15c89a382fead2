//! Asynchronous collection of child state changes.
//!
//! The `SIGCHLD` handler reaps every pending child with `WNOHANG` and stages one `ChildEvent` per
//! state change in a fixed ring of atomics. It never allocates, prints, or touches the job table.
//! The main loop drains the ring once per command cycle and applies the events itself.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use failure::{Fail, ResultExt};
use log::{debug, warn};
use nix::{
    errno::Errno,
    sys::{
        signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal},
        wait::{self, WaitPidFlag, WaitStatus},
    },
    unistd::Pid,
};

use crate::errors::{Error, ErrorKind, Result};

const STAGING_CAPACITY: usize = 256;

const KIND_EXITED: u64 = 1;
const KIND_SIGNALED: u64 = 2;
const KIND_STOPPED: u64 = 3;
const KIND_CONTINUED: u64 = 4;

static STAGED: StagingRing = StagingRing::new();
static INSTALLED: AtomicBool = AtomicBool::new(false);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildState {
    Exited(i32),
    Signaled(Signal),
    Stopped(Signal),
    Continued,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChildEvent {
    pub pid: Pid,
    pub state: ChildState,
}

impl ChildEvent {
    pub fn from_wait_status(status: WaitStatus) -> Option<ChildEvent> {
        let (pid, state) = match status {
            WaitStatus::Exited(pid, code) => (pid, ChildState::Exited(code)),
            WaitStatus::Signaled(pid, signal, _) => (pid, ChildState::Signaled(signal)),
            WaitStatus::Stopped(pid, signal) => (pid, ChildState::Stopped(signal)),
            WaitStatus::Continued(pid) => (pid, ChildState::Continued),
            _ => return None,
        };
        Some(ChildEvent { pid, state })
    }

    /// Packs the event as `kind << 56 | value << 32 | pid`.
    fn encode(self) -> u64 {
        let (kind, value) = match self.state {
            ChildState::Exited(code) => (KIND_EXITED, code as u8),
            ChildState::Signaled(signal) => (KIND_SIGNALED, signal as i32 as u8),
            ChildState::Stopped(signal) => (KIND_STOPPED, signal as i32 as u8),
            ChildState::Continued => (KIND_CONTINUED, 0),
        };
        kind << 56 | u64::from(value) << 32 | u64::from(self.pid.as_raw() as u32)
    }

    fn decode(raw: u64) -> Option<ChildEvent> {
        let pid = Pid::from_raw(raw as u32 as i32);
        let value = (raw >> 32) as u8;
        let state = match raw >> 56 {
            KIND_EXITED => ChildState::Exited(i32::from(value)),
            KIND_SIGNALED => ChildState::Signaled(Signal::try_from(i32::from(value)).ok()?),
            KIND_STOPPED => ChildState::Stopped(Signal::try_from(i32::from(value)).ok()?),
            KIND_CONTINUED => ChildState::Continued,
            _ => return None,
        };
        Some(ChildEvent { pid, state })
    }
}

/// Single-producer single-consumer ring. The producer is the signal handler, or the main loop
/// while `SIGCHLD` is blocked; the consumer is always the main loop.
struct StagingRing {
    slots: [AtomicU64; STAGING_CAPACITY],
    head: AtomicUsize,
    tail: AtomicUsize,
    overflowed: AtomicBool,
}

impl StagingRing {
    #[allow(clippy::declare_interior_mutable_const)]
    const fn new() -> StagingRing {
        const EMPTY_SLOT: AtomicU64 = AtomicU64::new(0);
        StagingRing {
            slots: [EMPTY_SLOT; STAGING_CAPACITY],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            overflowed: AtomicBool::new(false),
        }
    }

    fn has_room(&self) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head) < STAGING_CAPACITY
    }

    fn push(&self, event: ChildEvent) -> bool {
        if !self.has_room() {
            self.overflowed.store(true, Ordering::Release);
            return false;
        }
        let tail = self.tail.load(Ordering::Relaxed);
        self.slots[tail % STAGING_CAPACITY].store(event.encode(), Ordering::Relaxed);
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    fn pop(&self) -> Option<ChildEvent> {
        loop {
            let head = self.head.load(Ordering::Relaxed);
            if head == self.tail.load(Ordering::Acquire) {
                return None;
            }
            let raw = self.slots[head % STAGING_CAPACITY].load(Ordering::Relaxed);
            self.head.store(head.wrapping_add(1), Ordering::Release);
            if let Some(event) = ChildEvent::decode(raw) {
                return Some(event);
            }
        }
    }

    fn take_overflow(&self) -> bool {
        self.overflowed.swap(false, Ordering::AcqRel)
    }
}

/// Reaps every pending state change of `target` (any child when `None`) without blocking.
/// Stops early, leaving children unreaped, once `stage` refuses an event.
fn collect<F>(target: Option<Pid>, mut stage: F)
where
    F: FnMut(ChildEvent) -> bool,
{
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    loop {
        match wait::waitpid(target, Some(flags)) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(status) => {
                if let Some(event) = ChildEvent::from_wait_status(status) {
                    if !stage(event) {
                        break;
                    }
                }
            }
        }
    }
}

extern "C" fn handle_sigchld(_: libc::c_int) {
    let saved_errno = Errno::last_raw();
    if STAGED.has_room() {
        collect(None, |event| STAGED.push(event) && STAGED.has_room());
    }
    if !STAGED.has_room() {
        STAGED.overflowed.store(true, Ordering::Release);
    }
    Errno::set_raw(saved_errno);
}

/// Blocks `SIGCHLD` for the calling thread until dropped.
#[derive(Debug)]
pub struct SigchldMask {
    previous: SigSet,
}

impl SigchldMask {
    pub fn block() -> Result<SigchldMask> {
        let mut set = SigSet::empty();
        set.add(Signal::SIGCHLD);
        let mut previous = SigSet::empty();
        signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&set), Some(&mut previous))
            .context(ErrorKind::Nix)?;
        Ok(SigchldMask { previous })
    }
}

impl Drop for SigchldMask {
    fn drop(&mut self) {
        let temp_result = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None);
        log_if_err!(temp_result, "failed to restore signal mask");
    }
}

#[derive(Debug)]
pub struct Reaper {
    installed: bool,
}

impl Reaper {
    /// Installs the `SIGCHLD` handler. At most one reaper may be installed per process.
    pub fn install() -> Result<Reaper> {
        if INSTALLED.swap(true, Ordering::AcqRel) {
            warn!("SIGCHLD handler already installed");
            return Err(Error::from(ErrorKind::Nix));
        }

        let action = SigAction::new(
            SigHandler::Handler(handle_sigchld),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        let result = unsafe { signal::sigaction(Signal::SIGCHLD, &action) };
        if let Err(e) = result {
            INSTALLED.store(false, Ordering::Release);
            return Err(e.context(ErrorKind::Nix).into());
        }

        debug!("installed SIGCHLD handler");
        Ok(Reaper { installed: true })
    }

    /// A reaper without a signal handler: state changes are collected synchronously, one
    /// process group at a time, during `drain`.
    pub fn manual() -> Reaper {
        Reaper { installed: false }
    }

    /// Returns every state change staged since the last drain.
    ///
    /// `groups` names the process groups the caller tracks; they are polled directly when no
    /// handler is installed, so children the shell does not own are never reaped.
    pub fn drain<I>(&self, groups: I) -> Result<Vec<ChildEvent>>
    where
        I: IntoIterator<Item = Pid>,
    {
        let mut events = Vec::new();
        let _mask = SigchldMask::block()?;

        if !self.installed {
            for pgid in groups {
                collect(Some(Pid::from_raw(-pgid.as_raw())), |event| {
                    events.push(event);
                    true
                });
            }
            return Ok(events);
        }

        loop {
            while let Some(event) = STAGED.pop() {
                events.push(event);
            }
            if !STAGED.take_overflow() {
                break;
            }
            warn!("child state staging buffer overflowed, collecting the remainder");
            collect(None, |event| {
                events.push(event);
                true
            });
        }

        Ok(events)
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        if self.installed {
            let temp_result = unsafe { signal::signal(Signal::SIGCHLD, SigHandler::SigDfl) };
            log_if_err!(temp_result, "failed to reset SIGCHLD handler");
            INSTALLED.store(false, Ordering::Release);
        }
    }
}

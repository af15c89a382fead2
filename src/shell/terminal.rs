//! Ownership of the controlling terminal.
//!
//! Exactly one process group is in the foreground at a time: the shell's own, or the group of the
//! pipeline the shell is waiting on.

use std::cell::Cell;

use failure::ResultExt;
use log::debug;
use nix::{
    sys::{
        signal::{self, SigHandler, Signal},
        termios::{self, SetArg, Termios},
    },
    unistd::{self, Pid},
};

use crate::errors::{ErrorKind, Result};
use crate::util;

/// Terminal-generated signals the shell ignores for itself and children reset before exec.
pub const JOB_CONTROL_SIGNALS: [Signal; 5] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
];

#[derive(Debug)]
pub struct TerminalController {
    /// `false` when the shell is not interactive; ownership is then only tracked.
    enabled: bool,
    shell_pgid: Pid,
    owner: Cell<Pid>,
    shell_tmodes: Option<Termios>,
}

impl TerminalController {
    /// Puts the shell in its own process group in the foreground of its terminal and starts
    /// ignoring job-control signals.
    pub fn acquire() -> Result<TerminalController> {
        let shell_terminal = util::get_terminal();

        // Loop until the shell is in the foreground
        loop {
            let shell_pgid = unistd::getpgrp();
            if unistd::tcgetpgrp(shell_terminal).context(ErrorKind::Nix)? == shell_pgid {
                break;
            }
            signal::kill(Pid::from_raw(-shell_pgid.as_raw()), Signal::SIGTTIN)
                .context(ErrorKind::Nix)?;
        }

        // Ignore interactive and job-control signals
        for &signal in &JOB_CONTROL_SIGNALS {
            unsafe { signal::signal(signal, SigHandler::SigIgn) }.context(ErrorKind::Nix)?;
        }

        // Put ourselves in our own process group; a session leader already is its own group
        let shell_pgid = Pid::this();
        if unistd::getpgrp() != shell_pgid {
            unistd::setpgid(shell_pgid, shell_pgid).context(ErrorKind::Nix)?;
        }

        // Grab control of the terminal and save default terminal attributes
        unistd::tcsetpgrp(shell_terminal, shell_pgid).context(ErrorKind::Nix)?;
        let shell_tmodes = termios::tcgetattr(shell_terminal).ok();

        debug!("acquired terminal for process group {}", shell_pgid);
        Ok(TerminalController {
            enabled: true,
            shell_pgid,
            owner: Cell::new(shell_pgid),
            shell_tmodes,
        })
    }

    /// A controller for a shell without job control.
    pub fn disabled() -> TerminalController {
        let shell_pgid = unistd::getpgrp();
        TerminalController {
            enabled: false,
            shell_pgid,
            owner: Cell::new(shell_pgid),
            shell_tmodes: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Process group currently holding the terminal.
    pub fn foreground_owner(&self) -> Pid {
        self.owner.get()
    }

    /// Makes `pgid` the terminal's foreground group. The shell gets the terminal back when the
    /// returned guard is restored or dropped.
    pub fn transfer_to(&self, pgid: Pid) -> Result<ForegroundGuard> {
        debug!("setting terminal process group to {}", pgid);
        if self.enabled {
            unistd::tcsetpgrp(util::get_terminal(), pgid).context(ErrorKind::Nix)?;
        }
        self.owner.set(pgid);
        Ok(ForegroundGuard {
            terminal: self,
            restored: false,
        })
    }

    /// Returns the terminal to the shell's process group and restores the shell's terminal modes.
    ///
    /// Returns the modes the foreground job left the terminal in, so a stopped job can get them
    /// back when it is resumed.
    pub fn restore_shell(&self) -> Result<Option<Termios>> {
        debug!("putting shell back into foreground and restoring shell's terminal modes");
        let mut job_tmodes = None;
        if self.enabled {
            let shell_terminal = util::get_terminal();
            job_tmodes = termios::tcgetattr(shell_terminal).ok();
            unistd::tcsetpgrp(shell_terminal, self.shell_pgid).context(ErrorKind::Nix)?;
            if let Some(ref tmodes) = self.shell_tmodes {
                let temp_result = termios::tcsetattr(shell_terminal, SetArg::TCSADRAIN, tmodes);
                log_if_err!(temp_result, "error restoring terminal configuration for shell");
            }
        }
        self.owner.set(self.shell_pgid);
        Ok(job_tmodes)
    }

    /// Applies the terminal modes a stopped job had before it is resumed.
    pub fn set_job_modes(&self, tmodes: &Termios) {
        if self.enabled {
            let temp_result =
                termios::tcsetattr(util::get_terminal(), SetArg::TCSADRAIN, tmodes);
            log_if_err!(temp_result, "error setting terminal configuration for job");
        }
    }
}

/// Gives the terminal back to the shell when dropped.
#[derive(Debug)]
pub struct ForegroundGuard<'a> {
    terminal: &'a TerminalController,
    restored: bool,
}

impl<'a> ForegroundGuard<'a> {
    pub fn restore(mut self) -> Result<Option<Termios>> {
        self.restored = true;
        self.terminal.restore_shell()
    }
}

impl<'a> Drop for ForegroundGuard<'a> {
    fn drop(&mut self) {
        if !self.restored {
            let temp_result = self.terminal.restore_shell();
            log_if_err!(temp_result, "failed to put shell back into the foreground");
        }
    }
}

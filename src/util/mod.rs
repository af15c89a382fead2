use std::os::unix::io::BorrowedFd;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// Jcsh Utility Extensions for `ExitStatus`
pub trait JcshExitStatusExt {
    /// Create an ExitStatus to indicate *successful* program execution.
    fn from_success() -> Self;

    /// Create an ExitStatus to indicate *unsuccessful* program execution.
    fn from_failure() -> Self;

    /// Create an ExitStatus from a status code
    fn from_status(code: i32) -> Self;
}

impl JcshExitStatusExt for ExitStatus {
    /// # Examples
    /// ```rust
    /// use jcsh::JcshExitStatusExt;
    /// use std::process::ExitStatus;
    /// assert!(ExitStatus::from_success().success());
    /// ```
    fn from_success() -> Self {
        ExitStatus::from_status(0)
    }

    /// # Examples
    /// ```rust
    /// use jcsh::JcshExitStatusExt;
    /// use std::process::ExitStatus;
    /// assert!(!ExitStatus::from_failure().success());
    /// ```
    fn from_failure() -> Self {
        ExitStatus::from_status(1)
    }

    /// # Examples
    /// ```rust
    /// use jcsh::JcshExitStatusExt;
    /// use std::process::ExitStatus;
    /// assert!(ExitStatus::from_status(0).success());
    /// assert_eq!(ExitStatus::from_status(127).code(), Some(127));
    /// ```
    fn from_status(code: i32) -> Self {
        ExitStatus::from_raw((code & 0xff) << 8)
    }
}

/// The controlling terminal, as seen through the shell's stdin.
pub fn get_terminal() -> BorrowedFd<'static> {
    // stdin stays open for the lifetime of the shell process.
    unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) }
}

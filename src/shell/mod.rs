pub use self::shell::Shell;

pub mod builtins;
pub mod execute_command;
pub mod job_control;
pub mod reaper;
pub mod shell;
pub mod terminal;

use crate::core::parser::{DEFAULT_MAX_LINE_LENGTH, DEFAULT_MAX_STAGES};

/// Default number of jobs the shell tracks at once.
pub const DEFAULT_JOB_TABLE_CAPACITY: usize = 64;

/// Policy object to control a Shell's behavior
#[derive(Debug, Copy, Clone)]
pub struct ShellConfig {
    /// Determines if job control (terminal handoff, `SIGCHLD` reaping, stop handling) is
    /// attempted. It is only enabled when stdin is also a terminal.
    enable_job_control: bool,

    /// Determines if some messages (e.g. the prompt and "exit") should be displayed.
    display_messages: bool,

    max_pipeline_stages: usize,
    job_table_capacity: usize,
    max_line_length: usize,
}

impl ShellConfig {
    /// Creates an interactive shell.
    ///
    /// # Complete List
    /// - Job Control is enabled
    /// - The prompt and some additional messages are displayed
    pub fn interactive() -> Self {
        Self {
            enable_job_control: true,
            display_messages: true,
            ..Default::default()
        }
    }

    /// Creates a noninteractive shell, e.g. for `-c` and scripts.
    ///
    /// # Complete List
    /// - Job Control is disabled. Pipelines still get their own process group, but the terminal
    ///   is never handed over.
    /// - No prompt, fewer messages are displayed
    pub fn noninteractive() -> Self {
        Default::default()
    }

    /// Maximum number of `|`-separated stages in one line.
    pub fn max_pipeline_stages(mut self, max_pipeline_stages: usize) -> Self {
        self.max_pipeline_stages = max_pipeline_stages;
        self
    }

    /// Maximum number of background and stopped jobs tracked at once.
    pub fn job_table_capacity(mut self, job_table_capacity: usize) -> Self {
        self.job_table_capacity = job_table_capacity;
        self
    }

    /// Maximum length, in bytes, of one command line.
    pub fn max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    pub fn enable_job_control(&self) -> bool {
        self.enable_job_control
    }

    pub fn display_messages(&self) -> bool {
        self.display_messages
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            enable_job_control: false,
            display_messages: false,
            max_pipeline_stages: DEFAULT_MAX_STAGES,
            job_table_capacity: DEFAULT_JOB_TABLE_CAPACITY,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

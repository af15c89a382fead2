#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputMode {
    /// `>`: create the file, discarding prior contents.
    Truncate,
    /// `>>`: create the file if needed, preserving prior contents.
    Append,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputRedirect {
    pub path: String,
    pub mode: OutputMode,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Redirect {
    Input(String),
    Output(OutputRedirect),
}

/// One stage of a pipeline.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Command {
    pub argv: Vec<String>,
    pub stdin: Option<String>,
    pub stdout: Option<OutputRedirect>,
}

impl Command {
    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PipelineSpec {
    /// Command text as typed, without the trailing `&`.
    pub input: String,
    pub stages: Vec<Command>,
    pub background: bool,
}

impl PipelineSpec {
    /// Input redirection of the first stage; a pipe always wins on later stages.
    pub fn stdin_redirect(&self) -> Option<&str> {
        self.stages.first().and_then(|c| c.stdin.as_ref().map(String::as_str))
    }

    /// Output redirection of the last stage; a pipe always wins on earlier stages.
    pub fn stdout_redirect(&self) -> Option<&OutputRedirect> {
        self.stages.last().and_then(|c| c.stdout.as_ref())
    }

    /// Program name of the group leader, used in job notices.
    pub fn program(&self) -> &str {
        self.stages[0].program()
    }
}

#[derive(Debug, Default)]
pub struct CommandBuilder {
    command: Command,
}

impl CommandBuilder {
    /// Repeated redirections of one direction: the last one wins.
    pub fn update(mut self, part: CommandPart) -> CommandBuilder {
        match part {
            CommandPart::Word(w) => self.command.argv.push(w),
            CommandPart::Redirect(Redirect::Input(path)) => self.command.stdin = Some(path),
            CommandPart::Redirect(Redirect::Output(output)) => {
                self.command.stdout = Some(output)
            }
        };

        self
    }

    pub fn is_empty(&self) -> bool {
        self.command.argv.is_empty()
    }

    pub fn build(self) -> Command {
        self.command
    }
}

#[derive(Debug)]
pub enum CommandPart {
    Word(String),
    Redirect(Redirect),
}

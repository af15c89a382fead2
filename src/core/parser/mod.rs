//! Command line parser
//!
//! A single pass turns a line into a `PipelineSpec`: the line is split on `|` into stages and each
//! stage is tokenized into words and `<`, `>`, `>>` redirections. A trailing `&` marks the whole
//! pipeline as a background job.

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use log::debug;

use self::ast::{CommandBuilder, CommandPart, OutputMode, OutputRedirect, Redirect};
pub use self::ast::{Command, PipelineSpec};
use crate::errors::{Error, Result};

pub mod ast;

pub const DEFAULT_MAX_STAGES: usize = 64;
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// A redirection operator with no filename after it.
    MissingRedirectionTarget(String),
    EmptyStage,
    TooManyStages(usize),
    LineTooLong(usize),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ParseError::MissingRedirectionTarget(ref operator) => {
                write!(f, "expected a filename after '{}'", operator)
            }
            ParseError::EmptyStage => write!(f, "empty command in pipeline"),
            ParseError::TooManyStages(max) => {
                write!(f, "pipeline has more than {} commands", max)
            }
            ParseError::LineTooLong(max) => write!(f, "input exceeds {} bytes", max),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Parser {
    max_stages: usize,
    max_line_length: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Parser::new(DEFAULT_MAX_STAGES, DEFAULT_MAX_LINE_LENGTH)
    }
}

impl Parser {
    pub fn new(max_stages: usize, max_line_length: usize) -> Self {
        Self {
            max_stages,
            max_line_length,
        }
    }

    pub fn parse(&self, line: &str) -> Result<PipelineSpec> {
        let result = self.parse_pipeline(line.trim()).map_err(Error::syntax);
        debug!("parsed PipelineSpec: {:?}", result);
        result
    }

    fn parse_pipeline(&self, line: &str) -> ::std::result::Result<PipelineSpec, ParseError> {
        if line.len() > self.max_line_length {
            return Err(ParseError::LineTooLong(self.max_line_length));
        }

        let (body, background) = match split_background(line) {
            Some(body) => (body, true),
            None => (line, false),
        };

        if body.split('|').count() > self.max_stages {
            return Err(ParseError::TooManyStages(self.max_stages));
        }

        let stages = body
            .split('|')
            .map(parse_stage)
            .collect::<::std::result::Result<Vec<_>, _>>()?;

        Ok(PipelineSpec {
            input: body.to_string(),
            stages,
            background,
        })
    }
}

/// Strips a trailing `&`, returning the rest of the line.
fn split_background(line: &str) -> Option<&str> {
    if line.ends_with('&') {
        Some(line[..line.len() - 1].trim_end())
    } else {
        None
    }
}

fn parse_stage(segment: &str) -> ::std::result::Result<Command, ParseError> {
    let mut builder = CommandBuilder::default();
    let mut chars = segment.chars().peekable();
    let mut word = String::new();

    while let Some(c) = chars.next() {
        match c {
            '<' | '>' => {
                if !word.is_empty() {
                    builder = builder.update(CommandPart::Word(word.split_off(0)));
                }
                let redirect = parse_redirect(c, &mut chars)?;
                builder = builder.update(CommandPart::Redirect(redirect));
            }
            c if c.is_whitespace() => {
                if !word.is_empty() {
                    builder = builder.update(CommandPart::Word(word.split_off(0)));
                }
            }
            c => word.push(c),
        }
    }
    if !word.is_empty() {
        builder = builder.update(CommandPart::Word(word));
    }

    if builder.is_empty() {
        return Err(ParseError::EmptyStage);
    }

    Ok(builder.build())
}

fn parse_redirect(
    operator: char,
    chars: &mut Peekable<Chars>,
) -> ::std::result::Result<Redirect, ParseError> {
    let append = operator == '>' && chars.peek() == Some(&'>');
    if append {
        chars.next();
    }

    while chars.peek().map_or(false, |c| c.is_whitespace()) {
        chars.next();
    }

    let mut target = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || c == '<' || c == '>' {
            break;
        }
        target.push(c);
        chars.next();
    }

    let operator = if append {
        ">>".to_string()
    } else {
        operator.to_string()
    };
    if target.is_empty() {
        return Err(ParseError::MissingRedirectionTarget(operator));
    }

    Ok(match operator.as_str() {
        "<" => Redirect::Input(target),
        ">>" => Redirect::Output(OutputRedirect {
            path: target,
            mode: OutputMode::Append,
        }),
        _ => Redirect::Output(OutputRedirect {
            path: target,
            mode: OutputMode::Truncate,
        }),
    })
}

//! Turning the tokens of one command into a running program.
//!
//! The pipeline executor hands each command to a [`CommandRunner`] twice. Before forking,
//! the runner prepares the command in the parent, where it is free to allocate. Within the
//! forked child, once the standard streams are wired into the pipeline, the runner replaces
//! the child's process image with the prepared command, and therefore never returns on
//! success.
//!
//! A child forked from a multithreaded program may not allocate or take a lock: another
//! thread could have held the lock at the moment of the fork, and it would never be
//! released in the child. This is why the work is split in two.

use crate::{
    parser::Segment,
    pipe_exec::streams::{self, RedirectionError, StdStream},
    status::Status,
    sys::{self, Argv, Errno},
};
use std::ffi::CString;
use thiserror::Error;

/// Why a command could not be prepared.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("empty command")]
    EmptyCommand,
    #[error("argument contains a nul byte: {0:?}")]
    InvalidArgument(String),
    #[error("expected a file name after '{0}'")]
    MissingRedirectTarget(&'static str),
}

impl RunnerError {
    /// The exit status of a child whose command could not be prepared this way.
    pub fn status(&self) -> Status {
        match self {
            RunnerError::EmptyCommand | RunnerError::InvalidArgument(_) => Status::COULD_NOT_EXEC,
            RunnerError::MissingRedirectTarget(_) => Status::FAILURE,
        }
    }
}

/// Why a prepared command could not be started. Raised within the forked child, so it only
/// borrows from the prepared command.
#[derive(Debug, Error)]
pub enum ExecError<'a> {
    #[error("command not found: {0}")]
    NoSuchCommand(&'a str),
    #[error("{name}: could not execute: {source}")]
    CouldNotExec {
        name:   &'a str,
        #[source]
        source: Errno,
    },
    #[error("failed to redirect {stream} to '{file}': {source}")]
    OpenRedirect {
        file:   &'a str,
        stream: StdStream,
        #[source]
        source: Errno,
    },
    #[error("{0}")]
    Redirection(#[from] RedirectionError),
}

impl<'a> ExecError<'a> {
    /// The exit status of a child whose command failed to start this way.
    pub fn status(&self) -> Status {
        match self {
            ExecError::NoSuchCommand(_) => Status::NO_SUCH_COMMAND,
            ExecError::CouldNotExec { .. } => Status::COULD_NOT_EXEC,
            ExecError::OpenRedirect { .. } | ExecError::Redirection(_) => Status::FAILURE,
        }
    }
}

pub trait CommandRunner {
    /// What [`CommandRunner::prepare`] builds for [`CommandRunner::exec`] to run.
    type Prepared;

    /// Builds everything needed to start `segment`. Called in the parent before forking.
    ///
    /// An error does not stop the pipeline: the child is still created, reports the error
    /// and exits with [`RunnerError::status`], as any other command that fails to start.
    fn prepare(&self, segment: &Segment<'_>) -> Result<Self::Prepared, RunnerError>;

    /// Replaces the calling process with the prepared command.
    ///
    /// Only ever called inside a freshly forked child whose standard streams are already
    /// connected to the pipeline, and so must not allocate, lock or log. Returning means
    /// the program could not be started; the child then exits with [`ExecError::status`].
    fn exec<'p>(&self, segment: &Segment<'_>, prepared: &'p Self::Prepared) -> ExecError<'p>;
}

impl<F> CommandRunner for F
where
    F: Fn(&Segment<'_>) -> ExecError<'static>,
{
    type Prepared = ();

    fn prepare(&self, _: &Segment<'_>) -> Result<(), RunnerError> { Ok(()) }

    fn exec<'p>(&self, segment: &Segment<'_>, _: &'p ()) -> ExecError<'p> { self(segment) }
}

/// Runs external programs found through `PATH`, applying any `< file` and `> file`
/// tokens to the command's standard input and output first.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExternalRunner;

/// A command prepared by [`ExternalRunner`].
#[derive(Debug)]
pub struct ExternalCommand {
    name:         String,
    argv:         Argv,
    redirections: Vec<Redirect>,
}

impl ExternalCommand {
    pub fn name(&self) -> &str { &self.name }

    pub fn args(&self) -> &[CString] { self.argv.args() }
}

#[derive(Debug)]
struct Redirect {
    stream: StdStream,
    path:   CString,
    file:   String,
}

fn c_string(token: &str) -> Result<CString, RunnerError> {
    CString::new(token).map_err(|_| RunnerError::InvalidArgument(token.into()))
}

impl CommandRunner for ExternalRunner {
    type Prepared = ExternalCommand;

    /// Separates the redirections in `segment` from the program's argument vector. Files
    /// are only opened by the child.
    fn prepare(&self, segment: &Segment<'_>) -> Result<ExternalCommand, RunnerError> {
        let mut args = Vec::with_capacity(segment.tokens().len());
        let mut name = None;
        let mut redirections = Vec::new();
        let mut tokens = segment.tokens().iter();

        while let Some(token) = tokens.next() {
            let (operator, stream) = match token.as_str() {
                "<" => ("<", StdStream::Input),
                ">" => (">", StdStream::Output),
                arg => {
                    args.push(c_string(arg)?);
                    name.get_or_insert(arg);
                    continue;
                }
            };

            let file = tokens.next().ok_or(RunnerError::MissingRedirectTarget(operator))?;
            redirections.push(Redirect { stream, path: c_string(file)?, file: file.clone() });
        }

        let argv = Argv::new(args).ok_or(RunnerError::EmptyCommand)?;
        Ok(ExternalCommand { name: name.unwrap_or_default().into(), argv, redirections })
    }

    fn exec<'p>(&self, _: &Segment<'_>, command: &'p ExternalCommand) -> ExecError<'p> {
        for redirect in &command.redirections {
            let opened = match redirect.stream {
                StdStream::Input => sys::open_input(&redirect.path),
                StdStream::Output => sys::open_output(&redirect.path),
            };
            let fd = match opened {
                Ok(fd) => fd,
                Err(source) => {
                    return ExecError::OpenRedirect {
                        file: &redirect.file,
                        stream: redirect.stream,
                        source,
                    }
                }
            };
            if let Err(why) = streams::redirect(fd, redirect.stream) {
                return why.into();
            }
        }

        sys::signals::reset_inherited();

        match sys::execvp(&command.argv) {
            Errno::ENOENT => ExecError::NoSuchCommand(&command.name),
            source => ExecError::CouldNotExec { name: &command.name, source },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &[&str]) -> Vec<String> { input.iter().map(|&t| t.to_owned()).collect() }

    fn prepare(input: &[&str]) -> Result<ExternalCommand, RunnerError> {
        ExternalRunner.prepare(&Segment::new(0, &tokens(input)))
    }

    #[test]
    fn failure_statuses() {
        assert_eq!(RunnerError::EmptyCommand.status(), Status::COULD_NOT_EXEC);
        assert_eq!(RunnerError::MissingRedirectTarget(">").status(), Status::FAILURE);
        assert_eq!(ExecError::NoSuchCommand("nope").status(), Status::NO_SUCH_COMMAND);
        let denied = ExecError::CouldNotExec { name: "x", source: Errno::EACCES };
        assert_eq!(denied.status(), Status::COULD_NOT_EXEC);
        assert_eq!(denied.to_string(), "x: could not execute: EACCES: Permission denied");
    }

    #[test]
    fn arguments_without_redirections() {
        let command = prepare(&["grep", "-v", "x"]).unwrap();
        let args: Vec<&str> = command.args().iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(args, ["grep", "-v", "x"]);
        assert_eq!(command.name(), "grep");
        assert!(command.redirections.is_empty());
    }

    #[test]
    fn redirections_are_planned_not_opened() {
        let command = prepare(&["<", "/nonexistent/ion-pipe/input", "cat", ">", "out"]).unwrap();
        assert_eq!(command.name(), "cat");
        assert_eq!(command.args().len(), 1);

        let planned: Vec<_> =
            command.redirections.iter().map(|r| (r.stream, r.file.as_str())).collect();
        assert_eq!(planned, [
            (StdStream::Input, "/nonexistent/ion-pipe/input"),
            (StdStream::Output, "out")
        ]);
    }

    #[test]
    fn missing_redirect_target() {
        match prepare(&["cat", "<"]) {
            Err(RunnerError::MissingRedirectTarget("<")) => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn nul_bytes_are_rejected() {
        let why = prepare(&["echo", "a\0b"]).unwrap_err();
        assert_eq!(why.status(), Status::COULD_NOT_EXEC);
        assert!(matches!(prepare(&["cat", ">", "a\0b"]), Err(RunnerError::InvalidArgument(_))));
    }

    #[test]
    fn empty_segment() {
        assert!(matches!(prepare(&[]), Err(RunnerError::EmptyCommand)));
        assert!(matches!(prepare(&["<", "input"]), Err(RunnerError::EmptyCommand)));
    }
}

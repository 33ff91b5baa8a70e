//! The purpose of the pipeline execution module is to run a pipeline of external commands
//! with the standard output of each command connected to the standard input of the next.
//! That includes allocating the channels between commands, forking a process per command,
//! wiring each process's standard streams, closing every endpoint that a process does not
//! need, and collecting the exit status of every process that was started.

mod fork;
pub mod job_control;
pub mod pipes;
pub mod streams;

pub use self::{
    fork::{OsFork, ProcessCreator},
    job_control::{Child, ExitRecord, Report},
};
use self::{
    fork::Wiring,
    pipes::{ChannelAllocator, ChannelSet, Endpoint, EndpointId, OsPipes},
    streams::RedirectionError,
};
use crate::{
    options::Options,
    parser::segment,
    runner::{CommandRunner, ExternalRunner, RunnerError},
    status::Status,
    sys::{Errno, Pid},
};
use std::fs::File;
use thiserror::Error;

/// Everything that can go wrong while running a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not create channel {channel}: {source}")]
    ChannelAllocation {
        channel: usize,
        #[source]
        source:  Errno,
    },
    #[error("could not create a process for command {index}: {source}")]
    ProcessCreation {
        index:  usize,
        #[source]
        source: Errno,
    },
    #[error("command {index}: {source}")]
    Redirection {
        index:  usize,
        #[source]
        source: RedirectionError,
    },
    #[error("command {index}: {source}")]
    Runner {
        index:  usize,
        #[source]
        source: RunnerError,
    },
    #[error("could not wait for command {index} (pid {pid}): {source}")]
    Wait {
        index:  usize,
        pid:    Pid,
        #[source]
        source: Errno,
    },
    #[error("could not close the {endpoint}: {source}")]
    EndpointClose {
        endpoint: EndpointId,
        #[source]
        source:   Errno,
    },
    #[error("command {index} exited with status {status}")]
    CommandFailed { index: usize, status: Status },
}

/// Runs pipelines.
///
/// By default each command is an external program, and the pipeline's first and last
/// commands share this process's standard input and output. Either can be replaced by a
/// file, which is then consumed by the next run.
#[derive(Debug)]
pub struct Executor<R = ExternalRunner> {
    options: Options,
    runner:  R,
    stdin:   Option<File>,
    stdout:  Option<File>,
}

impl Executor<ExternalRunner> {
    pub fn new(options: Options) -> Self { Executor::with_runner(options, ExternalRunner) }
}

impl Default for Executor<ExternalRunner> {
    fn default() -> Self { Executor::new(Options::default()) }
}

impl<R: CommandRunner> Executor<R> {
    pub fn with_runner(options: Options, runner: R) -> Self {
        Executor { options, runner, stdin: None, stdout: None }
    }

    /// Feeds `file` to the first command of the next pipeline.
    pub fn stdin(mut self, file: File) -> Self {
        self.stdin = Some(file);
        self
    }

    /// Sends the output of the last command of the next pipeline to `file`.
    pub fn stdout(mut self, file: File) -> Self {
        self.stdout = Some(file);
        self
    }

    pub fn options(&self) -> &Options { &self.options }

    /// Splits `tokens` into commands at the configured delimiter and runs them as one
    /// pipeline, waiting for every command that was started.
    pub fn run(&mut self, tokens: &[String]) -> Report { self.run_with(tokens, &mut OsPipes) }

    /// Like [`Executor::run`], but channels are obtained from `allocator`.
    pub fn run_with<A: ChannelAllocator + ?Sized>(
        &mut self,
        tokens: &[String],
        allocator: &mut A,
    ) -> Report {
        self.run_using(tokens, allocator, &mut OsFork)
    }

    /// Like [`Executor::run`], but channels are obtained from `allocator` and processes
    /// from `creator`.
    ///
    /// The executor never leaves a descriptor open behind it: on every path, including
    /// allocation and fork failures, each endpoint it created is closed by the time this
    /// returns, and every process it created has been waited on.
    pub fn run_using<A, C>(
        &mut self,
        tokens: &[String],
        allocator: &mut A,
        creator: &mut C,
    ) -> Report
    where
        A: ChannelAllocator + ?Sized,
        C: ProcessCreator + ?Sized,
    {
        let pipeline = segment(tokens, &self.options.delimiter);
        if self.options.print_comms {
            eprintln!("> {}", pipeline);
        }
        info!("running pipeline of {} command(s)", pipeline.len());

        let input = self.stdin.take().map(Endpoint::pipeline_input);
        let output = self.stdout.take().map(Endpoint::pipeline_output);

        let mut channels = match ChannelSet::allocate_with(pipeline.channels(), allocator) {
            Ok(channels) => channels,
            Err((why, mut warnings)) => {
                error!("{}", why);
                let outer = input.into_iter().chain(output);
                warnings.extend(outer.filter_map(|endpoint| endpoint.close().err()));

                let mut report = Report::new(self.options.policy);
                report.fail(why);
                report.warn(warnings);
                return report;
            }
        };
        channels.set_outer(input, output);

        let mut children = Vec::with_capacity(pipeline.len());
        let mut warnings = Vec::new();
        let mut failure = None;

        for segment in &pipeline {
            let index = segment.index();
            let wiring = Wiring {
                read_from: channels.take_stdin_of(index),
                write_to:  channels.take_stdout_of(index),
            };

            let launched =
                fork::launch(segment, &mut channels, wiring, &self.runner, creator, &mut warnings);
            match launched {
                Ok(child) => children.push(child),
                Err(why) => {
                    error!("{}", why);
                    failure = Some(why);
                    break;
                }
            }
        }

        // Once every command is spawned, each endpoint belongs to exactly one child.
        let leftover = channels.open_endpoints();
        if failure.is_none() && leftover != 0 {
            debug_assert!(false, "{} endpoint(s) still open after spawning", leftover);
            error!("{} endpoint(s) were still open after spawning every command", leftover);
        }
        warnings.extend(channels.close_all());

        let mut report = job_control::reap(&children, self.options.policy);
        if let Some(why) = failure {
            report.fail(why);
        }
        report.warn(warnings);

        info!("pipeline finished with status {}", report.status());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        options::StatusPolicy,
        parser::Segment,
        runner::ExecError,
        sys::ForkResult,
    };
    use serial_test_derive::serial;

    fn tokens(input: &str) -> Vec<String> { input.split_whitespace().map(String::from).collect() }

    /// Exits with the number given as the command's first token.
    fn exit_with(segment: &Segment<'_>) -> ExecError<'static> {
        let code = segment.name().and_then(|name| name.parse().ok()).unwrap_or(0);
        crate::sys::fork_exit(code)
    }

    #[test]
    #[serial]
    fn statuses_are_reported_in_pipeline_order() {
        let mut executor = Executor::with_runner(Options::default(), exit_with);
        let report = executor.run(&tokens("0 | 4 | 0 | 7"));

        let codes: Vec<_> =
            report.records().iter().map(|r| r.status.map(Status::as_os_code)).collect();
        assert_eq!(codes, [Some(0), Some(4), Some(0), Some(7)]);
        assert_eq!(report.status().as_os_code(), 4);
        assert!(report.failures().is_empty());
    }

    #[test]
    #[serial]
    fn last_status_policy() {
        let options = Options { policy: StatusPolicy::Last, ..Options::default() };
        let mut executor = Executor::with_runner(options, exit_with);
        assert!(executor.run(&tokens("3 | 0")).is_success());
        assert_eq!(executor.run(&tokens("0 | 3")).status().as_os_code(), 3);
    }

    #[test]
    #[serial]
    fn allocation_failure_spawns_nothing() {
        let mut executor = Executor::with_runner(Options::default(), exit_with);
        let mut exhausted = |_: usize| -> Result<(Endpoint, Endpoint), Errno> { Err(Errno::EMFILE) };
        let report = executor.run_with(&tokens("0 | 0"), &mut exhausted);

        assert_eq!(report.spawned(), 0);
        assert_eq!(report.status(), Status::FAILURE);
        match report.failures() {
            [PipelineError::ChannelAllocation { channel: 0, source: Errno::EMFILE }] => (),
            other => panic!("unexpected failures: {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn allocation_failure_carries_close_failures() {
        let mut executor = Executor::with_runner(Options::default(), exit_with);
        let mut unclosable = |channel: usize| -> Result<(Endpoint, Endpoint), Errno> {
            if channel == 1 {
                return Err(Errno::EMFILE);
            }
            // Never opened, so closing either end fails.
            unsafe {
                Ok((
                    Endpoint::from_raw_fd(i32::MAX - 1, EndpointId::Channel(0, pipes::End::Read)),
                    Endpoint::from_raw_fd(i32::MAX, EndpointId::Channel(0, pipes::End::Write)),
                ))
            }
        };
        let report = executor.run_with(&tokens("0 | 0 | 0"), &mut unclosable);

        assert_eq!(report.spawned(), 0);
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.warnings().len(), 2);
        assert!(report
            .warnings()
            .iter()
            .all(|w| matches!(w, PipelineError::EndpointClose { source: Errno::EBADF, .. })));
        assert_eq!(report.status(), Status::FAILURE);
    }

    #[test]
    #[serial]
    fn creation_failure_stops_spawning_and_reaps_the_rest() {
        let mut executor = Executor::with_runner(Options::default(), exit_with);
        let mut third_fails = |command: usize| -> Result<ForkResult, Errno> {
            if command == 2 {
                Err(Errno::EAGAIN)
            } else {
                unsafe { crate::sys::fork() }
            }
        };
        let report = executor.run_using(&tokens("0 | 0 | 0 | 0"), &mut OsPipes, &mut third_fails);

        assert_eq!(report.spawned(), 2);
        assert_eq!(report.reaped(), 2);
        assert_eq!(report.records().iter().map(|r| r.index).collect::<Vec<_>>(), [0, 1]);
        match report.failures() {
            [PipelineError::ProcessCreation { index: 2, source: Errno::EAGAIN }] => (),
            other => panic!("unexpected failures: {:?}", other),
        }
        assert!(report.warnings().is_empty());
        assert_eq!(report.status(), Status::FAILURE);
    }
}

//! Runs pipelines of external commands given as a flat list of tokens, such as
//! `printf "a\nb\n" | grep b`, the way a shell would after it has done its own parsing.
//!
//! The tokens are split into commands at a delimiter token, one process is forked per
//! command, and the standard output of each command is connected to the standard input of
//! the next through an OS pipe. Every descriptor the executor creates is closed in every
//! process that does not need it, so each reader sees end-of-file once its writer exits.

#[macro_use]
extern crate log;
extern crate ion_pipe_sys as sys;

pub mod options;
pub mod parser;
pub mod pipe_exec;
pub mod runner;
pub mod status;

pub use crate::{
    options::{Options, StatusPolicy},
    parser::{segment, Pipeline, Segment},
    pipe_exec::{Executor, PipelineError, Report},
    runner::{CommandRunner, ExecError, ExternalCommand, ExternalRunner, RunnerError},
    status::Status,
};

pub fn version() -> &'static str { include!(concat!(env!("OUT_DIR"), "/version_string")) }

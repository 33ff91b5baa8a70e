use super::PipelineError;
use crate::{
    options::StatusPolicy,
    status::Status,
    sys::{self, Pid},
};

/// A process that was spawned for the command at `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Child {
    pub index: usize,
    pub pid:   Pid,
}

/// How a spawned command ended. `status` is `None` when the process could not be waited on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitRecord {
    pub index:  usize,
    pub pid:    Pid,
    pub status: Option<Status>,
}

/// The outcome of running a pipeline.
///
/// A report distinguishes between failures of the pipeline machinery itself (a channel
/// that could not be allocated, a fork that failed, a child that could not be waited on)
/// and commands that ran but exited unsuccessfully. Close failures that did not prevent
/// the pipeline from running are kept separately as warnings.
#[derive(Debug, Default)]
pub struct Report {
    policy:   StatusPolicy,
    records:  Vec<ExitRecord>,
    failures: Vec<PipelineError>,
    warnings: Vec<PipelineError>,
}

impl Report {
    pub(crate) fn new(policy: StatusPolicy) -> Self { Report { policy, ..Report::default() } }

    /// The number of processes that were created.
    pub fn spawned(&self) -> usize { self.records.len() }

    /// The number of processes that were successfully waited on.
    pub fn reaped(&self) -> usize { self.records.iter().filter(|r| r.status.is_some()).count() }

    /// Exit records, in the order the commands appear in the pipeline.
    pub fn records(&self) -> &[ExitRecord] { &self.records }

    pub fn failures(&self) -> &[PipelineError] { &self.failures }

    pub fn warnings(&self) -> &[PipelineError] { &self.warnings }

    /// The command whose exit status decides the pipeline's status, if it failed.
    pub fn failed_command(&self) -> Option<&ExitRecord> {
        match self.policy {
            StatusPolicy::AllZero => self.records.iter().find(|r| is_failed(r)),
            StatusPolicy::Last => self.records.last().filter(|r| is_failed(r)),
        }
    }

    /// The status of the pipeline as a whole.
    ///
    /// A failure of the pipeline machinery always yields [`Status::FAILURE`]. Otherwise the
    /// status is that of the command chosen by the [`StatusPolicy`].
    pub fn status(&self) -> Status {
        if !self.failures.is_empty() {
            return Status::FAILURE;
        }
        self.failed_command().and_then(|record| record.status).unwrap_or(Status::SUCCESS)
    }

    pub fn is_success(&self) -> bool { self.status().is_success() }

    /// Converts the report into the first error that made the pipeline fail.
    pub fn into_result(mut self) -> Result<(), PipelineError> {
        if !self.failures.is_empty() {
            return Err(self.failures.swap_remove(0));
        }
        match self.failed_command() {
            Some(&ExitRecord { index, status: Some(status), .. }) => {
                Err(PipelineError::CommandFailed { index, status })
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn fail(&mut self, why: PipelineError) { self.failures.push(why); }

    pub(crate) fn warn(&mut self, warnings: impl IntoIterator<Item = PipelineError>) {
        self.warnings.extend(warnings);
    }
}

fn is_failed(record: &ExitRecord) -> bool { record.status.map_or(false, Status::is_failure) }

/// Waits for every child in `children`, in order.
///
/// Each child is waited on by its pid, so that processes spawned elsewhere in this program
/// are never collected by accident. A child that cannot be waited on is recorded as a
/// failure and the remaining children are still collected.
pub fn reap(children: &[Child], policy: StatusPolicy) -> Report {
    let mut report = Report::new(policy);

    for &Child { index, pid } in children {
        let status = match sys::waitpid(pid) {
            Ok(status) => {
                let status = Status::from_wait(status);
                debug!("command {} (pid {}) exited with status {}", index, pid, status);
                Some(status)
            }
            Err(source) => {
                let why = PipelineError::Wait { index, pid, source };
                warn!("{}", why);
                report.fail(why);
                None
            }
        };
        report.records.push(ExitRecord { index, pid, status });
    }

    report
}

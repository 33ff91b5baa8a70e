use super::{
    job_control::Child,
    pipes::{ChannelSet, Endpoint},
    streams::{RedirectionError, StdStream},
    PipelineError,
};
use crate::{
    parser::Segment,
    runner::CommandRunner,
    status::Status,
    sys::{self, Errno, ForkResult},
};

/// Creates the process of each command in a pipeline.
pub trait ProcessCreator {
    /// Forks the process that will run command `command`.
    ///
    /// # Safety
    ///
    /// As with `fork(2)`: the child may only perform async-signal-safe work until it execs
    /// or exits.
    unsafe fn create(&mut self, command: usize) -> Result<ForkResult, Errno>;
}

/// Creates processes with `fork`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFork;

impl ProcessCreator for OsFork {
    unsafe fn create(&mut self, _: usize) -> Result<ForkResult, Errno> { sys::fork() }
}

impl<F> ProcessCreator for F
where
    F: FnMut(usize) -> Result<ForkResult, Errno>,
{
    unsafe fn create(&mut self, command: usize) -> Result<ForkResult, Errno> { self(command) }
}

/// The endpoints that a new process takes over as its standard input and output. Absent
/// endpoints leave the inherited stream in place.
#[derive(Debug, Default)]
pub struct Wiring {
    pub read_from: Option<Endpoint>,
    pub write_to:  Option<Endpoint>,
}

impl Wiring {
    /// Child side: moves each endpoint onto its standard stream. Both endpoints are
    /// consumed even if the first fails, so that neither is dropped within the child.
    fn attach(self) -> Result<(), RedirectionError> {
        let Wiring { read_from, write_to } = self;
        let input = read_from.map_or(Ok(()), |endpoint| endpoint.redirect_onto(StdStream::Input));
        let output =
            write_to.map_or(Ok(()), |endpoint| endpoint.redirect_onto(StdStream::Output));
        input.and(output)
    }

    /// Parent side: the child now holds its own duplicates, so ours are closed.
    fn release(self, warnings: &mut Vec<PipelineError>) {
        for endpoint in self.read_from.into_iter().chain(self.write_to) {
            if let Err(why) = endpoint.close() {
                warn!("{}", why);
                warnings.push(why);
            }
        }
    }
}

/// A command as the child will receive it: either prepared by the runner, or the status
/// and message the child must exit with.
type Prepared<P> = Result<P, (Status, String)>;

/// Forks a process for `segment`, connects its standard streams to `wiring`, and hands it
/// to `runner`.
///
/// The command is prepared, and any preparation error formatted, before the fork. Within
/// the child, every endpoint still held by `channels` is closed before the runner is
/// invoked, so that no reader downstream waits on a writer that will never close. The
/// child never returns, never allocates and never logs: if the command cannot be started,
/// the reason is written directly to the standard error descriptor and the child exits
/// with the matching status.
///
/// Within the parent, the wired endpoints are closed once the child exists, and any close
/// failures are appended to `warnings`. The same happens when the fork itself fails.
pub fn launch<R, C>(
    segment: &Segment<'_>,
    channels: &mut ChannelSet,
    wiring: Wiring,
    runner: &R,
    creator: &mut C,
    warnings: &mut Vec<PipelineError>,
) -> Result<Child, PipelineError>
where
    R: CommandRunner + ?Sized,
    C: ProcessCreator + ?Sized,
{
    let index = segment.index();
    let prepared: Prepared<R::Prepared> = runner.prepare(segment).map_err(|source| {
        let status = source.status();
        (status, format!("ion-pipe: {}\n", PipelineError::Runner { index, source }))
    });

    match unsafe { creator.create(index) } {
        Ok(ForkResult::Child) => {
            let status = exec_child(segment, channels, wiring, runner, &prepared);
            sys::fork_exit(status.as_os_code());
        }
        Ok(ForkResult::Parent { child }) => {
            debug!("spawned command {} ({}) as pid {}", index, segment, child);
            wiring.release(warnings);
            Ok(Child { index, pid: child })
        }
        Err(source) => {
            wiring.release(warnings);
            Err(PipelineError::ProcessCreation { index, source })
        }
    }
}

/// Runs within the forked child. Only returns if the command could not be started.
fn exec_child<R: CommandRunner + ?Sized>(
    segment: &Segment<'_>,
    channels: &mut ChannelSet,
    wiring: Wiring,
    runner: &R,
    prepared: &Prepared<R::Prepared>,
) -> Status {
    let index = segment.index();

    if let Err(source) = wiring.attach() {
        let why = PipelineError::Redirection { index, source };
        sys::write_stderr(format_args!("ion-pipe: {}\n", why));
        return Status::FAILURE;
    }

    channels.close_in_child();

    match prepared {
        Ok(prepared) => {
            let why = runner.exec(segment, prepared);
            sys::write_stderr(format_args!("ion-pipe: command {}: {}\n", index, why));
            why.status()
        }
        Err((status, message)) => {
            sys::write_stderr(format_args!("{}", message));
            *status
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{super::job_control, *};
    use crate::{options::StatusPolicy, runner::ExecError, ExternalRunner};
    use serial_test_derive::serial;

    fn exit_with_index(segment: &Segment<'_>) -> ExecError<'static> {
        sys::fork_exit(10 + segment.index() as i32)
    }

    fn launch_alone<R: CommandRunner>(tokens: &[String], index: usize, runner: &R) -> Child {
        let mut channels = ChannelSet::allocate(0).unwrap();
        let mut warnings = Vec::new();
        let segment = Segment::new(index, tokens);
        let child =
            launch(&segment, &mut channels, Wiring::default(), runner, &mut OsFork, &mut warnings)
                .unwrap();
        assert!(warnings.is_empty());
        child
    }

    fn status_of(child: Child) -> Option<Status> {
        job_control::reap(&[child], StatusPolicy::default()).records()[0].status
    }

    #[test]
    #[serial]
    fn child_exits_through_the_runner() {
        let tokens = vec!["anything".to_owned()];
        let child = launch_alone(&tokens, 2, &exit_with_index);
        assert_eq!(child.index, 2);
        assert_eq!(status_of(child), Some(Status::from_exit_code(12)));
    }

    #[test]
    #[serial]
    fn preparation_failure_becomes_the_exit_status() {
        let child = launch_alone(&[], 0, &ExternalRunner);
        assert_eq!(status_of(child), Some(Status::COULD_NOT_EXEC));

        let tokens = vec!["cat".to_owned(), ">".to_owned()];
        let child = launch_alone(&tokens, 0, &ExternalRunner);
        assert_eq!(status_of(child), Some(Status::FAILURE));
    }

    #[test]
    #[serial]
    fn exec_failure_becomes_the_exit_status() {
        let tokens = vec!["ion-pipe-test-no-such-command".to_owned()];
        let child = launch_alone(&tokens, 0, &ExternalRunner);
        assert_eq!(status_of(child), Some(Status::NO_SUCH_COMMAND));
    }

    #[test]
    #[serial]
    fn parent_releases_the_wired_endpoints() {
        let tokens = vec!["x".to_owned()];
        let mut channels = ChannelSet::allocate(1).unwrap();
        let mut warnings = Vec::new();
        let wiring = Wiring { read_from: None, write_to: channels.take_write(0) };

        let child = launch(
            &Segment::new(0, &tokens),
            &mut channels,
            wiring,
            &exit_with_index,
            &mut OsFork,
            &mut warnings,
        )
        .unwrap();

        // Only the read end, meant for the next command, is still held by the parent.
        assert_eq!(channels.open_endpoints(), 1);
        assert!(channels.close_all().is_empty());
        status_of(child);
    }

    #[test]
    #[serial]
    fn creation_failure_releases_the_wiring() {
        let tokens = vec!["x".to_owned()];
        let mut channels = ChannelSet::allocate(1).unwrap();
        let mut warnings = Vec::new();
        let wiring =
            Wiring { read_from: channels.take_read(0), write_to: channels.take_write(0) };
        let mut exhausted = |_: usize| -> Result<ForkResult, Errno> { Err(Errno::EAGAIN) };

        match launch(
            &Segment::new(3, &tokens),
            &mut channels,
            wiring,
            &exit_with_index,
            &mut exhausted,
            &mut warnings,
        ) {
            Err(PipelineError::ProcessCreation { index: 3, source: Errno::EAGAIN }) => (),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(channels.open_endpoints(), 0);
        assert!(warnings.is_empty());
    }
}

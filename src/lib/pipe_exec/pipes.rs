use super::{
    streams::{self, RedirectionError, StdStream},
    PipelineError,
};
use crate::sys::{self, Errno};
use std::{
    fmt,
    fs::File,
    mem,
    os::unix::io::{AsRawFd, IntoRawFd, RawFd},
};

/// Which end of a channel an endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum End {
    Read,
    Write,
}

impl fmt::Display for End {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            End::Read => "read",
            End::Write => "write",
        })
    }
}

/// Identifies an endpoint in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointId {
    /// One end of an inter-process channel.
    Channel(usize, End),
    /// A file supplied by the caller as the first command's standard input.
    PipelineInput,
    /// A file supplied by the caller as the last command's standard output.
    PipelineOutput,
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            EndpointId::Channel(channel, end) => write!(f, "{} end of channel {}", end, channel),
            EndpointId::PipelineInput => f.write_str("pipeline input"),
            EndpointId::PipelineOutput => f.write_str("pipeline output"),
        }
    }
}

/// An owned descriptor for one end of a channel.
///
/// Each endpoint is closed exactly once within the process that holds it: explicitly
/// through [`Endpoint::close`], by being moved onto a standard stream with
/// [`Endpoint::redirect_onto`], or when it is dropped. Both methods consume the endpoint,
/// so a closed descriptor can never be closed a second time.
#[derive(Debug)]
pub struct Endpoint {
    fd: RawFd,
    id: EndpointId,
}

impl Endpoint {
    /// # Safety
    ///
    /// `fd` must be an open descriptor that nothing else will close.
    pub unsafe fn from_raw_fd(fd: RawFd, id: EndpointId) -> Self { Endpoint { fd, id } }

    pub fn pipeline_input(file: File) -> Self {
        Endpoint { fd: file.into_raw_fd(), id: EndpointId::PipelineInput }
    }

    pub fn pipeline_output(file: File) -> Self {
        Endpoint { fd: file.into_raw_fd(), id: EndpointId::PipelineOutput }
    }

    pub fn id(&self) -> EndpointId { self.id }

    /// Closes the descriptor, reporting any failure instead of swallowing it.
    pub fn close(self) -> Result<(), PipelineError> {
        let id = self.id;
        let fd = self.into_raw_fd();
        debug!("closing {} (fd {})", id, fd);
        sys::close(fd).map_err(|source| PipelineError::EndpointClose { endpoint: id, source })
    }

    /// Duplicates the descriptor onto `stream` and closes the original, leaving the
    /// standard stream as the only reference.
    pub fn redirect_onto(self, stream: StdStream) -> Result<(), RedirectionError> {
        streams::redirect(self.into_raw_fd(), stream)
    }
}

impl AsRawFd for Endpoint {
    fn as_raw_fd(&self) -> RawFd { self.fd }
}

impl IntoRawFd for Endpoint {
    fn into_raw_fd(self) -> RawFd {
        let fd = self.fd;
        mem::forget(self);
        fd
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Err(why) = sys::close(self.fd) {
            warn!("could not close {}: {}", self.id, why);
        }
    }
}

/// Creates the OS-level channels of a channel set.
pub trait ChannelAllocator {
    /// Creates channel number `channel`, returning its `(read, write)` endpoints.
    fn allocate(&mut self, channel: usize) -> Result<(Endpoint, Endpoint), Errno>;
}

/// Allocates channels as close-on-exec pipes.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsPipes;

impl ChannelAllocator for OsPipes {
    fn allocate(&mut self, channel: usize) -> Result<(Endpoint, Endpoint), Errno> {
        let (reader, writer) = sys::pipe_cloexec()?;
        unsafe {
            Ok((
                Endpoint::from_raw_fd(reader, EndpointId::Channel(channel, End::Read)),
                Endpoint::from_raw_fd(writer, EndpointId::Channel(channel, End::Write)),
            ))
        }
    }
}

impl<F> ChannelAllocator for F
where
    F: FnMut(usize) -> Result<(Endpoint, Endpoint), Errno>,
{
    fn allocate(&mut self, channel: usize) -> Result<(Endpoint, Endpoint), Errno> {
        self(channel)
    }
}

#[derive(Debug)]
struct Channel {
    read:  Option<Endpoint>,
    write: Option<Endpoint>,
}

/// The channels connecting the commands of one pipeline, plus the optional files that
/// feed the first command and receive the last command's output.
///
/// Command `i` reads from channel `i - 1` and writes to channel `i`. An endpoint leaves
/// the set when it is taken, and is then owned by whoever took it.
#[derive(Debug, Default)]
pub struct ChannelSet {
    channels: Vec<Channel>,
    input:    Option<Endpoint>,
    output:   Option<Endpoint>,
}

impl ChannelSet {
    /// Allocates `channels` close-on-exec pipes.
    pub fn allocate(channels: usize) -> Result<Self, (PipelineError, Vec<PipelineError>)> {
        Self::allocate_with(channels, &mut OsPipes)
    }

    /// Allocates `channels` channels from `allocator`.
    ///
    /// If any allocation fails, every channel created before it is closed and the index
    /// of the failing channel is reported, together with any failures to close the
    /// earlier channels.
    pub fn allocate_with<A: ChannelAllocator + ?Sized>(
        channels: usize,
        allocator: &mut A,
    ) -> Result<Self, (PipelineError, Vec<PipelineError>)> {
        let mut set =
            ChannelSet { channels: Vec::with_capacity(channels), input: None, output: None };

        for channel in 0..channels {
            match allocator.allocate(channel) {
                Ok((read, write)) => {
                    debug!(
                        "allocated channel {} (read fd {}, write fd {})",
                        channel,
                        read.as_raw_fd(),
                        write.as_raw_fd()
                    );
                    set.channels.push(Channel { read: Some(read), write: Some(write) });
                }
                Err(source) => {
                    let warnings = set.close_all();
                    for warning in &warnings {
                        warn!("{}", warning);
                    }
                    return Err((PipelineError::ChannelAllocation { channel, source }, warnings));
                }
            }
        }

        Ok(set)
    }

    /// Number of channels in the set, whether or not their endpoints are still held.
    pub fn len(&self) -> usize { self.channels.len() }

    pub fn is_empty(&self) -> bool { self.channels.is_empty() }

    /// Supplies the files that replace the first command's stdin and the last command's
    /// stdout.
    pub fn set_outer(&mut self, input: Option<Endpoint>, output: Option<Endpoint>) {
        self.input = input;
        self.output = output;
    }

    /// Borrows an endpoint that is still held by the set.
    pub fn endpoint(&self, channel: usize, end: End) -> Option<&Endpoint> {
        self.channels.get(channel).and_then(|c| match end {
            End::Read => c.read.as_ref(),
            End::Write => c.write.as_ref(),
        })
    }

    pub fn take_read(&mut self, channel: usize) -> Option<Endpoint> {
        self.channels.get_mut(channel).and_then(|c| c.read.take())
    }

    pub fn take_write(&mut self, channel: usize) -> Option<Endpoint> {
        self.channels.get_mut(channel).and_then(|c| c.write.take())
    }

    /// Takes the endpoint that command `command` reads from: the caller's input file for
    /// the first command, the previous channel's read end otherwise.
    pub fn take_stdin_of(&mut self, command: usize) -> Option<Endpoint> {
        match command.checked_sub(1) {
            None => self.input.take(),
            Some(channel) => self.take_read(channel),
        }
    }

    /// Takes the endpoint that command `command` writes to: the caller's output file for
    /// the last command, its own channel's write end otherwise.
    pub fn take_stdout_of(&mut self, command: usize) -> Option<Endpoint> {
        if command == self.channels.len() {
            self.output.take()
        } else {
            self.take_write(command)
        }
    }

    /// Counts the endpoints still held by the set.
    pub fn open_endpoints(&self) -> usize {
        let channels: usize = self
            .channels
            .iter()
            .map(|c| c.read.is_some() as usize + c.write.is_some() as usize)
            .sum();
        channels + self.input.is_some() as usize + self.output.is_some() as usize
    }

    /// Closes every endpoint still held, returning the failures.
    pub fn close_all(&mut self) -> Vec<PipelineError> {
        let held = self
            .channels
            .iter_mut()
            .flat_map(|c| c.read.take().into_iter().chain(c.write.take()))
            .chain(self.input.take())
            .chain(self.output.take())
            .collect::<Vec<_>>();

        held.into_iter().filter_map(|endpoint| endpoint.close().err()).collect()
    }
}

impl ChannelSet {
    /// Closes every endpoint still held, within a forked child.
    ///
    /// Unlike [`ChannelSet::close_all`] this neither allocates nor logs, and close failures
    /// are ignored: the descriptors are close-on-exec, so none of them can outlive the
    /// exec that follows.
    pub(crate) fn close_in_child(&mut self) {
        for channel in &mut self.channels {
            for endpoint in channel.read.take().into_iter().chain(channel.write.take()) {
                let _ = sys::close(endpoint.into_raw_fd());
            }
        }
        for endpoint in self.input.take().into_iter().chain(self.output.take()) {
            let _ = sys::close(endpoint.into_raw_fd());
        }
    }
}

impl Drop for ChannelSet {
    fn drop(&mut self) {
        for warning in self.close_all() {
            warn!("{}", warning);
        }
    }
}

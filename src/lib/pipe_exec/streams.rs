use crate::sys::{self, Errno};
use std::{fmt, os::unix::io::RawFd};
use thiserror::Error;

/// A standard stream of a process that a pipeline may rewire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdStream {
    Input,
    Output,
}

impl StdStream {
    pub fn fileno(self) -> RawFd {
        match self {
            StdStream::Input => sys::STDIN_FILENO,
            StdStream::Output => sys::STDOUT_FILENO,
        }
    }
}

impl fmt::Display for StdStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StdStream::Input => "stdin",
            StdStream::Output => "stdout",
        })
    }
}

/// Moving a descriptor onto a standard stream failed.
#[derive(Debug, Error)]
#[error("could not duplicate descriptor {fd} onto {stream}: {source}")]
pub struct RedirectionError {
    pub fd:     RawFd,
    pub stream: StdStream,
    #[source]
    pub source: Errno,
}

/// Use dup2 to replace `stream` with `fd`, then close `fd` so that the standard stream is
/// the only remaining reference to the file.
///
/// Takes ownership of `fd`: it is closed on every path, including failure. Only ever runs
/// in a forked child, so it neither allocates nor logs.
pub(crate) fn redirect(fd: RawFd, stream: StdStream) -> Result<(), RedirectionError> {
    let target = stream.fileno();

    // Duplicating a descriptor onto itself keeps its close-on-exec flag, which would hide
    // the stream from the program about to be exec'd.
    if fd == target {
        return sys::clear_cloexec(fd).map_err(|source| RedirectionError { fd, stream, source });
    }

    if let Err(source) = sys::dup2(fd, target) {
        let _ = sys::close(fd);
        return Err(RedirectionError { fd, stream, source });
    }

    // The stream already refers to the file, and the original is close-on-exec.
    let _ = sys::close(fd);
    Ok(())
}

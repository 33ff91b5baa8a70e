pub mod signals;

use nix::{
    fcntl::{self, fcntl, FcntlArg, FdFlag, OFlag},
    libc::{self, c_char},
    sys::{stat::Mode, wait},
    unistd,
};
use std::{
    ffi::{CStr, CString},
    fmt::{self, Write},
    os::unix::io::{BorrowedFd, RawFd},
    ptr,
};

pub use nix::{
    errno::Errno,
    sys::wait::WaitStatus,
    unistd::{ForkResult, Pid},
};

pub const STDIN_FILENO: RawFd = nix::libc::STDIN_FILENO;
pub const STDOUT_FILENO: RawFd = nix::libc::STDOUT_FILENO;
pub const STDERR_FILENO: RawFd = nix::libc::STDERR_FILENO;

/// # Safety
///
/// The child may only perform async-signal-safe work before it either execs or calls
/// `fork_exit`, as with `fork(2)` itself.
pub unsafe fn fork() -> Result<ForkResult, Errno> { unistd::fork() }

/// Terminates a forked child without running destructors or flushing the parent's
/// buffered state a second time.
pub fn fork_exit(exit_status: i32) -> ! { unsafe { nix::libc::_exit(exit_status) } }

/// Creates a pipe whose ends are both marked close-on-exec, returning `(reader, writer)`.
///
/// Ownership of both descriptors passes to the caller.
pub fn pipe_cloexec() -> Result<(RawFd, RawFd), Errno> {
    use std::os::unix::io::IntoRawFd;

    #[cfg(not(any(target_os = "macos", target_os = "ios")))]
    let (reader, writer) = unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)?;

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    let (reader, writer) = {
        use std::os::unix::io::AsRawFd;
        let (reader, writer) = unistd::pipe()?;
        fcntl(reader.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
        fcntl(writer.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
        (reader, writer)
    };

    Ok((reader.into_raw_fd(), writer.into_raw_fd()))
}

pub fn dup2(old: RawFd, new: RawFd) -> Result<RawFd, Errno> { unistd::dup2(old, new) }

pub fn close(fd: RawFd) -> Result<(), Errno> { unistd::close(fd) }

/// Allows `fd` to survive an `exec`.
pub fn clear_cloexec(fd: RawFd) -> Result<(), Errno> {
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty())).map(|_| ())
}

/// Blocks until the given child terminates, retrying when interrupted by a signal.
pub fn waitpid(pid: Pid) -> Result<WaitStatus, Errno> {
    loop {
        match wait::waitpid(pid, None) {
            Err(Errno::EINTR) => continue,
            result => break result,
        }
    }
}

/// Opens `path` for reading, close-on-exec.
pub fn open_input(path: &CStr) -> Result<RawFd, Errno> {
    fcntl::open(path, OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty())
}

/// Opens `path` for writing, close-on-exec, creating it with mode 0644 or truncating it.
pub fn open_output(path: &CStr) -> Result<RawFd, Errno> {
    let flags = OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC | OFlag::O_CLOEXEC;
    fcntl::open(path, flags, Mode::from_bits_truncate(0o644))
}

/// An argument vector in the form `execvp` consumes.
///
/// The pointer array is built when the vector is created, so that a forked child can exec
/// it without allocating.
#[derive(Debug)]
pub struct Argv {
    args: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

impl Argv {
    /// Returns `None` when there is no program to run.
    pub fn new(args: Vec<CString>) -> Option<Self> {
        if args.is_empty() {
            return None;
        }
        let ptrs = args.iter().map(|arg| arg.as_ptr()).chain(Some(ptr::null())).collect();
        Some(Argv { args, ptrs })
    }

    pub fn program(&self) -> &CStr { &self.args[0] }

    pub fn args(&self) -> &[CString] { &self.args }
}

/// Replaces the current process image, searching `PATH` for the program. Only returns on
/// failure.
///
/// Safe to call in a forked child: nothing is allocated before the exec.
pub fn execvp(argv: &Argv) -> Errno {
    unsafe { libc::execvp(argv.ptrs[0], argv.ptrs.as_ptr()) };
    Errno::last()
}

/// Formats a message into a fixed buffer on the stack and writes it straight to the
/// standard error descriptor, bypassing the lock around `std::io::stderr`. Messages longer
/// than the buffer are truncated.
///
/// This is the only way a forked child may report an error: a lock held by another thread
/// of the parent at the time of the fork would never be released in the child.
pub fn write_stderr(message: fmt::Arguments<'_>) {
    let mut buffer = StackBuffer { bytes: [0; 1024], len: 0 };
    let _ = buffer.write_fmt(message);

    let stderr = unsafe { BorrowedFd::borrow_raw(STDERR_FILENO) };
    let mut pending = &buffer.bytes[..buffer.len];
    while !pending.is_empty() {
        match unistd::write(stderr, pending) {
            Ok(0) => break,
            Ok(written) => pending = &pending[written..],
            Err(Errno::EINTR) => continue,
            Err(_) => break,
        }
    }
}

struct StackBuffer {
    bytes: [u8; 1024],
    len:   usize,
}

impl Write for StackBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let available = self.bytes.len() - self.len;
        let take = s.len().min(available);
        self.bytes[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        if take < s.len() {
            Err(fmt::Error)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_is_null_terminated() {
        assert!(Argv::new(Vec::new()).is_none());

        let argv = Argv::new(vec![CString::new("ls").unwrap(), CString::new("-l").unwrap()])
            .unwrap();
        assert_eq!(argv.program().to_str(), Ok("ls"));
        assert_eq!(argv.ptrs.len(), 3);
        assert!(argv.ptrs[2].is_null());
    }

    #[test]
    fn long_messages_are_truncated() {
        let mut buffer = StackBuffer { bytes: [0; 1024], len: 0 };
        assert!(buffer.write_str(&"x".repeat(1000)).is_ok());
        assert!(buffer.write_str(&"y".repeat(100)).is_err());
        assert_eq!(buffer.len, 1024);
        assert_eq!(buffer.bytes[1023], b'y');
    }
}

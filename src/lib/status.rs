use crate::sys::WaitStatus;

/// The exit status of a command, or of a whole pipeline.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct Status(i32);

impl Status {
    pub const COULD_NOT_EXEC: Self = Status(126);
    pub const FAILURE: Self = Status(1);
    pub const NO_SUCH_COMMAND: Self = Status(127);
    pub const SUCCESS: Self = Status(0);

    pub fn from_signal(signal: i32) -> Self { Status(128 + signal) }

    pub fn from_exit_code(code: i32) -> Self { Status(code) }

    /// Converts a terminal wait status. Stop and continue notifications are never
    /// requested by the reaper, so anything other than an exit or a fatal signal is
    /// treated as a failure.
    pub fn from_wait(status: WaitStatus) -> Self {
        match status {
            WaitStatus::Exited(_, code) => Status::from_exit_code(code),
            WaitStatus::Signaled(_, signal, _) => Status::from_signal(signal as i32),
            _ => Status::FAILURE,
        }
    }

    pub fn is_success(self) -> bool { self.0 == 0 }

    pub fn is_failure(self) -> bool { self.0 != 0 }

    pub fn as_os_code(self) -> i32 { self.0 }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::{sys::signal::Signal, unistd::Pid};

    #[test]
    fn wait_statuses() {
        let pid = Pid::from_raw(1);
        assert_eq!(Status::from_wait(WaitStatus::Exited(pid, 0)), Status::SUCCESS);
        assert_eq!(Status::from_wait(WaitStatus::Exited(pid, 3)).as_os_code(), 3);
        assert_eq!(
            Status::from_wait(WaitStatus::Signaled(pid, Signal::SIGPIPE, false)).as_os_code(),
            141
        );
        assert!(Status::from_wait(WaitStatus::StillAlive).is_failure());
    }
}

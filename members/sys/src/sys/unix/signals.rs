use nix::sys::signal::{signal, SigHandler, Signal};

/// Restores the default disposition of the signals that a Rust program ignores on startup,
/// so that an exec'd command sees them the way it would when launched from a terminal.
///
/// Without this, a writer upstream of `head` receives `EPIPE` instead of being killed by
/// `SIGPIPE`.
pub fn reset_inherited() {
    unsafe {
        let _ = signal(Signal::SIGPIPE, SigHandler::SigDfl);
    }
}

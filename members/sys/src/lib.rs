#[cfg(unix)]
#[path = "sys/unix/mod.rs"]
mod sys;

pub use self::sys::*;

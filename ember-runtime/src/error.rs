//! Host-level error type.
//!
//! This is distinct from the *language*-level exception objects that flow
//! through the interpreter's try-stack (see [`crate::interp`]). A host error
//! represents something the runtime itself cannot recover from inside the
//! bytecode contract: a malformed bytecode stream, a misconfigured thread
//! group at startup, or an unhandled exception that reached the top frame.

use crate::gcref::GcRef;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid thread group configuration: {0}")]
    BadGroupConfig(&'static str),

    /// An exception object reached the top frame unhandled. Carries the
    /// exception so the caller (the CLI, or a test) can inspect/print it.
    #[error("unhandled exception")]
    Raised(GcRef),
}

pub type HostResult<T> = Result<T, Error>;

/// Outcome of an operation that may itself trigger a *language*-level
/// exception (stored in the current thread's in-flight exception slot)
/// rather than a host [`Error`]. Used for hashing/equality per spec.md
/// §4.A/§7: "exceptions raised during hashing abort the dict operation."
#[derive(Debug, Clone, Copy)]
pub enum Outcome<T> {
    Ok(T),
    /// An exception is already sitting in the current thread's slot.
    Raised,
}

impl<T> Outcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ok(v) => Outcome::Ok(f(v)),
            Outcome::Raised => Outcome::Raised,
        }
    }
}

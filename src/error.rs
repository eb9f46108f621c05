//! Closed result-code set and error-site diagnostics.
//!
//! Each subsystem defines its own `thiserror` enum (`WalError`,
//! `MemtableError`, …) so callers keep the full source chain. On top of
//! that, every top-level error maps onto the closed [`ErrorKind`] set via
//! a `kind()` accessor, giving the consensus layer and clients a stable
//! result-code surface that never grows a variant silently.

use std::fmt;
use std::panic::Location;

/// The closed set of result codes exposed at the engine boundary.
///
/// Codes that only arise in layers above this crate (transactions,
/// cluster replication) are carried for wire compatibility — nothing in
/// this crate produces them, but the consensus and coordinator layers
/// funnel their failures through the same set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Success sentinel (used in status vectors, never in `Err`).
    None,
    /// Operating-system level failure.
    System,
    /// Memory allocation failure.
    Memory,
    /// Parameter or contract violation; state untouched.
    Param,
    /// File-system failure.
    File,
    /// Network failure (transport layers only).
    Network,
    /// Key or resource not present.
    NotFound,
    /// Key or resource already present.
    Exist,
    /// A bounded wait elapsed.
    Timeout,
    /// Lock acquisition failed.
    Lock,
    /// Resource temporarily unavailable (backpressure, read-only engine).
    Busy,
    /// Operation not supported by this build or configuration.
    NotSupported,
    /// Checksum or format validation failed.
    Corrupted,
    /// Storage device exhausted.
    DiskFull,
    /// Transaction conflict (coordinator layer).
    TxnConflict,
    /// Transaction aborted (coordinator layer).
    TxnAbort,
    /// Cluster synchronisation failure (consensus layer).
    ClusterSync,
    /// Network partition detected (consensus layer).
    NetworkPartition,
    /// Leadership moved during the operation (consensus layer).
    LeaderChanged,
    /// Batch staging area capacity exceeded.
    BatchTooLarge,
    /// Lock-cycle detected; the waiter was chosen as victim.
    Deadlock,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Diagnostic context captured at an error site.
///
/// Carries the originating file, line, and a formatted message so a
/// failure surfaced several layers up still points at the code that
/// produced it. Attach to error variants that would otherwise lose the
/// site (background workers, task results).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diag {
    /// Source file of the error site.
    pub file: &'static str,
    /// Line number of the error site.
    pub line: u32,
    /// Result code assigned at the site.
    pub kind: ErrorKind,
    /// Human-readable message formatted at the site.
    pub message: String,
}

impl Diag {
    /// Capture the caller's location together with a code and message.
    #[track_caller]
    pub fn capture(kind: ErrorKind, message: impl Into<String>) -> Self {
        let loc = Location::caller();
        Self {
            file: loc.file(),
            line: loc.line(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {}:{}: {}",
            self.kind, self.file, self.line, self.message
        )
    }
}

/// Map an `std::io::Error` onto the closed set.
///
/// Shared by every subsystem that wraps raw I/O.
pub(crate) fn io_kind(err: &std::io::Error) -> ErrorKind {
    use std::io::ErrorKind as Io;
    match err.kind() {
        Io::NotFound => ErrorKind::NotFound,
        Io::AlreadyExists => ErrorKind::Exist,
        Io::OutOfMemory => ErrorKind::Memory,
        Io::TimedOut => ErrorKind::Timeout,
        Io::StorageFull => ErrorKind::DiskFull,
        Io::InvalidInput => ErrorKind::Param,
        Io::InvalidData | Io::UnexpectedEof => ErrorKind::Corrupted,
        _ => ErrorKind::File,
    }
}

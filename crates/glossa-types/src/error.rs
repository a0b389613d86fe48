//! Unified error interface for glossa.
//!
//! Every glossa error type implements [`ErrorCode`] so that the runtime,
//! the bus, and host-level policy can handle failures uniformly.
//!
//! # Design
//!
//! - **Machine-readable codes**: stable `UPPER_SNAKE_CASE` strings for
//!   programmatic handling and log correlation.
//! - **Recoverability**: whether retrying (or restarting the worker) may
//!   succeed, used by host policy when it observes a worker error.
//!
//! # Example
//!
//! ```
//! use glossa_types::ErrorCode;
//!
//! #[derive(Debug)]
//! enum LoadError {
//!     NotFound(String),
//!     Timeout,
//! }
//!
//! impl ErrorCode for LoadError {
//!     fn code(&self) -> &'static str {
//!         match self {
//!             Self::NotFound(_) => "LOAD_NOT_FOUND",
//!             Self::Timeout => "LOAD_TIMEOUT",
//!         }
//!     }
//!
//!     fn is_recoverable(&self) -> bool {
//!         matches!(self, Self::Timeout)
//!     }
//! }
//!
//! assert_eq!(LoadError::Timeout.code(), "LOAD_TIMEOUT");
//! assert!(LoadError::Timeout.is_recoverable());
//! ```

/// Unified error code interface.
///
/// # Code Format
///
/// - `UPPER_SNAKE_CASE`, prefixed with the owning layer (`CHANNEL_`,
///   `TRANSPORT_`, `DEMUX_`, `INVOCATION_`).
/// - Stable once defined; renaming a code is a breaking change.
///
/// # Recoverability
///
/// An error is recoverable when retrying the operation, or restarting the
/// worker process, may succeed: timeouts and transport loss are
/// recoverable, invalid state transitions and bad input are not.
pub trait ErrorCode {
    /// Returns the machine-readable error code.
    fn code(&self) -> &'static str;

    /// Returns whether retrying may succeed.
    fn is_recoverable(&self) -> bool;
}

/// Asserts that every error in `errors` carries a well-formed code with the
/// given prefix.
///
/// Intended for use in tests that enumerate all variants of an error type.
///
/// # Panics
///
/// Panics when a code is empty, not upper snake case, or missing the prefix.
pub fn assert_error_codes<E: ErrorCode + std::fmt::Debug>(errors: &[E], prefix: &str) {
    for err in errors {
        let code = err.code();
        assert!(!code.is_empty(), "empty code for {err:?}");
        assert!(
            code.starts_with(prefix),
            "code {code} for {err:?} missing prefix {prefix}"
        );
        assert!(
            code.chars().all(|c| c.is_ascii_uppercase() || c == '_'),
            "code {code} for {err:?} is not UPPER_SNAKE_CASE"
        );
    }
}

//! Error taxonomy (§7) and its wire-constant mapping (§6).

use std::fmt;

/// Negative-integer wire constants from §6.
pub const OK: i32 = 0;
pub const WOULD_BLOCK: i32 = -11; // EAGAIN
pub const CLOSED: i32 = -32; // EPIPE
pub const TIMED_OUT: i32 = -62; // ETIME
pub const CANCELLED: i32 = -125; // ECANCELED
pub const NOT_SUPPORTED: i32 = -95; // ENOTSUP
pub const INVALID: i32 = -22; // EINVAL

/// Unified error type for every fallible runtime operation.
///
/// Each variant maps 1:1 onto one of the wire constants above via
/// [`Error::code`] / [`Error::from_code`], so an embedder that wants the
/// raw ABI surface described in §6 doesn't need a second enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("operation would block")]
    WouldBlock,
    #[error("channel is closed")]
    Closed,
    #[error("operation timed out")]
    TimedOut,
    #[error("operation was cancelled")]
    Cancelled,
    #[error("operation not supported by this channel's capabilities")]
    NotSupported,
    #[error("invalid argument")]
    Invalid,
}

impl Error {
    pub const fn code(self) -> i32 {
        match self {
            Error::WouldBlock => WOULD_BLOCK,
            Error::Closed => CLOSED,
            Error::TimedOut => TIMED_OUT,
            Error::Cancelled => CANCELLED,
            Error::NotSupported => NOT_SUPPORTED,
            Error::Invalid => INVALID,
        }
    }

    pub const fn from_code(code: i32) -> Option<Error> {
        match code {
            OK => None,
            WOULD_BLOCK => Some(Error::WouldBlock),
            CLOSED => Some(Error::Closed),
            TIMED_OUT => Some(Error::TimedOut),
            CANCELLED => Some(Error::Cancelled),
            NOT_SUPPORTED => Some(Error::NotSupported),
            INVALID => Some(Error::Invalid),
            _ => None,
        }
    }
}

/// Newtype helper for logging/snapshot code that wants to print a wire
/// code without constructing an `Error` (e.g. `OK` has no `Error` value).
/// [`ChannelCounters`](crate::metrics::ChannelCounters) reaches for this
/// to log a failure with no dedicated counter instead of dropping it.
pub struct RawCode(pub i32);

impl fmt::Display for RawCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_roundtrips_through_from_code() {
        for e in [
            Error::WouldBlock,
            Error::Closed,
            Error::TimedOut,
            Error::Cancelled,
            Error::NotSupported,
            Error::Invalid,
        ] {
            assert_eq!(Error::from_code(e.code()), Some(e));
        }
    }

    #[test]
    fn ok_code_has_no_error_value() {
        assert_eq!(Error::from_code(OK), None);
    }
}

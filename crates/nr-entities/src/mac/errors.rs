use core::fmt;

use nr_core::{PduParseErr, SlotTime};

/// Recoverable MAC anomalies. None of these is fatal: the caller logs and skips the occasion.
#[derive(Debug, PartialEq, Eq)]
pub enum MacError {
    /// A DCI field holds a value a correctly configured network would not send,
    /// most likely a false PDCCH detection
    FalseDci { field: &'static str, value: u32 },
    /// Bit-level parse failure of a DCI, RAR or MAC PDU
    Parse(PduParseErr),
    /// Per-slot config queue at capacity
    QueueFull { time: SlotTime },
    NotImplemented { what: &'static str },
    /// Bookkeeping that does not add up, resolved by keeping what was there first
    Inconsistency { field: &'static str, reason: &'static str },
}

impl fmt::Display for MacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacError::FalseDci { field, value } => write!(f, "invalid {} {}, possibly a false DCI", field, value),
            MacError::Parse(e) => write!(f, "parse error: {}", e),
            MacError::QueueFull { time } => write!(f, "config queue for {} is full", time),
            MacError::NotImplemented { what } => write!(f, "not implemented: {}", what),
            MacError::Inconsistency { field, reason } => write!(f, "inconsistent {}: {}", field, reason),
        }
    }
}

impl From<PduParseErr> for MacError {
    fn from(e: PduParseErr) -> Self {
        MacError::Parse(e)
    }
}

/// Returns MacError::FalseDci for `field` unless `cond` holds
macro_rules! check_dci {
    ($cond:expr, $field:expr, $value:expr) => {
        if !$cond {
            return Err($crate::mac::errors::MacError::FalseDci { field: $field, value: $value as u32 });
        }
    };
}
pub(crate) use check_dci;
